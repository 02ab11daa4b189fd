//! Provider selection: explicit names, credential prefixes, and config.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use tracing::debug;

use barebone_config::AppConfig;
use barebone_core::error::{Error, Result};
use barebone_core::provider::Provider;

use crate::anthropic::{self, AnthropicAdapter, AnthropicProvider};
use crate::openai_compat::{self, OpenAiCompatAdapter, OpenAiCompatProvider};

/// The vendors a credential can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    OpenRouter,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::OpenRouter => "openrouter",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            Self::Anthropic => anthropic::DEFAULT_BASE_URL,
            Self::OpenAi => openai_compat::OPENAI_BASE_URL,
            Self::OpenRouter => openai_compat::OPENROUTER_BASE_URL,
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Anthropic => anthropic::DEFAULT_MODEL,
            Self::OpenAi => "gpt-4o",
            Self::OpenRouter => "anthropic/claude-sonnet-4",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anthropic" => Ok(Self::Anthropic),
            "openai" => Ok(Self::OpenAi),
            "openrouter" => Ok(Self::OpenRouter),
            other => Err(Error::ProviderResolution(format!(
                "unknown provider '{other}' (expected anthropic, openai or openrouter)"
            ))),
        }
    }
}

/// Ordered credential prefix rules; the first match wins.
pub const PREFIX_RULES: &[(&str, ProviderKind)] = &[
    ("sk-ant-", ProviderKind::Anthropic),
    ("sk-or-", ProviderKind::OpenRouter),
    ("sk-", ProviderKind::OpenAi),
];

/// Infer the provider from a credential's prefix (case-sensitive).
pub fn detect_provider(api_key: &str) -> Result<ProviderKind> {
    PREFIX_RULES
        .iter()
        .find(|(prefix, _)| api_key.starts_with(prefix))
        .map(|(_, kind)| *kind)
        .ok_or_else(|| {
            Error::ProviderResolution(
                "cannot infer a provider from the API key prefix; set the provider explicitly".into(),
            )
        })
}

/// An explicit provider name wins; otherwise the key prefix decides.
pub fn resolve_provider(api_key: &str, explicit: Option<&str>) -> Result<ProviderKind> {
    match explicit.map(str::trim).filter(|p| !p.is_empty()) {
        Some(name) => name.parse(),
        None => detect_provider(api_key),
    }
}

/// Everything needed to build a provider.
#[derive(Clone, Default)]
pub struct ProviderSettings {
    pub api_key: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("api_key", &"[REDACTED]")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl ProviderSettings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            ..Default::default()
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }
}

/// Build a provider from settings. Fails before any network traffic.
pub fn build_provider(settings: &ProviderSettings) -> Result<Arc<dyn Provider>> {
    if settings.api_key.trim().is_empty() {
        return Err(Error::ProviderResolution(
            "no API key given and none of ANTHROPIC_API_KEY, OPENROUTER_API_KEY, OPENAI_API_KEY is set".into(),
        ));
    }

    let kind = resolve_provider(&settings.api_key, settings.provider.as_deref())?;
    let model = settings.model.as_deref().unwrap_or(kind.default_model());
    let base_url = settings.base_url.as_deref().unwrap_or(kind.default_base_url());
    debug!(provider = %kind, model, base_url, "Building provider");

    let provider: Arc<dyn Provider> = match kind {
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            AnthropicAdapter::new(&settings.api_key)
                .with_model(model)
                .with_base_url(base_url),
        )),
        ProviderKind::OpenAi | ProviderKind::OpenRouter => Arc::new(OpenAiCompatProvider::new(
            OpenAiCompatAdapter::new(kind.as_str(), base_url, &settings.api_key, model),
        )),
    };
    Ok(provider)
}

/// Build the configured provider.
pub fn build_from_config(config: &AppConfig) -> Result<Arc<dyn Provider>> {
    let settings = ProviderSettings {
        api_key: config.api_key.clone().unwrap_or_default(),
        provider: config.provider.clone(),
        model: config.model.clone(),
        base_url: config.base_url.clone(),
    };
    build_provider(&settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_detection() {
        assert_eq!(detect_provider("sk-ant-abc123").unwrap(), ProviderKind::Anthropic);
        assert_eq!(detect_provider("sk-or-v1-abc").unwrap(), ProviderKind::OpenRouter);
        assert_eq!(detect_provider("sk-abc123").unwrap(), ProviderKind::OpenAi);
        assert!(matches!(detect_provider("gsk_abc"), Err(Error::ProviderResolution(_))));
        // Case-sensitive.
        assert!(detect_provider("SK-ANT-abc").is_err());
    }

    #[test]
    fn explicit_provider_wins() {
        assert_eq!(
            resolve_provider("sk-ant-abc", Some("openrouter")).unwrap(),
            ProviderKind::OpenRouter
        );
        assert_eq!(resolve_provider("custom-key", Some("Anthropic")).unwrap(), ProviderKind::Anthropic);
        assert_eq!(resolve_provider("sk-abc", Some("  ")).unwrap(), ProviderKind::OpenAi);
        assert!(resolve_provider("sk-abc", Some("gemini")).is_err());
    }

    #[test]
    fn build_uses_defaults_and_overrides() {
        let provider = build_provider(&ProviderSettings::new("sk-ant-test")).unwrap();
        assert_eq!(provider.name(), "anthropic");
        assert_eq!(provider.model(), anthropic::DEFAULT_MODEL);

        let provider = build_provider(
            &ProviderSettings::new("key")
                .with_provider("openrouter")
                .with_model("openai/gpt-4o-mini"),
        )
        .unwrap();
        assert_eq!(provider.name(), "openrouter");
        assert_eq!(provider.model(), "openai/gpt-4o-mini");
    }

    #[test]
    fn missing_key_fails_fast() {
        let err = build_provider(&ProviderSettings::default()).err().unwrap();
        assert!(matches!(err, Error::ProviderResolution(_)));
    }

    #[test]
    fn from_config() {
        let config = AppConfig {
            api_key: Some("sk-proj-abc".into()),
            model: Some("gpt-4o-mini".into()),
            ..Default::default()
        };
        let provider = build_from_config(&config).unwrap();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o-mini");
    }

    #[test]
    fn settings_debug_redacts_key() {
        let debug = format!("{:?}", ProviderSettings::new("sk-ant-secret"));
        assert!(!debug.contains("secret"));
    }
}
