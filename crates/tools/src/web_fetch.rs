//! `web_fetch`: fetch a page and return its readable text.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::workspace::{str_arg, truncate, u64_arg};

const MAX_CHARS: usize = 50_000;
pub(crate) const USER_AGENT: &str = concat!("barebone/", env!("CARGO_PKG_VERSION"));

static SCRIPT_STYLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<(script|style|noscript)\b.*?</(script|style|noscript)>").unwrap());
static COMMENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static BLOCK_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(br|/p|/div|/li|/h[1-6]|/tr)\b[^>]*>").unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<[^>]+>").unwrap());
static SPACES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[ \t\r\f]+").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n\s*\n+").unwrap());

/// Reduce an HTML document to its visible text.
pub fn strip_html(html: &str) -> String {
    let text = SCRIPT_STYLE.replace_all(html, "");
    let text = COMMENT.replace_all(&text, "");
    let text = BLOCK_END.replace_all(&text, "\n");
    let text = TAG.replace_all(&text, "");
    let text = decode_entities(&text);
    let text = SPACES.replace_all(&text, " ");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.lines().map(str::trim).collect::<Vec<_>>().join("\n").trim().to_string()
}

pub(crate) fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&amp;", "&")
}

pub(crate) fn client(timeout: Duration) -> Result<reqwest::Client, ToolError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| ToolError::failed("http", format!("Failed to create HTTP client: {e}")))
}

pub(crate) fn check_url(url: &str) -> Result<(), ToolError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments("URL must start with http:// or https://".into()))
    }
}

pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn description(&self) -> &str {
        "Fetch a URL and return its content as plain text (HTML is stripped)."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("url", ParamType::String).describe("The URL to fetch"),
            ParamSpec::optional("timeout", ParamType::Integer)
                .describe("Timeout in seconds")
                .with_default(30),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let url = str_arg(&arguments, "url")?;
        check_url(url)?;
        let timeout = Duration::from_secs(u64_arg(&arguments, "timeout", 30));

        debug!(url = %url, "Fetching page");
        let response = client(timeout)?
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::failed("web_fetch", e))?;

        let status = response.status();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("html"));
        let body = response.text().await.map_err(|e| ToolError::failed("web_fetch", e))?;

        if !status.is_success() {
            return Err(ToolError::failed("web_fetch", format!("HTTP {status}")));
        }

        let text = if is_html { strip_html(&body) } else { body };
        Ok(truncate(text, MAX_CHARS).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_markup_scripts_and_entities() {
        let html = r#"<html><head><style>p{}</style><script>var x = "<b>";</script></head>
            <body><h1>Title</h1><!-- hidden --><p>Fish &amp; chips&nbsp;today</p><div>a<br>b</div></body></html>"#;
        assert_eq!(strip_html(html), "Title\nFish & chips today\na\nb");
    }

    #[tokio::test]
    async fn rejects_non_http_urls() {
        let err = WebFetchTool
            .execute(json!({"url": "file:///etc/passwd"}).as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
