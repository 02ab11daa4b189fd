//! LLM provider implementations for Barebone.
//!
//! Each vendor is a pure [`ProviderAdapter`](barebone_core::ProviderAdapter)
//! paired with a shared [`Transport`]; [`HttpProvider`] joins the two into a
//! `barebone_core::Provider`. The router picks a vendor from an explicit
//! name or from the credential prefix.

pub mod anthropic;
pub mod http;
pub mod openai_compat;
pub mod router;
pub mod sse;
pub mod transport;

pub use anthropic::{AnthropicAdapter, AnthropicProvider};
pub use http::HttpProvider;
pub use openai_compat::{OpenAiCompatAdapter, OpenAiCompatProvider};
pub use router::{
    ProviderKind, ProviderSettings, build_from_config, build_provider, detect_provider, resolve_provider,
};
pub use transport::{ReqwestTransport, Transport};
