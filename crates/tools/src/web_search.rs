//! `web_search`: search the web through DuckDuckGo's HTML endpoint.

use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::web_fetch::{client, decode_entities};
use crate::workspace::{str_arg, u64_arg};

const SEARCH_URL: &str = "https://html.duckduckgo.com/html/";

static RESULT_LINK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap());
static RESULT_SNIPPET: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).unwrap());
static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

fn clean(fragment: &str) -> String {
    decode_entities(&TAG.replace_all(fragment, "")).trim().to_string()
}

/// DuckDuckGo wraps targets as `//duckduckgo.com/l/?uddg=<encoded>`.
fn unwrap_redirect(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else {
        href.to_string()
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}

/// Pull results out of a DuckDuckGo HTML results page.
pub fn parse_results(html: &str, limit: usize) -> Vec<SearchResult> {
    let snippets: Vec<String> = RESULT_SNIPPET
        .captures_iter(html)
        .map(|c| clean(&c[1]))
        .collect();

    RESULT_LINK
        .captures_iter(html)
        .take(limit)
        .enumerate()
        .map(|(i, c)| SearchResult {
            title: clean(&c[2]),
            url: unwrap_redirect(&decode_entities(&c[1])),
            snippet: snippets.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

pub struct WebSearchTool;

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Returns titles, URLs and snippets of the top results."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("query", ParamType::String).describe("The search query"),
            ParamSpec::optional("num_results", ParamType::Integer)
                .describe("Number of results to return")
                .with_default(5),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let query = str_arg(&arguments, "query")?;
        let limit = u64_arg(&arguments, "num_results", 5).clamp(1, 20) as usize;

        debug!(query = %query, "Searching the web");
        let html = client(Duration::from_secs(30))?
            .get(SEARCH_URL)
            .query(&[("q", query)])
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ToolError::failed("web_search", e))?
            .text()
            .await
            .map_err(|e| ToolError::failed("web_search", e))?;

        let results = parse_results(&html, limit);
        if results.is_empty() {
            return Ok(format!("No results found for: {query}").into());
        }

        let text = results
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}. {}\n   {}\n   {}", i + 1, r.title, r.url, r.snippet))
            .collect::<Vec<_>>()
            .join("\n\n");
        Ok(text.into())
    }
}
