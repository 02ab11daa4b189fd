//! `http_request`: make an arbitrary HTTP request.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;

use barebone_core::error::ToolError;
use barebone_core::schema::{ParamSpec, ParamType};
use barebone_core::tool::{Tool, ToolOutput};

use crate::web_fetch::{check_url, client};
use crate::workspace::{opt_str_arg, str_arg, truncate, u64_arg};

const MAX_CHARS: usize = 30_000;

pub struct HttpRequestTool;

fn parse_method(method: &str) -> Result<reqwest::Method, ToolError> {
    match method.to_ascii_uppercase().as_str() {
        "GET" => Ok(reqwest::Method::GET),
        "POST" => Ok(reqwest::Method::POST),
        "PUT" => Ok(reqwest::Method::PUT),
        "PATCH" => Ok(reqwest::Method::PATCH),
        "DELETE" => Ok(reqwest::Method::DELETE),
        "HEAD" => Ok(reqwest::Method::HEAD),
        other => Err(ToolError::InvalidArguments(format!(
            "Invalid HTTP method: {other}. Must be GET, POST, PUT, PATCH, DELETE or HEAD."
        ))),
    }
}

#[async_trait]
impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request. Returns the status code and response body."
    }

    fn parameters(&self) -> Vec<ParamSpec> {
        vec![
            ParamSpec::required("url", ParamType::String).describe("The URL to send the request to"),
            ParamSpec::optional("method", ParamType::String)
                .describe("HTTP method")
                .with_default("GET"),
            ParamSpec::optional("headers", ParamType::Object).describe("Request headers as key-value pairs"),
            ParamSpec::optional("body", ParamType::String).describe("Request body"),
            ParamSpec::optional("timeout", ParamType::Integer)
                .describe("Timeout in seconds")
                .with_default(30),
        ]
    }

    async fn execute(&self, arguments: Map<String, Value>) -> Result<ToolOutput, ToolError> {
        let url = str_arg(&arguments, "url")?;
        check_url(url)?;
        let method = parse_method(opt_str_arg(&arguments, "method").unwrap_or("GET"))?;
        let timeout = Duration::from_secs(u64_arg(&arguments, "timeout", 30));

        let mut request = client(timeout)?.request(method.clone(), url);
        if let Some(headers) = arguments.get("headers").and_then(Value::as_object) {
            for (name, value) in headers {
                let value = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                request = request.header(name.as_str(), value);
            }
        }
        if let Some(body) = opt_str_arg(&arguments, "body") {
            request = request.body(body.to_string());
        }

        debug!(%method, url = %url, "Sending HTTP request");
        let response = request
            .send()
            .await
            .map_err(|e| ToolError::failed("http_request", e))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ToolError::failed("http_request", e))?;

        Ok(truncate(format!("Status: {}\n\n{body}", status.as_u16()), MAX_CHARS).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn methods() {
        assert_eq!(parse_method("post").unwrap(), reqwest::Method::POST);
        assert!(matches!(parse_method("TRACE"), Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn validates_before_sending() {
        let err = HttpRequestTool
            .execute(json!({"url": "ftp://example.com"}).as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("http://"));

        let err = HttpRequestTool
            .execute(json!({"url": "https://example.com", "method": "BREW"}).as_object().cloned().unwrap())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("BREW"));
    }
}
