//! The external text oracle consulted when no keyword rule matches.
//!
//! Two interchangeable HTTP endpoints are supported: a plain GET that returns
//! the reply as the body, and a chat-style JSON POST. [`FailoverOracle`] tries
//! a primary and then a secondary.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

pub const PRIMARY_URL: &str = "https://text.pollinations.ai";
pub const SECONDARY_URL: &str = "https://text.pollinations.ai/openai";
pub const DEFAULT_MODEL: &str = "openai";

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    #[error("oracle network error: {0}")]
    Network(String),
    #[error("oracle returned HTTP {0}")]
    Status(u16),
    #[error("oracle reply malformed: {0}")]
    Malformed(String),
    #[error("oracle timed out")]
    Timeout,
    #[error("all oracle endpoints failed (primary: {primary}; secondary: {secondary})")]
    AllEndpointsFailed {
        primary: Box<OracleError>,
        secondary: Box<OracleError>,
    },
}

#[async_trait]
pub trait Oracle: Send + Sync {
    /// Send a prompt, get the raw reply text.
    async fn complete(&self, prompt: &str) -> Result<String, OracleError>;
}

/// Wire style of one oracle endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleEndpoint {
    /// `GET <base_url>/<url-encoded prompt>`; the body is the reply.
    PlainGet { base_url: String },
    /// `POST <url>` with a chat-completions style body.
    ChatPost { url: String, model: String },
}

/// One HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpOracle {
    endpoint: OracleEndpoint,
    request_timeout: Duration,
}

impl HttpOracle {
    pub fn new(endpoint: OracleEndpoint) -> Self {
        Self {
            endpoint,
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    fn call(endpoint: &OracleEndpoint, prompt: &str, timeout: Duration) -> Result<String, OracleError> {
        let response = match endpoint {
            OracleEndpoint::PlainGet { base_url } => {
                let url = format!("{}/{}", base_url.trim_end_matches('/'), urlencode(prompt));
                ureq::get(&url)
                    .set("User-Agent", "CariLokasi/0.1")
                    .timeout(timeout)
                    .call()
            }
            OracleEndpoint::ChatPost { url, model } => ureq::post(url)
                .set("User-Agent", "CariLokasi/0.1")
                .timeout(timeout)
                .send_json(json!({
                    "model": model,
                    "messages": [{ "role": "user", "content": prompt }],
                })),
        }
        .map_err(|e| match e {
            ureq::Error::Status(code, _) => OracleError::Status(code),
            ureq::Error::Transport(t) => OracleError::Network(t.to_string()),
        })?;

        let body = response
            .into_string()
            .map_err(|e| OracleError::Malformed(e.to_string()))?;
        extract_reply(&body)
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let endpoint = self.endpoint.clone();
        let prompt = prompt.to_string();
        let timeout = self.request_timeout;
        tokio::task::spawn_blocking(move || Self::call(&endpoint, &prompt, timeout))
            .await
            .map_err(|e| OracleError::Network(e.to_string()))?
    }
}

/// Pull the reply text out of a response body.
///
/// JSON bodies are searched for `choices[0].message.content`, `text` and
/// `response`; anything else is taken as plain text.
fn extract_reply(body: &str) -> Result<String, OracleError> {
    match serde_json::from_str::<Value>(body) {
        Ok(value) if value.is_object() => value
            .pointer("/choices/0/message/content")
            .or_else(|| value.get("text"))
            .or_else(|| value.get("response"))
            .and_then(Value::as_str)
            .ok_or_else(|| OracleError::Malformed("no reply text in JSON body".into()))
            .and_then(non_empty),
        Ok(Value::String(text)) => non_empty(&text),
        _ => non_empty(body),
    }
}

fn non_empty(text: &str) -> Result<String, OracleError> {
    let text = text.trim();
    if text.is_empty() {
        Err(OracleError::Malformed("empty reply".into()))
    } else {
        Ok(text.to_string())
    }
}

/// Primary endpoint first, secondary on any failure.
pub struct FailoverOracle {
    primary: Box<dyn Oracle>,
    secondary: Box<dyn Oracle>,
}

impl FailoverOracle {
    pub fn new(primary: Box<dyn Oracle>, secondary: Box<dyn Oracle>) -> Self {
        Self { primary, secondary }
    }

    /// The two public endpoints with default settings.
    pub fn public_endpoints() -> Self {
        Self::new(
            Box::new(HttpOracle::new(OracleEndpoint::PlainGet {
                base_url: PRIMARY_URL.into(),
            })),
            Box::new(HttpOracle::new(OracleEndpoint::ChatPost {
                url: SECONDARY_URL.into(),
                model: DEFAULT_MODEL.into(),
            })),
        )
    }
}

#[async_trait]
impl Oracle for FailoverOracle {
    async fn complete(&self, prompt: &str) -> Result<String, OracleError> {
        let primary = match self.primary.complete(prompt).await {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };
        tracing::warn!(error = %primary, "primary oracle failed, trying secondary");
        self.secondary
            .complete(prompt)
            .await
            .map_err(|secondary| OracleError::AllEndpointsFailed {
                primary: Box::new(primary),
                secondary: Box::new(secondary),
            })
    }
}

/// An oracle that is never reachable; used in offline mode.
#[derive(Debug, Default, Clone, Copy)]
pub struct Unreachable;

#[async_trait]
impl Oracle for Unreachable {
    async fn complete(&self, _prompt: &str) -> Result<String, OracleError> {
        Err(OracleError::Network("offline mode".into()))
    }
}

/// Percent-encode everything outside the URL unreserved set.
fn urlencode(s: &str) -> String {
    let mut out = String::with_capacity(s.len() * 3);
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => out.push(b as char),
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}
