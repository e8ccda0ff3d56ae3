//! Chat-completion endpoint seam.
//!
//! The [`Compactor`](crate::compaction::Compactor) talks to the model through
//! [`ChatEndpoint`]. A transport failure is an `Err(String)`; anything the
//! server answered, including refusals and rate limits, is an `Ok`
//! [`ChatResponse`] whose [`ResponseKind`] says how it went.
//!
//! [`OpenRouterClient`] implements the trait by classifying its own error
//! strings, the same way [`is_transient_error`] reads them.

use crate::{ChatRequest, OpenRouterClient};
use futures::FutureExt;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use tracing::debug;

/// Boxed future returned by [`ChatEndpoint::complete`].
pub type EndpointFuture<'a> =
    Pin<Box<dyn Future<Output = Result<ChatResponse, String>> + Send + 'a>>;

/// What a completion request is for. Endpoints may route or meter by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Summarization,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Summarization => "summarizeConversationHistory",
        }
    }
}

/// Classification of a completed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Success,
    Failed,
    Cancelled,
    RateLimited,
    QuotaExceeded,
    Filtered,
    Length,
    NotFound,
}

impl ResponseKind {
    /// Tag used in telemetry and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseKind::Success => "success",
            ResponseKind::Failed => "failed",
            ResponseKind::Cancelled => "cancelled",
            ResponseKind::RateLimited => "rateLimited",
            ResponseKind::QuotaExceeded => "quotaExceeded",
            ResponseKind::Filtered => "filtered",
            ResponseKind::Length => "length",
            ResponseKind::NotFound => "notFound",
        }
    }
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server answer to a completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatResponse {
    pub kind: ResponseKind,
    /// Server-assigned response id, when the server sent one.
    pub request_id: Option<String>,
    /// Generated text. Empty unless `kind` is `Success`.
    pub value: String,
    /// Human-readable failure reason for non-success kinds.
    pub reason: Option<String>,
}

impl ChatResponse {
    pub fn success(value: impl Into<String>) -> Self {
        Self {
            kind: ResponseKind::Success,
            request_id: None,
            value: value.into(),
            reason: None,
        }
    }

    pub fn failure(kind: ResponseKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            request_id: None,
            value: String::new(),
            reason: Some(reason.into()),
        }
    }

    pub fn with_request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseKind::Success
    }
}

/// A chat-completion endpoint.
pub trait ChatEndpoint: Send + Sync {
    fn complete<'a>(&'a self, kind: RequestKind, request: &'a ChatRequest) -> EndpointFuture<'a>;
}

impl ChatEndpoint for OpenRouterClient {
    fn complete<'a>(&'a self, kind: RequestKind, request: &'a ChatRequest) -> EndpointFuture<'a> {
        async move {
            debug!("{} request via OpenRouter", kind.as_str());
            let completion = match self.chat(request).await {
                Ok(c) => c,
                Err(e) => {
                    return match classify_api_error(&e) {
                        Some(kind) => Ok(ChatResponse::failure(kind, e)),
                        None => Err(e),
                    };
                }
            };

            let response = match completion.finish_reason.as_deref() {
                Some("content_filter") => ChatResponse::failure(
                    ResponseKind::Filtered,
                    "response blocked by content filter",
                ),
                Some("length") => ChatResponse::failure(
                    ResponseKind::Length,
                    "response hit the output token limit",
                ),
                _ => match completion.content {
                    Some(text) if !text.trim().is_empty() => ChatResponse::success(text),
                    _ => ChatResponse::failure(ResponseKind::Failed, "empty response"),
                },
            };
            Ok(match completion.id {
                Some(id) => response.with_request_id(id),
                None => response,
            })
        }
        .boxed()
    }
}

/// Map an [`OpenRouterClient`] error string to a server-side failure kind.
/// `None` means the request never got a usable answer (transport failure).
pub fn classify_api_error(error: &str) -> Option<ResponseKind> {
    let status_kinds = [
        ("HTTP 429", ResponseKind::RateLimited),
        ("HTTP 402", ResponseKind::QuotaExceeded),
        ("HTTP 404", ResponseKind::NotFound),
    ];
    if let Some((_, kind)) = status_kinds.iter().find(|(s, _)| error.contains(s)) {
        return Some(*kind);
    }
    if error.starts_with("OpenRouter API HTTP") || error.starts_with("OpenRouter API error") {
        return Some(ResponseKind::Failed);
    }
    None
}

/// Whether an error string indicates a transient failure worth retrying
/// at a higher level.
pub fn is_transient_error(error: &str) -> bool {
    if ["429", "500", "502", "503", "504"]
        .iter()
        .any(|s| error.contains(&format!("HTTP {s}")))
    {
        return true;
    }
    let lower = error.to_lowercase();
    ["request failed:", "timed out", "connection reset", "connection refused"]
        .iter()
        .any(|p| lower.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_statuses() {
        assert_eq!(
            classify_api_error("OpenRouter API HTTP 429 Too Many Requests: slow down"),
            Some(ResponseKind::RateLimited)
        );
        assert_eq!(
            classify_api_error("OpenRouter API HTTP 402 Payment Required: {}"),
            Some(ResponseKind::QuotaExceeded)
        );
        assert_eq!(
            classify_api_error("OpenRouter API HTTP 404 Not Found: no such model"),
            Some(ResponseKind::NotFound)
        );
        assert_eq!(
            classify_api_error("OpenRouter API HTTP 500 Internal Server Error: oops"),
            Some(ResponseKind::Failed)
        );
        assert_eq!(
            classify_api_error("OpenRouter API error: invalid request"),
            Some(ResponseKind::Failed)
        );
    }

    #[test]
    fn transport_errors_are_not_responses() {
        assert_eq!(classify_api_error("request failed: connection refused"), None);
        assert_eq!(classify_api_error("failed to parse response: EOF"), None);
    }

    #[test]
    fn transient_errors() {
        assert!(is_transient_error("OpenRouter API HTTP 503 Service Unavailable: x"));
        assert!(is_transient_error("request failed: operation timed out"));
        assert!(!is_transient_error("OpenRouter API HTTP 400 Bad Request: x"));
    }

    #[test]
    fn kind_tags_are_camel_case() {
        assert_eq!(ResponseKind::RateLimited.as_str(), "rateLimited");
        assert_eq!(ResponseKind::QuotaExceeded.to_string(), "quotaExceeded");
        assert_eq!(ResponseKind::Failed.as_str(), "failed");
    }

    #[test]
    fn response_constructors() {
        let ok = ChatResponse::success("S1").with_request_id("gen-1");
        assert!(ok.is_success());
        assert_eq!(ok.request_id.as_deref(), Some("gen-1"));

        let failed = ChatResponse::failure(ResponseKind::Filtered, "blocked");
        assert!(!failed.is_success());
        assert!(failed.value.is_empty());
        assert_eq!(failed.reason.as_deref(), Some("blocked"));
    }
}
