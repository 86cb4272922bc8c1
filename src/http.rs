//! Shared HTTP plumbing for the remote providers.
//!
//! All outbound calls (embedding, index, generation, spreadsheet) go through
//! [`send_with_retry`], which applies one retry policy:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Failure talking to one of the remote services.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{service} request failed: {source}")]
    Http {
        service: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{service} API error {status}: {message}")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} returned an unexpected response: {detail}")]
    Malformed {
        service: &'static str,
        detail: String,
    },
}

impl ApiError {
    pub fn malformed(service: &'static str, detail: impl Into<String>) -> Self {
        ApiError::Malformed {
            service,
            detail: detail.into(),
        }
    }

    /// HTTP status, if the service answered at all.
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            ApiError::Http { source, .. } => source.status().map(|s| s.as_u16()),
            ApiError::Malformed { .. } => None,
        }
    }
}

/// Build a client with the given request timeout.
pub fn client(timeout_secs: u64) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
}

/// Send the request produced by `build`, retrying transient failures up to
/// `max_retries` times. Returns the first successful response.
pub async fn send_with_retry<F>(
    service: &'static str,
    max_retries: u32,
    mut build: F,
) -> Result<reqwest::Response, ApiError>
where
    F: FnMut() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            warn!(
                service,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "retrying after transient failure"
            );
            tokio::time::sleep(delay).await;
        }

        match build().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response);
                }

                let message = response.text().await.unwrap_or_default();
                let err = ApiError::Status {
                    service,
                    status: status.as_u16(),
                    message,
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }

                return Err(err);
            }
            Err(source) => {
                last_err = Some(ApiError::Http { service, source });
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ApiError::malformed(service, "request failed after retries")))
}

/// Decode a successful response body as JSON. A body that cannot be read is
/// a transport failure; one that is not JSON is [`ApiError::Malformed`].
pub async fn json_body(
    service: &'static str,
    response: reqwest::Response,
) -> Result<serde_json::Value, ApiError> {
    let text = response
        .text()
        .await
        .map_err(|source| ApiError::Http { service, source })?;
    parse_json(service, &text)
}

fn parse_json(service: &'static str, text: &str) -> Result<serde_json::Value, ApiError> {
    serde_json::from_str(text).map_err(|e| {
        let preview: String = text.chars().take(80).collect();
        ApiError::malformed(service, format!("body is not JSON ({}): {}", e, preview))
    })
}

/// Prefix `https://` onto a bare host name; full URLs pass through.
pub fn with_scheme(host: &str) -> String {
    let host = host.trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{}", host)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_scheme() {
        assert_eq!(
            with_scheme("herb-knowledge-abc.svc.pinecone.io"),
            "https://herb-knowledge-abc.svc.pinecone.io"
        );
        assert_eq!(with_scheme("http://127.0.0.1:9000/"), "http://127.0.0.1:9000");
    }

    #[test]
    fn test_status_accessor() {
        let err = ApiError::Status {
            service: "pinecone",
            status: 404,
            message: "no such index".into(),
        };
        assert_eq!(err.status(), Some(404));
        assert!(err.to_string().contains("pinecone API error 404"));
        assert_eq!(ApiError::malformed("gemini", "x").status(), None);
    }

    #[test]
    fn test_non_json_body_is_malformed() {
        let err = parse_json("gemini-embedding", "<html>proxy error</html>").unwrap_err();
        assert!(matches!(err, ApiError::Malformed { .. }));
        assert!(err.to_string().contains("<html>proxy error"));
        assert_eq!(parse_json("x", r#"{"ok":true}"#).unwrap()["ok"], true);
    }
}
