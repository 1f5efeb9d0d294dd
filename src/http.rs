//! Shared HTTP plumbing: client construction and bounded body reads.

use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;

/// Failure while streaming a response body.
#[derive(Debug, Error)]
pub enum BodyError {
    /// Connection dropped or reset mid-body
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Body exceeded the caller's size limit
    #[error("Response too large (exceeds {0} bytes)")]
    TooLarge(usize),
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
}

/// Create a redirect policy with loop detection and limited hops.
///
/// - Limits redirects to 3 hops maximum
/// - Detects redirect loops (same URL appearing twice in chain)
fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= 3 {
            return attempt.error("Too many redirects (max 3)");
        }

        let url = attempt.url();
        for prev in attempt.previous() {
            if prev.as_str() == url.as_str() {
                return attempt.error("Redirect loop detected");
            }
        }

        tracing::debug!(
            from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
            to = %url,
            hop = attempt.previous().len() + 1,
            "Following redirect"
        );

        attempt.follow()
    })
}

/// Builds the client shared by discovery and page fetching.
///
/// The client-level timeout is a backstop; callers still wrap each request
/// in `tokio::time::timeout` so a timeout maps to their own error variant.
pub fn build_client(request_timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(redirect_policy())
        .pool_max_idle_per_host(16)
        .pool_idle_timeout(Duration::from_secs(30))
        .tcp_keepalive(Duration::from_secs(60))
        .timeout(request_timeout.saturating_mul(2))
        .user_agent(concat!("tankobon/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Reads a response body, enforcing `limit` and checking completeness
/// against Content-Length.
pub async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, BodyError> {
    let expected_length = response.content_length();

    // Fast path: reject on the declared length before streaming anything
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(BodyError::TooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(BodyError::TooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(BodyError::Incomplete {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_read_within_limit() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![7u8; 64]))
            .mount(&mock_server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let response = client.get(mock_server.uri()).send().await.unwrap();
        let bytes = read_limited_bytes(response, 1024).await.unwrap();
        assert_eq!(bytes.len(), 64);
    }

    #[tokio::test]
    async fn test_read_over_limit_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&mock_server)
            .await;

        let client = build_client(Duration::from_secs(5)).unwrap();
        let response = client.get(mock_server.uri()).send().await.unwrap();
        let result = read_limited_bytes(response, 1024).await;
        assert!(matches!(result, Err(BodyError::TooLarge(1024))));
    }
}
