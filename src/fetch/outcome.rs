use crate::http::BodyError;
use thiserror::Error;

/// Cause attached to a transient or fatal fetch outcome.
#[derive(Debug, Error)]
pub enum FetchFailure {
    /// Network-level error (DNS, connection, TLS, reset)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// Request or body read exceeded the configured timeout
    #[error("Request timed out")]
    Timeout,
    /// Non-2xx, non-404 HTTP response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the image size limit
    #[error("Response too large (exceeds {0} bytes)")]
    TooLarge(usize),
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
    /// Payload is not a decodable image
    #[error("Image decode failed: {0}")]
    Decode(#[from] image::ImageError),
    /// The blocking decode task panicked or was cancelled
    #[error("Decode task failed: {0}")]
    DecodeTask(String),
}

impl From<BodyError> for FetchFailure {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => FetchFailure::Network(e),
            BodyError::TooLarge(limit) => FetchFailure::TooLarge(limit),
            BodyError::Incomplete { expected, received } => {
                FetchFailure::Incomplete { expected, received }
            }
        }
    }
}

/// Result of one single-attempt page fetch.
///
/// `NotFound` is not a failure: in probing mode it is how a chapter's
/// length is discovered.
#[derive(Debug)]
pub enum FetchOutcome {
    Success { bytes: Vec<u8>, content_type: String },
    NotFound,
    Transient(FetchFailure),
    Fatal(FetchFailure),
}

impl FetchOutcome {
    /// Classifies a body-read failure: size overruns are fatal, the rest
    /// may succeed on another attempt.
    pub fn from_body_error(err: BodyError) -> Self {
        match err {
            BodyError::TooLarge(_) => FetchOutcome::Fatal(err.into()),
            BodyError::Network(_) | BodyError::Incomplete { .. } => {
                FetchOutcome::Transient(err.into())
            }
        }
    }

    /// Classifies a non-2xx status: 404 is the boundary signal, 5xx is
    /// transient, every other status is fatal.
    pub fn from_status(status: reqwest::StatusCode) -> Self {
        if status == reqwest::StatusCode::NOT_FOUND {
            FetchOutcome::NotFound
        } else if status.is_server_error() {
            FetchOutcome::Transient(FetchFailure::HttpStatus(status.as_u16()))
        } else {
            FetchOutcome::Fatal(FetchFailure::HttpStatus(status.as_u16()))
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, FetchOutcome::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_status_404_is_not_found() {
        assert!(matches!(
            FetchOutcome::from_status(StatusCode::NOT_FOUND),
            FetchOutcome::NotFound
        ));
    }

    #[test]
    fn test_server_errors_are_transient() {
        for code in [500u16, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            match FetchOutcome::from_status(status) {
                FetchOutcome::Transient(FetchFailure::HttpStatus(c)) => assert_eq!(c, code),
                other => panic!("Expected Transient for {code}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_other_client_errors_are_fatal() {
        for code in [400u16, 401, 403, 410, 429] {
            let status = StatusCode::from_u16(code).unwrap();
            match FetchOutcome::from_status(status) {
                FetchOutcome::Fatal(FetchFailure::HttpStatus(c)) => assert_eq!(c, code),
                other => panic!("Expected Fatal for {code}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_body_errors_classification() {
        assert!(matches!(
            FetchOutcome::from_body_error(BodyError::TooLarge(10)),
            FetchOutcome::Fatal(FetchFailure::TooLarge(10))
        ));
        assert!(matches!(
            FetchOutcome::from_body_error(BodyError::Incomplete {
                expected: 10,
                received: 4
            }),
            FetchOutcome::Transient(FetchFailure::Incomplete { .. })
        ));
    }
}
