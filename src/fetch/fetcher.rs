use super::outcome::{FetchFailure, FetchOutcome};
use crate::diagnostics::Diagnostics;
use crate::http::read_limited_bytes;
use async_trait::async_trait;
use image::ImageFormat;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound for a single page image.
pub const MAX_IMAGE_SIZE: usize = 32 * 1024 * 1024; // 32MB

/// Single-attempt retrieval of one page image.
///
/// Implementations never retry; the scheduler owns the retry policy.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> FetchOutcome;
}

/// Fetches page images over HTTP and validates them by decoding.
pub struct HttpPageFetcher {
    client: reqwest::Client,
    timeout: Duration,
    diagnostics: Arc<dyn Diagnostics>,
}

impl HttpPageFetcher {
    pub fn new(
        client: reqwest::Client,
        timeout: Duration,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            client,
            timeout,
            diagnostics,
        }
    }
}

#[async_trait]
impl PageFetcher for HttpPageFetcher {
    async fn fetch(&self, url: &str) -> FetchOutcome {
        let response = match tokio::time::timeout(self.timeout, self.client.get(url).send()).await
        {
            Err(_) => return FetchOutcome::Transient(FetchFailure::Timeout),
            Ok(Err(e)) => return FetchOutcome::Transient(FetchFailure::Network(e)),
            Ok(Ok(response)) => response,
        };

        let status = response.status();
        if !status.is_success() {
            return FetchOutcome::from_status(status);
        }

        let source_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_owned();

        let bytes =
            match tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_IMAGE_SIZE))
                .await
            {
                Err(_) => return FetchOutcome::Transient(FetchFailure::Timeout),
                Ok(Err(e)) => return FetchOutcome::from_body_error(e),
                Ok(Ok(bytes)) => bytes,
            };

        let received = bytes.len();
        // Decoding is CPU-bound; keep it off the async workers
        match tokio::task::spawn_blocking(move || normalize_to_png(bytes)).await {
            Ok(Ok(png)) => {
                self.diagnostics.debug(format_args!(
                    "'{url}' downloaded ({received} bytes, {source_type})"
                ));
                FetchOutcome::Success {
                    bytes: png,
                    content_type: "image/png".to_owned(),
                }
            }
            Ok(Err(e)) => FetchOutcome::Fatal(FetchFailure::Decode(e)),
            Err(e) => FetchOutcome::Fatal(FetchFailure::DecodeTask(e.to_string())),
        }
    }
}

/// Decodes the payload and returns PNG bytes.
///
/// PNG input is returned untouched once it decodes; other formats are
/// re-encoded.
pub fn normalize_to_png(bytes: Vec<u8>) -> Result<Vec<u8>, image::ImageError> {
    let format = image::guess_format(&bytes)?;
    let decoded = image::load_from_memory_with_format(&bytes, format)?;
    if format == ImageFormat::Png {
        return Ok(bytes);
    }

    let mut out = Vec::new();
    decoded.write_to(&mut Cursor::new(&mut out), ImageFormat::Png)?;
    Ok(out)
}
