//! Discovery of the index space: how many chapters exist and which pages a
//! chapter holds.
//!
//! Two backends sit behind [`DiscoveryBackend`]:
//!
//! - [`FeedDiscovery`] reads the series' syndication feed for the latest
//!   chapter and leaves page enumeration to numeric probing
//! - [`PageScanDiscovery`] loads each chapter's rendered view and lists the
//!   page images it references
//!
//! The orchestrator is handed one of them at construction and never
//! branches on which.

mod feed;
mod page_scan;

pub use feed::{chapter_from_guid, first_item_guid, FeedDiscovery, FEED_ATTEMPTS};
pub use page_scan::{
    extract_image_sources, HttpRenderer, PageRenderer, PageScanDiscovery, MAX_PAGE_SIZE,
};

use crate::http::BodyError;
use crate::series::SeriesRef;
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// A page enumerated by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageRef {
    /// 1-based position within the chapter
    pub page: u32,
    pub url: String,
}

/// How the pages of one chapter are to be enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagePlan {
    /// Length unknown: probe pages 1, 2, 3, ... until the boundary signal.
    Probe,
    /// Pages listed up front, in reading order. May be empty.
    Listed(Vec<PageRef>),
}

/// Errors that can occur during discovery.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// HTTP request failed
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    /// Request exceeded its timeout
    #[error("request timed out")]
    Timeout,
    /// Non-2xx HTTP response
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the size limit
    #[error("response too large (exceeds {0} bytes)")]
    TooLarge(usize),
    /// Received fewer bytes than Content-Length announced
    #[error("incomplete response: expected {expected} bytes, received {received}")]
    Incomplete { expected: u64, received: usize },
    /// Feed is not well-formed XML
    #[error("malformed feed: {0}")]
    Malformed(String),
    /// Feed has no `item` element
    #[error("feed has no item")]
    MissingItem,
    /// First feed item has no (or an empty) `guid`
    #[error("first feed item has no guid")]
    MissingGuid,
    /// The guid does not end in a numeric token
    #[error("guid '{0}' does not end in a chapter number")]
    NoChapterNumber(String),
    /// The rendering collaborator failed
    #[error("render failed: {0}")]
    Render(String),
}

impl DiscoveryError {
    /// Returns true if another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            DiscoveryError::Network(_)
            | DiscoveryError::Timeout
            | DiscoveryError::Incomplete { .. } => true,
            DiscoveryError::HttpStatus(status) => *status >= 500,
            DiscoveryError::TooLarge(_)
            | DiscoveryError::Malformed(_)
            | DiscoveryError::MissingItem
            | DiscoveryError::MissingGuid
            | DiscoveryError::NoChapterNumber(_)
            | DiscoveryError::Render(_) => false,
        }
    }
}

impl From<BodyError> for DiscoveryError {
    fn from(err: BodyError) -> Self {
        match err {
            BodyError::Network(e) => DiscoveryError::Network(e),
            BodyError::TooLarge(limit) => DiscoveryError::TooLarge(limit),
            BodyError::Incomplete { expected, received } => {
                DiscoveryError::Incomplete { expected, received }
            }
        }
    }
}

/// Source of truth for the extent of a series.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Highest chapter index currently published.
    async fn discover_chapter_latest(&self, series: &SeriesRef) -> Result<u32, DiscoveryError>;

    /// Page enumeration plan for one chapter.
    async fn discover_pages(
        &self,
        series: &SeriesRef,
        chapter: u32,
    ) -> Result<PagePlan, DiscoveryError>;
}
