use crate::discovery::PageRef;
use crate::series::SeriesRef;
use std::sync::Arc;

/// Which page a task targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageTarget {
    /// Probing mode: the URL is computed from the page number.
    Numbered(u32),
    /// Page-scan mode: the URL was enumerated by discovery.
    Resolved(PageRef),
}

/// Unit of scheduling and of retry for one page.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub series: Arc<SeriesRef>,
    pub chapter: u32,
    pub target: PageTarget,
}

impl FetchTask {
    pub fn numbered(series: Arc<SeriesRef>, chapter: u32, page: u32) -> Self {
        Self {
            series,
            chapter,
            target: PageTarget::Numbered(page),
        }
    }

    pub fn resolved(series: Arc<SeriesRef>, chapter: u32, page: PageRef) -> Self {
        Self {
            series,
            chapter,
            target: PageTarget::Resolved(page),
        }
    }

    /// 1-based page index, the storage key within the chapter.
    pub fn page(&self) -> u32 {
        match &self.target {
            PageTarget::Numbered(page) => *page,
            PageTarget::Resolved(page_ref) => page_ref.page,
        }
    }

    pub fn url(&self, locator: &ImageLocator) -> String {
        match &self.target {
            PageTarget::Numbered(page) => locator.url_for(&self.series, self.chapter, *page),
            PageTarget::Resolved(page_ref) => page_ref.url.clone(),
        }
    }
}

/// Builds image URLs of the form
/// `<origin>/<canonical_id>/<chapter:04>-<page:03>.png`.
#[derive(Debug, Clone)]
pub struct ImageLocator {
    origin: String,
}

impl ImageLocator {
    pub fn new(origin: impl Into<String>) -> Self {
        let origin = origin.into();
        Self {
            origin: origin.trim_end_matches('/').to_owned(),
        }
    }

    pub fn url_for(&self, series: &SeriesRef, chapter: u32, page: u32) -> String {
        format!(
            "{}/{}/{:04}-{:03}.png",
            self.origin,
            series.canonical_id(),
            chapter,
            page
        )
    }
}
