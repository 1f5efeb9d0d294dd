use super::feed::FeedDiscovery;
use super::{DiscoveryBackend, DiscoveryError, PagePlan, PageRef};
use crate::diagnostics::Diagnostics;
use crate::http::read_limited_bytes;
use crate::series::SeriesRef;
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use url::Url;

pub const MAX_PAGE_SIZE: usize = 5 * 1024 * 1024; // 5MB

static PAGE_FILE: OnceLock<Regex> = OnceLock::new();

/// Page images are named `<chapter:04>-<page:03>.png`.
fn page_file_pattern() -> &'static Regex {
    PAGE_FILE.get_or_init(|| Regex::new(r"\d{4}-\d{3}\.png$").expect("compile PAGE_FILE"))
}

/// Produces the HTML of a chapter view once its dynamic content settled.
///
/// A browser-driven session can implement this; [`HttpRenderer`] covers
/// sites that serve the image list in the initial document.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Loads `url`, waiting at most `settle` for the content.
    async fn render(&self, url: &str, settle: Duration) -> Result<String, DiscoveryError>;
}

/// Renders by plain GET; `settle` bounds the whole load.
pub struct HttpRenderer {
    client: reqwest::Client,
}

impl HttpRenderer {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageRenderer for HttpRenderer {
    async fn render(&self, url: &str, settle: Duration) -> Result<String, DiscoveryError> {
        let load = async {
            let response = self.client.get(url).send().await?;
            if !response.status().is_success() {
                return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
            }
            let bytes = read_limited_bytes(response, MAX_PAGE_SIZE).await?;
            Ok::<_, DiscoveryError>(String::from_utf8_lossy(&bytes).into_owned())
        };

        tokio::time::timeout(settle, load)
            .await
            .map_err(|_| DiscoveryError::Timeout)?
    }
}

/// Lists page images by scanning each chapter's rendered view.
///
/// Chapter views live at
/// `<site_origin>/read-online/<canonical_id>-chapter-<N>.html`. The latest
/// chapter still comes from the feed.
pub struct PageScanDiscovery {
    renderer: Arc<dyn PageRenderer>,
    site_origin: String,
    settle_timeout: Duration,
    latest: FeedDiscovery,
    diagnostics: Arc<dyn Diagnostics>,
}

impl PageScanDiscovery {
    pub fn new(
        renderer: Arc<dyn PageRenderer>,
        site_origin: impl Into<String>,
        settle_timeout: Duration,
        latest: FeedDiscovery,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let site_origin = site_origin.into();
        Self {
            renderer,
            site_origin: site_origin.trim_end_matches('/').to_owned(),
            settle_timeout,
            latest,
            diagnostics,
        }
    }

    pub fn chapter_url(&self, series: &SeriesRef, chapter: u32) -> String {
        format!(
            "{}/read-online/{}-chapter-{}.html",
            self.site_origin,
            series.canonical_id(),
            chapter
        )
    }
}

#[async_trait]
impl DiscoveryBackend for PageScanDiscovery {
    async fn discover_chapter_latest(&self, series: &SeriesRef) -> Result<u32, DiscoveryError> {
        self.latest.discover_chapter_latest(series).await
    }

    async fn discover_pages(
        &self,
        series: &SeriesRef,
        chapter: u32,
    ) -> Result<PagePlan, DiscoveryError> {
        let url = self.chapter_url(series, chapter);
        let html = self.renderer.render(&url, self.settle_timeout).await?;

        let pages = page_refs(&html, &url);
        self.diagnostics.debug(format_args!(
            "Chapter {chapter}: {} page images found in '{url}'",
            pages.len()
        ));
        Ok(PagePlan::Listed(pages))
    }
}

/// Filters image sources down to page files, numbering them in document
/// order. Repeated sources keep their first position.
fn page_refs(html: &str, base_url: &str) -> Vec<PageRef> {
    let mut seen = HashSet::new();
    extract_image_sources(html, base_url)
        .into_iter()
        .filter(|src| is_page_file(src))
        .filter(|src| seen.insert(src.clone()))
        .zip(1u32..)
        .map(|(url, page)| PageRef { page, url })
        .collect()
}

/// Matches the file name, ignoring any query string or fragment.
fn is_page_file(src: &str) -> bool {
    let path = match Url::parse(src) {
        Ok(parsed) => parsed.path().to_owned(),
        Err(_) => src.split(&['?', '#'][..]).next().unwrap_or(src).to_owned(),
    };
    page_file_pattern().is_match(&path)
}

/// Collects the `src` of every `<img>` tag in document order, resolved
/// against `base_url`.
///
/// Uses simple string scanning (no HTML parser dependency) and tolerates
/// attribute ordering, quoting style and tag case.
pub fn extract_image_sources(html: &str, base_url: &str) -> Vec<String> {
    let base = Url::parse(base_url).ok();
    let html_lower = html.to_lowercase();
    let mut sources = Vec::new();
    let mut search_from = 0;

    while let Some(img_start) = html_lower[search_from..].find("<img") {
        let abs_start = search_from + img_start;
        let remaining = &html_lower[abs_start..];

        let tag_end = match remaining.find('>') {
            Some(pos) => pos,
            None => break,
        };

        // Lowercasing can change byte lengths outside ASCII; only trust the
        // offsets when both strings line up
        if let Some(original_tag) = html.get(abs_start..abs_start + tag_end + 1) {
            if let Some(src) = extract_attr_value(original_tag, "src") {
                let src = src.trim();
                if !src.is_empty() {
                    sources.push(resolve_src(src, base.as_ref()));
                }
            }
        }

        search_from = abs_start + tag_end + 1;
    }

    sources
}

/// Extracts an attribute value from a tag string (case-preserving).
///
/// The name must start at a word boundary, so `src` never matches `data-src`.
fn extract_attr_value<'a>(tag: &'a str, attr_name: &str) -> Option<&'a str> {
    let tag_lower = tag.to_lowercase();
    let attr_prefix = format!("{attr_name}=");
    let mut search_from = 0;

    while let Some(found) = tag_lower.get(search_from..)?.find(&attr_prefix) {
        let attr_start = search_from + found;
        let boundary = tag_lower[..attr_start]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_whitespace());

        if boundary {
            let value_start = attr_start + attr_prefix.len();
            let rest = tag.get(value_start..)?;
            let quote = *rest.as_bytes().first()?;
            if quote != b'"' && quote != b'\'' {
                // Unquoted value runs to whitespace or the end of the tag
                let end = rest
                    .find(|c: char| c.is_ascii_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                return Some(rest[..end].trim_end_matches('/'));
            }
            let inner = &rest[1..];
            let end = inner.find(quote as char)?;
            return Some(&inner[..end]);
        }

        search_from = attr_start + attr_prefix.len();
    }

    None
}

/// Absolute sources pass through; relative and scheme-relative ones take
/// the chapter view's origin. Unresolvable sources are kept verbatim and
/// later fail the page-file match or the fetch.
fn resolve_src(src: &str, base: Option<&Url>) -> String {
    match base.map(|base| base.join(src)) {
        Some(Ok(resolved)) => resolved.into(),
        _ => src.to_owned(),
    }
}
