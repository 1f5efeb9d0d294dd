use super::{DiscoveryBackend, DiscoveryError, PagePlan};
use crate::diagnostics::Diagnostics;
use crate::http::read_limited_bytes;
use crate::series::SeriesRef;
use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::Reader;
use std::sync::Arc;
use std::time::Duration;

/// Attempts made on a transient feed failure before the run gives up.
pub const FEED_ATTEMPTS: u32 = 3;
const MAX_FEED_SIZE: usize = 10 * 1024 * 1024; // 10MB

/// Learns the latest chapter from the series' RSS feed.
///
/// The feed lives at `<feed_origin>/<canonical_id>.xml`; the first item's
/// `guid` ends in `-<chapter>`. Pages are not listed by the feed, so
/// [`discover_pages`](DiscoveryBackend::discover_pages) always answers
/// [`PagePlan::Probe`].
pub struct FeedDiscovery {
    client: reqwest::Client,
    feed_origin: String,
    timeout: Duration,
    retry_base: Duration,
    diagnostics: Arc<dyn Diagnostics>,
}

impl FeedDiscovery {
    pub fn new(
        client: reqwest::Client,
        feed_origin: impl Into<String>,
        timeout: Duration,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        let feed_origin = feed_origin.into();
        Self {
            client,
            feed_origin: feed_origin.trim_end_matches('/').to_owned(),
            timeout,
            retry_base: Duration::from_secs(1),
            diagnostics,
        }
    }

    /// Overrides the backoff base (1s, 2s with the default).
    pub fn with_retry_base(mut self, retry_base: Duration) -> Self {
        self.retry_base = retry_base;
        self
    }

    pub fn feed_url(&self, series: &SeriesRef) -> String {
        format!("{}/{}.xml", self.feed_origin, series.canonical_id())
    }

    async fn fetch_latest(&self, url: &str) -> Result<u32, DiscoveryError> {
        let response = tokio::time::timeout(self.timeout, self.client.get(url).send())
            .await
            .map_err(|_| DiscoveryError::Timeout)?
            .map_err(DiscoveryError::Network)?;

        if !response.status().is_success() {
            return Err(DiscoveryError::HttpStatus(response.status().as_u16()));
        }

        let bytes = tokio::time::timeout(self.timeout, read_limited_bytes(response, MAX_FEED_SIZE))
            .await
            .map_err(|_| DiscoveryError::Timeout)??;

        let guid = first_item_guid(&bytes)?;
        chapter_from_guid(&guid)
    }
}

#[async_trait]
impl DiscoveryBackend for FeedDiscovery {
    async fn discover_chapter_latest(&self, series: &SeriesRef) -> Result<u32, DiscoveryError> {
        let url = self.feed_url(series);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match self.fetch_latest(&url).await {
                Ok(chapter) => {
                    self.diagnostics.info(format_args!(
                        "'{url}' reports chapter {chapter} as latest"
                    ));
                    return Ok(chapter);
                }
                Err(e) if e.is_transient() && attempt < FEED_ATTEMPTS => {
                    let delay = self.retry_base * (1u32 << (attempt - 1)); // 1s, 2s
                    self.diagnostics.warn(format_args!(
                        "Feed read failed ({e}), attempt {attempt}/{FEED_ATTEMPTS}, retrying in {delay:?}"
                    ));
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    self.diagnostics
                        .error(format_args!("Feed discovery failed for '{url}': {e}"));
                    return Err(e);
                }
            }
        }
    }

    async fn discover_pages(
        &self,
        _series: &SeriesRef,
        _chapter: u32,
    ) -> Result<PagePlan, DiscoveryError> {
        Ok(PagePlan::Probe)
    }
}

/// Returns the text of the first `item`'s `guid` child.
///
/// The item may sit at any depth (`rss/channel/item` in practice); only a
/// direct `guid` child counts.
pub fn first_item_guid(xml: &[u8]) -> Result<String, DiscoveryError> {
    let mut reader = Reader::from_reader(xml);
    reader.config_mut().trim_text(true);

    let mut buf = Vec::new();
    // Depth below the first <item>, None until it opens
    let mut item_depth: Option<usize> = None;
    let mut in_guid = false;
    let mut guid = String::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => match item_depth {
                None if e.local_name().as_ref() == b"item" => item_depth = Some(0),
                None => {}
                Some(depth) => {
                    if depth == 0 && e.local_name().as_ref() == b"guid" {
                        in_guid = true;
                    }
                    item_depth = Some(depth + 1);
                }
            },
            Ok(Event::Empty(e)) => match item_depth {
                // <item/> or <guid/>: an item with no usable guid
                None if e.local_name().as_ref() == b"item" => {
                    return Err(DiscoveryError::MissingGuid)
                }
                Some(0) if e.local_name().as_ref() == b"guid" => {
                    return Err(DiscoveryError::MissingGuid)
                }
                _ => {}
            },
            Ok(Event::Text(text)) if in_guid => {
                let unescaped = text
                    .unescape()
                    .map_err(|e| DiscoveryError::Malformed(e.to_string()))?;
                guid.push_str(&unescaped);
            }
            Ok(Event::CData(data)) if in_guid => {
                guid.push_str(&String::from_utf8_lossy(&data));
            }
            Ok(Event::End(_)) => match item_depth {
                Some(0) => return Err(DiscoveryError::MissingGuid),
                Some(depth) => {
                    if in_guid {
                        let guid = guid.trim();
                        if guid.is_empty() {
                            return Err(DiscoveryError::MissingGuid);
                        }
                        return Ok(guid.to_owned());
                    }
                    item_depth = Some(depth - 1);
                }
                None => {}
            },
            Ok(Event::Eof) if item_depth.is_some() => {
                return Err(DiscoveryError::Malformed(
                    "feed ends inside an item".to_owned(),
                ))
            }
            Ok(Event::Eof) => return Err(DiscoveryError::MissingItem),
            Err(e) => return Err(DiscoveryError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
}

/// Parses the trailing `-<number>` token of a guid.
pub fn chapter_from_guid(guid: &str) -> Result<u32, DiscoveryError> {
    let token = guid.rsplit('-').next().unwrap_or(guid).trim();
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(DiscoveryError::NoChapterNumber(guid.to_owned()));
    }
    token
        .parse()
        .map_err(|_| DiscoveryError::NoChapterNumber(guid.to_owned()))
}
