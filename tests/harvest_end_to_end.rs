//! End-to-end harvests against a mock origin.
//!
//! Each test serves a feed, chapter views and page images from its own
//! wiremock server and stores into its own temp directory. Anything the mock
//! does not serve answers 404, which is what ends a chapter in probing mode.

use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tankobon::diagnostics::{Diagnostics, NoopDiagnostics};
use tankobon::discovery::{FeedDiscovery, HttpRenderer, PageScanDiscovery};
use tankobon::fetch::{HttpPageFetcher, ImageLocator};
use tankobon::http::build_client;
use tankobon::orchestrator::{
    ChapterOrchestrator, ChapterOutcome, ChapterRange, HarvestSettings, RangeEnd,
};
use tankobon::scheduler::{RetryDelay, RetryPolicy, SchedulerSettings};
use tankobon::series::SeriesRef;
use tankobon::sink::FsSink;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn png(shade: u8) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(3, 2, image::Rgb([shade, 0, 255 - shade]));
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn temp_root(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tankobon_e2e_{}_{}", name, std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn feed(latest: u32) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>One Piece</title>
    <item>
      <title>One Piece Chapter {latest}</title>
      <guid isPermaLink="false">one-piece-{latest}</guid>
    </item>
    <item>
      <title>One Piece Chapter {prev}</title>
      <guid isPermaLink="false">one-piece-{prev}</guid>
    </item>
  </channel>
</rss>"#,
        prev = latest - 1
    )
}

async fn serve_page(server: &MockServer, chapter: u32, page: u32) -> Vec<u8> {
    let bytes = png((chapter * 10 + page) as u8);
    Mock::given(method("GET"))
        .and(path(format!("/manga/One-piece/{chapter:04}-{page:03}.png")))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(bytes.clone()),
        )
        .mount(server)
        .await;
    bytes
}

fn settings(chapters: usize, pages: usize, patience: u32) -> HarvestSettings {
    let retry = RetryPolicy::new(patience, RetryDelay::None);
    HarvestSettings {
        chapters: SchedulerSettings::new(chapters).with_retry(retry),
        pages: SchedulerSettings::new(pages).with_retry(retry),
    }
}

fn feed_discovery(server: &MockServer, diagnostics: &Arc<dyn Diagnostics>) -> FeedDiscovery {
    FeedDiscovery::new(
        build_client(TIMEOUT).unwrap(),
        format!("{}/rss", server.uri()),
        TIMEOUT,
        Arc::clone(diagnostics),
    )
    .with_retry_base(Duration::from_millis(10))
}

#[tokio::test]
async fn test_feed_discovery_and_probing_store_every_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss/One-piece.xml"))
        .respond_with(ResponseTemplate::new(200).set_body_string(feed(3)))
        .mount(&server)
        .await;
    let mut expected = Vec::new();
    for chapter in 2..=3 {
        for page in 1..=2 {
            expected.push((chapter, page, serve_page(&server, chapter, page).await));
        }
    }

    let root = temp_root("feed");
    let diagnostics: Arc<dyn Diagnostics> = Arc::new(NoopDiagnostics);
    let client = build_client(TIMEOUT).unwrap();
    let orchestrator = ChapterOrchestrator::new(
        Arc::new(SeriesRef::new("One Piece")),
        Arc::new(feed_discovery(&server, &diagnostics)),
        Arc::new(HttpPageFetcher::new(client, TIMEOUT, Arc::clone(&diagnostics))),
        Arc::new(FsSink::new(&root)),
        ImageLocator::new(format!("{}/manga/", server.uri())),
        settings(2, 2, 3),
        diagnostics,
    );

    let report = orchestrator
        .run(ChapterRange {
            begin: 2,
            end: RangeEnd::Discover,
        })
        .await
        .unwrap();

    assert_eq!((report.begin, report.end), (2, 3));
    assert_eq!(report.totals.pages_stored, 4);
    assert!(!report.has_abandonment());
    for outcome in &report.chapters {
        let ChapterOutcome::Completed(pages) = outcome else {
            panic!("chapter {} not completed: {outcome:?}", outcome.chapter());
        };
        assert_eq!(pages.inferred_length, Some(2));
    }
    for (chapter, page, bytes) in expected {
        let stored = std::fs::read(root.join(format!("{chapter:04}/{page:03}.png"))).unwrap();
        assert_eq!(stored, bytes, "chapter {chapter} page {page}");
    }

    // Page windows are {1,2} then {3,4}; page 3 ends the chapter so the
    // third window is never drawn.
    let requests = server.received_requests().await.unwrap();
    assert!(requests
        .iter()
        .all(|r| !r.url.path().ends_with("-005.png") && !r.url.path().ends_with("-006.png")));

    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn test_page_scan_stores_listed_images_in_order() {
    let server = MockServer::start().await;
    let first = serve_page(&server, 1, 1).await;
    let second = serve_page(&server, 1, 2).await;
    let html = format!(
        r#"<html><body>
<img src="/assets/logo.png">
<img class="page" src="/manga/One-piece/0001-001.png">
<IMG data-src="/lazy.gif" SRC='{uri}/manga/One-piece/0001-002.png'>
<img src="/manga/One-piece/0001-001.png">
</body></html>"#,
        uri = server.uri()
    );
    Mock::given(method("GET"))
        .and(path("/read-online/One-piece-chapter-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(html))
        .mount(&server)
        .await;

    let root = temp_root("page_scan");
    let diagnostics: Arc<dyn Diagnostics> = Arc::new(NoopDiagnostics);
    let client = build_client(TIMEOUT).unwrap();
    let discovery = PageScanDiscovery::new(
        Arc::new(HttpRenderer::new(client.clone())),
        server.uri(),
        TIMEOUT,
        feed_discovery(&server, &diagnostics),
        Arc::clone(&diagnostics),
    );
    let orchestrator = ChapterOrchestrator::new(
        Arc::new(SeriesRef::new("one piece")),
        Arc::new(discovery),
        Arc::new(HttpPageFetcher::new(client, TIMEOUT, Arc::clone(&diagnostics))),
        Arc::new(FsSink::new(&root)),
        // Unused: listed pages carry their own URLs.
        ImageLocator::new("http://unused.invalid"),
        settings(1, 4, 1),
        diagnostics,
    );

    let report = orchestrator
        .run(ChapterRange {
            begin: 1,
            end: RangeEnd::Index(1),
        })
        .await
        .unwrap();

    assert_eq!(report.totals.pages_stored, 2);
    assert_eq!(std::fs::read(root.join("0001/001.png")).unwrap(), first);
    assert_eq!(std::fs::read(root.join("0001/002.png")).unwrap(), second);
    assert!(!root.join("0001/003.png").exists());

    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn test_unavailable_chapter_is_abandoned_after_patience() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/manga/One-piece/0001-001.png"))
        .respond_with(ResponseTemplate::new(503))
        .expect(2)
        .mount(&server)
        .await;
    serve_page(&server, 2, 1).await;

    let root = temp_root("unavailable");
    let diagnostics: Arc<dyn Diagnostics> = Arc::new(NoopDiagnostics);
    let client = build_client(TIMEOUT).unwrap();
    let orchestrator = ChapterOrchestrator::new(
        Arc::new(SeriesRef::new("One Piece")),
        Arc::new(feed_discovery(&server, &diagnostics)),
        Arc::new(HttpPageFetcher::new(client, TIMEOUT, Arc::clone(&diagnostics))),
        Arc::new(FsSink::new(&root)),
        ImageLocator::new(format!("{}/manga", server.uri())),
        settings(1, 1, 2),
        diagnostics,
    );

    let report = orchestrator
        .run(ChapterRange {
            begin: 1,
            end: RangeEnd::Index(2),
        })
        .await
        .unwrap();

    assert!(report.has_abandonment());
    assert_eq!(report.totals.chapters_abandoned, 1);
    assert_eq!(report.totals.chapters_completed, 1);
    match &report.chapters[0] {
        ChapterOutcome::Abandoned {
            chapter: 1,
            attempts: 1,
            pages: Some(pages),
            ..
        } => {
            assert_eq!(pages.abandoned_pages[0].attempts, 2);
            assert_eq!(pages.abandoned_pages[0].cause, "HTTP error: status 503");
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert!(root.join("0002/001.png").exists());
    assert!(!root.join("0001").exists());

    std::fs::remove_dir_all(&root).ok();
}

#[tokio::test]
async fn test_unreachable_feed_fails_the_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rss/One-piece.xml"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let diagnostics: Arc<dyn Diagnostics> = Arc::new(NoopDiagnostics);
    let client = build_client(TIMEOUT).unwrap();
    let orchestrator = ChapterOrchestrator::new(
        Arc::new(SeriesRef::new("One Piece")),
        Arc::new(feed_discovery(&server, &diagnostics)),
        Arc::new(HttpPageFetcher::new(client, TIMEOUT, Arc::clone(&diagnostics))),
        Arc::new(FsSink::new(temp_root("unreachable"))),
        ImageLocator::new(format!("{}/manga", server.uri())),
        settings(1, 1, 1),
        diagnostics,
    );

    let err = orchestrator
        .run(ChapterRange {
            begin: 1,
            end: RangeEnd::Discover,
        })
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "HTTP error: status 404");
}
