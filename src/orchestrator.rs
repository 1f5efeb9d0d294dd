//! Chapter-level harvesting.
//!
//! [`ChapterOrchestrator`] nests two schedulers: an outer one whose tasks are
//! whole chapters, and, inside each chapter task, an inner one whose tasks
//! are single pages. A chapter succeeds as soon as at least one page was
//! stored; missing pages are reported alongside it rather than failing it.

use crate::diagnostics::Diagnostics;
use crate::discovery::{DiscoveryBackend, DiscoveryError, PagePlan};
use crate::fetch::{FetchFailure, FetchOutcome, FetchTask, ImageLocator, PageFetcher};
use crate::scheduler::{
    AbortSignal, Attempt, BoundedScheduler, Enumeration, ScheduleReport, SchedulerSettings,
    TaskState,
};
use crate::series::SeriesRef;
use crate::sink::{Sink, SinkError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Last chapter of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "RawRangeEnd")]
pub enum RangeEnd {
    /// Ask discovery for the latest published chapter.
    #[default]
    Discover,
    Index(u32),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRangeEnd {
    Index(i64),
    Word(String),
}

impl TryFrom<RawRangeEnd> for RangeEnd {
    type Error = String;

    fn try_from(raw: RawRangeEnd) -> Result<Self, Self::Error> {
        match raw {
            RawRangeEnd::Index(n) => u32::try_from(n)
                .map(RangeEnd::Index)
                .map_err(|_| format!("chapter index out of range: {n}")),
            RawRangeEnd::Word(word) => word.parse(),
        }
    }
}

impl FromStr for RangeEnd {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("discover") {
            return Ok(RangeEnd::Discover);
        }
        s.parse::<u32>()
            .map(RangeEnd::Index)
            .map_err(|_| format!("expected a chapter number or \"discover\", got '{s}'"))
    }
}

impl fmt::Display for RangeEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RangeEnd::Discover => f.write_str("discover"),
            RangeEnd::Index(n) => write!(f, "{n}"),
        }
    }
}

/// Inclusive chapter range requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChapterRange {
    pub begin: u32,
    pub end: RangeEnd,
}

/// Settings of the two nested schedulers.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestSettings {
    pub chapters: SchedulerSettings,
    pub pages: SchedulerSettings,
}

impl HarvestSettings {
    /// Upper bound on page requests in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.chapters.concurrency.max(1) * self.pages.concurrency.max(1)
    }
}

/// Why a page was abandoned.
#[derive(Debug, Error)]
pub enum PageFailure {
    #[error("{0}")]
    Fetch(FetchFailure),
    /// Discovery listed the page but the origin answered 404.
    #[error("listed page not found")]
    Missing,
    #[error("{0}")]
    Sink(#[from] SinkError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AbandonedPage {
    pub page: u32,
    pub attempts: u32,
    pub cause: String,
}

/// What happened inside one chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterReport {
    pub chapter: u32,
    pub stored: usize,
    pub abandoned_pages: Vec<AbandonedPage>,
    /// Chapter length learned from the probing boundary
    #[serde(skip_serializing_if = "Option::is_none")]
    pub inferred_length: Option<u32>,
    /// Pages drawn but never attempted
    pub discarded: usize,
    /// The run was aborted before this chapter's pages were all tried
    pub interrupted: bool,
}

impl ChapterReport {
    fn from_pages(chapter: u32, pages: &ScheduleReport<FetchTask, (), PageFailure>) -> Self {
        let abandoned_pages = pages
            .abandoned()
            .filter_map(|record| match &record.state {
                TaskState::Abandoned { cause, .. } => Some(AbandonedPage {
                    page: record.task.page(),
                    attempts: record.attempts,
                    cause: cause.to_string(),
                }),
                _ => None,
            })
            .collect();

        Self {
            chapter,
            stored: pages.tally.succeeded,
            abandoned_pages,
            inferred_length: pages
                .stop_record()
                .filter(|record| record.state.is_boundary())
                .map(|record| record.task.page().saturating_sub(1)),
            discarded: pages.tally.discarded,
            interrupted: pages.aborted,
        }
    }
}

#[derive(Debug, Error)]
pub enum ChapterFailure {
    #[error("page discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("no page could be stored ({} abandoned)", .0.abandoned_pages.len())]
    NoProgress(ChapterReport),
}

/// Final state of one chapter of the range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChapterOutcome {
    Completed(ChapterReport),
    Abandoned {
        chapter: u32,
        attempts: u32,
        cause: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pages: Option<ChapterReport>,
    },
    /// Started, but the run was aborted before every page was tried.
    Interrupted(ChapterReport),
    /// Never attempted because the run was aborted.
    Skipped { chapter: u32 },
}

impl ChapterOutcome {
    pub fn chapter(&self) -> u32 {
        match self {
            ChapterOutcome::Completed(report) | ChapterOutcome::Interrupted(report) => {
                report.chapter
            }
            ChapterOutcome::Abandoned { chapter, .. } | ChapterOutcome::Skipped { chapter } => {
                *chapter
            }
        }
    }

    fn pages(&self) -> Option<&ChapterReport> {
        match self {
            ChapterOutcome::Completed(report) | ChapterOutcome::Interrupted(report) => {
                Some(report)
            }
            ChapterOutcome::Abandoned { pages, .. } => pages.as_ref(),
            ChapterOutcome::Skipped { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub chapters_completed: usize,
    pub chapters_abandoned: usize,
    pub chapters_interrupted: usize,
    pub chapters_skipped: usize,
    pub pages_stored: usize,
    pub pages_missing: usize,
}

/// Everything one harvest produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub series: String,
    pub begin: u32,
    /// Resolved last chapter (inclusive)
    pub end: u32,
    pub chapters: Vec<ChapterOutcome>,
    /// Chapter windows dispatched
    pub windows: usize,
    /// An abort left chapters or pages untried
    pub aborted: bool,
    pub totals: RunTotals,
}

impl RunReport {
    fn new(series: &SeriesRef, begin: u32, end: u32, chapters: Vec<ChapterOutcome>, windows: usize, aborted: bool) -> Self {
        let mut totals = RunTotals::default();
        for outcome in &chapters {
            match outcome {
                ChapterOutcome::Completed(_) => totals.chapters_completed += 1,
                ChapterOutcome::Abandoned { .. } => totals.chapters_abandoned += 1,
                ChapterOutcome::Interrupted(_) => totals.chapters_interrupted += 1,
                ChapterOutcome::Skipped { .. } => totals.chapters_skipped += 1,
            }
            if let Some(pages) = outcome.pages() {
                totals.pages_stored += pages.stored;
                totals.pages_missing += pages.abandoned_pages.len();
            }
        }
        Self {
            series: series.display_name().to_owned(),
            begin,
            end,
            chapters,
            windows,
            aborted: aborted || totals.chapters_interrupted > 0 || totals.chapters_skipped > 0,
            totals,
        }
    }

    /// True when any chapter or page was given up on.
    pub fn has_abandonment(&self) -> bool {
        self.totals.chapters_abandoned > 0 || self.totals.pages_missing > 0
    }

    /// True when every chapter of the range ran to its end and nothing was
    /// given up on.
    pub fn is_complete(&self) -> bool {
        !self.aborted && !self.has_abandonment()
    }
}

/// Harvests a range of chapters of one series.
pub struct ChapterOrchestrator {
    series: Arc<SeriesRef>,
    discovery: Arc<dyn DiscoveryBackend>,
    fetcher: Arc<dyn PageFetcher>,
    sink: Arc<dyn Sink>,
    locator: ImageLocator,
    settings: HarvestSettings,
    abort: AbortSignal,
    diagnostics: Arc<dyn Diagnostics>,
}

impl ChapterOrchestrator {
    pub fn new(
        series: Arc<SeriesRef>,
        discovery: Arc<dyn DiscoveryBackend>,
        fetcher: Arc<dyn PageFetcher>,
        sink: Arc<dyn Sink>,
        locator: ImageLocator,
        settings: HarvestSettings,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        Self {
            series,
            discovery,
            fetcher,
            sink,
            locator,
            settings,
            abort: AbortSignal::new(),
            diagnostics,
        }
    }

    /// Raising the returned signal stops the run after in-flight work drains.
    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Harvest `range`. Only a failure to resolve the end of the range is
    /// an error; everything after that is reported per chapter.
    pub async fn run(&self, range: ChapterRange) -> Result<RunReport, DiscoveryError> {
        let end = match range.end {
            RangeEnd::Index(end) => end,
            RangeEnd::Discover => {
                let latest = self.discovery.discover_chapter_latest(&self.series).await?;
                self.diagnostics.info(format_args!(
                    "{}: latest chapter is {}",
                    self.series, latest
                ));
                latest
            }
        };
        let begin = range.begin;

        if end < begin {
            self.diagnostics.warn(format_args!(
                "{}: nothing to harvest, range {}..={} is empty",
                self.series, begin, end
            ));
            return Ok(RunReport::new(&self.series, begin, end, Vec::new(), 0, false));
        }

        self.diagnostics.info(format_args!(
            "{}: harvesting chapters {}..={} ({} chapter(s) at a time, {} page(s) per chapter, up to {} requests in flight)",
            self.series,
            begin,
            end,
            self.settings.chapters.concurrency,
            self.settings.pages.concurrency,
            self.settings.peak_in_flight()
        ));

        let chapters = BoundedScheduler::new(
            "chapters",
            self.settings.chapters.clone(),
            self.abort.clone(),
            Arc::clone(&self.diagnostics),
        );
        let report = chapters
            .run(begin..=end, Enumeration::Finite, |chapter| {
                self.harvest_chapter(chapter)
            })
            .await;

        let windows = report.windows();
        let aborted = report.aborted;
        let mut records = report.records.into_iter().peekable();
        let mut outcomes = Vec::new();
        for chapter in begin..=end {
            let record = match records.peek() {
                Some(record) if record.task == chapter => records.next(),
                _ => None,
            };
            let outcome = match record {
                Some(record) => match record.state {
                    TaskState::Succeeded(pages) if pages.interrupted => {
                        ChapterOutcome::Interrupted(pages)
                    }
                    TaskState::Succeeded(pages) => ChapterOutcome::Completed(pages),
                    TaskState::Abandoned { cause, .. } => {
                        self.diagnostics.warn(format_args!(
                            "{}: chapter {} abandoned after {} attempt(s): {}",
                            self.series, chapter, record.attempts, cause
                        ));
                        let message = cause.to_string();
                        ChapterOutcome::Abandoned {
                            chapter,
                            attempts: record.attempts,
                            cause: message,
                            pages: match cause {
                                ChapterFailure::NoProgress(pages) => Some(pages),
                                ChapterFailure::Discovery(_) => None,
                            },
                        }
                    }
                    TaskState::Boundary => ChapterOutcome::Skipped { chapter },
                },
                None => ChapterOutcome::Skipped { chapter },
            };
            outcomes.push(outcome);
        }

        let run = RunReport::new(&self.series, begin, end, outcomes, windows, aborted);
        self.diagnostics.info(format_args!(
            "{}: {} chapter(s) done, {} abandoned, {} interrupted, {} skipped; {} page(s) stored, {} missing",
            self.series,
            run.totals.chapters_completed,
            run.totals.chapters_abandoned,
            run.totals.chapters_interrupted,
            run.totals.chapters_skipped,
            run.totals.pages_stored,
            run.totals.pages_missing
        ));
        Ok(run)
    }

    async fn harvest_chapter(&self, chapter: u32) -> Attempt<ChapterReport, ChapterFailure> {
        let plan = match self.discovery.discover_pages(&self.series, chapter).await {
            Ok(plan) => plan,
            Err(err) if err.is_transient() => return Attempt::Transient(err.into()),
            Err(err) => return Attempt::Fatal(err.into()),
        };

        let pages = BoundedScheduler::new(
            "pages",
            self.settings.pages.clone(),
            self.abort.clone(),
            Arc::clone(&self.diagnostics),
        );
        let series = Arc::clone(&self.series);
        let report = match plan {
            PagePlan::Probe => {
                let tasks =
                    (1u32..).map(move |page| FetchTask::numbered(Arc::clone(&series), chapter, page));
                pages
                    .run(tasks, Enumeration::Probing, |task| self.harvest_page(task, true))
                    .await
            }
            PagePlan::Listed(refs) => {
                if refs.is_empty() {
                    self.diagnostics.warn(format_args!(
                        "{}: chapter {} lists no page images",
                        self.series, chapter
                    ));
                }
                let tasks = refs
                    .into_iter()
                    .map(move |page| FetchTask::resolved(Arc::clone(&series), chapter, page));
                pages
                    .run(tasks, Enumeration::Finite, |task| self.harvest_page(task, false))
                    .await
            }
        };

        let chapter_report = ChapterReport::from_pages(chapter, &report);
        for page in &chapter_report.abandoned_pages {
            self.diagnostics.warn(format_args!(
                "{}: chapter {} page {} abandoned after {} attempt(s): {}",
                self.series, chapter, page.page, page.attempts, page.cause
            ));
        }

        if chapter_report.stored == 0 && !chapter_report.abandoned_pages.is_empty() {
            return Attempt::Fatal(ChapterFailure::NoProgress(chapter_report));
        }

        self.diagnostics.info(format_args!(
            "{}: chapter {} stored {} page(s){}{}",
            self.series,
            chapter,
            chapter_report.stored,
            match chapter_report.abandoned_pages.len() {
                0 => String::new(),
                missing => format!(", {missing} missing"),
            },
            if chapter_report.interrupted { ", interrupted" } else { "" }
        ));
        Attempt::Success(chapter_report)
    }

    async fn harvest_page(&self, task: FetchTask, probing: bool) -> Attempt<(), PageFailure> {
        let url = task.url(&self.locator);
        let page = task.page();

        match self.fetcher.fetch(&url).await {
            FetchOutcome::Success { bytes, .. } => {
                match self.sink.store(task.chapter, page, &bytes).await {
                    Ok(()) => {
                        self.diagnostics.debug(format_args!(
                            "chapter {} page {}: stored {} bytes",
                            task.chapter,
                            page,
                            bytes.len()
                        ));
                        Attempt::Success(())
                    }
                    Err(err) => Attempt::Fatal(err.into()),
                }
            }
            FetchOutcome::NotFound if probing => {
                self.diagnostics.debug(format_args!(
                    "chapter {}: no page {}, end of chapter",
                    task.chapter, page
                ));
                Attempt::Boundary
            }
            FetchOutcome::NotFound => Attempt::Fatal(PageFailure::Missing),
            FetchOutcome::Transient(failure) => Attempt::Transient(PageFailure::Fetch(failure)),
            FetchOutcome::Fatal(failure) => Attempt::Fatal(PageFailure::Fetch(failure)),
        }
    }
}
