//! Bounded-concurrency window scheduler.
//!
//! A [`BoundedScheduler`] drains a possibly unbounded task iterator in
//! windows of at most `window_size` tasks. Tasks inside a window run
//! concurrently behind a fair semaphore of `concurrency` permits; windows run
//! strictly one after another with an optional pacing sleep between them.
//!
//! In [`Enumeration::Probing`] mode a boundary (or an abandoned task) at
//! position `p` ends the run once the current window has joined: tasks of
//! that window past `p` that have not started yet are discarded, and no
//! further window is drawn.
//!
//! Raising the [`AbortSignal`] lets started attempts finish. Anything not yet
//! started is discarded and the report is marked aborted, unless the run had
//! already dispatched every task it had.

mod abort;
mod report;
mod retry;

pub use abort::AbortSignal;
pub use report::{Attempt, ScheduleReport, Tally, TaskRecord, TaskState};
pub use retry::{RetryDelay, RetryPolicy};

use crate::diagnostics::Diagnostics;
use futures::stream::{self, StreamExt};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

/// No stop requested yet in the current window.
const NO_STOP: usize = usize::MAX;

/// How the task iterator relates to the data behind it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enumeration {
    /// Every task is known to exist; a boundary is just another outcome.
    /// The iterator must end.
    Finite,
    /// Tasks are guesses past the known end; the first boundary ends the run.
    Probing,
}

/// Knobs of one scheduler instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    pub window_size: usize,
    /// Sleep between consecutive windows
    pub pacing: Duration,
    pub retry: RetryPolicy,
}

impl SchedulerSettings {
    /// Window equal to the cap, no pacing, default retry policy.
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency,
            window_size: concurrency,
            pacing: Duration::ZERO,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_pacing(mut self, pacing: Duration) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Result of driving one task to a terminal state.
enum Slot<T, O, E> {
    Resolved(TaskRecord<T, O, E>),
    Discarded,
}

pub struct BoundedScheduler {
    label: &'static str,
    settings: SchedulerSettings,
    gate: Semaphore,
    abort: AbortSignal,
    attempts_made: AtomicU64,
    items_completed: AtomicU64,
    diagnostics: Arc<dyn Diagnostics>,
}

impl BoundedScheduler {
    /// `label` prefixes every log line of this instance. Caps and window
    /// sizes of zero are raised to one.
    pub fn new(
        label: &'static str,
        mut settings: SchedulerSettings,
        abort: AbortSignal,
        diagnostics: Arc<dyn Diagnostics>,
    ) -> Self {
        settings.concurrency = settings.concurrency.max(1);
        settings.window_size = settings.window_size.max(1);
        Self {
            label,
            gate: Semaphore::new(settings.concurrency),
            settings,
            abort,
            attempts_made: AtomicU64::new(0),
            items_completed: AtomicU64::new(0),
            diagnostics,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Attempts started so far, retries included.
    pub fn attempts_made(&self) -> u64 {
        self.attempts_made.load(Ordering::Relaxed)
    }

    /// Tasks that reached a terminal state so far.
    pub fn items_completed(&self) -> u64 {
        self.items_completed.load(Ordering::Relaxed)
    }

    /// Drain `tasks` window by window, calling `attempt` once per attempt.
    ///
    /// Never fails: every task ends up in the report as a record, or is
    /// counted as discarded.
    pub async fn run<T, O, E, I, F, Fut>(
        &self,
        tasks: I,
        mode: Enumeration,
        attempt: F,
    ) -> ScheduleReport<T, O, E>
    where
        I: IntoIterator<Item = T>,
        T: Clone,
        E: Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Attempt<O, E>>,
    {
        let window_size = self.settings.window_size;
        let mut tasks = tasks.into_iter();
        let mut report = ScheduleReport::new();
        let mut next_position = 0usize;
        let mut window: Vec<T> = tasks.by_ref().take(window_size).collect();

        while !window.is_empty() {
            if self.abort.is_raised() {
                self.drop_queued(&mut report, mode, window, tasks);
                break;
            }

            let index = report.windows();
            let base = next_position;
            let width = window.len();
            next_position += width;
            let stop_at = AtomicUsize::new(NO_STOP);

            let slots: Vec<Slot<T, O, E>> = stream::iter(window.into_iter().enumerate())
                .map(|(offset, task)| {
                    self.drive(base + offset, index, task, mode, &stop_at, &attempt)
                })
                .buffer_unordered(width)
                .collect()
                .await;

            let mut window_tally = Tally::default();
            let mut resolved = Vec::with_capacity(width);
            for slot in slots {
                match slot {
                    Slot::Resolved(record) => {
                        window_tally.record(&record.state);
                        resolved.push(record);
                    }
                    Slot::Discarded => window_tally.discarded += 1,
                }
            }
            resolved.sort_by_key(|r| r.position);
            report.records.extend(resolved);
            report.tally.absorb(&window_tally);
            report.window_tallies.push(window_tally);

            self.diagnostics.debug(format_args!(
                "{}: window {} done ({} ok, {} abandoned, {} boundary, {} discarded)",
                self.label,
                index + 1,
                window_tally.succeeded,
                window_tally.abandoned,
                window_tally.boundary,
                window_tally.discarded
            ));

            let stop = stop_at.load(Ordering::Acquire);
            if stop != NO_STOP {
                report.stopped_at = Some(stop);
                report.aborted |= self.abort.is_raised() && window_tally.discarded > 0;
                break;
            }

            if self.abort.is_raised() && mode == Enumeration::Probing {
                // No boundary was seen, so the end of the data is unknown.
                self.drop_queued(&mut report, mode, Vec::new(), tasks);
                break;
            }
            window = tasks.by_ref().take(window_size).collect();
            if window.is_empty() {
                report.aborted |= self.abort.is_raised() && window_tally.discarded > 0;
                break;
            }
            if self.abort.is_raised() {
                self.drop_queued(&mut report, mode, window, tasks);
                break;
            }
            if !self.settings.pacing.is_zero() {
                self.diagnostics.info(format_args!(
                    "{}: pausing {:.1}s before window {}",
                    self.label,
                    self.settings.pacing.as_secs_f64(),
                    index + 2
                ));
                tokio::time::sleep(self.settings.pacing).await;
            }
        }

        report
    }

    /// Marks the run aborted. In finite mode every task not yet dispatched
    /// is counted as discarded; in probing mode the remaining tasks are
    /// guesses and are not counted.
    fn drop_queued<T, O, E>(
        &self,
        report: &mut ScheduleReport<T, O, E>,
        mode: Enumeration,
        queued: Vec<T>,
        rest: impl Iterator<Item = T>,
    ) {
        report.aborted = true;
        let dropped = match mode {
            Enumeration::Finite => queued.len() + rest.count(),
            Enumeration::Probing => 0,
        };
        report.tally.discarded += dropped;
        self.diagnostics.info(format_args!(
            "{}: abort raised, {} queued task(s) dropped",
            self.label, dropped
        ));
    }

    /// Admission, attempts and retries of one task.
    async fn drive<T, O, E, F, Fut>(
        &self,
        position: usize,
        window: usize,
        task: T,
        mode: Enumeration,
        stop_at: &AtomicUsize,
        attempt: &F,
    ) -> Slot<T, O, E>
    where
        T: Clone,
        E: Display,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Attempt<O, E>>,
    {
        let retry = self.settings.retry;
        let mut attempts = 0u32;

        loop {
            // The gate is never closed; a closed gate means nothing may start.
            let Ok(permit) = self.gate.acquire().await else {
                return Slot::Discarded;
            };
            if self.abort.is_raised() || position > stop_at.load(Ordering::Acquire) {
                return Slot::Discarded;
            }

            attempts += 1;
            self.attempts_made.fetch_add(1, Ordering::Relaxed);
            let result = attempt(task.clone()).await;
            drop(permit);

            let state = match result {
                Attempt::Success(output) => TaskState::Succeeded(output),
                Attempt::Boundary => TaskState::Boundary,
                Attempt::Transient(cause) if retry.allows_retry(attempts) => {
                    let delay = retry.delay_after(attempts);
                    self.diagnostics.debug(format_args!(
                        "{}: task #{} attempt {}/{} failed ({}), retrying in {:.1}s",
                        self.label,
                        position + 1,
                        attempts,
                        retry.patience(),
                        cause,
                        delay.as_secs_f64()
                    ));
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    continue;
                }
                Attempt::Transient(cause) => TaskState::Abandoned {
                    cause,
                    exhausted: true,
                },
                Attempt::Fatal(cause) => TaskState::Abandoned {
                    cause,
                    exhausted: false,
                },
            };

            if mode == Enumeration::Probing && !state.is_succeeded() {
                stop_at.fetch_min(position, Ordering::AcqRel);
            }
            self.items_completed.fetch_add(1, Ordering::Relaxed);
            return Slot::Resolved(TaskRecord {
                position,
                window,
                task,
                attempts,
                state,
            });
        }
    }
}
