//! Property tests for the window scheduler.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use proptest::prelude::*;
use tankobon::diagnostics::NoopDiagnostics;
use tankobon::scheduler::{
    AbortSignal, Attempt, BoundedScheduler, Enumeration, RetryDelay, RetryPolicy,
    SchedulerSettings, TaskState,
};

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn scheduler(settings: SchedulerSettings) -> BoundedScheduler {
    BoundedScheduler::new("pages", settings, AbortSignal::new(), Arc::new(NoopDiagnostics))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    /// A chapter of `length` pages enumerated with any cap and window stores
    /// exactly `length` pages and never reaches past the boundary's window.
    #[test]
    fn prop_probing_stops_at_first_missing_page(
        length in 0u32..25,
        concurrency in 1usize..5,
        multiple in 1usize..3,
    ) {
        let window = concurrency * multiple;
        let sched = scheduler(SchedulerSettings::new(concurrency).with_window_size(window));
        let attempted = Mutex::new(Vec::new());

        let report = runtime().block_on(sched.run(1u32.., Enumeration::Probing, |page| {
            let attempted = &attempted;
            async move {
                attempted.lock().unwrap().push(page);
                tokio::task::yield_now().await;
                if page <= length {
                    Attempt::<u32, String>::Success(page)
                } else {
                    Attempt::Boundary
                }
            }
        }));

        prop_assert_eq!(report.tally.succeeded as u32, length);
        prop_assert_eq!(report.stopped_at, Some(length as usize));
        let boundary_window_end = ((length as usize / window) + 1) * window;
        let attempted = attempted.into_inner().unwrap();
        prop_assert!(attempted.iter().all(|&p| (p as usize) <= boundary_window_end));
        prop_assert!(attempted.contains(&(length + 1)));
    }

    /// A task that always fails transiently is attempted exactly `patience`
    /// times, whatever else shares its window.
    #[test]
    fn prop_retry_bound(patience in 1u32..7, siblings in 0usize..6) {
        let policy = RetryPolicy::new(patience, RetryDelay::None);
        let sched = scheduler(
            SchedulerSettings::new(2)
                .with_window_size(siblings + 1)
                .with_retry(policy),
        );
        let flaky_calls = AtomicU32::new(0);

        let report = runtime().block_on(sched.run(0..=siblings, Enumeration::Finite, |n| {
            if n == 0 {
                flaky_calls.fetch_add(1, Ordering::SeqCst);
            }
            async move {
                if n == 0 {
                    Attempt::Transient("connection reset")
                } else {
                    Attempt::Success(n)
                }
            }
        }));

        prop_assert_eq!(flaky_calls.load(Ordering::SeqCst), patience);
        let flaky = report.record_at(0).unwrap();
        prop_assert_eq!(flaky.attempts, patience);
        let exhausted = matches!(flaky.state, TaskState::Abandoned { exhausted: true, .. });
        prop_assert!(exhausted);
        prop_assert_eq!(report.tally.succeeded, siblings);
    }
}
