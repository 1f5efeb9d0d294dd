//! Single-page retrieval.
//!
//! - [`fetcher`] - the [`PageFetcher`] trait and its HTTP implementation
//! - [`outcome`] - [`FetchOutcome`] classification of one attempt
//! - [`task`] - [`FetchTask`], the unit the page scheduler retries

mod fetcher;
mod outcome;
mod task;

pub use fetcher::{normalize_to_png, HttpPageFetcher, PageFetcher, MAX_IMAGE_SIZE};
pub use outcome::{FetchFailure, FetchOutcome};
pub use task::{FetchTask, ImageLocator, PageTarget};
