//! Bounded-concurrency harvester for chapter/page image collections.
//!
//! A run resolves a chapter range, then fans out over chapters and, within
//! each chapter, over pages, under two independent concurrency caps. See
//! [`orchestrator::ChapterOrchestrator`] for the entry point.

pub mod config;
pub mod diagnostics;
pub mod discovery;
pub mod fetch;
pub mod http;
pub mod orchestrator;
pub mod scheduler;
pub mod series;
pub mod sink;
