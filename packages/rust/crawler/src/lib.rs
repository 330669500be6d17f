//! Source page fetching and content extraction.
//!
//! This crate provides:
//! - [`engine`]: sequential HTTP fetcher for the configured URL list
//! - [`extract`]: heading/paragraph/list-item extraction into [`PageRecord`]s
//!
//! [`PageRecord`]: grantbot_shared::PageRecord

pub mod engine;
pub mod extract;

pub use engine::{FetchFailure, FetchOutcome, FetchProgress, Fetcher, SilentFetchProgress};
pub use extract::{ExtractOptions, build_corpus, extract, extract_with};
