//! Shared types, error model, and configuration for GrantBot.
//!
//! This crate is the foundation depended on by all other GrantBot crates.
//! It provides:
//! - [`GrantBotError`]: the unified error type
//! - Domain types ([`PageRecord`], [`CorpusSnapshot`], [`RelevanceResult`], [`AnswerTrace`])
//! - Configuration ([`AppConfig`], [`RuntimeConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    ApiKey, AppConfig, CorpusCache, CorpusPolicy, ExtractConfig, FetchConfig, LlmConfig,
    LlmSettings, PipelineConfig, RuntimeConfig, config_dir, config_file_path, init_config,
    load_config, load_config_from, resolve_api_key,
};
pub use error::{GrantBotError, Result};
pub use types::{
    AnswerTrace, CorpusSnapshot, Diagnostic, PageRecord, RelevanceResult, RelevantSnippet, RunId,
    Stage,
};
