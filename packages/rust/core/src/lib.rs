//! Query pipeline and LLM stages for GrantBot.
//!
//! This crate ties the crawler's corpus to the two chat-completion stages
//! (relevance selection and answer generation) and exposes the end-to-end
//! [`pipeline::Pipeline`].

pub mod answer;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod relevance;

#[cfg(test)]
mod test_support;

pub use answer::{generate_answer, generate_headline, parse_trace};
pub use llm::{ChatCompletion, ChatMessage, ChatModel, ChatRequest, FinishReason, OpenAiChat, Role};
pub use pipeline::{
    Answer, NO_RELEVANT_INFORMATION, Pipeline, ProgressReporter, QueryOutcome, SilentProgress,
};
pub use relevance::{Selection, SelectionError, select_relevant};
