//! Relevance selection: the first LLM call.
//!
//! The whole corpus is rendered into one system prompt and the model is asked
//! to return only a JSON array of the fragments that bear on the query. The
//! reply is parsed in two stages, [`extract_json_span`] then
//! [`decode_snippets`], and every malformed-output path degrades to an empty
//! result plus a [`SelectionError`]. Only a failed chat call is an `Err`.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument, warn};

use grantbot_shared::{CorpusSnapshot, RelevanceResult, Result, RuntimeConfig};

use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::prompt::{DELIMITER, delimit};

/// Why a selector reply could not be turned into snippets.
///
/// The display text is meant for the end user.
#[derive(Debug, thiserror::Error)]
pub enum SelectionError {
    /// No `[` … `]` span anywhere in the reply.
    #[error("Failed to find JSON in the response from the LLM. Please try again.")]
    NoJsonArray,

    /// A bracketed span was found but is not a JSON array.
    #[error("Failed to parse the response from the LLM. Please try again.")]
    InvalidJson(#[source] serde_json::Error),
}

/// Outcome of a selector call.
#[derive(Debug)]
pub struct Selection {
    /// Snippets chosen by the model; empty when nothing matched or parsing failed.
    pub result: RelevanceResult,
    /// The model's reply, verbatim.
    pub raw_response: String,
    /// Set when the reply was malformed.
    pub error: Option<SelectionError>,
}

/// Ask the model which parts of `corpus` are relevant to `query`.
#[instrument(skip_all, fields(pages = corpus.len()))]
pub async fn select_relevant(
    chat: &dyn ChatModel,
    config: &RuntimeConfig,
    query: &str,
    corpus: &CorpusSnapshot,
) -> Result<Selection> {
    let system = system_prompt(&config.domain, &render_corpus(corpus));

    let request = ChatRequest {
        messages: vec![ChatMessage::system(system), ChatMessage::user(delimit(query))],
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
    };

    let completion = chat.complete(&request).await?;
    let raw_response = completion.content;

    let selection = match parse_selection(&raw_response) {
        Ok(result) => Selection {
            result,
            raw_response,
            error: None,
        },
        Err(error) => {
            warn!(error = ?error, "selector reply was not a JSON array");
            Selection {
                result: Vec::new(),
                raw_response,
                error: Some(error),
            }
        }
    };

    info!(snippets = selection.result.len(), "relevance selection completed");
    Ok(selection)
}

/// Render every page of the corpus into a single context block.
///
/// Lists are JSON-encoded so fragment boundaries survive quoting.
pub fn render_corpus(corpus: &CorpusSnapshot) -> String {
    let mut out = String::new();
    for page in &corpus.pages {
        out.push_str(&format!("Source: {}\n", page.url));
        out.push_str(&format!("Headings: {}\n", json_list(&page.headings)));
        out.push_str(&format!("Paragraphs: {}\n", json_list(&page.paragraphs)));
        out.push_str(&format!("Lists: {}\n", json_list(&page.list_items)));
    }
    out
}

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn system_prompt(domain: &str, corpus_text: &str) -> String {
    format!(
        "You will be given a user query about {domain}. \
The query is enclosed between a pair of {DELIMITER} markers.

The following information was scraped from official sources:
{corpus_text}
Decide which parts of this information are most relevant to the user's query. \
Include the relevant headings, paragraphs or list items, copied as they appear.

If nothing is relevant, output an empty JSON array: [].

Your response must be ONLY a valid JSON array of the relevant items, with no \
additional text or comments."
    )
}

/// Parse a selector reply. A blank reply is an empty result, not an error.
pub fn parse_selection(raw: &str) -> std::result::Result<RelevanceResult, SelectionError> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    decode_snippets(extract_json_span(raw)?)
}

/// Stage 1: locate the candidate JSON payload, from the first `[` to the last `]`.
pub fn extract_json_span(raw: &str) -> std::result::Result<&str, SelectionError> {
    static ARRAY_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("valid regex"));

    ARRAY_RE
        .find(raw)
        .map(|m| m.as_str())
        .ok_or(SelectionError::NoJsonArray)
}

/// Stage 2: decode the candidate span as a JSON array.
pub fn decode_snippets(span: &str) -> std::result::Result<RelevanceResult, SelectionError> {
    serde_json::from_str(span).map_err(SelectionError::InvalidJson)
}
