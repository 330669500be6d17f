//! Answer generation: the second LLM call, plus the optional headline.

use std::sync::LazyLock;

use regex::Regex;
use tracing::{info, instrument};

use grantbot_shared::{AnswerTrace, GrantBotError, RelevanceResult, Result, RuntimeConfig};

use crate::llm::{ChatMessage, ChatModel, ChatRequest};
use crate::prompt::{DELIMITER, delimit};

/// Compose an answer to `query` from the selected snippets.
///
/// The model is told to reason in three delimited steps; only the last one is
/// meant for the user.
#[instrument(skip_all, fields(snippets = relevant.len()))]
pub async fn generate_answer(
    chat: &dyn ChatModel,
    config: &RuntimeConfig,
    query: &str,
    relevant: &RelevanceResult,
) -> Result<AnswerTrace> {
    let relevant_json = serde_json::to_string_pretty(relevant)
        .map_err(|e| GrantBotError::parse(format!("failed to encode relevant snippets: {e}")))?;

    let request = ChatRequest {
        messages: vec![
            ChatMessage::system(system_prompt(&config.domain, &relevant_json)),
            ChatMessage::user(delimit(query)),
        ],
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
    };

    let completion = chat.complete(&request).await?;
    let trace = parse_trace(&completion.content);

    if trace.step3.is_empty() {
        return Err(GrantBotError::Llm("model returned an empty answer".into()));
    }

    info!(answer_chars = trace.step3.len(), "answer generated");
    Ok(trace)
}

/// Ask for a one-line reply to `query`, shown above the full answer.
#[instrument(skip_all)]
pub async fn generate_headline(
    chat: &dyn ChatModel,
    config: &RuntimeConfig,
    query: &str,
) -> Result<String> {
    let request = ChatRequest {
        messages: vec![ChatMessage::user(format!(
            "Provide a brief response to the following query: '{query}'"
        ))],
        max_tokens: config.llm.max_tokens,
        temperature: config.llm.temperature,
    };

    let completion = chat.complete(&request).await?;
    Ok(completion.content.trim().to_string())
}

fn system_prompt(domain: &str, relevant_json: &str) -> String {
    format!(
        "Follow these steps to answer user queries about {domain}.
The user query will be delimited with a pair of {DELIMITER}.

Step 1:{DELIMITER} Work out what the user is asking and understand the relevant \
information below, given as JSON:
{relevant_json}

Step 2:{DELIMITER} Use that information to build an answer to the query. Be \
detailed and help the user understand which options are available to them.

Step 3:{DELIMITER} Reply to the user in a friendly, informative tone. Only state \
facts supported by the information above, and include whatever helps the user \
decide.

Use the following format:
Step 1:{DELIMITER} <step 1 reasoning>
Step 2:{DELIMITER} <step 2 reasoning>
Step 3:{DELIMITER} <step 3 response to user>

Make sure to include {DELIMITER} to separate every step."
    )
}

/// Split a three-step reply on the delimiter.
///
/// The last segment is the user-facing answer. Earlier segments have their
/// trailing `Step N:` labels removed; empty ones are dropped, the one nearest
/// the answer becomes `step2` and anything before it is joined into `step1`.
pub fn parse_trace(raw: &str) -> AnswerTrace {
    static STEP_LABEL_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)\s*step\s*\d+\s*:?\s*$").expect("valid regex"));

    let mut segments: Vec<&str> = raw.split(DELIMITER).collect();
    let step3 = segments.pop().unwrap_or_default().trim().to_string();

    let mut reasoning: Vec<String> = segments
        .into_iter()
        .map(|s| STEP_LABEL_RE.replace(s, "").trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    let step2 = reasoning.pop().unwrap_or_default();
    let step1 = reasoning.join("\n\n");

    AnswerTrace {
        step1,
        step2,
        step3,
    }
}
