//! End-to-end query pipeline: fetch → extract → select → (headline) → answer.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use url::Url;

use grantbot_crawler::{ExtractOptions, FetchProgress, Fetcher, build_corpus};
use grantbot_shared::{
    AnswerTrace, CorpusPolicy, CorpusSnapshot, Diagnostic, GrantBotError, RelevanceResult, Result,
    RunId, RuntimeConfig, Stage,
};

use crate::answer::{generate_answer, generate_headline};
use crate::llm::ChatModel;
use crate::relevance::select_relevant;

/// Shown when no snippet survives selection.
pub const NO_RELEVANT_INFORMATION: &str = "No relevant information found for your query.";

/// Final answer of a pipeline run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Answer {
    Answered {
        headline: Option<String>,
        trace: AnswerTrace,
    },
    /// Corpus was empty or the selector found nothing; no answer call was made.
    NoRelevantInformation,
}

impl Answer {
    /// The text to show the user.
    pub fn text(&self) -> &str {
        match self {
            Self::Answered { trace, .. } => &trace.step3,
            Self::NoRelevantInformation => NO_RELEVANT_INFORMATION,
        }
    }

    pub fn headline(&self) -> Option<&str> {
        match self {
            Self::Answered { headline, .. } => headline.as_deref(),
            Self::NoRelevantInformation => None,
        }
    }
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutcome {
    pub run_id: RunId,
    pub query: String,
    pub corpus: Arc<CorpusSnapshot>,
    /// Verbatim selector reply; `None` when the selector was skipped.
    pub selector_raw: Option<String>,
    pub relevant: RelevanceResult,
    pub answer: Answer,
    /// Recovered failures, worded for the user.
    pub diagnostics: Vec<Diagnostic>,
    pub elapsed_ms: u64,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each source URL is fetched.
    fn page_fetched(&self, url: &str, current: usize, total: usize);
    /// Called when the run completes.
    fn done(&self, outcome: &QueryOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _url: &str, _current: usize, _total: usize) {}
    fn done(&self, _outcome: &QueryOutcome) {}
}

/// Forwards fetcher progress to a [`ProgressReporter`].
struct FetchProgressAdapter<'a>(&'a dyn ProgressReporter);

impl FetchProgress for FetchProgressAdapter<'_> {
    fn page_fetched(&self, url: &Url, current: usize, total: usize) {
        self.0.page_fetched(url.as_str(), current, total);
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// One front-end session's pipeline. Runs are sequential (`&mut self`).
pub struct Pipeline<'a> {
    config: &'a RuntimeConfig,
    fetcher: Fetcher,
    chat: Arc<dyn ChatModel>,
    /// Last snapshot, kept only under [`CorpusPolicy::Session`].
    cached: Option<Arc<CorpusSnapshot>>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a RuntimeConfig, chat: Arc<dyn ChatModel>) -> Result<Self> {
        Ok(Self {
            config,
            fetcher: Fetcher::new(config.fetch_timeout)?,
            chat,
            cached: None,
        })
    }

    /// Drop any session snapshot so the next query re-fetches.
    pub fn invalidate_corpus(&mut self) {
        self.cached = None;
    }

    /// Answer one query.
    ///
    /// Fetch and selector-parse failures are recovered into diagnostics. A
    /// failed selector or answer call aborts the run with `Err`.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn ask(
        &mut self,
        query: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<QueryOutcome> {
        let start = Instant::now();
        let run_id = RunId::new();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let query = query.trim();
        if query.is_empty() {
            return Err(GrantBotError::validation(
                "Please enter a query to get information.",
            ));
        }

        info!(query, "starting query pipeline");

        // --- Phase 1: Corpus ---
        let (corpus, mut diagnostics) = self.corpus(progress).await;

        let mut outcome = QueryOutcome {
            run_id,
            query: query.to_string(),
            corpus: corpus.clone(),
            selector_raw: None,
            relevant: Vec::new(),
            answer: Answer::NoRelevantInformation,
            diagnostics: Vec::new(),
            elapsed_ms: 0,
        };

        if corpus.is_empty() {
            warn!("corpus is empty; skipping relevance selection");
        } else {
            // --- Phase 2: Relevance selection ---
            progress.phase("Selecting relevant information");
            let selection = select_relevant(self.chat.as_ref(), self.config, query, &corpus).await?;
            if let Some(error) = &selection.error {
                diagnostics.push(Diagnostic::new(Stage::Selection, error.to_string()));
            }
            outcome.selector_raw = Some(selection.raw_response);
            outcome.relevant = selection.result;
        }

        if !outcome.relevant.is_empty() {
            // --- Phase 3: Headline ---
            let headline = if self.config.headline {
                progress.phase("Drafting headline");
                match generate_headline(self.chat.as_ref(), self.config, query).await {
                    Ok(h) if !h.is_empty() => Some(h),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(error = %e, "headline generation failed");
                        diagnostics.push(Diagnostic::new(
                            Stage::Headline,
                            format!("Could not generate a summary headline: {e}"),
                        ));
                        None
                    }
                }
            } else {
                None
            };

            // --- Phase 4: Answer ---
            progress.phase("Generating answer");
            let trace =
                generate_answer(self.chat.as_ref(), self.config, query, &outcome.relevant).await?;
            outcome.answer = Answer::Answered { headline, trace };
        }

        outcome.diagnostics = diagnostics;
        outcome.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            pages = outcome.corpus.len(),
            snippets = outcome.relevant.len(),
            answered = matches!(outcome.answer, Answer::Answered { .. }),
            diagnostics = outcome.diagnostics.len(),
            elapsed_ms = outcome.elapsed_ms,
            "query pipeline completed"
        );

        progress.done(&outcome);
        Ok(outcome)
    }

    /// Build or reuse the corpus according to the configured policy.
    async fn corpus(
        &mut self,
        progress: &dyn ProgressReporter,
    ) -> (Arc<CorpusSnapshot>, Vec<Diagnostic>) {
        if let (CorpusPolicy::Session { ttl_secs }, Some(cached)) =
            (self.config.corpus_policy, &self.cached)
        {
            let age = cached.age_secs(Utc::now());
            if ttl_secs == 0 || age < ttl_secs {
                debug!(age_secs = age, pages = cached.len(), "reusing session corpus");
                return (cached.clone(), Vec::new());
            }
            debug!(age_secs = age, ttl_secs, "session corpus expired");
        }

        progress.phase("Fetching source pages");
        let outcomes = self
            .fetcher
            .fetch_all(&self.config.urls, &FetchProgressAdapter(progress))
            .await;

        progress.phase("Extracting page content");
        let opts = ExtractOptions {
            keep_blank: self.config.keep_blank_fragments,
        };
        let (snapshot, diagnostics) = build_corpus(&outcomes, &opts);
        let snapshot = Arc::new(snapshot);

        // An empty snapshot is never cached, so a session can recover once
        // the sources are reachable again.
        if matches!(self.config.corpus_policy, CorpusPolicy::Session { .. }) && !snapshot.is_empty()
        {
            self.cached = Some(snapshot.clone());
        }

        (snapshot, diagnostics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedChat, runtime_config};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PSG_PAGE: &str = r#"<html><body>
        <h1>Productivity Solutions Grant</h1>
        <p>The Productivity Solutions Grant (PSG) supports companies keen on
           adopting IT solutions and equipment to enhance business processes.</p>
        <ul><li>Funding support of up to 50%</li></ul>
    </body></html>"#;

    fn html(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_raw(body.as_bytes().to_vec(), "text/html")
    }

    async fn psg_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/psg"))
            .respond_with(html(PSG_PAGE))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        server
    }

    fn url(server: &MockServer, p: &str) -> Url {
        Url::parse(&server.uri()).unwrap().join(p).unwrap()
    }

    #[tokio::test]
    async fn productivity_query_is_answered_with_grant_name() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/psg"), url(&server, "/missing")]);
        let chat = Arc::new(ScriptedChat::new([
            Ok(r#"["The Productivity Solutions Grant (PSG) supports companies keen on adopting IT solutions"]"#),
            Ok("The PSG is a good fit."),
            Ok("Step 1:#### productivity upgrades\nStep 2:#### PSG matches\nStep 3:#### The Productivity Solutions Grant can fund up to 50% of qualifying IT solutions."),
        ]));

        let mut pipeline = Pipeline::new(&config, chat.clone()).unwrap();
        let outcome = pipeline
            .ask("What grants help with productivity upgrades?", &SilentProgress)
            .await
            .unwrap();

        assert_eq!(outcome.corpus.len(), 1);
        assert!(!outcome.relevant.is_empty());
        assert!(outcome.answer.text().contains("Productivity Solutions Grant"));
        assert_eq!(outcome.answer.headline(), Some("The PSG is a good fit."));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].stage, Stage::Fetch);
        assert_eq!(chat.calls(), 3);

        // The selector saw the scraped paragraph.
        let requests = chat.requests();
        assert!(requests[0].messages[0].content.contains("adopting IT solutions"));
    }

    #[tokio::test]
    async fn empty_corpus_skips_every_llm_call() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/missing")]);
        let chat = Arc::new(ScriptedChat::unreachable());

        let mut pipeline = Pipeline::new(&config, chat.clone()).unwrap();
        let outcome = pipeline.ask("Any grants?", &SilentProgress).await.unwrap();

        assert!(outcome.corpus.is_empty());
        assert!(outcome.relevant.is_empty());
        assert!(outcome.selector_raw.is_none());
        assert!(matches!(outcome.answer, Answer::NoRelevantInformation));
        assert_eq!(outcome.answer.text(), NO_RELEVANT_INFORMATION);
        assert_eq!(chat.calls(), 0);
    }

    #[tokio::test]
    async fn empty_selection_skips_answer_generation() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/psg")]);
        let chat = Arc::new(ScriptedChat::new([Ok("[]")]));

        let mut pipeline = Pipeline::new(&config, chat.clone()).unwrap();
        let outcome = pipeline.ask("How do I hire a chef?", &SilentProgress).await.unwrap();

        assert!(outcome.relevant.is_empty());
        assert_eq!(outcome.selector_raw.as_deref(), Some("[]"));
        assert!(matches!(outcome.answer, Answer::NoRelevantInformation));
        assert!(outcome.diagnostics.is_empty());
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn malformed_selection_reports_diagnostic() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/psg")]);
        let chat = Arc::new(ScriptedChat::new([Ok("no results, sorry")]));

        let mut pipeline = Pipeline::new(&config, chat.clone()).unwrap();
        let outcome = pipeline.ask("q", &SilentProgress).await.unwrap();

        assert!(matches!(outcome.answer, Answer::NoRelevantInformation));
        assert_eq!(outcome.diagnostics.len(), 1);
        assert_eq!(outcome.diagnostics[0].stage, Stage::Selection);
        assert!(outcome.diagnostics[0].message.contains("Failed to find JSON"));
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn selector_transport_failure_aborts_run() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/psg")]);
        let chat = Arc::new(ScriptedChat::new([Err("provider returned 429 Too Many Requests")]));

        let mut pipeline = Pipeline::new(&config, chat).unwrap();
        let err = pipeline.ask("q", &SilentProgress).await.unwrap_err();
        assert!(matches!(err, GrantBotError::Llm(_)));
    }

    #[tokio::test]
    async fn headline_failure_is_recovered() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/psg")]);
        let chat = Arc::new(ScriptedChat::new([
            Ok(r#"["PSG"]"#),
            Err("timeout"),
            Ok("a####b####Use the PSG."),
        ]));

        let mut pipeline = Pipeline::new(&config, chat).unwrap();
        let outcome = pipeline.ask("q", &SilentProgress).await.unwrap();

        assert_eq!(outcome.answer.text(), "Use the PSG.");
        assert_eq!(outcome.answer.headline(), None);
        assert_eq!(outcome.diagnostics[0].stage, Stage::Headline);
    }

    #[tokio::test]
    async fn headline_can_be_disabled() {
        let server = psg_server().await;
        let mut config = runtime_config(vec![url(&server, "/psg")]);
        config.headline = false;
        let chat = Arc::new(ScriptedChat::new([Ok(r#"["PSG"]"#), Ok("a####b####Use the PSG.")]));

        let mut pipeline = Pipeline::new(&config, chat.clone()).unwrap();
        let outcome = pipeline.ask("q", &SilentProgress).await.unwrap();

        assert_eq!(outcome.answer.text(), "Use the PSG.");
        assert_eq!(chat.calls(), 2);
    }

    #[tokio::test]
    async fn blank_query_is_rejected() {
        let config = runtime_config(Vec::new());
        let chat = Arc::new(ScriptedChat::unreachable());
        let mut pipeline = Pipeline::new(&config, chat).unwrap();

        let err = pipeline.ask("   ", &SilentProgress).await.unwrap_err();
        assert!(matches!(err, GrantBotError::Validation { .. }));
    }

    #[tokio::test]
    async fn per_query_policy_refetches_every_time() {
        let server = MockServer::start().await;
        Mock::given(path("/psg"))
            .respond_with(html(PSG_PAGE))
            .expect(2)
            .mount(&server)
            .await;

        let config = runtime_config(vec![url(&server, "/psg")]);
        let chat = Arc::new(ScriptedChat::new([Ok("[]"), Ok("[]")]));
        let mut pipeline = Pipeline::new(&config, chat).unwrap();

        pipeline.ask("one", &SilentProgress).await.unwrap();
        pipeline.ask("two", &SilentProgress).await.unwrap();
        // `expect(2)` is verified when the server drops.
    }

    #[tokio::test]
    async fn session_policy_reuses_corpus() {
        let server = MockServer::start().await;
        Mock::given(path("/psg"))
            .respond_with(html(PSG_PAGE))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = runtime_config(vec![url(&server, "/psg")]);
        config.corpus_policy = CorpusPolicy::Session { ttl_secs: 0 };
        let chat = Arc::new(ScriptedChat::new([Ok("[]"), Ok("[]"), Ok("[]")]));
        let mut pipeline = Pipeline::new(&config, chat).unwrap();

        let first = pipeline.ask("one", &SilentProgress).await.unwrap();
        let second = pipeline.ask("two", &SilentProgress).await.unwrap();
        assert!(Arc::ptr_eq(&first.corpus, &second.corpus));

        pipeline.invalidate_corpus();
        let third = pipeline.ask("three", &SilentProgress).await.unwrap();
        assert!(!Arc::ptr_eq(&first.corpus, &third.corpus));
    }

    #[tokio::test]
    async fn session_corpus_is_refetched_after_ttl() {
        let server = MockServer::start().await;
        Mock::given(path("/psg"))
            .respond_with(html(PSG_PAGE))
            .expect(2)
            .mount(&server)
            .await;

        let mut config = runtime_config(vec![url(&server, "/psg")]);
        config.corpus_policy = CorpusPolicy::Session { ttl_secs: 60 };
        let chat = Arc::new(ScriptedChat::new([Ok("[]"), Ok("[]"), Ok("[]")]));
        let mut pipeline = Pipeline::new(&config, chat).unwrap();

        let first = pipeline.ask("one", &SilentProgress).await.unwrap();
        let second = pipeline.ask("two", &SilentProgress).await.unwrap();
        assert!(Arc::ptr_eq(&first.corpus, &second.corpus));

        let mut aged = (*first.corpus).clone();
        aged.built_at -= chrono::Duration::seconds(120);
        let aged = Arc::new(aged);
        pipeline.cached = Some(aged.clone());

        let third = pipeline.ask("three", &SilentProgress).await.unwrap();
        assert!(!Arc::ptr_eq(&aged, &third.corpus));
        assert!(third.corpus.age_secs(Utc::now()) < 60);
    }

    #[tokio::test]
    async fn empty_session_corpus_is_not_cached() {
        let server = MockServer::start().await;
        Mock::given(path("/psg"))
            .respond_with(ResponseTemplate::new(404))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(path("/psg"))
            .respond_with(html(PSG_PAGE))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = runtime_config(vec![url(&server, "/psg")]);
        config.corpus_policy = CorpusPolicy::Session { ttl_secs: 0 };
        let chat = Arc::new(ScriptedChat::new([Ok("[]")]));
        let mut pipeline = Pipeline::new(&config, chat.clone()).unwrap();

        let first = pipeline.ask("one", &SilentProgress).await.unwrap();
        assert!(first.corpus.is_empty());
        assert_eq!(first.diagnostics[0].stage, Stage::Fetch);
        assert!(pipeline.cached.is_none());

        let second = pipeline.ask("two", &SilentProgress).await.unwrap();
        assert_eq!(second.corpus.len(), 1);
        assert!(pipeline.cached.is_some());
        assert_eq!(chat.calls(), 1);
    }

    #[tokio::test]
    async fn outcome_serializes_for_display() {
        let server = psg_server().await;
        let config = runtime_config(vec![url(&server, "/psg")]);
        let chat = Arc::new(ScriptedChat::new([Ok(r#"["PSG"]"#), Ok("H"), Ok("x####y####z")]));

        let mut pipeline = Pipeline::new(&config, chat).unwrap();
        let outcome = pipeline.ask("q", &SilentProgress).await.unwrap();

        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["answer"]["kind"], "answered");
        assert_eq!(value["answer"]["trace"]["step3"], "z");
        assert_eq!(value["relevant"], json!(["PSG"]));
        assert_eq!(value["corpus"]["pages"][0]["headings"][0], "Productivity Solutions Grant");
    }
}
