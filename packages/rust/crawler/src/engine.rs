//! Sequential page fetcher for the configured source list.
//!
//! Each URL gets exactly one GET. Failures are recorded per URL and never
//! abort the batch; only responses declared as HTML are handed on.

use std::time::Duration;

use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info, instrument, warn};
use url::Url;

use grantbot_shared::{GrantBotError, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("GrantBot/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// Content types accepted as HTML (matched case-insensitively as substrings).
const HTML_CONTENT_TYPES: &[&str] = &["text/html", "application/xhtml+xml"];

// ---------------------------------------------------------------------------
// FetchOutcome
// ---------------------------------------------------------------------------

/// Why a single URL produced no page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchFailure {
    /// Connection, DNS, TLS or timeout error.
    Transport(String),
    /// Server answered with a non-2xx status.
    Status(u16),
    /// Response was not declared as HTML.
    NotHtml { content_type: String },
    /// Body could not be read or decoded.
    Body(String),
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{e}"),
            Self::Status(code) => write!(f, "HTTP {code}"),
            Self::NotHtml { content_type } if content_type.is_empty() => {
                f.write_str("skipping content with no declared content type")
            }
            Self::NotHtml { content_type } => {
                write!(f, "skipping non-HTML content ({content_type})")
            }
            Self::Body(e) => write!(f, "body read failed: {e}"),
        }
    }
}

/// Result of fetching one URL: the HTML body, or the reason there is none.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub url: Url,
    pub result: std::result::Result<String, FetchFailure>,
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Per-URL progress callback.
pub trait FetchProgress: Send + Sync {
    fn page_fetched(&self, url: &Url, current: usize, total: usize);
}

/// No-op fetch progress.
pub struct SilentFetchProgress;

impl FetchProgress for SilentFetchProgress {
    fn page_fetched(&self, _url: &Url, _current: usize, _total: usize) {}
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP fetcher for the fixed source list.
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    /// Create a fetcher whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| GrantBotError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { client })
    }

    /// Fetch every URL in order, one at a time.
    ///
    /// Returns one outcome per input URL, in input order.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn fetch_all(&self, urls: &[Url], progress: &dyn FetchProgress) -> Vec<FetchOutcome> {
        let mut outcomes = Vec::with_capacity(urls.len());

        for (i, url) in urls.iter().enumerate() {
            let result = self.fetch_one(url).await;
            if let Err(failure) = &result {
                warn!(%url, error = %failure, "fetch failed");
            }
            progress.page_fetched(url, i + 1, urls.len());
            outcomes.push(FetchOutcome {
                url: url.clone(),
                result,
            });
        }

        let fetched = outcomes.iter().filter(|o| o.is_success()).count();
        info!(
            fetched,
            failed = outcomes.len() - fetched,
            "fetch batch completed"
        );

        outcomes
    }

    async fn fetch_one(&self, url: &Url) -> std::result::Result<String, FetchFailure> {
        debug!(%url, "fetching page");

        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| FetchFailure::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::Status(status.as_u16()));
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        debug!(%url, %content_type, "response received");

        if !is_html(&content_type) {
            return Err(FetchFailure::NotHtml { content_type });
        }

        response
            .text()
            .await
            .map_err(|e| FetchFailure::Body(e.to_string()))
    }
}

/// True when a `Content-Type` header value declares HTML.
fn is_html(content_type: &str) -> bool {
    let lower = content_type.to_ascii_lowercase();
    HTML_CONTENT_TYPES.iter().any(|t| lower.contains(t))
}
