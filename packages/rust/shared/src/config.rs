//! Application configuration for GrantBot.
//!
//! User config lives at `~/.grantbot/grantbot.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! [`AppConfig`] mirrors the file. [`RuntimeConfig`] is resolved from it once
//! at process start (URLs validated, API key read from the environment) and
//! passed by reference to every pipeline component.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{GrantBotError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "grantbot.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".grantbot";

/// Enterprise Singapore capability and financial-support pages.
const DEFAULT_URLS: &[&str] = &[
    "https://www.enterprisesg.gov.sg/grow-your-business/boost-capabilities/growth-and-transformation",
    "https://www.enterprisesg.gov.sg/grow-your-business/boost-capabilities/productivity-and-digitalisation",
    "https://www.enterprisesg.gov.sg/grow-your-business/boost-capabilities/talent-attraction-and-development",
    "https://www.enterprisesg.gov.sg/grow-your-business/boost-capabilities/quality-and-standards",
    "https://www.enterprisesg.gov.sg/grow-your-business/boost-capabilities/sustainability",
    "https://www.enterprisesg.gov.sg/financial-support/productivity-solutions-grant",
    "https://www.enterprisesg.gov.sg/financial-support/energy-efficiency-grant",
    "https://www.enterprisesg.gov.sg/financial-support/market-readiness-assistance-grant",
    "https://www.enterprisesg.gov.sg/financial-support/skillsfuture-enterprise-credit",
    "https://www.enterprisesg.gov.sg/financial-support/double-tax-deduction-for-internationalisation",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme-foreign-based-financial-institutions-multilateral-development-banks",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---green",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---mergers-and-acquisitions",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---project-loan",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---sme-fixed-assets",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---sme-working-capital",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---trade-loan",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-financing-scheme---venture-debt",
    "https://www.enterprisesg.gov.sg/financial-support/enterprise-development-grant",
    "https://www.enterprisesg.gov.sg/financial-support/co-innovation-programmes",
    "https://www.enterprisesg.gov.sg/financial-support/edbi",
    "https://www.enterprisesg.gov.sg/financial-support/fund-management-incentive",
    "https://www.enterprisesg.gov.sg/financial-support/global-trader-programme",
    "https://www.enterprisesg.gov.sg/financial-support/lead-trade-fairs",
    "https://www.enterprisesg.gov.sg/financial-support/local-enterprise-and-association-development-programme",
    "https://www.enterprisesg.gov.sg/financial-support/seeds-capital",
    "https://www.enterprisesg.gov.sg/financial-support/startup-sg-accelerator",
    "https://www.enterprisesg.gov.sg/financial-support/startup-sg-equity",
    "https://www.enterprisesg.gov.sg/financial-support/startup-sg-founder",
    "https://www.enterprisesg.gov.sg/financial-support/startup-sg-tech",
    "https://www.enterprisesg.gov.sg/financial-support/sustainability-reporting-grant",
    "https://www.enterprisesg.gov.sg/financial-support/venture-capital-fund-incentive",
    "https://www.enterprisesg.gov.sg/financial-support/sustainability-reporting-grant/learn-more-about-our-programmes",
    "https://www.enterprisesg.gov.sg/financial-support/sustainability-reporting-grant/expand-into-southeast-asia",
];

// ---------------------------------------------------------------------------
// Config structs (matching grantbot.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Chat-completion provider settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Source pages and HTTP settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// HTML extraction settings.
    #[serde(default)]
    pub extract: ExtractConfig,

    /// Pipeline behaviour.
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base URL of an OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model used for every chat call.
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound on generated tokens per call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature. 0.7 favours variety; lower it for repeatable answers.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Per-request timeout.
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".into()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_temperature() -> f32 {
    0.7
}
fn default_llm_timeout() -> u64 {
    60
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Pages scraped on every run, in order.
    #[serde(default = "default_urls")]
    pub urls: Vec<String>,

    /// Per-request timeout.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            urls: default_urls(),
            timeout_secs: default_fetch_timeout(),
        }
    }
}

fn default_urls() -> Vec<String> {
    DEFAULT_URLS.iter().map(|u| (*u).to_string()).collect()
}
fn default_fetch_timeout() -> u64 {
    30
}

/// `[extract]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Keep headings/paragraphs/list items that are empty after trimming.
    #[serde(default)]
    pub keep_blank_fragments: bool,
}

/// How the corpus is reused between queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CorpusCache {
    /// Re-fetch every page for every query.
    #[default]
    PerQuery,
    /// Reuse the first snapshot for later queries in the same session.
    Session,
}

impl std::str::FromStr for CorpusCache {
    type Err = GrantBotError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "per-query" => Ok(Self::PerQuery),
            "session" => Ok(Self::Session),
            other => Err(GrantBotError::config(format!(
                "unknown corpus cache policy '{other}' (expected per-query or session)"
            ))),
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Subject area named in the prompts.
    #[serde(default = "default_domain")]
    pub domain: String,

    /// Corpus reuse policy.
    #[serde(default)]
    pub corpus_cache: CorpusCache,

    /// Max age of a session snapshot; 0 keeps it for the whole session.
    #[serde(default)]
    pub session_ttl_secs: u64,

    /// Ask the model for a one-line headline before the full answer.
    #[serde(default = "default_true")]
    pub headline: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            corpus_cache: CorpusCache::default(),
            session_ttl_secs: 0,
            headline: true,
        }
    }
}

fn default_domain() -> String {
    "business growth support and financial assistance in Singapore".into()
}
fn default_true() -> bool {
    true
}

// ---------------------------------------------------------------------------
// Runtime config (resolved once, passed by reference)
// ---------------------------------------------------------------------------

/// An API key that never shows up in `Debug` output or logs.
#[derive(Clone)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The raw key, for building the auth header.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Masked form for display, keeping only the last four characters.
    pub fn masked(&self) -> String {
        let tail: String = self
            .0
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("****{tail}")
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey(****)")
    }
}

/// Chat-completion settings with the key already resolved.
#[derive(Debug, Clone)]
pub struct LlmSettings {
    pub api_key: ApiKey,
    pub base_url: Url,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

/// Corpus reuse policy with its TTL attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorpusPolicy {
    PerQuery,
    /// `ttl_secs == 0` never expires.
    Session { ttl_secs: u64 },
}

/// Everything a pipeline run needs, validated up front.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub llm: LlmSettings,
    pub urls: Vec<Url>,
    pub fetch_timeout: Duration,
    pub keep_blank_fragments: bool,
    pub domain: String,
    pub corpus_policy: CorpusPolicy,
    pub headline: bool,
}

impl RuntimeConfig {
    /// Resolve the runtime config, reading the API key from the environment.
    pub fn resolve(config: &AppConfig) -> Result<Self> {
        let key = resolve_api_key(config)?;
        Self::with_api_key(config, key)
    }

    /// Resolve the runtime config with an explicitly supplied key.
    pub fn with_api_key(config: &AppConfig, api_key: ApiKey) -> Result<Self> {
        let base_url = Url::parse(&config.llm.base_url).map_err(|e| {
            GrantBotError::config(format!("invalid llm.base_url '{}': {e}", config.llm.base_url))
        })?;

        let urls = config
            .fetch
            .urls
            .iter()
            .map(|raw| {
                let url = Url::parse(raw)
                    .map_err(|e| GrantBotError::config(format!("invalid source URL '{raw}': {e}")))?;
                match url.scheme() {
                    "http" | "https" => Ok(url),
                    scheme => Err(GrantBotError::config(format!(
                        "source URL '{raw}' has unsupported scheme '{scheme}'"
                    ))),
                }
            })
            .collect::<Result<Vec<_>>>()?;

        if !(0.0..=2.0).contains(&config.llm.temperature) {
            return Err(GrantBotError::config(format!(
                "llm.temperature must be between 0 and 2, got {}",
                config.llm.temperature
            )));
        }

        let corpus_policy = match config.pipeline.corpus_cache {
            CorpusCache::PerQuery => CorpusPolicy::PerQuery,
            CorpusCache::Session => CorpusPolicy::Session {
                ttl_secs: config.pipeline.session_ttl_secs,
            },
        };

        Ok(Self {
            llm: LlmSettings {
                api_key,
                base_url,
                model: config.llm.model.clone(),
                max_tokens: config.llm.max_tokens,
                temperature: config.llm.temperature,
                timeout: Duration::from_secs(config.llm.timeout_secs),
            },
            urls,
            fetch_timeout: Duration::from_secs(config.fetch.timeout_secs),
            keep_blank_fragments: config.extract.keep_blank_fragments,
            domain: config.pipeline.domain.clone(),
            corpus_policy,
            headline: config.pipeline.headline,
        })
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.grantbot/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| GrantBotError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.grantbot/grantbot.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| GrantBotError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| GrantBotError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| GrantBotError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    write_default_config(&path)?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

fn write_default_config(path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| GrantBotError::config(e.to_string()))?;
    std::fs::write(path, content).map_err(|e| GrantBotError::io(path, e))
}

/// Read the API key from the env var named in `[llm] api_key_env`.
pub fn resolve_api_key(config: &AppConfig) -> Result<ApiKey> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(ApiKey::new(val.trim())),
        _ => Err(GrantBotError::config(format!(
            "API key not found. Set the {var_name} environment variable \
             (a .env file in the working directory is also read)."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("OPENAI_API_KEY"));
        assert!(toml_str.contains("productivity-solutions-grant"));
        assert!(toml_str.contains("per-query"));
    }

    #[test]
    fn default_urls_cover_every_source_page() {
        assert_eq!(DEFAULT_URLS.len(), 35);
        let unique: std::collections::HashSet<_> = DEFAULT_URLS.iter().collect();
        assert_eq!(unique.len(), DEFAULT_URLS.len());
        assert!(DEFAULT_URLS.iter().any(|u| u.ends_with(
            "sustainability-reporting-grant/expand-into-southeast-asia"
        )));
        assert!(DEFAULT_URLS.iter().all(|u| Url::parse(u).is_ok()));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.llm.max_tokens, 2048);
        assert_eq!(parsed.fetch.urls.len(), DEFAULT_URLS.len());
        assert!(parsed.pipeline.headline);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let toml_str = r#"
[fetch]
urls = ["https://example.com/grants"]

[pipeline]
corpus_cache = "session"
session_ttl_secs = 600
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.fetch.urls, vec!["https://example.com/grants"]);
        assert_eq!(config.fetch.timeout_secs, 30);
        assert_eq!(config.pipeline.corpus_cache, CorpusCache::Session);
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert!(!config.extract.keep_blank_fragments);
    }

    #[test]
    fn runtime_config_resolves_policy_and_urls() {
        let mut app = AppConfig::default();
        app.pipeline.corpus_cache = CorpusCache::Session;
        app.pipeline.session_ttl_secs = 120;
        let rt = RuntimeConfig::with_api_key(&app, ApiKey::new("sk-test")).expect("resolve");
        assert_eq!(rt.corpus_policy, CorpusPolicy::Session { ttl_secs: 120 });
        assert_eq!(rt.urls.len(), DEFAULT_URLS.len());
        assert_eq!(rt.llm.timeout, Duration::from_secs(60));
    }

    #[test]
    fn runtime_config_rejects_bad_url() {
        let mut app = AppConfig::default();
        app.fetch.urls = vec!["not a url".into()];
        let err = RuntimeConfig::with_api_key(&app, ApiKey::new("k")).unwrap_err();
        assert!(err.to_string().contains("invalid source URL"));

        app.fetch.urls = vec!["ftp://example.com/file".into()];
        let err = RuntimeConfig::with_api_key(&app, ApiKey::new("k")).unwrap_err();
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn runtime_config_rejects_out_of_range_temperature() {
        let mut app = AppConfig::default();
        app.llm.temperature = 3.5;
        assert!(RuntimeConfig::with_api_key(&app, ApiKey::new("k")).is_err());
    }

    #[test]
    fn api_key_resolution_fails_when_unset() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "GB_TEST_NONEXISTENT_KEY_12345".into();
        let result = resolve_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn api_key_is_redacted() {
        let key = ApiKey::new("sk-abcdef123456");
        assert_eq!(format!("{key:?}"), "ApiKey(****)");
        assert_eq!(key.masked(), "****3456");
        assert_eq!(key.expose(), "sk-abcdef123456");
    }

    #[test]
    fn corpus_cache_from_str() {
        assert_eq!("session".parse::<CorpusCache>().unwrap(), CorpusCache::Session);
        assert_eq!("per-query".parse::<CorpusCache>().unwrap(), CorpusCache::PerQuery);
        assert!("forever".parse::<CorpusCache>().is_err());
    }

    #[test]
    fn load_config_from_file() {
        let dir = std::env::temp_dir().join(format!("gb-config-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(CONFIG_FILE_NAME);
        write_default_config(&path).unwrap();

        let loaded = load_config_from(&path).expect("load");
        assert_eq!(loaded.llm.api_key_env, "OPENAI_API_KEY");

        std::fs::write(&path, "[llm\nbroken").unwrap();
        let err = load_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("failed to parse"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}
