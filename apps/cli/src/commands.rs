//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use grantbot_core::{OpenAiChat, Pipeline, ProgressReporter, QueryOutcome};
use grantbot_shared::{
    AppConfig, CorpusCache, RuntimeConfig, Stage, init_config, load_config, load_config_from,
    resolve_api_key,
};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// GrantBot: answers questions about Singapore business grants from official pages.
#[derive(Parser)]
#[command(
    name = "grantbot",
    version,
    about = "Answer questions about Singapore business-support schemes using official pages and an LLM.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Config file to use instead of ~/.grantbot/grantbot.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Answer a single question.
    Ask {
        /// The question, e.g. "What grants help with productivity upgrades?".
        query: String,

        #[command(flatten)]
        display: DisplayArgs,

        /// Corpus reuse policy: per-query or session.
        #[arg(long)]
        cache: Option<CorpusCache>,
    },

    /// Ask questions interactively until `exit` or end of input.
    Chat {
        #[command(flatten)]
        display: DisplayArgs,

        /// Corpus reuse policy: per-query or session.
        #[arg(long, default_value = "session")]
        cache: CorpusCache,
    },

    /// List the configured source pages.
    Sources,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Output switches shared by `ask` and `chat`.
#[derive(clap::Args, Clone, Copy)]
pub(crate) struct DisplayArgs {
    /// Also print the scraped corpus, the raw selector reply, and the selected snippets.
    #[arg(long)]
    pub show_raw: bool,

    /// Print the whole outcome as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; answers to stdout.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "grantbot=warn",
        1 => "grantbot=info",
        2 => "grantbot=debug",
        _ => "grantbot=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Ask {
            query,
            display,
            cache,
        } => cmd_ask(config_path, &query, display, cache).await,
        Command::Chat { display, cache } => cmd_chat(config_path, display, cache).await,
        Command::Sources => cmd_sources(config_path),
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

fn load_app_config(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(p) => load_config_from(p)?,
        None => load_config()?,
    };
    Ok(config)
}

/// Load config, apply the cache override, and resolve secrets.
fn resolve_runtime(path: Option<&Path>, cache: Option<CorpusCache>) -> Result<RuntimeConfig> {
    let mut config = load_app_config(path)?;
    if let Some(cache) = cache {
        config.pipeline.corpus_cache = cache;
    }
    Ok(RuntimeConfig::resolve(&config)?)
}

fn build_pipeline(runtime: &RuntimeConfig) -> Result<Pipeline<'_>> {
    let chat = Arc::new(OpenAiChat::new(&runtime.llm)?);
    Ok(Pipeline::new(runtime, chat)?)
}

async fn cmd_ask(
    config_path: Option<&Path>,
    query: &str,
    display: DisplayArgs,
    cache: Option<CorpusCache>,
) -> Result<()> {
    let runtime = resolve_runtime(config_path, cache)?;
    let mut pipeline = build_pipeline(&runtime)?;

    info!(sources = runtime.urls.len(), "answering query");

    let reporter = CliProgress::new();
    let outcome = pipeline.ask(query, &reporter).await?;
    drop(reporter);

    print_outcome(&outcome, display)
}

async fn cmd_chat(
    config_path: Option<&Path>,
    display: DisplayArgs,
    cache: CorpusCache,
) -> Result<()> {
    let runtime = resolve_runtime(config_path, Some(cache))?;
    let mut pipeline = build_pipeline(&runtime)?;

    println!("Ask about business growth and financial support in Singapore.");
    println!("Type `refresh` to re-fetch sources, `exit` to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let query = line.trim();
        match query {
            "" => continue,
            "exit" | "quit" => break,
            "refresh" => {
                pipeline.invalidate_corpus();
                println!("Sources will be re-fetched on the next question.");
                continue;
            }
            _ => {}
        }

        let reporter = CliProgress::new();
        let result = pipeline.ask(query, &reporter).await;
        drop(reporter);

        // A failed run ends that question, not the session.
        match result {
            Ok(outcome) => print_outcome(&outcome, display)?,
            Err(e) => eprintln!("error: {e}"),
        }
    }

    Ok(())
}

fn print_outcome(outcome: &QueryOutcome, display: DisplayArgs) -> Result<()> {
    if display.json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }

    for diagnostic in &outcome.diagnostics {
        match diagnostic.stage {
            Stage::Selection => eprintln!("error: {diagnostic}"),
            Stage::Fetch | Stage::Headline => eprintln!("warning: {diagnostic}"),
        }
    }

    if display.show_raw {
        println!("--- Scraped Information ---");
        println!("{}", serde_json::to_string_pretty(outcome.corpus.as_ref())?);
        println!("--- LLM Raw Response ---");
        println!(
            "{}",
            outcome
                .selector_raw
                .as_deref()
                .unwrap_or("(selector skipped: no pages were scraped)")
        );
        println!("--- Relevant Information ---");
        println!("{}", serde_json::to_string_pretty(&outcome.relevant)?);
        println!();
    }

    if let Some(headline) = outcome.answer.headline() {
        println!("{headline}");
        println!();
    }
    println!("{}", outcome.answer.text());

    Ok(())
}

fn cmd_sources(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    for (i, url) in config.fetch.urls.iter().enumerate() {
        println!("{:>3}. {url}", i + 1);
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config written to {}", path.display());
    Ok(())
}

fn cmd_config_show(config_path: Option<&Path>) -> Result<()> {
    let config = load_app_config(config_path)?;
    let rendered =
        toml::to_string_pretty(&config).map_err(|e| eyre!("failed to render config: {e}"))?;
    println!("{rendered}");

    let key_status = match resolve_api_key(&config) {
        Ok(key) => key.masked(),
        Err(_) => "(not set)".to_string(),
    };
    println!("# {} = {key_status}", config.llm.api_key_env);
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn page_fetched(&self, url: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fetching [{current}/{total}] {url}"));
    }

    fn done(&self, _outcome: &QueryOutcome) {
        self.spinner.finish_and_clear();
    }
}

impl Drop for CliProgress {
    fn drop(&mut self) {
        self.spinner.finish_and_clear();
    }
}
