use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

use mender::config::Config;
use mender::orchestration::{HeadlessModel, Orchestrator};
use mender::workflow::{
    DetectedIssue, HumanResponse, InteractionResponse, IssueBatch, UiEvent,
};
use mender::{mlog, mlog_warn, Result};

/// Mender - interactive remediation of detected code issues
#[derive(Parser, Debug)]
#[command(name = "mender")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    MENDER_DEBUG=1  Enable debug logging (alternative to --debug)")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.mender/mender.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run a remediation session over a JSON file of detected issues
    Run {
        /// Issue batch: `{"profile": ..., "issues": [...]}` or a bare issue array
        issues: PathBuf,

        /// Migration profile (overrides the one in the file)
        #[arg(long, short = 'p')]
        profile: Option<String>,

        /// Stop when the tasks run out instead of asking for more
        #[arg(long)]
        no_interactive: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    mender::log::init_with_debug(cli.debug);

    match cli.command {
        Command::Run {
            issues,
            profile,
            no_interactive,
        } => run_remediation(&issues, profile, no_interactive),
        Command::Config => show_config(),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BatchFile {
    Batch(IssueBatch),
    Bare(Vec<DetectedIssue>),
}

/// Parse an issue file, accepting either a full batch or a bare issue list.
fn parse_batch(text: &str) -> Result<IssueBatch> {
    let batch = match serde_json::from_str::<BatchFile>(text) {
        Ok(BatchFile::Batch(batch)) => batch,
        Ok(BatchFile::Bare(issues)) => IssueBatch {
            profile: None,
            issues,
        },
        // Re-parse as a batch for the more useful error message.
        Err(_) => serde_json::from_str::<IssueBatch>(text)?,
    };
    Ok(batch)
}

/// Turn a line typed by the user into a response.
///
/// Accepts a full JSON response, `y`/`yes`, `n`/`no`, or a number for a
/// choice. Short answers go to the most recent prompt.
fn parse_answer(line: &str, pending: Option<&str>) -> Option<HumanResponse> {
    let line = line.trim();
    if line.starts_with('{') {
        return serde_json::from_str(line).ok();
    }
    let id = pending?;
    let response = match line.to_ascii_lowercase().as_str() {
        "y" | "yes" => InteractionResponse::yes(),
        "n" | "no" => InteractionResponse::no(),
        other => InteractionResponse::choice(other.parse().ok()?),
    };
    Some(HumanResponse::new(id, response))
}

fn print_event(event: &UiEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{}", line),
        Err(e) => mlog_warn!("Failed to render UI event: {}", e),
    }
}

fn run_remediation(path: &Path, profile: Option<String>, no_interactive: bool) -> Result<()> {
    let mut batch = parse_batch(&fs::read_to_string(path)?)?;
    if profile.is_some() {
        batch.profile = profile;
    }

    let mut config = Config::load()?;
    if no_interactive {
        config.interactive = false;
    }
    let root = std::env::current_dir()?;
    mlog!(
        "Run command: issues={}, profile={:?}, interactive={}",
        path.display(),
        batch.profile,
        config.interactive
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let model = HeadlessModel::from_config(&config, &root)?;
        let (orchestrator, mut ui_rx) = Orchestrator::builder(config, &root)
            .model(Arc::new(model))
            .build();

        let (prompt_tx, prompt_rx) = watch::channel(None::<String>);

        let printer = tokio::spawn(async move {
            while let Some(event) = ui_rx.recv().await {
                if let UiEvent::InteractionRequested { id, message, .. } = &event {
                    eprintln!("? {}  [y/n, a number, or a JSON response]", message);
                    let _ = prompt_tx.send(Some(id.clone()));
                }
                print_event(&event);
            }
        });

        let answerer = {
            let orchestrator = orchestrator.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(tokio::io::stdin()).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let pending = prompt_rx.borrow().clone();
                    match parse_answer(&line, pending.as_deref()) {
                        Some(response) => {
                            if !orchestrator.resolve_interaction(response) {
                                eprintln!("No pending prompt matches that answer");
                            }
                        }
                        None => eprintln!("Could not read that answer"),
                    }
                }
            })
        };

        let outcome = orchestrator.run_session(batch).await?;
        orchestrator.wait_until_idle().await;
        answerer.abort();
        drop(orchestrator);
        let _ = tokio::time::timeout(Duration::from_secs(1), printer).await;

        let summary = serde_json::json!({
            "session_id": outcome.session_id.to_string(),
            "status": outcome.status.to_string(),
            "error": outcome.error,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        Ok::<(), mender::Error>(())
    })
}

fn show_config() -> Result<()> {
    let config = Config::load()?;
    println!("# {}", Config::config_path()?.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}
