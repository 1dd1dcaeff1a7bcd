//! Command-line driver for the compliance workflow engine.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use compliance_client::database::SessionStore;
use compliance_client::messages::MessageKind;
use compliance_client::{EngineConfig, EngineEvent, Stage, WorkflowEngine, WorkflowState};
use compliance_client_sdk::{HttpBackendClient, ProcessingMode};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "compliance-client",
    about = "Drive a document-compliance analysis workflow against a backend",
    version
)]
struct Cli {
    /// Base URL of the compliance backend
    #[arg(long, default_value = "http://localhost:8000")]
    backend_url: String,

    /// Session database path (defaults to ~/.compliance-client/sessions.db)
    #[arg(long)]
    session_db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a document and run the workflow to completion
    Analyze {
        /// Document to upload
        #[arg(long)]
        file: PathBuf,

        /// Reporting framework, e.g. IFRS
        #[arg(long)]
        framework: Option<String>,

        /// Standard to analyze against (repeatable)
        #[arg(long = "standard")]
        standards: Vec<String>,

        /// Ask the backend to suggest standards when none are given
        #[arg(long)]
        suggest: bool,

        /// Free-form instructions forwarded to the compliance engine
        #[arg(long)]
        special_instructions: Option<String>,

        /// Processing mode: smart, zap, or comparison
        #[arg(long, default_value = "smart")]
        mode: String,
    },

    /// Resume a saved session, reconciling it against the backend
    Resume { session_id: String },

    /// List saved sessions
    Sessions,

    /// Delete a saved session
    Delete { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.session_db)?;
    let client = Arc::new(HttpBackendClient::new(&cli.backend_url));
    let engine = WorkflowEngine::with_store(client, EngineConfig::default(), store);

    spawn_narrator(&engine);

    match cli.command {
        Command::Analyze {
            file,
            framework,
            standards,
            suggest,
            special_instructions,
            mode,
        } => {
            let mode = parse_mode(&mode)?;
            run_analyze(
                &engine,
                file,
                framework,
                standards,
                suggest,
                special_instructions,
                mode,
            )
            .await
        }
        Command::Resume { session_id } => {
            engine.resume_session(&session_id).await?;
            wait_until_idle(&engine).await;
            let state = engine.snapshot();
            print_results(&state);
            engine.save_session()?;
            Ok(())
        }
        Command::Sessions => {
            for session in engine.list_sessions()? {
                println!(
                    "{}  {}  {}",
                    session.session_id,
                    session.updated_at.format("%Y-%m-%d %H:%M"),
                    session.title,
                );
            }
            Ok(())
        }
        Command::Delete { session_id } => {
            engine.delete_session(&session_id)?;
            println!("deleted session {session_id}");
            Ok(())
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_analyze(
    engine: &WorkflowEngine,
    file: PathBuf,
    framework: Option<String>,
    mut standards: Vec<String>,
    suggest: bool,
    special_instructions: Option<String>,
    mode: ProcessingMode,
) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let file_name = file
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("document.pdf")
        .to_string();

    engine.start_upload(&file_name, bytes).await?;

    // the backend may already carry a selection, in which case the upload
    // call drives the workflow all the way to results
    if engine.snapshot().stage() == Stage::Results {
        let state = engine.snapshot();
        print_results(&state);
        let session_id = engine.save_session()?;
        println!("session saved as {session_id}");
        return Ok(());
    }

    let Some(framework) = framework else {
        let session_id = engine.save_session()?;
        println!("session saved as {session_id}");
        bail!(
            "metadata stage finished; re-run with --framework (plus --standard or --suggest) \
             or resume session {session_id}"
        );
    };

    engine.confirm_metadata(Default::default())?;

    if standards.is_empty() && suggest {
        let suggestions = engine.suggest_standards(&framework).await?;
        standards = suggestions.into_iter().map(|s| s.standard_id).collect();
    }

    engine
        .select_framework_and_standards(&framework, &standards, special_instructions, mode)
        .await?;

    let state = engine.snapshot();
    print_results(&state);
    let session_id = engine.save_session()?;
    println!("session saved as {session_id}");
    Ok(())
}

/// Print engine narration and progress to stdout as it happens.
fn spawn_narrator(engine: &WorkflowEngine) {
    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                EngineEvent::StageChanged(stage) => println!("== {} ==", stage.label()),
                EngineEvent::Message(entry) => {
                    let prefix = match entry.kind {
                        MessageKind::User => "> ",
                        MessageKind::Loading => "~ ",
                        MessageKind::System | MessageKind::Component => "* ",
                    };
                    println!("{prefix}{}", entry.content);
                }
                EngineEvent::Progress(progress) => {
                    println!(
                        "~ {:>5.1}%  {} ({}/{} standards)",
                        progress.percentage,
                        progress.current_standard.as_deref().unwrap_or("working"),
                        progress.completed_standards,
                        progress.total_standards,
                    );
                }
                EngineEvent::WorkflowReset => println!("== workflow reset =="),
            }
        }
    });
}

/// Resumed sessions may restart polling in the background; wait for the
/// engine to go idle before printing results and exiting.
async fn wait_until_idle(engine: &WorkflowEngine) {
    loop {
        tokio::time::sleep(Duration::from_millis(500)).await;
        if !engine.snapshot().is_processing {
            return;
        }
    }
}

fn print_results(state: &WorkflowState) {
    let Some(results) = &state.analysis_results else {
        return;
    };
    match serde_json::to_string_pretty(results) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{results}"),
    }
}

fn parse_mode(raw: &str) -> Result<ProcessingMode> {
    match raw {
        "smart" => Ok(ProcessingMode::Smart),
        "zap" => Ok(ProcessingMode::Zap),
        "comparison" => Ok(ProcessingMode::Comparison),
        other => bail!("unknown processing mode {other} (expected smart, zap, or comparison)"),
    }
}

fn open_store(path: Option<PathBuf>) -> Result<SessionStore> {
    let path = match path {
        Some(path) => path,
        None => dirs::home_dir()
            .context("could not determine the home directory")?
            .join(".compliance-client")
            .join("sessions.db"),
    };
    SessionStore::open(path)
}
