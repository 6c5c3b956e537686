//! Command-line surface.
//!
//! `warden hook <event>` is the host-facing entry point: event JSON on
//! stdin, decision JSON on stdout, exit code per the hook contract. The
//! remaining commands are for humans poking at the state directory.

use crate::config::WardenConfig;
use crate::context;
use crate::failures::FailureKb;
use crate::health;
use crate::hooks::{
    Pipeline, PostToolUseEvent, PreToolUseEvent, PromptSubmitEvent, SessionStopEvent,
};
use crate::lock::LockCoordinator;
use crate::session::identity;
use crate::state::StateDir;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::io::Read;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Enforcement pipeline for AI pair-programming hooks", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Project root holding the .warden state directory
    #[arg(short = 'C', long, global = true)]
    pub project_root: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize the .warden state directory
    Init,

    /// Show the active session and store summaries
    Status,

    /// Run the health checks and report what they repaired
    Doctor,

    /// Run a hook event: JSON on stdin, decision JSON on stdout
    Hook {
        #[arg(value_enum)]
        event: HookEvent,
    },

    /// Close the active session and write its summary
    Reset,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum HookEvent {
    PromptSubmit,
    PreToolUse,
    PostToolUse,
    SessionStop,
}

/// Dispatch a parsed command. Returns the process exit code.
pub fn run(cli: Cli) -> Result<i32> {
    let root = match cli.project_root {
        Some(root) => root,
        None => std::env::current_dir().context("Failed to resolve current directory")?,
    };

    match cli.command {
        Commands::Init => init(&root),
        Commands::Status => status(&root),
        Commands::Doctor => doctor(&root),
        Commands::Hook { event } => hook(&root, event),
        Commands::Reset => reset(&root),
    }
}

fn init(root: &PathBuf) -> Result<i32> {
    let state = StateDir::new(root);
    state.initialize()?;
    println!("{} {}", "Initialized".green(), state.root().display());
    Ok(0)
}

fn status(root: &PathBuf) -> Result<i32> {
    let state = StateDir::new(root);
    if !state.exists() {
        println!("{}", "No state directory. Run `warden init` first.".yellow());
        return Ok(1);
    }

    let config = WardenConfig::load_or_default(&state.config_path())?;
    let locks = LockCoordinator::new(state.locks_dir(), config.lock.clone());

    match identity::current_session_id(&state)? {
        Some(id) => match identity::load_session(&state, &id)? {
            Some(session) => {
                let bytes = serde_json::to_vec(&session).map(|v| v.len() as u64).unwrap_or(0);
                let budget =
                    context::estimate(session.requests.len() as u32, bytes, &config.context);

                println!("{} {}", "Session:".bold(), session.id);
                println!("  status:     {}", session.status);
                println!("  requests:   {}", session.requests.len());
                println!("  complexity: {} (peak)", session.max_complexity);
                println!(
                    "  tags:       {}",
                    session.tags.iter().cloned().collect::<Vec<_>>().join(", ")
                );
                println!(
                    "  context:    {} ({:.0}%)",
                    budget.tier,
                    budget.usage_fraction * 100.0
                );
                if session.reconcile {
                    println!("  {}", "flagged for reconciliation".yellow());
                }
            }
            None => println!("{}", "Current pointer names a missing session.".yellow()),
        },
        None => println!("No active session."),
    }

    let kb = FailureKb::new(&state, &locks, config.failures.clone());
    let patterns = kb.load_patterns()?;
    println!("{} {}", "Failure patterns:".bold(), patterns.len());

    Ok(0)
}

fn doctor(root: &PathBuf) -> Result<i32> {
    let state = StateDir::new(root);
    let config = WardenConfig::load_or_default(&state.config_path()).unwrap_or_default();
    let locks = LockCoordinator::new(state.locks_dir(), config.lock);

    let report = health::check_and_repair(&state, &locks);
    if report.failures.is_empty() {
        println!("{}", "All checks passed.".green());
        return Ok(0);
    }

    for failure in &report.failures {
        let marker = if failure.repaired {
            "repaired".green()
        } else {
            "failed".red()
        };
        println!(
            "{} [{}] {}: {}",
            marker, failure.severity, failure.check, failure.detail
        );
        println!("  → {}", failure.remediation);
    }

    Ok(if report.passed() { 0 } else { 1 })
}

fn hook(root: &PathBuf, event: HookEvent) -> Result<i32> {
    let mut input = String::new();
    std::io::stdin()
        .read_to_string(&mut input)
        .context("Failed to read hook event from stdin")?;

    let pipeline = Pipeline::new(root);
    let decision = match event {
        HookEvent::PromptSubmit => {
            let event: PromptSubmitEvent = parse_event(&input)?;
            pipeline.on_prompt_submit(&event)
        }
        HookEvent::PreToolUse => {
            let event: PreToolUseEvent = parse_event(&input)?;
            pipeline.on_pre_tool_use(&event)
        }
        HookEvent::PostToolUse => {
            let event: PostToolUseEvent = parse_event(&input)?;
            pipeline.on_post_tool_use(&event)
        }
        HookEvent::SessionStop => {
            let event: SessionStopEvent = parse_event(&input)?;
            pipeline.on_session_stop(&event)
        }
    };

    if let Some(message) = &decision.message {
        eprintln!("{message}");
    }
    println!("{}", serde_json::to_string(&decision)?);
    Ok(decision.exit_code())
}

/// An empty stdin means an event with all defaults, not an error.
fn parse_event<T: serde::de::DeserializeOwned + Default>(input: &str) -> Result<T> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(trimmed).context("Failed to parse hook event JSON")
}

fn reset(root: &PathBuf) -> Result<i32> {
    let pipeline = Pipeline::new(root);
    let decision = pipeline.on_session_stop(&SessionStopEvent { reason: None });
    match decision.annotations.get("session_summary") {
        Some(summary) => println!("{} {}", "Closed:".green(), summary),
        None => println!("No active session to close."),
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_hook_subcommand() {
        let cli = Cli::try_parse_from(["warden", "hook", "prompt-submit"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Hook {
                event: HookEvent::PromptSubmit
            }
        ));
    }

    #[test]
    fn test_cli_parses_global_project_root() {
        let cli = Cli::try_parse_from(["warden", "-C", "/tmp/project", "status"]).unwrap();
        assert_eq!(cli.project_root, Some(PathBuf::from("/tmp/project")));
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(Cli::try_parse_from(["warden", "hook", "mystery-event"]).is_err());
    }

    #[test]
    fn test_parse_event_accepts_empty_stdin() {
        let event: PromptSubmitEvent = parse_event("").unwrap();
        assert!(event.prompt.is_empty());
    }
}
