//! CLI command definitions.
//!
//! Each subcommand maps to one engine operation. Commands that print
//! structured results accept `--format json`.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand, ValueEnum};
use forge_build::BuildResult;
use forge_engine::Engine;
use serde::Serialize;

pub mod chat;
pub mod explore;
pub mod memory;
pub mod preview;
pub mod validate;
pub mod versions;

/// Playforge - natural-language game generation
#[derive(Parser)]
#[command(name = "forge")]
#[command(version, about = "Playforge - turn game ideas into playable builds")]
#[command(long_about = r#"
Playforge turns a natural-language game request into design options, a
committed build and iterations on it, remembering what each project decided.

WORKFLOWS:
  explore       → Decompose a request into branches and options
  select        → Commit to an option and generate the game
  iterate       → Refine the committed game
  finish        → Close the session and write its memory note
  preview       → Generate (or reuse) a cached option preview
  fix-preview   → Repair a preview from runtime errors
  chat          → Build through conversation
  validate      → Check a directory of game files

EXIT CODES:
  0 - Success
  1 - General error
  2 - Client fault (invalid arguments, missing entity, invalid state)
  3 - Validation failure
  4 - Reasoning service failure
  5 - Fix limit reached
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Workspace root holding the .forge directory
    #[arg(short, long, global = true, env = "FORGE_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Explore design options for a request
    Explore(explore::ExploreArgs),

    /// Select an option and generate the game
    Select(explore::SelectArgs),

    /// Refine the committed game
    Iterate(explore::IterateArgs),

    /// Finish an exploration session
    Finish(explore::FinishArgs),

    /// Show a session, or a project's active session
    Session(explore::SessionArgs),

    /// Generate or reuse an option preview
    Preview(preview::PreviewArgs),

    /// Fix a cached preview from runtime errors
    #[command(name = "fix-preview")]
    FixPreview(preview::FixPreviewArgs),

    /// Send a chat message to a project
    Chat(chat::ChatArgs),

    /// Validate a directory of game files
    Validate(validate::ValidateArgs),

    /// Inspect project memory
    #[command(subcommand)]
    Memory(memory::MemoryCommand),

    /// List, roll back or export versions
    #[command(subcommand)]
    Versions(versions::VersionsCommand),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Raised when generated or checked files fail validation.
#[derive(Debug, thiserror::Error)]
#[error("Validation failed with {errors} error(s)")]
pub struct ValidationFailed {
    pub errors: usize,
}

/// Invalid combination of arguments that clap cannot express.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct UsageError(pub String);

/// Settings shared by every command.
pub struct Context {
    pub workspace: PathBuf,
    pub quiet: bool,
}

impl Context {
    pub fn engine(&self) -> Result<Engine> {
        Engine::from_workspace(&self.workspace)
            .with_context(|| format!("Failed to open workspace {:?}", self.workspace))
    }

    /// Print a progress line unless `--quiet` is set.
    pub fn say(&self, message: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", message.as_ref());
        }
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to serialize result")?;
    println!("{}", json);
    Ok(())
}

/// Print a build result; an error when it failed.
pub fn report_build(ctx: &Context, result: &BuildResult) -> Result<()> {
    for warning in &result.warnings {
        ctx.say(format!("   ⚠️  {}", warning));
    }
    if result.success {
        ctx.say("   ✅ Build validated");
        return Ok(());
    }
    println!("   ❌ Build failed:");
    for error in &result.errors {
        println!("      - {}", error);
    }
    Err(ValidationFailed {
        errors: result.errors.len(),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "forge",
            "versions",
            "list",
            "--project",
            "arcade",
            "--workspace",
            "/tmp/ws",
            "--log-json",
        ])
        .unwrap();
        assert_eq!(cli.workspace, PathBuf::from("/tmp/ws"));
        assert!(cli.log_json);
        assert!(matches!(cli.command, Commands::Versions(_)));
    }

    #[test]
    fn test_session_id_must_be_uuid() {
        assert!(Cli::try_parse_from(["forge", "finish", "--session", "not-a-uuid"]).is_err());
    }
}
