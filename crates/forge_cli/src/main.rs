//! Playforge CLI - Main entry point.
//!
//! Exit codes:
//! - 0: Success
//! - 1: General error
//! - 2: Client fault (invalid arguments, missing entity, invalid state)
//! - 3: Validation failure
//! - 4: Reasoning service failure
//! - 5: Fix limit reached

use std::process::ExitCode;

use clap::Parser;
use forge_engine::{EngineError, ErrorKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod commands;

use commands::{Cli, Commands, Context, UsageError, ValidationFailed};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const CLIENT_FAULT: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const SERVICE_FAILURE: u8 = 4;
    pub const FIX_LIMIT: u8 = 5;
}

fn init_logging(cli: &Cli) {
    let default_filter = if cli.verbose {
        "forge=debug,debug"
    } else if cli.quiet {
        "error"
    } else {
        "forge=info,warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let (plain, json) = if cli.log_json {
        (None, Some(fmt::layer().json().with_writer(std::io::stderr)))
    } else {
        (
            Some(fmt::layer().with_target(false).with_writer(std::io::stderr)),
            None,
        )
    };

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(plain)
        .with(json)
        .try_init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let ctx = Context {
        workspace: cli.workspace.clone(),
        quiet: cli.quiet,
    };

    let result = match cli.command {
        Commands::Explore(args) => commands::explore::explore(&ctx, args).await,
        Commands::Select(args) => commands::explore::select(&ctx, args).await,
        Commands::Iterate(args) => commands::explore::iterate(&ctx, args).await,
        Commands::Finish(args) => commands::explore::finish(&ctx, args).await,
        Commands::Session(args) => commands::explore::session(&ctx, args).await,
        Commands::Preview(args) => commands::preview::preview(&ctx, args).await,
        Commands::FixPreview(args) => commands::preview::fix_preview(&ctx, args).await,
        Commands::Chat(args) => commands::chat::execute(&ctx, args).await,
        Commands::Validate(args) => commands::validate::execute(&ctx, args).await,
        Commands::Memory(command) => commands::memory::execute(&ctx, command).await,
        Commands::Versions(command) => commands::versions::execute(&ctx, command).await,
    };

    match result {
        Ok(()) => ExitCode::from(ExitCodes::SUCCESS),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Map an error to its exit code by the typed cause in its chain.
fn categorize_error(e: &anyhow::Error) -> u8 {
    for cause in e.chain() {
        if cause.downcast_ref::<ValidationFailed>().is_some() {
            return ExitCodes::VALIDATION_FAILURE;
        }
        if cause.downcast_ref::<UsageError>().is_some() {
            return ExitCodes::CLIENT_FAULT;
        }
        if let Some(engine_error) = cause.downcast_ref::<EngineError>() {
            return match engine_error.kind() {
                ErrorKind::Domain => ExitCodes::CLIENT_FAULT,
                ErrorKind::Exhausted => ExitCodes::FIX_LIMIT,
                ErrorKind::Transport | ErrorKind::Contract => ExitCodes::SERVICE_FAILURE,
                ErrorKind::Internal => ExitCodes::GENERAL_ERROR,
            };
        }
    }
    ExitCodes::GENERAL_ERROR
}
