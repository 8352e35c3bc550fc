//! Preview commands - generate and fix cached option previews.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use uuid::Uuid;

use forge_engine::{PreviewOutcome, RuntimeErrorReport};

use super::{print_json, Context, OutputFormat, UsageError};

#[derive(Args)]
pub struct PreviewArgs {
    #[arg(short, long)]
    session: Uuid,

    #[arg(short, long)]
    option: String,

    /// Write the preview HTML here instead of printing it
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct FixPreviewArgs {
    #[arg(short, long)]
    session: Uuid,

    #[arg(short, long)]
    option: String,

    /// Runtime error message (repeatable)
    #[arg(short, long = "error")]
    errors: Vec<String>,

    /// JSON file with an array of {message, line, column, stack}
    #[arg(long)]
    errors_file: Option<PathBuf>,

    /// Write the fixed HTML here instead of printing it
    #[arg(long)]
    out: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

fn emit(ctx: &Context, outcome: &PreviewOutcome, out: Option<&PathBuf>, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(outcome);
    }
    match out {
        Some(path) => {
            std::fs::write(path, &outcome.html)
                .with_context(|| format!("Failed to write {:?}", path))?;
            ctx.say(format!(
                "✅ Preview written to {:?} ({}, fix attempts: {})",
                path,
                if outcome.cached { "cached" } else { "generated" },
                outcome.fix_attempts
            ));
        }
        None => println!("{}", outcome.html),
    }
    Ok(())
}

fn collect_errors(args: &FixPreviewArgs) -> Result<Vec<RuntimeErrorReport>> {
    let mut reports: Vec<RuntimeErrorReport> = match &args.errors_file {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {:?}", path))?;
            serde_json::from_str(&content)
                .map_err(|e| UsageError(format!("Invalid errors file {:?}: {}", path, e)))?
        }
        None => Vec::new(),
    };
    reports.extend(args.errors.iter().map(RuntimeErrorReport::new));
    if reports.is_empty() {
        return Err(UsageError("Provide --error or --errors-file".into()).into());
    }
    Ok(reports)
}

pub async fn preview(ctx: &Context, args: PreviewArgs) -> Result<()> {
    let engine = ctx.engine()?;
    let outcome = engine.preview(args.session, &args.option).await?;
    emit(ctx, &outcome, args.out.as_ref(), args.format)
}

pub async fn fix_preview(ctx: &Context, args: FixPreviewArgs) -> Result<()> {
    let errors = collect_errors(&args)?;
    let engine = ctx.engine()?;
    let outcome = engine
        .fix_preview(args.session, &args.option, &errors)
        .await?;
    emit(ctx, &outcome, args.out.as_ref(), args.format)
}
