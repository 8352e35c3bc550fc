//! Validate command - check a directory of game files.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

use forge_build::{read_file_map, BuildValidator};

use super::{print_json, report_build, Context, OutputFormat, UsageError};

#[derive(Args)]
pub struct ValidateArgs {
    /// Directory containing index.html and its assets
    #[arg(default_value = ".")]
    path: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

pub async fn execute(ctx: &Context, args: ValidateArgs) -> Result<()> {
    info!("Validating: {:?}", args.path);

    if !args.path.is_dir() {
        return Err(UsageError(format!("Directory not found: {:?}", args.path)).into());
    }

    let files = read_file_map(&args.path)
        .with_context(|| format!("Failed to read {:?}", args.path))?;
    let result = BuildValidator::standard()?.validate(&files);

    if args.format == OutputFormat::Json {
        print_json(&result)?;
    } else {
        ctx.say(format!("📋 Checked {} files", files.len()));
    }
    report_build(ctx, &result)
}
