//! Version commands - list, rollback, export.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Subcommand};

use forge_engine::{BuildStatus, EngineError};

use super::{print_json, Context, OutputFormat};

#[derive(Subcommand)]
pub enum VersionsCommand {
    /// List a project's versions, newest first
    List(ListArgs),

    /// Copy an old version into a new current version
    Rollback(RollbackArgs),

    /// Write a version's files to a directory
    Export(ExportArgs),
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short, long)]
    project: String,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct RollbackArgs {
    #[arg(short, long)]
    project: String,

    /// Version to restore
    #[arg(long = "id", value_name = "ID")]
    version_id: u64,
}

#[derive(Args)]
pub struct ExportArgs {
    #[arg(short, long)]
    project: String,

    /// Version to export; the current one when omitted
    #[arg(long = "id", value_name = "ID")]
    version_id: Option<u64>,

    /// Target directory
    #[arg(short, long)]
    out: PathBuf,
}

pub async fn execute(ctx: &Context, command: VersionsCommand) -> Result<()> {
    let engine = ctx.engine()?;

    match command {
        VersionsCommand::List(args) => {
            let versions = engine.list_versions(&args.project)?;
            if args.format == OutputFormat::Json {
                return print_json(&versions);
            }
            if versions.is_empty() {
                println!("No versions for project {}", args.project);
            }
            for version in versions {
                let icon = match version.build_status {
                    BuildStatus::Success => "✅",
                    BuildStatus::Failed => "❌",
                };
                println!(
                    "{} v{}  {}  {} files",
                    icon,
                    version.id,
                    version.created_at.format("%Y-%m-%d %H:%M:%S"),
                    version.file_count
                );
                if let Some(log) = &version.build_log {
                    for line in log.lines() {
                        println!("      {}", line);
                    }
                }
            }
        }
        VersionsCommand::Rollback(args) => {
            let version = engine.rollback_to_version(&args.project, args.version_id)?;
            println!(
                "✅ Version {} restored as version {}",
                args.version_id, version.id
            );
        }
        VersionsCommand::Export(args) => {
            let version_id = match args.version_id {
                Some(id) => id,
                None => engine
                    .store()
                    .current_version(&args.project)?
                    .map(|v| v.id)
                    .ok_or_else(|| EngineError::NoCurrentVersion(args.project.clone()))?,
            };
            let count = engine.export_version(&args.project, version_id, &args.out)?;
            ctx.say(format!(
                "✅ Exported version {} ({} files) to {:?}",
                version_id, count, args.out
            ));
        }
    }
    Ok(())
}
