//! Exploration commands - explore, select, iterate, finish, session.

use anyhow::Result;
use clap::Args;
use tracing::info;
use uuid::Uuid;

use forge_engine::{ExplorationOption, ExplorationSession};

use super::{print_json, report_build, Context, OutputFormat, UsageError};

#[derive(Args)]
pub struct ExploreArgs {
    /// Project to explore in
    #[arg(short, long)]
    project: String,

    /// What the user wants to build
    request: String,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct SelectArgs {
    #[arg(short, long)]
    session: Uuid,

    /// Option id, e.g. opt_1
    #[arg(short, long)]
    option: String,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct IterateArgs {
    #[arg(short, long)]
    session: Uuid,

    /// Refinement request
    request: String,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct FinishArgs {
    #[arg(short, long)]
    session: Uuid,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct SessionArgs {
    /// Session to show
    #[arg(short, long, conflicts_with = "project")]
    session: Option<Uuid>,

    /// Show this project's active session instead
    #[arg(short, long)]
    project: Option<String>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

fn print_options(options: &[ExplorationOption]) {
    for option in options {
        let marker = if option.is_recommended { "⭐" } else { "  " };
        println!("{} {} - {}", marker, option.option_id, option.title);
        println!("      Loop: {}", option.core_loop);
        println!("      Controls: {}", option.controls);
        println!(
            "      Type: {}, complexity: {}, mobile fit: {}",
            option.game_type, option.complexity, option.mobile_fit
        );
    }
}

fn print_session(session: &ExplorationSession) {
    println!("Session {}", session.id);
    println!("   Project: {}", session.project_id);
    println!("   Request: {}", session.user_input);
    println!("   State: {}", session.state);
    if let Some(option) = &session.selected_option_id {
        println!("   Selected: {}", option);
    }
    println!("   Iterations: {}", session.iteration_count);
    println!("   Updated: {}", session.updated_at.format("%Y-%m-%d %H:%M:%S"));
}

pub async fn explore(ctx: &Context, args: ExploreArgs) -> Result<()> {
    info!("Exploring for project: {}", args.project);
    let engine = ctx.engine()?;
    let outcome = engine.explore(&args.project, &args.request).await?;

    if args.format == OutputFormat::Json {
        return print_json(&outcome);
    }
    ctx.say(format!("🔍 {}", outcome.decomposition().summary));
    ctx.say(format!(
        "   {} dimensions, {} branches",
        outcome.decomposition().dimensions.len(),
        outcome.branches.len()
    ));
    if outcome.options.is_empty() {
        println!("No distinct options came out of this request. Try describing it differently.");
    } else {
        print_options(&outcome.options);
    }
    println!();
    println!("Session: {}", outcome.session.id);
    Ok(())
}

pub async fn select(ctx: &Context, args: SelectArgs) -> Result<()> {
    let engine = ctx.engine()?;
    ctx.say(format!("🎮 Generating {}...", args.option));
    let outcome = engine.select_option(args.session, &args.option).await?;

    if args.format == OutputFormat::Json {
        print_json(&outcome)?;
    } else {
        ctx.say(format!(
            "   Version {} ({} files)",
            outcome.version.id, outcome.version.file_count
        ));
    }
    report_build(ctx, &outcome.build)
}

pub async fn iterate(ctx: &Context, args: IterateArgs) -> Result<()> {
    let engine = ctx.engine()?;
    ctx.say("🔧 Iterating...");
    let outcome = engine.iterate(args.session, &args.request).await?;

    if args.format == OutputFormat::Json {
        print_json(&outcome)?;
    } else {
        ctx.say(format!(
            "   Iteration {} -> version {}",
            outcome.iteration_count, outcome.version.id
        ));
    }
    report_build(ctx, &outcome.build)
}

pub async fn finish(ctx: &Context, args: FinishArgs) -> Result<()> {
    let engine = ctx.engine()?;
    let outcome = engine.finish(args.session).await?;

    if args.format == OutputFormat::Json {
        return print_json(&outcome);
    }
    println!("✅ Session {} finished", outcome.session_id);
    println!("   Memory: {}", outcome.note.content.title);
    if !outcome.note.content.summary.is_empty() {
        println!("   {}", outcome.note.content.summary);
    }
    Ok(())
}

pub async fn session(ctx: &Context, args: SessionArgs) -> Result<()> {
    let engine = ctx.engine()?;

    let (session, options) = match (args.session, args.project) {
        (Some(id), _) => (engine.session_state(id)?, engine.session_options(id)?),
        (None, Some(project)) => match engine.active_session(&project)? {
            Some(active) => (active.session, active.options),
            None => {
                println!("No active session for project {}", project);
                return Ok(());
            }
        },
        (None, None) => return Err(UsageError("Provide --session or --project".into()).into()),
    };

    if args.format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "session": session,
            "options": options,
        }));
    }
    print_session(&session);
    if !options.is_empty() {
        println!();
        print_options(&options);
    }
    Ok(())
}
