//! Memory commands - list, search and the cross-project feel profile.

use anyhow::Result;
use clap::{Args, Subcommand};

use forge_memory::{FeelProfile, MemoryNote};

use super::{print_json, Context, OutputFormat};

#[derive(Subcommand)]
pub enum MemoryCommand {
    /// List a project's notes, newest first
    List(ListArgs),

    /// Notes most similar to a query
    Search(SearchArgs),

    /// Feel profile aggregated over every project
    Profile(ProfileArgs),
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(short, long)]
    project: String,

    /// Show at most this many notes
    #[arg(short, long)]
    limit: Option<usize>,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct SearchArgs {
    #[arg(short, long)]
    project: String,

    query: String,

    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

#[derive(Args)]
pub struct ProfileArgs {
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

fn print_notes(notes: &[MemoryNote]) {
    if notes.is_empty() {
        println!("No memories yet.");
        return;
    }
    for note in notes {
        println!(
            "[{}] {} ({}, confidence {:.1})",
            note.created_at.format("%Y-%m-%d %H:%M"),
            note.content.title,
            note.kind,
            note.confidence
        );
        if !note.content.summary.is_empty() && note.content.summary != note.content.title {
            println!("   {}", note.content.summary);
        }
        if !note.tags.is_empty() {
            println!("   tags: {}", note.tags.join(", "));
        }
    }
}

fn print_profile(profile: &FeelProfile) {
    if profile.is_empty() {
        println!("No feel profile yet. Finish an exploration to start one.");
        return;
    }
    let field = |label: &str, value: &Option<String>| {
        if let Some(value) = value {
            println!("   {}: {}", label, value);
        }
    };
    println!("Feel profile ({} sessions)", profile.session_count);
    field("Style", &profile.style_tendency);
    field("Device", &profile.device_preference);
    field("Input", &profile.input_preference);
    field("Session length", &profile.session_length);
    field("Feedback", &profile.feedback_level);
    if !profile.likes.is_empty() {
        println!("   Likes: {}", profile.likes.join(", "));
    }
    if !profile.dislikes.is_empty() {
        println!("   Dislikes: {}", profile.dislikes.join(", "));
    }
}

pub async fn execute(ctx: &Context, command: MemoryCommand) -> Result<()> {
    let engine = ctx.engine()?;

    match command {
        MemoryCommand::List(args) => {
            let mut notes = engine.list_notes(&args.project).await?;
            if let Some(limit) = args.limit {
                notes.truncate(limit);
            }
            match args.format {
                OutputFormat::Json => print_json(&notes)?,
                OutputFormat::Text => print_notes(&notes),
            }
        }
        MemoryCommand::Search(args) => {
            let notes = engine.search_memory(&args.project, &args.query).await?;
            match args.format {
                OutputFormat::Json => print_json(&notes)?,
                OutputFormat::Text => print_notes(&notes),
            }
        }
        MemoryCommand::Profile(args) => {
            let profile = engine.feel_profile().await?;
            match args.format {
                OutputFormat::Json => print_json(&profile)?,
                OutputFormat::Text => print_profile(&profile),
            }
        }
    }
    Ok(())
}
