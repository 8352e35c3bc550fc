//! Chat command - build through conversation with streamed progress.

use anyhow::{anyhow, Result};
use clap::Args;
use tokio::sync::mpsc;

use forge_engine::{ProgressEvent, ProgressSink};

use super::{Context, OutputFormat, ValidationFailed};

#[derive(Args)]
pub struct ChatArgs {
    #[arg(short, long)]
    project: String,

    /// The message to send
    message: String,

    /// `json` prints each progress event as a JSON line
    #[arg(long, value_enum, default_value_t)]
    format: OutputFormat,
}

/// How a chat run ended, judged from its events.
#[derive(Debug, Default)]
struct RunSummary {
    error: Option<String>,
    build_errors: Option<usize>,
}

impl RunSummary {
    fn observe(&mut self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Error { message } => self.error = Some(message.clone()),
            ProgressEvent::BuildStatus { success, errors } => {
                self.build_errors = (!success).then_some(errors.len());
            }
            _ => {}
        }
    }

    fn into_result(self) -> Result<()> {
        if let Some(message) = self.error {
            return Err(anyhow!(message));
        }
        match self.build_errors {
            Some(errors) => Err(ValidationFailed { errors }.into()),
            None => Ok(()),
        }
    }
}

fn render(ctx: &Context, event: &ProgressEvent) {
    match event {
        ProgressEvent::StageChange { stage } => ctx.say(format!("▶ {}", stage)),
        ProgressEvent::Token { token } => println!("{}", token),
        ProgressEvent::ToolCall { tool, args } => {
            let target = args["file_path"].as_str().unwrap_or_default();
            ctx.say(format!("   🛠  {} {}", tool, target));
        }
        ProgressEvent::BuildStatus { success: true, .. } => ctx.say("   ✅ Build validated"),
        ProgressEvent::BuildStatus { errors, .. } => {
            println!("   ❌ Build failed:");
            for error in errors {
                println!("      - {}", error);
            }
        }
        ProgressEvent::Error { message } => eprintln!("❌ {}", message),
        ProgressEvent::Done { version_id: Some(id) } => ctx.say(format!("✅ Version {}", id)),
        ProgressEvent::Done { version_id: None } => ctx.say("✅ Done"),
    }
}

pub async fn execute(ctx: &Context, args: ChatArgs) -> Result<()> {
    let engine = ctx.engine()?;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let sink = ProgressSink::new(tx);

    let printer = async {
        let mut summary = RunSummary::default();
        while let Some(event) = rx.recv().await {
            summary.observe(&event);
            if args.format == OutputFormat::Json {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => eprintln!("Unprintable event: {}", e),
                }
            } else {
                render(ctx, &event);
            }
            if event.is_terminal() {
                break;
            }
        }
        summary
    };

    let (_, summary) = tokio::join!(engine.chat(&args.project, &args.message, &sink), printer);
    summary.into_result()
}
