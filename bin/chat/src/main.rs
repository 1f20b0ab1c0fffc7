mod config;
mod error;
mod input;
mod render;

use config::ChatConfig;
use input::{AttachmentBuffer, Command, load_attachment};
use parley_ai::GeminiBackend;
use parley_conversation::{Orchestrator, SendOutcome};
use render::TranscriptPrinter;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const HELP: &str = "\
Type a message and press enter to send it.
  /attach <path>  attach an image to the next message
  /clear          drop attached images
  /help           show this help
  /quit           leave";

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Load configuration from environment
    let config = ChatConfig::from_env().expect("failed to load configuration");
    tracing::info!(model = %config.gemini.model, "Loaded configuration");

    let backend = GeminiBackend::new(config.gemini)
        .expect("failed to create Gemini backend (set GEMINI_API_KEY)");
    let orchestrator = Arc::new(Orchestrator::new(Arc::new(backend), config.conversation));
    tracing::info!(conversation = %orchestrator.id(), "Started conversation");

    tokio::spawn(TranscriptPrinter::new().run(orchestrator.transcript()));

    let mut attachments = AttachmentBuffer::new(config.max_attachments);
    let mut in_flight: Option<JoinHandle<()>> = None;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("{HELP}");

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = tokio::signal::ctrl_c() => break,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                tracing::error!(error = %e, "Failed to read input");
                break;
            }
        };

        match Command::parse(&line) {
            Command::Send(text) => {
                if text.trim().is_empty() {
                    continue;
                }
                let sending = in_flight.as_ref().is_some_and(|task| !task.is_finished());
                if sending || orchestrator.is_busy() {
                    println!("(still waiting for the previous reply)");
                    continue;
                }
                let images = attachments.take();
                let orchestrator = Arc::clone(&orchestrator);
                in_flight = Some(tokio::spawn(async move {
                    match orchestrator.send(text, images).await {
                        SendOutcome::Accepted { .. } => {}
                        SendOutcome::RejectedBusy => {
                            println!("(still waiting for the previous reply)");
                        }
                        SendOutcome::RejectedEmptyInput => {}
                    }
                }));
            }
            Command::Attach(path) => match load_attachment(&path).await {
                Ok(attachment) => match attachments.push(attachment) {
                    Ok(count) => println!("({count}/{} images attached)", attachments.max()),
                    Err(report) => println!("({report})"),
                },
                Err(report) => println!("({report})"),
            },
            Command::Clear => {
                let dropped = attachments.len();
                attachments.clear();
                println!("({dropped} images dropped)");
            }
            Command::Help => println!("{HELP}"),
            Command::Quit => break,
        }
    }

    tracing::info!(
        conversation = %orchestrator.id(),
        turns = orchestrator.snapshot().len(),
        "Conversation ended"
    );
}
