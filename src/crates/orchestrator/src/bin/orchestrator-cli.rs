//! Operator CLI for the orchestration core
//!
//! - `ask` runs one message through the gateway with an in-memory store
//! - `keys` prints the masked credential table
//! - `check-config` validates a settings file

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use orchestrator::gateway::{GatewayRequest, InMemoryConversationStore, StreamBuilder, StreamEvent};
use orchestrator::intent::RequestMode;
use orchestrator::{OrchestratorSettings, Runtime};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tooling::logging::format_duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "orchestrator-cli")]
#[command(about = "Run requests through the orchestration core and inspect its state", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, env = "ORCH_CONFIG", default_value = "orchestrator.yaml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one message and print the reply
    Ask {
        /// Message text
        message: String,
        /// Conversation id
        #[arg(long, default_value = "cli")]
        conversation: String,
        /// Treat the message as an image request
        #[arg(long)]
        image: bool,
        /// Print plan and task events while running
        #[arg(long)]
        stream: bool,
        /// Print the reply as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the credential pools with masked keys
    Keys {
        /// Output format: text (default), json
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Validate the settings file
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = OrchestratorSettings::load(&cli.config)
        .with_context(|| format!("invalid settings in {}", cli.config.display()))?;

    match cli.command {
        Commands::CheckConfig => {
            println!(
                "{}: ok ({} roles, {} providers, {} credentials)",
                cli.config.display(),
                settings.roles.len(),
                settings.providers.len(),
                settings.providers.iter().map(|p| p.keys.len()).sum::<usize>()
            );
            Ok(())
        }
        Commands::Keys { format } => {
            let runtime = Runtime::from_settings(settings)?;
            let rows = runtime.keys.snapshot();
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("{:<14} {:<10} {:<12} {:>9} {:>6} {:>6}", "ID", "PROVIDER", "KEY", "STATE", "TOTAL", "TODAY");
                for row in rows {
                    println!(
                        "{:<14} {:<10} {:<12} {:>9} {:>6} {:>6}",
                        row.id, row.provider, row.masked, row.state, row.total_requests, row.daily_requests
                    );
                }
            }
            Ok(())
        }
        Commands::Ask {
            message,
            conversation,
            image,
            stream,
            json,
        } => ask(settings, message, conversation, image, stream, json).await,
    }
}

async fn ask(
    settings: OrchestratorSettings,
    message: String,
    conversation: String,
    image: bool,
    stream: bool,
    json: bool,
) -> Result<()> {
    let runtime = Runtime::from_settings(settings)?;
    let gateway = runtime.gateway(Arc::new(InMemoryConversationStore::new()));

    let mut request = GatewayRequest::new(conversation, "cli", message);
    if image {
        request = request.with_mode(RequestMode::Image);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, cancelling request");
            ctrl_c.cancel();
        }
    });

    let (events, printer) = if stream {
        let (sender, mut events) = StreamBuilder::new().buffer_size(64).include_tokens(!json).build();
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Token { text } => {
                        let _ = write!(stdout, "{}", text);
                        let _ = stdout.flush();
                    }
                    StreamEvent::Done { .. } if !json => {
                        let _ = writeln!(stdout);
                    }
                    other => eprintln!("{}", serde_json::to_string(&other).unwrap_or_default()),
                }
            }
        });
        (Some(sender), Some(printer))
    } else {
        (None, None)
    };

    let result = gateway.handle(request, events, cancel).await;
    if let Some(printer) = printer {
        printer.await.context("event printer failed")?;
    }

    match result {
        Ok(reply) if json => {
            println!("{}", serde_json::to_string_pretty(&reply)?);
            Ok(())
        }
        Ok(reply) => {
            if !stream {
                println!("{}", reply.text);
            }
            eprintln!(
                "[intent={} model={} tasks={} {}]",
                reply.intent,
                reply.model.as_deref().unwrap_or("-"),
                reply.results.len(),
                format_duration(Duration::from_millis(reply.duration_ms))
            );
            Ok(())
        }
        Err(e) => {
            eprintln!("{}", e.user_message());
            Err(e.into())
        }
    }
}
