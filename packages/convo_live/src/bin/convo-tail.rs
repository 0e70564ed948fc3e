use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use convo_live::{
    ConvoLive, LiveConfig, LiveTranscript, Message, MessageMetadata, MessageRole, TranscriptQuery,
    Update,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "convo-tail")]
#[command(version)]
#[command(about = "Follow conversation transcripts as the server writes them")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding config.toml (default: ~/.convo_live)
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value = "text")]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow a conversation live until Ctrl-C or the channel closes
    Watch {
        conversation_id: String,

        /// Show only messages from this role
        #[arg(long, value_enum)]
        role: Option<MessageRole>,

        /// Seconds to wait before reconnecting after a failure (0 = exit)
        #[arg(long, default_value = "5")]
        retry_secs: u64,
    },

    /// List conversations visible to the configured credentials
    List,

    /// Print a conversation snapshot once
    Show {
        conversation_id: String,

        /// Show only messages from this role
        #[arg(long, value_enum)]
        role: Option<MessageRole>,

        /// Show only the questions still waiting for an answer
        #[arg(long)]
        pending: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "convo_live=debug,convo_tail=debug,info"
    } else {
        "convo_live=warn,convo_tail=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config = LiveConfig::load(cli.config_dir.clone()).context("failed to load configuration")?;
    let convo = ConvoLive::new(config).context("failed to set up API client")?;

    match cli.command {
        Commands::Watch {
            ref conversation_id,
            role,
            retry_secs,
        } => watch(&convo, conversation_id, role, retry_secs, cli.format).await,
        Commands::List => list(&convo, cli.format).await,
        Commands::Show {
            ref conversation_id,
            role,
            pending,
        } => show(&convo, conversation_id, role, pending, cli.format).await,
    }
}

async fn list(convo: &ConvoLive, format: OutputFormat) -> Result<()> {
    let conversations = convo
        .list_conversations()
        .await
        .context("failed to list conversations")?;

    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
        return Ok(());
    }

    if conversations.is_empty() {
        eprintln!("No conversations.");
        return Ok(());
    }
    for c in conversations {
        println!(
            "{} | {} | {} | {}",
            c.id,
            c.status,
            c.updated_at.format("%Y-%m-%d %H:%M"),
            c.title.as_deref().unwrap_or("(untitled)")
        );
    }
    Ok(())
}

async fn show(
    convo: &ConvoLive,
    conversation_id: &str,
    role: Option<MessageRole>,
    pending: bool,
    format: OutputFormat,
) -> Result<()> {
    let snapshot = convo
        .fetch_snapshot(conversation_id)
        .await
        .with_context(|| format!("failed to fetch conversation {conversation_id}"))?;

    let query = TranscriptQuery::new(&snapshot.messages);
    if pending {
        let questions = query.pending_questions();
        if matches!(format, OutputFormat::Json) {
            println!("{}", serde_json::to_string_pretty(questions)?);
        } else if questions.is_empty() {
            eprintln!("No pending questions.");
        } else {
            for q in questions {
                match &q.options {
                    Some(options) => println!("? {} [{}]", q.question, options.join(" / ")),
                    None => println!("? {}", q.question),
                }
            }
        }
        return Ok(());
    }

    let messages: Vec<&Message> = match role {
        Some(role) => query.by_role(role),
        None => snapshot.messages.iter().collect(),
    };
    if matches!(format, OutputFormat::Text) {
        eprintln!(
            "Conversation {} ({}, {} messages)",
            snapshot.id,
            snapshot.status,
            snapshot.message_count()
        );
    }
    for message in messages {
        print_message(message, format)?;
    }
    Ok(())
}

/// Prints transcript entries that have not been printed yet, in transcript
/// order. A late snapshot can insert older messages; they are printed when
/// first seen.
struct Printer {
    printed: HashSet<String>,
    role: Option<MessageRole>,
    format: OutputFormat,
}

impl Printer {
    fn flush(&mut self, live: &LiveTranscript) -> Result<()> {
        for message in live.messages() {
            if !self.printed.insert(message.id.clone()) {
                continue;
            }
            if self.role.is_some_and(|r| r != message.role) {
                continue;
            }
            print_message(&message, self.format)?;
        }
        Ok(())
    }
}

enum WatchEvent {
    Interrupted,
    Refetch(String),
    Update(Option<Update>),
}

async fn watch(
    convo: &ConvoLive,
    conversation_id: &str,
    role: Option<MessageRole>,
    retry_secs: u64,
    format: OutputFormat,
) -> Result<()> {
    let mut live = convo.live_transcript();
    let mut printer = Printer {
        printed: HashSet::new(),
        role,
        format,
    };

    let (refetch_tx, mut refetch_rx) = mpsc::unbounded_channel::<String>();
    live.on_complete(move |id, _| {
        let _ = refetch_tx.send(id.to_string());
    });

    live.set_conversation(Some(conversation_id));
    match convo.fetch_snapshot(conversation_id).await {
        Ok(snapshot) => {
            live.apply_snapshot(snapshot);
        }
        Err(e) => warn!(conversation = %conversation_id, error = %e, "Initial snapshot unavailable"),
    }
    printer.flush(&live)?;

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => WatchEvent::Interrupted,
            Some(id) = refetch_rx.recv() => WatchEvent::Refetch(id),
            update = live.next_update() => WatchEvent::Update(update),
        };

        match event {
            WatchEvent::Interrupted => break,
            WatchEvent::Refetch(id) => match convo.fetch_snapshot(&id).await {
                Ok(snapshot) => {
                    live.apply_snapshot(snapshot);
                    printer.flush(&live)?;
                }
                Err(e) => warn!(conversation = %id, error = %e, "Snapshot refetch failed"),
            },
            WatchEvent::Update(None) => break,
            WatchEvent::Update(Some(update)) => match update {
                Update::Connected => info!(conversation = %conversation_id, "Live"),
                Update::Transcript => printer.flush(&live)?,
                Update::Completed(complete) => {
                    info!(
                        conversation = %conversation_id,
                        opportunities = ?complete.opportunities_count,
                        "Server finished"
                    );
                }
                Update::Closed => {
                    eprintln!("Channel closed by server.");
                    break;
                }
                Update::Failed(e) => {
                    if retry_secs == 0 {
                        return Err(e).context("realtime connection failed");
                    }
                    warn!(error = %e, retry_secs, "Realtime connection failed, retrying");
                    tokio::select! {
                        _ = tokio::signal::ctrl_c() => break,
                        _ = tokio::time::sleep(Duration::from_secs(retry_secs)) => {
                            live.reconnect();
                        }
                    }
                }
            },
        }
    }

    live.shutdown();
    Ok(())
}

fn print_message(message: &Message, format: OutputFormat) -> Result<()> {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string(message)?);
        return Ok(());
    }

    let time = message.created_at.format("%H:%M:%S");
    match &message.metadata {
        Some(MessageMetadata::Status { .. }) => println!("[{}] ... {}", time, message.content),
        Some(MessageMetadata::Questions { questions }) => {
            println!("[{}] {}: {}", time, message.role, message.content);
            for q in questions {
                println!("    ? {}", q.question);
            }
        }
        Some(MessageMetadata::Error { error }) => println!(
            "[{}] {}: {} (error: {})",
            time,
            message.role,
            message.content,
            error.as_deref().unwrap_or("unknown")
        ),
        _ => println!("[{}] {}: {}", time, message.role, message.content),
    }
    Ok(())
}
