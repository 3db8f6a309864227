//! `matchchat` -- headless chat client.
//!
//! Connects to a `MatchChat` backend, opens one conversation and prints its
//! live messages. Typed lines are sent; `/older` and `/newer` page through
//! history, `/list` prints the chat list and `/quit` exits. Configuration
//! via CLI flags, environment variables, or config file
//! (`~/.config/matchchat/config.toml`).
//!
//! ```bash
//! cargo run --bin matchchat -- --api-url http://127.0.0.1:8080 \
//!     --user-id 1 --access-token dev-token-1 --chat-id 1
//! ```

use std::path::Path;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use matchchat::api::ChatApi;
use matchchat::api::http::HttpApi;
use matchchat::client::{ChatClient, ConversationView};
use matchchat::config::{CliArgs, ClientConfig};
use matchchat::dispatch::{ClientEvent, Notice};
use matchchat::transport::websocket::WsConnector;
use matchchat_proto::frame::EventKind;
use matchchat_proto::message::Message;

type Client = ChatClient<HttpApi, WsConnector>;

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout is the chat.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("matchchat starting");

    let result = run(&config).await;
    tracing::info!("matchchat exiting");
    match result {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("matchchat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(config: &ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let api = HttpApi::with_timeout(
        config.api_base_url()?,
        config.credentials()?,
        config.request_timeout,
    )?;
    let client: Client = ChatClient::new(
        Arc::new(api),
        WsConnector::new(config.connect_timeout),
        config,
    );
    let (_events_guard, mut events) = client.subscribe_channel();

    if let Err(e) = client.connect().await {
        if e.is_permanent() {
            return Err(e.into());
        }
        println!("* offline ({e}), retrying in the background");
    }

    client.load_conversations().await?;
    print_list(&client);

    let target = config
        .conversation()
        .or_else(|| client.conversations().first().map(|r| r.id));
    let Some(target) = target else {
        println!("* no conversations");
        client.disconnect().await;
        return Ok(());
    };
    let view = client.open_conversation(target).await?;
    println!("* conversation {target} with user {}", view.peer());
    for message in view.messages() {
        print_message(&message);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                print_event(&view, &event);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&client, &view, line.trim()).await {
                    break;
                }
            }
        }
    }

    view.close().await;
    client.disconnect().await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(client: &Client, view: &ConversationView<HttpApi>, line: &str) -> bool {
    match line {
        "" => {}
        "/quit" => return false,
        "/list" => print_list(client),
        "/older" | "/newer" => {
            let result = if line == "/older" {
                view.show_older().await
            } else {
                view.show_newer().await
            };
            match result {
                Ok(outcome) => {
                    println!("* {} shown, {} evicted", outcome.inserted, outcome.evicted);
                    let messages = view.messages();
                    let shown = messages.len();
                    for message in messages.iter().skip(shown.saturating_sub(10)) {
                        print_message(message);
                    }
                }
                Err(e) => println!("* paging failed: {e}"),
            }
        }
        text => {
            if let Err(e) = view.send_text(text).await {
                println!("* not sent: {e}");
            } else {
                let shown = view.messages().len();
                view.on_scrolled(shown.saturating_sub(1), shown.saturating_sub(1));
            }
        }
    }
    true
}

fn print_event(view: &ConversationView<HttpApi>, event: &ClientEvent) {
    match event {
        ClientEvent::Inbound(inbound) => match inbound.kind {
            EventKind::ChatMessage if inbound.is_for(view.conversation()) => {
                println!(
                    "< {}",
                    inbound.content.as_deref().unwrap_or_default()
                );
                let shown = view.messages().len();
                view.on_scrolled(shown.saturating_sub(1), shown.saturating_sub(1));
            }
            EventKind::ChatMessage => {
                let chat = inbound
                    .conversation_id
                    .map_or_else(|| "?".to_string(), |c| c.to_string());
                println!("* new message in conversation {chat}");
            }
            EventKind::MatchNotice => println!("* new match!"),
        },
        ClientEvent::StateChanged(state) => println!("* connection {state}"),
        ClientEvent::Reconnecting { attempt, delay } => {
            println!("* reconnecting in {}ms (attempt {attempt})", delay.as_millis());
        }
        ClientEvent::Notice(Notice::MalformedFrame { reason }) => {
            println!("* skipped malformed frame: {reason}");
        }
    }
}

fn print_message(message: &Message) {
    let marker = if message.is_mine { ">" } else { "<" };
    println!("{marker} {}", message.content);
}

fn print_list(client: &Client) {
    let me = client.api().local_user();
    for row in client.conversations() {
        let unread = if row.is_read { " " } else { "*" };
        println!(
            "{unread} [{}] user {}: {}",
            row.id,
            row.peer_of(me),
            row.last_message
        );
    }
}
