//! Terminal chat front-end.
//!
//! ```text
//! opinion-chat <room-id> [doctor|patient]
//! ```
//!
//! Lines typed on stdin are sent to the room. `/switch` toggles between the
//! doctor and patient role, `/room <id>` moves to another conversation and
//! `/quit` exits. The relay URL comes from `CHAT_SERVER_URL`.

use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, EnvFilter};

use opinion_client::{AdapterConfig, AdapterEvent, AdapterState, ChatAdapter, NoopNotifier};
use opinion_shared::constants::DEFAULT_SERVER_URL;
use opinion_shared::{Message, Role, RoomId};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("opinion_client=info,warn"));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let room = args
        .next()
        .context("usage: opinion-chat <room-id> [doctor|patient]")?;
    let mut role = match args.next() {
        Some(raw) => raw.parse::<Role>().map_err(anyhow::Error::msg)?,
        None => Role::Doctor,
    };

    let server_url =
        std::env::var("CHAT_SERVER_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
    let config = AdapterConfig::new(server_url);

    let (mut adapter, mut events) =
        ChatAdapter::connect(config, RoomId::from(room), Arc::new(NoopNotifier));
    println!("You are logged in as: {}", role.as_str().to_uppercase());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match line.trim() {
                    "/quit" => break,
                    "/switch" => {
                        role = role.switched();
                        println!("You are logged in as: {}", role.as_str().to_uppercase());
                    }
                    cmd if cmd.starts_with("/room ") => {
                        let next = RoomId::from(cmd.trim_start_matches("/room ").trim());
                        let (switched, switched_events) = adapter.switch_room(next).await;
                        adapter = switched;
                        events = switched_events;
                    }
                    _ => {
                        if !adapter.send(&line, role.as_str()) && !line.trim().is_empty() {
                            println!("(not connected, message not sent)");
                        }
                    }
                }
            }
            Some(event) = events.recv() => render(&event, role, adapter.room_id()),
        }
    }

    adapter.close().await;
    Ok(())
}

fn render(event: &AdapterEvent, role: Role, room: &RoomId) {
    match event {
        AdapterEvent::StateChanged(AdapterState::Connecting) => {
            println!("-- connecting to {room} --");
        }
        AdapterEvent::StateChanged(_) => {}
        AdapterEvent::HistoryReplaced(history) => {
            println!("-- {room}: {} earlier message(s) --", history.len());
            for message in history {
                print_message(message, role);
            }
        }
        AdapterEvent::MessageReceived(message) => print_message(message, role),
    }
}

fn print_message(message: &Message, role: Role) {
    let time = message
        .timestamp
        .with_timezone(&chrono::Local)
        .format("%H:%M");
    let marker = if message.sender == role.as_str() { ">" } else { "<" };
    println!("{marker} [{time}] {}: {}", message.sender, message.content);
}
