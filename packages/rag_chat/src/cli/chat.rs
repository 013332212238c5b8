//! Interactive chat pane.
//!
//! Reads lines from stdin and renders session snapshots as they change.
//! Lines starting with `/` are pane commands; anything else is sent.

use anyhow::{Context, Result};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info};

use chat_sync::api::DEFAULT_CONVERSATION_TITLE;
use chat_sync::channel::{ChannelManager, ConnectionStatus};
use chat_sync::{ChatSession, ConversationId, MessageId, Role, SessionSnapshot};

use super::{connect_api, explain};
use crate::config::ClientConfig;

#[derive(Debug, PartialEq, Eq)]
enum Input {
    Empty,
    Message(String),
    Switch(ConversationId),
    New,
    Reload,
    Help,
    Quit,
    Invalid(String),
}

fn parse_input(line: &str) -> Input {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some("quit" | "exit" | "q"), None) => Input::Quit,
        (Some("new"), None) => Input::New,
        (Some("reload"), None) => Input::Reload,
        (Some("help"), None) => Input::Help,
        (Some("switch"), Some(id)) => match id.parse() {
            Ok(id) => Input::Switch(id),
            Err(_) => Input::Invalid(format!("not a conversation id: {id}")),
        },
        (Some("switch"), None) => Input::Invalid("usage: /switch <id>".to_string()),
        _ => Input::Invalid(format!("unknown command: /{command} (try /help)")),
    }
}

fn print_help() {
    println!("  /switch <id>   open another conversation");
    println!("  /new           start a new conversation");
    println!("  /reload        re-fetch this conversation's messages");
    println!("  /quit          leave");
}

/// Turns successive snapshots into the lines to print.
///
/// The user's own input is already on the terminal, so their optimistic
/// message and its confirmed replacement are not printed again. A confirmed
/// user message counts as a replacement when an optimistic entry with the
/// same text left the timeline in the same snapshot.
#[derive(Debug, Default)]
struct Renderer {
    conversation: Option<ConversationId>,
    printed: HashSet<MessageId>,
    optimistic: HashMap<MessageId, String>,
    connection: Option<ConnectionStatus>,
    was_connected: bool,
    busy: bool,
}

impl Renderer {
    fn render(&mut self, snapshot: &SessionSnapshot) -> Vec<String> {
        let mut out = Vec::new();

        if snapshot.conversation_id != self.conversation {
            self.conversation = snapshot.conversation_id;
            self.printed.clear();
            self.optimistic.clear();
            self.connection = None;
            self.was_connected = false;
            self.busy = false;
            if let Some(id) = snapshot.conversation_id {
                out.push(format!("── conversation {id} ──"));
            }
        }

        if self.connection != Some(snapshot.connection) {
            match snapshot.connection {
                ConnectionStatus::Connected => {
                    self.was_connected = true;
                    out.push("● live".to_string());
                }
                ConnectionStatus::Disconnected if self.was_connected => {
                    out.push("Disconnected. Using HTTP fallback.".to_string());
                }
                _ => {}
            }
            self.connection = Some(snapshot.connection);
        }

        let shown: HashSet<&MessageId> = snapshot.messages.iter().map(|m| &m.id).collect();
        let mut replaced = Vec::new();
        self.optimistic.retain(|id, content| {
            let kept = shown.contains(id);
            if !kept {
                replaced.push(std::mem::take(content));
            }
            kept
        });

        for message in &snapshot.messages {
            if !self.printed.insert(message.id.clone()) {
                continue;
            }
            match message.role {
                Role::User if message.id.is_optimistic() => {
                    self.optimistic
                        .insert(message.id.clone(), message.content.clone());
                }
                Role::User => match replaced.iter().position(|c| *c == message.content) {
                    Some(pos) => {
                        replaced.swap_remove(pos);
                    }
                    None => out.push(format!("you> {}", message.content)),
                },
                Role::Assistant => out.push(format!("assistant> {}", message.content)),
            }
        }

        let busy = snapshot.is_busy();
        if busy && !self.busy {
            out.push("assistant is typing…".to_string());
        }
        self.busy = busy;

        out
    }
}

pub async fn run(config: &ClientConfig, conversation: Option<ConversationId>) -> Result<()> {
    let api = connect_api(config)?;

    let conversation_id = match conversation {
        Some(id) => id,
        None => {
            let created = api
                .create_conversation(DEFAULT_CONVERSATION_TITLE)
                .await
                .map_err(|e| explain(e, config))?;
            info!(conversation_id = created.id, "started new conversation");
            created.id
        }
    };

    let channels = if config.realtime.enabled {
        Some(ChannelManager::new(
            api.ws_base_url(),
            config.realtime.channel.clone(),
        ))
    } else {
        println!("Realtime disabled. Using HTTP.");
        None
    };

    let api = Arc::new(api);
    let session = ChatSession::spawn(api.clone(), channels);
    let mut updates = session.subscribe();
    session.select(Some(conversation_id)).await?;

    println!("Type a message and press enter. /help for commands.");
    let mut renderer = Renderer::default();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read input")? else {
                    debug!("stdin closed");
                    break;
                };
                match parse_input(&line) {
                    Input::Empty => {}
                    Input::Quit => break,
                    Input::Help => print_help(),
                    Input::Invalid(reason) => eprintln!("{reason}"),
                    Input::Reload => session.reload().await?,
                    Input::Switch(id) => session.select(Some(id)).await?,
                    Input::New => {
                        let created = api
                            .create_conversation(DEFAULT_CONVERSATION_TITLE)
                            .await
                            .map_err(|e| explain(e, config))?;
                        session.select(Some(created.id)).await?;
                    }
                    Input::Message(text) => {
                        if session.snapshot().sending {
                            eprintln!("Still waiting for the previous reply.");
                            continue;
                        }
                        session.submit(text).await?;
                    }
                }
            }

            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                for line in renderer.render(&snapshot) {
                    println!("{line}");
                }
            }
        }
    }

    session.shutdown().await;
    Ok(())
}
