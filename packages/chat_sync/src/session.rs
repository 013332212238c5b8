//! Chat session: the event loop that ties the core together.
//!
//! One tokio task owns the selected conversation, its realtime channel, the
//! timeline and the send coordinator. Every input (UI command, channel
//! update, finished request) is handled to completion before the next one,
//! so the timeline needs no locking. Network calls never run inside a
//! handler: direct requests and history loads are spawned onto a `JoinSet`
//! and come back as completions.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::api::ChatApi;
use crate::channel::{ChannelHandle, ChannelManager, ChannelUpdate, ConnectionStatus, RealtimeSink};
use crate::error::{ApiError, SessionError};
use crate::models::{ChatReply, ConversationId, Message};
use crate::protocol::{ChannelEvent, OutboundFrame};
use crate::send::{Dispatch, PendingSend, SendCoordinator, SendOutcome, SendPath};
use crate::timeline::Timeline;

const COMMAND_BUFFER: usize = 32;

/// What the display layer renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub conversation_id: Option<ConversationId>,
    pub messages: Vec<Message>,
    pub connection: ConnectionStatus,
    /// The assistant is composing a reply (realtime typing event).
    pub remote_typing: bool,
    /// A direct request is outstanding.
    pub sending: bool,
    pub last_path: Option<SendPath>,
}

impl SessionSnapshot {
    fn empty() -> Self {
        Self {
            conversation_id: None,
            messages: Vec::new(),
            connection: ConnectionStatus::Disconnected,
            remote_typing: false,
            sending: false,
            last_path: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    /// Loading indicator: a send is outstanding or the assistant is typing.
    pub fn is_busy(&self) -> bool {
        self.sending || self.remote_typing
    }
}

#[derive(Debug)]
enum Command {
    Select(Option<ConversationId>),
    Submit(String),
    SetTyping(bool),
    Reload,
    Shutdown(oneshot::Sender<()>),
}

enum Completion {
    History {
        conversation_id: ConversationId,
        reload: bool,
        result: Result<Vec<Message>, ApiError>,
    },
    Chat {
        pending: PendingSend,
        result: Result<ChatReply, ApiError>,
    },
}

/// Client side of a running [`ChatSession`].
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    async fn command(&self, command: Command) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// Switch to another conversation (or to none).
    pub async fn select(&self, conversation_id: Option<ConversationId>) -> Result<(), SessionError> {
        self.command(Command::Select(conversation_id)).await
    }

    pub async fn submit(&self, text: impl Into<String>) -> Result<(), SessionError> {
        self.command(Command::Submit(text.into())).await
    }

    /// Tell the server whether the user is typing.
    pub async fn set_typing(&self, typing: bool) -> Result<(), SessionError> {
        self.command(Command::SetTyping(typing)).await
    }

    /// Re-fetch the selected conversation's history and show it in place of
    /// the current timeline.
    pub async fn reload(&self) -> Result<(), SessionError> {
        self.command(Command::Reload).await
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Close the channel, abandon pending requests and stop the task.
    pub async fn shutdown(self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(tx)).await.is_ok() {
            let _ = rx.await;
        }
        let _ = self.task.await;
    }
}

pub struct ChatSession<A: ChatApi> {
    api: Arc<A>,
    channels: Option<ChannelManager>,
    selected: Option<ConversationId>,
    channel: Option<ChannelHandle>,
    timeline: Timeline,
    coordinator: SendCoordinator,
    remote_typing: bool,
    last_path: Option<SendPath>,
    tasks: JoinSet<Completion>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl<A: ChatApi> ChatSession<A> {
    /// Start a session. Without a channel manager every send takes the
    /// direct request path.
    pub fn spawn(api: Arc<A>, channels: Option<ChannelManager>) -> SessionHandle {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::empty());

        let session = Self {
            api,
            channels,
            selected: None,
            channel: None,
            timeline: Timeline::new(),
            coordinator: SendCoordinator::new(),
            remote_typing: false,
            last_path: None,
            tasks: JoinSet::new(),
            snapshot_tx,
        };
        let task = tokio::spawn(session.run(commands_rx));

        SessionHandle {
            commands: commands_tx,
            snapshot: snapshot_rx,
            task,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Select(target)) => self.select(target).await,
                    Some(Command::Submit(text)) => self.submit(&text),
                    Some(Command::SetTyping(typing)) => self.send_typing(typing),
                    Some(Command::Reload) => self.reload(),
                    Some(Command::Shutdown(done)) => {
                        self.teardown().await;
                        let _ = done.send(());
                        break;
                    }
                    None => {
                        self.teardown().await;
                        break;
                    }
                },

                update = next_update(&mut self.channel) => match update {
                    Some(update) => self.handle_update(update),
                    None => self.channel_stopped(),
                },

                Some(joined) = self.tasks.join_next(), if !self.tasks.is_empty() => {
                    match joined {
                        Ok(completion) => self.handle_completion(completion),
                        Err(e) if e.is_cancelled() => {}
                        Err(e) => warn!(error = %e, "session request task failed"),
                    }
                }
            }
            self.publish();
        }
        debug!("chat session stopped");
    }

    fn send_typing(&mut self, typing: bool) {
        if let Some(channel) = &self.channel {
            if !channel.send(OutboundFrame::typing(typing)) {
                debug!("typing status not sent, channel disconnected");
            }
        }
    }

    fn reload(&mut self) {
        if let Some(id) = self.selected {
            self.spawn_history(id, true);
        }
    }

    async fn select(&mut self, target: Option<ConversationId>) {
        if target == self.selected {
            return;
        }
        // the old channel must be closed before anything of the new one exists
        if let Some(old) = self.channel.take() {
            old.shutdown().await;
        }
        self.tasks.abort_all();
        self.timeline.clear();
        self.coordinator.reset();
        self.remote_typing = false;
        self.last_path = None;
        self.selected = target;

        let Some(id) = target else {
            info!("conversation deselected");
            return;
        };
        info!(conversation_id = id, "conversation selected");
        self.channel = self.channels.as_ref().map(|manager| manager.open(id));
        self.spawn_history(id, false);
    }

    fn submit(&mut self, text: &str) {
        let dispatch = self.coordinator.begin(
            text,
            self.selected,
            self.channel.as_ref(),
            &mut self.timeline,
        );
        let Some(dispatch) = dispatch else {
            debug!("send ignored");
            return;
        };
        self.last_path = Some(dispatch.path());

        if let Dispatch::ViaRequest(pending) = dispatch {
            let api = self.api.clone();
            self.tasks.spawn(async move {
                let result = api
                    .send_message(pending.conversation_id, &pending.content)
                    .await;
                Completion::Chat { pending, result }
            });
        }
    }

    fn spawn_history(&mut self, conversation_id: ConversationId, reload: bool) {
        let api = self.api.clone();
        self.tasks.spawn(async move {
            let result = api.get_messages(conversation_id).await;
            Completion::History {
                conversation_id,
                reload,
                result,
            }
        });
    }

    fn handle_update(&mut self, update: ChannelUpdate) {
        match update {
            ChannelUpdate::Status(status) => {
                debug!(?status, "channel status changed");
                if !status.is_connected() {
                    self.remote_typing = false;
                }
            }
            ChannelUpdate::Event(ChannelEvent::Typing(typing)) => self.remote_typing = typing,
            ChannelUpdate::Event(ChannelEvent::Message(message)) => {
                if !self.timeline.push(message) {
                    debug!("realtime message already in timeline");
                }
            }
        }
    }

    fn channel_stopped(&mut self) {
        if let Some(channel) = self.channel.take() {
            info!(
                conversation_id = channel.conversation_id(),
                "realtime channel stopped, using direct requests"
            );
        }
        self.remote_typing = false;
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::History {
                conversation_id,
                reload,
                result,
            } => {
                if self.selected != Some(conversation_id) {
                    debug!(conversation_id, "dropping stale history");
                    return;
                }
                match result {
                    // realtime turns only carry local ids, so a reload must
                    // not merge them with their stored copies
                    Ok(messages) if reload => {
                        let kept = self.coordinator.in_flight().cloned();
                        let len = self.timeline.replace_with(messages, kept.as_ref());
                        debug!(conversation_id, len, "history reloaded");
                    }
                    Ok(messages) => {
                        let inserted = self.timeline.merge(messages);
                        debug!(conversation_id, inserted, "history merged");
                    }
                    Err(e) => warn!(conversation_id, error = %e, "failed to load messages"),
                }
            }
            Completion::Chat { pending, result } => {
                if self.selected != Some(pending.conversation_id) {
                    debug!(
                        conversation_id = pending.conversation_id,
                        "dropping stale send result"
                    );
                    return;
                }
                match self.coordinator.complete(pending, result, &mut self.timeline) {
                    SendOutcome::Confirmed { message_id, .. } => {
                        debug!(%message_id, "message confirmed");
                    }
                    SendOutcome::Failed { optimistic_id, .. } => {
                        debug!(%optimistic_id, "message failed");
                    }
                }
            }
        }
    }

    async fn teardown(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
        self.tasks.abort_all();
        self.coordinator.reset();
        self.remote_typing = false;
        self.publish();
    }

    fn publish(&self) {
        let connection = self
            .channel
            .as_ref()
            .map(ChannelHandle::status)
            .unwrap_or(ConnectionStatus::Disconnected);
        self.snapshot_tx.send_replace(SessionSnapshot {
            conversation_id: self.selected,
            messages: self.timeline.messages(),
            connection,
            remote_typing: self.remote_typing,
            sending: self.coordinator.is_sending(),
            last_path: self.last_path,
        });
    }
}

async fn next_update(channel: &mut Option<ChannelHandle>) -> Option<ChannelUpdate> {
    match channel {
        Some(channel) => channel.recv().await,
        None => std::future::pending().await,
    }
}
