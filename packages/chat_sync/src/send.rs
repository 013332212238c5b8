//! Send coordination: optimistic display plus realtime-or-fallback dispatch.
//!
//! ```text
//! composing ──begin()──► optimistically displayed ──┬─ ViaChannel (done)
//!                                                   └─ ViaRequest ──complete()──► confirmed | failed
//! ```
//!
//! A message sent over the realtime channel keeps its optimistic identifier;
//! only the direct request path returns a server identifier to swap in.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::channel::RealtimeSink;
use crate::error::ApiError;
use crate::models::{ChatReply, ConversationId, LocalClock, Message, MessageId, Role};
use crate::protocol::OutboundFrame;
use crate::timeline::Timeline;

pub const SEND_FAILURE_TEXT: &str = "Sorry, I encountered an error. Please try again.";

/// Which transport carried a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendPath {
    Channel,
    Request,
}

/// A send waiting on the direct request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub conversation_id: ConversationId,
    pub optimistic_id: MessageId,
    pub content: String,
}

/// Result of [`SendCoordinator::begin`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Handed to the realtime channel. The reply arrives as a channel event.
    ViaChannel {
        optimistic_id: MessageId,
        request_id: String,
    },
    /// The caller must perform the direct request and report back through
    /// [`SendCoordinator::complete`].
    ViaRequest(PendingSend),
}

impl Dispatch {
    pub fn path(&self) -> SendPath {
        match self {
            Dispatch::ViaChannel { .. } => SendPath::Channel,
            Dispatch::ViaRequest(_) => SendPath::Request,
        }
    }

    pub fn optimistic_id(&self) -> &MessageId {
        match self {
            Dispatch::ViaChannel { optimistic_id, .. } => optimistic_id,
            Dispatch::ViaRequest(pending) => &pending.optimistic_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Confirmed {
        message_id: MessageId,
        reply_id: MessageId,
    },
    Failed {
        optimistic_id: MessageId,
        error_id: MessageId,
    },
}

/// Single-flight coordinator for one input box.
#[derive(Debug, Default)]
pub struct SendCoordinator {
    clock: LocalClock,
    in_flight: Option<MessageId>,
}

impl SendCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// True while a send is between `begin` and its completion. Drives the
    /// loading indicator.
    pub fn is_sending(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Optimistic id of the send awaiting its direct request, if any.
    pub fn in_flight(&self) -> Option<&MessageId> {
        self.in_flight.as_ref()
    }

    /// Validate, display optimistically and choose a transport.
    ///
    /// Returns `None` (and changes nothing) when the input is blank, no
    /// conversation is selected, or a send is already in flight.
    pub fn begin<S: RealtimeSink>(
        &mut self,
        input: &str,
        conversation_id: Option<ConversationId>,
        channel: Option<&S>,
        timeline: &mut Timeline,
    ) -> Option<Dispatch> {
        let content = input.trim();
        if content.is_empty() || self.in_flight.is_some() {
            return None;
        }
        let conversation_id = conversation_id?;

        let optimistic_id = MessageId::optimistic(&self.clock);
        timeline.push(Message {
            id: optimistic_id.clone(),
            role: Role::User,
            content: content.to_string(),
            timestamp: Utc::now(),
        });
        self.in_flight = Some(optimistic_id.clone());

        if let Some(channel) = channel.filter(|c| c.is_connected()) {
            let request_id = Uuid::new_v4().to_string();
            if channel.send(OutboundFrame::chat(content, Some(request_id.clone()))) {
                info!(conversation_id, "message sent via realtime channel");
                self.in_flight = None;
                return Some(Dispatch::ViaChannel {
                    optimistic_id,
                    request_id,
                });
            }
            debug!(conversation_id, "realtime dispatch refused");
        }

        info!(conversation_id, "falling back to direct request");
        Some(Dispatch::ViaRequest(PendingSend {
            conversation_id,
            optimistic_id,
            content: content.to_string(),
        }))
    }

    /// Apply the direct request's result. Always ends the in-flight state.
    pub fn complete(
        &mut self,
        pending: PendingSend,
        result: Result<ChatReply, ApiError>,
        timeline: &mut Timeline,
    ) -> SendOutcome {
        self.in_flight = None;

        // the answer's id is the user message's id plus one
        let result = result.and_then(|reply| match reply.message.id.checked_add(1) {
            Some(answer_id) => Ok((reply, answer_id)),
            None => Err(ApiError::InvalidReply(format!(
                "message id {} leaves no room for the answer",
                reply.message.id
            ))),
        });

        match result {
            Ok((reply, answer_id)) => {
                let message_id = MessageId::Server(reply.message.id);
                let reply_id = MessageId::Server(answer_id);
                let confirmed = Message {
                    id: message_id.clone(),
                    role: Role::User,
                    content: pending.content,
                    timestamp: reply.message.timestamp,
                };
                let answer = Message {
                    id: reply_id.clone(),
                    role: Role::Assistant,
                    content: reply.answer,
                    timestamp: Utc::now(),
                };
                timeline.replace_optimistic(&pending.optimistic_id, confirmed, answer);
                SendOutcome::Confirmed {
                    message_id,
                    reply_id,
                }
            }
            Err(e) => {
                warn!(
                    conversation_id = pending.conversation_id,
                    error = %e,
                    "direct request failed"
                );
                let error_id = MessageId::error(&self.clock);
                timeline.push(Message {
                    id: error_id.clone(),
                    role: Role::Assistant,
                    content: SEND_FAILURE_TEXT.to_string(),
                    timestamp: Utc::now(),
                });
                SendOutcome::Failed {
                    optimistic_id: pending.optimistic_id,
                    error_id,
                }
            }
        }
    }

    /// Forget any in-flight send (conversation switched away).
    pub fn reset(&mut self) {
        self.in_flight = None;
    }
}
