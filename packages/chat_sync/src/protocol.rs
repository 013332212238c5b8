//! Realtime channel frames.
//!
//! Inbound frames carry a `type` discriminator. Only `typing` and `message`
//! are understood; any other type decodes to [`InboundFrame::Unknown`] so new
//! server events never break an older client. Outbound chat frames have no
//! discriminator, only `message` (plus an optional correlation token).

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::DecodeError;
use crate::models::{LocalClock, Message, MessageId, Role};

/// Frames sent FROM the client over the realtime channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    Chat {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    Typing {
        #[serde(rename = "type")]
        kind: TypingTag,
        status: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypingTag {
    Typing,
}

impl OutboundFrame {
    pub fn chat(message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::Chat {
            message: message.into(),
            request_id,
        }
    }

    pub fn typing(status: bool) -> Self {
        Self::Typing {
            kind: TypingTag::Typing,
            status,
        }
    }
}

/// Frames received FROM the server, before identifiers are assigned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundFrame {
    Typing { status: bool },
    Message { content: String, reply_to: Option<String> },
    Unknown(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: Option<String>,
}

#[derive(Deserialize)]
struct TypingBody {
    status: bool,
}

#[derive(Deserialize)]
struct MessageBody {
    content: String,
    #[serde(default)]
    reply_to: Option<String>,
}

/// Parse and classify one inbound text frame.
pub fn parse_frame(text: &str) -> Result<InboundFrame, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let envelope: Envelope = serde_json::from_value(value.clone())?;
    let kind = envelope.kind.ok_or(DecodeError::MissingType)?;

    match kind.as_str() {
        "typing" => {
            let body: TypingBody = serde_json::from_value(value)
                .map_err(|source| DecodeError::Malformed {
                    kind: "typing",
                    source,
                })?;
            Ok(InboundFrame::Typing {
                status: body.status,
            })
        }
        "message" => {
            let body: MessageBody = serde_json::from_value(value)
                .map_err(|source| DecodeError::Malformed {
                    kind: "message",
                    source,
                })?;
            Ok(InboundFrame::Message {
                content: body.content,
                reply_to: body.reply_to,
            })
        }
        _ => Ok(InboundFrame::Unknown(kind)),
    }
}

/// Typed events handed to the rest of the core by the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Typing(bool),
    Message(Message),
}

/// Turns raw frames into [`ChannelEvent`]s, assigning receipt-time
/// identifiers and timestamps to assistant messages.
#[derive(Debug, Default)]
pub struct EventDecoder {
    clock: LocalClock,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a frame. Malformed and unknown frames are logged and dropped.
    pub fn decode(&self, text: &str) -> Option<ChannelEvent> {
        match parse_frame(text) {
            Ok(InboundFrame::Typing { status }) => Some(ChannelEvent::Typing(status)),
            Ok(InboundFrame::Message { content, reply_to }) => {
                let id = match reply_to.as_deref() {
                    Some(token) => MessageId::reply_to(token),
                    None => MessageId::realtime(&self.clock),
                };
                Some(ChannelEvent::Message(Message {
                    id,
                    role: Role::Assistant,
                    content,
                    timestamp: Utc::now(),
                }))
            }
            Ok(InboundFrame::Unknown(kind)) => {
                debug!(kind = %kind, "ignoring unknown realtime event type");
                None
            }
            Err(e) => {
                warn!(error = %e, "dropping malformed realtime frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_frame_shape() {
        let json = serde_json::to_value(OutboundFrame::chat("hi", None)).unwrap();
        assert_eq!(json, serde_json::json!({"message": "hi"}));

        let json =
            serde_json::to_value(OutboundFrame::chat("hi", Some("abc".into()))).unwrap();
        assert_eq!(json, serde_json::json!({"message": "hi", "request_id": "abc"}));
    }

    #[test]
    fn typing_frame_shape() {
        let json = serde_json::to_value(OutboundFrame::typing(true)).unwrap();
        assert_eq!(json, serde_json::json!({"type": "typing", "status": true}));
    }

    #[test]
    fn parses_typing() {
        let frame = parse_frame(r#"{"type":"typing","status":false}"#).unwrap();
        assert_eq!(frame, InboundFrame::Typing { status: false });
    }

    #[test]
    fn parses_message_with_and_without_token() {
        let frame = parse_frame(r#"{"type":"message","content":"Hi"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Message {
                content: "Hi".into(),
                reply_to: None
            }
        );

        let frame =
            parse_frame(r#"{"type":"message","content":"Hi","reply_to":"t-1"}"#).unwrap();
        assert_eq!(
            frame,
            InboundFrame::Message {
                content: "Hi".into(),
                reply_to: Some("t-1".into())
            }
        );
    }

    #[test]
    fn unknown_type_is_classified_not_rejected() {
        let frame = parse_frame(r#"{"type":"sources","items":[]}"#).unwrap();
        assert_eq!(frame, InboundFrame::Unknown("sources".into()));
    }

    #[test]
    fn rejects_malformed_frames() {
        assert!(matches!(parse_frame("not json"), Err(DecodeError::Json(_))));
        assert!(matches!(
            parse_frame(r#"{"content":"x"}"#),
            Err(DecodeError::MissingType)
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"typing"}"#),
            Err(DecodeError::Malformed { kind: "typing", .. })
        ));
        assert!(matches!(
            parse_frame(r#"{"type":"message","content":7}"#),
            Err(DecodeError::Malformed { kind: "message", .. })
        ));
        assert!(parse_frame("[1,2,3]").is_err());
    }

    #[test]
    fn decoder_assigns_assistant_identity() {
        let decoder = EventDecoder::new();
        let Some(ChannelEvent::Message(first)) =
            decoder.decode(r#"{"type":"message","content":"one"}"#)
        else {
            panic!("expected message event");
        };
        let Some(ChannelEvent::Message(second)) =
            decoder.decode(r#"{"type":"message","content":"two"}"#)
        else {
            panic!("expected message event");
        };
        assert_eq!(first.role, Role::Assistant);
        assert_ne!(first.id, second.id);
        assert!(first.timestamp <= second.timestamp);
    }

    #[test]
    fn decoder_uses_reply_token_for_identity() {
        let decoder = EventDecoder::new();
        let frame = r#"{"type":"message","content":"Hi","reply_to":"abc"}"#;
        let Some(ChannelEvent::Message(a)) = decoder.decode(frame) else {
            panic!("expected message event");
        };
        let Some(ChannelEvent::Message(b)) = decoder.decode(frame) else {
            panic!("expected message event");
        };
        assert_eq!(a.id, MessageId::reply_to("abc"));
        assert_eq!(a.id, b.id);
    }

    #[test]
    fn decoder_drops_garbage_and_unknown() {
        let decoder = EventDecoder::new();
        assert_eq!(decoder.decode("{"), None);
        assert_eq!(decoder.decode(r#"{"type":"ping"}"#), None);
        assert_eq!(
            decoder.decode(r#"{"type":"typing","status":true}"#),
            Some(ChannelEvent::Typing(true))
        );
    }
}
