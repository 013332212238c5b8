//! # chat_sync
//!
//! Realtime message synchronization for the rag-chat client.
//!
//! A conversation's messages arrive over two transports: a per-conversation
//! websocket that pushes assistant replies and typing status, and a plain
//! HTTP request/response path used whenever the websocket is unavailable.
//! This crate keeps both in step and exposes one ordered, deduplicated
//! timeline.
//!
//! ## Layout
//!
//! - [`protocol`]: realtime frames and the inbound event decoder
//! - [`channel`]: connection lifecycle, fixed-delay reconnect, send/close
//! - [`timeline`]: reconciliation (`merge`, optimistic replacement)
//! - [`send`]: realtime-or-fallback dispatch with optimistic display
//! - [`api`]: backend REST client
//! - [`session`]: the event loop that owns all of the above for the UI
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use chat_sync::api::HttpApi;
//! use chat_sync::channel::{ChannelConfig, ChannelManager};
//! use chat_sync::session::ChatSession;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let api = HttpApi::new("http://localhost:8000/api", Duration::from_secs(60))?;
//! let channels = ChannelManager::new(api.ws_base_url(), ChannelConfig::default());
//! let session = ChatSession::spawn(Arc::new(api), Some(channels));
//!
//! session.select(Some(1)).await?;
//! session.submit("What does the contract say about renewals?").await?;
//!
//! let mut updates = session.subscribe();
//! updates.changed().await?;
//! for message in &updates.borrow().messages {
//!     println!("{:?}: {}", message.role, message.content);
//! }
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod channel;
pub mod error;
pub mod models;
pub mod protocol;
pub mod send;
pub mod session;
pub mod timeline;

pub use error::{ApiError, DecodeError, SessionError};
pub use models::{ChatReply, Conversation, ConversationId, Document, Message, MessageId, Role};
pub use session::{ChatSession, SessionHandle, SessionSnapshot};
pub use timeline::{Timeline, merge};
