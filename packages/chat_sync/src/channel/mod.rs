//! Realtime channel: one websocket per active conversation.
//!
//! - `state`: pure connection state machine (reconnect policy lives here)
//! - `manager`: async driver and the [`ChannelHandle`] owners talk to

mod manager;
pub mod state;

use std::time::Duration;

pub use manager::{ChannelHandle, ChannelManager, ChannelUpdate, RealtimeSink};
pub use state::{ABNORMAL_CLOSURE, ConnectionStatus, NORMAL_CLOSURE};

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Fixed delay before a reconnect attempt.
    pub reconnect_delay: Duration,
    /// Outbound frames that may be queued while the socket is busy.
    pub send_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(3),
            send_buffer: 64,
        }
    }
}
