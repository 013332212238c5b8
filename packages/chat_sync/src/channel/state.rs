//! Connection state machine for one realtime channel.
//!
//! ```text
//!            connecting()            opened()
//! Disconnected ─────────► Connecting ────────► Connected
//!      ▲                     │                     │
//!      │ retry_due()         │ closed(code≠1000)   │ closed(code≠1000)
//!      │                     ▼                     ▼
//!      └──────────────── RetryScheduled ◄──────────┘
//!
//! close_requested() or closed(1000) from any state ─► Stopped
//! ```
//!
//! Retries use a fixed delay with no cap and no jitter.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Close code reserved for intentional shutdown.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code used when the connection ended without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// What the rest of the system is allowed to observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionStatus {
    pub fn is_connected(self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Connected,
    RetryScheduled,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDisposition {
    Reconnect { after: Duration },
    Stop,
}

#[derive(Debug, Clone)]
pub struct ConnectionMachine {
    phase: Phase,
    retry_count: u32,
    retry_delay: Duration,
}

impl ConnectionMachine {
    pub fn new(retry_delay: Duration) -> Self {
        Self {
            phase: Phase::Idle,
            retry_count: 0,
            retry_delay,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self.phase {
            Phase::Connecting => ConnectionStatus::Connecting,
            Phase::Connected => ConnectionStatus::Connected,
            Phase::Idle | Phase::RetryScheduled | Phase::Stopped => {
                ConnectionStatus::Disconnected
            }
        }
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn is_stopped(&self) -> bool {
        self.phase == Phase::Stopped
    }

    pub fn is_retry_scheduled(&self) -> bool {
        self.phase == Phase::RetryScheduled
    }

    /// A connection attempt is starting. Returns false once stopped.
    pub fn connecting(&mut self) -> bool {
        if self.phase == Phase::Stopped {
            return false;
        }
        self.phase = Phase::Connecting;
        true
    }

    pub fn opened(&mut self) {
        if self.phase != Phase::Stopped {
            self.phase = Phase::Connected;
            self.retry_count = 0;
        }
    }

    /// Transport error. The connection is unusable until the close that
    /// follows decides whether to retry.
    pub fn errored(&mut self) {
        if matches!(self.phase, Phase::Connected | Phase::Connecting) {
            self.phase = Phase::Idle;
        }
    }

    /// The connection closed (or never opened) with `code`.
    pub fn closed(&mut self, code: u16) -> CloseDisposition {
        if self.phase == Phase::Stopped || code == NORMAL_CLOSURE {
            self.phase = Phase::Stopped;
            return CloseDisposition::Stop;
        }
        if self.phase == Phase::RetryScheduled {
            // one retry per close
            return CloseDisposition::Stop;
        }
        self.phase = Phase::RetryScheduled;
        self.retry_count += 1;
        CloseDisposition::Reconnect {
            after: self.retry_delay,
        }
    }

    /// The owner asked for an intentional shutdown; cancels any pending retry.
    pub fn close_requested(&mut self) {
        self.phase = Phase::Stopped;
    }

    /// The retry timer fired. Returns whether a new attempt should start.
    pub fn retry_due(&mut self) -> bool {
        if self.phase != Phase::RetryScheduled {
            return false;
        }
        self.phase = Phase::Idle;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DELAY: Duration = Duration::from_secs(3);

    fn connected() -> ConnectionMachine {
        let mut machine = ConnectionMachine::new(DELAY);
        assert!(machine.connecting());
        machine.opened();
        machine
    }

    #[test]
    fn open_transitions_to_connected() {
        let mut machine = ConnectionMachine::new(DELAY);
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        machine.connecting();
        assert_eq!(machine.status(), ConnectionStatus::Connecting);
        machine.opened();
        assert_eq!(machine.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn intentional_close_then_normal_closure_does_not_reconnect() {
        let mut machine = connected();
        machine.close_requested();
        assert_eq!(machine.closed(NORMAL_CLOSURE), CloseDisposition::Stop);
        assert!(!machine.retry_due());
        assert!(!machine.connecting());
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
    }

    #[test]
    fn server_normal_closure_does_not_reconnect() {
        let mut machine = connected();
        assert_eq!(machine.closed(NORMAL_CLOSURE), CloseDisposition::Stop);
        assert!(machine.is_stopped());
    }

    #[test]
    fn abnormal_close_schedules_exactly_one_retry() {
        let mut machine = connected();
        assert_eq!(
            machine.closed(ABNORMAL_CLOSURE),
            CloseDisposition::Reconnect { after: DELAY }
        );
        assert_eq!(machine.status(), ConnectionStatus::Disconnected);
        assert_eq!(machine.retry_count(), 1);
        // a duplicate close notification must not stack another retry
        assert_eq!(machine.closed(4000), CloseDisposition::Stop);
        assert!(machine.is_retry_scheduled());
        assert!(machine.retry_due());
        assert!(!machine.retry_due());
    }

    #[test]
    fn any_non_normal_code_reconnects() {
        for code in [1001, 1006, 1011, 4000] {
            let mut machine = connected();
            assert!(matches!(
                machine.closed(code),
                CloseDisposition::Reconnect { .. }
            ));
        }
    }

    #[test]
    fn close_during_scheduled_retry_cancels_it() {
        let mut machine = connected();
        machine.closed(ABNORMAL_CLOSURE);
        machine.close_requested();
        assert!(!machine.retry_due());
        assert!(!machine.connecting());
    }

    #[test]
    fn failed_connect_attempts_keep_retrying_and_counting() {
        let mut machine = ConnectionMachine::new(DELAY);
        for attempt in 1..=5 {
            assert!(machine.connecting());
            machine.errored();
            assert!(matches!(
                machine.closed(ABNORMAL_CLOSURE),
                CloseDisposition::Reconnect { .. }
            ));
            assert_eq!(machine.retry_count(), attempt);
            assert!(machine.retry_due());
        }
        machine.connecting();
        machine.opened();
        assert_eq!(machine.retry_count(), 0);
    }
}
