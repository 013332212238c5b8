use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, warn};

use super::ChannelConfig;
use super::state::{
    ABNORMAL_CLOSURE, CloseDisposition, ConnectionMachine, ConnectionStatus, NORMAL_CLOSURE,
};
use crate::models::ConversationId;
use crate::protocol::{ChannelEvent, EventDecoder, OutboundFrame};

/// Close code reported when the peer sent a close frame without a status.
const NO_STATUS_RECEIVED: u16 = 1005;
const UPDATE_BUFFER: usize = 256;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Something a message can be dispatched through without waiting.
pub trait RealtimeSink {
    fn is_connected(&self) -> bool;

    /// Returns whether the frame was dispatched.
    fn send(&self, frame: OutboundFrame) -> bool;
}

/// Notifications from a channel to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelUpdate {
    Status(ConnectionStatus),
    Event(ChannelEvent),
}

/// Opens realtime channels keyed by conversation.
#[derive(Debug, Clone)]
pub struct ChannelManager {
    ws_base: String,
    config: ChannelConfig,
}

impl ChannelManager {
    /// `ws_base` is the websocket origin, e.g. `ws://localhost:8000`.
    pub fn new(ws_base: impl Into<String>, config: ChannelConfig) -> Self {
        Self {
            ws_base: ws_base.into().trim_end_matches('/').to_string(),
            config,
        }
    }

    pub fn url_for(&self, conversation_id: ConversationId) -> String {
        format!("{}/ws/{}", self.ws_base, conversation_id)
    }

    /// Start connecting to the conversation's channel. Must be called from
    /// within a tokio runtime.
    pub fn open(&self, conversation_id: ConversationId) -> ChannelHandle {
        let url = self.url_for(conversation_id);
        let (outbound_tx, outbound_rx) = mpsc::channel(self.config.send_buffer.max(1));
        let (updates_tx, updates_rx) = mpsc::channel(UPDATE_BUFFER);
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let cancel = CancellationToken::new();

        let driver = Driver {
            url,
            machine: ConnectionMachine::new(self.config.reconnect_delay),
            decoder: EventDecoder::new(),
            status_tx,
            updates_tx,
            outbound_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(
            driver
                .run(conversation_id)
                .instrument(tracing::info_span!("realtime", conversation_id)),
        );

        ChannelHandle {
            conversation_id,
            outbound_tx,
            updates_rx,
            status_rx,
            cancel,
            task: Some(task),
        }
    }
}

/// Owned handle to one conversation's realtime connection.
///
/// Dropping the handle closes the connection with the normal closure code.
pub struct ChannelHandle {
    conversation_id: ConversationId,
    outbound_tx: mpsc::Sender<OutboundFrame>,
    updates_rx: mpsc::Receiver<ChannelUpdate>,
    status_rx: watch::Receiver<ConnectionStatus>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ChannelHandle {
    pub fn conversation_id(&self) -> ConversationId {
        self.conversation_id
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Next status change or decoded event. `None` once the channel has
    /// stopped and every pending update was drained.
    pub async fn recv(&mut self) -> Option<ChannelUpdate> {
        self.updates_rx.recv().await
    }

    /// Intentional shutdown: sends close code 1000 and never reconnects.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Close and wait for the connection task to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
                warn!(
                    conversation_id = self.conversation_id,
                    "realtime channel did not shut down in time"
                );
            }
        }
    }
}

impl RealtimeSink for ChannelHandle {
    fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    fn send(&self, frame: OutboundFrame) -> bool {
        if !self.is_connected() {
            return false;
        }
        match self.outbound_tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(
                    conversation_id = self.conversation_id,
                    "realtime send buffer full"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    url: String,
    machine: ConnectionMachine,
    decoder: EventDecoder,
    status_tx: watch::Sender<ConnectionStatus>,
    updates_tx: mpsc::Sender<ChannelUpdate>,
    outbound_rx: mpsc::Receiver<OutboundFrame>,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(mut self, conversation_id: ConversationId) {
        while self.machine.connecting() {
            self.publish().await;

            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => {
                    self.machine.close_requested();
                    break;
                }
                attempt = tokio_tungstenite::connect_async(self.url.as_str()) => attempt,
            };

            let code = match attempt {
                Ok((stream, _)) => {
                    self.machine.opened();
                    info!(conversation_id, url = %self.url, "realtime channel connected");
                    self.publish().await;
                    self.pump(stream).await
                }
                Err(e) => {
                    warn!(
                        conversation_id,
                        error = %e,
                        retry = self.machine.retry_count(),
                        "realtime connect failed"
                    );
                    self.machine.errored();
                    ABNORMAL_CLOSURE
                }
            };

            if self.cancel.is_cancelled() {
                self.machine.close_requested();
            }
            let disposition = self.machine.closed(code);
            info!(conversation_id, code, "realtime channel disconnected");
            self.publish().await;
            self.discard_queued(conversation_id);

            match disposition {
                CloseDisposition::Stop => break,
                CloseDisposition::Reconnect { after } => {
                    debug!(
                        conversation_id,
                        delay_ms = after.as_millis() as u64,
                        retry = self.machine.retry_count(),
                        "scheduling reconnect"
                    );
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.machine.close_requested();
                            break;
                        }
                        _ = tokio::time::sleep(after) => {}
                    }
                    if !self.machine.retry_due() {
                        break;
                    }
                }
            }
        }

        self.publish().await;
        debug!(conversation_id, "realtime channel stopped");
    }

    async fn publish(&self) {
        let status = self.machine.status();
        let changed = self.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            let _ = self.updates_tx.send(ChannelUpdate::Status(status)).await;
        }
    }

    /// Frames queued for a connection that is gone are not replayed.
    fn discard_queued(&mut self, conversation_id: ConversationId) {
        let mut dropped = 0usize;
        while self.outbound_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(conversation_id, dropped, "discarded unsent realtime frames");
        }
    }

    /// Run one open connection until it closes. Returns the close code.
    async fn pump(&mut self, stream: WsStream) -> u16 {
        let (mut write, mut read) = stream.split();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "User initiated disconnect".into(),
                    };
                    if let Err(e) = write.send(tungstenite::Message::Close(Some(frame))).await {
                        debug!(error = %e, "close frame not delivered");
                    }
                    return NORMAL_CLOSURE;
                }

                Some(frame) = self.outbound_rx.recv() => {
                    let json = match serde_json::to_string(&frame) {
                        Ok(json) => json,
                        Err(e) => {
                            error!(error = %e, "failed to serialize realtime frame");
                            continue;
                        }
                    };
                    if let Err(e) = write.send(tungstenite::Message::Text(json.into())).await {
                        warn!(error = %e, "realtime write failed");
                        return ABNORMAL_CLOSURE;
                    }
                }

                msg = read.next() => match msg {
                    Some(Ok(tungstenite::Message::Text(text))) => {
                        if let Some(event) = self.decoder.decode(&text) {
                            let _ = self.updates_tx.send(ChannelUpdate::Event(event)).await;
                        }
                    }
                    Some(Ok(tungstenite::Message::Close(frame))) => {
                        let code = frame.map(|f| u16::from(f.code)).unwrap_or(NO_STATUS_RECEIVED);
                        debug!(code, "server closed realtime channel");
                        return code;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "realtime read failed");
                        return ABNORMAL_CLOSURE;
                    }
                    None => return ABNORMAL_CLOSURE,
                },
            }
        }
    }
}
