//! In-memory delivery channel that echoes sends back as server messages.

use std::{
    fmt,
    str::FromStr,
    sync::atomic::{AtomicU32, AtomicU64, Ordering},
};

use chat_core::{
    ComposedMessage, DeliveryError, DeliveryErrorCategory, SenderIdentity, ServerMessage,
};
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::delivery::DeliveryChannel;

/// When the loopback echo is enqueued relative to the send result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EchoOrder {
    /// The echo is queued before `send` resolves.
    BeforeAck,
    /// The echo is queued from a separate task after `send` resolves.
    AfterAck,
    /// Sends are never echoed.
    Never,
}

impl FromStr for EchoOrder {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "before-ack" => Ok(Self::BeforeAck),
            "after-ack" => Ok(Self::AfterAck),
            "never" => Ok(Self::Never),
            other => Err(format!(
                "unknown echo order '{other}', expected before-ack, after-ack or never"
            )),
        }
    }
}

impl fmt::Display for EchoOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::BeforeAck => "before-ack",
            Self::AfterAck => "after-ack",
            Self::Never => "never",
        })
    }
}

/// Loopback transport for tests and local smoke runs.
#[derive(Debug)]
pub struct LoopbackDelivery {
    sender: SenderIdentity,
    echo: EchoOrder,
    inbound_tx: mpsc::Sender<ServerMessage>,
    next_message_id: AtomicU64,
    failures_remaining: AtomicU32,
}

impl LoopbackDelivery {
    /// Create a loopback channel whose echoes appear to come from `sender`.
    ///
    /// Returns the inbound receiver to hand to the runtime.
    pub fn new(
        sender: SenderIdentity,
        echo: EchoOrder,
        inbound_buffer: usize,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (inbound_tx, inbound_rx) = mpsc::channel(inbound_buffer.max(1));
        (
            Self {
                sender,
                echo,
                inbound_tx,
                next_message_id: AtomicU64::new(1),
                failures_remaining: AtomicU32::new(0),
            },
            inbound_rx,
        )
    }

    /// Make the next `count` sends fail with a network error.
    pub fn fail_next(&self, count: u32) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Sender for injecting messages from other participants.
    pub fn inbound_sender(&self) -> mpsc::Sender<ServerMessage> {
        self.inbound_tx.clone()
    }

    /// Allocate the next server message ID.
    pub fn next_message_id(&self) -> u64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

impl DeliveryChannel for LoopbackDelivery {
    async fn send(&self, message: &ComposedMessage) -> Result<(), DeliveryError> {
        if self.take_failure() {
            debug!(key = %message.key(), "loopback injected send failure");
            return Err(DeliveryError::new(
                DeliveryErrorCategory::Network,
                "loopback_send_failed",
                "injected loopback failure",
            ));
        }

        let echo = ServerMessage::new(
            self.next_message_id(),
            self.sender.clone(),
            message.parts(),
        );
        trace!(key = %message.key(), echo = %self.echo, "loopback accepted message");

        match self.echo {
            EchoOrder::BeforeAck => {
                self.inbound_tx.send(echo).await.map_err(|_| {
                    DeliveryError::new(
                        DeliveryErrorCategory::Internal,
                        "loopback_inbound_closed",
                        "inbound receiver dropped",
                    )
                })?;
            }
            EchoOrder::AfterAck => {
                let inbound_tx = self.inbound_tx.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    let _ = inbound_tx.send(echo).await;
                });
            }
            EchoOrder::Never => {}
        }
        Ok(())
    }
}
