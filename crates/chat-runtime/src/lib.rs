//! Runtime that owns a [`MessageStore`] on a single task.
//!
//! Send completions and inbound deliveries are independent async sources.
//! Both are marshalled onto the runtime task as commands so the store's
//! scan-then-mutate merge never runs concurrently.

use std::sync::Arc;

use chat_core::{
    ChatChannelError, ChatChannels, ComposeError, ComposedMessage, CurrentUser, IdempotencyKey,
    MessageStore, ProjectionStream, SendOutcome, ServerMessage, StoreCommand, StoreSnapshot,
    ViewProjector, apply_send_outcome,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

pub mod delivery;
pub mod loopback;

pub use delivery::DeliveryChannel;
pub use loopback::{EchoOrder, LoopbackDelivery};

const DEFAULT_COMMAND_BUFFER: usize = 128;
const DEFAULT_UPDATE_BUFFER: usize = 512;

/// Channel sizing for a runtime instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Capacity of the command queue feeding the store task.
    pub command_buffer: usize,
    /// Capacity of the projection broadcast buffer per subscriber.
    pub update_buffer: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            command_buffer: DEFAULT_COMMAND_BUFFER,
            update_buffer: DEFAULT_UPDATE_BUFFER,
        }
    }
}

/// Errors returned by [`ChatRuntimeHandle`] operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error(transparent)]
    Channel(#[from] ChatChannelError),
}

/// Client handle for a spawned runtime.
///
/// The runtime task exits once every handle is dropped and no send is in flight.
#[derive(Debug, Clone)]
pub struct ChatRuntimeHandle {
    channels: ChatChannels,
}

impl ChatRuntimeHandle {
    /// Compose `text`, record it as pending, and start delivering it.
    ///
    /// Returns the idempotency key generated for the message.
    pub async fn compose(&self, text: impl Into<String>) -> Result<IdempotencyKey, RuntimeError> {
        let message = ComposedMessage::compose(text)?;
        let key = message.key().clone();
        self.channels
            .send_command(StoreCommand::Compose { message })
            .await?;
        Ok(key)
    }

    /// Resend the message at `index` if that row is a failed local send.
    pub async fn retry_at(&self, index: usize) -> Result<(), RuntimeError> {
        self.channels
            .send_command(StoreCommand::RetryAt { index })
            .await?;
        Ok(())
    }

    /// Feed a message delivered by the transport.
    pub async fn deliver(&self, message: ServerMessage) -> Result<(), RuntimeError> {
        self.channels
            .send_command(StoreCommand::Incoming(message))
            .await?;
        Ok(())
    }

    /// Current store contents.
    pub async fn snapshot(&self) -> Result<StoreSnapshot, RuntimeError> {
        Ok(self.channels.request_snapshot().await?)
    }

    /// Subscribe to projection updates emitted after every store change.
    pub fn subscribe(&self) -> ProjectionStream {
        self.channels.subscribe()
    }
}

/// Spawn the store task on the current tokio runtime.
///
/// `inbound` carries every message the transport delivers for the room,
/// including echoes of messages sent through `delivery`.
pub fn spawn_runtime<D: DeliveryChannel>(
    current_user: CurrentUser,
    delivery: Arc<D>,
    inbound: mpsc::Receiver<ServerMessage>,
    config: RuntimeConfig,
) -> ChatRuntimeHandle {
    let (channels, command_rx) = ChatChannels::new(config.command_buffer, config.update_buffer);
    let mut store = MessageStore::new(current_user);
    store.set_listener(ViewProjector::new(channels.update_sender()));

    let runtime = ChatRuntime {
        command_tx: channels.command_sender().downgrade(),
        command_rx,
        inbound_rx: Some(inbound),
        store,
        delivery,
    };
    tokio::spawn(async move {
        runtime.run().await;
    });

    ChatRuntimeHandle { channels }
}

struct ChatRuntime<D> {
    command_tx: mpsc::WeakSender<StoreCommand>,
    command_rx: mpsc::Receiver<StoreCommand>,
    inbound_rx: Option<mpsc::Receiver<ServerMessage>>,
    store: MessageStore,
    delivery: Arc<D>,
}

impl<D: DeliveryChannel> ChatRuntime<D> {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                message = next_inbound(&mut self.inbound_rx) => match message {
                    Some(message) => self.handle_incoming(message),
                    None => {
                        debug!("inbound delivery stream closed");
                        self.inbound_rx = None;
                    }
                },
            }
        }
        debug!(entry_count = self.store.len(), "chat runtime stopped");
    }

    fn handle_command(&mut self, command: StoreCommand) {
        match command {
            StoreCommand::Compose { message } => {
                debug!(key = %message.key(), "queueing composed message");
                self.store.add_local_pending(message.clone());
                self.dispatch_send(message);
            }
            StoreCommand::RetryAt { index } => {
                let Some(message) = self.store.failed_message_at(index).cloned() else {
                    debug!(index, "ignoring retry for row that is not a failed local message");
                    return;
                };
                debug!(index, key = %message.key(), "retrying failed message");
                self.store.add_local_pending(message.clone());
                self.dispatch_send(message);
            }
            StoreCommand::SendResolved { message, outcome } => {
                apply_send_outcome(&mut self.store, message, outcome);
            }
            StoreCommand::Incoming(message) => self.handle_incoming(message),
            StoreCommand::Snapshot { reply } => {
                let _ = reply.send(self.store.snapshot());
            }
        }
    }

    fn handle_incoming(&mut self, message: ServerMessage) {
        trace!(
            message_id = message.id,
            sender = %message.sender.id,
            keyed = message.idempotency_key().is_some(),
            "received server message"
        );
        self.store.add_from_server(message);
    }

    fn dispatch_send(&self, message: ComposedMessage) {
        let Some(command_tx) = self.command_tx.upgrade() else {
            return;
        };
        let delivery = Arc::clone(&self.delivery);
        tokio::spawn(async move {
            let outcome = SendOutcome::from(delivery.send(&message).await);
            if command_tx
                .send(StoreCommand::SendResolved { message, outcome })
                .await
                .is_err()
            {
                warn!("runtime stopped before send outcome could be recorded");
            }
        });
    }
}

async fn next_inbound(
    inbound: &mut Option<mpsc::Receiver<ServerMessage>>,
) -> Option<ServerMessage> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chat_core::{
        ChangeKind, IDEMPOTENCY_KEY_PART_TYPE, MessageEntry, MessagePart, ProjectionUpdate,
        SenderIdentity, TEXT_PART_TYPE, ViewCategory,
    };
    use tokio::time::{sleep, timeout};

    use super::*;

    fn alice() -> CurrentUser {
        CurrentUser::new("alice", Some("Alice".to_owned()), None)
    }

    fn spawn_loopback(echo: EchoOrder) -> (ChatRuntimeHandle, Arc<LoopbackDelivery>) {
        let (delivery, inbound) =
            LoopbackDelivery::new(SenderIdentity::from(&alice()), echo, 16);
        let delivery = Arc::new(delivery);
        let handle = spawn_runtime(
            alice(),
            Arc::clone(&delivery),
            inbound,
            RuntimeConfig::default(),
        );
        (handle, delivery)
    }

    async fn next_update(updates: &mut ProjectionStream) -> ProjectionUpdate {
        timeout(Duration::from_secs(2), updates.recv())
            .await
            .expect("update timeout")
            .expect("update receive")
    }

    async fn wait_for_server_copy(handle: &ChatRuntimeHandle, index: usize) -> StoreSnapshot {
        for _ in 0..200 {
            let snapshot = handle.snapshot().await.expect("snapshot");
            if snapshot
                .entries
                .get(index)
                .is_some_and(MessageEntry::is_from_server)
            {
                return snapshot;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("server copy never arrived at index {index}");
    }

    #[tokio::test]
    async fn compose_goes_pending_then_from_me() {
        let (handle, _delivery) = spawn_loopback(EchoOrder::Never);
        let mut updates = handle.subscribe();

        handle.compose("hi").await.expect("compose should enqueue");

        let pending = next_update(&mut updates).await;
        assert_eq!(pending.change, ChangeKind::Added(0));
        assert_eq!(pending.items[0].category, ViewCategory::Pending);

        let sent = next_update(&mut updates).await;
        assert_eq!(sent.change, ChangeKind::Updated(0));
        assert_eq!(sent.items[0].category, ViewCategory::FromMe);
        assert_eq!(sent.items[0].sender_name, "Alice");
    }

    #[tokio::test]
    async fn failed_send_can_be_retried_in_place() {
        let (handle, delivery) = spawn_loopback(EchoOrder::Never);
        delivery.fail_next(1);
        let mut updates = handle.subscribe();

        handle.compose("hi").await.expect("compose should enqueue");
        assert_eq!(next_update(&mut updates).await.change, ChangeKind::Added(0));
        let failed = next_update(&mut updates).await;
        assert_eq!(failed.change, ChangeKind::Updated(0));
        assert_eq!(failed.items[0].category, ViewCategory::Failed);

        handle.retry_at(0).await.expect("retry should enqueue");
        let retried = next_update(&mut updates).await;
        assert_eq!(retried.change, ChangeKind::Updated(0));
        assert_eq!(retried.items[0].category, ViewCategory::Pending);

        let sent = next_update(&mut updates).await;
        assert_eq!(sent.change, ChangeKind::Updated(0));
        assert_eq!(sent.items.len(), 1);
        assert_eq!(sent.items[0].category, ViewCategory::FromMe);
    }

    #[tokio::test]
    async fn retry_on_non_failed_row_is_ignored() {
        let (handle, _delivery) = spawn_loopback(EchoOrder::Never);
        handle
            .deliver(ServerMessage::new(
                1,
                SenderIdentity::new("bob", None, None),
                vec![MessagePart::inline(TEXT_PART_TYPE, "yo")],
            ))
            .await
            .expect("deliver should enqueue");

        handle.retry_at(0).await.expect("retry should enqueue");
        handle.retry_at(42).await.expect("retry should enqueue");

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert_eq!(snapshot.entries.len(), 1);
        assert!(snapshot.entries[0].is_from_server());
    }

    #[tokio::test]
    async fn echo_before_ack_settles_on_server_copy() {
        let (handle, _delivery) = spawn_loopback(EchoOrder::BeforeAck);
        let key = handle.compose("hi").await.expect("compose should enqueue");

        let snapshot = wait_for_server_copy(&handle, 0).await;
        assert_eq!(snapshot.entries.len(), 1);
        assert_eq!(
            snapshot.entries[0].idempotency_key(),
            Some(key.as_str())
        );
        assert_eq!(
            chat_core::project(&snapshot)[0].category,
            ViewCategory::FromMe
        );
    }

    #[tokio::test]
    async fn echo_after_ack_settles_on_server_copy() {
        let (handle, _delivery) = spawn_loopback(EchoOrder::AfterAck);
        handle.compose("one").await.expect("compose should enqueue");
        handle.compose("two").await.expect("compose should enqueue");

        wait_for_server_copy(&handle, 0).await;
        let snapshot = wait_for_server_copy(&handle, 1).await;
        assert_eq!(snapshot.entries.len(), 2);
        let rows = chat_core::project(&snapshot);
        assert_eq!(rows[0].text, "one");
        assert_eq!(rows[1].text, "two");
    }

    #[tokio::test]
    async fn inbound_messages_from_others_are_appended() {
        let (handle, delivery) = spawn_loopback(EchoOrder::Never);
        let mut updates = handle.subscribe();
        let bob = SenderIdentity::new("bob", Some("Bob".to_owned()), None);

        for text in ["yo", "yo2"] {
            delivery
                .inbound_sender()
                .send(ServerMessage::new(
                    delivery.next_message_id(),
                    bob.clone(),
                    vec![MessagePart::inline(TEXT_PART_TYPE, text)],
                ))
                .await
                .expect("inbound send");
        }

        assert_eq!(next_update(&mut updates).await.change, ChangeKind::Added(0));
        let second = next_update(&mut updates).await;
        assert_eq!(second.change, ChangeKind::Added(1));
        assert!(
            second
                .items
                .iter()
                .all(|row| row.category == ViewCategory::FromOther)
        );
    }

    #[tokio::test]
    async fn late_echo_replaces_failed_row() {
        let (handle, delivery) = spawn_loopback(EchoOrder::Never);
        delivery.fail_next(1);
        let mut updates = handle.subscribe();

        let key = handle.compose("hi").await.expect("compose should enqueue");
        next_update(&mut updates).await;
        assert_eq!(
            next_update(&mut updates).await.items[0].category,
            ViewCategory::Failed
        );

        handle
            .deliver(ServerMessage::new(
                9,
                SenderIdentity::from(&alice()),
                vec![
                    MessagePart::inline(TEXT_PART_TYPE, "hi"),
                    MessagePart::inline(IDEMPOTENCY_KEY_PART_TYPE, key.as_str()),
                ],
            ))
            .await
            .expect("deliver should enqueue");

        let echoed = next_update(&mut updates).await;
        assert_eq!(echoed.change, ChangeKind::Updated(0));
        assert_eq!(echoed.items[0].category, ViewCategory::FromMe);
    }

    #[tokio::test]
    async fn compose_rejects_empty_text() {
        let (handle, _delivery) = spawn_loopback(EchoOrder::Never);
        let err = handle
            .compose("  ")
            .await
            .expect_err("blank compose should fail");
        assert_eq!(err, RuntimeError::Compose(ComposeError::EmptyText));

        let snapshot = handle.snapshot().await.expect("snapshot");
        assert!(snapshot.entries.is_empty());
    }
}
