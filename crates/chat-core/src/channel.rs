use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::{
    normalization::SendOutcome,
    projection::{MessageViewItem, PresentationSink, ProjectionUpdate},
    types::{ChangeKind, ComposedMessage, ServerMessage, StoreSnapshot},
};

/// Broadcast stream of projection updates used by renderers.
pub type ProjectionStream = broadcast::Receiver<ProjectionUpdate>;

/// Errors returned by store channel operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChatChannelError {
    /// The command receiver side is closed.
    #[error("command channel is closed")]
    CommandChannelClosed,
    /// The store owner dropped a request without replying.
    #[error("store owner dropped the reply")]
    ReplyDropped,
}

/// Work marshalled onto the task that owns the message store.
#[derive(Debug)]
pub enum StoreCommand {
    /// Record a new message as pending and hand it to the delivery channel.
    Compose { message: ComposedMessage },
    /// Resend the failed local message shown at this row.
    RetryAt { index: usize },
    /// The delivery channel resolved a send.
    SendResolved {
        message: ComposedMessage,
        outcome: SendOutcome,
    },
    /// The delivery channel delivered a message (possibly an echo of ours).
    Incoming(ServerMessage),
    /// Reply with the current store snapshot.
    Snapshot { reply: oneshot::Sender<StoreSnapshot> },
}

/// Command/projection channel pair shared by the store owner and its clients.
#[derive(Clone, Debug)]
pub struct ChatChannels {
    command_tx: mpsc::Sender<StoreCommand>,
    update_tx: broadcast::Sender<ProjectionUpdate>,
}

impl ChatChannels {
    /// Create a new channel set and return it with the command receiver.
    pub fn new(
        command_buffer: usize,
        update_buffer: usize,
    ) -> (Self, mpsc::Receiver<StoreCommand>) {
        let (command_tx, command_rx) = mpsc::channel(command_buffer.max(1));
        let (update_tx, _) = broadcast::channel(update_buffer.max(1));

        (
            Self {
                command_tx,
                update_tx,
            },
            command_rx,
        )
    }

    /// Clone the command sender.
    pub fn command_sender(&self) -> mpsc::Sender<StoreCommand> {
        self.command_tx.clone()
    }

    /// Clone the projection update sender.
    pub fn update_sender(&self) -> broadcast::Sender<ProjectionUpdate> {
        self.update_tx.clone()
    }

    /// Subscribe to projection updates.
    pub fn subscribe(&self) -> ProjectionStream {
        self.update_tx.subscribe()
    }

    /// Send one command to the store owner.
    pub async fn send_command(&self, command: StoreCommand) -> Result<(), ChatChannelError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ChatChannelError::CommandChannelClosed)
    }

    /// Ask the store owner for its current snapshot.
    pub async fn request_snapshot(&self) -> Result<StoreSnapshot, ChatChannelError> {
        let (reply, response) = oneshot::channel();
        self.send_command(StoreCommand::Snapshot { reply }).await?;
        response.await.map_err(|_| ChatChannelError::ReplyDropped)
    }
}

/// Emission is best-effort; lagged subscribers are handled by `broadcast`.
impl PresentationSink for broadcast::Sender<ProjectionUpdate> {
    fn render(&mut self, change: ChangeKind, items: Vec<MessageViewItem>) {
        let _ = self.send(ProjectionUpdate { change, items });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::ViewCategory;

    #[tokio::test]
    async fn sends_commands_to_receiver() {
        let (channels, mut rx) = ChatChannels::new(8, 8);
        channels
            .send_command(StoreCommand::RetryAt { index: 3 })
            .await
            .expect("command send should work");

        let cmd = rx.recv().await.expect("receiver should have a command");
        match cmd {
            StoreCommand::RetryAt { index } => assert_eq!(index, 3),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[tokio::test]
    async fn fans_out_updates_to_subscribers() {
        let (channels, _) = ChatChannels::new(4, 16);
        let mut a = channels.subscribe();
        let mut b = channels.subscribe();

        let mut sink = channels.update_sender();
        sink.render(
            ChangeKind::Added(0),
            vec![MessageViewItem {
                sender_name: "Alice".to_owned(),
                sender_avatar_url: None,
                text: "hi".to_owned(),
                category: ViewCategory::Pending,
            }],
        );

        let update_a = a.recv().await.expect("subscriber a should receive update");
        let update_b = b.recv().await.expect("subscriber b should receive update");
        assert_eq!(update_a, update_b);
        assert_eq!(update_a.change, ChangeKind::Added(0));
    }

    #[tokio::test]
    async fn reports_closed_command_channel() {
        let (channels, rx) = ChatChannels::new(1, 1);
        drop(rx);
        let err = channels
            .send_command(StoreCommand::RetryAt { index: 0 })
            .await
            .expect_err("send should fail once the receiver is gone");
        assert_eq!(err, ChatChannelError::CommandChannelClosed);
    }
}
