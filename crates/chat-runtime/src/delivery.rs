use std::future::Future;

use chat_core::{ComposedMessage, DeliveryError};

/// Outbound half of a chat transport.
///
/// Inbound messages (including echoes of our own sends) reach the runtime
/// separately, on the receiver passed to [`crate::spawn_runtime`], in no
/// particular order relative to send completion.
pub trait DeliveryChannel: Send + Sync + 'static {
    /// Attempt to deliver `message` with its full multipart payload.
    fn send(
        &self,
        message: &ComposedMessage,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}
