//! Multipart payload encoding for the text body and the idempotency side channel.

use crate::types::{ComposedMessage, MessagePart, ServerMessage};

/// Part type of the human-readable message body.
pub const TEXT_PART_TYPE: &str = "text/plain";
/// Part type of the side-channel part carrying the idempotency key.
pub const IDEMPOTENCY_KEY_PART_TYPE: &str = "com-pusher-gettingstarted/internal-id";

impl ComposedMessage {
    /// Outgoing payload: the text part followed by the idempotency key part.
    pub fn parts(&self) -> Vec<MessagePart> {
        vec![
            MessagePart::inline(TEXT_PART_TYPE, self.text()),
            MessagePart::inline(IDEMPOTENCY_KEY_PART_TYPE, self.key().as_str()),
        ]
    }
}

impl ServerMessage {
    /// Idempotency key echoed back by the server.
    ///
    /// `None` for messages from other clients or older protocol versions.
    pub fn idempotency_key(&self) -> Option<&str> {
        self.inline_part(IDEMPOTENCY_KEY_PART_TYPE)
    }

    /// Text body, or an empty string when the message has no text part.
    pub fn text(&self) -> &str {
        self.inline_part(TEXT_PART_TYPE).unwrap_or_default()
    }

    fn inline_part(&self, wanted: &str) -> Option<&str> {
        self.parts.iter().find_map(|part| match part {
            MessagePart::Inline { part_type, content } if part_type == wanted => {
                Some(content.as_str())
            }
            _ => None,
        })
    }
}
