use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad category of a delivery failure reported by the transport.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeliveryErrorCategory {
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the server.
    RateLimited,
    /// Authentication/authorization failure.
    Auth,
    /// The server refused the message (bad payload, unknown room, ...).
    Rejected,
    /// Transport bug or invariant break.
    Internal,
}

/// Failed send as reported by a delivery channel.
///
/// This is a result value, not a fatal condition: the store only records it
/// on the matching local entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct DeliveryError {
    /// High-level error category.
    pub category: DeliveryErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
}

impl DeliveryError {
    pub fn new(
        category: DeliveryErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
        }
    }

    /// Whether a user-initiated resend has a reasonable chance to succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            DeliveryErrorCategory::Network | DeliveryErrorCategory::RateLimited
        )
    }
}

/// Errors raised while turning user input into a composed message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ComposeError {
    /// Nothing but whitespace was entered.
    #[error("message text is empty")]
    EmptyText,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_category_and_code() {
        let err = DeliveryError::new(DeliveryErrorCategory::Network, "send_failed", "offline");
        assert_eq!(err.to_string(), "Network:send_failed: offline");
    }

    #[test]
    fn only_network_and_rate_limit_are_transient() {
        let network = DeliveryError::new(DeliveryErrorCategory::Network, "n", "network");
        let rate = DeliveryError::new(DeliveryErrorCategory::RateLimited, "r", "rate");
        let auth = DeliveryError::new(DeliveryErrorCategory::Auth, "a", "auth");
        let rejected = DeliveryError::new(DeliveryErrorCategory::Rejected, "x", "bad");

        assert!(network.is_transient());
        assert!(rate.is_transient());
        assert!(!auth.is_transient());
        assert!(!rejected.is_transient());
    }
}
