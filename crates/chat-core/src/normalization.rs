use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::{
    error::DeliveryError,
    store::{MergeOutcome, MessageStore},
    types::ComposedMessage,
};

/// Result of one delivery attempt as reported by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum SendOutcome {
    /// The transport accepted the message.
    Success,
    /// The transport gave up on the message.
    Failure { error: DeliveryError },
}

impl From<Result<(), DeliveryError>> for SendOutcome {
    fn from(result: Result<(), DeliveryError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) => Self::Failure { error },
        }
    }
}

/// Record a send result on the local entry for `message`.
///
/// Maps success to `Sent` and failure to `Failed`. If the server copy of the
/// message already arrived the store ignores the update.
pub fn apply_send_outcome(
    store: &mut MessageStore,
    message: ComposedMessage,
    outcome: SendOutcome,
) -> MergeOutcome {
    let key = message.key().clone();
    let merged = match outcome {
        SendOutcome::Success => store.mark_local_sent(message),
        SendOutcome::Failure { error } => {
            warn!(
                key = %key,
                code = %error.code,
                transient = error.is_transient(),
                "message send failed"
            );
            store.mark_local_failed(message)
        }
    };

    if merged == MergeOutcome::Ignored {
        debug!(key = %key, "send outcome arrived after server copy");
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::DeliveryErrorCategory,
        types::{CurrentUser, LocalMessageState, MessageEntry, SenderIdentity, ServerMessage},
    };

    fn store() -> MessageStore {
        MessageStore::new(CurrentUser::new("alice", None, None))
    }

    #[test]
    fn maps_transport_results_to_outcomes() {
        assert_eq!(SendOutcome::from(Ok(())), SendOutcome::Success);

        let error = DeliveryError::new(DeliveryErrorCategory::RateLimited, "rate_limited", "slow");
        assert_eq!(
            SendOutcome::from(Err(error.clone())),
            SendOutcome::Failure { error }
        );
    }

    #[test]
    fn failure_marks_pending_entry_failed() {
        let mut store = store();
        let message = ComposedMessage::with_key("hi", "k1");
        store.add_local_pending(message.clone());

        let merged = apply_send_outcome(
            &mut store,
            message.clone(),
            SendOutcome::Failure {
                error: DeliveryError::new(DeliveryErrorCategory::Network, "send_failed", "offline"),
            },
        );

        assert_eq!(merged, MergeOutcome::Updated(0));
        assert_eq!(
            store.entry_at(0),
            Some(&MessageEntry::Local {
                message,
                state: LocalMessageState::Failed,
            })
        );
    }

    #[test]
    fn success_after_server_copy_is_ignored() {
        let mut store = store();
        let message = ComposedMessage::with_key("hi", "k1");
        store.add_local_pending(message.clone());
        store.add_from_server(ServerMessage::new(
            1,
            SenderIdentity::new("alice", None, None),
            message.parts(),
        ));

        let merged = apply_send_outcome(&mut store, message, SendOutcome::Success);
        assert_eq!(merged, MergeOutcome::Ignored);
        assert!(store.entry_at(0).is_some_and(MessageEntry::is_from_server));
    }
}
