//! Local message reconciliation shared by chat runtimes and renderers.
//!
//! This crate defines the message value types, the store that merges local
//! sends with server echoes by idempotency key, the view projection, and the
//! channel abstractions used to serialize store access.

/// Store command and projection update channels.
pub mod channel;
/// Delivery and compose error types.
pub mod error;
/// Mapping of send results onto local message state.
pub mod normalization;
/// Multipart payload encoding of text and idempotency key.
pub mod payload;
/// Derived, presentation-ready rows.
pub mod projection;
/// Ordered message store with idempotency-key merging.
pub mod store;
/// Message, identity and change value types.
pub mod types;

pub use channel::{ChatChannelError, ChatChannels, ProjectionStream, StoreCommand};
pub use error::{ComposeError, DeliveryError, DeliveryErrorCategory};
pub use normalization::{SendOutcome, apply_send_outcome};
pub use payload::{IDEMPOTENCY_KEY_PART_TYPE, TEXT_PART_TYPE};
pub use projection::{
    ANONYMOUS_SENDER_NAME, MessageViewItem, PresentationSink, ProjectionUpdate, ViewCategory,
    ViewProjector, project,
};
pub use store::{MergeOutcome, MessageStore, StoreListener};
pub use types::{
    ChangeKind, ComposedMessage, CurrentUser, IdempotencyKey, LocalMessageState, MessageEntry,
    MessagePart, SenderIdentity, ServerMessage, StoreSnapshot,
};
