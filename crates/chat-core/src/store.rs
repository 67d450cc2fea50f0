use std::{collections::HashMap, fmt};

use tracing::{debug, trace};

use crate::types::{
    ChangeKind, ComposedMessage, CurrentUser, IdempotencyKey, LocalMessageState, MessageEntry,
    ServerMessage, StoreSnapshot,
};

/// Receives a fresh snapshot after every store mutation.
///
/// Notifications are synchronous: `on_change` runs before the mutating call
/// returns.
pub trait StoreListener: Send {
    fn on_change(&mut self, snapshot: StoreSnapshot, change: ChangeKind);
}

impl<F> StoreListener for F
where
    F: FnMut(StoreSnapshot, ChangeKind) + Send,
{
    fn on_change(&mut self, snapshot: StoreSnapshot, change: ChangeKind) {
        self(snapshot, change)
    }
}

/// Result of merging one entry into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// Appended as a new entry at this index.
    Added(usize),
    /// Replaced the entry at this index.
    Updated(usize),
    /// Dropped because a server copy already owns the key.
    Ignored,
}

impl MergeOutcome {
    fn change(self) -> Option<ChangeKind> {
        match self {
            Self::Added(index) => Some(ChangeKind::Added(index)),
            Self::Updated(index) => Some(ChangeKind::Updated(index)),
            Self::Ignored => None,
        }
    }
}

/// Ordered message list that reconciles local sends with server echoes.
///
/// Entries are merged by idempotency key. A key appears at most once, new
/// keys are appended, and updates keep the existing index. Once the server
/// copy of a key has arrived, local state changes for that key are ignored.
///
/// The store does no locking; callers serialize all mutations onto a single
/// execution context.
pub struct MessageStore {
    current_user: CurrentUser,
    entries: Vec<MessageEntry>,
    key_index: HashMap<IdempotencyKey, usize>,
    listener: Option<Box<dyn StoreListener>>,
}

impl MessageStore {
    pub fn new(current_user: CurrentUser) -> Self {
        Self {
            current_user,
            entries: Vec::new(),
            key_index: HashMap::new(),
            listener: None,
        }
    }

    /// Register the listener, replacing any previous one.
    pub fn set_listener(&mut self, listener: impl StoreListener + 'static) {
        self.listener = Some(Box::new(listener));
    }

    /// Entries in display order.
    pub fn entries(&self) -> &[MessageEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry at `index`, or `None` when out of range.
    pub fn entry_at(&self, index: usize) -> Option<&MessageEntry> {
        self.entries.get(index)
    }

    /// Composed message at `index` if that row is a failed local send.
    pub fn failed_message_at(&self, index: usize) -> Option<&ComposedMessage> {
        match self.entries.get(index)? {
            MessageEntry::Local {
                message,
                state: LocalMessageState::Failed,
            } => Some(message),
            MessageEntry::Local { .. } | MessageEntry::FromServer(_) => None,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            current_user: self.current_user.clone(),
            entries: self.entries.clone(),
        }
    }

    /// Record a freshly composed message as pending.
    ///
    /// The key must be unique per compose; the store never generates keys.
    pub fn add_local_pending(&mut self, message: ComposedMessage) -> MergeOutcome {
        self.merge_local(message, LocalMessageState::Pending)
    }

    /// Record a successful send. No-op if the server copy already arrived.
    pub fn mark_local_sent(&mut self, message: ComposedMessage) -> MergeOutcome {
        self.merge_local(message, LocalMessageState::Sent)
    }

    /// Record a failed send. No-op if the server copy already arrived.
    pub fn mark_local_failed(&mut self, message: ComposedMessage) -> MergeOutcome {
        self.merge_local(message, LocalMessageState::Failed)
    }

    /// Merge a message delivered by the server.
    ///
    /// Keyed messages replace any entry with the same key; unkeyed messages
    /// are always appended.
    pub fn add_from_server(&mut self, message: ServerMessage) -> MergeOutcome {
        self.merge(MessageEntry::FromServer(message))
    }

    fn merge_local(&mut self, message: ComposedMessage, state: LocalMessageState) -> MergeOutcome {
        self.merge(MessageEntry::Local { message, state })
    }

    fn merge(&mut self, incoming: MessageEntry) -> MergeOutcome {
        let key = incoming.idempotency_key().map(IdempotencyKey::from);
        let existing = key
            .as_ref()
            .and_then(|key| self.key_index.get(key).copied());

        let outcome = match existing {
            None => {
                let index = self.entries.len();
                self.entries.push(incoming);
                if let Some(key) = key {
                    self.key_index.insert(key, index);
                }
                MergeOutcome::Added(index)
            }
            Some(index) if incoming.is_local() && self.entries[index].is_from_server() => {
                trace!(
                    index,
                    key = key.as_ref().map(IdempotencyKey::as_str).unwrap_or_default(),
                    "local update superseded by server copy"
                );
                MergeOutcome::Ignored
            }
            Some(index) => {
                self.entries[index] = incoming;
                MergeOutcome::Updated(index)
            }
        };

        if let Some(change) = outcome.change() {
            debug!(?change, entry_count = self.entries.len(), "message store changed");
            self.notify(change);
        }
        outcome
    }

    fn notify(&mut self, change: ChangeKind) {
        if self.listener.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(listener) = self.listener.as_mut() {
            listener.on_change(snapshot, change);
        }
    }
}

impl fmt::Debug for MessageStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageStore")
            .field("current_user", &self.current_user)
            .field("entries", &self.entries)
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}
