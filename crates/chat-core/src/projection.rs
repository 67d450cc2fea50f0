//! Presentation-ready projection of store snapshots.

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    store::StoreListener,
    types::{ChangeKind, CurrentUser, LocalMessageState, MessageEntry, StoreSnapshot},
};

/// Label used when a sender has no display name.
pub const ANONYMOUS_SENDER_NAME: &str = "Anonymous User";

/// How a row should be rendered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ViewCategory {
    Pending,
    Failed,
    FromMe,
    FromOther,
}

/// One rendered message row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageViewItem {
    pub sender_name: String,
    pub sender_avatar_url: Option<String>,
    pub text: String,
    pub category: ViewCategory,
}

/// Full projection plus the change that triggered it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectionUpdate {
    pub change: ChangeKind,
    pub items: Vec<MessageViewItem>,
}

/// Map a snapshot to view rows, one per entry, in the same order.
pub fn project(snapshot: &StoreSnapshot) -> Vec<MessageViewItem> {
    snapshot
        .entries
        .iter()
        .map(|entry| project_entry(&snapshot.current_user, entry))
        .collect()
}

fn project_entry(current_user: &CurrentUser, entry: &MessageEntry) -> MessageViewItem {
    match entry {
        MessageEntry::FromServer(message) => MessageViewItem {
            sender_name: display_name(message.sender.name.as_deref()),
            sender_avatar_url: message.sender.avatar_url.clone(),
            text: message.text().to_owned(),
            category: if message.sender.id == current_user.id {
                ViewCategory::FromMe
            } else {
                ViewCategory::FromOther
            },
        },
        MessageEntry::Local { message, state } => MessageViewItem {
            sender_name: display_name(current_user.name.as_deref()),
            sender_avatar_url: current_user.avatar_url.clone(),
            text: message.text().to_owned(),
            category: match state {
                LocalMessageState::Pending => ViewCategory::Pending,
                LocalMessageState::Failed => ViewCategory::Failed,
                LocalMessageState::Sent => ViewCategory::FromMe,
            },
        },
    }
}

fn display_name(name: Option<&str>) -> String {
    name.filter(|value| !value.trim().is_empty())
        .unwrap_or(ANONYMOUS_SENDER_NAME)
        .to_owned()
}

/// Renderer that redraws the rows implied by each change.
pub trait PresentationSink: Send {
    fn render(&mut self, change: ChangeKind, items: Vec<MessageViewItem>);
}

/// Store listener that re-projects every snapshot and forwards it to a sink.
#[derive(Debug)]
pub struct ViewProjector<S> {
    sink: S,
}

impl<S: PresentationSink> ViewProjector<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }
}

impl<S: PresentationSink> StoreListener for ViewProjector<S> {
    fn on_change(&mut self, snapshot: StoreSnapshot, change: ChangeKind) {
        let items = project(&snapshot);
        trace!(?change, row_count = items.len(), "projected store snapshot");
        self.sink.render(change, items);
    }
}
