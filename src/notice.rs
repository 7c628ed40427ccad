use tokio::sync::broadcast;

use crate::error::GatewayError;
use crate::registry::Address;

/// How many undelivered notices a slow view may lag behind by
const NOTICE_CAPACITY: usize = 64;

/// The user intent (or background task) a failure belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Generate,
    Refresh,
    Select,
    ToggleRead,
    MarkRead,
    Delete,
    Archive,
}

impl Action {
    /// Title used by views for a failure toast
    pub fn failure_title(&self) -> &'static str {
        match self {
            Action::Generate => "Error generating email",
            Action::Refresh => "Error loading messages",
            Action::Select => "Error opening message",
            Action::ToggleRead => "Error updating read status",
            Action::MarkRead => "Error marking as read",
            Action::Delete => "Error deleting message",
            Action::Archive => "Error archiving message",
        }
    }
}

/// Outcome broadcast to every subscribed view
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    AddressChanged(Address),
    Synced { count: usize, unread: usize },
    ReadChanged { id: String, read: bool },
    Deleted { id: String },
    Archived { id: String },
    Failed { action: Action, error: GatewayError },
}

/// Cheap, cloneable handle for publishing notices
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notice>,
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(NOTICE_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    /// Publishes a notice. Having no subscribers is not an error.
    pub fn emit(&self, notice: Notice) {
        let _ = self.tx.send(notice);
    }

    pub fn failed(&self, action: Action, error: &GatewayError) {
        crate::debug_log!("{:?} failed: {}", action, error);
        self.emit(Notice::Failed {
            action,
            error: error.clone(),
        });
    }
}
