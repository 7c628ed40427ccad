use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::{Duration, Instant};

use crate::client::MailClient;
use crate::gateway::Gateway;
use crate::mailbox::MutationState;
use crate::message::{self, Message};
use crate::notice::{Action, Notice};
use crate::registry::Address;

/// How long a toast stays on screen
pub const TOAST_DURATION: Duration = Duration::from_secs(4);

/// Which messages the list shows
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Tab {
    #[default]
    All,
    Unread,
}

/// The current view state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum View {
    #[default]
    Inbox,
    /// Reading the selected message
    Message,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum InputMode {
    #[default]
    Normal,
    /// Keystrokes go to the search query
    Search,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ToastKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Toast {
    pub kind: ToastKind,
    pub title: String,
    pub body: String,
    pub shown_at: Instant,
}

/// Read-only copy of the client state, taken once per frame
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub address: Option<Address>,
    pub expires_in: Option<chrono::Duration>,
    pub messages: Vec<Message>,
    pub selection: Option<Message>,
    pub unread_count: usize,
    /// Ids whose read flag is applied locally but not yet confirmed
    pub pending: HashSet<String>,
}

impl Snapshot {
    pub fn capture<G: Gateway + 'static>(client: &MailClient<G>, now: DateTime<Utc>) -> Self {
        let messages = client.messages();
        let pending = messages
            .iter()
            .filter(|m| client.mutation_state(&m.id) == MutationState::Pending)
            .map(|m| m.id.clone())
            .collect();

        Self {
            address: client.address(),
            expires_in: client.expires_in(now),
            selection: client.selection(),
            unread_count: client.unread_count(),
            messages,
            pending,
        }
    }
}

/// The main application state
#[derive(Debug, Default)]
pub struct App {
    pub view: View,
    pub tab: Tab,
    pub input_mode: InputMode,
    pub search: String,
    /// Row under the cursor in `rows`
    pub cursor: usize,
    pub toast: Option<Toast>,
    /// Message the view opened but the client has not reported selected yet
    opening: Option<String>,
    snapshot: Snapshot,
    /// Messages after the tab and search filters, gateway order kept
    rows: Vec<Message>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes in fresh client state and rebuilds the visible rows,
    /// keeping the cursor on the same message when it is still listed
    pub fn sync(&mut self, snapshot: Snapshot) {
        let cursor_id = self.current_row().map(|m| m.id.clone());

        self.snapshot = snapshot;
        if self.selection().map(|m| &m.id) == self.opening.as_ref() {
            self.opening = None;
        }
        if self.view == View::Message && self.opening.is_none() && self.selection().is_none() {
            self.view = View::Inbox;
        }
        self.rebuild_rows();

        if let Some(id) = cursor_id
            && let Some(index) = self.rows.iter().position(|m| m.id == id)
        {
            self.cursor = index;
        }
        self.clamp_cursor();
    }

    fn rebuild_rows(&mut self) {
        let source: Vec<Message> = match self.tab {
            Tab::All => self.snapshot.messages.clone(),
            Tab::Unread => self
                .snapshot
                .messages
                .iter()
                .filter(|m| !m.read)
                .cloned()
                .collect(),
        };
        self.rows = message::search(&source, &self.search)
            .into_iter()
            .cloned()
            .collect();
    }

    fn clamp_cursor(&mut self) {
        self.cursor = self.cursor.min(self.rows.len().saturating_sub(1));
    }

    pub fn rows(&self) -> &[Message] {
        &self.rows
    }

    pub fn address(&self) -> Option<&Address> {
        self.snapshot.address.as_ref()
    }

    pub fn expires_in(&self) -> Option<chrono::Duration> {
        self.snapshot.expires_in
    }

    pub fn total_count(&self) -> usize {
        self.snapshot.messages.len()
    }

    pub fn unread_count(&self) -> usize {
        self.snapshot.unread_count
    }

    pub fn selection(&self) -> Option<&Message> {
        self.snapshot.selection.as_ref()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.snapshot.pending.contains(id)
    }

    pub fn current_row(&self) -> Option<&Message> {
        self.rows.get(self.cursor)
    }

    /// The message keyboard actions apply to: the open one, else the cursor row
    pub fn target(&self) -> Option<&Message> {
        match self.view {
            View::Message => self.selection(),
            View::Inbox => self.current_row(),
        }
    }

    pub fn select_next(&mut self) {
        if self.cursor + 1 < self.rows.len() {
            self.cursor += 1;
        }
    }

    pub fn select_previous(&mut self) {
        self.cursor = self.cursor.saturating_sub(1);
    }

    pub fn select_first(&mut self) {
        self.cursor = 0;
    }

    pub fn select_last(&mut self) {
        self.cursor = self.rows.len().saturating_sub(1);
    }

    /// Switches to the message view. The selection itself is made by the
    /// client; until it shows up the view stays open for `id`.
    pub fn open(&mut self, id: &str) {
        self.view = View::Message;
        self.opening = (self.selection().map(|m| m.id.as_str()) != Some(id)).then(|| id.to_string());
    }

    pub fn close(&mut self) {
        self.view = View::Inbox;
        self.opening = None;
    }

    pub fn toggle_tab(&mut self) {
        self.tab = match self.tab {
            Tab::All => Tab::Unread,
            Tab::Unread => Tab::All,
        };
        self.cursor = 0;
        self.rebuild_rows();
    }

    pub fn begin_search(&mut self) {
        self.input_mode = InputMode::Search;
    }

    pub fn push_search_char(&mut self, c: char) {
        self.search.push(c);
        self.cursor = 0;
        self.rebuild_rows();
    }

    pub fn pop_search_char(&mut self) {
        self.search.pop();
        self.cursor = 0;
        self.rebuild_rows();
    }

    /// Leaves search input, keeping the filter applied
    pub fn end_search(&mut self) {
        self.input_mode = InputMode::Normal;
    }

    /// Leaves search input and drops the filter
    pub fn cancel_search(&mut self) {
        self.input_mode = InputMode::Normal;
        self.search.clear();
        self.rebuild_rows();
        self.clamp_cursor();
    }

    pub fn show_toast(&mut self, kind: ToastKind, title: impl Into<String>, body: impl Into<String>) {
        self.toast = Some(Toast {
            kind,
            title: title.into(),
            body: body.into(),
            shown_at: Instant::now(),
        });
    }

    /// Drops the toast once it has been up for `TOAST_DURATION`
    pub fn expire_toast(&mut self, now: Instant) {
        if self
            .toast
            .as_ref()
            .is_some_and(|t| now.duration_since(t.shown_at) >= TOAST_DURATION)
        {
            self.toast = None;
        }
    }

    /// Reports the outcome of copying the active address
    pub fn show_copy_result(&mut self, copied: bool) {
        if copied {
            self.show_toast(
                ToastKind::Info,
                "Email copied",
                "The email address has been copied to your clipboard.",
            );
        } else {
            self.show_toast(
                ToastKind::Error,
                "Failed to copy",
                "Could not copy the email address to clipboard.",
            );
        }
    }

    /// Turns a client notice into user feedback
    pub fn handle_notice(&mut self, notice: &Notice) {
        match notice {
            Notice::AddressChanged(address) => {
                self.view = View::Inbox;
                self.cursor = 0;
                self.show_toast(ToastKind::Info, "New address", address.email.clone());
            }
            Notice::Failed { action, error } => {
                if *action == Action::Select {
                    self.close();
                }
                self.show_toast(ToastKind::Error, action.failure_title(), error.message.clone());
            }
            Notice::Deleted { .. } => self.show_toast(ToastKind::Info, "Message deleted", ""),
            Notice::Archived { .. } => self.show_toast(ToastKind::Info, "Message archived", ""),
            Notice::Synced { .. } | Notice::ReadChanged { .. } => {}
        }
    }
}

/// Short human form of the time left on an address
pub fn format_remaining(remaining: chrono::Duration) -> String {
    let minutes = remaining.num_minutes();
    if remaining <= chrono::Duration::zero() {
        "expired".to_string()
    } else if minutes < 1 {
        "<1m".to_string()
    } else if minutes < 60 {
        format!("{minutes}m")
    } else {
        format!("{}h {}m", minutes / 60, minutes % 60)
    }
}

/// True for notices that end an address generation
pub fn ends_busy(notice: &Notice) -> bool {
    matches!(
        notice,
        Notice::AddressChanged(_)
            | Notice::Failed {
                action: Action::Generate,
                ..
            }
    )
}
