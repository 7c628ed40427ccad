//! Optimistic mutation engine
//!
//! Every user action is applied to the local collection first, then sent to
//! the gateway. A failed call rolls the local change back and surfaces the
//! error. Mutations on the same message run one after another; different
//! messages proceed independently.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OwnedMutexGuard;

use crate::error::Result;
use crate::gateway::Gateway;
use crate::mailbox::{Mailbox, ReadStep};
use crate::notice::{Action, Notice, Notifier};

/// One async lock per message id with a mutation in flight
#[derive(Default)]
struct MessageLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl MessageLocks {
    /// Waits until no other mutation holds `id`
    async fn acquire(&self, id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries only the map still references are idle
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(id.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}

pub struct MutationEngine<G> {
    gateway: Arc<G>,
    mailbox: Mailbox,
    locks: MessageLocks,
    notifier: Notifier,
}

impl<G: Gateway> MutationEngine<G> {
    pub fn new(gateway: Arc<G>, mailbox: Mailbox, notifier: Notifier) -> Self {
        Self {
            gateway,
            mailbox,
            locks: MessageLocks::default(),
            notifier,
        }
    }

    /// Selects a message. Selection happens right away; an unread message is
    /// then marked read, and only the read flag rolls back if that fails.
    pub async fn select(&self, id: &str) -> Result<()> {
        let selected = self.mailbox.lock().select(id);
        let was_unread = match selected {
            Ok(unread) => unread,
            Err(e) => {
                self.notifier.failed(Action::Select, &e);
                return Err(e);
            }
        };

        if was_unread {
            self.update_read(id, Some(true), Action::MarkRead).await?;
        }
        Ok(())
    }

    /// Flips the read flag, returning the new value once confirmed
    pub async fn toggle_read(&self, id: &str) -> Result<bool> {
        self.update_read(id, None, Action::ToggleRead).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.remove(id, Action::Delete).await
    }

    /// Archive has no separate server-side state yet; it deletes.
    pub async fn archive(&self, id: &str) -> Result<()> {
        self.remove(id, Action::Archive).await
    }

    async fn update_read(&self, id: &str, target: Option<bool>, action: Action) -> Result<bool> {
        let _guard = self.locks.acquire(id).await;

        let step = self.mailbox.lock().begin_read(id, target);
        let ticket = match step {
            Ok(ReadStep::Started(ticket)) => ticket,
            Ok(ReadStep::Unchanged(read)) => return Ok(read),
            Err(e) => {
                self.notifier.failed(action, &e);
                return Err(e);
            }
        };

        crate::debug_log!("engine: {} read -> {} (pending)", id, ticket.target);
        let result = self.gateway.set_read(id, ticket.target).await;

        let current = {
            let mut state = self.mailbox.lock();
            state.settle_read(&ticket, result.is_ok());
            state.is_current(ticket.generation)
        };

        match result {
            Ok(()) => {
                if current {
                    self.notifier.emit(Notice::ReadChanged {
                        id: id.to_string(),
                        read: ticket.target,
                    });
                }
                Ok(ticket.target)
            }
            Err(e) => {
                crate::debug_log!("engine: {} read rolled back to {}", id, ticket.original);
                if current {
                    self.notifier.failed(action, &e);
                }
                Err(e)
            }
        }
    }

    async fn remove(&self, id: &str, action: Action) -> Result<()> {
        let _guard = self.locks.acquire(id).await;

        let step = self.mailbox.lock().begin_removal(id);
        let ticket = match step {
            Ok(ticket) => ticket,
            Err(e) => {
                self.notifier.failed(action, &e);
                return Err(e);
            }
        };

        crate::debug_log!("engine: {} removal pending ({:?})", id, action);
        let result = self.gateway.delete_message(id).await;

        let current = {
            let mut state = self.mailbox.lock();
            state.settle_removal(&ticket, result.is_ok());
            state.is_current(ticket.generation)
        };

        match result {
            Ok(()) => {
                if current {
                    let id = id.to_string();
                    self.notifier.emit(match action {
                        Action::Archive => Notice::Archived { id },
                        _ => Notice::Deleted { id },
                    });
                }
                Ok(())
            }
            Err(e) => {
                crate::debug_log!("engine: {} removal rolled back", id);
                if current {
                    self.notifier.failed(action, &e);
                }
                Err(e)
            }
        }
    }
}
