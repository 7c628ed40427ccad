//! Mailbox synchronizer
//!
//! `Synchronizer::refresh` fetches the active address's messages and replaces
//! the collection, newest request wins. `Poller` is the owned task that calls
//! it on a fixed interval and restarts whenever the address changes.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::mailbox::Mailbox;
use crate::message::Message;
use crate::notice::{Action, Notice, Notifier};
use crate::registry::AddressSlot;

/// Default polling period
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// What happened to a successful fetch
#[derive(Debug, Clone, PartialEq)]
pub enum Refresh {
    /// The response became the new collection
    Applied(Vec<Message>),
    /// A newer fetch, or a different address, got there first
    Discarded,
}

pub struct Synchronizer<G> {
    gateway: Arc<G>,
    mailbox: Mailbox,
    notifier: Notifier,
}

impl<G> Clone for Synchronizer<G> {
    fn clone(&self) -> Self {
        Self {
            gateway: Arc::clone(&self.gateway),
            mailbox: self.mailbox.clone(),
            notifier: self.notifier.clone(),
        }
    }
}

impl<G: Gateway> Synchronizer<G> {
    pub fn new(gateway: Arc<G>, mailbox: Mailbox, notifier: Notifier) -> Self {
        Self {
            gateway,
            mailbox,
            notifier,
        }
    }

    /// Fetches every message for the active address.
    ///
    /// A failure leaves the collection untouched. Failures for an address
    /// that has since been replaced are returned but not broadcast.
    pub async fn refresh(&self) -> Result<Refresh> {
        let Some(ticket) = self.mailbox.lock().begin_fetch() else {
            let err = GatewayError::no_address();
            self.notifier.failed(Action::Refresh, &err);
            return Err(err);
        };

        match self.gateway.list_messages(&ticket.address.email).await {
            Ok(wire) => {
                let fetched: Vec<Message> = wire.into_iter().map(Message::from_wire).collect();

                let mut state = self.mailbox.lock();
                if !state.apply_fetch(&ticket, fetched) {
                    return Ok(Refresh::Discarded);
                }
                let messages = state.messages().to_vec();
                let unread = state.unread_count();
                drop(state);

                self.notifier.emit(Notice::Synced {
                    count: messages.len(),
                    unread,
                });
                Ok(Refresh::Applied(messages))
            }
            Err(e) => {
                if self.mailbox.lock().is_current(ticket.generation) {
                    self.notifier.failed(Action::Refresh, &e);
                }
                Err(e)
            }
        }
    }
}

/// The periodic fetch task. Aborted on `shutdown` or drop, never leaked.
pub struct Poller {
    handle: Option<JoinHandle<()>>,
}

impl Poller {
    /// Starts polling. Fetches immediately whenever an address becomes
    /// active, then every `period` until the address changes again.
    pub fn spawn<G: Gateway + 'static>(
        synchronizer: Synchronizer<G>,
        mut slot: watch::Receiver<AddressSlot>,
        period: Duration,
    ) -> Self {
        let handle = tokio::spawn(async move {
            loop {
                let active = slot.borrow_and_update().address.clone();

                let Some(address) = active else {
                    if slot.changed().await.is_err() {
                        return;
                    }
                    continue;
                };

                crate::debug_log!("poller: polling {} every {:?}", address.email, period);
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            // An address change cancels the fetch in flight
                            tokio::select! {
                                _ = synchronizer.refresh() => {}
                                changed = slot.changed() => {
                                    if changed.is_err() {
                                        return;
                                    }
                                    break;
                                }
                            }
                        }
                        changed = slot.changed() => {
                            if changed.is_err() {
                                return;
                            }
                            break;
                        }
                    }
                }

                crate::debug_log!("poller: stopped polling {}", address.email);
            }
        });

        Self {
            handle: Some(handle),
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn shutdown(&mut self) {
        if let Some(handle) = self.handle.take() {
            crate::debug_log!("poller: shutdown");
            handle.abort();
        }
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
