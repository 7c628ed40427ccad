//! The mail client a view talks to
//!
//! Wires the address registry, synchronizer, mutation engine and poller
//! around one gateway. Views read state through the query methods, send
//! intents through the async ones, and learn outcomes from `subscribe`.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::engine::MutationEngine;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::mailbox::{Mailbox, MutationState};
use crate::message::Message;
use crate::notice::{Notice, Notifier};
use crate::registry::{Address, AddressRegistry, AddressStore};
use crate::sync::{Poller, Refresh, Synchronizer};

pub struct MailClient<G> {
    registry: AddressRegistry<G>,
    synchronizer: Synchronizer<G>,
    engine: MutationEngine<G>,
    mailbox: Mailbox,
    notifier: Notifier,
    poller: Mutex<Option<Poller>>,
}

impl<G: Gateway + 'static> MailClient<G> {
    /// Builds a client, restoring the persisted address from `store`
    pub fn new(gateway: G, store: Box<dyn AddressStore>) -> Self {
        let gateway = Arc::new(gateway);
        let notifier = Notifier::new();
        let registry = AddressRegistry::new(Arc::clone(&gateway), store, notifier.clone());
        let mailbox = Mailbox::new(registry.subscribe());

        Self {
            synchronizer: Synchronizer::new(Arc::clone(&gateway), mailbox.clone(), notifier.clone()),
            engine: MutationEngine::new(gateway, mailbox.clone(), notifier.clone()),
            registry,
            mailbox,
            notifier,
            poller: Mutex::new(None),
        }
    }

    /// Starts background polling, replacing any poller already running.
    /// Must be called from within a tokio runtime.
    pub fn start_polling(&self, period: Duration) {
        let poller = Poller::spawn(self.synchronizer.clone(), self.registry.subscribe(), period);
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(poller);
        drop(previous);
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(Poller::is_running)
    }

    /// Stops polling. In-flight intents still complete.
    pub fn shutdown(&self) {
        if let Some(mut poller) = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            poller.shutdown();
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.notifier.subscribe()
    }

    // Queries

    pub fn address(&self) -> Option<Address> {
        self.registry.current_address()
    }

    /// Time left before the active address expires, if the gateway said
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.address().and_then(|a| a.expires_in(now))
    }

    pub fn messages(&self) -> Vec<Message> {
        self.mailbox.messages()
    }

    pub fn selection(&self) -> Option<Message> {
        self.mailbox.selection()
    }

    pub fn unread_count(&self) -> usize {
        self.mailbox.unread_count()
    }

    pub fn unread_messages(&self) -> Vec<Message> {
        self.mailbox.unread_messages()
    }

    pub fn search(&self, query: &str) -> Vec<Message> {
        self.mailbox.search(query)
    }

    pub fn mutation_state(&self, id: &str) -> MutationState {
        self.mailbox.mutation_state(id)
    }

    pub fn clear_selection(&self) {
        self.mailbox.lock().clear_selection();
    }

    // Intents

    pub async fn generate_new_address(&self) -> Result<Address> {
        self.registry.generate().await
    }

    /// Makes an already-known address active, e.g. one typed in by the user
    pub fn use_address(&self, address: Address) {
        self.registry.set_address(address);
    }

    pub async fn refresh_now(&self) -> Result<Refresh> {
        self.synchronizer.refresh().await
    }

    pub async fn select_message(&self, id: &str) -> Result<()> {
        self.engine.select(id).await
    }

    pub async fn toggle_read(&self, id: &str) -> Result<bool> {
        self.engine.toggle_read(id).await
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.engine.delete(id).await
    }

    pub async fn archive(&self, id: &str) -> Result<()> {
        self.engine.archive(id).await
    }
}
