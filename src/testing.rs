//! Scripted gateway for ordering tests.
//!
//! Each call parks until the test answers it, so tests decide exactly when
//! (and in which order) responses arrive.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};

use crate::error::{GatewayError, Result};
use crate::gateway::Gateway;
use crate::message::WireMessage;
use crate::registry::Address;

/// Answers one parked call
pub struct Reply<T> {
    tx: oneshot::Sender<Result<T>>,
}

impl<T> Reply<T> {
    pub fn send(self, result: Result<T>) {
        let _ = self.tx.send(result);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MutationKind {
    SetRead { id: String, read: bool },
    Delete { id: String },
}

pub struct MutationCall {
    pub kind: MutationKind,
    pub reply: Reply<()>,
}

struct Inner {
    /// When set, list calls answer immediately with these messages
    auto_list: Option<Vec<WireMessage>>,
    list_tx: mpsc::UnboundedSender<Reply<Vec<WireMessage>>>,
    list_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Reply<Vec<WireMessage>>>>,
    mutation_tx: mpsc::UnboundedSender<MutationCall>,
    mutation_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MutationCall>>,
    listed: Mutex<Vec<String>>,
    generated: AtomicUsize,
}

#[derive(Clone)]
pub struct ScriptedGateway {
    inner: Arc<Inner>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::build(None)
    }

    pub fn auto_reply(messages: Vec<WireMessage>) -> Self {
        Self::build(Some(messages))
    }

    fn build(auto_list: Option<Vec<WireMessage>>) -> Self {
        let (list_tx, list_rx) = mpsc::unbounded_channel();
        let (mutation_tx, mutation_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                auto_list,
                list_tx,
                list_rx: tokio::sync::Mutex::new(list_rx),
                mutation_tx,
                mutation_rx: tokio::sync::Mutex::new(mutation_rx),
                listed: Mutex::new(Vec::new()),
                generated: AtomicUsize::new(0),
            }),
        }
    }

    /// Waits for the next parked list call
    pub async fn next_list(&self) -> Reply<Vec<WireMessage>> {
        self.inner
            .list_rx
            .lock()
            .await
            .recv()
            .await
            .expect("gateway dropped")
    }

    /// Waits for the next parked set-read or delete call
    pub async fn next_mutation(&self) -> MutationCall {
        self.inner
            .mutation_rx
            .lock()
            .await
            .recv()
            .await
            .expect("gateway dropped")
    }

    /// True when a mutation call is parked right now
    pub async fn has_parked_mutation(&self) -> bool {
        !self.inner.mutation_rx.lock().await.is_empty()
    }

    pub fn list_count(&self) -> usize {
        self.inner.listed.lock().unwrap().len()
    }

    pub fn listed_emails(&self) -> Vec<String> {
        self.inner.listed.lock().unwrap().clone()
    }

    /// Yields until at least `n` list calls have been made
    pub async fn wait_for_lists(&self, n: usize) {
        for _ in 0..1000 {
            if self.list_count() >= n {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("expected {n} list calls, saw {}", self.list_count());
    }

    async fn park_mutation(&self, kind: MutationKind) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.inner.mutation_tx.send(MutationCall {
            kind,
            reply: Reply { tx },
        });
        rx.await
            .unwrap_or_else(|_| Err(GatewayError::transport("reply dropped")))
    }
}

impl Gateway for ScriptedGateway {
    async fn generate_address(&self) -> Result<Address> {
        let n = self.inner.generated.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Address::new(format!("generated{n}@tempmail.io")))
    }

    async fn list_messages(&self, email: &str) -> Result<Vec<WireMessage>> {
        self.inner.listed.lock().unwrap().push(email.to_string());

        if let Some(messages) = &self.inner.auto_list {
            return Ok(messages.clone());
        }

        let (tx, rx) = oneshot::channel();
        let _ = self.inner.list_tx.send(Reply { tx });
        rx.await
            .unwrap_or_else(|_| Err(GatewayError::transport("reply dropped")))
    }

    async fn set_read(&self, message_id: &str, read: bool) -> Result<()> {
        self.park_mutation(MutationKind::SetRead {
            id: message_id.to_string(),
            read,
        })
        .await
    }

    async fn delete_message(&self, message_id: &str) -> Result<()> {
        self.park_mutation(MutationKind::Delete {
            id: message_id.to_string(),
        })
        .await
    }
}
