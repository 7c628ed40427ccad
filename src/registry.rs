//! Address registry
//!
//! Owns the single active mailbox address, persists it to a client-local
//! slot, and broadcasts every change through a `watch` channel. The mailbox
//! and the poller observe that channel; nothing reaches into the slot directly.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;

use crate::error::GatewayError;
use crate::gateway::Gateway;
use crate::notice::{Action, Notice, Notifier};

/// A temporary mailbox identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub email: String,
    /// Shown to the user only. Never checked to suppress polling.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Address {
    pub fn new(email: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// Time left before expiry, clamped at zero. `None` when unknown.
    pub fn expires_in(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.expires_at
            .map(|at| (at - now).max(Duration::zero()))
    }
}

/// The value carried by the change signal.
///
/// `generation` increases on every write, so writing the same address twice
/// still counts as a change and still discards the previous collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AddressSlot {
    pub generation: u64,
    pub address: Option<Address>,
}

/// Durable storage for the one active address
pub trait AddressStore: Send + Sync {
    fn load(&self) -> Result<Option<Address>>;
    fn save(&self, address: &Address) -> Result<()>;
}

/// Stores the address as JSON in a file under the config directory
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AddressStore for FileStore {
    fn load(&self) -> Result<Option<Address>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read address from {:?}", self.path))?;
        let content = content.trim();
        if content.is_empty() {
            return Ok(None);
        }

        // Older slots held just the bare email string
        match serde_json::from_str::<Address>(content) {
            Ok(address) => Ok(Some(address)),
            Err(_) if !content.starts_with('{') => Ok(Some(Address::new(content))),
            Err(e) => Err(e).with_context(|| format!("Failed to parse {:?}", self.path)),
        }
    }

    fn save(&self, address: &Address) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir).context("Failed to create address directory")?;
        }

        let json = serde_json::to_string_pretty(address).context("Failed to encode address")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, json).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {:?}", self.path))?;
        Ok(())
    }
}

/// Keeps the address in memory only (tests, demo mode)
#[derive(Default)]
pub struct MemoryStore {
    slot: Mutex<Option<Address>>,
}

impl MemoryStore {
    pub fn new(initial: Option<Address>) -> Self {
        Self {
            slot: Mutex::new(initial),
        }
    }
}

impl AddressStore for MemoryStore {
    fn load(&self) -> Result<Option<Address>> {
        Ok(self.slot.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn save(&self, address: &Address) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(address.clone());
        Ok(())
    }
}

pub struct AddressRegistry<G> {
    gateway: Arc<G>,
    store: Box<dyn AddressStore>,
    tx: watch::Sender<AddressSlot>,
    notifier: Notifier,
}

impl<G: Gateway> AddressRegistry<G> {
    /// Creates the registry, restoring any address left by a previous session
    pub fn new(gateway: Arc<G>, store: Box<dyn AddressStore>, notifier: Notifier) -> Self {
        let restored = store.load().unwrap_or_else(|e| {
            crate::debug_log!("registry: could not restore address: {:#}", e);
            None
        });

        if let Some(ref address) = restored {
            crate::debug_log!("registry: restored {}", address.email);
        }

        let generation = u64::from(restored.is_some());
        let (tx, _) = watch::channel(AddressSlot {
            generation,
            address: restored,
        });

        Self {
            gateway,
            store,
            tx,
            notifier,
        }
    }

    pub fn current_address(&self) -> Option<Address> {
        self.tx.borrow().address.clone()
    }

    /// Observers re-read the slot whenever `changed()` fires
    pub fn subscribe(&self) -> watch::Receiver<AddressSlot> {
        self.tx.subscribe()
    }

    /// Makes `address` the active one and tells every observer.
    /// A persistence failure is logged; the session still switches.
    pub fn set_address(&self, address: Address) {
        if let Err(e) = self.store.save(&address) {
            crate::debug_log!("registry: failed to persist {}: {:#}", address.email, e);
        }

        self.tx.send_modify(|slot| {
            slot.generation += 1;
            slot.address = Some(address.clone());
        });
        crate::debug_log!(
            "registry: active address is now {} (generation {})",
            address.email,
            self.tx.borrow().generation
        );

        self.notifier.emit(Notice::AddressChanged(address));
    }

    /// Requests a brand-new address. On failure the current one is untouched.
    pub async fn generate(&self) -> Result<Address, GatewayError> {
        match self.gateway.generate_address().await {
            Ok(address) => {
                self.set_address(address.clone());
                Ok(address)
            }
            Err(e) => {
                self.notifier.failed(Action::Generate, &e);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockGateway;

    fn registry_with(mock: MockGateway, store: MemoryStore) -> AddressRegistry<MockGateway> {
        AddressRegistry::new(Arc::new(mock), Box::new(store), Notifier::new())
    }

    #[test]
    fn test_starts_empty_without_stored_address() {
        let registry = registry_with(MockGateway::new(), MemoryStore::default());
        assert_eq!(registry.current_address(), None);
        assert_eq!(registry.subscribe().borrow().generation, 0);
    }

    #[test]
    fn test_restores_stored_address() {
        let store = MemoryStore::new(Some(Address::new("old@tempmail.io")));
        let registry = registry_with(MockGateway::new(), store);
        assert_eq!(
            registry.current_address().map(|a| a.email),
            Some("old@tempmail.io".to_string())
        );
    }

    #[test]
    fn test_set_address_bumps_generation_even_for_same_address() {
        let registry = registry_with(MockGateway::new(), MemoryStore::default());
        let rx = registry.subscribe();

        registry.set_address(Address::new("a@tempmail.io"));
        let first = rx.borrow().generation;
        registry.set_address(Address::new("a@tempmail.io"));
        let second = rx.borrow().generation;

        assert!(second > first);
    }

    #[tokio::test]
    async fn test_set_address_notifies_observers() {
        let registry = registry_with(MockGateway::new(), MemoryStore::default());
        let mut rx = registry.subscribe();
        let mut notices = registry.notifier.subscribe();

        registry.set_address(Address::new("a@tempmail.io"));

        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().address.as_ref().map(|a| a.email.as_str()),
            Some("a@tempmail.io")
        );
        assert_eq!(
            notices.try_recv().unwrap(),
            Notice::AddressChanged(Address::new("a@tempmail.io"))
        );
    }

    #[tokio::test]
    async fn test_generate_sets_and_persists_address() {
        let mut mock = MockGateway::new();
        mock.expect_generate_address().times(1).returning(|| {
            Box::pin(async { Ok(Address::new("fresh@tempmail.io")) })
        });

        let registry = registry_with(mock, MemoryStore::default());
        let address = registry.generate().await.unwrap();

        assert_eq!(address.email, "fresh@tempmail.io");
        assert_eq!(registry.current_address(), Some(address.clone()));
        assert_eq!(registry.store.load().unwrap(), Some(address));
    }

    #[tokio::test]
    async fn test_generate_failure_keeps_current_address() {
        let mut mock = MockGateway::new();
        mock.expect_generate_address()
            .returning(|| Box::pin(async { Err(GatewayError::new(503, "API error: down")) }));

        let store = MemoryStore::new(Some(Address::new("keep@tempmail.io")));
        let registry = registry_with(mock, store);
        let rx = registry.subscribe();
        let before = rx.borrow().generation;

        let err = registry.generate().await.unwrap_err();

        assert_eq!(err.status, 503);
        assert_eq!(
            registry.current_address().map(|a| a.email),
            Some("keep@tempmail.io".to_string())
        );
        assert_eq!(rx.borrow().generation, before);
    }

    #[test]
    fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("address.json"));

        assert_eq!(store.load().unwrap(), None);

        let expires = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let address = Address::new("a@tempmail.io").with_expiry(expires);
        store.save(&address).unwrap();

        assert_eq!(store.load().unwrap(), Some(address));
    }

    #[test]
    fn test_file_store_accepts_bare_email() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("address.json");
        fs::write(&path, "legacy@tempmail.io\n").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.load().unwrap(), Some(Address::new("legacy@tempmail.io")));
    }

    #[test]
    fn test_file_store_rejects_corrupt_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("address.json");
        fs::write(&path, "{ not json").unwrap();

        assert!(FileStore::new(&path).load().is_err());
    }

    #[test]
    fn test_expires_in_clamps_at_zero() {
        let now = Utc::now();
        let past = Address::new("a@b.c").with_expiry(now - Duration::hours(1));
        let future = Address::new("a@b.c").with_expiry(now + Duration::hours(2));

        assert_eq!(past.expires_in(now), Some(Duration::zero()));
        assert_eq!(future.expires_in(now), Some(Duration::hours(2)));
        assert_eq!(Address::new("a@b.c").expires_in(now), None);
    }
}
