use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use crate::error::{GatewayError, Result};
use crate::message::{self, Message};
use crate::registry::{Address, AddressSlot};

/// Where a message stands with respect to the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MutationState {
    #[default]
    Synced,
    /// A read/unread change is applied locally and awaiting confirmation
    Pending,
    /// Removed locally, delete awaiting confirmation
    PendingRemoval,
}

/// What it takes to undo an in-flight mutation
#[derive(Debug, Clone)]
enum PendingMutation {
    Read {
        original: bool,
        target: bool,
    },
    Removal {
        message: Message,
        index: usize,
        was_selected: bool,
    },
}

/// A read change the gateway accepted. Fetches issued up to `issued_seq`
/// may still carry the old flag.
#[derive(Debug, Clone, Copy)]
struct ConfirmedRead {
    target: bool,
    issued_seq: u64,
}

/// Issued before a fetch; the response only lands if the ticket is still newest
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTicket {
    pub seq: u64,
    pub generation: u64,
    pub address: Address,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReadTicket {
    pub generation: u64,
    pub id: String,
    pub original: bool,
    pub target: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RemovalTicket {
    pub generation: u64,
    pub id: String,
}

/// Result of starting a read-flag change
#[derive(Debug, Clone, PartialEq)]
pub enum ReadStep {
    /// Flag already has the requested value, nothing to send
    Unchanged(bool),
    Started(ReadTicket),
}

/// The message collection and selection for the active address.
///
/// Only the synchronizer (wholesale replace) and the mutation engine (point
/// patches) write to it. Everything is keyed to the address generation, so
/// work started for a previous address can never touch the current one.
#[derive(Debug, Default)]
pub struct MailboxState {
    generation: u64,
    address: Option<Address>,
    messages: Vec<Message>,
    selected: Option<String>,
    pending: HashMap<String, PendingMutation>,
    /// Ids confirmed deleted in this generation, hidden from later fetches
    deleted: HashSet<String>,
    confirmed_reads: HashMap<String, ConfirmedRead>,
    issued_seq: u64,
    applied_seq: u64,
}

impl MailboxState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Catches up with the address signal. A new generation discards the
    /// whole collection, the selection and any pending bookkeeping.
    pub fn follow(&mut self, slot: &AddressSlot) {
        if slot.generation == self.generation {
            return;
        }

        crate::debug_log!(
            "mailbox: generation {} -> {} ({})",
            self.generation,
            slot.generation,
            slot.address.as_ref().map_or("none", |a| a.email.as_str())
        );

        self.generation = slot.generation;
        self.address = slot.address.clone();
        self.messages.clear();
        self.selected = None;
        self.pending.clear();
        self.deleted.clear();
        self.confirmed_reads.clear();
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    pub fn address(&self) -> Option<&Address> {
        self.address.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn selected_id(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn selected_message(&self) -> Option<&Message> {
        self.selected.as_deref().and_then(|id| self.message(id))
    }

    pub fn unread_count(&self) -> usize {
        self.messages.iter().filter(|m| !m.read).count()
    }

    pub fn unread_messages(&self) -> Vec<&Message> {
        self.messages.iter().filter(|m| !m.read).collect()
    }

    pub fn search(&self, query: &str) -> Vec<&Message> {
        message::search(&self.messages, query)
    }

    pub fn mutation_state(&self, id: &str) -> MutationState {
        match self.pending.get(id) {
            Some(PendingMutation::Read { .. }) => MutationState::Pending,
            Some(PendingMutation::Removal { .. }) => MutationState::PendingRemoval,
            None => MutationState::Synced,
        }
    }

    fn position(&self, id: &str) -> Option<usize> {
        self.messages.iter().position(|m| m.id == id)
    }

    /// Starts a fetch for the active address, or `None` when there is none
    pub fn begin_fetch(&mut self) -> Option<FetchTicket> {
        let address = self.address.clone()?;
        self.issued_seq += 1;
        crate::debug_log!("mailbox: fetch #{} issued for {}", self.issued_seq, address.email);

        Some(FetchTicket {
            seq: self.issued_seq,
            generation: self.generation,
            address,
        })
    }

    /// Replaces the collection with a fetch result.
    ///
    /// Discards the result when the address changed since the ticket was
    /// issued, or when a newer fetch has already been applied. In-flight
    /// mutations are laid back on top so a poll never undoes them.
    pub fn apply_fetch(&mut self, ticket: &FetchTicket, fetched: Vec<Message>) -> bool {
        if ticket.generation != self.generation {
            crate::debug_log!("mailbox: fetch #{} discarded, address changed", ticket.seq);
            return false;
        }
        if ticket.seq <= self.applied_seq {
            crate::debug_log!(
                "mailbox: fetch #{} discarded, #{} already applied",
                ticket.seq,
                self.applied_seq
            );
            return false;
        }

        self.applied_seq = ticket.seq;
        self.messages = fetched
            .into_iter()
            .filter(|m| !self.deleted.contains(&m.id))
            .filter_map(|mut m| match self.pending.get(&m.id) {
                Some(PendingMutation::Removal { .. }) => None,
                Some(PendingMutation::Read { target, .. }) => {
                    m.read = *target;
                    Some(m)
                }
                None => {
                    if let Some(confirmed) = self.confirmed_reads.get(&m.id)
                        && ticket.seq <= confirmed.issued_seq
                    {
                        m.read = confirmed.target;
                    }
                    Some(m)
                }
            })
            .collect();

        // Confirmations that predate this fetch are already reflected in it
        self.confirmed_reads
            .retain(|_, confirmed| ticket.seq <= confirmed.issued_seq);

        // The selected message is gone from the gateway
        if let Some(id) = self.selected.clone()
            && self.position(&id).is_none()
        {
            self.selected = None;
        }

        crate::debug_log!(
            "mailbox: fetch #{} applied, {} message(s)",
            ticket.seq,
            self.messages.len()
        );
        true
    }

    /// Selects a message, returning whether it was unread
    pub fn select(&mut self, id: &str) -> Result<bool> {
        let message = self.message(id).ok_or_else(|| GatewayError::not_found(id))?;
        let unread = !message.read;
        self.selected = Some(id.to_string());
        Ok(unread)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Applies a read-flag change locally. `target: None` flips the flag.
    pub fn begin_read(&mut self, id: &str, target: Option<bool>) -> Result<ReadStep> {
        let generation = self.generation;
        let message = self
            .messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| GatewayError::not_found(id))?;

        let original = message.read;
        let target = target.unwrap_or(!original);
        if original == target {
            return Ok(ReadStep::Unchanged(original));
        }

        message.read = target;
        self.pending
            .insert(id.to_string(), PendingMutation::Read { original, target });

        Ok(ReadStep::Started(ReadTicket {
            generation,
            id: id.to_string(),
            original,
            target,
        }))
    }

    /// Confirms or reverts a read-flag change
    pub fn settle_read(&mut self, ticket: &ReadTicket, confirmed: bool) {
        if !self.is_current(ticket.generation) {
            return;
        }

        self.pending.remove(&ticket.id);
        if confirmed {
            self.confirmed_reads.insert(
                ticket.id.clone(),
                ConfirmedRead {
                    target: ticket.target,
                    issued_seq: self.issued_seq,
                },
            );
            return;
        }
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == ticket.id) {
            crate::debug_log!("mailbox: {} read flag reverted to {}", ticket.id, ticket.original);
            message.read = ticket.original;
        }
    }

    /// Removes a message locally, clearing the selection if it pointed there
    pub fn begin_removal(&mut self, id: &str) -> Result<RemovalTicket> {
        let index = self.position(id).ok_or_else(|| GatewayError::not_found(id))?;
        let message = self.messages.remove(index);

        let was_selected = self.selected.as_deref() == Some(id);
        if was_selected {
            self.selected = None;
        }

        self.pending.insert(
            id.to_string(),
            PendingMutation::Removal {
                message,
                index,
                was_selected,
            },
        );

        Ok(RemovalTicket {
            generation: self.generation,
            id: id.to_string(),
        })
    }

    /// Confirms a removal, or puts the message back exactly once.
    /// The selection is restored only if nothing else was selected meanwhile.
    pub fn settle_removal(&mut self, ticket: &RemovalTicket, confirmed: bool) {
        if !self.is_current(ticket.generation) {
            return;
        }

        let Some(PendingMutation::Removal {
            message,
            index,
            was_selected,
        }) = self.pending.remove(&ticket.id)
        else {
            return;
        };

        if confirmed {
            self.deleted.insert(ticket.id.clone());
            return;
        }

        crate::debug_log!("mailbox: {} reinserted after failed removal", ticket.id);
        if self.position(&ticket.id).is_none() {
            let index = index.min(self.messages.len());
            self.messages.insert(index, message);
        }
        if was_selected && self.selected.is_none() {
            self.selected = Some(ticket.id.clone());
        }
    }
}

/// Shared handle to the mailbox state.
///
/// Every lock first catches up with the registry's address signal, so no
/// writer can act on a collection that belongs to a replaced address.
#[derive(Debug, Clone)]
pub struct Mailbox {
    state: Arc<Mutex<MailboxState>>,
    slot: watch::Receiver<AddressSlot>,
}

impl Mailbox {
    pub fn new(slot: watch::Receiver<AddressSlot>) -> Self {
        let mut state = MailboxState::new();
        state.follow(&slot.borrow());
        Self {
            state: Arc::new(Mutex::new(state)),
            slot,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, MailboxState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.follow(&self.slot.borrow());
        state
    }

    pub fn address(&self) -> Option<Address> {
        self.lock().address().cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.lock().messages().to_vec()
    }

    pub fn selection(&self) -> Option<Message> {
        self.lock().selected_message().cloned()
    }

    pub fn unread_count(&self) -> usize {
        self.lock().unread_count()
    }

    pub fn unread_messages(&self) -> Vec<Message> {
        self.lock().unread_messages().into_iter().cloned().collect()
    }

    pub fn search(&self, query: &str) -> Vec<Message> {
        self.lock().search(query).into_iter().cloned().collect()
    }

    pub fn mutation_state(&self, id: &str) -> MutationState {
        self.lock().mutation_state(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageBuilder;

    fn msg(id: &str, read: bool) -> Message {
        MessageBuilder::new()
            .id(id)
            .from(format!("sender{id}@example.com"))
            .subject(format!("Subject {id}"))
            .read(read)
            .build()
    }

    fn slot(generation: u64, email: &str) -> AddressSlot {
        AddressSlot {
            generation,
            address: Some(Address::new(email)),
        }
    }

    fn ids(state: &MailboxState) -> Vec<&str> {
        state.messages().iter().map(|m| m.id.as_str()).collect()
    }

    /// State following `a@tempmail.io` with messages 1..=3 applied
    fn loaded_state() -> MailboxState {
        let mut state = MailboxState::new();
        state.follow(&slot(1, "a@tempmail.io"));
        let ticket = state.begin_fetch().unwrap();
        assert!(state.apply_fetch(
            &ticket,
            vec![msg("1", false), msg("2", true), msg("3", false)]
        ));
        state
    }

    #[test]
    fn test_default_state() {
        let state = MailboxState::new();
        assert!(state.address().is_none());
        assert!(state.messages().is_empty());
        assert!(state.selected_id().is_none());
        assert_eq!(state.unread_count(), 0);
    }

    #[test]
    fn test_no_fetch_without_address() {
        let mut state = MailboxState::new();
        assert!(state.begin_fetch().is_none());
    }

    #[test]
    fn test_apply_fetch_keeps_gateway_order() {
        let mut state = MailboxState::new();
        state.follow(&slot(1, "a@tempmail.io"));
        let ticket = state.begin_fetch().unwrap();
        state.apply_fetch(&ticket, vec![msg("9", false), msg("2", false), msg("5", false)]);
        assert_eq!(ids(&state), vec!["9", "2", "5"]);
    }

    #[test]
    fn test_older_fetch_is_discarded_after_newer_applied() {
        let mut state = MailboxState::new();
        state.follow(&slot(1, "a@tempmail.io"));

        let first = state.begin_fetch().unwrap();
        let second = state.begin_fetch().unwrap();

        assert!(state.apply_fetch(&second, vec![msg("new", false)]));
        assert!(!state.apply_fetch(&first, vec![msg("old", false)]));
        assert_eq!(ids(&state), vec!["new"]);
    }

    #[test]
    fn test_fetch_from_previous_generation_is_discarded() {
        let mut state = MailboxState::new();
        state.follow(&slot(1, "x@tempmail.io"));
        let stale = state.begin_fetch().unwrap();

        state.follow(&slot(2, "y@tempmail.io"));

        assert!(!state.apply_fetch(&stale, vec![msg("x1", false)]));
        assert!(state.messages().is_empty());
    }

    #[test]
    fn test_follow_new_generation_clears_everything() {
        let mut state = loaded_state();
        state.select("1").unwrap();

        state.follow(&slot(2, "a@tempmail.io"));

        assert!(state.messages().is_empty());
        assert!(state.selected_id().is_none());
        assert_eq!(state.generation(), 2);
    }

    #[test]
    fn test_follow_same_generation_is_noop() {
        let mut state = loaded_state();
        state.follow(&slot(1, "a@tempmail.io"));
        assert_eq!(state.messages().len(), 3);
    }

    #[test]
    fn test_select_reports_unread() {
        let mut state = loaded_state();
        assert!(state.select("1").unwrap());
        assert!(!state.select("2").unwrap());
        assert_eq!(state.selected_id(), Some("2"));
    }

    #[test]
    fn test_select_unknown_is_not_found() {
        let mut state = loaded_state();
        let err = state.select("404").unwrap_err();
        assert_eq!(err.status, 404);
        assert!(state.selected_id().is_none());
    }

    #[test]
    fn test_toggle_then_revert_restores_flag() {
        let mut state = loaded_state();

        let ReadStep::Started(ticket) = state.begin_read("1", None).unwrap() else {
            panic!("toggle must always start");
        };
        assert!(state.message("1").unwrap().read);
        assert_eq!(state.mutation_state("1"), MutationState::Pending);

        state.settle_read(&ticket, false);

        assert!(!state.message("1").unwrap().read);
        assert_eq!(state.mutation_state("1"), MutationState::Synced);
    }

    #[test]
    fn test_confirmed_read_keeps_new_value() {
        let mut state = loaded_state();
        let ReadStep::Started(ticket) = state.begin_read("2", None).unwrap() else {
            panic!("toggle must always start");
        };
        state.settle_read(&ticket, true);
        assert!(!state.message("2").unwrap().read);
    }

    #[test]
    fn test_mark_read_on_read_message_is_unchanged() {
        let mut state = loaded_state();
        assert_eq!(
            state.begin_read("2", Some(true)).unwrap(),
            ReadStep::Unchanged(true)
        );
        assert_eq!(state.mutation_state("2"), MutationState::Synced);
    }

    #[test]
    fn test_pending_read_survives_poll() {
        let mut state = loaded_state();
        state.begin_read("1", Some(true)).unwrap();

        let ticket = state.begin_fetch().unwrap();
        state.apply_fetch(&ticket, vec![msg("1", false), msg("2", true), msg("3", false)]);

        assert!(state.message("1").unwrap().read);
        assert_eq!(state.unread_count(), 1);
    }

    #[test]
    fn test_poll_issued_before_read_confirmation_keeps_confirmed_flag() {
        let mut state = loaded_state();
        let Ok(ReadStep::Started(read)) = state.begin_read("1", None) else {
            panic!("expected the toggle to start");
        };

        let early = state.begin_fetch().unwrap();
        state.settle_read(&read, true);
        assert!(state.apply_fetch(&early, vec![msg("1", false), msg("2", true), msg("3", false)]));

        assert!(state.message("1").unwrap().read);
        assert_eq!(state.mutation_state("1"), MutationState::Synced);

        // A fetch issued after confirmation is trusted as-is
        let late = state.begin_fetch().unwrap();
        state.apply_fetch(&late, vec![msg("1", false), msg("2", true), msg("3", false)]);
        assert!(!state.message("1").unwrap().read);
    }

    #[test]
    fn test_removal_clears_selection_and_rollback_restores_it() {
        let mut state = loaded_state();
        state.select("2").unwrap();

        let ticket = state.begin_removal("2").unwrap();
        assert_eq!(ids(&state), vec!["1", "3"]);
        assert!(state.selected_id().is_none());
        assert_eq!(state.mutation_state("2"), MutationState::PendingRemoval);

        state.settle_removal(&ticket, false);

        assert_eq!(ids(&state), vec!["1", "2", "3"]);
        assert_eq!(state.selected_id(), Some("2"));
        assert_eq!(state.mutation_state("2"), MutationState::Synced);
    }

    #[test]
    fn test_removal_rollback_does_not_duplicate() {
        let mut state = loaded_state();
        let ticket = state.begin_removal("3").unwrap();

        // A poll lands while the delete is in flight; the message stays hidden
        let fetch = state.begin_fetch().unwrap();
        state.apply_fetch(&fetch, vec![msg("1", false), msg("2", true), msg("3", false)]);
        assert_eq!(ids(&state), vec!["1", "2"]);

        state.settle_removal(&ticket, false);

        let count = state.messages().iter().filter(|m| m.id == "3").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_rollback_keeps_newer_selection() {
        let mut state = loaded_state();
        state.select("1").unwrap();
        let ticket = state.begin_removal("1").unwrap();

        state.select("3").unwrap();
        state.settle_removal(&ticket, false);

        assert_eq!(state.selected_id(), Some("3"));
    }

    #[test]
    fn test_confirmed_removal_hides_message_from_later_fetch() {
        let mut state = loaded_state();
        let ticket = state.begin_removal("1").unwrap();
        state.settle_removal(&ticket, true);

        // Fetch issued before the server committed the delete
        let fetch = state.begin_fetch().unwrap();
        state.apply_fetch(&fetch, vec![msg("1", false), msg("2", true)]);

        assert_eq!(ids(&state), vec!["2"]);
    }

    #[test]
    fn test_settle_from_previous_generation_is_ignored() {
        let mut state = loaded_state();
        state.select("1").unwrap();
        let ticket = state.begin_removal("1").unwrap();

        state.follow(&slot(2, "b@tempmail.io"));
        state.settle_removal(&ticket, false);

        assert!(state.messages().is_empty());
        assert!(state.selected_id().is_none());
    }

    #[test]
    fn test_fetch_drops_selection_of_vanished_message() {
        let mut state = loaded_state();
        state.select("3").unwrap();

        let ticket = state.begin_fetch().unwrap();
        state.apply_fetch(&ticket, vec![msg("1", false)]);

        assert!(state.selected_id().is_none());
    }

    #[test]
    fn test_unread_messages_and_search() {
        let state = loaded_state();
        let unread: Vec<&str> = state.unread_messages().iter().map(|m| m.id.as_str()).collect();
        assert_eq!(unread, vec!["1", "3"]);
        assert_eq!(state.search("subject 2").len(), 1);
    }

    #[test]
    fn test_mailbox_handle_follows_signal() {
        let (tx, rx) = watch::channel(slot(1, "a@tempmail.io"));
        let mailbox = Mailbox::new(rx);

        {
            let mut state = mailbox.lock();
            let ticket = state.begin_fetch().unwrap();
            state.apply_fetch(&ticket, vec![msg("1", false)]);
        }
        assert_eq!(mailbox.messages().len(), 1);

        tx.send_replace(slot(2, "b@tempmail.io"));

        assert!(mailbox.messages().is_empty());
        assert_eq!(mailbox.address().map(|a| a.email), Some("b@tempmail.io".to_string()));
    }
}
