//! Ref-counted registry of checked-out document pairs.
//!
//! The registry owns every live [`DocumentPair`]. The first checkout of a
//! pair attaches both of its ids on the transport; the last release
//! detaches them. Intermediate checkouts only bump the count, so several
//! consumers share one upstream connection and one reconciliation state.

use std::collections::HashMap;

use thiserror::Error;

use crate::buffer::BufferedSlot;
use crate::document::{DocumentSlot, IdPair};
use crate::transport::Transport;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum RegistryError {
    #[error("pair {0} is not checked out")]
    NotCheckedOut(String),
}

/// Shared reconciliation state for one draft/published pair.
#[derive(Debug)]
pub struct DocumentPair {
    pub id_pair: IdPair,
    pub type_name: String,
    pub live_edit: bool,
    pub draft: BufferedSlot,
    pub published: BufferedSlot,
    /// Latest validation signal from the consumer layer. Gates publish.
    pub validation_passed: bool,
}

impl DocumentPair {
    fn new(id_pair: IdPair, type_name: String, live_edit: bool) -> Self {
        let draft = BufferedSlot::new(id_pair.draft_id.clone());
        let published = BufferedSlot::new(id_pair.published_id.clone());
        DocumentPair {
            id_pair,
            type_name,
            live_edit,
            draft,
            published,
            validation_passed: true,
        }
    }

    pub fn slot(&self, slot: DocumentSlot) -> &BufferedSlot {
        match slot {
            DocumentSlot::Draft => &self.draft,
            DocumentSlot::Published => &self.published,
        }
    }

    pub fn slot_mut(&mut self, slot: DocumentSlot) -> &mut BufferedSlot {
        match slot {
            DocumentSlot::Draft => &mut self.draft,
            DocumentSlot::Published => &mut self.published,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.draft.is_consistent() && self.published.is_consistent()
    }
}

#[derive(Debug)]
struct PairEntry {
    refcount: usize,
    pair: DocumentPair,
}

/// Keyed by published id.
#[derive(Debug, Default)]
pub struct PairRegistry {
    entries: HashMap<String, PairEntry>,
}

impl PairRegistry {
    pub fn new() -> Self {
        PairRegistry::default()
    }

    /// Check the pair out, creating it and attaching its ids on the first
    /// checkout. Returns whether the pair was newly created.
    pub fn checkout<T: Transport>(
        &mut self,
        transport: &mut T,
        id_pair: IdPair,
        type_name: &str,
        live_edit: bool,
    ) -> bool {
        let key = id_pair.published_id.clone();
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.refcount += 1;
            return false;
        }
        log::debug!("attaching pair {key}");
        transport.attach(&id_pair.draft_id);
        transport.attach(&id_pair.published_id);
        let pair = DocumentPair::new(id_pair, type_name.to_owned(), live_edit);
        self.entries.insert(key, PairEntry { refcount: 1, pair });
        true
    }

    /// Drop one checkout. The last release detaches the pair's ids and
    /// discards its state. Returns whether the pair was torn down.
    pub fn release<T: Transport>(&mut self, transport: &mut T, published_id: &str) -> bool {
        let Some(entry) = self.entries.get_mut(published_id) else {
            log::warn!("release of pair {published_id} that is not checked out");
            return false;
        };
        entry.refcount -= 1;
        if entry.refcount > 0 {
            return false;
        }
        if let Some(entry) = self.entries.remove(published_id) {
            log::debug!("detaching pair {published_id}");
            transport.detach(&entry.pair.id_pair.draft_id);
            transport.detach(&entry.pair.id_pair.published_id);
        }
        true
    }

    pub fn get(&self, published_id: &str) -> Result<&DocumentPair, RegistryError> {
        self.entries
            .get(published_id)
            .map(|entry| &entry.pair)
            .ok_or_else(|| RegistryError::NotCheckedOut(published_id.to_owned()))
    }

    pub fn get_mut(&mut self, published_id: &str) -> Result<&mut DocumentPair, RegistryError> {
        self.entries
            .get_mut(published_id)
            .map(|entry| &mut entry.pair)
            .ok_or_else(|| RegistryError::NotCheckedOut(published_id.to_owned()))
    }

    /// Find the pair owning `document_id` (either slot) and the slot it
    /// addresses.
    pub fn pair_for_document(
        &mut self,
        document_id: &str,
    ) -> Option<(&mut DocumentPair, DocumentSlot)> {
        self.entries.values_mut().find_map(|entry| {
            entry
                .pair
                .id_pair
                .slot_of(document_id)
                .map(|slot| (&mut entry.pair, slot))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Transaction;
    use crate::transport::{SubmitResult, TransportError};
    use serde_json::Value;

    #[derive(Default)]
    struct RecordingTransport {
        attached: Vec<String>,
        detached: Vec<String>,
    }

    impl Transport for RecordingTransport {
        fn attach(&mut self, document_id: &str) {
            self.attached.push(document_id.to_owned());
        }
        fn detach(&mut self, document_id: &str) {
            self.detached.push(document_id.to_owned());
        }
        fn submit(&mut self, _transaction: &Transaction) -> SubmitResult {
            SubmitResult::Success
        }
        fn fetch_revision(
            &mut self,
            document_id: &str,
            _rev: &String,
        ) -> Result<Value, TransportError> {
            Err(TransportError::NotFound(document_id.to_owned()))
        }
    }

    #[test]
    fn checkout_attaches_once_release_detaches_last() {
        let mut transport = RecordingTransport::default();
        let mut registry = PairRegistry::new();
        let pair = IdPair::from_published("a");

        assert!(registry.checkout(&mut transport, pair.clone(), "article", false));
        assert!(!registry.checkout(&mut transport, pair, "article", false));
        assert_eq!(transport.attached, vec!["drafts.a", "a"]);

        assert!(!registry.release(&mut transport, "a"));
        assert!(transport.detached.is_empty());
        assert!(registry.release(&mut transport, "a"));
        assert_eq!(transport.detached, vec!["drafts.a", "a"]);
        assert!(registry.get("a").is_err());
    }

    #[test]
    fn pair_for_document_routes_both_slots() {
        let mut transport = RecordingTransport::default();
        let mut registry = PairRegistry::new();
        registry.checkout(&mut transport, IdPair::from_published("a"), "article", false);

        let (_, slot) = registry.pair_for_document("drafts.a").unwrap();
        assert_eq!(slot, DocumentSlot::Draft);
        let (_, slot) = registry.pair_for_document("a").unwrap();
        assert_eq!(slot, DocumentSlot::Published);
        assert!(registry.pair_for_document("other").is_none());
    }

    #[test]
    fn release_of_unknown_pair_is_ignored() {
        let mut transport = RecordingTransport::default();
        let mut registry = PairRegistry::new();
        assert!(!registry.release(&mut transport, "ghost"));
    }
}
