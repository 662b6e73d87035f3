//! The `DocumentStore` facade.
//!
//! Ties the registry, the per-slot reconcilers, the lifecycle operations,
//! and the committer together behind one single-threaded surface. Remote
//! events enter through [`DocumentStore::deliver`]; everything else is a
//! consumer call. Observable state transitions fan out to subscribed
//! listeners.

use std::collections::BTreeMap;

use serde_json::json;
use thiserror::Error;

use editstore_patch::{Patch, PatchDiagnostic};

use crate::buffer::{begin_transaction, SlotEvent};
use crate::commit::{CommitOutcome, Committer};
use crate::document::{Document, DocumentSlot, IdPair, Revision};
use crate::lifecycle::{self, DisabledReason, MutationRequest, PairState};
use crate::mutation::{Mutation, MutationEffect, Transaction};
use crate::registry::{DocumentPair, PairRegistry, RegistryError};
use crate::transport::{ListenerEvent, SchemaLookup, Transport};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("operation disabled: {0}")]
    OperationDisabled(DisabledReason),
    #[error(transparent)]
    Transport(#[from] crate::transport::TransportError),
}

/// Derived view of one pair, for the consumer layer.
#[derive(Debug, Clone, PartialEq)]
pub struct EditState {
    pub published_id: String,
    pub type_name: String,
    pub draft: Option<Document>,
    pub published: Option<Document>,
    pub live_edit: bool,
    /// Both slots have received their first snapshot.
    pub ready: bool,
    /// No local edit is staged, in flight, or unconfirmed on either slot.
    pub consistent: bool,
}

/// Per-operation availability for one pair.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationsStatus {
    pub commit: Option<DisabledReason>,
    pub publish: Option<DisabledReason>,
    pub unpublish: Option<DisabledReason>,
    pub delete: Option<DisabledReason>,
    pub duplicate: Option<DisabledReason>,
    pub restore: Option<DisabledReason>,
}

/// A state transition on one slot of a checked-out pair.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreEvent {
    pub published_id: String,
    pub slot: DocumentSlot,
    pub kind: StoreEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StoreEventKind {
    ViewChanged,
    RemoteSnapshot,
    Rebased { dropped: Vec<PatchDiagnostic> },
    ConsistencyChanged(bool),
    /// The remote stream for this slot failed; the sibling slot keeps
    /// running.
    SlotError { message: String },
}

impl StoreEventKind {
    fn from_slot_event(event: SlotEvent) -> Self {
        match event {
            SlotEvent::ViewChanged => StoreEventKind::ViewChanged,
            SlotEvent::RemoteSnapshot => StoreEventKind::RemoteSnapshot,
            SlotEvent::Rebased { dropped } => StoreEventKind::Rebased { dropped },
            SlotEvent::ConsistencyChanged(now) => StoreEventKind::ConsistencyChanged(now),
        }
    }
}

pub type ListenerKey = u64;

type Listener = Box<dyn FnMut(&StoreEvent)>;

pub struct DocumentStore<T: Transport, S: SchemaLookup> {
    transport: T,
    schema: S,
    registry: PairRegistry,
    committer: Committer,
    listeners: BTreeMap<ListenerKey, Listener>,
    next_listener: ListenerKey,
}

impl<T: Transport, S: SchemaLookup> DocumentStore<T, S> {
    pub fn new(transport: T, schema: S) -> Self {
        DocumentStore {
            transport,
            schema,
            registry: PairRegistry::new(),
            committer: Committer::default(),
            listeners: BTreeMap::new(),
            next_listener: 0,
        }
    }

    pub fn with_committer(transport: T, schema: S, committer: Committer) -> Self {
        DocumentStore {
            committer,
            ..DocumentStore::new(transport, schema)
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // ── Checkout lifecycle ───────────────────────────────────────────────

    /// Check the pair out for editing. Ref-counted: repeat checkouts share
    /// state, and the transport attaches only on the first.
    pub fn checkout(&mut self, published_id: &str, type_name: &str) -> IdPair {
        let id_pair = IdPair::from_published(published_id);
        let live_edit = self.schema.is_live_edit_enabled(type_name);
        self.registry
            .checkout(&mut self.transport, id_pair.clone(), type_name, live_edit);
        id_pair
    }

    /// Drop one checkout; the last one detaches the transport and discards
    /// uncommitted state.
    pub fn release(&mut self, published_id: &str) {
        self.registry.release(&mut self.transport, published_id);
    }

    // ── Listeners ────────────────────────────────────────────────────────

    pub fn subscribe(&mut self, listener: Listener) -> ListenerKey {
        let key = self.next_listener;
        self.next_listener += 1;
        self.listeners.insert(key, listener);
        key
    }

    pub fn unsubscribe(&mut self, key: ListenerKey) {
        self.listeners.remove(&key);
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub fn edit_state(&self, published_id: &str) -> Result<EditState, StoreError> {
        let pair = self.registry.get(published_id)?;
        Ok(EditState {
            published_id: pair.id_pair.published_id.clone(),
            type_name: pair.type_name.clone(),
            draft: pair.draft.view().cloned(),
            published: pair.published.view().cloned(),
            live_edit: pair.live_edit,
            ready: pair.draft.is_ready() && pair.published.is_ready(),
            consistent: pair.is_consistent(),
        })
    }

    pub fn operations(&self, published_id: &str) -> Result<OperationsStatus, StoreError> {
        let pair = self.registry.get(published_id)?;
        let state = pair_state(pair);
        Ok(OperationsStatus {
            commit: lifecycle::commit_disabled(&state),
            publish: lifecycle::publish_disabled(&state),
            unpublish: lifecycle::unpublish_disabled(&state),
            delete: lifecycle::delete_disabled(&state),
            duplicate: lifecycle::duplicate_disabled(&state),
            restore: lifecycle::restore_disabled(&state),
        })
    }

    /// Operations dropped by rebases on either slot since the last call.
    pub fn take_diagnostics(
        &mut self,
        published_id: &str,
    ) -> Result<Vec<(DocumentSlot, PatchDiagnostic)>, StoreError> {
        let pair = self.registry.get_mut(published_id)?;
        let mut out = Vec::new();
        for diag in pair.draft.take_diagnostics() {
            out.push((DocumentSlot::Draft, diag));
        }
        for diag in pair.published.take_diagnostics() {
            out.push((DocumentSlot::Published, diag));
        }
        Ok(out)
    }

    /// Validation signal from the consumer layer; gates publish.
    pub fn set_validation_status(
        &mut self,
        published_id: &str,
        passed: bool,
    ) -> Result<(), StoreError> {
        self.registry.get_mut(published_id)?.validation_passed = passed;
        Ok(())
    }

    // ── Editing ──────────────────────────────────────────────────────────

    /// Append a patch to the local buffer of the pair's edit slot (the
    /// draft, or the published slot for live-edit types). Creates the slot
    /// document on first edit, seeded from the published content when it
    /// exists.
    pub fn patch(&mut self, published_id: &str, patch: Patch) -> Result<(), StoreError> {
        let pair = self.registry.get_mut(published_id)?;
        let slot = lifecycle::edit_target(pair.live_edit);
        let mut events = Vec::new();
        if pair.slot(slot).view().is_none() {
            let document_id = pair.id_pair.id_for(slot).to_owned();
            let seed = match (slot, pair.published.view()) {
                (DocumentSlot::Draft, Some(published)) => {
                    published.with_id(&document_id).value
                }
                _ => json!({"id": document_id, "type": pair.type_name}),
            };
            let slot_events = pair
                .slot_mut(slot)
                .stage(MutationEffect::CreateIfNotExists(seed));
            events.extend(tag(slot, slot_events));
        }
        let slot_events = pair.slot_mut(slot).stage(MutationEffect::Patch(patch));
        events.extend(tag(slot, slot_events));
        self.emit(published_id, events);
        Ok(())
    }

    /// Throw away every uncommitted edit on both slots. In-flight and
    /// unconfirmed transactions are unaffected.
    pub fn discard(&mut self, published_id: &str) -> Result<(), StoreError> {
        let pair = self.registry.get_mut(published_id)?;
        let mut events = tag(DocumentSlot::Draft, pair.draft.discard_uncommitted());
        events.extend(tag(
            DocumentSlot::Published,
            pair.published.discard_uncommitted(),
        ));
        self.emit(published_id, events);
        Ok(())
    }

    // ── Operations ───────────────────────────────────────────────────────

    /// Submit every uncommitted edit of the pair as one transaction.
    pub fn commit(&mut self, published_id: &str) -> Result<CommitOutcome, StoreError> {
        {
            let pair = self.registry.get_mut(published_id)?;
            let state = pair_state(pair);
            if let Some(reason) = lifecycle::commit_disabled(&state) {
                return Err(StoreError::OperationDisabled(reason));
            }
        }
        self.run_transaction(published_id, Vec::new())
    }

    pub fn publish(&mut self, published_id: &str) -> Result<CommitOutcome, StoreError> {
        let requests = {
            let pair = self.registry.get_mut(published_id)?;
            let state = pair_state(pair);
            if let Some(reason) = lifecycle::publish_disabled(&state) {
                return Err(StoreError::OperationDisabled(reason));
            }
            lifecycle::publish(&state)
        };
        self.run_operation(published_id, requests)
    }

    pub fn unpublish(&mut self, published_id: &str) -> Result<CommitOutcome, StoreError> {
        let requests = {
            let pair = self.registry.get_mut(published_id)?;
            let state = pair_state(pair);
            if let Some(reason) = lifecycle::unpublish_disabled(&state) {
                return Err(StoreError::OperationDisabled(reason));
            }
            lifecycle::unpublish(&state)
        };
        self.run_operation(published_id, requests)
    }

    pub fn delete(&mut self, published_id: &str) -> Result<CommitOutcome, StoreError> {
        let requests = {
            let pair = self.registry.get_mut(published_id)?;
            let state = pair_state(pair);
            if let Some(reason) = lifecycle::delete_disabled(&state) {
                return Err(StoreError::OperationDisabled(reason));
            }
            lifecycle::delete(&state)
        };
        self.run_operation(published_id, requests)
    }

    /// Seed a new pair (published id `target_published_id`) from this
    /// pair's content. The target need not be checked out.
    pub fn duplicate(
        &mut self,
        published_id: &str,
        target_published_id: &str,
        transform: Option<&dyn Fn(serde_json::Value) -> serde_json::Value>,
    ) -> Result<CommitOutcome, StoreError> {
        let target = IdPair::from_published(target_published_id);
        let requests = {
            let pair = self.registry.get_mut(published_id)?;
            let state = pair_state(pair);
            if let Some(reason) = lifecycle::duplicate_disabled(&state) {
                return Err(StoreError::OperationDisabled(reason));
            }
            lifecycle::duplicate(&state, &target, transform)
        };
        self.run_operation(published_id, requests)
    }

    /// Replay the content of `rev` into the edit slot.
    pub fn restore(
        &mut self,
        published_id: &str,
        rev: &Revision,
    ) -> Result<CommitOutcome, StoreError> {
        self.registry.get(published_id)?;
        let value = self.transport.fetch_revision(published_id, rev)?;
        let requests = {
            let pair = self.registry.get_mut(published_id)?;
            let state = pair_state(pair);
            lifecycle::restore(&state, value)
        };
        self.run_operation(published_id, requests)
    }

    // ── Remote events ────────────────────────────────────────────────────

    /// Feed one transport event into the owning slot. Events for ids with
    /// no checked-out pair are dropped.
    pub fn deliver(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Snapshot {
                document_id,
                document,
            } => {
                let Some((pair, slot)) = self.registry.pair_for_document(&document_id) else {
                    log::debug!("snapshot for unknown document {document_id}");
                    return;
                };
                let published_id = pair.id_pair.published_id.clone();
                let events = tag(slot, pair.slot_mut(slot).reset_snapshot(document));
                self.emit(&published_id, events);
            }
            ListenerEvent::Mutation(mutation) => {
                let Some((pair, slot)) = self.registry.pair_for_document(&mutation.document_id)
                else {
                    log::debug!("mutation for unknown document {}", mutation.document_id);
                    return;
                };
                let published_id = pair.id_pair.published_id.clone();
                let events = tag(slot, pair.slot_mut(slot).arrive(mutation));
                self.emit(&published_id, events);
            }
            ListenerEvent::Error {
                document_id,
                message,
            } => {
                let Some((pair, slot)) = self.registry.pair_for_document(&document_id) else {
                    log::debug!("stream error for unknown document {document_id}: {message}");
                    return;
                };
                log::warn!("stream error on {document_id}: {message}");
                let published_id = pair.id_pair.published_id.clone();
                self.emit(
                    &published_id,
                    vec![(slot, StoreEventKind::SlotError { message })],
                );
            }
        }
    }

    // ── Internals ────────────────────────────────────────────────────────

    /// Stage an operation's requests and submit them, together with any
    /// already-buffered edits, as one transaction.
    fn run_operation(
        &mut self,
        published_id: &str,
        mut requests: Vec<MutationRequest>,
    ) -> Result<CommitOutcome, StoreError> {
        if requests.is_empty() {
            // The transport must still see a real transaction.
            requests.push(lifecycle::empty_guard(published_id));
        }
        self.run_transaction(published_id, requests)
    }

    fn run_transaction(
        &mut self,
        published_id: &str,
        requests: Vec<MutationRequest>,
    ) -> Result<CommitOutcome, StoreError> {
        let (mut transaction, events) = {
            let pair = self.registry.get_mut(published_id)?;
            let mut events = Vec::new();
            let mut foreign: Vec<MutationRequest> = Vec::new();
            for request in requests {
                match pair.id_pair.slot_of(&request.document_id) {
                    Some(slot) => {
                        let slot_events = pair.slot_mut(slot).stage(request.effect);
                        events.extend(tag(slot, slot_events));
                    }
                    None => foreign.push(request),
                }
            }
            let mut transaction =
                match begin_transaction(&mut [&mut pair.draft, &mut pair.published]) {
                    Some(txn) => txn,
                    None => Transaction::new(crate::mutation::generate_transaction_id(), Vec::new()),
                };
            for request in foreign {
                let mutation = Mutation::local(
                    transaction.id.clone(),
                    request.document_id,
                    vec![request.effect],
                );
                transaction.mutations.push(mutation);
            }
            (transaction, events)
        };
        self.emit(published_id, events);

        let original_id = transaction.id.clone();
        let outcome = self.committer.submit(&mut self.transport, &mut transaction);
        let final_id = transaction.id.clone();

        let events = {
            let pair = self.registry.get_mut(published_id)?;
            if final_id != original_id {
                pair.draft.retarget_transaction(&original_id, &final_id);
                pair.published.retarget_transaction(&original_id, &final_id);
            }
            let mut events = Vec::new();
            match &outcome {
                CommitOutcome::Committed { .. } => {
                    events.extend(tag(DocumentSlot::Draft, pair.draft.submit_succeeded(&final_id)));
                    events.extend(tag(
                        DocumentSlot::Published,
                        pair.published.submit_succeeded(&final_id),
                    ));
                }
                CommitOutcome::Conflict { .. } | CommitOutcome::Failed { .. } => {
                    events.extend(tag(DocumentSlot::Draft, pair.draft.submit_failed(&final_id)));
                    events.extend(tag(
                        DocumentSlot::Published,
                        pair.published.submit_failed(&final_id),
                    ));
                }
            }
            events
        };
        self.emit(published_id, events);
        Ok(outcome)
    }

    fn emit(&mut self, published_id: &str, events: Vec<(DocumentSlot, StoreEventKind)>) {
        for (slot, kind) in events {
            let event = StoreEvent {
                published_id: published_id.to_owned(),
                slot,
                kind,
            };
            for listener in self.listeners.values_mut() {
                listener(&event);
            }
        }
    }
}

fn pair_state(pair: &DocumentPair) -> PairState<'_> {
    PairState {
        id_pair: &pair.id_pair,
        type_name: &pair.type_name,
        draft: pair.draft.view(),
        published: pair.published.view(),
        live_edit: pair.live_edit,
        validation_passed: pair.validation_passed,
        has_uncommitted_edits: pair.draft.has_uncommitted_edits()
            || pair.published.has_uncommitted_edits(),
    }
}

fn tag(slot: DocumentSlot, events: Vec<SlotEvent>) -> Vec<(DocumentSlot, StoreEventKind)> {
    events
        .into_iter()
        .map(|event| (slot, StoreEventKind::from_slot_event(event)))
        .collect()
}
