//! Per-slot reconciliation of local edits against the remote stream.
//!
//! A [`BufferedSlot`] keeps two views of one document id: `remote`, the last
//! state confirmed by the transport, and `view`, the optimistic state with
//! every local edit applied on top. Local edits move through three stages:
//! the uncommitted `buffer`, the in-flight `pending` transaction, and the
//! accepted-but-unconfirmed `submitted` queue. A slot is *consistent* when
//! all three are empty and no incoming mutation is waiting.
//!
//! Whenever the remote base moves under local edits, the slot rebases: the
//! staged edits are re-applied leniently against the new base, and
//! operations whose anchors vanished are dropped and reported individually.

use std::collections::VecDeque;

use editstore_patch::{Patch, PatchDiagnostic};

use crate::document::Document;
use crate::mutation::{Mutation, MutationEffect, Transaction};

/// Unapplied incoming mutations beyond this depth indicate a broken revision
/// chain in the stream.
const MAX_INCOMING_DEPTH: usize = 100;

/// Observable slot transition, emitted in occurrence order.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    /// The optimistic view changed.
    ViewChanged,
    /// The confirmed remote state was replaced wholesale.
    RemoteSnapshot,
    /// Local edits were re-applied against a newer remote base; `dropped`
    /// names each operation that no longer applied.
    Rebased { dropped: Vec<PatchDiagnostic> },
    /// The slot entered (`true`) or left (`false`) the consistent state.
    ConsistencyChanged(bool),
}

#[derive(Debug)]
pub struct BufferedSlot {
    pub document_id: String,
    /// Last transport-confirmed state. `None` until the first snapshot, or
    /// when the document does not exist.
    remote: Option<Document>,
    /// Whether any snapshot has arrived yet.
    remote_known: bool,
    /// Optimistic view: `remote` with all staged edits applied.
    view: Option<Document>,
    /// Remote mutations whose `previous_rev` does not yet match `remote`.
    incoming: Vec<Mutation>,
    /// Local edits not yet part of any transaction.
    buffer: Vec<MutationEffect>,
    /// Edits drained into an in-flight transaction awaiting a submit result.
    pending: VecDeque<Mutation>,
    /// Edits the transport accepted, awaiting stream confirmation.
    submitted: VecDeque<Mutation>,
    /// Operations dropped by rebases since the last `take_diagnostics`.
    diagnostics: Vec<PatchDiagnostic>,
    consistent: bool,
}

impl BufferedSlot {
    pub fn new(document_id: impl Into<String>) -> Self {
        BufferedSlot {
            document_id: document_id.into(),
            remote: None,
            remote_known: false,
            view: None,
            incoming: Vec::new(),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            submitted: VecDeque::new(),
            diagnostics: Vec::new(),
            consistent: true,
        }
    }

    /// The optimistic local view.
    pub fn view(&self) -> Option<&Document> {
        self.view.as_ref()
    }

    /// The last transport-confirmed state.
    pub fn remote(&self) -> Option<&Document> {
        self.remote.as_ref()
    }

    /// Whether the first snapshot has arrived.
    pub fn is_ready(&self) -> bool {
        self.remote_known
    }

    pub fn is_consistent(&self) -> bool {
        self.consistent
    }

    /// Whether any local edit is staged, in flight, or unconfirmed.
    pub fn has_local_edits(&self) -> bool {
        !self.buffer.is_empty() || !self.pending.is_empty() || !self.submitted.is_empty()
    }

    /// Whether any uncommitted edit is waiting for the next commit.
    pub fn has_uncommitted_edits(&self) -> bool {
        !self.buffer.is_empty()
    }

    pub fn take_diagnostics(&mut self) -> Vec<PatchDiagnostic> {
        std::mem::take(&mut self.diagnostics)
    }

    /// Replace the confirmed base with a full snapshot. Staged local edits
    /// survive by rebasing onto the new base; the incoming queue is
    /// superseded.
    pub fn reset_snapshot(&mut self, document: Option<Document>) -> Vec<SlotEvent> {
        log::debug!(
            "{}: snapshot (exists: {})",
            self.document_id,
            document.is_some()
        );
        self.remote = document;
        self.remote_known = true;
        self.incoming.clear();
        let mut events = vec![SlotEvent::RemoteSnapshot];
        events.extend(self.rebase());
        events.extend(self.refresh_consistency());
        events
    }

    /// Stage one local edit. Applies optimistically to the view at once.
    pub fn stage(&mut self, effect: MutationEffect) -> Vec<SlotEvent> {
        let (next, dropped) = effect.apply_lenient(self.view.take(), &self.document_id);
        self.view = next;
        self.diagnostics.extend(dropped);
        self.buffer.push(effect);
        let mut events = vec![SlotEvent::ViewChanged];
        events.extend(self.refresh_consistency());
        events
    }

    /// Discard all uncommitted edits and recompute the view from the
    /// confirmed base plus in-flight edits only.
    pub fn discard_uncommitted(&mut self) -> Vec<SlotEvent> {
        if self.buffer.is_empty() {
            return Vec::new();
        }
        self.buffer.clear();
        let mut events = self.rebase();
        events.extend(self.refresh_consistency());
        events
    }

    /// A mutation arrived on the remote stream. Applies it to the confirmed
    /// base when the revision chain allows, otherwise queues it; drains the
    /// queue as far as the chain reaches.
    pub fn arrive(&mut self, mutation: Mutation) -> Vec<SlotEvent> {
        self.incoming.push(mutation);
        // Stream errors aside, the queue drains fully in chain order. A
        // persistently stuck queue means the stream skipped a revision.
        if self.incoming.len() > MAX_INCOMING_DEPTH {
            log::error!(
                "{}: {} unapplied incoming mutations, revision chain is broken",
                self.document_id,
                self.incoming.len()
            );
        }
        let mut progressed = false;
        let mut needs_rebase = false;
        loop {
            let Some(pos) = self.incoming.iter().position(|m| self.chain_matches(m)) else {
                break;
            };
            let mutation = self.incoming.remove(pos);
            needs_rebase |= self.apply_incoming(&mutation);
            progressed = true;
        }
        let mut events = Vec::new();
        if progressed {
            if needs_rebase {
                events.extend(self.rebase());
            } else {
                // Confirmations of our own front-of-queue edits leave the
                // view untouched; only the confirmed base advanced.
                self.refresh_view_rev();
            }
            events.extend(self.refresh_consistency());
        }
        events
    }

    /// Drain the uncommitted buffer into a mutation for `transaction_id`.
    /// Returns `None` when there is nothing to commit.
    pub fn begin_commit(&mut self, transaction_id: &str) -> Option<Mutation> {
        if self.buffer.is_empty() {
            return None;
        }
        let effects = std::mem::take(&mut self.buffer);
        let mutation = Mutation::local(transaction_id, self.document_id.clone(), effects);
        self.pending.push_back(mutation.clone());
        Some(mutation)
    }

    /// The in-flight transaction was accepted by the transport. Its
    /// mutations move to `submitted` until the stream confirms them.
    pub fn submit_succeeded(&mut self, transaction_id: &str) -> Vec<SlotEvent> {
        let mut moved = false;
        while self
            .pending
            .front()
            .is_some_and(|m| m.transaction_id == transaction_id)
        {
            if let Some(mutation) = self.pending.pop_front() {
                self.submitted.push_back(mutation);
                moved = true;
            }
        }
        if !moved && !self.pending.is_empty() {
            log::warn!(
                "{}: submit result for unknown transaction {transaction_id}",
                self.document_id
            );
        }
        self.refresh_consistency()
    }

    /// The in-flight transaction failed terminally (conflict or retries
    /// exhausted). Its effects return to the front of the uncommitted
    /// buffer so nothing is lost and a later commit retries them.
    pub fn submit_failed(&mut self, transaction_id: &str) -> Vec<SlotEvent> {
        let mut restored = Vec::new();
        self.pending.retain(|mutation| {
            if mutation.transaction_id == transaction_id {
                restored.push(mutation.clone());
                false
            } else {
                true
            }
        });
        for mutation in restored.into_iter().rev() {
            for effect in mutation.effects.into_iter().rev() {
                self.buffer.insert(0, effect);
            }
        }
        let mut events = self.rebase();
        events.extend(self.refresh_consistency());
        events
    }

    /// The committer regenerated the transaction id after a duplicate-id
    /// rejection; keep the in-flight queue in step.
    pub fn retarget_transaction(&mut self, old_id: &str, new_id: &str) {
        for mutation in &mut self.pending {
            if mutation.transaction_id == old_id {
                mutation.transaction_id = new_id.to_owned();
            }
        }
    }

    fn chain_matches(&self, mutation: &Mutation) -> bool {
        match &self.remote {
            Some(doc) => match (&mutation.previous_rev, &doc.rev) {
                (Some(prev), Some(rev)) => prev == rev,
                // Local echoes and chains on un-revisioned bases apply
                // immediately.
                _ => true,
            },
            None => mutation.applies_to_missing_document() || mutation.previous_rev.is_none(),
        }
    }

    /// Apply one chain-ready incoming mutation to the confirmed base.
    /// Returns whether the view must be rebased (true unless the mutation
    /// confirms our own oldest unconfirmed edits, whose outcome the view
    /// already shows).
    fn apply_incoming(&mut self, mutation: &Mutation) -> bool {
        let (next, dropped) = mutation.apply(self.remote.as_ref());
        self.remote = next;
        if !dropped.is_empty() {
            log::debug!(
                "{}: incoming transaction {} dropped {} operation(s) against the confirmed base",
                self.document_id,
                mutation.transaction_id,
                dropped.len()
            );
        }

        let own_front = self
            .submitted
            .front()
            .or_else(|| self.pending.front())
            .is_some_and(|m| m.transaction_id == mutation.transaction_id);
        if own_front {
            // In-order confirmation: pop our copy, no rebase needed.
            if self
                .submitted
                .front()
                .is_some_and(|m| m.transaction_id == mutation.transaction_id)
            {
                self.submitted.pop_front();
            } else {
                self.pending.pop_front();
            }
            return false;
        }

        let ours = self.scrub_own(&mutation.transaction_id);
        if ours {
            // Out-of-order confirmation of our own edit: the unconfirmed
            // queues no longer mirror the upstream order.
            log::debug!(
                "{}: out-of-order confirmation of transaction {}",
                self.document_id,
                mutation.transaction_id
            );
        }
        true
    }

    /// Remove every queued copy of `transaction_id`. Returns whether any
    /// was found.
    fn scrub_own(&mut self, transaction_id: &str) -> bool {
        let before = self.submitted.len() + self.pending.len();
        self.submitted
            .retain(|m| m.transaction_id != transaction_id);
        self.pending.retain(|m| m.transaction_id != transaction_id);
        before != self.submitted.len() + self.pending.len()
    }

    /// Recompute the view: confirmed base, then submitted, pending, and
    /// uncommitted edits in order. In-flight edits apply leniently; the
    /// uncommitted buffer is additionally pruned, so an operation whose
    /// anchor vanished never reaches a later commit.
    fn rebase(&mut self) -> Vec<SlotEvent> {
        let mut doc = self.remote.clone();
        let mut dropped = Vec::new();
        for mutation in self.submitted.iter().chain(self.pending.iter()) {
            for effect in &mutation.effects {
                let (next, mut diags) = effect.apply_lenient(doc, &self.document_id);
                doc = next;
                dropped.append(&mut diags);
            }
        }
        for effect in std::mem::take(&mut self.buffer) {
            match effect {
                MutationEffect::Patch(patch) => {
                    let mut kept = Vec::new();
                    match &mut doc {
                        Some(document) => {
                            for op in patch.ops {
                                match editstore_patch::apply_op(&mut document.value, &op) {
                                    Ok(()) => kept.push(op),
                                    Err(error) => dropped.push(PatchDiagnostic {
                                        path: op.path().clone(),
                                        verb: op.verb(),
                                        error,
                                    }),
                                }
                            }
                        }
                        // No document yet; the ops stay buffered as no-ops.
                        None => kept = patch.ops,
                    }
                    if !kept.is_empty() {
                        self.buffer.push(MutationEffect::Patch(Patch::new(kept)));
                    }
                }
                other => {
                    let (next, mut diags) = other.apply_lenient(doc, &self.document_id);
                    doc = next;
                    dropped.append(&mut diags);
                    self.buffer.push(other);
                }
            }
        }
        self.refresh_base_rev(&mut doc);
        self.view = doc;
        self.diagnostics.extend(dropped.iter().cloned());
        let mut events = Vec::new();
        if !dropped.is_empty() {
            events.push(SlotEvent::Rebased { dropped });
        }
        events.push(SlotEvent::ViewChanged);
        events
    }

    fn refresh_base_rev(&self, doc: &mut Option<Document>) {
        if let (Some(view), Some(remote)) = (doc, &self.remote) {
            view.rev = remote.rev.clone();
        }
    }

    fn refresh_view_rev(&mut self) {
        if let (Some(view), Some(remote)) = (&mut self.view, &self.remote) {
            view.rev = remote.rev.clone();
        } else if self.view.is_some() && self.remote.is_none() && !self.has_local_edits() {
            // Our delete was confirmed.
            self.view = None;
        }
    }

    fn refresh_consistency(&mut self) -> Vec<SlotEvent> {
        let now = !self.has_local_edits() && self.incoming.is_empty();
        if now != self.consistent {
            self.consistent = now;
            vec![SlotEvent::ConsistencyChanged(now)]
        } else {
            Vec::new()
        }
    }
}

/// Build one transaction from the uncommitted buffers of several slots.
/// Slots with nothing staged contribute nothing.
pub fn begin_transaction(slots: &mut [&mut BufferedSlot]) -> Option<Transaction> {
    let id = crate::mutation::generate_transaction_id();
    let mutations: Vec<Mutation> = slots
        .iter_mut()
        .filter_map(|slot| slot.begin_commit(&id))
        .collect();
    if mutations.is_empty() {
        None
    } else {
        Some(Transaction::new(id, mutations))
    }
}
