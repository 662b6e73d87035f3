//! Transport and schema collaborator seams.
//!
//! The engine never talks to a network itself: a [`Transport`]
//! implementation is injected into the store, delivers remote events through
//! [`crate::store::DocumentStore::deliver`], and accepts transaction
//! submissions. Everything here is a black box from the engine's point of
//! view.

use serde_json::Value;
use thiserror::Error;

use crate::document::{Document, Revision};
use crate::mutation::{Mutation, Transaction};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    #[error("network failure: {0}")]
    Network(String),
    #[error("not found: {0}")]
    NotFound(String),
}

/// An event from the per-document remote stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenerEvent {
    /// Full state of a document (`None` when it does not exist). Sent on
    /// initial attach and on resync after a gap.
    Snapshot {
        document_id: String,
        document: Option<Document>,
    },
    /// A mutation already applied upstream.
    Mutation(Mutation),
    /// The stream for one document failed. The sibling slot's stream is
    /// unaffected.
    Error {
        document_id: String,
        message: String,
    },
}

/// Outcome of a transaction submission.
#[derive(Debug, Clone, PartialEq)]
pub enum SubmitResult {
    /// Accepted; the confirming mutation will arrive on the remote stream.
    Success,
    /// Rejected because of a revision mismatch. Caller decides whether to
    /// rebase-and-retry or discard.
    Conflict { message: String },
    /// Rejected because the transaction id is already known upstream. The
    /// committer retries with a fresh id.
    DuplicateTransactionId,
    /// Delivery failed; safe to retry with the same id.
    NetworkError { message: String },
}

/// The injected transport collaborator.
pub trait Transport {
    /// Start delivering remote events for `document_id`. Called once per id
    /// however many consumers check the pair out (see the registry).
    fn attach(&mut self, document_id: &str);

    /// Stop delivering remote events for `document_id`.
    fn detach(&mut self, document_id: &str);

    /// Submit a transaction for durable commit. Idempotent per transaction
    /// id: redelivery of an id the server has already applied must not apply
    /// it twice.
    fn submit(&mut self, transaction: &Transaction) -> SubmitResult;

    /// Fetch the content of a past revision, for restore.
    fn fetch_revision(&mut self, document_id: &str, rev: &Revision)
        -> Result<Value, TransportError>;
}

/// The injected schema collaborator. Live-edit types have no draft slot;
/// edits apply directly to the published document.
pub trait SchemaLookup {
    fn is_live_edit_enabled(&self, type_name: &str) -> bool;
}

/// Blanket helper so tests and embedders can pass plain closures.
impl<F> SchemaLookup for F
where
    F: Fn(&str) -> bool,
{
    fn is_live_edit_enabled(&self, type_name: &str) -> bool {
        self(type_name)
    }
}
