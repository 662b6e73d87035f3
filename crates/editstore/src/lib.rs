//! Document mutation and consistency engine.
//!
//! Documents live in draft/published pairs. Consumers check a pair out of
//! the [`store::DocumentStore`], stage patches against an optimistic local
//! view, and commit them as transactions; confirmed remote mutations stream
//! back in and the per-slot reconciler rebases unconfirmed local edits on
//! top of them. The transport and schema collaborators are injected traits,
//! so the engine itself is pure state-machine code.
//!
//! Layers, bottom up:
//! - [`document`]: documents, revisions, and the draft/published id pairing.
//! - [`mutation`]: mutations, transactions, and their wire codec.
//! - [`buffer`]: the per-slot reconciler (confirmed base, optimistic view,
//!   pending/submitted queues, rebase).
//! - [`commit`]: transaction submission with bounded retry.
//! - [`lifecycle`]: publish, unpublish, delete, duplicate, restore.
//! - [`registry`]: ref-counted checkout of pairs.
//! - [`store`]: the consumer-facing facade.

pub mod buffer;
pub mod commit;
pub mod document;
pub mod lifecycle;
pub mod mutation;
pub mod registry;
pub mod store;
pub mod transport;

pub use buffer::{BufferedSlot, SlotEvent};
pub use commit::{CommitOutcome, Committer, RetryPolicy};
pub use document::{Document, DocumentSlot, IdPair, Revision, DRAFTS_PREFIX};
pub use lifecycle::{DisabledReason, MutationRequest, PairState};
pub use mutation::{generate_transaction_id, Mutation, MutationEffect, Transaction};
pub use registry::{DocumentPair, PairRegistry, RegistryError};
pub use store::{DocumentStore, EditState, OperationsStatus, StoreError, StoreEvent, StoreEventKind};
pub use transport::{ListenerEvent, SchemaLookup, SubmitResult, Transport, TransportError};

pub use editstore_patch::{
    apply, apply_lenient, InsertPosition, Patch, PatchDiagnostic, PatchError, PatchOp, Path,
    PathStep,
};
