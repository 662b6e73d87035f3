//! Document pair lifecycle operations.
//!
//! Each operation is a pair of pure functions over a [`PairState`]:
//! `disabled` names why the operation cannot run right now, and an execute
//! function turns the state into the mutation requests a commit should
//! carry. Staging and transaction submission belong to the store; nothing
//! here touches a transport.

use serde_json::Value;
use thiserror::Error;

use editstore_patch::{Patch, PatchOp, Path, PathStep};

use crate::document::{Document, DocumentSlot, IdPair};
use crate::mutation::MutationEffect;

/// Target field of the no-op unset emitted when an operation yields no real
/// mutations, so the transaction still reaches the transport.
const EMPTY_GUARD_FIELD: &str = "_empty_action_guard_pseudo_field_";

/// Why an operation is currently unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DisabledReason {
    #[error("no draft to operate on")]
    NoDraft,
    #[error("document is not published")]
    NoPublished,
    #[error("no uncommitted edits")]
    NothingToCommit,
    #[error("draft has unresolved validation errors")]
    ValidationErrors,
    #[error("neither slot has content")]
    NoContent,
    #[error("live-edit documents have no draft to operate on")]
    LiveEditDocument,
}

/// Everything the enablement rules and execute functions read.
#[derive(Debug, Clone, Copy)]
pub struct PairState<'a> {
    pub id_pair: &'a IdPair,
    pub type_name: &'a str,
    pub draft: Option<&'a Document>,
    pub published: Option<&'a Document>,
    /// The type has no draft slot; edits go straight to published.
    pub live_edit: bool,
    pub validation_passed: bool,
    pub has_uncommitted_edits: bool,
}

/// One effect aimed at a slot of the pair (or, for duplicate, of another
/// pair).
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    pub document_id: String,
    pub effect: MutationEffect,
}

impl MutationRequest {
    fn new(document_id: impl Into<String>, effect: MutationEffect) -> Self {
        MutationRequest {
            document_id: document_id.into(),
            effect,
        }
    }
}

/// No-op mutation keeping a transaction non-empty when an operation
/// resolves to zero real requests.
pub fn empty_guard(document_id: &str) -> MutationRequest {
    MutationRequest::new(
        document_id,
        MutationEffect::Patch(Patch::single(PatchOp::Unset {
            path: Path::new(vec![PathStep::Field(EMPTY_GUARD_FIELD.to_owned())]),
        })),
    )
}

pub fn commit_disabled(state: &PairState<'_>) -> Option<DisabledReason> {
    if state.has_uncommitted_edits {
        None
    } else {
        Some(DisabledReason::NothingToCommit)
    }
}

pub fn publish_disabled(state: &PairState<'_>) -> Option<DisabledReason> {
    if state.live_edit {
        Some(DisabledReason::LiveEditDocument)
    } else if state.draft.is_none() {
        Some(DisabledReason::NoDraft)
    } else if !state.validation_passed {
        Some(DisabledReason::ValidationErrors)
    } else {
        None
    }
}

/// Copy the draft into the published slot and drop the draft, as one
/// transaction.
pub fn publish(state: &PairState<'_>) -> Vec<MutationRequest> {
    let Some(draft) = state.draft else {
        return Vec::new();
    };
    let published = draft.with_id(&state.id_pair.published_id);
    vec![
        MutationRequest::new(
            state.id_pair.published_id.clone(),
            MutationEffect::CreateOrReplace(published.value),
        ),
        MutationRequest::new(state.id_pair.draft_id.clone(), MutationEffect::Delete),
    ]
}

pub fn unpublish_disabled(state: &PairState<'_>) -> Option<DisabledReason> {
    if state.live_edit {
        Some(DisabledReason::LiveEditDocument)
    } else if state.published.is_none() {
        Some(DisabledReason::NoPublished)
    } else {
        None
    }
}

/// Remove the published slot, first preserving its content as the draft if
/// no draft exists.
pub fn unpublish(state: &PairState<'_>) -> Vec<MutationRequest> {
    let Some(published) = state.published else {
        return Vec::new();
    };
    let draft = published.with_id(&state.id_pair.draft_id);
    vec![
        MutationRequest::new(
            state.id_pair.draft_id.clone(),
            MutationEffect::CreateIfNotExists(draft.value),
        ),
        MutationRequest::new(state.id_pair.published_id.clone(), MutationEffect::Delete),
    ]
}

pub fn delete_disabled(state: &PairState<'_>) -> Option<DisabledReason> {
    if state.draft.is_none() && state.published.is_none() {
        Some(DisabledReason::NoContent)
    } else {
        None
    }
}

/// Remove whichever slots exist.
pub fn delete(state: &PairState<'_>) -> Vec<MutationRequest> {
    let mut requests = Vec::new();
    if state.published.is_some() {
        requests.push(MutationRequest::new(
            state.id_pair.published_id.clone(),
            MutationEffect::Delete,
        ));
    }
    if state.draft.is_some() {
        requests.push(MutationRequest::new(
            state.id_pair.draft_id.clone(),
            MutationEffect::Delete,
        ));
    }
    requests
}

pub fn duplicate_disabled(state: &PairState<'_>) -> Option<DisabledReason> {
    if state.draft.is_none() && state.published.is_none() {
        Some(DisabledReason::NoContent)
    } else {
        None
    }
}

/// Seed a new pair from this pair's content, draft slot preferred. Live-edit
/// types duplicate into the new published slot since they have no draft.
/// `transform` may rewrite the copied value before it is created.
pub fn duplicate(
    state: &PairState<'_>,
    target: &IdPair,
    transform: Option<&dyn Fn(Value) -> Value>,
) -> Vec<MutationRequest> {
    let Some(source) = state.draft.or(state.published) else {
        return Vec::new();
    };
    let target_id = if state.live_edit {
        &target.published_id
    } else {
        &target.draft_id
    };
    let copy = source.with_id(target_id);
    let value = match transform {
        Some(f) => rewrite_id(f(copy.value), target_id),
        None => copy.value,
    };
    vec![MutationRequest::new(
        target_id.clone(),
        MutationEffect::Create(value),
    )]
}

/// Restore is never disabled; an unavailable revision fails at execution.
pub fn restore_disabled(_state: &PairState<'_>) -> Option<DisabledReason> {
    None
}

/// Replay a past revision's content into the draft slot (published slot for
/// live-edit types).
pub fn restore(state: &PairState<'_>, revision_value: Value) -> Vec<MutationRequest> {
    let target_id = if state.live_edit {
        &state.id_pair.published_id
    } else {
        &state.id_pair.draft_id
    };
    let value = rewrite_id(revision_value, target_id);
    vec![MutationRequest::new(
        target_id.clone(),
        MutationEffect::CreateOrReplace(value),
    )]
}

/// The slot an edit of this pair addresses.
pub fn edit_target(live_edit: bool) -> DocumentSlot {
    if live_edit {
        DocumentSlot::Published
    } else {
        DocumentSlot::Draft
    }
}

fn rewrite_id(mut value: Value, id: &str) -> Value {
    if let Value::Object(map) = &mut value {
        map.insert("id".to_owned(), Value::String(id.to_owned()));
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, value: Value) -> Document {
        Document::from_value(value, id, Some("r1".to_owned()))
    }

    fn state<'a>(
        id_pair: &'a IdPair,
        draft: Option<&'a Document>,
        published: Option<&'a Document>,
    ) -> PairState<'a> {
        PairState {
            id_pair,
            type_name: "article",
            draft,
            published,
            live_edit: false,
            validation_passed: true,
            has_uncommitted_edits: false,
        }
    }

    #[test]
    fn publish_replaces_published_and_deletes_draft() {
        let pair = IdPair::from_published("a");
        let draft = doc("drafts.a", json!({"type": "article", "title": "T"}));
        let s = state(&pair, Some(&draft), None);
        assert_eq!(publish_disabled(&s), None);
        let requests = publish(&s);
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].document_id, "a");
        let MutationEffect::CreateOrReplace(value) = &requests[0].effect else {
            panic!("expected createOrReplace");
        };
        assert_eq!(value["id"], json!("a"));
        assert_eq!(value["title"], json!("T"));
        assert_eq!(requests[1].document_id, "drafts.a");
        assert_eq!(requests[1].effect, MutationEffect::Delete);
    }

    #[test]
    fn publish_disabled_without_draft_or_with_validation_errors() {
        let pair = IdPair::from_published("a");
        let published = doc("a", json!({"type": "article"}));
        let s = state(&pair, None, Some(&published));
        assert_eq!(publish_disabled(&s), Some(DisabledReason::NoDraft));

        let draft = doc("drafts.a", json!({"type": "article"}));
        let mut s = state(&pair, Some(&draft), None);
        s.validation_passed = false;
        assert_eq!(publish_disabled(&s), Some(DisabledReason::ValidationErrors));
    }

    #[test]
    fn publish_disabled_for_live_edit_types() {
        let pair = IdPair::from_published("a");
        let mut s = state(&pair, None, None);
        s.live_edit = true;
        assert_eq!(publish_disabled(&s), Some(DisabledReason::LiveEditDocument));
        assert_eq!(unpublish_disabled(&s), Some(DisabledReason::LiveEditDocument));
    }

    #[test]
    fn unpublish_preserves_content_as_draft() {
        let pair = IdPair::from_published("a");
        let published = doc("a", json!({"type": "article", "title": "T"}));
        let s = state(&pair, None, Some(&published));
        assert_eq!(unpublish_disabled(&s), None);
        let requests = unpublish(&s);
        assert_eq!(requests[0].document_id, "drafts.a");
        let MutationEffect::CreateIfNotExists(value) = &requests[0].effect else {
            panic!("expected createIfNotExists");
        };
        assert_eq!(value["id"], json!("drafts.a"));
        assert_eq!(requests[1].effect, MutationEffect::Delete);
    }

    #[test]
    fn unpublish_disabled_without_published_slot() {
        let pair = IdPair::from_published("a");
        let draft = doc("drafts.a", json!({"type": "article"}));
        let s = state(&pair, Some(&draft), None);
        assert_eq!(unpublish_disabled(&s), Some(DisabledReason::NoPublished));
    }

    #[test]
    fn delete_targets_only_existing_slots() {
        let pair = IdPair::from_published("a");
        let draft = doc("drafts.a", json!({"type": "article"}));
        let s = state(&pair, Some(&draft), None);
        assert_eq!(delete_disabled(&s), None);
        let requests = delete(&s);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].document_id, "drafts.a");

        let empty = state(&pair, None, None);
        assert_eq!(delete_disabled(&empty), Some(DisabledReason::NoContent));
    }

    #[test]
    fn duplicate_prefers_draft_and_applies_transform() {
        let pair = IdPair::from_published("a");
        let target = IdPair::from_published("b");
        let draft = doc("drafts.a", json!({"type": "article", "title": "T"}));
        let published = doc("a", json!({"type": "article", "title": "old"}));
        let s = state(&pair, Some(&draft), Some(&published));
        let transform = |mut v: Value| {
            v["title"] = json!("Copy of T");
            v
        };
        let requests = duplicate(&s, &target, Some(&transform));
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].document_id, "drafts.b");
        let MutationEffect::Create(value) = &requests[0].effect else {
            panic!("expected create");
        };
        assert_eq!(value["title"], json!("Copy of T"));
        assert_eq!(value["id"], json!("drafts.b"));
    }

    #[test]
    fn restore_targets_draft_unless_live_edit() {
        let pair = IdPair::from_published("a");
        let s = state(&pair, None, None);
        assert_eq!(restore_disabled(&s), None);
        let requests = restore(&s, json!({"type": "article", "title": "old"}));
        assert_eq!(requests[0].document_id, "drafts.a");

        let mut live = state(&pair, None, None);
        live.live_edit = true;
        let requests = restore(&live, json!({"type": "article"}));
        assert_eq!(requests[0].document_id, "a");
        let MutationEffect::CreateOrReplace(value) = &requests[0].effect else {
            panic!("expected createOrReplace");
        };
        assert_eq!(value["id"], json!("a"));
    }

    #[test]
    fn empty_guard_is_a_noop_unset() {
        let request = empty_guard("a");
        let MutationEffect::Patch(patch) = &request.effect else {
            panic!("expected patch");
        };
        assert_eq!(patch.ops.len(), 1);
        assert!(matches!(&patch.ops[0], PatchOp::Unset { path }
            if path.to_string() == EMPTY_GUARD_FIELD));
    }
}
