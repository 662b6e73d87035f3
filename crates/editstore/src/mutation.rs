//! Mutations and transactions.
//!
//! A [`Mutation`] targets one document and carries an ordered list of
//! effects; a [`Transaction`] groups the mutations of one commit under a
//! collision-tolerant id. The same shapes describe locally staged edits and
//! mutations arriving on the remote stream (remote ones additionally carry
//! the revision chain).

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde_json::{json, Value};

use editstore_patch::{apply_lenient, codec, Patch, PatchDiagnostic, PatchError};

use crate::document::{Document, Revision};

const TRANSACTION_ID_LEN: usize = 16;

/// Random transaction token. Uniqueness is collision-tolerant, not
/// guaranteed: the transport rejects a duplicate id and the committer then
/// retries with a fresh one.
pub fn generate_transaction_id() -> String {
    let rng = rand::thread_rng();
    rng.sample_iter(&Alphanumeric)
        .take(TRANSACTION_ID_LEN)
        .map(char::from)
        .collect()
}

/// One step of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationEffect {
    Patch(Patch),
    Create(Value),
    CreateIfNotExists(Value),
    CreateOrReplace(Value),
    Delete,
}

impl MutationEffect {
    /// Apply this effect to the current state of a document slot.
    ///
    /// Patch failures are dropped per-operation and reported; creation and
    /// deletion never fail. `document_id` names the slot for documents
    /// created from values lacking an `id`.
    pub fn apply_lenient(
        &self,
        current: Option<Document>,
        document_id: &str,
    ) -> (Option<Document>, Vec<PatchDiagnostic>) {
        match self {
            MutationEffect::Patch(patch) => match current {
                Some(mut doc) => {
                    let (value, dropped) = apply_lenient(&doc.value, patch);
                    doc.value = value;
                    (Some(doc), dropped)
                }
                // A patch against a missing document has nothing to apply to.
                None => (None, Vec::new()),
            },
            MutationEffect::Create(value) | MutationEffect::CreateOrReplace(value) => (
                Some(Document::from_value(value.clone(), document_id, None)),
                Vec::new(),
            ),
            MutationEffect::CreateIfNotExists(value) => match current {
                Some(doc) => (Some(doc), Vec::new()),
                None => (
                    Some(Document::from_value(value.clone(), document_id, None)),
                    Vec::new(),
                ),
            },
            MutationEffect::Delete => (None, Vec::new()),
        }
    }
}

/// An ordered group of effects against one document, produced locally
/// (awaiting commit) or received from the remote stream (already applied
/// upstream).
#[derive(Debug, Clone, PartialEq)]
pub struct Mutation {
    pub transaction_id: String,
    pub document_id: String,
    pub effects: Vec<MutationEffect>,
    /// Revision the mutation was applied against upstream. Remote only.
    pub previous_rev: Option<Revision>,
    /// Revision the document had after the mutation upstream. Remote only.
    pub result_rev: Option<Revision>,
}

impl Mutation {
    pub fn local(
        transaction_id: impl Into<String>,
        document_id: impl Into<String>,
        effects: Vec<MutationEffect>,
    ) -> Self {
        Mutation {
            transaction_id: transaction_id.into(),
            document_id: document_id.into(),
            effects,
            previous_rev: None,
            result_rev: None,
        }
    }

    /// Whether this mutation can start from a missing document.
    pub fn applies_to_missing_document(&self) -> bool {
        self.effects.first().is_some_and(|effect| {
            matches!(
                effect,
                MutationEffect::Create(_)
                    | MutationEffect::CreateIfNotExists(_)
                    | MutationEffect::CreateOrReplace(_)
            )
        })
    }

    /// Fold all effects over `current`, stamping the result revision.
    pub fn apply(&self, current: Option<&Document>) -> (Option<Document>, Vec<PatchDiagnostic>) {
        let mut doc = current.cloned();
        let mut dropped = Vec::new();
        for effect in &self.effects {
            let (next, mut diags) = effect.apply_lenient(doc, &self.document_id);
            doc = next;
            dropped.append(&mut diags);
        }
        if let Some(doc) = &mut doc {
            if self.result_rev.is_some() {
                doc.rev = self.result_rev.clone();
            }
        }
        (doc, dropped)
    }
}

/// A set of mutations submitted for durable commit as one unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub mutations: Vec<Mutation>,
}

impl Transaction {
    pub fn new(id: impl Into<String>, mutations: Vec<Mutation>) -> Self {
        Transaction {
            id: id.into(),
            mutations,
        }
    }

    /// Swap in a freshly generated id after a duplicate-id rejection.
    /// Returns the new id.
    pub fn regenerate_id(&mut self) -> String {
        let id = generate_transaction_id();
        self.id = id.clone();
        for mutation in &mut self.mutations {
            mutation.transaction_id = id.clone();
        }
        id
    }
}

// ── Wire codec ───────────────────────────────────────────────────────────

/// Encode a mutation's effects as JSON wire bodies. A patch effect emits one
/// `patch` body per operation, so same-verb operations never collide.
pub fn encode_mutation(mutation: &Mutation) -> Value {
    let mut bodies = Vec::new();
    for effect in &mutation.effects {
        match effect {
            MutationEffect::Patch(patch) => {
                if let Value::Array(parts) = codec::encode_patch(patch) {
                    for part in parts {
                        let mut body = json!({"id": mutation.document_id});
                        if let (Value::Object(target), Value::Object(map)) = (&mut body, part) {
                            for (k, v) in map {
                                target.insert(k, v);
                            }
                        }
                        bodies.push(json!({"patch": body}));
                    }
                }
            }
            MutationEffect::Create(value) => bodies.push(json!({"create": value})),
            MutationEffect::CreateIfNotExists(value) => {
                bodies.push(json!({"createIfNotExists": value}))
            }
            MutationEffect::CreateOrReplace(value) => {
                bodies.push(json!({"createOrReplace": value}))
            }
            MutationEffect::Delete => bodies.push(json!({"delete": {"id": mutation.document_id}})),
        }
    }
    Value::Array(bodies)
}

/// Decode JSON wire bodies into effects. Unknown body kinds fail with
/// [`PatchError::UnsupportedOperation`].
pub fn decode_effects(bodies: &[Value]) -> Result<Vec<MutationEffect>, PatchError> {
    let mut effects = Vec::with_capacity(bodies.len());
    for body in bodies {
        let map = body.as_object().ok_or_else(|| {
            PatchError::UnsupportedOperation("mutation body must be an object".to_owned())
        })?;
        let (kind, payload) = map.iter().next().ok_or_else(|| {
            PatchError::UnsupportedOperation("empty mutation body".to_owned())
        })?;
        let effect = match kind.as_str() {
            "patch" => {
                let mut ops = Vec::new();
                codec::decode_body(payload, &mut ops)?;
                MutationEffect::Patch(Patch::new(ops))
            }
            "create" => MutationEffect::Create(payload.clone()),
            "createIfNotExists" => MutationEffect::CreateIfNotExists(payload.clone()),
            "createOrReplace" => MutationEffect::CreateOrReplace(payload.clone()),
            "delete" => MutationEffect::Delete,
            other => return Err(PatchError::UnsupportedOperation(other.to_owned())),
        };
        effects.push(effect);
    }
    Ok(effects)
}

#[cfg(test)]
mod tests {
    use super::*;
    use editstore_patch::{Path, PatchOp};
    use serde_json::json;

    #[test]
    fn transaction_ids_are_alphanumeric() {
        let id = generate_transaction_id();
        assert_eq!(id.len(), TRANSACTION_ID_LEN);
        assert!(id.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(id, generate_transaction_id());
    }

    #[test]
    fn regenerate_id_updates_all_mutations() {
        let mut txn = Transaction::new(
            "old",
            vec![Mutation::local("old", "a", vec![MutationEffect::Delete])],
        );
        let new_id = txn.regenerate_id();
        assert_ne!(new_id, "old");
        assert_eq!(txn.mutations[0].transaction_id, new_id);
    }

    #[test]
    fn create_if_not_exists_keeps_existing() {
        let existing = Document::new("a", "post");
        let effect = MutationEffect::CreateIfNotExists(json!({"id": "a", "type": "other"}));
        let (next, _) = effect.apply_lenient(Some(existing.clone()), "a");
        assert_eq!(next.unwrap(), existing);
    }

    #[test]
    fn mutation_apply_stamps_result_rev() {
        let mut mutation = Mutation::local(
            "t1",
            "a",
            vec![MutationEffect::Patch(Patch::single(PatchOp::Set {
                path: Path::parse("title").unwrap(),
                value: json!("hi"),
            }))],
        );
        mutation.result_rev = Some("r9".into());
        let base = Document::new("a", "post");
        let (next, dropped) = mutation.apply(Some(&base));
        let next = next.unwrap();
        assert_eq!(next.value["title"], json!("hi"));
        assert_eq!(next.rev.as_deref(), Some("r9"));
        assert!(dropped.is_empty());
    }

    #[test]
    fn patch_against_missing_document_is_noop() {
        let mutation = Mutation::local(
            "t1",
            "a",
            vec![MutationEffect::Patch(Patch::single(PatchOp::Unset {
                path: Path::parse("x").unwrap(),
            }))],
        );
        let (next, dropped) = mutation.apply(None);
        assert!(next.is_none());
        assert!(dropped.is_empty());
    }

    #[test]
    fn wire_codec_round_trips_effects() {
        let mutation = Mutation::local(
            "t1",
            "doc1",
            vec![
                MutationEffect::CreateIfNotExists(json!({"id": "doc1", "type": "post"})),
                MutationEffect::Patch(Patch::single(PatchOp::Set {
                    path: Path::parse("title").unwrap(),
                    value: json!("x"),
                })),
                MutationEffect::Delete,
            ],
        );
        let wire = encode_mutation(&mutation);
        let decoded = decode_effects(wire.as_array().unwrap()).unwrap();
        assert_eq!(decoded, mutation.effects);
    }

    #[test]
    fn decode_rejects_unknown_body() {
        let err = decode_effects(&[json!({"explode": {}})]).unwrap_err();
        assert!(matches!(err, PatchError::UnsupportedOperation(k) if k == "explode"));
    }
}
