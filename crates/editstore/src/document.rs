//! Documents and the draft/published id pairing.

use std::fmt;

use serde_json::Value;

/// Opaque revision token assigned by the transport on each committed write.
pub type Revision = String;

/// Prefix distinguishing draft ids from published ids.
pub const DRAFTS_PREFIX: &str = "drafts.";

/// A document value plus its revision token.
///
/// `id` and `type` are the two special top-level identifiers and are kept in
/// sync with the corresponding keys of `value`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub type_name: String,
    pub rev: Option<Revision>,
    pub value: Value,
}

impl Document {
    /// A fresh document shell containing only its identifiers.
    pub fn new(id: impl Into<String>, type_name: impl Into<String>) -> Self {
        let id = id.into();
        let type_name = type_name.into();
        let mut map = serde_json::Map::new();
        map.insert("id".to_owned(), Value::String(id.clone()));
        map.insert("type".to_owned(), Value::String(type_name.clone()));
        Document {
            id,
            type_name,
            rev: None,
            value: Value::Object(map),
        }
    }

    /// Build a document from a raw value, reading `id`/`type` from its keys.
    /// `fallback_id` is used when the value does not carry an `id`.
    pub fn from_value(mut value: Value, fallback_id: &str, rev: Option<Revision>) -> Self {
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or(fallback_id)
            .to_owned();
        let type_name = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        if let Value::Object(map) = &mut value {
            map.insert("id".to_owned(), Value::String(id.clone()));
        }
        Document {
            id,
            type_name,
            rev,
            value,
        }
    }

    /// Clone this document's content under a different id, dropping the
    /// revision token. Used when copying content between slots.
    pub fn with_id(&self, id: &str) -> Document {
        let mut value = self.value.clone();
        if let Value::Object(map) = &mut value {
            map.insert("id".to_owned(), Value::String(id.to_owned()));
        }
        Document {
            id: id.to_owned(),
            type_name: self.type_name.clone(),
            rev: None,
            value,
        }
    }
}

/// Which half of a pair a document or event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentSlot {
    Draft,
    Published,
}

impl fmt::Display for DocumentSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DocumentSlot::Draft => "draft",
            DocumentSlot::Published => "published",
        })
    }
}

/// The two ids denoting one logical document's draft and published slots.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdPair {
    pub published_id: String,
    pub draft_id: String,
}

impl IdPair {
    /// Derive the pair from a published id (`drafts.` prefix for the draft).
    pub fn from_published(published_id: impl Into<String>) -> Self {
        let published_id = published_id.into();
        let draft_id = format!("{DRAFTS_PREFIX}{published_id}");
        IdPair {
            published_id,
            draft_id,
        }
    }

    pub fn id_for(&self, slot: DocumentSlot) -> &str {
        match slot {
            DocumentSlot::Draft => &self.draft_id,
            DocumentSlot::Published => &self.published_id,
        }
    }

    /// Which slot `document_id` addresses, if it belongs to this pair.
    pub fn slot_of(&self, document_id: &str) -> Option<DocumentSlot> {
        if document_id == self.draft_id {
            Some(DocumentSlot::Draft)
        } else if document_id == self.published_id {
            Some(DocumentSlot::Published)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn id_pair_from_published() {
        let pair = IdPair::from_published("article-1");
        assert_eq!(pair.published_id, "article-1");
        assert_eq!(pair.draft_id, "drafts.article-1");
        assert_eq!(pair.slot_of("drafts.article-1"), Some(DocumentSlot::Draft));
        assert_eq!(pair.slot_of("article-1"), Some(DocumentSlot::Published));
        assert_eq!(pair.slot_of("other"), None);
    }

    #[test]
    fn new_document_carries_identifiers() {
        let doc = Document::new("drafts.a", "article");
        assert_eq!(doc.value["id"], json!("drafts.a"));
        assert_eq!(doc.value["type"], json!("article"));
        assert!(doc.rev.is_none());
    }

    #[test]
    fn with_id_rewrites_identity_and_drops_rev() {
        let mut doc = Document::new("drafts.a", "article");
        doc.rev = Some("r1".into());
        let published = doc.with_id("a");
        assert_eq!(published.id, "a");
        assert_eq!(published.value["id"], json!("a"));
        assert!(published.rev.is_none());
        assert_eq!(published.type_name, "article");
    }

    #[test]
    fn from_value_reads_identifiers() {
        let doc = Document::from_value(
            json!({"id": "x", "type": "post", "title": "t"}),
            "fallback",
            Some("r2".into()),
        );
        assert_eq!(doc.id, "x");
        assert_eq!(doc.type_name, "post");
        assert_eq!(doc.rev.as_deref(), Some("r2"));
    }
}
