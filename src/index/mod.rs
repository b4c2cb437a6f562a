//! Search index collaborator.
//!
//! [`SearchIndex`] is the document-store surface the rest of the crate needs:
//! bulk and single-document writes, lookups, paged search, index deletion and
//! the enrich policy / ingest pipeline primitives. Errors carry an
//! [`IndexErrorKind`] so callers can ignore specific "not found" classes.

mod es_client;
mod memory;

pub use es_client::EsClient;
pub use memory::MemoryIndex;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;

use crate::entity::Record;

/// Classification of an index failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexErrorKind {
    /// Policy or pipeline does not exist (`resource_not_found_exception`)
    ResourceNotFound,
    /// Index does not exist (`index_not_found_exception`)
    IndexNotFound,
    /// Document does not exist in an existing index
    DocumentNotFound,
    /// Could not talk to the index at all
    Transport,
    Other,
}

impl std::fmt::Display for IndexErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexErrorKind::ResourceNotFound => write!(f, "resource_not_found"),
            IndexErrorKind::IndexNotFound => write!(f, "index_not_found"),
            IndexErrorKind::DocumentNotFound => write!(f, "document_not_found"),
            IndexErrorKind::Transport => write!(f, "transport"),
            IndexErrorKind::Other => write!(f, "other"),
        }
    }
}

/// A failed index operation with provider diagnostics.
#[derive(Error, Debug, Clone)]
#[error("{kind}: {message}")]
pub struct IndexError {
    pub kind: IndexErrorKind,
    pub message: String,
    pub status: Option<u16>,
    pub method: Option<String>,
    pub path: Option<String>,
    /// Provider response body, when there was one
    pub body: Option<Value>,
}

impl IndexError {
    pub fn new(kind: IndexErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            method: None,
            path: None,
            body: None,
        }
    }

    pub fn with_request(mut self, method: &str, path: &str) -> Self {
        self.method = Some(method.to_string());
        self.path = Some(path.to_string());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn is(&self, kind: IndexErrorKind) -> bool {
        self.kind == kind
    }

    /// The document (or the index holding it) is absent.
    pub fn is_missing_document(&self) -> bool {
        matches!(
            self.kind,
            IndexErrorKind::DocumentNotFound | IndexErrorKind::IndexNotFound
        )
    }

    /// Classify a provider error body by its `error.type`.
    pub fn kind_from_body(status: u16, body: &Value) -> IndexErrorKind {
        match body.pointer("/error/type").and_then(Value::as_str) {
            Some("resource_not_found_exception") => IndexErrorKind::ResourceNotFound,
            Some("index_not_found_exception") => IndexErrorKind::IndexNotFound,
            Some(_) => IndexErrorKind::Other,
            None if status == 404 => IndexErrorKind::DocumentNotFound,
            None => IndexErrorKind::Other,
        }
    }
}

pub type IndexResult<T> = std::result::Result<T, IndexError>;

/// Write visibility requested from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Refresh {
    #[default]
    False,
    True,
    /// Return once the write is visible to search
    WaitFor,
}

impl Refresh {
    pub fn as_str(&self) -> &'static str {
        match self {
            Refresh::False => "false",
            Refresh::True => "true",
            Refresh::WaitFor => "wait_for",
        }
    }
}

/// Paged equality search.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    pub from: u64,
    pub size: u64,
    /// Field equals value, all must hold
    pub filters: Vec<(String, Value)>,
    /// Ascending sort field; index order when absent
    pub sort: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchHits {
    pub total: u64,
    pub documents: Vec<Record>,
}

/// Item-level result of a bulk request the index accepted.
#[derive(Debug, Default)]
pub struct BulkOutcome {
    /// Documents actually stored
    pub indexed: usize,
    /// First rejected item, if any
    pub failure: Option<IndexError>,
}

/// A match-type enrich policy.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichPolicy {
    pub indices: Vec<String>,
    pub match_field: String,
    pub enrich_fields: Vec<String>,
}

impl EnrichPolicy {
    pub fn to_json(&self) -> Value {
        json!({
            "match": {
                "indices": self.indices,
                "match_field": self.match_field,
                "enrich_fields": self.enrich_fields,
            }
        })
    }
}

/// Ingest-time document transformation.
#[derive(Debug, Clone, PartialEq)]
pub enum Processor {
    Enrich {
        policy_name: String,
        field: String,
        target_field: String,
        max_matches: u32,
        ignore_missing: bool,
    },
    /// Run `processor` on every element of the array at `field`
    Foreach {
        field: String,
        ignore_missing: bool,
        processor: Box<Processor>,
    },
}

impl Processor {
    pub fn to_json(&self) -> Value {
        match self {
            Processor::Enrich {
                policy_name,
                field,
                target_field,
                max_matches,
                ignore_missing,
            } => {
                let mut body = json!({
                    "policy_name": policy_name,
                    "field": field,
                    "target_field": target_field,
                    "max_matches": max_matches,
                });
                if *ignore_missing {
                    body["ignore_missing"] = json!(true);
                }
                json!({ "enrich": body })
            }
            Processor::Foreach {
                field,
                ignore_missing,
                processor,
            } => json!({
                "foreach": {
                    "field": field,
                    "ignore_missing": ignore_missing,
                    "processor": processor.to_json(),
                }
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub description: Option<String>,
    pub processors: Vec<Processor>,
}

impl Pipeline {
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "processors": self.processors.iter().map(Processor::to_json).collect::<Vec<_>>(),
        });
        if let Some(description) = &self.description {
            body["description"] = json!(description);
        }
        body
    }
}

/// Document store with enrichment primitives.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Index `documents` under their `id`, through `pipeline` if given.
    ///
    /// `Err` means the request as a whole failed and nothing was stored.
    /// Rejected items are reported in the outcome; the rest are stored.
    async fn bulk_index(
        &self,
        index: &str,
        doc_type: &str,
        documents: &[Record],
        pipeline: Option<&str>,
        refresh: Refresh,
    ) -> IndexResult<BulkOutcome>;

    /// Create or replace one document.
    async fn index_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        document: &Record,
        refresh: Refresh,
    ) -> IndexResult<()>;

    /// `Ok(None)` when the index exists but the document does not.
    async fn get_document(&self, index: &str, doc_type: &str, id: &str) -> IndexResult<Option<Record>>;

    async fn delete_document(
        &self,
        index: &str,
        doc_type: &str,
        id: &str,
        refresh: Refresh,
    ) -> IndexResult<()>;

    async fn search(&self, index: &str, request: &SearchRequest) -> IndexResult<SearchHits>;

    async fn delete_index(&self, index: &str) -> IndexResult<()>;

    /// Create the policy, replacing any previous definition of `name`.
    async fn put_enrich_policy(&self, name: &str, policy: &EnrichPolicy) -> IndexResult<()>;

    /// Build the policy's lookup snapshot; returns once it is complete.
    async fn execute_enrich_policy(&self, name: &str) -> IndexResult<()>;

    async fn delete_enrich_policy(&self, name: &str) -> IndexResult<()>;

    /// Create or replace pipeline `id`.
    async fn put_pipeline(&self, id: &str, pipeline: &Pipeline) -> IndexResult<()>;

    async fn delete_pipeline(&self, id: &str) -> IndexResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_body() {
        let body = json!({"error": {"type": "resource_not_found_exception"}, "status": 404});
        assert_eq!(IndexError::kind_from_body(404, &body), IndexErrorKind::ResourceNotFound);

        let body = json!({"error": {"type": "index_not_found_exception"}, "status": 404});
        assert_eq!(IndexError::kind_from_body(404, &body), IndexErrorKind::IndexNotFound);

        let body = json!({"_index": "skill", "found": false});
        assert_eq!(IndexError::kind_from_body(404, &body), IndexErrorKind::DocumentNotFound);

        let body = json!({"error": {"type": "mapper_parsing_exception"}});
        assert_eq!(IndexError::kind_from_body(400, &body), IndexErrorKind::Other);
    }

    #[test]
    fn test_foreach_processor_json() {
        let processor = Processor::Foreach {
            field: "skills".to_string(),
            ignore_missing: true,
            processor: Box::new(Processor::Enrich {
                policy_name: "skill-policy".to_string(),
                field: "_ingest._value.skillId".to_string(),
                target_field: "_ingest._value.skill".to_string(),
                max_matches: 1,
                ignore_missing: true,
            }),
        };
        let value = processor.to_json();
        assert_eq!(value["foreach"]["field"], "skills");
        assert_eq!(value["foreach"]["processor"]["enrich"]["policy_name"], "skill-policy");
        assert_eq!(value["foreach"]["processor"]["enrich"]["ignore_missing"], true);
    }

    #[test]
    fn test_policy_json() {
        let policy = EnrichPolicy {
            indices: vec!["taxonomy".to_string()],
            match_field: "id".to_string(),
            enrich_fields: vec!["name".to_string()],
        };
        assert_eq!(
            policy.to_json(),
            json!({"match": {"indices": ["taxonomy"], "match_field": "id", "enrich_fields": ["name"]}})
        );
    }
}
