mod model;
mod skill;
mod taxonomy;

pub use model::Model;
pub use skill::{NewSkill, SkillMetadata, SkillMetadataPatch, SkillPatch};
pub use taxonomy::{NewTaxonomy, TaxonomyPatch};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{ApiError, Result};

/// A stored record: field name to JSON value, always carrying `id`.
pub type Record = Map<String, Value>;

pub const ID_FIELD: &str = "id";
pub const CREATED: &str = "created";
pub const CREATED_BY: &str = "createdBy";
pub const UPDATED: &str = "updated";
pub const UPDATED_BY: &str = "updatedBy";

/// Audit fields maintained by the relational store
pub const AUDIT_FIELDS: [&str; 4] = [CREATED, CREATED_BY, UPDATED, UPDATED_BY];

/// The `id` of a record, if it is a string.
pub fn record_id(record: &Record) -> Option<&str> {
    record.get(ID_FIELD).and_then(Value::as_str)
}

/// Serialize a typed payload into record fields.
pub(crate) fn to_fields<T: Serialize>(value: &T) -> Result<Record> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(ApiError::Validation(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Remove `id` and audit fields from client-supplied fields.
pub fn strip_managed_fields(fields: &mut Record) {
    fields.remove(ID_FIELD);
    for field in AUDIT_FIELDS {
        fields.remove(field);
    }
}

/// Strip audit fields from an outward-facing record.
///
/// `created`, `createdBy` and `updatedBy` are dropped; `updated` moves to
/// `metadata.updated`. A second application leaves the record unchanged.
pub fn omit_audit_fields(mut record: Record) -> Record {
    let updated = record.remove(UPDATED);
    record.remove(CREATED);
    record.remove(CREATED_BY);
    record.remove(UPDATED_BY);

    let metadata = record
        .entry("metadata")
        .or_insert_with(|| Value::Object(Map::new()));
    if !metadata.is_object() {
        *metadata = Value::Object(Map::new());
    }
    if let (Some(updated), Value::Object(metadata)) = (updated, metadata) {
        metadata.insert(UPDATED.to_string(), updated);
    }

    record
}

/// [`omit_audit_fields`] over a collection.
pub fn omit_audit_fields_all(records: Vec<Record>) -> Vec<Record> {
    records.into_iter().map(omit_audit_fields).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Record {
        json!({
            "id": "a1",
            "name": "Programming",
            "created": "2024-01-01T00:00:00Z",
            "createdBy": "alice",
            "updated": "2024-02-01T00:00:00Z",
            "updatedBy": "bob",
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_omit_audit_fields_moves_updated() {
        let out = omit_audit_fields(sample());
        assert!(out.get("created").is_none());
        assert!(out.get("createdBy").is_none());
        assert!(out.get("updatedBy").is_none());
        assert!(out.get("updated").is_none());
        assert_eq!(out["metadata"]["updated"], json!("2024-02-01T00:00:00Z"));
        assert_eq!(out["name"], json!("Programming"));
    }

    #[test]
    fn test_omit_audit_fields_is_idempotent() {
        let once = omit_audit_fields(sample());
        let twice = omit_audit_fields(once.clone());
        assert_eq!(once, twice);
        assert_eq!(twice["metadata"]["updated"], json!("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_omit_audit_fields_keeps_existing_metadata() {
        let mut record = sample();
        record.insert(
            "metadata".to_string(),
            json!({"challengeProminence": 0.5, "memberProminence": 0.2}),
        );
        let out = omit_audit_fields(record);
        assert_eq!(out["metadata"]["challengeProminence"], json!(0.5));
        assert_eq!(out["metadata"]["updated"], json!("2024-02-01T00:00:00Z"));
    }

    #[test]
    fn test_omit_audit_fields_all() {
        let out = omit_audit_fields_all(vec![sample(), sample()]);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.get("createdBy").is_none()));
    }

    #[test]
    fn test_strip_managed_fields() {
        let mut fields = sample();
        strip_managed_fields(&mut fields);
        assert_eq!(fields.len(), 1);
        assert_eq!(record_id(&sample()), Some("a1"));
    }
}
