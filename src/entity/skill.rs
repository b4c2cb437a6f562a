use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::{to_fields, Record};
use crate::error::{ApiError, Result};

/// Prominence scores carried in skill metadata
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMetadata {
    pub challenge_prominence: f64,
    pub member_prominence: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillMetadataPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge_prominence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member_prominence: Option<f64>,
}

/// Payload for creating a skill
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSkill {
    pub taxonomy_id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    pub metadata: SkillMetadata,
}

/// Payload for patching a skill; at least one field must be set
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taxonomy_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<SkillMetadataPatch>,
}

fn validate_prominence(field: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ApiError::Validation(format!(
            "\"{}\" must be between 0 and 1, got {}",
            field, value
        )));
    }
    Ok(())
}

impl SkillMetadata {
    pub fn new(challenge_prominence: f64, member_prominence: f64) -> Self {
        Self {
            challenge_prominence,
            member_prominence,
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_prominence("challengeProminence", self.challenge_prominence)?;
        validate_prominence("memberProminence", self.member_prominence)
    }
}

impl NewSkill {
    pub fn new(taxonomy_id: Uuid, name: impl Into<String>, metadata: SkillMetadata) -> Self {
        Self {
            taxonomy_id,
            name: name.into(),
            uri: None,
            external_id: None,
            metadata,
        }
    }

    pub fn with_external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ApiError::Validation("\"name\" is required".to_string()));
        }
        self.metadata.validate()
    }

    pub fn into_fields(self) -> Result<Record> {
        self.validate()?;
        to_fields(&self)
    }
}

impl SkillPatch {
    pub fn is_empty(&self) -> bool {
        self.taxonomy_id.is_none()
            && self.name.is_none()
            && self.uri.is_none()
            && self.external_id.is_none()
            && self.metadata.is_none()
    }

    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(ApiError::Validation(
                "\"entity\" must have at least 1 key".to_string(),
            ));
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(ApiError::Validation("\"name\" is not allowed to be empty".to_string()));
            }
        }
        if let Some(metadata) = &self.metadata {
            if let Some(v) = metadata.challenge_prominence {
                validate_prominence("challengeProminence", v)?;
            }
            if let Some(v) = metadata.member_prominence {
                validate_prominence("memberProminence", v)?;
            }
        }
        Ok(())
    }

    /// Fields to write for this patch against `existing`.
    ///
    /// Metadata is merged key by key so a partial prominence update keeps the
    /// other score.
    pub fn into_fields(self, existing: &Record) -> Result<Record> {
        self.validate()?;
        let mut fields = to_fields(&self)?;

        if let Some(Value::Object(patch_meta)) = fields.remove("metadata") {
            let mut merged = match existing.get("metadata") {
                Some(Value::Object(current)) => current.clone(),
                _ => Record::new(),
            };
            merged.remove("updated");
            for (k, v) in patch_meta {
                merged.insert(k, v);
            }
            fields.insert("metadata".to_string(), Value::Object(merged));
        }

        Ok(fields)
    }
}
