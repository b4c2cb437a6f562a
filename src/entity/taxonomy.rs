use serde::{Deserialize, Serialize};

use super::{to_fields, Record};
use crate::error::{ApiError, Result};

/// Payload for creating a taxonomy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTaxonomy {
    pub name: String,
}

/// Payload for patching a taxonomy; `name` stays required
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaxonomyPatch {
    pub name: String,
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ApiError::Validation("\"name\" is required".to_string()));
    }
    Ok(())
}

impl NewTaxonomy {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }

    pub fn into_fields(self) -> Result<Record> {
        self.validate()?;
        to_fields(&self)
    }
}

impl TaxonomyPatch {
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)
    }

    pub fn into_fields(self) -> Result<Record> {
        self.validate()?;
        to_fields(&self)
    }
}
