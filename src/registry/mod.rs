//! Resource registry: which models live in the search index, and how.
//!
//! Each logical resource maps to an index, a document type, an optional
//! ingest pipeline applied when its documents are bulk-loaded, and optional
//! enrich policy / pipeline descriptors used by the rebuild job. The registry
//! is built once from configuration and is read-only afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::entity::Model;
use crate::error::{ApiError, Result};

fn default_doc_type() -> String {
    "_doc".to_string()
}

fn default_max_matches() -> u32 {
    1
}

/// Search-index presence of one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescriptor {
    pub index: String,
    #[serde(rename = "type", default = "default_doc_type")]
    pub doc_type: String,
    /// Pipeline applied to this resource's documents on bulk load
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingest_pipeline: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enrich: Option<EnrichDescriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<PipelineDescriptor>,
}

/// Enrich policy built over this resource's index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichDescriptor {
    pub policy_name: String,
    pub match_field: String,
    pub enrich_fields: Vec<String>,
}

/// Ingest pipeline applying an enrich policy.
///
/// Without `processors` the pipeline is a single enrich processor reading
/// `field` into `target_field` using the resource's own policy. With
/// `processors`, each entry enriches every element of an array field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineDescriptor {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_field: Option<String>,
    #[serde(default = "default_max_matches")]
    pub max_matches: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processors: Option<Vec<ProcessorDescriptor>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessorDescriptor {
    pub reference_field: String,
    pub enrich_policy_name: String,
    pub field: String,
    pub target_field: String,
    #[serde(default = "default_max_matches")]
    pub max_matches: u32,
}

/// Read-only registry of resource descriptors plus the rebuild order.
#[derive(Debug, Clone)]
pub struct ResourceRegistry {
    resources: BTreeMap<String, ResourceDescriptor>,
    rebuild_order: Vec<String>,
    max_bulk_size: usize,
    max_page_size: usize,
}

impl ResourceRegistry {
    pub fn new(
        resources: BTreeMap<String, ResourceDescriptor>,
        rebuild_order: Vec<String>,
        max_bulk_size: usize,
        max_page_size: usize,
    ) -> Result<Self> {
        if max_bulk_size == 0 || max_page_size == 0 {
            return Err(ApiError::Config(
                "max_bulk_size and max_page_size must be positive".to_string(),
            ));
        }
        for name in &rebuild_order {
            if !resources.contains_key(name) {
                return Err(ApiError::Config(format!(
                    "rebuild order names unknown resource '{}'",
                    name
                )));
            }
        }
        Ok(Self {
            resources,
            rebuild_order,
            max_bulk_size,
            max_page_size,
        })
    }

    pub fn get(&self, resource: &str) -> Option<&ResourceDescriptor> {
        self.resources.get(resource)
    }

    pub fn for_model(&self, model: Model) -> Option<&ResourceDescriptor> {
        self.get(model.resource())
    }

    /// Like [`for_model`](Self::for_model), failing for unregistered models.
    pub fn require(&self, model: Model) -> Result<&ResourceDescriptor> {
        self.for_model(model).ok_or_else(|| {
            ApiError::Config(format!("no search resource registered for {}", model))
        })
    }

    /// Ids of every ingest pipeline any resource declares
    pub fn pipeline_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for descriptor in self.resources.values() {
            if let Some(pipeline) = &descriptor.pipeline {
                if !ids.contains(&pipeline.id.as_str()) {
                    ids.push(&pipeline.id);
                }
            }
        }
        ids
    }

    /// `models` sorted by rebuild order; models without a position are dropped.
    pub fn ordered_models(&self, models: &[Model]) -> Vec<Model> {
        let mut positioned: Vec<(usize, Model)> = models
            .iter()
            .filter_map(|m| self.rebuild_position(*m).map(|pos| (pos, *m)))
            .collect();
        positioned.sort_by_key(|(pos, _)| *pos);
        positioned.dedup_by_key(|(pos, _)| *pos);
        positioned.into_iter().map(|(_, m)| m).collect()
    }

    pub fn rebuild_position(&self, model: Model) -> Option<usize> {
        self.rebuild_order
            .iter()
            .position(|name| name == model.resource())
    }

    pub fn max_bulk_size(&self) -> usize {
        self.max_bulk_size
    }

    pub fn max_page_size(&self) -> usize {
        self.max_page_size
    }
}
