//! Enrich policies and the ingest pipelines that apply them.

use std::sync::Arc;

use tracing::info;

use crate::entity::Model;
use crate::error::{ApiError, Result};
use crate::index::{EnrichPolicy, Pipeline, Processor, SearchIndex};
use crate::registry::{ResourceDescriptor, ResourceRegistry};

/// Builds enrichment artifacts from resource descriptors.
pub struct EnrichmentBuilder {
    index: Arc<dyn SearchIndex>,
    registry: Arc<ResourceRegistry>,
}

impl EnrichmentBuilder {
    pub fn new(index: Arc<dyn SearchIndex>, registry: Arc<ResourceRegistry>) -> Self {
        Self { index, registry }
    }

    /// Create (or replace) and execute the model's enrich policy.
    ///
    /// Returns `false` when the model declares no policy.
    pub async fn create_and_execute_enrich_policy(&self, model: Model) -> Result<bool> {
        let descriptor = self.registry.require(model)?;
        let Some(enrich) = &descriptor.enrich else {
            return Ok(false);
        };

        let policy = EnrichPolicy {
            indices: vec![descriptor.index.clone()],
            match_field: enrich.match_field.clone(),
            enrich_fields: enrich.enrich_fields.clone(),
        };
        self.index
            .put_enrich_policy(&enrich.policy_name, &policy)
            .await?;
        self.index.execute_enrich_policy(&enrich.policy_name).await?;

        info!(model = %model, policy = %enrich.policy_name, "enrich policy executed");
        Ok(true)
    }

    /// Create (or replace) the model's ingest pipeline.
    ///
    /// Returns `false` when the model declares no pipeline.
    pub async fn create_enrich_processor(&self, model: Model) -> Result<bool> {
        let descriptor = self.registry.require(model)?;
        let Some(pipeline_config) = &descriptor.pipeline else {
            return Ok(false);
        };

        let pipeline = build_pipeline(model, descriptor)?;
        self.index.put_pipeline(&pipeline_config.id, &pipeline).await?;

        info!(
            model = %model,
            pipeline = %pipeline_config.id,
            processors = pipeline.processors.len(),
            "ingest pipeline created"
        );
        Ok(true)
    }
}

/// Pipeline for `descriptor.pipeline`, which must be present.
pub fn build_pipeline(model: Model, descriptor: &ResourceDescriptor) -> Result<Pipeline> {
    let pipeline_config = descriptor.pipeline.as_ref().ok_or_else(|| {
        ApiError::Validation(format!("{} declares no pipeline", model))
    })?;

    let processors = match &pipeline_config.processors {
        Some(entries) => entries
            .iter()
            .map(|entry| Processor::Foreach {
                field: entry.reference_field.clone(),
                ignore_missing: true,
                processor: Box::new(Processor::Enrich {
                    policy_name: entry.enrich_policy_name.clone(),
                    field: entry.field.clone(),
                    target_field: entry.target_field.clone(),
                    max_matches: entry.max_matches,
                    ignore_missing: true,
                }),
            })
            .collect(),
        None => {
            let enrich = descriptor.enrich.as_ref().ok_or_else(|| {
                ApiError::Validation(format!(
                    "pipeline '{}' of {} needs an enrich policy",
                    pipeline_config.id, model
                ))
            })?;
            let field = pipeline_config.field.clone().ok_or_else(|| {
                ApiError::Validation(format!("pipeline '{}' has no field", pipeline_config.id))
            })?;
            let target_field = pipeline_config.target_field.clone().ok_or_else(|| {
                ApiError::Validation(format!("pipeline '{}' has no targetField", pipeline_config.id))
            })?;
            vec![Processor::Enrich {
                policy_name: enrich.policy_name.clone(),
                field,
                target_field,
                max_matches: pipeline_config.max_matches,
                ignore_missing: false,
            }]
        }
    };

    Ok(Pipeline {
        description: Some(format!("Enrich {} references", model.resource())),
        processors,
    })
}
