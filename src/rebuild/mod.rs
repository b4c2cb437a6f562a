//! Full rebuild of the search index from the relational store.
//!
//! The job deletes every pipeline, enrich policy and index it knows about,
//! then replays each model in rebuild order: page through the table, fill
//! missing audit fields, bulk-load in chunks through the model's ingest
//! pipeline, and finally build the model's enrich policy and pipeline so
//! that later models can be enriched from it. Failures past cleanup are
//! logged and recorded per model; they never stop the job.

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::context::Context;
use crate::enrich::EnrichmentBuilder;
use crate::entity::{Model, Record, CREATED, CREATED_BY, UPDATED, UPDATED_BY};
use crate::error::{ApiError, Result};
use crate::index::{IndexError, IndexErrorKind, Refresh};
use crate::storage::FindQuery;

/// Outcome of one model's replay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReport {
    pub model: Model,
    /// Records the index stored, counted per item
    pub records_loaded: usize,
    /// Chunks that failed outright or had rejected items
    pub failed_chunks: usize,
    /// Reading from the relational store failed; enrichment was skipped
    pub load_failed: bool,
    pub policy_failed: bool,
    pub pipeline_failed: bool,
}

impl ModelReport {
    fn new(model: Model) -> Self {
        Self {
            model,
            records_loaded: 0,
            failed_chunks: 0,
            load_failed: false,
            policy_failed: false,
            pipeline_failed: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed_chunks == 0 && !self.load_failed && !self.policy_failed && !self.pipeline_failed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RebuildReport {
    /// One entry per replayed model, in rebuild order
    pub models: Vec<ModelReport>,
}

impl RebuildReport {
    pub fn get(&self, model: Model) -> Option<&ModelReport> {
        self.models.iter().find(|r| r.model == model)
    }

    pub fn has_failures(&self) -> bool {
        self.models.iter().any(|r| !r.is_clean())
    }
}

/// Set `created`/`updated` to `now` and `createdBy`/`updatedBy` to
/// `system_user` wherever they are not strings.
pub fn fill_audit_defaults(record: &mut Record, now: &str, system_user: &str) {
    for (field, default) in [
        (CREATED, now),
        (UPDATED, now),
        (CREATED_BY, system_user),
        (UPDATED_BY, system_user),
    ] {
        if !record.get(field).is_some_and(Value::is_string) {
            record.insert(field.to_string(), Value::String(default.to_string()));
        }
    }
}

fn log_index_error(model: Model, context: &str, e: &IndexError) {
    let body = e
        .body
        .as_ref()
        .map(|b| b.to_string())
        .unwrap_or_default();
    error!(
        model = %model,
        kind = %e.kind,
        status = ?e.status,
        method = e.method.as_deref().unwrap_or(""),
        path = e.path.as_deref().unwrap_or(""),
        body = %body,
        "{}: {}",
        context,
        e.message
    );
}

fn log_failure(model: Model, context: &str, e: &ApiError) {
    match e {
        ApiError::Upstream(index_error) => log_index_error(model, context, index_error),
        other => error!(model = %model, error = %other, "{}", context),
    }
}

/// The one-shot index rebuild.
pub struct RebuildJob {
    ctx: Context,
    enrichment: EnrichmentBuilder,
}

impl RebuildJob {
    pub fn new(ctx: Context) -> Self {
        let enrichment = EnrichmentBuilder::new(ctx.index.clone(), ctx.registry.clone());
        Self { ctx, enrichment }
    }

    /// Clean up, then replay every ordered model.
    ///
    /// Only a cleanup failure is returned as an error.
    pub async fn run(&self) -> Result<RebuildReport> {
        let models = self.ctx.registry.ordered_models(&Model::ALL);
        self.cleanup(&models).await?;

        let mut report = RebuildReport::default();
        for model in models {
            report.models.push(self.rebuild_model(model).await);
        }

        for outcome in &report.models {
            if outcome.is_clean() {
                info!(model = %outcome.model, records = outcome.records_loaded, "rebuilt");
            } else {
                warn!(
                    model = %outcome.model,
                    records = outcome.records_loaded,
                    failed_chunks = outcome.failed_chunks,
                    load_failed = outcome.load_failed,
                    policy_failed = outcome.policy_failed,
                    pipeline_failed = outcome.pipeline_failed,
                    "rebuilt with failures"
                );
            }
        }
        info!("all done");
        Ok(report)
    }

    /// Delete pipelines, then each model's enrich policy and index.
    pub async fn cleanup(&self, models: &[Model]) -> Result<()> {
        for id in self.ctx.registry.pipeline_ids() {
            match self.ctx.index.delete_pipeline(id).await {
                Ok(()) => debug!(pipeline = id, "deleted pipeline"),
                Err(e) if e.is(IndexErrorKind::ResourceNotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }

        for model in models {
            let descriptor = self.ctx.registry.require(*model)?;
            if let Some(enrich) = &descriptor.enrich {
                match self.ctx.index.delete_enrich_policy(&enrich.policy_name).await {
                    Ok(()) => debug!(policy = %enrich.policy_name, "deleted enrich policy"),
                    Err(e) if e.is(IndexErrorKind::ResourceNotFound) => {}
                    Err(e) => return Err(e.into()),
                }
            }
            match self.ctx.index.delete_index(&descriptor.index).await {
                Ok(()) => debug!(index = %descriptor.index, "deleted index"),
                Err(e) if e.is(IndexErrorKind::IndexNotFound) => {}
                Err(e) => return Err(e.into()),
            }
        }

        info!("existing search index data deleted");
        Ok(())
    }

    async fn rebuild_model(&self, model: Model) -> ModelReport {
        let mut report = ModelReport::new(model);

        if let Err(e) = self.load(model, &mut report).await {
            log_failure(model, "import data failed", &e);
            report.load_failed = true;
            return report;
        }
        info!(model = %model, records = report.records_loaded, "import data done");

        match self.enrichment.create_and_execute_enrich_policy(model).await {
            Ok(true) => info!(model = %model, "create and execute enrich policy done"),
            Ok(false) => {}
            Err(e) => {
                log_failure(model, "create and execute enrich policy failed", &e);
                report.policy_failed = true;
            }
        }

        match self.enrichment.create_enrich_processor(model).await {
            Ok(true) => info!(model = %model, "create enrich processor (pipeline) done"),
            Ok(false) => {}
            Err(e) => {
                log_failure(model, "create enrich processor (pipeline) failed", &e);
                report.pipeline_failed = true;
            }
        }

        report
    }

    /// Page through the table and bulk-load every page.
    async fn load(&self, model: Model, report: &mut ModelReport) -> Result<()> {
        let descriptor = self.ctx.registry.require(model)?;
        let per_page = u32::try_from(self.ctx.registry.max_page_size()).unwrap_or(u32::MAX);
        let bulk_size = self.ctx.registry.max_bulk_size();
        let system_user = &self.ctx.config.auth.system_user;

        let mut page = 1;
        loop {
            let query = FindQuery::default().paged(page, per_page);
            let mut records = self.ctx.store.find(model, &query).await?;
            let fetched = records.len();
            debug!(model = %model, page, fetched, "fetched page");

            let now = Utc::now().to_rfc3339();
            for record in &mut records {
                fill_audit_defaults(record, &now, system_user);
            }

            for chunk in records.chunks(bulk_size) {
                let written = self
                    .ctx
                    .index
                    .bulk_index(
                        &descriptor.index,
                        &descriptor.doc_type,
                        chunk,
                        descriptor.ingest_pipeline.as_deref(),
                        Refresh::WaitFor,
                    )
                    .await;
                match written {
                    Ok(outcome) => {
                        report.records_loaded += outcome.indexed;
                        if let Some(e) = outcome.failure {
                            log_index_error(model, "bulk insert rejected items", &e);
                            report.failed_chunks += 1;
                        }
                    }
                    Err(e) => {
                        log_index_error(model, "bulk insert failed", &e);
                        report.failed_chunks += 1;
                    }
                }
            }

            if fetched < per_page as usize {
                return Ok(());
            }
            page += 1;
        }
    }
}
