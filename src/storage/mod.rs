//! Relational store collaborator.

mod sqlite_store;

pub use sqlite_store::SqliteStore;

use async_trait::async_trait;
use serde_json::Value;

use crate::auth::AuthUser;
use crate::entity::{Model, Record};
use crate::error::Result;

/// Filtered, optionally paged scan of one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindQuery {
    /// Field equals value, all must hold
    pub filters: Vec<(String, Value)>,
    /// 1-based; only applied together with `per_page`
    pub page: Option<u32>,
    pub per_page: Option<u32>,
    /// Ascending sort field; insertion order when absent
    pub order_by: Option<String>,
}

impl FindQuery {
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn paged(mut self, page: u32, per_page: u32) -> Self {
        self.page = Some(page);
        self.per_page = Some(per_page);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }
}

/// The source of truth for every record.
///
/// Writes maintain `id` and the audit fields; callers never supply them.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get(&self, model: Model, id: &str) -> Result<Option<Record>>;

    /// Insert `fields` under a fresh id, stamping `created*`/`updated*`.
    async fn create(&self, model: Model, fields: Record, auth: &AuthUser) -> Result<Record>;

    /// Merge `fields` over the stored record, stamping `updated*`.
    async fn update(&self, model: Model, id: &str, fields: Record, auth: &AuthUser) -> Result<Record>;

    async fn remove(&self, model: Model, id: &str) -> Result<()>;

    async fn find(&self, model: Model, query: &FindQuery) -> Result<Vec<Record>>;

    /// Fail with a uniqueness error when another record matches any group.
    ///
    /// A group is checked only if `fields` sets at least one of its fields;
    /// unset fields of that group must be unset on the other record too.
    async fn make_sure_unique(
        &self,
        model: Model,
        fields: &Record,
        groups: &[&[&str]],
        exclude_id: Option<&str>,
    ) -> Result<()>;
}
