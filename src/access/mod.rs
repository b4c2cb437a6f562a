//! Dual-store access: the relational store is authoritative, the search
//! index is a best-effort mirror that serves reads when it can.
//!
//! Writes go to the relational store first and are then mirrored into the
//! index; a failed mirror write is logged and never undoes the relational
//! write. Reads try the index first and fall back to the relational store.

use tracing::{debug, error, warn};

use crate::auth::{permission_check, AuthUser};
use crate::context::Context;
use crate::entity::{record_id, strip_managed_fields, Model, Record};
use crate::error::{ApiError, Result};
use crate::index::{Refresh, SearchRequest};
use crate::registry::ResourceDescriptor;
use crate::search::{Params, SearchQuery, SearchResult};
use crate::storage::FindQuery;

/// CRUD for one model across both stores.
#[derive(Clone)]
pub struct DualStore {
    ctx: Context,
    model: Model,
}

impl DualStore {
    pub fn new(ctx: Context, model: Model) -> Self {
        Self { ctx, model }
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    fn descriptor(&self) -> Result<&ResourceDescriptor> {
        self.ctx.registry.require(self.model)
    }

    /// "cannot find Skill where id:..., ..." built from the lookup params.
    fn not_found(&self, id: &str, params: &Params) -> ApiError {
        let described = if params.is_empty() {
            format!("id:{}", id)
        } else {
            params
                .iter()
                .map(|(k, v)| format!("{}:{}", k, v))
                .collect::<Vec<_>>()
                .join(", ")
        };
        ApiError::NotFound(format!("cannot find {} where {}", self.model, described))
    }

    /// Relational create after the uniqueness check, without mirroring.
    pub async fn insert(&self, fields: Record, auth: &AuthUser) -> Result<Record> {
        let groups = self.model.unique_groups();
        if !groups.is_empty() {
            self.ctx
                .store
                .make_sure_unique(self.model, &fields, groups, None)
                .await?;
        }
        self.ctx.store.create(self.model, fields, auth).await
    }

    /// Relational record `id`, read without touching the index.
    pub async fn fetch(&self, id: &str) -> Result<Record> {
        self.ctx
            .store
            .get(self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id, &Params::new()))
    }

    /// Relational update after checking uniqueness of the merged record.
    pub async fn update(&self, id: &str, fields: Record, auth: &AuthUser) -> Result<Record> {
        if self.model.unique_groups().is_empty() {
            return self.ctx.store.update(self.model, id, fields, auth).await;
        }
        let existing = self.fetch(id).await?;
        self.update_existing(id, &existing, fields, auth).await
    }

    /// [`update`](Self::update) for a caller that already holds the record.
    pub async fn update_existing(
        &self,
        id: &str,
        existing: &Record,
        fields: Record,
        auth: &AuthUser,
    ) -> Result<Record> {
        let groups = self.model.unique_groups();
        if !groups.is_empty() {
            let mut merged = existing.clone();
            strip_managed_fields(&mut merged);
            merged.extend(fields.clone());
            self.ctx
                .store
                .make_sure_unique(self.model, &merged, groups, Some(id))
                .await?;
        }
        self.ctx.store.update(self.model, id, fields, auth).await
    }

    pub async fn create(&self, fields: Record, auth: &AuthUser) -> Result<Record> {
        let record = self.insert(fields, auth).await?;
        self.mirror_create(&record).await;
        Ok(record)
    }

    pub async fn patch(&self, id: &str, fields: Record, auth: &AuthUser) -> Result<Record> {
        let record = self.update(id, fields, auth).await?;
        self.mirror_patch(&record).await;
        Ok(record)
    }

    /// Write a newly created record into the index. Failures are logged.
    pub async fn mirror_create(&self, record: &Record) {
        self.mirror("create", record).await
    }

    /// Replace the index copy of an updated record. Failures are logged.
    pub async fn mirror_patch(&self, record: &Record) {
        self.mirror("patch", record).await
    }

    async fn mirror(&self, action: &str, record: &Record) {
        let Some(id) = record_id(record) else {
            warn!(model = %self.model, action, "record without id, not mirrored");
            return;
        };
        let descriptor = match self.descriptor() {
            Ok(descriptor) => descriptor,
            Err(e) => {
                warn!(model = %self.model, id, error = %e, "record not mirrored");
                return;
            }
        };

        let written = self
            .ctx
            .index
            .index_document(
                &descriptor.index,
                &descriptor.doc_type,
                id,
                record,
                Refresh::WaitFor,
            )
            .await;
        match written {
            Ok(()) => debug!(model = %self.model, id, action, "record mirrored"),
            Err(e) => error!(
                model = %self.model,
                index = %descriptor.index,
                id,
                action,
                error = %e,
                "failed to mirror record into search index"
            ),
        }
    }

    /// Fetch one record.
    ///
    /// An index hit is returned as is. On an index miss or failure, or when
    /// `bypass_index` is set, the relational record is read and subjected to
    /// the permission check.
    pub async fn get(
        &self,
        id: &str,
        auth: &AuthUser,
        params: &Params,
        bypass_index: bool,
    ) -> Result<Record> {
        if !bypass_index {
            match self.get_from_index(id).await {
                Ok(Some(document)) => return Ok(document),
                Ok(None) => debug!(model = %self.model, id, "not in search index"),
                Err(e) => warn!(
                    model = %self.model,
                    id,
                    error = %e,
                    "search index lookup failed, reading relational store"
                ),
            }
        }

        let record = self
            .ctx
            .store
            .get(self.model, id)
            .await?
            .ok_or_else(|| self.not_found(id, params))?;
        permission_check(auth, &record, self.ctx.admin_roles())?;
        Ok(record)
    }

    async fn get_from_index(&self, id: &str) -> Result<Option<Record>> {
        let descriptor = self.descriptor()?;
        let document = self
            .ctx
            .index
            .get_document(&descriptor.index, &descriptor.doc_type, id)
            .await?;
        Ok(document)
    }

    /// Delete from the relational store, then from the index. A document
    /// already missing from the index is fine; other index errors surface.
    pub async fn remove(&self, id: &str, params: &Params) -> Result<()> {
        self.ctx.store.remove(self.model, id).await?;

        let descriptor = self.descriptor()?;
        let deleted = self
            .ctx
            .index
            .delete_document(&descriptor.index, &descriptor.doc_type, id, Refresh::WaitFor)
            .await;
        match deleted {
            Ok(()) => Ok(()),
            Err(e) if e.is_missing_document() => {
                warn!(
                    model = %self.model,
                    id,
                    params = ?params,
                    "record was not in search index"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Paged search served by the index, or by a relational scan with the
    /// same filters and ordering when the index fails.
    pub async fn search(&self, query: &SearchQuery, _auth: &AuthUser) -> Result<SearchResult> {
        let descriptor = self.descriptor()?;
        let request = SearchRequest {
            from: query.offset(),
            size: u64::from(query.per_page),
            filters: query.filters.clone(),
            sort: query.order_by.clone(),
        };

        match self.ctx.index.search(&descriptor.index, &request).await {
            Ok(hits) => Ok(SearchResult {
                result: hits.documents,
                total: hits.total,
                page: query.page,
                per_page: query.per_page,
                from_db: false,
            }),
            Err(e) => {
                warn!(
                    model = %self.model,
                    index = %descriptor.index,
                    error = %e,
                    "search index query failed, scanning relational store"
                );
                let find = FindQuery {
                    filters: query.filters.clone(),
                    page: Some(query.page),
                    per_page: Some(query.per_page),
                    order_by: query.order_by.clone(),
                };
                let records = self.ctx.store.find(self.model, &find).await?;
                Ok(SearchResult {
                    total: records.len() as u64,
                    result: records,
                    page: query.page,
                    per_page: query.per_page,
                    from_db: true,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::Config;
    use crate::index::{MemoryIndex, SearchIndex};
    use crate::storage::SqliteStore;

    async fn setup() -> (DualStore, Arc<MemoryIndex>) {
        let index = Arc::new(MemoryIndex::new());
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ctx = Context::new(store, index.clone(), Config::default()).unwrap();
        (DualStore::new(ctx, Model::Taxonomy), index)
    }

    fn fields(name: &str) -> Record {
        json!({ "name": name }).as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn test_create_mirrors_into_index() {
        let (access, index) = setup().await;
        let auth = AuthUser::user("alice", &["user"]);
        let record = access.create(fields("Languages"), &auth).await.unwrap();

        let docs = index.documents("taxonomy").await;
        assert_eq!(docs, vec![record]);
    }

    #[tokio::test]
    async fn test_mirror_failure_keeps_relational_write() {
        let (access, index) = setup().await;
        index.fail_writes_for("taxonomy").await;
        let auth = AuthUser::user("alice", &["user"]);

        let record = access.create(fields("Languages"), &auth).await.unwrap();
        let id = record_id(&record).unwrap();
        assert_eq!(index.document_count("taxonomy").await, 0);

        let fetched = access.get(id, &auth, &Params::new(), false).await.unwrap();
        assert_eq!(fetched["name"], "Languages");
    }

    #[tokio::test]
    async fn test_get_index_hit_skips_permission_check() {
        let (access, _index) = setup().await;
        let owner = AuthUser::user("alice", &["user"]);
        let stranger = AuthUser::user("eve", &["user"]);
        let record = access.create(fields("Languages"), &owner).await.unwrap();
        let id = record_id(&record).unwrap();

        assert!(access.get(id, &stranger, &Params::new(), false).await.is_ok());
        let err = access.get(id, &stranger, &Params::new(), true).await.unwrap_err();
        assert!(matches!(err, ApiError::Permission(_)));
    }

    #[tokio::test]
    async fn test_get_missing_lists_params() {
        let (access, _index) = setup().await;
        let mut params = Params::new();
        params.insert("id".to_string(), "abc".to_string());
        let err = access
            .get("abc", &AuthUser::machine("svc"), &params, false)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "cannot find Taxonomy where id:abc");
    }

    #[tokio::test]
    async fn test_remove_tolerates_missing_document() {
        let (access, index) = setup().await;
        let auth = AuthUser::machine("svc");
        let record = access.create(fields("Languages"), &auth).await.unwrap();
        let id = record_id(&record).unwrap().to_string();
        index
            .delete_document("taxonomy", "_doc", &id, Refresh::WaitFor)
            .await
            .unwrap();

        access.remove(&id, &Params::new()).await.unwrap();
        let err = access.remove(&id, &Params::new()).await.unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remove_surfaces_other_index_errors() {
        let (access, index) = setup().await;
        let auth = AuthUser::machine("svc");
        let record = access.create(fields("Languages"), &auth).await.unwrap();
        index.fail_writes_for("taxonomy").await;

        let err = access
            .remove(record_id(&record).unwrap(), &Params::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Upstream(_)));
    }
}
