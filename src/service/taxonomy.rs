use async_trait::async_trait;

use super::{merge_params, EntityService};
use crate::access::DualStore;
use crate::auth::AuthUser;
use crate::context::Context;
use crate::entity::{
    omit_audit_fields, omit_audit_fields_all, record_id, Model, NewTaxonomy, Record, TaxonomyPatch,
};
use crate::error::{ApiError, Result};
use crate::search::{Params, SearchQuery, SearchResult};
use crate::storage::FindQuery;

pub struct TaxonomyService {
    access: DualStore,
}

impl TaxonomyService {
    pub fn new(ctx: Context) -> Self {
        Self {
            access: DualStore::new(ctx, Model::Taxonomy),
        }
    }
}

#[async_trait]
impl EntityService for TaxonomyService {
    type Create = NewTaxonomy;
    type Patch = TaxonomyPatch;

    async fn create(&self, entity: NewTaxonomy, auth: &AuthUser) -> Result<Record> {
        let record = self.access.create(entity.into_fields()?, auth).await?;
        Ok(omit_audit_fields(record))
    }

    async fn patch(&self, id: &str, entity: TaxonomyPatch, auth: &AuthUser) -> Result<Record> {
        let record = self.access.patch(id, entity.into_fields()?, auth).await?;
        Ok(omit_audit_fields(record))
    }

    async fn get(
        &self,
        id: &str,
        auth: &AuthUser,
        params: &Params,
        query: &Params,
        from_db: bool,
    ) -> Result<Record> {
        let params = merge_params(params, query);
        let record = self.access.get(id, auth, &params, from_db).await?;
        Ok(omit_audit_fields(record))
    }

    async fn search(&self, query: &SearchQuery, auth: &AuthUser) -> Result<SearchResult> {
        let mut result = self.access.search(query, auth).await?;
        result.result = omit_audit_fields_all(std::mem::take(&mut result.result));
        Ok(result)
    }

    /// Refused while any skill still references the taxonomy.
    async fn remove(&self, id: &str, _auth: &AuthUser, params: &Params) -> Result<()> {
        let referencing = self
            .access
            .context()
            .store
            .find(Model::Skill, &FindQuery::default().filter("taxonomyId", id))
            .await?;
        if !referencing.is_empty() {
            let ids: Vec<&str> = referencing.iter().filter_map(record_id).collect();
            return Err(ApiError::DeleteConflict(format!(
                "Please delete {} with ids {}",
                Model::Skill,
                ids.join(",")
            )));
        }

        self.access.remove(id, params).await
    }
}
