use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use super::{merge_params, EntityService};
use crate::access::DualStore;
use crate::auth::AuthUser;
use crate::context::Context;
use crate::entity::{
    omit_audit_fields, omit_audit_fields_all, Model, NewSkill, Record, SkillPatch,
};
use crate::error::{ApiError, Result};
use crate::search::{Params, SearchQuery, SearchResult};

const TAXONOMY_ID: &str = "taxonomyId";
const TAXONOMY_NAME: &str = "taxonomyName";

pub struct SkillService {
    access: DualStore,
}

fn taxonomy_id_of(record: &Record) -> &str {
    record.get(TAXONOMY_ID).and_then(Value::as_str).unwrap_or_default()
}

impl SkillService {
    pub fn new(ctx: Context) -> Self {
        Self {
            access: DualStore::new(ctx, Model::Skill),
        }
    }

    /// Name of taxonomy `id`, read from the relational store.
    async fn taxonomy_name(&self, id: &str) -> Result<String> {
        let taxonomy = self
            .access
            .context()
            .store
            .get(Model::Taxonomy, id)
            .await?
            .ok_or_else(|| {
                ApiError::NotFound(format!("cannot find {} where id:{}", Model::Taxonomy, id))
            })?;
        Ok(taxonomy
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn populate_taxonomy_name(&self, skill: &mut Record) -> Result<()> {
        let name = self.taxonomy_name(taxonomy_id_of(skill)).await?;
        skill.insert(TAXONOMY_NAME.to_string(), Value::String(name));
        Ok(())
    }

    /// Fill names for a page of skills, one lookup per distinct taxonomy.
    /// Skills that already carry a name are left alone.
    async fn populate_taxonomy_names(&self, skills: &mut [Record]) -> Result<()> {
        let mut names: HashMap<String, String> = HashMap::new();
        for skill in skills.iter_mut() {
            let has_name = skill
                .get(TAXONOMY_NAME)
                .and_then(Value::as_str)
                .is_some_and(|n| !n.is_empty());
            if has_name {
                continue;
            }

            let taxonomy_id = taxonomy_id_of(skill).to_string();
            let name = match names.get(&taxonomy_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self.taxonomy_name(&taxonomy_id).await?;
                    names.insert(taxonomy_id, name.clone());
                    name
                }
            };
            skill.insert(TAXONOMY_NAME.to_string(), Value::String(name));
        }
        Ok(())
    }
}

#[async_trait]
impl EntityService for SkillService {
    type Create = NewSkill;
    type Patch = SkillPatch;

    async fn create(&self, entity: NewSkill, auth: &AuthUser) -> Result<Record> {
        entity.validate()?;
        let taxonomy_name = self.taxonomy_name(&entity.taxonomy_id.to_string()).await?;

        let mut record = self.access.insert(entity.into_fields()?, auth).await?;
        record.insert(TAXONOMY_NAME.to_string(), Value::String(taxonomy_name));
        self.access.mirror_create(&record).await;

        Ok(omit_audit_fields(record))
    }

    /// Uniqueness is checked on the patched record, excluding itself.
    async fn patch(&self, id: &str, entity: SkillPatch, auth: &AuthUser) -> Result<Record> {
        entity.validate()?;
        let taxonomy_name = match entity.taxonomy_id {
            Some(taxonomy_id) => Some(self.taxonomy_name(&taxonomy_id.to_string()).await?),
            None => None,
        };

        let existing = self.access.fetch(id).await?;
        let fields = entity.into_fields(&existing)?;

        let mut record = self.access.update_existing(id, &existing, fields, auth).await?;
        match taxonomy_name {
            Some(name) => {
                record.insert(TAXONOMY_NAME.to_string(), Value::String(name));
            }
            None => self.populate_taxonomy_name(&mut record).await?,
        }
        self.access.mirror_patch(&record).await;

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
        let mut record = self.access.get(id, auth, &params, from_db).await?;
        self.populate_taxonomy_name(&mut record).await?;
        Ok(omit_audit_fields(record))
    }

    async fn search(&self, query: &SearchQuery, auth: &AuthUser) -> Result<SearchResult> {
        let mut result = self.access.search(query, auth).await?;
        self.populate_taxonomy_names(&mut result.result).await?;
        result.result = omit_audit_fields_all(std::mem::take(&mut result.result));
        Ok(result)
    }

    async fn remove(&self, id: &str, _auth: &AuthUser, params: &Params) -> Result<()> {
        self.access.remove(id, params).await
    }
}
