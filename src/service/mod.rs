//! Entity services: validation and cross-entity rules over [`DualStore`].
//!
//! Every record a service returns has passed through
//! [`omit_audit_fields`](crate::entity::omit_audit_fields).
//!
//! [`DualStore`]: crate::access::DualStore

mod skill;
mod taxonomy;

pub use skill::SkillService;
pub use taxonomy::TaxonomyService;

use async_trait::async_trait;

use crate::auth::AuthUser;
use crate::entity::Record;
use crate::error::Result;
use crate::search::{Params, SearchQuery, SearchResult};

/// Uniform CRUD surface the transport layer dispatches to.
#[async_trait]
pub trait EntityService: Send + Sync {
    /// Payload accepted by `create`
    type Create: Send + 'static;
    /// Payload accepted by `patch`
    type Patch: Send + 'static;

    async fn create(&self, entity: Self::Create, auth: &AuthUser) -> Result<Record>;

    async fn patch(&self, id: &str, entity: Self::Patch, auth: &AuthUser) -> Result<Record>;

    /// `params` and `query` are merged (query wins) for the not-found
    /// message; `from_db` bypasses the search index.
    async fn get(
        &self,
        id: &str,
        auth: &AuthUser,
        params: &Params,
        query: &Params,
        from_db: bool,
    ) -> Result<Record>;

    async fn search(&self, query: &SearchQuery, auth: &AuthUser) -> Result<SearchResult>;

    async fn remove(&self, id: &str, auth: &AuthUser, params: &Params) -> Result<()>;
}

fn merge_params(params: &Params, query: &Params) -> Params {
    let mut merged = params.clone();
    merged.extend(query.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}
