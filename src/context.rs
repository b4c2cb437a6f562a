use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::index::SearchIndex;
use crate::registry::ResourceRegistry;
use crate::storage::RecordStore;

/// Collaborators shared by the access layer, services and the rebuild job.
#[derive(Clone)]
pub struct Context {
    pub store: Arc<dyn RecordStore>,
    pub index: Arc<dyn SearchIndex>,
    pub registry: Arc<ResourceRegistry>,
    pub config: Arc<Config>,
}

impl Context {
    /// Build the registry from `config` and bundle everything up.
    pub fn new(
        store: Arc<dyn RecordStore>,
        index: Arc<dyn SearchIndex>,
        config: Config,
    ) -> Result<Self> {
        let registry = config.registry()?;
        Ok(Self {
            store,
            index,
            registry: Arc::new(registry),
            config: Arc::new(config),
        })
    }

    pub fn admin_roles(&self) -> &[String] {
        &self.config.auth.admin_roles
    }
}
