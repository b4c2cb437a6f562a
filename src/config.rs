use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ApiError, Result};
use crate::registry::{EnrichDescriptor, PipelineDescriptor, ResourceDescriptor, ResourceRegistry};

/// Environment variable naming the YAML config file.
pub const CONFIG_ENV: &str = "SKILLS_INDEX_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/default.yaml";

/// Process configuration, loaded once at start-up.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub es: EsConfig,
    pub auth: AuthConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file
    pub path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EsConfig {
    pub host: String,
    /// Documents per bulk request
    pub max_bulk_size: usize,
    /// Rows fetched per relational page during a rebuild
    #[serde(alias = "max_batch_size")]
    pub max_page_size: usize,
    pub documents: BTreeMap<String, ResourceDescriptor>,
    pub rebuild_order: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Roles that bypass the creator-only permission rule
    pub admin_roles: Vec<String>,
    /// Identity written into missing audit fields by the rebuild job
    pub system_user: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub default_per_page: u32,
    pub max_per_page: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("skills.db"),
        }
    }
}

impl Default for EsConfig {
    fn default() -> Self {
        let mut documents = BTreeMap::new();
        documents.insert(
            "taxonomy".to_string(),
            ResourceDescriptor {
                index: "taxonomy".to_string(),
                doc_type: "_doc".to_string(),
                ingest_pipeline: None,
                enrich: Some(EnrichDescriptor {
                    policy_name: "taxonomy-policy".to_string(),
                    match_field: "id".to_string(),
                    enrich_fields: vec!["name".to_string()],
                }),
                pipeline: Some(PipelineDescriptor {
                    id: "skill-pipeline".to_string(),
                    field: Some("taxonomyId".to_string()),
                    target_field: Some("taxonomy".to_string()),
                    max_matches: 1,
                    processors: None,
                }),
            },
        );
        documents.insert(
            "skill".to_string(),
            ResourceDescriptor {
                index: "skill".to_string(),
                doc_type: "_doc".to_string(),
                ingest_pipeline: Some("skill-pipeline".to_string()),
                enrich: None,
                pipeline: None,
            },
        );

        Self {
            host: "http://localhost:9200".to_string(),
            max_bulk_size: 100,
            max_page_size: 1000,
            documents,
            rebuild_order: vec!["taxonomy".to_string(), "skill".to_string()],
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_roles: vec![
                "Administrator".to_string(),
                "administrator".to_string(),
                "u-bahn-admin".to_string(),
            ],
            system_user: "tcAdmin".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_per_page: 20,
            max_per_page: 100,
        }
    }
}

impl Config {
    /// Load from `$SKILLS_INDEX_CONFIG` (or `config/default.yaml`), then apply
    /// environment overrides. A missing file yields the built-in defaults.
    pub fn load() -> Result<Self> {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Apply `ES_HOST`, `SQLITE_PATH`, `ES_MAX_BULK_SIZE`, `ES_MAX_BATCH_SIZE`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("ES_HOST") {
            self.es.host = host;
        }
        if let Some(path) = lookup("SQLITE_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(size) = lookup("ES_MAX_BULK_SIZE") {
            self.es.max_bulk_size = parse_size("ES_MAX_BULK_SIZE", &size)?;
        }
        if let Some(size) = lookup("ES_MAX_BATCH_SIZE") {
            self.es.max_page_size = parse_size("ES_MAX_BATCH_SIZE", &size)?;
        }
        Ok(())
    }

    pub fn registry(&self) -> Result<ResourceRegistry> {
        ResourceRegistry::new(
            self.es.documents.clone(),
            self.es.rebuild_order.clone(),
            self.es.max_bulk_size,
            self.es.max_page_size,
        )
    }
}

fn parse_size(key: &str, value: &str) -> Result<usize> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::Config(format!("{} must be a positive integer, got '{}'", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Model;

    #[test]
    fn test_default_registry_orders_taxonomy_first() {
        let registry = Config::default().registry().unwrap();
        assert_eq!(
            registry.ordered_models(&[Model::Skill, Model::Taxonomy]),
            vec![Model::Taxonomy, Model::Skill]
        );
        assert_eq!(registry.pipeline_ids(), vec!["skill-pipeline"]);
        assert_eq!(
            registry.for_model(Model::Skill).unwrap().ingest_pipeline.as_deref(),
            Some("skill-pipeline")
        );
    }

    #[test]
    fn test_shipped_yaml_matches_defaults() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let shipped = Config::from_file(&path).unwrap();
        let defaults = Config::default();
        assert_eq!(shipped.es.documents, defaults.es.documents);
        assert_eq!(shipped.es.rebuild_order, defaults.es.rebuild_order);
        assert_eq!(shipped.es.max_page_size, defaults.es.max_page_size);
        assert_eq!(shipped.auth.admin_roles, defaults.auth.admin_roles);
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = Config::from_yaml("es:\n  host: http://es:9200\n  max_batch_size: 50\n").unwrap();
        assert_eq!(config.es.host, "http://es:9200");
        assert_eq!(config.es.max_page_size, 50);
        assert_eq!(config.es.max_bulk_size, 100);
        assert_eq!(config.auth.system_user, "tcAdmin");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                "ES_HOST" => Some("http://override:9200".to_string()),
                "ES_MAX_BULK_SIZE" => Some("7".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.es.host, "http://override:9200");
        assert_eq!(config.es.max_bulk_size, 7);
    }

    #[test]
    fn test_bad_env_size_rejected() {
        let mut config = Config::default();
        let err = config
            .apply_env(|key| (key == "ES_MAX_BATCH_SIZE").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(matches!(err, ApiError::Config(_)));
    }
}
