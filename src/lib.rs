pub mod access;
pub mod auth;
pub mod config;
pub mod context;
pub mod enrich;
pub mod entity;
pub mod error;
pub mod index;
pub mod rebuild;
pub mod registry;
pub mod search;
pub mod service;
pub mod storage;

pub use config::Config;
pub use context::Context;
pub use error::{ApiError, Result};
pub use index::{EsClient, MemoryIndex, SearchIndex};
pub use rebuild::{RebuildJob, RebuildReport};
pub use service::{EntityService, SkillService, TaxonomyService};
pub use storage::{RecordStore, SqliteStore};
