use serde::{Deserialize, Serialize};

/// Entity types persisted in the relational store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Model {
    Taxonomy,
    Skill,
}

impl Model {
    pub const ALL: [Model; 2] = [Model::Taxonomy, Model::Skill];

    /// Name used in messages, e.g. "cannot find Skill where ..."
    pub fn name(&self) -> &'static str {
        match self {
            Model::Taxonomy => "Taxonomy",
            Model::Skill => "Skill",
        }
    }

    /// Logical search-index resource this model maps to
    pub fn resource(&self) -> &'static str {
        match self {
            Model::Taxonomy => "taxonomy",
            Model::Skill => "skill",
        }
    }

    pub fn table(&self) -> &'static str {
        match self {
            Model::Taxonomy => "taxonomies",
            Model::Skill => "skills",
        }
    }

    /// Query parameters accepted as equality filters on search
    pub fn filter_fields(&self) -> &'static [&'static str] {
        match self {
            Model::Taxonomy => &["name"],
            Model::Skill => &["taxonomyId", "name", "externalId"],
        }
    }

    /// Field combinations that must not repeat across records
    pub fn unique_groups(&self) -> &'static [&'static [&'static str]] {
        match self {
            Model::Taxonomy => &[],
            Model::Skill => &[&["taxonomyId", "externalId", "name"]],
        }
    }
}

impl std::fmt::Display for Model {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "taxonomy" | "taxonomies" => Ok(Model::Taxonomy),
            "skill" | "skills" => Ok(Model::Skill),
            _ => Err(format!("Unknown model: {}", s)),
        }
    }
}
