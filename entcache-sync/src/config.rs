//! Data-service configuration and URL conventions.

use std::collections::HashMap;

/// Configuration for the data-service pipelines.
#[derive(Debug, Clone)]
pub struct DataServiceConfig {
    /// Root of every resource URL.
    pub root: String,
    /// Per-request timeout (ms). `0` disables the timeout.
    pub timeout_ms: u64,
    /// URL used by change-set saves that do not name one.
    pub save_url: String,
    /// Plural names that the default rules get wrong, by entity name.
    pub plurals: HashMap<String, String>,
}

impl Default for DataServiceConfig {
    fn default() -> Self {
        Self {
            root: "api".to_string(),
            timeout_ms: 30_000,
            save_url: "api/entity-cache/save".to_string(),
            plurals: HashMap::new(),
        }
    }
}

impl DataServiceConfig {
    /// URL generator for this configuration.
    pub fn url_generator(&self) -> HttpUrlGenerator {
        HttpUrlGenerator::new(self.root.clone()).with_plurals(self.plurals.clone())
    }
}

/// Builds REST resource URLs from entity names.
///
/// `Hero` maps to `api/hero/` for single-entity requests and to
/// `api/heroes/` for collection requests.
#[derive(Debug, Clone, Default)]
pub struct HttpUrlGenerator {
    root: String,
    plurals: HashMap<String, String>,
}

impl HttpUrlGenerator {
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into().trim_end_matches('/').to_string(),
            plurals: HashMap::new(),
        }
    }

    pub fn with_plurals(mut self, plurals: HashMap<String, String>) -> Self {
        self.plurals = plurals;
        self
    }

    /// URL of one entity resource, to which a key may be appended.
    pub fn entity_resource_url(&self, entity_name: &str) -> String {
        format!("{}/{}/", self.root, entity_name.to_lowercase())
    }

    /// URL of the collection resource.
    pub fn collection_resource_url(&self, entity_name: &str) -> String {
        format!("{}/{}/", self.root, self.pluralize(entity_name).to_lowercase())
    }

    pub fn pluralize(&self, entity_name: &str) -> String {
        if let Some(plural) = self.plurals.get(entity_name) {
            return plural.clone();
        }
        let lower = entity_name.to_lowercase();
        if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey")
            && !lower.ends_with("oy") && !lower.ends_with("uy")
        {
            format!("{}ies", &entity_name[..entity_name.len() - 1])
        } else if ["s", "x", "z", "ch", "sh"].iter().any(|end| lower.ends_with(end)) {
            format!("{entity_name}es")
        } else {
            format!("{entity_name}s")
        }
    }
}
