//! Mapper configuration.
//!
//! A [`MapperConfig`] carries the database name used for fully qualified references
//! and the class mappings of every entity type. It is usually loaded from JSON:
//!
//! ```ignore
//! let config = MapperConfig::from_json_str(r#"{
//!     "database": "app",
//!     "mappings": [
//!         { "name": "User", "collection": "users", "fields": [{ "name": "id", "identifier": true }] }
//!     ]
//! }"#)?;
//! let registry = config.registry()?;
//! ```

use serde::{Deserialize, Serialize};

use crate::{
    error::{MapperError, MapperResult},
    mapping::{ClassMapping, MappingRegistry},
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MapperConfig {
    /// Database name written into `$db` of fully qualified references.
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub mappings: Vec<ClassMapping>,
}

impl MapperConfig {
    /// Parses a JSON configuration.
    ///
    /// # Errors
    ///
    /// Structurally valid JSON describing invalid mappings (an unknown reference storage
    /// policy, a missing required key) yields [`MapperError::MappingConfiguration`];
    /// malformed JSON yields [`MapperError::Serialization`].
    pub fn from_json_str(json: &str) -> MapperResult<Self> {
        serde_json::from_str(json).map_err(|err| {
            if err.is_data() {
                MapperError::MappingConfiguration(err.to_string())
            } else {
                MapperError::Serialization(err.to_string())
            }
        })
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = Some(database.to_string());
        self
    }

    pub fn with_mapping(mut self, mapping: ClassMapping) -> Self {
        self.mappings.push(mapping);
        self
    }

    /// Validates every mapping into a registry.
    pub fn registry(&self) -> MapperResult<MappingRegistry> {
        let mut registry = MappingRegistry::new();
        for mapping in &self.mappings {
            registry.register(mapping.clone())?;
        }

        Ok(registry)
    }
}
