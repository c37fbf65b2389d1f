//! TOML configuration for the tally service.
//!
//! ```toml
//! [service]
//! data_dir = "/var/lib/tally"
//!
//! [log]
//! level = "info"
//!
//! [[collection]]
//! collection_id = "books"
//! pillars = ["disk-a", "disk-b", "tape"]
//! missing_file_grace = 604800
//!
//! [collection.obsolete_checksum_age_overrides]
//! tape = 63072000
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde::Deserialize;
use tally_types::CollectionSettings;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Storage locations.
    pub service: ServiceSection,
    /// Logging configuration.
    pub log: LogSection,
    /// One entry per checked collection.
    #[serde(rename = "collection")]
    pub collections: Vec<CollectionSettings>,
}

/// `[service]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServiceSection {
    /// Directory for persistent data (metadata store, reports).
    pub data_dir: PathBuf,
    /// Where integrity reports go. Defaults to `<data_dir>/reports`.
    pub reports_dir: Option<PathBuf>,
}

impl Default for ServiceSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".tally"))
            .unwrap_or_else(|| PathBuf::from(".tally"));
        Self {
            data_dir,
            reports_dir: None,
        }
    }
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("cannot read {}", p.display()))?;
                toml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: CliConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let mut seen = BTreeSet::new();
        for collection in &self.collections {
            if !seen.insert(&collection.collection_id) {
                bail!("collection {} is configured twice", collection.collection_id);
            }
            if collection.pillars.is_empty() {
                bail!("collection {} has no pillars", collection.collection_id);
            }
            if collection.max_page_size < 2 {
                bail!("collection {}: max_page_size must be at least 2", collection.collection_id);
            }
        }
        Ok(())
    }

    /// Directory of the metadata store.
    pub fn metadata_dir(&self) -> PathBuf {
        self.service.data_dir.join("meta")
    }

    /// Effective report directory.
    pub fn reports_dir(&self) -> PathBuf {
        self.service
            .reports_dir
            .clone()
            .unwrap_or_else(|| self.service.data_dir.join("reports"))
    }

    /// Settings of the collection named `id`.
    pub fn collection(&self, id: &str) -> anyhow::Result<&CollectionSettings> {
        self.collections
            .iter()
            .find(|c| c.collection_id.as_str() == id)
            .with_context(|| format!("collection {id} is not configured"))
    }
}
