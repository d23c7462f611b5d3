// THEORY:
// Runtime settings for the whole engine live in one JSON document. Every section
// and every field has a default, so an empty object is a valid configuration and a
// file only needs to mention what it changes. Worker and forest counts default to
// the number of CPUs.

use crate::core_modules::coordinate::Axis;
use crate::core_modules::extent::Extent;
use crate::core_modules::features::FilterSpec;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub classifier: ClassifierConfig,
    pub orchestrator: OrchestratorConfig,
    pub blockwise: BlockwiseConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Trees across all forests.
    pub total_trees: usize,
    pub num_forests: usize,
    /// Fraction of labelled samples kept for training; `None` keeps all of them.
    pub label_proportion: Option<f64>,
    /// Feature blocks kept in the classifier's LRU cache.
    pub feature_cache_capacity: usize,
    /// Filters stacked into the feature extractor, in order.
    pub filters: Vec<FilterSpec>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            total_trees: 100,
            num_forests: num_cpus::get(),
            label_proportion: None,
            feature_cache_capacity: 16,
            filters: vec![
                FilterSpec {
                    name: "Identity".into(),
                    params: serde_json::Value::Null,
                },
                FilterSpec {
                    name: "BoxMean".into(),
                    params: serde_json::json!({ "radius": 1 }),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Ranks including the orchestrator itself.
    pub num_processes: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            num_processes: num_cpus::get() + 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockwiseConfig {
    pub tile_shape: Extent,
}

impl Default for BlockwiseConfig {
    fn default() -> Self {
        Self {
            tile_shape: Extent::from_pairs(&[(Axis::X, 256.0), (Axis::Y, 256.0)])
                .unwrap_or_default(),
        }
    }
}

impl RuntimeConfig {
    /// Rejects settings that no run could work with.
    pub fn validate(&self) -> Result<()> {
        let classifier = &self.classifier;
        if classifier.total_trees == 0 || classifier.num_forests == 0 {
            return Err(Error::Configuration(
                "total_trees and num_forests must be at least 1".into(),
            ));
        }
        if classifier.feature_cache_capacity == 0 {
            return Err(Error::Configuration("feature_cache_capacity must be at least 1".into()));
        }
        if let Some(proportion) = classifier.label_proportion {
            if !(proportion > 0.0 && proportion <= 1.0) {
                return Err(Error::Configuration(format!(
                    "label_proportion must lie in (0, 1], got {proportion}"
                )));
            }
        }
        if classifier.filters.is_empty() {
            return Err(Error::Configuration("at least one filter is required".into()));
        }
        if self.orchestrator.num_processes < 2 {
            return Err(Error::Configuration(
                "num_processes must leave room for at least one worker".into(),
            ));
        }
        Ok(())
    }
}

/// Reads and validates a JSON configuration file.
pub fn load_config(path: &Path) -> Result<RuntimeConfig> {
    let data = fs::read_to_string(path)?;
    let config: RuntimeConfig = serde_json::from_str(&data)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.classifier.total_trees, 100);
        assert!(config.classifier.num_forests >= 1);
        assert_eq!(config.blockwise.tile_shape.x(), 256.0);
        config.validate().unwrap();
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: RuntimeConfig = serde_json::from_str(
            r#"{
                "classifier": { "total_trees": 10, "num_forests": 3 },
                "blockwise": { "tile_shape": [1, 64, 64, 1, 1] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.classifier.total_trees, 10);
        assert_eq!(config.classifier.feature_cache_capacity, 16);
        assert_eq!(config.blockwise.tile_shape.y(), 64.0);
        assert_eq!(config.orchestrator, OrchestratorConfig::default());
    }

    #[test]
    fn invalid_settings_are_rejected() {
        let zero_tile = serde_json::from_str::<RuntimeConfig>(
            r#"{ "blockwise": { "tile_shape": [1, 0, 64, 1, 1] } }"#,
        );
        assert!(zero_tile.is_err());

        let mut config = RuntimeConfig::default();
        config.orchestrator.num_processes = 1;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let mut config = RuntimeConfig::default();
        config.classifier.label_proportion = Some(1.5);
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_config_reports_missing_files() {
        let missing = Path::new("/nonexistent/tilewise.json");
        assert!(matches!(load_config(missing), Err(Error::Io(_))));
    }

    #[test]
    fn load_config_reads_json_files() {
        let path = std::env::temp_dir().join(format!("tilewise-config-{}.json", std::process::id()));
        fs::write(&path, r#"{ "orchestrator": { "num_processes": 3 } }"#).unwrap();
        let config = load_config(&path).unwrap();
        fs::remove_file(&path).unwrap();
        assert_eq!(config.orchestrator.num_processes, 3);
    }
}
