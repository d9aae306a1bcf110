//! Engine configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Tunables shared by every conversion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Records buffered by an emitter before it flushes.
    pub batch_size: usize,

    /// Transform pipelines kept per run.
    pub transform_cache_capacity: usize,

    /// Largest grid (in cells) whose reprojected coordinates are cached
    /// across layers.
    pub coordinate_cache_max_cells: usize,

    /// Relative tolerance when comparing values to the nodata sentinel.
    pub nodata_tolerance: f64,

    /// Warnings kept on the result; later ones are only counted.
    pub max_warnings: usize,

    /// Directory for multi-column spill files. System temp when unset.
    pub spill_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: 4096,
            transform_cache_capacity: 8,
            coordinate_cache_max_cells: 4_000_000,
            nodata_tolerance: 1e-6,
            max_warnings: 1000,
            spill_dir: None,
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("G2P_BATCH_SIZE") {
            if let Ok(size) = val.parse() {
                config.batch_size = size;
            }
        }

        if let Ok(val) = std::env::var("G2P_TRANSFORM_CACHE_CAPACITY") {
            if let Ok(size) = val.parse() {
                config.transform_cache_capacity = size;
            }
        }

        if let Ok(val) = std::env::var("G2P_COORD_CACHE_MAX_CELLS") {
            if let Ok(cells) = val.parse() {
                config.coordinate_cache_max_cells = cells;
            }
        }

        if let Ok(val) = std::env::var("G2P_NODATA_TOLERANCE") {
            if let Ok(tol) = val.parse() {
                config.nodata_tolerance = tol;
            }
        }

        if let Ok(val) = std::env::var("G2P_MAX_WARNINGS") {
            if let Ok(max) = val.parse() {
                config.max_warnings = max;
            }
        }

        if let Ok(val) = std::env::var("G2P_SPILL_DIR") {
            if !val.is_empty() {
                config.spill_dir = Some(PathBuf::from(val));
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }

        if self.transform_cache_capacity == 0 {
            return Err("transform_cache_capacity must be > 0".to_string());
        }

        if !(self.nodata_tolerance >= 0.0) {
            return Err("nodata_tolerance must be >= 0".to_string());
        }

        if let Some(dir) = &self.spill_dir {
            if !dir.is_dir() {
                return Err(format!("spill_dir {} is not a directory", dir.display()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.batch_size, 4096);
        assert_eq!(config.transform_cache_capacity, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = EngineConfig {
            batch_size: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            nodata_tolerance: -1.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            nodata_tolerance: f64::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            transform_cache_capacity: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_json::from_str(r#"{"batch_size": 10}"#).unwrap();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.max_warnings, 1000);
    }
}
