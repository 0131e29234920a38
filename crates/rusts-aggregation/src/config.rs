//! Aggregation configuration
//!
//! Loaded from TOML, typically as the `[aggregation]` table of the query
//! node configuration.

use crate::error::{AggregationError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Tunables for building aggregation sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// Number of lock stripes for stddev/variance buckets.
    /// 0 or 1 selects the single-lock bucket.
    #[serde(default)]
    pub bucket_stripes: usize,
    /// Maximum number of buckets a sampling session allocates
    #[serde(default = "default_max_buckets")]
    pub max_buckets: usize,
    /// Cadence in milliseconds for sampling aggregations that specify none
    #[serde(default = "default_size")]
    pub default_size: Option<i64>,
}

fn default_max_buckets() -> usize {
    1_000_000
}

fn default_size() -> Option<i64> {
    Some(60_000)
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            bucket_stripes: 0,
            max_buckets: default_max_buckets(),
            default_size: default_size(),
        }
    }
}

impl AggregationConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            AggregationError::Configuration(format!("Failed to read config file: {}", e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AggregationError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_buckets == 0 {
            return Err(AggregationError::Configuration(
                "max_buckets must be positive".to_string(),
            ));
        }
        if let Some(size) = self.default_size {
            if size <= 0 {
                return Err(AggregationError::Configuration(format!(
                    "default_size must be positive, got {}",
                    size
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AggregationConfig::default();
        assert_eq!(config.bucket_stripes, 0);
        assert_eq!(config.max_buckets, 1_000_000);
        assert_eq!(config.default_size, Some(60_000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_toml() {
        let config = AggregationConfig::from_toml(
            r#"
            bucket_stripes = 8
            default_size = 1000
            "#,
        )
        .unwrap();

        assert_eq!(config.bucket_stripes, 8);
        assert_eq!(config.default_size, Some(1000));
        assert_eq!(config.max_buckets, 1_000_000);
    }

    #[test]
    fn test_invalid_config() {
        assert!(AggregationConfig::from_toml("max_buckets = 0").is_err());
        assert!(AggregationConfig::from_toml("default_size = -5").is_err());
        assert!(AggregationConfig::from_toml("bucket_stripes = \"many\"").is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "bucket_stripes = 4").unwrap();

        let config = AggregationConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bucket_stripes, 4);

        assert!(AggregationConfig::from_file("/nonexistent/aggregation.toml").is_err());
    }
}
