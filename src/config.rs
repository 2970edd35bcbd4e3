use serde::{Deserialize, Serialize};

use crate::error::{LoupeError, Result};

/// Smallest memory budget a writer accepts
pub const MIN_MEMORY_BUDGET_BYTES: usize = 1024 * 1024;

/// Index settings configuration
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexSettings {
    #[serde(default)]
    pub writer: WriterConfig,
    #[serde(default)]
    pub merge_policy: MergePolicyConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

impl IndexSettings {
    pub fn validate(&self) -> Result<()> {
        self.writer.validate()?;
        self.scoring.validate()
    }
}

/// Writer buffering configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Approximate heap size of the in-progress segment before it is flushed
    pub memory_budget_bytes: usize,
    /// Maximum number of buffered documents before a flush
    pub max_buffered_docs: usize,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            memory_budget_bytes: 50 * 1024 * 1024, // 50MB
            max_buffered_docs: 100_000,
        }
    }
}

impl WriterConfig {
    pub fn with_memory_budget(mut self, bytes: usize) -> Self {
        self.memory_budget_bytes = bytes;
        self
    }

    pub fn with_max_buffered_docs(mut self, docs: usize) -> Self {
        self.max_buffered_docs = docs;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.memory_budget_bytes < MIN_MEMORY_BUDGET_BYTES {
            return Err(LoupeError::InvalidArgument(format!(
                "memory budget of {} bytes is below the minimum of {} bytes",
                self.memory_budget_bytes, MIN_MEMORY_BUDGET_BYTES
            )));
        }
        if self.max_buffered_docs == 0 {
            return Err(LoupeError::InvalidArgument(
                "max_buffered_docs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Merge policy selection
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MergePolicyConfig {
    /// Never merge automatically; explicit merges still work
    NoMerge,
    /// Group segments into logarithmic size levels
    Log {
        min_num_segments: usize,
        max_docs_before_merge: u32,
        del_docs_ratio_before_merge: f64,
        level_log_size: f64,
        min_layer_size: u32,
    },
    /// Group segments into size tiers by document count
    Tiered {
        segments_per_tier: usize,
        max_merge_count: usize,
        floor_docs: u32,
        delete_ratio_threshold: f64,
    },
}

impl Default for MergePolicyConfig {
    fn default() -> Self {
        MergePolicyConfig::log()
    }
}

impl MergePolicyConfig {
    pub fn log() -> Self {
        MergePolicyConfig::Log {
            min_num_segments: 8,
            max_docs_before_merge: 10_000_000,
            del_docs_ratio_before_merge: 1.0,
            level_log_size: 0.75,
            min_layer_size: 10_000,
        }
    }

    pub fn tiered() -> Self {
        MergePolicyConfig::Tiered {
            segments_per_tier: 10,
            max_merge_count: 10,
            floor_docs: 1_000,
            delete_ratio_threshold: 0.15,
        }
    }
}

/// Relevance scoring parameters
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    /// Saturation constant k in tf / (tf + k)
    pub tf_saturation_k: f32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            tf_saturation_k: 1.2,
        }
    }
}

impl ScoringConfig {
    fn validate(&self) -> Result<()> {
        if !(self.tf_saturation_k > 0.0) || !self.tf_saturation_k.is_finite() {
            return Err(LoupeError::InvalidArgument(format!(
                "tf_saturation_k must be a positive number, got {}",
                self.tf_saturation_k
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(IndexSettings::default().validate().is_ok());
    }

    #[test]
    fn test_small_memory_budget_rejected() {
        let mut settings = IndexSettings::default();
        settings.writer = settings.writer.with_memory_budget(1024);
        assert!(matches!(settings.validate(), Err(LoupeError::InvalidArgument(_))));
    }

    #[test]
    fn test_settings_json_roundtrip() {
        let settings = IndexSettings {
            merge_policy: MergePolicyConfig::tiered(),
            ..Default::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("\"type\":\"tiered\""));
        let back: IndexSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn test_missing_sections_default() {
        let settings: IndexSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, IndexSettings::default());
    }
}
