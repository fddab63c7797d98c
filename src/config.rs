use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Tie-break policy when a project-wide unqualified reference matches several
/// declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityPolicy {
    /// Pick the declaration lexically closest to the referencing entity
    /// (same file first, then shortest path distance, then line distance).
    #[default]
    NearestDeclaration,
    /// Pick the first declaration in walk order.
    FirstDeclaration,
}

/// Thresholds for smell detection. These are configuration, not part of the
/// metrics engine contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricThresholds {
    pub god_object_methods: usize,
    pub god_object_loc: usize,
    pub long_parameter_list: usize,
    pub feature_envy_ratio: f64,
    pub secret_min_entropy: f64,
    pub secret_min_length: usize,
}

impl Default for MetricThresholds {
    fn default() -> Self {
        Self {
            god_object_methods: 20,
            god_object_loc: 500,
            long_parameter_list: 5,
            feature_envy_ratio: 0.7,
            secret_min_entropy: 3.0,
            secret_min_length: 12,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Upper bound for a single analysis gateway call.
    pub analysis_timeout_secs: u64,
    /// Endpoint for the HTTP analysis gateway; None disables remote analysis
    /// and entities keep their static metrics only.
    pub analysis_endpoint: Option<String>,
    /// Directory names skipped while walking a project tree.
    pub excluded_dirs: Vec<String>,
    /// How many imported entities are inlined into the analysis context.
    pub context_import_limit: usize,
    /// How many called entities are inlined into the analysis context.
    pub context_call_limit: usize,
    pub thresholds: MetricThresholds,
    pub ambiguity_policy: AmbiguityPolicy,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            analysis_timeout_secs: 60,
            analysis_endpoint: None,
            excluded_dirs: vec![
                "vendor".to_string(),
                "node_modules".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
                "venv".to_string(),
                "migrations".to_string(),
            ],
            context_import_limit: 5,
            context_call_limit: 3,
            thresholds: MetricThresholds::default(),
            ambiguity_policy: AmbiguityPolicy::default(),
        }
    }
}

impl IndexerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Loads from `path` when given, otherwise falls back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn analysis_timeout(&self) -> Duration {
        Duration::from_secs(self.analysis_timeout_secs)
    }
}
