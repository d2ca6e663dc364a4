//! Engine configuration.
//!
//! All knobs are serde-deserializable so deployments can ship a JSON config
//! file; every field falls back to a sensible default.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};
use crate::verdict::StrictnessLevel;

/// How selected detectors are executed within one validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One task per detector, joined deterministically. Lower worst-case
    /// latency at the cost of occasionally wasted remote calls.
    #[default]
    Parallel,
    /// Stage-by-stage with short-circuit. Minimizes remote-call cost.
    Sequential,
}

/// A threshold value per strictness level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrictnessThresholds {
    pub minimal: f32,
    pub standard: f32,
    pub high: f32,
    pub maximum: f32,
}

impl StrictnessThresholds {
    /// Returns the threshold for the given level.
    pub fn get(&self, level: StrictnessLevel) -> f32 {
        match level {
            StrictnessLevel::Minimal => self.minimal,
            StrictnessLevel::Standard => self.standard,
            StrictnessLevel::High => self.high,
            StrictnessLevel::Maximum => self.maximum,
        }
    }
}

/// Ensemble vote weights per detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleWeights {
    /// Pattern votes are binary; this is their fixed weight.
    pub pattern: f32,
    /// Statistical weight, scaled by the detector's confidence.
    pub statistical: f32,
    /// Remote weight, scaled by the detector's confidence.
    pub remote: f32,
}

impl Default for EnsembleWeights {
    fn default() -> Self {
        Self {
            pattern: 1.0,
            statistical: 0.8,
            remote: 1.2,
        }
    }
}

/// Statistical classifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatisticalConfig {
    /// Path to a trained model file (JSON). Absent or unreadable files fall
    /// back to the keyword-density heuristic.
    pub model_path: Option<String>,
    /// Minimum secure probability required per strictness level.
    pub thresholds: StrictnessThresholds,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            thresholds: StrictnessThresholds {
                minimal: 0.35,
                standard: 0.5,
                high: 0.6,
                maximum: 0.7,
            },
        }
    }
}

/// Remote judge configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Chat-completions endpoint URL.
    pub endpoint: String,
    /// Model identifier sent to the endpoint.
    pub model: String,
    /// Bearer credential. When absent the judge degrades to secure with a
    /// diagnostic, unless `required` is set.
    pub api_key: Option<String>,
    /// Hard timeout for the network call, in seconds.
    pub timeout_secs: u64,
    /// Fail engine construction when no credential is configured.
    pub required: bool,
    /// Run the judge even at Minimal/Standard strictness.
    pub force: bool,
    /// Minimum insecurity required to fail content, per strictness level.
    /// Permissive levels set a high bar so only egregious content fails.
    pub fail_thresholds: StrictnessThresholds,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            timeout_secs: 10,
            required: false,
            force: false,
            fail_thresholds: StrictnessThresholds {
                minimal: 0.9,
                standard: 0.7,
                high: 0.5,
                maximum: 0.3,
            },
        }
    }
}

impl RemoteConfig {
    /// Returns the timeout as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Adaptive risk model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveConfig {
    /// Whether outcomes feed back into risk priors.
    pub enabled: bool,
    /// Retention bound: above this, the least-recently-seen signature
    /// statistics are pruned.
    pub max_signatures: usize,
    /// Risk prior above which Standard strictness escalates detectors.
    pub escalation_prior: f32,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_signatures: 1024,
            escalation_prior: 0.7,
        }
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Parallel or sequential detector execution.
    pub mode: ExecutionMode,
    /// Result cache capacity; 0 disables caching.
    pub cache_capacity: usize,
    /// Insecure detector verdicts at or above this confidence short-circuit
    /// the pipeline at permissive strictness levels.
    pub short_circuit_confidence: f32,
    /// Minimum weighted-average secure score per strictness level.
    pub ensemble_thresholds: StrictnessThresholds,
    /// Ensemble vote weights.
    pub weights: EnsembleWeights,
    /// Lexical tokens that escalate Standard-strictness requests to the
    /// deeper detectors.
    pub escalation_triggers: Vec<String>,
    /// Payload length beyond which Standard strictness escalates.
    pub escalation_length: usize,
    pub statistical: StatisticalConfig,
    pub remote: RemoteConfig,
    pub adaptive: AdaptiveConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Parallel,
            cache_capacity: 1024,
            short_circuit_confidence: 0.85,
            ensemble_thresholds: StrictnessThresholds {
                minimal: 0.3,
                standard: 0.5,
                high: 0.6,
                maximum: 0.7,
            },
            weights: EnsembleWeights::default(),
            escalation_triggers: [
                "override", "bypass", "encode", "decode", "exec", "eval", "system", "shell",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            escalation_length: 500,
            statistical: StatisticalConfig::default(),
            remote: RemoteConfig::default(),
            adaptive: AdaptiveConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.remote.required && self.remote.api_key.is_none() {
            return Err(EngineError::MissingCredentials);
        }
        if self.remote.endpoint.is_empty() {
            return Err(EngineError::Config("remote endpoint is empty".into()));
        }
        if !(0.0..=1.0).contains(&self.short_circuit_confidence) {
            return Err(EngineError::Config(
                "short_circuit_confidence must be in [0, 1]".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, ExecutionMode::Parallel);
        assert_eq!(config.cache_capacity, 1024);
    }

    #[test]
    fn statistical_thresholds_tighten_with_strictness() {
        let t = StatisticalConfig::default().thresholds;
        assert!(t.minimal < t.standard);
        assert!(t.standard < t.high);
        assert!(t.high < t.maximum);
    }

    #[test]
    fn remote_fail_thresholds_loosen_with_strictness() {
        // Permissive levels need more insecurity before failing content.
        let t = RemoteConfig::default().fail_thresholds;
        assert!(t.minimal > t.standard);
        assert!(t.standard > t.high);
        assert!(t.high > t.maximum);
    }

    #[test]
    fn required_remote_without_key_is_rejected() {
        let config = EngineConfig {
            remote: RemoteConfig {
                required: true,
                api_key: None,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(EngineError::MissingCredentials)
        ));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: EngineConfig =
            serde_json::from_str(r#"{"mode": "sequential", "cache_capacity": 16}"#).unwrap();
        assert_eq!(config.mode, ExecutionMode::Sequential);
        assert_eq!(config.cache_capacity, 16);
        assert_eq!(config.weights, EnsembleWeights::default());
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn from_file_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(EngineConfig::from_file(&path).is_err());
    }

    #[test]
    fn threshold_lookup_by_level() {
        let t = StrictnessThresholds {
            minimal: 0.1,
            standard: 0.2,
            high: 0.3,
            maximum: 0.4,
        };
        assert_eq!(t.get(StrictnessLevel::Minimal), 0.1);
        assert_eq!(t.get(StrictnessLevel::Maximum), 0.4);
    }
}
