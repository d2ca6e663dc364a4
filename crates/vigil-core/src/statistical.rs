//! Statistical text classifier (second detection layer).
//!
//! Wraps a swappable trained model (tf-idf vectorizer + logistic
//! regression, shipped as JSON). When no model file is available the
//! classifier degrades to a deterministic keyword-density heuristic, so the
//! layer is always present.
//!
//! The underlying model is binary (secure/insecure); threat categories are
//! derived by rule-matching the raw text, not by model introspection.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::complexity::ComplexityProfile;
use crate::config::StatisticalConfig;
use crate::error::{EngineError, Result};
use crate::verdict::{
    DetectionMethod, DetectorVerdict, StrictnessLevel, ThreatCategory, ThreatFinding,
};

/// A single strong signal vetoes a borderline-secure aggregate.
const VETO_SCORE: f32 = 0.8;

/// Maximum threshold tightening applied for complex content.
const MAX_COMPLEXITY_TIGHTENING: f32 = 0.2;

/// Risk terms used for both the fallback heuristic and threat derivation.
const RISK_TERMS: &[(&str, ThreatCategory, f32)] = &[
    // Command execution
    ("rm -rf", ThreatCategory::CommandInjection, 0.95),
    ("os.system", ThreatCategory::CommandInjection, 0.9),
    ("format c:", ThreatCategory::CommandInjection, 0.9),
    ("exec(", ThreatCategory::CommandInjection, 0.85),
    ("eval(", ThreatCategory::CommandInjection, 0.85),
    ("del /f", ThreatCategory::CommandInjection, 0.8),
    ("subprocess", ThreatCategory::CommandInjection, 0.7),
    ("spawn", ThreatCategory::CommandInjection, 0.6),
    ("unlink", ThreatCategory::CommandInjection, 0.5),
    // Privilege terms
    ("setuid", ThreatCategory::PrivilegeEscalation, 0.8),
    ("chmod 777", ThreatCategory::PrivilegeEscalation, 0.8),
    ("sudo", ThreatCategory::PrivilegeEscalation, 0.7),
    ("as root", ThreatCategory::PrivilegeEscalation, 0.6),
    // Exfiltration verbs
    ("exfiltrat", ThreatCategory::DataExfiltration, 0.9),
    ("curl -d", ThreatCategory::DataExfiltration, 0.7),
    ("upload", ThreatCategory::DataExfiltration, 0.5),
    ("wget", ThreatCategory::DataExfiltration, 0.5),
    // SQL
    ("drop table", ThreatCategory::SqlInjection, 0.9),
    ("union select", ThreatCategory::SqlInjection, 0.85),
    // Prompt subversion
    (
        "ignore previous instructions",
        ThreatCategory::PromptInjection,
        0.9,
    ),
    ("jailbreak", ThreatCategory::PromptInjection, 0.8),
    ("bypass", ThreatCategory::PromptInjection, 0.6),
    // Resource exhaustion
    ("fork bomb", ThreatCategory::DenialOfService, 0.9),
    ("while true", ThreatCategory::DenialOfService, 0.6),
];

/// Trained model file: tf-idf vectorizer + logistic regression, where the
/// positive class is "secure".
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    /// Term → feature index.
    vocabulary: HashMap<String, usize>,
    /// Inverse document frequency per feature index.
    idf: Vec<f32>,
    /// Regression coefficient per feature index.
    coefficients: Vec<f32>,
    intercept: f32,
}

impl LinearModel {
    /// Loads a model from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(&path)?;
        let model: LinearModel = serde_json::from_str(&contents)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let dims = model.vocabulary.len();
        if model.idf.len() != dims || model.coefficients.len() != dims {
            return Err(EngineError::ModelLoad(format!(
                "dimension mismatch: vocabulary {}, idf {}, coefficients {}",
                dims,
                model.idf.len(),
                model.coefficients.len()
            )));
        }
        if model.vocabulary.values().any(|&i| i >= dims) {
            return Err(EngineError::ModelLoad(
                "vocabulary index out of range".to_string(),
            ));
        }

        Ok(model)
    }

    /// Attempts to load a model, returning `None` if unavailable.
    ///
    /// This is the preferred way to initialize when graceful fallback is
    /// desired.
    pub fn try_load(path: impl AsRef<Path>) -> Option<Self> {
        match Self::load(&path) {
            Ok(model) => Some(model),
            Err(e) => {
                warn!(
                    path = %path.as_ref().display(),
                    error = %e,
                    "Statistical model unavailable, using keyword-density fallback"
                );
                None
            }
        }
    }

    /// Predicts the probability that the content is secure.
    pub fn predict(&self, content: &str) -> f32 {
        let lower = content.to_lowercase();
        let mut tf: HashMap<usize, f32> = HashMap::new();

        for token in lower.split(|c: char| !c.is_alphanumeric() && c != '_') {
            if token.is_empty() {
                continue;
            }
            if let Some(&idx) = self.vocabulary.get(token) {
                *tf.entry(idx).or_insert(0.0) += 1.0;
            }
        }

        let mut score = self.intercept;
        for (idx, count) in tf {
            score += self.coefficients[idx] * count * self.idf[idx];
        }

        sigmoid(score)
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Statistical classifier with a trained model or deterministic fallback.
pub struct StatisticalClassifier {
    model: Option<LinearModel>,
    config: StatisticalConfig,
}

impl StatisticalClassifier {
    /// Creates a classifier, loading the configured model if present.
    pub fn new(config: StatisticalConfig) -> Self {
        let model = config
            .model_path
            .as_deref()
            .and_then(|path| LinearModel::try_load(path));

        if model.is_some() {
            debug!("Statistical classifier using trained model");
        }

        Self { model, config }
    }

    /// Returns true if a trained model is loaded.
    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Classifies content against the strictness-indexed threshold table.
    ///
    /// Complex content must clear a higher bar: the threshold is tightened
    /// proportionally to the complexity score, up to 0.2.
    pub fn classify(
        &self,
        content: &str,
        strictness: StrictnessLevel,
        complexity: &ComplexityProfile,
    ) -> DetectorVerdict {
        let start = Instant::now();

        let secure_probability = match &self.model {
            Some(model) => model.predict(content),
            None => fallback_secure_probability(content),
        };

        let mut threshold = self.config.thresholds.get(strictness);
        if complexity.is_complex() {
            threshold = (threshold
                + (MAX_COMPLEXITY_TIGHTENING * complexity.score).min(MAX_COMPLEXITY_TIGHTENING))
            .min(0.95);
        }

        let threats = derive_threats(content);
        let max_threat = threats.iter().map(|t| t.score).fold(0.0, f32::max);

        let mut is_secure = secure_probability >= threshold;
        let mut confidence = if is_secure {
            secure_probability
        } else {
            1.0 - secure_probability
        };

        // A single strong signal vetoes a borderline-secure aggregate.
        if is_secure && max_threat > VETO_SCORE {
            debug!(
                max_threat,
                secure_probability, "Strong threat signal vetoes borderline-secure aggregate"
            );
            is_secure = false;
            confidence = max_threat;
        }

        DetectorVerdict {
            is_secure,
            method: DetectionMethod::Statistical,
            confidence: confidence.clamp(0.0, 1.0),
            threats,
            matched_excerpt: None,
            fix_suggestion: None,
            latency: Some(start.elapsed()),
            diagnostic: None,
        }
    }
}

/// Fallback: security scored inversely to counted risk-keyword occurrences.
fn fallback_secure_probability(content: &str) -> f32 {
    let lower = content.to_lowercase();
    let mut risk = 0.0_f32;

    for (term, _, weight) in RISK_TERMS {
        let count = lower.matches(term).count();
        if count > 0 {
            risk += weight * count as f32;
        }
    }

    1.0 / (1.0 + risk)
}

/// Derives threat findings by rule-matching the raw text.
fn derive_threats(content: &str) -> Vec<ThreatFinding> {
    let lower = content.to_lowercase();
    let findings = RISK_TERMS
        .iter()
        .filter(|(term, _, _)| lower.contains(term))
        .map(|(term, category, weight)| {
            ThreatFinding::new(*category, *weight, format!("Risk term \"{}\" present", term))
        })
        .collect();

    ThreatFinding::merge(findings)
}
