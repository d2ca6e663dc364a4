//! Verdict types: the engine's data model and sole external contract.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Strictness level controlling which detectors run and how permissive
/// thresholds are.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum StrictnessLevel {
    /// Pattern matching only; blocks only critical destructive content.
    Minimal,
    /// Pattern matching plus escalation to deeper detectors on triggers.
    #[default]
    Standard,
    /// All detectors run; any insecure vote blocks.
    High,
    /// All detectors run; most conservative thresholds.
    Maximum,
}

impl StrictnessLevel {
    /// Returns all levels, loosest first.
    pub fn all() -> &'static [StrictnessLevel] {
        &[
            StrictnessLevel::Minimal,
            StrictnessLevel::Standard,
            StrictnessLevel::High,
            StrictnessLevel::Maximum,
        ]
    }

    /// Returns a human-readable name for this level.
    pub fn name(&self) -> &'static str {
        match self {
            StrictnessLevel::Minimal => "Minimal",
            StrictnessLevel::Standard => "Standard",
            StrictnessLevel::High => "High",
            StrictnessLevel::Maximum => "Maximum",
        }
    }
}

/// What kind of payload is being validated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationKind {
    /// An instruction heading into a model.
    #[default]
    Prompt,
    /// A generated output heading back to the caller.
    Output,
    /// Parameters of an operation about to be executed.
    Operation,
}

/// A validation request. Created per call; never persisted.
#[derive(Debug, Clone)]
pub struct ValidationRequest {
    /// The text payload to validate.
    pub content: String,
    /// Requested strictness level.
    pub strictness: StrictnessLevel,
    /// What the payload is.
    pub kind: ValidationKind,
    /// Optional identifier of the calling agent.
    pub caller_id: Option<String>,
}

impl ValidationRequest {
    /// Creates a new request. Content is taken as-is; empty text is a valid
    /// (and trivially secure) payload rather than an error.
    pub fn new(content: impl Into<String>, strictness: StrictnessLevel) -> Self {
        Self {
            content: content.into(),
            strictness,
            kind: ValidationKind::Prompt,
            caller_id: None,
        }
    }

    /// Sets the payload kind.
    pub fn with_kind(mut self, kind: ValidationKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the caller identifier.
    pub fn with_caller(mut self, caller_id: impl Into<String>) -> Self {
        self.caller_id = Some(caller_id.into());
        self
    }
}

/// Which detector produced a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// Deterministic regex/keyword matching.
    Pattern,
    /// Statistical text classifier.
    Statistical,
    /// Remote judgment model.
    Remote,
}

impl DetectionMethod {
    /// Returns the wire name of this method.
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionMethod::Pattern => "pattern",
            DetectionMethod::Statistical => "statistical",
            DetectionMethod::Remote => "remote",
        }
    }
}

/// Threat categories a detector can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatCategory {
    /// Shell/OS command injection or destructive commands.
    CommandInjection,
    /// Attempts to subvert model instructions.
    PromptInjection,
    /// Moving sensitive data off the host.
    DataExfiltration,
    /// Gaining elevated privileges.
    PrivilegeEscalation,
    /// Resource exhaustion.
    DenialOfService,
    /// SQL injection payloads.
    SqlInjection,
}

impl ThreatCategory {
    /// Returns the wire name of this category.
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatCategory::CommandInjection => "command_injection",
            ThreatCategory::PromptInjection => "prompt_injection",
            ThreatCategory::DataExfiltration => "data_exfiltration",
            ThreatCategory::PrivilegeEscalation => "privilege_escalation",
            ThreatCategory::DenialOfService => "denial_of_service",
            ThreatCategory::SqlInjection => "sql_injection",
        }
    }

    /// Parses a wire name back into a category.
    pub fn from_str_opt(s: &str) -> Option<Self> {
        match s {
            "command_injection" => Some(ThreatCategory::CommandInjection),
            "prompt_injection" => Some(ThreatCategory::PromptInjection),
            "data_exfiltration" => Some(ThreatCategory::DataExfiltration),
            "privilege_escalation" => Some(ThreatCategory::PrivilegeEscalation),
            "denial_of_service" => Some(ThreatCategory::DenialOfService),
            "sql_injection" => Some(ThreatCategory::SqlInjection),
            _ => None,
        }
    }
}

/// A single threat found by a detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatFinding {
    /// The threat category.
    pub category: ThreatCategory,
    /// Severity score (0.0 to 1.0).
    pub score: f32,
    /// Human-actionable description of the threat.
    pub description: String,
}

impl ThreatFinding {
    /// Creates a new finding, clamping the score to [0, 1].
    pub fn new(category: ThreatCategory, score: f32, description: impl Into<String>) -> Self {
        Self {
            category,
            score: score.clamp(0.0, 1.0),
            description: description.into(),
        }
    }

    /// Merges findings from multiple detectors, deduplicating by category
    /// and keeping the highest score for each.
    pub fn merge(findings: Vec<ThreatFinding>) -> Vec<ThreatFinding> {
        let mut merged: Vec<ThreatFinding> = Vec::new();
        for finding in findings {
            match merged.iter_mut().find(|f| f.category == finding.category) {
                Some(existing) => {
                    if finding.score > existing.score {
                        *existing = finding;
                    }
                }
                None => merged.push(finding),
            }
        }
        merged
    }
}

/// Output of a single detector.
#[derive(Debug, Clone)]
pub struct DetectorVerdict {
    /// Whether this detector considers the content secure.
    pub is_secure: bool,
    /// Which detector produced this verdict.
    pub method: DetectionMethod,
    /// Confidence in the decision (0.0 to 1.0).
    pub confidence: f32,
    /// Threats found, ordered by discovery.
    pub threats: Vec<ThreatFinding>,
    /// Short excerpt around the matched span, if any.
    pub matched_excerpt: Option<String>,
    /// Suggested fix from the detector, if any.
    pub fix_suggestion: Option<String>,
    /// Wall-clock time this detector took.
    pub latency: Option<Duration>,
    /// Diagnostic note when the detector skipped or degraded.
    pub diagnostic: Option<String>,
}

impl DetectorVerdict {
    /// Creates a secure verdict.
    pub fn secure(method: DetectionMethod, confidence: f32) -> Self {
        Self {
            is_secure: true,
            method,
            confidence: confidence.clamp(0.0, 1.0),
            threats: Vec::new(),
            matched_excerpt: None,
            fix_suggestion: None,
            latency: None,
            diagnostic: None,
        }
    }

    /// Creates an insecure verdict with the given findings.
    pub fn insecure(method: DetectionMethod, confidence: f32, threats: Vec<ThreatFinding>) -> Self {
        Self {
            is_secure: false,
            method,
            confidence: confidence.clamp(0.0, 1.0),
            threats,
            matched_excerpt: None,
            fix_suggestion: None,
            latency: None,
            diagnostic: None,
        }
    }

    /// Attaches a matched excerpt.
    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.matched_excerpt = Some(excerpt.into());
        self
    }

    /// Attaches a fix suggestion.
    pub fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix_suggestion = Some(fix.into());
        self
    }

    /// Attaches the measured latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Attaches a skip/degradation diagnostic.
    pub fn with_diagnostic(mut self, note: impl Into<String>) -> Self {
        self.diagnostic = Some(note.into());
        self
    }

    /// Returns the highest finding score, or 0.0 without findings.
    pub fn max_threat_score(&self) -> f32 {
        self.threats.iter().map(|t| t.score).fold(0.0, f32::max)
    }
}

/// The engine's final decision for one piece of content.
///
/// This is the complete external contract: downstream consumers rely on
/// these fields only, never on detector internals. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    /// Whether the content is safe to proceed.
    pub is_secure: bool,
    /// Which detector (or "ensemble") made the decision.
    pub method: String,
    /// Confidence in the decision (0.0 to 1.0).
    pub confidence: f32,
    /// Threats found, deduplicated by category.
    pub threats: Vec<ThreatFinding>,
    /// Human-actionable explanation of the decision.
    pub reason: String,
    /// Best-effort suggested remediation.
    pub fix_suggestion: Option<String>,
    /// Per-detector latency in milliseconds.
    pub timings: HashMap<String, u64>,
    /// Ordered record of every detector actually invoked.
    pub methods_used: Vec<String>,
}

impl Verdict {
    /// Returns true if any finding matches the given category.
    pub fn has_threat(&self, category: ThreatCategory) -> bool {
        self.threats.iter().any(|t| t.category == category)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strictness_levels_are_ordered() {
        assert!(StrictnessLevel::Minimal < StrictnessLevel::Standard);
        assert!(StrictnessLevel::Standard < StrictnessLevel::High);
        assert!(StrictnessLevel::High < StrictnessLevel::Maximum);
    }

    #[test]
    fn strictness_all_returns_four_levels() {
        assert_eq!(StrictnessLevel::all().len(), 4);
    }

    #[test]
    fn threat_category_wire_names_round_trip() {
        for category in [
            ThreatCategory::CommandInjection,
            ThreatCategory::PromptInjection,
            ThreatCategory::DataExfiltration,
            ThreatCategory::PrivilegeEscalation,
            ThreatCategory::DenialOfService,
            ThreatCategory::SqlInjection,
        ] {
            assert_eq!(
                ThreatCategory::from_str_opt(category.as_str()),
                Some(category)
            );
        }
        assert!(ThreatCategory::from_str_opt("unknown").is_none());
    }

    #[test]
    fn strictness_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&StrictnessLevel::Maximum).unwrap(),
            "\"maximum\""
        );
        assert_eq!(
            serde_json::to_string(&ThreatCategory::SqlInjection).unwrap(),
            "\"sql_injection\""
        );
    }

    #[test]
    fn finding_clamps_score() {
        let finding = ThreatFinding::new(ThreatCategory::CommandInjection, 1.5, "test");
        assert_eq!(finding.score, 1.0);

        let finding = ThreatFinding::new(ThreatCategory::CommandInjection, -0.5, "test");
        assert_eq!(finding.score, 0.0);
    }

    #[test]
    fn merge_dedups_by_category_keeping_highest() {
        let findings = vec![
            ThreatFinding::new(ThreatCategory::CommandInjection, 0.6, "weak"),
            ThreatFinding::new(ThreatCategory::SqlInjection, 0.8, "sql"),
            ThreatFinding::new(ThreatCategory::CommandInjection, 0.9, "strong"),
        ];

        let merged = ThreatFinding::merge(findings);
        assert_eq!(merged.len(), 2);

        let cmd = merged
            .iter()
            .find(|f| f.category == ThreatCategory::CommandInjection)
            .unwrap();
        assert_eq!(cmd.score, 0.9);
        assert_eq!(cmd.description, "strong");
    }

    #[test]
    fn detector_verdict_clamps_confidence() {
        let verdict = DetectorVerdict::secure(DetectionMethod::Pattern, 1.7);
        assert_eq!(verdict.confidence, 1.0);
    }

    #[test]
    fn max_threat_score_on_empty_is_zero() {
        let verdict = DetectorVerdict::secure(DetectionMethod::Statistical, 0.9);
        assert_eq!(verdict.max_threat_score(), 0.0);
    }

    #[test]
    fn request_builder_sets_fields() {
        let req = ValidationRequest::new("hello", StrictnessLevel::High)
            .with_kind(ValidationKind::Operation)
            .with_caller("agent-7");
        assert_eq!(req.kind, ValidationKind::Operation);
        assert_eq!(req.caller_id.as_deref(), Some("agent-7"));
    }

    #[test]
    fn verdict_serializes_for_downstream() {
        let verdict = Verdict {
            is_secure: false,
            method: "ensemble".to_string(),
            confidence: 0.9,
            threats: vec![ThreatFinding::new(
                ThreatCategory::SqlInjection,
                0.95,
                "SQL injection payload",
            )],
            reason: "blocked".to_string(),
            fix_suggestion: None,
            timings: HashMap::new(),
            methods_used: vec!["pattern".to_string()],
        };

        let json = serde_json::to_string(&verdict).unwrap();
        assert!(json.contains("\"sql_injection\""));

        let back: Verdict = serde_json::from_str(&json).unwrap();
        assert_eq!(back, verdict);
    }
}
