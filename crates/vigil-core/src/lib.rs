//! Vigil Core - Hybrid content-safety validation engine.
//!
//! Combines three independent detectors (deterministic pattern matching, a
//! statistical classifier, and a remote judgment model) into a single
//! pass/fail decision with caching, parallel execution, escalation policy,
//! ensemble voting, and an adaptive feedback loop.
//!
//! The sole entry point is [`HybridOrchestrator::validate`]; its [`Verdict`]
//! is the complete external contract.

pub mod adaptive;
pub mod cache;
pub mod complexity;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod pattern;
pub mod remote;
pub mod statistical;
pub mod verdict;

pub use adaptive::AdaptiveRiskModel;
pub use cache::ResultCache;
pub use complexity::ComplexityProfile;
pub use config::{
    AdaptiveConfig, EngineConfig, EnsembleWeights, ExecutionMode, RemoteConfig, StatisticalConfig,
    StrictnessThresholds,
};
pub use error::{EngineError, Result};
pub use orchestrator::HybridOrchestrator;
pub use pattern::PatternMatcher;
pub use remote::RemoteJudge;
pub use statistical::{LinearModel, StatisticalClassifier};
pub use verdict::{
    DetectionMethod, DetectorVerdict, StrictnessLevel, ThreatCategory, ThreatFinding,
    ValidationKind, ValidationRequest, Verdict,
};
