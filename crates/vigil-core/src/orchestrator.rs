//! Hybrid orchestrator: the engine's top-level component.
//!
//! Per request: cache check → complexity analysis → detector selection →
//! (parallel or sequential) execution → ensemble combination → cache write →
//! adaptive-history update. `validate` is infallible by design: a security
//! gate that can itself crash and block the caller is worse than one that
//! degrades toward permissiveness while logging the degradation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use vigil_storage::PatternStatStore;

use crate::adaptive::AdaptiveRiskModel;
use crate::cache::ResultCache;
use crate::complexity::{self, ComplexityProfile};
use crate::config::{EngineConfig, EnsembleWeights, ExecutionMode, StrictnessThresholds};
use crate::error::Result;
use crate::pattern::PatternMatcher;
use crate::remote::RemoteJudge;
use crate::statistical::StatisticalClassifier;
use crate::verdict::{
    DetectionMethod, DetectorVerdict, StrictnessLevel, ThreatFinding, ValidationRequest, Verdict,
};

/// Which optional detectors run for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DetectorSelection {
    statistical: bool,
    remote: bool,
    /// Run the remote judge even though strictness alone would skip it.
    remote_forced: bool,
}

/// Outcome of one optional detector within a validation.
enum DetectorOutcome {
    /// Not selected for this request.
    NotRun,
    /// Ran to completion.
    Completed(DetectorVerdict),
    /// Task failed; the detector abstains from the vote.
    Abstained,
}

/// The hybrid validation engine.
///
/// Construct once and share; there is no ambient global instance. All
/// detector state is immutable after construction, and the cache and
/// adaptive model serialize their own mutations, so concurrent `validate`
/// calls are safe.
pub struct HybridOrchestrator {
    config: EngineConfig,
    pattern: PatternMatcher,
    statistical: Arc<StatisticalClassifier>,
    remote: Arc<RemoteJudge>,
    cache: ResultCache,
    adaptive: Arc<AdaptiveRiskModel>,
}

impl HybridOrchestrator {
    /// Creates an engine with in-memory adaptive state.
    pub fn new(config: EngineConfig) -> Result<Self> {
        let adaptive = AdaptiveRiskModel::new(config.adaptive.max_signatures);
        Self::build(config, adaptive)
    }

    /// Creates an engine whose adaptive state persists to the given store.
    pub fn with_store(config: EngineConfig, store: PatternStatStore) -> Result<Self> {
        let adaptive = AdaptiveRiskModel::with_store(store, config.adaptive.max_signatures);
        Self::build(config, adaptive)
    }

    fn build(config: EngineConfig, adaptive: AdaptiveRiskModel) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            pattern: PatternMatcher::new(),
            statistical: Arc::new(StatisticalClassifier::new(config.statistical.clone())),
            remote: Arc::new(RemoteJudge::new(config.remote.clone())?),
            cache: ResultCache::new(config.cache_capacity),
            adaptive: Arc::new(adaptive),
            config,
        })
    }

    /// Validates a full request. Kind and caller are recorded in logs only;
    /// the decision depends on content and strictness.
    pub async fn validate_request(&self, request: &ValidationRequest) -> Verdict {
        debug!(
            kind = ?request.kind,
            caller = request.caller_id.as_deref().unwrap_or("-"),
            "Validating request"
        );
        self.validate(&request.content, request.strictness).await
    }

    /// Validates content at the given strictness level.
    ///
    /// Every code path returns a `Verdict`; detector failures degrade or
    /// abstain and are recorded in the verdict's metadata.
    pub async fn validate(&self, content: &str, strictness: StrictnessLevel) -> Verdict {
        let total_start = Instant::now();

        if let Some(hit) = self.cache.get(content, strictness) {
            debug!(strictness = strictness.name(), "Cache hit");
            return hit;
        }

        let profile = complexity::analyze(content);
        let risk_prior = if self.config.adaptive.enabled {
            self.adaptive.risk_prior(content)
        } else {
            0.5
        };
        let selection = self.select_detectors(content, strictness, &profile, risk_prior);

        debug!(
            strictness = strictness.name(),
            complexity = profile.score,
            risk_prior,
            statistical = selection.statistical,
            remote = selection.remote,
            "Detectors selected"
        );

        let mut timings: HashMap<String, u64> = HashMap::new();
        let mut methods_used: Vec<String> = Vec::new();

        // The pattern matcher is cheap enough to always run synchronously
        // first as a fast-reject.
        let pattern_verdict = self.pattern.match_content(content, strictness);
        record(&mut timings, &mut methods_used, "pattern", &pattern_verdict);

        let verdict = if !pattern_verdict.is_secure
            && pattern_verdict.confidence >= self.config.short_circuit_confidence
        {
            self.build_verdict(
                false,
                "pattern",
                pattern_verdict.confidence,
                vec![pattern_verdict],
                timings,
                methods_used,
                total_start,
            )
        } else {
            let (stat, remote) = match self.config.mode {
                ExecutionMode::Parallel => {
                    self.run_parallel(content, strictness, &profile, selection).await
                }
                ExecutionMode::Sequential => {
                    self.run_sequential(content, strictness, &profile, selection)
                        .await
                }
            };

            record_outcome(&mut timings, &mut methods_used, "statistical", &stat);
            record_outcome(&mut timings, &mut methods_used, "remote", &remote);

            self.combine(
                strictness,
                pattern_verdict,
                stat,
                remote,
                timings,
                methods_used,
                total_start,
            )
        };

        self.cache.put(content, strictness, verdict.clone());
        if self.config.adaptive.enabled {
            self.adaptive.record_outcome(content, verdict.is_secure);
        }

        info!(
            strictness = strictness.name(),
            is_secure = verdict.is_secure,
            method = %verdict.method,
            "Validation complete"
        );
        verdict
    }

    /// Drops every cached verdict.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Number of cached verdicts.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Escalation policy: which optional detectors run for this request.
    fn select_detectors(
        &self,
        content: &str,
        strictness: StrictnessLevel,
        profile: &ComplexityProfile,
        risk_prior: f32,
    ) -> DetectorSelection {
        match strictness {
            StrictnessLevel::Minimal => DetectorSelection {
                statistical: false,
                remote: false,
                remote_forced: false,
            },
            StrictnessLevel::Standard => {
                let triggered = self.has_trigger(content)
                    || profile.length > self.config.escalation_length;
                let risky = risk_prior > self.config.adaptive.escalation_prior;

                DetectorSelection {
                    statistical: profile.is_complex() || triggered,
                    remote: triggered || risky,
                    remote_forced: true,
                }
            }
            StrictnessLevel::High | StrictnessLevel::Maximum => DetectorSelection {
                statistical: true,
                remote: true,
                remote_forced: false,
            },
        }
    }

    fn has_trigger(&self, content: &str) -> bool {
        let lower = content.to_lowercase();
        self.config
            .escalation_triggers
            .iter()
            .any(|t| lower.contains(t.as_str()))
    }

    /// Parallel execution: one task per selected detector, joined
    /// deterministically. A failed task abstains instead of voting.
    async fn run_parallel(
        &self,
        content: &str,
        strictness: StrictnessLevel,
        profile: &ComplexityProfile,
        selection: DetectorSelection,
    ) -> (DetectorOutcome, DetectorOutcome) {
        let stat_handle = selection.statistical.then(|| {
            let statistical = Arc::clone(&self.statistical);
            let content = content.to_string();
            let profile = profile.clone();
            tokio::spawn(async move { statistical.classify(&content, strictness, &profile) })
        });

        let remote_handle = selection.remote.then(|| {
            let remote = Arc::clone(&self.remote);
            let content = content.to_string();
            let force = selection.remote_forced;
            tokio::spawn(async move { remote.judge(&content, strictness, force).await })
        });

        let stat = match stat_handle {
            None => DetectorOutcome::NotRun,
            Some(handle) => match handle.await {
                Ok(verdict) => DetectorOutcome::Completed(verdict),
                Err(e) => {
                    warn!(error = %e, "Statistical detector task failed; abstaining");
                    DetectorOutcome::Abstained
                }
            },
        };

        let remote = match remote_handle {
            None => DetectorOutcome::NotRun,
            Some(handle) => match handle.await {
                Ok(verdict) => DetectorOutcome::Completed(verdict),
                Err(e) => {
                    warn!(error = %e, "Remote detector task failed; abstaining");
                    DetectorOutcome::Abstained
                }
            },
        };

        (stat, remote)
    }

    /// Sequential execution: statistical before remote, skipping the remote
    /// call when an earlier stage is already decisive at this strictness.
    async fn run_sequential(
        &self,
        content: &str,
        strictness: StrictnessLevel,
        profile: &ComplexityProfile,
        selection: DetectorSelection,
    ) -> (DetectorOutcome, DetectorOutcome) {
        let stat = if selection.statistical {
            DetectorOutcome::Completed(self.statistical.classify(content, strictness, profile))
        } else {
            DetectorOutcome::NotRun
        };

        // A confident insecure statistical verdict is final at permissive
        // levels, so the remote call would be wasted cost.
        if strictness <= StrictnessLevel::Standard {
            if let DetectorOutcome::Completed(v) = &stat {
                if !v.is_secure && v.confidence >= self.config.short_circuit_confidence {
                    debug!("Sequential short-circuit after statistical stage");
                    return (stat, DetectorOutcome::NotRun);
                }
            }
        }

        let remote = if selection.remote {
            DetectorOutcome::Completed(
                self.remote
                    .judge(content, strictness, selection.remote_forced)
                    .await,
            )
        } else {
            DetectorOutcome::NotRun
        };

        (stat, remote)
    }

    /// Combines detector verdicts into the final decision.
    #[allow(clippy::too_many_arguments)]
    fn combine(
        &self,
        strictness: StrictnessLevel,
        pattern_verdict: DetectorVerdict,
        stat: DetectorOutcome,
        remote: DetectorOutcome,
        timings: HashMap<String, u64>,
        methods_used: Vec<String>,
        total_start: Instant,
    ) -> Verdict {
        let mut voters = vec![pattern_verdict];
        if let DetectorOutcome::Completed(v) = stat {
            voters.push(v);
        }
        if let DetectorOutcome::Completed(v) = remote {
            // A skipped remote verdict never voted; drop it from the
            // ensemble but keep its metadata in timings/methods_used.
            if v.diagnostic.as_deref() != Some("skipped") {
                voters.push(v);
            }
        }

        // A confident insecure statistical verdict decides at permissive
        // levels in both execution modes, keeping their decision policies
        // identical.
        if strictness <= StrictnessLevel::Standard {
            if let Some(stat_verdict) = voters
                .iter()
                .find(|v| v.method == DetectionMethod::Statistical)
            {
                if !stat_verdict.is_secure
                    && stat_verdict.confidence >= self.config.short_circuit_confidence
                {
                    let confidence = stat_verdict.confidence;
                    return self.build_verdict(
                        false,
                        "statistical",
                        confidence,
                        voters,
                        timings,
                        methods_used,
                        total_start,
                    );
                }
            }
        }

        if voters.len() == 1 {
            let single = voters.remove(0);
            let method = single.method.as_str().to_string();
            let is_secure = single.is_secure;
            let confidence = single.confidence;
            return self.build_verdict(
                is_secure,
                &method,
                confidence,
                vec![single],
                timings,
                methods_used,
                total_start,
            );
        }

        let (is_secure, confidence) = combine_votes(
            strictness,
            &self.config.ensemble_thresholds,
            &self.config.weights,
            &voters,
        );

        self.build_verdict(
            is_secure,
            "ensemble",
            confidence,
            voters,
            timings,
            methods_used,
            total_start,
        )
    }

    /// Assembles the final immutable verdict.
    #[allow(clippy::too_many_arguments)]
    fn build_verdict(
        &self,
        is_secure: bool,
        method: &str,
        confidence: f32,
        voters: Vec<DetectorVerdict>,
        mut timings: HashMap<String, u64>,
        methods_used: Vec<String>,
        total_start: Instant,
    ) -> Verdict {
        let threats =
            ThreatFinding::merge(voters.iter().flat_map(|v| v.threats.clone()).collect());

        let fix_suggestion = voters
            .iter()
            .filter(|v| !v.is_secure)
            .find_map(|v| v.fix_suggestion.clone())
            .or_else(|| voters.iter().find_map(|v| v.fix_suggestion.clone()));

        let reason = if is_secure {
            format!(
                "No blocking threats detected at {} strictness",
                // methods_used is never empty: pattern always runs first.
                match methods_used.len() {
                    1 => "pattern-only".to_string(),
                    _ => "layered".to_string(),
                }
            )
        } else {
            match threats.iter().max_by(|a, b| {
                a.score
                    .partial_cmp(&b.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }) {
                Some(top) => format!("Blocked by {} check: {}", method, top.description),
                None => format!("Blocked by {} check", method),
            }
        };

        timings.insert(
            "total".to_string(),
            total_start.elapsed().as_millis() as u64,
        );

        Verdict {
            is_secure,
            method: method.to_string(),
            confidence: confidence.clamp(0.0, 1.0),
            threats,
            reason,
            fix_suggestion,
            timings,
            methods_used,
        }
    }
}

/// Ensemble voting over two or more detector verdicts.
///
/// Each vote is weighted (pattern fixed, statistical/remote scaled by
/// confidence) into a weighted-average secure score. Vote-count rules
/// override the score per strictness: any insecure vote blocks at
/// High/Maximum, majority decides at Standard, and Minimal blocks only on a
/// unanimous insecure vote.
fn combine_votes(
    strictness: StrictnessLevel,
    thresholds: &StrictnessThresholds,
    weights: &EnsembleWeights,
    voters: &[DetectorVerdict],
) -> (bool, f32) {
    let mut weight_sum = 0.0_f32;
    let mut secure_sum = 0.0_f32;
    let mut insecure_votes = 0_usize;

    for verdict in voters {
        let weight = match verdict.method {
            DetectionMethod::Pattern => weights.pattern,
            DetectionMethod::Statistical => weights.statistical * verdict.confidence,
            DetectionMethod::Remote => weights.remote * verdict.confidence,
        };
        weight_sum += weight;
        if verdict.is_secure {
            secure_sum += weight;
        } else {
            insecure_votes += 1;
        }
    }

    let score = if weight_sum > 0.0 {
        secure_sum / weight_sum
    } else {
        1.0
    };
    let threshold = thresholds.get(strictness);
    let total = voters.len();

    let is_secure = match strictness {
        // Zero tolerance: one dissenting detector blocks.
        StrictnessLevel::High | StrictnessLevel::Maximum => {
            insecure_votes == 0 && score >= threshold
        }
        StrictnessLevel::Standard => {
            if insecure_votes * 2 > total {
                false
            } else if insecure_votes * 2 < total {
                true
            } else {
                score >= threshold
            }
        }
        // Only a unanimous insecure vote blocks.
        StrictnessLevel::Minimal => insecure_votes < total,
    };

    let confidence = if is_secure { score } else { 1.0 - score };
    (is_secure, confidence.clamp(0.0, 1.0))
}

/// Records timing and invocation order for a detector that ran.
fn record(
    timings: &mut HashMap<String, u64>,
    methods_used: &mut Vec<String>,
    name: &str,
    verdict: &DetectorVerdict,
) {
    let millis = verdict.latency.map(|l| l.as_millis() as u64).unwrap_or(0);
    timings.insert(name.to_string(), millis);

    let entry = match verdict.diagnostic.as_deref() {
        Some("skipped") => format!("{name}:skipped"),
        Some(d) if d.starts_with("degraded") => format!("{name}:degraded"),
        _ => name.to_string(),
    };
    methods_used.push(entry);
}

/// Records timing and invocation order for an optional detector outcome.
fn record_outcome(
    timings: &mut HashMap<String, u64>,
    methods_used: &mut Vec<String>,
    name: &str,
    outcome: &DetectorOutcome,
) {
    match outcome {
        DetectorOutcome::NotRun => {}
        DetectorOutcome::Completed(verdict) => record(timings, methods_used, name, verdict),
        DetectorOutcome::Abstained => {
            timings.insert(name.to_string(), 0);
            methods_used.push(format!("{name}:abstained"));
        }
    }
}
