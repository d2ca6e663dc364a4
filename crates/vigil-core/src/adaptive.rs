//! Adaptive risk model.
//!
//! Tracks historical validation outcomes per recurring content signature
//! and produces a prior risk score the orchestrator uses to decide
//! escalation. Advisory only: this component never independently fails a
//! request. Counters persist to the pattern-stat store when one is
//! attached; store failures are logged and dropped.

use std::collections::HashMap;
use std::sync::RwLock;

use regex::Regex;
use tracing::{debug, warn};

use vigil_storage::{PatternStat, PatternStatStore};

/// Prior returned when no signature has history.
const NEUTRAL_PRIOR: f32 = 0.5;

/// Fixed lexical signatures extracted by substring match.
const SUBSTRING_SIGNATURES: &[(&str, &str)] = &[
    ("cmd:rm_rf", "rm -rf"),
    ("cmd:sudo", "sudo "),
    ("cmd:curl", "curl "),
    ("cmd:wget", "wget "),
    ("cmd:chmod", "chmod "),
    ("cmd:netcat", "nc -"),
    ("cmd:pipe_shell", "| sh"),
    ("cmd:pipe_bash", "| bash"),
    ("cmd:powershell", "powershell"),
    ("code:eval", "eval("),
    ("code:exec", "exec("),
    ("code:os_system", "os.system"),
    ("code:subprocess", "subprocess"),
    ("code:cmd_subst", "$("),
    ("code:backtick", "`"),
    ("sql:drop_table", "drop table"),
    ("sql:union_select", "union select"),
    ("prompt:ignore_instructions", "ignore previous instructions"),
    ("prompt:jailbreak", "jailbreak"),
    ("exfil:passwd_file", "/etc/passwd"),
    ("exfil:ssh_dir", ".ssh/"),
    ("exfil:base64_decode", "base64 -d"),
];

/// Structural signatures that need a regex.
fn regex_signatures() -> Vec<(&'static str, Regex)> {
    vec![
        (
            "blob:base64_long",
            Regex::new(r"[a-z0-9+/]{40,}={0,2}").expect("Invalid signature pattern"),
        ),
        (
            "net:ip_literal",
            Regex::new(r"\b\d{1,3}(\.\d{1,3}){3}\b").expect("Invalid signature pattern"),
        ),
    ]
}

/// Historical-outcome-driven risk prior.
pub struct AdaptiveRiskModel {
    stats: RwLock<HashMap<String, PatternStat>>,
    store: Option<PatternStatStore>,
    regex_signatures: Vec<(&'static str, Regex)>,
    max_signatures: usize,
}

impl AdaptiveRiskModel {
    /// Creates an in-memory model with no persistence.
    pub fn new(max_signatures: usize) -> Self {
        Self {
            stats: RwLock::new(HashMap::new()),
            store: None,
            regex_signatures: regex_signatures(),
            max_signatures,
        }
    }

    /// Creates a model backed by a persistent store, reloading existing
    /// statistics at startup.
    pub fn with_store(store: PatternStatStore, max_signatures: usize) -> Self {
        let stats = match store.load_all() {
            Ok(rows) => {
                debug!(count = rows.len(), "Loaded pattern statistics");
                rows.into_iter().map(|s| (s.signature.clone(), s)).collect()
            }
            Err(e) => {
                warn!(error = %e, "Failed to load pattern statistics, starting empty");
                HashMap::new()
            }
        };

        Self {
            stats: RwLock::new(stats),
            store: Some(store),
            regex_signatures: regex_signatures(),
            max_signatures,
        }
    }

    /// Extracts the signatures present in the given content.
    fn extract_signatures(&self, content: &str) -> Vec<&'static str> {
        let lower = content.to_lowercase();
        let mut signatures = Vec::new();

        for (name, needle) in SUBSTRING_SIGNATURES {
            if lower.contains(needle) {
                signatures.push(*name);
            }
        }
        for (name, regex) in &self.regex_signatures {
            if regex.is_match(&lower) {
                signatures.push(*name);
            }
        }

        signatures
    }

    /// Returns the historical risk prior for this content: the mean
    /// insecure-ratio over all present signatures with history, or a
    /// neutral 0.5 when none has been seen before.
    pub fn risk_prior(&self, content: &str) -> f32 {
        let signatures = self.extract_signatures(content);
        if signatures.is_empty() {
            return NEUTRAL_PRIOR;
        }

        let stats = self.stats.read().unwrap_or_else(|e| e.into_inner());
        let ratios: Vec<f32> = signatures
            .iter()
            .filter_map(|sig| stats.get(*sig).and_then(|s| s.insecure_ratio()))
            .collect();

        if ratios.is_empty() {
            NEUTRAL_PRIOR
        } else {
            ratios.iter().sum::<f32>() / ratios.len() as f32
        }
    }

    /// Records a validation outcome against every signature present in the
    /// content, pruning the least-recently-seen statistics beyond the
    /// retention bound.
    pub fn record_outcome(&self, content: &str, is_secure: bool) {
        let signatures = self.extract_signatures(content);
        if signatures.is_empty() {
            return;
        }

        let mut touched = Vec::with_capacity(signatures.len());
        let mut pruned = Vec::new();
        {
            let mut stats = self.stats.write().unwrap_or_else(|e| e.into_inner());

            for sig in signatures {
                let stat = stats
                    .entry(sig.to_string())
                    .or_insert_with(|| PatternStat::new(sig));
                stat.record(is_secure);
                touched.push(stat.clone());
            }

            while stats.len() > self.max_signatures {
                let oldest = stats
                    .iter()
                    .min_by_key(|(_, s)| s.last_seen)
                    .map(|(sig, _)| sig.clone());
                match oldest {
                    Some(sig) => {
                        stats.remove(&sig);
                        pruned.push(sig);
                    }
                    None => break,
                }
            }
        }

        if let Some(store) = &self.store {
            for stat in &touched {
                if let Err(e) = store.upsert(stat) {
                    warn!(signature = %stat.signature, error = %e, "Failed to persist pattern stat");
                }
            }
            for sig in &pruned {
                if let Err(e) = store.delete(sig) {
                    warn!(signature = %sig, error = %e, "Failed to prune pattern stat");
                }
            }
        }
    }

    /// Number of tracked signatures.
    pub fn tracked_signatures(&self) -> usize {
        self.stats.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unseen_content_gets_neutral_prior() {
        let model = AdaptiveRiskModel::new(64);
        assert_eq!(model.risk_prior("sudo make me a sandwich"), NEUTRAL_PRIOR);
        assert_eq!(model.risk_prior("entirely benign prose"), NEUTRAL_PRIOR);
    }

    #[test]
    fn insecure_history_raises_the_prior() {
        let model = AdaptiveRiskModel::new(64);

        for _ in 0..4 {
            model.record_outcome("sudo rm -rf /tmp/x", false);
        }

        let prior = model.risk_prior("sudo ls");
        assert!(prior > 0.9, "prior was {prior}");
    }

    #[test]
    fn secure_history_lowers_the_prior() {
        let model = AdaptiveRiskModel::new(64);

        for _ in 0..4 {
            model.record_outcome("curl https://crates.io", true);
        }

        let prior = model.risk_prior("curl https://docs.rs");
        assert!(prior < 0.1, "prior was {prior}");
    }

    #[test]
    fn mixed_history_averages() {
        let model = AdaptiveRiskModel::new(64);

        model.record_outcome("sudo apt update", true);
        model.record_outcome("sudo rm -rf /", false);

        // "sudo " signature has a 0.5 insecure ratio; "rm -rf" is 1.0.
        let prior = model.risk_prior("sudo ls");
        assert!((prior - 0.5).abs() < 0.01);
    }

    #[test]
    fn content_without_signatures_records_nothing() {
        let model = AdaptiveRiskModel::new(64);
        model.record_outcome("a perfectly plain sentence", false);
        assert_eq!(model.tracked_signatures(), 0);
    }

    #[test]
    fn retention_is_bounded() {
        let model = AdaptiveRiskModel::new(2);

        model.record_outcome("sudo ls", false);
        model.record_outcome("curl https://x.example", false);
        model.record_outcome("wget https://y.example", false);

        assert!(model.tracked_signatures() <= 2);
    }

    #[test]
    fn outcomes_persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");

        {
            let store = PatternStatStore::with_path(&path).unwrap();
            let model = AdaptiveRiskModel::with_store(store, 64);
            model.record_outcome("sudo rm -rf /data", false);
            model.record_outcome("sudo rm -rf /data", false);
        }

        let store = PatternStatStore::with_path(&path).unwrap();
        let model = AdaptiveRiskModel::with_store(store, 64);
        let prior = model.risk_prior("sudo ls");
        assert!(prior > 0.9, "prior was {prior}");
    }

    #[test]
    fn base64_blob_signature_matches() {
        let model = AdaptiveRiskModel::new(64);
        let blob = "aGVsbG8gd29ybGQx".repeat(4);
        model.record_outcome(&blob, false);
        assert!(model.tracked_signatures() >= 1);
    }
}
