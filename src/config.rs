//! Typed configuration for matching, scoring and review policy
//!
//! Defaults (1% amount tolerance, 0.6 suggestion floor) are placeholders
//! pending product sign-off; deployments are expected to set them.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;

use crate::types::*;

/// Candidate selection and amount tolerance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Relative tolerance in basis points (100 = 1%)
    pub tolerance_bps: u32,
    /// Absolute tolerance floor in minor units
    pub tolerance_floor_minor: i64,
    /// Largest difference still considered an exact amount match
    pub exact_epsilon_minor: i64,
    /// Maximum invoices scored per transaction
    pub max_candidates: usize,
    /// Days around the due date over which date proximity decays to zero
    pub date_window_days: i64,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            tolerance_bps: 100,
            tolerance_floor_minor: 100,
            exact_epsilon_minor: 0,
            max_candidates: 50,
            date_window_days: 30,
        }
    }
}

/// Weight of each scoring signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringWeights {
    pub exact_amount: f64,
    pub close_amount: f64,
    pub reference_invoice_id: f64,
    pub description_client_name: f64,
    pub date_proximity: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            exact_amount: 0.6,
            close_amount: 0.4,
            reference_invoice_id: 0.3,
            description_client_name: 0.2,
            date_proximity: 0.1,
        }
    }
}

impl ScoringWeights {
    fn all(&self) -> [(&'static str, f64); 5] {
        [
            ("exact_amount", self.exact_amount),
            ("close_amount", self.close_amount),
            ("reference_invoice_id", self.reference_invoice_id),
            ("description_client_name", self.description_client_name),
            ("date_proximity", self.date_proximity),
        ]
    }
}

/// Complete reconciliation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationConfig {
    pub matching: MatchingConfig,
    pub weights: ScoringWeights,
    /// Best candidates below this confidence leave the transaction unmatched
    pub min_confidence: f64,
    /// Confidence at which suggestions are approved and applied without review
    pub auto_approve_threshold: Option<f64>,
    /// Reads of the existing row after an insert conflict before giving up
    pub ledger_conflict_retries: u32,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            matching: MatchingConfig::default(),
            weights: ScoringWeights::default(),
            min_confidence: 0.6,
            auto_approve_threshold: None,
            ledger_conflict_retries: 3,
        }
    }
}

impl ReconciliationConfig {
    pub fn with_matching(mut self, matching: MatchingConfig) -> Self {
        self.matching = matching;
        self
    }

    pub fn with_weights(mut self, weights: ScoringWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_min_confidence(mut self, min_confidence: f64) -> Self {
        self.min_confidence = min_confidence;
        self
    }

    pub fn with_auto_approve_threshold(mut self, threshold: f64) -> Self {
        self.auto_approve_threshold = Some(threshold);
        self
    }

    /// Load configuration from `RECON_*` environment variables over defaults
    pub fn from_env() -> ReconResult<Self> {
        let defaults = Self::default();
        let matching = MatchingConfig {
            tolerance_bps: env_or("RECON_TOLERANCE_BPS", defaults.matching.tolerance_bps)?,
            tolerance_floor_minor: env_or(
                "RECON_TOLERANCE_FLOOR_MINOR",
                defaults.matching.tolerance_floor_minor,
            )?,
            exact_epsilon_minor: env_or(
                "RECON_EXACT_EPSILON_MINOR",
                defaults.matching.exact_epsilon_minor,
            )?,
            max_candidates: env_or("RECON_MAX_CANDIDATES", defaults.matching.max_candidates)?,
            date_window_days: env_or("RECON_DATE_WINDOW_DAYS", defaults.matching.date_window_days)?,
        };

        let auto_approve_threshold = match env::var("RECON_AUTO_APPROVE_THRESHOLD") {
            Ok(raw) if !raw.trim().is_empty() => Some(parse_var(
                "RECON_AUTO_APPROVE_THRESHOLD",
                &raw,
            )?),
            _ => None,
        };

        let config = Self {
            matching,
            weights: defaults.weights,
            min_confidence: env_or("RECON_MIN_CONFIDENCE", defaults.min_confidence)?,
            auto_approve_threshold,
            ledger_conflict_retries: env_or(
                "RECON_LEDGER_CONFLICT_RETRIES",
                defaults.ledger_conflict_retries,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check ranges and relationships between settings
    pub fn validate(&self) -> ReconResult<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ReconError::Config(format!(
                "min_confidence must be within [0, 1], got {}",
                self.min_confidence
            )));
        }

        if let Some(threshold) = self.auto_approve_threshold {
            if !(0.0..=1.0).contains(&threshold) || threshold < self.min_confidence {
                return Err(ReconError::Config(format!(
                    "auto_approve_threshold must be within [min_confidence, 1], got {}",
                    threshold
                )));
            }
        }

        for (name, weight) in self.weights.all() {
            if !(0.0..=1.0).contains(&weight) {
                return Err(ReconError::Config(format!(
                    "weight {} must be within [0, 1], got {}",
                    name, weight
                )));
            }
        }

        if self.matching.tolerance_floor_minor < 0 || self.matching.exact_epsilon_minor < 0 {
            return Err(ReconError::Config(
                "amount tolerances cannot be negative".to_string(),
            ));
        }

        if self.matching.max_candidates == 0 {
            return Err(ReconError::Config(
                "max_candidates must be at least 1".to_string(),
            ));
        }

        if self.matching.date_window_days <= 0 {
            return Err(ReconError::Config(
                "date_window_days must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> ReconResult<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => parse_var(name, &raw),
        _ => Ok(default),
    }
}

fn parse_var<T: FromStr>(name: &str, raw: &str) -> ReconResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e| ReconError::Config(format!("{} has invalid value '{}': {}", name, raw, e)))
}
