//! Decision layer: state classification, trend regression, driver
//! attribution, and action recommendation.
//!
//! Consumes the encoded parameter vector plus persisted history and produces
//! a `DecisionSnapshot`, the complete, idempotent output for one
//! (org, team, week). Each concern lives in its own submodule; this module
//! wires them together and owns the shared configuration.

pub mod action;
pub mod drivers;
pub mod state;
pub mod trend;

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::params::Parameter;

pub use action::{recommend, InterventionTemplate, Recommendation, Urgency};
pub use drivers::{attribute_drivers, Driver, InfluenceScope};
pub use state::{compute_indices, evaluate_state, HealthIndex, StateAssessment, TeamState};
pub use trend::{evaluate_trend, HistoryPoint, TrendAssessment, TrendDirection};

/// Thresholds for the decision layer. Defaults are documented constants;
/// overrides must stay monotonic (critical < at-risk).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// Average health below this is CRITICAL.
    pub critical_threshold: f64,
    /// Average health below this (and above critical) is AT_RISK.
    pub at_risk_threshold: f64,
    /// OLS slope beyond which the trend counts as moving.
    pub trend_slope_threshold: f64,
    /// Deviations below this are attribution noise.
    pub driver_noise_floor: f64,
    /// Number of ranked drivers retained.
    pub top_driver_count: usize,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            critical_threshold: 0.35,
            at_risk_threshold: 0.55,
            trend_slope_threshold: 0.02,
            driver_noise_floor: 0.2,
            top_driver_count: 5,
        }
    }
}

/// Scope identity and coverage for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    pub org_id: String,
    pub team_id: String,
    pub week_start: NaiveDate,
    /// Fraction of roster members with at least one session this week.
    pub coverage: f64,
    pub session_count: usize,
}

/// The full output of one team/week analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSnapshot {
    pub state: StateAssessment,
    pub trend: TrendAssessment,
    pub drivers: Vec<Driver>,
    pub recommendation: Recommendation,
    pub meta: SnapshotMeta,
}

/// Evaluate the full decision layer for one week.
///
/// `signals` is the encoded parameter vector; `history` the persisted weekly
/// health points up to (and excluding) this week.
pub fn evaluate(
    config: &DecisionConfig,
    signals: &BTreeMap<Parameter, f64>,
    history: &[HistoryPoint],
    meta: SnapshotMeta,
) -> DecisionSnapshot {
    // No measured parameters at all means UNKNOWN, not a neutral guess.
    let health: Vec<(HealthIndex, f64)> = if signals.is_empty() {
        Vec::new()
    } else {
        compute_indices(signals)
            .iter()
            .map(|(&idx, &value)| (idx, idx.health_score(value)))
            .collect()
    };

    let state = evaluate_state(config, &health);
    let trend = evaluate_trend(config, history);
    let drivers = attribute_drivers(config, signals);
    let recommendation = recommend(&state, &trend, &drivers);

    DecisionSnapshot {
        state,
        trend,
        drivers,
        recommendation,
        meta,
    }
}
