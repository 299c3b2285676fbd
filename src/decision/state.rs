//! Team state classification over composite health indices.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::Parameter;

use super::DecisionConfig;

/// Neutral value assumed for parameters with no signal yet.
const NEUTRAL_SIGNAL: f64 = 0.5;

/// The five composite indices the decision layer reasons over.
///
/// `Wrp` and `Ouc` are health-oriented (higher is better); the other three
/// are pressure-oriented and are inverted before state evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthIndex {
    /// Work relationship pulse: safety, peer trust, leadership trust.
    Wrp,
    /// Organizational understanding and coherence: alignment and clarity.
    Ouc,
    /// Team friction pressure: autonomy friction and role ambiguity.
    Tfp,
    /// Load strain: emotional and cognitive load.
    Strain,
    /// Withdrawal pressure: the disengagement precursors.
    Withdrawal,
}

impl HealthIndex {
    pub const ALL: [HealthIndex; 5] = [
        HealthIndex::Wrp,
        HealthIndex::Ouc,
        HealthIndex::Tfp,
        HealthIndex::Strain,
        HealthIndex::Withdrawal,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::Wrp => "wrp",
            Self::Ouc => "ouc",
            Self::Tfp => "tfp",
            Self::Strain => "strain",
            Self::Withdrawal => "withdrawal",
        }
    }

    pub fn from_id(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|i| i.id() == s)
    }

    /// Whether a high raw index value is healthy.
    pub fn is_health_oriented(self) -> bool {
        matches!(self, Self::Wrp | Self::Ouc)
    }

    /// Convert a raw index value to health orientation.
    pub fn health_score(self, raw: f64) -> f64 {
        if self.is_health_oriented() {
            raw
        } else {
            1.0 - raw
        }
    }

    /// Parameter composition: (parameter, inverted) pairs averaged into the
    /// raw index value.
    fn composition(self) -> &'static [(Parameter, bool)] {
        match self {
            Self::Wrp => &[
                (Parameter::PsychSafety, false),
                (Parameter::TrustPeers, false),
                (Parameter::TrustGap, true),
            ],
            Self::Ouc => &[
                (Parameter::GoalAlignment, false),
                (Parameter::RoleAmbiguity, true),
                (Parameter::CognitiveDissonance, true),
            ],
            Self::Tfp => &[
                (Parameter::AutonomyFriction, false),
                (Parameter::RoleAmbiguity, false),
            ],
            Self::Strain => &[
                (Parameter::EmotionalLoad, false),
                (Parameter::CognitiveLoad, false),
            ],
            Self::Withdrawal => &[
                (Parameter::EmotionalLoad, false),
                (Parameter::GoalAlignment, true),
                (Parameter::TrustPeers, true),
            ],
        }
    }
}

/// Compute raw index values from the parameter vector.
///
/// Parameters absent from `signals` contribute the neutral prior, so a
/// sparse week yields indices near 0.5 rather than a crash or a hole.
pub fn compute_indices(signals: &BTreeMap<Parameter, f64>) -> BTreeMap<HealthIndex, f64> {
    HealthIndex::ALL
        .iter()
        .map(|&idx| {
            let parts = idx.composition();
            let sum: f64 = parts
                .iter()
                .map(|&(p, inverted)| {
                    let v = signals.get(&p).copied().unwrap_or(NEUTRAL_SIGNAL);
                    if inverted {
                        1.0 - v
                    } else {
                        v
                    }
                })
                .sum();
            (idx, sum / parts.len() as f64)
        })
        .collect()
}

/// Classified team state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamState {
    Healthy,
    AtRisk,
    Critical,
    Unknown,
}

impl TeamState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::AtRisk => "at_risk",
            Self::Critical => "critical",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "healthy" => Self::Healthy,
            "at_risk" => Self::AtRisk,
            "critical" => Self::Critical,
            _ => Self::Unknown,
        }
    }
}

/// Result of one state evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateAssessment {
    pub state: TeamState,
    /// 1 − average health; 0 when state is unknown.
    pub severity: f64,
    /// The single lowest-scoring health dimension.
    pub primary_metric: Option<HealthIndex>,
    /// Average health across the provided dimensions.
    pub average_health: f64,
}

/// Classify team state from health-oriented index scores.
///
/// Missing data never crashes: an empty input yields `Unknown` with
/// severity 0.
pub fn evaluate_state(config: &DecisionConfig, health: &[(HealthIndex, f64)]) -> StateAssessment {
    if health.is_empty() {
        return StateAssessment {
            state: TeamState::Unknown,
            severity: 0.0,
            primary_metric: None,
            average_health: 0.0,
        };
    }

    let average = health.iter().map(|(_, h)| h).sum::<f64>() / health.len() as f64;
    let primary = health
        .iter()
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|&(idx, _)| idx);

    let state = if average < config.critical_threshold {
        TeamState::Critical
    } else if average < config.at_risk_threshold {
        TeamState::AtRisk
    } else {
        TeamState::Healthy
    };

    StateAssessment {
        state,
        severity: 1.0 - average,
        primary_metric: primary,
        average_health: average,
    }
}
