//! Projection of fused construct measurements onto the governed parameter
//! vector.
//!
//! Parameters are the only scoring surface downstream consumers see. The
//! projection is a fixed signed weight matrix with a saturation policy: an
//! established parameter moves at most 0.15 per update so one noisy week
//! cannot swing it, while a cold parameter may move 0.40 to converge
//! quickly.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constructs::Construct;
use crate::evidence::ConstructMeasurement;

/// Per-update delta cap once a parameter is warm.
pub const WARM_DELTA_CAP: f64 = 0.15;
/// Per-update delta cap during cold start.
pub const COLD_DELTA_CAP: f64 = 0.40;
/// Accumulated weight at which a parameter counts as warm.
pub const WARM_WEIGHT_THRESHOLD: f64 = 3.0;
/// Parameter values never reach exactly 0 or 1.
pub const SIGNAL_MIN: f64 = 0.01;
pub const SIGNAL_MAX: f64 = 0.99;

/// Whether a high parameter value is unhealthy (negative polarity) or
/// healthy (positive polarity).
///
/// Polarity is a declared configuration contract: every parameter states its
/// direction here, exhaustively, because no derivation rule exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Polarity {
    Positive,
    Negative,
}

/// The governed scoring vector. Closed set; all downstream consumers match
/// exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Parameter {
    PsychSafety,
    TrustPeers,
    TrustGap,
    GoalAlignment,
    AutonomyFriction,
    RoleAmbiguity,
    EmotionalLoad,
    CognitiveLoad,
    CognitiveDissonance,
}

impl Parameter {
    pub const ALL: [Parameter; 9] = [
        Parameter::PsychSafety,
        Parameter::TrustPeers,
        Parameter::TrustGap,
        Parameter::GoalAlignment,
        Parameter::AutonomyFriction,
        Parameter::RoleAmbiguity,
        Parameter::EmotionalLoad,
        Parameter::CognitiveLoad,
        Parameter::CognitiveDissonance,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::PsychSafety => "psych_safety",
            Self::TrustPeers => "trust_peers",
            Self::TrustGap => "trust_gap",
            Self::GoalAlignment => "goal_alignment",
            Self::AutonomyFriction => "autonomy_friction",
            Self::RoleAmbiguity => "role_ambiguity",
            Self::EmotionalLoad => "emotional_load",
            Self::CognitiveLoad => "cognitive_load",
            Self::CognitiveDissonance => "cognitive_dissonance",
        }
    }

    pub fn from_id(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|p| p.id() == s)
    }

    pub fn polarity(self) -> Polarity {
        match self {
            Self::PsychSafety | Self::TrustPeers | Self::GoalAlignment => Polarity::Positive,
            Self::TrustGap
            | Self::AutonomyFriction
            | Self::RoleAmbiguity
            | Self::EmotionalLoad
            | Self::CognitiveLoad
            | Self::CognitiveDissonance => Polarity::Negative,
        }
    }

    /// Deviation from the healthy ideal for a raw parameter value.
    ///
    /// Negative-polarity parameters are unhealthy when high; positive ones
    /// when low.
    pub fn deviation_from_ideal(self, value: f64) -> f64 {
        match self.polarity() {
            Polarity::Negative => value,
            Polarity::Positive => 1.0 - value,
        }
    }
}

/// One cell of the construct→parameter weight matrix. Negative weights
/// invert the measurement before it is applied.
#[derive(Debug, Clone, Copy)]
pub struct MappingEdge {
    pub construct: Construct,
    pub parameter: Parameter,
    pub weight: f64,
}

/// The fixed projection matrix.
pub fn mapping_table() -> Vec<MappingEdge> {
    use Construct as C;
    use Parameter as P;

    let m = |construct, parameter, weight| MappingEdge {
        construct,
        parameter,
        weight,
    };

    vec![
        m(C::PsychologicalSafety, P::PsychSafety, 1.0),
        m(C::PsychologicalSafety, P::TrustPeers, 0.3),
        m(C::TrustPeers, P::TrustPeers, 1.0),
        m(C::Belonging, P::TrustPeers, 0.5),
        m(C::LeadershipSupport, P::TrustGap, -1.0),
        m(C::Fairness, P::TrustGap, -0.4),
        m(C::LeadershipSupport, P::PsychSafety, 0.3),
        m(C::Alignment, P::GoalAlignment, 1.0),
        m(C::Alignment, P::CognitiveDissonance, -0.7),
        m(C::GrowthOpportunity, P::GoalAlignment, 0.4),
        m(C::Recognition, P::GoalAlignment, 0.3),
        m(C::Autonomy, P::AutonomyFriction, -1.0),
        m(C::RoleClarity, P::RoleAmbiguity, -1.0),
        m(C::EmotionalLoad, P::EmotionalLoad, 1.0),
        m(C::Workload, P::EmotionalLoad, 0.5),
        m(C::CognitiveLoad, P::CognitiveLoad, 1.0),
        m(C::Workload, P::CognitiveLoad, 0.5),
    ]
}

/// Running state of one parameter across pipeline runs within a scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterState {
    /// Signal value, `SIGNAL_MIN`..=`SIGNAL_MAX`.
    pub signal: f64,
    /// Accumulated update weight; ≥ `WARM_WEIGHT_THRESHOLD` means warm.
    pub accumulated_weight: f64,
}

impl Default for ParameterState {
    fn default() -> Self {
        Self {
            signal: 0.5,
            accumulated_weight: 0.0,
        }
    }
}

impl ParameterState {
    pub fn is_warm(&self) -> bool {
        self.accumulated_weight >= WARM_WEIGHT_THRESHOLD
    }
}

/// Flags raised while encoding (cold start, missing contributors).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodingFlag {
    ColdStart,
    NoContributingEvidence,
}

/// The encoded parameter vector for one scope and week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodedSignal {
    /// Parameter → signal value.
    pub signals: BTreeMap<Parameter, f64>,
    /// Parameter → reported uncertainty (min sigma among contributors).
    pub uncertainty: BTreeMap<Parameter, f64>,
    /// Mean of (1 − sigma) across all contributing constructs.
    pub confidence: f64,
    pub flags: Vec<EncodingFlag>,
}

/// Project fused measurements onto the parameter vector, updating `states`
/// in place and returning the encoded snapshot.
///
/// Parameters with no contributing measurement this week keep their prior
/// signal and are reported at prior uncertainty.
pub fn encode_signals(
    measurements: &BTreeMap<Construct, ConstructMeasurement>,
    states: &mut BTreeMap<Parameter, ParameterState>,
) -> EncodedSignal {
    let mut uncertainty: BTreeMap<Parameter, f64> = BTreeMap::new();
    let mut confidences: Vec<f64> = Vec::new();
    let mut flags: Vec<EncodingFlag> = Vec::new();
    let mut touched = false;

    for edge in mapping_table() {
        let Some(measurement) = measurements.get(&edge.construct) else {
            continue;
        };
        touched = true;

        let state = states.entry(edge.parameter).or_default();
        if !state.is_warm() && !flags.contains(&EncodingFlag::ColdStart) {
            flags.push(EncodingFlag::ColdStart);
        }

        // Negative matrix weight means the construct opposes the parameter.
        let raw_value = if edge.weight < 0.0 {
            1.0 - measurement.mean
        } else {
            measurement.mean
        };

        let delta = raw_value - state.signal;
        let cap = if state.is_warm() {
            WARM_DELTA_CAP
        } else {
            COLD_DELTA_CAP
        };
        let capped = delta.clamp(-cap, cap);

        // High source uncertainty mutes the update.
        let update = capped * edge.weight.abs() * (1.0 - measurement.sigma);
        state.signal = (state.signal + update).clamp(SIGNAL_MIN, SIGNAL_MAX);
        state.accumulated_weight += edge.weight.abs() * (1.0 - measurement.sigma);

        uncertainty
            .entry(edge.parameter)
            .and_modify(|u| *u = u.min(measurement.sigma))
            .or_insert(measurement.sigma);
        confidences.push(1.0 - measurement.sigma);
    }

    if !touched {
        flags.push(EncodingFlag::NoContributingEvidence);
    }

    let signals: BTreeMap<Parameter, f64> = states
        .iter()
        .map(|(&p, state)| (p, state.signal))
        .collect();

    let confidence = if confidences.is_empty() {
        0.0
    } else {
        confidences.iter().sum::<f64>() / confidences.len() as f64
    };

    EncodedSignal {
        signals,
        uncertainty,
        confidence,
        flags,
    }
}
