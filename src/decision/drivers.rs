//! Driver attribution: which parameters explain the current risk.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::params::Parameter;

use super::DecisionConfig;

/// How far a driver's influence typically reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfluenceScope {
    Team,
    Department,
    Organization,
}

impl InfluenceScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Team => "team",
            Self::Department => "department",
            Self::Organization => "organization",
        }
    }
}

/// One attributed risk driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Driver {
    pub parameter: Parameter,
    /// Raw parameter value this week.
    pub value: f64,
    /// Deviation from the healthy ideal, polarity-aware.
    pub deviation: f64,
    pub influence_scope: InfluenceScope,
    /// Whether a team-level intervention can plausibly move this driver.
    pub is_actionable: bool,
}

/// Static driver metadata.
///
/// Scope reflects where the lever for the parameter usually sits; trust
/// gaps and dissonance are shaped above the team, so they are attributed
/// but not team-actionable.
fn driver_profile(parameter: Parameter) -> (InfluenceScope, bool) {
    match parameter {
        Parameter::PsychSafety => (InfluenceScope::Team, true),
        Parameter::TrustPeers => (InfluenceScope::Team, true),
        Parameter::TrustGap => (InfluenceScope::Department, false),
        Parameter::GoalAlignment => (InfluenceScope::Department, true),
        Parameter::AutonomyFriction => (InfluenceScope::Team, true),
        Parameter::RoleAmbiguity => (InfluenceScope::Team, true),
        Parameter::EmotionalLoad => (InfluenceScope::Team, true),
        Parameter::CognitiveLoad => (InfluenceScope::Team, true),
        Parameter::CognitiveDissonance => (InfluenceScope::Organization, false),
    }
}

/// Rank parameters by deviation-from-ideal and keep the top risks.
///
/// Deviations under the noise floor are discarded; the survivors are ranked
/// descending and truncated to `top_driver_count`.
pub fn attribute_drivers(
    config: &DecisionConfig,
    signals: &BTreeMap<Parameter, f64>,
) -> Vec<Driver> {
    let mut drivers: Vec<Driver> = signals
        .iter()
        .map(|(&parameter, &value)| {
            let (influence_scope, is_actionable) = driver_profile(parameter);
            Driver {
                parameter,
                value,
                deviation: parameter.deviation_from_ideal(value),
                influence_scope,
                is_actionable,
            }
        })
        .filter(|d| d.deviation >= config.driver_noise_floor)
        .collect();

    drivers.sort_by(|a, b| {
        b.deviation
            .partial_cmp(&a.deviation)
            .unwrap_or(std::cmp::Ordering::Equal)
            // Deterministic order for equal deviations.
            .then_with(|| a.parameter.cmp(&b.parameter))
    });
    drivers.truncate(config.top_driver_count);
    drivers
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DecisionConfig {
        DecisionConfig::default()
    }

    #[test]
    fn negative_polarity_deviation_is_the_value_itself() {
        let mut signals = BTreeMap::new();
        signals.insert(Parameter::EmotionalLoad, 0.82);
        signals.insert(Parameter::PsychSafety, 0.3);
        signals.insert(Parameter::TrustPeers, 0.6);

        let drivers = attribute_drivers(&config(), &signals);
        // emotional_load deviation 0.82, psych_safety 0.7; trust_peers 0.4
        assert_eq!(drivers.len(), 3);
        assert_eq!(drivers[0].parameter, Parameter::EmotionalLoad);
        assert!((drivers[0].deviation - 0.82).abs() < 1e-9);
        assert_eq!(drivers[1].parameter, Parameter::PsychSafety);
        assert!((drivers[1].deviation - 0.7).abs() < 1e-9);
    }

    #[test]
    fn noise_floor_discards_small_deviations() {
        let mut signals = BTreeMap::new();
        signals.insert(Parameter::EmotionalLoad, 0.15);
        signals.insert(Parameter::PsychSafety, 0.9);
        let drivers = attribute_drivers(&config(), &signals);
        assert!(drivers.is_empty());
    }

    #[test]
    fn top_five_cap_applies() {
        let mut signals = BTreeMap::new();
        for p in Parameter::ALL {
            // Every parameter maximally deviant.
            let value = match p.polarity() {
                crate::params::Polarity::Negative => 0.95,
                crate::params::Polarity::Positive => 0.05,
            };
            signals.insert(p, value);
        }
        let drivers = attribute_drivers(&config(), &signals);
        assert_eq!(drivers.len(), 5);
    }

    #[test]
    fn actionability_comes_from_the_static_table() {
        let mut signals = BTreeMap::new();
        signals.insert(Parameter::TrustGap, 0.9);
        signals.insert(Parameter::EmotionalLoad, 0.9);
        let drivers = attribute_drivers(&config(), &signals);
        let gap = drivers
            .iter()
            .find(|d| d.parameter == Parameter::TrustGap)
            .unwrap();
        assert!(!gap.is_actionable);
        assert_eq!(gap.influence_scope, InfluenceScope::Department);
        let load = drivers
            .iter()
            .find(|d| d.parameter == Parameter::EmotionalLoad)
            .unwrap();
        assert!(load.is_actionable);
    }
}
