//! Heuristic causality scoring and counterfactual simulation over the
//! ontology graph.
//!
//! The scorer is a transparent additive heuristic, not a statistical causal
//! estimator: each contributing reason is returned next to the score so a
//! reviewer can audit why a driver was tiered as causal. Weights live in
//! `CausalityConfig`; the defaults preserve the calibration-free constants
//! the model shipped with and nothing else reads them as literals.

use serde::{Deserialize, Serialize};

use crate::constructs::Construct;
use crate::ontology::{DownstreamEffect, OntologyGraph};

/// Hop budget for the indirect-link search during scoring.
const INDIRECT_SEARCH_DEPTH: usize = 2;
/// Hop budget for counterfactual projection.
const COUNTERFACTUAL_DEPTH: usize = 3;
/// Per-hop confidence degradation beyond the path-strength decay.
const HOP_CONFIDENCE_FACTOR: f64 = 0.9;

/// Trend classification of the driver signal over recent weeks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalTrend {
    Rising,
    Falling,
    Flat,
    Volatile,
}

/// Discrete confidence tier for a causal claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CausalTier {
    StrongCausal,
    WeakCausal,
    Correlational,
}

/// Scoring weights and tier thresholds.
///
/// The defaults are unexplained constants inherited from the source model;
/// they are overridable configuration, not calibrated estimates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalityConfig {
    pub direct_edge_weight: f64,
    pub indirect_link_weight: f64,
    pub extreme_signal_weight: f64,
    pub persistence_weight: f64,
    pub strong_threshold: f64,
    pub weak_threshold: f64,
    /// Signal beyond these bounds counts as an extreme push.
    pub extreme_high: f64,
    pub extreme_low: f64,
}

impl Default for CausalityConfig {
    fn default() -> Self {
        Self {
            direct_edge_weight: 0.4,
            indirect_link_weight: 0.2,
            extreme_signal_weight: 0.2,
            persistence_weight: 0.2,
            strong_threshold: 0.7,
            weak_threshold: 0.4,
            extreme_high: 0.8,
            extreme_low: 0.2,
        }
    }
}

/// The audited result of one causality query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CausalAnalysis {
    pub driver: Construct,
    pub outcome: Construct,
    pub score: f64,
    pub tier: CausalTier,
    /// Human-readable contributions, one per additive term that fired.
    pub reasons: Vec<String>,
}

/// Pure scorer over the compiled graph.
pub struct CausalityService<'g> {
    graph: &'g OntologyGraph,
    config: CausalityConfig,
}

impl<'g> CausalityService<'g> {
    pub fn new(graph: &'g OntologyGraph) -> Self {
        Self::with_config(graph, CausalityConfig::default())
    }

    pub fn with_config(graph: &'g OntologyGraph, config: CausalityConfig) -> Self {
        Self { graph, config }
    }

    /// Score the claim that `driver` causes `outcome` given the driver's
    /// observed trend and current signal strength.
    pub fn analyze(
        &self,
        driver: Construct,
        outcome: Construct,
        trend: SignalTrend,
        signal_strength: f64,
    ) -> CausalAnalysis {
        let cfg = &self.config;
        let mut score = 0.0;
        let mut reasons = Vec::new();

        if let Some(edge) = self.graph.direct_edge(driver, outcome) {
            score += cfg.direct_edge_weight;
            reasons.push(format!(
                "direct {} edge {} -> {} (strength {:.2})",
                edge.edge_type.as_str(),
                driver.id(),
                outcome.id(),
                edge.strength,
            ));
        } else {
            let reachable = self
                .graph
                .downstream_effects(driver, INDIRECT_SEARCH_DEPTH)
                .iter()
                .any(|e| e.construct == outcome);
            if reachable {
                score += cfg.indirect_link_weight;
                reasons.push(format!(
                    "{} reachable from {} within {} hops",
                    outcome.id(),
                    driver.id(),
                    INDIRECT_SEARCH_DEPTH,
                ));
            }
        }

        if signal_strength > cfg.extreme_high || signal_strength < cfg.extreme_low {
            score += cfg.extreme_signal_weight;
            reasons.push(format!(
                "signal {:.2} is an extreme push (outside {:.2}..{:.2})",
                signal_strength, cfg.extreme_low, cfg.extreme_high,
            ));
        }

        if trend != SignalTrend::Volatile {
            score += cfg.persistence_weight;
            reasons.push("driver signal is temporally persistent".to_string());
        }

        let tier = if score >= cfg.strong_threshold {
            CausalTier::StrongCausal
        } else if score >= cfg.weak_threshold {
            CausalTier::WeakCausal
        } else {
            CausalTier::Correlational
        };

        CausalAnalysis {
            driver,
            outcome,
            score,
            tier,
            reasons,
        }
    }
}

// =============================================================================
// Counterfactual engine
// =============================================================================

/// Hypothetical intervention direction on a driver construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionDirection {
    Increase,
    Decrease,
}

impl InterventionDirection {
    fn flipped(self) -> Self {
        match self {
            Self::Increase => Self::Decrease,
            Self::Decrease => Self::Increase,
        }
    }
}

/// Predicted downstream movement of one construct under an intervention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictedEffect {
    pub construct: Construct,
    pub predicted_direction: InterventionDirection,
    pub confidence: f64,
    pub depth: usize,
}

/// Result of one counterfactual walk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Counterfactual {
    pub driver: Construct,
    pub direction: InterventionDirection,
    pub effects: Vec<PredictedEffect>,
    /// Raised when the intervention has no modeled consequence at all.
    pub no_modeled_consequence: bool,
}

/// Project the downstream consequences of nudging one construct.
pub fn simulate_counterfactual(
    graph: &OntologyGraph,
    driver: Construct,
    direction: InterventionDirection,
) -> Counterfactual {
    let downstream = graph.downstream_effects(driver, COUNTERFACTUAL_DEPTH);
    let effects: Vec<PredictedEffect> = downstream
        .iter()
        .map(|effect| PredictedEffect {
            construct: effect.construct,
            predicted_direction: predicted_direction(direction, effect),
            confidence: effect.path_strength * HOP_CONFIDENCE_FACTOR,
            depth: effect.depth,
        })
        .collect();

    Counterfactual {
        driver,
        direction,
        no_modeled_consequence: effects.is_empty(),
        effects,
    }
}

/// Increasing a driver increases positively-linked targets and decreases
/// inhibited ones; a decrease flips both.
fn predicted_direction(
    intervention: InterventionDirection,
    effect: &DownstreamEffect,
) -> InterventionDirection {
    if effect.edge_type.is_positive() {
        intervention
    } else {
        intervention.flipped()
    }
}
