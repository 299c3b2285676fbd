//! Fixed vocabulary of psychological constructs.
//!
//! Fourteen constructs across three ontology layers, designed so that the
//! structural conditions a team operates under (first order) are separated
//! from the latent states they produce (second order) and from the single
//! outcome the whole model exists to explain (engagement).
//!
//! The vocabulary is closed: downstream weight matrices, norm profiles, and
//! the ontology edge table all match exhaustively on `Construct`, so adding
//! a construct is a compile-time event, not a runtime configuration.

use serde::{Deserialize, Serialize};

/// Position of a construct in the causal ontology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructLayer {
    /// Environmental / structural conditions the organization controls directly.
    FirstOrder,
    /// Latent psychological states produced by first-order conditions.
    SecondOrder,
    /// The modeled outcome.
    Outcome,
}

/// One of the fourteen psychological dimensions the system measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Construct {
    // First order
    Autonomy,
    RoleClarity,
    Fairness,
    Recognition,
    Workload,
    LeadershipSupport,
    GrowthOpportunity,
    // Second order
    PsychologicalSafety,
    TrustPeers,
    EmotionalLoad,
    CognitiveLoad,
    Belonging,
    Alignment,
    // Outcome
    Engagement,
}

impl Construct {
    /// All constructs in declaration order. The order is stable and is the
    /// canonical iteration order for serialization and reporting.
    pub const ALL: [Construct; 14] = [
        Construct::Autonomy,
        Construct::RoleClarity,
        Construct::Fairness,
        Construct::Recognition,
        Construct::Workload,
        Construct::LeadershipSupport,
        Construct::GrowthOpportunity,
        Construct::PsychologicalSafety,
        Construct::TrustPeers,
        Construct::EmotionalLoad,
        Construct::CognitiveLoad,
        Construct::Belonging,
        Construct::Alignment,
        Construct::Engagement,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Self::Autonomy => "autonomy",
            Self::RoleClarity => "role_clarity",
            Self::Fairness => "fairness",
            Self::Recognition => "recognition",
            Self::Workload => "workload",
            Self::LeadershipSupport => "leadership_support",
            Self::GrowthOpportunity => "growth_opportunity",
            Self::PsychologicalSafety => "psychological_safety",
            Self::TrustPeers => "trust_peers",
            Self::EmotionalLoad => "emotional_load",
            Self::CognitiveLoad => "cognitive_load",
            Self::Belonging => "belonging",
            Self::Alignment => "alignment",
            Self::Engagement => "engagement",
        }
    }

    pub fn from_id(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.id() == s)
    }

    pub fn layer(self) -> ConstructLayer {
        match self {
            Self::Autonomy
            | Self::RoleClarity
            | Self::Fairness
            | Self::Recognition
            | Self::Workload
            | Self::LeadershipSupport
            | Self::GrowthOpportunity => ConstructLayer::FirstOrder,
            Self::PsychologicalSafety
            | Self::TrustPeers
            | Self::EmotionalLoad
            | Self::CognitiveLoad
            | Self::Belonging
            | Self::Alignment => ConstructLayer::SecondOrder,
            Self::Engagement => ConstructLayer::Outcome,
        }
    }

    /// Human definition shown in reports and norm-profile documentation.
    pub fn definition(self) -> &'static str {
        match self {
            Self::Autonomy => {
                "Degree of genuine discretion over how, when, and with what tools work is done."
            }
            Self::RoleClarity => {
                "How unambiguous the person's responsibilities, priorities, and success criteria are."
            }
            Self::Fairness => {
                "Perceived equity of workload distribution, evaluation, and reward decisions."
            }
            Self::Recognition => {
                "Whether effort and results are noticed and acknowledged by peers and leadership."
            }
            Self::Workload => {
                "Sustained volume and pacing of demanded work relative to available capacity."
            }
            Self::LeadershipSupport => {
                "Reliability of managerial backing: unblocking, shielding, and advocacy."
            }
            Self::GrowthOpportunity => {
                "Access to skill development, stretch assignments, and visible progression paths."
            }
            Self::PsychologicalSafety => {
                "Felt safety to dissent, admit mistakes, and ask questions without penalty."
            }
            Self::TrustPeers => {
                "Confidence that teammates are competent, reliable, and acting in good faith."
            }
            Self::EmotionalLoad => {
                "Accumulated affective strain: frustration, anxiety, and emotional exhaustion."
            }
            Self::CognitiveLoad => {
                "Sustained mental juggling: context switching, interruptions, and held state."
            }
            Self::Belonging => {
                "Sense of membership and acceptance within the immediate team."
            }
            Self::Alignment => {
                "Felt coherence between personal goals, team direction, and stated strategy."
            }
            Self::Engagement => {
                "Willingness to invest discretionary energy and attention in the work."
            }
        }
    }

    /// Constructs whose deviations carry elevated ethical sensitivity.
    ///
    /// Severe anomalies on these feed the ethical risk axis: they describe
    /// states where a wrong automated conclusion can harm individuals.
    pub fn is_ethically_sensitive(self) -> bool {
        matches!(
            self,
            Self::PsychologicalSafety | Self::EmotionalLoad | Self::Fairness
        )
    }
}
