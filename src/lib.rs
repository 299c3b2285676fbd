#![forbid(unsafe_code)]

//! # orgpulse
//!
//! Weekly survey evidence → uncertainty-quantified construct estimates →
//! causal attribution → grounded narratives.
//!
//! The pipeline fuses per-response evidence into per-construct beliefs with
//! conflict-aware uncertainty, projects them onto a governed parameter
//! vector, scores risk against population norms, classifies team state and
//! trend, and persists one idempotent row per (org, team, week) keyed by a
//! canonical input hash. Any narrative generated from a row must cite paths
//! that resolve inside the canonical input, or it is rejected wholesale.

pub mod alerts;
pub mod canonical;
pub mod causality;
pub mod constructs;
pub mod decision;
pub mod evidence;
pub mod grounding;
pub mod norms;
pub mod ontology;
pub mod params;
pub mod pipeline;
pub mod provider;
pub mod risk;
pub mod store;

pub use canonical::CanonicalInputData;
pub use constructs::{Construct, ConstructLayer};
pub use decision::{DecisionConfig, DecisionSnapshot, TeamState};
pub use evidence::{fuse_evidence, ConstructMeasurement, Evidence, EvidenceSource};
pub use grounding::{assert_grounding_map, GroundingEntry, GroundingError};
pub use ontology::OntologyGraph;
pub use params::{encode_signals, EncodedSignal, Parameter};
pub use pipeline::{PipelineConfig, PipelineRunner, RunOutcome, TeamWeekInput, UserWeekEvidence};
pub use provider::{NarrativeDraft, NarrativeGateway, ProviderError, RetryingGateway};
pub use risk::{GovernanceFlag, RiskAssessment, RiskAssessor};
pub use store::{AggregateStore, LeaseStore, SqliteStore, WeeklyAggregateRow};
