//! Composite risk assessment and the governance gate.
//!
//! Risk is a three-axis vector (epistemic, ethical, organizational) bucketed
//! into an overall level. The governance gate turns an assessment plus raw
//! coverage numbers into typed flags; any blocking flag must keep the
//! affected view off end-user surfaces while the underlying row is still
//! persisted for audit.

use serde::{Deserialize, Serialize};

use crate::norms::Deviation;

/// Overall risk level bucketed from the max axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "critical" => Self::Critical,
            "high" => Self::High,
            "medium" => Self::Medium,
            _ => Self::Low,
        }
    }
}

/// Named thresholds for the risk assessor.
///
/// Source constants preserved as overridable configuration; they are not
/// calibrated against real outcome data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Epistemic surcharge applied below the minimum sample size.
    pub small_sample_penalty: f64,
    pub min_sample_size: f64,
    /// Base ethical risk once any severe sensitive deviation exists.
    pub ethical_base: f64,
    /// Ethical increment per severe sensitive deviation.
    pub ethical_step: f64,
    /// Organizational risk assigned when org-wide anomalies exceed the count.
    pub org_wide_risk: f64,
    pub org_wide_anomaly_count: usize,
    /// Level bucket boundaries on the max axis.
    pub medium_threshold: f64,
    pub high_threshold: f64,
    pub critical_threshold: f64,
    /// Epistemic value beyond which the assessment blocks regardless of level.
    pub epistemic_block_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            small_sample_penalty: 0.3,
            min_sample_size: 3.0,
            ethical_base: 0.6,
            ethical_step: 0.1,
            org_wide_risk: 0.5,
            org_wide_anomaly_count: 3,
            medium_threshold: 0.3,
            high_threshold: 0.5,
            critical_threshold: 0.7,
            epistemic_block_threshold: 0.5,
        }
    }
}

/// The three-axis risk vector with its derived level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub epistemic: f64,
    pub ethical: f64,
    pub organizational: f64,
    pub level: RiskLevel,
    /// A blocking assessment must suppress narrative/action output at the
    /// consumer boundary, not merely warn.
    pub blocking: bool,
}

/// Inputs to one risk evaluation.
#[derive(Debug, Clone)]
pub struct RiskInputs<'a> {
    /// Fused uncertainty of the evaluation subject.
    pub sigma: f64,
    /// Effective sample size behind the subject.
    pub sample_size: f64,
    /// Deviations for the evaluated scope (team) on sensitive constructs
    /// included.
    pub deviations: &'a [Deviation],
    /// Count of non-normal deviations across the whole org this week.
    pub org_wide_anomalies: usize,
}

/// Stateless assessor; construct once with config, reuse per evaluation.
#[derive(Debug, Clone, Default)]
pub struct RiskAssessor {
    config: RiskConfig,
}

impl RiskAssessor {
    pub fn new(config: RiskConfig) -> Self {
        Self { config }
    }

    pub fn assess(&self, inputs: &RiskInputs<'_>) -> RiskAssessment {
        let cfg = &self.config;

        let small_sample = inputs.sample_size < cfg.min_sample_size;
        let epistemic = (inputs.sigma
            + if small_sample {
                cfg.small_sample_penalty
            } else {
                0.0
            })
        .min(1.0);

        let severe_sensitive = inputs
            .deviations
            .iter()
            .filter(|d| d.band.is_severe() && d.construct.is_ethically_sensitive())
            .count();
        let ethical = if severe_sensitive > 0 {
            (cfg.ethical_base + cfg.ethical_step * severe_sensitive as f64).min(1.0)
        } else {
            0.0
        };

        let organizational = if inputs.org_wide_anomalies > cfg.org_wide_anomaly_count {
            cfg.org_wide_risk
        } else {
            0.0
        };

        let max_axis = epistemic.max(ethical).max(organizational);
        let level = if max_axis > cfg.critical_threshold {
            RiskLevel::Critical
        } else if max_axis > cfg.high_threshold {
            RiskLevel::High
        } else if max_axis > cfg.medium_threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        };

        let blocking = level == RiskLevel::Critical || epistemic > cfg.epistemic_block_threshold;

        RiskAssessment {
            epistemic,
            ethical,
            organizational,
            level,
            blocking,
        }
    }
}

// =============================================================================
// Governance gate
// =============================================================================

/// Kind of a governance flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKind {
    HighUncertainty,
    EthicalSensitivity,
    InsufficientData,
    ExtremeAnomaly,
}

impl FlagKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HighUncertainty => "high_uncertainty",
            Self::EthicalSensitivity => "ethical_sensitivity",
            Self::InsufficientData => "insufficient_data",
            Self::ExtremeAnomaly => "extreme_anomaly",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSeverity {
    Warning,
    Blocking,
}

/// One typed governance flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernanceFlag {
    pub kind: FlagKind,
    pub severity: FlagSeverity,
    pub detail: String,
}

impl GovernanceFlag {
    pub fn is_blocking(&self) -> bool {
        self.severity == FlagSeverity::Blocking
    }
}

/// Session count below which the week is not publishable.
const MIN_SESSIONS_BLOCKING: usize = 2;
/// Session count below which a warning is attached.
const MIN_SESSIONS_WARNING: usize = 4;

/// Merge a risk assessment, raw session count, and deviation severities into
/// typed flags.
pub fn governance_flags(
    assessment: &RiskAssessment,
    session_count: usize,
    deviations: &[Deviation],
) -> Vec<GovernanceFlag> {
    let mut flags = Vec::new();

    if assessment.epistemic > 0.5 {
        flags.push(GovernanceFlag {
            kind: FlagKind::HighUncertainty,
            severity: FlagSeverity::Blocking,
            detail: format!("epistemic risk {:.2} exceeds 0.50", assessment.epistemic),
        });
    }

    if assessment.ethical > 0.0 {
        // Ethical sensitivity warns; it blocks only through the overall
        // level, so the sensitive signal itself stays visible to admins.
        flags.push(GovernanceFlag {
            kind: FlagKind::EthicalSensitivity,
            severity: if assessment.level == RiskLevel::Critical {
                FlagSeverity::Blocking
            } else {
                FlagSeverity::Warning
            },
            detail: format!("severe deviation on sensitivity-flagged constructs (ethical {:.2})", assessment.ethical),
        });
    }

    if session_count < MIN_SESSIONS_BLOCKING {
        flags.push(GovernanceFlag {
            kind: FlagKind::InsufficientData,
            severity: FlagSeverity::Blocking,
            detail: format!("{session_count} session(s) this week"),
        });
    } else if session_count < MIN_SESSIONS_WARNING {
        flags.push(GovernanceFlag {
            kind: FlagKind::InsufficientData,
            severity: FlagSeverity::Warning,
            detail: format!("{session_count} sessions this week"),
        });
    }

    let extreme = deviations
        .iter()
        .filter(|d| d.band == crate::norms::DeviationBand::ExtremeRisk)
        .count();
    if extreme > 0 {
        flags.push(GovernanceFlag {
            kind: FlagKind::ExtremeAnomaly,
            severity: FlagSeverity::Blocking,
            detail: format!("{extreme} construct(s) beyond 3 sigma"),
        });
    }

    flags
}

/// True when any flag forbids end-user exposure.
pub fn is_blocked(flags: &[GovernanceFlag]) -> bool {
    flags.iter().any(GovernanceFlag::is_blocking)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constructs::Construct;
    use crate::norms::NormProfile;

    fn deviation(construct: Construct, z: f64) -> Deviation {
        let profile = NormProfile::global_benchmark();
        let entry = profile.entry(construct);
        profile.deviation(construct, entry.mean + z * entry.sigma)
    }

    #[test]
    fn epistemic_risk_is_monotonic_in_sigma() {
        let assessor = RiskAssessor::default();
        let mut last = -1.0;
        for sigma in [0.0, 0.2, 0.4, 0.6, 0.8, 1.0] {
            let a = assessor.assess(&RiskInputs {
                sigma,
                sample_size: 10.0,
                deviations: &[],
                org_wide_anomalies: 0,
            });
            assert!(a.epistemic >= last, "epistemic decreased at sigma {sigma}");
            last = a.epistemic;
        }
    }

    #[test]
    fn small_sample_adds_epistemic_penalty() {
        let assessor = RiskAssessor::default();
        let small = assessor.assess(&RiskInputs {
            sigma: 0.2,
            sample_size: 2.0,
            deviations: &[],
            org_wide_anomalies: 0,
        });
        let large = assessor.assess(&RiskInputs {
            sigma: 0.2,
            sample_size: 10.0,
            deviations: &[],
            org_wide_anomalies: 0,
        });
        assert!((small.epistemic - 0.5).abs() < 1e-9);
        assert!((large.epistemic - 0.2).abs() < 1e-9);
    }

    #[test]
    fn severe_sensitive_deviations_raise_ethical_axis() {
        let assessor = RiskAssessor::default();
        let devs = vec![
            deviation(Construct::PsychologicalSafety, -2.5),
            deviation(Construct::EmotionalLoad, 2.7),
            deviation(Construct::Recognition, -2.5), // severe but not sensitive
        ];
        let a = assessor.assess(&RiskInputs {
            sigma: 0.1,
            sample_size: 10.0,
            deviations: &devs,
            org_wide_anomalies: 0,
        });
        // 0.6 + 2 * 0.1
        assert!((a.ethical - 0.8).abs() < 1e-9);
        assert_eq!(a.level, RiskLevel::Critical);
        assert!(a.blocking);
    }

    #[test]
    fn org_wide_anomalies_set_organizational_axis() {
        let assessor = RiskAssessor::default();
        let a = assessor.assess(&RiskInputs {
            sigma: 0.1,
            sample_size: 10.0,
            deviations: &[],
            org_wide_anomalies: 4,
        });
        assert!((a.organizational - 0.5).abs() < 1e-9);
        let b = assessor.assess(&RiskInputs {
            sigma: 0.1,
            sample_size: 10.0,
            deviations: &[],
            org_wide_anomalies: 3,
        });
        assert_eq!(b.organizational, 0.0);
    }

    #[test]
    fn high_epistemic_blocks_even_below_critical() {
        let assessor = RiskAssessor::default();
        let a = assessor.assess(&RiskInputs {
            sigma: 0.6,
            sample_size: 10.0,
            deviations: &[],
            org_wide_anomalies: 0,
        });
        assert_ne!(a.level, RiskLevel::Critical);
        assert!(a.blocking);
    }

    #[test]
    fn governance_flags_cover_all_conditions() {
        let assessor = RiskAssessor::default();
        let devs = vec![deviation(Construct::PsychologicalSafety, -3.5)];
        let a = assessor.assess(&RiskInputs {
            sigma: 0.7,
            sample_size: 1.0,
            deviations: &devs,
            org_wide_anomalies: 0,
        });
        let flags = governance_flags(&a, 1, &devs);
        let kinds: Vec<FlagKind> = flags.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FlagKind::HighUncertainty));
        assert!(kinds.contains(&FlagKind::EthicalSensitivity));
        assert!(kinds.contains(&FlagKind::InsufficientData));
        assert!(kinds.contains(&FlagKind::ExtremeAnomaly));
        assert!(is_blocked(&flags));
    }

    #[test]
    fn clean_week_raises_no_flags() {
        let assessor = RiskAssessor::default();
        let a = assessor.assess(&RiskInputs {
            sigma: 0.1,
            sample_size: 8.0,
            deviations: &[],
            org_wide_anomalies: 0,
        });
        let flags = governance_flags(&a, 6, &[]);
        assert!(flags.is_empty());
        assert!(!is_blocked(&flags));
    }

    #[test]
    fn low_session_count_warns_before_blocking() {
        let assessor = RiskAssessor::default();
        let a = assessor.assess(&RiskInputs {
            sigma: 0.1,
            sample_size: 8.0,
            deviations: &[],
            org_wide_anomalies: 0,
        });
        let flags = governance_flags(&a, 3, &[]);
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].kind, FlagKind::InsufficientData);
        assert_eq!(flags[0].severity, FlagSeverity::Warning);
    }
}
