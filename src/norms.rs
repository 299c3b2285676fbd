//! Population norm profiles and deviation scoring.
//!
//! A `NormProfile` supplies per-construct reference mean/sigma for one
//! organization. When no org-specific profile is configured, the compiled
//! global tech benchmark applies. Deviation is a plain z-score bucketed
//! into severity bands.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constructs::Construct;

/// Severity band of a single deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviationBand {
    Normal,
    HealthyDeviation,
    RiskDeviation,
    ExtremeRisk,
}

impl DeviationBand {
    /// Bands beyond ordinary population spread.
    pub fn is_anomalous(self) -> bool {
        !matches!(self, Self::Normal)
    }

    /// Bands that indicate concrete risk rather than benign spread.
    pub fn is_severe(self) -> bool {
        matches!(self, Self::RiskDeviation | Self::ExtremeRisk)
    }
}

/// Reference distribution for one construct.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormEntry {
    pub mean: f64,
    pub sigma: f64,
    /// Inclusive band considered healthy for reporting.
    pub healthy_low: f64,
    pub healthy_high: f64,
}

/// Per-org population reference, falling back to the global benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormProfile {
    pub org_id: Option<String>,
    entries: BTreeMap<Construct, NormEntry>,
}

/// One scored deviation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deviation {
    pub construct: Construct,
    pub score: f64,
    pub z: f64,
    pub band: DeviationBand,
}

impl NormProfile {
    /// The compiled global tech benchmark, used when no org profile exists.
    ///
    /// Means reflect the neutral-to-mildly-positive skew of anonymous tech
    /// workforce surveys; load constructs sit below midpoint because most
    /// weeks are not crunch weeks.
    pub fn global_benchmark() -> Self {
        let mut entries = BTreeMap::new();
        let e = |mean, sigma| NormEntry {
            mean,
            sigma,
            healthy_low: mean - sigma,
            healthy_high: mean + sigma,
        };
        for c in Construct::ALL {
            let entry = match c {
                Construct::EmotionalLoad | Construct::CognitiveLoad | Construct::Workload => {
                    e(0.45, 0.15)
                }
                Construct::PsychologicalSafety => e(0.62, 0.14),
                Construct::Engagement => e(0.60, 0.16),
                _ => e(0.58, 0.15),
            };
            entries.insert(c, entry);
        }
        Self {
            org_id: None,
            entries,
        }
    }

    /// Build an org-specific profile; constructs missing from `overrides`
    /// keep the benchmark entry.
    pub fn for_org(org_id: impl Into<String>, overrides: BTreeMap<Construct, NormEntry>) -> Self {
        let mut profile = Self::global_benchmark();
        profile.org_id = Some(org_id.into());
        for (c, entry) in overrides {
            profile.entries.insert(c, entry);
        }
        profile
    }

    pub fn entry(&self, construct: Construct) -> NormEntry {
        self.entries[&construct]
    }

    /// z-score `score` against the reference for `construct` and band it.
    pub fn deviation(&self, construct: Construct, score: f64) -> Deviation {
        let entry = self.entry(construct);
        // Degenerate sigma would make every score an outlier; treat the
        // reference as uninformative instead.
        let z = if entry.sigma > f64::EPSILON {
            (score - entry.mean) / entry.sigma
        } else {
            0.0
        };
        Deviation {
            construct,
            score,
            z,
            band: band_for(z),
        }
    }

    /// Score every measured construct against the profile.
    pub fn assess(&self, scores: &BTreeMap<Construct, f64>) -> Vec<Deviation> {
        scores
            .iter()
            .map(|(&c, &score)| self.deviation(c, score))
            .collect()
    }
}

fn band_for(z: f64) -> DeviationBand {
    let magnitude = z.abs();
    if magnitude > 3.0 {
        DeviationBand::ExtremeRisk
    } else if magnitude > 2.0 {
        DeviationBand::RiskDeviation
    } else if magnitude > 1.0 {
        DeviationBand::HealthyDeviation
    } else {
        DeviationBand::Normal
    }
}
