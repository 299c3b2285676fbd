//! Evidence ingestion and fusion into construct measurements.
//!
//! Each survey response yields atomic `Evidence` signals. Fusion is an
//! explicit fold over an ordered evidence sequence: the accumulator
//! (`FusionAccumulator`) carries mean, sigma, and effective sample size, so
//! the conflict-dampening and uncertainty rules are unit-testable in
//! isolation rather than hidden in object state.
//!
//! Contradictory evidence is never discarded and never averaged away
//! silently: a conflicting observation has its weight halved and inflates
//! the running sigma, making the disagreement visible to every downstream
//! consumer.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constructs::Construct;

/// Maximum stored rationale length. Longer text is truncated at ingestion.
pub const MAX_RATIONALE_LEN: usize = 240;

/// Neutral prior mean for an unmeasured construct.
pub const PRIOR_MEAN: f64 = 0.5;
/// Prior sigma: maximally uncertain within the calibrated band.
pub const PRIOR_SIGMA: f64 = 0.4;
/// Fused sigma never drops below this. The model must not claim certainty.
pub const SIGMA_FLOOR: f64 = 0.05;
/// Effective sample size above which a contradiction triggers dampening.
const CONFLICT_MIN_SAMPLE: f64 = 0.5;
/// Deviation from the running mean that counts as a contradiction.
const CONFLICT_DEVIATION: f64 = 0.5;
/// Weight multiplier applied to contradictory evidence.
const CONFLICT_DAMPENING: f64 = 0.5;
/// Sigma inflation added when a contradiction is absorbed.
const CONFLICT_SIGMA_INFLATION: f64 = 0.2;

/// How an evidence signal was captured.
///
/// Tagged at ingestion time; never inferred from payload shape. The modality
/// determines the signal's intrinsic uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceSource {
    Slider,
    Choice,
    Rating,
    Text,
    Scenario,
}

impl EvidenceSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Slider => "slider",
            Self::Choice => "choice",
            Self::Rating => "rating",
            Self::Text => "text",
            Self::Scenario => "scenario",
        }
    }

    /// Intrinsic measurement uncertainty of this modality.
    ///
    /// Structured widgets pin the respondent to a scale; free text passes
    /// through an extraction step and inherits its noise.
    pub fn intrinsic_sigma(self) -> f64 {
        match self {
            Self::Slider | Self::Choice => 0.1,
            Self::Text => 0.3,
            Self::Rating | Self::Scenario => 0.2,
        }
    }
}

/// Direction of an evidence signal relative to the construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Positive,
    Negative,
}

impl Direction {
    pub fn sign(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Negative => -1.0,
        }
    }
}

/// One atomic signal extracted from a single survey response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub construct: Construct,
    pub direction: Direction,
    /// Magnitude of the signal, 0..=1.
    pub strength: f64,
    /// Extraction confidence, 0..=1. Feeds the fusion weight directly.
    pub confidence: f64,
    pub source: EvidenceSource,
    /// Short free-text justification, already sanitized. Never used for
    /// modality detection.
    #[serde(default)]
    pub rationale: Option<String>,
}

impl Evidence {
    pub fn new(
        construct: Construct,
        direction: Direction,
        strength: f64,
        confidence: f64,
        source: EvidenceSource,
    ) -> Self {
        Self {
            construct,
            direction,
            strength: strength.clamp(0.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            source,
            rationale: None,
        }
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = Some(sanitize_rationale(&rationale.into()));
        self
    }

    /// The value this evidence pulls the construct mean toward.
    pub fn target_value(&self) -> f64 {
        PRIOR_MEAN + self.direction.sign() * self.strength * 0.5
    }
}

/// Strip obvious PII and cap length before a rationale is stored.
///
/// E-mail addresses and long digit runs (phone numbers, ids) are masked;
/// anything beyond `MAX_RATIONALE_LEN` chars is dropped.
pub fn sanitize_rationale(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_RATIONALE_LEN));
    let mut digit_run = 0usize;
    for token in raw.split_whitespace() {
        let masked = if token.contains('@') && token.contains('.') {
            "[redacted]".to_string()
        } else {
            token.to_string()
        };
        if !out.is_empty() {
            out.push(' ');
        }
        for ch in masked.chars() {
            if ch.is_ascii_digit() {
                digit_run += 1;
            } else {
                digit_run = 0;
            }
            // Mask the tail of any 7+ digit run.
            if digit_run > 6 {
                out.push('#');
            } else {
                out.push(ch);
            }
        }
    }
    if out.chars().count() > MAX_RATIONALE_LEN {
        out = out.chars().take(MAX_RATIONALE_LEN).collect();
    }
    out
}

/// Fused belief about one construct for one (user, week) scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConstructMeasurement {
    /// Fused estimate, 0..=1.
    pub mean: f64,
    /// Fused uncertainty, `SIGMA_FLOOR`..=1.
    pub sigma: f64,
    /// Effective weighted observation count.
    pub sample_size: f64,
    /// Observation count per modality, for audit.
    pub source_counts: BTreeMap<EvidenceSource, u32>,
}

impl Default for ConstructMeasurement {
    fn default() -> Self {
        Self {
            mean: PRIOR_MEAN,
            sigma: PRIOR_SIGMA,
            sample_size: 0.0,
            source_counts: BTreeMap::new(),
        }
    }
}

impl ConstructMeasurement {
    /// True when no evidence has been folded in yet.
    pub fn is_prior(&self) -> bool {
        self.sample_size == 0.0
    }
}

/// Explicit fold state for one construct.
///
/// `step` is associative only when weights commute, so callers must preserve
/// ingestion order; reproducibility tests replay recorded sequences.
#[derive(Debug, Clone, Default)]
pub struct FusionAccumulator {
    measurement: ConstructMeasurement,
}

impl FusionAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_measurement(measurement: ConstructMeasurement) -> Self {
        Self { measurement }
    }

    /// Fold one evidence item into the accumulator.
    pub fn step(&mut self, evidence: &Evidence) {
        let m = &mut self.measurement;
        let target = evidence.target_value();
        let intrinsic = evidence.source.intrinsic_sigma();

        // Contradiction: an established belief is being pulled hard the
        // other way. Halve the pull and surface the disagreement as sigma.
        let mut dampening = 1.0;
        if m.sample_size > CONFLICT_MIN_SAMPLE && (target - m.mean).abs() > CONFLICT_DEVIATION {
            dampening = CONFLICT_DAMPENING;
            m.sigma = (m.sigma + CONFLICT_SIGMA_INFLATION).min(1.0);
        }

        let weight = evidence.confidence * dampening;
        if weight <= 0.0 {
            *m.source_counts.entry(evidence.source).or_insert(0) += 1;
            return;
        }

        let total = m.sample_size + weight;
        m.mean = (m.mean * m.sample_size + target * weight) / total;
        m.sigma = ((m.sigma * m.sample_size + intrinsic * weight) / total).clamp(SIGMA_FLOOR, 1.0);
        m.mean = m.mean.clamp(0.0, 1.0);
        m.sample_size = total;
        *m.source_counts.entry(evidence.source).or_insert(0) += 1;
    }

    pub fn measurement(&self) -> &ConstructMeasurement {
        &self.measurement
    }

    pub fn into_measurement(self) -> ConstructMeasurement {
        self.measurement
    }
}

/// Fuse an ordered evidence sequence into per-construct measurements.
///
/// Constructs with no evidence are absent from the result; consumers that
/// need a value fall back to `ConstructMeasurement::default()` (the neutral
/// prior) and flag low confidence rather than fail.
pub fn fuse_evidence(evidence: &[Evidence]) -> BTreeMap<Construct, ConstructMeasurement> {
    let mut accs: BTreeMap<Construct, FusionAccumulator> = BTreeMap::new();
    for item in evidence {
        accs.entry(item.construct).or_default().step(item);
    }
    accs.into_iter()
        .map(|(c, acc)| (c, acc.into_measurement()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(direction: Direction, strength: f64, confidence: f64, source: EvidenceSource) -> Evidence {
        Evidence::new(
            Construct::PsychologicalSafety,
            direction,
            strength,
            confidence,
            source,
        )
    }

    #[test]
    fn single_positive_slider_moves_mean_up_and_tightens_sigma() {
        let mut acc = FusionAccumulator::new();
        acc.step(&ev(Direction::Positive, 0.8, 1.0, EvidenceSource::Slider));
        let m = acc.measurement();
        // target = 0.9, full weight replaces the zero-sample prior
        assert!((m.mean - 0.9).abs() < 1e-9);
        assert!((m.sigma - 0.1).abs() < 1e-9);
        assert!((m.sample_size - 1.0).abs() < 1e-9);
    }

    #[test]
    fn sigma_respects_floor_and_ceiling() {
        let mut acc = FusionAccumulator::new();
        for _ in 0..100 {
            acc.step(&ev(Direction::Positive, 0.2, 1.0, EvidenceSource::Slider));
        }
        let m = acc.measurement();
        assert!(m.sigma >= SIGMA_FLOOR);
        assert!(m.sigma <= 1.0);
        assert!((0.0..=1.0).contains(&m.mean));
    }

    #[test]
    fn contradiction_inflates_sigma() {
        let mut acc = FusionAccumulator::new();
        acc.step(&ev(Direction::Positive, 1.0, 1.0, EvidenceSource::Slider));
        let sigma_before = acc.measurement().sigma;
        // sample_size is now 1.0 > 0.5; a full-strength reversal deviates by
        // ~1.0 > 0.5 from the running mean.
        acc.step(&ev(Direction::Negative, 1.0, 1.0, EvidenceSource::Slider));
        let m = acc.measurement();
        assert!(
            m.sigma > sigma_before,
            "conflict must inflate sigma: {} <= {}",
            m.sigma,
            sigma_before
        );
    }

    #[test]
    fn contradictory_evidence_gets_half_weight() {
        let mut acc = FusionAccumulator::new();
        acc.step(&ev(Direction::Positive, 1.0, 1.0, EvidenceSource::Slider));
        acc.step(&ev(Direction::Negative, 1.0, 1.0, EvidenceSource::Slider));
        let m = acc.measurement();
        // Second item folded at weight 0.5: mean = (1.0*1.0 + 0.0*0.5) / 1.5
        assert!((m.mean - 2.0 / 3.0).abs() < 1e-9);
        assert!((m.sample_size - 1.5).abs() < 1e-9);
    }

    #[test]
    fn zero_confidence_evidence_counts_modality_but_not_weight() {
        let mut acc = FusionAccumulator::new();
        acc.step(&ev(Direction::Positive, 1.0, 0.0, EvidenceSource::Text));
        let m = acc.measurement();
        assert!(m.is_prior());
        assert_eq!(m.source_counts.get(&EvidenceSource::Text), Some(&1));
        assert!((m.mean - PRIOR_MEAN).abs() < 1e-9);
    }

    #[test]
    fn fuse_evidence_groups_by_construct_in_order() {
        let items = vec![
            Evidence::new(
                Construct::Autonomy,
                Direction::Negative,
                0.6,
                0.9,
                EvidenceSource::Choice,
            ),
            Evidence::new(
                Construct::EmotionalLoad,
                Direction::Positive,
                0.8,
                0.7,
                EvidenceSource::Text,
            ),
            Evidence::new(
                Construct::Autonomy,
                Direction::Negative,
                0.4,
                0.5,
                EvidenceSource::Text,
            ),
        ];
        let fused = fuse_evidence(&items);
        assert_eq!(fused.len(), 2);
        let autonomy = &fused[&Construct::Autonomy];
        assert!(autonomy.mean < PRIOR_MEAN);
        assert!((autonomy.sample_size - 1.4).abs() < 1e-9);
    }

    #[test]
    fn replaying_the_same_sequence_is_reproducible() {
        let seq = vec![
            ev(Direction::Positive, 0.9, 0.8, EvidenceSource::Slider),
            ev(Direction::Negative, 0.7, 0.6, EvidenceSource::Text),
            ev(Direction::Positive, 0.3, 1.0, EvidenceSource::Rating),
        ];
        let a = fuse_evidence(&seq);
        let b = fuse_evidence(&seq);
        assert_eq!(a, b);
    }

    #[test]
    fn sanitize_masks_emails_and_long_digit_runs() {
        let s = sanitize_rationale("contact me at jane.doe@corp.example or 4155551234567");
        assert!(!s.contains('@'));
        assert!(s.contains("[redacted]"));
        assert!(s.contains('#'), "long digit run should be masked: {s}");
        assert!(s.chars().count() <= MAX_RATIONALE_LEN);
    }
}
