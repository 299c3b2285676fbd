//! Trend detection over weekly health history.
//!
//! Ordinary least-squares slope of health over index position, after sorting
//! points ascending by week. One point is not a trend: with fewer than two
//! observations the result is STABLE at velocity zero with an explicit
//! explanation, never an extrapolation.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::DecisionConfig;

/// One persisted weekly health observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub week_start: NaiveDate,
    /// Average health for that week, 0..=1.
    pub health: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Improving,
    Stable,
    Deteriorating,
}

impl TrendDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Stable => "stable",
            Self::Deteriorating => "deteriorating",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "improving" => Self::Improving,
            "deteriorating" => Self::Deteriorating,
            _ => Self::Stable,
        }
    }
}

/// Result of one trend evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendAssessment {
    pub direction: TrendDirection,
    /// OLS slope in health units per week.
    pub velocity: f64,
    pub explanation: String,
}

/// Regress health over week position and classify the slope.
pub fn evaluate_trend(config: &DecisionConfig, history: &[HistoryPoint]) -> TrendAssessment {
    if history.len() < 2 {
        return TrendAssessment {
            direction: TrendDirection::Stable,
            velocity: 0.0,
            explanation: format!(
                "insufficient history: {} point(s), need at least 2",
                history.len()
            ),
        };
    }

    let mut points = history.to_vec();
    points.sort_by_key(|p| p.week_start);

    let slope = ols_slope(&points);
    let direction = if slope > config.trend_slope_threshold {
        TrendDirection::Improving
    } else if slope < -config.trend_slope_threshold {
        TrendDirection::Deteriorating
    } else {
        TrendDirection::Stable
    };

    TrendAssessment {
        direction,
        velocity: slope,
        explanation: format!(
            "{} over {} weeks (slope {:+.3}/week)",
            direction.as_str(),
            points.len(),
            slope
        ),
    }
}

/// Least-squares slope of health over 0-based index position.
fn ols_slope(points: &[HistoryPoint]) -> f64 {
    let n = points.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = points.iter().map(|p| p.health).sum::<f64>() / n;

    let mut num = 0.0;
    let mut den = 0.0;
    for (i, p) in points.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (p.health - mean_y);
        den += dx * dx;
    }
    if den <= f64::EPSILON {
        0.0
    } else {
        num / den
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(year: i32, month: u32, day: u32, health: f64) -> HistoryPoint {
        HistoryPoint {
            week_start: NaiveDate::from_ymd_opt(year, month, day).unwrap(),
            health,
        }
    }

    fn config() -> DecisionConfig {
        DecisionConfig::default()
    }

    #[test]
    fn empty_history_is_stable_zero_velocity() {
        let t = evaluate_trend(&config(), &[]);
        assert_eq!(t.direction, TrendDirection::Stable);
        assert_eq!(t.velocity, 0.0);
        assert!(t.explanation.contains("insufficient history"));
    }

    #[test]
    fn one_point_never_extrapolates() {
        let t = evaluate_trend(&config(), &[point(2026, 7, 6, 0.9)]);
        assert_eq!(t.direction, TrendDirection::Stable);
        assert_eq!(t.velocity, 0.0);
        assert!(t.explanation.contains("insufficient history"));
    }

    #[test]
    fn rising_health_is_improving() {
        let history = vec![
            point(2026, 7, 6, 0.40),
            point(2026, 7, 13, 0.48),
            point(2026, 7, 20, 0.55),
            point(2026, 7, 27, 0.62),
        ];
        let t = evaluate_trend(&config(), &history);
        assert_eq!(t.direction, TrendDirection::Improving);
        assert!(t.velocity > 0.02);
    }

    #[test]
    fn falling_health_is_deteriorating() {
        let history = vec![
            point(2026, 7, 6, 0.70),
            point(2026, 7, 13, 0.60),
            point(2026, 7, 20, 0.52),
        ];
        let t = evaluate_trend(&config(), &history);
        assert_eq!(t.direction, TrendDirection::Deteriorating);
        assert!(t.velocity < -0.02);
    }

    #[test]
    fn small_slope_is_stable() {
        let history = vec![
            point(2026, 7, 6, 0.600),
            point(2026, 7, 13, 0.605),
            point(2026, 7, 20, 0.601),
        ];
        let t = evaluate_trend(&config(), &history);
        assert_eq!(t.direction, TrendDirection::Stable);
    }

    #[test]
    fn unsorted_input_is_sorted_before_regression() {
        let sorted = vec![
            point(2026, 7, 6, 0.40),
            point(2026, 7, 13, 0.50),
            point(2026, 7, 20, 0.60),
        ];
        let mut shuffled = vec![sorted[2], sorted[0], sorted[1]];
        let a = evaluate_trend(&config(), &sorted);
        let b = evaluate_trend(&config(), &shuffled);
        shuffled.reverse();
        let c = evaluate_trend(&config(), &shuffled);
        assert!((a.velocity - b.velocity).abs() < 1e-12);
        assert!((a.velocity - c.velocity).abs() < 1e-12);
        assert_eq!(a.direction, TrendDirection::Improving);
    }
}
