//! Operational alert conditions.
//!
//! The core only computes *whether* a named condition holds; delivery is the
//! job of an external alerting transport. All predicates here are pure
//! functions over persisted rows and lease ages, so they can run from a
//! dashboard, a cron probe, or a test without side effects.

use serde::{Deserialize, Serialize};

use crate::store::WeeklyAggregateRow;

/// Lease age beyond which a run counts as stuck (seconds).
pub const STUCK_LEASE_SECONDS: i64 = 30 * 60;
/// Coverage below this across teams raises a coverage gap.
pub const COVERAGE_GAP_THRESHOLD: f64 = 0.5;
/// Fraction of degraded rows beyond which the week is systemically degraded.
pub const DEGRADED_RATE_THRESHOLD: f64 = 0.3;

/// A named condition for the external alerting layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AlertCondition {
    /// One or more teams fell below the coverage threshold.
    CoverageGap { teams: Vec<String>, threshold: f64 },
    /// A pipeline lease has been held longer than the stuck threshold.
    StuckLock { unit: String, age_seconds: i64 },
    /// Too many of the week's rows are degraded or blocked.
    HighDegradedRate { rate: f64, threshold: f64 },
}

/// Evaluate all conditions for one org/week snapshot of rows and leases.
pub fn evaluate_conditions(
    rows: &[WeeklyAggregateRow],
    lease_ages: &[(String, i64)],
) -> Vec<AlertCondition> {
    let mut conditions = Vec::new();

    let gapped: Vec<String> = rows
        .iter()
        .filter(|r| r.quality.coverage < COVERAGE_GAP_THRESHOLD)
        .map(|r| r.team_id.clone())
        .collect();
    if !gapped.is_empty() {
        conditions.push(AlertCondition::CoverageGap {
            teams: gapped,
            threshold: COVERAGE_GAP_THRESHOLD,
        });
    }

    for (unit, age) in lease_ages {
        if *age > STUCK_LEASE_SECONDS {
            conditions.push(AlertCondition::StuckLock {
                unit: unit.clone(),
                age_seconds: *age,
            });
        }
    }

    if !rows.is_empty() {
        let degraded = rows
            .iter()
            .filter(|r| r.quality.degraded || r.status != crate::store::RowStatus::Ok)
            .count();
        let rate = degraded as f64 / rows.len() as f64;
        if rate > DEGRADED_RATE_THRESHOLD {
            conditions.push(AlertCondition::HighDegradedRate {
                rate,
                threshold: DEGRADED_RATE_THRESHOLD,
            });
        }
    }

    conditions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::{evaluate_state, DecisionConfig};
    use crate::store::{QualityBlock, RowStatus};
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    fn row(team: &str, coverage: f64, status: RowStatus) -> WeeklyAggregateRow {
        WeeklyAggregateRow {
            org_id: "acme".into(),
            team_id: team.into(),
            week_start: NaiveDate::from_ymd_opt(2026, 7, 27).unwrap(),
            compute_version: "v3".into(),
            input_hash: "0".repeat(16),
            status,
            indices: BTreeMap::new(),
            attribution: Vec::new(),
            team_state: evaluate_state(&DecisionConfig::default(), &[]),
            series: Vec::new(),
            quality: QualityBlock {
                session_count: 5,
                coverage,
                degraded: status != RowStatus::Ok,
            },
            flags: Vec::new(),
            narrative: None,
            updated_at: 0,
        }
    }

    #[test]
    fn low_coverage_raises_a_gap_with_the_offending_teams() {
        let rows = vec![
            row("a", 0.9, RowStatus::Ok),
            row("b", 0.2, RowStatus::Ok),
        ];
        let conditions = evaluate_conditions(&rows, &[]);
        assert!(matches!(
            &conditions[0],
            AlertCondition::CoverageGap { teams, .. } if teams == &vec!["b".to_string()]
        ));
    }

    #[test]
    fn old_lease_is_stuck_young_lease_is_not() {
        let leases = vec![
            ("acme/a/2026-07-27".to_string(), STUCK_LEASE_SECONDS + 1),
            ("acme/b/2026-07-27".to_string(), 60),
        ];
        let conditions = evaluate_conditions(&[], &leases);
        assert_eq!(conditions.len(), 1);
        assert!(matches!(
            &conditions[0],
            AlertCondition::StuckLock { unit, .. } if unit == "acme/a/2026-07-27"
        ));
    }

    #[test]
    fn degraded_rate_threshold_is_exclusive() {
        // 1 of 4 degraded = 0.25, below threshold.
        let rows = vec![
            row("a", 0.9, RowStatus::Ok),
            row("b", 0.9, RowStatus::Ok),
            row("c", 0.9, RowStatus::Ok),
            row("d", 0.9, RowStatus::Degraded),
        ];
        assert!(evaluate_conditions(&rows, &[]).is_empty());

        // 2 of 4 = 0.5, above.
        let rows = vec![
            row("a", 0.9, RowStatus::Ok),
            row("b", 0.9, RowStatus::Ok),
            row("c", 0.9, RowStatus::Blocked),
            row("d", 0.9, RowStatus::Degraded),
        ];
        let conditions = evaluate_conditions(&rows, &[]);
        assert!(matches!(
            &conditions[0],
            AlertCondition::HighDegradedRate { rate, .. } if (rate - 0.5).abs() < 1e-9
        ));
    }

    #[test]
    fn clean_state_raises_nothing() {
        let rows = vec![row("a", 0.9, RowStatus::Ok)];
        assert!(evaluate_conditions(&rows, &[("u".into(), 10)]).is_empty());
    }
}
