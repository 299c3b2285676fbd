//! Idempotency and rollup behavior of the weekly pipeline against a real
//! SQLite store.

use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::tempdir;

use orgpulse::constructs::Construct;
use orgpulse::evidence::{Direction, Evidence, EvidenceSource};
use orgpulse::norms::NormProfile;
use orgpulse::pipeline::{PipelineConfig, PipelineRunner, TeamWeekInput, UserWeekEvidence};
use orgpulse::store::{AggregateStore, SqliteStore};

fn week() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 7, 27).unwrap()
}

fn slider(construct: Construct, direction: Direction, strength: f64) -> Evidence {
    Evidence::new(construct, direction, strength, 1.0, EvidenceSource::Slider)
}

fn team_input(team_id: &str, evidence_per_user: Vec<Vec<Evidence>>) -> TeamWeekInput {
    let users = evidence_per_user
        .into_iter()
        .enumerate()
        .map(|(i, evidence)| UserWeekEvidence {
            user_id: format!("{team_id}-u{i}"),
            session_count: 1,
            evidence,
        })
        .collect::<Vec<_>>();
    TeamWeekInput {
        org_id: "acme".into(),
        team_id: team_id.into(),
        week_start: week(),
        roster_size: users.len(),
        users,
    }
}

fn runner(store: Arc<SqliteStore>) -> PipelineRunner<SqliteStore> {
    PipelineRunner::new(store, NormProfile::global_benchmark(), PipelineConfig::default())
}

fn mild_team(team_id: &str) -> TeamWeekInput {
    team_input(
        team_id,
        vec![
            vec![
                slider(Construct::EmotionalLoad, Direction::Negative, 0.2),
                slider(Construct::PsychologicalSafety, Direction::Positive, 0.3),
            ],
            vec![
                slider(Construct::TrustPeers, Direction::Positive, 0.4),
                slider(Construct::Alignment, Direction::Positive, 0.5),
            ],
            vec![
                slider(Construct::Autonomy, Direction::Positive, 0.4),
                slider(Construct::RoleClarity, Direction::Positive, 0.4),
            ],
            vec![slider(Construct::Recognition, Direction::Positive, 0.3)],
        ],
    )
}

#[tokio::test]
async fn rerunning_identical_input_is_a_cache_hit_with_no_mutation() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("pulse.sqlite")).unwrap());
    let runner = runner(store.clone());

    let input = mild_team("platform");

    let first = runner.run_team_week(&input).await.unwrap();
    assert!(!first.was_cached());

    let second = runner.run_team_week(&input).await.unwrap();
    assert!(second.was_cached(), "identical input must skip recomputation");

    let a = first.row();
    let b = second.row();
    assert_eq!(a.input_hash, b.input_hash);
    assert_eq!(a.input_hash.len(), 16);
    assert_eq!(a.updated_at, b.updated_at, "cache hit must not touch the row");
    assert_eq!(a.compute_version, b.compute_version);
    assert_eq!(a.indices, b.indices);

    // Exactly one row persisted.
    let rows = store.rows_for_week("acme", week()).await.unwrap();
    assert_eq!(rows.len(), 1);
}

#[tokio::test]
async fn changed_evidence_triggers_recomputation() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("pulse.sqlite")).unwrap());
    let runner = runner(store.clone());

    let input = mild_team("platform");
    let first = runner.run_team_week(&input).await.unwrap();

    let mut changed = input.clone();
    changed.users[0].evidence[0].strength = 0.9;
    let second = runner.run_team_week(&changed).await.unwrap();

    assert!(!second.was_cached());
    assert_ne!(first.row().input_hash, second.row().input_hash);

    // Still one row per (org, team, week): the unit of idempotency.
    let rows = store.rows_for_week("acme", week()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].input_hash, second.row().input_hash);
}

#[tokio::test]
async fn compute_version_bump_invalidates_the_cache() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("pulse.sqlite")).unwrap());

    let input = mild_team("platform");
    runner(store.clone()).run_team_week(&input).await.unwrap();

    let mut config = PipelineConfig::default();
    config.compute_version = "v4".into();
    let bumped = PipelineRunner::new(store, NormProfile::global_benchmark(), config);
    let rerun = bumped.run_team_week(&input).await.unwrap();
    assert!(!rerun.was_cached());
    assert_eq!(rerun.row().compute_version, "v4");
}

#[tokio::test]
async fn rollup_promotes_only_multi_team_driver_families() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("pulse.sqlite")).unwrap());
    let runner = runner(store.clone());

    // Teams a and b both suffer load-family drivers; team c has a trust
    // problem nobody shares.
    let inputs = vec![
        team_input(
            "team-a",
            vec![
                vec![slider(Construct::EmotionalLoad, Direction::Positive, 0.9)],
                vec![slider(Construct::EmotionalLoad, Direction::Positive, 0.8)],
                vec![slider(Construct::EmotionalLoad, Direction::Positive, 0.9)],
                vec![slider(Construct::EmotionalLoad, Direction::Positive, 0.7)],
            ],
        ),
        team_input(
            "team-b",
            vec![
                vec![slider(Construct::CognitiveLoad, Direction::Positive, 0.8)],
                vec![slider(Construct::CognitiveLoad, Direction::Positive, 0.9)],
                vec![slider(Construct::CognitiveLoad, Direction::Positive, 0.8)],
                vec![slider(Construct::CognitiveLoad, Direction::Positive, 0.7)],
            ],
        ),
        team_input(
            "team-c",
            vec![
                vec![slider(Construct::LeadershipSupport, Direction::Negative, 0.8)],
                vec![slider(Construct::LeadershipSupport, Direction::Negative, 0.7)],
                vec![slider(Construct::LeadershipSupport, Direction::Negative, 0.8)],
                vec![slider(Construct::LeadershipSupport, Direction::Negative, 0.6)],
            ],
        ),
    ];

    let rollup = runner.run_org_week("acme", week(), &inputs).await.unwrap();

    let families: Vec<&str> = rollup
        .systemic_drivers
        .iter()
        .map(|d| d.family.as_str())
        .collect();
    assert!(
        families.contains(&"load"),
        "load spans two teams and must be systemic: {families:?}"
    );
    assert!(
        !families.contains(&"trust"),
        "trust is single-team and must stay team-local: {families:?}"
    );
    for pair in rollup.systemic_drivers.windows(2) {
        assert!(pair[0].aggregate_impact >= pair[1].aggregate_impact);
    }

    // Rollup is a pure function of persisted rows: re-running changes nothing
    // material.
    let again = runner.rollup_org("acme", week()).await.unwrap();
    assert_eq!(again.systemic_drivers, rollup.systemic_drivers);
    assert_eq!(again.indices, rollup.indices);
    assert_eq!(again.risk_distribution, rollup.risk_distribution);
}

#[tokio::test]
async fn rollup_without_team_rows_is_an_explicit_error() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("pulse.sqlite")).unwrap());
    let runner = runner(store);
    assert!(runner.rollup_org("ghost-org", week()).await.is_err());
}

#[tokio::test]
async fn series_accumulates_across_weeks() {
    let dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::new(dir.path().join("pulse.sqlite")).unwrap());
    let runner = runner(store.clone());

    for offset in 0..3u64 {
        let mut input = mild_team("platform");
        input.week_start = week() + chrono::Days::new(7 * offset);
        runner.run_team_week(&input).await.unwrap();
    }

    let last_week = week() + chrono::Days::new(14);
    let row = store
        .get_row("acme", "platform", last_week)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.series.len(), 3);
    assert!(row.series.windows(2).all(|w| w[0].week_start < w[1].week_start));
}
