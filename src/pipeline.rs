//! Weekly pipeline runner: fuse → encode → assess → decide → persist.
//!
//! The runner is a stateless batch job. Each (org, team, week) unit is
//! independent: evidence is fused per user, encoded into parameters, the
//! canonical input is hashed, and an unchanged hash short-circuits the whole
//! computation. Team phase and org rollup are explicitly two-phase: rollup
//! only ever reads rows the team phase has already committed.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::canonical::{CanonicalInputData, ParameterStat, UserWeekInput};
use crate::constructs::Construct;
use crate::decision::{
    self, DecisionConfig, HealthIndex, HistoryPoint, InterventionTemplate, SnapshotMeta,
};
use crate::evidence::{fuse_evidence, Evidence};
use crate::norms::{Deviation, NormProfile};
use crate::params::{encode_signals, Parameter, ParameterState};
use crate::risk::{governance_flags, is_blocked, RiskAssessor, RiskInputs};
use crate::store::{
    AggregateStore, IndexValue, LeaseStore, OrgRollupRow, QualityBlock, RiskDistribution,
    RowStatus, SeriesPoint, StoreError, SystemicDriver, WeeklyAggregateRow,
};

/// Weeks retained in the rolling series snapshot.
const SERIES_WEEKS: usize = 12;

/// Team units processed concurrently within one org run.
const MAX_CONCURRENT_TEAMS: usize = 4;

/// One user's evidence for one week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserWeekEvidence {
    pub user_id: String,
    pub session_count: u32,
    /// Ingestion-ordered evidence; order is part of the reproducibility
    /// contract.
    pub evidence: Vec<Evidence>,
}

/// The complete input feed for one (org, team, week) unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamWeekInput {
    pub org_id: String,
    pub team_id: String,
    pub week_start: NaiveDate,
    /// Roster head-count, for coverage computation.
    pub roster_size: usize,
    pub users: Vec<UserWeekEvidence>,
}

/// Outcome of one team/week run.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    /// Stored hash matched; the persisted row is returned unchanged.
    Cached(WeeklyAggregateRow),
    /// Input changed (or row was absent); the row was recomputed and upserted.
    Computed(WeeklyAggregateRow),
}

impl RunOutcome {
    pub fn row(&self) -> &WeeklyAggregateRow {
        match self {
            Self::Cached(row) | Self::Computed(row) => row,
        }
    }

    pub fn was_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("work unit {0} is locked by another run")]
    UnitLocked(String),
    #[error("rollup requested for {org_id} week {week_start} but no team rows exist")]
    NoTeamRows { org_id: String, week_start: NaiveDate },
}

/// Pipeline configuration. The compute version tags every persisted row;
/// bump it when canonical semantics change so old rows recompute.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub compute_version: String,
    pub decision: DecisionConfig,
    /// Coverage below this marks the week degraded.
    pub coverage_floor: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            compute_version: "v3".to_string(),
            decision: DecisionConfig::default(),
            coverage_floor: 0.5,
        }
    }
}

/// Orchestrates weekly recomputation against the store boundary.
pub struct PipelineRunner<S> {
    store: Arc<S>,
    norms: NormProfile,
    risk: RiskAssessor,
    config: PipelineConfig,
}

impl<S> PipelineRunner<S>
where
    S: AggregateStore + LeaseStore,
{
    pub fn new(store: Arc<S>, norms: NormProfile, config: PipelineConfig) -> Self {
        Self {
            store,
            norms,
            risk: RiskAssessor::default(),
            config,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Run one team/week unit under its advisory lease.
    pub async fn run_team_week(&self, input: &TeamWeekInput) -> Result<RunOutcome, PipelineError> {
        let holder = Uuid::new_v4().to_string();
        self.store
            .acquire(&input.org_id, &input.team_id, input.week_start, &holder)
            .await
            .map_err(|e| match e {
                StoreError::LeaseHeld(unit) => PipelineError::UnitLocked(unit),
                other => PipelineError::Store(other),
            })?;

        let result = self.run_team_week_locked(input).await;

        // Release even when the computation failed; a stuck lease is an
        // operational incident, not a cleanup strategy.
        if let Err(release_err) = self
            .store
            .release(&input.org_id, &input.team_id, input.week_start)
            .await
        {
            warn!(
                org = %input.org_id,
                team = %input.team_id,
                error = %release_err,
                "failed to release pipeline lease"
            );
        }

        result
    }

    async fn run_team_week_locked(
        &self,
        input: &TeamWeekInput,
    ) -> Result<RunOutcome, PipelineError> {
        let canonical = build_canonical_input(input);
        let input_hash = canonical.input_hash();

        let existing = self
            .store
            .get_row(&input.org_id, &input.team_id, input.week_start)
            .await?;

        if let Some(row) = existing {
            if row.input_hash == input_hash && row.compute_version == self.config.compute_version {
                info!(
                    org = %input.org_id,
                    team = %input.team_id,
                    week = %input.week_start,
                    hash = %input_hash,
                    "input unchanged, skipping recomputation"
                );
                return Ok(RunOutcome::Cached(row));
            }
        }

        let row = self.compute_row(input, input_hash).await?;
        self.store.upsert_row(&row).await?;
        info!(
            org = %input.org_id,
            team = %input.team_id,
            week = %input.week_start,
            status = row.status.as_str(),
            "weekly row computed"
        );
        Ok(RunOutcome::Computed(row))
    }

    async fn compute_row(
        &self,
        input: &TeamWeekInput,
        input_hash: String,
    ) -> Result<WeeklyAggregateRow, PipelineError> {
        // Team-level fusion: users in input order, each user's evidence in
        // ingestion order.
        let mut team_stream: Vec<Evidence> = Vec::new();
        for user in &input.users {
            team_stream.extend(user.evidence.iter().cloned());
        }
        let team_measurements = fuse_evidence(&team_stream);

        let mut parameter_states: BTreeMap<Parameter, ParameterState> = BTreeMap::new();
        let encoded = encode_signals(&team_measurements, &mut parameter_states);

        let session_count: usize = input.users.iter().map(|u| u.session_count as usize).sum();
        let active_users = input.users.iter().filter(|u| !u.evidence.is_empty()).count();
        let coverage = if input.roster_size == 0 {
            0.0
        } else {
            active_users as f64 / input.roster_size as f64
        };

        // Deviations against the org norm profile, on fused construct means.
        let construct_scores: BTreeMap<Construct, f64> = team_measurements
            .iter()
            .map(|(&c, m)| (c, m.mean))
            .collect();
        let deviations = self.norms.assess(&construct_scores);

        let org_wide_anomalies = self
            .org_wide_anomaly_count(&input.org_id, &input.team_id, input.week_start, &deviations)
            .await?;

        let sigma = average_uncertainty(&encoded.uncertainty);
        let assessment = self.risk.assess(&RiskInputs {
            sigma,
            sample_size: session_count as f64,
            deviations: &deviations,
            org_wide_anomalies,
        });

        let history = self
            .store
            .team_history(
                &input.org_id,
                &input.team_id,
                input.week_start,
                SERIES_WEEKS,
            )
            .await?
            .into_iter()
            .filter(|r| r.week_start < input.week_start)
            .map(|r| HistoryPoint {
                week_start: r.week_start,
                health: r.team_state.average_health,
            })
            .collect::<Vec<_>>();

        let meta = SnapshotMeta {
            org_id: input.org_id.clone(),
            team_id: input.team_id.clone(),
            week_start: input.week_start,
            coverage,
            session_count,
        };
        let snapshot = decision::evaluate(&self.config.decision, &encoded.signals, &history, meta);

        let flags = governance_flags(&assessment, session_count, &deviations);
        let blocked = assessment.blocking || is_blocked(&flags);
        let degraded = coverage < self.config.coverage_floor
            || snapshot.state.state == decision::TeamState::Unknown;

        let status = if blocked {
            RowStatus::Blocked
        } else if degraded || !flags.is_empty() {
            RowStatus::Degraded
        } else {
            RowStatus::Ok
        };

        let mut series: Vec<SeriesPoint> = history
            .iter()
            .map(|p| SeriesPoint {
                week_start: p.week_start,
                health: p.health,
            })
            .collect();
        series.push(SeriesPoint {
            week_start: input.week_start,
            health: snapshot.state.average_health,
        });
        if series.len() > SERIES_WEEKS {
            let excess = series.len() - SERIES_WEEKS;
            series.drain(..excess);
        }

        Ok(WeeklyAggregateRow {
            org_id: input.org_id.clone(),
            team_id: input.team_id.clone(),
            week_start: input.week_start,
            compute_version: self.config.compute_version.clone(),
            input_hash,
            status,
            indices: index_values(&self.config.decision, &encoded.signals),
            attribution: snapshot.drivers.clone(),
            team_state: snapshot.state.clone(),
            series,
            quality: QualityBlock {
                session_count,
                coverage,
                degraded,
            },
            flags,
            narrative: None,
            updated_at: now_epoch(),
        })
    }

    /// Non-normal deviations across the org this week: the current team's
    /// plus one per attributed driver on already-persisted sibling rows.
    async fn org_wide_anomaly_count(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
        own: &[Deviation],
    ) -> Result<usize, PipelineError> {
        let mut count = own.iter().filter(|d| d.band.is_anomalous()).count();
        for row in self.store.rows_for_week(org_id, week_start).await? {
            // A stale row for the team being recomputed is not a sibling.
            if row.team_id != team_id {
                count += row.attribution.len();
            }
        }
        Ok(count)
    }

    /// Run the team phase for every input, then the org rollup, with an
    /// explicit barrier between the phases.
    pub async fn run_org_week(
        &self,
        org_id: &str,
        week_start: NaiveDate,
        inputs: &[TeamWeekInput],
    ) -> Result<OrgRollupRow, PipelineError> {
        debug_assert!(inputs.iter().all(|i| i.org_id == org_id));
        let results: Vec<Result<RunOutcome, PipelineError>> =
            stream::iter(inputs.iter().map(|input| self.run_team_week(input)))
                .buffer_unordered(MAX_CONCURRENT_TEAMS)
                .collect()
                .await;
        for result in results {
            result?;
        }
        // Phase barrier: every team row above is committed before rollup
        // reads a single one.
        self.rollup_org(org_id, week_start).await
    }

    /// Aggregate committed team rows into the org rollup. Pure function of
    /// persisted state; safe to call repeatedly.
    pub async fn rollup_org(
        &self,
        org_id: &str,
        week_start: NaiveDate,
    ) -> Result<OrgRollupRow, PipelineError> {
        let rows = self.store.rows_for_week(org_id, week_start).await?;
        if rows.is_empty() {
            return Err(PipelineError::NoTeamRows {
                org_id: org_id.to_string(),
                week_start,
            });
        }

        // Average each index across teams.
        let mut index_sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
        let mut distribution = RiskDistribution::default();
        let mut health_sum = 0.0;
        for row in &rows {
            for (id, value) in &row.indices {
                let entry = index_sums.entry(id.clone()).or_insert((0.0, 0));
                entry.0 += value.value;
                entry.1 += 1;
            }
            distribution.count(row.team_state.state);
            health_sum += row.team_state.average_health;
        }
        let indices: BTreeMap<String, IndexValue> = index_sums
            .into_iter()
            .map(|(id, (sum, n))| {
                let value = sum / n as f64;
                let health = HealthIndex::from_id(&id)
                    .map(|idx| idx.health_score(value))
                    .unwrap_or(value);
                (
                    id,
                    IndexValue {
                        value,
                        qualitative: qualitative_band(&self.config.decision, health).to_string(),
                    },
                )
            })
            .collect();

        let systemic_drivers = systemic_drivers(&rows);

        let mut series: Vec<SeriesPoint> = self
            .store
            .rollup_history(org_id, week_start, SERIES_WEEKS)
            .await?
            .into_iter()
            .filter(|r| r.week_start < week_start)
            .filter_map(|r| r.series.last().copied())
            .collect();
        series.push(SeriesPoint {
            week_start,
            health: health_sum / rows.len() as f64,
        });
        if series.len() > SERIES_WEEKS {
            let excess = series.len() - SERIES_WEEKS;
            series.drain(..excess);
        }

        let rollup = OrgRollupRow {
            org_id: org_id.to_string(),
            week_start,
            indices,
            systemic_drivers,
            series,
            risk_distribution: distribution,
            updated_at: now_epoch(),
        };
        self.store.upsert_rollup(&rollup).await?;
        info!(org = %org_id, week = %week_start, teams = rows.len(), "org rollup written");
        Ok(rollup)
    }
}

/// Build the canonical input from the raw feed: users sorted, parameter
/// keys sorted, stats derived from each user's own fused encoding.
pub fn build_canonical_input(input: &TeamWeekInput) -> CanonicalInputData {
    let mut users: BTreeMap<String, UserWeekInput> = BTreeMap::new();
    for user in &input.users {
        let measurements = fuse_evidence(&user.evidence);
        let mut states: BTreeMap<Parameter, ParameterState> = BTreeMap::new();
        let encoded = encode_signals(&measurements, &mut states);

        let parameters: BTreeMap<String, ParameterStat> = encoded
            .signals
            .iter()
            .map(|(&p, &mean)| {
                let sigma = encoded.uncertainty.get(&p).copied().unwrap_or(1.0);
                (
                    p.id().to_string(),
                    ParameterStat {
                        mean,
                        variance: sigma * sigma,
                    },
                )
            })
            .collect();

        users.insert(
            user.user_id.clone(),
            UserWeekInput {
                parameters,
                session_count: user.session_count,
            },
        );
    }

    CanonicalInputData {
        org_id: input.org_id.clone(),
        team_id: input.team_id.clone(),
        week_start_iso: input.week_start.format("%Y-%m-%d").to_string(),
        users,
    }
}

/// Raw index values with qualitative bands for the persisted row.
fn index_values(
    config: &DecisionConfig,
    signals: &BTreeMap<Parameter, f64>,
) -> BTreeMap<String, IndexValue> {
    decision::compute_indices(signals)
        .into_iter()
        .map(|(idx, value)| {
            (
                idx.id().to_string(),
                IndexValue {
                    value,
                    qualitative: qualitative_band(config, idx.health_score(value)).to_string(),
                },
            )
        })
        .collect()
}

fn qualitative_band(config: &DecisionConfig, health: f64) -> &'static str {
    if health < config.critical_threshold {
        "critical"
    } else if health < config.at_risk_threshold {
        "at_risk"
    } else {
        "healthy"
    }
}

/// Mean reported uncertainty across parameters; prior sigma when nothing
/// was measured.
fn average_uncertainty(uncertainty: &BTreeMap<Parameter, f64>) -> f64 {
    if uncertainty.is_empty() {
        return crate::evidence::PRIOR_SIGMA;
    }
    uncertainty.values().sum::<f64>() / uncertainty.len() as f64
}

/// Driver families recurring across more than one team, ranked by aggregate
/// impact. A family seen by a single team is team-local, not systemic.
fn systemic_drivers(rows: &[WeeklyAggregateRow]) -> Vec<SystemicDriver> {
    let mut families: BTreeMap<&'static str, (BTreeSet<&str>, f64)> = BTreeMap::new();
    for row in rows {
        for driver in &row.attribution {
            let family = InterventionTemplate::for_parameter(driver.parameter)
                .map(|t| t.as_str())
                .unwrap_or("other");
            let entry = families
                .entry(family)
                .or_insert_with(|| (BTreeSet::new(), 0.0));
            entry.0.insert(row.team_id.as_str());
            entry.1 += driver.deviation;
        }
    }

    let mut systemic: Vec<SystemicDriver> = families
        .into_iter()
        .filter(|(_, (teams, _))| teams.len() > 1)
        .map(|(family, (teams, impact))| SystemicDriver {
            family: family.to_string(),
            team_count: teams.len(),
            aggregate_impact: impact,
        })
        .collect();
    systemic.sort_by(|a, b| {
        b.aggregate_impact
            .partial_cmp(&a.aggregate_impact)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    systemic.truncate(5);
    systemic
}

fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Narrative attachment: verify grounding, then persist onto the row unless
/// a governance flag blocks publication.
pub async fn attach_narrative<S: AggregateStore>(
    store: &S,
    row: &WeeklyAggregateRow,
    canonical: &CanonicalInputData,
    narrative: &str,
    claims: &[crate::grounding::GroundingEntry],
) -> Result<WeeklyAggregateRow, PipelineError> {
    // Hard gate: one bad path rejects the whole narrative.
    if let Err(err) = crate::grounding::assert_grounding_map(claims, &canonical.as_value()) {
        warn!(
            org = %row.org_id,
            team = %row.team_id,
            error = %err,
            "narrative rejected by grounding verifier"
        );
        let mut degraded = row.clone();
        if degraded.status == RowStatus::Ok {
            degraded.status = RowStatus::Degraded;
        }
        degraded.quality.degraded = true;
        degraded.narrative = None;
        degraded.updated_at = now_epoch();
        store.upsert_row(&degraded).await?;
        return Ok(degraded);
    }

    let mut updated = row.clone();
    if updated.status == RowStatus::Blocked {
        // Blocked weeks persist the row for audit but never a narrative.
        updated.narrative = None;
    } else {
        info!(
            org = %row.org_id,
            team = %row.team_id,
            narrative_hash = %crate::canonical::content_hash(narrative),
            claims = claims.len(),
            "narrative grounded and attached"
        );
        updated.narrative = Some(narrative.to_string());
    }
    updated.updated_at = now_epoch();
    store.upsert_row(&updated).await?;
    Ok(updated)
}
