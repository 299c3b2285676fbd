//! Persistence boundary: weekly aggregate rows, org rollups, and leases.
//!
//! The relational engine is deliberately abstract: the pipeline only sees
//! async traits over rows keyed by (org, team, week). The bundled
//! implementation is SQLite behind `spawn_blocking`, with complex fields
//! stored as JSON text columns. A per-(org, team, week) advisory lease
//! lives in its own table with a queryable age so stuck runs can be
//! detected externally.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use chrono::NaiveDate;
use fs2::FileExt;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::decision::{Driver, StateAssessment, TeamState};
use crate::risk::GovernanceFlag;

/// Publication status of a weekly row. Presentation layers must be able to
/// tell a degraded or blocked week from a healthy one at the data level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Ok,
    Degraded,
    Blocked,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Degraded => "degraded",
            Self::Blocked => "blocked",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ok" => Self::Ok,
            "blocked" => Self::Blocked,
            _ => Self::Degraded,
        }
    }
}

/// One index value with its qualitative band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexValue {
    pub value: f64,
    pub qualitative: String,
}

/// Data-quality block persisted with every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityBlock {
    pub session_count: usize,
    pub coverage: f64,
    pub degraded: bool,
}

/// One point of the rolling series snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub week_start: NaiveDate,
    pub health: f64,
}

/// Persisted weekly output for one (org, team, week).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeeklyAggregateRow {
    pub org_id: String,
    pub team_id: String,
    pub week_start: NaiveDate,
    pub compute_version: String,
    pub input_hash: String,
    pub status: RowStatus,
    pub indices: BTreeMap<String, IndexValue>,
    pub attribution: Vec<Driver>,
    pub team_state: StateAssessment,
    pub series: Vec<SeriesPoint>,
    pub quality: QualityBlock,
    pub flags: Vec<GovernanceFlag>,
    /// Verified narrative, present only when grounding passed and no flag
    /// blocks publication.
    pub narrative: Option<String>,
    pub updated_at: i64,
}

/// One systemic driver in the org rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemicDriver {
    /// Driver family (intervention template id).
    pub family: String,
    pub team_count: usize,
    pub aggregate_impact: f64,
}

/// Distribution of team states for one org/week.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskDistribution {
    pub healthy: usize,
    pub at_risk: usize,
    pub critical: usize,
    pub unknown: usize,
}

impl RiskDistribution {
    pub fn count(&mut self, state: TeamState) {
        match state {
            TeamState::Healthy => self.healthy += 1,
            TeamState::AtRisk => self.at_risk += 1,
            TeamState::Critical => self.critical += 1,
            TeamState::Unknown => self.unknown += 1,
        }
    }
}

/// Persisted org-level rollup for one week.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRollupRow {
    pub org_id: String,
    pub week_start: NaiveDate,
    pub indices: BTreeMap<String, IndexValue>,
    pub systemic_drivers: Vec<SystemicDriver>,
    pub series: Vec<SeriesPoint>,
    pub risk_distribution: RiskDistribution,
    pub updated_at: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("task join error: {0}")]
    Join(String),
    #[error("row serialization error: {0}")]
    Serde(String),
    #[error("lease for {0} already held")]
    LeaseHeld(String),
}

/// Row access used by the pipeline runner and read-only consumers.
#[async_trait]
pub trait AggregateStore: Send + Sync {
    async fn get_row(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyAggregateRow>, StoreError>;

    async fn upsert_row(&self, row: &WeeklyAggregateRow) -> Result<(), StoreError>;

    /// All team rows for one (org, week), ordered by team id.
    async fn rows_for_week(
        &self,
        org_id: &str,
        week_start: NaiveDate,
    ) -> Result<Vec<WeeklyAggregateRow>, StoreError>;

    /// Rows for one team up to and including `until`, newest last, at most
    /// `limit` entries.
    async fn team_history(
        &self,
        org_id: &str,
        team_id: &str,
        until: NaiveDate,
        limit: usize,
    ) -> Result<Vec<WeeklyAggregateRow>, StoreError>;

    async fn upsert_rollup(&self, row: &OrgRollupRow) -> Result<(), StoreError>;

    async fn get_rollup(
        &self,
        org_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<OrgRollupRow>, StoreError>;

    /// Rollups for one org up to and including `until`, newest last.
    async fn rollup_history(
        &self,
        org_id: &str,
        until: NaiveDate,
        limit: usize,
    ) -> Result<Vec<OrgRollupRow>, StoreError>;
}

/// Advisory lease per (org, team, week) work unit.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Acquire the lease; `Err(LeaseHeld)` when another holder is active.
    async fn acquire(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
        holder: &str,
    ) -> Result<(), StoreError>;

    async fn release(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
    ) -> Result<(), StoreError>;

    /// Seconds since acquisition for every live lease, for stuck-lock
    /// detection.
    async fn lease_ages(&self) -> Result<Vec<(String, i64)>, StoreError>;
}

// =============================================================================
// SQLite implementation
// =============================================================================

#[derive(Clone)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(&path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA synchronous=NORMAL;\
             CREATE TABLE IF NOT EXISTS weekly_rows (\
               org_id TEXT NOT NULL,\
               team_id TEXT NOT NULL,\
               week_start TEXT NOT NULL,\
               compute_version TEXT NOT NULL,\
               input_hash TEXT NOT NULL,\
               status TEXT NOT NULL,\
               indices TEXT NOT NULL,\
               attribution TEXT NOT NULL,\
               team_state TEXT NOT NULL,\
               series TEXT NOT NULL,\
               quality TEXT NOT NULL,\
               flags TEXT NOT NULL,\
               narrative TEXT,\
               updated_at INTEGER NOT NULL,\
               PRIMARY KEY (org_id, team_id, week_start)\
             );\
             CREATE TABLE IF NOT EXISTS org_rollups (\
               org_id TEXT NOT NULL,\
               week_start TEXT NOT NULL,\
               indices TEXT NOT NULL,\
               systemic_drivers TEXT NOT NULL,\
               series TEXT NOT NULL,\
               risk_distribution TEXT NOT NULL,\
               updated_at INTEGER NOT NULL,\
               PRIMARY KEY (org_id, week_start)\
             );\
             CREATE TABLE IF NOT EXISTS leases (\
               unit TEXT PRIMARY KEY,\
               holder TEXT NOT NULL,\
               acquired_at INTEGER NOT NULL\
             );",
        )?;
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Process-level exclusive lock on the store file, for batch jobs that
    /// must not run twice on one machine.
    pub fn lock_exclusive(&self) -> Result<StoreLock, StoreError> {
        StoreLock::new(&self.path)
    }

    fn with_conn<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&Connection) -> Result<R, StoreError>,
    {
        let guard = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        f(&guard)
    }

    async fn blocking<F, R>(&self, f: F) -> Result<R, StoreError>
    where
        F: FnOnce(&SqliteStore) -> Result<R, StoreError> + Send + 'static,
        R: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(&store))
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

fn to_json<T: Serialize>(value: &T) -> Result<String, StoreError> {
    serde_json::to_string(value).map_err(|e| StoreError::Serde(e.to_string()))
}

fn from_json<T: for<'de> Deserialize<'de>>(text: &str) -> Result<T, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Serde(e.to_string()))
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

fn week_key(week_start: NaiveDate) -> String {
    week_start.format("%Y-%m-%d").to_string()
}

fn parse_week(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| StoreError::Serde(format!("bad week key {s:?}: {e}")))
}

fn row_from_sql(row: &rusqlite::Row<'_>) -> Result<WeeklyAggregateRow, StoreError> {
    Ok(WeeklyAggregateRow {
        org_id: row.get(0)?,
        team_id: row.get(1)?,
        week_start: parse_week(&row.get::<_, String>(2)?)?,
        compute_version: row.get(3)?,
        input_hash: row.get(4)?,
        status: RowStatus::from_str(&row.get::<_, String>(5)?),
        indices: from_json(&row.get::<_, String>(6)?)?,
        attribution: from_json(&row.get::<_, String>(7)?)?,
        team_state: from_json(&row.get::<_, String>(8)?)?,
        series: from_json(&row.get::<_, String>(9)?)?,
        quality: from_json(&row.get::<_, String>(10)?)?,
        flags: from_json(&row.get::<_, String>(11)?)?,
        narrative: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

const ROW_COLUMNS: &str = "org_id, team_id, week_start, compute_version, input_hash, status, \
                           indices, attribution, team_state, series, quality, flags, narrative, \
                           updated_at";

#[async_trait]
impl AggregateStore for SqliteStore {
    async fn get_row(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<WeeklyAggregateRow>, StoreError> {
        let (org_id, team_id, week) = (org_id.to_string(), team_id.to_string(), week_key(week_start));
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ROW_COLUMNS} FROM weekly_rows \
                     WHERE org_id = ?1 AND team_id = ?2 AND week_start = ?3"
                ))?;
                let mut rows = stmt.query(params![org_id, team_id, week])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_from_sql(row)?)),
                    None => Ok(None),
                }
            })
        })
        .await
    }

    async fn upsert_row(&self, row: &WeeklyAggregateRow) -> Result<(), StoreError> {
        let row = row.clone();
        self.blocking(move |store| {
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO weekly_rows ( \
                        org_id, team_id, week_start, compute_version, input_hash, status, \
                        indices, attribution, team_state, series, quality, flags, narrative, \
                        updated_at \
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14) \
                     ON CONFLICT(org_id, team_id, week_start) DO UPDATE SET \
                        compute_version = excluded.compute_version, \
                        input_hash = excluded.input_hash, \
                        status = excluded.status, \
                        indices = excluded.indices, \
                        attribution = excluded.attribution, \
                        team_state = excluded.team_state, \
                        series = excluded.series, \
                        quality = excluded.quality, \
                        flags = excluded.flags, \
                        narrative = excluded.narrative, \
                        updated_at = excluded.updated_at",
                    params![
                        row.org_id,
                        row.team_id,
                        week_key(row.week_start),
                        row.compute_version,
                        row.input_hash,
                        row.status.as_str(),
                        to_json(&row.indices)?,
                        to_json(&row.attribution)?,
                        to_json(&row.team_state)?,
                        to_json(&row.series)?,
                        to_json(&row.quality)?,
                        to_json(&row.flags)?,
                        row.narrative,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
        })
        .await
    }

    async fn rows_for_week(
        &self,
        org_id: &str,
        week_start: NaiveDate,
    ) -> Result<Vec<WeeklyAggregateRow>, StoreError> {
        let (org_id, week) = (org_id.to_string(), week_key(week_start));
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ROW_COLUMNS} FROM weekly_rows \
                     WHERE org_id = ?1 AND week_start = ?2 ORDER BY team_id"
                ))?;
                let mut rows = stmt.query(params![org_id, week])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_from_sql(row)?);
                }
                Ok(out)
            })
        })
        .await
    }

    async fn team_history(
        &self,
        org_id: &str,
        team_id: &str,
        until: NaiveDate,
        limit: usize,
    ) -> Result<Vec<WeeklyAggregateRow>, StoreError> {
        let (org_id, team_id, until) = (org_id.to_string(), team_id.to_string(), week_key(until));
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {ROW_COLUMNS} FROM weekly_rows \
                     WHERE org_id = ?1 AND team_id = ?2 AND week_start <= ?3 \
                     ORDER BY week_start DESC LIMIT ?4"
                ))?;
                let mut rows = stmt.query(params![org_id, team_id, until, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_from_sql(row)?);
                }
                out.reverse(); // newest last
                Ok(out)
            })
        })
        .await
    }

    async fn upsert_rollup(&self, row: &OrgRollupRow) -> Result<(), StoreError> {
        let row = row.clone();
        self.blocking(move |store| {
            store.with_conn(|conn| {
                conn.execute(
                    "INSERT INTO org_rollups ( \
                        org_id, week_start, indices, systemic_drivers, series, \
                        risk_distribution, updated_at \
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
                     ON CONFLICT(org_id, week_start) DO UPDATE SET \
                        indices = excluded.indices, \
                        systemic_drivers = excluded.systemic_drivers, \
                        series = excluded.series, \
                        risk_distribution = excluded.risk_distribution, \
                        updated_at = excluded.updated_at",
                    params![
                        row.org_id,
                        week_key(row.week_start),
                        to_json(&row.indices)?,
                        to_json(&row.systemic_drivers)?,
                        to_json(&row.series)?,
                        to_json(&row.risk_distribution)?,
                        row.updated_at,
                    ],
                )?;
                Ok(())
            })
        })
        .await
    }

    async fn get_rollup(
        &self,
        org_id: &str,
        week_start: NaiveDate,
    ) -> Result<Option<OrgRollupRow>, StoreError> {
        let (org_id, week) = (org_id.to_string(), week_key(week_start));
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT org_id, week_start, indices, systemic_drivers, series, \
                            risk_distribution, updated_at \
                     FROM org_rollups WHERE org_id = ?1 AND week_start = ?2",
                )?;
                let mut rows = stmt.query(params![org_id, week])?;
                match rows.next()? {
                    Some(row) => Ok(Some(rollup_from_sql(row)?)),
                    None => Ok(None),
                }
            })
        })
        .await
    }

    async fn rollup_history(
        &self,
        org_id: &str,
        until: NaiveDate,
        limit: usize,
    ) -> Result<Vec<OrgRollupRow>, StoreError> {
        let (org_id, until) = (org_id.to_string(), week_key(until));
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT org_id, week_start, indices, systemic_drivers, series, \
                            risk_distribution, updated_at \
                     FROM org_rollups WHERE org_id = ?1 AND week_start <= ?2 \
                     ORDER BY week_start DESC LIMIT ?3",
                )?;
                let mut rows = stmt.query(params![org_id, until, limit as i64])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(rollup_from_sql(row)?);
                }
                out.reverse();
                Ok(out)
            })
        })
        .await
    }
}

fn rollup_from_sql(row: &rusqlite::Row<'_>) -> Result<OrgRollupRow, StoreError> {
    Ok(OrgRollupRow {
        org_id: row.get(0)?,
        week_start: parse_week(&row.get::<_, String>(1)?)?,
        indices: from_json(&row.get::<_, String>(2)?)?,
        systemic_drivers: from_json(&row.get::<_, String>(3)?)?,
        series: from_json(&row.get::<_, String>(4)?)?,
        risk_distribution: from_json(&row.get::<_, String>(5)?)?,
        updated_at: row.get(6)?,
    })
}

fn lease_unit(org_id: &str, team_id: &str, week_start: NaiveDate) -> String {
    format!("{org_id}/{team_id}/{}", week_key(week_start))
}

#[async_trait]
impl LeaseStore for SqliteStore {
    async fn acquire(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
        holder: &str,
    ) -> Result<(), StoreError> {
        let unit = lease_unit(org_id, team_id, week_start);
        let holder = holder.to_string();
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let inserted = conn.execute(
                    "INSERT OR IGNORE INTO leases (unit, holder, acquired_at) VALUES (?1, ?2, ?3)",
                    params![unit, holder, now_epoch()],
                )?;
                if inserted == 0 {
                    return Err(StoreError::LeaseHeld(unit.clone()));
                }
                Ok(())
            })
        })
        .await
    }

    async fn release(
        &self,
        org_id: &str,
        team_id: &str,
        week_start: NaiveDate,
    ) -> Result<(), StoreError> {
        let unit = lease_unit(org_id, team_id, week_start);
        self.blocking(move |store| {
            store.with_conn(|conn| {
                conn.execute("DELETE FROM leases WHERE unit = ?1", params![unit])?;
                Ok(())
            })
        })
        .await
    }

    async fn lease_ages(&self) -> Result<Vec<(String, i64)>, StoreError> {
        self.blocking(move |store| {
            store.with_conn(|conn| {
                let mut stmt = conn.prepare("SELECT unit, acquired_at FROM leases")?;
                let now = now_epoch();
                let mut rows = stmt.query([])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let unit: String = row.get(0)?;
                    let acquired: i64 = row.get(1)?;
                    out.push((unit, (now - acquired).max(0)));
                }
                Ok(out)
            })
        })
        .await
    }
}

/// Exclusive advisory file lock next to the store.
#[derive(Debug)]
pub struct StoreLock {
    _file: std::fs::File,
}

impl StoreLock {
    fn new(db_path: &Path) -> Result<Self, StoreError> {
        let mut lock_path = db_path.to_path_buf();
        lock_path.set_extension("lock");
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(lock_path)?;
        file.lock_exclusive()?;
        Ok(Self { _file: file })
    }
}
