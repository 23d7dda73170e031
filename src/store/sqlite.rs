//! `SQLite`-backed ranking store.
//!
//! One table, `feature_subsets`, keyed by the canonical feature-set key. The
//! schema evolves additively: [`SqliteRankingStore::ensure_schema`] adds any
//! column a newer version expects and an older database lacks, and never
//! drops or rewrites existing data.

use std::path::Path;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use rustc_hash::FxHashSet;
use tracing::{debug, info};

use super::{
    check_score, decide_merge, FeatureSetKey, FeatureSubsetRecord, MergeOutcome, RankingStore,
};
use crate::hyperparams::HyperParameters;
use crate::model::ModelArtifact;
use crate::{Error, Result};

/// Table holding one row per feature subset.
pub const TABLE: &str = "feature_subsets";

const KEY_COLUMN: &str = "feature_set_key";

/// Every non-key column and the declaration used to add it to an older table.
const COLUMNS: &[(&str, &str)] = &[
    ("composite_score", "REAL"),
    ("num_grid_searches_performed", "INTEGER NOT NULL DEFAULT 0"),
    ("hyperparameters", "TEXT"),
    ("model_artifact", "BLOB"),
    ("tier", "INTEGER NOT NULL DEFAULT 0"),
    ("last_updated", "TEXT"),
];

const SELECT_COLUMNS: &str = "feature_set_key, composite_score, num_grid_searches_performed, \
     hyperparameters, model_artifact, tier, last_updated";

/// Durable ranking store on a single `SQLite` database file.
///
/// WAL mode is enabled for file-backed databases so that readers (reports,
/// ad-hoc queries) do not block the orchestrator's writes.
///
/// # Example
///
/// ```no_run
/// use subset_ensemble::store::{RankingStore, SqliteRankingStore};
///
/// let store = SqliteRankingStore::open("rankings.db")?;
/// println!("{} subsets ranked", store.len()?);
/// # Ok::<(), subset_ensemble::Error>(())
/// ```
pub struct SqliteRankingStore {
    conn: Mutex<Connection>,
}

impl SqliteRankingStore {
    /// Open (or create) the database at `path` and migrate its schema.
    ///
    /// # Errors
    ///
    /// Returns error if the database cannot be opened or migrated.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open(path)?;
        // WAL mode: concurrent readers, single writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        info!(path = %path.display(), "opened ranking store");
        Self::from_connection(conn)
    }

    /// In-memory database, for tests and dry runs.
    ///
    /// # Errors
    ///
    /// Returns error if `SQLite` cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    /// Column names currently present in the table.
    ///
    /// # Errors
    ///
    /// Returns error if the schema cannot be read.
    pub fn columns(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        table_columns(&conn)
    }
}

fn table_columns(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({TABLE})"))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Raw column values of one row, before JSON and timestamp decoding.
struct RawRow {
    key: String,
    composite_score: Option<f64>,
    num_grid_searches_performed: i64,
    hyperparameters: Option<String>,
    model_artifact: Option<Vec<u8>>,
    tier: i64,
    last_updated: Option<String>,
}

impl RawRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            composite_score: row.get(1)?,
            num_grid_searches_performed: row.get(2)?,
            hyperparameters: row.get(3)?,
            model_artifact: row.get(4)?,
            tier: row.get(5)?,
            last_updated: row.get(6)?,
        })
    }

    fn decode(self) -> Result<FeatureSubsetRecord> {
        let key = FeatureSetKey::parse(&self.key)?;
        let searches = u64::try_from(self.num_grid_searches_performed).map_err(|_| {
            Error::Storage(format!(
                "negative search counter {} for `{key}`",
                self.num_grid_searches_performed
            ))
        })?;

        let mut builder = FeatureSubsetRecord::builder(key)
            .num_grid_searches_performed(searches)
            .tier(self.tier);
        if let Some(score) = self.composite_score {
            builder = builder.composite_score(score);
        }
        if let Some(json) = self.hyperparameters {
            builder = builder.hyperparameters(serde_json::from_str::<HyperParameters>(&json)?);
        }
        if let Some(bytes) = self.model_artifact {
            builder = builder.model_artifact(ModelArtifact::from_bytes(bytes));
        }
        if let Some(ts) = self.last_updated {
            let at = DateTime::parse_from_rfc3339(&ts)
                .map_err(|e| Error::Storage(format!("bad timestamp `{ts}`: {e}")))?
                .with_timezone(&Utc);
            builder = builder.last_updated(at);
        }
        Ok(builder.build())
    }
}

impl RankingStore for SqliteRankingStore {
    fn ensure_schema(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let column_defs: Vec<String> = COLUMNS
            .iter()
            .map(|(name, decl)| format!("{name} {decl}"))
            .collect();
        tx.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {TABLE} (
                {KEY_COLUMN} TEXT PRIMARY KEY NOT NULL,
                {}
            );",
            column_defs.join(",\n                ")
        ))?;

        let present: FxHashSet<String> = table_columns(&tx)?.into_iter().collect();
        if !present.contains(KEY_COLUMN) {
            return Err(Error::Storage(format!(
                "table `{TABLE}` exists without `{KEY_COLUMN}` and cannot be migrated"
            )));
        }
        for (name, decl) in COLUMNS {
            if !present.contains(*name) {
                tx.execute_batch(&format!("ALTER TABLE {TABLE} ADD COLUMN {name} {decl};"))?;
                info!(column = name, "added missing ranking store column");
            }
        }
        tx.execute_batch(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{TABLE}_score ON {TABLE} (composite_score DESC);"
        ))?;

        tx.commit()?;
        Ok(())
    }

    fn upsert_score(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
    ) -> Result<()> {
        check_score(score)?;
        let hp = serde_json::to_string(hyperparameters)?;
        let conn = self.conn.lock();
        conn.execute(
            &format!(
                "INSERT INTO {TABLE} ({KEY_COLUMN}, composite_score, hyperparameters, last_updated)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT({KEY_COLUMN}) DO UPDATE SET
                     composite_score = excluded.composite_score,
                     hyperparameters = excluded.hyperparameters,
                     last_updated = excluded.last_updated"
            ),
            params![key.as_str(), score, hp, Utc::now().to_rfc3339()],
        )?;
        debug!(key = %key, score, "provisional score written");
        Ok(())
    }

    fn merge_or_keep(
        &self,
        key: &FeatureSetKey,
        score: f64,
        hyperparameters: &HyperParameters,
        artifact: &ModelArtifact,
    ) -> Result<MergeOutcome> {
        check_score(score)?;
        let hp = serde_json::to_string(hyperparameters)?;
        let now = Utc::now().to_rfc3339();

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let existing: Option<(Option<f64>, bool)> = tx
            .query_row(
                &format!(
                    "SELECT composite_score, model_artifact IS NOT NULL
                     FROM {TABLE} WHERE {KEY_COLUMN} = ?1"
                ),
                params![key.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let outcome = decide_merge(existing, score);
        match outcome {
            MergeOutcome::Inserted => {
                tx.execute(
                    &format!(
                        "INSERT INTO {TABLE} ({KEY_COLUMN}, composite_score,
                             num_grid_searches_performed, hyperparameters, model_artifact,
                             last_updated)
                         VALUES (?1, ?2, 1, ?3, ?4, ?5)"
                    ),
                    params![key.as_str(), score, hp, artifact.as_bytes(), now],
                )?;
            }
            MergeOutcome::Replaced => {
                tx.execute(
                    &format!(
                        "UPDATE {TABLE} SET
                             composite_score = ?2,
                             hyperparameters = ?3,
                             model_artifact = ?4,
                             num_grid_searches_performed = num_grid_searches_performed + 1,
                             last_updated = ?5
                         WHERE {KEY_COLUMN} = ?1"
                    ),
                    params![key.as_str(), score, hp, artifact.as_bytes(), now],
                )?;
            }
            MergeOutcome::Kept => {
                tx.execute(
                    &format!(
                        "UPDATE {TABLE} SET
                             num_grid_searches_performed = num_grid_searches_performed + 1,
                             last_updated = ?2
                         WHERE {KEY_COLUMN} = ?1"
                    ),
                    params![key.as_str(), now],
                )?;
            }
        }

        tx.commit()?;
        debug!(key = %key, score, ?outcome, "merge committed");
        Ok(outcome)
    }

    fn top_k(&self, k: usize) -> Result<Vec<FeatureSubsetRecord>> {
        if k == 0 {
            return Err(Error::InvalidInput("k must be greater than 0".to_string()));
        }
        let limit = i64::try_from(k).unwrap_or(i64::MAX);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM {TABLE}
             WHERE composite_score IS NOT NULL
             ORDER BY composite_score DESC, {KEY_COLUMN} ASC
             LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], RawRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(RawRow::decode).collect()
    }

    fn get(&self, key: &FeatureSetKey) -> Result<Option<FeatureSubsetRecord>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM {TABLE} WHERE {KEY_COLUMN} = ?1"),
                params![key.as_str()],
                RawRow::from_row,
            )
            .optional()?;
        raw.map(RawRow::decode).transpose()
    }

    fn len(&self) -> Result<usize> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {TABLE}"), [], |row| row.get(0))?;
        usize::try_from(n).map_err(|_| Error::Storage(format!("invalid row count {n}")))
    }
}
