//! Metadata store trait and the SQLite implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::query::expr::ParsedQuery;
use crate::query::select::{Bind, Dialect, Fragment, Select};
use crate::repos::{
    AlignRequest, DashboardRepo, ExperimentRepo, ImportRepo, MetricRepo, ParamRepo, RunRepo,
    RunUpdate, SearchRepo, TagRepo,
};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// SQLite schema (embedded).
const SQLITE_SCHEMA: &str = include_str!("sqlite_schema.sql");

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    ExperimentRepo
    + RunRepo
    + ParamRepo
    + MetricRepo
    + TagRepo
    + SearchRepo
    + DashboardRepo
    + ImportRepo
    + Send
    + Sync
{
    /// Create the schema if it does not exist.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;

    /// The SQL dialect this store executes.
    fn dialect(&self) -> Dialect;
}

/// Split an embedded schema into individual statements.
pub(crate) fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            if trimmed.is_empty() {
                return None;
            }
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

/// Batch size for IN-list child fetches, kept under SQLite's parameter cap.
pub(crate) const IN_BATCH_SIZE: usize = 900;

/// Attempts for inserts racing on the row_num unique index.
const ROW_NUM_RETRIES: u32 = 5;

/// SQLite-based metadata store.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(
        path: impl AsRef<Path>,
        busy_timeout_secs: Option<u64>,
    ) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| MetadataError::Config(format!("cannot create database dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(busy_timeout_secs.unwrap_or(5)));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection avoids
            // persistent "database is locked" failures under concurrent handlers.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in schema_statements(SQLITE_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }
}

/// Bind compiled query values onto a typed query.
fn bind_rows<'q, O>(
    query: sqlx::query::QueryAs<'q, Sqlite, O, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &[Bind],
) -> sqlx::query::QueryAs<'q, Sqlite, O, sqlx::sqlite::SqliteArguments<'q>> {
    let mut query = query;
    for bind in binds {
        query = match bind {
            Bind::Int(v) => query.bind(*v),
            Bind::Float(v) => query.bind(*v),
            Bind::Str(v) => query.bind(v.clone()),
            Bind::Bool(v) => query.bind(*v),
        };
    }
    query
}

/// Rows are parked this far above the live range while renumbering, so the
/// unique index on row_num never sees a transient collision.
pub(crate) const ROW_NUM_PARK_OFFSET: i64 = 1 << 40;

/// Renumber rows at or above `start_with` so row numbers are contiguous
/// again. Runs within the caller's transaction; a no-op when nothing is at
/// or above the watermark.
async fn renumber_rows(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    start_with: i64,
) -> MetadataResult<()> {
    if start_with < 0 {
        return Err(MetadataError::Internal(
            "attempting to renumber with less than 0 row number value".to_string(),
        ));
    }
    sqlx::query("UPDATE runs SET row_num = row_num + ? WHERE row_num >= ?")
        .bind(ROW_NUM_PARK_OFFSET)
        .bind(start_with)
        .execute(&mut **tx)
        .await?;
    sqlx::query(
        "UPDATE runs SET row_num = renumbered.new_row_num \
         FROM (SELECT run_uuid, ROW_NUMBER() OVER (ORDER BY row_num) + ? - 1 AS new_row_num \
               FROM runs WHERE row_num >= ?) AS renumbered \
         WHERE runs.run_uuid = renumbered.run_uuid",
    )
    .bind(start_with)
    .bind(ROW_NUM_PARK_OFFSET)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

mod sqlite_impl {
    use super::*;
    use uuid::Uuid;

    #[async_trait]
    impl ExperimentRepo for SqliteStore {
        async fn create_experiment(&self, experiment: &ExperimentRow) -> MetadataResult<i32> {
            if self
                .get_experiment_by_name(&experiment.name)
                .await?
                .is_some()
            {
                return Err(MetadataError::AlreadyExists(format!(
                    "experiment '{}' already exists",
                    experiment.name
                )));
            }

            let id: i32 = sqlx::query_scalar(
                "INSERT INTO experiments (name, artifact_location, lifecycle_stage, \
                 creation_time, last_update_time) VALUES (?, ?, ?, ?, ?) RETURNING experiment_id",
            )
            .bind(&experiment.name)
            .bind(&experiment.artifact_location)
            .bind(experiment.lifecycle_stage)
            .bind(experiment.creation_time)
            .bind(experiment.last_update_time)
            .fetch_one(&self.pool)
            .await?;
            Ok(id)
        }

        async fn get_experiment(
            &self,
            experiment_id: i32,
        ) -> MetadataResult<Option<ExperimentRow>> {
            let row = sqlx::query_as::<_, ExperimentRow>(
                "SELECT * FROM experiments WHERE experiment_id = ?",
            )
            .bind(experiment_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn get_experiment_by_name(&self, name: &str) -> MetadataResult<Option<ExperimentRow>> {
            let row =
                sqlx::query_as::<_, ExperimentRow>("SELECT * FROM experiments WHERE name = ?")
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn first_or_create_experiment(
            &self,
            experiment: &ExperimentRow,
        ) -> MetadataResult<ExperimentRow> {
            sqlx::query(
                "INSERT INTO experiments (name, artifact_location, lifecycle_stage, \
                 creation_time, last_update_time) VALUES (?, ?, ?, ?, ?) \
                 ON CONFLICT (name) DO NOTHING",
            )
            .bind(&experiment.name)
            .bind(&experiment.artifact_location)
            .bind(experiment.lifecycle_stage)
            .bind(experiment.creation_time)
            .bind(experiment.last_update_time)
            .execute(&self.pool)
            .await?;

            self.get_experiment_by_name(&experiment.name)
                .await?
                .ok_or_else(|| {
                    MetadataError::Internal(format!(
                        "experiment '{}' missing after first-or-create",
                        experiment.name
                    ))
                })
        }

        async fn list_experiments(
            &self,
            stage: LifecycleStage,
        ) -> MetadataResult<Vec<ExperimentSummary>> {
            let rows = sqlx::query_as::<_, ExperimentSummary>(
                "SELECT experiments.experiment_id, experiments.name, \
                 experiments.lifecycle_stage, experiments.creation_time, \
                 COUNT(runs.run_uuid) AS run_count \
                 FROM experiments \
                 LEFT JOIN runs ON experiments.experiment_id = runs.experiment_id \
                 WHERE experiments.lifecycle_stage = ? \
                 GROUP BY experiments.experiment_id, experiments.name, \
                 experiments.lifecycle_stage, experiments.creation_time \
                 ORDER BY experiments.experiment_id",
            )
            .bind(stage)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_experiment(&self, experiment: &ExperimentRow) -> MetadataResult<()> {
            let mut tx = self.pool.begin().await?;

            let result = sqlx::query(
                "UPDATE experiments SET name = ?, lifecycle_stage = ?, last_update_time = ? \
                 WHERE experiment_id = ?",
            )
            .bind(&experiment.name)
            .bind(experiment.lifecycle_stage)
            .bind(experiment.last_update_time)
            .bind(experiment.experiment_id)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "experiment '{}' not found",
                    experiment.experiment_id
                )));
            }

            // archiving an experiment archives its runs as well
            if experiment.lifecycle_stage == LifecycleStage::Deleted {
                sqlx::query(
                    "UPDATE runs SET lifecycle_stage = ?, deleted_time = ? \
                     WHERE experiment_id = ?",
                )
                .bind(LifecycleStage::Deleted)
                .bind(experiment.last_update_time)
                .bind(experiment.experiment_id)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn set_experiment_artifact_location(
            &self,
            experiment_id: i32,
            artifact_location: &str,
        ) -> MetadataResult<()> {
            sqlx::query("UPDATE experiments SET artifact_location = ? WHERE experiment_id = ?")
                .bind(artifact_location)
                .bind(experiment_id)
                .execute(&self.pool)
                .await?;
            Ok(())
        }

        async fn delete_experiments(&self, ids: &[i32]) -> MetadataResult<()> {
            if ids.is_empty() {
                return Ok(());
            }
            let placeholders = vec!["?"; ids.len()].join(", ");
            let mut tx = self.pool.begin().await?;

            let min_sql =
                format!("SELECT MIN(row_num) FROM runs WHERE experiment_id IN ({placeholders})");
            let mut min_query = sqlx::query_scalar::<_, Option<i64>>(&min_sql);
            for id in ids {
                min_query = min_query.bind(id);
            }
            let min_row_num = min_query.fetch_one(&mut *tx).await?;

            let delete_sql =
                format!("DELETE FROM experiments WHERE experiment_id IN ({placeholders})");
            let mut delete = sqlx::query(&delete_sql);
            for id in ids {
                delete = delete.bind(id);
            }
            let result = delete.execute(&mut *tx).await?;

            if result.rows_affected() != ids.len() as u64 {
                return Err(MetadataError::Internal(
                    "count of deleted experiments does not match length of ids input \
                     (invalid experiment ID?)"
                        .to_string(),
                ));
            }

            if let Some(min) = min_row_num {
                renumber_rows(&mut tx, min).await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn search_experiments(&self, select: &Select) -> MetadataResult<Vec<ExperimentRow>> {
            let (sql, binds) = select.build(Dialect::Sqlite);
            let rows = bind_rows(sqlx::query_as::<_, ExperimentRow>(&sql), &binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn experiment_tags(
            &self,
            experiment_id: i32,
        ) -> MetadataResult<Vec<ExperimentTagRow>> {
            let rows = sqlx::query_as::<_, ExperimentTagRow>(
                "SELECT * FROM experiment_tags WHERE experiment_id = ? ORDER BY key",
            )
            .bind(experiment_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn set_experiment_tag(&self, tag: &ExperimentTagRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO experiment_tags (experiment_id, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT (experiment_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(tag.experiment_id)
            .bind(&tag.key)
            .bind(&tag.value)
            .execute(&self.pool)
            .await?;
            Ok(())
        }
    }

    #[async_trait]
    impl RunRepo for SqliteStore {
        async fn create_run(&self, run: &RunRow) -> MetadataResult<RunRow> {
            let mut last_error = None;
            for _attempt in 0..ROW_NUM_RETRIES {
                let result = sqlx::query(
                    "INSERT INTO runs (run_uuid, name, source_type, source_name, \
                     entry_point_name, user_id, status, start_time, end_time, source_version, \
                     lifecycle_stage, artifact_uri, experiment_id, deleted_time, row_num) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                     (SELECT COALESCE(MAX(row_num), -1) FROM runs) + 1)",
                )
                .bind(&run.run_uuid)
                .bind(&run.name)
                .bind(&run.source_type)
                .bind(&run.source_name)
                .bind(&run.entry_point_name)
                .bind(&run.user_id)
                .bind(run.status)
                .bind(run.start_time)
                .bind(run.end_time)
                .bind(&run.source_version)
                .bind(run.lifecycle_stage)
                .bind(&run.artifact_uri)
                .bind(run.experiment_id)
                .bind(run.deleted_time)
                .execute(&self.pool)
                .await;

                match result {
                    Ok(_) => {
                        return self.get_run(&run.run_uuid).await?.ok_or_else(|| {
                            MetadataError::Internal(format!(
                                "run '{}' missing after insert",
                                run.run_uuid
                            ))
                        });
                    }
                    Err(sqlx::Error::Database(db_err))
                        if db_err.message().contains("UNIQUE")
                            && db_err.message().contains("row_num") =>
                    {
                        // two near-simultaneous creates computed the same
                        // max+1 candidate; the unique index broke the tie
                        last_error = Some(sqlx::Error::Database(db_err));
                        continue;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            Err(last_error
                .map(Into::into)
                .unwrap_or_else(|| MetadataError::Internal("run insert retries exhausted".into())))
        }

        async fn get_run(&self, run_id: &str) -> MetadataResult<Option<RunRow>> {
            let row = sqlx::query_as::<_, RunRow>("SELECT * FROM runs WHERE run_uuid = ?")
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
            Ok(row)
        }

        async fn get_run_in_stage(
            &self,
            run_id: &str,
            stage: LifecycleStage,
        ) -> MetadataResult<Option<RunRow>> {
            let row = sqlx::query_as::<_, RunRow>(
                "SELECT * FROM runs WHERE run_uuid = ? AND lifecycle_stage = ?",
            )
            .bind(run_id)
            .bind(stage)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn update_run(&self, run_id: &str, update: &RunUpdate) -> MetadataResult<()> {
            let mut sets = Vec::new();
            let mut binds: Vec<Bind> = Vec::new();
            if let Some(name) = &update.name {
                sets.push("name = ?");
                binds.push(Bind::from(name.clone()));
            }
            if let Some(status) = update.status {
                sets.push("status = ?");
                binds.push(Bind::from(status.as_str()));
            }
            if let Some(end_time) = update.end_time {
                sets.push("end_time = ?");
                binds.push(Bind::Int(end_time));
            }
            if sets.is_empty() {
                return Ok(());
            }

            let mut tx = self.pool.begin().await?;

            let sql = format!("UPDATE runs SET {} WHERE run_uuid = ?", sets.join(", "));
            let mut query = sqlx::query(&sql);
            for bind in &binds {
                query = match bind {
                    Bind::Int(v) => query.bind(*v),
                    Bind::Float(v) => query.bind(*v),
                    Bind::Str(v) => query.bind(v.clone()),
                    Bind::Bool(v) => query.bind(*v),
                };
            }
            let result = query.bind(run_id).execute(&mut *tx).await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("run '{run_id}' not found")));
            }

            if let Some(name) = &update.name {
                sqlx::query(
                    "INSERT INTO tags (run_uuid, key, value) VALUES (?, ?, ?) \
                     ON CONFLICT (run_uuid, key) DO UPDATE SET value = excluded.value",
                )
                .bind(run_id)
                .bind(tracklab_core::TAG_RUN_NAME)
                .bind(name)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn archive_run(&self, run_id: &str, deleted_time: i64) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE runs SET lifecycle_stage = ?, deleted_time = ? WHERE run_uuid = ?",
            )
            .bind(LifecycleStage::Deleted)
            .bind(deleted_time)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn restore_run(&self, run_id: &str) -> MetadataResult<()> {
            sqlx::query(
                "UPDATE runs SET lifecycle_stage = ?, deleted_time = NULL WHERE run_uuid = ?",
            )
            .bind(LifecycleStage::Active)
            .bind(run_id)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn archive_runs(&self, run_ids: &[String], deleted_time: i64) -> MetadataResult<()> {
            if run_ids.is_empty() {
                return Ok(());
            }
            let placeholders = vec!["?"; run_ids.len()].join(", ");
            let sql = format!(
                "UPDATE runs SET lifecycle_stage = ?, deleted_time = ? \
                 WHERE run_uuid IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql)
                .bind(LifecycleStage::Deleted)
                .bind(deleted_time);
            for id in run_ids {
                query = query.bind(id);
            }
            query.execute(&self.pool).await?;
            Ok(())
        }

        async fn restore_runs(&self, run_ids: &[String]) -> MetadataResult<()> {
            if run_ids.is_empty() {
                return Ok(());
            }
            let placeholders = vec!["?"; run_ids.len()].join(", ");
            let sql = format!(
                "UPDATE runs SET lifecycle_stage = ?, deleted_time = NULL \
                 WHERE run_uuid IN ({placeholders})"
            );
            let mut query = sqlx::query(&sql).bind(LifecycleStage::Active);
            for id in run_ids {
                query = query.bind(id);
            }
            query.execute(&self.pool).await?;
            Ok(())
        }

        async fn delete_runs(&self, run_ids: &[String]) -> MetadataResult<()> {
            if run_ids.is_empty() {
                return Ok(());
            }
            let placeholders = vec!["?"; run_ids.len()].join(", ");
            let mut tx = self.pool.begin().await?;

            let min_sql =
                format!("SELECT MIN(row_num) FROM runs WHERE run_uuid IN ({placeholders})");
            let mut min_query = sqlx::query_scalar::<_, Option<i64>>(&min_sql);
            for id in run_ids {
                min_query = min_query.bind(id);
            }
            let min_row_num = min_query.fetch_one(&mut *tx).await?;

            let delete_sql = format!("DELETE FROM runs WHERE run_uuid IN ({placeholders})");
            let mut delete = sqlx::query(&delete_sql);
            for id in run_ids {
                delete = delete.bind(id);
            }
            let result = delete.execute(&mut *tx).await?;

            if result.rows_affected() != run_ids.len() as u64 {
                return Err(MetadataError::Internal(
                    "count of deleted runs does not match length of ids input (invalid run ID?)"
                        .to_string(),
                ));
            }

            if let Some(min) = min_row_num {
                renumber_rows(&mut tx, min).await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn set_run_tags_batch(
            &self,
            run_id: &str,
            batch_size: usize,
            tags: &[TagRow],
        ) -> MetadataResult<()> {
            if tags.is_empty() {
                return Ok(());
            }
            let mut tx = self.pool.begin().await?;
            for chunk in tags.chunks(batch_size.max(1)) {
                let placeholders = vec!["(?, ?, ?)"; chunk.len()].join(", ");
                let sql = format!(
                    "INSERT INTO tags (run_uuid, key, value) VALUES {placeholders} \
                     ON CONFLICT (run_uuid, key) DO UPDATE SET value = excluded.value"
                );
                let mut query = sqlx::query(&sql);
                for tag in chunk {
                    query = query.bind(run_id).bind(&tag.key).bind(&tag.value);
                }
                query.execute(&mut *tx).await?;
            }
            tx.commit().await?;
            Ok(())
        }

        async fn search_runs(&self, select: &Select) -> MetadataResult<Vec<RunRow>> {
            let (sql, binds) = select.build(Dialect::Sqlite);
            let rows = bind_rows(sqlx::query_as::<_, RunRow>(&sql), &binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn count_runs(&self) -> MetadataResult<i64> {
            let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM runs")
                .fetch_one(&self.pool)
                .await?;
            Ok(count)
        }

        async fn row_num_for(&self, run_id: &str) -> MetadataResult<Option<i64>> {
            let row: Option<i64> =
                sqlx::query_scalar("SELECT row_num FROM runs WHERE run_uuid = ?")
                    .bind(run_id)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }
    }

    #[async_trait]
    impl ParamRepo for SqliteStore {
        async fn create_params_batch(
            &self,
            batch_size: usize,
            params: &[ParamRow],
        ) -> MetadataResult<()> {
            if params.is_empty() {
                return Ok(());
            }
            let mut tx = self.pool.begin().await?;

            let mut inserted = 0u64;
            for chunk in params.chunks(batch_size.max(1)) {
                let placeholders = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
                let sql = format!(
                    "INSERT INTO params (run_uuid, key, value_int, value_float, value_str) \
                     VALUES {placeholders} ON CONFLICT (run_uuid, key) DO NOTHING"
                );
                let mut query = sqlx::query(&sql);
                for param in chunk {
                    query = query
                        .bind(&param.run_uuid)
                        .bind(&param.key)
                        .bind(param.value_int)
                        .bind(param.value_float)
                        .bind(&param.value_str);
                }
                inserted += query.execute(&mut *tx).await?.rows_affected();
            }

            // ignored conflicts must be exact duplicates
            if inserted != params.len() as u64 {
                let rows = vec!["(?, ?, ?, ?, ?)"; params.len()].join(", ");
                let sql = format!(
                    "WITH new(run_uuid, key, value_int, value_float, value_str) AS \
                     (VALUES {rows}) \
                     SELECT current.run_uuid AS run_uuid, current.key AS key, \
                     CONCAT(current.value_int, current.value_float, current.value_str) \
                     AS old_value, \
                     CONCAT(new.value_int, new.value_float, new.value_str) AS new_value \
                     FROM params AS current \
                     INNER JOIN new USING (run_uuid, key) \
                     WHERE (new.value_int IS NOT current.value_int) \
                     OR (new.value_float IS NOT current.value_float) \
                     OR (new.value_str IS NOT current.value_str)"
                );
                let mut query = sqlx::query_as::<_, ParamConflict>(&sql);
                for param in params {
                    query = query
                        .bind(&param.run_uuid)
                        .bind(&param.key)
                        .bind(param.value_int)
                        .bind(param.value_float)
                        .bind(&param.value_str);
                }
                let conflicts = query.fetch_all(&mut *tx).await?;
                if !conflicts.is_empty() {
                    return Err(MetadataError::ParamConflict(conflicts));
                }
            }

            tx.commit().await?;
            Ok(())
        }

        async fn params_for_runs(&self, run_ids: &[String]) -> MetadataResult<Vec<ParamRow>> {
            let mut result = Vec::new();
            for batch in run_ids.chunks(IN_BATCH_SIZE) {
                let placeholders = vec!["?"; batch.len()].join(", ");
                let sql = format!(
                    "SELECT * FROM params WHERE run_uuid IN ({placeholders}) \
                     ORDER BY run_uuid, key"
                );
                let mut query = sqlx::query_as::<_, ParamRow>(&sql);
                for id in batch {
                    query = query.bind(id);
                }
                result.extend(query.fetch_all(&self.pool).await?);
            }
            Ok(result)
        }
    }

    #[async_trait]
    impl MetricRepo for SqliteStore {
        async fn create_metrics_batch(
            &self,
            run_id: &str,
            batch_size: usize,
            metrics: &[MetricRow],
        ) -> MetadataResult<()> {
            if metrics.is_empty() {
                return Ok(());
            }
            let mut tx = self.pool.begin().await?;

            // continue each series' iter counter inside the transaction so
            // concurrent batches serialise on the write lock
            let mut next_iter: std::collections::HashMap<String, i64> =
                std::collections::HashMap::new();
            for metric in metrics {
                if !next_iter.contains_key(&metric.key) {
                    let max: i64 = sqlx::query_scalar(
                        "SELECT COALESCE(MAX(iter), 0) FROM metrics \
                         WHERE run_uuid = ? AND key = ?",
                    )
                    .bind(run_id)
                    .bind(&metric.key)
                    .fetch_one(&mut *tx)
                    .await?;
                    next_iter.insert(metric.key.clone(), max + 1);
                }
            }

            let mut rows: Vec<MetricRow> = Vec::with_capacity(metrics.len());
            for metric in metrics {
                let counter = next_iter
                    .get_mut(&metric.key)
                    .expect("iter counter allocated above");
                let mut row = metric.clone();
                row.run_uuid = run_id.to_string();
                row.iter = *counter;
                *counter += 1;
                rows.push(row);
            }

            for chunk in rows.chunks(batch_size.max(1)) {
                let placeholders = vec!["(?, ?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
                let sql = format!(
                    "INSERT INTO metrics (run_uuid, key, value, timestamp, step, is_nan, iter) \
                     VALUES {placeholders} ON CONFLICT DO NOTHING"
                );
                let mut query = sqlx::query(&sql);
                for row in chunk {
                    query = query
                        .bind(&row.run_uuid)
                        .bind(&row.key)
                        .bind(row.value)
                        .bind(row.timestamp)
                        .bind(row.step)
                        .bind(row.is_nan)
                        .bind(row.iter);
                }
                query.execute(&mut *tx).await?;
            }

            // per-key summary candidate: the highest (step, timestamp, iter)
            let mut candidates: std::collections::HashMap<String, &MetricRow> =
                std::collections::HashMap::new();
            for row in &rows {
                let current = candidates.entry(row.key.clone()).or_insert(row);
                if (row.step, row.timestamp, row.iter)
                    > (current.step, current.timestamp, current.iter)
                {
                    *current = row;
                }
            }

            for candidate in candidates.values() {
                sqlx::query(
                    "INSERT INTO latest_metrics (run_uuid, key, value, timestamp, step, is_nan, \
                     last_iter) VALUES (?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT (run_uuid, key) DO UPDATE SET value = excluded.value, \
                     timestamp = excluded.timestamp, step = excluded.step, \
                     is_nan = excluded.is_nan, last_iter = excluded.last_iter \
                     WHERE excluded.step >= latest_metrics.step",
                )
                .bind(&candidate.run_uuid)
                .bind(&candidate.key)
                .bind(candidate.value)
                .bind(candidate.timestamp)
                .bind(candidate.step)
                .bind(candidate.is_nan)
                .bind(candidate.iter)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;
            Ok(())
        }

        async fn latest_metrics_for_runs(
            &self,
            run_ids: &[String],
        ) -> MetadataResult<Vec<LatestMetricRow>> {
            let mut result = Vec::new();
            for batch in run_ids.chunks(IN_BATCH_SIZE) {
                let placeholders = vec!["?"; batch.len()].join(", ");
                let sql = format!(
                    "SELECT * FROM latest_metrics WHERE run_uuid IN ({placeholders}) \
                     ORDER BY run_uuid, key"
                );
                let mut query = sqlx::query_as::<_, LatestMetricRow>(&sql);
                for id in batch {
                    query = query.bind(id);
                }
                result.extend(query.fetch_all(&self.pool).await?);
            }
            Ok(result)
        }
    }

    #[async_trait]
    impl TagRepo for SqliteStore {
        async fn get_tag(&self, run_id: &str, key: &str) -> MetadataResult<Option<TagRow>> {
            let row =
                sqlx::query_as::<_, TagRow>("SELECT * FROM tags WHERE run_uuid = ? AND key = ?")
                    .bind(run_id)
                    .bind(key)
                    .fetch_optional(&self.pool)
                    .await?;
            Ok(row)
        }

        async fn delete_tag(&self, run_id: &str, key: &str) -> MetadataResult<()> {
            let result = sqlx::query("DELETE FROM tags WHERE run_uuid = ? AND key = ?")
                .bind(run_id)
                .bind(key)
                .execute(&self.pool)
                .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "tag '{key}' not found for run '{run_id}'"
                )));
            }
            Ok(())
        }

        async fn tags_for_runs(&self, run_ids: &[String]) -> MetadataResult<Vec<TagRow>> {
            let mut result = Vec::new();
            for batch in run_ids.chunks(IN_BATCH_SIZE) {
                let placeholders = vec!["?"; batch.len()].join(", ");
                let sql = format!(
                    "SELECT * FROM tags WHERE run_uuid IN ({placeholders}) ORDER BY run_uuid, key"
                );
                let mut query = sqlx::query_as::<_, TagRow>(&sql);
                for id in batch {
                    query = query.bind(id);
                }
                result.extend(query.fetch_all(&self.pool).await?);
            }
            Ok(result)
        }
    }

    #[async_trait]
    impl SearchRepo for SqliteStore {
        async fn dashboard_runs(
            &self,
            parsed: &ParsedQuery,
            limit: Option<i64>,
            offset_row_num: Option<i64>,
        ) -> MetadataResult<Vec<RunWithExperiment>> {
            let mut select = Select::new("runs");
            select
                .column("runs.*")
                .column("experiments.name AS experiment_name")
                .join(Fragment::new(
                    "LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id",
                ));
            parsed.apply(&mut select);
            if let Some(row_num) = offset_row_num {
                select.filter(Fragment::with_binds(
                    "runs.row_num < ?",
                    vec![Bind::Int(row_num)],
                ));
            }
            select.order("runs.row_num DESC");
            if let Some(limit) = limit {
                select.limit(limit);
            }

            let (sql, binds) = select.build(Dialect::Sqlite);
            let rows = bind_rows(sqlx::query_as::<_, RunWithExperiment>(&sql), &binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn active_runs(&self) -> MetadataResult<Vec<RunWithExperiment>> {
            let rows = sqlx::query_as::<_, RunWithExperiment>(
                "SELECT runs.*, experiments.name AS experiment_name FROM runs \
                 LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id \
                 WHERE runs.status = ? ORDER BY runs.row_num DESC",
            )
            .bind(RunStatus::Running)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn run_info(&self, run_id: &str) -> MetadataResult<Option<RunWithExperiment>> {
            let row = sqlx::query_as::<_, RunWithExperiment>(
                "SELECT runs.*, experiments.name AS experiment_name FROM runs \
                 LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id \
                 WHERE runs.run_uuid = ?",
            )
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn metrics_for_keys(
            &self,
            run_id: &str,
            keys: &[String],
        ) -> MetadataResult<Vec<MetricRow>> {
            if keys.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; keys.len()].join(", ");
            let sql = format!(
                "SELECT * FROM metrics WHERE run_uuid = ? AND key IN ({placeholders}) \
                 ORDER BY key, iter"
            );
            let mut query = sqlx::query_as::<_, MetricRow>(&sql).bind(run_id);
            for key in keys {
                query = query.bind(key);
            }
            Ok(query.fetch_all(&self.pool).await?)
        }

        async fn dashboard_metric_runs(
            &self,
            parsed: &ParsedQuery,
        ) -> MetadataResult<Vec<RunWithExperiment>> {
            let mut select = Select::new("runs");
            select
                .column("DISTINCT runs.*")
                .column("experiments.name AS experiment_name")
                .join(Fragment::new(
                    "LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id",
                ))
                .join(Fragment::new(
                    "LEFT JOIN latest_metrics ON runs.run_uuid = latest_metrics.run_uuid",
                ));
            parsed.apply(&mut select);
            select.order("runs.row_num DESC");

            let (sql, binds) = select.build(Dialect::Sqlite);
            let rows = bind_rows(sqlx::query_as::<_, RunWithExperiment>(&sql), &binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn dashboard_metrics(
            &self,
            parsed: &ParsedQuery,
            steps: i64,
            x_axis: Option<&str>,
        ) -> MetadataResult<Vec<MetricWithXAxis>> {
            let (sql, binds) = dashboard_metrics_sql(parsed, steps, x_axis, Dialect::Sqlite);
            let rows = bind_rows(sqlx::query_as::<_, MetricWithXAxis>(&sql), &binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn aligned_metrics(
            &self,
            requests: &[AlignRequest],
            align_by: &str,
        ) -> MetadataResult<Vec<MetricRow>> {
            if requests.is_empty() {
                return Ok(Vec::new());
            }
            let (sql, binds) = aligned_metrics_sql(requests, align_by, Dialect::Sqlite);
            let rows = bind_rows(sqlx::query_as::<_, MetricRow>(&sql), &binds)
                .fetch_all(&self.pool)
                .await?;
            Ok(rows)
        }

        async fn runs_for_experiment(&self, experiment_id: i32) -> MetadataResult<Vec<RunRow>> {
            let rows = sqlx::query_as::<_, RunRow>(
                "SELECT * FROM runs WHERE experiment_id = ? ORDER BY row_num",
            )
            .bind(experiment_id)
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }
    }

    #[async_trait]
    impl DashboardRepo for SqliteStore {
        async fn create_app(&self, app: &AppRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO apps (id, app_type, state, created_at, updated_at, is_archived) \
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(app.id)
            .bind(&app.app_type)
            .bind(&app.state)
            .bind(app.created_at)
            .bind(app.updated_at)
            .bind(app.is_archived)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_app(&self, id: Uuid) -> MetadataResult<Option<AppRow>> {
            let row = sqlx::query_as::<_, AppRow>(
                "SELECT * FROM apps WHERE id = ? AND is_archived = FALSE",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_apps(&self) -> MetadataResult<Vec<AppRow>> {
            let rows = sqlx::query_as::<_, AppRow>(
                "SELECT * FROM apps WHERE is_archived = FALSE ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_app_state(
            &self,
            id: Uuid,
            state: &str,
            updated_at: i64,
        ) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE apps SET state = ?, updated_at = ? WHERE id = ?")
                    .bind(state)
                    .bind(updated_at)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("app '{id}' not found")));
            }
            Ok(())
        }

        async fn archive_app(&self, id: Uuid, updated_at: i64) -> MetadataResult<()> {
            let result =
                sqlx::query("UPDATE apps SET is_archived = TRUE, updated_at = ? WHERE id = ?")
                    .bind(updated_at)
                    .bind(id)
                    .execute(&self.pool)
                    .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!("app '{id}' not found")));
            }
            Ok(())
        }

        async fn create_dashboard(&self, dashboard: &DashboardRow) -> MetadataResult<()> {
            sqlx::query(
                "INSERT INTO dashboards (id, app_id, name, description, created_at, updated_at, \
                 is_archived) VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(dashboard.id)
            .bind(dashboard.app_id)
            .bind(&dashboard.name)
            .bind(&dashboard.description)
            .bind(dashboard.created_at)
            .bind(dashboard.updated_at)
            .bind(dashboard.is_archived)
            .execute(&self.pool)
            .await?;
            Ok(())
        }

        async fn get_dashboard(&self, id: Uuid) -> MetadataResult<Option<DashboardRow>> {
            let row = sqlx::query_as::<_, DashboardRow>(
                "SELECT * FROM dashboards WHERE id = ? AND is_archived = FALSE",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
            Ok(row)
        }

        async fn list_dashboards(&self) -> MetadataResult<Vec<DashboardRow>> {
            let rows = sqlx::query_as::<_, DashboardRow>(
                "SELECT * FROM dashboards WHERE is_archived = FALSE ORDER BY created_at",
            )
            .fetch_all(&self.pool)
            .await?;
            Ok(rows)
        }

        async fn update_dashboard(
            &self,
            id: Uuid,
            name: &str,
            description: &str,
            updated_at: i64,
        ) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE dashboards SET name = ?, description = ?, updated_at = ? \
                 WHERE id = ? AND is_archived = FALSE",
            )
            .bind(name)
            .bind(description)
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "dashboard '{id}' not found"
                )));
            }
            Ok(())
        }

        async fn archive_dashboard(&self, id: Uuid, updated_at: i64) -> MetadataResult<()> {
            let result = sqlx::query(
                "UPDATE dashboards SET is_archived = TRUE, updated_at = ? WHERE id = ?",
            )
            .bind(updated_at)
            .bind(id)
            .execute(&self.pool)
            .await?;
            if result.rows_affected() == 0 {
                return Err(MetadataError::NotFound(format!(
                    "dashboard '{id}' not found"
                )));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ImportRepo for SqliteStore {
        async fn list_experiments_all(&self) -> MetadataResult<Vec<ExperimentRow>> {
            Ok(
                sqlx::query_as::<_, ExperimentRow>(
                    "SELECT * FROM experiments ORDER BY experiment_id",
                )
                .fetch_all(&self.pool)
                .await?,
            )
        }

        async fn list_experiment_tags_all(&self) -> MetadataResult<Vec<ExperimentTagRow>> {
            Ok(sqlx::query_as::<_, ExperimentTagRow>(
                "SELECT * FROM experiment_tags ORDER BY experiment_id, key",
            )
            .fetch_all(&self.pool)
            .await?)
        }

        async fn list_runs_all(&self) -> MetadataResult<Vec<RunRow>> {
            Ok(
                sqlx::query_as::<_, RunRow>("SELECT * FROM runs ORDER BY row_num")
                    .fetch_all(&self.pool)
                    .await?,
            )
        }

        async fn list_tags_all(&self) -> MetadataResult<Vec<TagRow>> {
            Ok(
                sqlx::query_as::<_, TagRow>("SELECT * FROM tags ORDER BY run_uuid, key")
                    .fetch_all(&self.pool)
                    .await?,
            )
        }

        async fn list_params_all(&self) -> MetadataResult<Vec<ParamRow>> {
            Ok(
                sqlx::query_as::<_, ParamRow>("SELECT * FROM params ORDER BY run_uuid, key")
                    .fetch_all(&self.pool)
                    .await?,
            )
        }

        async fn list_metrics_all(&self) -> MetadataResult<Vec<MetricRow>> {
            Ok(sqlx::query_as::<_, MetricRow>(
                "SELECT * FROM metrics ORDER BY run_uuid, key, iter",
            )
            .fetch_all(&self.pool)
            .await?)
        }

        async fn list_latest_metrics_all(&self) -> MetadataResult<Vec<LatestMetricRow>> {
            Ok(sqlx::query_as::<_, LatestMetricRow>(
                "SELECT * FROM latest_metrics ORDER BY run_uuid, key",
            )
            .fetch_all(&self.pool)
            .await?)
        }

        async fn import_experiment_tags(&self, rows: &[ExperimentTagRow]) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut written = 0;
            for row in rows {
                written += sqlx::query(
                    "INSERT INTO experiment_tags (experiment_id, key, value) VALUES (?, ?, ?) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(row.experiment_id)
                .bind(&row.key)
                .bind(&row.value)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        }

        async fn import_runs(&self, rows: &[RunRow]) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut written = 0;
            for row in rows {
                written += sqlx::query(
                    "INSERT INTO runs (run_uuid, name, source_type, source_name, \
                     entry_point_name, user_id, status, start_time, end_time, source_version, \
                     lifecycle_stage, artifact_uri, experiment_id, deleted_time, row_num) \
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                     (SELECT COALESCE(MAX(row_num), -1) FROM runs) + 1) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(&row.run_uuid)
                .bind(&row.name)
                .bind(&row.source_type)
                .bind(&row.source_name)
                .bind(&row.entry_point_name)
                .bind(&row.user_id)
                .bind(row.status)
                .bind(row.start_time)
                .bind(row.end_time)
                .bind(&row.source_version)
                .bind(row.lifecycle_stage)
                .bind(&row.artifact_uri)
                .bind(row.experiment_id)
                .bind(row.deleted_time)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        }

        async fn import_tags(&self, rows: &[TagRow]) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut written = 0;
            for row in rows {
                written += sqlx::query(
                    "INSERT INTO tags (run_uuid, key, value) VALUES (?, ?, ?) \
                     ON CONFLICT DO NOTHING",
                )
                .bind(&row.run_uuid)
                .bind(&row.key)
                .bind(&row.value)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        }

        async fn import_params(&self, rows: &[ParamRow]) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut written = 0;
            for row in rows {
                written += sqlx::query(
                    "INSERT INTO params (run_uuid, key, value_int, value_float, value_str) \
                     VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(&row.run_uuid)
                .bind(&row.key)
                .bind(row.value_int)
                .bind(row.value_float)
                .bind(&row.value_str)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        }

        async fn import_metrics(&self, rows: &[MetricRow]) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut written = 0;
            for row in rows {
                written += sqlx::query(
                    "INSERT INTO metrics (run_uuid, key, value, timestamp, step, is_nan, iter) \
                     VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(&row.run_uuid)
                .bind(&row.key)
                .bind(row.value)
                .bind(row.timestamp)
                .bind(row.step)
                .bind(row.is_nan)
                .bind(row.iter)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        }

        async fn import_latest_metrics(&self, rows: &[LatestMetricRow]) -> MetadataResult<u64> {
            let mut tx = self.pool.begin().await?;
            let mut written = 0;
            for row in rows {
                written += sqlx::query(
                    "INSERT INTO latest_metrics (run_uuid, key, value, timestamp, step, is_nan, \
                     last_iter) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
                )
                .bind(&row.run_uuid)
                .bind(&row.key)
                .bind(row.value)
                .bind(row.timestamp)
                .bind(row.step)
                .bind(row.is_nan)
                .bind(row.last_iter)
                .execute(&mut *tx)
                .await?
                .rows_affected();
            }
            tx.commit().await?;
            Ok(written)
        }
    }
}

/// Assemble the metric-search statement: one inner SELECT over runs compiled
/// from the dashboard query, joined back against raw metric rows and
/// downsampled to roughly `steps` points per series.
pub(crate) fn dashboard_metrics_sql(
    parsed: &ParsedQuery,
    steps: i64,
    x_axis: Option<&str>,
    dialect: Dialect,
) -> (String, Vec<Bind>) {
    let mut inner = Select::new("runs");
    inner
        .column("runs.run_uuid")
        .column("runs.row_num")
        .column("latest_metrics.key")
        .column(&format!(
            "(latest_metrics.last_iter + 1) / {:.1} AS interval",
            steps as f64
        ))
        .join(Fragment::new(
            "LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id",
        ))
        .join(Fragment::new(
            "LEFT JOIN latest_metrics ON runs.run_uuid = latest_metrics.run_uuid",
        ));
    parsed.apply(&mut inner);
    let (inner_sql, mut binds) = inner.build(Dialect::Sqlite);

    let x_axis_columns = if x_axis.is_some() {
        ", x_axis.value AS x_axis_value, x_axis.is_nan AS x_axis_is_nan"
    } else {
        // typed NULLs so both drivers decode the optional columns
        ", CAST(NULL AS double precision) AS x_axis_value, CAST(NULL AS boolean) AS x_axis_is_nan"
    };
    let x_axis_join = if x_axis.is_some() {
        " LEFT JOIN metrics x_axis ON metrics.run_uuid = x_axis.run_uuid AND \
         metrics.iter = x_axis.iter AND x_axis.key = ?"
    } else {
        ""
    };

    let mut sql = format!(
        "SELECT metrics.*{x_axis_columns} FROM metrics \
         INNER JOIN ({inner_sql}) AS runmetrics ON metrics.run_uuid = runmetrics.run_uuid AND \
         metrics.key = runmetrics.key{x_axis_join} \
         WHERE MOD(metrics.iter + 1 + runmetrics.interval / 2, runmetrics.interval) < 1 \
         ORDER BY runmetrics.row_num DESC, metrics.key, metrics.iter"
    );
    if let Some(x_axis) = x_axis {
        binds.push(Bind::from(x_axis));
    }
    if dialect == Dialect::Postgres {
        sql = crate::query::select::number_placeholders(&sql);
    }
    (sql, binds)
}

/// Assemble the aligned-metrics statement: a VALUES-backed CTE of requested
/// (run, series, steps) windows joined against the `align_by` series.
pub(crate) fn aligned_metrics_sql(
    requests: &[AlignRequest],
    align_by: &str,
    dialect: Dialect,
) -> (String, Vec<Bind>) {
    let values = vec!["(?, ?, CAST(? AS numeric))"; requests.len()].join(", ");
    let mut sql = format!(
        "WITH params(run_uuid, key, steps) AS (VALUES {values}) \
         SELECT m.run_uuid AS run_uuid, rm.key AS key, m.value AS value, \
         m.timestamp AS timestamp, m.step AS step, m.is_nan AS is_nan, m.iter AS iter \
         FROM metrics AS m \
         RIGHT JOIN (SELECT p.run_uuid, p.key, lm.last_iter AS max, \
         (lm.last_iter + 1) / p.steps AS interval FROM params AS p \
         LEFT JOIN latest_metrics AS lm USING (run_uuid, key)) rm USING (run_uuid) \
         WHERE m.key = ? AND m.iter <= rm.max \
         AND MOD(m.iter + 1 + rm.interval / 2, rm.interval) < 1 \
         ORDER BY m.run_uuid, rm.key, m.iter"
    );
    let mut binds = Vec::with_capacity(requests.len() * 3 + 1);
    for request in requests {
        binds.push(Bind::from(request.run_id.clone()));
        binds.push(Bind::from(request.key.clone()));
        binds.push(Bind::Float(f64::from(request.steps)));
    }
    binds.push(Bind::from(align_by));
    if dialect == Dialect::Postgres {
        sql = crate::query::select::number_placeholders(&sql);
    }
    (sql, binds)
}
