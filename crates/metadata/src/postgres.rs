//! PostgreSQL-based metadata store implementation.

use crate::error::{MetadataError, MetadataResult};
use crate::models::*;
use crate::query::expr::ParsedQuery;
use crate::query::select::{Bind, Dialect, Fragment, Select, number_placeholders};
use crate::repos::{
    AlignRequest, DashboardRepo, ExperimentRepo, ImportRepo, MetricRepo, ParamRepo, RunRepo,
    RunUpdate, SearchRepo, TagRepo,
};
use crate::store::{IN_BATCH_SIZE, MetadataStore, schema_statements};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use std::str::FromStr;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// Attempts for inserts racing on the row_num unique index.
const ROW_NUM_RETRIES: u32 = 5;

/// Rewrite `?` placeholders into the `$n` form PostgreSQL expects. The query
/// texts are shared with the SQLite store.
fn pg(sql: &str) -> String {
    number_placeholders(sql)
}

/// PostgreSQL-based metadata store.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from a connection URL.
    pub async fn from_url(
        url: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::from_str(url)?;
        if let Some(timeout) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", timeout.to_string())]);
        }

        tracing::info!(max_connections, "connecting to PostgreSQL");

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        for statement in schema_statements(POSTGRES_SCHEMA) {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }
}

/// Bind compiled query values onto a typed query.
fn bind_rows<'q, O>(
    query: sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments>,
    binds: &[Bind],
) -> sqlx::query::QueryAs<'q, Postgres, O, sqlx::postgres::PgArguments> {
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

/// Renumber rows at or above `start_with` so row numbers are contiguous
/// again. Rows are first parked above the live range so the unique index on
/// row_num never sees a transient collision. Runs within the caller's
/// transaction.
async fn renumber_rows(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    start_with: i64,
) -> MetadataResult<()> {
    if start_with < 0 {
        return Err(MetadataError::Internal(
            "attempting to renumber with less than 0 row number value".to_string(),
        ));
    }
    sqlx::query(&pg("UPDATE runs SET row_num = row_num + ? WHERE row_num >= ?"))
        .bind(crate::store::ROW_NUM_PARK_OFFSET)
        .bind(start_with)
        .execute(&mut **tx)
        .await?;
    sqlx::query(&pg(
        "UPDATE runs SET row_num = renumbered.new_row_num \
         FROM (SELECT run_uuid, ROW_NUMBER() OVER (ORDER BY row_num) + ? - 1 AS new_row_num \
               FROM runs WHERE row_num >= ?) AS renumbered \
         WHERE runs.run_uuid = renumbered.run_uuid",
    ))
    .bind(start_with)
    .bind(crate::store::ROW_NUM_PARK_OFFSET)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[async_trait]
impl ExperimentRepo for PostgresStore {
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

        let id: i32 = sqlx::query_scalar(&pg(
            "INSERT INTO experiments (name, artifact_location, lifecycle_stage, creation_time, \
             last_update_time) VALUES (?, ?, ?, ?, ?) RETURNING experiment_id",
        ))
        .bind(&experiment.name)
        .bind(&experiment.artifact_location)
        .bind(experiment.lifecycle_stage)
        .bind(experiment.creation_time)
        .bind(experiment.last_update_time)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    async fn get_experiment(&self, experiment_id: i32) -> MetadataResult<Option<ExperimentRow>> {
        let row = sqlx::query_as::<_, ExperimentRow>(&pg(
            "SELECT * FROM experiments WHERE experiment_id = ?",
        ))
        .bind(experiment_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get_experiment_by_name(&self, name: &str) -> MetadataResult<Option<ExperimentRow>> {
        let row =
            sqlx::query_as::<_, ExperimentRow>(&pg("SELECT * FROM experiments WHERE name = ?"))
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }

    async fn first_or_create_experiment(
        &self,
        experiment: &ExperimentRow,
    ) -> MetadataResult<ExperimentRow> {
        sqlx::query(&pg(
            "INSERT INTO experiments (name, artifact_location, lifecycle_stage, creation_time, \
             last_update_time) VALUES (?, ?, ?, ?, ?) ON CONFLICT (name) DO NOTHING",
        ))
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
        let rows = sqlx::query_as::<_, ExperimentSummary>(&pg(
            "SELECT experiments.experiment_id, experiments.name, experiments.lifecycle_stage, \
             experiments.creation_time, COUNT(runs.run_uuid) AS run_count \
             FROM experiments \
             LEFT JOIN runs ON experiments.experiment_id = runs.experiment_id \
             WHERE experiments.lifecycle_stage = ? \
             GROUP BY experiments.experiment_id, experiments.name, \
             experiments.lifecycle_stage, experiments.creation_time \
             ORDER BY experiments.experiment_id",
        ))
        .bind(stage)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn update_experiment(&self, experiment: &ExperimentRow) -> MetadataResult<()> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(&pg(
            "UPDATE experiments SET name = ?, lifecycle_stage = ?, last_update_time = ? \
             WHERE experiment_id = ?",
        ))
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

        if experiment.lifecycle_stage == LifecycleStage::Deleted {
            sqlx::query(&pg(
                "UPDATE runs SET lifecycle_stage = ?, deleted_time = ? WHERE experiment_id = ?",
            ))
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
        sqlx::query(&pg(
            "UPDATE experiments SET artifact_location = ? WHERE experiment_id = ?",
        ))
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

        let min_sql = pg(&format!(
            "SELECT MIN(row_num) FROM runs WHERE experiment_id IN ({placeholders})"
        ));
        let mut min_query = sqlx::query_scalar::<_, Option<i64>>(&min_sql);
        for id in ids {
            min_query = min_query.bind(id);
        }
        let min_row_num = min_query.fetch_one(&mut *tx).await?;

        let delete_sql = pg(&format!(
            "DELETE FROM experiments WHERE experiment_id IN ({placeholders})"
        ));
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
        let (sql, binds) = select.build(Dialect::Postgres);
        let rows = bind_rows(sqlx::query_as::<_, ExperimentRow>(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn experiment_tags(&self, experiment_id: i32) -> MetadataResult<Vec<ExperimentTagRow>> {
        let rows = sqlx::query_as::<_, ExperimentTagRow>(&pg(
            "SELECT * FROM experiment_tags WHERE experiment_id = ? ORDER BY key",
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn set_experiment_tag(&self, tag: &ExperimentTagRow) -> MetadataResult<()> {
        sqlx::query(&pg(
            "INSERT INTO experiment_tags (experiment_id, key, value) VALUES (?, ?, ?) \
             ON CONFLICT (experiment_id, key) DO UPDATE SET value = excluded.value",
        ))
        .bind(tag.experiment_id)
        .bind(&tag.key)
        .bind(&tag.value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl RunRepo for PostgresStore {
    async fn create_run(&self, run: &RunRow) -> MetadataResult<RunRow> {
        let mut last_error = None;
        for _attempt in 0..ROW_NUM_RETRIES {
            let result = sqlx::query(&pg(
                "INSERT INTO runs (run_uuid, name, source_type, source_name, entry_point_name, \
                 user_id, status, start_time, end_time, source_version, lifecycle_stage, \
                 artifact_uri, experiment_id, deleted_time, row_num) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                 (SELECT COALESCE(MAX(row_num), -1) FROM runs) + 1)",
            ))
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
                    if db_err.message().contains("row_num")
                        && db_err.message().contains("unique") =>
                {
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
        let row = sqlx::query_as::<_, RunRow>(&pg("SELECT * FROM runs WHERE run_uuid = ?"))
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
        let row = sqlx::query_as::<_, RunRow>(&pg(
            "SELECT * FROM runs WHERE run_uuid = ? AND lifecycle_stage = ?",
        ))
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

        let sql = pg(&format!(
            "UPDATE runs SET {} WHERE run_uuid = ?",
            sets.join(", ")
        ));
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
            sqlx::query(&pg(
                "INSERT INTO tags (run_uuid, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT (run_uuid, key) DO UPDATE SET value = excluded.value",
            ))
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
        sqlx::query(&pg(
            "UPDATE runs SET lifecycle_stage = ?, deleted_time = ? WHERE run_uuid = ?",
        ))
        .bind(LifecycleStage::Deleted)
        .bind(deleted_time)
        .bind(run_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn restore_run(&self, run_id: &str) -> MetadataResult<()> {
        sqlx::query(&pg(
            "UPDATE runs SET lifecycle_stage = ?, deleted_time = NULL WHERE run_uuid = ?",
        ))
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
        let sql = pg(&format!(
            "UPDATE runs SET lifecycle_stage = ?, deleted_time = ? \
             WHERE run_uuid IN ({placeholders})"
        ));
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
        let sql = pg(&format!(
            "UPDATE runs SET lifecycle_stage = ?, deleted_time = NULL \
             WHERE run_uuid IN ({placeholders})"
        ));
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

        let min_sql = pg(&format!(
            "SELECT MIN(row_num) FROM runs WHERE run_uuid IN ({placeholders})"
        ));
        let mut min_query = sqlx::query_scalar::<_, Option<i64>>(&min_sql);
        for id in run_ids {
            min_query = min_query.bind(id);
        }
        let min_row_num = min_query.fetch_one(&mut *tx).await?;

        let delete_sql = pg(&format!("DELETE FROM runs WHERE run_uuid IN ({placeholders})"));
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
            let sql = pg(&format!(
                "INSERT INTO tags (run_uuid, key, value) VALUES {placeholders} \
                 ON CONFLICT (run_uuid, key) DO UPDATE SET value = excluded.value"
            ));
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
        let (sql, binds) = select.build(Dialect::Postgres);
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
            sqlx::query_scalar(&pg("SELECT row_num FROM runs WHERE run_uuid = ?"))
                .bind(run_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row)
    }
}

#[async_trait]
impl ParamRepo for PostgresStore {
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
            let sql = pg(&format!(
                "INSERT INTO params (run_uuid, key, value_int, value_float, value_str) \
                 VALUES {placeholders} ON CONFLICT (run_uuid, key) DO NOTHING"
            ));
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

        if inserted != params.len() as u64 {
            // VALUES rows need explicit casts so NULLs keep their column types
            let rows =
                vec!["(?, ?, ?::bigint, ?::double precision, ?::varchar)"; params.len()]
                    .join(", ");
            let sql = pg(&format!(
                "WITH new(run_uuid, key, value_int, value_float, value_str) AS (VALUES {rows}) \
                 SELECT current.run_uuid AS run_uuid, current.key AS key, \
                 CONCAT(current.value_int, current.value_float, current.value_str) AS old_value, \
                 CONCAT(new.value_int, new.value_float, new.value_str) AS new_value \
                 FROM params AS current \
                 INNER JOIN new USING (run_uuid, key) \
                 WHERE (new.value_int IS DISTINCT FROM current.value_int) \
                 OR (new.value_float IS DISTINCT FROM current.value_float) \
                 OR (new.value_str IS DISTINCT FROM current.value_str)"
            ));
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
            let sql = pg(&format!(
                "SELECT * FROM params WHERE run_uuid IN ({placeholders}) ORDER BY run_uuid, key"
            ));
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
impl MetricRepo for PostgresStore {
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

        let mut next_iter: std::collections::HashMap<String, i64> =
            std::collections::HashMap::new();
        for metric in metrics {
            if !next_iter.contains_key(&metric.key) {
                let max: i64 = sqlx::query_scalar(&pg(
                    "SELECT COALESCE(MAX(iter), 0) FROM metrics WHERE run_uuid = ? AND key = ?",
                ))
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
            let sql = pg(&format!(
                "INSERT INTO metrics (run_uuid, key, value, timestamp, step, is_nan, iter) \
                 VALUES {placeholders} ON CONFLICT DO NOTHING"
            ));
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

        let mut candidates: std::collections::HashMap<String, &MetricRow> =
            std::collections::HashMap::new();
        for row in &rows {
            let current = candidates.entry(row.key.clone()).or_insert(row);
            if (row.step, row.timestamp, row.iter) > (current.step, current.timestamp, current.iter)
            {
                *current = row;
            }
        }

        for candidate in candidates.values() {
            sqlx::query(&pg(
                "INSERT INTO latest_metrics (run_uuid, key, value, timestamp, step, is_nan, \
                 last_iter) VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT (run_uuid, key) DO UPDATE SET value = excluded.value, \
                 timestamp = excluded.timestamp, step = excluded.step, \
                 is_nan = excluded.is_nan, last_iter = excluded.last_iter \
                 WHERE excluded.step >= latest_metrics.step",
            ))
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
            let sql = pg(&format!(
                "SELECT * FROM latest_metrics WHERE run_uuid IN ({placeholders}) \
                 ORDER BY run_uuid, key"
            ));
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
impl TagRepo for PostgresStore {
    async fn get_tag(&self, run_id: &str, key: &str) -> MetadataResult<Option<TagRow>> {
        let row = sqlx::query_as::<_, TagRow>(&pg(
            "SELECT * FROM tags WHERE run_uuid = ? AND key = ?",
        ))
        .bind(run_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn delete_tag(&self, run_id: &str, key: &str) -> MetadataResult<()> {
        let result = sqlx::query(&pg("DELETE FROM tags WHERE run_uuid = ? AND key = ?"))
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
            let sql = pg(&format!(
                "SELECT * FROM tags WHERE run_uuid IN ({placeholders}) ORDER BY run_uuid, key"
            ));
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
impl SearchRepo for PostgresStore {
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

        let (sql, binds) = select.build(Dialect::Postgres);
        let rows = bind_rows(sqlx::query_as::<_, RunWithExperiment>(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn active_runs(&self) -> MetadataResult<Vec<RunWithExperiment>> {
        let rows = sqlx::query_as::<_, RunWithExperiment>(&pg(
            "SELECT runs.*, experiments.name AS experiment_name FROM runs \
             LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id \
             WHERE runs.status = ? ORDER BY runs.row_num DESC",
        ))
        .bind(RunStatus::Running)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn run_info(&self, run_id: &str) -> MetadataResult<Option<RunWithExperiment>> {
        let row = sqlx::query_as::<_, RunWithExperiment>(&pg(
            "SELECT runs.*, experiments.name AS experiment_name FROM runs \
             LEFT JOIN experiments ON runs.experiment_id = experiments.experiment_id \
             WHERE runs.run_uuid = ?",
        ))
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
        let sql = pg(&format!(
            "SELECT * FROM metrics WHERE run_uuid = ? AND key IN ({placeholders}) \
             ORDER BY key, iter"
        ));
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

        let (sql, binds) = select.build(Dialect::Postgres);
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
        let (sql, binds) =
            crate::store::dashboard_metrics_sql(parsed, steps, x_axis, Dialect::Postgres);
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
        let (sql, binds) = crate::store::aligned_metrics_sql(requests, align_by, Dialect::Postgres);
        let rows = bind_rows(sqlx::query_as::<_, MetricRow>(&sql), &binds)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    async fn runs_for_experiment(&self, experiment_id: i32) -> MetadataResult<Vec<RunRow>> {
        let rows = sqlx::query_as::<_, RunRow>(&pg(
            "SELECT * FROM runs WHERE experiment_id = ? ORDER BY row_num",
        ))
        .bind(experiment_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl DashboardRepo for PostgresStore {
    async fn create_app(&self, app: &AppRow) -> MetadataResult<()> {
        sqlx::query(&pg(
            "INSERT INTO apps (id, app_type, state, created_at, updated_at, is_archived) \
             VALUES (?, ?, ?, ?, ?, ?)",
        ))
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
        let row = sqlx::query_as::<_, AppRow>(&pg(
            "SELECT * FROM apps WHERE id = ? AND is_archived = FALSE",
        ))
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

    async fn update_app_state(&self, id: Uuid, state: &str, updated_at: i64) -> MetadataResult<()> {
        let result = sqlx::query(&pg("UPDATE apps SET state = ?, updated_at = ? WHERE id = ?"))
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
        let result = sqlx::query(&pg(
            "UPDATE apps SET is_archived = TRUE, updated_at = ? WHERE id = ?",
        ))
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
        sqlx::query(&pg(
            "INSERT INTO dashboards (id, app_id, name, description, created_at, updated_at, \
             is_archived) VALUES (?, ?, ?, ?, ?, ?, ?)",
        ))
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
        let row = sqlx::query_as::<_, DashboardRow>(&pg(
            "SELECT * FROM dashboards WHERE id = ? AND is_archived = FALSE",
        ))
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
        let result = sqlx::query(&pg(
            "UPDATE dashboards SET name = ?, description = ?, updated_at = ? \
             WHERE id = ? AND is_archived = FALSE",
        ))
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
        let result = sqlx::query(&pg(
            "UPDATE dashboards SET is_archived = TRUE, updated_at = ? WHERE id = ?",
        ))
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
impl ImportRepo for PostgresStore {
    async fn list_experiments_all(&self) -> MetadataResult<Vec<ExperimentRow>> {
        Ok(
            sqlx::query_as::<_, ExperimentRow>("SELECT * FROM experiments ORDER BY experiment_id")
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
        Ok(
            sqlx::query_as::<_, MetricRow>("SELECT * FROM metrics ORDER BY run_uuid, key, iter")
                .fetch_all(&self.pool)
                .await?,
        )
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
            written += sqlx::query(&pg(
                "INSERT INTO experiment_tags (experiment_id, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT DO NOTHING",
            ))
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
            written += sqlx::query(&pg(
                "INSERT INTO runs (run_uuid, name, source_type, source_name, entry_point_name, \
                 user_id, status, start_time, end_time, source_version, lifecycle_stage, \
                 artifact_uri, experiment_id, deleted_time, row_num) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, \
                 (SELECT COALESCE(MAX(row_num), -1) FROM runs) + 1) ON CONFLICT DO NOTHING",
            ))
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
            written += sqlx::query(&pg(
                "INSERT INTO tags (run_uuid, key, value) VALUES (?, ?, ?) \
                 ON CONFLICT DO NOTHING",
            ))
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
            written += sqlx::query(&pg(
                "INSERT INTO params (run_uuid, key, value_int, value_float, value_str) \
                 VALUES (?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
            ))
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
            written += sqlx::query(&pg(
                "INSERT INTO metrics (run_uuid, key, value, timestamp, step, is_nan, iter) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
            ))
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
            written += sqlx::query(&pg(
                "INSERT INTO latest_metrics (run_uuid, key, value, timestamp, step, is_nan, \
                 last_iter) VALUES (?, ?, ?, ?, ?, ?, ?) ON CONFLICT DO NOTHING",
            ))
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
