//! Shared fixtures for metadata store tests.

use tracklab_metadata::SqliteStore;
use tracklab_metadata::models::{ExperimentRow, LifecycleStage, MetricRow, RunRow, RunStatus};

/// A fresh SQLite store backed by a temp directory. Keep the directory
/// alive for the duration of the test.
pub async fn sqlite_store() -> (tempfile::TempDir, SqliteStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::new(dir.path().join("metadata.db"), None)
        .await
        .unwrap();
    (dir, store)
}

pub fn experiment(name: &str) -> ExperimentRow {
    ExperimentRow {
        experiment_id: 0,
        name: name.to_string(),
        artifact_location: format!("/tmp/artifacts/{name}"),
        lifecycle_stage: LifecycleStage::Active,
        creation_time: Some(1_700_000_000_000),
        last_update_time: Some(1_700_000_000_000),
    }
}

pub fn run(experiment_id: i32, name: &str, start_time: i64) -> RunRow {
    RunRow {
        run_uuid: tracklab_core::id::new_run_id(),
        name: name.to_string(),
        source_type: "LOCAL".to_string(),
        source_name: String::new(),
        entry_point_name: String::new(),
        user_id: "tester".to_string(),
        status: RunStatus::Running,
        start_time: Some(start_time),
        end_time: None,
        source_version: String::new(),
        lifecycle_stage: LifecycleStage::Active,
        artifact_uri: String::new(),
        experiment_id,
        deleted_time: None,
        row_num: 0,
    }
}

pub fn metric(key: &str, value: f64, timestamp: i64, step: i64) -> MetricRow {
    MetricRow {
        run_uuid: String::new(),
        key: key.to_string(),
        value,
        timestamp,
        step,
        is_nan: false,
        iter: 0,
    }
}
