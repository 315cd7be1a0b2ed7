//! Importer behaviour: table copies, ID remapping, idempotence.

mod common;

use common::{experiment, metric, run, sqlite_store};
use std::sync::Arc;
use tracklab_metadata::models::{ParamRow, ParamValue, TagRow};
use tracklab_metadata::repos::{ExperimentRepo, ImportRepo, MetricRepo, ParamRepo, RunRepo};
use tracklab_metadata::{Importer, SqliteStore};

async fn seeded_source() -> (tempfile::TempDir, Arc<SqliteStore>) {
    let (dir, store) = sqlite_store().await;
    let store = Arc::new(store);

    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let r = store.create_run(&run(exp_id, "r1", 100)).await.unwrap();
    store
        .create_params_batch(
            10,
            &[ParamRow::new(r.run_uuid.clone(), "lr", ParamValue::parse("0.1"))],
        )
        .await
        .unwrap();
    store
        .set_run_tags_batch(
            &r.run_uuid,
            10,
            &[TagRow {
                run_uuid: r.run_uuid.clone(),
                key: "env".to_string(),
                value: "dev".to_string(),
            }],
        )
        .await
        .unwrap();
    store
        .create_metrics_batch(&r.run_uuid, 10, &[metric("loss", 0.5, 10, 1)])
        .await
        .unwrap();

    (dir, store)
}

#[tokio::test]
async fn import_copies_all_tables_with_remapped_experiments() {
    let (_src_dir, source) = seeded_source().await;
    let (_dst_dir, dest) = sqlite_store().await;
    let dest = Arc::new(dest);

    // occupy experiment id 1 in the destination so the remap is visible
    dest.create_experiment(&experiment("occupied")).await.unwrap();

    Importer::new(source.clone(), dest.clone())
        .import()
        .await
        .unwrap();

    let imported = dest.get_experiment_by_name("E1").await.unwrap().unwrap();
    let src_exp = source.get_experiment_by_name("E1").await.unwrap().unwrap();
    assert_ne!(imported.experiment_id, src_exp.experiment_id);

    let runs = dest.list_runs_all().await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].experiment_id, imported.experiment_id);

    assert_eq!(dest.list_params_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_tags_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_metrics_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_latest_metrics_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn import_twice_is_idempotent() {
    let (_src_dir, source) = seeded_source().await;
    let (_dst_dir, dest) = sqlite_store().await;
    let dest = Arc::new(dest);

    let importer = Importer::new(source, dest.clone());
    importer.import().await.unwrap();
    importer.import().await.unwrap();

    assert_eq!(dest.list_experiments_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_runs_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_params_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_tags_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_metrics_all().await.unwrap().len(), 1);
    assert_eq!(dest.list_latest_metrics_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn imported_runs_keep_contiguous_row_numbers() {
    let (_src_dir, source) = seeded_source().await;
    let (_dst_dir, dest) = sqlite_store().await;
    let dest = Arc::new(dest);

    // destination already has a run occupying row 0
    let exp_id = dest.create_experiment(&experiment("local")).await.unwrap();
    dest.create_run(&run(exp_id, "local-run", 1)).await.unwrap();

    Importer::new(source, dest.clone()).import().await.unwrap();

    let mut row_nums: Vec<i64> = dest
        .list_runs_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.row_num)
        .collect();
    row_nums.sort_unstable();
    assert_eq!(row_nums, vec![0, 1]);
}
