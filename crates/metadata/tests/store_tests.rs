//! SQLite store behaviour: row numbers, params, metrics, lifecycle.

mod common;

use common::{experiment, metric, run, sqlite_store};
use tracklab_metadata::MetadataError;
use tracklab_metadata::models::{LifecycleStage, ParamRow, ParamValue, RunStatus, TagRow};
use tracklab_metadata::repos::{
    ExperimentRepo, MetricRepo, ParamRepo, RunRepo, RunUpdate, SearchRepo, TagRepo,
};

#[tokio::test]
async fn run_row_numbers_are_dense_and_ordered() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..10 {
        let created = store
            .create_run(&run(exp_id, &format!("run-{i}"), 1000 + i))
            .await
            .unwrap();
        assert_eq!(created.row_num, i);
        ids.push(created.run_uuid);
    }
}

#[tokio::test]
async fn deleting_a_run_renumbers_survivors() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();

    let mut ids = Vec::new();
    for i in 0..10 {
        let created = store
            .create_run(&run(exp_id, &format!("run-{i}"), 1000 + i))
            .await
            .unwrap();
        ids.push(created.run_uuid);
    }

    store.delete_runs(&[ids[4].clone()]).await.unwrap();

    let mut row_nums = Vec::new();
    for id in ids.iter().filter(|id| **id != ids[4]) {
        row_nums.push(store.row_num_for(id).await.unwrap().unwrap());
    }
    row_nums.sort_unstable();
    // dense 0..=8, min preserved, max reduced by one
    assert_eq!(row_nums, (0..9).collect::<Vec<i64>>());
}

#[tokio::test]
async fn deleting_runs_with_unknown_id_fails() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    let err = store
        .delete_runs(&[created.run_uuid.clone(), "missing".to_string()])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("count of deleted runs"));

    // the transaction rolled back, nothing was deleted
    assert!(store.get_run(&created.run_uuid).await.unwrap().is_some());
}

#[tokio::test]
async fn experiment_delete_cascades_and_renumbers() {
    let (_dir, store) = sqlite_store().await;
    let keep = store.create_experiment(&experiment("keep")).await.unwrap();
    let drop = store.create_experiment(&experiment("drop")).await.unwrap();

    let kept_early = store.create_run(&run(keep, "a", 1)).await.unwrap();
    let doomed = store.create_run(&run(drop, "b", 2)).await.unwrap();
    let kept_late = store.create_run(&run(keep, "c", 3)).await.unwrap();
    assert_eq!(kept_late.row_num, 2);

    store.delete_experiments(&[drop]).await.unwrap();

    assert!(store.get_run(&doomed.run_uuid).await.unwrap().is_none());
    assert_eq!(
        store.row_num_for(&kept_early.run_uuid).await.unwrap(),
        Some(0)
    );
    assert_eq!(
        store.row_num_for(&kept_late.run_uuid).await.unwrap(),
        Some(1)
    );
}

#[tokio::test]
async fn experiment_delete_count_mismatch_fails() {
    let (_dir, store) = sqlite_store().await;
    let id = store.create_experiment(&experiment("E1")).await.unwrap();
    let err = store.delete_experiments(&[id, 9999]).await.unwrap_err();
    assert!(
        err.to_string()
            .contains("count of deleted experiments does not match length of ids input")
    );
}

#[tokio::test]
async fn experiment_create_is_unique_and_first_or_create_idempotent() {
    let (_dir, store) = sqlite_store().await;
    store.create_experiment(&experiment("E1")).await.unwrap();
    let err = store.create_experiment(&experiment("E1")).await.unwrap_err();
    assert!(matches!(err, MetadataError::AlreadyExists(_)));

    let first = store
        .first_or_create_experiment(&experiment("E2"))
        .await
        .unwrap();
    let second = store
        .first_or_create_experiment(&experiment("E2"))
        .await
        .unwrap();
    assert_eq!(first.experiment_id, second.experiment_id);
}

#[tokio::test]
async fn archiving_experiment_archives_runs() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    let mut exp = store.get_experiment(exp_id).await.unwrap().unwrap();
    exp.lifecycle_stage = LifecycleStage::Deleted;
    exp.last_update_time = Some(42);
    store.update_experiment(&exp).await.unwrap();

    let archived = store.get_run(&created.run_uuid).await.unwrap().unwrap();
    assert_eq!(archived.lifecycle_stage, LifecycleStage::Deleted);
    assert_eq!(archived.deleted_time, Some(42));
}

#[tokio::test]
async fn param_batch_is_idempotent_and_detects_conflicts() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();
    let run_id = created.run_uuid;

    let first = ParamRow::new(run_id.clone(), "lr", ParamValue::parse("0.1"));
    store.create_params_batch(100, &[first.clone()]).await.unwrap();
    // exact duplicate is a no-op
    store.create_params_batch(100, &[first]).await.unwrap();

    let params = store.params_for_runs(&[run_id.clone()]).await.unwrap();
    assert_eq!(params.len(), 1);
    assert_eq!(params[0].value(), ParamValue::Float(0.1));

    let conflicting = ParamRow::new(run_id.clone(), "lr", ParamValue::parse("0.2"));
    let err = store
        .create_params_batch(100, &[conflicting])
        .await
        .unwrap_err();
    match err {
        MetadataError::ParamConflict(conflicts) => {
            assert_eq!(conflicts.len(), 1);
            assert_eq!(conflicts[0].run_uuid, run_id);
            assert_eq!(conflicts[0].key, "lr");
            assert_eq!(conflicts[0].old_value, "0.1");
            assert_eq!(conflicts[0].new_value, "0.2");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn param_value_columns_are_exclusive() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    store
        .create_params_batch(
            100,
            &[
                ParamRow::new(created.run_uuid.clone(), "epochs", ParamValue::parse("10")),
                ParamRow::new(created.run_uuid.clone(), "lr", ParamValue::parse("0.5")),
                ParamRow::new(created.run_uuid.clone(), "opt", ParamValue::parse("adam")),
            ],
        )
        .await
        .unwrap();

    let params = store
        .params_for_runs(&[created.run_uuid.clone()])
        .await
        .unwrap();
    for param in params {
        let set = [
            param.value_int.is_some(),
            param.value_float.is_some(),
            param.value_str.is_some(),
        ]
        .iter()
        .filter(|set| **set)
        .count();
        assert_eq!(set, 1, "exactly one value column per param: {param:?}");
    }
}

#[tokio::test]
async fn metric_batches_assign_monotone_iters_and_latest() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();
    let run_id = created.run_uuid;

    store
        .create_metrics_batch(
            &run_id,
            100,
            &[
                metric("loss", 1.0, 10, 0),
                metric("loss", 0.5, 20, 1),
                metric("acc", 0.9, 20, 1),
            ],
        )
        .await
        .unwrap();
    store
        .create_metrics_batch(&run_id, 100, &[metric("loss", 0.25, 30, 2)])
        .await
        .unwrap();

    let series = store
        .metrics_for_keys(&run_id, &["loss".to_string()])
        .await
        .unwrap();
    let iters: Vec<i64> = series.iter().map(|m| m.iter).collect();
    assert_eq!(iters, vec![1, 2, 3]);

    let latest = store.latest_metrics_for_runs(&[run_id.clone()]).await.unwrap();
    let loss = latest.iter().find(|m| m.key == "loss").unwrap();
    assert_eq!(loss.value, 0.25);
    assert_eq!(loss.step, 2);
    assert_eq!(loss.last_iter, 3);
}

#[tokio::test]
async fn stale_step_does_not_replace_latest_metric() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();
    let run_id = created.run_uuid;

    store
        .create_metrics_batch(&run_id, 100, &[metric("loss", 0.5, 20, 5)])
        .await
        .unwrap();
    store
        .create_metrics_batch(&run_id, 100, &[metric("loss", 0.9, 30, 2)])
        .await
        .unwrap();

    let latest = store.latest_metrics_for_runs(&[run_id]).await.unwrap();
    assert_eq!(latest[0].value, 0.5);
    assert_eq!(latest[0].step, 5);
}

#[tokio::test]
async fn nan_metric_round_trips_as_flagged_zero() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();
    let run_id = created.run_uuid;

    let mut nan = metric("loss", 0.0, 10, 0);
    nan.is_nan = true;
    store.create_metrics_batch(&run_id, 100, &[nan]).await.unwrap();

    let series = store
        .metrics_for_keys(&run_id, &["loss".to_string()])
        .await
        .unwrap();
    assert!(series[0].is_nan);
    assert_eq!(series[0].value, 0.0);

    let latest = store.latest_metrics_for_runs(&[run_id]).await.unwrap();
    assert!(latest[0].is_nan);
}

#[tokio::test]
async fn archive_then_restore_preserves_run() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    store.archive_run(&created.run_uuid, 42).await.unwrap();
    let archived = store.get_run(&created.run_uuid).await.unwrap().unwrap();
    assert_eq!(archived.lifecycle_stage, LifecycleStage::Deleted);
    assert_eq!(archived.deleted_time, Some(42));

    store.restore_run(&created.run_uuid).await.unwrap();
    let restored = store.get_run(&created.run_uuid).await.unwrap().unwrap();
    assert_eq!(restored.lifecycle_stage, LifecycleStage::Active);
    assert_eq!(restored.deleted_time, None);

    // identical apart from the lifecycle fields that changed and changed back
    assert_eq!(restored.run_uuid, created.run_uuid);
    assert_eq!(restored.name, created.name);
    assert_eq!(restored.status, created.status);
    assert_eq!(restored.start_time, created.start_time);
    assert_eq!(restored.row_num, created.row_num);
}

#[tokio::test]
async fn update_run_upserts_name_tag_in_same_transaction() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "old", 1)).await.unwrap();

    store
        .update_run(
            &created.run_uuid,
            &RunUpdate {
                name: Some("new-name".to_string()),
                status: Some(RunStatus::Finished),
                end_time: Some(999),
            },
        )
        .await
        .unwrap();

    let updated = store.get_run(&created.run_uuid).await.unwrap().unwrap();
    assert_eq!(updated.name, "new-name");
    assert_eq!(updated.status, RunStatus::Finished);
    assert_eq!(updated.end_time, Some(999));

    let tag = store
        .get_tag(&created.run_uuid, "mlflow.runName")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(tag.value, "new-name");
}

#[tokio::test]
async fn run_tags_upsert_on_conflict() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let created = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    let tag = |v: &str| TagRow {
        run_uuid: created.run_uuid.clone(),
        key: "env".to_string(),
        value: v.to_string(),
    };
    store
        .set_run_tags_batch(&created.run_uuid, 100, &[tag("dev")])
        .await
        .unwrap();
    store
        .set_run_tags_batch(&created.run_uuid, 100, &[tag("prod")])
        .await
        .unwrap();

    let stored = store
        .get_tag(&created.run_uuid, "env")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.value, "prod");

    store.delete_tag(&created.run_uuid, "env").await.unwrap();
    assert!(
        store
            .get_tag(&created.run_uuid, "env")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn list_experiments_counts_runs() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    store.create_run(&run(exp_id, "a", 1)).await.unwrap();
    store.create_run(&run(exp_id, "b", 2)).await.unwrap();
    store.create_experiment(&experiment("empty")).await.unwrap();

    let summaries = store.list_experiments(LifecycleStage::Active).await.unwrap();
    assert_eq!(summaries.len(), 2);
    assert_eq!(summaries[0].run_count, 2);
    assert_eq!(summaries[1].run_count, 0);
}
