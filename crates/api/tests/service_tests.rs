//! End-to-end service flows over a SQLite store.

use std::sync::Arc;
use tracklab_api::request::{
    CreateExperimentRequest, CreateRunRequest, KeyValueRequest, LogBatchRequest, LogMetricRequest,
    LogParamRequest, MetricRequest, MetricValue, SearchRunsRequest, UpdateRunRequest,
};
use tracklab_api::response::MetricValueResponse;
use tracklab_api::{ApiError, ExperimentService, RunService};
use tracklab_metadata::{MetadataStore, SqliteStore};

async fn services() -> (tempfile::TempDir, ExperimentService, RunService) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(dir.path().join("metadata.db"), None)
            .await
            .unwrap(),
    ) as Arc<dyn MetadataStore>;
    let artifact_root = dir.path().join("artifacts").display().to_string();
    (
        dir,
        ExperimentService::new(store.clone(), artifact_root),
        RunService::new(store),
    )
}

async fn create_run(
    experiments: &ExperimentService,
    runs: &RunService,
    name: &str,
    start_time: i64,
) -> (String, String) {
    let experiment = experiments
        .create_experiment(&CreateExperimentRequest {
            name: "E1".to_string(),
            ..Default::default()
        })
        .await
        .map(|e| e.experiment_id)
        .unwrap_or_else(|_| "1".to_string());
    let run = runs
        .create_run(&CreateRunRequest {
            experiment_id: experiment.clone(),
            user_id: "tester".to_string(),
            run_name: name.to_string(),
            start_time,
            tags: Vec::new(),
        })
        .await
        .unwrap();
    (experiment, run.info.run_id)
}

#[tokio::test]
async fn created_run_is_found_by_start_time_filter() {
    let (_dir, experiments, runs) = services().await;
    let (experiment_id, run_id) =
        create_run(&experiments, &runs, "TestRun1", 123_456_789).await;

    let found = runs
        .search_runs(&SearchRunsRequest {
            experiment_ids: vec![experiment_id],
            filter: "attributes.start_time = 123456789".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    assert_eq!(found.runs.len(), 1);
    assert_eq!(found.runs[0].info.run_id, run_id);
    assert_eq!(found.runs[0].info.run_name, "TestRun1");
    assert!(found.next_page_token.is_none());
}

#[tokio::test]
async fn created_run_defaults_artifact_uri_from_experiment() {
    let (_dir, experiments, runs) = services().await;
    let (_, run_id) = create_run(&experiments, &runs, "r", 1).await;
    let run = runs.get_run(&run_id).await.unwrap();
    assert!(run.info.artifact_uri.ends_with(&format!("{run_id}/artifacts")));
    // the experiment's artifact location embeds its id under the root
    let experiment = experiments.get_experiment("1").await.unwrap();
    assert!(experiment.artifact_location.ends_with("/1"));
}

#[tokio::test]
async fn log_param_duplicate_ok_conflict_rejected() {
    let (_dir, experiments, runs) = services().await;
    let (_, run_id) = create_run(&experiments, &runs, "r", 1).await;

    let log = |value: &str| LogParamRequest {
        run_id: run_id.clone(),
        key: "lr".to_string(),
        value: value.to_string(),
    };
    runs.log_param(&log("0.1")).await.unwrap();
    runs.log_param(&log("0.1")).await.unwrap();

    let run = runs.get_run(&run_id).await.unwrap();
    assert_eq!(run.data.params.len(), 1);
    assert_eq!(run.data.params[0].value, "0.1");

    let err = runs.log_param(&log("0.2")).await.unwrap_err();
    match err {
        ApiError::Conflict(message) => {
            assert!(message.contains(&format!(
                "{{run_id: {run_id}, key: lr, old_value: 0.1, new_value: 0.2}}"
            )));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn log_batch_persists_all_three_kinds() {
    let (_dir, experiments, runs) = services().await;
    let (_, run_id) = create_run(&experiments, &runs, "r", 1).await;

    runs.log_batch(&LogBatchRequest {
        run_id: run_id.clone(),
        metrics: vec![MetricRequest {
            key: "loss".to_string(),
            value: MetricValue::Number(0.25),
            timestamp: 1000,
            step: 7,
        }],
        params: vec![KeyValueRequest {
            key: "lr".to_string(),
            value: "0.1".to_string(),
        }],
        tags: vec![KeyValueRequest {
            key: "env".to_string(),
            value: "ci".to_string(),
        }],
    })
    .await
    .unwrap();

    let run = runs.get_run(&run_id).await.unwrap();
    assert_eq!(run.data.params.len(), 1);
    assert!(run.data.tags.iter().any(|tag| tag.key == "env"));
    let metric = run.data.metrics.iter().find(|m| m.key == "loss").unwrap();
    assert_eq!(metric.step, 7);
    match metric.value {
        MetricValueResponse::Number(v) => assert_eq!(v, 0.25),
        ref other => panic!("unexpected value: {other:?}"),
    }
}

#[tokio::test]
async fn nan_metric_round_trips_to_nan_literal() {
    let (_dir, experiments, runs) = services().await;
    let (_, run_id) = create_run(&experiments, &runs, "r", 1).await;

    runs.log_metric(&LogMetricRequest {
        run_id: run_id.clone(),
        key: "loss".to_string(),
        value: MetricValue::Text("NaN".to_string()),
        timestamp: 1000,
        step: 1,
    })
    .await
    .unwrap();

    let run = runs.get_run(&run_id).await.unwrap();
    let metric = run.data.metrics.iter().find(|m| m.key == "loss").unwrap();
    match metric.value {
        MetricValueResponse::Text(text) => assert_eq!(text, "NaN"),
        ref other => panic!("unexpected value: {other:?}"),
    }
}

#[tokio::test]
async fn log_metric_requires_timestamp_and_active_run() {
    let (_dir, experiments, runs) = services().await;
    let (_, run_id) = create_run(&experiments, &runs, "r", 1).await;

    let err = runs
        .log_metric(&LogMetricRequest {
            run_id: run_id.clone(),
            key: "loss".to_string(),
            value: MetricValue::Number(1.0),
            timestamp: 0,
            step: 0,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("timestamp"));

    runs.delete_run(&run_id).await.unwrap();
    let err = runs
        .log_metric(&LogMetricRequest {
            run_id: run_id.clone(),
            key: "loss".to_string(),
            value: MetricValue::Number(1.0),
            timestamp: 1000,
            step: 0,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ResourceDoesNotExist(_)));

    runs.restore_run(&run_id).await.unwrap();
    runs.log_metric(&LogMetricRequest {
        run_id,
        key: "loss".to_string(),
        value: MetricValue::Number(1.0),
        timestamp: 1000,
        step: 0,
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn update_run_sets_name_status_and_tag() {
    let (_dir, experiments, runs) = services().await;
    let (_, run_id) = create_run(&experiments, &runs, "before", 1).await;

    let updated = runs
        .update_run(&UpdateRunRequest {
            run_id: run_id.clone(),
            status: Some("FINISHED".to_string()),
            end_time: Some(2000),
            run_name: Some("after".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(updated.info.run_name, "after");
    assert_eq!(updated.info.status, "FINISHED");
    assert_eq!(updated.info.end_time, Some(2000));
    assert!(
        updated
            .data
            .tags
            .iter()
            .any(|tag| tag.key == "mlflow.runName" && tag.value == "after")
    );

    let err = runs
        .update_run(&UpdateRunRequest {
            run_id,
            status: Some("NOT_A_STATUS".to_string()),
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("invalid status"));
}

#[tokio::test]
async fn search_paging_returns_token_only_when_page_full() {
    let (_dir, experiments, runs) = services().await;
    let (experiment_id, _) = create_run(&experiments, &runs, "r0", 10).await;
    for i in 1..5 {
        runs.create_run(&CreateRunRequest {
            experiment_id: experiment_id.clone(),
            run_name: format!("r{i}"),
            start_time: 10 + i,
            ..Default::default()
        })
        .await
        .unwrap();
    }

    let page = runs
        .search_runs(&SearchRunsRequest {
            experiment_ids: vec![experiment_id.clone()],
            max_results: 2,
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(page.runs.len(), 2);
    let token = page.next_page_token.expect("full page carries a token");

    let rest = runs
        .search_runs(&SearchRunsRequest {
            experiment_ids: vec![experiment_id],
            max_results: 10,
            page_token: Some(token),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rest.runs.len(), 3);
    assert!(rest.next_page_token.is_none());
}

#[tokio::test]
async fn oversized_max_results_is_rejected() {
    let (_dir, _experiments, runs) = services().await;
    let err = runs
        .search_runs(&SearchRunsRequest {
            max_results: 50_001,
            ..Default::default()
        })
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Invalid value for parameter 'max_results' supplied."
    );
}
