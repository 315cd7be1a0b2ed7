//! Dashboard service flows: JSON endpoints and streamed searches.

use std::sync::Arc;
use tracklab_api::encoding::{TreeValue, decode_tree};
use tracklab_api::request::{
    CreateAppRequest, CreateDashboardRequest, CreateExperimentRequest, CreateRunRequest,
    DashboardUpdateRunRequest, LogMetricRequest, MetricSearchQuery, MetricValue, RunSearchQuery,
};
use tracklab_api::{ApiError, DashboardService, ExperimentService, RunService};
use tracklab_metadata::{MetadataStore, SqliteStore};

struct Fixture {
    _dir: tempfile::TempDir,
    experiments: ExperimentService,
    runs: RunService,
    dashboard: DashboardService,
}

async fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        SqliteStore::new(dir.path().join("metadata.db"), None)
            .await
            .unwrap(),
    ) as Arc<dyn MetadataStore>;
    let artifact_root = dir.path().join("artifacts").display().to_string();
    Fixture {
        _dir: dir,
        experiments: ExperimentService::new(store.clone(), artifact_root),
        runs: RunService::new(store.clone()),
        dashboard: DashboardService::new(store),
    }
}

impl Fixture {
    async fn seed_run(&self, name: &str, start_time: i64) -> String {
        let experiment = match self
            .experiments
            .create_experiment(&CreateExperimentRequest {
                name: "E1".to_string(),
                ..Default::default()
            })
            .await
        {
            Ok(experiment) => experiment.experiment_id,
            Err(_) => "1".to_string(),
        };
        self.runs
            .create_run(&CreateRunRequest {
                experiment_id: experiment,
                run_name: name.to_string(),
                start_time,
                ..Default::default()
            })
            .await
            .unwrap()
            .info
            .run_id
    }

    async fn log(&self, run_id: &str, key: &str, value: f64, timestamp: i64, step: i64) {
        self.runs
            .log_metric(&LogMetricRequest {
                run_id: run_id.to_string(),
                key: key.to_string(),
                value: MetricValue::Number(value),
                timestamp,
                step,
            })
            .await
            .unwrap();
    }
}

fn leaf<'a>(
    leaves: &'a [(Vec<String>, TreeValue)],
    path: &[&str],
) -> Option<&'a TreeValue> {
    leaves
        .iter()
        .find(|(p, _)| p.iter().map(String::as_str).eq(path.iter().copied()))
        .map(|(_, v)| v)
}

#[tokio::test]
async fn streamed_run_search_encodes_props_and_progress() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("TestRun1", 123_456_789).await;
    fixture.log(&run_id, "loss", 0.5, 1000, 3).await;

    let mut buf = Vec::new();
    fixture
        .dashboard
        .search_runs(&RunSearchQuery::default(), 0, &mut buf)
        .await
        .unwrap();

    let leaves = decode_tree(&buf).unwrap();
    assert_eq!(
        leaf(&leaves, &[&run_id, "props", "name"]),
        Some(&TreeValue::from("TestRun1"))
    );
    assert_eq!(
        leaf(&leaves, &[&run_id, "props", "archived"]),
        Some(&TreeValue::Bool(false))
    );
    assert_eq!(
        leaf(&leaves, &[&run_id, "props", "active"]),
        Some(&TreeValue::Bool(true))
    );
    assert_eq!(
        leaf(&leaves, &[&run_id, "props", "experiment", "name"]),
        Some(&TreeValue::from("E1"))
    );
    assert_eq!(
        leaf(
            &leaves,
            &[&run_id, "traces", "metric", "0", "last_value", "last"]
        ),
        Some(&TreeValue::Float(0.5))
    );
    // per-run progress and the unconditional trailing [total, total]
    assert_eq!(
        leaf(&leaves, &["progress_0", "0"]),
        Some(&TreeValue::Int(1))
    );
    assert_eq!(
        leaf(&leaves, &["progress_1", "0"]),
        Some(&TreeValue::Int(1))
    );
    assert_eq!(
        leaf(&leaves, &["progress_1", "1"]),
        Some(&TreeValue::Int(1))
    );
}

#[tokio::test]
async fn streamed_run_search_respects_excludes() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("r", 1).await;
    fixture.log(&run_id, "loss", 0.5, 1000, 3).await;

    let mut buf = Vec::new();
    fixture
        .dashboard
        .search_runs(
            &RunSearchQuery {
                exclude_params: true,
                exclude_traces: true,
                report_progress: false,
                ..Default::default()
            },
            0,
            &mut buf,
        )
        .await
        .unwrap();

    let leaves = decode_tree(&buf).unwrap();
    assert!(leaf(&leaves, &[&run_id, "props", "name"]).is_some());
    assert!(leaves.iter().all(|(p, _)| !p.contains(&"traces".to_string())));
    assert!(leaves.iter().all(|(p, _)| !p.contains(&"params".to_string())));
    assert!(leaves.iter().all(|(p, _)| !p[0].starts_with("progress_")));
}

#[tokio::test]
async fn streamed_metric_search_requires_metric_predicate() {
    let fixture = fixture().await;
    fixture.seed_run("r", 1).await;

    let mut buf = Vec::new();
    let err = fixture
        .dashboard
        .search_metrics(
            &MetricSearchQuery {
                q: "run.name == 'r'".to_string(),
                ..Default::default()
            },
            0,
            &mut buf,
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No metrics are selected");
    assert!(buf.is_empty());
}

#[tokio::test]
async fn streamed_metric_search_emits_numpy_series() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("r", 1).await;
    for i in 0..10 {
        fixture
            .log(&run_id, "loss", f64::from(i), 1000 + i64::from(i), i64::from(i))
            .await;
    }

    let mut buf = Vec::new();
    fixture
        .dashboard
        .search_metrics(
            &MetricSearchQuery {
                q: "metric.name == 'loss'".to_string(),
                ..Default::default()
            },
            0,
            &mut buf,
        )
        .await
        .unwrap();

    let leaves = decode_tree(&buf).unwrap();
    // run info record first
    assert!(leaf(&leaves, &[&run_id, "props", "name"]).is_some());
    // traces record carries numpy envelopes
    assert_eq!(
        leaf(&leaves, &[&run_id, "traces", "0", "name"]),
        Some(&TreeValue::from("loss"))
    );
    assert_eq!(
        leaf(&leaves, &[&run_id, "traces", "0", "values", "dtype"]),
        Some(&TreeValue::from("float64"))
    );
    match leaf(&leaves, &[&run_id, "traces", "0", "values", "blob"]) {
        Some(TreeValue::Bytes(blob)) => assert_eq!(blob.len() % 8, 0),
        other => panic!("expected blob, got {other:?}"),
    }
    // trailing progress record
    assert!(leaves.iter().any(|(p, _)| p[0].starts_with("progress_")));
}

#[tokio::test]
async fn dashboard_update_run_archives_and_renames() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("before", 1).await;

    fixture
        .dashboard
        .update_run(
            &run_id,
            &DashboardUpdateRunRequest {
                name: Some("after".to_string()),
                description: None,
                archived: Some(true),
            },
        )
        .await
        .unwrap();

    let run = fixture.runs.get_run(&run_id).await.unwrap();
    assert_eq!(run.info.run_name, "after");
    assert_eq!(
        run.info.lifecycle_stage,
        tracklab_metadata::models::LifecycleStage::Deleted
    );

    let err = fixture
        .dashboard
        .update_run("missing", &DashboardUpdateRunRequest::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ResourceDoesNotExist(_)));
}

#[tokio::test]
async fn experiment_listing_and_activity() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("r", 86_400_000 + 1).await;
    fixture.seed_run("r2", 86_400_000 + 2).await;
    fixture
        .dashboard
        .archive_batch(&[run_id], true)
        .await
        .unwrap();

    let experiments = fixture.dashboard.experiments().await.unwrap();
    assert_eq!(experiments.len(), 1);
    assert_eq!(experiments[0].run_count, 2);

    let activity = fixture
        .dashboard
        .experiment_activity("1", 0)
        .await
        .unwrap();
    assert_eq!(activity.num_runs, 2);
    assert_eq!(activity.num_archived_runs, 1);
    assert_eq!(activity.num_active_runs, 1);
    assert_eq!(activity.activity_map.get("1970-01-02T00:00:00"), Some(&2));
}

#[tokio::test]
async fn run_info_reports_params_tags_and_metric_names() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("r", 1).await;
    fixture.log(&run_id, "loss", 0.5, 1000, 1).await;

    let info = fixture.dashboard.run_info(&run_id, &[]).await.unwrap();
    assert_eq!(info["props"]["name"], "r");
    assert_eq!(info["traces"]["metric"][0]["name"], "loss");
    assert_eq!(info["params"]["tags"]["mlflow.runName"], "r");

    let err = fixture
        .dashboard
        .run_info(&run_id, &["bogus".to_string()])
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "\"bogus\" is not a valid Sequence");
}

#[tokio::test]
async fn run_metric_batch_returns_series_in_request_order() {
    let fixture = fixture().await;
    let run_id = fixture.seed_run("r", 1).await;
    fixture.log(&run_id, "a", 1.0, 1000, 1).await;
    fixture.log(&run_id, "b", 2.0, 1000, 1).await;

    let series = fixture
        .dashboard
        .run_metric_batch(&run_id, &["b".to_string(), "a".to_string()])
        .await
        .unwrap();
    assert_eq!(series.len(), 2);
    assert_eq!(series[0].name, "b");
    assert_eq!(series[0].values, vec![Some(2.0)]);
    assert_eq!(series[1].name, "a");
    assert_eq!(series[1].iters, vec![1]);
}

#[tokio::test]
async fn dashboards_and_apps_crud_round_trip() {
    let fixture = fixture().await;

    let app = fixture
        .dashboard
        .create_app(&CreateAppRequest {
            app_type: "explorer".to_string(),
            state: serde_json::json!({"view": "metrics"}),
        })
        .await
        .unwrap();
    assert_eq!(app.state["view"], "metrics");

    let dashboard = fixture
        .dashboard
        .create_dashboard(&CreateDashboardRequest {
            name: "main".to_string(),
            description: "primary view".to_string(),
            app_id: Some(app.id.parse().unwrap()),
        })
        .await
        .unwrap();
    assert_eq!(dashboard.app_id.as_deref(), Some(app.id.as_str()));

    assert_eq!(fixture.dashboard.list_dashboards().await.unwrap().len(), 1);

    fixture
        .dashboard
        .delete_dashboard(&dashboard.id)
        .await
        .unwrap();
    assert!(fixture.dashboard.list_dashboards().await.unwrap().is_empty());
    let err = fixture
        .dashboard
        .get_dashboard(&dashboard.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ResourceDoesNotExist(_)));
}
