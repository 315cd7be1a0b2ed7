//! Compiled searches executed against a real SQLite store.

mod common;

use common::{experiment, metric, run, sqlite_store};
use tracklab_metadata::models::TagRow;
use tracklab_metadata::query::expr::{DefaultExpression, QueryParser, Tables};
use tracklab_metadata::query::filter::{RunSearchParams, compile_run_search};
use tracklab_metadata::query::{Dialect, Select};
use tracklab_metadata::repos::{
    ExperimentRepo, MetricRepo, ParamRepo, RunRepo, SearchRepo, TagRepo,
};

fn dashboard_parser() -> QueryParser {
    QueryParser {
        default: DefaultExpression {
            contains: "run.archived".to_string(),
            expression: "not run.archived".to_string(),
        },
        tables: Tables::default(),
        tz_offset: 0,
        dialect: Dialect::Sqlite,
    }
}

#[tokio::test]
async fn tracking_filter_on_start_time_selects_one_run() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let target = store
        .create_run(&run(exp_id, "TestRun1", 123_456_789))
        .await
        .unwrap();
    store.create_run(&run(exp_id, "other", 42)).await.unwrap();

    let compiled = compile_run_search(
        &RunSearchParams {
            experiment_ids: vec![exp_id],
            filter: "attributes.start_time = 123456789".to_string(),
            ..Default::default()
        },
        Dialect::Sqlite,
    )
    .unwrap();

    let runs = store.search_runs(&compiled.select).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_uuid, target.run_uuid);
}

#[tokio::test]
async fn tracking_filter_on_run_name_goes_through_tag_join() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let target = store.create_run(&run(exp_id, "TestRun1", 1)).await.unwrap();
    let other = store.create_run(&run(exp_id, "Another", 2)).await.unwrap();
    for r in [&target, &other] {
        store
            .set_run_tags_batch(
                &r.run_uuid,
                10,
                &[TagRow {
                    run_uuid: r.run_uuid.clone(),
                    key: "mlflow.runName".to_string(),
                    value: r.name.clone(),
                }],
            )
            .await
            .unwrap();
    }

    let compiled = compile_run_search(
        &RunSearchParams {
            experiment_ids: vec![exp_id],
            filter: "attributes.run_name = 'TestRun1'".to_string(),
            ..Default::default()
        },
        Dialect::Sqlite,
    )
    .unwrap();

    let runs = store.search_runs(&compiled.select).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_uuid, target.run_uuid);
}

#[tokio::test]
async fn tracking_filter_on_metric_and_param() {
    use tracklab_metadata::models::{ParamRow, ParamValue};

    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let hit = store.create_run(&run(exp_id, "hit", 1)).await.unwrap();
    let miss = store.create_run(&run(exp_id, "miss", 2)).await.unwrap();

    store
        .create_metrics_batch(&hit.run_uuid, 10, &[metric("acc", 0.95, 10, 1)])
        .await
        .unwrap();
    store
        .create_metrics_batch(&miss.run_uuid, 10, &[metric("acc", 0.5, 10, 1)])
        .await
        .unwrap();
    store
        .create_params_batch(
            10,
            &[ParamRow::new(
                hit.run_uuid.clone(),
                "lr",
                ParamValue::parse("0.1"),
            )],
        )
        .await
        .unwrap();

    let compiled = compile_run_search(
        &RunSearchParams {
            experiment_ids: vec![exp_id],
            filter: "metrics.acc > 0.9 AND params.lr = '0.1'".to_string(),
            ..Default::default()
        },
        Dialect::Sqlite,
    )
    .unwrap();

    let runs = store.search_runs(&compiled.select).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run_uuid, hit.run_uuid);
}

#[tokio::test]
async fn search_orders_by_start_time_desc_by_default() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    store.create_run(&run(exp_id, "old", 100)).await.unwrap();
    let newest = store.create_run(&run(exp_id, "new", 300)).await.unwrap();
    store.create_run(&run(exp_id, "mid", 200)).await.unwrap();

    let compiled = compile_run_search(
        &RunSearchParams {
            experiment_ids: vec![exp_id],
            ..Default::default()
        },
        Dialect::Sqlite,
    )
    .unwrap();
    let runs = store.search_runs(&compiled.select).await.unwrap();
    assert_eq!(runs[0].run_uuid, newest.run_uuid);
    assert_eq!(runs.len(), 3);
    assert!(runs[0].start_time >= runs[1].start_time);
    assert!(runs[1].start_time >= runs[2].start_time);
}

#[tokio::test]
async fn dashboard_query_filters_on_latest_metric() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let low = store.create_run(&run(exp_id, "low", 1)).await.unwrap();
    let high = store.create_run(&run(exp_id, "high", 2)).await.unwrap();

    store
        .create_metrics_batch(&low.run_uuid, 10, &[metric("m", -2.0, 10, 1)])
        .await
        .unwrap();
    store
        .create_metrics_batch(&high.run_uuid, 10, &[metric("m", 5.0, 10, 1)])
        .await
        .unwrap();

    let parsed = dashboard_parser()
        .parse("run.metrics['m'].last < -1.0")
        .unwrap();
    let runs = store.dashboard_runs(&parsed, None, None).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.run_uuid, low.run_uuid);
    assert_eq!(runs[0].experiment_name, "E1");
}

#[tokio::test]
async fn dashboard_query_excludes_archived_by_default() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let live = store.create_run(&run(exp_id, "live", 1)).await.unwrap();
    let gone = store.create_run(&run(exp_id, "gone", 2)).await.unwrap();
    store.archive_run(&gone.run_uuid, 99).await.unwrap();

    let parsed = dashboard_parser().parse("").unwrap();
    let runs = store.dashboard_runs(&parsed, None, None).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.run_uuid, live.run_uuid);

    // explicitly asking for archived runs flips the default off
    let parsed = dashboard_parser().parse("run.archived == True").unwrap();
    let runs = store.dashboard_runs(&parsed, None, None).await.unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].run.run_uuid, gone.run_uuid);
}

#[tokio::test]
async fn dashboard_paging_is_strictly_below_offset_row_num() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let mut created = Vec::new();
    for i in 0..5 {
        created.push(
            store
                .create_run(&run(exp_id, &format!("r{i}"), i))
                .await
                .unwrap(),
        );
    }

    let parsed = dashboard_parser().parse("").unwrap();
    let offset = store.row_num_for(&created[3].run_uuid).await.unwrap();
    let runs = store.dashboard_runs(&parsed, Some(10), offset).await.unwrap();

    // strictly descending, all below the offset row
    let row_nums: Vec<i64> = runs.iter().map(|r| r.run.row_num).collect();
    assert_eq!(row_nums, vec![2, 1, 0]);
}

#[tokio::test]
async fn dashboard_metric_search_samples_series() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let r = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    let series: Vec<_> = (0..20)
        .map(|i| metric("loss", f64::from(i), 10 + i64::from(i), i64::from(i)))
        .collect();
    store
        .create_metrics_batch(&r.run_uuid, 100, &series)
        .await
        .unwrap();

    let mut qp = dashboard_parser();
    qp.tables.metrics = Some("latest_metrics".to_string());
    let parsed = qp.parse("metric.name == 'loss'").unwrap();
    assert!(parsed.is_metric_selected());

    let rows = store.dashboard_metrics(&parsed, 50, None).await.unwrap();
    // more points than steps would require downsampling; here all survive
    assert_eq!(rows.len(), 20);
    assert!(rows.iter().all(|m| m.metric.key == "loss"));
    assert!(rows.iter().all(|m| m.x_axis_value.is_none()));

    let sampled = store.dashboard_metrics(&parsed, 5, None).await.unwrap();
    assert!(sampled.len() < 20, "expected downsampling, got all rows");
}

#[tokio::test]
async fn aligned_metrics_follow_request_grid() {
    use tracklab_metadata::repos::AlignRequest;

    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    let r = store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    let loss: Vec<_> = (0..10)
        .map(|i| metric("loss", f64::from(i), i64::from(i), i64::from(i)))
        .collect();
    let time: Vec<_> = (0..10)
        .map(|i| metric("wall", f64::from(i) * 0.5, i64::from(i), i64::from(i)))
        .collect();
    store.create_metrics_batch(&r.run_uuid, 100, &loss).await.unwrap();
    store.create_metrics_batch(&r.run_uuid, 100, &time).await.unwrap();

    let rows = store
        .aligned_metrics(
            &[AlignRequest {
                run_id: r.run_uuid.clone(),
                key: "loss".to_string(),
                steps: 10.0,
            }],
            "wall",
        )
        .await
        .unwrap();
    assert!(!rows.is_empty());
    assert!(rows.iter().all(|m| m.key == "loss"));
    assert!(rows.iter().all(|m| m.run_uuid == r.run_uuid));
}

#[tokio::test]
async fn experiment_search_filters_by_name() {
    use tracklab_metadata::query::filter::{ViewType, compile_experiment_search};

    let (_dir, store) = sqlite_store().await;
    store.create_experiment(&experiment("alpha")).await.unwrap();
    store.create_experiment(&experiment("beta")).await.unwrap();

    let select =
        compile_experiment_search("attributes.name LIKE 'al%'", ViewType::ActiveOnly, Dialect::Sqlite)
            .unwrap();
    let experiments = store.search_experiments(&select).await.unwrap();
    assert_eq!(experiments.len(), 1);
    assert_eq!(experiments[0].name, "alpha");
}

#[tokio::test]
async fn raw_select_builder_round_trips() {
    let (_dir, store) = sqlite_store().await;
    let exp_id = store.create_experiment(&experiment("E1")).await.unwrap();
    store.create_run(&run(exp_id, "r", 1)).await.unwrap();

    let mut select = Select::new("runs");
    select.column("runs.*");
    let runs = store.search_runs(&select).await.unwrap();
    assert_eq!(runs.len(), 1);
}
