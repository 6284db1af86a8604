mod utils;
#[allow(unused)]
use utils::*;

use std::time::Duration;
use volley::prelude::*;
use volley::{
    IndeterminateReason, RunOutcome, ThresholdStatus, CHECKS, EXIT_EXTERNAL_ABORT, EXIT_OK,
    EXIT_THRESHOLDS_FAILED, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED,
};

#[scenario]
async fn lookup_the() {
    let responses = batch(vec![Request::get(url("/the"))]).await;
    Checks::new()
        .with("GET status is 200", |r: &Response| r.status == 200)
        .with("Correct body", |r: &Response| {
            let body = r.text();
            body.contains("14_1.txt") && body.contains("14_8.txt")
        })
        .run(&responses[0]);
}

#[scenario]
async fn lookup_faulty() {
    let response = request(Request::get(url("/faulty/50/the")).name("faulty")).await;
    check(&response, "GET status is 200", |r| r.status == 200);
}

#[scenario]
async fn lookup_limited() {
    request(Request::get(url("/limited/20/the"))).await;
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn healthy_service_passes() {
    init();
    let out_dir = tempfile::tempdir().unwrap();

    let report = lookup_the()
        .stage(Duration::from_secs(1), 3)
        .stage(Duration::from_secs(1), 3)
        .stage(Duration::from_millis(500), 0)
        .tick(Duration::from_millis(100))
        .threshold(HTTP_REQ_DURATION, "p(99)<500")
        .threshold(HTTP_REQ_FAILED, "rate<0.01")
        .threshold("checks{check:Correct body}", "rate==1")
        .out_dir(out_dir.path())
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.overall_pass, "{:?}", report.thresholds);
    assert_eq!(report.exit_code(), EXIT_OK);
    assert_eq!(report.vus_max, 3);
    assert!(report.snapshot.get(HTTP_REQS).unwrap().count > 10);
    assert_eq!(report.snapshot.get(CHECKS).unwrap().rate(), 1.);

    let summary: serde_json::Value = serde_json::from_slice(
        &std::fs::read(out_dir.path().join("summary.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(summary["overall_pass"], true);
    assert!(out_dir.path().join("result.html").exists());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn two_percent_errors_fail_the_run() {
    init();

    let report = lookup_faulty()
        .stage(Duration::from_millis(500), 4)
        .stage(Duration::from_secs(2), 4)
        .tick(Duration::from_millis(100))
        .threshold(HTTP_REQ_DURATION, "p(99)<500")
        .threshold(HTTP_REQ_FAILED, "rate<0.01")
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(!report.overall_pass);
    assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);

    let failed: Vec<_> = report.failed().collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].metric.to_string(), HTTP_REQ_FAILED);
    let observed = failed[0].observed.unwrap();
    assert!((0.015..=0.021).contains(&observed), "{observed}");
    assert!(report.snapshot.get(HTTP_REQ_FAILED).unwrap().count >= 50);
    assert!(report.snapshot.get("checks{check:GET status is 200}").is_some());
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn unknown_metric_does_not_fail_the_run() {
    init();

    let report = lookup_the()
        .stage(Duration::from_secs(1), 2)
        .tick(Duration::from_millis(100))
        .threshold("nonexistent_metric", "count>0")
        .threshold("http_req_duration{status:404}", "avg<100")
        .threshold(HTTP_REQ_FAILED, "rate<0.01")
        .await
        .unwrap();

    assert!(report.overall_pass);
    assert_eq!(report.exit_code(), EXIT_OK);

    let statuses: Vec<_> = report
        .thresholds
        .iter()
        .map(|t| (t.metric.to_string(), t.status.clone()))
        .collect();
    assert!(statuses.contains(&(
        "nonexistent_metric".to_string(),
        ThresholdStatus::Indeterminate(IndeterminateReason::MetricNotFound)
    )));
    assert!(statuses.contains(&(
        "http_req_duration{status:404}".to_string(),
        ThresholdStatus::Indeterminate(IndeterminateReason::NoSamples)
    )));
    assert!(statuses.contains(&(HTTP_REQ_FAILED.to_string(), ThresholdStatus::Passed)));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn overload_aborts_the_run() {
    init();

    let report = lookup_limited()
        .stage(Duration::from_secs(60), 5)
        .ramp_start(RampStart::FirstStage)
        .threshold_interval(Duration::from_millis(250))
        .abort_threshold(HTTP_REQ_FAILED, "rate<0.5")
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::ThresholdAborted);
    assert_eq!(report.exit_code(), EXIT_THRESHOLDS_FAILED);
    assert!(report.snapshot.elapsed < Duration::from_secs(30));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn interrupt_stops_the_run() {
    init();

    let report = lookup_the()
        .stage(Duration::from_secs(60), 2)
        .interrupt(tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(report.outcome, RunOutcome::Interrupted);
    assert_eq!(report.exit_code(), EXIT_EXTERNAL_ABORT);
    assert!(report.snapshot.elapsed < Duration::from_secs(10));
}

#[tokio::test]
#[ntest::timeout(30_000)]
async fn scenarios_are_registered_with_the_runtime() {
    init();

    let names: Vec<_> = volley::runtime::VOLLEY_SCENARIOS
        .iter()
        .map(|(name, _)| *name)
        .collect();
    for name in ["lookup_the", "lookup_faulty", "lookup_limited"] {
        assert!(names.contains(&name), "{name} missing from {names:?}");
    }

    let (_, factory) = volley::runtime::VOLLEY_SCENARIOS
        .iter()
        .find(|(name, _)| *name == "lookup_the")
        .unwrap();
    let mut config = RunConfig::new("lookup_the");
    config.stages = vec![Stage::new(Duration::from_secs(1), 1)];
    config.add_threshold(HTTP_REQ_FAILED, "rate<0.01".into());

    let report = factory()
        .configure(config, Box::pin(futures::future::pending()))
        .await
        .unwrap();
    assert_eq!(report.name, "lookup_the");
    assert_eq!(report.exit_code(), EXIT_OK);
}
