// tests/monitor.rs

use std::error::Error;

use runplane::cluster::{ClusterErrorKind, InMemoryCluster, ObjectKey, ObjectKind};
use runplane::types::{RunnableState, State};
use runplane_test_utils::{FlakyCluster, Fixture, init_tracing};

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn one_failing_refresh_does_not_stop_the_cycle() -> TestResult {
    init_tracing();

    let flaky = FlakyCluster::new(InMemoryCluster::new());
    let fx = Fixture::builder().flaky(flaky.clone()).start().await;

    for id in ["alpha", "bravo", "charlie"] {
        let run = fx.container_job(id, "busybox");
        fx.engine.launch(&run).await?;
        fx.wait_for_run(id, State::Running).await;
    }

    // Reads of bravo's job now fail; the others keep working.
    flaky.fail_on("get", "job-bravo", ClusterErrorKind::Unavailable);
    fx.cluster.complete_all_jobs();

    let report = fx.engine.monitor_now().await?;
    assert_eq!(report.examined, 3);
    assert_eq!(report.refreshed, 2);
    assert_eq!(report.changed, 2);
    assert_eq!(report.failed, vec!["bravo".to_string()]);
    assert!(!report.skipped);

    fx.wait_for_run("alpha", State::Completed).await;
    fx.wait_for_run("charlie", State::Completed).await;

    let bravo = fx.engine.runnable("bravo")?.ok_or("bravo missing")?;
    assert_eq!(bravo.state, RunnableState::Running);
    assert_eq!(fx.engine.run("bravo")?.map(|r| r.state()), Some(State::Running));

    // Once the backend answers again the next cycle catches up.
    flaky.heal();
    let report = fx.engine.monitor_now().await?;
    assert_eq!(report.examined, 1);
    assert!(report.failed.is_empty());
    fx.wait_for_run("bravo", State::Completed).await;

    fx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn vanished_job_marks_the_run_as_failed() -> TestResult {
    init_tracing();

    let fx = Fixture::start().await;
    let run = fx.container_job("ghost", "busybox");
    fx.engine.launch(&run).await?;
    fx.wait_for_run("ghost", State::Running).await;

    let key = ObjectKey::new(ObjectKind::Job, fx.namespace(), "runplane-job-ghost");
    assert!(fx.cluster.remove(&key).is_some());

    let report = fx.engine.monitor_now().await?;
    assert_eq!(report.changed, 1);

    let run = fx.wait_for_run("ghost", State::Error).await;
    assert_eq!(run.status.extra["error"]["code"], "NotFound");

    fx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn still_running_jobs_keep_the_run_running() -> TestResult {
    init_tracing();

    let fx = Fixture::start().await;
    let run = fx.container_job("slow", "busybox");
    fx.engine.launch(&run).await?;
    fx.wait_for_run("slow", State::Running).await;

    for _ in 0..3 {
        let report = fx.engine.monitor_now().await?;
        assert_eq!(report.refreshed, 1);
        assert_eq!(report.changed, 0);
    }

    let runnable = fx.engine.runnable("slow")?.ok_or("runnable missing")?;
    assert_eq!(runnable.state, RunnableState::Running);
    assert!(runnable.results.contains_key("job_status"));
    assert_eq!(fx.engine.run("slow")?.map(|r| r.state()), Some(State::Running));

    fx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn refresh_on_demand_reads_any_state() -> TestResult {
    init_tracing();

    let fx = Fixture::start().await;
    assert!(fx.engine.refresh("unknown").await?.is_none());

    let run = fx.container_job("r1", "busybox");
    fx.engine.launch(&run).await?;
    fx.wait_for_run("r1", State::Running).await;
    fx.cluster.complete_job(fx.namespace(), "runplane-job-r1");

    let refreshed = fx.engine.refresh("r1").await?.ok_or("runnable missing")?;
    assert_eq!(refreshed.state, RunnableState::Completed);
    fx.wait_for_run("r1", State::Completed).await;

    fx.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn backend_timeouts_are_reported_per_runnable() -> TestResult {
    init_tracing();

    let flaky = FlakyCluster::new(InMemoryCluster::new());
    let fx = Fixture::builder().flaky(flaky.clone()).start().await;
    let run = fx.container_job("r1", "busybox");
    fx.engine.launch(&run).await?;
    fx.wait_for_run("r1", State::Running).await;

    flaky.fail_on("*", "", ClusterErrorKind::Timeout);
    let err = fx.engine.refresh("r1").await.unwrap_err();
    assert!(err.to_string().contains("Timeout"), "got {err}");

    let runnable = fx.engine.runnable("r1")?.ok_or("runnable missing")?;
    assert_eq!(runnable.state, RunnableState::Running);

    fx.shutdown().await;
    Ok(())
}
