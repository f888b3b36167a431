use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::json;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use stratgrid::launcher::StaticAccounts;
use stratgrid::models::{Account, ParameterSpec, StrategyDefinition};
use stratgrid::{
    EngineLauncher, EngineOutcome, EngineRun, OptimizerContext, OptimizerSettings, Track,
    TrackStatus,
};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn ensure_test_env() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

fn result_json(final_equity: i64) -> String {
    json!({
        "Statistics": { "Net Profit": format!("{}%", (final_equity - 1000) / 10), "Total Fees": "$-1.00" },
        "Charts": {
            "Strategy Equity": {
                "Series": {
                    "Equity": { "Values": [
                        { "x": 1577836800, "y": 1000 },
                        { "x": 1577923200, "y": 990 },
                        { "x": 1578009600, "y": final_equity }
                    ] }
                }
            }
        },
        "TotalPerformance": {
            "ClosedTrades": [{
                "Symbol": "SPY",
                "EntryTime": "2020-01-01T00:00:00Z",
                "ExitTime": "2020-01-03T00:00:00Z",
                "ProfitLoss": final_equity - 1000,
                "TotalFees": 1,
                "MAE": -10,
                "MFE": 25
            }]
        }
    })
    .to_string()
}

/// Fake engine that counts concurrent runs and can be held until released.
struct FakeEngine {
    running: AtomicUsize,
    max_running: AtomicUsize,
    started: AtomicUsize,
    delay: Duration,
    hold: Option<Arc<Semaphore>>,
    fail_value: Option<String>,
    panic_value: Option<String>,
}

impl FakeEngine {
    fn new(delay: Duration) -> Self {
        Self {
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            started: AtomicUsize::new(0),
            delay,
            hold: None,
            fail_value: None,
            panic_value: None,
        }
    }
}

#[async_trait]
impl EngineLauncher for FakeEngine {
    async fn run(&self, run: EngineRun, _cancel: CancellationToken) -> Result<EngineOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        if let Some(hold) = &self.hold {
            let permit = hold.acquire().await?;
            permit.forget();
        }
        tokio::time::sleep(self.delay).await;
        self.running.fetch_sub(1, Ordering::SeqCst);

        let value = run
            .definition
            .parameters
            .first()
            .map(|p| p.value.clone())
            .unwrap_or_default();
        if self.fail_value.as_deref() == Some(value.as_str()) {
            return Err(anyhow!("engine crashed on {}", value));
        }
        if self.panic_value.as_deref() == Some(value.as_str()) {
            panic!("engine panicked on {}", value);
        }

        let final_equity = 1000 + value.parse::<i64>().unwrap_or(1) * 10;
        Ok(EngineOutcome::success(
            result_json(final_equity),
            format!("log for {}", run.track_name),
        ))
    }
}

fn settings(dir: &Path) -> OptimizerSettings {
    OptimizerSettings {
        max_backtests: 3,
        data_folder: dir.to_path_buf(),
        ..OptimizerSettings::default()
    }
}

fn accounts() -> Arc<StaticAccounts> {
    Arc::new(StaticAccounts::new(vec![Account {
        name: "Paper".to_string(),
        ..Account::default()
    }]))
}

fn definition(range: &str) -> StrategyDefinition {
    let mut definition = StrategyDefinition::new(
        "Grid",
        NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
    );
    definition.account = Some("Paper".to_string());
    definition.algorithm_name = Some("GridAlgorithm".to_string());
    definition.parameters = vec![ParameterSpec::ranged("step", range)];
    definition
}

fn tracks(count: usize) -> Vec<Track> {
    let range: Vec<String> = (1..=count).map(|i| i.to_string()).collect();
    stratgrid::param_grid::expand(&definition(&range.join(",")))
        .into_iter()
        .map(Track::new)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrency_never_exceeds_limit() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new(Duration::from_millis(20)));
    let ctx = OptimizerContext::new(settings(dir.path()), engine.clone(), accounts());

    let report = ctx
        .batch_launcher()
        .run_all(tracks(10), 3, CancellationToken::new())
        .await?;

    assert!(engine.max_running.load(Ordering::SeqCst) <= 3);
    assert_eq!(engine.started.load(Ordering::SeqCst), 10);
    assert_eq!(report.dispatched, 10);
    assert_eq!(report.succeeded, 10);
    assert_eq!(report.status, Some(TrackStatus::Success));

    let names: Vec<&str> = report.tracks.iter().map(|t| t.name.as_str()).collect();
    let expected: Vec<String> = (1..=10).map(|i| i.to_string()).collect();
    assert_eq!(names, expected.iter().map(String::as_str).collect::<Vec<_>>());

    let refs: HashSet<&str> = report
        .tracks
        .iter()
        .filter_map(|t| t.archive_ref.as_deref())
        .collect();
    assert_eq!(refs.len(), 10);
    assert!(report.tracks.iter().all(|t| t.result.is_empty() && t.statistics.is_some()));

    let snapshot = ctx.status().snapshot();
    assert_eq!(snapshot.completed_tracks, 10);
    assert_eq!(snapshot.phase, "Completed");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_stops_dispatch_and_awaits_started_tracks() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let hold = Arc::new(Semaphore::new(0));
    let engine = Arc::new(FakeEngine {
        hold: Some(Arc::clone(&hold)),
        ..FakeEngine::new(Duration::from_millis(1))
    });
    let ctx = OptimizerContext::new(settings(dir.path()), engine.clone(), accounts());
    let cancel = CancellationToken::new();

    let launcher = ctx.batch_launcher();
    let batch_cancel = cancel.clone();
    let batch = tokio::spawn(async move { launcher.run_all(tracks(10), 2, batch_cancel).await });

    while engine.started.load(Ordering::SeqCst) < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cancel.cancel();
    hold.add_permits(10);

    let report = batch.await??;
    assert_eq!(engine.started.load(Ordering::SeqCst), 2);
    assert_eq!(report.dispatched, 2);
    assert_eq!(report.undispatched(), 8);
    assert_eq!(report.tracks.len(), 10);
    assert!(report.tracks[..2].iter().all(|t| t.status().is_terminal()));
    assert!(report.tracks[2..]
        .iter()
        .all(|t| t.status() == TrackStatus::Created));
    assert_eq!(report.tracks[2].name, "3");
    assert_eq!(ctx.status().snapshot().phase, "Cancelled");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_failure_does_not_affect_siblings() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine {
        fail_value: Some("2".to_string()),
        ..FakeEngine::new(Duration::from_millis(1))
    });
    let ctx = OptimizerContext::new(settings(dir.path()), engine, accounts());

    let report = ctx
        .batch_launcher()
        .run_all(tracks(4), 2, CancellationToken::new())
        .await?;

    assert_eq!(report.succeeded, 3);
    assert_eq!(report.failed, 1);
    assert_eq!(report.status, Some(TrackStatus::Error));
    let failed = &report.tracks[1];
    assert_eq!(failed.status(), TrackStatus::Error);
    assert!(failed.error.as_deref().unwrap_or_default().contains("engine crashed"));
    assert!(failed.statistics.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn engine_panic_is_reported_as_failed_track() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine {
        panic_value: Some("2".to_string()),
        ..FakeEngine::new(Duration::from_millis(1))
    });
    let ctx = OptimizerContext::new(settings(dir.path()), engine, accounts());

    let report = ctx
        .batch_launcher()
        .run_all(tracks(3), 2, CancellationToken::new())
        .await?;

    assert_eq!(report.tracks.len(), 3);
    assert_eq!(report.dispatched, 3);
    assert_eq!(report.undispatched(), 0);
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.status, Some(TrackStatus::Error));

    let names: Vec<&str> = report.tracks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["1", "2", "3"]);
    let crashed = &report.tracks[1];
    assert_eq!(crashed.status(), TrackStatus::Error);
    assert!(!crashed.is_active());
    assert!(crashed.error.as_deref().unwrap_or_default().contains("panicked"));

    let snapshot = ctx.status().snapshot();
    assert_eq!(snapshot.failed_tracks, 1);
    assert_eq!(snapshot.completed_tracks, 2);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_account_fails_every_track_without_engine_call() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new(Duration::from_millis(1)));
    let ctx = OptimizerContext::new(settings(dir.path()), engine.clone(), accounts());

    let mut definition = definition("1,2,3");
    definition.account = None;
    let report = ctx
        .batch_launcher()
        .optimize(&definition, CancellationToken::new())
        .await?;

    assert_eq!(report.failed, 3);
    assert_eq!(engine.started.load(Ordering::SeqCst), 0);
    assert!(report
        .tracks
        .iter()
        .all(|t| t.error.as_deref() == Some("Account is not defined")));
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn optimize_ranks_grid_and_collects_orphans() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let engine = Arc::new(FakeEngine::new(Duration::from_millis(1)));
    let ctx = OptimizerContext::new(settings(dir.path()), engine, accounts());

    let mut definition = definition("5,20,10");
    definition
        .parameters
        .push(ParameterSpec::ranged("mode", "fast,slow"));
    let report = ctx
        .batch_launcher()
        .optimize(&definition, CancellationToken::new())
        .await?;

    let names: Vec<&str> = report.tracks.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["5 fast", "5 slow", "20 fast", "20 slow", "10 fast", "10 slow"]
    );

    let ranked = report.ranked();
    assert_eq!(ranked.len(), 6);
    assert!(ranked
        .windows(2)
        .all(|pair| pair[0].score() >= pair[1].score()));
    assert!(ranked[0].name.starts_with("20"));
    assert_eq!(ctx.status().snapshot().best_score, ranked[0].score());

    let mut best = ranked[0].clone();
    let details = best.load_details(&ctx.archiver()).map(|d| d.clone());
    let details = details.ok_or_else(|| anyhow!("missing details"))?;
    assert_eq!(details.trades.len(), 1);
    assert_eq!(details.logs, format!("log for {}", best.name));

    let kept = vec![best];
    assert_eq!(ctx.collect_orphans(&kept)?, 5);
    assert_eq!(ctx.collect_orphans(&kept)?, 0);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unusable_archive_folder_aborts_batch() -> Result<()> {
    ensure_test_env();
    let dir = tempfile::tempdir()?;
    let blocker = dir.path().join("not-a-folder");
    std::fs::write(&blocker, b"file")?;

    let engine = Arc::new(FakeEngine::new(Duration::from_millis(1)));
    let ctx = OptimizerContext::new(settings(&blocker), engine.clone(), accounts());

    let outcome = ctx
        .batch_launcher()
        .run_all(tracks(2), 2, CancellationToken::new())
        .await;
    assert!(outcome.is_err());
    assert_eq!(engine.started.load(Ordering::SeqCst), 0);
    Ok(())
}
