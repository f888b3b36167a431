use crate::archive::{read_statistics, ResultArchiver};
use crate::config::OptimizerSettings;
use crate::details::TrackDetails;
use crate::error::TrackError;
use crate::launcher::{AccountResolver, EngineLauncher, EngineOutcome, EngineRun, EngineStatus};
use crate::models::{BacktestResult, StatisticsMap, StrategyDefinition};
use crate::param_grid;
use log::{error, info, warn};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TrackStatus {
    Created,
    Running,
    Success,
    Error,
    Aborted,
}

impl TrackStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error | Self::Aborted)
    }

    fn can_transition_to(self, next: TrackStatus) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running)
                | (Self::Running, Self::Success)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Aborted)
        )
    }
}

/// Collaborators a track needs while running.
#[derive(Clone)]
pub struct TrackContext {
    pub launcher: Arc<dyn EngineLauncher>,
    pub accounts: Arc<dyn AccountResolver>,
    pub archiver: Arc<ResultArchiver>,
    pub settings: Arc<OptimizerSettings>,
    pub batch_cancel: CancellationToken,
}

/// Cloneable control over a track that is owned elsewhere.
#[derive(Debug, Clone)]
pub struct TrackHandle {
    pub id: Uuid,
    pub name: String,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
}

impl TrackHandle {
    /// Requests cooperative cancellation. The engine call is not interrupted.
    pub fn abort(&self) {
        self.cancel.cancel();
        self.active.store(false, Ordering::SeqCst);
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

#[derive(Debug, Clone)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub definition: StrategyDefinition,
    status: TrackStatus,
    active: Arc<AtomicBool>,
    cancel: CancellationToken,
    pub result: String,
    pub logs: String,
    pub statistics: Option<StatisticsMap>,
    pub archive_ref: Option<String>,
    pub error: Option<String>,
    pub details: Option<TrackDetails>,
}

impl Track {
    pub fn new(definition: StrategyDefinition) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: param_grid::track_name(&definition),
            definition,
            status: TrackStatus::Created,
            active: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            result: String::new(),
            logs: String::new(),
            statistics: None,
            archive_ref: None,
            error: None,
            details: None,
        }
    }

    pub fn status(&self) -> TrackStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> TrackHandle {
        TrackHandle {
            id: self.id,
            name: self.name.clone(),
            active: Arc::clone(&self.active),
            cancel: self.cancel.clone(),
        }
    }

    pub fn abort(&self) {
        self.handle().abort();
    }

    pub fn score(&self) -> Option<Decimal> {
        self.statistics
            .as_ref()
            .and_then(|stats| stats.get("Score").copied().flatten())
    }

    pub fn transition(&mut self, next: TrackStatus) -> Result<(), TrackError> {
        if !self.status.can_transition_to(next) {
            return Err(TrackError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    fn clear_run_data(&mut self) {
        self.result.clear();
        self.logs.clear();
        self.statistics = None;
        self.archive_ref = None;
        self.error = None;
        self.details = None;
    }

    fn finish(&mut self, status: TrackStatus) {
        if let Err(e) = self.transition(status) {
            error!("Track {}: {}", self.name, e);
        }
        self.active.store(false, Ordering::SeqCst);
        info!("Track {} finished: {:?}", self.name, self.status);
    }

    fn fail(&mut self, err: TrackError) {
        warn!("Track {} failed: {}", self.name, err);
        self.error = Some(err.to_string());
        self.finish(TrackStatus::Error);
    }

    /// Marks a track whose run task died without reporting back.
    pub(crate) fn record_crash(&mut self, message: String) {
        if self.status == TrackStatus::Created {
            self.status = TrackStatus::Running;
        }
        self.fail(TrackError::Panicked(message));
    }

    /// Runs the track to a terminal state. Failures are recorded on the
    /// track and never returned.
    pub async fn run(&mut self, ctx: &TrackContext) -> TrackStatus {
        if let Err(e) = self.transition(TrackStatus::Running) {
            warn!("Track {} not started: {}", self.name, e);
            return self.status;
        }
        self.active.store(true, Ordering::SeqCst);
        self.clear_run_data();

        if self.cancel.is_cancelled() || ctx.batch_cancel.is_cancelled() {
            self.finish(TrackStatus::Aborted);
            return self.status;
        }

        let account_name = match self.definition.account.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => {
                self.fail(TrackError::AccountNotDefined);
                return self.status;
            }
        };

        let account = ctx.accounts.find_account(&account_name);
        if account.is_none() {
            warn!("Track {}: account {} not found", self.name, account_name);
        }

        let run = EngineRun {
            track_name: self.name.clone(),
            definition: self.definition.clone(),
            account,
            settings: Arc::clone(&ctx.settings),
        };

        match self.launch(ctx, run).await {
            Err(e) => self.fail(e),
            Ok(_) if self.cancel.is_cancelled() => self.finish(TrackStatus::Aborted),
            Ok(outcome) => {
                let status = match outcome.status {
                    EngineStatus::Success => TrackStatus::Success,
                    EngineStatus::Error => TrackStatus::Error,
                };
                self.result = outcome.result;
                self.logs = outcome.logs;
                self.archive_result(&ctx.archiver).await;
                self.finish(status);
            }
        }

        self.status
    }

    async fn launch(&self, ctx: &TrackContext, run: EngineRun) -> Result<EngineOutcome, TrackError> {
        let engine = ctx.launcher.run(run, self.cancel.clone());
        tokio::pin!(engine);

        let Some(limit) = ctx.settings.engine_timeout else {
            return engine.await.map_err(|e| TrackError::Engine(format!("{:#}", e)));
        };

        tokio::select! {
            outcome = &mut engine => outcome.map_err(|e| TrackError::Engine(format!("{:#}", e))),
            _ = tokio::time::sleep(limit) => {
                self.cancel.cancel();
                if let Err(e) = engine.await {
                    warn!("Track {} engine returned after timeout: {:#}", self.name, e);
                }
                Err(TrackError::Timeout(limit))
            }
        }
    }

    /// Moves the raw payload into an archive. On failure the payload stays in
    /// memory and statistics are derived from it directly.
    async fn archive_result(&mut self, archiver: &Arc<ResultArchiver>) {
        if self.result.trim().is_empty() {
            return;
        }

        let archiver = Arc::clone(archiver);
        let result = self.result.clone();
        let logs = self.logs.clone();
        let archived = tokio::task::spawn_blocking(move || archiver.archive(&result, &logs)).await;

        match archived {
            Ok(Ok(Some(outcome))) => {
                self.archive_ref = Some(outcome.archive_ref);
                self.statistics = Some(outcome.statistics);
                self.result.clear();
                self.logs.clear();
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                error!("Track {} archive failed: {}", self.name, e);
                self.statistics = Some(statistics_from_raw(&self.result));
            }
            Err(e) => {
                error!("Track {} archive task failed: {}", self.name, e);
                self.statistics = Some(statistics_from_raw(&self.result));
            }
        }
    }

    /// Reads the archive back. Trades are dropped when the archived result no
    /// longer reproduces the stored statistics.
    pub fn load_details(&mut self, archiver: &ResultArchiver) -> Option<&TrackDetails> {
        let archive_ref = self.archive_ref.clone()?;
        let details = match archiver.read_result(&archive_ref) {
            Some((result, logs)) => {
                let mut details = TrackDetails::from_result(&result, logs, &self.definition);
                if self.statistics.as_ref() != Some(&read_statistics(&result)) {
                    warn!(
                        "Track {} archive {} does not match stored statistics",
                        self.name, archive_ref
                    );
                    details.trades.clear();
                    details.symbols.clear();
                }
                details
            }
            None => TrackDetails::default(),
        };

        self.details = Some(details);
        self.details.as_ref()
    }
}

fn statistics_from_raw(raw: &str) -> StatisticsMap {
    BacktestResult::from_json(raw)
        .map(|result| read_statistics(&result))
        .unwrap_or_default()
}
