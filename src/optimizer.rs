use crate::archive::ResultArchiver;
use crate::config::OptimizerSettings;
use crate::launcher::{AccountResolver, EngineLauncher};
use crate::models::StrategyDefinition;
use crate::optimizer_status::OptimizerStatus;
use crate::param_grid;
use crate::track::{Track, TrackContext, TrackStatus};
use anyhow::{Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct BatchReport {
    /// Dispatched tracks in dispatch order, then the ones never started.
    pub tracks: Vec<Track>,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub aborted: usize,
    /// Worst completion status over dispatched tracks that were not aborted.
    pub status: Option<TrackStatus>,
}

impl BatchReport {
    fn from_tracks(tracks: Vec<Track>, dispatched: usize) -> Self {
        let count = |status: TrackStatus| tracks.iter().filter(|t| t.status() == status).count();
        let succeeded = count(TrackStatus::Success);
        let failed = count(TrackStatus::Error);
        let aborted = count(TrackStatus::Aborted);
        let status = if failed > 0 {
            Some(TrackStatus::Error)
        } else if succeeded > 0 {
            Some(TrackStatus::Success)
        } else {
            None
        };

        Self {
            tracks,
            dispatched,
            succeeded,
            failed,
            aborted,
            status,
        }
    }

    pub fn undispatched(&self) -> usize {
        self.tracks.len().saturating_sub(self.dispatched)
    }

    /// Tracks with statistics, best score first. Tracks without a score sort last.
    pub fn ranked(&self) -> Vec<&Track> {
        let mut ranked: Vec<&Track> = self
            .tracks
            .iter()
            .filter(|t| t.statistics.is_some())
            .collect();
        ranked.sort_by(|a, b| match (a.score(), b.score()) {
            (Some(a), Some(b)) => b.cmp(&a),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        });
        ranked
    }
}

pub struct BatchLauncher {
    launcher: Arc<dyn EngineLauncher>,
    accounts: Arc<dyn AccountResolver>,
    archiver: Arc<ResultArchiver>,
    settings: Arc<OptimizerSettings>,
    status: OptimizerStatus,
}

impl BatchLauncher {
    pub fn new(
        launcher: Arc<dyn EngineLauncher>,
        accounts: Arc<dyn AccountResolver>,
        archiver: Arc<ResultArchiver>,
        settings: Arc<OptimizerSettings>,
        status: OptimizerStatus,
    ) -> Self {
        Self {
            launcher,
            accounts,
            archiver,
            settings,
            status,
        }
    }

    pub fn status(&self) -> &OptimizerStatus {
        &self.status
    }

    /// Expands a definition tree into tracks and runs them with the
    /// configured concurrency.
    pub async fn optimize(
        &self,
        definition: &StrategyDefinition,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        let tracks: Vec<Track> = param_grid::build_run_list(definition)
            .into_iter()
            .map(Track::new)
            .collect();
        info!(
            "Optimizing {} with {} track(s)",
            definition.name,
            tracks.len()
        );
        self.run_all(tracks, self.settings.max_backtests, cancel).await
    }

    /// Runs tracks in order with at most `max_concurrency` in flight. Once
    /// `cancel` fires no further track is started; started tracks run to
    /// completion and are awaited before returning.
    pub async fn run_all(
        &self,
        tracks: Vec<Track>,
        max_concurrency: usize,
        cancel: CancellationToken,
    ) -> Result<BatchReport> {
        self.archiver.prepare().with_context(|| {
            format!(
                "failed to create archive folder {}",
                self.archiver.folder().display()
            )
        })?;

        let total = tracks.len();
        let max_concurrency = max_concurrency.max(1);
        self.status.start_batch(total);
        info!(
            "Running {} backtests with up to {} at a time",
            total, max_concurrency
        );

        let gate = Arc::new(Semaphore::new(max_concurrency));
        let ctx = TrackContext {
            launcher: Arc::clone(&self.launcher),
            accounts: Arc::clone(&self.accounts),
            archiver: Arc::clone(&self.archiver),
            settings: Arc::clone(&self.settings),
            batch_cancel: cancel.clone(),
        };
        let pb = self.progress_bar(total)?;

        let mut pending = tracks.into_iter().enumerate();
        let mut undispatched: Vec<Track> = Vec::new();
        let mut finished: Vec<(usize, Track)> = Vec::with_capacity(total);
        // Pre-run copies, used to report a track whose task panicked.
        let mut launched: HashMap<usize, Track> = HashMap::new();
        let mut in_flight = FuturesUnordered::new();
        let mut dispatched = 0;

        while let Some((index, track)) = pending.next() {
            if cancel.is_cancelled() {
                undispatched.push(track);
                break;
            }

            let permit = loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break None,
                    permit = Arc::clone(&gate).acquire_owned() => break permit.ok(),
                    Some(joined) = in_flight.next(), if !in_flight.is_empty() => {
                        self.collect(joined, &mut launched, &mut finished, &pb);
                    }
                }
            };

            let Some(permit) = permit else {
                undispatched.push(track);
                break;
            };
            if cancel.is_cancelled() {
                undispatched.push(track);
                break;
            }

            dispatched += 1;
            info!(
                "Strategy {} {} {}({})",
                track.definition.algorithm_name.as_deref().unwrap_or_default(),
                track.name,
                dispatched,
                total
            );
            self.status.record_dispatch();

            launched.insert(index, track.clone());
            let ctx = ctx.clone();
            let mut track = track;
            let task = tokio::spawn(async move {
                let _permit = permit;
                track.run(&ctx).await;
                track
            });
            in_flight.push(async move { (index, task.await) });
        }

        undispatched.extend(pending.map(|(_, track)| track));
        if !undispatched.is_empty() {
            warn!(
                "Batch cancelled, {} track(s) were not started",
                undispatched.len()
            );
        }

        while let Some(joined) = in_flight.next().await {
            self.collect(joined, &mut launched, &mut finished, &pb);
        }

        finished.sort_by_key(|(index, _)| *index);
        let mut tracks: Vec<Track> = finished.into_iter().map(|(_, track)| track).collect();
        tracks.extend(undispatched);

        let report = BatchReport::from_tracks(tracks, dispatched);
        pb.finish_with_message("Backtesting completed");
        self.status.set_phase(if cancel.is_cancelled() {
            "Cancelled"
        } else {
            "Completed"
        });
        info!(
            "Batch finished: {} succeeded, {} failed, {} aborted, {} not started",
            report.succeeded,
            report.failed,
            report.aborted,
            report.undispatched()
        );
        Ok(report)
    }

    fn collect(
        &self,
        (index, joined): (usize, Result<Track, JoinError>),
        launched: &mut HashMap<usize, Track>,
        finished: &mut Vec<(usize, Track)>,
        pb: &ProgressBar,
    ) {
        let launched = launched.remove(&index);
        let track = match (joined, launched) {
            (Ok(track), _) => track,
            (Err(e), Some(mut track)) => {
                error!("Track {} task failed: {}", track.name, e);
                track.record_crash(e.to_string());
                track
            }
            (Err(e), None) => {
                error!("Track task {} failed: {}", index, e);
                return;
            }
        };

        self.status.record_finished(track.status(), track.score());
        pb.inc(1);
        finished.push((index, track));
    }

    fn progress_bar(&self, total: usize) -> Result<ProgressBar> {
        if !self.settings.show_progress {
            return Ok(ProgressBar::hidden());
        }

        let pb = ProgressBar::new(total as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta})",
                )?
                .progress_chars("#>-"),
        );
        Ok(pb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn track_with_score(name: &str, status: TrackStatus, score: Option<rust_decimal::Decimal>) -> Track {
        let mut definition = StrategyDefinition::new(
            name,
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2020, 6, 1).unwrap(),
        );
        definition.algorithm_name = Some("Algo".to_string());
        let mut track = Track::new(definition);
        track.transition(TrackStatus::Running).unwrap();
        track.transition(status).unwrap();
        if status != TrackStatus::Aborted {
            let mut stats = crate::models::StatisticsMap::new();
            if let Some(score) = score {
                stats.insert("Score".to_string(), Some(score));
            }
            track.statistics = Some(stats);
        }
        track
    }

    #[test]
    fn report_ranks_by_descending_score() {
        let tracks = vec![
            track_with_score("low", TrackStatus::Success, Some(dec!(0.1))),
            track_with_score("none", TrackStatus::Error, None),
            track_with_score("high", TrackStatus::Success, Some(dec!(0.5))),
            track_with_score("gone", TrackStatus::Aborted, None),
        ];
        let report = BatchReport::from_tracks(tracks, 4);

        let names: Vec<&str> = report.ranked().iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["high", "low", "none"]);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.aborted, 1);
        assert_eq!(report.status, Some(TrackStatus::Error));
        assert_eq!(report.undispatched(), 0);
    }

    #[test]
    fn aggregate_status_ignores_aborted_tracks() {
        let report = BatchReport::from_tracks(
            vec![
                track_with_score("a", TrackStatus::Success, None),
                track_with_score("b", TrackStatus::Aborted, None),
            ],
            2,
        );
        assert_eq!(report.status, Some(TrackStatus::Success));

        let none = BatchReport::from_tracks(vec![track_with_score("c", TrackStatus::Aborted, None)], 1);
        assert_eq!(none.status, None);
    }

    #[test]
    fn undispatched_never_underflows() {
        let report = BatchReport::from_tracks(Vec::new(), 2);
        assert_eq!(report.undispatched(), 0);
        assert_eq!(report.status, None);
    }
}
