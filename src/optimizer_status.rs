use crate::track::TrackStatus;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};

#[derive(Clone, Default)]
pub struct OptimizerStatus {
    inner: Arc<Mutex<OptimizerStatusData>>,
}

#[derive(Default)]
struct OptimizerStatusData {
    phase: String,
    total_tracks: usize,
    dispatched_tracks: usize,
    completed_tracks: usize,
    failed_tracks: usize,
    aborted_tracks: usize,
    best_score: Option<Decimal>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerStatusSnapshot {
    pub phase: String,
    pub total_tracks: usize,
    pub dispatched_tracks: usize,
    pub completed_tracks: usize,
    pub failed_tracks: usize,
    pub aborted_tracks: usize,
    pub best_score: Option<Decimal>,
}

impl OptimizerStatus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OptimizerStatusData {
                phase: "Initializing".to_string(),
                ..Default::default()
            })),
        }
    }

    pub fn set_phase<S: Into<String>>(&self, phase: S) {
        if let Ok(mut data) = self.inner.lock() {
            data.phase = phase.into();
        }
    }

    pub fn start_batch(&self, total_tracks: usize) {
        if let Ok(mut data) = self.inner.lock() {
            *data = OptimizerStatusData {
                phase: "Running".to_string(),
                total_tracks,
                ..Default::default()
            };
        }
    }

    pub fn record_dispatch(&self) {
        if let Ok(mut data) = self.inner.lock() {
            data.dispatched_tracks += 1;
        }
    }

    pub fn record_finished(&self, status: TrackStatus, score: Option<Decimal>) {
        if let Ok(mut data) = self.inner.lock() {
            match status {
                TrackStatus::Success => data.completed_tracks += 1,
                TrackStatus::Error => data.failed_tracks += 1,
                TrackStatus::Aborted => data.aborted_tracks += 1,
                TrackStatus::Created | TrackStatus::Running => {}
            }
            if let Some(score) = score {
                if data.best_score.map_or(true, |best| score > best) {
                    data.best_score = Some(score);
                }
            }
        }
    }

    pub fn snapshot(&self) -> OptimizerStatusSnapshot {
        if let Ok(data) = self.inner.lock() {
            OptimizerStatusSnapshot {
                phase: data.phase.clone(),
                total_tracks: data.total_tracks,
                dispatched_tracks: data.dispatched_tracks,
                completed_tracks: data.completed_tracks,
                failed_tracks: data.failed_tracks,
                aborted_tracks: data.aborted_tracks,
                best_score: data.best_score,
            }
        } else {
            OptimizerStatusSnapshot {
                phase: "Status unavailable".to_string(),
                total_tracks: 0,
                dispatched_tracks: 0,
                completed_tracks: 0,
                failed_tracks: 0,
                aborted_tracks: 0,
                best_score: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn records_counts_and_best_score() {
        let status = OptimizerStatus::new();
        assert_eq!(status.snapshot().phase, "Initializing");

        status.start_batch(4);
        for _ in 0..3 {
            status.record_dispatch();
        }
        status.record_finished(TrackStatus::Success, Some(dec!(0.12)));
        status.record_finished(TrackStatus::Success, Some(dec!(0.34)));
        status.record_finished(TrackStatus::Error, Some(dec!(0.2)));
        status.record_finished(TrackStatus::Aborted, None);
        status.set_phase("Completed");

        let snapshot = status.snapshot();
        assert_eq!(snapshot.phase, "Completed");
        assert_eq!(snapshot.total_tracks, 4);
        assert_eq!(snapshot.dispatched_tracks, 3);
        assert_eq!(snapshot.completed_tracks, 2);
        assert_eq!(snapshot.failed_tracks, 1);
        assert_eq!(snapshot.aborted_tracks, 1);
        assert_eq!(snapshot.best_score, Some(dec!(0.34)));
    }
}
