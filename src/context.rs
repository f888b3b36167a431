use crate::archive::{referenced_archives, ResultArchiver};
use crate::config::OptimizerSettings;
use crate::launcher::{AccountResolver, EngineLauncher};
use crate::optimizer::BatchLauncher;
use crate::optimizer_status::OptimizerStatus;
use crate::track::Track;
use anyhow::{Context, Result};
use log::info;
use std::sync::Arc;

/// Settings, storage and external collaborators shared by every batch.
#[derive(Clone)]
pub struct OptimizerContext {
    settings: Arc<OptimizerSettings>,
    archiver: Arc<ResultArchiver>,
    launcher: Arc<dyn EngineLauncher>,
    accounts: Arc<dyn AccountResolver>,
    status: OptimizerStatus,
}

impl OptimizerContext {
    pub fn new(
        settings: OptimizerSettings,
        launcher: Arc<dyn EngineLauncher>,
        accounts: Arc<dyn AccountResolver>,
    ) -> Self {
        let archiver = Arc::new(ResultArchiver::from_settings(&settings));
        Self {
            settings: Arc::new(settings),
            archiver,
            launcher,
            accounts,
            status: OptimizerStatus::new(),
        }
    }

    pub fn from_env(
        launcher: Arc<dyn EngineLauncher>,
        accounts: Arc<dyn AccountResolver>,
    ) -> Result<Self> {
        let settings = OptimizerSettings::from_env()?;
        Ok(Self::new(settings, launcher, accounts))
    }

    pub fn settings(&self) -> &OptimizerSettings {
        &self.settings
    }

    pub fn archiver(&self) -> Arc<ResultArchiver> {
        Arc::clone(&self.archiver)
    }

    pub fn status(&self) -> OptimizerStatus {
        self.status.clone()
    }

    pub fn batch_launcher(&self) -> BatchLauncher {
        BatchLauncher::new(
            Arc::clone(&self.launcher),
            Arc::clone(&self.accounts),
            Arc::clone(&self.archiver),
            Arc::clone(&self.settings),
            self.status.clone(),
        )
    }

    /// Removes archives that none of `tracks` refers to.
    pub fn collect_orphans(&self, tracks: &[Track]) -> Result<usize> {
        let referenced = referenced_archives(tracks);
        let deleted = self
            .archiver
            .collect_orphans(&referenced)
            .with_context(|| format!("failed to clean {}", self.archiver.folder().display()))?;
        if deleted > 0 {
            info!("Removed {} unreferenced track archive(s)", deleted);
        }
        Ok(deleted)
    }
}
