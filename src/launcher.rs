use crate::config::OptimizerSettings;
use crate::models::{Account, StrategyDefinition};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Success,
    Error,
}

/// What the engine hands back for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineOutcome {
    pub status: EngineStatus,
    pub result: String,
    pub logs: String,
}

impl EngineOutcome {
    pub fn success(result: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            status: EngineStatus::Success,
            result: result.into(),
            logs: logs.into(),
        }
    }

    pub fn error(result: impl Into<String>, logs: impl Into<String>) -> Self {
        Self {
            status: EngineStatus::Error,
            result: result.into(),
            logs: logs.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineRun {
    pub track_name: String,
    pub definition: StrategyDefinition,
    pub account: Option<Account>,
    pub settings: Arc<OptimizerSettings>,
}

/// Runs one fully resolved strategy through the backtest engine.
///
/// Implementations should watch `cancel` and return early once it fires;
/// the caller never drops an in-flight run.
#[async_trait]
pub trait EngineLauncher: Send + Sync {
    async fn run(&self, run: EngineRun, cancel: CancellationToken) -> Result<EngineOutcome>;
}

pub trait AccountResolver: Send + Sync {
    fn find_account(&self, name: &str) -> Option<Account>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticAccounts {
    accounts: HashMap<String, Account>,
}

impl StaticAccounts {
    pub fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|account| (account.name.clone(), account))
                .collect(),
        }
    }
}

impl AccountResolver for StaticAccounts {
    fn find_account(&self, name: &str) -> Option<Account> {
        self.accounts.get(name).cloned()
    }
}
