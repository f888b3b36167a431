pub mod archive;
pub mod config;
pub mod context;
pub mod details;
pub mod error;
pub mod launcher;
pub mod models;
pub mod optimizer;
pub mod optimizer_status;
pub mod param_grid;
pub mod performance;
pub mod track;

pub use archive::{ArchiveOutcome, ResultArchiver};
pub use config::OptimizerSettings;
pub use context::OptimizerContext;
pub use launcher::{AccountResolver, EngineLauncher, EngineOutcome, EngineRun, EngineStatus};
pub use optimizer::{BatchLauncher, BatchReport};
pub use track::{Track, TrackStatus};
