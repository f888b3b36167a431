use crate::config::OptimizerSettings;
use crate::details::TrackDetails;
use crate::error::ArchiveError;
use crate::models::{BacktestResult, StatisticsMap, StrategyDefinition};
use crate::performance::PerformanceCalculator;
use crate::track::Track;
use log::{info, warn};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

pub const LOG_FILE: &str = "Logs.log";
pub const RESULT_FILE: &str = "Result.json";

const EQUITY_CHART: &str = "Strategy Equity";
const EQUITY_SERIES: &str = "Equity";

#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveOutcome {
    /// File name of the archive inside the archiver's folder.
    pub archive_ref: String,
    pub statistics: StatisticsMap,
}

#[derive(Debug, Clone)]
pub struct ResultArchiver {
    folder: PathBuf,
    file_name: String,
    naming_lock: Arc<Mutex<()>>,
}

impl ResultArchiver {
    pub fn new(folder: impl Into<PathBuf>, file_name: impl Into<String>) -> Self {
        Self::with_lock(folder, file_name, Arc::new(Mutex::new(())))
    }

    /// Archivers sharing a folder must share the naming lock.
    pub fn with_lock(
        folder: impl Into<PathBuf>,
        file_name: impl Into<String>,
        naming_lock: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            folder: folder.into(),
            file_name: file_name.into(),
            naming_lock,
        }
    }

    pub fn from_settings(settings: &OptimizerSettings) -> Self {
        Self::new(settings.tracks_path(), settings.archive_file_name.clone())
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn archive_path(&self, archive_ref: &str) -> PathBuf {
        self.folder.join(archive_ref)
    }

    pub fn prepare(&self) -> Result<(), ArchiveError> {
        fs::create_dir_all(&self.folder)?;
        Ok(())
    }

    /// Stores the raw result and logs in a new archive and returns its
    /// reference with the flattened statistics. Returns `None` when there
    /// is no result to keep.
    pub fn archive(&self, result: &str, logs: &str) -> Result<Option<ArchiveOutcome>, ArchiveError> {
        if result.trim().is_empty() {
            return Ok(None);
        }

        self.prepare()?;
        let archive_ref = self.claim(|file| write_container(file, logs, result))?;

        let statistics = match BacktestResult::from_json(result) {
            Ok(parsed) => read_statistics(&parsed),
            Err(e) => {
                warn!("Archived result {} is not a valid result record: {}", archive_ref, e);
                StatisticsMap::new()
            }
        };

        Ok(Some(ArchiveOutcome {
            archive_ref,
            statistics,
        }))
    }

    /// Creates a uniquely named archive and fills it under the naming lock.
    /// A file that could not be written is removed before the lock is released.
    fn claim<F>(&self, write: F) -> Result<String, ArchiveError>
    where
        F: FnOnce(File) -> Result<(), ArchiveError>,
    {
        let _guard = self
            .naming_lock
            .lock()
            .map_err(|_| ArchiveError::LockPoisoned)?;
        let (archive_ref, file) = self.create_unique()?;
        if let Err(e) = write(file) {
            let path = self.archive_path(&archive_ref);
            if let Err(remove_err) = fs::remove_file(&path) {
                warn!("Unable to remove partial archive {}: {}", path.display(), remove_err);
            }
            return Err(e);
        }
        Ok(archive_ref)
    }

    fn create_unique(&self) -> Result<(String, File), ArchiveError> {
        let base = Path::new(&self.file_name);
        let stem = base
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let extension = base
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();

        let mut count = 0usize;
        loop {
            let candidate = if count == 0 {
                format!("{}{}", stem, extension)
            } else {
                format!("{}{}{}", stem, count, extension)
            };

            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(self.folder.join(&candidate))
            {
                Ok(file) => return Ok((candidate, file)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => count += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Raw result and log text of an archive.
    pub fn read_raw(&self, archive_ref: &str) -> Result<(String, String), ArchiveError> {
        let file = File::open(self.archive_path(archive_ref))?;
        let mut container = ZipArchive::new(file)?;
        let result = read_member(&mut container, RESULT_FILE)?;
        let logs = read_member(&mut container, LOG_FILE).unwrap_or_default();
        Ok((result, logs))
    }

    /// Parsed result of an archive, or `None` when it cannot be read.
    pub fn read_result(&self, archive_ref: &str) -> Option<(BacktestResult, String)> {
        let (raw, logs) = match self.read_raw(archive_ref) {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Unable to open track archive {}: {}", archive_ref, e);
                return None;
            }
        };

        match BacktestResult::from_json(&raw) {
            Ok(result) => Some((result, logs)),
            Err(e) => {
                warn!("Track archive {} has a malformed result: {}", archive_ref, e);
                None
            }
        }
    }

    pub fn load(&self, archive_ref: &str, definition: &StrategyDefinition) -> TrackDetails {
        match self.read_result(archive_ref) {
            Some((result, logs)) => TrackDetails::from_result(&result, logs, definition),
            None => TrackDetails::default(),
        }
    }

    /// Deletes archive files not referenced by any live track.
    pub fn collect_orphans(&self, referenced: &HashSet<String>) -> Result<usize, ArchiveError> {
        let entries = match fs::read_dir(&self.folder) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut deleted = 0;
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if referenced.contains(&name) {
                continue;
            }
            fs::remove_file(entry.path())?;
            info!("Deleted orphaned track archive {}", name);
            deleted += 1;
        }

        Ok(deleted)
    }
}

fn write_container(file: File, logs: &str, result: &str) -> Result<(), ArchiveError> {
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(LOG_FILE, options)?;
    writer.write_all(logs.as_bytes())?;
    writer.start_file(RESULT_FILE, options)?;
    writer.write_all(result.as_bytes())?;
    writer.finish()?;
    Ok(())
}

fn read_member(container: &mut ZipArchive<File>, name: &str) -> Result<String, ArchiveError> {
    let mut member = container.by_name(name)?;
    let mut text = String::new();
    member.read_to_string(&mut text)?;
    Ok(text)
}

pub fn referenced_archives(tracks: &[Track]) -> HashSet<String> {
    tracks
        .iter()
        .filter_map(|t| t.archive_ref.clone())
        .collect()
}

/// Flattens every numeric entry of a result into one map. Computed equity
/// scores come first, followed by the engine's own sections.
pub fn read_statistics(result: &BacktestResult) -> StatisticsMap {
    let mut statistics = StatisticsMap::new();
    add_custom_statistics(result, &mut statistics);

    for (name, text) in &result.statistics {
        add_statistic_item(&mut statistics, name, text);
    }
    for (name, text) in &result.runtime_statistics {
        add_statistic_item(&mut statistics, name, text);
    }
    for (name, value) in result.total_performance.portfolio_statistics.entries() {
        insert_unique(&mut statistics, name.to_string(), value);
    }
    for (name, value) in result.total_performance.trade_statistics.entries() {
        insert_unique(&mut statistics, name.to_string(), value);
    }

    statistics
}

fn add_custom_statistics(result: &BacktestResult, statistics: &mut StatisticsMap) {
    let Some(equity) = result.series(EQUITY_CHART, EQUITY_SERIES) else {
        return;
    };

    let score = PerformanceCalculator::series_score(&equity.values);
    if let Some(score) = PerformanceCalculator::score_to_decimal(score) {
        insert_unique(statistics, "Score".to_string(), score);
    }
    let ath = PerformanceCalculator::ath_score(&equity.values);
    if let Some(ath) = PerformanceCalculator::score_to_decimal(ath) {
        insert_unique(statistics, "ATH Score".to_string(), ath);
    }
}

/// Parses one textual statistic. `$` and `%` values get the symbol appended
/// to their key; text that is not numeric is dropped.
pub fn add_statistic_item(statistics: &mut StatisticsMap, name: &str, text: &str) {
    let (key, value) = if text.contains('$') {
        match parse_decimal(&text.replace('$', "")) {
            Some(value) => (format!("{}$", name), value),
            None => return,
        }
    } else if text.contains('%') {
        match parse_decimal(&text.replace('%', "")) {
            Some(value) => (format!("{}%", name), value),
            None => return,
        }
    } else {
        match parse_decimal(text) {
            Some(value) => (name.to_string(), value),
            None => return,
        }
    };

    insert_unique(statistics, key, value);
}

fn insert_unique(statistics: &mut StatisticsMap, mut key: String, value: Decimal) {
    while statistics.contains_key(&key) {
        key.push('+');
    }
    statistics.insert(key, Some(value));
}

pub fn parse_decimal(text: &str) -> Option<Decimal> {
    let trimmed = text.trim();
    let (negate, body) = match trimmed
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
    {
        Some(inner) => (true, inner.trim()),
        None => (false, trimmed),
    };

    let cleaned: String = body.chars().filter(|c| *c != ',' && !c.is_whitespace()).collect();
    if cleaned.is_empty() {
        return None;
    }

    let value = Decimal::from_str(&cleaned)
        .ok()
        .or_else(|| Decimal::from_scientific(&cleaned).ok())?;
    Some(if negate { -value } else { value })
}
