use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_TRACKS_FOLDER: &str = "Tracks";
pub const DEFAULT_ARCHIVE_FILE_NAME: &str = "track.zip";

const SETTING_KEYS: [&str; 6] = [
    "MAX_BACKTESTS",
    "DATA_FOLDER",
    "TRACKS_FOLDER",
    "ARCHIVE_FILE_NAME",
    "ENGINE_TIMEOUT_SECS",
    "SHOW_PROGRESS",
];

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerSettings {
    pub max_backtests: usize,
    pub data_folder: PathBuf,
    pub tracks_folder: String,
    pub archive_file_name: String,
    pub engine_timeout: Option<Duration>,
    pub show_progress: bool,
}

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            max_backtests: default_max_backtests(),
            data_folder: PathBuf::from("."),
            tracks_folder: DEFAULT_TRACKS_FOLDER.to_string(),
            archive_file_name: DEFAULT_ARCHIVE_FILE_NAME.to_string(),
            engine_timeout: None,
            show_progress: false,
        }
    }
}

impl OptimizerSettings {
    pub fn from_settings_map(settings: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();

        let max_backtests = match optional_setting(settings, "MAX_BACKTESTS") {
            Some(_) => require_setting_usize(settings, "MAX_BACKTESTS", 1)?,
            None => defaults.max_backtests,
        };

        let data_folder = optional_setting(settings, "DATA_FOLDER")
            .map(PathBuf::from)
            .unwrap_or(defaults.data_folder);

        let tracks_folder = optional_setting(settings, "TRACKS_FOLDER")
            .map(str::to_string)
            .unwrap_or(defaults.tracks_folder);

        let archive_file_name = optional_setting(settings, "ARCHIVE_FILE_NAME")
            .map(str::to_string)
            .unwrap_or(defaults.archive_file_name);
        if archive_file_name.contains(['/', '\\']) {
            return Err(anyhow!(
                "Setting ARCHIVE_FILE_NAME must be a plain file name (value: {})",
                archive_file_name
            ));
        }

        let engine_timeout = match optional_setting(settings, "ENGINE_TIMEOUT_SECS") {
            Some(_) => Some(Duration::from_secs(require_setting_u64(
                settings,
                "ENGINE_TIMEOUT_SECS",
                1,
            )?)),
            None => None,
        };

        let show_progress = match optional_setting(settings, "SHOW_PROGRESS") {
            Some(_) => require_setting_bool(settings, "SHOW_PROGRESS")?,
            None => defaults.show_progress,
        };

        Ok(Self {
            max_backtests,
            data_folder,
            tracks_folder,
            archive_file_name,
            engine_timeout,
            show_progress,
        })
    }

    pub fn from_env() -> Result<Self> {
        let settings: HashMap<String, String> = SETTING_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|value| (key.to_string(), value)))
            .collect();
        Self::from_settings_map(&settings)
    }

    pub fn tracks_path(&self) -> PathBuf {
        self.data_folder.join(&self.tracks_folder)
    }
}

pub fn default_max_backtests() -> usize {
    (num_cpus::get() / 2).max(1)
}

fn optional_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Option<&'a str> {
    settings
        .get(key)
        .map(|value| value.trim())
        .filter(|value| !value.is_empty())
}

fn require_setting<'a>(settings: &'a HashMap<String, String>, key: &str) -> Result<&'a str> {
    optional_setting(settings, key).ok_or_else(|| anyhow!("Missing required setting {}", key))
}

fn require_setting_u64(settings: &HashMap<String, String>, key: &str, min: u64) -> Result<u64> {
    let raw = require_setting(settings, key)?;
    let value = raw
        .parse::<u64>()
        .map_err(|_| anyhow!("Setting {} must be an integer (value: {})", key, raw))?;
    if value < min {
        return Err(anyhow!(
            "Setting {} must be >= {} (value: {})",
            key,
            min,
            raw
        ));
    }
    Ok(value)
}

fn require_setting_usize(settings: &HashMap<String, String>, key: &str, min: usize) -> Result<usize> {
    let value = require_setting_u64(settings, key, min as u64)?;
    usize::try_from(value).map_err(|_| anyhow!("Setting {} is out of range (value: {})", key, value))
}

fn require_setting_bool(settings: &HashMap<String, String>, key: &str) -> Result<bool> {
    let raw = require_setting(settings, key)?;
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(anyhow!(
            "Setting {} must be true or false (value: {})",
            key,
            raw
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn empty_map_uses_defaults() {
        let parsed = OptimizerSettings::from_settings_map(&HashMap::new()).unwrap();
        assert_eq!(parsed, OptimizerSettings::default());
        assert!(parsed.max_backtests >= 1);
        assert_eq!(parsed.tracks_path(), PathBuf::from(".").join("Tracks"));
    }

    #[test]
    fn parses_every_setting() {
        let parsed = OptimizerSettings::from_settings_map(&settings(&[
            ("MAX_BACKTESTS", "3"),
            ("DATA_FOLDER", "/var/lib/stratgrid"),
            ("TRACKS_FOLDER", "Runs"),
            ("ARCHIVE_FILE_NAME", "run.zip"),
            ("ENGINE_TIMEOUT_SECS", " 90 "),
            ("SHOW_PROGRESS", "Yes"),
        ]))
        .unwrap();

        assert_eq!(parsed.max_backtests, 3);
        assert_eq!(parsed.tracks_path(), PathBuf::from("/var/lib/stratgrid/Runs"));
        assert_eq!(parsed.archive_file_name, "run.zip");
        assert_eq!(parsed.engine_timeout, Some(Duration::from_secs(90)));
        assert!(parsed.show_progress);
    }

    #[test]
    fn rejects_invalid_values() {
        for (key, value) in [
            ("MAX_BACKTESTS", "0"),
            ("MAX_BACKTESTS", "many"),
            ("ENGINE_TIMEOUT_SECS", "0"),
            ("SHOW_PROGRESS", "maybe"),
            ("ARCHIVE_FILE_NAME", "nested/track.zip"),
        ] {
            let err = OptimizerSettings::from_settings_map(&settings(&[(key, value)])).unwrap_err();
            assert!(err.to_string().contains(key), "{}", err);
        }
    }
}
