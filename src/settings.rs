use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::paths::default_config_path;

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub(crate) struct FileConfig {
    pub(crate) tracker: Option<TrackerFileConfig>,
    pub(crate) sites: Vec<SiteFileConfig>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub(crate) struct TrackerFileConfig {
    pub(crate) max_frame_depth: Option<usize>,
    pub(crate) max_attempts: Option<u32>,
    pub(crate) fast_attempts: Option<u32>,
    pub(crate) fast_delay_ms: Option<u64>,
    pub(crate) slow_delay_ms: Option<u64>,
    pub(crate) request_interval_ms: Option<u64>,
    pub(crate) staleness_window_ms: Option<u64>,
    pub(crate) response_timeout_ms: Option<u64>,
    pub(crate) poll_interval_ms: Option<u64>,
    pub(crate) event_debounce_ms: Option<u64>,
    pub(crate) finished_threshold: Option<f64>,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone)]
#[serde(default)]
pub(crate) struct SiteFileConfig {
    pub(crate) name: String,
    pub(crate) hosts: Vec<String>,
    pub(crate) path_prefix: Option<String>,
    pub(crate) locators: Vec<String>,
    pub(crate) title_selector: Option<String>,
    pub(crate) series_selector: Option<String>,
    pub(crate) episode_selector: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DiscoverySettings {
    pub(crate) max_attempts: u32,
    pub(crate) fast_attempts: u32,
    pub(crate) fast_delay: Duration,
    pub(crate) slow_delay: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct BridgeSettings {
    pub(crate) request_interval: Duration,
    pub(crate) staleness_window: Duration,
    pub(crate) response_timeout: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ProgressSettings {
    pub(crate) poll_interval: Duration,
    pub(crate) event_debounce: Duration,
    pub(crate) finished_threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct TrackerSettings {
    pub(crate) max_frame_depth: usize,
    pub(crate) discovery: DiscoverySettings,
    pub(crate) bridge: BridgeSettings,
    pub(crate) progress: ProgressSettings,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            max_frame_depth: 3,
            discovery: DiscoverySettings {
                max_attempts: 30,
                fast_attempts: 10,
                fast_delay: Duration::from_millis(500),
                slow_delay: Duration::from_millis(2000),
            },
            bridge: BridgeSettings {
                request_interval: Duration::from_millis(1000),
                staleness_window: Duration::from_millis(3000),
                response_timeout: Duration::from_millis(5000),
            },
            progress: ProgressSettings {
                poll_interval: Duration::from_millis(5000),
                event_debounce: Duration::from_millis(1000),
                finished_threshold: 90.0,
            },
        }
    }
}

#[derive(Debug)]
pub(crate) struct ResolvedSettings {
    pub(crate) tracker: TrackerSettings,
    pub(crate) sites: Vec<SiteFileConfig>,
    pub(crate) config_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid value '{value}' for '{field}'")]
    InvalidValue { field: &'static str, value: String },
    #[error("config file {} does not exist", .path.display())]
    NotFound { path: PathBuf },
}

pub(crate) fn resolve_settings(path_override: Option<&Path>) -> Result<ResolvedSettings, ConfigError> {
    let (file, config_path) = load_config(path_override)?;
    let tracker = merge_tracker(file.tracker.unwrap_or_default())?;
    let sites = file
        .sites
        .into_iter()
        .map(validate_site)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ResolvedSettings {
        tracker,
        sites,
        config_path,
    })
}

fn load_config(path_override: Option<&Path>) -> Result<(FileConfig, Option<PathBuf>), ConfigError> {
    if let Some(path) = path_override {
        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_path_buf(),
            });
        }
        return Ok((load_file_config(path)?, Some(path.to_path_buf())));
    }

    let Some(default_path) = default_config_path() else {
        return Ok((FileConfig::default(), None));
    };
    if !default_path.exists() {
        return Ok((FileConfig::default(), None));
    }
    let config = load_file_config(&default_path)?;
    Ok((config, Some(default_path)))
}

pub(crate) fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_file_config(&contents).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

pub(crate) fn parse_file_config(contents: &str) -> Result<FileConfig, toml::de::Error> {
    toml::from_str(contents)
}

pub(crate) fn merge_tracker(file: TrackerFileConfig) -> Result<TrackerSettings, ConfigError> {
    let defaults = TrackerSettings::default();

    let max_attempts = positive_u32("tracker.max_attempts", file.max_attempts)?
        .unwrap_or(defaults.discovery.max_attempts);
    let fast_attempts = file
        .fast_attempts
        .unwrap_or(defaults.discovery.fast_attempts)
        .min(max_attempts);

    let finished_threshold = match file.finished_threshold {
        Some(value) if !(value > 0.0 && value <= 100.0) => {
            return Err(ConfigError::InvalidValue {
                field: "tracker.finished_threshold",
                value: value.to_string(),
            });
        }
        Some(value) => value,
        None => defaults.progress.finished_threshold,
    };

    Ok(TrackerSettings {
        max_frame_depth: file.max_frame_depth.unwrap_or(defaults.max_frame_depth),
        discovery: DiscoverySettings {
            max_attempts,
            fast_attempts,
            fast_delay: millis_or(file.fast_delay_ms, defaults.discovery.fast_delay),
            slow_delay: millis_or(file.slow_delay_ms, defaults.discovery.slow_delay),
        },
        bridge: BridgeSettings {
            request_interval: positive_millis(
                "tracker.request_interval_ms",
                file.request_interval_ms,
                defaults.bridge.request_interval,
            )?,
            staleness_window: positive_millis(
                "tracker.staleness_window_ms",
                file.staleness_window_ms,
                defaults.bridge.staleness_window,
            )?,
            response_timeout: positive_millis(
                "tracker.response_timeout_ms",
                file.response_timeout_ms,
                defaults.bridge.response_timeout,
            )?,
        },
        progress: ProgressSettings {
            poll_interval: positive_millis(
                "tracker.poll_interval_ms",
                file.poll_interval_ms,
                defaults.progress.poll_interval,
            )?,
            event_debounce: millis_or(file.event_debounce_ms, defaults.progress.event_debounce),
            finished_threshold,
        },
    })
}

fn validate_site(site: SiteFileConfig) -> Result<SiteFileConfig, ConfigError> {
    if site.name.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            field: "sites.name",
            value: site.name,
        });
    }
    if site.hosts.iter().all(|host| host.trim().is_empty()) {
        return Err(ConfigError::InvalidValue {
            field: "sites.hosts",
            value: site.name,
        });
    }
    Ok(site)
}

fn positive_u32(field: &'static str, value: Option<u32>) -> Result<Option<u32>, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidValue {
            field,
            value: "0".to_string(),
        }),
        other => Ok(other),
    }
}

fn positive_millis(
    field: &'static str,
    value: Option<u64>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match value {
        Some(0) => Err(ConfigError::InvalidValue {
            field,
            value: "0".to_string(),
        }),
        other => Ok(millis_or(other, default)),
    }
}

fn millis_or(value: Option<u64>, default: Duration) -> Duration {
    value.map(Duration::from_millis).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let file = parse_file_config("").expect("empty config should parse");
        let tracker = merge_tracker(file.tracker.unwrap_or_default()).expect("defaults are valid");
        assert_eq!(tracker, TrackerSettings::default());
        assert!(file.sites.is_empty());
    }

    #[test]
    fn tracker_overrides_are_applied() {
        let raw = r#"
            [tracker]
            max_attempts = 5
            fast_attempts = 8
            staleness_window_ms = 1500
            finished_threshold = 85.0
        "#;
        let file = parse_file_config(raw).expect("config should parse");
        let tracker = merge_tracker(file.tracker.unwrap_or_default()).expect("values are valid");
        assert_eq!(tracker.discovery.max_attempts, 5);
        assert_eq!(tracker.discovery.fast_attempts, 5);
        assert_eq!(tracker.bridge.staleness_window, Duration::from_millis(1500));
        assert_eq!(tracker.progress.finished_threshold, 85.0);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let file = TrackerFileConfig {
            poll_interval_ms: Some(0),
            ..TrackerFileConfig::default()
        };
        let err = merge_tracker(file).expect_err("zero interval must be rejected");
        assert!(err.to_string().contains("tracker.poll_interval_ms"));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let file = TrackerFileConfig {
            finished_threshold: Some(120.0),
            ..TrackerFileConfig::default()
        };
        assert!(merge_tracker(file).is_err());
    }

    #[test]
    fn site_entries_parse() {
        let raw = r##"
            [[sites]]
            name = "animeplay"
            hosts = ["animeplay.example"]
            path_prefix = "/watch/"
            locators = ["#player video", "video.jw-video"]
            series_selector = "h1.series"
        "##;
        let file = parse_file_config(raw).expect("config should parse");
        assert_eq!(file.sites.len(), 1);
        let site = validate_site(file.sites[0].clone()).expect("site is valid");
        assert_eq!(site.locators.len(), 2);
        assert_eq!(site.path_prefix.as_deref(), Some("/watch/"));
    }

    #[test]
    fn site_without_hosts_is_rejected() {
        let site = SiteFileConfig {
            name: "nowhere".to_string(),
            ..SiteFileConfig::default()
        };
        assert!(validate_site(site).is_err());
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        let err = resolve_settings(Some(&missing)).expect_err("missing file must error");
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    fn config_file_is_loaded_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[tracker]\nmax_frame_depth = 1\n").expect("write config");
        let resolved = resolve_settings(Some(&path)).expect("config should load");
        assert_eq!(resolved.tracker.max_frame_depth, 1);
        assert_eq!(resolved.config_path.as_deref(), Some(path.as_path()));
    }
}
