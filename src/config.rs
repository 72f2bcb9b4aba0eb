use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::run::RunSettings;

const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000/api/v1";
const DEFAULT_STATE_DIR: &str = ".oclab";
const DEFAULT_MAX_CAPACITY: u32 = 50;

#[derive(Debug, Deserialize, Default)]
struct LabConfigFile {
    api_base_url: Option<String>,
    state_dir: Option<PathBuf>,
    default_max_capacity: Option<u32>,
    detection_window_secs: Option<f64>,
    run: Option<RunConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct RunConfigFile {
    countdown_secs: Option<u64>,
    poll_interval_ms: Option<u64>,
    stage_interval_ms: Option<u64>,
    handoff_delay_ms: Option<u64>,
}

/// Resolved client configuration.
///
/// Sources, weakest first: built-in defaults, the JSON file named by
/// `OCLAB_CONFIG`, then `OCLAB_*` environment overrides.
#[derive(Debug, Clone)]
pub struct LabConfig {
    /// Backend origin, e.g. `https://fleet.example/api/v1`.
    pub api_base_url: Url,
    /// Where client state (credentials) persists.
    pub state_dir: PathBuf,
    /// Declared capacity used when a run does not specify one.
    pub default_max_capacity: u32,
    /// Optional correlation tolerance for review; absent = nearest frame.
    pub detection_window_secs: Option<f64>,
    pub run: RunSettings,
}

impl LabConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("OCLAB_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => read_config_file(Path::new(path))?,
            None => LabConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: LabConfigFile) -> Result<Self> {
        let api_base_url = parse_base_url(
            file.api_base_url
                .as_deref()
                .unwrap_or(DEFAULT_BASE_URL),
        )?;
        let run_file = file.run.unwrap_or_default();
        let defaults = RunSettings::default();
        let run = RunSettings {
            countdown_secs: run_file.countdown_secs.unwrap_or(defaults.countdown_secs),
            countdown_tick: defaults.countdown_tick,
            stage_interval: run_file
                .stage_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.stage_interval),
            poll_interval: run_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
            handoff_delay: run_file
                .handoff_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.handoff_delay),
        };
        Ok(Self {
            api_base_url,
            state_dir: file
                .state_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            default_max_capacity: file.default_max_capacity.unwrap_or(DEFAULT_MAX_CAPACITY),
            detection_window_secs: file.detection_window_secs,
            run,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(base) = std::env::var("OCLAB_API_BASE_URL") {
            if !base.trim().is_empty() {
                self.api_base_url = parse_base_url(&base)?;
            }
        }
        if let Ok(dir) = std::env::var("OCLAB_STATE_DIR") {
            if !dir.trim().is_empty() {
                self.state_dir = PathBuf::from(dir);
            }
        }
        if let Ok(capacity) = std::env::var("OCLAB_MAX_CAPACITY") {
            self.default_max_capacity = capacity
                .parse()
                .map_err(|_| anyhow!("OCLAB_MAX_CAPACITY must be an integer"))?;
        }
        if let Ok(window) = std::env::var("OCLAB_DETECTION_WINDOW_SECS") {
            let secs: f64 = window
                .parse()
                .map_err(|_| anyhow!("OCLAB_DETECTION_WINDOW_SECS must be a number of seconds"))?;
            self.detection_window_secs = Some(secs);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.default_max_capacity == 0 {
            return Err(anyhow!("default_max_capacity must be greater than zero"));
        }
        if let Some(window) = self.detection_window_secs {
            if !window.is_finite() || window <= 0.0 {
                return Err(anyhow!("detection_window_secs must be a positive number"));
            }
        }
        for (name, value) in [
            ("poll_interval", self.run.poll_interval),
            ("stage_interval", self.run.stage_interval),
            ("handoff_delay", self.run.handoff_delay),
        ] {
            if value.is_zero() {
                return Err(anyhow!("{name} must be greater than zero"));
            }
        }
        Ok(())
    }
}

fn parse_base_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| anyhow!("invalid api base url '{}': {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(anyhow!(
            "api base url must be http(s), got scheme '{}'",
            other
        )),
    }
}

fn read_config_file(path: &Path) -> Result<LabConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_complete() {
        let cfg = LabConfig::from_file(LabConfigFile::default()).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.api_base_url.as_str(), "http://127.0.0.1:8000/api/v1");
        assert_eq!(cfg.default_max_capacity, 50);
        assert_eq!(cfg.run.countdown_secs, 180);
        assert_eq!(cfg.run.poll_interval, Duration::from_secs(3));
        assert!(cfg.detection_window_secs.is_none());
    }

    #[test]
    fn file_values_override_defaults() {
        let file: LabConfigFile = serde_json::from_str(
            r#"{
                "api_base_url": "https://fleet.example/api/v1",
                "default_max_capacity": 80,
                "detection_window_secs": 0.5,
                "run": {"countdown_secs": 120, "poll_interval_ms": 5000}
            }"#,
        )
        .unwrap();
        let cfg = LabConfig::from_file(file).unwrap();
        assert_eq!(cfg.api_base_url.host_str(), Some("fleet.example"));
        assert_eq!(cfg.default_max_capacity, 80);
        assert_eq!(cfg.detection_window_secs, Some(0.5));
        assert_eq!(cfg.run.countdown_secs, 120);
        assert_eq!(cfg.run.poll_interval, Duration::from_secs(5));
        // untouched knobs keep their defaults
        assert_eq!(cfg.run.stage_interval, Duration::from_millis(2500));
    }

    #[test]
    fn non_http_base_url_is_rejected() {
        assert!(parse_base_url("ftp://fleet.example").is_err());
        assert!(parse_base_url("not a url").is_err());
    }
}
