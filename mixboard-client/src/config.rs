use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::AppError;
use crate::board::ViewMode;

pub const ENV_CONFIG: &str = "MIXBOARD_CONFIG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold_secs: u64,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_true")]
    pub sound: bool,
    #[serde(default = "default_true")]
    pub desktop_notifications: bool,
    #[serde(default)]
    pub view: ViewMode,
    /// Where alert markers and logs live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
}

fn default_warning_threshold() -> u64 {
    120
}

fn default_tick_interval() -> u64 {
    1000
}

fn default_true() -> bool {
    true
}

impl ClientConfig {
    pub fn new(server_url: &str) -> Self {
        Self {
            server_url: normalize_server_url(server_url),
            warning_threshold_secs: default_warning_threshold(),
            tick_interval_ms: default_tick_interval(),
            sound: true,
            desktop_notifications: true,
            view: ViewMode::default(),
            data_dir: None,
        }
    }

    pub fn find_and_load(cli_value: Option<PathBuf>) -> Result<(PathBuf, Self), AppError> {
        let path = resolve_config_path(cli_value)?;
        let cfg = load_config(&path)?;
        Ok((path, cfg))
    }

    pub fn warning_threshold(&self) -> Duration {
        Duration::from_secs(self.warning_threshold_secs)
    }

    /// Tick period, never below 100 ms.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(100))
    }

    pub fn data_dir(&self) -> Result<PathBuf, AppError> {
        match &self.data_dir {
            Some(d) => Ok(d.clone()),
            None => default_data_dir()
                .ok_or_else(|| AppError::Config("could not determine data dir".into())),
        }
    }
}

pub fn resolve_config_path(cli_value: Option<PathBuf>) -> Result<PathBuf, AppError> {
    if let Some(p) = cli_value {
        return Ok(p);
    }
    if let Ok(p) = std::env::var(ENV_CONFIG) {
        return Ok(PathBuf::from(p));
    }
    default_config_path().ok_or_else(|| AppError::Config("could not determine config dir".into()))
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "mixboard", "mixboard")
}

pub fn default_config_path() -> Option<PathBuf> {
    Some(project_dirs()?.config_dir().join("client.yaml"))
}

pub fn default_data_dir() -> Option<PathBuf> {
    Some(project_dirs()?.data_local_dir().to_path_buf())
}

pub fn load_config(path: &Path) -> Result<ClientConfig, AppError> {
    let data = std::fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("read {} failed: {e}", path.display())))?;
    parse_config(&data).map_err(|e| AppError::Config(format!("parse {} failed: {e}", path.display())))
}

fn parse_config(data: &str) -> Result<ClientConfig, String> {
    let mut cfg: ClientConfig = serde_yaml::from_str(data).map_err(|e| e.to_string())?;
    if cfg.server_url.trim().is_empty() {
        return Err("server_url must not be empty".into());
    }
    cfg.server_url = normalize_server_url(&cfg.server_url);
    url::Url::parse(&cfg.server_url).map_err(|e| format!("invalid server_url: {e}"))?;
    Ok(cfg)
}

pub fn save_config(path: &Path, cfg: &ClientConfig) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let data = serde_yaml::to_string(cfg)
        .map_err(|e| AppError::Config(format!("serialize config failed: {e}")))?;
    std::fs::write(path, data)
        .map_err(|e| AppError::Config(format!("write {} failed: {e}", path.display())))
}

pub fn normalize_server_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.trim_end_matches('/').to_string()
    } else {
        format!("http://{}", trimmed.trim_end_matches('/'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_in() {
        let cfg = parse_config("server_url: 127.0.0.1:5151/\n").unwrap();
        assert_eq!(cfg.server_url, "http://127.0.0.1:5151");
        assert_eq!(cfg.warning_threshold(), Duration::from_secs(120));
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
        assert!(cfg.sound && cfg.desktop_notifications);
        assert_eq!(cfg.view, ViewMode::Team);
        assert_eq!(cfg, ClientConfig::new("127.0.0.1:5151"));
    }

    #[test]
    fn overrides_and_validation() {
        let cfg = parse_config(
            "server_url: https://mix.example.com\nview: all\nsound: false\ntick_interval_ms: 5\n",
        )
        .unwrap();
        assert_eq!(cfg.view, ViewMode::All);
        assert!(!cfg.sound);
        assert_eq!(cfg.tick_interval(), Duration::from_millis(100));
        assert!(parse_config("server_url: ' '\n").is_err());
        assert!(parse_config("view: sideways\nserver_url: x\n").is_err());
        assert!(parse_config("server_url: 'http://bad host'\n").is_err());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.yaml");
        let mut cfg = ClientConfig::new("http://h:1");
        cfg.data_dir = Some(dir.path().join("data"));
        save_config(&path, &cfg).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, cfg);
        assert_eq!(loaded.data_dir().unwrap(), dir.path().join("data"));
    }

    #[test]
    fn url_normalization() {
        assert_eq!(normalize_server_url(" h:1/ "), "http://h:1");
        assert_eq!(normalize_server_url("https://h/"), "https://h");
    }
}
