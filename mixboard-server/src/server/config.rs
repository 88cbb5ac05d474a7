use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub dev_cors_origin: Option<String>,
    pub listen_port: Option<u16>,
    #[serde(default)]
    pub mail: MailConfig,
}

/// Outgoing mail settings for final-stage notices.
#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    #[serde(default = "default_mail_enabled")]
    pub enabled: bool,
    #[serde(default = "default_mail_from")]
    pub from: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            enabled: default_mail_enabled(),
            from: default_mail_from(),
        }
    }
}

fn default_mail_enabled() -> bool {
    true
}

fn default_mail_from() -> String {
    "mixboard@localhost".to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_path(path)
    }

    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(&path)?;
        Self::from_yaml(&text)
    }

    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = serde_yaml::from_str(text)?;
        if cfg.jwt_secret.trim().is_empty() {
            return Err(ConfigError::Invalid("jwt_secret must not be empty".into()));
        }
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_mail_defaults() {
        let cfg = AppConfig::from_yaml("jwt_secret: s3cret\n").unwrap();
        assert_eq!(cfg.listen_port, None);
        assert!(cfg.mail.enabled);
        assert_eq!(cfg.mail.from, "mixboard@localhost");
    }

    #[test]
    fn explicit_values_and_empty_secret() {
        let cfg = AppConfig::from_yaml(
            "jwt_secret: x\nlisten_port: 8080\nmail:\n  enabled: false\n  from: ops@example.com\n",
        )
        .unwrap();
        assert_eq!(cfg.listen_port, Some(8080));
        assert!(!cfg.mail.enabled);
        assert_eq!(cfg.mail.from, "ops@example.com");

        let err = AppConfig::from_yaml("jwt_secret: '  '\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }
}
