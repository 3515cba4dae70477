use crate::error::Result;
use crate::notify::{LogNotifier, Notifier, WebhookNotifier};
use crate::paths;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// ConfigWarning / WarnLevel
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigWarning {
    pub level: WarnLevel,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarnLevel {
    Warning,
    Error,
}

// ---------------------------------------------------------------------------
// NotifierConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotifierConfig {
    /// Write reminders to the log.
    #[default]
    Log,
    Webhook {
        url: String,
        #[serde(default = "default_webhook_timeout")]
        timeout_secs: u64,
    },
}

fn default_webhook_timeout() -> u64 {
    10
}

impl NotifierConfig {
    pub fn build(&self) -> Arc<dyn Notifier> {
        match self {
            NotifierConfig::Log => Arc::new(LogNotifier),
            NotifierConfig::Webhook { url, timeout_secs } => Arc::new(WebhookNotifier::new(
                url.clone(),
                Duration::from_secs(*timeout_secs),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Config (top-level)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_manage_url")]
    pub manage_url: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

fn default_manage_url() -> String {
    "https://example.com/account".to_string()
}

fn default_tick_interval() -> u64 {
    5
}

impl Default for Config {
    fn default() -> Self {
        Self {
            manage_url: default_manage_url(),
            tick_interval_secs: default_tick_interval(),
            retry: RetryPolicy::default(),
            notifier: NotifierConfig::default(),
        }
    }
}

impl Config {
    /// Load `.renewal/config.yaml`, or defaults when the file does not exist.
    pub fn load(root: &Path) -> Result<Self> {
        let path = paths::config_path(root);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(&path)?;
        let cfg: Config = serde_yaml::from_str(&data)?;
        Ok(cfg)
    }

    pub fn save(&self, root: &Path) -> Result<()> {
        let path = paths::config_path(root);
        let data = serde_yaml::to_string(self)?;
        crate::io::atomic_write(&path, data.as_bytes())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_secs.max(1))
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    pub fn validate(&self) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !self.manage_url.starts_with("http://") && !self.manage_url.starts_with("https://") {
            warnings.push(ConfigWarning {
                level: WarnLevel::Error,
                message: format!("manage_url '{}' is not an http(s) URL", self.manage_url),
            });
        }

        if self.tick_interval_secs == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "tick_interval_secs=0 is treated as 1".to_string(),
            });
        }

        if self.retry.max_attempts == 0 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: "retry.max_attempts=0 is treated as 1".to_string(),
            });
        } else if self.retry.max_attempts > 10 {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.max_attempts={} (>10 is unusual)",
                    self.retry.max_attempts
                ),
            });
        }

        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            warnings.push(ConfigWarning {
                level: WarnLevel::Warning,
                message: format!(
                    "retry.initial_backoff_ms={} exceeds max_backoff_ms={}",
                    self.retry.initial_backoff_ms, self.retry.max_backoff_ms
                ),
            });
        }

        if let NotifierConfig::Webhook { url, timeout_secs } = &self.notifier {
            if url.trim().is_empty() {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Error,
                    message: "notifier.url is empty".to_string(),
                });
            }
            if *timeout_secs == 0 {
                warnings.push(ConfigWarning {
                    level: WarnLevel::Warning,
                    message: "notifier.timeout_secs=0 makes every delivery time out".to_string(),
                });
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let cfg = Config::load(dir.path()).unwrap();
        assert_eq!(cfg.tick_interval_secs, 5);
        assert_eq!(cfg.retry, RetryPolicy::default());
        assert_eq!(cfg.notifier, NotifierConfig::Log);
        assert!(cfg.validate().is_empty());
    }

    #[test]
    fn save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cfg = Config {
            manage_url: "https://subs.example.org/manage".into(),
            notifier: NotifierConfig::Webhook {
                url: "http://relay.local/send".into(),
                timeout_secs: 3,
            },
            ..Config::default()
        };
        cfg.save(dir.path()).unwrap();

        let loaded = Config::load(dir.path()).unwrap();
        assert_eq!(loaded.manage_url, cfg.manage_url);
        assert_eq!(loaded.notifier, cfg.notifier);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let yaml = "notifier:\n  type: webhook\n  url: http://relay.local\nretry:\n  max_attempts: 5\n";
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.retry.max_attempts, 5);
        assert_eq!(cfg.retry.initial_backoff_ms, 1_000);
        assert_eq!(
            cfg.notifier,
            NotifierConfig::Webhook {
                url: "http://relay.local".into(),
                timeout_secs: 10
            }
        );
        assert_eq!(cfg.manage_url, "https://example.com/account");
    }

    #[test]
    fn validate_flags_bad_values() {
        let cfg = Config {
            manage_url: "example.com".into(),
            tick_interval_secs: 0,
            retry: RetryPolicy {
                max_attempts: 20,
                ..RetryPolicy::default()
            },
            notifier: NotifierConfig::Webhook {
                url: " ".into(),
                timeout_secs: 10,
            },
        };
        let warnings = cfg.validate();
        let errors = warnings
            .iter()
            .filter(|w| w.level == WarnLevel::Error)
            .count();
        assert_eq!(errors, 2);
        assert!(warnings.iter().any(|w| w.message.contains(">10")));
        assert!(warnings.iter().any(|w| w.message.contains("tick_interval_secs")));
    }

    #[test]
    fn tick_interval_never_zero() {
        let cfg = Config {
            tick_interval_secs: 0,
            ..Config::default()
        };
        assert_eq!(cfg.tick_interval(), Duration::from_secs(1));
    }
}
