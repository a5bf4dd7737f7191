use std::{env, fmt, fs, path, str::FromStr, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::level_filters::LevelFilter;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to write config file {path}: {source}")]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("failed to parse config file {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("could not determine a config directory (set XDG_CONFIG_HOME or HOME)")]
    ConfigPathUnavailable,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub scheduler: SchedulerConfig,
    pub checker: CheckerConfig,
    pub evaluator: EvaluatorConfig,
    pub metrics: MetricsConfig,
    pub alerting: AlertingConfig,
    pub retention: RetentionConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: path::PathBuf,
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Period of the scheduling loop
    pub tick_millis: u64,
    /// How often the target registry is re-read
    pub reload_seconds: u64,
    pub max_concurrent_checks: usize,
    pub max_dispatch_per_tick: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub user_agent: String,
    pub follow_redirects: bool,
    pub max_idle_connections: usize,
    pub connect_timeout_seconds: u64,
    /// Accept targets on loopback/private networks
    pub allow_private_targets: bool,
    /// Honour HTTP(S)_PROXY from the environment
    pub use_system_proxy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluatorConfig {
    /// Consecutive failures before a target is considered down
    pub failure_threshold: u32,
    /// Consecutive successes before a down target is considered up again
    pub recovery_threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub max_attempts: u32,
    pub base_delay_millis: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    #[default]
    Log,
    Telegram,
    Webhook,
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertChannel::Log => write!(f, "log"),
            AlertChannel::Telegram => write!(f, "telegram"),
            AlertChannel::Webhook => write!(f, "webhook"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertingConfig {
    pub channel: AlertChannel,
    pub max_attempts: u32,
    pub base_delay_millis: u64,
    pub max_delay_seconds: u64,
    pub telegram: TelegramConfig,
    pub webhook: WebhookConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    pub bot_token: String,
    /// Recipient for targets without an owner chat id
    pub default_chat_id: Option<String>,
    pub api_base: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub headers: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    pub result_days: i64,
    pub alert_days: i64,
    pub sweep_interval_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: path::PathBuf::from("watchdog.db"), pool_size: 8 }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { tick_millis: 1000, reload_seconds: 30, max_concurrent_checks: 10, max_dispatch_per_tick: 100 }
    }
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("watchdog/", env!("CARGO_PKG_VERSION")).into(),
            follow_redirects: true,
            max_idle_connections: 20,
            connect_timeout_seconds: 5,
            allow_private_targets: true,
            use_system_proxy: true,
        }
    }
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self { failure_threshold: 3, recovery_threshold: 1 }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_millis: 200 }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            channel: AlertChannel::Log,
            max_attempts: 5,
            base_delay_millis: 1000,
            max_delay_seconds: 60,
            telegram: TelegramConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            default_chat_id: None,
            api_base: "https://api.telegram.org".into(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self { result_days: 30, alert_days: 90, sweep_interval_seconds: 3600 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: "compact".into() }
    }
}

impl SchedulerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }

    pub fn reload_interval(&self) -> Duration {
        Duration::from_secs(self.reload_seconds)
    }
}

impl LoggingConfig {
    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(&self.level).unwrap_or(LevelFilter::INFO)
    }

    pub fn log_format(&self) -> logger::LogFormat {
        self.format.parse().unwrap_or_default()
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/watchdog/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("watchdog/config.toml"))
}

fn mask(secret: &str) -> &str {
    if secret.is_empty() { "<unset>" } else { "********" }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_title_2 = write_title_indented(2);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Watchdog Configuration:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Tick (ms)", &self.scheduler.tick_millis)?;
        write_1(f, "Reload (s)", &self.scheduler.reload_seconds)?;
        write_1(f, "Max Concurrent Checks", &self.scheduler.max_concurrent_checks)?;
        write_1(f, "Max Dispatch Per Tick", &self.scheduler.max_dispatch_per_tick)?;

        write_title_1(f, "Checker")?;
        write_1(f, "User Agent", &self.checker.user_agent)?;
        write_1(f, "Follow Redirects", &self.checker.follow_redirects)?;
        write_1(f, "Connect Timeout (s)", &self.checker.connect_timeout_seconds)?;
        write_1(f, "Allow Private Targets", &self.checker.allow_private_targets)?;

        write_title_1(f, "Evaluator")?;
        write_1(f, "Failure Threshold", &self.evaluator.failure_threshold)?;
        write_1(f, "Recovery Threshold", &self.evaluator.recovery_threshold)?;

        write_title_1(f, "Alerting")?;
        write_1(f, "Channel", &self.alerting.channel)?;
        write_1(f, "Max Attempts", &self.alerting.max_attempts)?;
        write_1(f, "Base Delay (ms)", &self.alerting.base_delay_millis)?;
        write_1(f, "Max Delay (s)", &self.alerting.max_delay_seconds)?;
        write_title_2(f, "Telegram")?;
        write_2(f, "Bot Token", &mask(&self.alerting.telegram.bot_token))?;
        write_2(
            f,
            "Default Chat",
            &self.alerting.telegram.default_chat_id.as_deref().unwrap_or("<unset>"),
        )?;
        write_title_2(f, "Webhook")?;
        let webhook_url = if self.alerting.webhook.url.is_empty() {
            "<unset>"
        } else {
            self.alerting.webhook.url.as_str()
        };
        write_2(f, "URL", &webhook_url)?;

        write_title_1(f, "Retention")?;
        write_1(f, "Results (days)", &self.retention.result_days)?;
        write_1(f, "Alerts (days)", &self.retention.alert_days)?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/watchdog/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    ///
    /// ```no_run
    /// let cfg = watchdog::Config::from_config(None::<&std::path::Path>)?;
    /// println!("{}", cfg);
    /// # Ok::<(), watchdog::config::ConfigError>(())
    /// ```
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())
                .map_err(|source| ConfigError::ParseFailed { path: config_path.clone(), source })?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }

    /// Apply `WATCHDOG_*` environment overrides (secrets usually live in `.env`)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(path) = env::var("WATCHDOG_DATABASE_PATH") {
            self.database.path = path.into();
        }
        if let Ok(token) = env::var("WATCHDOG_TELEGRAM_BOT_TOKEN") {
            self.alerting.telegram.bot_token = token;
        }
        if let Ok(chat_id) = env::var("WATCHDOG_TELEGRAM_CHAT_ID") {
            self.alerting.telegram.default_chat_id = Some(chat_id);
        }
        if let Ok(url) = env::var("WATCHDOG_WEBHOOK_URL") {
            self.alerting.webhook.url = url;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.evaluator.failure_threshold == 0 {
            return invalid("evaluator.failure_threshold must be at least 1");
        }
        if self.evaluator.recovery_threshold == 0 {
            return invalid("evaluator.recovery_threshold must be at least 1");
        }
        if self.scheduler.max_concurrent_checks == 0 {
            return invalid("scheduler.max_concurrent_checks must be at least 1");
        }
        if self.scheduler.tick_millis == 0 {
            return invalid("scheduler.tick_millis must be greater than 0");
        }
        if self.alerting.max_attempts == 0 || self.metrics.max_attempts == 0 {
            return invalid("retry attempts must be at least 1");
        }
        if self.retention.result_days < 1 || self.retention.alert_days < 1 {
            return invalid("retention periods must be at least one day");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_config_when_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/watchdog");

        let config = Config::from_config(Some(&path)).unwrap();

        assert!(dir.path().join("nested/watchdog.toml").exists());
        assert_eq!(config.evaluator.failure_threshold, 3);
        assert_eq!(config.evaluator.recovery_threshold, 1);
        assert_eq!(config.alerting.channel, AlertChannel::Log);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[evaluator]\nfailure_threshold = 5\n\n[alerting]\nchannel = \"telegram\"\n",
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config.evaluator.failure_threshold, 5);
        assert_eq!(config.evaluator.recovery_threshold, 1);
        assert_eq!(config.alerting.channel, AlertChannel::Telegram);
        assert_eq!(config.scheduler.max_concurrent_checks, 10);
    }

    #[test]
    fn rejects_zero_threshold() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[evaluator]\nfailure_threshold = 0\n").unwrap();

        let err = Config::from_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn reports_parse_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[evaluator\n").unwrap();

        let err = Config::from_config(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn display_masks_bot_token() {
        let mut config = Config::default();
        config.alerting.telegram.bot_token = "123:secret".into();

        let rendered = config.to_string();
        assert!(!rendered.contains("123:secret"));
        assert!(rendered.contains("Failure Threshold: 3"));
    }
}
