use std::{env, fmt, fs, path, time::Duration};

use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::monitoring::alert::AlertPolicy;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read config file: {0}")]
    ReadFailed(#[source] std::io::Error),
    #[error("failed to write config file: {0}")]
    WriteFailed(#[source] std::io::Error),
    #[error("failed to parse config file: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("no config path available, set XDG_CONFIG_HOME or HOME")]
    ConfigPathUnavailable,
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorSettings,
    pub database: DatabaseSettings,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp: Option<SmtpConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Sleep between two cycles
    pub tick_interval_seconds: u64,
    /// Probe timeout for targets that do not set their own
    pub probe_timeout_seconds: u64,
    /// Upper bound on probes in flight; unbounded when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_concurrent_probes: Option<usize>,
    pub alert_policy: AlertPolicy,
    /// Offset of the timezone used in alert messages
    pub alert_utc_offset_minutes: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: String,
    pub max_connections: usize,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    pub from_address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
}

fn default_smtp_port() -> u16 {
    587
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            probe_timeout_seconds: 5,
            max_concurrent_probes: None,
            alert_policy: AlertPolicy::default(),
            alert_utc_offset_minutes: 180,
        }
    }
}

impl MonitorSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_seconds)
    }

    pub fn alert_timezone(&self) -> FixedOffset {
        self.alert_offset().unwrap_or_else(|| Utc.fix())
    }

    /// `None` when the configured offset is not a valid UTC offset
    fn alert_offset(&self) -> Option<FixedOffset> {
        self.alert_utc_offset_minutes.checked_mul(60).and_then(FixedOffset::east_opt)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self { path: "beacon.db".into(), max_connections: 8 }
    }
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("from_address", &self.from_address)
            .field("sender_name", &self.sender_name)
            .finish()
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

/// Get default config path ($XDG_CONFIG_HOME/beacon/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, Error> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(Error::ConfigPathUnavailable);
    };

    Ok(path.join("beacon/config.toml"))
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
        let write_1 = write_indented(1);
        let unbounded = "unbounded".to_string();

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Monitor")?;
        write_1(f, "Tick Interval (s)", &self.monitor.tick_interval_seconds)?;
        write_1(f, "Probe Timeout (s)", &self.monitor.probe_timeout_seconds)?;
        write_1(
            f,
            "Max Concurrent Probes",
            &self.monitor.max_concurrent_probes.map(|n| n.to_string()).unwrap_or(unbounded),
        )?;
        write_1(f, "Alert Policy", &format!("{:?}", self.monitor.alert_policy))?;
        write_1(f, "Alert Timezone", &self.monitor.alert_timezone())?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path)?;
        write_1(f, "Max Connections", &self.database.max_connections)?;
        write_title_1(f, "SMTP")?;
        match &self.smtp {
            Some(smtp) => {
                write_1(f, "Host", &smtp.host)?;
                write_1(f, "Port", &smtp.port)?;
                write_1(f, "From", &smtp.from_address)?;
                write_1(f, "Username", &smtp.username.as_deref().unwrap_or("-"))?;
                write_1(f, "Password", &if smtp.password.is_some() { "********" } else { "-" })?;
            }
            None => write_1(f, "Transport", &"disabled (alerts are logged only)")?,
        }

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/beacon/config.toml
    ///  or the specified path, with the name config.toml if one does not exist
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path).map_err(Error::ReadFailed)?;
            Ok(toml::from_str(raw_string.as_str())?)
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            Ok(config)
        }
    }

    /// Read the file, apply environment overrides and validate the result
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, Error> {
        let mut config = Self::from_config(optional_path)?;
        config.apply_overrides(|key| env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), Error> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(Error::WriteFailed)?;
        }

        fs::write(path, config_str).map_err(Error::WriteFailed)
    }

    /// Apply overrides from the environment (or any other key lookup)
    ///
    /// `SMTP_HOST` alone is enough to enable the SMTP transport; the login
    /// defaults to the sender address.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(path) = lookup("BEACON_DATABASE_PATH") {
            self.database.path = path;
        }

        if let Some(host) = lookup("SMTP_HOST") {
            match self.smtp.as_mut() {
                Some(smtp) => smtp.host = host,
                None => {
                    self.smtp = Some(SmtpConfig {
                        host,
                        port: default_smtp_port(),
                        username: None,
                        password: None,
                        from_address: String::new(),
                        sender_name: None,
                    })
                }
            }
        }

        let Some(smtp) = self.smtp.as_mut() else {
            return;
        };

        if let Some(port) = lookup("SMTP_PORT").and_then(|p| p.parse().ok()) {
            smtp.port = port;
        }
        if let Some(email) = lookup("SMTP_EMAIL") {
            if smtp.username.is_none() {
                smtp.username = Some(email.clone());
            }
            smtp.from_address = email;
        }
        if let Some(password) = lookup("SMTP_PASSWORD") {
            smtp.password = Some(password);
        }
        if let Some(name) = lookup("SENDER_NAME") {
            smtp.sender_name = Some(name);
        }
    }

    pub fn validate(&self) -> Result<(), Error> {
        let monitor = &self.monitor;

        if monitor.tick_interval_seconds == 0 {
            return Err(Error::Invalid("tick_interval_seconds must be at least 1".into()));
        }
        if !(1..=300).contains(&monitor.probe_timeout_seconds) {
            return Err(Error::Invalid(format!(
                "probe_timeout_seconds must be between 1 and 300, got {}",
                monitor.probe_timeout_seconds
            )));
        }
        if monitor.max_concurrent_probes == Some(0) {
            return Err(Error::Invalid("max_concurrent_probes must be at least 1 when set".into()));
        }
        if monitor.alert_offset().is_none() {
            return Err(Error::Invalid(format!(
                "alert_utc_offset_minutes out of range: {}",
                monitor.alert_utc_offset_minutes
            )));
        }
        if let Some(smtp) = &self.smtp {
            if smtp.from_address.is_empty() {
                return Err(Error::Invalid("smtp.from_address is required when SMTP is enabled".into()));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.monitor.tick_interval(), Duration::from_secs(30));
        assert_eq!(config.monitor.probe_timeout(), Duration::from_secs(5));
        assert_eq!(config.monitor.max_concurrent_probes, None);
        assert_eq!(config.monitor.alert_policy, AlertPolicy::Elapsed);
        assert_eq!(config.monitor.alert_timezone().local_minus_utc(), 3 * 3600);
        assert!(config.smtp.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_file_writes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/config");

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config, Config::default());
        assert!(dir.path().join("nested/config.toml").exists());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            "[monitor]\ntick_interval_seconds = 10\nmax_concurrent_probes = 4\nalert_policy = \"while_failing\"\n\n[smtp]\nhost = \"smtp.example.com\"\nfrom_address = \"monitor@example.com\"\n",
        )
        .unwrap();

        let config = Config::from_config(Some(&path)).unwrap();

        assert_eq!(config.monitor.tick_interval_seconds, 10);
        assert_eq!(config.monitor.probe_timeout_seconds, 5);
        assert_eq!(config.monitor.max_concurrent_probes, Some(4));
        assert_eq!(config.monitor.alert_policy, AlertPolicy::WhileFailing);
        let smtp = config.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_address, "monitor@example.com");
    }

    #[test]
    fn test_invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[monitor\n").unwrap();

        assert!(matches!(Config::from_config(Some(&path)), Err(Error::ParseFailed(_))));
    }

    #[test]
    fn test_env_overrides_enable_smtp() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("BEACON_DATABASE_PATH", "/var/lib/beacon/beacon.db"),
            ("SMTP_HOST", "smtp.example.com"),
            ("SMTP_PORT", "465"),
            ("SMTP_EMAIL", "alerts@example.com"),
            ("SMTP_PASSWORD", "secret"),
            ("SENDER_NAME", "Beacon"),
        ]);

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, "/var/lib/beacon/beacon.db");
        let smtp = config.smtp.as_ref().unwrap();
        assert_eq!(smtp.host, "smtp.example.com");
        assert_eq!(smtp.port, 465);
        assert_eq!(smtp.username.as_deref(), Some("alerts@example.com"));
        assert_eq!(smtp.from_address, "alerts@example.com");
        assert_eq!(smtp.sender_name.as_deref(), Some("Beacon"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = Config::default();
        config.monitor.tick_interval_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.probe_timeout_seconds = 301;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.max_concurrent_probes = Some(0);
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.monitor.alert_utc_offset_minutes = 24 * 60;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.apply_overrides(|key| (key == "SMTP_HOST").then(|| "smtp.example.com".to_string()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_offset_is_rejected_without_overflow() {
        let mut config = Config::default();
        config.monitor.alert_utc_offset_minutes = i32::MAX;

        assert!(matches!(config.validate(), Err(Error::Invalid(_))));
        assert_eq!(config.monitor.alert_timezone().local_minus_utc(), 0);

        config.monitor.alert_utc_offset_minutes = i32::MIN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_display_masks_password() {
        let mut config = Config::default();
        config.smtp = Some(SmtpConfig {
            host: "smtp.example.com".into(),
            port: 587,
            username: Some("alerts@example.com".into()),
            password: Some("hunter2".into()),
            from_address: "alerts@example.com".into(),
            sender_name: None,
        });

        let rendered = config.to_string();
        assert!(rendered.contains("smtp.example.com"));
        assert!(!rendered.contains("hunter2"));
        assert!(!format!("{:?}", config).contains("hunter2"));
    }
}
