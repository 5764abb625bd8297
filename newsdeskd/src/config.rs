use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

const DEFAULT_API_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_FLUSH_SECS: u64 = 30;
const DEFAULT_PROBE_SECS: u64 = 10;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DATA_DIR_NAME: &str = "newsdesk";
const DB_FILE_NAME: &str = "newsdesk.db";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("NEWSDESK_TOKEN is required when NEWSDESK_USER is set (user {0})")]
    MissingToken(String),
    #[error("home directory is unavailable")]
    NoHome,
}

/// Signed-in identity. Without one the daemon runs in guest mode.
#[derive(Clone, PartialEq, Eq)]
pub struct Account {
    pub user_id: String,
    pub token: String,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct Config {
    pub api_url: String,
    pub account: Option<Account>,
    pub data_dir: PathBuf,
    pub flush_interval: Duration,
    pub probe_interval: Duration,
    pub http_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Self::resolve(lookup, dirs::home_dir())
    }

    fn resolve<F>(lookup: F, home: Option<PathBuf>) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let api_url = read("NEWSDESK_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let account = match read("NEWSDESK_USER") {
            Some(user_id) => {
                let token = read("NEWSDESK_TOKEN")
                    .ok_or_else(|| ConfigError::MissingToken(user_id.clone()))?;
                Some(Account { user_id, token })
            }
            None => None,
        };
        let data_dir = match read("NEWSDESK_DATA_DIR") {
            Some(value) if needs_home(&value) => {
                let home = home.as_deref().ok_or(ConfigError::NoHome)?;
                expand_with_home(&value, home)
            }
            Some(value) => PathBuf::from(value),
            None => default_data_dir(),
        };
        let secs = |name: &str, default: u64| Duration::from_secs(parse_u64(read(name), default));

        Ok(Self {
            api_url,
            account,
            data_dir,
            flush_interval: secs("NEWSDESK_FLUSH_SECS", DEFAULT_FLUSH_SECS),
            probe_interval: secs("NEWSDESK_PROBE_SECS", DEFAULT_PROBE_SECS),
            http_timeout: secs("NEWSDESK_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS),
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join(DB_FILE_NAME)
    }
}

fn needs_home(value: &str) -> bool {
    value == "~" || value.starts_with("~/")
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(DATA_DIR_NAME)
}

fn parse_u64(value: Option<String>, default: u64) -> u64 {
    value
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
