use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{CoreError, CoreErrorKind};
use crate::sites::Site;

pub const DEFAULT_CONFIG_FILE: &str = "crawldesk.toml";
pub const SETTLE_OVERRIDE_ENV: &str = "CRAWLDESK_SETTLE_MS";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub pacing: PacingConfig,

    #[serde(default)]
    pub sites: BTreeMap<Site, SiteConfig>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_root_dir_name")]
    pub root_dir_name: String,

    #[serde(default = "default_folder_name")]
    pub default_folder_name: String,

    #[serde(default = "default_reserved_marker")]
    pub reserved_marker: String,

    #[serde(default = "default_true")]
    pub reveal: bool,
}

fn default_root_dir_name() -> String {
    "excel_database".to_string()
}

fn default_folder_name() -> String {
    "result".to_string()
}

fn default_reserved_marker() -> String {
    "query".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root_dir_name: default_root_dir_name(),
            default_folder_name: default_folder_name(),
            reserved_marker: default_reserved_marker(),
            reveal: true,
        }
    }
}

/// Politeness delays towards the target portals.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PacingConfig {
    #[serde(default)]
    pub item_delay_ms: u64,

    #[serde(default = "default_session_settle_ms")]
    pub session_settle_ms: u64,
}

fn default_session_settle_ms() -> u64 {
    5_000
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            item_delay_ms: 0,
            session_settle_ms: default_session_settle_ms(),
        }
    }
}

impl PacingConfig {
    pub fn immediate() -> Self {
        Self {
            item_delay_ms: 0,
            session_settle_ms: 0,
        }
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn session_settle(&self) -> Duration {
        Duration::from_millis(self.session_settle_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SiteConfig {
    pub program: PathBuf,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default)]
    pub item_timeout_ms: Option<u64>,
}

impl SiteConfig {
    pub fn item_timeout(&self) -> Option<Duration> {
        self.item_timeout_ms
            .filter(|millis| *millis > 0)
            .map(Duration::from_millis)
    }
}

impl EngineConfig {
    /// Loads `explicit` if given, otherwise `./crawldesk.toml` when present,
    /// otherwise the defaults. The settle-delay environment override wins over
    /// all of them.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CoreError> {
        let local = Path::new(DEFAULT_CONFIG_FILE);

        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None if local.exists() => Self::from_file(local)?,
            None => Self::default(),
        };

        if let Ok(value) = std::env::var(SETTLE_OVERRIDE_ENV)
            && !value.trim().is_empty()
        {
            config.pacing.session_settle_ms = value.trim().parse().map_err(|error| {
                CoreError::new(
                    CoreErrorKind::InvalidInput,
                    format!("{SETTLE_OVERRIDE_ENV} must be a number of milliseconds: {error}"),
                )
            })?;
        }

        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|error| {
            CoreError::new(
                CoreErrorKind::StorageFailure,
                format!("failed to read config '{}': {error}", path.display()),
            )
        })?;
        Self::from_toml(&text).map_err(|error| CoreError {
            message: format!("{} ({})", error.message, path.display()),
            ..error
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, CoreError> {
        toml::from_str(text).map_err(|error| {
            CoreError::new(
                CoreErrorKind::ParseFailure,
                format!("invalid engine config: {error}"),
            )
        })
    }

    pub fn site(&self, site: Site) -> Option<&SiteConfig> {
        self.sites.get(&site)
    }
}
