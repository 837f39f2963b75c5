/*!
Configuration structures for the zone tracker
*/

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::scan_feed::DEFAULT_FEED_CAPACITY;
use crate::error::TrackerResult;

/// Main configuration for the tracker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    pub registry: RegistryConfig,
    pub feed: FeedConfig,
    pub outputs: Vec<OutputConfig>,
}

/// Registry persistence and registration defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Durable backing for tag records
    pub store: StoreBackend,
    /// Absence timeout assigned to newly registered tags; 0 = never alert
    pub default_timeout_secs: u64,
}

/// Which store implementation backs the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StoreBackend {
    Json { path: PathBuf },
    Sqlite { path: PathBuf },
    Memory,
}

/// Scan feed tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Bound of the scan channel between decoders and the tracker
    pub channel_capacity: usize,
}

/// One output destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub plugin: SinkPlugin,
    pub enabled: bool,
}

/// Available sink types
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SinkPlugin {
    /// Print events to stdout
    Terminal { format: TerminalFormat },
    /// Append classic scanner log lines to a file
    TextLog { path: PathBuf },
    /// Append JSON records to a file
    JsonLines { path: PathBuf, pretty: bool },
    /// Insert events into a SQLite table
    Sqlite { path: PathBuf, table_name: String },
    /// POST events to an HTTP endpoint
    Webhook {
        url: String,
        auth_token: Option<String>,
        alerts_only: bool,
    },
}

/// Terminal output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminalFormat {
    Plain,
    Colored,
    Json,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            registry: RegistryConfig::default(),
            feed: FeedConfig::default(),
            outputs: vec![
                OutputConfig {
                    plugin: SinkPlugin::Terminal {
                        format: TerminalFormat::Colored,
                    },
                    enabled: true,
                },
                OutputConfig {
                    plugin: SinkPlugin::TextLog {
                        path: PathBuf::from("./tagwatch_log.txt"),
                    },
                    enabled: true,
                },
            ],
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: StoreBackend::Json {
                path: PathBuf::from("./tagwatch_tags.json"),
            },
            default_timeout_secs: 300,
        }
    }
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_FEED_CAPACITY,
        }
    }
}

impl TrackerConfig {
    /// Load configuration from a TOML file
    pub async fn from_file(path: impl AsRef<Path>) -> TrackerResult<Self> {
        let content = tokio::fs::read_to_string(path.as_ref()).await?;
        Ok(toml::from_str(&content)?)
    }

    /// Default configuration with the registry and text log under `dir`
    pub fn with_data_dir(dir: &Path) -> Self {
        let mut config = Self::default();
        config.registry.store = StoreBackend::Json {
            path: dir.join("tags.json"),
        };
        config.outputs = vec![
            OutputConfig {
                plugin: SinkPlugin::Terminal {
                    format: TerminalFormat::Colored,
                },
                enabled: true,
            },
            OutputConfig {
                plugin: SinkPlugin::TextLog {
                    path: dir.join("events.log"),
                },
                enabled: true,
            },
        ];
        config
    }
}
