use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Process-level engine configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    /// Suppresses the initial-data import; set on nodes joining an already
    /// populated store.
    #[serde(default)]
    pub skip_init_data: bool,
    /// Directory scanned for `*-data.json` bootstrap files.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    /// Definitions store namespace.
    #[serde(default = "default_keyspace")]
    pub keyspace: String,
    /// Hard bound on cross-tenant admin scans of the definitions store.
    #[serde(default = "default_admin_fetch_secs")]
    pub admin_fetch_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            skip_init_data: false,
            data_dir: None,
            keyspace: default_keyspace(),
            admin_fetch_timeout_secs: default_admin_fetch_secs(),
        }
    }
}

fn default_keyspace() -> String {
    "vigil".to_string()
}

fn default_admin_fetch_secs() -> u64 {
    60
}

impl EngineConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn admin_fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.admin_fetch_timeout_secs)
    }
}
