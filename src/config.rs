//! Runtime configuration.
//!
//! Loads from `config.toml`. Credentials are not stored here; the config
//! names the environment variables to read them from.

use serde::Deserialize;
use std::path::Path;

/// Quoting parameters for the grid strategy.
#[derive(Debug, Clone, Deserialize)]
pub struct GridConfig {
    /// Half-spread from mid in basis points
    #[serde(default = "default_spacing_bps")]
    pub spacing_bps: f64,
    /// Fraction of balance committed per quote
    #[serde(default = "default_order_fraction")]
    pub order_fraction: f64,
    /// Maximum size held per side
    #[serde(default = "default_max_position")]
    pub max_position: f64,
}

fn default_spacing_bps() -> f64 {
    10.0
}
fn default_order_fraction() -> f64 {
    0.05
}
fn default_max_position() -> f64 {
    1.0
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            spacing_bps: default_spacing_bps(),
            order_fraction: default_order_fraction(),
            max_position: default_max_position(),
        }
    }
}

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct BotConfig {
    /// Target symbol (e.g. "BTCUSDT")
    pub symbol: String,
    /// Account identifier, for logging and key lookup
    pub user: String,
    /// Strategy evaluation cadence in seconds
    pub call_interval_secs: u64,
    #[serde(default = "default_leverage")]
    pub leverage: u32,
    #[serde(default)]
    pub testnet: bool,
    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Environment variable holding the API secret
    #[serde(default = "default_api_secret_env")]
    pub api_secret_env: String,
    #[serde(default)]
    pub grid: GridConfig,
}

fn default_leverage() -> u32 {
    1
}
fn default_api_key_env() -> String {
    "MARLIN_API_KEY".to_string()
}
fn default_api_secret_env() -> String {
    "MARLIN_API_SECRET".to_string()
}

impl BotConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BotConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from `config.toml` next to the working directory or crate root.
    pub fn load_default() -> anyhow::Result<Self> {
        let candidates = [
            "config.toml",
            concat!(env!("CARGO_MANIFEST_DIR"), "/config.toml"),
        ];
        for path in &candidates {
            let path = Path::new(path);
            if path.exists() {
                let config = Self::load(path)?;
                tracing::info!("loaded config from {}", path.display());
                return Ok(config);
            }
        }
        anyhow::bail!("no config.toml found")
    }
}
