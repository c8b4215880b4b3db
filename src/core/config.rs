use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};
use tracing::debug;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CoinGeckoProviderConfig {
    pub base_url: String,
    /// The two currencies the BTC spot price is fetched in.
    #[serde(default = "default_reference_currencies")]
    pub reference_currencies: [String; 2],
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FrankfurterProviderConfig {
    pub base_url: String,
    /// Every fiat rate is fetched against this currency.
    #[serde(default = "default_pivot_currency")]
    pub pivot_currency: String,
}

fn default_reference_currencies() -> [String; 2] {
    ["USD".to_string(), "EUR".to_string()]
}

fn default_pivot_currency() -> String {
    "EUR".to_string()
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ProvidersConfig {
    pub coingecko: Option<CoinGeckoProviderConfig>,
    pub frankfurter: Option<FrankfurterProviderConfig>,
}

fn default_coingecko() -> CoinGeckoProviderConfig {
    CoinGeckoProviderConfig {
        base_url: "https://api.coingecko.com".to_string(),
        reference_currencies: default_reference_currencies(),
    }
}

fn default_frankfurter() -> FrankfurterProviderConfig {
    FrankfurterProviderConfig {
        base_url: "https://api.frankfurter.app".to_string(),
        pivot_currency: default_pivot_currency(),
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        ProvidersConfig {
            coingecko: Some(default_coingecko()),
            frankfurter: Some(default_frankfurter()),
        }
    }
}

impl ProvidersConfig {
    pub fn coingecko(&self) -> CoinGeckoProviderConfig {
        self.coingecko.clone().unwrap_or_else(default_coingecko)
    }

    pub fn frankfurter(&self) -> FrankfurterProviderConfig {
        self.frankfurter.clone().unwrap_or_else(default_frankfurter)
    }
}

/// Cadences of the background jobs and upstream request limits, in seconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct RefreshConfig {
    pub price_interval_secs: u64,
    pub rates_interval_secs: u64,
    pub summary_interval_secs: u64,
    pub fetch_timeout_secs: u64,
    /// Age after which a held price is reported as stale rather than live.
    pub stale_after_secs: u64,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        RefreshConfig {
            price_interval_secs: 300,
            rates_interval_secs: 6 * 60 * 60,
            summary_interval_secs: 300,
            fetch_timeout_secs: 10,
            stale_after_secs: 900,
        }
    }
}

impl RefreshConfig {
    pub fn price_interval(&self) -> Duration {
        Duration::from_secs(self.price_interval_secs.max(1))
    }

    pub fn rates_interval(&self) -> Duration {
        Duration::from_secs(self.rates_interval_secs.max(1))
    }

    pub fn summary_interval(&self) -> Duration {
        Duration::from_secs(self.summary_interval_secs.max(1))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs.max(1))
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub main_currency: String,
    #[serde(default = "default_secondary_currency")]
    pub secondary_currency: String,
    pub ledger_path: Option<String>,
    pub data_path: Option<String>,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

fn default_secondary_currency() -> String {
    "USD".to_string()
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        debug!("Loading default config");
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    pub fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("org", "satfolio", "satfolio")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.config_dir().join("config.yaml"))
    }

    pub fn default_data_path(&self) -> Result<PathBuf> {
        if let Some(custom_path) = &self.data_path {
            return Ok(PathBuf::from(custom_path));
        }
        let proj_dirs = ProjectDirs::from("org", "satfolio", "satfolio")
            .context("Could not determine project directories")?;
        Ok(proj_dirs.data_dir().to_path_buf())
    }

    /// The ledger file, defaulting to `ledger.yaml` in the data directory.
    pub fn ledger_path(&self) -> Result<PathBuf> {
        match &self.ledger_path {
            Some(path) => Ok(PathBuf::from(path)),
            None => Ok(self.default_data_path()?.join("ledger.yaml")),
        }
    }

    pub fn load_from_path<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let config_str = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let mut config: Self = serde_yaml::from_str(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;
        config.main_currency = config.main_currency.to_ascii_uppercase();
        config.secondary_currency = config.secondary_currency.to_ascii_uppercase();
        debug!("Successfully loaded config");
        Ok(config)
    }
}
