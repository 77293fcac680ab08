use crate::history::FetchOptions;
use crate::klines::{MAX_PAGE_LIMIT, RetryPolicy};
use crate::signals::SignalThresholds;
use crate::time_utils::{date_to_millis, interval_to_millis};
use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

// CONFIGURATION STRUCTS
// Every section has defaults, so a partial config.json only overrides what it names.

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MarketConfig {
    pub rest_base_url: String,
    pub quote_currency: String, // e.g., "ETH"
    /// One base asset per line. Relative paths resolve against the storage dir.
    /// When unset or missing, symbols are discovered from exchange info.
    pub symbols_file: Option<String>,
    /// Exchange-info fields a symbol must match during discovery.
    pub filters: HashMap<String, String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            rest_base_url: "https://api.binance.com".to_string(),
            quote_currency: "ETH".to_string(),
            symbols_file: Some("symbols.txt".to_string()),
            filters: HashMap::from([("status".to_string(), "TRADING".to_string())]),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ScanConfig {
    pub poll_window: String,   // e.g., "5 minutes ago"
    pub poll_interval: String, // e.g., "1m"
    pub growth_alert_threshold: Decimal,
    pub growth_push_threshold: Decimal,
    pub volume_threshold: Decimal,
    pub iteration_pause_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            poll_window: "5 minutes ago".to_string(),
            poll_interval: "1m".to_string(),
            growth_alert_threshold: Decimal::new(1, 3),
            growth_push_threshold: Decimal::new(175, 2),
            volume_threshold: Decimal::from(499),
            iteration_pause_ms: 0,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FetchConfig {
    pub page_limit: u32,
    pub pause_every_pages: u32,
    pub page_pause_ms: u64,
    pub max_probe_pages: u32,
    pub max_pages: u32,
    pub retries: u32,
    pub backoff_ms: u64,
    pub timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_limit: MAX_PAGE_LIMIT,
            pause_every_pages: 3,
            page_pause_ms: 1_000,
            max_probe_pages: 60,
            max_pages: 10_000,
            retries: 3,
            backoff_ms: 500,
            timeout_ms: 10_000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    pub push_enabled: bool,
    #[serde(skip)]
    pub pushover_api_token: Option<String>,
    #[serde(skip)]
    pub pushover_user_key: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            push_enabled: true,
            pushover_api_token: None,
            pushover_user_key: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub market: MarketConfig,
    pub scan: ScanConfig,
    pub fetch: FetchConfig,
    pub alerts: AlertConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load `config.json` from storage, writing the defaults on first run.
    /// Pushover credentials come from the environment (or `.env`).
    pub async fn load(storage: &AsyncStorageManager) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut config: AppConfig = if storage.exists("config").await {
            storage.load("config").await.context("failed to parse config.json")?
        } else {
            let defaults = AppConfig::default();
            storage.save("config", &defaults).await?;
            defaults
        };

        config.alerts.pushover_api_token = non_empty_env("PUSHOVER_API_TOKEN");
        config.alerts.pushover_user_key = non_empty_env("PUSHOVER_USER_KEY");

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.market.quote_currency.trim().is_empty() {
            bail!("market.quote_currency must not be empty");
        }
        interval_to_millis(&self.scan.poll_interval).context("scan.poll_interval is invalid")?;
        date_to_millis(&self.scan.poll_window).context("scan.poll_window is invalid")?;
        if self.fetch.page_limit == 0 || self.fetch.page_limit > MAX_PAGE_LIMIT {
            bail!("fetch.page_limit must be between 1 and {}", MAX_PAGE_LIMIT);
        }
        Ok(())
    }

    pub fn thresholds(&self) -> SignalThresholds {
        SignalThresholds {
            growth_alert: self.scan.growth_alert_threshold,
            growth_push: self.scan.growth_push_threshold,
            volume: self.scan.volume_threshold,
        }
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            page_limit: self.fetch.page_limit,
            pause_every_pages: self.fetch.pause_every_pages,
            page_pause: Duration::from_millis(self.fetch.page_pause_ms),
            max_probe_pages: self.fetch.max_probe_pages,
            max_pages: self.fetch.max_pages,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.fetch.retries,
            initial_backoff: Duration::from_millis(self.fetch.backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Both Pushover credentials, when pushes are enabled and configured.
    pub fn pushover_credentials(&self) -> Option<(&str, &str)> {
        if !self.alerts.push_enabled {
            return None;
        }
        match (
            self.alerts.pushover_api_token.as_deref(),
            self.alerts.pushover_user_key.as_deref(),
        ) {
            (Some(token), Some(user)) => Some((token, user)),
            _ => None,
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

// STORAGE MANAGER

pub struct AsyncStorageManager {
    // Absolute path to the storage directory (e.g., ".../target/debug/storage")
    pub base_dir: PathBuf,
}

impl AsyncStorageManager {
    /// Storage directory relative to the running executable, created if needed.
    pub async fn new_relative<P: AsRef<Path>>(relative_path: P) -> anyhow::Result<Self> {
        let exe_path = std::env::current_exe()?;

        let base_dir = exe_path
            .parent()
            .ok_or_else(|| anyhow::anyhow!("Could not find binary directory"))?
            .join(relative_path);

        Self::new(base_dir).await
    }

    pub async fn new(base_dir: PathBuf) -> anyhow::Result<Self> {
        // Create the directory up front so saves never have to check for it.
        if !base_dir.exists() {
            fs::create_dir_all(&base_dir).await?;
        }

        Ok(Self { base_dir })
    }

    /// Resolve a possibly relative path against the storage directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub async fn exists(&self, filename: &str) -> bool {
        fs::try_exists(self.base_dir.join(format!("{}.json", filename)))
            .await
            .unwrap_or(false)
    }

    /// Atomic write: serialize to a `.tmp` file, then rename over the target.
    pub async fn save<T: Serialize>(&self, filename: &str, data: &T) -> anyhow::Result<()> {
        let file_name = format!("{}.json", filename);
        let final_path = self.base_dir.join(&file_name);
        let tmp_path = self.base_dir.join(format!("{}.tmp", file_name));

        let json_bytes = serde_json::to_vec_pretty(data)?;

        fs::write(&tmp_path, json_bytes).await?;
        fs::rename(tmp_path, final_path).await?;

        Ok(())
    }

    pub async fn load<T: DeserializeOwned>(&self, filename: &str) -> anyhow::Result<T> {
        let path = self.base_dir.join(format!("{}.json", filename));

        // Bytes, not a String: serde_json validates UTF-8 while parsing anyway.
        let content = fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let data = serde_json::from_slice(&content)?;
        Ok(data)
    }
}
