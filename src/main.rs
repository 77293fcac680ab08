mod comfy_table;
mod error;
mod filter_utils;
mod find_tickers;
mod history;
mod klines;
mod notify;
mod scanner;
mod signals;
mod storage_utils;
mod symbols;
mod time_utils;

#[cfg(test)]
mod test_support;

use anyhow::Context;
use klines::{BinanceKlineClient, MarketDataProvider};
use notify::{AlertSink, DisabledAlerts, PushoverClient};
use scanner::{ScanSettings, Scanner};
use std::sync::Arc;
use std::time::Duration;
use storage_utils::{AppConfig, AsyncStorageManager};
use symbols::SymbolSource;
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Step 1: Load configuration
    let storage = AsyncStorageManager::new_relative("storage").await?;
    let config = match AppConfig::load(&storage).await {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {:#}", e);
            eprintln!("Config lives at {:?}", storage.base_dir.join("config.json"));
            return Err(e);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::info!(
        storage = %storage.base_dir.display(),
        rest_url = %config.market.rest_base_url,
        quote = %config.market.quote_currency,
        "Configuration loaded"
    );

    // Step 2: Symbol list
    let symbols = open_symbol_source(&storage, &config).await?;

    // Step 3: Market data and alerts
    let provider: Arc<dyn MarketDataProvider> = Arc::new(BinanceKlineClient::new(
        &config.market.rest_base_url,
        Duration::from_millis(config.fetch.timeout_ms),
        config.retry_policy(),
    )?);

    let alerts: Arc<dyn AlertSink> = match config.pushover_credentials() {
        Some((token, user)) => Arc::new(PushoverClient::new(token, user)),
        None => {
            tracing::warn!(
                "Push notifications off (set PUSHOVER_API_TOKEN and PUSHOVER_USER_KEY to enable)"
            );
            Arc::new(DisabledAlerts)
        }
    };

    let settings = ScanSettings {
        poll_window: config.scan.poll_window.clone(),
        poll_interval: config.scan.poll_interval.clone(),
        thresholds: config.thresholds(),
        fetch: config.fetch_options(),
        iteration_pause: Duration::from_millis(config.scan.iteration_pause_ms),
    };

    // Step 4: Scan until Ctrl-C
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Shutdown requested");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut scanner = Scanner::new(symbols, provider, alerts, settings);
    let result = scanner.run(shutdown_rx).await;

    // Step 5: Session summary
    if let Some(summary) = comfy_table::render_summary(scanner.alert_history()) {
        println!("{}", summary);
    }

    result.context("scan loop aborted")
}

async fn open_symbol_source(
    storage: &AsyncStorageManager,
    config: &AppConfig,
) -> anyhow::Result<SymbolSource> {
    let quote = &config.market.quote_currency;

    if let Some(file) = &config.market.symbols_file {
        let path = storage.resolve(file);
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            tracing::info!(path = %path.display(), "Reading symbols from file");
            return SymbolSource::open(&path, quote)
                .await
                .with_context(|| format!("failed to open {}", path.display()));
        }
        tracing::info!(
            path = %path.display(),
            "Symbol file not found, discovering symbols from exchange info"
        );
    }

    let assets = find_tickers::fetch_base_assets(
        &config.market.rest_base_url,
        quote,
        &config.market.filters,
    )
    .await?;
    Ok(SymbolSource::from_symbols(&assets, quote))
}
