//! The scan loop: pull the next symbol, fetch a short trailing window,
//! evaluate it and report surges.

use crate::error::ScanError;
use crate::history::{FetchOptions, get_historical_klines};
use crate::klines::MarketDataProvider;
use crate::notify::{AlertSink, Delivery};
use crate::signals::{AlertLevel, SignalThresholds, WindowSignal, evaluate_window};
use crate::symbols::SymbolSource;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct ScanSettings {
    /// Start of the trailing window, e.g. "5 minutes ago".
    pub poll_window: String,
    /// Kline interval, e.g. "1m".
    pub poll_interval: String,
    pub thresholds: SignalThresholds,
    pub fetch: FetchOptions,
    pub iteration_pause: Duration,
}

/// An alert raised during this session.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertRecord {
    pub base: String,
    pub growth: Decimal,
    pub trading_volume: Decimal,
    pub pushed: bool,
    /// Close time of the last kline in the window.
    pub close_time: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The window held no klines.
    NoData,
    /// Evaluated, nothing to report.
    Quiet,
    Alerted(AlertLevel),
    /// The symbol could not be evaluated this round.
    Skipped,
}

pub struct Scanner {
    symbols: SymbolSource,
    provider: Arc<dyn MarketDataProvider>,
    alerts: Arc<dyn AlertSink>,
    settings: ScanSettings,
    history: Vec<AlertRecord>,
}

impl Scanner {
    pub fn new(
        symbols: SymbolSource,
        provider: Arc<dyn MarketDataProvider>,
        alerts: Arc<dyn AlertSink>,
        settings: ScanSettings,
    ) -> Self {
        Self {
            symbols,
            provider,
            alerts,
            settings,
            history: Vec::new(),
        }
    }

    pub fn alert_history(&self) -> &[AlertRecord] {
        &self.history
    }

    /// Scan until `shutdown` flips to true (or its sender goes away).
    ///
    /// Only configuration errors and an empty symbol list end the loop early.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ScanError> {
        tracing::info!(
            quote = self.symbols.quote_currency(),
            window = %self.settings.poll_window,
            interval = %self.settings.poll_interval,
            "Scan loop started"
        );

        while !*shutdown.borrow() {
            tokio::select! {
                _ = shutdown.changed() => break,
                result = self.step() => {
                    result?;
                }
            }

            if self.settings.iteration_pause.is_zero() {
                tokio::task::yield_now().await;
            } else {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(self.settings.iteration_pause) => {}
                }
            }
        }

        tracing::info!(
            alerts = self.history.len(),
            passes = self.symbols.passes(),
            "Scan loop stopped"
        );
        Ok(())
    }

    /// One iteration: next symbol, fetch, evaluate, report.
    pub async fn step(&mut self) -> Result<StepOutcome, ScanError> {
        let base = match self.symbols.next_symbol().await {
            Ok(base) => base,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "Unreadable symbol line, skipping");
                return Ok(StepOutcome::Skipped);
            }
        };
        let pair = self.symbols.pair(&base);

        match self.evaluate(&base, &pair).await {
            Ok(outcome) => Ok(outcome),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                tracing::warn!(symbol = %pair, error = %e, "Skipping symbol");
                Ok(StepOutcome::Skipped)
            }
        }
    }

    async fn evaluate(&mut self, base: &str, pair: &str) -> Result<StepOutcome, ScanError> {
        let klines = get_historical_klines(
            self.provider.as_ref(),
            pair,
            &self.settings.poll_interval,
            &self.settings.poll_window,
            None,
            &self.settings.fetch,
        )
        .await?;

        let signal = match evaluate_window(&klines) {
            Ok(Some(signal)) => signal,
            Ok(None) => {
                tracing::debug!(symbol = %pair, "No klines in window");
                return Ok(StepOutcome::NoData);
            }
            Err(ScanError::ZeroLowPrice) => {
                tracing::debug!(symbol = %pair, "Zero low price in window, no signal");
                return Ok(StepOutcome::Quiet);
            }
            Err(e) => return Err(e),
        };

        let level = signal.decide(&self.settings.thresholds);
        tracing::trace!(symbol = %pair, growth = %signal.growth, ?level, "Window evaluated");
        if level == AlertLevel::None {
            return Ok(StepOutcome::Quiet);
        }

        println!("{}", alert_line(base, &signal));

        let pushed =
            level == AlertLevel::Push && push_alert(self.alerts.as_ref(), base, &signal).await;
        self.history.push(AlertRecord {
            base: base.to_string(),
            growth: signal.growth,
            trading_volume: signal.last_trading_volume,
            pushed,
            close_time: klines.last().map_or(0, |k| k.close_time),
        });

        Ok(StepOutcome::Alerted(level))
    }
}

async fn push_alert(alerts: &dyn AlertSink, base: &str, signal: &WindowSignal) -> bool {
    match alerts.send_alert(&signal.growth.to_string(), base).await {
        Ok(Delivery::Sent) => true,
        Ok(Delivery::Suppressed) => false,
        Err(e) => {
            tracing::warn!(symbol = base, error = %e, "Failed to send push alert");
            false
        }
    }
}

fn alert_line(base: &str, signal: &WindowSignal) -> String {
    format!(
        "{:<10}{:>10}{:>16}",
        base,
        signal.growth.to_string(),
        signal.last_trading_volume.trunc().to_string()
    )
}
