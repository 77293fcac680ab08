//! Shared fakes for unit tests.

use crate::error::ScanError;
use crate::klines::{Kline, KlineQuery, MarketDataProvider};
use crate::notify::{AlertSink, Delivery};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Mutex;

pub fn kline(open_time: i64, interval_ms: i64) -> Kline {
    Kline {
        open_time,
        open: Decimal::ONE,
        high: Decimal::ONE,
        low: Decimal::ONE,
        close: Decimal::ONE,
        volume: Decimal::ONE,
        close_time: open_time + interval_ms - 1,
        quote_volume: Decimal::ONE,
        trade_count: 1,
        taker_buy_base_volume: Decimal::ONE,
        taker_buy_quote_volume: Decimal::ONE,
        ignore: Decimal::ZERO,
    }
}

pub fn kline_series(first_open_time: i64, interval_ms: i64, count: usize) -> Vec<Kline> {
    (0..count as i64)
        .map(|i| kline(first_open_time + i * interval_ms, interval_ms))
        .collect()
}

/// Returns the scripted pages in order, then empty pages.
pub struct ScriptedProvider {
    pages: Mutex<VecDeque<Result<Vec<Kline>, ScanError>>>,
    queries: Mutex<Vec<KlineQuery>>,
}

impl ScriptedProvider {
    pub fn new(pages: Vec<Vec<Kline>>) -> Self {
        Self::with_results(pages.into_iter().map(Ok).collect())
    }

    pub fn with_results(results: Vec<Result<Vec<Kline>, ScanError>>) -> Self {
        Self {
            pages: Mutex::new(results.into()),
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<KlineQuery> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl MarketDataProvider for ScriptedProvider {
    async fn fetch_klines(&self, query: &KlineQuery) -> Result<Vec<Kline>, ScanError> {
        self.queries.lock().unwrap().push(query.clone());
        self.pages
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}

#[derive(Default)]
pub struct RecordingAlerts {
    sent: Mutex<Vec<(String, String)>>,
}

impl RecordingAlerts {
    /// `(message, title)` pairs in send order.
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingAlerts {
    async fn send_alert(&self, message: &str, title: &str) -> anyhow::Result<Delivery> {
        self.sent
            .lock()
            .unwrap()
            .push((message.to_string(), title.to_string()));
        Ok(Delivery::Sent)
    }
}
