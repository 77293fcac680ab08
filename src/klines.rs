use crate::error::ScanError;
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Binance never returns more than this many klines per request.
pub const MAX_PAGE_LIMIT: u32 = 500;

static BAN_UNTIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"until\s+(\d+)").expect("ban regex is valid"));

// --- Data Structures & Custom Deserialization ---

/// One candlestick. Binance sends it as a 12-element array with prices and
/// volumes encoded as decimal strings.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(from = "RawKline")]
pub struct Kline {
    pub open_time: i64,
    #[allow(dead_code)]
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    #[allow(dead_code)]
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
    #[allow(dead_code)]
    pub quote_volume: Decimal,
    #[allow(dead_code)]
    pub trade_count: u64,
    #[allow(dead_code)]
    pub taker_buy_base_volume: Decimal,
    pub taker_buy_quote_volume: Decimal,
    #[allow(dead_code)]
    pub ignore: Decimal,
}

#[derive(Deserialize)]
struct RawKline(
    i64,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    i64,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    u64,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
    #[serde(deserialize_with = "deserialize_decimal_lenient")] Decimal,
);

impl From<RawKline> for Kline {
    fn from(raw: RawKline) -> Self {
        Self {
            open_time: raw.0,
            open: raw.1,
            high: raw.2,
            low: raw.3,
            close: raw.4,
            volume: raw.5,
            close_time: raw.6,
            quote_volume: raw.7,
            trade_count: raw.8,
            taker_buy_base_volume: raw.9,
            taker_buy_quote_volume: raw.10,
            ignore: raw.11,
        }
    }
}

struct LenientDecimalVisitor;

impl<'de> Visitor<'de> for LenientDecimalVisitor {
    type Value = Decimal;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a decimal string, an integer, or a float")
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Decimal::try_from(v).map_err(E::custom)
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
        Ok(Decimal::from(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
        Ok(Decimal::from(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Decimal::from_str(v.trim())
            .or_else(|_| Decimal::from_scientific(v.trim()))
            .map_err(E::custom)
    }
}

fn deserialize_decimal_lenient<'de, D>(deserializer: D) -> Result<Decimal, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(LenientDecimalVisitor)
}

// --- Market Data Capability ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineQuery {
    pub symbol: String,
    pub interval: String,
    pub limit: u32,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
}

impl KlineQuery {
    fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.clone()),
            ("limit", self.limit.to_string()),
        ];
        if let Some(start) = self.start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = self.end_time {
            params.push(("endTime", end.to_string()));
        }
        params
    }
}

/// Abstract interface for fetching one page of klines.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Returns klines in ascending `open_time` order; fewer than `query.limit`
    /// only when no more data exists in range.
    async fn fetch_klines(&self, query: &KlineQuery) -> Result<Vec<Kline>, ScanError>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// Exponential backoff between retries.
struct ExponentialBackoff {
    current: Duration,
    max: Duration,
}

impl ExponentialBackoff {
    fn new(initial: Duration, max: Duration) -> Self {
        Self {
            current: initial,
            max,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

#[derive(Deserialize)]
struct BinanceErrorBody {
    code: i64,
    msg: String,
}

pub struct BinanceKlineClient {
    http: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl BinanceKlineClient {
    pub fn new(base_url: &str, timeout: Duration, retry: RetryPolicy) -> Result<Self, ScanError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn fetch_once(&self, query: &KlineQuery) -> Result<Vec<Kline>, ScanError> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let response = self.http.get(&url).query(&query.to_params()).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(response.json::<Vec<Kline>>().await?);
        }

        let body = response.text().await.unwrap_or_default();

        if status.as_u16() == 418 || status.as_u16() == 429 {
            if let Some(wait) = ban_wait(&body, now_millis()) {
                tracing::warn!(
                    symbol = %query.symbol,
                    wait_secs = wait.as_secs_f64(),
                    "IP banned by exchange, waiting for ban to lift"
                );
                tokio::time::sleep(wait).await;
            }
            return Err(ScanError::RateLimited {
                status: status.as_u16(),
            });
        }

        if let Ok(err) = serde_json::from_str::<BinanceErrorBody>(&body) {
            if status.is_client_error() {
                return Err(ScanError::BinanceApi {
                    code: err.code,
                    msg: err.msg,
                });
            }
        }

        Err(ScanError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl MarketDataProvider for BinanceKlineClient {
    async fn fetch_klines(&self, query: &KlineQuery) -> Result<Vec<Kline>, ScanError> {
        retry_transient(&self.retry, &query.symbol, || self.fetch_once(query)).await
    }
}

/// Run `attempt` until it succeeds, fails with a non-transient error, or the
/// policy's retries are used up.
async fn retry_transient<T, F, Fut>(
    policy: &RetryPolicy,
    symbol: &str,
    mut attempt: F,
) -> Result<T, ScanError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ScanError>>,
{
    let mut backoff = ExponentialBackoff::new(policy.initial_backoff, policy.max_backoff);
    let mut retries = 0;

    loop {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && retries < policy.retries => {
                retries += 1;
                let delay = backoff.next_delay();
                tracing::debug!(
                    symbol,
                    attempt = retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying kline request"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// How long to wait for a Binance `-1003` ban to expire, plus a 5s margin.
fn ban_wait(body: &str, now_ms: u64) -> Option<Duration> {
    if !body.contains("-1003") {
        return None;
    }
    let ban_until: u64 = BAN_UNTIL.captures(body)?.get(1)?.as_str().parse().ok()?;
    if ban_until <= now_ms {
        return None;
    }
    let wait_sec = ((ban_until - now_ms) as f64 / 1000.0) + 5.0;
    Some(Duration::from_secs_f64(wait_sec))
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn d(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    const SAMPLE: &str = r#"[
        [
            1499040000000,
            "0.01634790",
            "0.80000000",
            "0.01575800",
            "0.01577100",
            "148976.11427815",
            1499644799999,
            "2434.19055334",
            308,
            "1756.87402397",
            "28.46694368",
            "17928899.62484339"
        ]
    ]"#;

    #[test]
    fn parses_binance_kline_array() {
        let klines: Vec<Kline> = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(klines.len(), 1);
        let k = &klines[0];
        assert_eq!(k.open_time, 1_499_040_000_000);
        assert_eq!(k.close_time, 1_499_644_799_999);
        assert_eq!(k.high, d("0.80000000"));
        assert_eq!(k.low, d("0.01575800"));
        assert_eq!(k.volume, d("148976.11427815"));
        assert_eq!(k.trade_count, 308);
        assert_eq!(k.taker_buy_quote_volume, d("28.46694368"));
    }

    #[test]
    fn numeric_fields_may_be_json_numbers() {
        let json = r#"[[0, 1, 2.5, "1", "2", 600, 59999, "0", 3, "0", "5.0", 0]]"#;
        let klines: Vec<Kline> = serde_json::from_str(json).unwrap();
        assert_eq!(klines[0].open, d("1"));
        assert_eq!(klines[0].high, d("2.5"));
        assert_eq!(klines[0].volume, d("600"));
    }

    #[test]
    fn rejects_non_numeric_prices() {
        let json = r#"[[0, "abc", "1", "1", "1", "1", 59999, "0", 3, "0", "0", "0"]]"#;
        assert!(serde_json::from_str::<Vec<Kline>>(json).is_err());
    }

    #[test]
    fn query_params_skip_missing_bounds() {
        let query = KlineQuery {
            symbol: "BNBETH".to_string(),
            interval: "1m".to_string(),
            limit: 500,
            start_time: Some(1_000),
            end_time: None,
        };
        let params = query.to_params();
        assert!(params.contains(&("startTime", "1000".to_string())));
        assert!(params.iter().all(|(k, _)| *k != "endTime"));
        assert!(params.contains(&("limit", "500".to_string())));
    }

    #[test]
    fn ban_wait_parses_until_timestamp() {
        let body = r#"{"code":-1003,"msg":"Way too many requests; IP banned until 1700000010000."}"#;
        let wait = ban_wait(body, 1_700_000_000_000).unwrap();
        assert_eq!(wait, Duration::from_secs(15));

        assert!(ban_wait(body, 1_700_000_020_000).is_none());
        assert!(ban_wait(r#"{"code":-1121,"msg":"Invalid symbol."}"#, 0).is_none());
    }

    fn policy(retries: u32) -> RetryPolicy {
        RetryPolicy {
            retries,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }

    fn unavailable() -> ScanError {
        ScanError::HttpStatus {
            status: 503,
            body: String::new(),
        }
    }

    /// Hands out `results` in order, counting calls.
    async fn run_script(
        policy: &RetryPolicy,
        results: Vec<Result<u32, ScanError>>,
    ) -> (Result<u32, ScanError>, usize) {
        let script = Mutex::new(VecDeque::from(results));
        let calls = AtomicUsize::new(0);
        let result = retry_transient(policy, "BNBETH", || {
            calls.fetch_add(1, Ordering::SeqCst);
            let next = script.lock().unwrap().pop_front().unwrap();
            async move { next }
        })
        .await;
        (result, calls.load(Ordering::SeqCst))
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_with_backoff() {
        let started = tokio::time::Instant::now();

        let (result, calls) =
            run_script(&policy(3), vec![Err(unavailable()), Err(unavailable()), Ok(7)]).await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls, 3);
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_are_bounded_by_policy() {
        let (result, calls) = run_script(
            &policy(2),
            vec![Err(unavailable()), Err(unavailable()), Err(unavailable()), Ok(7)],
        )
        .await;

        assert!(matches!(result, Err(ScanError::HttpStatus { status: 503, .. })));
        assert_eq!(calls, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_return_at_once() {
        let started = tokio::time::Instant::now();

        let (result, calls) = run_script(
            &policy(3),
            vec![
                Err(ScanError::BinanceApi {
                    code: -1121,
                    msg: "Invalid symbol.".to_string(),
                }),
                Ok(7),
            ],
        )
        .await;

        assert!(matches!(result, Err(ScanError::BinanceApi { code: -1121, .. })));
        assert_eq!(calls, 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[test]
    fn backoff_doubles_up_to_max() {
        let mut backoff =
            ExponentialBackoff::new(Duration::from_millis(100), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(200));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));
    }
}
