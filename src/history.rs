//! Paginated download of historical klines.
//!
//! Binance caps every kline request at 500 records, so longer spans are
//! fetched page by page, moving the cursor one interval past the last record
//! of each page. A start time earlier than the symbol's listing is tolerated by
//! probing forward one interval at a time until the first record shows up.

use crate::error::ScanError;
use crate::klines::{Kline, KlineQuery, MAX_PAGE_LIMIT, MarketDataProvider};
use crate::time_utils::{date_to_millis, interval_to_millis};
use chrono::Utc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Records requested per page.
    pub page_limit: u32,
    /// Pause after every this many pages; 0 disables pausing.
    pub pause_every_pages: u32,
    pub page_pause: Duration,
    /// Give up looking for a listing after this many empty probes.
    pub max_probe_pages: u32,
    /// Hard cap on pages per fetch.
    pub max_pages: u32,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            page_limit: MAX_PAGE_LIMIT,
            pause_every_pages: 3,
            page_pause: Duration::from_secs(1),
            max_probe_pages: 60,
            max_pages: 10_000,
        }
    }
}

struct HistoryRequest<'a> {
    symbol: &'a str,
    interval: &'a str,
    interval_ms: i64,
    start_ts: i64,
    end_ts: Option<i64>,
    /// Probing for a listing stops once the cursor passes this instant.
    probe_horizon: i64,
}

/// Fetch every kline for `symbol` from `start_str` to `end_str` (inclusive),
/// or up to the latest available kline when no end is given.
///
/// Returns an empty vector when the symbol has no data in range.
pub async fn get_historical_klines(
    provider: &dyn MarketDataProvider,
    symbol: &str,
    interval: &str,
    start_str: &str,
    end_str: Option<&str>,
    opts: &FetchOptions,
) -> Result<Vec<Kline>, ScanError> {
    let interval_ms = interval_to_millis(interval)?;
    let start_ts = date_to_millis(start_str)?;
    let end_ts = end_str.map(date_to_millis).transpose()?;

    let request = HistoryRequest {
        symbol,
        interval,
        interval_ms,
        start_ts,
        end_ts,
        probe_horizon: end_ts.unwrap_or_else(|| Utc::now().timestamp_millis()),
    };
    paginate(provider, request, opts).await
}

async fn paginate(
    provider: &dyn MarketDataProvider,
    request: HistoryRequest<'_>,
    opts: &FetchOptions,
) -> Result<Vec<Kline>, ScanError> {
    let page_limit = opts.page_limit.clamp(1, MAX_PAGE_LIMIT);
    let mut output: Vec<Kline> = Vec::new();
    let mut symbol_appeared = false;
    let mut start_ts = request.start_ts;
    let mut pages: u32 = 0;
    let mut probes: u32 = 0;

    loop {
        let query = KlineQuery {
            symbol: request.symbol.to_string(),
            interval: request.interval.to_string(),
            limit: page_limit,
            start_time: Some(start_ts),
            end_time: request.end_ts,
        };
        let page = provider.fetch_klines(&query).await?;
        pages += 1;
        let page_len = page.len();

        if !symbol_appeared && !page.is_empty() {
            symbol_appeared = true;
            tracing::debug!(
                symbol = request.symbol,
                first_open_time = page[0].open_time,
                probes,
                "Symbol history found"
            );
        }

        if symbol_appeared {
            let Some(last_open_time) = page.last().map(|k| k.open_time) else {
                break;
            };
            output.extend(page);

            if page_len < page_limit as usize {
                break;
            }

            let next_start = last_open_time + request.interval_ms;
            if next_start <= start_ts {
                tracing::warn!(
                    symbol = request.symbol,
                    start_ts,
                    last_open_time,
                    "Kline page did not advance the cursor, stopping"
                );
                break;
            }
            start_ts = next_start;
        } else {
            start_ts += request.interval_ms;
            probes += 1;
            if start_ts > request.probe_horizon || probes >= opts.max_probe_pages {
                tracing::debug!(
                    symbol = request.symbol,
                    probes,
                    "No klines in range"
                );
                break;
            }
        }

        if pages >= opts.max_pages {
            tracing::warn!(
                symbol = request.symbol,
                pages,
                records = output.len(),
                "Page cap reached, returning partial history"
            );
            break;
        }

        if opts.pause_every_pages > 0
            && pages % opts.pause_every_pages == 0
            && !opts.page_pause.is_zero()
        {
            tokio::time::sleep(opts.page_pause).await;
        }
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedProvider, kline_series};

    const MINUTE: i64 = 60_000;
    const T0: i64 = 1_609_459_200_000;

    fn no_pause() -> FetchOptions {
        FetchOptions {
            page_pause: Duration::ZERO,
            ..FetchOptions::default()
        }
    }

    fn request(end_ts: Option<i64>, probe_horizon: i64) -> HistoryRequest<'static> {
        HistoryRequest {
            symbol: "BNBETH",
            interval: "1m",
            interval_ms: MINUTE,
            start_ts: T0,
            end_ts,
            probe_horizon,
        }
    }

    fn assert_gap_free(klines: &[Kline], step: i64) {
        for pair in klines.windows(2) {
            assert_eq!(pair[1].open_time - pair[0].open_time, step);
        }
    }

    #[tokio::test]
    async fn full_page_then_partial_page() {
        let provider = ScriptedProvider::new(vec![
            kline_series(T0, MINUTE, 500),
            kline_series(T0 + 500 * MINUTE, MINUTE, 120),
        ]);

        let klines = paginate(&provider, request(None, i64::MAX), &no_pause())
            .await
            .unwrap();

        assert_eq!(klines.len(), 620);
        assert_eq!(klines[0].open_time, T0);
        assert_gap_free(&klines, MINUTE);

        let queries = provider.queries();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].start_time, Some(T0));
        assert_eq!(queries[1].start_time, Some(T0 + 500 * MINUTE));
        assert!(queries.iter().all(|q| q.limit == 500 && q.end_time.is_none()));
    }

    #[tokio::test]
    async fn probes_forward_until_symbol_is_listed() {
        let listing = T0 + 3 * MINUTE;
        let provider = ScriptedProvider::new(vec![
            Vec::new(),
            Vec::new(),
            Vec::new(),
            kline_series(listing, MINUTE, 10),
        ]);

        let klines = paginate(&provider, request(None, T0 + 60 * MINUTE), &no_pause())
            .await
            .unwrap();

        assert_eq!(klines.len(), 10);
        assert!(klines.iter().all(|k| k.open_time >= listing));
        assert_gap_free(&klines, MINUTE);

        let starts: Vec<_> = provider
            .queries()
            .iter()
            .map(|q| q.start_time.unwrap())
            .collect();
        assert_eq!(starts, vec![T0, T0 + MINUTE, T0 + 2 * MINUTE, listing]);
    }

    #[tokio::test]
    async fn never_listed_symbol_returns_empty() {
        let end = T0 + 5 * MINUTE;
        let provider = ScriptedProvider::new(Vec::new());

        let klines = paginate(&provider, request(Some(end), end), &no_pause())
            .await
            .unwrap();

        assert!(klines.is_empty());
        let queries = provider.queries();
        assert_eq!(queries.len(), 6);
        assert!(queries.iter().all(|q| q.end_time == Some(end)));
    }

    #[tokio::test]
    async fn probing_is_capped() {
        let provider = ScriptedProvider::new(Vec::new());
        let opts = FetchOptions {
            max_probe_pages: 4,
            ..no_pause()
        };

        let klines = paginate(&provider, request(None, i64::MAX), &opts)
            .await
            .unwrap();

        assert!(klines.is_empty());
        assert_eq!(provider.queries().len(), 4);
    }

    #[tokio::test]
    async fn page_cap_returns_partial_history() {
        let provider = ScriptedProvider::new(vec![
            kline_series(T0, MINUTE, 500),
            kline_series(T0 + 500 * MINUTE, MINUTE, 500),
            kline_series(T0 + 1000 * MINUTE, MINUTE, 500),
        ]);
        let opts = FetchOptions {
            max_pages: 2,
            ..no_pause()
        };

        let klines = paginate(&provider, request(None, i64::MAX), &opts)
            .await
            .unwrap();

        assert_eq!(klines.len(), 1000);
        assert_eq!(provider.queries().len(), 2);
    }

    fn full_pages(count: i64) -> Vec<Vec<Kline>> {
        (0..count)
            .map(|i| kline_series(T0 + i * 500 * MINUTE, MINUTE, 500))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn pauses_after_every_third_page() {
        let mut pages = full_pages(6);
        pages.push(kline_series(T0 + 3000 * MINUTE, MINUTE, 10));
        let provider = ScriptedProvider::new(pages);
        let opts = FetchOptions {
            page_pause: Duration::from_secs(1),
            ..FetchOptions::default()
        };
        let started = tokio::time::Instant::now();

        let klines = paginate(&provider, request(None, i64::MAX), &opts)
            .await
            .unwrap();

        assert_eq!(klines.len(), 3010);
        assert_eq!(provider.queries().len(), 7);
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn no_pause_after_the_last_page() {
        let mut pages = full_pages(5);
        pages.push(kline_series(T0 + 2500 * MINUTE, MINUTE, 10));
        let provider = ScriptedProvider::new(pages);
        let opts = FetchOptions {
            page_pause: Duration::from_secs(1),
            ..FetchOptions::default()
        };
        let started = tokio::time::Instant::now();

        let klines = paginate(&provider, request(None, i64::MAX), &opts)
            .await
            .unwrap();

        assert_eq!(klines.len(), 2510);
        assert_eq!(provider.queries().len(), 6);
        assert_eq!(started.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn resolves_date_strings_and_end_bound() {
        let end = T0 + 8 * 60 * MINUTE;
        let provider = ScriptedProvider::new(vec![kline_series(T0, 60 * MINUTE, 9)]);

        let klines = get_historical_klines(
            &provider,
            "ETHBTC",
            "1h",
            "2021-01-01T00:00:00Z",
            Some("2021-01-01 08:00:00"),
            &no_pause(),
        )
        .await
        .unwrap();

        assert_eq!(klines.len(), 9);
        let queries = provider.queries();
        assert_eq!(queries.len(), 1);
        assert_eq!(queries[0].symbol, "ETHBTC");
        assert_eq!(queries[0].interval, "1h");
        assert_eq!(queries[0].start_time, Some(T0));
        assert_eq!(queries[0].end_time, Some(end));
    }

    #[tokio::test]
    async fn invalid_interval_fails_before_any_request() {
        let provider = ScriptedProvider::new(vec![kline_series(T0, MINUTE, 5)]);

        let result = get_historical_klines(
            &provider,
            "ETHBTC",
            "2x",
            "2021-01-01T00:00:00Z",
            None,
            &no_pause(),
        )
        .await;

        assert!(matches!(result, Err(ScanError::InvalidInterval { .. })));
        assert!(provider.queries().is_empty());
    }

    #[tokio::test]
    async fn unparseable_start_is_an_error() {
        let provider = ScriptedProvider::new(Vec::new());

        let result =
            get_historical_klines(&provider, "ETHBTC", "1m", "someday", None, &no_pause()).await;

        assert!(matches!(result, Err(ScanError::DateParse(_))));
        assert!(provider.queries().is_empty());
    }
}
