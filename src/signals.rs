use crate::error::ScanError;
use crate::klines::Kline;
use rust_decimal::{Decimal, RoundingStrategy};

/// Thresholds deciding whether a window is worth reporting.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalThresholds {
    pub growth_alert: Decimal,
    pub growth_push: Decimal,
    pub volume: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    None,
    Console,
    Push,
}

/// Summary of a short kline window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSignal {
    /// Percent growth from the window's first low to its last high, 2 dp.
    pub growth: Decimal,
    /// Integer part of the last kline's base volume.
    pub total_volume: Decimal,
    /// Taker buy quote volume of the last kline.
    pub last_trading_volume: Decimal,
    /// Whether the last kline saw any taker buying.
    pub trending: bool,
}

impl WindowSignal {
    pub fn decide(&self, thresholds: &SignalThresholds) -> AlertLevel {
        let surging = self.growth > thresholds.growth_alert
            && self.total_volume > thresholds.volume
            && self.trending;

        if !surging {
            AlertLevel::None
        } else if self.growth > thresholds.growth_push {
            AlertLevel::Push
        } else {
            AlertLevel::Console
        }
    }
}

/// `((high - low) / low) * 100`, rounded to two decimal places.
pub fn growth_rate(high: Decimal, low: Decimal) -> Result<Decimal, ScanError> {
    let ratio = (high - low)
        .checked_div(low)
        .ok_or(ScanError::ZeroLowPrice)?;
    let mut pct = (ratio * Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    pct.rescale(2);
    Ok(pct)
}

/// Whether the last kline's taker buy quote volume exceeds `threshold`.
pub fn is_trending(klines: &[Kline], threshold: Decimal) -> bool {
    klines
        .last()
        .is_some_and(|k| k.taker_buy_quote_volume > threshold)
}

/// Summarise a window, or `None` when it holds no klines.
pub fn evaluate_window(klines: &[Kline]) -> Result<Option<WindowSignal>, ScanError> {
    let (Some(first), Some(last)) = (klines.first(), klines.last()) else {
        return Ok(None);
    };

    Ok(Some(WindowSignal {
        growth: growth_rate(last.high, first.low)?,
        total_volume: last.volume.trunc(),
        last_trading_volume: last.taker_buy_quote_volume,
        trending: is_trending(klines, Decimal::ZERO),
    }))
}
