use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::WallPrices;

/// Decimals kept on peg-unit prices.
pub const PRICE_DECIMALS: u32 = 8;
/// Decimals kept on percentage distances.
pub const PERCENT_DECIMALS: u32 = 4;
/// Offset forced when the exchange charges no fee, so sell stays above buy.
pub const ZERO_FEE_MIN_OFFSET: f64 = 0.1;

/// Rounds half away from zero to `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

/// Truncates toward zero; order amounts never round up past the balance.
pub fn floor_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).trunc() / factor
}

pub fn round_price(value: f64) -> f64 {
    round_to(value, PRICE_DECIMALS)
}

/// `round(|other - base| * 100 / base, 4)`.
pub fn percentage_distance(base: f64, other: f64) -> f64 {
    round_to((other - base).abs() * 100.0 / base, PERCENT_DECIMALS)
}

/// Wall prices expressed in the tracked reference unit (1.0 = on peg).
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct UsdWall {
    pub sell: f64,
    pub buy: f64,
}

/// Offset actually applied for a given fee.
pub fn effective_offset(tx_fee_percent: f64, offset_percent: f64) -> f64 {
    if tx_fee_percent <= 0.0 {
        offset_percent.max(ZERO_FEE_MIN_OFFSET)
    } else {
        offset_percent
    }
}

/// `1 ± 0.01 * fee`, the sell side bumped by `sell_increment` on sell-only
/// walls, then widened by `offset_percent` on both sides.
pub fn usd_wall_prices(
    tx_fee_percent: f64,
    offset_percent: f64,
    dual_side: bool,
    sell_increment: f64,
) -> UsdWall {
    let mut sell = 1.0 + 0.01 * tx_fee_percent;
    if !dual_side {
        sell += sell_increment;
    }
    let mut buy = 1.0 - 0.01 * tx_fee_percent;

    let offset = effective_offset(tx_fee_percent, offset_percent);
    sell += sell / 100.0 * offset;
    buy -= buy / 100.0 * offset;
    UsdWall { sell, buy }
}

/// Converts reference-unit prices into peg units at `conversion` reference per peg unit.
pub fn to_peg_units(usd: UsdWall, conversion: f64) -> WallPrices {
    WallPrices {
        sell: round_price(usd.sell / conversion),
        buy: round_price(usd.buy / conversion),
    }
}

/// Seconds until the next wall-clock window of `every_minutes` minutes starts.
pub fn seconds_to_next_window(now: DateTime<Utc>, every_minutes: u64) -> u64 {
    let window = every_minutes.max(1) * 60;
    let elapsed = now.timestamp().rem_euclid(window as i64) as u64;
    if elapsed == 0 {
        0
    } else {
        window - elapsed
    }
}
