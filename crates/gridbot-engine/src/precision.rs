/*
[INPUT]:  Decimal amounts and per-asset precision (precision handling is mandatory).
[OUTPUT]: Lossless-as-possible int64<->decimal conversions for chain wire amounts.
[POS]:    Arithmetic layer - every quantity that crosses the chain boundary
          goes through here, never represented as a float.
[UPDATE]: When changing rounding or overflow-clamp behavior.
*/

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tracing::warn;

/// Scale a decimal by `10^precision` and round to the nearest integer,
/// clamping to the `i64` range. An overflow is an invariant violation
/// upstream: we log and clamp rather than panic, so a single bad
/// quote can't take down a bot process.
pub fn to_int(value: Decimal, precision: u8) -> i64 {
    let scale = Decimal::from(10i64.pow(precision as u32));
    let scaled = (value * scale).round();

    match scaled.to_i64() {
        Some(v) => v,
        None => {
            let clamped = if scaled.is_sign_negative() {
                i64::MIN
            } else {
                i64::MAX
            };
            warn!(%value, precision, clamped, "to_int overflowed i64, clamping");
            clamped
        }
    }
}

/// Inverse of `to_int`: recover the decimal value at the asset's precision.
pub fn to_float(amount: i64, precision: u8) -> Decimal {
    let scale = Decimal::from(10i64.pow(precision as u32));
    Decimal::from(amount) / scale
}

/// Quantize `value` to `precision` fractional digits via the round-trip
/// `to_float(to_int(x, p), p)`.
pub fn quantize(value: Decimal, precision: u8) -> Decimal {
    to_float(to_int(value, precision), precision)
}

/// Validate that a create/update's sell and receive amounts, once
/// quantized at their respective precisions, both fit in `i64` without
/// clamping.
pub fn validate_within_int64(
    sell: Decimal,
    receive: Decimal,
    sell_precision: u8,
    receive_precision: u8,
) -> bool {
    fits_i64(sell, sell_precision) && fits_i64(receive, receive_precision)
}

fn fits_i64(value: Decimal, precision: u8) -> bool {
    let scale = Decimal::from(10i64.pow(precision as u32));
    let scaled = (value * scale).round();
    scaled.to_i64().is_some()
}
