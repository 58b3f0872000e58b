//! Canonical decimal-text codecs for store values.
//!
//! Numeric store values are persisted as their canonical base-10 text form,
//! which keeps snapshots language-neutral and human-inspectable. The parse
//! cost per arithmetic operation is the accepted tradeoff.

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use std::str::FromStr;

/// Significant digits kept for `bigfloat` values, rounding to nearest-even.
pub const BIGFLOAT_PRECISION: u64 = 100;

pub(crate) fn parse_int64(bytes: &[u8]) -> Option<i64> {
    i64::from_str(std::str::from_utf8(bytes).ok()?).ok()
}

pub(crate) fn format_int64(value: i64) -> Vec<u8> {
    value.to_string().into_bytes()
}

pub(crate) fn parse_bigint(bytes: &[u8]) -> Option<BigInt> {
    BigInt::parse_bytes(bytes, 10)
}

pub(crate) fn format_bigint(value: &BigInt) -> Vec<u8> {
    value.to_str_radix(10).into_bytes()
}

pub(crate) fn parse_float64(bytes: &[u8]) -> Option<f64> {
    f64::from_str(std::str::from_utf8(bytes).ok()?).ok()
}

/// Shortest decimal form that round-trips back to the same `f64`.
pub(crate) fn format_float64(value: f64) -> Vec<u8> {
    value.to_string().into_bytes()
}

pub(crate) fn parse_bigfloat(bytes: &[u8]) -> Option<BigDecimal> {
    BigDecimal::from_str(std::str::from_utf8(bytes).ok()?).ok()
}

pub(crate) fn format_bigfloat(value: &BigDecimal) -> Vec<u8> {
    value.with_prec(BIGFLOAT_PRECISION).normalized().to_string().into_bytes()
}
