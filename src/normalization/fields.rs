//! Total conversions from raw CSV cells into typed column values.
//!
//! Every function here accepts the raw cell (`None` or blank means missing) and never
//! fails: anything that cannot be interpreted comes back as `None`. Boolean flags are the
//! one exception to the "absent" rule and fall back to `false`.
use std::str::FromStr;

use bigdecimal::BigDecimal;
use chrono::{NaiveDate, NaiveDateTime};

/// Upper bound of a PostgreSQL `integer` column.
pub const INT4_MAX: i64 = i32::MAX as i64;
/// Upper bound of a PostgreSQL `bigint` column.
pub const INT8_MAX: i64 = i64::MAX;

/// Format of the `Released` and `Last Updated` columns, e.g. `Feb 26, 2020`.
pub const CATALOG_DATE_FORMAT: &str = "%b %d, %Y";
/// Format of the `Scraped Time` column, e.g. `2021-06-15 20:19:35`.
pub const SCRAPED_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Returns the trimmed cell, or `None` when it is missing or blank.
pub fn present(raw: Option<&str>) -> Option<&str> {
    raw.map(str::trim).filter(|s| !s.is_empty())
}

/// Parse counters such as `"1,000,000+"` or `"5.0"`.
///
/// Values beyond `max_value` are clamped to it (and symmetrically on the negative side)
/// instead of being rejected, so oversized install counts still fit their column.
pub fn parse_integer(raw: Option<&str>, max_value: i64) -> Option<i64> {
    let cleaned: String = present(raw)?.chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim_end_matches('+').trim();
    if cleaned.is_empty() {
        return None;
    }

    let value = match cleaned.parse::<i64>() {
        Ok(v) => v,
        Err(_) => {
            let float = cleaned.parse::<f64>().ok()?;
            if !float.is_finite() {
                return None;
            }
            // `as` saturates at the i64 bounds
            float.trunc() as i64
        }
    };

    let max_value = max_value.max(0);
    Some(value.clamp(-max_value - 1, max_value))
}

/// Parse `parse_integer` output straight into an `integer` column value.
pub fn parse_int4(raw: Option<&str>) -> Option<i32> {
    parse_integer(raw, INT4_MAX).and_then(|v| i32::try_from(v).ok())
}

/// Parse a price like `"$1,299.99"` into a decimal.
pub fn parse_price(raw: Option<&str>) -> Option<BigDecimal> {
    let cleaned: String = present(raw)?.chars().filter(|c| *c != ',').collect();
    let number = cleaned
        .trim_start_matches(|c: char| !(c.is_ascii_digit() || matches!(c, '-' | '+' | '.')))
        .trim();
    BigDecimal::from_str(number).ok()
}

/// Plain decimal (ratings). `None` on missing or non-numeric input.
pub fn parse_decimal(raw: Option<&str>) -> Option<BigDecimal> {
    BigDecimal::from_str(present(raw)?).ok()
}

/// Case-insensitive `"true"`; missing and anything else is `false`.
pub fn parse_boolean(raw: Option<&str>) -> bool {
    present(raw).is_some_and(|s| s.eq_ignore_ascii_case("true"))
}

pub fn parse_date(raw: Option<&str>, format: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(present(raw)?, format).ok()
}

pub fn parse_timestamp(raw: Option<&str>, format: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(present(raw)?, format).ok()
}
