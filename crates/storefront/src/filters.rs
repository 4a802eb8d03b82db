//! Custom Askama template filters.

#![allow(clippy::unnecessary_wraps)]

use std::fmt::Display;

use rust_decimal::Decimal;
use shopfront_core::CurrencyCode;

/// Returns the current year.
///
/// Usage in templates: `{{ ""|current_year }}`
#[askama::filter_fn]
pub fn current_year(_value: impl Display, _env: &dyn askama::Values) -> askama::Result<i32> {
    use chrono::Datelike;
    Ok(chrono::Utc::now().year())
}

/// Formats an amount in the store currency.
///
/// Accepts anything that displays as a decimal (`Price`, `Decimal`).
/// Values that do not parse are shown unchanged.
///
/// Usage in templates: `{{ product.price|money }}` renders `$19.99`.
#[askama::filter_fn]
pub fn money(value: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    Ok(format_money(&value.to_string()))
}

/// Renders a 1-5 rating as filled and empty stars.
///
/// Usage in templates: `{{ review.rating|stars }}`
#[askama::filter_fn]
pub fn stars(value: impl Display, _env: &dyn askama::Values) -> askama::Result<String> {
    Ok(format_stars(&value.to_string()))
}

fn format_money(raw: &str) -> String {
    raw.trim().parse::<Decimal>().map_or_else(
        |_| raw.to_string(),
        |amount| format!("{}{:.2}", CurrencyCode::default().symbol(), amount.round_dp(2)),
    )
}

fn format_stars(raw: &str) -> String {
    let filled = raw
        .trim()
        .parse::<Decimal>()
        .ok()
        .and_then(|d| u8::try_from(d.round().mantissa()).ok())
        .unwrap_or(0)
        .min(5);
    let filled = usize::from(filled);
    format!("{}{}", "★".repeat(filled), "☆".repeat(5 - filled))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_money() {
        assert_eq!(format_money("19.9"), "$19.90");
        assert_eq!(format_money("0"), "$0.00");
        assert_eq!(format_money("n/a"), "n/a");
    }

    #[test]
    fn test_format_stars() {
        assert_eq!(format_stars("4"), "★★★★☆");
        assert_eq!(format_stars("3.6"), "★★★★☆");
        assert_eq!(format_stars("9"), "★★★★★");
        assert_eq!(format_stars("bad"), "☆☆☆☆☆");
    }
}
