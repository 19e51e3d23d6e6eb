//! Price extraction from free-form marketplace post text.
//!
//! Heuristic, currency-agnostic: a labeled price ("ціна: 3500 грн") wins
//! over bare numbers, bare numbers are scanned with a noise floor so sizes
//! and quantities are not mistaken for prices. Tolerates adversarial
//! formatting without guaranteeing correctness on it.

use crate::config::PRICE_NOISE_FLOOR;
use lazy_regex::{regex, Lazy};
use regex::Regex;

static LABELED: &Lazy<Regex> =
    regex!(r"(?:ціна:|price:|цена:).*?(\d+(?:[.,]\d+)*)\s*(грн|₴|тис|k|к)?");
static FALLBACK: &Lazy<Regex> = regex!(r"(\d+(?:[.,]\d+)*)\s*(грн|₴|тис|k|к)?");

/// Extract a price from message text.
///
/// Searches for a labeled price first, then falls back to the maximum
/// number-like token at or above the noise floor. When both exist the
/// larger wins. Returns `None` when no numeric token is found.
#[must_use]
pub fn extract_price(text: &str) -> Option<f64> {
    let text = text.to_lowercase();

    let labeled = LABELED.captures(&text).and_then(|caps| {
        let value = parse_number(caps.get(1)?.as_str())?;
        Some(apply_unit(value, caps.get(2).map(|m| m.as_str())))
    });

    let fallback = FALLBACK
        .captures_iter(&text)
        .filter_map(|caps| {
            let value = parse_number(caps.get(1)?.as_str())?;
            Some(apply_unit(value, caps.get(2).map(|m| m.as_str())))
        })
        .filter(|&p| p >= PRICE_NOISE_FLOOR)
        .fold(None, |best: Option<f64>, p| {
            Some(best.map_or(p, |b| b.max(p)))
        });

    match (labeled, fallback) {
        (Some(l), Some(f)) => Some(l.max(f)),
        (Some(l), None) => Some(l),
        (None, Some(f)) => Some(f),
        (None, None) => None,
    }
}

fn apply_unit(value: f64, unit: Option<&str>) -> f64 {
    match unit {
        Some("k" | "к" | "тис") => value * 1000.0,
        _ => value,
    }
}

/// Parse a numeric token that may use `.` or `,` as a decimal separator.
///
/// Multiple separators, or a fractional group of exactly 3 digits, are
/// treated as thousands-group punctuation and stripped ("3.500" -> 3500).
fn parse_number(raw: &str) -> Option<f64> {
    let separators = raw.chars().filter(|c| *c == '.' || *c == ',').count();
    if separators == 0 {
        return raw.parse().ok();
    }

    let split_at = raw.rfind(['.', ','])?;
    let fraction = &raw[split_at + 1..];

    if separators > 1 || fraction.len() == 3 {
        // Grouping punctuation, not a decimal point.
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        return digits.parse().ok();
    }

    let integer: String = raw[..split_at]
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    format!("{integer}.{fraction}").parse().ok()
}
