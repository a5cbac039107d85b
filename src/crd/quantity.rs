//! Kubernetes quantity parsing
//!
//! Converts strings such as `512Mi`, `2Gi`, `1G` or `1e3` into a byte count.
//! Fractional results are rounded up, matching how the API server rounds
//! memory requests.

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

const BINARY_SUFFIXES: &[(&str, f64)] = &[
    ("Ki", 1024.0),
    ("Mi", 1024.0 * 1024.0),
    ("Gi", 1024.0 * 1024.0 * 1024.0),
    ("Ti", 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Pi", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
    ("Ei", 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0),
];

const DECIMAL_SUFFIXES: &[(&str, f64)] = &[
    ("m", 1e-3),
    ("k", 1e3),
    ("M", 1e6),
    ("G", 1e9),
    ("T", 1e12),
    ("P", 1e15),
    ("E", 1e18),
];

/// Parse a quantity string into bytes. Returns `None` when the string is not
/// a valid quantity.
pub fn parse_quantity(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let (number, multiplier) = split_suffix(s)?;
    if number.is_empty() {
        return None;
    }
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() {
        return None;
    }

    let bytes = (value * multiplier).ceil();
    if bytes > i64::MAX as f64 || bytes < i64::MIN as f64 {
        return None;
    }
    Some(bytes as i64)
}

fn split_suffix(s: &str) -> Option<(&str, f64)> {
    for (suffix, mult) in BINARY_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return Some((number, *mult));
        }
    }
    // Exponent notation is handled by the float parser; a trailing `E` with
    // nothing after it is the exa suffix.
    if s.contains(['e', 'E']) && !s.ends_with('E') {
        return Some((s, 1.0));
    }
    for (suffix, mult) in DECIMAL_SUFFIXES {
        if let Some(number) = s.strip_suffix(suffix) {
            return Some((number, *mult));
        }
    }
    if s.chars().all(|c| c.is_ascii_digit() || c == '.' || c == '-' || c == '+') {
        return Some((s, 1.0));
    }
    None
}

/// Bytes of a k8s `Quantity`, or `None` if it does not parse.
pub fn quantity_bytes(q: &Quantity) -> Option<i64> {
    parse_quantity(&q.0)
}
