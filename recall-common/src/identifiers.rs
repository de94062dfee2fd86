//! Product identifier normalization
//!
//! Barcodes arrive as UPC-A (12), UPC-E (6/8), EAN-13 or GTIN-14 and are
//! frequently re-padded by sources. Comparisons go through the zero-trimmed
//! digit string so "012914632109" and "0012914632109" meet.

/// Shortest and longest accepted barcode lengths
pub const BARCODE_MIN_DIGITS: usize = 6;
pub const BARCODE_MAX_DIGITS: usize = 14;

/// Strip separators from a barcode and check its length.
///
/// Returns `None` when the input has non-digit characters other than
/// spaces/hyphens, or when the digit count is outside 6..=14.
pub fn normalize_barcode(raw: &str) -> Option<String> {
    let mut digits = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        match c {
            '0'..='9' => digits.push(c),
            ' ' | '-' => {}
            _ => return None,
        }
    }

    if (BARCODE_MIN_DIGITS..=BARCODE_MAX_DIGITS).contains(&digits.len()) {
        Some(digits)
    } else {
        None
    }
}

/// GTIN-14 form of a digit string (left-padded with zeros)
pub fn gtin14(digits: &str) -> String {
    format!("{:0>14}", digits)
}

/// Every zero-padded spelling of `digits` a source might have stored
pub fn barcode_variants(digits: &str) -> Vec<String> {
    let trimmed = digits.trim_start_matches('0');
    if trimmed.is_empty() {
        return vec![digits.to_string()];
    }

    (trimmed.len()..=BARCODE_MAX_DIGITS.max(trimmed.len()))
        .map(|width| format!("{:0>width$}", trimmed, width = width))
        .collect()
}

/// Case- and whitespace-insensitive key for model numbers, lots and VIN ranges
pub fn text_identifier_key(raw: &str) -> Option<String> {
    let key: String = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase();
    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}
