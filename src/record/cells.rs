//! Numeric cell parsing shared by every record shape.

use crate::{Error, Result};

/// Token the source renders for "no data".
pub const PLACEHOLDER: &str = "N/A";

/// Strip decoration from a numeric cell. `None` means blank or placeholder.
fn normalize(cell: &str) -> Option<String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed == PLACEHOLDER {
        return None;
    }
    Some(trimmed.trim_start_matches('+').replace(',', ""))
}

fn parse_error(field: &'static str, cell: &str) -> Error {
    Error::Parse {
        field,
        value: cell.trim().to_string(),
    }
}

/// Parse an unsigned counter; blank and placeholder cells are zero.
pub fn parse_u64(cell: &str, field: &'static str) -> Result<u64> {
    match normalize(cell) {
        None => Ok(0),
        Some(digits) => digits.parse().map_err(|_| parse_error(field, cell)),
    }
}

/// Parse a floating point ratio; blank and placeholder cells are zero.
pub fn parse_f64(cell: &str, field: &'static str) -> Result<f64> {
    match normalize(cell) {
        None => Ok(0.0),
        Some(digits) => digits
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| parse_error(field, cell)),
    }
}

/// Parse a counter the source may render as a negative "unknown" sentinel.
///
/// The cell must still be a valid signed integer. Negative values resolve to
/// zero, so a true zero and an unknown value are indistinguishable.
pub fn parse_clamped(cell: &str, field: &'static str) -> Result<u64> {
    let Some(digits) = normalize(cell) else {
        return Ok(0);
    };
    if digits.starts_with('-') {
        digits
            .parse::<i64>()
            .map_err(|_| parse_error(field, cell))?;
        return Ok(0);
    }
    digits.parse().map_err(|_| parse_error(field, cell))
}
