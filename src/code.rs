//! Parcel code format: `PAR-<REGION3>-<YEAR>-<SEQ4>`
//!
//! The sequence itself is allocated by [`crate::db::sequences`] inside the
//! transaction that inserts the parcel.

use crate::error::{EngineError, Result};

pub const CODE_PREFIX: &str = "PAR";

/// First three characters of the upper-cased region name.
///
/// Upper-casing happens first so that characters expanding under it
/// (`ß` to `SS`) cannot widen the code past three characters.
pub fn region_code(region: &str) -> Result<String> {
    let trimmed = region.trim();
    if trimmed.chars().count() < 3 {
        return Err(EngineError::validation(
            "region",
            "must contain at least 3 characters",
        ));
    }
    Ok(trimmed.to_uppercase().chars().take(3).collect())
}

/// Prefix shared by every code of a region and year, e.g. `PAR-DAK-2024`
pub fn code_prefix(region_code: &str, year: i32) -> String {
    format!("{}-{}-{}", CODE_PREFIX, region_code, year)
}

pub fn format_code(prefix: &str, sequence: u32) -> String {
    format!("{}-{:04}", prefix, sequence)
}

/// Split a code into its prefix and sequence number
pub fn parse_code(code: &str) -> Option<(&str, u32)> {
    let (prefix, seq) = code.rsplit_once('-')?;
    if !prefix.starts_with(CODE_PREFIX) || seq.is_empty() || !seq.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((prefix, seq.parse().ok()?))
}
