//! Reporting-period normalizer.
//!
//! The disclosure site labels each filing with free text such as `"2024"`,
//! `"2024, 6 месяцев"` or `"2023, 3 квартал"`. [`normalize_period`] turns
//! that text into a [`NormalizedPeriod`] of `(year, months)`:
//!
//! | Input | Result |
//! |-------|--------|
//! | `"2024"` | `(2024, 12)` |
//! | `"2024, 6 месяцев"` | `(2024, 6)` |
//! | `"2024, 2 квартал"` | `(2024, 6)` |
//! | `"2024, 5 квартал"` | error |
//!
//! Units match on their stem, in Russian or English, ignoring case.

use crate::error::PeriodParseError;
use crate::models::NormalizedPeriod;

pub const MIN_YEAR: i32 = 2000;
pub const MAX_YEAR: i32 = 2100;

const MONTH_STEMS: &[&str] = &["месяц", "month"];
const QUARTER_STEMS: &[&str] = &["квартал", "quarter"];

/// Parse a raw period description into `(year, months)`.
pub fn normalize_period(raw: &str) -> Result<NormalizedPeriod, PeriodParseError> {
    let text = raw.trim();
    let mut parts = text.split(',');
    let year_part = parts.next().unwrap_or_default();
    let rest = parts.next();
    if parts.next().is_some() {
        return Err(PeriodParseError::new(raw, "more than one comma"));
    }

    let year = parse_year(raw, year_part)?;

    let Some(rest) = rest else {
        return Ok(NormalizedPeriod { year, months: 12 });
    };

    let mut tokens = rest.split_whitespace();
    let (Some(count_token), Some(unit)) = (tokens.next(), tokens.next()) else {
        return Err(PeriodParseError::new(raw, "expected '<count> <unit>' after comma"));
    };
    let count: u32 = count_token
        .parse()
        .map_err(|_| PeriodParseError::new(raw, format!("invalid count '{}'", count_token)))?;

    let unit = unit.to_lowercase();
    let months = if has_stem(&unit, MONTH_STEMS) {
        if count == 0 {
            return Err(PeriodParseError::new(raw, "month count must be positive"));
        }
        count
    } else if has_stem(&unit, QUARTER_STEMS) {
        if !(1..=4).contains(&count) {
            return Err(PeriodParseError::new(
                raw,
                format!("quarter {} is outside 1..=4", count),
            ));
        }
        count * 3
    } else {
        return Err(PeriodParseError::new(raw, format!("unknown unit '{}'", unit)));
    };

    Ok(NormalizedPeriod { year, months })
}

fn parse_year(raw: &str, part: &str) -> Result<i32, PeriodParseError> {
    let part = part.trim();
    let year: i32 = part
        .parse()
        .map_err(|_| PeriodParseError::new(raw, format!("invalid year '{}'", part)))?;
    if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
        return Err(PeriodParseError::new(
            raw,
            format!("year {} is outside {}..={}", year, MIN_YEAR, MAX_YEAR),
        ));
    }
    Ok(year)
}

fn has_stem(unit: &str, stems: &[&str]) -> bool {
    stems.iter().any(|stem| unit.starts_with(stem))
}
