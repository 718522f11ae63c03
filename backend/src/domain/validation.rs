//! Export request validation.
//!
//! One canonical validator with a fixed rule order replaces the per-route
//! variations that accumulated historically. The first failing rule wins and
//! its reason string is the one the client sees, so the order here is part of
//! the API contract.

use chrono::NaiveDate;
use shared::{AgeGroup, ExportRequest};
use thiserror::Error;

/// Rejection reasons, in the order the rules run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing required parameters: startDate and endDate")]
    MissingParameters,

    #[error("Invalid date format. Use YYYY-MM-DD")]
    InvalidDateFormat,

    #[error("End date must be after start date")]
    EndBeforeStart,

    #[error("Date range cannot exceed {max_days} days")]
    DateRangeTooLong { max_days: i64 },

    #[error("Invalid age group. Must be: 2-5yrs, 6-9yrs, 10-13yrs, or all")]
    InvalidAgeGroup,
}

/// A validated export request with all defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub age_group: AgeGroup,
    pub include_headers: bool,
}

/// Run the five ordered validation rules against a raw request.
///
/// Pure function: same input, same result, no side effects.
pub fn validate(
    request: &ExportRequest,
    max_range_days: i64,
) -> Result<ExportQuery, ValidationError> {
    // Rule 1: both dates present. An empty string counts as absent.
    let raw_start = request
        .start_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingParameters)?;
    let raw_end = request
        .end_date
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(ValidationError::MissingParameters)?;

    // Rule 2: both parse as ISO calendar dates.
    let start_date = parse_iso_date(raw_start)?;
    let end_date = parse_iso_date(raw_end)?;

    // Rule 3: range is not inverted.
    if end_date < start_date {
        return Err(ValidationError::EndBeforeStart);
    }

    // Rule 4: range length. Exactly max_days is allowed.
    let days = (end_date - start_date).num_days();
    if days > max_range_days {
        return Err(ValidationError::DateRangeTooLong {
            max_days: max_range_days,
        });
    }

    // Rule 5: age group, defaulting to "all" when absent.
    let age_group = match request.age_group.as_deref() {
        None => AgeGroup::All,
        Some(raw) => raw
            .parse::<AgeGroup>()
            .map_err(|()| ValidationError::InvalidAgeGroup)?,
    };

    Ok(ExportQuery {
        start_date,
        end_date,
        age_group,
        include_headers: request.include_headers.unwrap_or(true),
    })
}

fn parse_iso_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").map_err(|_| ValidationError::InvalidDateFormat)
}
