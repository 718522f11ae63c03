use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Request body for the attendance CSV export endpoint.
///
/// All fields arrive as optional strings so the validator (not serde) decides
/// what is missing or malformed, and can report the exact contract reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    /// Inclusive range start (YYYY-MM-DD)
    pub start_date: Option<String>,
    /// Inclusive range end (YYYY-MM-DD)
    pub end_date: Option<String>,
    /// Age group filter; defaults to "all" when absent
    pub age_group: Option<String>,
    /// Whether to emit the header row; defaults to true when absent
    pub include_headers: Option<bool>,
}

/// Coarse age bucket used to filter attendance records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgeGroup {
    #[serde(rename = "2-5yrs")]
    TwoToFive,
    #[serde(rename = "6-9yrs")]
    SixToNine,
    #[serde(rename = "10-13yrs")]
    TenToThirteen,
    #[serde(rename = "all")]
    All,
}

/// Numeric age range derived from an [`AgeGroup`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgeRange {
    pub min: u32,
    pub max: u32,
}

impl AgeGroup {
    /// All valid wire values, in display order.
    pub const ALL_GROUPS: [AgeGroup; 4] = [
        AgeGroup::TwoToFive,
        AgeGroup::SixToNine,
        AgeGroup::TenToThirteen,
        AgeGroup::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgeGroup::TwoToFive => "2-5yrs",
            AgeGroup::SixToNine => "6-9yrs",
            AgeGroup::TenToThirteen => "10-13yrs",
            AgeGroup::All => "all",
        }
    }

    /// Numeric min/max range for this group. "all" covers the full domain.
    pub fn age_range(&self) -> AgeRange {
        match self {
            AgeGroup::TwoToFive => AgeRange { min: 2, max: 5 },
            AgeGroup::SixToNine => AgeRange { min: 6, max: 9 },
            AgeGroup::TenToThirteen => AgeRange { min: 10, max: 13 },
            AgeGroup::All => AgeRange { min: 0, max: 100 },
        }
    }
}

impl fmt::Display for AgeGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeGroup {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2-5yrs" => Ok(AgeGroup::TwoToFive),
            "6-9yrs" => Ok(AgeGroup::SixToNine),
            "10-13yrs" => Ok(AgeGroup::TenToThirteen),
            "all" => Ok(AgeGroup::All),
            _ => Err(()),
        }
    }
}

/// Age range for a raw (possibly invalid) age-group string.
///
/// Unknown groups map to `{min: 0, max: 0}`, an empty range that matches no
/// kid, so a bad value can never widen a filter.
pub fn age_range_for(age_group: &str) -> AgeRange {
    match age_group.parse::<AgeGroup>() {
        Ok(group) => group.age_range(),
        Err(()) => AgeRange { min: 0, max: 0 },
    }
}

/// Group label for a kid's numeric age, used when rendering export rows.
/// Ages outside every bucket render as an empty cell.
pub fn age_group_label(age: u32) -> &'static str {
    match age {
        2..=5 => "2-5yrs",
        6..=9 => "6-9yrs",
        10..=13 => "10-13yrs",
        _ => "",
    }
}

/// JSON error body returned by the export endpoint for every rejection.
///
/// `retry_after` is set on 429s; `total_records`/`max_records` on 413s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_records: Option<u64>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            retry_after: None,
            total_records: None,
            max_records: None,
        }
    }
}

/// Rate limiter stats for the operator endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitStats {
    /// Records currently held, expired or not
    pub total_users: usize,
    /// Records whose window has not yet expired
    pub active_users: usize,
}
