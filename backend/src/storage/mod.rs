//! # Storage layer
//!
//! Defines the attendance store abstraction the export pipeline consumes,
//! plus the sqlite implementation. The domain layer only ever sees
//! [`AttendanceStore`], so tests can substitute an in-memory store and the
//! orchestrator never learns which backend is underneath.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use shared::AgeRange;

pub mod sqlite;

pub use sqlite::SqliteAttendanceStore;

/// Inclusive calendar-date filter for an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

/// One attendance record joined with its kid, as read from the store.
/// An immutable snapshot: the export pipeline never mutates rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceRow {
    pub date: NaiveDate,
    pub student_name: String,
    /// Group label derived from the kid's age ("2-5yrs" etc., empty when
    /// the age falls outside every bucket)
    pub age_group: String,
    pub present: bool,
    pub check_in_time: Option<NaiveDateTime>,
    pub is_visitor: bool,
}

/// Read interface the export orchestrator depends on.
#[async_trait]
pub trait AttendanceStore: Send + Sync {
    /// Total rows matching the filter, computed without materializing them.
    async fn count(&self, dates: &DateRange, ages: &AgeRange) -> Result<u64>;

    /// One deterministically ordered page of matching rows.
    ///
    /// The ordering is total: `(date, student_name)` with the kid id as a
    /// final tiebreaker, so advancing the offset never skips or duplicates a
    /// row within one export.
    async fn fetch_page(
        &self,
        dates: &DateRange,
        ages: &AgeRange,
        offset: u64,
        limit: u32,
    ) -> Result<Vec<AttendanceRow>>;
}
