//! RFC 4180 CSV rendering for attendance rows.
//!
//! One header row plus one line per record. Rendering is pure: the streaming
//! loop calls [`format_row`] per row and never buffers more than the line it
//! is about to emit.

use crate::storage::AttendanceRow;
use chrono::NaiveDateTime;
use std::borrow::Cow;

/// Byte-order mark emitted once, before anything else, so spreadsheet
/// applications detect UTF-8.
pub const UTF8_BOM: &str = "\u{FEFF}";

const HEADER_FIELDS: [&str; 6] = [
    "Date",
    "Student Name",
    "Age Group",
    "Status",
    "Check-in Time",
    "Visitor",
];

/// The terminated header line.
pub fn header_row() -> String {
    let mut line = HEADER_FIELDS
        .iter()
        .map(|field| escape_cell(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Render one attendance record as a terminated CSV line.
pub fn format_row(row: &AttendanceRow) -> String {
    let date = row.date.format("%Y-%m-%d").to_string();
    let status = if row.present { "Present" } else { "Absent" };
    let check_in = format_check_in_time(row.check_in_time);
    let visitor = if row.is_visitor { "Yes" } else { "No" };

    let fields = [
        date.as_str(),
        row.student_name.as_str(),
        row.age_group.as_str(),
        status,
        check_in.as_str(),
        visitor,
    ];

    let mut line = fields
        .iter()
        .map(|field| escape_cell(field))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

/// Quote-wrap a cell when it contains a comma, quote, or line break, doubling
/// any internal quotes. Clean cells pass through without allocating.
pub fn escape_cell(cell: &str) -> Cow<'_, str> {
    if cell.contains([',', '"', '\n', '\r']) {
        Cow::Owned(format!("\"{}\"", cell.replace('"', "\"\"")))
    } else {
        Cow::Borrowed(cell)
    }
}

/// 12-hour wall-clock rendering with seconds, e.g. `9:30:00 AM`.
/// Missing timestamps render as `N/A`.
pub fn format_check_in_time(timestamp: Option<NaiveDateTime>) -> String {
    match timestamp {
        Some(ts) => ts.format("%-I:%M:%S %p").to_string(),
        None => "N/A".to_string(),
    }
}
