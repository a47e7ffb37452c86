use chrono::{Datelike, NaiveDate};

/// Month 1-12, or 0 without a date.
pub fn month(week: Option<NaiveDate>) -> u32 {
    week.map_or(0, |d| d.month())
}

/// ISO week-of-year, or 0 without a date.
pub fn iso_week(week: Option<NaiveDate>) -> u32 {
    week.map_or(0, |d| d.iso_week().week())
}
