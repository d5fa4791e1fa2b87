//! Ordinal day arithmetic.
//!
//! Segment boundaries arrive as proleptic-Gregorian ordinal days where
//! 0001-01-01 is day 1, the same numbering chrono calls "days from CE".

use chrono::{Datelike, NaiveDate};

use crate::error::{ChipmapError, Result};

/// Ordinal of 1982-01-01, the earliest date a series can start.
pub const SERIES_EPOCH: i64 = 723_546;

/// Shift between our ordinals and MATLAB `datenum` day numbers.
pub const MATLAB_OFFSET: i64 = 366;

/// Annual sampling instant: (month, day) of the representative mid-year date.
const MID_YEAR: (u32, u32) = (7, 1);

pub fn from_ordinal(day: i64) -> Option<NaiveDate> {
    i32::try_from(day).ok().and_then(NaiveDate::from_num_days_from_ce_opt)
}

pub fn to_ordinal(date: NaiveDate) -> i64 {
    i64::from(date.num_days_from_ce())
}

pub fn ordinal(year: i32, month: u32, day: u32) -> Result<i64> {
    NaiveDate::from_ymd_opt(year, month, day)
        .map(to_ordinal)
        .ok_or_else(|| ChipmapError::date(format!("invalid date {year:04}-{month:02}-{day:02}")))
}

/// Calendar year of an ordinal day, `None` for days ≤ 0 or out of range.
pub fn year_of(day: i64) -> Option<i32> {
    if day <= 0 {
        return None;
    }
    from_ordinal(day).map(|d| d.year())
}

/// Ordinal day of July 1 in `year`.
pub fn mid_year(year: i32) -> Result<i64> {
    ordinal(year, MID_YEAR.0, MID_YEAR.1)
}

pub fn to_matlab(day: i64) -> i64 {
    day + MATLAB_OFFSET
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_one_is_first_day_of_ce() {
        assert_eq!(ordinal(1, 1, 1).unwrap(), 1);
        assert_eq!(from_ordinal(1), NaiveDate::from_ymd_opt(1, 1, 1));
    }

    #[test]
    fn series_epoch_is_start_of_1982() {
        assert_eq!(ordinal(1982, 1, 1).unwrap(), SERIES_EPOCH);
    }

    #[test]
    fn year_of_known_day() {
        let d = ordinal(2000, 3, 1).unwrap();
        assert_eq!(year_of(d), Some(2000));
        assert_eq!(year_of(d - 61), Some(1999));
    }

    #[test]
    fn non_positive_days_have_no_calendar_date() {
        assert_eq!(year_of(0), None);
        assert_eq!(year_of(-10), None);
    }

    #[test]
    fn mid_year_is_july_first() {
        let d = mid_year(1995).unwrap();
        assert_eq!(from_ordinal(d), NaiveDate::from_ymd_opt(1995, 7, 1));
    }

    #[test]
    fn invalid_calendar_date_is_an_error() {
        assert!(ordinal(2001, 2, 29).is_err());
    }

    #[test]
    fn matlab_shift_adds_366() {
        assert_eq!(to_matlab(SERIES_EPOCH), SERIES_EPOCH + 366);
    }
}
