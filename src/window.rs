//! Rolling date window the roster grid is materialised over.

use chrono::{Days, NaiveDate};
use serde::Serialize;

/// Inclusive calendar range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    pub fn single(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Number of days in the range; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        (self.end - self.start).num_days() as u64 + 1
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start.iter_days().take(self.len() as usize).collect()
    }
}

/// The current window: a start date and a fixed length in days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    start: NaiveDate,
    range_length: u32,
}

impl DateWindow {
    /// Create a window. A zero length is clamped to one day.
    pub fn new(start: NaiveDate, range_length: u32) -> Self {
        Self {
            start,
            range_length: range_length.max(1),
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn range_length(&self) -> u32 {
        self.range_length
    }

    pub fn end(&self) -> NaiveDate {
        self.start
            .checked_add_days(Days::new(u64::from(self.range_length) - 1))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn range(&self) -> DateRange {
        DateRange::new(self.start, self.end())
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.range().dates()
    }

    /// The window immediately before this one, of the same length.
    pub fn previous(&self) -> Option<DateWindow> {
        let start = self
            .start
            .checked_sub_days(Days::new(u64::from(self.range_length)))?;
        Some(Self::new(start, self.range_length))
    }

    /// Move by `delta` whole windows. Returns `false` when nothing moved:
    /// a zero delta, or a move that would leave the calendar.
    pub fn shift(&mut self, delta: i64) -> bool {
        if delta == 0 {
            return false;
        }
        let days = delta.unsigned_abs().saturating_mul(u64::from(self.range_length));
        let moved = if delta > 0 {
            self.start.checked_add_days(Days::new(days))
        } else {
            self.start.checked_sub_days(Days::new(days))
        };
        match moved {
            Some(start) => {
                self.start = start;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_window_derived_dates() {
        let window = DateWindow::new(d(2024, 1, 1), 7);
        assert_eq!(window.end(), d(2024, 1, 7));
        let dates = window.dates();
        assert_eq!(dates.len(), 7);
        assert_eq!(dates[0], d(2024, 1, 1));
        assert_eq!(dates[6], d(2024, 1, 7));
        assert_eq!(window.range().len(), 7);
    }

    #[test]
    fn test_shift_week_forward_and_back() {
        let mut window = DateWindow::new(d(2024, 1, 1), 7);
        assert!(window.shift(1));
        assert_eq!(window.start(), d(2024, 1, 8));
        assert!(window.shift(-1));
        assert_eq!(window.start(), d(2024, 1, 1));
        assert!(window.shift(-2));
        assert_eq!(window.start(), d(2023, 12, 18));
    }

    #[test]
    fn test_zero_shift_is_noop() {
        let mut window = DateWindow::new(d(2024, 1, 1), 7);
        assert!(!window.shift(0));
        assert_eq!(window.start(), d(2024, 1, 1));
    }

    #[test]
    fn test_previous_window_and_clamp() {
        let window = DateWindow::new(d(2024, 3, 4), 14);
        let prev = window.previous().unwrap();
        assert_eq!(prev.start(), d(2024, 2, 19));
        assert_eq!(prev.end(), d(2024, 3, 3));

        let single = DateWindow::new(d(2024, 3, 4), 0);
        assert_eq!(single.range_length(), 1);
        assert_eq!(single.end(), d(2024, 3, 4));
    }

    #[test]
    fn test_shift_out_of_calendar_is_refused() {
        let mut window = DateWindow::new(NaiveDate::MAX, 7);
        assert!(!window.shift(1));
        assert_eq!(window.start(), NaiveDate::MAX);
    }

    #[test]
    fn test_range_contains() {
        let range = DateRange::new(d(2024, 1, 7), d(2024, 1, 1));
        assert_eq!(range.start, d(2024, 1, 1));
        assert!(range.contains(d(2024, 1, 4)));
        assert!(!range.contains(d(2024, 1, 8)));
        assert_eq!(DateRange::single(d(2024, 1, 1)).dates(), vec![d(2024, 1, 1)]);
    }
}
