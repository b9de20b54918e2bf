//! Key codec: canonical composite keys and normalisation of loosely-typed values.
//!
//! Everything here is total. Invalid input yields `None` or an empty string,
//! never a panic, because these helpers run for every cell the grid renders
//! and for every row decoded from the remote API.

use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use std::fmt;

pub type CrewId = u64;
pub type ShowId = u64;
pub type TrackId = u32;
pub type LocationId = u64;

/// Show slot used for crews whose day is not split by show.
pub const NO_SHOW: ShowId = 0;

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Key of one assignment cell: (date, show-or-none, crew).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AssignmentKey {
    pub date: NaiveDate,
    /// `NO_SHOW` when the assignment is not tied to a show occurrence
    pub show_id: ShowId,
    pub crew_id: CrewId,
}

impl AssignmentKey {
    /// Build a key. `None` and `Some(0)` both land in the `NO_SHOW` bucket.
    pub fn new(date: NaiveDate, show_id: Option<ShowId>, crew_id: CrewId) -> Self {
        Self {
            date,
            show_id: show_id.unwrap_or(NO_SHOW),
            crew_id,
        }
    }

    /// Build a key from raw API values. Returns `None` when the date or the
    /// crew id is unusable; an unusable show id collapses to `NO_SHOW`.
    pub fn from_raw(date: &Value, show_id: &Value, crew_id: &Value) -> Option<Self> {
        let date = parse_date_value(date)?;
        let crew_id = normalize_id(crew_id)?;
        Some(Self::new(date, normalize_id(show_id), crew_id))
    }

    /// The show id, or `None` for the no-show bucket.
    pub fn show(&self) -> Option<ShowId> {
        (self.show_id != NO_SHOW).then_some(self.show_id)
    }

    /// The (date, crew) cell this assignment belongs to.
    pub fn shift_key(&self) -> ShiftKey {
        ShiftKey::new(self.date, self.crew_id)
    }
}

impl fmt::Display for AssignmentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.date.format(DATE_FORMAT),
            self.show_id,
            self.crew_id
        )
    }
}

/// Key of one shift cell: (date, crew).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ShiftKey {
    pub date: NaiveDate,
    pub crew_id: CrewId,
}

impl ShiftKey {
    pub fn new(date: NaiveDate, crew_id: CrewId) -> Self {
        Self { date, crew_id }
    }

    pub fn from_raw(date: &Value, crew_id: &Value) -> Option<Self> {
        Some(Self::new(parse_date_value(date)?, normalize_id(crew_id)?))
    }
}

impl fmt::Display for ShiftKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.date.format(DATE_FORMAT), self.crew_id)
    }
}

/// Convenience wrapper matching the key shape used throughout the engine.
pub fn assignment_key(date: NaiveDate, show_id: Option<ShowId>, crew_id: CrewId) -> AssignmentKey {
    AssignmentKey::new(date, show_id, crew_id)
}

pub fn shift_key(date: NaiveDate, crew_id: CrewId) -> ShiftKey {
    ShiftKey::new(date, crew_id)
}

/// Normalise an id that may arrive as a number or a numeric string.
///
/// Rejects non-finite, fractional, zero and negative values.
pub fn normalize_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => {
            if let Some(id) = n.as_u64() {
                return (id > 0).then_some(id);
            }
            n.as_f64().and_then(id_from_float)
        }
        Value::String(s) => {
            let s = s.trim();
            if let Ok(id) = s.parse::<u64>() {
                return (id > 0).then_some(id);
            }
            s.parse::<f64>().ok().and_then(id_from_float)
        }
        _ => None,
    }
}

fn id_from_float(f: f64) -> Option<u64> {
    if f.is_finite() && f >= 1.0 && f.fract() == 0.0 && f <= u64::MAX as f64 {
        Some(f as u64)
    } else {
        None
    }
}

/// Normalise a date to strict `YYYY-MM-DD`, or `""` when it is anything else.
///
/// Other formats are rejected rather than coerced, so a key namespace never
/// mixes `2024-01-02` with `01/02/2024`.
pub fn normalize_date(value: &str) -> String {
    parse_date(value)
        .map(|d| d.format(DATE_FORMAT).to_string())
        .unwrap_or_default()
}

/// Parse a strict `YYYY-MM-DD` date.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let bytes = value.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !digits_ok {
        return None;
    }
    NaiveDate::parse_from_str(value, DATE_FORMAT).ok()
}

pub fn parse_date_value(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_date)
}

/// Normalise a boolean-ish flag (`true`, `"t"`, `"yes"`, `1`, ...).
pub fn normalize_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "1" | "yes" | "y" | "on"
        ),
        _ => false,
    }
}

/// Normalise a clock value (`HH:MM`, `HH:MM:SS`, `HH:MM:SS.ffff`).
pub fn normalize_time(value: &Value) -> Option<NaiveTime> {
    let s = value.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M:%S%.f")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .ok()
}

/// Normalise a hex colour to lowercase `#rrggbb`.
///
/// Accepts `#rgb`, `rgb`, `#rrggbb`, `rrggbb` and `0xrrggbb`.
pub fn normalize_hex_color(value: &Value) -> Option<String> {
    let s = value.as_str()?.trim();
    let digits = s
        .strip_prefix('#')
        .or_else(|| s.strip_prefix("0x"))
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    let digits = match digits.len() {
        6 => digits.to_string(),
        3 => digits.chars().flat_map(|c| [c, c]).collect(),
        _ => return None,
    };
    let rgb = hex::decode(&digits).ok()?;
    Some(format!("#{}", hex::encode(rgb)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    #[test]
    fn test_normalize_id() {
        assert_eq!(normalize_id(&json!(5)), Some(5));
        assert_eq!(normalize_id(&json!("42")), Some(42));
        assert_eq!(normalize_id(&json!(" 7 ")), Some(7));
        assert_eq!(normalize_id(&json!(3.0)), Some(3));
        assert_eq!(normalize_id(&json!(0)), None);
        assert_eq!(normalize_id(&json!(-4)), None);
        assert_eq!(normalize_id(&json!(2.5)), None);
        assert_eq!(normalize_id(&json!("abc")), None);
        assert_eq!(normalize_id(&json!("NaN")), None);
        assert_eq!(normalize_id(&json!("inf")), None);
        assert_eq!(normalize_id(&Value::Null), None);
        assert_eq!(normalize_id(&json!(true)), None);
    }

    #[test]
    fn test_normalize_date_is_strict() {
        assert_eq!(normalize_date("2024-01-08"), "2024-01-08");
        assert_eq!(normalize_date("2024-1-8"), "");
        assert_eq!(normalize_date("01/08/2024"), "");
        assert_eq!(normalize_date("2024-01-08T00:00:00"), "");
        assert_eq!(normalize_date("2024-02-30"), "");
        assert_eq!(normalize_date(""), "");
        assert_eq!(normalize_date("+024-01-08"), "");
    }

    #[test]
    fn test_assignment_key_collapses_missing_show() {
        let a = AssignmentKey::new(d("2024-01-01"), None, 9);
        let b = AssignmentKey::new(d("2024-01-01"), Some(NO_SHOW), 9);
        assert_eq!(a, b);
        assert_eq!(a.show(), None);
        assert_eq!(a.to_string(), "2024-01-01|0|9");

        let raw = AssignmentKey::from_raw(&json!("2024-01-01"), &json!(-3), &json!("9"));
        assert_eq!(raw, Some(a));

        let with_show = AssignmentKey::new(d("2024-01-01"), Some(12), 9);
        assert_eq!(with_show.show(), Some(12));
        assert_eq!(with_show.shift_key(), ShiftKey::new(d("2024-01-01"), 9));
    }

    #[test]
    fn test_raw_keys_reject_bad_input() {
        assert_eq!(
            AssignmentKey::from_raw(&json!("2024/01/01"), &Value::Null, &json!(1)),
            None
        );
        assert_eq!(
            AssignmentKey::from_raw(&json!("2024-01-01"), &Value::Null, &json!(0)),
            None
        );
        assert_eq!(ShiftKey::from_raw(&json!("2024-01-01"), &json!("x")), None);
        assert_eq!(
            ShiftKey::from_raw(&json!("2024-01-01"), &json!(4)).map(|k| k.to_string()),
            Some("2024-01-01|4".to_string())
        );
    }

    #[test]
    fn test_normalize_flag() {
        assert!(normalize_flag(&json!(true)));
        assert!(normalize_flag(&json!("TRUE")));
        assert!(normalize_flag(&json!("t")));
        assert!(normalize_flag(&json!(1)));
        assert!(!normalize_flag(&json!(0)));
        assert!(!normalize_flag(&json!("no")));
        assert!(!normalize_flag(&Value::Null));
    }

    #[test]
    fn test_normalize_time() {
        let t = NaiveTime::from_hms_opt(19, 30, 0).unwrap();
        assert_eq!(normalize_time(&json!("19:30")), Some(t));
        assert_eq!(normalize_time(&json!("19:30:00")), Some(t));
        assert_eq!(normalize_time(&json!("19:30:00.000")), Some(t));
        assert_eq!(normalize_time(&json!("")), None);
        assert_eq!(normalize_time(&json!("7pm")), None);
    }

    #[test]
    fn test_normalize_hex_color() {
        assert_eq!(normalize_hex_color(&json!("#AABBCC")), Some("#aabbcc".into()));
        assert_eq!(normalize_hex_color(&json!("0x00ff00")), Some("#00ff00".into()));
        assert_eq!(normalize_hex_color(&json!("f0a")), Some("#ff00aa".into()));
        assert_eq!(normalize_hex_color(&json!("#12345")), None);
        assert_eq!(normalize_hex_color(&json!("zzzzzz")), None);
        assert_eq!(normalize_hex_color(&json!("#g0a")), None);
        assert_eq!(normalize_hex_color(&json!("0XAbC")), Some("#aabbcc".into()));
        assert_eq!(normalize_hex_color(&json!(123)), None);
    }
}
