//! Typed roster records and their wire shapes.
//!
//! Rows arrive from the REST layer as loose JSON objects. They are validated
//! here, once, at the cache-load boundary: a row missing a required field is
//! dropped and counted instead of flowing into the cache half-formed.

use crate::keys::{
    normalize_flag, normalize_hex_color, normalize_id, normalize_time, parse_date_value,
    AssignmentKey, CrewId, LocationId, ShiftKey, ShowId, TrackId,
};
use chrono::{NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use tracing::warn;

/// A crew member as cached for one load cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrewMember {
    pub id: CrewId,
    pub name: String,
    pub department: String,
    pub active: bool,
    /// Only populated when the deployment has the lead-flag column
    pub is_lead: bool,
    /// Days this crew member is normally off
    #[serde(default)]
    pub weekly_off: Vec<Weekday>,
}

/// One show occurrence on a calendar date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShowInstance {
    pub id: ShowId,
    pub date: NaiveDate,
    pub time: Option<NaiveTime>,
    pub sort_order: Option<i32>,
    pub color: Option<String>,
}

impl ShowInstance {
    /// Display order: explicit sort order first, falling back to time of day
    /// when the sort orders are equal or missing, then id for stability.
    /// Shows without a sort order follow those that have one.
    pub fn display_cmp(&self, other: &Self) -> Ordering {
        self.display_key().cmp(&other.display_key())
    }

    fn display_key(&self) -> (bool, Option<i32>, String, ShowId) {
        (
            self.sort_order.is_none(),
            self.sort_order,
            time_label(self.time),
            self.id,
        )
    }
}

// Lexicographic on the zero-padded label; a missing time sorts first.
fn time_label(time: Option<NaiveTime>) -> String {
    time.map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_default()
}

/// Working state of one assignment cell.
///
/// `track_id` is always `None` when `is_working` is false.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Assignment {
    pub is_working: bool,
    pub track_id: Option<TrackId>,
}

impl Assignment {
    pub fn working(track_id: Option<TrackId>) -> Self {
        Self {
            is_working: true,
            track_id: track_id.filter(|t| *t > 0),
        }
    }

    pub fn off() -> Self {
        Self {
            is_working: false,
            track_id: None,
        }
    }

    /// Build from possibly inconsistent parts, enforcing the track invariant.
    pub fn new(is_working: bool, track_id: Option<TrackId>) -> Self {
        if is_working {
            Self::working(track_id)
        } else {
            Self::off()
        }
    }

    /// Working with a concrete track.
    pub fn is_covered(&self) -> bool {
        self.is_working && self.track_id.is_some()
    }
}

/// Start/end times and day classification for one (date, crew) cell.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Shift {
    pub start: Option<NaiveTime>,
    pub end: Option<NaiveTime>,
    pub day_description: Option<String>,
}

impl Shift {
    pub fn new(
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
        day_description: Option<String>,
    ) -> Self {
        let day_description = day_description
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Self {
            start,
            end,
            day_description,
        }
    }

    /// A shift with nothing set does not exist remotely.
    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none() && self.day_description.is_none()
    }
}

/// Hours aggregate computed remotely per (date, crew).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DayHours {
    pub total: f64,
    pub lead: f64,
    pub regular: f64,
    pub overtime: f64,
}

/// Assignment row as decoded from the API.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AssignmentRecord {
    pub key: AssignmentKey,
    pub assignment: Assignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShiftRecord {
    pub key: ShiftKey,
    pub shift: Shift,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DayHoursRecord {
    pub key: ShiftKey,
    pub hours: DayHours,
}

/// Upsert body for the work-assignment resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignmentRow {
    pub location_id: LocationId,
    pub work_date: NaiveDate,
    pub show_id: Option<ShowId>,
    pub crew_id: CrewId,
    pub is_working: bool,
    pub track_id: Option<TrackId>,
}

/// Upsert body for the work-shift resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftRow {
    pub location_id: LocationId,
    pub work_date: NaiveDate,
    pub crew_id: CrewId,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub day_description: Option<String>,
}

/// Create/update body for the show-instance resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShowDraft {
    pub location_id: LocationId,
    pub show_date: NaiveDate,
    pub show_time: Option<NaiveTime>,
    pub sort_order: Option<i32>,
}

/// Decoding of one loose API row into a typed record.
pub trait FromRow: Sized {
    /// Slice name used in load warnings
    const SLICE: &'static str;

    fn from_row(row: &Value) -> Option<Self>;
}

/// Decode every row, dropping and counting the invalid ones.
pub fn decode_rows<T: FromRow>(rows: &[Value]) -> Vec<T> {
    let decoded: Vec<T> = rows.iter().filter_map(T::from_row).collect();
    let dropped = rows.len() - decoded.len();
    if dropped > 0 {
        warn!(
            "Dropped {} invalid {} row(s) of {}",
            dropped,
            T::SLICE,
            rows.len()
        );
    }
    decoded
}

fn text(row: &Value, field: &str) -> Option<String> {
    row.get(field)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn number(row: &Value, field: &str) -> f64 {
    let value = match row.get(field) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    };
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

fn field<'a>(row: &'a Value, name: &str) -> &'a Value {
    row.get(name).unwrap_or(&Value::Null)
}

/// Parse weekly-off markers: an array of day names or numbers (0 = Sunday),
/// or a comma separated string of either.
fn weekly_off(value: &Value) -> Vec<Weekday> {
    let items: Vec<Value> = match value {
        Value::Array(items) => items.clone(),
        Value::String(s) => s
            .split(',')
            .map(|p| Value::String(p.trim().to_string()))
            .collect(),
        _ => Vec::new(),
    };
    let mut days: Vec<Weekday> = items.iter().filter_map(weekday).collect();
    days.sort_by_key(|d| d.num_days_from_sunday());
    days.dedup();
    days
}

fn weekday(value: &Value) -> Option<Weekday> {
    let from_sunday = |n: u64| match n {
        0 => Some(Weekday::Sun),
        1 => Some(Weekday::Mon),
        2 => Some(Weekday::Tue),
        3 => Some(Weekday::Wed),
        4 => Some(Weekday::Thu),
        5 => Some(Weekday::Fri),
        6 => Some(Weekday::Sat),
        _ => None,
    };
    match value {
        Value::Number(n) => n.as_u64().and_then(from_sunday),
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<u64>() {
                Ok(n) => from_sunday(n),
                Err(_) => s.parse::<Weekday>().ok(),
            }
        }
        _ => None,
    }
}

impl FromRow for CrewMember {
    const SLICE: &'static str = "crew";

    fn from_row(row: &Value) -> Option<Self> {
        let id = normalize_id(field(row, "id"))?;
        let name = text(row, "name")?;
        Some(Self {
            id,
            name,
            department: text(row, "department").unwrap_or_default(),
            // Rows without an explicit flag are treated as active.
            active: row.get("active").map(normalize_flag).unwrap_or(true),
            is_lead: normalize_flag(field(row, "is_lead")),
            weekly_off: weekly_off(field(row, "weekly_off")),
        })
    }
}

impl FromRow for ShowInstance {
    const SLICE: &'static str = "shows";

    fn from_row(row: &Value) -> Option<Self> {
        Some(Self {
            id: normalize_id(field(row, "id"))?,
            date: parse_date_value(field(row, "show_date"))?,
            time: normalize_time(field(row, "show_time")),
            sort_order: field(row, "sort_order")
                .as_i64()
                .and_then(|n| i32::try_from(n).ok()),
            color: normalize_hex_color(field(row, "color")),
        })
    }
}

impl FromRow for AssignmentRecord {
    const SLICE: &'static str = "assignments";

    fn from_row(row: &Value) -> Option<Self> {
        let key = AssignmentKey::from_raw(
            field(row, "work_date"),
            field(row, "show_id"),
            field(row, "crew_id"),
        )?;
        let track_id = normalize_id(field(row, "track_id")).and_then(|t| TrackId::try_from(t).ok());
        Some(Self {
            key,
            assignment: Assignment::new(normalize_flag(field(row, "is_working")), track_id),
        })
    }
}

impl FromRow for ShiftRecord {
    const SLICE: &'static str = "shifts";

    fn from_row(row: &Value) -> Option<Self> {
        let key = ShiftKey::from_raw(field(row, "work_date"), field(row, "crew_id"))?;
        Some(Self {
            key,
            shift: Shift::new(
                normalize_time(field(row, "start_time")),
                normalize_time(field(row, "end_time")),
                text(row, "day_description"),
            ),
        })
    }
}

impl FromRow for DayHoursRecord {
    const SLICE: &'static str = "day hours";

    fn from_row(row: &Value) -> Option<Self> {
        let key = ShiftKey::from_raw(field(row, "work_date"), field(row, "crew_id"))?;
        Some(Self {
            key,
            hours: DayHours {
                total: number(row, "total_hours"),
                lead: number(row, "lead_hours"),
                regular: number(row, "regular_hours"),
                overtime: number(row, "overtime_hours"),
            },
        })
    }
}
