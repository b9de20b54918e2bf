//! Read cache: per-window materialised maps plus the pure read projections
//! the grid renders from.
//!
//! Every slice is replaced wholesale on load. A slice whose load failed is
//! empty and carries an error string; it never silently keeps stale rows.

use crate::gateway::{CrewColumns, GatewayError, RosterGateway};
use crate::keys::{AssignmentKey, CrewId, LocationId, ShiftKey, ShowId, TrackId};
use crate::model::{
    decode_rows, Assignment, AssignmentRecord, CrewMember, DayHours, DayHoursRecord, Shift,
    ShiftRecord, ShowInstance,
};
use crate::window::DateRange;
use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

/// Load error text per slice; `None` means the last load succeeded.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SliceErrors {
    pub crew: Option<String>,
    pub shows: Option<String>,
    pub assignments: Option<String>,
    pub shifts: Option<String>,
    pub day_hours: Option<String>,
}

impl SliceErrors {
    pub fn any(&self) -> bool {
        self.crew.is_some()
            || self.shows.is_some()
            || self.assignments.is_some()
            || self.shifts.is_some()
            || self.day_hours.is_some()
    }
}

/// Results of one window load, one entry per slice.
///
/// `day_hours` is `Ok(None)` when the deployment has no day-hours view.
#[derive(Debug)]
pub struct LoadedSlices {
    pub crew: Result<Vec<CrewMember>, GatewayError>,
    pub shows: Result<Vec<ShowInstance>, GatewayError>,
    pub assignments: Result<Vec<AssignmentRecord>, GatewayError>,
    pub shifts: Result<Vec<ShiftRecord>, GatewayError>,
    pub day_hours: Result<Option<Vec<DayHoursRecord>>, GatewayError>,
}

/// Fetch every slice for `range` concurrently. Slices fail independently.
pub async fn fetch_slices(
    gateway: &dyn RosterGateway,
    location: LocationId,
    range: DateRange,
) -> LoadedSlices {
    let (crew, shows, assignments, shifts, day_hours) = tokio::join!(
        fetch_crew(gateway, location),
        async {
            gateway
                .fetch_shows(location, range)
                .await
                .map(|rows| decode_rows::<ShowInstance>(&rows))
        },
        async {
            gateway
                .fetch_assignments(location, range)
                .await
                .map(|rows| decode_rows::<AssignmentRecord>(&rows))
        },
        async {
            gateway
                .fetch_shifts(location, range)
                .await
                .map(|rows| decode_rows::<ShiftRecord>(&rows))
        },
        fetch_day_hours(gateway, location, range, None),
    );
    LoadedSlices {
        crew,
        shows,
        assignments,
        shifts,
        day_hours,
    }
}

/// Load the crew roster, falling back to the base column set when the
/// deployment lacks the optional lead-flag column.
pub async fn fetch_crew(
    gateway: &dyn RosterGateway,
    location: LocationId,
) -> Result<Vec<CrewMember>, GatewayError> {
    let rows = match gateway.fetch_crew(location, CrewColumns::Extended).await {
        Ok(rows) => rows,
        Err(e) if e.is_missing_column() => {
            debug!("Crew lead column unavailable ({}), retrying base columns", e);
            gateway.fetch_crew(location, CrewColumns::Base).await?
        }
        Err(e) => return Err(e),
    };
    Ok(decode_rows(&rows))
}

/// Load day hours. A missing view is not an error: it yields `Ok(None)`.
pub async fn fetch_day_hours(
    gateway: &dyn RosterGateway,
    location: LocationId,
    range: DateRange,
    crew: Option<CrewId>,
) -> Result<Option<Vec<DayHoursRecord>>, GatewayError> {
    match gateway.fetch_day_hours(location, range, crew).await {
        Ok(rows) => Ok(Some(decode_rows(&rows))),
        Err(e) if e.is_not_found() => {
            debug!("Day-hours view not available: {}", e);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

#[derive(Debug, Default)]
pub struct RosterCache {
    range: Option<DateRange>,
    crew: Vec<CrewMember>,
    shows: BTreeMap<NaiveDate, Vec<ShowInstance>>,
    assignments: HashMap<AssignmentKey, Assignment>,
    shifts: HashMap<ShiftKey, Shift>,
    day_hours: HashMap<ShiftKey, DayHours>,
    day_hours_available: bool,
    errors: SliceErrors,
}

impl RosterCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace every slice with the results of a load for `range`.
    pub fn install(&mut self, range: DateRange, slices: LoadedSlices) {
        self.range = Some(range);
        self.errors = SliceErrors::default();

        self.crew = match slices.crew {
            Ok(mut crew) => {
                crew.sort_by(|a, b| {
                    a.department
                        .cmp(&b.department)
                        .then_with(|| b.is_lead.cmp(&a.is_lead))
                        .then_with(|| a.name.cmp(&b.name))
                        .then_with(|| a.id.cmp(&b.id))
                });
                crew
            }
            Err(e) => {
                self.errors.crew = Some(e.to_string());
                Vec::new()
            }
        };

        self.shows.clear();
        match slices.shows {
            Ok(shows) => {
                for show in shows {
                    self.shows.entry(show.date).or_default().push(show);
                }
                for day in self.shows.values_mut() {
                    day.sort_by(|a, b| a.display_cmp(b));
                }
            }
            Err(e) => self.errors.shows = Some(e.to_string()),
        }

        self.assignments = match slices.assignments {
            Ok(records) => records
                .into_iter()
                .map(|r| (r.key, r.assignment))
                .collect(),
            Err(e) => {
                self.errors.assignments = Some(e.to_string());
                HashMap::new()
            }
        };

        self.shifts = match slices.shifts {
            Ok(records) => records
                .into_iter()
                .filter(|r| !r.shift.is_empty())
                .map(|r| (r.key, r.shift))
                .collect(),
            Err(e) => {
                self.errors.shifts = Some(e.to_string());
                HashMap::new()
            }
        };

        self.day_hours_available = matches!(slices.day_hours, Ok(Some(_)));
        self.day_hours = match slices.day_hours {
            Ok(Some(records)) => records.into_iter().map(|r| (r.key, r.hours)).collect(),
            Ok(None) => HashMap::new(),
            Err(e) => {
                self.errors.day_hours = Some(e.to_string());
                HashMap::new()
            }
        };

        info!(
            "Loaded roster {}..{}: {} crew, {} shows, {} assignments, {} shifts",
            range.start,
            range.end,
            self.crew.len(),
            self.shows.values().map(Vec::len).sum::<usize>(),
            self.assignments.len(),
            self.shifts.len()
        );
    }

    pub fn range(&self) -> Option<DateRange> {
        self.range
    }

    pub fn errors(&self) -> &SliceErrors {
        &self.errors
    }

    pub fn day_hours_available(&self) -> bool {
        self.day_hours_available
    }

    // --- Projections ---

    /// Crew ordered by department, leads first, then name.
    pub fn crew(&self) -> &[CrewMember] {
        &self.crew
    }

    pub fn active_crew(&self) -> impl Iterator<Item = &CrewMember> {
        self.crew.iter().filter(|c| c.active)
    }

    pub fn crew_member(&self, id: CrewId) -> Option<&CrewMember> {
        self.crew.iter().find(|c| c.id == id)
    }

    /// Shows on `date` in display order.
    pub fn shows_for_date(&self, date: NaiveDate) -> &[ShowInstance] {
        self.shows.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn show(&self, id: ShowId) -> Option<&ShowInstance> {
        self.shows.values().flatten().find(|s| s.id == id)
    }

    pub fn assignment(&self, key: &AssignmentKey) -> Option<Assignment> {
        self.assignments.get(key).copied()
    }

    pub fn assignments(&self) -> impl Iterator<Item = (&AssignmentKey, &Assignment)> {
        self.assignments.iter()
    }

    pub fn is_working(&self, date: NaiveDate, crew_id: CrewId, show_id: Option<ShowId>) -> bool {
        self.assignment(&AssignmentKey::new(date, show_id, crew_id))
            .is_some_and(|a| a.is_working)
    }

    pub fn track_id(
        &self,
        date: NaiveDate,
        crew_id: CrewId,
        show_id: Option<ShowId>,
    ) -> Option<TrackId> {
        self.assignment(&AssignmentKey::new(date, show_id, crew_id))
            .and_then(|a| a.track_id)
    }

    pub fn shift(&self, date: NaiveDate, crew_id: CrewId) -> Option<&Shift> {
        self.shifts.get(&ShiftKey::new(date, crew_id))
    }

    pub fn day_hours(&self, date: NaiveDate, crew_id: CrewId) -> Option<DayHours> {
        self.day_hours.get(&ShiftKey::new(date, crew_id)).copied()
    }

    /// Whether `date` falls on one of the crew member's weekly days off.
    pub fn is_day_off(&self, date: NaiveDate, crew_id: CrewId) -> bool {
        self.crew_member(crew_id)
            .is_some_and(|c| c.weekly_off.contains(&date.weekday()))
    }

    // --- Optimistic writes ---

    pub(crate) fn put_assignment(&mut self, key: AssignmentKey, assignment: Assignment) {
        self.assignments
            .insert(key, Assignment::new(assignment.is_working, assignment.track_id));
    }

    /// Store a shift; an empty shift removes the cell.
    pub(crate) fn put_shift(&mut self, key: ShiftKey, shift: Shift) {
        if shift.is_empty() {
            self.shifts.remove(&key);
        } else {
            self.shifts.insert(key, shift);
        }
    }

    pub(crate) fn invalidate_day_hours(&mut self, key: &ShiftKey) {
        self.day_hours.remove(key);
    }

    pub(crate) fn put_day_hours(&mut self, key: ShiftKey, hours: Option<DayHours>) {
        match hours {
            Some(hours) => {
                self.day_hours.insert(key, hours);
            }
            None => {
                self.day_hours.remove(&key);
            }
        }
    }

    /// Insert or replace a show, keeping per-date display order.
    pub(crate) fn put_show(&mut self, show: ShowInstance) {
        self.remove_show_entry(show.id);
        if self.range.is_some_and(|r| r.contains(show.date)) {
            let day = self.shows.entry(show.date).or_default();
            day.push(show);
            day.sort_by(|a, b| a.display_cmp(b));
        }
    }

    /// Drop a show and every assignment referencing it.
    pub(crate) fn remove_show(&mut self, id: ShowId) {
        self.remove_show_entry(id);
        self.assignments.retain(|k, _| k.show_id != id);
    }

    fn remove_show_entry(&mut self, id: ShowId) {
        for day in self.shows.values_mut() {
            day.retain(|s| s.id != id);
        }
        self.shows.retain(|_, day| !day.is_empty());
    }
}
