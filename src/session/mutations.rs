//! Mutation entry points.
//!
//! Every edit applies to the cache and the write buffer under one lock, then
//! (re)arms the debounce timer. Nothing here waits on the network except the
//! bulk copy, which reads the previous window, and show management, which
//! writes through directly.

use super::{RosterSession, RosterState, SessionError};
use crate::gateway::{AssignmentFilter, GatewayError};
use crate::keys::{AssignmentKey, CrewId, ShiftKey, ShowId, TrackId};
use crate::model::{
    decode_rows, Assignment, AssignmentRecord, FromRow, Shift, ShiftRecord, ShowDraft,
    ShowInstance,
};
use crate::sync::{DirtyAssignment, DirtyShift, ShiftWrite};
use chrono::{Days, NaiveDate, NaiveTime};
use std::collections::HashMap;
use tracing::{debug, info};

/// What `copy_previous_week` replayed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyReport {
    pub assignments: usize,
    pub shifts: usize,
    /// Assignments whose show has no counterpart in the current window
    pub skipped: usize,
}

fn ensure_writable(state: &RosterState) -> Result<(), SessionError> {
    if state.paused {
        return Err(SessionError::Paused(state.error.clone().unwrap_or_default()));
    }
    Ok(())
}

fn ensure_crew(crew_id: CrewId) -> Result<(), SessionError> {
    if crew_id == 0 {
        return Err(SessionError::InvalidInput("crew id must be positive".to_string()));
    }
    Ok(())
}

impl RosterSession {
    /// Set whether a crew member works a show (or the date, with no show).
    ///
    /// Turning off clears the track. Turning on keeps the track already
    /// known for the cell, if any.
    pub async fn set_working_for(
        &self,
        date: NaiveDate,
        crew_id: CrewId,
        show_id: Option<ShowId>,
        working: bool,
    ) -> Result<Assignment, SessionError> {
        ensure_crew(crew_id)?;
        let mut state = self.inner.state.write().await;
        ensure_writable(&state)?;
        let assignment =
            self.apply_working(&mut state, AssignmentKey::new(date, show_id, crew_id), working);
        self.after_edit(&mut state);
        Ok(assignment)
    }

    /// Set the track of a working cell. Returns `false`, changing nothing,
    /// when the cell is not working.
    pub async fn set_track_for(
        &self,
        date: NaiveDate,
        crew_id: CrewId,
        show_id: Option<ShowId>,
        track_id: Option<TrackId>,
    ) -> Result<bool, SessionError> {
        ensure_crew(crew_id)?;
        let mut state = self.inner.state.write().await;
        ensure_writable(&state)?;
        let key = AssignmentKey::new(date, show_id, crew_id);
        if !self.apply_track(&mut state, key, track_id) {
            return Ok(false);
        }
        self.after_edit(&mut state);
        Ok(true)
    }

    /// Turn a cell on and set its track as one edit.
    pub async fn assign_crew_to_track(
        &self,
        date: NaiveDate,
        crew_id: CrewId,
        show_id: Option<ShowId>,
        track_id: TrackId,
    ) -> Result<Assignment, SessionError> {
        ensure_crew(crew_id)?;
        let mut state = self.inner.state.write().await;
        ensure_writable(&state)?;
        let key = AssignmentKey::new(date, show_id, crew_id);
        self.apply_working(&mut state, key, true);
        self.apply_track(&mut state, key, Some(track_id));
        self.after_edit(&mut state);
        Ok(state.cache.assignment(&key).unwrap_or_default())
    }

    /// Set a crew member's shift for a date. A shift with every field empty
    /// is deleted remotely instead of written with nulls.
    pub async fn set_shift_for(
        &self,
        date: NaiveDate,
        crew_id: CrewId,
        start: Option<NaiveTime>,
        end: Option<NaiveTime>,
        day_description: Option<String>,
    ) -> Result<Shift, SessionError> {
        ensure_crew(crew_id)?;
        let mut state = self.inner.state.write().await;
        ensure_writable(&state)?;
        let shift = Shift::new(start, end, day_description);
        self.apply_shift(&mut state, ShiftKey::new(date, crew_id), shift.clone());
        self.after_edit(&mut state);
        Ok(shift)
    }

    /// Turn every crew member off for every show on `date`, or for the
    /// no-show cell when the date has no shows. Returns the cells written.
    pub async fn clear_day(&self, date: NaiveDate) -> Result<usize, SessionError> {
        let mut state = self.inner.state.write().await;
        ensure_writable(&state)?;
        let crew: Vec<CrewId> = state.cache.crew().iter().map(|c| c.id).collect();
        let mut shows: Vec<Option<ShowId>> = state
            .cache
            .shows_for_date(date)
            .iter()
            .map(|s| Some(s.id))
            .collect();
        if shows.is_empty() {
            shows.push(None);
        }
        let mut written = 0;
        for crew_id in &crew {
            for show_id in &shows {
                self.apply_working(&mut state, AssignmentKey::new(date, *show_id, *crew_id), false);
                written += 1;
            }
        }
        if written > 0 {
            self.after_edit(&mut state);
        }
        info!("Cleared {} cell(s) on {}", written, date);
        Ok(written)
    }

    /// Replay the previous window's assignments and shifts onto the current
    /// one through the ordinary edit path.
    ///
    /// The previous window is read straight from the gateway. Each previous
    /// show maps to the show on the target date with the same time of day,
    /// else to the show at the same position, else to the first one left;
    /// assignments whose show has no counterpart are skipped.
    pub async fn copy_previous_week(&self) -> Result<CopyReport, SessionError> {
        let window = {
            let state = self.inner.state.read().await;
            ensure_writable(&state)?;
            state.window
        };
        let previous = window
            .previous()
            .ok_or_else(|| SessionError::InvalidInput("no window before the current one".to_string()))?;
        let range = previous.range();
        let location = self.location_id();
        let gateway = self.inner.gateway.as_ref();

        let (shows, assignments, shifts) = futures::try_join!(
            gateway.fetch_shows(location, range),
            gateway.fetch_assignments(location, range),
            gateway.fetch_shifts(location, range),
        )?;
        let shows: Vec<ShowInstance> = decode_rows(&shows);
        let assignments: Vec<AssignmentRecord> = decode_rows(&assignments);
        let shifts: Vec<ShiftRecord> = decode_rows(&shifts);

        let offset = Days::new(u64::from(window.range_length()));
        let mut state = self.inner.state.write().await;
        ensure_writable(&state)?;
        if state.window != window {
            return Err(SessionError::InvalidInput(
                "window moved while copying".to_string(),
            ));
        }

        let show_map = map_shows(&state, &shows, offset);
        let mut report = CopyReport::default();
        for record in assignments {
            let Some(date) = record.key.date.checked_add_days(offset) else {
                report.skipped += 1;
                continue;
            };
            let show_id = match record.key.show() {
                None => None,
                Some(id) => match show_map.get(&id) {
                    Some(target) => Some(*target),
                    None => {
                        report.skipped += 1;
                        continue;
                    }
                },
            };
            let key = AssignmentKey::new(date, show_id, record.key.crew_id);
            self.record_assignment(&mut state, key, record.assignment);
            report.assignments += 1;
        }
        for record in shifts {
            let Some(date) = record.key.date.checked_add_days(offset) else {
                continue;
            };
            self.apply_shift(&mut state, ShiftKey::new(date, record.key.crew_id), record.shift);
            report.shifts += 1;
        }
        if report.assignments + report.shifts > 0 {
            self.after_edit(&mut state);
        }
        info!(
            "Copied {} assignment(s) and {} shift(s) from {}..{} ({} skipped)",
            report.assignments, report.shifts, range.start, range.end, report.skipped
        );
        Ok(report)
    }

    // --- Show management ---

    pub async fn create_show(
        &self,
        date: NaiveDate,
        time: Option<NaiveTime>,
        sort_order: Option<i32>,
    ) -> Result<ShowInstance, SessionError> {
        self.ensure_not_paused().await?;
        let draft = ShowDraft {
            location_id: self.location_id(),
            show_date: date,
            show_time: time,
            sort_order,
        };
        let row = self.inner.gateway.create_show(&draft).await?;
        let show = decode_show(&row)?;
        let mut state = self.inner.state.write().await;
        state.cache.put_show(show.clone());
        info!("Created show {} on {}", show.id, show.date);
        Ok(show)
    }

    /// Change a show's time and sort order. The date stays fixed.
    pub async fn update_show(
        &self,
        id: ShowId,
        time: Option<NaiveTime>,
        sort_order: Option<i32>,
    ) -> Result<ShowInstance, SessionError> {
        let date = {
            let state = self.inner.state.read().await;
            ensure_writable(&state)?;
            state
                .cache
                .show(id)
                .map(|s| s.date)
                .ok_or_else(|| SessionError::InvalidInput(format!("unknown show {}", id)))?
        };
        let draft = ShowDraft {
            location_id: self.location_id(),
            show_date: date,
            show_time: time,
            sort_order,
        };
        let row = self.inner.gateway.update_show(id, &draft).await?;
        let show = decode_show(&row)?;
        let mut state = self.inner.state.write().await;
        state.cache.put_show(show.clone());
        Ok(show)
    }

    /// Delete a show and, first, every assignment referencing it.
    ///
    /// Runs between flushes so no in-flight batch can recreate assignments
    /// for the deleted show; pending edits for it are discarded.
    pub async fn delete_show(&self, id: ShowId) -> Result<(), SessionError> {
        self.ensure_not_paused().await?;
        let _gate = self.inner.flush_gate.lock().await;
        // A flush that held the gate may have failed meanwhile.
        self.ensure_not_paused().await?;
        let location = self.location_id();
        self.inner
            .gateway
            .delete_assignments(location, AssignmentFilter::Show(id))
            .await?;
        self.inner.gateway.delete_show(location, id).await?;

        let mut state = self.inner.state.write().await;
        state.cache.remove_show(id);
        let purged = state.buffer.purge_show(id);
        self.publish(&state);
        info!("Deleted show {} ({} pending edit(s) discarded)", id, purged);
        Ok(())
    }

    async fn ensure_not_paused(&self) -> Result<(), SessionError> {
        let state = self.inner.state.read().await;
        ensure_writable(&state)
    }

    // --- Phase one: cache + buffer ---

    fn apply_working(&self, state: &mut RosterState, key: AssignmentKey, working: bool) -> Assignment {
        let assignment = if working {
            Assignment::working(state.cache.assignment(&key).and_then(|a| a.track_id))
        } else {
            Assignment::off()
        };
        self.record_assignment(state, key, assignment);
        assignment
    }

    fn apply_track(&self, state: &mut RosterState, key: AssignmentKey, track_id: Option<TrackId>) -> bool {
        let working = state.cache.assignment(&key).is_some_and(|a| a.is_working);
        if !working {
            debug!("Ignoring track for {}: cell is not working", key);
            return false;
        }
        self.record_assignment(state, key, Assignment::working(track_id));
        true
    }

    fn record_assignment(&self, state: &mut RosterState, key: AssignmentKey, assignment: Assignment) {
        let assignment = Assignment::new(assignment.is_working, assignment.track_id);
        state.cache.put_assignment(key, assignment);
        state.buffer.record_assignment(DirtyAssignment {
            location_id: self.location_id(),
            key,
            is_working: assignment.is_working,
            track_id: assignment.track_id,
        });
        state.coverage_queue.insert(key.shift_key());
    }

    pub(crate) fn apply_shift(&self, state: &mut RosterState, key: ShiftKey, shift: Shift) {
        state.cache.put_shift(key, shift.clone());
        state.cache.invalidate_day_hours(&key);
        state.buffer.record_shift(DirtyShift {
            location_id: self.location_id(),
            key,
            write: ShiftWrite::for_shift(shift),
        });
    }

    fn after_edit(&self, state: &mut RosterState) {
        self.schedule_flush(state);
        self.publish(state);
    }
}

fn decode_show(row: &serde_json::Value) -> Result<ShowInstance, SessionError> {
    ShowInstance::from_row(row)
        .ok_or_else(|| GatewayError::Decode("show row missing required fields".to_string()).into())
}

/// Map each previous-window show id onto a show of the current window.
fn map_shows(state: &RosterState, previous: &[ShowInstance], offset: Days) -> HashMap<ShowId, ShowId> {
    let mut by_date: HashMap<NaiveDate, Vec<&ShowInstance>> = HashMap::new();
    for show in previous {
        by_date.entry(show.date).or_default().push(show);
    }
    let mut map = HashMap::new();
    for (date, mut shows) in by_date {
        let Some(target_date) = date.checked_add_days(offset) else {
            continue;
        };
        shows.sort_by(|a, b| a.display_cmp(b));
        let targets = state.cache.shows_for_date(target_date);
        let mut taken = vec![false; targets.len()];
        let mut unmatched = Vec::new();
        for (position, show) in shows.iter().enumerate() {
            let same_time = targets
                .iter()
                .enumerate()
                .find(|(i, t)| !taken[*i] && show.time.is_some() && t.time == show.time);
            match same_time {
                Some((i, target)) => {
                    taken[i] = true;
                    map.insert(show.id, target.id);
                }
                None => unmatched.push((position, show.id)),
            }
        }
        for (position, id) in unmatched {
            let slot = if position < targets.len() && !taken[position] {
                Some(position)
            } else {
                taken.iter().position(|t| !t)
            };
            if let Some(i) = slot {
                taken[i] = true;
                map.insert(id, targets[i].id);
            }
        }
    }
    map
}
