//! Write-behind buffer: writes that are visible locally but not yet confirmed
//! persisted.
//!
//! Edits to the same key collapse (last write wins). A flush works from a
//! snapshot; on success only the entries whose value still equals the
//! snapshot are cleared, so an edit that lands while the request is in
//! flight stays queued for the next flush.

use crate::keys::{AssignmentKey, LocationId, ShiftKey, ShowId, TrackId};
use crate::model::{AssignmentRow, Shift, ShiftRow};
use std::collections::HashMap;

/// Pending assignment write, mirroring the assignment row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyAssignment {
    pub location_id: LocationId,
    pub key: AssignmentKey,
    pub is_working: bool,
    pub track_id: Option<TrackId>,
}

impl DirtyAssignment {
    pub fn to_row(&self) -> AssignmentRow {
        AssignmentRow {
            location_id: self.location_id,
            work_date: self.key.date,
            show_id: self.key.show(),
            crew_id: self.key.crew_id,
            is_working: self.is_working,
            track_id: if self.is_working { self.track_id } else { None },
        }
    }
}

/// What a flush does with one shift cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShiftWrite {
    Upsert(Shift),
    /// All fields empty: the remote record is removed
    Delete,
}

impl ShiftWrite {
    pub fn for_shift(shift: Shift) -> Self {
        if shift.is_empty() {
            ShiftWrite::Delete
        } else {
            ShiftWrite::Upsert(shift)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyShift {
    pub location_id: LocationId,
    pub key: ShiftKey,
    pub write: ShiftWrite,
}

impl DirtyShift {
    /// Upsert row, or `None` when this entry is a delete.
    pub fn to_row(&self) -> Option<ShiftRow> {
        match self.write {
            ShiftWrite::Upsert(ref shift) => Some(ShiftRow {
                location_id: self.location_id,
                work_date: self.key.date,
                crew_id: self.key.crew_id,
                start_time: shift.start,
                end_time: shift.end,
                day_description: shift.day_description.clone(),
            }),
            ShiftWrite::Delete => None,
        }
    }
}

/// The entries one flush sends.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FlushBatch {
    pub assignments: Vec<DirtyAssignment>,
    pub shifts: Vec<DirtyShift>,
}

impl FlushBatch {
    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.shifts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len() + self.shifts.len()
    }

    pub fn assignment_rows(&self) -> Vec<AssignmentRow> {
        self.assignments.iter().map(DirtyAssignment::to_row).collect()
    }

    pub fn shift_rows(&self) -> Vec<ShiftRow> {
        self.shifts.iter().filter_map(DirtyShift::to_row).collect()
    }

    pub fn shift_deletes(&self) -> Vec<(LocationId, ShiftKey)> {
        self.shifts
            .iter()
            .filter(|s| s.write == ShiftWrite::Delete)
            .map(|s| (s.location_id, s.key))
            .collect()
    }

    /// Shift cells written by this batch, deletes included.
    pub fn shift_keys(&self) -> Vec<ShiftKey> {
        self.shifts.iter().map(|s| s.key).collect()
    }
}

#[derive(Debug, Default)]
pub struct WriteBuffer {
    assignments: HashMap<AssignmentKey, DirtyAssignment>,
    shifts: HashMap<ShiftKey, DirtyShift>,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_assignment(&mut self, entry: DirtyAssignment) {
        self.assignments.insert(entry.key, entry);
    }

    pub fn record_shift(&mut self, entry: DirtyShift) {
        self.shifts.insert(entry.key, entry);
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty() && self.shifts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len() + self.shifts.len()
    }

    pub fn assignment(&self, key: &AssignmentKey) -> Option<&DirtyAssignment> {
        self.assignments.get(key)
    }

    pub fn shift(&self, key: &ShiftKey) -> Option<&DirtyShift> {
        self.shifts.get(key)
    }

    /// Copy the current entries, sorted by key so payloads are stable.
    pub fn snapshot(&self) -> FlushBatch {
        let mut assignments: Vec<DirtyAssignment> = self.assignments.values().copied().collect();
        assignments.sort_by_key(|a| a.key);
        let mut shifts: Vec<DirtyShift> = self.shifts.values().cloned().collect();
        shifts.sort_by_key(|s| s.key);
        FlushBatch {
            assignments,
            shifts,
        }
    }

    /// Clear entries confirmed by a successful flush of `batch`.
    ///
    /// Returns the number of entries removed. Entries rewritten with a
    /// different value since the snapshot are kept.
    pub fn settle(&mut self, batch: &FlushBatch) -> usize {
        let mut removed = 0;
        for sent in &batch.assignments {
            if self.assignments.get(&sent.key) == Some(sent) {
                self.assignments.remove(&sent.key);
                removed += 1;
            }
        }
        for sent in &batch.shifts {
            if self.shifts.get(&sent.key) == Some(sent) {
                self.shifts.remove(&sent.key);
                removed += 1;
            }
        }
        removed
    }

    /// Forget every pending write for a deleted show.
    pub fn purge_show(&mut self, show_id: ShowId) -> usize {
        let before = self.assignments.len();
        self.assignments.retain(|k, _| k.show_id != show_id);
        before - self.assignments.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
    }

    fn dirty(show: ShowId, crew: u64, working: bool, track: Option<TrackId>) -> DirtyAssignment {
        DirtyAssignment {
            location_id: 1,
            key: AssignmentKey::new(d(1), Some(show), crew),
            is_working: working,
            track_id: track,
        }
    }

    #[test]
    fn test_edits_to_same_key_collapse() {
        let mut buffer = WriteBuffer::new();
        buffer.record_assignment(dirty(5, 1, true, None));
        buffer.record_assignment(dirty(5, 1, true, Some(2)));
        buffer.record_assignment(dirty(5, 1, true, Some(3)));
        assert_eq!(buffer.len(), 1);
        let batch = buffer.snapshot();
        assert_eq!(batch.assignments, vec![dirty(5, 1, true, Some(3))]);
    }

    #[test]
    fn test_settle_keeps_entries_changed_during_flush() {
        let mut buffer = WriteBuffer::new();
        buffer.record_assignment(dirty(5, 1, true, Some(2)));
        buffer.record_assignment(dirty(5, 2, true, None));
        let batch = buffer.snapshot();

        // Edits made while the flush is in flight.
        buffer.record_assignment(dirty(5, 1, true, Some(9)));
        buffer.record_assignment(dirty(6, 1, false, None));

        assert_eq!(buffer.settle(&batch), 1);
        assert_eq!(buffer.len(), 2);
        assert_eq!(
            buffer.assignment(&AssignmentKey::new(d(1), Some(5), 1)).map(|a| a.track_id),
            Some(Some(9))
        );
        assert!(buffer.assignment(&AssignmentKey::new(d(1), Some(5), 2)).is_none());
    }

    #[test]
    fn test_rows_enforce_track_invariant() {
        let entry = DirtyAssignment {
            track_id: Some(4),
            ..dirty(5, 1, false, None)
        };
        assert_eq!(entry.to_row().track_id, None);
        assert_eq!(entry.to_row().show_id, Some(5));

        let none = DirtyAssignment {
            key: AssignmentKey::new(d(1), None, 1),
            ..entry
        };
        assert_eq!(none.to_row().show_id, None);
    }

    #[test]
    fn test_shift_batch_splits_upserts_and_deletes() {
        let mut buffer = WriteBuffer::new();
        let nine = NaiveTime::from_hms_opt(9, 0, 0);
        buffer.record_shift(DirtyShift {
            location_id: 1,
            key: ShiftKey::new(d(1), 1),
            write: ShiftWrite::for_shift(Shift::new(nine, None, None)),
        });
        buffer.record_shift(DirtyShift {
            location_id: 1,
            key: ShiftKey::new(d(1), 2),
            write: ShiftWrite::for_shift(Shift::default()),
        });
        let batch = buffer.snapshot();
        assert_eq!(batch.shift_rows().len(), 1);
        assert_eq!(batch.shift_rows()[0].start_time, nine);
        assert_eq!(batch.shift_deletes(), vec![(1, ShiftKey::new(d(1), 2))]);
        assert_eq!(batch.shift_keys().len(), 2);

        assert_eq!(buffer.settle(&batch), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_purge_show() {
        let mut buffer = WriteBuffer::new();
        buffer.record_assignment(dirty(5, 1, true, None));
        buffer.record_assignment(dirty(5, 2, true, None));
        buffer.record_assignment(dirty(6, 1, true, None));
        assert_eq!(buffer.purge_show(5), 2);
        assert_eq!(buffer.len(), 1);
    }
}
