//! In-memory roster store implementing [`RosterGateway`].
//!
//! Rows are kept typed and served back as JSON, so reads go through the same
//! decoding path as the REST client. Every write call is recorded, and
//! failures can be injected per concern.

use super::{AssignmentFilter, CrewColumns, GatewayError, RosterGateway};
use crate::keys::{AssignmentKey, CrewId, LocationId, ShiftKey, ShowId};
use crate::model::{
    Assignment, AssignmentRow, CrewMember, DayHours, Shift, ShiftRow, ShowDraft, ShowInstance,
};
use crate::window::DateRange;
use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A write the gateway received, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteCall {
    UpsertAssignments(Vec<AssignmentRow>),
    DeleteAssignments(AssignmentFilter),
    UpsertShifts(Vec<ShiftRow>),
    DeleteShift(ShiftKey),
    CreateShow(ShowDraft),
    UpdateShow(ShowId, ShowDraft),
    DeleteShow(ShowId),
}

/// Read resources that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Crew,
    Shows,
    Assignments,
    Shifts,
    DayHours,
}

#[derive(Default)]
struct Tables {
    crew: Vec<CrewMember>,
    shows: BTreeMap<ShowId, ShowInstance>,
    assignments: BTreeMap<AssignmentKey, Assignment>,
    shifts: BTreeMap<ShiftKey, Shift>,
    day_hours: BTreeMap<ShiftKey, DayHours>,
    next_show_id: ShowId,
}

pub struct MemoryGateway {
    location_id: LocationId,
    tables: RwLock<Tables>,
    calls: RwLock<Vec<WriteCall>>,
    failing_reads: RwLock<HashSet<Resource>>,
    fail_writes: AtomicBool,
    write_latency_ms: AtomicU64,
    lead_column: AtomicBool,
    day_hours_view: AtomicBool,
}

impl MemoryGateway {
    pub fn new(location_id: LocationId) -> Self {
        Self {
            location_id,
            tables: RwLock::new(Tables {
                next_show_id: 1000,
                ..Default::default()
            }),
            calls: RwLock::new(Vec::new()),
            failing_reads: RwLock::new(HashSet::new()),
            fail_writes: AtomicBool::new(false),
            write_latency_ms: AtomicU64::new(0),
            lead_column: AtomicBool::new(true),
            day_hours_view: AtomicBool::new(true),
        }
    }

    // --- Seeding ---

    pub async fn add_crew(&self, crew: CrewMember) {
        self.tables.write().await.crew.push(crew);
    }

    pub async fn add_show(&self, show: ShowInstance) {
        self.tables.write().await.shows.insert(show.id, show);
    }

    pub async fn put_assignment(&self, key: AssignmentKey, assignment: Assignment) {
        self.tables.write().await.assignments.insert(key, assignment);
    }

    pub async fn put_shift(&self, key: ShiftKey, shift: Shift) {
        self.tables.write().await.shifts.insert(key, shift);
    }

    pub async fn put_day_hours(&self, key: ShiftKey, hours: DayHours) {
        self.tables.write().await.day_hours.insert(key, hours);
    }

    // --- Failure injection ---

    /// Make every write fail with an HTTP 503 until cleared.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Delay every write call, keeping flushes in flight for a while.
    pub fn set_write_latency(&self, latency: Duration) {
        self.write_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub async fn set_read_failure(&self, resource: Resource, fail: bool) {
        let mut failing = self.failing_reads.write().await;
        if fail {
            failing.insert(resource);
        } else {
            failing.remove(&resource);
        }
    }

    /// Simulate a deployment whose crew table has no lead-flag column.
    pub fn set_lead_column(&self, present: bool) {
        self.lead_column.store(present, Ordering::SeqCst);
    }

    /// Simulate a deployment without the day-hours view.
    pub fn set_day_hours_view(&self, present: bool) {
        self.day_hours_view.store(present, Ordering::SeqCst);
    }

    // --- Inspection ---

    pub async fn calls(&self) -> Vec<WriteCall> {
        self.calls.read().await.clone()
    }

    pub async fn clear_calls(&self) {
        self.calls.write().await.clear();
    }

    /// Only the assignment upsert batches, in order.
    pub async fn assignment_batches(&self) -> Vec<Vec<AssignmentRow>> {
        self.calls
            .read()
            .await
            .iter()
            .filter_map(|call| match call {
                WriteCall::UpsertAssignments(rows) => Some(rows.clone()),
                _ => None,
            })
            .collect()
    }

    pub async fn stored_assignment(&self, key: &AssignmentKey) -> Option<Assignment> {
        self.tables.read().await.assignments.get(key).copied()
    }

    pub async fn stored_shift(&self, key: &ShiftKey) -> Option<Shift> {
        self.tables.read().await.shifts.get(key).cloned()
    }

    pub async fn stored_show(&self, id: ShowId) -> Option<ShowInstance> {
        self.tables.read().await.shows.get(&id).cloned()
    }

    async fn check_read(&self, resource: Resource) -> Result<(), GatewayError> {
        if self.failing_reads.read().await.contains(&resource) {
            return Err(GatewayError::Http {
                status: 500,
                message: format!("{:?} read failed", resource),
            });
        }
        Ok(())
    }

    async fn record(&self, call: WriteCall) -> Result<(), GatewayError> {
        let latency = self.write_latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        self.calls.write().await.push(call);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(GatewayError::Http {
                status: 503,
                message: "storage unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn check_location(&self, location: LocationId) -> bool {
        location == self.location_id
    }
}

fn show_row(show: &ShowInstance) -> Value {
    json!({
        "id": show.id,
        "show_date": show.date.to_string(),
        "show_time": show.time.map(|t| t.format("%H:%M:%S").to_string()),
        "sort_order": show.sort_order,
        "color": show.color,
    })
}

fn show_from_draft(id: ShowId, draft: &ShowDraft) -> ShowInstance {
    ShowInstance {
        id,
        date: draft.show_date,
        time: draft.show_time,
        sort_order: draft.sort_order,
        color: None,
    }
}

fn in_range(range: DateRange, date: NaiveDate) -> bool {
    range.contains(date)
}

#[async_trait]
impl RosterGateway for MemoryGateway {
    async fn fetch_crew(
        &self,
        location: LocationId,
        columns: CrewColumns,
    ) -> Result<Vec<Value>, GatewayError> {
        self.check_read(Resource::Crew).await?;
        if columns == CrewColumns::Extended && !self.lead_column.load(Ordering::SeqCst) {
            return Err(GatewayError::MissingColumn(
                "column crew_members.is_lead does not exist".to_string(),
            ));
        }
        if !self.check_location(location) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .crew
            .iter()
            .map(|c| {
                let mut row = json!({
                    "id": c.id,
                    "name": c.name,
                    "department": c.department,
                    "active": c.active,
                    "weekly_off": c.weekly_off.iter().map(|d| d.to_string()).collect::<Vec<_>>(),
                });
                if columns == CrewColumns::Extended {
                    row["is_lead"] = json!(c.is_lead);
                }
                row
            })
            .collect())
    }

    async fn fetch_shows(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError> {
        self.check_read(Resource::Shows).await?;
        if !self.check_location(location) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .shows
            .values()
            .filter(|s| in_range(range, s.date))
            .map(show_row)
            .collect())
    }

    async fn fetch_assignments(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError> {
        self.check_read(Resource::Assignments).await?;
        if !self.check_location(location) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .assignments
            .iter()
            .filter(|(k, _)| in_range(range, k.date))
            .map(|(k, a)| {
                json!({
                    "work_date": k.date.to_string(),
                    "show_id": k.show(),
                    "crew_id": k.crew_id,
                    "is_working": a.is_working,
                    "track_id": a.track_id,
                })
            })
            .collect())
    }

    async fn fetch_shifts(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError> {
        self.check_read(Resource::Shifts).await?;
        if !self.check_location(location) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .shifts
            .iter()
            .filter(|(k, _)| in_range(range, k.date))
            .map(|(k, s)| {
                json!({
                    "work_date": k.date.to_string(),
                    "crew_id": k.crew_id,
                    "start_time": s.start.map(|t| t.format("%H:%M:%S").to_string()),
                    "end_time": s.end.map(|t| t.format("%H:%M:%S").to_string()),
                    "day_description": s.day_description,
                })
            })
            .collect())
    }

    async fn fetch_day_hours(
        &self,
        location: LocationId,
        range: DateRange,
        crew: Option<CrewId>,
    ) -> Result<Vec<Value>, GatewayError> {
        if !self.day_hours_view.load(Ordering::SeqCst) {
            return Err(GatewayError::NotFound("crew_day_hours".to_string()));
        }
        self.check_read(Resource::DayHours).await?;
        if !self.check_location(location) {
            return Ok(Vec::new());
        }
        let tables = self.tables.read().await;
        Ok(tables
            .day_hours
            .iter()
            .filter(|(k, _)| in_range(range, k.date))
            .filter(|(k, _)| crew.map_or(true, |c| c == k.crew_id))
            .map(|(k, h)| {
                json!({
                    "work_date": k.date.to_string(),
                    "crew_id": k.crew_id,
                    "total_hours": h.total,
                    "lead_hours": h.lead,
                    "regular_hours": h.regular,
                    "overtime_hours": h.overtime,
                })
            })
            .collect())
    }

    async fn upsert_assignments(&self, rows: &[AssignmentRow]) -> Result<(), GatewayError> {
        self.record(WriteCall::UpsertAssignments(rows.to_vec()))
            .await?;
        let mut tables = self.tables.write().await;
        for row in rows {
            let key = AssignmentKey::new(row.work_date, row.show_id, row.crew_id);
            tables
                .assignments
                .insert(key, Assignment::new(row.is_working, row.track_id));
        }
        Ok(())
    }

    async fn delete_assignments(
        &self,
        location: LocationId,
        filter: AssignmentFilter,
    ) -> Result<(), GatewayError> {
        self.record(WriteCall::DeleteAssignments(filter)).await?;
        if !self.check_location(location) {
            return Ok(());
        }
        let mut tables = self.tables.write().await;
        tables.assignments.retain(|k, _| match filter {
            AssignmentFilter::Show(show_id) => k.show_id != show_id,
            AssignmentFilter::Range(range) => !range.contains(k.date),
        });
        Ok(())
    }

    async fn upsert_shifts(&self, rows: &[ShiftRow]) -> Result<(), GatewayError> {
        self.record(WriteCall::UpsertShifts(rows.to_vec())).await?;
        let mut tables = self.tables.write().await;
        for row in rows {
            tables.shifts.insert(
                ShiftKey::new(row.work_date, row.crew_id),
                Shift::new(row.start_time, row.end_time, row.day_description.clone()),
            );
        }
        Ok(())
    }

    async fn delete_shift(&self, location: LocationId, key: ShiftKey) -> Result<(), GatewayError> {
        self.record(WriteCall::DeleteShift(key)).await?;
        if self.check_location(location) {
            self.tables.write().await.shifts.remove(&key);
        }
        Ok(())
    }

    async fn create_show(&self, draft: &ShowDraft) -> Result<Value, GatewayError> {
        self.record(WriteCall::CreateShow(draft.clone())).await?;
        let mut tables = self.tables.write().await;
        let id = tables.next_show_id;
        tables.next_show_id += 1;
        let show = show_from_draft(id, draft);
        let row = show_row(&show);
        tables.shows.insert(id, show);
        Ok(row)
    }

    async fn update_show(&self, id: ShowId, draft: &ShowDraft) -> Result<Value, GatewayError> {
        self.record(WriteCall::UpdateShow(id, draft.clone())).await?;
        let mut tables = self.tables.write().await;
        let Some(existing) = tables.shows.get_mut(&id) else {
            return Err(GatewayError::Http {
                status: 404,
                message: format!("show {} not found", id),
            });
        };
        let color = existing.color.clone();
        *existing = ShowInstance {
            color,
            ..show_from_draft(id, draft)
        };
        Ok(show_row(existing))
    }

    async fn delete_show(&self, location: LocationId, id: ShowId) -> Result<(), GatewayError> {
        self.record(WriteCall::DeleteShow(id)).await?;
        let mut tables = self.tables.write().await;
        // Mirrors a foreign key without ON DELETE CASCADE.
        if tables.assignments.keys().any(|k| k.show_id == id) {
            return Err(GatewayError::Http {
                status: 409,
                message: format!("show {} still has assignments", id),
            });
        }
        if self.check_location(location) {
            tables.shows.remove(&id);
        }
        Ok(())
    }
}
