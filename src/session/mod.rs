//! Roster session: one editable window over one location.
//!
//! A session owns the read cache, the write-behind buffer and the debounce
//! timer. Mutations apply to the cache and buffer synchronously (phase one);
//! the timer later flushes the buffer through the gateway (phase two).
//!
//! `RosterSession` is a cheap handle. Clone it into tasks and UI callbacks.

mod flush;
mod mutations;

pub use flush::FlushOutcome;
pub use mutations::CopyReport;

use crate::cache::{fetch_slices, RosterCache, SliceErrors};
use crate::config::SessionConfig;
use crate::gateway::{GatewayError, RosterGateway};
use crate::keys::{CrewId, LocationId, ShiftKey, ShowId, TrackId};
use crate::model::{Assignment, CrewMember, DayHours, Shift, ShowInstance};
use crate::sync::{DebounceTimer, SessionStatus, ShiftWrite, WriteBuffer};
use crate::window::{DateRange, DateWindow};
use chrono::NaiveDate;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Saving is paused after a failed flush; edits are refused until retry
    #[error("saving is paused: {0}")]
    Paused(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Mutable session state, guarded by one lock.
pub(crate) struct RosterState {
    pub(crate) window: DateWindow,
    pub(crate) cache: RosterCache,
    pub(crate) buffer: WriteBuffer,
    /// Cells whose assignments changed since the last coverage pass
    pub(crate) coverage_queue: BTreeSet<ShiftKey>,
    pub(crate) timer: DebounceTimer,
    pub(crate) saving: bool,
    pub(crate) paused: bool,
    pub(crate) error: Option<String>,
    pub(crate) saved_pulse: bool,
    pub(crate) pulse_generation: u64,
}

impl RosterState {
    fn status(&self) -> SessionStatus {
        SessionStatus {
            is_saving: self.saving,
            saved_pulse: self.saved_pulse,
            save_paused: self.paused,
            save_error: self.error.clone(),
            pending_writes: self.buffer.len(),
            flush_scheduled: self.timer.is_armed(),
        }
    }

    /// Put pending writes back over freshly loaded rows inside `range`.
    fn overlay_pending(&mut self, range: DateRange) {
        let batch = self.buffer.snapshot();
        for entry in batch.assignments {
            if range.contains(entry.key.date) {
                self.cache
                    .put_assignment(entry.key, Assignment::new(entry.is_working, entry.track_id));
            }
        }
        for entry in batch.shifts {
            if range.contains(entry.key.date) {
                let shift = match entry.write {
                    ShiftWrite::Upsert(shift) => shift,
                    ShiftWrite::Delete => Shift::default(),
                };
                self.cache.put_shift(entry.key, shift);
            }
        }
    }
}

pub(crate) struct SessionInner {
    pub(crate) id: Uuid,
    pub(crate) config: SessionConfig,
    pub(crate) gateway: Arc<dyn RosterGateway>,
    pub(crate) state: RwLock<RosterState>,
    /// Serialises flushes: flush N+1 starts only after flush N settled
    pub(crate) flush_gate: Mutex<()>,
    status_tx: watch::Sender<SessionStatus>,
    load_generation: AtomicU64,
}

#[derive(Clone)]
pub struct RosterSession {
    pub(crate) inner: Arc<SessionInner>,
}

impl RosterSession {
    /// Create a session with an empty cache. Call [`RosterSession::refresh`]
    /// or use [`RosterSession::open`] to load the window.
    pub fn new(config: SessionConfig, gateway: Arc<dyn RosterGateway>, start: NaiveDate) -> Self {
        let window = DateWindow::new(start, config.range_length);
        let state = RosterState {
            window,
            cache: RosterCache::new(),
            buffer: WriteBuffer::new(),
            coverage_queue: BTreeSet::new(),
            timer: DebounceTimer::new(config.debounce()),
            saving: false,
            paused: false,
            error: None,
            saved_pulse: false,
            pulse_generation: 0,
        };
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            inner: Arc::new(SessionInner {
                id: Uuid::new_v4(),
                config,
                gateway,
                state: RwLock::new(state),
                flush_gate: Mutex::new(()),
                status_tx,
                load_generation: AtomicU64::new(0),
            }),
        }
    }

    /// Create a session and load its first window.
    pub async fn open(
        config: SessionConfig,
        gateway: Arc<dyn RosterGateway>,
        start: NaiveDate,
    ) -> Self {
        let session = Self::new(config, gateway, start);
        info!(
            "Opening roster session {} for location {} at {}",
            session.inner.id,
            session.location_id(),
            start
        );
        session.load_window(false).await;
        session
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn location_id(&self) -> LocationId {
        self.inner.config.location_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    // --- Window ---

    pub async fn window(&self) -> DateWindow {
        self.inner.state.read().await.window
    }

    pub async fn dates(&self) -> Vec<NaiveDate> {
        self.inner.state.read().await.window.dates()
    }

    /// Move the window by `delta` whole windows and reload it.
    ///
    /// Pending writes are untouched: they carry absolute dates and flush
    /// independently of which window is visible. Returns false for a zero
    /// delta or a move off the calendar.
    pub async fn shift_week(&self, delta: i64) -> bool {
        let moved = {
            let mut state = self.inner.state.write().await;
            state.window.shift(delta)
        };
        if moved {
            self.load_window(false).await;
        }
        moved
    }

    /// Reload every slice of the current window, bypassing the cache.
    pub async fn refresh(&self) -> SliceErrors {
        self.load_window(true).await
    }

    /// Load the current window unless it is already cached.
    ///
    /// A load that finishes after a newer load started, or after the window
    /// moved, is dropped.
    pub async fn load_window(&self, bypass_cache: bool) -> SliceErrors {
        let range = {
            let state = self.inner.state.read().await;
            let range = state.window.range();
            if !bypass_cache && state.cache.range() == Some(range) {
                return state.cache.errors().clone();
            }
            range
        };

        let generation = self.inner.load_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let slices = fetch_slices(self.inner.gateway.as_ref(), self.location_id(), range).await;

        let mut state = self.inner.state.write().await;
        if self.inner.load_generation.load(Ordering::SeqCst) != generation
            || state.window.range() != range
        {
            debug!(
                "Dropping stale load for {}..{} (generation {})",
                range.start, range.end, generation
            );
            return state.cache.errors().clone();
        }
        // Cells leaving the window are judged against the shows they were
        // edited under before those shows are dropped.
        self.run_coverage(&mut state, |date| !range.contains(date));
        state.cache.install(range, slices);
        state.overlay_pending(range);
        self.publish(&state);
        state.cache.errors().clone()
    }

    // --- Projections ---

    /// Run `f` against the cache under a read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&RosterCache) -> R) -> R {
        let state = self.inner.state.read().await;
        f(&state.cache)
    }

    pub async fn is_working(&self, date: NaiveDate, crew_id: CrewId, show_id: Option<ShowId>) -> bool {
        self.read(|c| c.is_working(date, crew_id, show_id)).await
    }

    pub async fn track_id(
        &self,
        date: NaiveDate,
        crew_id: CrewId,
        show_id: Option<ShowId>,
    ) -> Option<TrackId> {
        self.read(|c| c.track_id(date, crew_id, show_id)).await
    }

    pub async fn shift(&self, date: NaiveDate, crew_id: CrewId) -> Option<Shift> {
        self.read(|c| c.shift(date, crew_id).cloned()).await
    }

    pub async fn day_hours(&self, date: NaiveDate, crew_id: CrewId) -> Option<DayHours> {
        self.read(|c| c.day_hours(date, crew_id)).await
    }

    pub async fn shows_for_date(&self, date: NaiveDate) -> Vec<ShowInstance> {
        self.read(|c| c.shows_for_date(date).to_vec()).await
    }

    pub async fn crew(&self) -> Vec<CrewMember> {
        self.read(|c| c.active_crew().cloned().collect()).await
    }

    pub async fn is_day_off(&self, date: NaiveDate, crew_id: CrewId) -> bool {
        self.read(|c| c.is_day_off(date, crew_id)).await
    }

    pub async fn slice_errors(&self) -> SliceErrors {
        self.read(|c| c.errors().clone()).await
    }

    // --- Status ---

    pub fn status(&self) -> SessionStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status_tx.subscribe()
    }

    /// Wait until no flush is scheduled or in flight.
    pub async fn wait_until_settled(&self) -> SessionStatus {
        let mut rx = self.subscribe_status();
        loop {
            {
                let status = rx.borrow_and_update();
                if status.is_settled() {
                    return status.clone();
                }
            }
            if rx.changed().await.is_err() {
                return self.status();
            }
        }
    }

    /// Flush what is pending and stop the timer.
    ///
    /// Coverage labels applied by a flush are written by the next one, so a
    /// few rounds may be needed. A paused session keeps its buffer.
    pub async fn close(&self) -> SessionStatus {
        for _ in 0..3 {
            let pending = {
                let state = self.inner.state.read().await;
                !state.paused && !state.buffer.is_empty()
            };
            if !pending {
                break;
            }
            if self.flush_now().await.is_err() {
                break;
            }
        }
        let mut state = self.inner.state.write().await;
        state.timer.cancel();
        self.publish(&state);
        info!(
            "Closed roster session {} ({} pending writes)",
            self.inner.id,
            state.buffer.len()
        );
        state.status()
    }

    pub(crate) fn publish(&self, state: &RosterState) {
        self.inner.status_tx.send_replace(state.status());
    }

    /// (Re)arm the debounce timer so the buffer flushes after the delay.
    pub(crate) fn schedule_flush(&self, state: &mut RosterState) {
        let session = self.clone();
        state.timer.arm(move |generation| async move {
            session.fire(generation).await;
        });
    }
}
