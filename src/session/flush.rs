use super::{RosterSession, RosterState};
use crate::cache::fetch_day_hours;
use crate::gateway::GatewayError;
use crate::keys::ShiftKey;
use crate::sync::{derived, FlushBatch};
use crate::window::DateRange;
use chrono::NaiveDate;
use futures::future::try_join_all;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending, or a newer timer superseded this one
    Idle,
    /// Saving is paused; nothing was sent
    Paused,
    Flushed { assignments: usize, shifts: usize },
}

impl RosterSession {
    /// Flush the buffer now, cancelling the pending timer.
    pub async fn flush_now(&self) -> Result<FlushOutcome, GatewayError> {
        self.flush(None).await
    }

    /// Clear the paused state and immediately flush what remains.
    pub async fn retry_saving(&self) -> Result<FlushOutcome, GatewayError> {
        {
            let mut state = self.inner.state.write().await;
            if state.paused {
                info!("Retrying save after: {}", state.error.as_deref().unwrap_or(""));
            }
            state.paused = false;
            state.error = None;
            self.publish(&state);
        }
        self.flush_now().await
    }

    pub(crate) async fn fire(&self, generation: u64) {
        // Failures are recorded in the session status.
        let _ = self.flush(Some(generation)).await;
    }

    /// Run the coverage pass over queued cells accepted by `only`.
    ///
    /// Cells dated outside the cached range stay queued, since the cache
    /// cannot see their shows. Label writes go to the buffer and arm the
    /// timer. Returns the number of labels written.
    pub(crate) fn run_coverage(
        &self,
        state: &mut RosterState,
        only: impl Fn(NaiveDate) -> bool,
    ) -> usize {
        let Some(range) = state.cache.range() else {
            return 0;
        };
        let (ready, waiting): (BTreeSet<ShiftKey>, BTreeSet<ShiftKey>) =
            std::mem::take(&mut state.coverage_queue)
                .into_iter()
                .partition(|key| range.contains(key.date) && only(key.date));
        state.coverage_queue = waiting;

        let patches = derived::evaluate(&state.cache, ready, &self.inner.config.coverage);
        let labelled = patches.len();
        if labelled > 0 {
            debug!("Coverage pass labelled {} shift(s)", labelled);
            for patch in patches {
                self.apply_shift(state, patch.key, patch.shift);
            }
            self.schedule_flush(state);
        }
        labelled
    }

    async fn flush(&self, fired: Option<u64>) -> Result<FlushOutcome, GatewayError> {
        let _gate = self.inner.flush_gate.lock().await;

        let batch = {
            let mut state = self.inner.state.write().await;
            match fired {
                Some(generation) => {
                    if !state.timer.fired(generation) {
                        debug!("Timer {} superseded, skipping flush", generation);
                        return Ok(FlushOutcome::Idle);
                    }
                }
                None => state.timer.cancel(),
            }
            if state.paused {
                self.publish(&state);
                return Ok(FlushOutcome::Paused);
            }

            let batch = state.buffer.snapshot();

            // Coverage labels computed from the settled cache land in the
            // next flush.
            self.run_coverage(&mut state, |_| true);

            if batch.is_empty() {
                self.publish(&state);
                return Ok(FlushOutcome::Idle);
            }
            state.saving = true;
            self.publish(&state);
            batch
        };

        let result = self.send_batch(&batch).await;

        let mut state = self.inner.state.write().await;
        state.saving = false;
        match result {
            Ok(()) => {
                let settled = state.buffer.settle(&batch);
                info!(
                    "Flushed {} assignment(s) and {} shift(s); {} write(s) still pending",
                    batch.assignments.len(),
                    batch.shifts.len(),
                    state.buffer.len()
                );
                debug!("Settled {} of {} sent entries", settled, batch.len());
                self.start_saved_pulse(&mut state);
                self.refresh_day_hours(state.cache.range(), state.cache.day_hours_available(), &batch);
                self.publish(&state);
                Ok(FlushOutcome::Flushed {
                    assignments: batch.assignments.len(),
                    shifts: batch.shifts.len(),
                })
            }
            Err(e) => {
                warn!(
                    "Flush of {} write(s) failed, pausing saves: {}",
                    batch.len(),
                    e
                );
                state.paused = true;
                state.error = Some(e.to_string());
                state.timer.cancel();
                self.publish(&state);
                Err(e)
            }
        }
    }

    async fn send_batch(&self, batch: &FlushBatch) -> Result<(), GatewayError> {
        let gateway = self.inner.gateway.as_ref();
        let assignments = batch.assignment_rows();
        if !assignments.is_empty() {
            gateway.upsert_assignments(&assignments).await?;
        }
        let shifts = batch.shift_rows();
        if !shifts.is_empty() {
            gateway.upsert_shifts(&shifts).await?;
        }
        try_join_all(
            batch
                .shift_deletes()
                .into_iter()
                .map(|(location, key)| gateway.delete_shift(location, key)),
        )
        .await?;
        Ok(())
    }

    fn start_saved_pulse(&self, state: &mut super::RosterState) {
        state.saved_pulse = true;
        state.pulse_generation += 1;
        let pulse = state.pulse_generation;
        let delay = self.inner.config.saved_pulse();
        let session = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let mut state = session.inner.state.write().await;
            if state.pulse_generation == pulse {
                state.saved_pulse = false;
                session.publish(&state);
            }
        });
    }

    /// Refetch hours for the shift cells a flush just wrote, off the caller's
    /// path. Only cells inside the cached window are refreshed.
    fn refresh_day_hours(&self, range: Option<DateRange>, available: bool, batch: &FlushBatch) {
        let Some(range) = range else { return };
        if !available {
            return;
        }
        let keys: Vec<ShiftKey> = batch
            .shift_keys()
            .into_iter()
            .filter(|k| range.contains(k.date))
            .collect();
        if keys.is_empty() {
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            let location = session.location_id();
            for key in keys {
                let fetched = fetch_day_hours(
                    session.inner.gateway.as_ref(),
                    location,
                    DateRange::single(key.date),
                    Some(key.crew_id),
                )
                .await;
                match fetched {
                    Ok(Some(records)) => {
                        let hours = records.iter().find(|r| r.key == key).map(|r| r.hours);
                        let mut state = session.inner.state.write().await;
                        // A newer shift edit invalidated the cell again.
                        if state.buffer.shift(&key).is_some() {
                            continue;
                        }
                        if state.cache.range().is_some_and(|r| r.contains(key.date)) {
                            state.cache.put_day_hours(key, hours);
                        }
                    }
                    Ok(None) => return,
                    Err(e) => warn!("Failed to refresh day hours for {}: {}", key, e),
                }
            }
        });
    }
}
