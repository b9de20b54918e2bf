//! Save status exposed to presentation layers.

use serde::Serialize;

/// Coarse state of the write-behind path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SavePhase {
    Clean,
    Dirty,
    Saving,
    Paused,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// A flush request is in flight
    pub is_saving: bool,
    /// Set briefly after a successful flush
    pub saved_pulse: bool,
    pub save_paused: bool,
    /// Text of the failure that paused saving
    pub save_error: Option<String>,
    /// Writes not yet confirmed persisted
    pub pending_writes: usize,
    pub flush_scheduled: bool,
}

impl SessionStatus {
    pub fn phase(&self) -> SavePhase {
        if self.save_paused {
            SavePhase::Paused
        } else if self.is_saving {
            SavePhase::Saving
        } else if self.pending_writes > 0 {
            SavePhase::Dirty
        } else {
            SavePhase::Clean
        }
    }

    /// Nothing in flight and nothing waiting on the timer.
    pub fn is_settled(&self) -> bool {
        !self.is_saving && !self.flush_scheduled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase() {
        let mut status = SessionStatus::default();
        assert_eq!(status.phase(), SavePhase::Clean);
        assert!(status.is_settled());

        status.pending_writes = 2;
        status.flush_scheduled = true;
        assert_eq!(status.phase(), SavePhase::Dirty);
        assert!(!status.is_settled());

        status.flush_scheduled = false;
        status.is_saving = true;
        assert_eq!(status.phase(), SavePhase::Saving);

        status.is_saving = false;
        status.save_paused = true;
        status.save_error = Some("HTTP 503: storage unavailable".to_string());
        assert_eq!(status.phase(), SavePhase::Paused);
        assert!(status.is_settled());
    }
}
