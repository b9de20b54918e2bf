//! Full-coverage day label.
//!
//! When a crew member is working with a track on every show of a date (up to
//! the configured cap), their shift for that date carries the coverage label.
//! Evaluation is pure and scoped to the (date, crew) cells actually touched;
//! the session routes the resulting patches through the normal shift write
//! path.

use crate::cache::RosterCache;
use crate::config::CoverageConfig;
use crate::keys::{AssignmentKey, ShiftKey};
use crate::model::Shift;

/// A shift write produced by the coverage pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShiftPatch {
    pub key: ShiftKey,
    pub shift: Shift,
}

/// Whether `key`'s crew member covers every capped show on its date.
/// A date without shows is never fully covered.
pub fn fully_covered(cache: &RosterCache, key: ShiftKey, config: &CoverageConfig) -> bool {
    let shows = cache.shows_for_date(key.date);
    let capped = &shows[..shows.len().min(config.show_cap)];
    !capped.is_empty()
        && capped.iter().all(|show| {
            cache
                .assignment(&AssignmentKey::new(key.date, Some(show.id), key.crew_id))
                .is_some_and(|a| a.is_covered())
        })
}

/// Evaluate the touched cells and return the label writes still needed.
///
/// A cell that already carries the label yields nothing, so re-running with
/// no intervening change produces no patches.
pub fn evaluate<I>(cache: &RosterCache, touched: I, config: &CoverageConfig) -> Vec<ShiftPatch>
where
    I: IntoIterator<Item = ShiftKey>,
{
    let mut patches = Vec::new();
    for key in touched {
        if !fully_covered(cache, key, config) {
            continue;
        }
        let current = cache.shift(key.date, key.crew_id).cloned().unwrap_or_default();
        if current.day_description.as_deref() == Some(config.label.as_str()) {
            continue;
        }
        patches.push(ShiftPatch {
            key,
            shift: Shift::new(current.start, current.end, Some(config.label.clone())),
        });
    }
    patches
}
