//! crew-roster: write-behind synchronization engine for a crew/show roster.
//!
//! A [`RosterSession`] materialises one date window of a location's roster
//! from a [`RosterGateway`], applies edits optimistically, and flushes them in
//! debounced batches. A failed flush pauses saving until an explicit retry.

pub mod cache;
pub mod cli;
pub mod config;
pub mod gateway;
pub mod keys;
pub mod model;
pub mod session;
pub mod sync;
pub mod window;

pub use cache::{RosterCache, SliceErrors};
pub use config::SessionConfig;
pub use gateway::{GatewayError, MemoryGateway, RestGateway, RosterGateway};
pub use keys::{AssignmentKey, CrewId, LocationId, ShiftKey, ShowId, TrackId};
pub use model::{Assignment, CrewMember, DayHours, Shift, ShowInstance};
pub use session::{CopyReport, FlushOutcome, RosterSession, SessionError};
pub use sync::{SavePhase, SessionStatus};
pub use window::{DateRange, DateWindow};
