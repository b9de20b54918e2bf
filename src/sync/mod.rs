pub mod buffer;
pub mod derived;
pub mod scheduler;
pub mod status;

pub use buffer::{DirtyAssignment, DirtyShift, FlushBatch, ShiftWrite, WriteBuffer};
pub use derived::ShiftPatch;
pub use scheduler::DebounceTimer;
pub use status::{SavePhase, SessionStatus};
