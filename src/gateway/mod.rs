//! Remote gateway: the REST resources the roster engine reads and writes.
//!
//! The storage engine itself lives elsewhere. This module only defines the
//! contract the engine needs from it, plus two implementations: a reqwest
//! client for a PostgREST-style API and an in-memory store for tests and demos.

pub mod memory;
pub mod rest;

use crate::keys::{CrewId, LocationId, ShiftKey, ShowId};
use crate::model::{AssignmentRow, ShiftRow, ShowDraft};
use crate::window::DateRange;
use async_trait::async_trait;
use serde_json::Value;

pub use memory::{MemoryGateway, Resource, WriteCall};
pub use rest::RestGateway;

/// Errors from the remote gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// A selected column does not exist (older schema)
    #[error("missing column: {0}")]
    MissingColumn(String),
    /// The resource itself does not exist in this deployment
    #[error("resource not found: {0}")]
    NotFound(String),
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_missing_column(&self) -> bool {
        matches!(self, GatewayError::MissingColumn(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, GatewayError::NotFound(_))
    }
}

/// Column set requested from the crew resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrewColumns {
    /// Includes the optional lead-flag column
    Extended,
    /// Columns every deployment has
    Base,
}

impl CrewColumns {
    pub fn select(&self) -> &'static str {
        match self {
            CrewColumns::Extended => "id,name,department,active,weekly_off,is_lead",
            CrewColumns::Base => "id,name,department,active,weekly_off",
        }
    }
}

/// Scope of an assignment delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignmentFilter {
    /// Every assignment referencing one show
    Show(ShowId),
    /// Every assignment dated inside the range
    Range(DateRange),
}

/// Contract over the four roster resources plus the optional day-hours view.
///
/// Reads return raw rows; validation happens in [`crate::model::decode_rows`].
/// Upserts merge on the natural composite keys and return nothing.
#[async_trait]
pub trait RosterGateway: Send + Sync {
    async fn fetch_crew(
        &self,
        location: LocationId,
        columns: CrewColumns,
    ) -> Result<Vec<Value>, GatewayError>;

    async fn fetch_shows(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError>;

    async fn fetch_assignments(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError>;

    async fn fetch_shifts(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Read the optional day-hours view, for one crew member or everyone.
    async fn fetch_day_hours(
        &self,
        location: LocationId,
        range: DateRange,
        crew: Option<CrewId>,
    ) -> Result<Vec<Value>, GatewayError>;

    /// Upsert keyed on (location, date, show, crew).
    async fn upsert_assignments(&self, rows: &[AssignmentRow]) -> Result<(), GatewayError>;

    async fn delete_assignments(
        &self,
        location: LocationId,
        filter: AssignmentFilter,
    ) -> Result<(), GatewayError>;

    /// Upsert keyed on (location, date, crew).
    async fn upsert_shifts(&self, rows: &[ShiftRow]) -> Result<(), GatewayError>;

    async fn delete_shift(&self, location: LocationId, key: ShiftKey) -> Result<(), GatewayError>;

    /// Create a show and return the stored row.
    async fn create_show(&self, draft: &ShowDraft) -> Result<Value, GatewayError>;

    async fn update_show(&self, id: ShowId, draft: &ShowDraft) -> Result<Value, GatewayError>;

    async fn delete_show(&self, location: LocationId, id: ShowId) -> Result<(), GatewayError>;
}
