//! reqwest client for a PostgREST-style roster API.
//!
//! Each resource is a table endpoint under `base_url`. Range reads filter on
//! `work_date`/`show_date`, writes upsert with `on_conflict` set to the natural
//! composite key and `Prefer: resolution=merge-duplicates,return=minimal`.

use super::{AssignmentFilter, CrewColumns, GatewayError, RosterGateway};
use crate::config::GatewayConfig;
use crate::keys::{CrewId, LocationId, ShiftKey, ShowId};
use crate::model::{AssignmentRow, ShiftRow, ShowDraft};
use crate::window::DateRange;
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

const CREW: &str = "crew_members";
const SHOWS: &str = "show_instances";
const ASSIGNMENTS: &str = "work_assignments";
const SHIFTS: &str = "work_shifts";
const DAY_HOURS: &str = "crew_day_hours";

const ASSIGNMENT_CONFLICT: &str = "location_id,work_date,show_id,crew_id";
const SHIFT_CONFLICT: &str = "location_id,work_date,crew_id";

const PREFER_MERGE: &str = "resolution=merge-duplicates,return=minimal";
const PREFER_REPRESENTATION: &str = "return=representation";

type Query = Vec<(&'static str, String)>;

pub struct RestGateway {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn request(&self, method: Method, resource: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, resource);
        let req = self.client.request(method, url);
        match self.api_key {
            Some(ref key) => req.header("apikey", key).bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, resource: &str) -> Result<Response, GatewayError> {
        let resp = req
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        debug!("{} request failed: HTTP {} {}", resource, status, body);
        Err(classify_error(resource, status.as_u16(), &body))
    }

    async fn read(&self, resource: &str, query: Query) -> Result<Vec<Value>, GatewayError> {
        let req = self.request(Method::GET, resource).query(&query);
        let resp = self.send(req, resource).await?;
        resp.json::<Vec<Value>>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }

    async fn write(
        &self,
        method: Method,
        resource: &str,
        query: Query,
        prefer: Option<&str>,
        body: Option<Value>,
    ) -> Result<Response, GatewayError> {
        let mut req = self.request(method, resource).query(&query);
        if let Some(prefer) = prefer {
            req = req.header("Prefer", prefer);
        }
        if let Some(body) = body {
            req = req.json(&body);
        }
        self.send(req, resource).await
    }

    async fn single_row(resp: Response) -> Result<Value, GatewayError> {
        let rows: Vec<Value> = resp
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        rows.into_iter()
            .next()
            .ok_or_else(|| GatewayError::Decode("empty representation".to_string()))
    }
}

fn eq(value: impl std::fmt::Display) -> String {
    format!("eq.{}", value)
}

fn range_filter(column: &'static str, range: DateRange) -> Query {
    vec![
        (column, format!("gte.{}", range.start)),
        (column, format!("lte.{}", range.end)),
    ]
}

fn to_body<T: serde::Serialize>(value: &T) -> Result<Value, GatewayError> {
    serde_json::to_value(value).map_err(|e| GatewayError::Decode(e.to_string()))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ErrorBody {
    code: Option<String>,
    message: Option<String>,
}

/// Map a failed response onto the gateway error taxonomy.
pub(crate) fn classify_error(resource: &str, status: u16, body: &str) -> GatewayError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed
        .message
        .unwrap_or_else(|| body.trim().to_string());
    match parsed.code.as_deref() {
        // undefined_column / column not in schema cache
        Some("42703") | Some("PGRST204") => GatewayError::MissingColumn(message),
        // undefined_table / relation not in schema cache
        Some("42P01") | Some("PGRST205") => GatewayError::NotFound(resource.to_string()),
        _ if status == 404 => GatewayError::NotFound(resource.to_string()),
        _ => GatewayError::Http { status, message },
    }
}

#[async_trait]
impl RosterGateway for RestGateway {
    async fn fetch_crew(
        &self,
        location: LocationId,
        columns: CrewColumns,
    ) -> Result<Vec<Value>, GatewayError> {
        let query = vec![
            ("select", columns.select().to_string()),
            ("location_id", eq(location)),
            ("order", "name.asc".to_string()),
        ];
        self.read(CREW, query).await
    }

    async fn fetch_shows(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut query = vec![("location_id", eq(location))];
        query.extend(range_filter("show_date", range));
        query.push(("order", "show_date.asc,sort_order.asc,show_time.asc".to_string()));
        self.read(SHOWS, query).await
    }

    async fn fetch_assignments(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut query = vec![
            ("select", "work_date,show_id,crew_id,is_working,track_id".to_string()),
            ("location_id", eq(location)),
        ];
        query.extend(range_filter("work_date", range));
        self.read(ASSIGNMENTS, query).await
    }

    async fn fetch_shifts(
        &self,
        location: LocationId,
        range: DateRange,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut query = vec![
            (
                "select",
                "work_date,crew_id,start_time,end_time,day_description".to_string(),
            ),
            ("location_id", eq(location)),
        ];
        query.extend(range_filter("work_date", range));
        self.read(SHIFTS, query).await
    }

    async fn fetch_day_hours(
        &self,
        location: LocationId,
        range: DateRange,
        crew: Option<CrewId>,
    ) -> Result<Vec<Value>, GatewayError> {
        let mut query = vec![("location_id", eq(location))];
        query.extend(range_filter("work_date", range));
        if let Some(crew) = crew {
            query.push(("crew_id", eq(crew)));
        }
        self.read(DAY_HOURS, query).await
    }

    async fn upsert_assignments(&self, rows: &[AssignmentRow]) -> Result<(), GatewayError> {
        if rows.is_empty() {
            return Ok(());
        }
        let query = vec![("on_conflict", ASSIGNMENT_CONFLICT.to_string())];
        self.write(
            Method::POST,
            ASSIGNMENTS,
            query,
            Some(PREFER_MERGE),
            Some(to_body(&rows)?),
        )
        .await?;
        Ok(())
    }

    async fn delete_assignments(
        &self,
        location: LocationId,
        filter: AssignmentFilter,
    ) -> Result<(), GatewayError> {
        let mut query = vec![("location_id", eq(location))];
        match filter {
            AssignmentFilter::Show(show_id) => query.push(("show_id", eq(show_id))),
            AssignmentFilter::Range(range) => query.extend(range_filter("work_date", range)),
        }
        self.write(Method::DELETE, ASSIGNMENTS, query, None, None)
            .await?;
        Ok(())
    }

    async fn upsert_shifts(&self, rows: &[ShiftRow]) -> Result<(), GatewayError> {
        if rows.is_empty() {
            return Ok(());
        }
        let query = vec![("on_conflict", SHIFT_CONFLICT.to_string())];
        self.write(
            Method::POST,
            SHIFTS,
            query,
            Some(PREFER_MERGE),
            Some(to_body(&rows)?),
        )
        .await?;
        Ok(())
    }

    async fn delete_shift(&self, location: LocationId, key: ShiftKey) -> Result<(), GatewayError> {
        let query = vec![
            ("location_id", eq(location)),
            ("work_date", eq(key.date)),
            ("crew_id", eq(key.crew_id)),
        ];
        self.write(Method::DELETE, SHIFTS, query, None, None).await?;
        Ok(())
    }

    async fn create_show(&self, draft: &ShowDraft) -> Result<Value, GatewayError> {
        let resp = self
            .write(
                Method::POST,
                SHOWS,
                Vec::new(),
                Some(PREFER_REPRESENTATION),
                Some(to_body(draft)?),
            )
            .await?;
        Self::single_row(resp).await
    }

    async fn update_show(&self, id: ShowId, draft: &ShowDraft) -> Result<Value, GatewayError> {
        let query = vec![("id", eq(id)), ("location_id", eq(draft.location_id))];
        let resp = self
            .write(
                Method::PATCH,
                SHOWS,
                query,
                Some(PREFER_REPRESENTATION),
                Some(to_body(draft)?),
            )
            .await?;
        Self::single_row(resp).await
    }

    async fn delete_show(&self, location: LocationId, id: ShowId) -> Result<(), GatewayError> {
        let query = vec![("id", eq(id)), ("location_id", eq(location))];
        self.write(Method::DELETE, SHOWS, query, None, None).await?;
        Ok(())
    }
}
