//! RestGateway against an axum stand-in for the PostgREST API.

use axum::extract::{Query, State};
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::Router;
use chrono::{NaiveDate, NaiveTime};
use crew_roster::cache::{fetch_crew, fetch_day_hours};
use crew_roster::config::GatewayConfig;
use crew_roster::gateway::{AssignmentFilter, GatewayError, RosterGateway};
use crew_roster::model::{AssignmentRow, FromRow, ShiftRow, ShowDraft};
use crew_roster::{
    DateRange, FlushOutcome, RestGateway, RosterSession, SessionConfig, ShiftKey, ShowInstance,
};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<Value>,
}

impl Seen {
    fn param(&self, name: &str) -> Vec<&str> {
        self.query
            .iter()
            .filter(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

type Responder = Arc<dyn Fn(&Seen) -> (u16, String) + Send + Sync>;

#[derive(Clone)]
struct FakeApi {
    seen: Arc<Mutex<Vec<Seen>>>,
    respond: Responder,
}

async fn handle(
    State(api): State<FakeApi>,
    method: Method,
    uri: Uri,
    Query(query): Query<Vec<(String, String)>>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let seen = Seen {
        method,
        path: uri.path().to_string(),
        query,
        headers,
        body: serde_json::from_str(&body).ok(),
    };
    let (status, text) = (api.respond)(&seen);
    api.seen.lock().unwrap().push(seen);
    (StatusCode::from_u16(status).unwrap(), text)
}

/// Start a fake API and return a gateway pointed at it.
async fn serve(
    respond: impl Fn(&Seen) -> (u16, String) + Send + Sync + 'static,
) -> (RestGateway, GatewayConfig, Arc<Mutex<Vec<Seen>>>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let api = FakeApi {
        seen: seen.clone(),
        respond: Arc::new(respond),
    };
    let app = Router::new().fallback(handle).with_state(api);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let config = GatewayConfig {
        base_url: format!("http://{}/rest/v1/", addr),
        api_key: Some("secret".to_string()),
        timeout_ms: 5000,
    };
    (RestGateway::new(&config).unwrap(), config, seen)
}

fn ok_empty(_: &Seen) -> (u16, String) {
    (200, "[]".to_string())
}

fn d(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, day).unwrap()
}

#[tokio::test]
async fn test_range_read_sends_filters_and_auth() {
    let (gateway, _, seen) = serve(ok_empty).await;
    gateway
        .fetch_assignments(3, DateRange::new(d(1), d(7)))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let req = &seen[0];
    assert_eq!(req.method, Method::GET);
    assert_eq!(req.path, "/rest/v1/work_assignments");
    assert_eq!(req.param("location_id"), vec!["eq.3"]);
    assert_eq!(req.param("work_date"), vec!["gte.2024-01-01", "lte.2024-01-07"]);
    assert_eq!(
        req.param("select"),
        vec!["work_date,show_id,crew_id,is_working,track_id"]
    );
    assert_eq!(req.header("apikey"), Some("secret"));
    assert_eq!(req.header("authorization"), Some("Bearer secret"));
}

#[tokio::test]
async fn test_assignment_upsert_merges_on_natural_key() {
    let (gateway, _, seen) = serve(|_| (201, String::new())).await;
    let rows = vec![
        AssignmentRow {
            location_id: 3,
            work_date: d(2),
            show_id: Some(40),
            crew_id: 17,
            is_working: true,
            track_id: Some(2),
        },
        AssignmentRow {
            location_id: 3,
            work_date: d(2),
            show_id: None,
            crew_id: 18,
            is_working: false,
            track_id: None,
        },
    ];
    gateway.upsert_assignments(&rows).await.unwrap();

    let seen = seen.lock().unwrap();
    let req = &seen[0];
    assert_eq!(req.method, Method::POST);
    assert_eq!(req.path, "/rest/v1/work_assignments");
    assert_eq!(
        req.param("on_conflict"),
        vec!["location_id,work_date,show_id,crew_id"]
    );
    assert_eq!(
        req.header("prefer"),
        Some("resolution=merge-duplicates,return=minimal")
    );
    assert_eq!(
        req.body,
        Some(json!([
            {"location_id": 3, "work_date": "2024-01-02", "show_id": 40, "crew_id": 17,
             "is_working": true, "track_id": 2},
            {"location_id": 3, "work_date": "2024-01-02", "show_id": null, "crew_id": 18,
             "is_working": false, "track_id": null}
        ]))
    );
}

#[tokio::test]
async fn test_empty_upserts_send_nothing() {
    let (gateway, _, seen) = serve(ok_empty).await;
    gateway.upsert_assignments(&[]).await.unwrap();
    gateway.upsert_shifts(&[]).await.unwrap();
    assert!(seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shift_upsert_and_delete() {
    let (gateway, _, seen) = serve(|_| (204, String::new())).await;
    gateway
        .upsert_shifts(&[ShiftRow {
            location_id: 3,
            work_date: d(4),
            crew_id: 17,
            start_time: NaiveTime::from_hms_opt(9, 30, 0),
            end_time: None,
            day_description: Some("SHOW".to_string()),
        }])
        .await
        .unwrap();
    gateway
        .delete_shift(3, ShiftKey::new(d(5), 17))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].param("on_conflict"), vec!["location_id,work_date,crew_id"]);
    assert_eq!(
        seen[0].body.as_ref().and_then(|b| b[0]["start_time"].as_str()),
        Some("09:30:00")
    );
    let delete = &seen[1];
    assert_eq!(delete.method, Method::DELETE);
    assert_eq!(delete.path, "/rest/v1/work_shifts");
    assert_eq!(delete.param("work_date"), vec!["eq.2024-01-05"]);
    assert_eq!(delete.param("crew_id"), vec!["eq.17"]);
    assert_eq!(delete.param("location_id"), vec!["eq.3"]);
}

#[tokio::test]
async fn test_delete_assignments_by_show() {
    let (gateway, _, seen) = serve(|_| (204, String::new())).await;
    gateway
        .delete_assignments(3, AssignmentFilter::Show(40))
        .await
        .unwrap();
    gateway
        .delete_assignments(3, AssignmentFilter::Range(DateRange::new(d(1), d(2))))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].param("show_id"), vec!["eq.40"]);
    assert_eq!(seen[1].param("work_date"), vec!["gte.2024-01-01", "lte.2024-01-02"]);
}

#[tokio::test]
async fn test_crew_falls_back_when_lead_column_missing() {
    let (gateway, _, seen) = serve(|req| {
        let select = req.param("select").join(",");
        if select.contains("is_lead") {
            (
                400,
                json!({"code": "42703", "message": "column crew_members.is_lead does not exist"})
                    .to_string(),
            )
        } else {
            (
                200,
                json!([{"id": 17, "name": "Ada", "department": "Audio", "active": true}]).to_string(),
            )
        }
    })
    .await;

    let crew = fetch_crew(&gateway, 3).await.unwrap();
    assert_eq!(crew.len(), 1);
    assert_eq!(crew[0].name, "Ada");
    assert!(!crew[0].is_lead);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[tokio::test]
async fn test_other_crew_errors_propagate() {
    let (gateway, _, seen) = serve(|_| (500, "boom".to_string())).await;
    let err = fetch_crew(&gateway, 3).await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Http {
            status: 500,
            message: "boom".to_string()
        }
    );
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_day_hours_view_reads_as_absent() {
    let (gateway, _, _) = serve(|_| {
        (
            404,
            json!({"code": "PGRST205", "message": "Could not find the table"}).to_string(),
        )
    })
    .await;
    let hours = fetch_day_hours(&gateway, 3, DateRange::single(d(1)), Some(17))
        .await
        .unwrap();
    assert_eq!(hours, None);
}

#[tokio::test]
async fn test_create_show_returns_stored_row() {
    let (gateway, _, seen) = serve(|_| {
        (
            201,
            json!([{"id": 77, "show_date": "2024-01-05", "show_time": "19:00:00",
                    "sort_order": 1, "color": "FF8800"}])
            .to_string(),
        )
    })
    .await;
    let draft = ShowDraft {
        location_id: 3,
        show_date: d(5),
        show_time: NaiveTime::from_hms_opt(19, 0, 0),
        sort_order: Some(1),
    };
    let row = gateway.create_show(&draft).await.unwrap();
    let show = ShowInstance::from_row(&row).unwrap();
    assert_eq!(show.id, 77);
    assert_eq!(show.color.as_deref(), Some("#ff8800"));

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0].header("prefer"), Some("return=representation"));
    assert_eq!(
        seen[0].body,
        Some(json!({"location_id": 3, "show_date": "2024-01-05",
                    "show_time": "19:00:00", "sort_order": 1}))
    );
}

#[tokio::test]
async fn test_session_flushes_over_http_and_pauses_on_error() {
    let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let failing = fail.clone();
    let (gateway, config, seen) = serve(move |req| {
        if req.method == Method::POST && failing.load(std::sync::atomic::Ordering::SeqCst) {
            return (503, "unavailable".to_string());
        }
        match req.path.as_str() {
            "/rest/v1/crew_members" => (
                200,
                json!([{"id": 17, "name": "Ada", "department": "Audio", "active": true,
                        "is_lead": true}])
                .to_string(),
            ),
            _ if req.method == Method::GET => (200, "[]".to_string()),
            _ => (201, String::new()),
        }
    })
    .await;
    let mut session_config = SessionConfig::new(3);
    session_config.gateway = config;
    let session = RosterSession::open(session_config, Arc::new(gateway), d(1)).await;
    assert_eq!(session.crew().await.len(), 1);

    session.set_working_for(d(2), 17, None, true).await.unwrap();
    let outcome = session.flush_now().await.unwrap();
    assert_eq!(
        outcome,
        FlushOutcome::Flushed {
            assignments: 1,
            shifts: 0
        }
    );
    {
        let seen = seen.lock().unwrap();
        let post = seen.iter().find(|r| r.method == Method::POST).unwrap();
        assert_eq!(post.path, "/rest/v1/work_assignments");
    }

    fail.store(true, std::sync::atomic::Ordering::SeqCst);
    session.set_working_for(d(3), 17, None, true).await.unwrap();
    let err = session.flush_now().await.unwrap_err();
    assert_eq!(
        err,
        GatewayError::Http {
            status: 503,
            message: "unavailable".to_string()
        }
    );
    let status = session.status();
    assert!(status.save_paused);
    assert_eq!(status.pending_writes, 1);
    assert_eq!(status.save_error.as_deref(), Some("HTTP 503: unavailable"));
}
