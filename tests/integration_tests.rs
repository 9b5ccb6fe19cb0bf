use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use chrono::{Datelike, NaiveDate};
use ringside::backend::{
    AuthUser, BOOKINGS, CLASSES, MANUAL_SCHEDULES, MemoryBackend, PROFILES, USER_ROLES,
};
use ringside::settings::Settings;
use ringside::{AppState, build_router};
use serde_json::{Value, json};
use tower::Service;

const CLASS_ID: &str = "class-evening";
const TRAINER_ID: &str = "u-coach";

fn test_settings() -> Settings {
    Settings {
        webhook_token: "hook-token-123".to_string(),
        refresh_debounce_ms: 20,
        ..Settings::default()
    }
}

fn today() -> NaiveDate {
    test_settings().today()
}

/// Members, staff and a class running today with `capacity` spots.
fn seeded_backend(capacity: u32) -> MemoryBackend {
    let weekday = today().weekday().num_days_from_monday();
    let backend = MemoryBackend::new()
        .with_rows(
            PROFILES,
            [
                json!({"id": "u-member", "full_name": "Ala Member", "approved": true, "consent_signed_at": "2024-01-01T10:00:00Z"}),
                json!({"id": "u-other", "full_name": "Olek Other", "approved": true, "consent_signed_at": "2024-01-01T10:00:00Z"}),
                json!({"id": "u-pending", "full_name": "Piotr Pending", "approved": false}),
                json!({"id": "u-nowaiver", "full_name": "Nina Nowaiver", "approved": true}),
                json!({"id": TRAINER_ID, "full_name": "Coach Kasia", "approved": true}),
                json!({"id": "u-admin", "full_name": "Adam Admin", "approved": true}),
            ],
        )
        .with_rows(
            USER_ROLES,
            [
                json!({"user_id": TRAINER_ID, "role": "trainer"}),
                json!({"user_id": "u-admin", "role": "admin"}),
            ],
        )
        .with_rows(
            CLASSES,
            [json!({
                "id": CLASS_ID,
                "name": "Evening Boxing",
                "day_of_week": weekday,
                "start_time": "18:00:00",
                "duration_min": 90,
                "capacity": capacity,
                "trainer_id": TRAINER_ID,
                "trainer_name": "Coach Kasia"
            })],
        )
        .with_rows(
            MANUAL_SCHEDULES,
            [json!({
                "id": "open-sparring",
                "name": "Open Sparring",
                "schedule_date": today().to_string(),
                "start_time": "11:00:00",
                "capacity": 6
            })],
        );
    for (token, id) in [
        ("t-member", "u-member"),
        ("t-other", "u-other"),
        ("t-pending", "u-pending"),
        ("t-nowaiver", "u-nowaiver"),
        ("t-coach", TRAINER_ID),
        ("t-admin", "u-admin"),
    ] {
        backend.add_session(
            token,
            AuthUser {
                id: id.to_string(),
                email: Some(format!("{id}@example.com")),
            },
        );
    }
    backend
}

async fn app_with(backend: Arc<MemoryBackend>) -> Router {
    let state = AppState::new(test_settings(), backend).await;
    build_router(state)
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::empty()).unwrap()
}

fn send_json(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn call(app: &mut Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.call(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

fn booking_body(class_id: &str) -> Value {
    json!({"class_id": class_id, "booking_date": today().to_string()})
}

fn session<'a>(sessions: &'a [Value], id: &str) -> &'a Value {
    sessions
        .iter()
        .find(|s| s["session_id"] == id)
        .unwrap()
}

#[tokio::test]
async fn test_root_endpoint() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;

    let (status, body) = call(&mut app, get("/", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Ringside Boxing Club API"));
    assert!(body.contains("/schedule"));
}

#[tokio::test]
async fn test_healthz() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;
    for uri in ["/healthz/live", "/healthz/ready"] {
        let (status, body) = call(&mut app, get(uri, None)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#""status":"ok"#));
    }
}

#[tokio::test]
async fn test_pages() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;

    let (status, body) = call(&mut app, get("/pages/pricing", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Unlimited"));

    let (status, body) = call(&mut app, get("/pages/home", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("openstreetmap"));

    let (status, _) = call(&mut app, get("/pages/secret", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_schedule_shows_occupancy() {
    let backend = Arc::new(seeded_backend(10).with_rows(
        BOOKINGS,
        [
            json!({"user_id": "u-other", "class_id": CLASS_ID, "booking_date": today().to_string(), "status": "confirmed"}),
            json!({"user_id": "u-member", "class_id": CLASS_ID, "booking_date": today().to_string(), "status": "cancelled"}),
        ],
    ));
    let mut app = app_with(backend).await;

    let (status, body) = call(&mut app, get("/schedule?days=1", None)).await;
    assert_eq!(status, StatusCode::OK);

    let sessions: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(sessions.len(), 2);
    assert_eq!(sessions[0]["session_id"], "open-sparring");
    let evening = session(&sessions, CLASS_ID);
    assert_eq!(evening["booked"], 1);
    assert_eq!(evening["available"], 9);
    assert_eq!(session(&sessions, "open-sparring")["available"], 6);
}

#[tokio::test]
async fn test_schedule_invalid_days() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;
    for uri in ["/schedule?days=0", "/schedule?days=15"] {
        let (status, _) = call(&mut app, get(uri, None)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_schedule_ical() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;
    let response = app.call(get("/schedule.ical?days=1", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/calendar"
    );
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(body.contains("Evening Boxing"));
    assert!(body.contains("Open Sparring"));
}

#[tokio::test]
async fn test_me_requires_sign_in() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;

    let (status, _) = call(&mut app, get("/me", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&mut app, get("/me", Some("forged"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(&mut app, get("/me", Some("t-coach"))).await;
    assert_eq!(status, StatusCode::OK);
    let me: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(me["trainer_panel"], true);
    assert_eq!(me["admin_panel"], false);
}

#[tokio::test]
async fn test_booking_flow() {
    let backend = Arc::new(seeded_backend(10));
    let mut app = app_with(backend.clone()).await;

    let (status, body) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-member"), booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let booking: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(booking["status"], "confirmed");
    let booking_id = booking["id"].as_str().unwrap().to_string();

    let (status, _) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-member"), booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let (_, body) = call(&mut app, get("/schedule?days=1", None)).await;
    let sessions: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(session(&sessions, CLASS_ID)["booked"], 1);

    let (status, body) = call(&mut app, get("/me/bookings", Some("t-member"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(&booking_id));

    let cancel = Request::builder()
        .method("DELETE")
        .uri(format!("/bookings/{booking_id}"))
        .header(header::AUTHORIZATION, "Bearer t-member")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(&mut app, cancel).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("cancelled"));

    let again = Request::builder()
        .method("DELETE")
        .uri(format!("/bookings/{booking_id}"))
        .header(header::AUTHORIZATION, "Bearer t-member")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&mut app, again).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_booking_manual_session() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;
    let (status, body) = call(
        &mut app,
        send_json(
            "POST",
            "/bookings",
            Some("t-member"),
            json!({"manual_schedule_id": "open-sparring", "booking_date": today().to_string()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(body.contains("open-sparring"));
}

#[tokio::test]
async fn test_booking_gates() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;

    let (status, _) = call(
        &mut app,
        send_json("POST", "/bookings", None, booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-pending"), booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("approval"));

    let (status, body) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-nowaiver"), booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(body.contains("waiver"));
}

#[tokio::test]
async fn test_booking_validation() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;

    let (status, _) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-member"), booking_body("no-such-class")),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let tomorrow = today().succ_opt().unwrap();
    let (status, _) = call(
        &mut app,
        send_json(
            "POST",
            "/bookings",
            Some("t-member"),
            json!({"class_id": CLASS_ID, "booking_date": tomorrow.to_string()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &mut app,
        send_json(
            "POST",
            "/bookings",
            Some("t-member"),
            json!({"class_id": CLASS_ID, "manual_schedule_id": "open-sparring", "booking_date": today().to_string()}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_full_class_rejects_booking() {
    let backend = Arc::new(seeded_backend(1).with_rows(
        BOOKINGS,
        [json!({"user_id": "u-other", "class_id": CLASS_ID, "booking_date": today().to_string(), "status": "confirmed"})],
    ));
    let mut app = app_with(backend).await;

    let (status, body) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-member"), booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body.contains("full"));
}

#[tokio::test]
async fn test_back_to_back_bookings_respect_capacity() {
    let backend = Arc::new(seeded_backend(1));
    let mut app = app_with(backend.clone()).await;

    let (first, _) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-member"), booking_body(CLASS_ID)),
    )
    .await;
    let (second, body) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-other"), booking_body(CLASS_ID)),
    )
    .await;

    assert_eq!(first, StatusCode::CREATED);
    assert_eq!(second, StatusCode::CONFLICT);
    assert!(body.contains("full"));
    let confirmed = backend
        .rows(BOOKINGS)
        .into_iter()
        .filter(|row| row["status"] == "confirmed")
        .count();
    assert_eq!(confirmed, 1);
}

#[tokio::test]
async fn test_consent() {
    let backend = Arc::new(seeded_backend(10));
    let mut app = app_with(backend.clone()).await;

    let (status, _) = call(
        &mut app,
        send_json(
            "POST",
            "/consent",
            Some("t-nowaiver"),
            json!({"full_name": "Nina Nowaiver", "signature": "", "accepted_terms": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &mut app,
        send_json(
            "POST",
            "/consent",
            Some("t-nowaiver"),
            json!({"full_name": "Nina Nowaiver", "signature": "Nina Nowaiver", "accepted_terms": true}),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(backend.rows("consents").len(), 1);

    let (status, _) = call(
        &mut app,
        send_json("POST", "/bookings", Some("t-nowaiver"), booking_body(CLASS_ID)),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_trainer_panel() {
    let backend = Arc::new(seeded_backend(10).with_rows(
        BOOKINGS,
        [json!({"user_id": "u-other", "class_id": CLASS_ID, "booking_date": today().to_string(), "status": "confirmed"})],
    ));
    let mut app = app_with(backend).await;

    let (status, _) = call(&mut app, get("/trainer/sessions?days=1", Some("t-member"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&mut app, get("/trainer/sessions?days=1", Some("t-coach"))).await;
    assert_eq!(status, StatusCode::OK);
    let sessions: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["session_id"], CLASS_ID);

    let roster_uri = format!("/trainer/roster?session_id={CLASS_ID}&date={}", today());
    let (status, body) = call(&mut app, get(&roster_uri, Some("t-coach"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Olek Other"));

    let manual_uri = format!(
        "/trainer/roster?session_id=open-sparring&date={}&kind=manual",
        today()
    );
    let (status, _) = call(&mut app, get(&manual_uri, Some("t-coach"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&mut app, get("/trainer/sessions?days=1", Some("t-admin"))).await;
    assert_eq!(status, StatusCode::OK);
    let sessions: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(sessions.len(), 2);
}

#[tokio::test]
async fn test_admin_panel() {
    let backend = Arc::new(seeded_backend(10));
    let mut app = app_with(backend.clone()).await;

    let (status, _) = call(&mut app, get("/admin/users", Some("t-coach"))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = call(&mut app, get("/admin/users", Some("t-admin"))).await;
    assert_eq!(status, StatusCode::OK);
    let members: Vec<Value> = serde_json::from_str(&body).unwrap();
    assert_eq!(members.len(), 6);
    assert_eq!(members[0]["id"], "u-pending");

    let approve = send_json("POST", "/admin/users/u-pending/approve", Some("t-admin"), json!({}));
    let (status, body) = call(&mut app, approve).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""approved":true"#));

    let approve_missing = send_json("POST", "/admin/users/nobody/approve", Some("t-admin"), json!({}));
    let (status, _) = call(&mut app, approve_missing).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let grant = || send_json("POST", "/admin/users/u-member/roles", Some("t-admin"), json!({"role": "trainer"}));
    let (status, _) = call(&mut app, grant()).await;
    assert_eq!(status, StatusCode::CREATED);
    let (status, _) = call(&mut app, grant()).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&mut app, get("/me", Some("t-member"))).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""trainer_panel":true"#));

    let revoke = |uri: &str| {
        Request::builder()
            .method("DELETE")
            .uri(uri)
            .header(header::AUTHORIZATION, "Bearer t-admin")
            .body(Body::empty())
            .unwrap()
    };
    let (status, _) = call(&mut app, revoke("/admin/users/u-member/roles/trainer")).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = call(&mut app, revoke("/admin/users/u-member/roles/trainer")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&mut app, revoke("/admin/users/u-admin/roles/admin")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _) = call(&mut app, revoke("/admin/users/u-member/roles/wizard")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_realtime_webhook_auth() {
    let mut app = app_with(Arc::new(seeded_backend(10))).await;
    let payload = json!({"type": "INSERT", "record": {"id": "x"}});

    let (status, _) = call(
        &mut app,
        send_json("POST", "/realtime/bookings?token=wrong", None, payload.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(
        &mut app,
        send_json("POST", "/realtime/bookings", Some("hook-token-123"), payload),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_realtime_burst_refreshes_once() {
    let backend = Arc::new(seeded_backend(10));
    let mut app = app_with(backend.clone()).await;
    let before = backend.select_count();

    for _ in 0..5 {
        let (status, _) = call(
            &mut app,
            send_json(
                "POST",
                "/realtime/bookings?token=hook-token-123",
                None,
                json!({"type": "UPDATE"}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert_eq!(backend.select_count(), before + 1);
}
