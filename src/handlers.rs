use std::collections::HashMap;

use axum::{
    Json,
    extract::{Path, Query as QueryParams, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use utoipa::ToSchema;

use crate::{
    AppState,
    auth::{provided_token, verify_webhook_token},
    backend::{
        BOOKINGS, CLASSES, CONSENTS, ChangeEvent, ChangeKind, Filter, MANUAL_SCHEDULES, PROFILES,
        Query, Row, USER_ROLES,
    },
    bookings::CONFIRMED,
    error::ApiError,
    guards::{Guard, Viewer},
    models::{
        Booking, BookingRequest, ConsentRequest, GymClass, ManualSchedule, MemberSummary, Profile,
        Role, RoleRequest, Session, SessionKind, UserRole,
    },
    pages::{self, Page, PageSlug},
    schedule::{self, class_runs_on},
    validation::{booking_target, validate_booking_date, validate_consent, validate_days},
};

type BearerHeader = Option<TypedHeader<Authorization<Bearer>>>;

const DEFAULT_DAYS: u16 = 7;

#[derive(Debug, Deserialize)]
pub struct ScheduleQuery {
    pub days: Option<u16>,
}

#[derive(Debug, Deserialize)]
pub struct RosterQuery {
    pub session_id: String,
    pub date: NaiveDate,
    #[serde(default = "default_kind")]
    pub kind: SessionKind,
}

fn default_kind() -> SessionKind {
    SessionKind::Class
}

#[derive(Debug, Deserialize)]
pub struct WebhookQuery {
    pub token: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct WebhookPayload {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub record: Option<Row>,
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub old_record: Option<Row>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub viewer: Viewer,
    pub can_book: bool,
    pub trainer_panel: bool,
    pub admin_panel: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RosterEntry {
    pub booking_id: String,
    pub user_id: String,
    pub full_name: Option<String>,
    pub email: Option<String>,
}

async fn authorize(state: &AppState, auth: BearerHeader, guard: Guard) -> Result<Viewer, ApiError> {
    let token = provided_token(auth.map(|TypedHeader(a)| a), None);
    guard
        .authorize(state.backend.as_ref(), token.as_deref())
        .await
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, ApiError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(ApiError::from))
        .collect()
}

/// Dates the booking counter tracks, moved forward when the day changes.
async fn booking_window(state: &AppState) -> Vec<NaiveDate> {
    let dates = schedule::window(state.settings.today(), state.settings.booking_window_days);
    if state.counter.dates().iter().ne(dates.iter()) {
        state.counter.update_dates(dates.clone()).await;
    }
    dates
}

async fn sessions_for(state: &AppState, days: Option<u16>) -> Result<Vec<Session>, ApiError> {
    let max = state.settings.booking_window_days;
    let days = validate_days(days.unwrap_or(DEFAULT_DAYS.min(max)), max)?;
    let mut dates = booking_window(state).await;
    dates.truncate(usize::from(days));

    let (classes, manual) = schedule::load_catalog(state.backend.as_ref(), &dates).await?;
    Ok(schedule::expand(&classes, &manual, &dates, &state.counter))
}

#[utoipa::path(get, path = "/", tag = "site")]
pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "message": format!("{} API", state.settings.gym_title),
        "endpoints": {
            "/pages/{slug}": "Site pages: home, pricing, about, legal",
            "/schedule": "Upcoming sessions with free spots",
            "/schedule.ical": "Upcoming sessions as iCal",
            "/bookings": "Book a session (approved members)",
            "/trainer/sessions": "Trainer panel",
            "/admin/users": "Admin panel"
        }
    }))
}

#[utoipa::path(get, path = "/healthz/live", tag = "site")]
pub async fn healthz_live() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

#[utoipa::path(get, path = "/healthz/ready", tag = "site")]
pub async fn healthz_ready(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "booking_counts_loading": state.counter.is_loading()
    }))
}

#[utoipa::path(
    get,
    path = "/pages/{slug}",
    params(("slug" = String, Path, description = "home, pricing, about or legal")),
    responses(
        (status = 200, description = "Page content", body = Page),
        (status = 404, description = "No such page")
    ),
    tag = "site"
)]
pub async fn get_page(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<Page>, ApiError> {
    let slug: PageSlug = slug.parse().map_err(ApiError::NotFound)?;
    Ok(Json(pages::render(slug, &state.settings)))
}

#[utoipa::path(
    get,
    path = "/schedule",
    params(("days" = Option<u16>, Query, description = "Number of days ahead, 1 up to the booking window")),
    responses(
        (status = 200, description = "Sessions with occupancy", body = [Session]),
        (status = 400, description = "Invalid number of days")
    ),
    tag = "schedule"
)]
pub async fn get_schedule(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ScheduleQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(sessions_for(&state, query.days).await?))
}

#[utoipa::path(
    get,
    path = "/schedule.ical",
    params(("days" = Option<u16>, Query, description = "Number of days ahead, 1 up to the booking window")),
    responses(
        (status = 200, description = "iCal file", content_type = "text/calendar"),
        (status = 404, description = "No sessions scheduled")
    ),
    tag = "schedule"
)]
pub async fn get_schedule_ical(
    State(state): State<AppState>,
    QueryParams(query): QueryParams<ScheduleQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sessions = sessions_for(&state, query.days).await?;
    if sessions.is_empty() {
        return Err(ApiError::NotFound("No sessions scheduled".into()));
    }
    let body = state.exporter.generate(&sessions);
    Ok((
        StatusCode::OK,
        [
            ("content-type", "text/calendar"),
            (
                "content-disposition",
                "attachment; filename=ringside_schedule.ics",
            ),
        ],
        body,
    ))
}

#[utoipa::path(
    get,
    path = "/me",
    responses(
        (status = 200, description = "Signed-in user and their access", body = MeResponse),
        (status = 401, description = "Not signed in")
    ),
    security(("bearer_auth" = [])),
    tag = "members"
)]
pub async fn get_me(State(state): State<AppState>, auth: BearerHeader) -> Result<Json<MeResponse>, ApiError> {
    let viewer = authorize(&state, auth, Guard::Authenticated).await?;
    Ok(Json(MeResponse {
        can_book: viewer.is_approved() && viewer.consent_signed,
        trainer_panel: viewer.has_role(Role::Trainer),
        admin_panel: viewer.has_role(Role::Admin),
        viewer,
    }))
}

#[utoipa::path(
    get,
    path = "/me/bookings",
    responses(
        (status = 200, description = "Own bookings, newest first", body = [Booking]),
        (status = 401, description = "Not signed in")
    ),
    security(("bearer_auth" = [])),
    tag = "members"
)]
pub async fn my_bookings(
    State(state): State<AppState>,
    auth: BearerHeader,
) -> Result<Json<Vec<Booking>>, ApiError> {
    let viewer = authorize(&state, auth, Guard::Authenticated).await?;
    let rows = state
        .backend
        .select(BOOKINGS, &Query::new().eq("user_id", viewer.user_id))
        .await?;
    let mut bookings: Vec<Booking> = decode_rows(rows)?;
    bookings.sort_by(|a, b| b.booking_date.cmp(&a.booking_date));
    Ok(Json(bookings))
}

#[utoipa::path(
    post,
    path = "/consent",
    request_body = ConsentRequest,
    responses(
        (status = 201, description = "Waiver signed"),
        (status = 400, description = "Incomplete waiver"),
        (status = 401, description = "Not signed in")
    ),
    security(("bearer_auth" = [])),
    tag = "members"
)]
pub async fn sign_consent(
    State(state): State<AppState>,
    auth: BearerHeader,
    Json(request): Json<ConsentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = authorize(&state, auth, Guard::Authenticated).await?;
    validate_consent(&request)?;

    let signed_at = Utc::now();
    state
        .backend
        .insert(
            CONSENTS,
            json!({
                "user_id": viewer.user_id,
                "full_name": request.full_name.trim(),
                "signature": request.signature.trim(),
                "signed_at": signed_at,
            }),
        )
        .await?;
    state
        .backend
        .update(
            PROFILES,
            json!({"consent_signed_at": signed_at, "full_name": request.full_name.trim()}),
            &[Filter::eq("id", viewer.user_id.clone())],
        )
        .await?;
    info!(user = %viewer.user_id, "consent signed");

    Ok((StatusCode::CREATED, Json(json!({"signed_at": signed_at}))))
}

/// Capacity of the session `id` on `date`, or why it cannot be booked.
async fn session_capacity(
    state: &AppState,
    id: &str,
    kind: SessionKind,
    date: NaiveDate,
) -> Result<(u32, Option<String>), ApiError> {
    match kind {
        SessionKind::Class => {
            let rows = state
                .backend
                .select(CLASSES, &Query::new().eq("id", id))
                .await?;
            let class = decode_rows::<GymClass>(rows)?
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::NotFound(format!("Class {id} not found")))?;
            if !class_runs_on(&class, date) {
                return Err(ApiError::BadRequest(format!(
                    "{} does not run on {date}",
                    class.name
                )));
            }
            Ok((class.capacity, class.trainer_id))
        }
        SessionKind::Manual => {
            let rows = state
                .backend
                .select(MANUAL_SCHEDULES, &Query::new().eq("id", id))
                .await?;
            let entry = decode_rows::<ManualSchedule>(rows)?
                .into_iter()
                .next()
                .ok_or_else(|| ApiError::NotFound(format!("Session {id} not found")))?;
            if entry.schedule_date != date {
                return Err(ApiError::BadRequest(format!(
                    "{} takes place on {}",
                    entry.name, entry.schedule_date
                )));
            }
            Ok((entry.capacity, entry.trainer_id))
        }
    }
}

fn id_column(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Class => "class_id",
        SessionKind::Manual => "manual_schedule_id",
    }
}

#[utoipa::path(
    post,
    path = "/bookings",
    request_body = BookingRequest,
    responses(
        (status = 201, description = "Booking confirmed", body = Booking),
        (status = 400, description = "Invalid booking request"),
        (status = 401, description = "Not signed in"),
        (status = 403, description = "Account not approved or waiver not signed"),
        (status = 404, description = "Session not found"),
        (status = 409, description = "Already booked or session full")
    ),
    security(("bearer_auth" = [])),
    tag = "members"
)]
pub async fn create_booking(
    State(state): State<AppState>,
    auth: BearerHeader,
    Json(request): Json<BookingRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer = authorize(&state, auth, Guard::Approved).await?;
    if !viewer.consent_signed {
        return Err(ApiError::Forbidden(
            "Sign the training waiver before booking".into(),
        ));
    }

    let (kind, id) = booking_target(&request)?;
    let id = id.to_string();
    let date = validate_booking_date(
        request.booking_date,
        state.settings.today(),
        state.settings.booking_window_days,
    )?;
    let (capacity, _) = session_capacity(&state, &id, kind, date).await?;

    let existing = state
        .backend
        .select(
            BOOKINGS,
            &Query::new()
                .eq("user_id", viewer.user_id.clone())
                .eq("status", CONFIRMED)
                .eq("booking_date", date.to_string())
                .eq(id_column(kind), id.clone()),
        )
        .await?;
    if !existing.is_empty() {
        return Err(ApiError::Conflict("You already booked this session".into()));
    }

    booking_window(&state).await;
    let booked = state
        .counter
        .current_booked(id_column(kind), &id, date)
        .await;
    if booked >= capacity {
        return Err(ApiError::Conflict("This session is full".into()));
    }

    let mut row = json!({
        "user_id": viewer.user_id,
        "booking_date": date.to_string(),
        "status": CONFIRMED,
    });
    row[id_column(kind)] = json!(id);
    let stored = state.backend.insert(BOOKINGS, row).await?;
    let booking: Booking = serde_json::from_value(stored)?;
    info!(user = %viewer.user_id, session = %id, %date, "booking confirmed");

    Ok((StatusCode::CREATED, Json(booking)))
}

#[utoipa::path(
    delete,
    path = "/bookings/{id}",
    params(("id" = String, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking cancelled", body = Booking),
        (status = 404, description = "No such confirmed booking")
    ),
    security(("bearer_auth" = [])),
    tag = "members"
)]
pub async fn cancel_booking(
    State(state): State<AppState>,
    auth: BearerHeader,
    Path(id): Path<String>,
) -> Result<Json<Booking>, ApiError> {
    let viewer = authorize(&state, auth, Guard::Approved).await?;
    let updated = state
        .backend
        .update(
            BOOKINGS,
            json!({"status": "cancelled"}),
            &[
                Filter::eq("id", id.clone()),
                Filter::eq("user_id", viewer.user_id.clone()),
                Filter::eq("status", CONFIRMED),
            ],
        )
        .await?;
    let booking = decode_rows::<Booking>(updated)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound(format!("Booking {id} not found")))?;
    info!(user = %viewer.user_id, booking = %id, "booking cancelled");
    Ok(Json(booking))
}

#[utoipa::path(
    get,
    path = "/trainer/sessions",
    params(("days" = Option<u16>, Query, description = "Number of days ahead")),
    responses(
        (status = 200, description = "Sessions led by the trainer", body = [Session]),
        (status = 403, description = "Trainer role required")
    ),
    security(("bearer_auth" = [])),
    tag = "trainer"
)]
pub async fn trainer_sessions(
    State(state): State<AppState>,
    auth: BearerHeader,
    QueryParams(query): QueryParams<ScheduleQuery>,
) -> Result<Json<Vec<Session>>, ApiError> {
    let viewer = authorize(&state, auth, Guard::Role(Role::Trainer)).await?;
    let sessions = sessions_for(&state, query.days).await?;
    if viewer.has_role(Role::Admin) {
        return Ok(Json(sessions));
    }
    Ok(Json(
        sessions
            .into_iter()
            .filter(|s| s.trainer_id.as_deref() == Some(viewer.user_id.as_str()))
            .collect(),
    ))
}

#[utoipa::path(
    get,
    path = "/trainer/roster",
    params(
        ("session_id" = String, Query, description = "Class or manual schedule id"),
        ("date" = String, Query, description = "Session date, YYYY-MM-DD"),
        ("kind" = Option<String>, Query, description = "class (default) or manual")
    ),
    responses(
        (status = 200, description = "Members booked on the session", body = [RosterEntry]),
        (status = 403, description = "Not the trainer of this session")
    ),
    security(("bearer_auth" = [])),
    tag = "trainer"
)]
pub async fn trainer_roster(
    State(state): State<AppState>,
    auth: BearerHeader,
    QueryParams(query): QueryParams<RosterQuery>,
) -> Result<Json<Vec<RosterEntry>>, ApiError> {
    let viewer = authorize(&state, auth, Guard::Role(Role::Trainer)).await?;
    let (_, trainer_id) = session_capacity(&state, &query.session_id, query.kind, query.date).await?;
    if !viewer.has_role(Role::Admin) && trainer_id.as_deref() != Some(viewer.user_id.as_str()) {
        return Err(ApiError::Forbidden("You do not lead this session".into()));
    }

    let rows = state
        .backend
        .select(
            BOOKINGS,
            &Query::new()
                .eq("status", CONFIRMED)
                .eq("booking_date", query.date.to_string())
                .eq(id_column(query.kind), query.session_id.clone()),
        )
        .await?;
    let bookings: Vec<Booking> = decode_rows(rows)?;
    if bookings.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let profile_rows = state
        .backend
        .select(
            PROFILES,
            &Query::new().filter(Filter::is_in(
                "id",
                bookings.iter().map(|b| b.user_id.clone()),
            )),
        )
        .await?;
    let profiles: HashMap<String, Profile> = decode_rows::<Profile>(profile_rows)?
        .into_iter()
        .map(|p| (p.id.clone(), p))
        .collect();

    let roster = bookings
        .into_iter()
        .map(|b| {
            let profile = profiles.get(&b.user_id);
            RosterEntry {
                booking_id: b.id,
                full_name: profile.and_then(|p| p.full_name.clone()),
                email: profile.and_then(|p| p.email.clone()),
                user_id: b.user_id,
            }
        })
        .collect();
    Ok(Json(roster))
}

#[utoipa::path(
    get,
    path = "/admin/users",
    responses(
        (status = 200, description = "All members with roles", body = [MemberSummary]),
        (status = 403, description = "Admin role required")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn admin_users(
    State(state): State<AppState>,
    auth: BearerHeader,
) -> Result<Json<Vec<MemberSummary>>, ApiError> {
    authorize(&state, auth, Guard::Role(Role::Admin)).await?;
    let all = Query::new();
    let (profile_rows, role_rows) = futures::try_join!(
        state.backend.select(PROFILES, &all),
        state.backend.select(USER_ROLES, &all)
    )?;

    let mut roles: HashMap<String, Vec<Role>> = HashMap::new();
    for role in role_rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<UserRole>(row).ok())
    {
        roles.entry(role.user_id).or_default().push(role.role);
    }

    let mut members: Vec<MemberSummary> = decode_rows::<Profile>(profile_rows)?
        .into_iter()
        .map(|profile| MemberSummary {
            roles: roles.remove(&profile.id).unwrap_or_default(),
            profile,
        })
        .collect();
    members.sort_by(|a, b| {
        a.profile
            .approved
            .cmp(&b.profile.approved)
            .then(a.profile.full_name.cmp(&b.profile.full_name))
    });
    Ok(Json(members))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/approve",
    params(("id" = String, Path, description = "User id")),
    responses(
        (status = 200, description = "Member approved", body = Profile),
        (status = 404, description = "No such member")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn approve_user(
    State(state): State<AppState>,
    auth: BearerHeader,
    Path(id): Path<String>,
) -> Result<Json<Profile>, ApiError> {
    let admin = authorize(&state, auth, Guard::Role(Role::Admin)).await?;
    let updated = state
        .backend
        .update(PROFILES, json!({"approved": true}), &[Filter::eq("id", id.clone())])
        .await?;
    let profile = decode_rows::<Profile>(updated)?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::NotFound(format!("User {id} not found")))?;
    info!(admin = %admin.user_id, user = %id, "member approved");
    Ok(Json(profile))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/roles",
    params(("id" = String, Path, description = "User id")),
    request_body = RoleRequest,
    responses(
        (status = 201, description = "Role granted", body = UserRole),
        (status = 200, description = "Role was already granted", body = UserRole),
        (status = 404, description = "No such member")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn grant_role(
    State(state): State<AppState>,
    auth: BearerHeader,
    Path(id): Path<String>,
    Json(request): Json<RoleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let admin = authorize(&state, auth, Guard::Role(Role::Admin)).await?;
    let profiles = state
        .backend
        .select(PROFILES, &Query::new().eq("id", id.clone()))
        .await?;
    if profiles.is_empty() {
        return Err(ApiError::NotFound(format!("User {id} not found")));
    }

    let granted = UserRole {
        user_id: id.clone(),
        role: request.role,
    };
    let existing = state
        .backend
        .select(
            USER_ROLES,
            &Query::new()
                .eq("user_id", id.clone())
                .eq("role", request.role.to_string()),
        )
        .await?;
    if !existing.is_empty() {
        return Ok((StatusCode::OK, Json(granted)));
    }

    state
        .backend
        .insert(USER_ROLES, json!({"user_id": id, "role": request.role}))
        .await?;
    info!(admin = %admin.user_id, user = %granted.user_id, role = %granted.role, "role granted");
    Ok((StatusCode::CREATED, Json(granted)))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}/roles/{role}",
    params(
        ("id" = String, Path, description = "User id"),
        ("role" = String, Path, description = "admin, trainer or member")
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 400, description = "Unknown role or revoking own admin role"),
        (status = 404, description = "Role not granted")
    ),
    security(("bearer_auth" = [])),
    tag = "admin"
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    auth: BearerHeader,
    Path((id, role)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let admin = authorize(&state, auth, Guard::Role(Role::Admin)).await?;
    let role: Role = role.parse().map_err(ApiError::BadRequest)?;
    if role == Role::Admin && id == admin.user_id {
        return Err(ApiError::BadRequest(
            "You cannot revoke your own admin role".into(),
        ));
    }
    let removed = state
        .backend
        .delete(
            USER_ROLES,
            &[
                Filter::eq("user_id", id.clone()),
                Filter::eq("role", role.to_string()),
            ],
        )
        .await?;
    if removed.is_empty() {
        return Err(ApiError::NotFound(format!("User {id} does not hold {role}")));
    }
    info!(admin = %admin.user_id, user = %id, %role, "role revoked");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/realtime/{table}",
    params(
        ("table" = String, Path, description = "Table the change happened in"),
        ("token" = Option<String>, Query, description = "Webhook token (alternative to Bearer header)")
    ),
    request_body = WebhookPayload,
    responses(
        (status = 202, description = "Change dispatched to subscribers"),
        (status = 401, description = "Invalid webhook token")
    ),
    security(("bearer_auth" = []), ("query_token" = [])),
    tag = "realtime"
)]
pub async fn realtime_webhook(
    State(state): State<AppState>,
    auth: BearerHeader,
    Path(table): Path<String>,
    QueryParams(query): QueryParams<WebhookQuery>,
    Json(payload): Json<WebhookPayload>,
) -> Result<impl IntoResponse, ApiError> {
    let auth_header = auth.map(|TypedHeader(a)| a);
    verify_webhook_token(&state.settings, auth_header, query.token.as_deref())?;

    state.backend.publish(ChangeEvent {
        table,
        kind: payload.kind,
        record: payload.record,
        old_record: payload.old_record,
    });
    Ok((StatusCode::ACCEPTED, Json(json!({"status": "accepted"}))))
}
