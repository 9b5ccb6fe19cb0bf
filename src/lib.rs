pub mod auth;
pub mod backend;
pub mod bookings;
pub mod error;
pub mod guards;
pub mod handlers;
pub mod ical;
pub mod models;
pub mod openapi;
pub mod pages;
pub mod schedule;
pub mod settings;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    routing::{delete, get, post},
};
use handlers::{
    admin_users, approve_user, cancel_booking, create_booking, get_me, get_page, get_schedule,
    get_schedule_ical, grant_role, healthz_live, healthz_ready, my_bookings, realtime_webhook,
    revoke_role, root, sign_consent, trainer_roster, trainer_sessions,
};
use tower_http::LatencyUnit;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::backend::{Backend, MemoryBackend, RestBackend};
use crate::bookings::BookingCounter;
use crate::ical::ICalExporter;
use crate::openapi::ApiDoc;
use crate::settings::Settings;

#[derive(Clone)]
pub struct AppState {
    pub(crate) settings: Settings,
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) counter: Arc<BookingCounter>,
    pub(crate) exporter: Arc<ICalExporter>,
}

impl AppState {
    /// Wires the booking counter to `backend` and loads counts for the
    /// current booking window.
    pub async fn new(settings: Settings, backend: Arc<dyn Backend>) -> Self {
        let counter = BookingCounter::new(
            backend.clone(),
            Duration::from_millis(u64::from(settings.refresh_debounce_ms)),
        );
        counter
            .start(schedule::window(
                settings.today(),
                settings.booking_window_days,
            ))
            .await;

        Self {
            exporter: Arc::new(ICalExporter::new(
                settings.gym_title.clone(),
                settings.gym_location.clone(),
            )),
            settings,
            backend,
            counter: Arc::new(counter),
        }
    }
}

pub fn connect_backend(settings: &Settings) -> Arc<dyn Backend> {
    match &settings.backend_url {
        Some(url) => {
            info!("Using backend at {url}");
            Arc::new(RestBackend::new(url.clone(), settings.backend_api_key.clone()))
        }
        None => {
            warn!("APP_BACKEND_URL not set, using an in-memory store");
            Arc::new(MemoryBackend::new())
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    if settings.uses_default_webhook_token() {
        warn!("APP_WEBHOOK_TOKEN is the default value, set a secret before exposing /realtime");
    }

    let backend = connect_backend(&settings);
    let state = AppState::new(settings, backend).await;
    let app = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting {} API on {addr}", state.settings.gym_title);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_response(
            DefaultOnResponse::new()
                .level(Level::INFO)
                .latency_unit(LatencyUnit::Millis),
        );
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/pages/{slug}", get(get_page))
        .route("/schedule", get(get_schedule))
        .route("/schedule.ical", get(get_schedule_ical))
        .route("/me", get(get_me))
        .route("/me/bookings", get(my_bookings))
        .route("/consent", post(sign_consent))
        .route("/bookings", post(create_booking))
        .route("/bookings/{id}", delete(cancel_booking))
        .route("/trainer/sessions", get(trainer_sessions))
        .route("/trainer/roster", get(trainer_roster))
        .route("/admin/users", get(admin_users))
        .route("/admin/users/{id}/approve", post(approve_user))
        .route("/admin/users/{id}/roles", post(grant_role))
        .route("/admin/users/{id}/roles/{role}", delete(revoke_role))
        .route("/realtime/{table}", post(realtime_webhook))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    router.layer(cors).layer(trace_layer)
}
