use utoipa::openapi::security::{ApiKey, ApiKeyValue, HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};

use crate::backend::ChangeKind;
use crate::guards::Viewer;
use crate::handlers::{MeResponse, RosterEntry, WebhookPayload};
use crate::models::{
    Booking, BookingRequest, ConsentRequest, MemberSummary, Profile, Role, RoleRequest, Session,
    SessionKind, UserRole,
};
use crate::pages::{Contact, Page, PricingPlan, Section};

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
        components.add_security_scheme(
            "query_token",
            SecurityScheme::ApiKey(ApiKey::Query(ApiKeyValue::new("token"))),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz_live,
        crate::handlers::healthz_ready,
        crate::handlers::get_page,
        crate::handlers::get_schedule,
        crate::handlers::get_schedule_ical,
        crate::handlers::get_me,
        crate::handlers::my_bookings,
        crate::handlers::sign_consent,
        crate::handlers::create_booking,
        crate::handlers::cancel_booking,
        crate::handlers::trainer_sessions,
        crate::handlers::trainer_roster,
        crate::handlers::admin_users,
        crate::handlers::approve_user,
        crate::handlers::grant_role,
        crate::handlers::revoke_role,
        crate::handlers::realtime_webhook
    ),
    components(schemas(
        Session,
        SessionKind,
        Booking,
        BookingRequest,
        ConsentRequest,
        Profile,
        Role,
        RoleRequest,
        UserRole,
        MemberSummary,
        Viewer,
        MeResponse,
        RosterEntry,
        WebhookPayload,
        ChangeKind,
        Page,
        Section,
        PricingPlan,
        Contact
    )),
    tags(
        (name = "site", description = "Public pages and health"),
        (name = "schedule", description = "Class schedule with live occupancy"),
        (name = "members", description = "Bookings and waiver for signed-in members"),
        (name = "trainer", description = "Trainer panel"),
        (name = "admin", description = "Admin panel"),
        (name = "realtime", description = "Change notifications from the database platform")
    ),
    modifiers(&SecurityAddon),
)]
pub struct ApiDoc;
