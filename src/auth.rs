use axum_extra::headers::Authorization;
use axum_extra::headers::authorization::Bearer;

use crate::error::ApiError;
use crate::settings::Settings;

/// Token from the `Authorization: Bearer` header, or the `token` query
/// parameter when the header is absent.
pub fn provided_token(
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Option<String> {
    auth.map(|a| a.token().to_string())
        .or_else(|| query_token.map(|s| s.to_string()))
        .filter(|t| !t.is_empty())
}

/// Checks the shared secret carried by the platform's database webhooks.
pub fn verify_webhook_token(
    settings: &Settings,
    auth: Option<Authorization<Bearer>>,
    query_token: Option<&str>,
) -> Result<(), ApiError> {
    match provided_token(auth, query_token) {
        Some(token) if token == settings.webhook_token => Ok(()),
        _ => Err(ApiError::Unauthorized("Invalid webhook token".into())),
    }
}
