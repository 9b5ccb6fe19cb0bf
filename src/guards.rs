//! Access gates for the member, trainer and admin areas.
//!
//! Each gate resolves the caller against the platform (auth user, profile,
//! granted roles) and lands in one of three states: still loading, denied
//! with a reason, or granted with the resolved [`Viewer`].

use serde::Serialize;
use utoipa::ToSchema;

use crate::backend::{AuthUser, Backend, BackendError, PROFILES, Query, USER_ROLES};
use crate::error::ApiError;
use crate::models::{Profile, Role, UserRole};

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct Viewer {
    pub user_id: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub approved: bool,
    pub consent_signed: bool,
    pub roles: Vec<Role>,
}

impl Viewer {
    pub fn new(user: AuthUser, profile: Option<Profile>, roles: Vec<Role>) -> Self {
        Self {
            user_id: user.id,
            email: user.email.or_else(|| profile.as_ref().and_then(|p| p.email.clone())),
            full_name: profile.as_ref().and_then(|p| p.full_name.clone()),
            approved: profile.as_ref().is_some_and(|p| p.approved),
            consent_signed: profile
                .as_ref()
                .is_some_and(|p| p.consent_signed_at.is_some()),
            roles,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    /// Admins hold every role.
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role) || self.roles.contains(&Role::Admin)
    }
}

/// Resolves the viewer behind an access token; `None` for anonymous callers
/// and tokens the platform rejects.
pub async fn load_viewer(
    backend: &dyn Backend,
    access_token: Option<&str>,
) -> Result<Option<Viewer>, BackendError> {
    let Some(token) = access_token else {
        return Ok(None);
    };
    let Some(user) = backend.authenticate(token).await? else {
        return Ok(None);
    };

    let profile_query = Query::new().eq("id", user.id.clone());
    let roles_query = Query::new().eq("user_id", user.id.clone());
    let (profiles, role_rows) = futures::try_join!(
        backend.select(PROFILES, &profile_query),
        backend.select(USER_ROLES, &roles_query)
    )?;

    let profile = profiles
        .into_iter()
        .next()
        .map(serde_json::from_value::<Profile>)
        .transpose()?;
    let roles = role_rows
        .into_iter()
        .filter_map(|row| serde_json::from_value::<UserRole>(row).ok())
        .map(|r| r.role)
        .collect();

    Ok(Some(Viewer::new(user, profile, roles)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    Authenticated,
    Approved,
    Role(Role),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Denial {
    SignedOut,
    PendingApproval,
    MissingRole(Role),
}

impl Denial {
    pub fn message(&self) -> String {
        match self {
            Denial::SignedOut => "Sign in to continue".to_string(),
            Denial::PendingApproval => {
                "Your account is waiting for approval by the gym staff".to_string()
            }
            Denial::MissingRole(role) => format!("This area requires the {role} role"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum AccessState {
    #[default]
    Loading,
    Denied(Denial),
    Granted(Viewer),
}

impl AccessState {
    pub fn into_result(self) -> Result<Viewer, ApiError> {
        match self {
            AccessState::Granted(viewer) => Ok(viewer),
            AccessState::Denied(denial @ Denial::SignedOut) => {
                Err(ApiError::Unauthorized(denial.message()))
            }
            AccessState::Denied(denial) => Err(ApiError::Forbidden(denial.message())),
            AccessState::Loading => Err(ApiError::Unavailable(
                "Access check still in progress".into(),
            )),
        }
    }
}

impl Guard {
    pub fn check(&self, viewer: Option<Viewer>) -> AccessState {
        let Some(viewer) = viewer else {
            return AccessState::Denied(Denial::SignedOut);
        };
        match self {
            Guard::Authenticated => AccessState::Granted(viewer),
            Guard::Approved if viewer.is_approved() => AccessState::Granted(viewer),
            Guard::Approved => AccessState::Denied(Denial::PendingApproval),
            Guard::Role(role) if viewer.has_role(*role) => AccessState::Granted(viewer),
            Guard::Role(role) => AccessState::Denied(Denial::MissingRole(*role)),
        }
    }

    pub async fn evaluate(
        &self,
        backend: &dyn Backend,
        access_token: Option<&str>,
    ) -> Result<AccessState, BackendError> {
        let viewer = load_viewer(backend, access_token).await?;
        Ok(self.check(viewer))
    }

    /// Evaluates the gate and turns a denial into the matching HTTP error.
    pub async fn authorize(
        &self,
        backend: &dyn Backend,
        access_token: Option<&str>,
    ) -> Result<Viewer, ApiError> {
        self.evaluate(backend, access_token).await?.into_result()
    }
}
