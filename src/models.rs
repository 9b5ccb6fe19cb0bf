use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Trainer,
    Member,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Trainer => write!(f, "trainer"),
            Role::Member => write!(f, "member"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "trainer" => Ok(Role::Trainer),
            "member" => Ok(Role::Member),
            other => Err(format!("unknown role: {other}")),
        }
    }
}

fn default_duration() -> u32 {
    60
}

/// A class held every week on the same day and time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct GymClass {
    pub id: String,
    pub name: String,
    /// 0 = Monday .. 6 = Sunday.
    pub day_of_week: u8,
    #[schema(value_type = String, example = "18:00:00")]
    pub start_time: NaiveTime,
    #[serde(default = "default_duration")]
    pub duration_min: u32,
    pub capacity: u32,
    #[serde(default)]
    pub trainer_id: Option<String>,
    #[serde(default)]
    pub trainer_name: Option<String>,
}

/// A one-off session on a given date.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ManualSchedule {
    pub id: String,
    pub name: String,
    pub schedule_date: NaiveDate,
    #[schema(value_type = String, example = "10:00:00")]
    pub start_time: NaiveTime,
    #[serde(default = "default_duration")]
    pub duration_min: u32,
    pub capacity: u32,
    #[serde(default)]
    pub trainer_id: Option<String>,
    #[serde(default)]
    pub trainer_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Class,
    Manual,
}

/// A dated occurrence of a class or a manual schedule entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Session {
    pub session_id: String,
    pub kind: SessionKind,
    pub name: String,
    pub date: NaiveDate,
    #[schema(value_type = String, format = "date-time", example = "2025-11-24T18:00:00")]
    pub starts_at: NaiveDateTime,
    pub duration_min: u32,
    pub capacity: u32,
    pub booked: u32,
    pub available: u32,
    pub trainer_id: Option<String>,
    pub trainer_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Booking {
    pub id: String,
    pub user_id: String,
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub manual_schedule_id: Option<String>,
    pub booking_date: NaiveDate,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct Profile {
    pub id: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub approved: bool,
    #[serde(default)]
    #[schema(value_type = Option<String>, format = "date-time")]
    pub consent_signed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct UserRole {
    pub user_id: String,
    pub role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct BookingRequest {
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub manual_schedule_id: Option<String>,
    pub booking_date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct ConsentRequest {
    pub full_name: String,
    /// Typed name or a data URL of the drawn signature.
    pub signature: String,
    pub accepted_terms: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct RoleRequest {
    pub role: Role,
}

/// A profile together with its granted roles, as the admin panel lists it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct MemberSummary {
    #[serde(flatten)]
    pub profile: Profile,
    pub roles: Vec<Role>,
}
