//! The hosted database platform as seen by this service: table queries,
//! mutations, access-token lookup and a per-table change feed.

pub mod memory;
pub mod realtime;
pub mod rest;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

pub use memory::MemoryBackend;
pub use realtime::ChangeHub;
pub use rest::RestBackend;

pub const BOOKINGS: &str = "bookings";
pub const CLASSES: &str = "classes";
pub const MANUAL_SCHEDULES: &str = "manual_schedules";
pub const PROFILES: &str = "profiles";
pub const USER_ROLES: &str = "user_roles";
pub const CONSENTS: &str = "consents";

/// A table row as the platform returns it.
pub type Row = Value;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend responded with {status}: {body}")]
    Status { status: u16, body: String },
    #[error("could not decode backend payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(column.into(), value.into())
    }

    pub fn is_in<V: Into<Value>>(
        column: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Filter::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }

    pub fn matches(&self, row: &Row) -> bool {
        let field = row.get(self.column()).unwrap_or(&Value::Null);
        match self {
            Filter::Eq(_, value) => field == value,
            Filter::In(_, values) => values.contains(field),
        }
    }
}

/// Column projection plus conjunctive filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn matches(&self, row: &Row) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }

    /// Keeps only the projected columns; an empty projection keeps the row.
    pub fn project(&self, row: &Row) -> Row {
        if self.columns.is_empty() {
            return row.clone();
        }
        let mut out = serde_json::Map::new();
        for column in &self.columns {
            out.insert(
                column.clone(),
                row.get(column).cloned().unwrap_or(Value::Null),
            );
        }
        Value::Object(out)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub const ALL: [ChangeKind; 3] = [ChangeKind::Insert, ChangeKind::Update, ChangeKind::Delete];
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeKind::Insert => write!(f, "INSERT"),
            ChangeKind::Update => write!(f, "UPDATE"),
            ChangeKind::Delete => write!(f, "DELETE"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub record: Option<Row>,
    #[serde(default)]
    pub old_record: Option<Row>,
}

pub type ChangeCallback = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(pub(crate) u64);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[async_trait]
pub trait Backend: Send + Sync {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError>;

    /// Inserts one row and returns it as stored.
    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError>;

    /// Applies `patch` to every row matching `filters`; returns updated rows.
    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, BackendError>;

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError>;

    /// Resolves an end-user access token; `None` when the token is not valid.
    async fn authenticate(&self, access_token: &str) -> Result<Option<AuthUser>, BackendError>;

    fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> SubscriptionHandle;

    fn unsubscribe(&self, handle: SubscriptionHandle);

    /// Feeds a change notification received out of band into the change feed.
    fn publish(&self, event: ChangeEvent);
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_query_matches_conjunction() {
        let query = Query::new()
            .eq("status", "confirmed")
            .filter(Filter::is_in("booking_date", ["2024-05-01", "2024-05-02"]));
        assert!(query.matches(&json!({"status": "confirmed", "booking_date": "2024-05-02"})));
        assert!(!query.matches(&json!({"status": "cancelled", "booking_date": "2024-05-02"})));
        assert!(!query.matches(&json!({"status": "confirmed", "booking_date": "2024-05-03"})));
        assert!(!query.matches(&json!({"booking_date": "2024-05-01"})));
    }

    #[test]
    fn test_query_project() {
        let query = Query::new().columns(["class_id", "manual_schedule_id"]);
        let row = json!({"id": "1", "class_id": "A"});
        assert_eq!(
            query.project(&row),
            json!({"class_id": "A", "manual_schedule_id": null})
        );
    }

    #[test]
    fn test_change_event_wire_shape() {
        let event: ChangeEvent = serde_json::from_value(json!({
            "table": "bookings",
            "type": "DELETE",
            "old_record": {"id": "7"}
        }))
        .unwrap();
        assert_eq!(event.kind, ChangeKind::Delete);
        assert!(event.record.is_none());
    }
}
