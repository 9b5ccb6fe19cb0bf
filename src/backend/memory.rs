use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::Value;

use super::{
    AuthUser, Backend, BackendError, ChangeCallback, ChangeEvent, ChangeHub, ChangeKind, Filter,
    Query, Row, SubscriptionHandle,
};

/// In-process table store with the platform's query and change-feed
/// semantics. Serves local development and tests.
#[derive(Default)]
pub struct MemoryBackend {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    sessions: Mutex<HashMap<String, AuthUser>>,
    hub: ChangeHub,
    next_id: AtomicU64,
    selects: AtomicUsize,
    fail_selects: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, HashMap<String, Vec<Row>>> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, AuthUser>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Seeds rows without emitting change events.
    pub fn with_rows(self, table: &str, rows: impl IntoIterator<Item = Row>) -> Self {
        let rows: Vec<Row> = rows.into_iter().map(|r| self.assign_id(r)).collect();
        self.tables()
            .entry(table.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// Registers an access token that `authenticate` will accept.
    pub fn add_session(&self, access_token: &str, user: AuthUser) {
        self.sessions().insert(access_token.to_string(), user);
    }

    /// Makes every subsequent select fail until switched back off.
    pub fn set_fail_selects(&self, fail: bool) {
        self.fail_selects.store(fail, Ordering::SeqCst);
    }

    pub fn select_count(&self) -> usize {
        self.selects.load(Ordering::SeqCst)
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables().get(table).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self) -> usize {
        self.hub.len()
    }

    fn assign_id(&self, mut row: Row) -> Row {
        if let Value::Object(map) = &mut row
            && !map.contains_key("id")
        {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            map.insert("id".into(), Value::String(format!("mem-{id}")));
        }
        row
    }

    fn event(table: &str, kind: ChangeKind, record: Option<Row>, old: Option<Row>) -> ChangeEvent {
        ChangeEvent {
            table: table.to_string(),
            kind,
            record,
            old_record: old,
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Vec<Row>, BackendError> {
        self.selects.fetch_add(1, Ordering::SeqCst);
        if self.fail_selects.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(format!(
                "select on {table} rejected"
            )));
        }
        let tables = self.tables();
        let rows = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.matches(row))
                    .map(|row| query.project(row))
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        if !row.is_object() {
            return Err(BackendError::Status {
                status: 400,
                body: "row must be a JSON object".into(),
            });
        }
        let row = self.assign_id(row);
        self.tables()
            .entry(table.to_string())
            .or_default()
            .push(row.clone());
        self.hub.publish(&Self::event(
            table,
            ChangeKind::Insert,
            Some(row.clone()),
            None,
        ));
        Ok(row)
    }

    async fn update(
        &self,
        table: &str,
        patch: Row,
        filters: &[Filter],
    ) -> Result<Vec<Row>, BackendError> {
        let Value::Object(patch) = patch else {
            return Err(BackendError::Status {
                status: 400,
                body: "patch must be a JSON object".into(),
            });
        };
        let mut changes = Vec::new();
        {
            let mut tables = self.tables();
            for row in tables.entry(table.to_string()).or_default().iter_mut() {
                if !filters.iter().all(|f| f.matches(row)) {
                    continue;
                }
                let old = row.clone();
                if let Value::Object(map) = row {
                    for (key, value) in &patch {
                        map.insert(key.clone(), value.clone());
                    }
                }
                changes.push((old, row.clone()));
            }
        }
        for (old, new) in &changes {
            self.hub.publish(&Self::event(
                table,
                ChangeKind::Update,
                Some(new.clone()),
                Some(old.clone()),
            ));
        }
        Ok(changes.into_iter().map(|(_, new)| new).collect())
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<Vec<Row>, BackendError> {
        let removed: Vec<Row> = {
            let mut tables = self.tables();
            let rows = tables.entry(table.to_string()).or_default();
            let (removed, kept): (Vec<Row>, Vec<Row>) = rows
                .drain(..)
                .partition(|row| filters.iter().all(|f| f.matches(row)));
            *rows = kept;
            removed
        };
        for old in &removed {
            self.hub.publish(&Self::event(
                table,
                ChangeKind::Delete,
                None,
                Some(old.clone()),
            ));
        }
        Ok(removed)
    }

    async fn authenticate(&self, access_token: &str) -> Result<Option<AuthUser>, BackendError> {
        Ok(self.sessions().get(access_token).cloned())
    }

    fn subscribe(
        &self,
        table: &str,
        kinds: &[ChangeKind],
        callback: ChangeCallback,
    ) -> SubscriptionHandle {
        self.hub.subscribe(table, kinds, callback)
    }

    fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.hub.unsubscribe(handle);
    }

    fn publish(&self, event: ChangeEvent) {
        self.hub.publish(&event);
    }
}
