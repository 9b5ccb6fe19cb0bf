//! Confirmed-booking counts per session and date, kept current by the
//! backend's change feed.
//!
//! A [`BookingCounter`] owns a snapshot of `(session id, date) -> count` for a
//! set of dates of interest. Every refresh replaces the snapshot wholesale.
//! Change notifications on the `bookings` table schedule a refresh after a
//! short quiescence delay; a notification arriving inside that delay restarts
//! it, so a burst of bookings costs one query.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::NaiveDate;
use serde::Deserialize;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::backend::{
    BOOKINGS, Backend, ChangeEvent, ChangeKind, Filter, Query, Row,
    SubscriptionHandle,
};

pub const DEFAULT_QUIESCENCE: Duration = Duration::from_millis(100);
pub const CONFIRMED: &str = "confirmed";

/// A booking as the counter reads it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BookingRow {
    #[serde(default)]
    pub class_id: Option<String>,
    #[serde(default)]
    pub manual_schedule_id: Option<String>,
    pub booking_date: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BookingKey {
    pub class_id: String,
    pub date: NaiveDate,
}

impl BookingKey {
    pub fn new(class_id: impl Into<String>, date: NaiveDate) -> Self {
        Self {
            class_id: class_id.into(),
            date,
        }
    }
}

impl BookingRow {
    /// The session this booking counts against: the recurring class when set,
    /// otherwise the one-off schedule entry.
    pub fn key(&self) -> Option<BookingKey> {
        self.class_id
            .as_deref()
            .or(self.manual_schedule_id.as_deref())
            .filter(|id| !id.is_empty())
            .map(|id| BookingKey::new(id, self.booking_date))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BookingCounts(HashMap<BookingKey, u32>);

impl BookingCounts {
    /// Counts rows per key, keeping only rows dated inside `dates`.
    pub fn aggregate<'a>(
        rows: impl IntoIterator<Item = &'a BookingRow>,
        dates: &BTreeSet<NaiveDate>,
    ) -> Self {
        let mut counts = HashMap::new();
        for row in rows {
            if !dates.contains(&row.booking_date) {
                continue;
            }
            let Some(key) = row.key() else {
                continue;
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        Self(counts)
    }

    /// Decodes raw backend rows, skipping the ones that do not parse.
    pub fn from_rows(rows: &[Row], dates: &BTreeSet<NaiveDate>) -> Self {
        let decoded: Vec<BookingRow> = rows
            .iter()
            .filter_map(|row| match BookingRow::deserialize(row) {
                Ok(parsed) => Some(parsed),
                Err(err) => {
                    warn!(error = %err, "skipping malformed booking row");
                    None
                }
            })
            .collect();
        Self::aggregate(&decoded, dates)
    }

    pub fn booked(&self, class_id: &str, date: NaiveDate) -> u32 {
        self.0
            .get(&BookingKey::new(class_id, date))
            .copied()
            .unwrap_or(0)
    }

    pub fn available(&self, class_id: &str, date: NaiveDate, capacity: u32) -> u32 {
        capacity.saturating_sub(self.booked(class_id, date))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BookingKey, &u32)> {
        self.0.iter()
    }
}

pub fn confirmed_bookings_query(dates: &BTreeSet<NaiveDate>) -> Query {
    Query::new()
        .columns(["class_id", "booking_date", "manual_schedule_id"])
        .eq("status", CONFIRMED)
        .filter(Filter::is_in(
            "booking_date",
            dates.iter().map(|d| d.to_string()),
        ))
}

#[derive(Default)]
struct State {
    dates: BTreeSet<NaiveDate>,
    counts: BookingCounts,
    loading: bool,
    /// Sequence number of the most recently issued refresh.
    issued: u64,
    subscription: Option<SubscriptionHandle>,
    pending: Option<(u64, JoinHandle<()>)>,
    next_timer: u64,
    stopped: bool,
}

struct Inner {
    backend: Arc<dyn Backend>,
    quiescence: Duration,
    state: Mutex<State>,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn refresh(&self, dates: BTreeSet<NaiveDate>) {
        let seq = {
            let mut state = self.state();
            if state.stopped {
                return;
            }
            state.issued += 1;
            if dates.is_empty() {
                state.counts = BookingCounts::default();
                state.loading = false;
                return;
            }
            state.loading = true;
            state.issued
        };

        let result = self
            .backend
            .select(BOOKINGS, &confirmed_bookings_query(&dates))
            .await;

        let mut state = self.state();
        if state.stopped || state.issued != seq {
            debug!(seq, latest = state.issued, "discarding stale booking counts");
            return;
        }
        state.loading = false;
        state.counts = match result {
            Ok(rows) => {
                let counts = BookingCounts::from_rows(&rows, &dates);
                debug!(rows = rows.len(), keys = counts.len(), "booking counts refreshed");
                counts
            }
            Err(err) => {
                error!(error = %err, "failed to fetch booking counts");
                BookingCounts::default()
            }
        };
    }

    async fn refresh_current(&self) {
        let dates = self.state().dates.clone();
        self.refresh(dates).await;
    }

    /// (Re)starts the quiescence timer; the refresh runs when it elapses.
    fn schedule_refresh(self: &Arc<Self>, runtime: &Handle) {
        let mut state = self.state();
        if state.stopped {
            return;
        }
        if let Some((_, previous)) = state.pending.take() {
            previous.abort();
        }
        state.next_timer += 1;
        let timer = state.next_timer;
        let inner = Arc::clone(self);
        let task = runtime.spawn(async move {
            tokio::time::sleep(inner.quiescence).await;
            {
                let mut state = inner.state();
                let current = matches!(&state.pending, Some((id, _)) if *id == timer);
                if !current {
                    return;
                }
                state.pending = None;
            }
            inner.refresh_current().await;
        });
        state.pending = Some((timer, task));
    }
}

/// Live booking counts for a set of dates.
pub struct BookingCounter {
    inner: Arc<Inner>,
}

impl BookingCounter {
    pub fn new(backend: Arc<dyn Backend>, quiescence: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                quiescence,
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Subscribes to booking changes and loads counts for `dates`.
    pub async fn start(&self, dates: impl IntoIterator<Item = NaiveDate>) {
        match Handle::try_current() {
            Ok(runtime) => self.subscribe(runtime),
            Err(err) => warn!(error = %err, "no tokio runtime, booking changes will be ignored"),
        }
        self.update_dates(dates).await;
    }

    fn subscribe(&self, runtime: Handle) {
        let mut state = self.inner.state();
        if state.subscription.is_some() || state.stopped {
            return;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let callback = Arc::new(move |event: &ChangeEvent| {
            if let Some(inner) = weak.upgrade() {
                debug!(kind = %event.kind, "booking change received");
                inner.schedule_refresh(&runtime);
            }
        });
        state.subscription = Some(self.inner.backend.subscribe(BOOKINGS, &ChangeKind::ALL, callback));
    }

    /// Replaces the dates of interest and refreshes.
    pub async fn update_dates(&self, dates: impl IntoIterator<Item = NaiveDate>) {
        let dates: BTreeSet<NaiveDate> = dates.into_iter().collect();
        self.inner.state().dates = dates.clone();
        self.inner.refresh(dates).await;
    }

    /// Fetches counts for `dates` and replaces the snapshot. An empty set
    /// clears it; a failed fetch clears it too.
    pub async fn refresh(&self, dates: impl IntoIterator<Item = NaiveDate>) {
        self.inner.refresh(dates.into_iter().collect()).await;
    }

    /// Cancels the pending refresh and releases the change subscription.
    /// Refreshes still in flight are discarded when they resolve.
    pub fn stop(&self) {
        let (subscription, pending) = {
            let mut state = self.inner.state();
            state.stopped = true;
            state.loading = false;
            state.counts = BookingCounts::default();
            (state.subscription.take(), state.pending.take())
        };
        if let Some((_, task)) = pending {
            task.abort();
        }
        if let Some(handle) = subscription {
            self.inner.backend.unsubscribe(handle);
        }
    }

    pub fn available_spots(&self, class_id: &str, date: NaiveDate, capacity: u32) -> u32 {
        self.inner.state().counts.available(class_id, date, capacity)
    }

    pub fn booked_spots(&self, class_id: &str, date: NaiveDate) -> u32 {
        self.inner.state().counts.booked(class_id, date)
    }

    /// Reads the confirmed bookings of one session straight from the
    /// backend, bypassing the debounced snapshot. `column` names the booking
    /// field holding `id`. A failed read falls back to the snapshot.
    pub async fn current_booked(&self, column: &str, id: &str, date: NaiveDate) -> u32 {
        let query = Query::new()
            .columns(["id"])
            .eq("status", CONFIRMED)
            .eq("booking_date", date.to_string())
            .eq(column, id);
        match self.inner.backend.select(BOOKINGS, &query).await {
            Ok(rows) => u32::try_from(rows.len()).unwrap_or(u32::MAX),
            Err(err) => {
                warn!(error = %err, session = id, %date, "live booking count unavailable, using snapshot");
                self.booked_spots(id, date)
            }
        }
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state().loading
    }

    pub fn dates(&self) -> BTreeSet<NaiveDate> {
        self.inner.state().dates.clone()
    }

    pub fn snapshot(&self) -> BookingCounts {
        self.inner.state().counts.clone()
    }
}

impl Drop for BookingCounter {
    fn drop(&mut self) {
        self.stop();
    }
}
