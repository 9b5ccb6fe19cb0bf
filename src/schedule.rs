use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};

use crate::backend::{Backend, BackendError, CLASSES, Filter, MANUAL_SCHEDULES, Query};
use crate::bookings::BookingCounter;
use crate::models::{GymClass, ManualSchedule, Session, SessionKind};

/// `days` consecutive dates starting at `start`.
pub fn window(start: NaiveDate, days: u16) -> Vec<NaiveDate> {
    (0..i64::from(days))
        .map(|offset| start + Duration::days(offset))
        .collect()
}

fn decode<T: serde::de::DeserializeOwned>(rows: Vec<serde_json::Value>) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!(error = %err, "skipping malformed schedule row");
                None
            }
        })
        .collect()
}

/// Recurring classes plus the one-off sessions dated inside `dates`.
pub async fn load_catalog(
    backend: &dyn Backend,
    dates: &[NaiveDate],
) -> Result<(Vec<GymClass>, Vec<ManualSchedule>), BackendError> {
    let classes_query = Query::new();
    let manual_query = Query::new().filter(Filter::is_in(
        "schedule_date",
        dates.iter().map(|d| d.to_string()),
    ));
    let (classes, manual) = futures::try_join!(
        backend.select(CLASSES, &classes_query),
        backend.select(MANUAL_SCHEDULES, &manual_query)
    )?;
    Ok((decode(classes), decode(manual)))
}

pub fn class_runs_on(class: &GymClass, date: NaiveDate) -> bool {
    u32::from(class.day_of_week) == date.weekday().num_days_from_monday()
}

/// Expands the catalog into dated sessions with live occupancy, ordered by
/// start time.
pub fn expand(
    classes: &[GymClass],
    manual: &[ManualSchedule],
    dates: &[NaiveDate],
    counter: &BookingCounter,
) -> Vec<Session> {
    let mut sessions = Vec::new();
    for &date in dates {
        for class in classes.iter().filter(|c| class_runs_on(c, date)) {
            sessions.push(Session {
                session_id: class.id.clone(),
                kind: SessionKind::Class,
                name: class.name.clone(),
                date,
                starts_at: NaiveDateTime::new(date, class.start_time),
                duration_min: class.duration_min,
                capacity: class.capacity,
                booked: counter.booked_spots(&class.id, date),
                available: counter.available_spots(&class.id, date, class.capacity),
                trainer_id: class.trainer_id.clone(),
                trainer_name: class.trainer_name.clone(),
            });
        }
        for entry in manual.iter().filter(|m| m.schedule_date == date) {
            sessions.push(Session {
                session_id: entry.id.clone(),
                kind: SessionKind::Manual,
                name: entry.name.clone(),
                date,
                starts_at: NaiveDateTime::new(date, entry.start_time),
                duration_min: entry.duration_min,
                capacity: entry.capacity,
                booked: counter.booked_spots(&entry.id, date),
                available: counter.available_spots(&entry.id, date, entry.capacity),
                trainer_id: entry.trainer_id.clone(),
                trainer_name: entry.trainer_name.clone(),
            });
        }
    }
    sessions.sort_by(|a, b| {
        a.starts_at
            .cmp(&b.starts_at)
            .then(a.name.cmp(&b.name))
            .then(a.session_id.cmp(&b.session_id))
    });
    sessions
}
