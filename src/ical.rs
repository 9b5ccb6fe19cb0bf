use chrono::Duration;
use icalendar::{Calendar, Component, Event, EventLike};

use crate::models::Session;

#[derive(Clone)]
pub struct ICalExporter {
    gym_title: String,
    location: String,
}

impl ICalExporter {
    pub fn new(gym_title: impl Into<String>, location: impl Into<String>) -> Self {
        Self {
            gym_title: gym_title.into(),
            location: location.into(),
        }
    }

    pub fn generate(&self, sessions: &[Session]) -> Vec<u8> {
        if sessions.is_empty() {
            return Vec::new();
        }

        let mut calendar = Calendar::new();
        calendar.name(&format!("{} schedule", self.gym_title));

        for session in sessions {
            let start = session.starts_at;
            let end = start + Duration::minutes(i64::from(session.duration_min));

            let mut description = format!(
                "Spots left: {} of {}",
                session.available, session.capacity
            );
            if let Some(trainer) = &session.trainer_name {
                description.push_str(&format!("\nTrainer: {trainer}"));
            }

            let mut event = Event::new();
            event.summary(&session.name);
            event.starts(start);
            event.ends(end);
            event.location(&self.location);
            event.description(&description);
            event.uid(&format!(
                "{}-{}-ringside",
                session.session_id,
                start.format("%Y%m%dT%H%M%S")
            ));
            calendar.push(event);
        }

        calendar.to_string().into_bytes()
    }
}
