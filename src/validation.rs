use chrono::NaiveDate;

use crate::error::ApiError;
use crate::models::{BookingRequest, ConsentRequest, SessionKind};

/// Drawn signatures arrive as data URLs; anything larger is not a signature.
pub const MAX_SIGNATURE_LEN: usize = 200 * 1024;

pub fn validate_days(value: u16, max: u16) -> Result<u16, ApiError> {
    if (1..=max).contains(&value) {
        Ok(value)
    } else {
        Err(ApiError::BadRequest(format!(
            "days must be between 1 and {max}"
        )))
    }
}

fn non_empty(id: &Option<String>) -> Option<&str> {
    id.as_deref().filter(|s| !s.trim().is_empty())
}

/// The session a booking request targets: exactly one of the two ids.
pub fn booking_target(request: &BookingRequest) -> Result<(SessionKind, &str), ApiError> {
    match (
        non_empty(&request.class_id),
        non_empty(&request.manual_schedule_id),
    ) {
        (Some(id), None) => Ok((SessionKind::Class, id.trim())),
        (None, Some(id)) => Ok((SessionKind::Manual, id.trim())),
        (None, None) => Err(ApiError::BadRequest(
            "class_id or manual_schedule_id is required".into(),
        )),
        (Some(_), Some(_)) => Err(ApiError::BadRequest(
            "provide either class_id or manual_schedule_id, not both".into(),
        )),
    }
}

pub fn validate_booking_date(
    date: NaiveDate,
    today: NaiveDate,
    window_days: u16,
) -> Result<NaiveDate, ApiError> {
    if date < today {
        return Err(ApiError::BadRequest("cannot book a past date".into()));
    }
    if (date - today).num_days() >= i64::from(window_days) {
        return Err(ApiError::BadRequest(format!(
            "bookings open {window_days} days ahead"
        )));
    }
    Ok(date)
}

pub fn validate_consent(request: &ConsentRequest) -> Result<(), ApiError> {
    if request.full_name.trim().is_empty() {
        return Err(ApiError::BadRequest("full_name is required".into()));
    }
    if !request.accepted_terms {
        return Err(ApiError::BadRequest("terms must be accepted".into()));
    }
    let signature = request.signature.trim();
    if signature.is_empty() {
        return Err(ApiError::BadRequest("signature is required".into()));
    }
    if signature.len() > MAX_SIGNATURE_LEN {
        return Err(ApiError::BadRequest("signature is too large".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_validate_days() {
        assert!(validate_days(1, 14).is_ok());
        assert!(validate_days(14, 14).is_ok());
        assert!(validate_days(0, 14).is_err());
        assert!(validate_days(15, 14).is_err());
    }

    #[test]
    fn test_booking_target() {
        let mut request = BookingRequest {
            class_id: Some("A".into()),
            manual_schedule_id: None,
            booking_date: date("2024-05-01"),
        };
        assert_eq!(booking_target(&request).unwrap(), (SessionKind::Class, "A"));

        request.manual_schedule_id = Some("M".into());
        assert!(booking_target(&request).is_err());

        request.class_id = Some("  ".into());
        assert_eq!(booking_target(&request).unwrap(), (SessionKind::Manual, "M"));

        request.manual_schedule_id = None;
        assert!(booking_target(&request).is_err());
    }

    #[test]
    fn test_validate_booking_date() {
        let today = date("2024-05-01");
        assert!(validate_booking_date(today, today, 14).is_ok());
        assert!(validate_booking_date(date("2024-05-14"), today, 14).is_ok());
        assert!(validate_booking_date(date("2024-05-15"), today, 14).is_err());
        assert!(validate_booking_date(date("2024-04-30"), today, 14).is_err());
    }

    #[test]
    fn test_validate_consent() {
        let mut request = ConsentRequest {
            full_name: "Jan Kowalski".into(),
            signature: "Jan Kowalski".into(),
            accepted_terms: true,
        };
        assert!(validate_consent(&request).is_ok());

        request.accepted_terms = false;
        assert!(validate_consent(&request).is_err());

        request.accepted_terms = true;
        request.signature = "x".repeat(MAX_SIGNATURE_LEN + 1);
        assert!(validate_consent(&request).is_err());
    }
}
