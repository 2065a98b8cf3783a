use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::resp::problem::{problems, Problem};
use crate::schedule::{CancelledSlots, Occurrence};

pub mod db;

/// A single scheduled session that won't take place.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CancelledSession {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    #[serde(with = "crate::data::uuid_str")]
    pub batch: Uuid,
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "18:30")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "19:30")]
    pub end_time: NaiveTime,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(with = "crate::data::uuid_str")]
    pub cancelled_by: Uuid,
    pub created: DateTime<Utc>,
}

impl CancelledSession {
    pub fn new(batch: Uuid, occurrence: Occurrence, reason: Option<String>, cancelled_by: Uuid) -> Self {
        CancelledSession {
            id: Uuid::new_v4(),
            batch,
            date: occurrence.date,
            start_time: occurrence.start_time,
            end_time: occurrence.end_time,
            reason: reason
                .map(|it| it.trim().to_string())
                .filter(|it| !it.is_empty()),
            cancelled_by,
            created: Utc::now(),
        }
    }
}

pub fn to_slots<'a>(cancellations: impl IntoIterator<Item = &'a CancelledSession>) -> CancelledSlots {
    cancellations
        .into_iter()
        .map(|it| (it.date, it.start_time))
        .collect()
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CancellationData {
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "18:30")]
    pub start_time: NaiveTime,
    #[serde(default)]
    pub reason: Option<String>,
}

pub mod problem {
    use super::*;

    pub fn not_scheduled(date: NaiveDate, start_time: NaiveTime) -> Problem {
        problems::bad_request(
            "Not a scheduled session.",
            format!("Batch has no session on {} at {}.", date, start_time.format("%H:%M")),
        )
    }

    pub fn already_cancelled() -> Problem {
        problems::bad_request(
            "Session already cancelled.",
            "A cancellation for this session already exists.",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_trims_empty_reason() {
        let occurrence = Occurrence {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        let blank = CancelledSession::new(Uuid::new_v4(), occurrence, Some("  ".into()), Uuid::new_v4());
        assert_eq!(blank.reason, None);

        let sick = CancelledSession::new(Uuid::new_v4(), occurrence, Some(" sick ".into()), Uuid::new_v4());
        assert_eq!(sick.reason.as_deref(), Some("sick"));
        assert_eq!(sick.end_time, occurrence.end_time);
    }

    #[test]
    fn slots_cover_cancelled_starts() {
        let occurrence = Occurrence {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            start_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            end_time: NaiveTime::from_hms_opt(18, 0, 0).unwrap(),
        };
        let cancelled = [CancelledSession::new(Uuid::new_v4(), occurrence, None, Uuid::new_v4())];
        let slots = to_slots(&cancelled);

        assert!(slots.contains(occurrence.date, occurrence.start_time));
        assert!(!slots.contains(occurrence.date, occurrence.end_time));
    }
}
