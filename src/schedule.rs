//! Weekly schedule expansion.
//!
//! A batch runs on a set of weekly [`ScheduleEntry`] rules between its start
//! and end date. [`SessionCalendar`] turns those rules into concrete
//! [`Session`]s, drops the ones overridden by a cancellation and classifies the
//! rest against the current time. Every listing, "next session" lookup and
//! attendance/cancellation check goes through this module.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("session on {day} must end after it starts ({start} - {end})")]
    EndsBeforeStart {
        day: Weekday,
        start: NaiveTime,
        end: NaiveTime,
    },
    #[error("end date {end} is before start date {start}")]
    InvertedWindow { start: NaiveDate, end: NaiveDate },
    #[error("date range can't span more than {max} days")]
    WindowTooLong { max: i64 },
}

/// One weekly recurrence rule: every `day`, from `start_time` to `end_time`,
/// in the calendar's timezone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
pub struct ScheduleEntry {
    #[schema(value_type = String, example = "Mon")]
    pub day: Weekday,
    #[schema(value_type = String, example = "18:30")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "19:30")]
    pub end_time: NaiveTime,
}

impl ScheduleEntry {
    pub fn new(day: Weekday, start_time: NaiveTime, end_time: NaiveTime) -> ScheduleEntry {
        ScheduleEntry {
            day,
            start_time,
            end_time,
        }
    }

    pub fn validate(&self) -> Result<(), ScheduleError> {
        if self.end_time <= self.start_time {
            return Err(ScheduleError::EndsBeforeStart {
                day: self.day,
                start: self.start_time,
                end: self.end_time,
            });
        }
        Ok(())
    }

    pub fn validate_all(entries: &[ScheduleEntry]) -> Result<(), ScheduleError> {
        entries.iter().try_for_each(ScheduleEntry::validate)
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub const MAX_QUERY_DAYS: i64 = 400;

    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<DateWindow, ScheduleError> {
        if end < start {
            return Err(ScheduleError::InvertedWindow { start, end });
        }
        Ok(DateWindow { start, end })
    }

    /// Same as [`DateWindow::new`] but also bounds the length, for windows
    /// that come from request parameters.
    pub fn bounded(start: NaiveDate, end: NaiveDate) -> Result<DateWindow, ScheduleError> {
        let window = DateWindow::new(start, end)?;
        if window.len_days() > Self::MAX_QUERY_DAYS {
            return Err(ScheduleError::WindowTooLong {
                max: Self::MAX_QUERY_DAYS,
            });
        }
        Ok(window)
    }

    pub fn len_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn intersect(&self, other: &DateWindow) -> Option<DateWindow> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        (start <= end).then_some(DateWindow { start, end })
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |day| *day <= end)
    }
}

/// Anything that runs on a weekly schedule between two dates.
pub trait Scheduled {
    fn schedule_id(&self) -> Uuid;
    fn schedule(&self) -> &[ScheduleEntry];
    fn active_window(&self) -> DateWindow;
}

/// Time slots suppressed by cancellations, keyed by date and start time.
#[derive(Debug, Clone, Default)]
pub struct CancelledSlots(HashSet<(NaiveDate, NaiveTime)>);

impl CancelledSlots {
    pub fn insert(&mut self, date: NaiveDate, start_time: NaiveTime) {
        self.0.insert((date, start_time));
    }

    pub fn contains(&self, date: NaiveDate, start_time: NaiveTime) -> bool {
        self.0.contains(&(date, start_time))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(NaiveDate, NaiveTime)> for CancelledSlots {
    fn from_iter<T: IntoIterator<Item = (NaiveDate, NaiveTime)>>(iter: T) -> Self {
        CancelledSlots(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Occurrence {
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Upcoming,
    Joinable,
    Active,
    Ended,
}

impl SessionStatus {
    pub fn can_join(self) -> bool {
        matches!(self, SessionStatus::Joinable | SessionStatus::Active)
    }

    pub fn is_ended(self) -> bool {
        self == SessionStatus::Ended
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Session {
    pub batch: Uuid,
    #[schema(value_type = String, format = Date)]
    pub date: NaiveDate,
    #[schema(value_type = String, example = "18:30")]
    pub start_time: NaiveTime,
    #[schema(value_type = String, example = "19:30")]
    pub end_time: NaiveTime,
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
    pub status: SessionStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct SessionCalendar {
    offset: FixedOffset,
    join_window: Duration,
}

impl Default for SessionCalendar {
    fn default() -> Self {
        SessionCalendar {
            offset: FixedOffset::east_opt(0).expect("zero offset is valid"),
            join_window: Duration::minutes(10),
        }
    }
}

impl SessionCalendar {
    pub fn new(offset: FixedOffset, join_window: Duration) -> SessionCalendar {
        SessionCalendar {
            offset,
            join_window,
        }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    pub fn join_window(&self) -> Duration {
        self.join_window
    }

    /// Calendar day `now` falls on in the schedule's timezone.
    pub fn today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.offset).date_naive()
    }

    pub fn instant(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        // fixed offsets never produce ambiguous local times
        let local = date.and_time(time) - Duration::seconds(self.offset.local_minus_utc().into());
        Utc.from_utc_datetime(&local)
    }

    /// Concrete occurrences of `schedule` on days inside both windows, ordered
    /// by start. Duplicate rules (same day and start) produce one occurrence.
    pub fn occurrences(
        &self,
        schedule: &[ScheduleEntry],
        active: &DateWindow,
        query: &DateWindow,
    ) -> Vec<Occurrence> {
        let window = match active.intersect(query) {
            Some(it) => it,
            None => return vec![],
        };

        let mut result = Vec::new();
        let mut seen = HashSet::new();
        for date in window.days() {
            let weekday = date.weekday();
            for entry in schedule.iter().filter(|it| it.day == weekday) {
                if seen.insert((date, entry.start_time)) {
                    result.push(Occurrence {
                        date,
                        start_time: entry.start_time,
                        end_time: entry.end_time,
                    });
                }
            }
        }

        result.sort();
        result
    }

    pub fn classify(
        &self,
        starts_at: DateTime<Utc>,
        ends_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SessionStatus {
        if now >= ends_at {
            SessionStatus::Ended
        } else if now >= starts_at {
            SessionStatus::Active
        } else if now >= starts_at - self.join_window {
            SessionStatus::Joinable
        } else {
            SessionStatus::Upcoming
        }
    }

    fn session(&self, batch: Uuid, occurrence: Occurrence, now: DateTime<Utc>) -> Session {
        let starts_at = self.instant(occurrence.date, occurrence.start_time);
        let ends_at = self.instant(occurrence.date, occurrence.end_time);
        Session {
            batch,
            date: occurrence.date,
            start_time: occurrence.start_time,
            end_time: occurrence.end_time,
            starts_at,
            ends_at,
            status: self.classify(starts_at, ends_at, now),
        }
    }

    /// All non-cancelled sessions of `batch` inside `query`, classified
    /// against `now`.
    pub fn sessions<B: Scheduled + ?Sized>(
        &self,
        batch: &B,
        query: &DateWindow,
        cancelled: &CancelledSlots,
        now: DateTime<Utc>,
    ) -> Vec<Session> {
        self.occurrences(batch.schedule(), &batch.active_window(), query)
            .into_iter()
            .filter(|it| !cancelled.contains(it.date, it.start_time))
            .map(|it| self.session(batch.schedule_id(), it, now))
            .collect()
    }

    /// Sessions in `query` that haven't ended yet, including today's sessions
    /// that are still running.
    pub fn upcoming<B: Scheduled + ?Sized>(
        &self,
        batch: &B,
        query: &DateWindow,
        cancelled: &CancelledSlots,
        now: DateTime<Utc>,
    ) -> Vec<Session> {
        let mut sessions = self.sessions(batch, query, cancelled, now);
        sessions.retain(|it| !it.status.is_ended());
        sessions
    }

    /// Ended sessions in `query`, most recent first.
    pub fn history<B: Scheduled + ?Sized>(
        &self,
        batch: &B,
        query: &DateWindow,
        cancelled: &CancelledSlots,
        now: DateTime<Utc>,
    ) -> Vec<Session> {
        let mut sessions = self.sessions(batch, query, cancelled, now);
        sessions.retain(|it| it.status.is_ended());
        sessions.reverse();
        sessions
    }

    /// Earliest non-cancelled session that hasn't ended at `now`. A session
    /// that is already running counts as the next one.
    pub fn next_session<B: Scheduled + ?Sized>(
        &self,
        batch: &B,
        cancelled: &CancelledSlots,
        now: DateTime<Utc>,
    ) -> Option<Session> {
        let active = batch.active_window();
        let today = self.today(now);
        if active.end < today || batch.schedule().is_empty() {
            return None;
        }

        // a week past the latest start covers every rule at least once
        let mut from = today.max(active.start);
        while from <= active.end {
            let to = from
                .checked_add_signed(Duration::days(6))
                .map_or(active.end, |it| it.min(active.end));
            let query = DateWindow { start: from, end: to };
            if let Some(next) = self
                .sessions(batch, &query, cancelled, now)
                .into_iter()
                .find(|it| !it.status.is_ended())
            {
                return Some(next);
            }
            from = match to.succ_opt() {
                Some(it) => it,
                None => break,
            };
        }

        None
    }

    /// Whether `date` at `start_time` is a scheduled occurrence of `batch`.
    /// Cancellations aren't considered.
    pub fn is_occurrence<B: Scheduled + ?Sized>(
        &self,
        batch: &B,
        date: NaiveDate,
        start_time: NaiveTime,
    ) -> Option<Occurrence> {
        let day = DateWindow {
            start: date,
            end: date,
        };
        self.occurrences(batch.schedule(), &batch.active_window(), &day)
            .into_iter()
            .find(|it| it.start_time == start_time)
    }
}

/// Merges per-batch session lists into one list ordered by start time.
pub fn merge_sorted(mut sessions: Vec<Session>, newest_first: bool) -> Vec<Session> {
    sessions.sort_by(|a, b| a.starts_at.cmp(&b.starts_at).then(a.batch.cmp(&b.batch)));
    if newest_first {
        sessions.reverse();
    }
    sessions
}
