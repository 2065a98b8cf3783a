use chrono::{DateTime, Duration, NaiveDate, Utc};
use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::data::batch::db::BatchDbExt;
use crate::data::batch::Batch;
use crate::data::session::db::CancellationDbExt;
use crate::data::session::{problem as session_problem, CancellationData, CancelledSession};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::route::batch::scope_for;
use crate::schedule::{merge_sorted, CancelledSlots, DateWindow, Session, SessionCalendar};

const DEFAULT_AHEAD_DAYS: i64 = 30;
const DEFAULT_HISTORY_DAYS: i64 = 30;

/// A session together with what the caller needs to attend it.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionInfo {
    #[serde(flatten)]
    pub session: Session,
    pub batch_name: String,
    pub can_join: bool,
    /// Only present while the session can be joined.
    pub meeting_link: Option<String>,
}

impl SessionInfo {
    fn new(session: Session, batch: &Batch) -> SessionInfo {
        let can_join = session.status.can_join();
        SessionInfo {
            batch_name: batch.name.clone(),
            can_join,
            meeting_link: batch.meeting_link.clone().filter(|_| can_join),
            session,
        }
    }
}

fn parse_date(name: &str, value: &str) -> Result<NaiveDate, Problem> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        problems::bad_request(
            "Bad date range.",
            format!("'{}' must be a YYYY-MM-DD date, got '{}'.", name, value),
        )
    })
}

/// Window from the optional `from`/`to` query values, defaulting either end.
fn query_window(
    from: Option<&str>,
    to: Option<&str>,
    default_from: NaiveDate,
    default_to: NaiveDate,
) -> Result<DateWindow, Problem> {
    let start = from.map(|it| parse_date("from", it)).transpose()?;
    let end = to.map(|it| parse_date("to", it)).transpose()?;

    let (start, end) = match (start, end) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start.max(default_to)),
        (None, Some(end)) => (default_from.min(end), end),
        (None, None) => (default_from, default_to),
    };

    DateWindow::bounded(start, end).map_err(|e| problems::bad_request("Bad date range.", e))
}

fn slots_of<'a>(
    slots: &'a std::collections::HashMap<Uuid, CancelledSlots>,
    batch: Uuid,
    empty: &'a CancelledSlots,
) -> &'a CancelledSlots {
    slots.get(&batch).unwrap_or(empty)
}

fn upcoming_of(
    calendar: &SessionCalendar,
    batch: &Batch,
    window: &DateWindow,
    cancelled: &CancelledSlots,
    now: DateTime<Utc>,
) -> Vec<SessionInfo> {
    calendar
        .upcoming(batch, window, cancelled, now)
        .into_iter()
        .map(|it| SessionInfo::new(it, batch))
        .collect()
}

/// Sessions of a batch in a date range that haven't ended, cancelled ones
/// left out. Past sessions are listed by the history endpoint.
#[utoipa::path(
    params(
        ("from" = Option<String>, Query, description = "First day (YYYY-MM-DD), defaults to today"),
        ("to" = Option<String>, Query, description = "Last day (YYYY-MM-DD), defaults to 30 days ahead"),
    ),
    responses(
        (status = 200, description = "Sessions that haven't ended, ordered by start", body = Vec<SessionInfo>),
        (status = 400, description = "Bad date range", body = Problem),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches/<id>/sessions?<from>&<to>")]
#[tracing::instrument(skip(db, calendar))]
pub async fn batch_sessions(
    id: Uuid,
    from: Option<&str>,
    to: Option<&str>,
    auth: UserRoleToken,
    db: &State<Database>,
    calendar: &State<SessionCalendar>,
) -> Result<Json<Vec<SessionInfo>>, Problem> {
    let now = Utc::now();
    let today = calendar.today(now);
    let window = query_window(from, to, today, today + Duration::days(DEFAULT_AHEAD_DAYS))?;

    let batch = db.require_batch(id).await?;
    batch.require_view(&auth)?;
    let cancelled = db.cancelled_slots(id).await?;

    Ok(Json(upcoming_of(calendar, &batch, &window, &cancelled, now)))
}

/// The earliest session of the batch that hasn't ended. A running session
/// counts as next.
#[utoipa::path(
    responses(
        (status = 200, description = "Next session", body = SessionInfo),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such batch or no sessions left", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches/<id>/sessions/next")]
#[tracing::instrument(skip(db, calendar))]
pub async fn batch_next_session(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
    calendar: &State<SessionCalendar>,
) -> Result<Json<SessionInfo>, Problem> {
    let batch = db.require_batch(id).await?;
    batch.require_view(&auth)?;
    let cancelled = db.cancelled_slots(id).await?;

    calendar
        .next_session(&batch, &cancelled, Utc::now())
        .map(|it| Json(SessionInfo::new(it, &batch)))
        .ok_or_else(|| Problem::new_untyped(Status::NotFound, "No upcoming session."))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Cancelled sessions, by date", body = Vec<CancelledSession>),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches/<id>/cancellations")]
#[tracing::instrument(skip(db))]
pub async fn cancellation_list(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<CancelledSession>>, Problem> {
    db.require_batch(id).await?.require_view(&auth)?;
    Ok(Json(db.list_cancellations(id, None).await?))
}

/// Cancel one scheduled session.
#[utoipa::path(
    request_body = CancellationData,
    responses(
        (status = 201, description = "Cancellation", body = CancelledSession),
        (status = 400, description = "Not a scheduled session or already cancelled", body = Problem),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches/<id>/cancellations", data = "<data>")]
#[tracing::instrument(skip(db, calendar))]
pub async fn cancellation_create(
    id: Uuid,
    data: Json<CancellationData>,
    auth: UserRoleToken,
    db: &State<Database>,
    calendar: &State<SessionCalendar>,
) -> Result<(Status, Json<CancelledSession>), Problem> {
    let batch = db.require_batch(id).await?;
    batch.require_manage(&auth)?;

    let data = data.into_inner();
    let occurrence = calendar
        .is_occurrence(&batch, data.date, data.start_time)
        .ok_or_else(|| session_problem::not_scheduled(data.date, data.start_time))?;

    let cancellation = CancelledSession::new(id, occurrence, data.reason, auth.user);
    db.create_cancellation(&cancellation).await?;
    tracing::info!(
        "Cancelled session of batch {} on {} at {}.",
        id,
        cancellation.date,
        cancellation.start_time
    );

    Ok((Status::Created, Json(cancellation)))
}

/// Restore a cancelled session.
#[utoipa::path(
    responses(
        (status = 200, description = "Removed cancellation", body = CancelledSession),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch or cancellation", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/batches/<id>/cancellations/<cancellation>")]
#[tracing::instrument(skip(db))]
pub async fn cancellation_delete(
    id: Uuid,
    cancellation: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<CancelledSession>, Problem> {
    db.require_batch(id).await?.require_manage(&auth)?;

    db.delete_cancellation(id, cancellation)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Cancellation", cancellation))
}

async fn scoped_batches(
    db: &Database,
    auth: &UserRoleToken,
    window: &DateWindow,
) -> Result<(Vec<Batch>, std::collections::HashMap<Uuid, CancelledSlots>), Problem> {
    let batches = db.list_batches_in_window(scope_for(auth), window).await?;
    let ids: Vec<Uuid> = batches.iter().map(|it| it.id).collect();
    let slots = db.cancelled_slots_for(&ids).await?;
    Ok((batches, slots))
}

/// Sessions that haven't ended across the caller's batches: every batch for
/// admins, taught batches for teachers, enrolled batches for students.
#[utoipa::path(
    params(
        ("from" = Option<String>, Query, description = "First day (YYYY-MM-DD), defaults to today"),
        ("to" = Option<String>, Query, description = "Last day (YYYY-MM-DD), defaults to 30 days ahead"),
    ),
    responses(
        (status = 200, description = "Sessions ordered by start", body = Vec<SessionInfo>),
        (status = 400, description = "Bad date range", body = Problem),
        (status = 401, description = "Not signed in", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/schedule?<from>&<to>")]
#[tracing::instrument(skip(db, calendar))]
pub async fn schedule_upcoming(
    from: Option<&str>,
    to: Option<&str>,
    auth: UserRoleToken,
    db: &State<Database>,
    calendar: &State<SessionCalendar>,
) -> Result<Json<Vec<SessionInfo>>, Problem> {
    let now = Utc::now();
    let today = calendar.today(now);
    let window = query_window(from, to, today, today + Duration::days(DEFAULT_AHEAD_DAYS))?;

    let (batches, slots) = scoped_batches(db, &auth, &window).await?;
    let empty = CancelledSlots::default();

    let sessions: Vec<Session> = batches
        .iter()
        .flat_map(|batch| calendar.upcoming(batch, &window, slots_of(&slots, batch.id, &empty), now))
        .collect();

    Ok(Json(with_batches(merge_sorted(sessions, false), &batches)))
}

/// Ended sessions across the caller's batches, most recent first.
#[utoipa::path(
    params(
        ("from" = Option<String>, Query, description = "First day (YYYY-MM-DD), defaults to 30 days ago"),
        ("to" = Option<String>, Query, description = "Last day (YYYY-MM-DD), defaults to today"),
    ),
    responses(
        (status = 200, description = "Sessions, newest first", body = Vec<SessionInfo>),
        (status = 400, description = "Bad date range", body = Problem),
        (status = 401, description = "Not signed in", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/schedule/history?<from>&<to>")]
#[tracing::instrument(skip(db, calendar))]
pub async fn schedule_history(
    from: Option<&str>,
    to: Option<&str>,
    auth: UserRoleToken,
    db: &State<Database>,
    calendar: &State<SessionCalendar>,
) -> Result<Json<Vec<SessionInfo>>, Problem> {
    let now = Utc::now();
    let today = calendar.today(now);
    let window = query_window(from, to, today - Duration::days(DEFAULT_HISTORY_DAYS), today)?;

    let (batches, slots) = scoped_batches(db, &auth, &window).await?;
    let empty = CancelledSlots::default();

    let sessions: Vec<Session> = batches
        .iter()
        .flat_map(|batch| calendar.history(batch, &window, slots_of(&slots, batch.id, &empty), now))
        .collect();

    Ok(Json(with_batches(merge_sorted(sessions, true), &batches)))
}

fn with_batches(sessions: Vec<Session>, batches: &[Batch]) -> Vec<SessionInfo> {
    sessions
        .into_iter()
        .filter_map(|session| {
            batches
                .iter()
                .find(|it| it.id == session.batch)
                .map(|batch| SessionInfo::new(session, batch))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rocket::http::Status;

    use crate::role::Role;
    use crate::route::{test_client, test_cookie};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn window_defaults_fill_missing_ends() {
        let (a, b) = (date(2024, 3, 1), date(2024, 3, 31));

        assert_eq!(query_window(None, None, a, b).unwrap(), DateWindow { start: a, end: b });
        assert_eq!(
            query_window(Some("2024-03-10"), None, a, b).unwrap(),
            DateWindow { start: date(2024, 3, 10), end: b }
        );
        // a start past the default end yields a single day
        assert_eq!(
            query_window(Some("2024-04-10"), None, a, b).unwrap(),
            DateWindow { start: date(2024, 4, 10), end: date(2024, 4, 10) }
        );
        assert_eq!(
            query_window(None, Some("2024-02-10"), a, b).unwrap(),
            DateWindow { start: date(2024, 2, 10), end: date(2024, 2, 10) }
        );
    }

    #[test]
    fn window_rejects_garbage_and_inversions() {
        let (a, b) = (date(2024, 3, 1), date(2024, 3, 31));

        assert!(query_window(Some("03/10/2024"), None, a, b).is_err());
        assert!(query_window(Some("2024-03-10"), Some("2024-03-01"), a, b).is_err());
        assert!(query_window(Some("2020-01-01"), Some("2024-01-01"), a, b).is_err());
    }

    #[rocket::async_test]
    async fn schedule_rejects_bad_range() {
        let client = test_client().await;
        let (_, student) = test_cookie(Role::Student);

        let response = client
            .get("/api/schedule?from=2024-03-10&to=2024-03-01")
            .cookie(student)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);
    }

    #[rocket::async_test]
    async fn schedule_needs_a_session() {
        let client = test_client().await;
        let response = client.get("/api/schedule/history").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[test]
    fn batch_listing_leaves_out_sessions_ended_today() {
        use chrono::{NaiveTime, TimeZone, Weekday};

        use crate::data::catalog::Level;
        use crate::schedule::ScheduleEntry;

        let time = |h| NaiveTime::from_hms_opt(h, 0, 0).unwrap();
        let level = Level {
            id: Uuid::new_v4(),
            subject: Uuid::new_v4(),
            name: "Piano 2".to_string(),
            description: String::new(),
            price: 80_00,
            currency: "INR".to_string(),
            duration_weeks: 2,
            schedule: vec![
                ScheduleEntry::new(Weekday::Mon, time(9), time(10)),
                ScheduleEntry::new(Weekday::Mon, time(18), time(19)),
            ],
            created: Utc::now(),
        };
        let mut batch = Batch::personal(&level, Uuid::new_v4(), "Leo", date(2024, 3, 4)).unwrap();
        batch.meeting_link = Some("https://meet.example.com/piano".to_string());

        let calendar = SessionCalendar::default();
        let now = Utc.from_utc_datetime(&date(2024, 3, 4).and_time(time(12)));
        let today = DateWindow { start: date(2024, 3, 4), end: date(2024, 3, 4) };

        let listed = upcoming_of(&calendar, &batch, &today, &CancelledSlots::default(), now);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].session.start_time, time(18));
        assert!(!listed[0].session.status.is_ended());
        assert!(!listed[0].can_join);
        assert_eq!(listed[0].meeting_link, None);
        assert_eq!(listed[0].batch_name, "Piano 2 - Leo");
    }
}
