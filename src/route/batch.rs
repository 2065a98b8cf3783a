use chrono::Utc;
use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::batch::db::{BatchDbExt, BatchScope, Enrollment};
use crate::data::batch::{
    AttendanceData, AttendanceRecord, Batch, BatchData, BatchUpdate, EnrollData, LectureData,
    MeetingLinkData, NoteData,
};
use crate::data::catalog::db::CatalogDbExt;
use crate::data::session::db::CancellationDbExt;
use crate::data::session::problem as session_problem;
use crate::data::user::db::UserDbExt;
use crate::data::user::problem as user_problem;
use crate::middleware::paging::PageState;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::schedule::SessionCalendar;

pub(crate) fn scope_for(auth: &UserRoleToken) -> BatchScope {
    match auth.role {
        Role::Admin => BatchScope::All,
        Role::Teacher => BatchScope::Teacher(auth.user),
        Role::Student => BatchScope::Student(auth.user),
    }
}

async fn check_teacher(db: &Database, teacher: Option<Uuid>) -> Result<(), Problem> {
    let Some(id) = teacher else {
        return Ok(());
    };
    let user = db
        .get_user(id)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;
    if !user.role.can_teach() {
        return Err(problems::bad_request(
            "Bad teacher.",
            format!("User {} can't teach batches.", id),
        ));
    }
    Ok(())
}

/// Batches visible to the caller: all for admins, taught ones for teachers,
/// enrolled ones for students.
#[utoipa::path(
    params(
        ("page" = Option<u32>, Query, description = "Page number"),
        ("len" = Option<u32>, Query, description = "Page length"),
    ),
    responses(
        (status = 200, description = "Batches, latest start first", body = Vec<Batch>),
        (status = 401, description = "Not signed in", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches")]
#[tracing::instrument(skip(db))]
pub async fn batch_list(
    auth: UserRoleToken,
    page: PageState,
    db: &State<Database>,
) -> Result<Json<Vec<Batch>>, Problem> {
    let batches = db.list_batches(scope_for(&auth), page).await?;
    Ok(Json(batches.into_iter().map(|it| it.view_for(&auth)).collect()))
}

/// Create a batch for a level. Dates and schedule default from the level.
#[utoipa::path(
    request_body = BatchData,
    responses(
        (status = 201, description = "Created batch", body = Batch),
        (status = 400, description = "Invalid batch", body = Problem),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such level or teacher", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_create(
    data: Json<BatchData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<(Status, Json<Batch>), Problem> {
    auth.require_admin()?;

    let level = db.require_level(data.level).await?;
    check_teacher(db, data.teacher).await?;

    let batch = data.into_inner().into_batch(&level)?;
    db.create_batch(&batch).await?;
    tracing::info!("Created batch {} for level {}.", batch.id, level.id);

    Ok((Status::Created, Json(batch)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Batch", body = Batch),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches/<id>")]
#[tracing::instrument(skip(db))]
pub async fn batch_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    let batch = db.require_batch(id).await?;
    batch.require_view(&auth)?;
    Ok(Json(batch.view_for(&auth)))
}

#[utoipa::path(
    request_body = BatchUpdate,
    responses(
        (status = 200, description = "Updated batch", body = Batch),
        (status = 400, description = "Invalid changes", body = Problem),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/batches/<id>", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_update(
    id: Uuid,
    data: Json<BatchUpdate>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    auth.require_admin()?;

    let mut batch = db.require_batch(id).await?;
    check_teacher(db, data.teacher.flatten()).await?;
    data.into_inner().apply(&mut batch)?;

    db.update_batch_settings(&batch)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Batch", id))
}

/// Delete a batch with its cancellations and assignments.
#[utoipa::path(
    responses(
        (status = 200, description = "Deleted batch", body = Batch),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/batches/<id>")]
#[tracing::instrument(skip(db))]
pub async fn batch_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    auth.require_admin()?;

    db.delete_batch(id)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Batch", id))
}

/// Enroll a student. Enrolling an already enrolled student changes nothing.
#[utoipa::path(
    request_body = EnrollData,
    responses(
        (status = 200, description = "Batch with the student enrolled", body = Batch),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such batch or student", body = Problem),
        (status = 409, description = "Batch is full", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches/<id>/students", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_enroll(
    id: Uuid,
    data: Json<EnrollData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    auth.require_admin()?;

    let student = db
        .get_user(data.student)
        .await?
        .ok_or_else(|| user_problem::not_found(data.student))?;
    db.require_batch(id).await?;

    match db.enroll_student(id, student.id).await? {
        Enrollment::Enrolled(batch) | Enrollment::AlreadyEnrolled(batch) => Ok(Json(batch)),
        Enrollment::Full => Err(problems::conflict("Batch is full.")),
    }
}

#[utoipa::path(
    responses(
        (status = 200, description = "Batch without the student", body = Batch),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/batches/<id>/students/<student>")]
#[tracing::instrument(skip(db))]
pub async fn batch_remove_student(
    id: Uuid,
    student: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    auth.require_admin()?;

    db.remove_student(id, student)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Batch", id))
}

#[utoipa::path(
    request_body = NoteData,
    responses(
        (status = 200, description = "Batch with the note", body = Batch),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches/<id>/notes", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_add_note(
    id: Uuid,
    data: Json<NoteData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    db.require_batch(id).await?.require_manage(&auth)?;
    let note = data.into_inner().into_note(auth.user)?;

    db.add_note(id, &note)
        .await?
        .map(|it| Json(it.view_for(&auth)))
        .ok_or_else(|| problems::not_found("Batch", id))
}

#[utoipa::path(
    request_body = LectureData,
    responses(
        (status = 200, description = "Batch with the lecture", body = Batch),
        (status = 400, description = "Invalid lecture", body = Problem),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches/<id>/lectures", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_add_lecture(
    id: Uuid,
    data: Json<LectureData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    db.require_batch(id).await?.require_manage(&auth)?;
    let lecture = data.into_inner().into_lecture()?;

    db.add_lecture(id, &lecture)
        .await?
        .map(|it| Json(it.view_for(&auth)))
        .ok_or_else(|| problems::not_found("Batch", id))
}

/// Set or clear (empty link) the online meeting link.
#[utoipa::path(
    request_body = MeetingLinkData,
    responses(
        (status = 200, description = "Updated batch", body = Batch),
        (status = 400, description = "Invalid link", body = Problem),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/batches/<id>/meeting-link", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn batch_set_meeting_link(
    id: Uuid,
    data: Json<MeetingLinkData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Batch>, Problem> {
    db.require_batch(id).await?.require_manage(&auth)?;
    let link = data.into_inner().validated()?;

    db.set_meeting_link(id, link)
        .await?
        .map(|it| Json(it.view_for(&auth)))
        .ok_or_else(|| problems::not_found("Batch", id))
}

/// Attendance records of the batch. Students only see their own entries.
#[utoipa::path(
    responses(
        (status = 200, description = "Attendance records", body = Vec<AttendanceRecord>),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches/<id>/attendance")]
#[tracing::instrument(skip(db))]
pub async fn attendance_list(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<AttendanceRecord>>, Problem> {
    let batch = db.require_batch(id).await?;
    batch.require_view(&auth)?;

    let mut records = batch.view_for(&auth).attendance;
    records.sort_by(|a, b| (b.date, b.start_time).cmp(&(a.date, a.start_time)));
    Ok(Json(records))
}

/// Record attendance of one session. The session must be scheduled, not
/// cancelled and already started. Recording again replaces the record.
#[utoipa::path(
    request_body = AttendanceData,
    responses(
        (status = 200, description = "Stored record", body = AttendanceRecord),
        (status = 400, description = "Not a held session or unknown students", body = Problem),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches/<id>/attendance", data = "<data>")]
#[tracing::instrument(skip(db, calendar))]
pub async fn attendance_record(
    id: Uuid,
    data: Json<AttendanceData>,
    auth: UserRoleToken,
    db: &State<Database>,
    calendar: &State<SessionCalendar>,
) -> Result<Json<AttendanceRecord>, Problem> {
    let batch = db.require_batch(id).await?;
    batch.require_manage(&auth)?;

    let occurrence = calendar
        .is_occurrence(&batch, data.date, data.start_time)
        .ok_or_else(|| session_problem::not_scheduled(data.date, data.start_time))?;
    if db
        .cancelled_slots(id)
        .await?
        .contains(occurrence.date, occurrence.start_time)
    {
        return Err(problems::bad_request(
            "Session was cancelled.",
            "Attendance can't be recorded for a cancelled session.",
        ));
    }
    if calendar.instant(occurrence.date, occurrence.start_time) > Utc::now() {
        return Err(problems::bad_request(
            "Session hasn't started.",
            "Attendance can be recorded once the session starts.",
        ));
    }

    let record = data.into_inner().into_record(&batch, auth.user)?;
    db.record_attendance(id, &record)
        .await?
        .ok_or_else(|| problems::not_found("Batch", id))?;
    tracing::info!(
        "Recorded attendance of batch {} for {} {}.",
        id,
        record.date,
        record.start_time
    );

    Ok(Json(record))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use uuid::Uuid;

    use super::scope_for;
    use crate::data::batch::db::BatchScope;
    use crate::resp::jwt::UserRoleToken;
    use crate::role::Role;
    use crate::route::{test_client, test_cookie};

    #[test]
    fn listing_scope_follows_role() {
        let id = Uuid::new_v4();
        assert_eq!(scope_for(&UserRoleToken::for_user(id, Role::Admin)), BatchScope::All);
        assert_eq!(
            scope_for(&UserRoleToken::for_user(id, Role::Teacher)),
            BatchScope::Teacher(id)
        );
        assert_eq!(
            scope_for(&UserRoleToken::for_user(id, Role::Student)),
            BatchScope::Student(id)
        );
    }

    #[rocket::async_test]
    async fn batch_admin_routes_reject_others() {
        let client = test_client().await;
        let (_, teacher) = test_cookie(Role::Teacher);
        let batch = Uuid::new_v4();

        let create = client
            .post("/api/batches")
            .header(ContentType::JSON)
            .body(format!(
                r#"{{"name":"Evening","level":"{}","start_date":"2024-03-04"}}"#,
                Uuid::new_v4()
            ))
            .cookie(teacher.clone())
            .dispatch()
            .await;
        assert_eq!(create.status(), Status::Unauthorized);

        let enroll = client
            .post(format!("/api/batches/{}/students", batch))
            .header(ContentType::JSON)
            .body(format!(r#"{{"student":"{}"}}"#, Uuid::new_v4()))
            .cookie(teacher.clone())
            .dispatch()
            .await;
        assert_eq!(enroll.status(), Status::Unauthorized);

        let delete = client
            .delete(format!("/api/batches/{}", batch))
            .cookie(teacher)
            .dispatch()
            .await;
        assert_eq!(delete.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn batches_need_a_session() {
        let client = test_client().await;
        let response = client.get("/api/batches").dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}
