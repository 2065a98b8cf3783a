use chrono::Utc;
use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::assignment::db::AssignmentDbExt;
use crate::data::assignment::{Assignment, AssignmentData, FeedbackData, Submission, SubmissionData};
use crate::data::batch::db::BatchDbExt;
use crate::data::batch::Batch;
use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};

async fn with_batch(db: &Database, id: Uuid) -> Result<(Assignment, Batch), Problem> {
    let assignment = db.require_assignment(id).await?;
    let batch = db.require_batch(assignment.batch).await?;
    Ok((assignment, batch))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Assignments of the batch by due date", body = Vec<Assignment>),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/batches/<id>/assignments")]
#[tracing::instrument(skip(db))]
pub async fn assignment_list(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Vec<Assignment>>, Problem> {
    let batch = db.require_batch(id).await?;
    batch.require_view(&auth)?;
    let manages = batch.can_manage(&auth);

    let assignments = db.list_assignments(id).await?;
    Ok(Json(
        assignments
            .into_iter()
            .map(|it| it.view_for(&auth, manages))
            .collect(),
    ))
}

#[utoipa::path(
    request_body = AssignmentData,
    responses(
        (status = 201, description = "Created assignment", body = Assignment),
        (status = 400, description = "Invalid assignment", body = Problem),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such batch", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/batches/<id>/assignments", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn assignment_create(
    id: Uuid,
    data: Json<AssignmentData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<(Status, Json<Assignment>), Problem> {
    db.require_batch(id).await?.require_manage(&auth)?;

    let assignment = data.into_inner().into_assignment(id, auth.user)?;
    db.create_assignment(&assignment).await?;
    Ok((Status::Created, Json(assignment)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Assignment", body = Assignment),
        (status = 401, description = "Not a member of the batch", body = Problem),
        (status = 404, description = "No such assignment", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/assignments/<id>")]
#[tracing::instrument(skip(db))]
pub async fn assignment_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Assignment>, Problem> {
    let (assignment, batch) = with_batch(db, id).await?;
    batch.require_view(&auth)?;
    Ok(Json(assignment.view_for(&auth, batch.can_manage(&auth))))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted assignment", body = Assignment),
        (status = 401, description = "Not the batch teacher or an admin", body = Problem),
        (status = 404, description = "No such assignment", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/assignments/<id>")]
#[tracing::instrument(skip(db))]
pub async fn assignment_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Assignment>, Problem> {
    let (_, batch) = with_batch(db, id).await?;
    batch.require_manage(&auth)?;

    db.delete_assignment(id)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Assignment", id))
}

/// Submit work. Submitting again replaces the earlier submission but keeps
/// its feedback; submissions after the due date are flagged late.
#[utoipa::path(
    request_body = SubmissionData,
    responses(
        (status = 200, description = "Stored submission", body = Submission),
        (status = 400, description = "Empty submission", body = Problem),
        (status = 401, description = "Not enrolled in the batch", body = Problem),
        (status = 404, description = "No such assignment", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/assignments/<id>/submissions", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn submission_create(
    id: Uuid,
    data: Json<SubmissionData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Submission>, Problem> {
    let (assignment, batch) = with_batch(db, id).await?;
    if !batch.is_student(auth.user) {
        return Err(auth_problem("Not authorized: only enrolled students can submit."));
    }

    let submission = assignment.resubmit(auth.user, data.into_inner(), Utc::now())?;
    let stored = db
        .put_submission(id, &submission)
        .await?
        .and_then(|it| it.submission(auth.user).cloned())
        .ok_or_else(|| problems::not_found("Assignment", id))?;
    tracing::info!("Student {} submitted assignment {}.", auth.user, id);

    Ok(Json(stored))
}

/// Comment on a submission. Staff may grade; the submitting student may reply.
#[utoipa::path(
    request_body = FeedbackData,
    responses(
        (status = 200, description = "Submission with the new feedback", body = Submission),
        (status = 400, description = "Empty feedback", body = Problem),
        (status = 401, description = "Not allowed to comment or grade", body = Problem),
        (status = 404, description = "No such assignment or submission", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/assignments/<id>/submissions/<student>/feedback", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn feedback_create(
    id: Uuid,
    student: Uuid,
    data: Json<FeedbackData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Submission>, Problem> {
    let (assignment, batch) = with_batch(db, id).await?;
    batch.require_view(&auth)?;
    if assignment.submission(student).is_none() {
        return Err(problems::not_found("Submission", student));
    }

    let feedback = data
        .into_inner()
        .into_feedback(&auth, batch.can_manage(&auth), student)?;

    db.add_feedback(id, student, &feedback)
        .await?
        .and_then(|it| it.submission(student).cloned())
        .map(Json)
        .ok_or_else(|| problems::not_found("Submission", student))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use uuid::Uuid;

    use crate::route::test_client;

    #[rocket::async_test]
    async fn assignment_routes_need_a_session() {
        let client = test_client().await;

        let list = client
            .get(format!("/api/batches/{}/assignments", Uuid::new_v4()))
            .dispatch()
            .await;
        assert_eq!(list.status(), Status::Unauthorized);

        let submit = client
            .post(format!("/api/assignments/{}/submissions", Uuid::new_v4()))
            .header(ContentType::JSON)
            .body(r#"{"content":"take 1"}"#)
            .dispatch()
            .await;
        assert_eq!(submit.status(), Status::Unauthorized);
    }
}
