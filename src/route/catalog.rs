use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::config::Config;
use crate::data::catalog::db::CatalogDbExt;
use crate::data::catalog::{Level, LevelData, Subject, SubjectData};
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::{problems, Problem};

#[utoipa::path(
    responses(
        (status = 200, description = "All subjects, by name", body = Vec<Subject>),
    )
)]
#[get("/subjects")]
#[tracing::instrument(skip(db))]
pub async fn subject_list(db: &State<Database>) -> Result<Json<Vec<Subject>>, Problem> {
    Ok(Json(db.list_subjects().await?))
}

#[utoipa::path(
    request_body = SubjectData,
    responses(
        (status = 201, description = "Created subject", body = Subject),
        (status = 400, description = "Invalid subject", body = Problem),
        (status = 401, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/subjects", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn subject_create(
    data: Json<SubjectData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<(Status, Json<Subject>), Problem> {
    auth.require_admin()?;
    data.validate()?;

    let subject = data.into_inner().into_subject();
    db.create_subject(&subject).await?;
    Ok((Status::Created, Json(subject)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Subject", body = Subject),
        (status = 404, description = "No such subject", body = Problem),
    )
)]
#[get("/subjects/<id>")]
#[tracing::instrument(skip(db))]
pub async fn subject_get(id: Uuid, db: &State<Database>) -> Result<Json<Subject>, Problem> {
    db.get_subject(id)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Subject", id))
}

#[utoipa::path(
    request_body = SubjectData,
    responses(
        (status = 200, description = "Updated subject", body = Subject),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such subject", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/subjects/<id>", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn subject_update(
    id: Uuid,
    data: Json<SubjectData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Subject>, Problem> {
    auth.require_admin()?;
    data.validate()?;

    let mut subject = db
        .get_subject(id)
        .await?
        .ok_or_else(|| problems::not_found("Subject", id))?;
    let data = data.into_inner();
    subject.name = data.name.trim().to_string();
    subject.description = data.description;

    db.update_subject(&subject).await?;
    Ok(Json(subject))
}

/// Delete a subject together with its levels.
#[utoipa::path(
    responses(
        (status = 200, description = "Deleted subject", body = Subject),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such subject", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/subjects/<id>")]
#[tracing::instrument(skip(db))]
pub async fn subject_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Subject>, Problem> {
    auth.require_admin()?;

    db.delete_subject(id)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Subject", id))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Levels of the subject, cheapest first", body = Vec<Level>),
        (status = 404, description = "No such subject", body = Problem),
    )
)]
#[get("/subjects/<id>/levels")]
#[tracing::instrument(skip(db))]
pub async fn subject_levels(id: Uuid, db: &State<Database>) -> Result<Json<Vec<Level>>, Problem> {
    if db.get_subject(id).await?.is_none() {
        return Err(problems::not_found("Subject", id));
    }
    Ok(Json(db.list_levels(id).await?))
}

#[utoipa::path(
    request_body = LevelData,
    responses(
        (status = 201, description = "Created level", body = Level),
        (status = 400, description = "Invalid level", body = Problem),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such subject", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/levels", data = "<data>")]
#[tracing::instrument(skip(db, config))]
pub async fn level_create(
    data: Json<LevelData>,
    auth: UserRoleToken,
    db: &State<Database>,
    config: &State<Config>,
) -> Result<(Status, Json<Level>), Problem> {
    auth.require_admin()?;
    data.validate()?;

    let level = data.into_inner().into_level(&config.payment.currency);
    db.create_level(&level).await?;
    Ok((Status::Created, Json(level)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Level", body = Level),
        (status = 404, description = "No such level", body = Problem),
    )
)]
#[get("/levels/<id>")]
#[tracing::instrument(skip(db))]
pub async fn level_get(id: Uuid, db: &State<Database>) -> Result<Json<Level>, Problem> {
    Ok(Json(db.require_level(id).await?))
}

#[utoipa::path(
    request_body = LevelData,
    responses(
        (status = 200, description = "Updated level", body = Level),
        (status = 400, description = "Invalid level", body = Problem),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such level", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/levels/<id>", data = "<data>")]
#[tracing::instrument(skip(db, config))]
pub async fn level_update(
    id: Uuid,
    data: Json<LevelData>,
    auth: UserRoleToken,
    db: &State<Database>,
    config: &State<Config>,
) -> Result<Json<Level>, Problem> {
    auth.require_admin()?;
    data.validate()?;

    let existing = db.require_level(id).await?;
    if data.subject != existing.subject && db.get_subject(data.subject).await?.is_none() {
        return Err(problems::not_found("Subject", data.subject));
    }

    let mut level = data.into_inner().into_level(&config.payment.currency);
    level.id = existing.id;
    level.created = existing.created;

    db.update_level(&level).await?;
    Ok(Json(level))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Deleted level", body = Level),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such level", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/levels/<id>")]
#[tracing::instrument(skip(db))]
pub async fn level_delete(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<Level>, Problem> {
    auth.require_admin()?;

    db.delete_level(id)
        .await?
        .map(Json)
        .ok_or_else(|| problems::not_found("Level", id))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use serde_json::Value;

    use crate::role::Role;
    use crate::route::{test_client, test_cookie};

    #[rocket::async_test]
    async fn catalog_changes_need_admin() {
        let client = test_client().await;
        let (_, teacher) = test_cookie(Role::Teacher);

        let response = client
            .post("/api/subjects")
            .header(ContentType::JSON)
            .body(r#"{"name":"Piano"}"#)
            .cookie(teacher)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn invalid_level_is_rejected() {
        let client = test_client().await;
        let (_, admin) = test_cookie(Role::Admin);

        let response = client
            .post("/api/levels")
            .header(ContentType::JSON)
            .body(format!(
                r#"{{"subject":"{}","name":"Grade 1","price":0,"duration_weeks":4}}"#,
                uuid::Uuid::new_v4()
            ))
            .cookie(admin)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::BadRequest);

        let body: Value = response.into_json().await.expect("problem body");
        assert_eq!(body["title"], "Bad level price.");
    }
}
