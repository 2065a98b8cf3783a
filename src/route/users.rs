use mongodb::Database;
use rocket::http::{Cookie, CookieJar};
use rocket::serde::json::Json;
use rocket::State;
use uuid::Uuid;

use crate::data::user::db::UserDbExt;
use crate::data::user::{problem as user_problem, RoleData, UserResponse};
use crate::middleware::paging::PageState;
use crate::resp::jwt::{auth_problem, UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::Problem;
use crate::role::Role;

/// List users, newest first. Admin only.
#[utoipa::path(
    params(
        ("role" = Option<Role>, Query, description = "Only users with this role"),
        ("page" = Option<u32>, Query, description = "Page number"),
        ("len" = Option<u32>, Query, description = "Page length"),
    ),
    responses(
        (status = 200, description = "Users", body = Vec<UserResponse>),
        (status = 401, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users?<role>")]
#[tracing::instrument(skip(db))]
pub async fn user_list(
    role: Option<&str>,
    auth: UserRoleToken,
    page: PageState,
    db: &State<Database>,
) -> Result<Json<Vec<UserResponse>>, Problem> {
    auth.require_admin()?;

    let role = match role {
        Some(name) => Some(name.parse::<Role>().map_err(|_| {
            crate::resp::problem::problems::bad_request("Bad role.", format!("Unknown role '{}'.", name))
        })?),
        None => None,
    };

    let users = db.list_users(role, page).await?;
    Ok(Json(users.into_iter().map(UserResponse::from).collect()))
}

#[utoipa::path(
    responses(
        (status = 200, description = "User", body = UserResponse),
        (status = 401, description = "Neither the user nor an admin", body = Problem),
        (status = 404, description = "No such user", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/users/<id>")]
#[tracing::instrument(skip(db))]
pub async fn user_get(
    id: Uuid,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    if !auth.is_self_or_admin(id) {
        return Err(auth_problem("Not authorized: only admins can view other users."));
    }

    db.get_user(id)
        .await?
        .map(|it| Json(UserResponse::from(it)))
        .ok_or_else(|| user_problem::not_found(id))
}

/// Change a user's role. Admin only.
#[utoipa::path(
    request_body = RoleData,
    responses(
        (status = 200, description = "Updated user", body = UserResponse),
        (status = 401, description = "Not an admin", body = Problem),
        (status = 404, description = "No such user", body = Problem),
    ),
    security(("jwt" = []))
)]
#[put("/users/<id>/role", data = "<data>")]
#[tracing::instrument(skip(db))]
pub async fn user_set_role(
    id: Uuid,
    data: Json<RoleData>,
    auth: UserRoleToken,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    auth.require_admin()?;

    let user = db
        .set_user_role(id, data.role)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;
    tracing::info!("User {} is now {}.", id, user.role);

    Ok(Json(UserResponse::from(user)))
}

/// Delete an account. Users may delete themselves; admins anyone.
#[utoipa::path(
    responses(
        (status = 200, description = "Deleted user", body = UserResponse),
        (status = 401, description = "Neither the user nor an admin", body = Problem),
        (status = 404, description = "No such user", body = Problem),
    ),
    security(("jwt" = []))
)]
#[delete("/users/<id>")]
#[tracing::instrument(skip(cookies, db))]
pub async fn user_delete(
    id: Uuid,
    auth: UserRoleToken,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
) -> Result<Json<UserResponse>, Problem> {
    if !auth.is_self_or_admin(id) {
        return Err(auth_problem("Not authorized: only admins can delete other users."));
    }

    let removed = db
        .delete_user(id)
        .await?
        .ok_or_else(|| user_problem::not_found(id))?;

    if auth.user == id {
        cookies.remove(Cookie::build(AUTH_COOKIE_NAME).path("/"));
    }

    Ok(Json(UserResponse::from(removed)))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use uuid::Uuid;

    use crate::role::Role;
    use crate::route::{test_client, test_cookie};

    #[rocket::async_test]
    async fn listing_users_needs_admin() {
        let client = test_client().await;

        let anonymous = client.get("/api/users").dispatch().await;
        assert_eq!(anonymous.status(), Status::Unauthorized);

        let (_, student) = test_cookie(Role::Student);
        let response = client.get("/api/users").cookie(student).dispatch().await;
        assert_eq!(response.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn users_cant_view_or_delete_others() {
        let client = test_client().await;
        let (_, teacher) = test_cookie(Role::Teacher);
        let other = format!("/api/users/{}", Uuid::new_v4());

        let view = client.get(other.as_str()).cookie(teacher.clone()).dispatch().await;
        assert_eq!(view.status(), Status::Unauthorized);

        let delete = client.delete(other.as_str()).cookie(teacher).dispatch().await;
        assert_eq!(delete.status(), Status::Unauthorized);
    }

    #[rocket::async_test]
    async fn role_change_needs_admin() {
        let client = test_client().await;
        let (id, teacher) = test_cookie(Role::Teacher);

        let response = client
            .put(format!("/api/users/{}/role", id))
            .header(ContentType::JSON)
            .body(r#"{"role":"admin"}"#)
            .cookie(teacher)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}
