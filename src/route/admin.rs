use mongodb::Database;
use rocket::serde::json::Json;
use rocket::State;
use serde::Serialize;
use utoipa::ToSchema;

use crate::data::batch::db::BatchDbExt;
use crate::data::subscription::db::SubscriptionDbExt;
use crate::data::subscription::Revenue;
use crate::data::user::db::UserDbExt;
use crate::resp::jwt::UserRoleToken;
use crate::resp::problem::Problem;
use crate::role::Role;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct UserCounts {
    pub students: u64,
    pub teachers: u64,
    pub admins: u64,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct StatsResponse {
    pub users: UserCounts,
    pub batches: u64,
    pub paid_subscriptions: u64,
    pub revenue: Vec<Revenue>,
}

/// Back-office overview.
#[utoipa::path(
    responses(
        (status = 200, description = "Platform totals", body = StatsResponse),
        (status = 401, description = "Not an admin", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/admin/stats")]
#[tracing::instrument(skip(db))]
pub async fn admin_stats(auth: UserRoleToken, db: &State<Database>) -> Result<Json<StatsResponse>, Problem> {
    auth.require_admin()?;

    let by_role = db.count_users_by_role().await?;
    let count = |role: Role| by_role.get(&role).copied().unwrap_or(0);

    Ok(Json(StatsResponse {
        users: UserCounts {
            students: count(Role::Student),
            teachers: count(Role::Teacher),
            admins: count(Role::Admin),
        },
        batches: db.count_batches().await?,
        paid_subscriptions: db.count_paid_subscriptions().await?,
        revenue: db.revenue_by_currency().await?,
    }))
}

#[cfg(test)]
mod tests {
    use rocket::http::Status;

    use crate::role::Role;
    use crate::route::{test_client, test_cookie};

    #[rocket::async_test]
    async fn stats_are_admin_only() {
        let client = test_client().await;

        for role in [Role::Student, Role::Teacher] {
            let (_, cookie) = test_cookie(role);
            let response = client.get("/api/admin/stats").cookie(cookie).dispatch().await;
            assert_eq!(response.status(), Status::Unauthorized, "{} got through", role);
        }
    }
}
