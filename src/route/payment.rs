use chrono::{Duration, Utc};
use mongodb::Database;
use rocket::http::Status;
use rocket::serde::json::Json;
use rocket::State;

use crate::data::batch::db::{BatchDbExt, Enrollment};
use crate::data::batch::Batch;
use crate::data::catalog::db::CatalogDbExt;
use crate::data::subscription::db::SubscriptionDbExt;
use crate::data::subscription::{CheckoutData, CheckoutResponse, Subscription, VerifyPaymentData};
use crate::data::user::db::UserDbExt;
use crate::data::user::problem as user_problem;
use crate::error::PaymentError;
use crate::middleware::paging::PageState;
use crate::payment::PaymentGateway;
use crate::resp::jwt::{auth_problem, UserRoleToken};
use crate::resp::problem::{problems, Problem};
use crate::role::Role;
use crate::schedule::SessionCalendar;

/// Start paying for a level, optionally for a specific batch of it.
#[utoipa::path(
    request_body = CheckoutData,
    responses(
        (status = 201, description = "Gateway order to complete in the browser", body = CheckoutResponse),
        (status = 400, description = "Batch doesn't belong to the level or student already enrolled", body = Problem),
        (status = 401, description = "Not a student", body = Problem),
        (status = 404, description = "No such level or batch", body = Problem),
        (status = 409, description = "Batch is full", body = Problem),
        (status = 502, description = "Payment gateway failed", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/checkout", data = "<data>")]
#[tracing::instrument(skip(db, gateway))]
pub async fn checkout(
    data: Json<CheckoutData>,
    auth: UserRoleToken,
    db: &State<Database>,
    gateway: &State<PaymentGateway>,
) -> Result<(Status, Json<CheckoutResponse>), Problem> {
    if auth.role != Role::Student {
        return Err(auth_problem("Not authorized: only students can check out."));
    }

    let level = db.require_level(data.level).await?;
    if let Some(batch_id) = data.batch {
        let batch = db.require_batch(batch_id).await?;
        if batch.level != level.id {
            return Err(problems::bad_request(
                "Bad checkout.",
                "Batch doesn't belong to the chosen level.",
            ));
        }
        if batch.is_student(auth.user) {
            return Err(problems::bad_request(
                "Bad checkout.",
                "Already enrolled in this batch.",
            ));
        }
        if batch.is_full() {
            return Err(problems::conflict("Batch is full."));
        }
    }

    let mut subscription = Subscription::pending(
        auth.user,
        level.id,
        data.batch,
        String::new(),
        level.price,
        level.currency.clone(),
    );
    let order = gateway
        .create_order(level.price, &level.currency, &subscription.id.to_string())
        .await?;
    subscription.order_id = order.id;
    db.create_subscription(&subscription).await?;

    Ok((
        Status::Created,
        Json(CheckoutResponse {
            subscription: subscription.id,
            order_id: subscription.order_id,
            amount: subscription.amount,
            currency: subscription.currency,
            key_id: gateway.key_id().to_string(),
        }),
    ))
}

/// Confirm a payment with the gateway's signature and enroll the student:
/// into the chosen batch, or into a new personal batch following the level's
/// schedule that starts the next day.
#[utoipa::path(
    request_body = VerifyPaymentData,
    responses(
        (status = 200, description = "Paid subscription", body = Subscription),
        (status = 400, description = "Signature mismatch", body = Problem),
        (status = 401, description = "Not the paying student", body = Problem),
        (status = 404, description = "Unknown order", body = Problem),
        (status = 409, description = "Paid, but the batch filled up meanwhile", body = Problem),
    ),
    security(("jwt" = []))
)]
#[post("/checkout/verify", data = "<data>")]
#[tracing::instrument(skip(db, gateway, calendar))]
pub async fn checkout_verify(
    data: Json<VerifyPaymentData>,
    auth: UserRoleToken,
    db: &State<Database>,
    gateway: &State<PaymentGateway>,
    calendar: &State<SessionCalendar>,
) -> Result<Json<Subscription>, Problem> {
    let data = data.into_inner();
    let pending = db
        .find_subscription_by_order(&data.order_id)
        .await?
        .ok_or_else(|| Problem::new_untyped(Status::NotFound, "Order doesn't exist."))?;
    if !auth.is_self_or_admin(pending.student) {
        return Err(auth_problem("Not authorized: order belongs to another user."));
    }

    if let Err(e) = gateway.verify_signature(&data.order_id, &data.payment_id, &data.signature) {
        if matches!(e, PaymentError::BadSignature) {
            db.mark_subscription_failed(&data.order_id).await?;
        }
        return Err(e.into());
    }

    let mut subscription = match db
        .mark_subscription_paid(&data.order_id, &data.payment_id, Utc::now())
        .await?
    {
        Some(it) => it,
        // settled by an earlier verification
        None => return Ok(Json(pending)),
    };
    tracing::info!("Order {} paid by {}.", subscription.order_id, subscription.student);

    match subscription.batch {
        Some(batch) => match db.enroll_student(batch, subscription.student).await {
            Ok(Enrollment::Enrolled(_)) | Ok(Enrollment::AlreadyEnrolled(_)) => {}
            Ok(Enrollment::Full) => {
                tracing::error!(
                    "Order {} was paid but batch {} is full.",
                    subscription.order_id,
                    batch
                );
                return Err(problems::conflict("Payment received but the batch is full.")
                    .insert_str("order_id", &subscription.order_id)
                    .to_owned());
            }
            Err(e) => {
                tracing::error!(
                    "Order {} was paid but enrollment failed: {}",
                    subscription.order_id,
                    e
                );
                return Err(e);
            }
        },
        None => {
            let level = db.require_level(subscription.level).await?;
            let student = db
                .get_user(subscription.student)
                .await?
                .ok_or_else(|| user_problem::not_found(subscription.student))?;
            let start = calendar.today(Utc::now()) + Duration::days(1);

            let created = match Batch::personal(&level, student.id, &student.name, start) {
                Ok(batch) => db.create_batch(&batch).await.map(|_| batch),
                Err(e) => Err(e),
            };
            let batch = match created {
                Ok(batch) => batch,
                Err(e) => {
                    tracing::error!(
                        "Order {} was paid but creating a personal batch failed: {}",
                        subscription.order_id,
                        e
                    );
                    return Err(e);
                }
            };
            db.set_subscription_batch(subscription.id, batch.id).await?;
            subscription.batch = Some(batch.id);
        }
    }

    Ok(Json(subscription))
}

/// Payments, newest first. Admins see all, everyone else their own.
#[utoipa::path(
    params(
        ("page" = Option<u32>, Query, description = "Page number"),
        ("len" = Option<u32>, Query, description = "Page length"),
    ),
    responses(
        (status = 200, description = "Subscriptions", body = Vec<Subscription>),
        (status = 401, description = "Not signed in", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/subscriptions")]
#[tracing::instrument(skip(db))]
pub async fn subscription_list(
    auth: UserRoleToken,
    page: PageState,
    db: &State<Database>,
) -> Result<Json<Vec<Subscription>>, Problem> {
    let student = if auth.role.is_admin() {
        None
    } else {
        Some(auth.user)
    };
    Ok(Json(db.list_subscriptions(student, page).await?))
}

#[cfg(test)]
mod tests {
    use rocket::http::{ContentType, Status};
    use uuid::Uuid;

    use crate::role::Role;
    use crate::route::{test_client, test_cookie};

    #[rocket::async_test]
    async fn only_students_check_out() {
        let client = test_client().await;
        let (_, teacher) = test_cookie(Role::Teacher);

        let response = client
            .post("/api/checkout")
            .header(ContentType::JSON)
            .body(format!(r#"{{"level":"{}"}}"#, Uuid::new_v4()))
            .cookie(teacher)
            .dispatch()
            .await;
        assert_eq!(response.status(), Status::Unauthorized);
    }
}
