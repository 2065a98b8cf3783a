use mongodb::Database;
use rocket::http::{Cookie, CookieJar, Status};
use rocket::serde::json::Json;
use rocket::State;

use crate::config::Config;
use crate::data::user::db::UserDbExt;
use crate::data::user::{problem as user_problem, EmailData, LoginData, Otp, OtpData, SignupData, UserResponse};
use crate::mail::SharedMailer;
use crate::resp::jwt::{UserRoleToken, AUTH_COOKIE_NAME};
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::route::MessageResponse;
use crate::security::Security;

/// Register a new account. A verification code is mailed to the address.
#[utoipa::path(
    request_body = SignupData,
    responses(
        (status = 201, description = "Account created, awaiting verification", body = UserResponse),
        (status = 400, description = "Invalid signup data or email taken", body = Problem),
    )
)]
#[post("/auth/signup", data = "<signup>")]
#[tracing::instrument(skip_all, fields(email = %signup.email))]
pub async fn signup(
    signup: Json<SignupData>,
    db: &State<Database>,
    config: &State<Config>,
    mailer: &State<SharedMailer>,
) -> Result<(Status, Json<UserResponse>), Problem> {
    signup.validate()?;

    let role = if config.is_admin_email(&signup.email) {
        Role::Admin
    } else {
        Role::Student
    };
    let otp = Otp::generate(config.otp_ttl());
    let user = db.create_user(&signup, role, otp.clone()).await?;

    if let Err(e) = mailer.send_otp(&user.email, &user.name, &otp.code) {
        tracing::warn!("Unable to send verification code: {}", e);
    }

    Ok((Status::Created, Json(UserResponse::from(user))))
}

/// Confirm an email address with the mailed code. Signs the user in.
#[utoipa::path(
    request_body = OtpData,
    responses(
        (status = 200, description = "Email verified", body = UserResponse),
        (status = 400, description = "Invalid or expired code", body = Problem),
    )
)]
#[post("/auth/verify-otp", data = "<data>")]
#[tracing::instrument(skip_all, fields(email = %data.email))]
pub async fn verify_otp(
    data: Json<OtpData>,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<Json<UserResponse>, Problem> {
    let user = db
        .find_user_by_email(&data.email)
        .await?
        .ok_or_else(user_problem::bad_otp)?;

    let valid = user
        .otp
        .as_ref()
        .map(|otp| otp.matches(&data.otp, chrono::Utc::now()))
        .unwrap_or(false);
    if !valid {
        return Err(user_problem::bad_otp());
    }

    let user = db
        .mark_user_verified(user.id)
        .await?
        .ok_or_else(|| user_problem::not_found(user.id))?;

    cookies.add(UserRoleToken::new(&user).cookie(&security.jwt_secret)?);
    Ok(Json(UserResponse::from(user)))
}

/// Send a fresh verification code. Responds the same whether or not the
/// address is registered.
#[utoipa::path(
    request_body = EmailData,
    responses(
        (status = 200, description = "Code sent if the account awaits verification", body = MessageResponse),
    )
)]
#[post("/auth/resend-otp", data = "<data>")]
#[tracing::instrument(skip(db, config, mailer))]
pub async fn resend_otp(
    data: Json<EmailData>,
    db: &State<Database>,
    config: &State<Config>,
    mailer: &State<SharedMailer>,
) -> Result<Json<MessageResponse>, Problem> {
    if let Some(user) = db.find_user_by_email(&data.email).await? {
        if !user.verified {
            let otp = Otp::generate(config.otp_ttl());
            db.set_user_otp(user.id, otp.clone()).await?;
            if let Err(e) = mailer.send_otp(&user.email, &user.name, &otp.code) {
                tracing::warn!("Unable to send verification code: {}", e);
            }
        }
    }

    Ok(Json(MessageResponse::new(
        "If the account exists and isn't verified, a new code was sent.",
    )))
}

#[utoipa::path(
    request_body = LoginData,
    responses(
        (status = 200, description = "Signed in", body = UserResponse),
        (status = 401, description = "Bad credentials or unverified email", body = Problem),
    )
)]
#[post("/auth/login", data = "<login>")]
#[tracing::instrument(skip_all, fields(email = %login.email))]
pub async fn login(
    login: Json<LoginData>,
    cookies: &CookieJar<'_>,
    db: &State<Database>,
    security: &State<Security>,
) -> Result<Json<UserResponse>, Problem> {
    login.validate()?;

    let user = db
        .find_user_by_email(&login.email)
        .await?
        .ok_or_else(user_problem::bad_login)?;

    if !user.pw_hash.verify(&login.password) {
        return Err(user_problem::bad_login());
    }
    if !user.verified {
        return Err(user_problem::not_verified());
    }

    cookies.add(UserRoleToken::new(&user).cookie(&security.jwt_secret)?);
    tracing::info!("User {} signed in.", user.id);

    Ok(Json(UserResponse::from(user)))
}

#[utoipa::path(
    responses(
        (status = 200, description = "Signed out", body = MessageResponse),
    )
)]
#[post("/auth/logout")]
pub async fn logout(cookies: &CookieJar<'_>) -> Json<MessageResponse> {
    cookies.remove(Cookie::build(AUTH_COOKIE_NAME).path("/"));
    Json(MessageResponse::new("Signed out."))
}

/// The signed in user.
#[utoipa::path(
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not signed in", body = Problem),
    ),
    security(("jwt" = []))
)]
#[get("/auth/me")]
#[tracing::instrument(skip(db))]
pub async fn me(auth: UserRoleToken, db: &State<Database>) -> Result<Json<UserResponse>, Problem> {
    db.get_user(auth.user)
        .await?
        .map(|it| Json(UserResponse::from(it)))
        .ok_or_else(|| user_problem::not_found(auth.user))
}
