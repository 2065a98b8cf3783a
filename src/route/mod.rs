use std::collections::BTreeMap;

use rocket::http::Status;
use rocket::{Build, Request, Rocket, Route};
use serde::Serialize;
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;

pub mod admin;
pub mod assignment;
pub mod auth;
pub mod batch;
pub mod catalog;
pub mod files;
pub mod payment;
pub mod session;
pub mod users;

use admin::*;
use assignment::*;
use auth::*;
use batch::*;
use catalog::*;
use files::*;
use payment::*;
use session::*;
use users::*;

use crate::{
    data::{assignment as ad, batch as bd, catalog as cd, session as sd, subscription as pd, user as ud},
    resp::{jwt::doc::JWTAuth, problem::Problem},
    role::Role,
    schedule::{ScheduleEntry, Session, SessionStatus},
};

pub const API_BASE: &str = "/api";

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl ToString) -> MessageResponse {
        MessageResponse {
            message: message.to_string(),
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        signup,
        verify_otp,
        resend_otp,
        login,
        logout,
        me,
        user_list,
        user_get,
        user_set_role,
        user_delete,
        subject_list,
        subject_create,
        subject_get,
        subject_update,
        subject_delete,
        subject_levels,
        level_create,
        level_get,
        level_update,
        level_delete,
        batch_list,
        batch_create,
        batch_get,
        batch_update,
        batch_delete,
        batch_enroll,
        batch_remove_student,
        batch_add_note,
        batch_add_lecture,
        batch_set_meeting_link,
        attendance_list,
        attendance_record,
        batch_sessions,
        batch_next_session,
        cancellation_list,
        cancellation_create,
        cancellation_delete,
        schedule_upcoming,
        schedule_history,
        assignment_list,
        assignment_create,
        assignment_get,
        assignment_delete,
        submission_create,
        feedback_create,
        checkout,
        checkout_verify,
        subscription_list,
        admin_stats
    ),
    components(schemas(
        Role,
        Problem,
        MessageResponse,
        ScheduleEntry,
        Session,
        SessionStatus,
        SessionInfo,
        ud::UserResponse,
        ud::SignupData,
        ud::LoginData,
        ud::OtpData,
        ud::EmailData,
        ud::RoleData,
        cd::Subject,
        cd::SubjectData,
        cd::Level,
        cd::LevelData,
        bd::Batch,
        bd::BatchData,
        bd::BatchUpdate,
        bd::EnrollData,
        bd::Note,
        bd::NoteData,
        bd::Lecture,
        bd::LectureData,
        bd::MeetingLinkData,
        bd::AttendanceEntry,
        bd::AttendanceRecord,
        bd::AttendanceData,
        sd::CancelledSession,
        sd::CancellationData,
        ad::Assignment,
        ad::AssignmentData,
        ad::Submission,
        ad::SubmissionData,
        ad::Feedback,
        ad::FeedbackData,
        pd::Subscription,
        pd::PaymentStatus,
        pd::CheckoutData,
        pd::CheckoutResponse,
        pd::VerifyPaymentData,
        pd::Revenue,
        UserCounts,
        StatsResponse
    )),
    modifiers(&JWTAuth, &API_PREFIX)
)]
pub struct ApiDoc;

pub struct PathPrefix(pub &'static str);
static API_PREFIX: PathPrefix = PathPrefix(API_BASE);

impl utoipa::Modify for PathPrefix {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut new_paths = BTreeMap::new();

        for (path, item) in std::mem::take(&mut openapi.paths.paths) {
            new_paths.insert(self.0.to_string() + path.as_ref(), item);
        }

        openapi.paths.paths = new_paths;
    }
}

pub fn api() -> Vec<Route> {
    routes![
        signup,
        verify_otp,
        resend_otp,
        login,
        logout,
        me,
        user_list,
        user_get,
        user_set_role,
        user_delete,
        subject_list,
        subject_create,
        subject_get,
        subject_update,
        subject_delete,
        subject_levels,
        level_create,
        level_get,
        level_update,
        level_delete,
        batch_list,
        batch_create,
        batch_get,
        batch_update,
        batch_delete,
        batch_enroll,
        batch_remove_student,
        batch_add_note,
        batch_add_lecture,
        batch_set_meeting_link,
        attendance_list,
        attendance_record,
        batch_sessions,
        batch_next_session,
        cancellation_list,
        cancellation_create,
        cancellation_delete,
        schedule_upcoming,
        schedule_history,
        assignment_list,
        assignment_create,
        assignment_get,
        assignment_delete,
        submission_create,
        feedback_create,
        checkout,
        checkout_verify,
        subscription_list,
        admin_stats
    ]
}

/// Renders every error status as a problem document. Guards that fail with a
/// problem leave it in the request cache so the exact reason survives.
#[catch(default)]
pub fn problem_catcher(status: Status, req: &Request) -> Problem {
    if let Some(problem) = req.local_cache(|| None::<Problem>) {
        return problem.clone();
    }

    let title = match status.code {
        401 => "Not authenticated.",
        404 => "Resource doesn't exist.",
        422 => "Request body couldn't be understood.",
        _ => status.reason_lossy(),
    };
    Problem::new_untyped(status, title)
}

pub fn mount_api(rocket: Rocket<Build>) -> Rocket<Build> {
    rocket
        .mount(API_BASE, api())
        .register(API_BASE, catchers![problem_catcher])
        .mount(
            "/",
            SwaggerUi::new("/swagger/<_..>").url("/api/openapi.json", ApiDoc::openapi()),
        )
        .mount("/", routes![app, app_path])
}

#[cfg(test)]
pub(crate) async fn test_client() -> rocket::local::asynchronous::Client {
    use crate::config::Config;
    use crate::security::Security;

    let config = Config::default();
    // the driver connects lazily; tests only reach handlers that fail before a query
    let client = mongodb::Client::with_uri_str("mongodb://127.0.0.1:1/?serverSelectionTimeoutMS=500")
        .await
        .expect("valid MongoDB URI");
    let db = client.database("tempo_test");

    let rocket = crate::build(config, Security::from_secret(TEST_SECRET), db);
    rocket::local::asynchronous::Client::untracked(rocket)
        .await
        .expect("valid rocket instance")
}

#[cfg(test)]
pub(crate) const TEST_SECRET: &[u8] = b"route test secret, long enough for signing";

/// Session cookie of a fresh user with `role`, signed for [`test_client`].
#[cfg(test)]
pub(crate) fn test_cookie(role: Role) -> (uuid::Uuid, rocket::http::Cookie<'static>) {
    let token = crate::resp::jwt::UserRoleToken::for_user(uuid::Uuid::new_v4(), role);
    let cookie = token.cookie(TEST_SECRET).expect("encodable token");
    (token.user, cookie)
}
