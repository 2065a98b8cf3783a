use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rocket::http::{Cookie, CookieJar, Status};
use rocket::request::{FromRequest, Outcome, Request};
use rocket::time::OffsetDateTime;
use serde::{Deserialize, Serialize};

use super::util::date_time_as_unix_seconds;
use crate::data::user::User;
use crate::resp::problem::Problem;
use crate::role::Role;
use crate::security::Security;
use uuid::Uuid;

pub static AUTH_COOKIE_NAME: &str = "token";

pub fn token_lifetime() -> Duration {
    Duration::days(7)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRoleToken {
    #[serde(with = "date_time_as_unix_seconds")]
    iat: DateTime<Utc>,
    #[serde(with = "date_time_as_unix_seconds")]
    exp: DateTime<Utc>,
    pub user: Uuid,
    pub role: Role,
}

impl UserRoleToken {
    pub fn new(user: &User) -> UserRoleToken {
        UserRoleToken::for_user(user.id, user.role)
    }

    pub fn for_user(user: Uuid, role: Role) -> UserRoleToken {
        let now = Utc::now();
        UserRoleToken {
            iat: now,
            exp: now + token_lifetime(),
            user,
            role,
        }
    }

    pub fn expires(&self) -> DateTime<Utc> {
        self.exp
    }

    pub fn encode_jwt(&self, secret: impl AsRef<[u8]>) -> Result<String, jsonwebtoken::errors::Error> {
        let header = Header::new(Algorithm::HS256);
        let key = EncodingKey::from_secret(secret.as_ref());

        encode(&header, &self, &key)
    }

    pub fn cookie(
        &self,
        secret: impl AsRef<[u8]>,
    ) -> Result<Cookie<'static>, jsonwebtoken::errors::Error> {
        Ok(Cookie::build((AUTH_COOKIE_NAME, self.encode_jwt(secret)?))
            .secure(true)
            .expires(OffsetDateTime::from_unix_timestamp(self.exp.timestamp()).ok())
            .path("/")
            .http_only(true)
            .build())
    }

    /// Checks whether the bearer is allowed to act as the given user, either
    /// by being that user or by being an admin.
    pub fn is_self_or_admin(&self, user: Uuid) -> bool {
        self.user == user || self.role.is_admin()
    }

    /// Requires the bearer's role to be at least `min`.
    pub fn require_role(&self, min: Role) -> Result<(), Problem> {
        if self.role >= min {
            Ok(())
        } else {
            Err(auth_problem(format!("Not authorized: {} access required.", min)))
        }
    }

    pub fn require_admin(&self) -> Result<(), Problem> {
        self.require_role(Role::Admin)
    }

    pub fn require_teacher(&self) -> Result<(), Problem> {
        self.require_role(Role::Teacher)
    }
}

pub fn auth_problem(detail: impl ToString) -> Problem {
    Problem::new_untyped(Status::Unauthorized, "Unable to authorize user.")
        .detail(detail)
        .clone()
}

pub fn extract_claims(
    cookies: &CookieJar,
    secret: impl AsRef<[u8]>,
) -> Result<UserRoleToken, Problem> {
    let token = match cookies.get(AUTH_COOKIE_NAME) {
        Some(jwt) => jwt.value().to_owned(),
        None => {
            return Err(auth_problem("Not authenticated."));
        }
    };
    tracing::trace!("extracted jwt auth from cookie");

    decode_claims(&token, secret)
}

pub fn decode_claims(token: &str, secret: impl AsRef<[u8]>) -> Result<UserRoleToken, Problem> {
    match decode::<UserRoleToken>(
        token,
        &DecodingKey::from_secret(secret.as_ref()),
        &Validation::new(Algorithm::HS256),
    )
    .map(|data| data.claims)
    {
        Ok(it) => {
            tracing::debug!("decoded user role token for user: {}", it.user);
            Ok(it)
        }
        Err(e) => {
            use jsonwebtoken::errors::ErrorKind;
            match e.kind() {
                ErrorKind::ExpiredSignature => Err(auth_problem("Not authenticated: session expired.")),
                _ => Err(auth_problem("Not authenticated: token was malformed.")),
            }
        }
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for UserRoleToken {
    type Error = Problem;

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let security = match req.rocket().state::<Security>() {
            Some(it) => it,
            None => {
                tracing::error!("security state isn't managed");
                return Outcome::Error((
                    Status::InternalServerError,
                    Problem::new_untyped(Status::InternalServerError, "Server misconfigured."),
                ));
            }
        };

        tracing::trace!("extracting user role token from request cookies");
        match extract_claims(req.cookies(), &security.jwt_secret) {
            Ok(claims) => Outcome::Success(claims),
            Err(e) => {
                tracing::debug!("unable to extract claims from cookies");
                // picked up by the catcher to render the exact reason
                req.local_cache(|| Some(e.clone()));
                Outcome::Error((Status::Unauthorized, e))
            }
        }
    }
}

pub mod doc {
    use utoipa::openapi::security::*;

    #[derive(Clone, Copy)]
    pub struct JWTAuth;

    impl From<JWTAuth> for SecurityScheme {
        fn from(_: JWTAuth) -> SecurityScheme {
            SecurityScheme::ApiKey(ApiKey::Cookie(ApiKeyValue::new(super::AUTH_COOKIE_NAME)))
        }
    }

    impl utoipa::Modify for JWTAuth {
        fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
            if let Some(c) = openapi.components.as_mut() {
                c.add_security_scheme("jwt", *self)
            }
        }
    }
}

pub trait HasAuthCookie {
    fn get_auth_cookie(&self, secret: impl AsRef<[u8]>) -> Option<UserRoleToken>;
}

#[cfg(test)]
impl HasAuthCookie for rocket::local::asynchronous::LocalResponse<'_> {
    fn get_auth_cookie(&self, secret: impl AsRef<[u8]>) -> Option<UserRoleToken> {
        extract_claims(self.cookies(), secret).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::SubsecRound;

    const SECRET: &[u8] = b"a test secret that is long enough for hs256";

    #[test]
    fn jwt_configured_properly() {
        let now = Utc::now().round_subsecs(0);
        let user = Uuid::new_v4();

        let urt = UserRoleToken {
            iat: now,
            exp: now + token_lifetime(),
            user,
            role: Role::Admin,
        };

        let token = urt.encode_jwt(SECRET).expect("encoding should work for example");
        let decoded = decode_claims(&token, SECRET).expect("token should decode");

        assert_eq!(now, decoded.iat);
        assert_eq!(now + Duration::days(7), decoded.exp);
        assert_eq!(user, decoded.user);
        assert_eq!(decoded.role, Role::Admin);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let urt = UserRoleToken::for_user(Uuid::new_v4(), Role::Student);
        let token = urt.encode_jwt(SECRET).unwrap();

        let problem = decode_claims(&token, b"some other secret entirely").unwrap_err();
        assert_eq!(problem.status, Status::Unauthorized);
    }

    #[test]
    fn expired_token_is_rejected() {
        let now = Utc::now();
        let urt = UserRoleToken {
            iat: now - Duration::days(8),
            exp: now - Duration::days(1),
            user: Uuid::new_v4(),
            role: Role::Student,
        };
        let token = urt.encode_jwt(SECRET).unwrap();

        let problem = decode_claims(&token, SECRET).unwrap_err();
        assert_eq!(problem.detail.as_deref(), Some("Not authenticated: session expired."));
    }

    #[test]
    fn cookie_is_http_only_and_scoped_to_root() {
        let urt = UserRoleToken::for_user(Uuid::new_v4(), Role::Teacher);
        let cookie = urt.cookie(SECRET).unwrap();

        assert_eq!(cookie.name(), AUTH_COOKIE_NAME);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.path(), Some("/"));
        assert_eq!(
            cookie.expires_datetime().map(|it| it.unix_timestamp()),
            Some(urt.expires().timestamp())
        );
    }

    #[test]
    fn role_requirements() {
        let student = UserRoleToken::for_user(Uuid::new_v4(), Role::Student);
        let teacher = UserRoleToken::for_user(Uuid::new_v4(), Role::Teacher);
        let admin = UserRoleToken::for_user(Uuid::new_v4(), Role::Admin);

        assert!(student.require_teacher().is_err());
        assert!(teacher.require_teacher().is_ok());
        assert!(teacher.require_admin().is_err());
        assert!(admin.require_admin().is_ok());

        assert!(student.is_self_or_admin(student.user));
        assert!(!student.is_self_or_admin(teacher.user));
        assert!(admin.is_self_or_admin(student.user));
    }
}
