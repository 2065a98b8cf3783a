use std::convert::TryFrom;
use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use crypto::bcrypt::bcrypt;
use crypto::util::fixed_time_eq;
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::resp::problem::Problem;
use crate::role::Role;

pub mod db;

const BCRYPT_COST: u32 = 10;
const OTP_DIGITS: usize = 6;

/// Salted bcrypt over the SHA-256 of the password, stored as
/// `bcrypt$<cost>$<salt hex>$<hash hex>`.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PasswordHash {
    cost: u32,
    salt: [u8; 16],
    hash: [u8; 24],
}

impl PasswordHash {
    pub fn new(password: impl AsRef<str>) -> PasswordHash {
        PasswordHash::with_salt(password, rand::random(), BCRYPT_COST)
    }

    fn with_salt(password: impl AsRef<str>, salt: [u8; 16], cost: u32) -> PasswordHash {
        PasswordHash {
            cost,
            salt,
            hash: Self::digest(password.as_ref(), &salt, cost),
        }
    }

    fn digest(password: &str, salt: &[u8; 16], cost: u32) -> [u8; 24] {
        let mut hash: [u8; 24] = [0; 24];

        let mut sha = Sha256::new();
        sha2::Digest::update(&mut sha, password.as_bytes());

        bcrypt(cost, salt, sha.finalize().as_slice(), &mut hash);

        hash
    }

    pub fn verify(&self, password: impl AsRef<str>) -> bool {
        let candidate = Self::digest(password.as_ref(), &self.salt, self.cost);
        fixed_time_eq(&candidate, &self.hash)
    }
}

impl From<PasswordHash> for String {
    fn from(value: PasswordHash) -> Self {
        format!(
            "bcrypt${}${}${}",
            value.cost,
            hex::encode(value.salt),
            hex::encode(value.hash)
        )
    }
}

impl TryFrom<String> for PasswordHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let mut parts = value.split('$');
        let (Some("bcrypt"), Some(cost), Some(salt), Some(hash), None) =
            (parts.next(), parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err("unknown password hash format".to_string());
        };

        let cost: u32 = cost.parse().map_err(|_| "bad bcrypt cost".to_string())?;
        let salt: [u8; 16] = hex::decode(salt)
            .ok()
            .and_then(|it| it.try_into().ok())
            .ok_or_else(|| "bad bcrypt salt".to_string())?;
        let hash: [u8; 24] = hex::decode(hash)
            .ok()
            .and_then(|it| it.try_into().ok())
            .ok_or_else(|| "bad bcrypt hash".to_string())?;

        Ok(PasswordHash { cost, salt, hash })
    }
}

/// One-time e-mail verification code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Otp {
    pub code: String,
    pub expires: DateTime<Utc>,
}

impl Otp {
    pub fn generate(ttl: Duration) -> Otp {
        let code: u32 = rand::thread_rng().gen_range(0..10u32.pow(OTP_DIGITS as u32));
        Otp {
            code: format!("{:0width$}", code, width = OTP_DIGITS),
            expires: Utc::now() + ttl,
        }
    }

    pub fn matches(&self, code: impl AsRef<str>, now: DateTime<Utc>) -> bool {
        now < self.expires && fixed_time_eq(self.code.as_bytes(), code.as_ref().trim().as_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", with = "crate::data::uuid_str")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    pub pw_hash: PasswordHash,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub otp: Option<Otp>,
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
}

impl User {
    pub fn new(signup: &SignupData, role: Role) -> User {
        let id = Uuid::new_v4();
        tracing::info!("Creating a new user with UUID: {}", id);

        User {
            id,
            name: signup.name.trim().to_string(),
            email: normalize_email(&signup.email),
            phone: signup
                .phone
                .as_ref()
                .map(|it| it.trim().to_string())
                .filter(|it| !it.is_empty()),
            pw_hash: PasswordHash::new(&signup.password),
            role,
            verified: false,
            otp: None,
            created: Utc::now(),
        }
    }
}

pub fn normalize_email(email: impl AsRef<str>) -> String {
    email.as_ref().trim().to_lowercase()
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex must compile")
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct UserResponse {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub role: Role,
    pub verified: bool,
    pub created: DateTime<Utc>,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        UserResponse {
            id: user.id,
            name: user.name,
            email: user.email,
            phone: user.phone,
            role: user.role,
            verified: user.verified,
            created: user.created,
        }
    }
}

pub mod problem {
    use crate::resp::problem::Problem;
    use rocket::http::Status;
    use uuid::Uuid;

    #[inline]
    pub fn bad_email(email: impl ToString, detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad email.")
            .insert_str("email", email)
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_name(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad name.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn bad_password(detail: impl ToString) -> Problem {
        Problem::new_untyped(Status::BadRequest, "Bad password.")
            .detail(detail)
            .to_owned()
    }

    #[inline]
    pub fn not_found(id: Uuid) -> Problem {
        Problem::new_untyped(Status::NotFound, "User doesn't exist.")
            .insert("id", id.to_string())
            .clone()
    }

    #[inline]
    pub fn bad_login() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Bad email or password.")
    }

    #[inline]
    pub fn not_verified() -> Problem {
        Problem::new_untyped(Status::Unauthorized, "Not authenticated: email isn't verified.")
    }

    #[inline]
    pub fn bad_otp() -> Problem {
        Problem::new_untyped(Status::BadRequest, "Invalid or expired verification code.")
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct SignupData {
    pub name: String,
    pub email: String,
    #[schema(format = Password)]
    pub password: String,
    #[serde(default)]
    pub phone: Option<String>,
}

impl std::fmt::Debug for SignupData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SignupData:{}", self.email)
    }
}

impl SignupData {
    pub fn validate(&self) -> Result<(), Problem> {
        let email = self.email.trim();
        if !email_regex().is_match(email) {
            return Err(problem::bad_email(email, "Not a valid e-mail address."));
        }

        let name_len = self.name.trim().chars().count();
        if name_len < 2 {
            return Err(problem::bad_name("Name must be at least 2 characters long."));
        }
        if name_len > 64 {
            return Err(problem::bad_name("Name can't be longer than 64 characters."));
        }

        if self.password.len() < 8 {
            return Err(problem::bad_password(
                "Password must be at least 8 characters (bytes) long.",
            ));
        }
        if self.password.len() > 128 {
            return Err(problem::bad_password(
                "Passwords longer than 128 characters aren't supported.",
            ));
        }

        Ok(())
    }
}

#[derive(Clone, Deserialize, ToSchema)]
pub struct LoginData {
    pub email: String,
    #[schema(format = Password)]
    pub password: String,
}

impl std::fmt::Debug for LoginData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LoginData:{}", self.email)
    }
}

impl LoginData {
    pub fn validate(&self) -> Result<(), Problem> {
        if !self.email.contains('@') || self.password.len() < 8 || self.password.len() > 128 {
            return Err(problem::bad_login());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct OtpData {
    pub email: String,
    pub otp: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct EmailData {
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct RoleData {
    pub role: Role,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signup(email: &str, name: &str, password: &str) -> SignupData {
        SignupData {
            name: name.to_string(),
            email: email.to_string(),
            password: password.to_string(),
            phone: None,
        }
    }

    #[test]
    fn password_hash_verifies_only_original() {
        let hash = PasswordHash::with_salt("correct horse", [7; 16], 4);
        assert!(hash.verify("correct horse"));
        assert!(!hash.verify("correct hors3"));
    }

    #[test]
    fn same_password_gets_different_salts() {
        let a = PasswordHash::new("piano-lessons");
        let b = PasswordHash::new("piano-lessons");
        assert_ne!(a, b);
        assert!(a.verify("piano-lessons") && b.verify("piano-lessons"));
    }

    #[test]
    fn password_hash_string_form_round_trips() {
        let hash = PasswordHash::with_salt("violin", [1; 16], 4);
        let stored: String = hash.clone().into();
        assert!(stored.starts_with("bcrypt$4$"));
        assert_eq!(PasswordHash::try_from(stored), Ok(hash));

        assert!(PasswordHash::try_from("plain".to_string()).is_err());
        assert!(PasswordHash::try_from("bcrypt$4$zz$00".to_string()).is_err());
    }

    #[test]
    fn otp_is_six_digits_and_expires() {
        let otp = Otp::generate(Duration::minutes(10));
        assert_eq!(otp.code.len(), 6);
        assert!(otp.code.chars().all(|c| c.is_ascii_digit()));

        let now = Utc::now();
        assert!(otp.matches(&otp.code, now));
        assert!(otp.matches(format!(" {} ", otp.code), now));
        assert!(!otp.matches("abcdef", now));
        assert!(!otp.matches(&otp.code, otp.expires));
    }

    #[test]
    fn signup_validation() {
        assert!(signup("ana@example.com", "Ana", "scales123").validate().is_ok());

        let bad_email = signup("ana.example.com", "Ana", "scales123").validate().unwrap_err();
        assert_eq!(bad_email.title, "Bad email.");

        let bad_name = signup("ana@example.com", "A", "scales123").validate().unwrap_err();
        assert_eq!(bad_name.title, "Bad name.");

        let bad_password = signup("ana@example.com", "Ana", "short").validate().unwrap_err();
        assert_eq!(bad_password.title, "Bad password.");
    }

    #[test]
    fn new_user_is_normalized_and_unverified() {
        let mut data = signup("  Ana@Example.COM ", " Ana ", "scales123");
        data.phone = Some("   ".to_string());

        let user = User::new(&data, Role::Student);
        assert_eq!(user.email, "ana@example.com");
        assert_eq!(user.name, "Ana");
        assert_eq!(user.phone, None);
        assert!(!user.verified);
        assert!(user.pw_hash.verify("scales123"));
    }

    #[test]
    fn user_response_hides_credentials() {
        let mut user = User::new(&signup("ana@example.com", "Ana", "scales123"), Role::Teacher);
        user.otp = Some(Otp::generate(Duration::minutes(5)));

        let json = serde_json::to_value(UserResponse::from(user)).unwrap();
        assert_eq!(json["role"], "teacher");
        assert!(json["_id"].is_string());
        assert!(json.get("pw_hash").is_none());
        assert!(json.get("otp").is_none());
    }
}
