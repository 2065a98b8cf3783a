use crate::error::ConfigurationError;
use crate::util::{self, env_list, env_or};
use chrono::{Duration, FixedOffset, Offset, Utc};
use std::env;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn default_mongodb_uri() -> String {
    env::var("MONGODB_URI").unwrap_or("mongodb://localhost:27017".to_string())
}

fn default_mongodb_db() -> String {
    env::var("MONGODB_DB_NAME").unwrap_or("tempo".to_string())
}

fn default_public_content() -> PathBuf {
    PathBuf::from(env::var("PUBLIC_CONTENT_PATH").unwrap_or("./public".to_string()))
}

#[cfg(debug_assertions)]
fn default_admin_emails() -> Vec<String> {
    env_list("ADMIN_EMAILS").unwrap_or_else(|| vec![String::from("admin@localhost")])
}
#[cfg(not(debug_assertions))]
fn default_admin_emails() -> Vec<String> {
    env_list("ADMIN_EMAILS").unwrap_or_default()
}

fn default_utc_offset_minutes() -> i32 {
    env_or("UTC_OFFSET_MINUTES", 0)
}

fn default_join_window_minutes() -> i64 {
    env_or("JOIN_WINDOW_MINUTES", 10)
}

fn default_otp_ttl_minutes() -> i64 {
    env_or("OTP_TTL_MINUTES", 10)
}

fn default_payment_api_base() -> String {
    env::var("PAYMENT_API_BASE").unwrap_or("https://api.razorpay.com/v1".to_string())
}

fn default_payment_key_id() -> String {
    env::var("PAYMENT_KEY_ID").unwrap_or_default()
}

fn default_payment_key_secret() -> String {
    env::var("PAYMENT_KEY_SECRET").unwrap_or_default()
}

fn default_currency() -> String {
    env::var("PAYMENT_CURRENCY").unwrap_or("INR".to_string())
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PaymentConfig {
    #[serde(default = "default_payment_api_base")]
    pub api_base: String,
    #[serde(default = "default_payment_key_id")]
    pub key_id: String,
    #[serde(default = "default_payment_key_secret")]
    pub key_secret: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl PaymentConfig {
    pub fn is_configured(&self) -> bool {
        !self.key_id.is_empty() && !self.key_secret.is_empty()
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        PaymentConfig {
            api_base: default_payment_api_base(),
            key_id: default_payment_key_id(),
            key_secret: default_payment_key_secret(),
            currency: default_currency(),
        }
    }
}

impl std::fmt::Debug for PaymentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymentConfig")
            .field("api_base", &self.api_base)
            .field("key_id", &self.key_id)
            .field("currency", &self.currency)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip)]
    file_path: PathBuf,

    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,

    #[serde(default = "default_public_content")]
    pub public_content: PathBuf,

    /// Accounts registered with these e-mails become admins.
    #[serde(default = "default_admin_emails")]
    pub admin_emails: Vec<String>,

    /// Offset of the timezone all batch schedules are written in.
    #[serde(default = "default_utc_offset_minutes")]
    pub utc_offset_minutes: i32,
    /// How long before a session starts it becomes joinable.
    #[serde(default = "default_join_window_minutes")]
    pub join_window_minutes: i64,
    #[serde(default = "default_otp_ttl_minutes")]
    pub otp_ttl_minutes: i64,

    #[serde(default)]
    pub payment: PaymentConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            file_path: config_dir().join("settings.yml"),
            mongodb_uri: default_mongodb_uri(),
            mongodb_db: default_mongodb_db(),
            public_content: default_public_content(),
            admin_emails: default_admin_emails(),
            utc_offset_minutes: default_utc_offset_minutes(),
            join_window_minutes: default_join_window_minutes(),
            otp_ttl_minutes: default_otp_ttl_minutes(),
            payment: PaymentConfig::default(),
        }
    }
}

#[inline]
fn config_dir() -> PathBuf {
    PathBuf::from(env::var("CONFIG_DIR").unwrap_or("./config".to_string()))
}

impl Config {
    pub fn load() -> Result<Config, ConfigurationError> {
        Config::load_from(config_dir())
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Config, ConfigurationError> {
        let config_file = util::find_first_subpath(
            dir.as_ref(),
            &["settings.yml", "settings.yaml"],
            Path::exists,
        )
        .ok_or_else(|| ConfigurationError::NotFound(dir.as_ref().to_path_buf()))?;

        let file = File::open(&config_file)?;
        let mut config: Config = serde_yaml::from_reader(BufReader::new(file))?;
        config.file_path = config_file;

        Ok(config)
    }

    pub fn save(&self) -> Result<(), ConfigurationError> {
        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.file_path)?;
        let mut out = BufWriter::new(file);
        serde_yaml::to_writer(&mut out, self)?;
        out.flush()?;
        Ok(())
    }

    pub fn utc_offset(&self) -> FixedOffset {
        self.utc_offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .unwrap_or_else(|| {
                tracing::warn!(
                    "UTC offset of {} minutes is out of range, using UTC.",
                    self.utc_offset_minutes
                );
                Utc.fix()
            })
    }

    /// At most a day.
    pub fn join_window(&self) -> Duration {
        Duration::minutes(self.join_window_minutes.clamp(0, 24 * 60))
    }

    /// At most a week.
    pub fn otp_ttl(&self) -> Duration {
        Duration::minutes(self.otp_ttl_minutes.clamp(1, 7 * 24 * 60))
    }

    pub fn is_admin_email(&self, email: impl AsRef<str>) -> bool {
        let email = email.as_ref().trim();
        self.admin_emails
            .iter()
            .any(|it| it.eq_ignore_ascii_case(email))
    }
}
