use thiserror::Error;

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail to '{0}' was rejected: {1}")]
    Rejected(String, String),
}

/// Delivers account mail.
pub trait Mailer: Send + Sync {
    fn send_otp(&self, email: &str, name: &str, code: &str) -> Result<(), MailError>;
}

pub type SharedMailer = Box<dyn Mailer>;

/// Writes mail to the log instead of sending it. Used until an SMTP transport
/// is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send_otp(&self, email: &str, name: &str, code: &str) -> Result<(), MailError> {
        if email.trim().is_empty() {
            return Err(MailError::Rejected(email.to_string(), "empty address".to_string()));
        }
        tracing::info!(to = email, "Verification code for {}: {}", name, code);
        Ok(())
    }
}
