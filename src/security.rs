use std::path::{Path, PathBuf};
use std::{env, fs};

use crate::error::ConfigurationError;

const JWT_SECRET: &str = "jwt.secret";
const JWT_SECRET_MIN_LEN: usize = 32;

#[derive(Clone)]
pub struct Security {
    pub jwt_secret: Vec<u8>,
}

impl std::fmt::Debug for Security {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Security {{ jwt_secret: <{} bytes> }}", self.jwt_secret.len())
    }
}

#[inline]
fn security_dir() -> PathBuf {
    PathBuf::from(env::var("SECURITY_DIR").unwrap_or("./security".to_string()))
}

impl Security {
    pub fn from_secret(secret: impl Into<Vec<u8>>) -> Security {
        Security {
            jwt_secret: secret.into(),
        }
    }

    pub fn load() -> Result<Security, ConfigurationError> {
        Security::load_from(security_dir())
    }

    pub fn load_from(dir: impl AsRef<Path>) -> Result<Security, ConfigurationError> {
        let dir = dir.as_ref();
        let secret_path = dir.join(JWT_SECRET);

        tracing::info!("Loading JWT signing secret...");
        match fs::read(&secret_path) {
            Ok(secret) if secret.len() >= JWT_SECRET_MIN_LEN => {
                tracing::info!("JWT secret found and loaded.");
                return Ok(Security::from_secret(secret));
            }
            Ok(_) => {
                tracing::warn!("JWT secret in '{}' is too short.", secret_path.display());
            }
            Err(_) => {
                tracing::info!("JWT secret not found in '{}'.", secret_path.display());
            }
        }

        if cfg!(feature = "generate-security") {
            tracing::info!("Generating a new JWT secret.");
            fs::create_dir_all(dir)?;

            let secret: Vec<u8> = (0..64).map(|_| rand::random::<u8>()).collect();
            fs::write(&secret_path, &secret)?;

            Ok(Security::from_secret(secret))
        } else {
            Err(ConfigurationError::Security(secret_path))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_secret_is_reused() {
        let dir = tempfile::tempdir().expect("unable to create temp dir");

        let first = Security::load_from(dir.path()).expect("secret should be generated");
        assert_eq!(first.jwt_secret.len(), 64);

        let second = Security::load_from(dir.path()).expect("secret should load");
        assert_eq!(first.jwt_secret, second.jwt_secret);
    }

    #[test]
    fn debug_output_hides_secret() {
        let security = Security::from_secret(vec![42u8; 40]);
        let debug = format!("{:?}", security);
        assert!(debug.contains("40 bytes"));
        assert!(!debug.contains("42"));
    }
}
