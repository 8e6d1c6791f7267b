//! Credential checks against the user allow-list.
//!
//! Hashes use the werkzeug layout `pbkdf2:<digest>[:<iterations>]$<salt>$<hex>`
//! so existing allow-lists keep working.

use crate::config::load_users;
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Sha256, Sha512};
use std::collections::HashMap;
use thiserror::Error;

pub const DEFAULT_ITERATIONS: u32 = 600_000;
const SALT_LENGTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Request must contain the following keys: [\"username\", \"password\"].")]
    MissingCredentials,

    #[error("Authentication is failed.\nWrong username or password.")]
    InvalidCredentials,

    #[error("malformed password hash: {0}")]
    MalformedHash(String),

    #[error("unsupported hash method: {0}")]
    UnsupportedMethod(String),
}

#[derive(Debug, Clone, Default)]
pub struct UserAllowList {
    users: HashMap<String, String>,
}

impl UserAllowList {
    pub fn new(users: HashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let users = load_users(path)?;
        tracing::info!("Loaded {} user(s) from {}", users.len(), path);
        Ok(Self::new(users))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Empty strings count as missing.
    pub fn verify(&self, username: Option<&str>, password: Option<&str>) -> Result<(), AuthError> {
        let (username, password) = match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
            _ => return Err(AuthError::MissingCredentials),
        };

        let hash = self
            .users
            .get(username)
            .ok_or(AuthError::InvalidCredentials)?;

        match check_password_hash(hash, password) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AuthError::InvalidCredentials),
            Err(e) => {
                tracing::warn!("Stored hash for '{}' is unusable: {}", username, e);
                Err(AuthError::InvalidCredentials)
            }
        }
    }
}

fn derive(digest: &str, password: &str, salt: &str, iterations: u32) -> Result<Vec<u8>, AuthError> {
    match digest {
        "sha256" => {
            let mut out = [0u8; 32];
            pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
            Ok(out.to_vec())
        }
        "sha512" => {
            let mut out = [0u8; 64];
            pbkdf2::pbkdf2_hmac::<Sha512>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
            Ok(out.to_vec())
        }
        other => Err(AuthError::UnsupportedMethod(format!("pbkdf2:{}", other))),
    }
}

pub fn check_password_hash(hash: &str, password: &str) -> Result<bool, AuthError> {
    let mut parts = hash.splitn(3, '$');
    let (method, salt, expected) = match (parts.next(), parts.next(), parts.next()) {
        (Some(m), Some(s), Some(h)) => (m, s, h),
        _ => return Err(AuthError::MalformedHash("expected method$salt$hash".to_string())),
    };

    let mut method_parts = method.split(':');
    if method_parts.next() != Some("pbkdf2") {
        return Err(AuthError::UnsupportedMethod(method.to_string()));
    }
    let digest = method_parts.next().unwrap_or("sha256");
    let iterations = match method_parts.next() {
        Some(n) => n
            .parse::<u32>()
            .map_err(|_| AuthError::MalformedHash(format!("bad iteration count '{}'", n)))?,
        None => DEFAULT_ITERATIONS,
    };

    let expected = hex::decode(expected).map_err(|e| AuthError::MalformedHash(e.to_string()))?;
    let actual = derive(digest, password, salt, iterations)?;
    Ok(constant_time_eq(&actual, &expected))
}

pub fn generate_password_hash(password: &str) -> String {
    generate_password_hash_with(password, DEFAULT_ITERATIONS)
}

pub fn generate_password_hash_with(password: &str, iterations: u32) -> String {
    let salt: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LENGTH)
        .map(char::from)
        .collect();
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut out);
    format!("pbkdf2:sha256:{}${}${}", iterations, salt, hex::encode(out))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    // PBKDF2-HMAC-SHA256 vector from RFC 7914: "passwd", "salt", 1 round.
    const KNOWN_HASH: &str =
        "pbkdf2:sha256:1$salt$55ac046e56e3089fec1691c22544b605f94185216dde0465e68b9d57c20dacbc";

    fn allow_list() -> UserAllowList {
        let mut users = HashMap::new();
        users.insert("bot".to_string(), generate_password_hash_with("secret", 1000));
        UserAllowList::new(users)
    }

    #[test]
    fn test_check_known_hash() {
        assert_eq!(check_password_hash(KNOWN_HASH, "passwd"), Ok(true));
        assert_eq!(check_password_hash(KNOWN_HASH, "Passwd"), Ok(false));
    }

    #[test]
    fn test_generated_hash_verifies() {
        let hash = generate_password_hash_with("hunter2", 1000);
        assert!(hash.starts_with("pbkdf2:sha256:1000$"));
        assert_eq!(check_password_hash(&hash, "hunter2"), Ok(true));
    }

    #[test]
    fn test_unsupported_and_malformed_hashes() {
        assert!(matches!(
            check_password_hash("scrypt:32768:8:1$salt$00", "x"),
            Err(AuthError::UnsupportedMethod(_))
        ));
        assert!(matches!(
            check_password_hash("pbkdf2:sha256", "x"),
            Err(AuthError::MalformedHash(_))
        ));
        assert!(matches!(
            check_password_hash("pbkdf2:sha256:1000$salt$zz", "x"),
            Err(AuthError::MalformedHash(_))
        ));
    }

    #[test]
    fn test_allow_list_file_matches_exact_usernames() {
        use std::io::Write;

        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "AliceBot: \"{}\"\njohn.doe: \"{}\"",
            generate_password_hash_with("alice-pw", 1000),
            generate_password_hash_with("john-pw", 1000)
        )
        .unwrap();

        let users = UserAllowList::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(users.len(), 2);
        assert_eq!(users.verify(Some("AliceBot"), Some("alice-pw")), Ok(()));
        assert_eq!(
            users.verify(Some("alicebot"), Some("alice-pw")),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(users.verify(Some("john.doe"), Some("john-pw")), Ok(()));
    }

    #[test]
    fn test_verify_outcomes() {
        let users = allow_list();
        assert_eq!(users.verify(Some("bot"), Some("secret")), Ok(()));
        assert_eq!(
            users.verify(Some("bot"), Some("wrong")),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            users.verify(Some("stranger"), Some("secret")),
            Err(AuthError::InvalidCredentials)
        );
        assert_eq!(
            users.verify(Some("bot"), None),
            Err(AuthError::MissingCredentials)
        );
        assert_eq!(
            users.verify(Some(""), Some("secret")),
            Err(AuthError::MissingCredentials)
        );
    }
}
