//! Auth/Session Registry (C6) and credential verification (A6).
//!
//! Sessions are opaque bearer tokens mapped to `(username, role, expires_at)` in an
//! in-process map; a restart invalidates every session, which is acceptable per
//! acceptable here.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use rand::RngCore;

use crate::error::AppError;
use crate::models::AdminUser;

const SESSION_LIFETIME_HOURS: i64 = 24;

#[derive(Clone, Debug)]
pub struct Session {
    pub username: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Opaque 128-bit bearer token, base32-ish via hex encoding for transport simplicity.
pub type Token = String;

/// In-process session registry. Read-heavy, concurrent insert/remove.
pub struct SessionRegistry {
    sessions: DashMap<Token, Session>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Mint a new session for `(username, role)`, valid for 24h from now.
    pub fn issue(&self, username: &str, role: &str) -> (Token, DateTime<Utc>) {
        let token = generate_token();
        let created_at = Utc::now();
        let expires_at = created_at + Duration::hours(SESSION_LIFETIME_HOURS);

        self.sessions.insert(
            token.clone(),
            Session {
                username: username.to_string(),
                role: role.to_string(),
                created_at,
                expires_at,
            },
        );

        (token, expires_at)
    }

    /// Resolve a bearer token to its session, purging it if expired.
    pub fn resolve(&self, token: &str) -> Result<Session, AppError> {
        let Some(entry) = self.sessions.get(token) else {
            return Err(AppError::InvalidToken);
        };

        if Utc::now() > entry.expires_at {
            drop(entry);
            self.sessions.remove(token);
            return Err(AppError::ExpiredToken);
        }

        Ok(entry.clone())
    }

    pub fn logout(&self, token: &str) {
        self.sessions.remove(token);
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn generate_token() -> Token {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Verify a plaintext password against a stored argon2 hash.
pub fn verify_password(password: &str, password_hash: &str) -> Result<(), AppError> {
    let parsed = PasswordHash::new(password_hash)
        .map_err(|e| AppError::Internal(format!("corrupt password hash: {e}")))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| AppError::BadCredentials)
}

/// Hash a plaintext password for storage (used by admin provisioning, not on the request path).
pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut rand::thread_rng());
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| AppError::Internal(format!("failed to hash password: {e}")))
}

pub fn authorize_role(user: &AdminUser) -> Result<&str, AppError> {
    if !user.active {
        return Err(AppError::BadCredentials);
    }
    Ok(user.role.as_str())
}
