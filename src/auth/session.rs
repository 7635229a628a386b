//! Session management
//!
//! Uses HMAC-signed tokens stored in cookies.
//! No server-side session storage needed.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::signing;
use crate::error::AppError;

/// Authenticated user as reported by the identity provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionUser {
    /// Provider subject (`sub` claim)
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub email_verified: bool,
}

/// User session data
///
/// Stored in a signed cookie.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Session identifier (ULID)
    pub id: String,
    pub user: SessionUser,
    /// Provider the user signed in with
    pub provider_id: String,
    /// When session was created
    pub created_at: DateTime<Utc>,
    /// When the cookie was last issued
    pub updated_at: DateTime<Utc>,
    /// When session expires
    pub expires_at: DateTime<Utc>,
}

impl Session {
    /// Start a new session lasting `max_age` seconds
    pub fn new(user: SessionUser, provider_id: impl Into<String>, max_age: i64) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string(),
            user,
            provider_id: provider_id.into(),
            created_at: now,
            updated_at: now,
            expires_at: now + Duration::seconds(max_age),
        }
    }

    /// Check if session is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at < Utc::now()
    }

    /// Whether the cookie was issued more than `update_age` seconds ago
    pub fn needs_refresh(&self, update_age: i64) -> bool {
        self.updated_at + Duration::seconds(update_age) <= Utc::now()
    }

    /// Extend the session to `max_age` seconds from now
    pub fn refreshed(mut self, max_age: i64) -> Self {
        let now = Utc::now();
        self.updated_at = now;
        self.expires_at = now + Duration::seconds(max_age);
        self
    }
}

/// Create a signed session token
///
/// # Arguments
/// * `session` - Session data to encode
/// * `secret` - HMAC secret key
pub fn create_session_token(session: &Session, secret: &str) -> Result<String, AppError> {
    signing::sign(session, secret)
}

/// Verify and decode a session token
///
/// # Errors
/// Returns error if signature is invalid, token is malformed or
/// the session has expired
pub fn verify_session_token(token: &str, secret: &str) -> Result<Session, AppError> {
    let session: Session = signing::verify(token, secret)?;

    if session.is_expired() {
        return Err(AppError::Unauthorized);
    }

    Ok(session)
}
