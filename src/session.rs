//! C9: Session & CSRF — bearer-token admin sessions with sliding expiry,
//! and a CSRF nonce bound to the session for state-changing admin calls.
//! Process-local; not persisted across restarts (acceptable: admins
//! re-authenticate).

use std::collections::HashMap;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::model::Session;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    admin_username: String,
    admin_password: String,
    session_ttl: Duration,
}

fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Compares two strings without an early length-based exit, by comparing
/// fixed-size digests instead of the raw (variable-length) inputs.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let hash_a = Sha256::digest(a.as_bytes());
    let hash_b = Sha256::digest(b.as_bytes());
    constant_time_eq_bytes(&hash_a, &hash_b)
}

fn constant_time_eq_bytes(a: &[u8], b: &[u8]) -> bool {
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

impl SessionStore {
    pub fn new(admin_username: String, admin_password: String, session_ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            admin_username,
            admin_password,
            session_ttl,
        }
    }

    /// `Login(user, pass) -> {token, csrf}`: constant-time credential check,
    /// random opaque token + CSRF nonce, sliding expiry.
    pub fn login(&self, username: &str, password: &str) -> Result<(String, String), SessionError> {
        let user_ok = constant_time_eq(username, &self.admin_username);
        let pass_ok = constant_time_eq(password, &self.admin_password);
        if !(user_ok && pass_ok) {
            return Err(SessionError::InvalidCredentials);
        }

        let token = generate_token();
        let csrf = generate_token();
        let session = Session {
            token: token.clone(),
            username: username.to_string(),
            csrf_nonce: csrf.clone(),
            expires_at: Utc::now() + chrono::Duration::from_std(self.session_ttl).unwrap(),
        };
        self.sessions.lock().insert(token.clone(), session);
        Ok((token, csrf))
    }

    /// `Validate(token) -> username`: refreshes expiry on every touch.
    pub fn validate(&self, token: &str) -> Result<String, SessionError> {
        let mut sessions = self.sessions.lock();
        let session = sessions.get_mut(token).ok_or(SessionError::Unauthorized)?;
        if !session.is_valid() {
            sessions.remove(token);
            return Err(SessionError::Unauthorized);
        }
        session.expires_at = Utc::now() + chrono::Duration::from_std(self.session_ttl).unwrap();
        Ok(session.username.clone())
    }

    /// Every mutating admin call must present the csrf token matching the
    /// current session, otherwise `Forbidden`.
    pub fn check_csrf(&self, token: &str, csrf: &str) -> Result<(), SessionError> {
        let sessions = self.sessions.lock();
        let session = sessions.get(token).ok_or(SessionError::Unauthorized)?;
        if !session.is_valid() {
            return Err(SessionError::Unauthorized);
        }
        if !constant_time_eq(&session.csrf_nonce, csrf) {
            return Err(SessionError::Forbidden);
        }
        Ok(())
    }

    pub fn logout(&self, token: &str) {
        self.sessions.lock().remove(token);
    }

    pub fn prune_expired(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        let now = Utc::now();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }
}
