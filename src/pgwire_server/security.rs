//! Startup authentication collaborators.
//!
//! The session only drives the handshake; whether a credential is good is decided
//! here. Password files hold argon2 PHC strings keyed by user name.

use std::collections::HashMap;

use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use password_hash::{PasswordHash, SaltString};
use tracing::debug;

/// Most challenge-continue rounds a session will run before giving up.
pub const MAX_AUTH_ROUNDS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Accepted,
    Rejected(String),
    /// Send these bytes back to the client and wait for another response.
    Challenge(Vec<u8>),
}

pub trait Authenticator: Send + Sync {
    /// False lets the user in without any password exchange.
    fn requires_password(&self, user: &str) -> bool;

    /// Judge one client response (PasswordMessage body without its terminator).
    fn authenticate(&self, user: &str, credential: &[u8]) -> AuthOutcome;
}

/// Accepts everyone. Used when `trust` is configured.
pub struct TrustAuthenticator;

impl Authenticator for TrustAuthenticator {
    fn requires_password(&self, _user: &str) -> bool { false }

    fn authenticate(&self, _user: &str, _credential: &[u8]) -> AuthOutcome { AuthOutcome::Accepted }
}

pub struct PasswordFileAuthenticator {
    users: HashMap<String, String>,
}

impl PasswordFileAuthenticator {
    pub fn from_map(users: HashMap<String, String>) -> Self { PasswordFileAuthenticator { users } }

    /// Load a JSON object `{ "user": "<argon2 PHC>" }`.
    pub fn load(path: &str) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading auth file {}", path))?;
        let users: HashMap<String, String> =
            serde_json::from_str(&text).with_context(|| format!("parsing auth file {}", path))?;
        for (user, phc) in &users {
            PasswordHash::new(phc).map_err(|e| anyhow!("auth file entry for '{}' is not a PHC string: {}", user, e))?;
        }
        Ok(PasswordFileAuthenticator { users })
    }

    pub fn user_count(&self) -> usize { self.users.len() }
}

impl Authenticator for PasswordFileAuthenticator {
    fn requires_password(&self, _user: &str) -> bool { true }

    fn authenticate(&self, user: &str, credential: &[u8]) -> AuthOutcome {
        let Some(phc) = self.users.get(user) else {
            debug!(target: "pgwire", "auth: unknown user '{}'", user);
            return AuthOutcome::Rejected(format!("password authentication failed for user \"{}\"", user));
        };
        let password = String::from_utf8_lossy(credential);
        if verify_password(phc, &password) {
            AuthOutcome::Accepted
        } else {
            AuthOutcome::Rejected(format!("password authentication failed for user \"{}\"", user))
        }
    }
}

/// Hash a password into an argon2 PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = Argon2::default().hash_password(password.as_bytes(), &salt).map_err(|e| anyhow!(e.to_string()))?;
    Ok(phc.to_string())
}

pub fn verify_password(phc: &str, password: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}
