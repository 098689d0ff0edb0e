//! [`SessionAuthenticator`] – single-admin bearer tokens.
//!
//! A successful [`login`][SessionAuthenticator::login] mints a fresh 128-bit
//! random token and overwrites the previous one, so at most one session is
//! valid at any time.  Tokens never expire; they die with the process or
//! with the next login.
//!
//! [`validate`][SessionAuthenticator::validate] always allows in
//! [`NetworkMode::Provisioning`] (the setup portal has no authentication
//! surface) and otherwise requires the presented token to equal the current
//! one.
//!
//! Login attempts are throttled with a `governor` rate limiter so the admin
//! password cannot be brute-forced at wire speed.
//!
//! # Example
//!
//! ```
//! use agv_kernel::session::{LoginOutcome, SessionAuthenticator};
//! use agv_types::NetworkMode;
//!
//! let mut auth = SessionAuthenticator::new("admin", "admin123");
//! let LoginOutcome::Granted(token) = auth.login("admin", "admin123") else {
//!     panic!("login should succeed");
//! };
//! assert!(auth.validate(NetworkMode::Operational, Some(&token)));
//! assert!(!auth.validate(NetworkMode::Operational, Some("guess")));
//! ```

use std::num::NonZeroU32;

use agv_types::NetworkMode;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use rand::RngCore;
use rand::rngs::OsRng;
use tracing::{info, warn};

/// Default number of login attempts accepted per minute.
pub const DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE: u32 = 10;

/// Number of random bytes in a session token (128 bits).
const TOKEN_BYTES: usize = 16;

/// The currently valid session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    token: String,
    issued_at: DateTime<Utc>,
}

impl Session {
    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }
}

/// Result of a login attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    /// Credentials matched; carries the new token.
    Granted(String),
    /// Wrong username or password.
    Rejected,
    /// Too many attempts in the current window.
    Throttled,
}

pub struct SessionAuthenticator {
    admin_username: String,
    admin_secret: String,
    current: Option<Session>,
    limiter: DefaultDirectRateLimiter,
}

impl SessionAuthenticator {
    /// Create an authenticator for the given admin identity with the default
    /// login throttle.
    pub fn new(admin_username: impl Into<String>, admin_secret: impl Into<String>) -> Self {
        Self::with_login_rate(
            admin_username,
            admin_secret,
            DEFAULT_LOGIN_ATTEMPTS_PER_MINUTE,
        )
    }

    /// Like [`new`][Self::new] but with `attempts_per_minute` login attempts
    /// allowed before throttling.  Zero is treated as one.
    pub fn with_login_rate(
        admin_username: impl Into<String>,
        admin_secret: impl Into<String>,
        attempts_per_minute: u32,
    ) -> Self {
        let per_minute = NonZeroU32::new(attempts_per_minute).unwrap_or(NonZeroU32::MIN);
        Self {
            admin_username: admin_username.into(),
            admin_secret: admin_secret.into(),
            current: None,
            limiter: RateLimiter::direct(Quota::per_minute(per_minute)),
        }
    }

    /// Attempt a login.  On success the previous token, if any, stops being
    /// valid.
    pub fn login(&mut self, username: &str, secret: &str) -> LoginOutcome {
        if self.limiter.check().is_err() {
            warn!(username, "login attempt throttled");
            return LoginOutcome::Throttled;
        }

        if username != self.admin_username || secret != self.admin_secret {
            warn!(username, "login rejected");
            return LoginOutcome::Rejected;
        }

        let session = Session {
            token: generate_token(),
            issued_at: Utc::now(),
        };
        let token = session.token.clone();
        self.current = Some(session);
        info!(username, "login granted, previous session replaced");
        LoginOutcome::Granted(token)
    }

    /// Check a presented bearer token against the current session.
    pub fn validate(&self, mode: NetworkMode, presented: Option<&str>) -> bool {
        if mode == NetworkMode::Provisioning {
            return true;
        }
        match (&self.current, presented) {
            (Some(session), Some(token)) => session.token == token,
            _ => false,
        }
    }

    /// The currently valid session, if anyone has logged in.
    pub fn current(&self) -> Option<&Session> {
        self.current.as_ref()
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
