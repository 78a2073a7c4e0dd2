//! Answers HTTP authentication challenges with the configured credentials.
//!
//! The attempt counter is shared by every request in the process, not kept
//! per request or per host: two requests challenged at the same time use up
//! the same budget. Once the budget is spent the challenge is refused, the
//! counter goes back to zero and the caller reports a 401.

use crate::transport::Credentials;

/// Status reported when the attempt budget is exhausted.
pub const AUTH_EXHAUSTED_STATUS: u16 = 401;

/// Reason phrase reported when the attempt budget is exhausted.
pub const AUTH_EXHAUSTED_REASON: &str = "Authorization Required";

/// Default number of challenges answered before giving up.
pub const DEFAULT_MAX_AUTH_ATTEMPTS: u32 = 3;

/// What to do with an authentication challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthDecision {
    /// Answer the challenge with these credentials.
    Provide(Credentials),
    /// Give up: report a 401 and close the transfer.
    Exhausted,
}

#[derive(Debug, Clone)]
pub struct AuthCoordinator {
    attempts: u32,
    max_attempts: u32,
    credentials: Credentials,
}

impl Default for AuthCoordinator {
    fn default() -> Self {
        Self::new(Credentials::default(), DEFAULT_MAX_AUTH_ATTEMPTS)
    }
}

impl AuthCoordinator {
    pub fn new(credentials: Credentials, max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            credentials,
        }
    }

    /// Handles one challenge.
    pub fn on_challenge(&mut self) -> AuthDecision {
        if self.attempts < self.max_attempts {
            self.attempts += 1;
            AuthDecision::Provide(self.credentials.clone())
        } else {
            self.attempts = 0;
            AuthDecision::Exhausted
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn set_max_attempts(&mut self, max_attempts: u32) {
        self.max_attempts = max_attempts;
    }

    pub fn set_username(&mut self, username: impl Into<String>) {
        self.credentials.username = username.into();
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.credentials.password = password.into();
    }
}
