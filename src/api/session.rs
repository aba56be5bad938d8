//! Identity guard for the protected commands.
use std::fmt;
use tracing::{info, instrument};

use super::ApiClient;
use crate::error::ApiError;
use crate::model::User;

#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }

    /// Pair `email` with the password stored in environment variable `var`.
    /// Returns `None` when either is missing.
    pub fn from_env(email: &str, var: &str) -> Option<Self> {
        if email.trim().is_empty() {
            return None;
        }
        let password = std::env::var(var).ok().filter(|p| !p.is_empty())?;
        Some(Self::new(email.trim(), password))
    }
}

/// Return the signed-in user. Without a session this signs in once with
/// `credentials`; with no credentials it reports [`ApiError::Unauthorized`]
/// and the caller sends the user to the login flow.
#[instrument(skip_all)]
pub async fn require_user(
    api: &ApiClient,
    credentials: Option<&Credentials>,
) -> Result<User, ApiError> {
    match api.current_user().await {
        Err(ApiError::Unauthorized) => {
            let Some(credentials) = credentials else {
                info!("no session and no credentials configured");
                return Err(ApiError::Unauthorized);
            };
            info!(email = %credentials.email, "no session; signing in");
            api.login(&credentials.email, &credentials.password).await?;
            api.current_user().await
        }
        other => other,
    }
}
