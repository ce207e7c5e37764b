//! Bearer-credential boundary.
//!
//! The relay never interprets credentials itself; it hands the bearer token to
//! an [`Authenticator`] and only consumes the user identity it returns.

use std::collections::HashMap;

use axum::http::header::AUTHORIZATION;
use axum::http::HeaderMap;
use log::{debug, warn};

use crate::batchrelay::config::AuthConfig;
use crate::batchrelay::types::UserId;
use crate::error::{ErrorCode, RelayError};

pub trait Authenticator: Send + Sync {
    /// Resolve a bearer token to the user it belongs to
    fn authenticate(&self, token: &str) -> Result<UserId, RelayError>;
}

/// Token table loaded from configuration
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenAuthenticator {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(config.tokens.clone())
    }
}

impl Authenticator for StaticTokenAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserId, RelayError> {
        match self.tokens.get(token) {
            Some(user_id) => {
                debug!("Token accepted for user {}", user_id);
                Ok(user_id.clone())
            }
            None => {
                warn!("Rejected unknown bearer token");
                Err(RelayError::new(ErrorCode::Unauthorized, "Invalid token"))
            }
        }
    }
}

/// Extract the token from an `Authorization: Bearer …` header
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, RelayError> {
    let value = headers
        .get(AUTHORIZATION)
        .ok_or_else(|| RelayError::new(ErrorCode::Unauthorized, "Authorization header is expected"))?
        .to_str()
        .map_err(|_| RelayError::new(ErrorCode::Unauthorized, "Authorization header is not valid text"))?;

    let (scheme, token) = value.split_once(' ').unwrap_or((value, ""));
    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(RelayError::new(ErrorCode::Unauthorized, "Authorization header must start with Bearer"));
    }

    let token = token.trim();
    if token.is_empty() {
        return Err(RelayError::new(ErrorCode::Unauthorized, "Token not found"));
    }
    Ok(token)
}

/// Authenticate the caller of an HTTP request
pub fn authenticate_request(auth: &dyn Authenticator, headers: &HeaderMap) -> Result<UserId, RelayError> {
    auth.authenticate(bearer_token(headers)?)
}
