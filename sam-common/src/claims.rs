//! Caller identity carried with every request
//!
//! Claims are issued by the authentication front end and forwarded to the
//! services as request headers:
//! - `x-user-id`: user identifier (email)
//! - `x-user-role`: `SuperAdmin`, `Admin` or `User`
//! - `x-user-scopes`: comma separated scope codes the user may act on

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::Error;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";
pub const USER_SCOPES_HEADER: &str = "x-user-scopes";

/// User role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    SuperAdmin,
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "SuperAdmin",
            Role::Admin => "Admin",
            Role::User => "User",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "SuperAdmin" => Ok(Role::SuperAdmin),
            "Admin" => Ok(Role::Admin),
            "User" => Ok(Role::User),
            other => Err(Error::InvalidInput(format!("unknown role: {}", other))),
        }
    }
}

/// Authenticated caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub role: Role,
    pub scopes: Vec<String>,
}

impl Claims {
    pub fn new(user_id: impl Into<String>, role: Role, scopes: Vec<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            scopes,
        }
    }

    /// True when the caller may act on every scope given
    pub fn has_scopes(&self, scopes: &[&str]) -> bool {
        scopes
            .iter()
            .all(|wanted| self.scopes.iter().any(|s| s == wanted))
    }

    pub fn has_scope(&self, scope: &str) -> bool {
        self.has_scopes(&[scope])
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }

    /// Parse claims from forwarded headers; `None` when the identity headers are absent
    pub fn from_headers(headers: &axum::http::HeaderMap) -> Option<Self> {
        let user_id = headers.get(USER_ID_HEADER)?.to_str().ok()?.trim().to_string();
        if user_id.is_empty() {
            return None;
        }
        let role = headers
            .get(USER_ROLE_HEADER)?
            .to_str()
            .ok()?
            .parse::<Role>()
            .ok()?;
        let scopes = headers
            .get(USER_SCOPES_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        Some(Self { user_id, role, scopes })
    }
}

/// Rejection returned when the identity headers are missing
#[derive(Debug)]
pub struct ClaimsRejection;

impl axum::response::IntoResponse for ClaimsRejection {
    fn into_response(self) -> axum::response::Response {
        let body = axum::Json(serde_json::json!({
            "error": {
                "code": "PERMISSION_DENIED",
                "message": "ClaimsNotFoundError",
            }
        }));
        (axum::http::StatusCode::FORBIDDEN, body).into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Claims
where
    S: Send + Sync,
{
    type Rejection = ClaimsRejection;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Claims::from_headers(&parts.headers).ok_or(ClaimsRejection)
    }
}
