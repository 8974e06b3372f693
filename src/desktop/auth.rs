//! Caller identity from the fronting auth proxy.
//!
//! The proxy authenticates the browser session and forwards the user's id
//! (and optional profile fields) as request headers. Requests without the id
//! header are rejected with 401.

use axum::extract::FromRequestParts;
use axum::http::HeaderMap;
use axum::http::request::Parts;

use super::api::{ApiError, SharedState};
use super::models::UpsertUser;
use crate::config::AuthSection;

/// The authenticated caller. Extracting it also guarantees a `users` row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub profile_image_url: Option<String>,
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

impl AuthUser {
    /// Read the identity headers named in `config`.
    pub fn from_headers(headers: &HeaderMap, config: &AuthSection) -> Option<Self> {
        let id = header_value(headers, &config.user_id_header)?;
        Some(Self {
            id,
            email: header_value(headers, &config.email_header),
            first_name: header_value(headers, &config.first_name_header),
            last_name: header_value(headers, &config.last_name_header),
            profile_image_url: header_value(headers, &config.profile_image_header),
        })
    }

    pub fn to_upsert(&self) -> UpsertUser {
        UpsertUser {
            id: self.id.clone(),
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            profile_image_url: self.profile_image_url.clone(),
        }
    }
}

impl FromRequestParts<SharedState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &SharedState,
    ) -> Result<Self, Self::Rejection> {
        let user = Self::from_headers(&parts.headers, &state.auth).ok_or(ApiError::Unauthorized)?;
        let id = user.id.clone();
        state.db.call(move |db| db.ensure_user(&id)).await?;
        Ok(user)
    }
}
