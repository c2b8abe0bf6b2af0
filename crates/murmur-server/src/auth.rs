//! Request identity, resolved through the [`AuthContext`](crate::store::AuthContext).
//!
//! The session token is taken from, in order: an `Authorization: Bearer`
//! header, the session cookie, or the `token` query parameter (browsers
//! cannot set headers on a WebSocket handshake).

use axum::extract::{FromRequestParts, Query};
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use serde::Deserialize;

use murmur_shared::constants::SESSION_COOKIE;
use murmur_shared::UserId;

use crate::api::AppState;
use crate::error::ServerError;
use crate::store::blocking;

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct AuthUser(pub UserId);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = session_token(parts)
            .ok_or_else(|| ServerError::Unauthorized("missing session token".into()))?;

        match blocking(&state.auth, move |a| a.authenticate(&token)).await? {
            Some(identity) => Ok(AuthUser(identity)),
            None => Err(ServerError::Unauthorized("invalid session token".into())),
        }
    }
}

fn session_token(parts: &Parts) -> Option<String> {
    let bearer = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim);
    if let Some(token) = bearer.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    let cookie = parts
        .headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim());
    if let Some(token) = cookie.filter(|t| !t.is_empty()) {
        return Some(token.to_string());
    }

    Query::<TokenQuery>::try_from_uri(&parts.uri)
        .ok()
        .and_then(|Query(q)| q.token)
        .filter(|t| !t.is_empty())
}
