//! Bearer credential extraction
//!
//! Agents authenticate with a pool token at registration and with their
//! session token afterwards. Both travel as `Authorization: Bearer <secret>`.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use terrarun_core::domain::agent::Agent;
use uuid::Uuid;

use crate::api::AppState;
use crate::api::error::ApiError;
use crate::service::registry_service::{self, RegistryError};

/// The raw bearer secret of a request
///
/// Usage:
/// ```rust,ignore
/// async fn handler(BearerToken(secret): BearerToken) -> ApiResult<()> {
///     // look the secret up
/// }
/// ```
pub struct BearerToken(pub String);

impl<S> FromRequestParts<S> for BearerToken
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ApiError::unauthorized("Missing authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ApiError::unauthorized("Invalid authorization format. Use: Bearer <token>")
            })?;

        Ok(BearerToken(token.to_string()))
    }
}

/// Resolve the agent behind a session token, rejecting with 401 on mismatch
pub async fn authenticate_agent(
    state: &AppState,
    agent_id: Uuid,
    BearerToken(session): &BearerToken,
) -> Result<Agent, ApiError> {
    registry_service::authenticate(state.repo.as_ref(), agent_id, session)
        .await
        .map_err(|e| match e {
            RegistryError::UnknownAgent(_) => ApiError::unauthorized("Invalid agent session"),
            other => other.into(),
        })
}
