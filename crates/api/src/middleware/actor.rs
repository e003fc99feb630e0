//! Caller identity extractor.
//!
//! Authentication happens upstream; this service trusts the `x-user-id`
//! header set by the gateway and records it on uploads, publishes and jobs.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Recorded when a request carries no identity.
pub const ANONYMOUS: &str = "anonymous";

const MAX_LEN: usize = 200;

/// The acting user.
///
/// ```ignore
/// async fn my_handler(actor: Actor) -> AppResult<Json<()>> {
///     tracing::info!(actor = %actor.0, "handling request");
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor(pub String);

impl Actor {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(USER_ID_HEADER) else {
            return Ok(Actor(ANONYMOUS.to_string()));
        };
        let value = value
            .to_str()
            .map_err(|_| AppError::BadRequest(format!("{USER_ID_HEADER} must be visible ASCII")))?
            .trim();
        if value.is_empty() {
            return Ok(Actor(ANONYMOUS.to_string()));
        }
        if value.len() > MAX_LEN {
            return Err(AppError::BadRequest(format!(
                "{USER_ID_HEADER} must be at most {MAX_LEN} characters"
            )));
        }
        Ok(Actor(value.to_string()))
    }
}
