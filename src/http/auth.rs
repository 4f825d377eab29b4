use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::Json;

use super::handlers::ErrorResponse;

/// Caller identity, resolved before any handler runs.
///
/// Upstream terminates authentication and forwards the stable user key
/// in `x-user-id`; this extractor is the seam where direct token
/// validation would plug in. Handlers receive identity as an explicit
/// argument, never from ambient state.
pub struct UserId(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, Json<ErrorResponse>);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or((
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "missing x-user-id header".to_string(),
                }),
            ))
    }
}
