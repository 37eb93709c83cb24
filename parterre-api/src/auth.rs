use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::error::AppError;

pub const USER_HEADER: &str = "X-User-ID";

/// Identity of the caller, taken from the `X-User-ID` header. Every
/// endpoint requires it; a reservation or booking is mutable only by its
/// holder.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(|value| CurrentUser(value.to_string()))
            .ok_or_else(|| AppError::Unauthorized(format!("missing {USER_HEADER} header")))
    }
}
