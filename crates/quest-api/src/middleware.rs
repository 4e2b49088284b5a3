use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
    typed_header::TypedHeaderRejection,
};

use quest_gateway::auth::verify_token;

use crate::AppState;
use crate::error::ApiError;

/// Validates the bearer token and stores its `Claims` as a request extension.
pub async fn require_auth(
    State(state): State<AppState>,
    bearer: Result<TypedHeader<Authorization<Bearer>>, TypedHeaderRejection>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let TypedHeader(Authorization(bearer)) = bearer.map_err(|_| ApiError::unauthorized())?;

    let claims = verify_token(bearer.token(), &state.jwt_secret).ok_or_else(ApiError::unauthorized)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
