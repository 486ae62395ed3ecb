use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use uuid::Uuid;

use crate::auth::{AppState, verify_token};
use crate::blocking;
use crate::error::ApiError;
use crate::mapping;

/// The authenticated caller, attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub image: Option<String>,
}

/// Validate the bearer JWT and load the caller. A token for a user that no
/// longer exists is rejected like a bad token.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();

    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state)
            .await
            .map_err(|_| ApiError::Unauthorized)?;

    let user_id = verify_token(&state.jwt_secret, bearer.token())?;
    let user = blocking(&state.db, move |db| db.get_user_by_id(&user_id.to_string()))
        .await?
        .ok_or(ApiError::Unauthorized)?;

    let auth_user = AuthUser {
        id: mapping::id(&user.id, "user"),
        email: user.email,
        name: user.name,
        role: user.role,
        image: user.image,
    };

    let mut req = Request::from_parts(parts, body);
    req.extensions_mut().insert(auth_user);
    Ok(next.run(req).await)
}
