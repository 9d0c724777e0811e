use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::Response,
};
use tracing::error;

use crate::services::auth_service::{authenticate, get_auth_token};

/// Validates the caller's access token and makes the resolved `Identity`
/// available to downstream handlers via request extensions.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    // 1. Get the auth token from the request
    let token = match get_auth_token(req.headers(), None) {
        Ok(token) => token,
        Err(_) => return Err(StatusCode::UNAUTHORIZED),
    };

    // 2. Validate it and resolve the identity
    let identity = match authenticate(&token) {
        Ok(identity) => identity,
        Err(e) => {
            error!("Token validation failed: {}", e);
            return Err(StatusCode::UNAUTHORIZED);
        }
    };

    // 3. Hand the identity to downstream handlers
    req.extensions_mut().insert(identity);

    Ok(next.run(req).await)
}
