use axum::http::{header, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, TokenData, Validation};
use moka::sync::Cache;
use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::info;

use crate::models::Identity;

/// Cache of validated token -> identity pairs, so reconnecting tabs don't
/// re-verify on every upgrade. Entries idle out well before token expiry
/// matters in practice.
static IDENTITY_CACHE: OnceLock<Cache<String, Identity>> = OnceLock::new();

/// Initialize the identity cache. Should be called once at startup.
pub fn init_identity_cache() {
    IDENTITY_CACHE.get_or_init(|| {
        Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(5 * 60))
            .build()
    });
    info!("Identity cache initialized");
}

fn get_identity_cache() -> &'static Cache<String, Identity> {
    IDENTITY_CACHE
        .get()
        .expect("Identity cache not initialized. Call init_identity_cache() first.")
}

// Get the auth token from request headers or, for browser WebSocket clients
// that cannot set headers, the `token` query parameter.
pub fn get_auth_token(
    headers: &HeaderMap,
    query: Option<&HashMap<String, String>>,
) -> Result<String, String> {
    // 1. Try the Authorization header
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header".to_string())?;
        return Ok(auth_str
            .strip_prefix("Bearer ")
            .unwrap_or(auth_str)
            .to_string());
    }

    // 2. Try the auth_token cookie
    if let Some(cookie_header) = headers.get(header::COOKIE) {
        let cookie_str = cookie_header
            .to_str()
            .map_err(|_| "Invalid Cookie header".to_string())?;
        for cookie in cookie::Cookie::split_parse(cookie_str).flatten() {
            if cookie.name() == "auth_token" {
                return Ok(cookie.value().to_string());
            }
        }
    }

    // 3. Try the token query parameter
    if let Some(token) = query.and_then(|q| q.get("token")) {
        return Ok(token.clone());
    }

    Err("No auth token in headers, cookies or query".to_string())
}

// Validate a JWT token and return the token data
pub fn validate_jwt(
    token: &str,
    secret: &str,
) -> Result<TokenData<serde_json::Value>, jsonwebtoken::errors::Error> {
    let validation = Validation::new(Algorithm::HS256);
    let decoding_key = DecodingKey::from_secret(secret.as_bytes());
    decode::<serde_json::Value>(token, &decoding_key, &validation)
}

// Build an Identity from validated access-token claims. The fleet API signs
// tokens carrying userId, organisationId, role and permissions.
pub fn identity_from_claims(claims: &serde_json::Value) -> Result<Identity, String> {
    let user_id = claims
        .get("userId")
        .or_else(|| claims.get("sub"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Token has no userId claim".to_string())?;
    let organisation_id = claims
        .get("organisationId")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Token has no organisationId claim".to_string())?;
    let role = claims
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| "Token has no role claim".to_string())?;
    let permissions = claims
        .get("permissions")
        .and_then(|v| v.as_array())
        .map(|a| {
            a.iter()
                .filter_map(|p| p.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default();

    Ok(Identity {
        user_id: user_id.to_string(),
        organisation_id: organisation_id.to_string(),
        role: role.to_string(),
        permissions,
    })
}

/// Validate an access token and resolve the caller's identity. Runs exactly
/// once per connection, before any room operation is permitted.
pub fn authenticate(token: &str) -> Result<Identity, String> {
    let cache = get_identity_cache();
    if let Some(identity) = cache.get(token) {
        return Ok(identity);
    }

    let config = crate::config::get_config();
    let secret = config
        .auth_jwt_secret
        .as_ref()
        .ok_or_else(|| "No JWT secret configured!".to_string())?;

    let token_data = validate_jwt(token, secret).map_err(|e| format!("JWT validation failed: {}", e))?;
    let identity = identity_from_claims(&token_data.claims)?;
    info!("Token validated for user {}", identity.user_id);

    cache.insert(token.to_string(), identity.clone());
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn make_token(secret: &str) -> String {
        let claims = json!({
            "userId": "u1",
            "email": "u1@test.com",
            "organisationId": "org1",
            "role": "OPERATOR",
            "permissions": ["WORK_ORDER_EDIT"],
            "exp": Utc::now().timestamp() + 3600,
        });
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_identity() {
        let token = make_token("test-secret");
        let data = validate_jwt(&token, "test-secret").unwrap();
        let identity = identity_from_claims(&data.claims).unwrap();
        assert_eq!(identity.user_id, "u1");
        assert_eq!(identity.organisation_id, "org1");
        assert_eq!(identity.role, "OPERATOR");
        assert_eq!(identity.permissions, vec!["WORK_ORDER_EDIT"]);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = make_token("test-secret");
        assert!(validate_jwt(&token, "other-secret").is_err());
    }

    #[test]
    fn claims_without_user_are_rejected() {
        let claims = json!({"organisationId": "org1", "role": "OPERATOR"});
        assert!(identity_from_claims(&claims).is_err());
    }

    #[test]
    fn token_is_taken_from_header_cookie_or_query() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        assert_eq!(get_auth_token(&headers, None).unwrap(), "abc");

        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=def"),
        );
        assert_eq!(get_auth_token(&headers, None).unwrap(), "def");

        let headers = HeaderMap::new();
        let mut query = HashMap::new();
        query.insert("token".to_string(), "ghi".to_string());
        assert_eq!(get_auth_token(&headers, Some(&query)).unwrap(), "ghi");

        assert!(get_auth_token(&headers, None).is_err());
    }
}
