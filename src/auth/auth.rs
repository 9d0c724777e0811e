use axum::{http::StatusCode, Json};

use crate::models::{ErrorResponse, Identity};

pub fn ensure_admin(identity: &Identity) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if identity.is_admin() {
        return Ok(());
    }

    let status = StatusCode::FORBIDDEN;
    Err((
        status,
        Json(ErrorResponse {
            code: status.as_u16(),
            status: status.to_string(),
            error: "Admin access required".to_string(),
        }),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(role: &str) -> Identity {
        Identity {
            user_id: "u1".to_string(),
            organisation_id: "org1".to_string(),
            role: role.to_string(),
            permissions: Vec::new(),
        }
    }

    #[test]
    fn only_admins_pass_ensure_admin() {
        assert!(ensure_admin(&identity("ADMIN")).is_ok());
        assert!(ensure_admin(&identity("OPERATOR")).is_err());
    }
}
