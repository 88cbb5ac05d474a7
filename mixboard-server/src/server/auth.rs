use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use mixboard_shared::domain::UserProfile;
use mixboard_shared::jwt::{self, JwtClaims};
use tracing::error;

use super::{AppError, AppState};

/// How many days before mandatory re-login.
const USER_TOKEN_TTL_DAYS: i64 = 30;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

impl AuthCtx {
    pub fn user_id(&self) -> &str {
        &self.claims.sub
    }

    pub fn profile(&self) -> UserProfile {
        self.claims.profile()
    }
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    // Reject tokens whose user no longer exists
    match state.store.get_user(&claims.sub).await {
        Ok(Some(_)) => {}
        Ok(None) => {
            tracing::warn!(user_id = %claims.sub, "auth: token for unknown user");
            return unauthorized();
        }
        Err(e) => {
            error!(user_id = %claims.sub, error=%e, "auth: user lookup failed");
            return Err(AppError::internal(e));
        }
    }

    req.extensions_mut().insert(AuthCtx { claims });
    Ok(next.run(req).await)
}

pub fn issue_jwt_for_user(state: &AppState, user: &UserProfile) -> Result<String, AppError> {
    let jti = uuid::Uuid::new_v4().to_string();
    let exp = (Utc::now() + Duration::days(USER_TOKEN_TTL_DAYS)).timestamp();
    let claims = JwtClaims {
        sub: user.id.clone(),
        jti,
        exp,
        email: user.email.clone(),
        name: user.display_name.clone(),
    };
    jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(user_id = %user.id, error=%e, "login/signup: jwt encode failed");
        AppError::internal(e)
    })
}

/// Cheap shape check: one `@` with non-empty local part and a dotted domain.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.chars().any(char::is_whitespace)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_shapes() {
        assert!(is_plausible_email("ann@example.com"));
        assert!(!is_plausible_email("ann.example.com"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("ann@localhost"));
        assert!(!is_plausible_email("ann@@example.com"));
        assert!(!is_plausible_email("a nn@example.com"));
        assert!(!is_plausible_email("ann@example."));
    }
}
