use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{decode, encode, Algorithm, Header, Validation};

use crate::{
    error::AppError,
    models::user::{Claims, Role, User},
    AppState,
};

/// The authenticated caller of a request.
///
/// Role-dependent rules match on this instead of comparing role strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    Admin(i64),
    User(i64),
}

impl Principal {
    pub fn new(id: i64, role: Role) -> Self {
        match role {
            Role::Admin => Principal::Admin(id),
            Role::User => Principal::User(id),
        }
    }

    pub fn id(&self) -> i64 {
        match *self {
            Principal::Admin(id) | Principal::User(id) => id,
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Principal::Admin(_) => Role::Admin,
            Principal::User(_) => Role::User,
        }
    }

    /// Returns the admin's id, or `Forbidden` naming the attempted action.
    pub fn require_admin(&self, action: &str) -> Result<i64, AppError> {
        match *self {
            Principal::Admin(id) => Ok(id),
            Principal::User(_) => Err(AppError::forbidden(format!("Only admins can {action}"))),
        }
    }

    fn from_claims(claims: &Claims) -> Result<Self, AppError> {
        let id = claims
            .sub
            .parse()
            .map_err(|_| AppError::Unauthorized("Malformed token subject".into()))?;
        Ok(Principal::new(id, claims.role))
    }
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<(), AppError> {
    let parsed_hash = PasswordHash::new(hash)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .map_err(|_| AppError::LoginFail)
}

pub fn issue_token(state: &AppState, user: &User) -> Result<String, AppError> {
    let now = chrono::Utc::now();
    let expiration = now + chrono::Duration::hours(state.token_ttl_hours);

    let claims = Claims {
        sub: user.id.to_string(),
        email: user.email.clone(),
        role: user.role,
        iat: now.timestamp() as usize,
        exp: expiration.timestamp() as usize,
    };

    Ok(encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &state.encoding_key,
    )?)
}

pub fn verify_token(state: &AppState, token: &str) -> Result<Principal, AppError> {
    let data = decode::<Claims>(token, &state.decoding_key, &Validation::new(Algorithm::HS256))
        .map_err(|e| {
            tracing::debug!("Rejected bearer token: {}", e);
            AppError::Unauthorized("Invalid or expired token".into())
        })?;
    Principal::from_claims(&data.claims)
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;
        verify_token(state, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn state() -> AppState {
        let config = Config {
            bind_addr: "127.0.0.1:0".into(),
            database_url: "sqlite::memory:".into(),
            db_max_connections: 1,
            db_acquire_timeout: std::time::Duration::from_secs(1),
            jwt_secret: "test-secret".into(),
            token_ttl_hours: 1,
            cors_origins: vec![],
        };
        let db = sqlx::sqlite::SqlitePoolOptions::new()
            .connect_lazy("sqlite::memory:")
            .unwrap();
        AppState::new(db, &config)
    }

    fn user(id: i64, role: Role) -> User {
        let now = chrono::Utc::now();
        User {
            id,
            email: format!("u{id}@example.com"),
            name: "U".into(),
            password_hash: String::new(),
            role,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn issued_token_round_trips_to_principal() {
        let state = state();
        let token = issue_token(&state, &user(7, Role::Admin)).unwrap();
        assert_eq!(verify_token(&state, &token).unwrap(), Principal::Admin(7));

        let token = issue_token(&state, &user(8, Role::User)).unwrap();
        assert_eq!(verify_token(&state, &token).unwrap(), Principal::User(8));
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let state = state();
        let err = verify_token(&state, "not-a-jwt").unwrap_err();
        assert!(matches!(err, AppError::Unauthorized(_)));
    }

    #[test]
    fn password_hash_verifies_only_the_original() {
        let hash = hash_password("hunter22").unwrap();
        assert!(verify_password("hunter22", &hash).is_ok());
        assert!(matches!(
            verify_password("hunter23", &hash),
            Err(AppError::LoginFail)
        ));
    }

    #[test]
    fn only_admin_passes_require_admin() {
        assert_eq!(Principal::Admin(1).require_admin("create polls").unwrap(), 1);
        let err = Principal::User(2).require_admin("create polls").unwrap_err();
        assert_eq!(err.to_string(), "Only admins can create polls");
    }
}
