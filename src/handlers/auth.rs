use axum::{extract::State, http::StatusCode, Json};

use crate::{
    auth::{hash_password, issue_token, verify_password, Principal},
    error::AppError,
    extract::AppJson,
    models::user::{AuthResponse, CreateUser, LoginPayload, User},
    users, AppState,
};

const MIN_PASSWORD_LEN: usize = 6;

pub async fn register(
    State(state): State<AppState>,
    AppJson(payload): AppJson<CreateUser>,
) -> Result<(StatusCode, Json<User>), AppError> {
    let name = payload.name.trim();
    let email = payload.email.trim().to_lowercase();

    if name.is_empty() {
        return Err(AppError::validation("Name must not be empty"));
    }
    if !looks_like_email(&email) {
        return Err(AppError::validation("Please enter a valid email address"));
    }
    if payload.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::validation(format!(
            "Password must be at least {MIN_PASSWORD_LEN} characters long"
        )));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = users::insert(&state.db, name, &email, &password_hash, payload.role).await?;

    tracing::info!(user_id = user.id, role = ?user.role, "User registered");
    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    AppJson(payload): AppJson<LoginPayload>,
) -> Result<Json<AuthResponse>, AppError> {
    let email = payload.email.trim().to_lowercase();
    let user = users::find_by_email(&state.db, &email)
        .await?
        .ok_or(AppError::LoginFail)?;

    verify_password(&payload.password, &user.password_hash)?;

    let access_token = issue_token(&state, &user)?;
    tracing::debug!(user_id = user.id, "Issued access token");
    Ok(Json(AuthResponse { access_token }))
}

pub async fn list_users(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<Vec<User>>, AppError> {
    principal.require_admin("list users")?;
    Ok(Json(users::list(&state.db).await?))
}

/// Something `@` something `.` something, with no whitespace.
fn looks_like_email(email: &str) -> bool {
    if email.chars().any(char::is_whitespace) {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain
                    .split_once('.')
                    .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty())
        }
        None => false,
    }
}
