use chrono::Utc;
use sqlx::SqlitePool;

use crate::{
    error::{is_unique_violation, AppError},
    models::user::{Role, User},
};

/// Inserts a user whose password has already been hashed.
pub async fn insert(
    pool: &SqlitePool,
    name: &str,
    email: &str,
    password_hash: &str,
    role: Role,
) -> Result<User, AppError> {
    let now = Utc::now();
    let result = sqlx::query(
        "INSERT INTO users (email, name, password_hash, role, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(email)
    .bind(name)
    .bind(password_hash)
    .bind(role)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            AppError::conflict("Email already exists")
        } else {
            AppError::from(e)
        }
    })?;

    Ok(User {
        id: result.last_insert_rowid(),
        email: email.to_string(),
        name: name.to_string(),
        password_hash: password_hash.to_string(),
        role,
        created_at: now,
        updated_at: now,
    })
}

pub async fn find_by_email(pool: &SqlitePool, email: &str) -> Result<Option<User>, AppError> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

pub async fn list(pool: &SqlitePool) -> Result<Vec<User>, AppError> {
    let users = sqlx::query_as::<_, User>("SELECT * FROM users ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(users)
}
