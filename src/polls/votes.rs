use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::info;

use super::{can_vote, require_poll};
use crate::{
    auth::Principal,
    error::{is_unique_violation, AppError},
    models::vote::Vote,
};

/// Records `principal`'s single vote on a poll.
///
/// The up-front duplicate check gives a clear error in the common case; the
/// `UNIQUE (poll_id, user_id)` constraint settles concurrent submissions.
pub async fn vote(
    pool: &SqlitePool,
    poll_id: i64,
    principal: Principal,
    option: &str,
    now: DateTime<Utc>,
) -> Result<Vote, AppError> {
    let user_id = principal.id();
    let mut conn = pool.acquire().await?;
    let poll = require_poll(&mut conn, poll_id).await?;

    if poll.is_expired(now) {
        return Err(AppError::policy("Poll has expired"));
    }
    if !can_vote(&poll, principal) {
        return Err(AppError::forbidden("You are not allowed to vote in this poll"));
    }
    if !poll.has_option(option) {
        return Err(AppError::validation(format!(
            "'{option}' is not an option of this poll"
        )));
    }

    let existing: Option<i64> =
        sqlx::query_scalar("SELECT id FROM votes WHERE poll_id = ? AND user_id = ?")
            .bind(poll_id)
            .bind(user_id)
            .fetch_optional(&mut *conn)
            .await?;
    if existing.is_some() {
        return Err(already_voted());
    }

    let id = insert_vote(&mut conn, poll_id, user_id, option, now).await?;

    info!(poll_id, user_id, vote_id = id, "Vote recorded");

    Ok(Vote {
        id,
        poll_id,
        user_id,
        option: option.to_string(),
        created_at: now,
    })
}

async fn insert_vote(
    conn: &mut SqliteConnection,
    poll_id: i64,
    user_id: i64,
    option: &str,
    now: DateTime<Utc>,
) -> Result<i64, AppError> {
    let result = sqlx::query(
        "INSERT INTO votes (poll_id, user_id, option, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(poll_id)
    .bind(user_id)
    .bind(option)
    .bind(now)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            already_voted()
        } else {
            AppError::from(e)
        }
    })?;
    Ok(result.last_insert_rowid())
}

fn already_voted() -> AppError {
    AppError::conflict("You have already voted in this poll")
}
