//! Poll lifecycle, visibility, voting and tallying.
//!
//! Every operation takes the current instant as an argument so that expiry rules are
//! evaluated against one clock reading per request.

pub mod access;
pub mod lifecycle;
pub mod results;
pub mod votes;

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use sqlx::SqliteConnection;

use crate::{
    auth::Principal,
    error::AppError,
    models::{
        poll::{Poll, PollRow},
        vote::Vote,
    },
};

pub use access::{get_one, list_visible, VisiblePolls};
pub use lifecycle::{create, delete, update};
pub use results::results;
pub use votes::vote;

/// Longest allowed distance between now and a poll's expiry.
pub const MAX_POLL_DURATION: Duration = Duration::hours(2);

pub(crate) async fn fetch_poll(
    conn: &mut SqliteConnection,
    poll_id: i64,
) -> Result<Option<Poll>, sqlx::Error> {
    let row = sqlx::query_as::<_, PollRow>("SELECT * FROM polls WHERE id = ?")
        .bind(poll_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let allowed = allowed_user_ids(conn, poll_id).await?;
            Ok(Some(row.into_poll(allowed)))
        }
        None => Ok(None),
    }
}

pub(crate) async fn require_poll(
    conn: &mut SqliteConnection,
    poll_id: i64,
) -> Result<Poll, AppError> {
    fetch_poll(conn, poll_id)
        .await?
        .ok_or_else(|| AppError::not_found("Poll not found"))
}

/// Attaches allow-lists to a batch of poll rows.
pub(crate) async fn hydrate(
    conn: &mut SqliteConnection,
    rows: Vec<PollRow>,
) -> Result<Vec<Poll>, sqlx::Error> {
    let mut polls = Vec::with_capacity(rows.len());
    for row in rows {
        let allowed = allowed_user_ids(conn, row.id).await?;
        polls.push(row.into_poll(allowed));
    }
    Ok(polls)
}

async fn allowed_user_ids(
    conn: &mut SqliteConnection,
    poll_id: i64,
) -> Result<Vec<i64>, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "SELECT user_id FROM poll_allowed_users WHERE poll_id = ? ORDER BY user_id",
    )
    .bind(poll_id)
    .fetch_all(conn)
    .await
}

pub(crate) async fn votes_for(
    conn: &mut SqliteConnection,
    poll_id: i64,
) -> Result<Vec<Vote>, sqlx::Error> {
    sqlx::query_as::<_, Vote>("SELECT * FROM votes WHERE poll_id = ? ORDER BY id")
        .bind(poll_id)
        .fetch_all(conn)
        .await
}

/// Read access: admins see everything, users need a public poll or allow-list membership.
pub fn can_view(poll: &Poll, principal: Principal) -> bool {
    match principal {
        Principal::Admin(_) => true,
        Principal::User(id) => is_listed(poll, id),
    }
}

/// Voting eligibility. Admins get no exemption from the allow-list here.
pub fn can_vote(poll: &Poll, principal: Principal) -> bool {
    is_listed(poll, principal.id())
}

fn is_listed(poll: &Poll, user_id: i64) -> bool {
    poll.is_public || poll.allowed_user_ids.contains(&user_id)
}

pub(crate) fn ensure_can_view(poll: &Poll, principal: Principal) -> Result<(), AppError> {
    if can_view(poll, principal) {
        Ok(())
    } else {
        Err(AppError::forbidden("You do not have access to this poll"))
    }
}

/// Users only learn whether they themselves are allow-listed; admins get the full list.
pub(crate) fn scope_allow_list(poll: &mut Poll, principal: Principal) {
    if let Principal::User(id) = principal {
        poll.allowed_user_ids.retain(|&allowed| allowed == id);
    }
}

pub(crate) fn check_duration(
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<(), AppError> {
    if expires_at - now > MAX_POLL_DURATION {
        return Err(AppError::policy("Maximum poll duration is 2 hours"));
    }
    Ok(())
}

pub(crate) fn normalize_title(title: &str) -> Result<String, AppError> {
    let title = title.trim();
    if title.is_empty() {
        return Err(AppError::validation("Title must not be empty"));
    }
    Ok(title.to_string())
}

pub(crate) fn normalize_description(description: Option<String>) -> Option<String> {
    description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
}

pub(crate) fn normalize_options(options: Vec<String>) -> Result<Vec<String>, AppError> {
    if options.is_empty() {
        return Err(AppError::validation("A poll needs at least one option"));
    }

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(options.len());
    for option in options {
        let option = option.trim().to_string();
        if option.is_empty() {
            return Err(AppError::validation("Options must not be empty"));
        }
        if !seen.insert(option.clone()) {
            return Err(AppError::validation(format!("Duplicate option: {option}")));
        }
        out.push(option);
    }
    Ok(out)
}

pub(crate) fn normalize_ids(mut ids: Vec<i64>) -> Vec<i64> {
    ids.sort_unstable();
    ids.dedup();
    ids
}
