use serde::Serialize;
use sqlx::SqlitePool;
use tracing::debug;

use super::{ensure_can_view, hydrate, require_poll, scope_allow_list, votes_for};
use crate::{
    auth::Principal,
    error::AppError,
    models::poll::{Poll, PollRow, PollWithVotes},
};

/// What a principal gets back from listing polls.
///
/// Admins see their own workspace (polls they authored, with votes); users see every poll
/// that is public or that allow-lists them. The two sets are deliberately unrelated.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum VisiblePolls {
    Authored(Vec<PollWithVotes>),
    Visible(Vec<Poll>),
}

impl VisiblePolls {
    pub fn len(&self) -> usize {
        match self {
            VisiblePolls::Authored(polls) => polls.len(),
            VisiblePolls::Visible(polls) => polls.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Vec<i64> {
        match self {
            VisiblePolls::Authored(polls) => polls.iter().map(|p| p.poll.id).collect(),
            VisiblePolls::Visible(polls) => polls.iter().map(|p| p.id).collect(),
        }
    }
}

pub async fn list_visible(
    pool: &SqlitePool,
    principal: Principal,
) -> Result<VisiblePolls, AppError> {
    let mut conn = pool.acquire().await?;

    let listed = match principal {
        Principal::Admin(author_id) => {
            let rows = sqlx::query_as::<_, PollRow>(
                "SELECT * FROM polls WHERE author_id = ? ORDER BY created_at DESC, id DESC",
            )
            .bind(author_id)
            .fetch_all(&mut *conn)
            .await?;

            let mut authored = Vec::with_capacity(rows.len());
            for poll in hydrate(&mut conn, rows).await? {
                let votes = votes_for(&mut conn, poll.id).await?;
                authored.push(PollWithVotes { poll, votes });
            }
            VisiblePolls::Authored(authored)
        }
        Principal::User(user_id) => {
            let rows = sqlx::query_as::<_, PollRow>(
                "SELECT p.* FROM polls p \
                 WHERE p.is_public = 1 \
                    OR EXISTS (SELECT 1 FROM poll_allowed_users a \
                               WHERE a.poll_id = p.id AND a.user_id = ?) \
                 ORDER BY p.created_at DESC, p.id DESC",
            )
            .bind(user_id)
            .fetch_all(&mut *conn)
            .await?;

            let mut visible = hydrate(&mut conn, rows).await?;
            for poll in &mut visible {
                scope_allow_list(poll, principal);
            }
            VisiblePolls::Visible(visible)
        }
    };

    debug!(
        user_id = principal.id(),
        role = ?principal.role(),
        count = listed.len(),
        "Listed polls"
    );
    Ok(listed)
}

pub async fn get_one(
    pool: &SqlitePool,
    poll_id: i64,
    principal: Principal,
) -> Result<PollWithVotes, AppError> {
    let mut conn = pool.acquire().await?;
    let mut poll = require_poll(&mut conn, poll_id).await?;
    ensure_can_view(&poll, principal)?;
    scope_allow_list(&mut poll, principal);

    let votes = votes_for(&mut conn, poll_id).await?;
    debug!(poll_id, user_id = principal.id(), "Fetched poll");
    Ok(PollWithVotes { poll, votes })
}
