use chrono::{DateTime, Utc};
use sqlx::{types::Json, SqliteConnection, SqlitePool};
use tracing::info;

use super::{
    check_duration, normalize_description, normalize_ids, normalize_options, normalize_title,
    require_poll,
};
use crate::{
    error::AppError,
    models::poll::{NewPoll, Poll, PollChanges},
};

/// Creates a poll owned by `author_id`.
///
/// The caller is responsible for checking that the author is an admin. The allow-list is
/// dropped for public polls.
pub async fn create(
    pool: &SqlitePool,
    author_id: i64,
    new: NewPoll,
    now: DateTime<Utc>,
) -> Result<Poll, AppError> {
    check_duration(now, new.expires_at)?;

    let title = normalize_title(&new.title)?;
    let description = normalize_description(new.description);
    let options = normalize_options(new.options)?;
    let allowed = if new.is_public {
        Vec::new()
    } else {
        normalize_ids(new.allowed_user_ids)
    };

    let mut tx = pool.begin().await?;
    ensure_users_exist(&mut tx, &allowed).await?;

    let id = sqlx::query(
        "INSERT INTO polls \
         (title, description, options, is_public, expires_at, author_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&title)
    .bind(&description)
    .bind(Json(&options))
    .bind(new.is_public)
    .bind(new.expires_at)
    .bind(author_id)
    .bind(now)
    .bind(now)
    .execute(&mut *tx)
    .await?
    .last_insert_rowid();

    replace_allow_list(&mut tx, id, &allowed).await?;
    tx.commit().await?;

    info!(poll_id = id, author_id, public = new.is_public, "Poll created");

    Ok(Poll {
        id,
        title,
        description,
        options,
        is_public: new.is_public,
        expires_at: new.expires_at,
        author_id,
        allowed_user_ids: allowed,
        created_at: now,
        updated_at: now,
    })
}

/// Applies a partial update. Only the author may update, and only while the poll is open.
///
/// A supplied allow-list replaces the stored one; an empty `description` clears it.
pub async fn update(
    pool: &SqlitePool,
    poll_id: i64,
    requester_id: i64,
    changes: PollChanges,
    now: DateTime<Utc>,
) -> Result<Poll, AppError> {
    let mut tx = pool.begin().await?;
    let mut poll = require_poll(&mut tx, poll_id).await?;

    ensure_author(&poll, requester_id, "update")?;
    if poll.is_expired(now) {
        return Err(AppError::forbidden("Cannot update expired polls"));
    }

    if let Some(expires_at) = changes.expires_at {
        check_duration(now, expires_at)?;
        poll.expires_at = expires_at;
    }
    if let Some(title) = changes.title {
        poll.title = normalize_title(&title)?;
    }
    if changes.description.is_some() {
        poll.description = normalize_description(changes.description);
    }
    if let Some(options) = changes.options {
        poll.options = normalize_options(options)?;
    }
    if let Some(is_public) = changes.is_public {
        poll.is_public = is_public;
    }
    if let Some(ids) = changes.allowed_user_ids {
        poll.allowed_user_ids = normalize_ids(ids);
    }
    if poll.is_public {
        poll.allowed_user_ids.clear();
    }
    poll.updated_at = now;

    ensure_users_exist(&mut tx, &poll.allowed_user_ids).await?;

    sqlx::query(
        "UPDATE polls \
         SET title = ?, description = ?, options = ?, is_public = ?, \
             expires_at = ?, updated_at = ? \
         WHERE id = ?",
    )
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(Json(&poll.options))
    .bind(poll.is_public)
    .bind(poll.expires_at)
    .bind(poll.updated_at)
    .bind(poll.id)
    .execute(&mut *tx)
    .await?;

    replace_allow_list(&mut tx, poll.id, &poll.allowed_user_ids).await?;
    tx.commit().await?;

    info!(poll_id, requester_id, "Poll updated");
    Ok(poll)
}

/// Deletes a poll and, through the foreign keys, its votes and allow-list.
///
/// Expired polls may still be deleted by their author.
pub async fn delete(pool: &SqlitePool, poll_id: i64, requester_id: i64) -> Result<(), AppError> {
    let mut conn = pool.acquire().await?;
    let poll = require_poll(&mut conn, poll_id).await?;
    ensure_author(&poll, requester_id, "delete")?;

    sqlx::query("DELETE FROM polls WHERE id = ?")
        .bind(poll_id)
        .execute(&mut *conn)
        .await?;

    info!(poll_id, requester_id, "Poll deleted");
    Ok(())
}

fn ensure_author(poll: &Poll, requester_id: i64, action: &str) -> Result<(), AppError> {
    if poll.author_id != requester_id {
        return Err(AppError::forbidden(format!(
            "You can only {action} your own polls"
        )));
    }
    Ok(())
}

async fn ensure_users_exist(conn: &mut SqliteConnection, ids: &[i64]) -> Result<(), AppError> {
    for &id in ids {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        if exists.is_none() {
            return Err(AppError::validation(format!("Unknown user id: {id}")));
        }
    }
    Ok(())
}

async fn replace_allow_list(
    conn: &mut SqliteConnection,
    poll_id: i64,
    ids: &[i64],
) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM poll_allowed_users WHERE poll_id = ?")
        .bind(poll_id)
        .execute(&mut *conn)
        .await?;

    for &user_id in ids {
        sqlx::query("INSERT INTO poll_allowed_users (poll_id, user_id) VALUES (?, ?)")
            .bind(poll_id)
            .bind(user_id)
            .execute(&mut *conn)
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::{
        auth::Principal,
        models::user::Role,
        polls::{fetch_poll, testing, votes},
    };

    fn new_poll(expires_at: DateTime<Utc>) -> NewPoll {
        NewPoll {
            title: "Colour".into(),
            description: Some("Pick one".into()),
            options: vec!["Red".into(), "Blue".into()],
            is_public: true,
            expires_at,
            allowed_user_ids: vec![],
        }
    }

    #[tokio::test]
    async fn create_enforces_two_hour_cap() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let now = Utc::now();

        let err = create(&pool, admin, new_poll(now + Duration::minutes(121)), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PolicyViolation(_)));

        let poll = create(&pool, admin, new_poll(now + Duration::hours(2)), now)
            .await
            .unwrap();
        assert_eq!(poll.author_id, admin);
        assert_eq!(poll.options, vec!["Red", "Blue"]);
    }

    #[tokio::test]
    async fn public_poll_drops_allow_list() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let user = testing::user(&pool, "user@example.com", Role::User).await;
        let now = Utc::now();

        let mut new = new_poll(now + Duration::minutes(30));
        new.allowed_user_ids = vec![user];
        let poll = create(&pool, admin, new, now).await.unwrap();
        assert!(poll.allowed_user_ids.is_empty());

        let mut conn = pool.acquire().await.unwrap();
        let stored = fetch_poll(&mut conn, poll.id).await.unwrap().unwrap();
        assert!(stored.allowed_user_ids.is_empty());
    }

    #[tokio::test]
    async fn private_poll_rejects_unknown_allowed_user() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let now = Utc::now();

        let mut new = new_poll(now + Duration::minutes(30));
        new.is_public = false;
        new.allowed_user_ids = vec![4242];
        let err = create(&pool, admin, new, now).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn update_replaces_allow_list_and_keeps_omitted_fields() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let a = testing::user(&pool, "a@example.com", Role::User).await;
        let b = testing::user(&pool, "b@example.com", Role::User).await;
        let now = Utc::now();

        let mut new = new_poll(now + Duration::minutes(30));
        new.is_public = false;
        new.allowed_user_ids = vec![a];
        let poll = create(&pool, admin, new, now).await.unwrap();

        let changes = PollChanges {
            allowed_user_ids: Some(vec![b]),
            ..Default::default()
        };
        let updated = update(&pool, poll.id, admin, changes, now).await.unwrap();
        assert_eq!(updated.allowed_user_ids, vec![b]);
        assert_eq!(updated.title, "Colour");
        assert_eq!(updated.description.as_deref(), Some("Pick one"));

        let changes = PollChanges {
            title: Some("Renamed".into()),
            ..Default::default()
        };
        let updated = update(&pool, poll.id, admin, changes, now).await.unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.allowed_user_ids, vec![b]);
    }

    #[tokio::test]
    async fn update_rejects_non_author_and_expired_poll() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let other = testing::user(&pool, "other@example.com", Role::Admin).await;
        let now = Utc::now();

        let poll = create(&pool, admin, new_poll(now + Duration::minutes(10)), now)
            .await
            .unwrap();

        let err = update(&pool, poll.id, other, PollChanges::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let later = now + Duration::minutes(11);
        let err = update(&pool, poll.id, admin, PollChanges::default(), later)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let err = update(&pool, 999, admin, PollChanges::default(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_applies_cap_to_new_expiry() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let now = Utc::now();
        let poll = create(&pool, admin, new_poll(now + Duration::minutes(10)), now)
            .await
            .unwrap();

        let changes = PollChanges {
            expires_at: Some(now + Duration::hours(3)),
            ..Default::default()
        };
        let err = update(&pool, poll.id, admin, changes, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PolicyViolation(_)));
    }

    #[tokio::test]
    async fn author_may_delete_expired_poll_but_others_may_not() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let other = testing::user(&pool, "other@example.com", Role::Admin).await;
        let now = Utc::now();

        let poll = create(&pool, admin, new_poll(now - Duration::minutes(1)), now)
            .await
            .unwrap();

        let err = delete(&pool, poll.id, other).await.unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        delete(&pool, poll.id, admin).await.unwrap();
        let err = delete(&pool, poll.id, admin).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn non_author_update_on_expired_poll_is_forbidden() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let other = testing::user(&pool, "other@example.com", Role::Admin).await;
        let now = Utc::now();

        let poll = create(&pool, admin, new_poll(now - Duration::minutes(1)), now)
            .await
            .unwrap();

        let changes = PollChanges {
            title: Some("Hijacked".into()),
            ..Default::default()
        };
        let err = update(&pool, poll.id, other, changes, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Forbidden(_)));

        let mut conn = pool.acquire().await.unwrap();
        let stored = fetch_poll(&mut conn, poll.id).await.unwrap().unwrap();
        assert_eq!(stored.title, "Colour");
    }

    #[tokio::test]
    async fn delete_removes_votes_and_allow_list() {
        let pool = testing::pool().await;
        let admin = testing::user(&pool, "admin@example.com", Role::Admin).await;
        let user = testing::user(&pool, "user@example.com", Role::User).await;
        let now = Utc::now();

        let mut new = new_poll(now + Duration::minutes(30));
        new.is_public = false;
        new.allowed_user_ids = vec![user];
        let poll = create(&pool, admin, new, now).await.unwrap();
        votes::vote(&pool, poll.id, Principal::User(user), "Red", now)
            .await
            .unwrap();

        delete(&pool, poll.id, admin).await.unwrap();

        let votes: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM votes WHERE poll_id = ?")
            .bind(poll.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(votes, 0);

        let allowed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM poll_allowed_users WHERE poll_id = ?")
                .bind(poll.id)
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(allowed, 0);
    }
}
