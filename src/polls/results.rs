use std::collections::HashMap;

use sqlx::SqlitePool;
use tracing::debug;

use super::{ensure_can_view, require_poll, scope_allow_list};
use crate::{
    auth::Principal,
    error::AppError,
    models::{poll::PollResults, vote::OptionCount},
};

pub async fn results(
    pool: &SqlitePool,
    poll_id: i64,
    principal: Principal,
) -> Result<PollResults, AppError> {
    let mut conn = pool.acquire().await?;
    let mut poll = require_poll(&mut conn, poll_id).await?;
    ensure_can_view(&poll, principal)?;
    scope_allow_list(&mut poll, principal);

    let counts: Vec<(String, i64)> = sqlx::query_as(
        "SELECT option, COUNT(*) AS count FROM votes WHERE poll_id = ? GROUP BY option",
    )
    .bind(poll_id)
    .fetch_all(&mut *conn)
    .await?;

    let results = tally(&poll.options, counts);
    debug!(poll_id, options = results.len(), "Tallied poll results");
    Ok(PollResults { poll, results })
}

/// Orders grouped counts by the declared options, filling unvoted options with zero.
///
/// Counts for options that are no longer declared (the option list was replaced after
/// votes came in) follow the declared ones, sorted by option text.
pub fn tally(declared: &[String], counts: Vec<(String, i64)>) -> Vec<OptionCount> {
    let mut by_option: HashMap<String, i64> = counts.into_iter().collect();

    let mut results: Vec<OptionCount> = declared
        .iter()
        .map(|option| OptionCount {
            count: by_option.remove(option).unwrap_or(0),
            option: option.clone(),
        })
        .collect();

    let mut stale: Vec<OptionCount> = by_option
        .into_iter()
        .map(|(option, count)| OptionCount { option, count })
        .collect();
    stale.sort_by(|a, b| a.option.cmp(&b.option));
    results.extend(stale);

    results
}
