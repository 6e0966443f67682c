use axum::{extract::State, http::StatusCode, Json};
use chrono::Utc;

use crate::{
    auth::Principal,
    error::AppError,
    extract::{AppJson, AppPath},
    models::{
        poll::{NewPoll, Poll, PollChanges, PollResults, PollWithVotes},
        vote::{Vote, VoteRequest},
    },
    polls::{self, VisiblePolls},
    AppState,
};

pub async fn create(
    State(state): State<AppState>,
    principal: Principal,
    AppJson(body): AppJson<NewPoll>,
) -> Result<(StatusCode, Json<Poll>), AppError> {
    let author_id = principal.require_admin("create polls")?;
    let poll = polls::create(&state.db, author_id, body, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(poll)))
}

pub async fn list(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<Json<VisiblePolls>, AppError> {
    Ok(Json(polls::list_visible(&state.db, principal).await?))
}

pub async fn get_one(
    State(state): State<AppState>,
    principal: Principal,
    AppPath(id): AppPath<i64>,
) -> Result<Json<PollWithVotes>, AppError> {
    Ok(Json(polls::get_one(&state.db, id, principal).await?))
}

pub async fn update(
    State(state): State<AppState>,
    principal: Principal,
    AppPath(id): AppPath<i64>,
    AppJson(body): AppJson<PollChanges>,
) -> Result<Json<Poll>, AppError> {
    let requester_id = principal.require_admin("update polls")?;
    let poll = polls::update(&state.db, id, requester_id, body, Utc::now()).await?;
    Ok(Json(poll))
}

pub async fn delete(
    State(state): State<AppState>,
    principal: Principal,
    AppPath(id): AppPath<i64>,
) -> Result<StatusCode, AppError> {
    let requester_id = principal.require_admin("delete polls")?;
    polls::delete(&state.db, id, requester_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn vote(
    State(state): State<AppState>,
    principal: Principal,
    AppPath(id): AppPath<i64>,
    AppJson(body): AppJson<VoteRequest>,
) -> Result<(StatusCode, Json<Vote>), AppError> {
    let vote = polls::vote(&state.db, id, principal, &body.option, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(vote)))
}

pub async fn results(
    State(state): State<AppState>,
    principal: Principal,
    AppPath(id): AppPath<i64>,
) -> Result<Json<PollResults>, AppError> {
    Ok(Json(polls::results(&state.db, id, principal).await?))
}
