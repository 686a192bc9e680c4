//! Topic feed, posting and voting endpoints.

use axum::{extract::Path, Form};

use super::{success, ApiResult};
use crate::auth::RequestContext;
use crate::errors::AppError;
use crate::models::{AddTopicForm, Topic, VoteOutcome};

/// GET / - Every topic, oldest first.
pub async fn list_topics(ctx: RequestContext) -> ApiResult<Vec<Topic>> {
    success(ctx.repo.list_topics().await?)
}

/// GET /topics - The caller's own topics.
pub async fn list_my_topics(ctx: RequestContext) -> ApiResult<Vec<Topic>> {
    let user = ctx.require_user()?;
    success(ctx.repo.list_topics_by_author(user.id).await?)
}

/// GET /topics/:id - A single topic.
pub async fn get_topic(ctx: RequestContext, Path(id): Path<i64>) -> ApiResult<Topic> {
    match ctx.repo.get_topic(id).await? {
        Some(topic) => success(topic),
        None => Err(AppError::NotFound(format!("Topic {} not found", id))),
    }
}

/// POST /add_topic - Post a topic as the caller.
pub async fn add_topic(ctx: RequestContext, Form(form): Form<AddTopicForm>) -> ApiResult<Topic> {
    let user = ctx.require_user()?;
    success(ctx.repo.create_topic(user, &form.description).await?)
}

/// GET /upvote/:topic_id - Vote for a topic; repeating it changes nothing.
pub async fn upvote(ctx: RequestContext, Path(topic_id): Path<i64>) -> ApiResult<VoteOutcome> {
    let user = ctx.require_user()?;
    success(ctx.repo.upvote(topic_id, user).await?)
}

/// GET /downvote/:topic_id - Withdraw the caller's vote, if they cast one.
pub async fn downvote(ctx: RequestContext, Path(topic_id): Path<i64>) -> ApiResult<VoteOutcome> {
    let user = ctx.require_user()?;
    success(ctx.repo.downvote(topic_id, user).await?)
}

/// GET /users/:id/topics - Topics posted by any one user.
pub async fn list_user_topics(
    ctx: RequestContext,
    Path(user_id): Path<i64>,
) -> ApiResult<Vec<Topic>> {
    if ctx.repo.get_user_by_id(user_id).await?.is_none() {
        return Err(AppError::NotFound(format!("User {} not found", user_id)));
    }
    success(ctx.repo.list_topics_by_author(user_id).await?)
}
