//! Registration, login and logout endpoints.

use axum::{extract::State, http::header, response::IntoResponse, Form};

use super::{success, ApiResponse, ApiResult};
use crate::auth::{self, clear_session_cookie, session_cookie, RequestContext};
use crate::errors::AppError;
use crate::models::{LoginForm, LoginResponse, RegisterForm, User};
use crate::AppState;

/// POST /register - Create an account. The caller logs in separately.
pub async fn register(ctx: RequestContext, Form(form): Form<RegisterForm>) -> ApiResult<User> {
    let user = auth::register(&ctx.repo, &form).await?;
    success(user)
}

/// POST /login - Check credentials and open a session.
pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let user = auth::authenticate(&ctx.repo, &form).await?;

    // Logging in again replaces whatever session the client held.
    if let Some(old) = ctx.token.as_deref() {
        ctx.repo.delete_session(old).await?;
    }

    let token = ctx
        .repo
        .create_session(user.id, state.config.session_ttl)
        .await?;
    tracing::info!("User {} logged in", user.id);

    let cookie = session_cookie(&token, state.config.session_ttl, state.config.secure_cookies);
    Ok((
        [(header::SET_COOKIE, cookie)],
        ApiResponse::new(LoginResponse { user, token }),
    ))
}

/// GET /logout - End the current session, if any.
pub async fn logout(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> Result<impl IntoResponse, AppError> {
    if let Some(token) = ctx.token.as_deref() {
        if ctx.repo.delete_session(token).await? {
            if let Some(user) = &ctx.user {
                tracing::info!("User {} logged out", user.id);
            }
        }
    }

    Ok((
        [(header::SET_COOKIE, clear_session_cookie(state.config.secure_cookies))],
        ApiResponse::new(()),
    ))
}
