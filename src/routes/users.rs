use chrono::{Duration, Utc};
use log::*;
use tide::Request;

use crate::api_models::*;
use crate::auth::{self, Claims, TokenKind};
use crate::dao;
use crate::dao::users::NewUser;
use crate::error::Error;
use crate::models::Role;
use crate::routes::{created, json_body, ok};
use crate::AppState;

/**
 *  POST /api/users/register
 */
pub async fn register(mut req: Request<AppState>) -> tide::Result {
    let registration: RegisterRequest = json_body(&mut req).await?;
    let role = registration.validate()?;

    if role == Role::Admin && !req.state().config.allow_admin_signup {
        warn!("Refused admin self-registration for {}", registration.username);
        return Err(Error::forbidden("Admin accounts cannot be self-registered").into());
    }

    let user = NewUser {
        username: registration.username,
        email: registration.email,
        password_hash: auth::hash_password(&registration.password)?,
        role,
        is_superuser: false,
    };
    let user = dao::users::create(&req.state().db, &user).await?;
    info!("Registered user {} as {}", user.username, user.role());

    created(&UserPublic::from(&user))
}

/**
 *  POST /api/users/login
 */
pub async fn login(mut req: Request<AppState>) -> tide::Result {
    let credentials: LoginRequest = json_body(&mut req).await?;
    let state = req.state();

    let user = dao::users::find_by_username(&state.db, &credentials.username)
        .await?
        .filter(|user| user.is_active && auth::verify_password(&credentials.password, &user.password_hash))
        .ok_or_else(|| Error::validation("Invalid Credentials"))?;

    let now = Utc::now();
    let tokens = auth::issue_pair(state, user.id, user.role(), now)?;
    dao::users::touch_last_login(&state.db, user.id, now).await?;
    debug!("User {} logged in", user.username);

    ok(&LoginResponse {
        refresh: tokens.refresh,
        access: tokens.access,
        user: UserPublic::from(&user),
    })
}

/**
 *  POST /api/users/token/refresh
 */
pub async fn refresh(mut req: Request<AppState>) -> tide::Result {
    let body: RefreshRequest = json_body(&mut req).await?;
    let config = &req.state().config;
    let now = Utc::now();

    let claims = auth::verify_token(&config.secret_key, &body.refresh, TokenKind::Refresh, now)?;

    // The account may have been deleted, deactivated or demoted since login
    let user = dao::users::find(&req.state().db, claims.sub)
        .await?
        .filter(|user| user.is_active)
        .ok_or_else(|| Error::unauthorized("User not found or inactive"))?;
    if user.role() != claims.role {
        info!("Refreshing user {} with role {} instead of {}", user.id, user.role(), claims.role);
    }

    let access = Claims::new(
        user.id,
        user.role(),
        TokenKind::Access,
        now,
        Duration::minutes(config.access_token_minutes),
    );

    ok(&AccessResponse {
        access: auth::issue_token(&config.secret_key, &access)?,
    })
}

/**
 *  GET /api/users/profile
 */
pub async fn profile(req: Request<AppState>) -> tide::Result {
    let caller = auth::caller(&req)?;
    let user = dao::users::find(&req.state().db, caller.id)
        .await?
        .ok_or_else(|| Error::not_found("User"))?;
    ok(&UserPublic::from(&user))
}
