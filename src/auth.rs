/*
 * Credentials: password hashing, signed bearer tokens and the middleware
 * which attaches the calling user to each request.
 */
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use log::*;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tide::{Middleware, Next, Request};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::Role;
use crate::policy::{self, Access};
use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|e| Error::Internal(format!("salt: {}", e)))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("password hash: {}", e)))
}

/**
 * A stored hash which does not even parse never matches
 */
pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(err) => {
            warn!("Unparsable password hash in storage: {}", err);
            false
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub sub: i64,
    pub role: Role,
    pub kind: TokenKind,
    /// Expiry, seconds since the epoch
    pub exp: i64,
}

impl Claims {
    pub fn new(user_id: i64, role: Role, kind: TokenKind, now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            sub: user_id,
            role,
            kind,
            exp: (now + lifetime).timestamp(),
        }
    }
}

fn mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| Error::Internal(format!("token key: {}", e)))
}

/**
 * Tokens are `hex(claims json)` and `hex(hmac-sha256 of the first part)`
 * joined with a dot
 */
pub fn issue_token(secret: &str, claims: &Claims) -> Result<String> {
    let payload = serde_json::to_vec(claims)
        .map_err(|e| Error::Internal(format!("token claims: {}", e)))?;
    let payload = hex::encode(payload);

    let mut mac = mac(secret)?;
    mac.update(payload.as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());

    Ok(format!("{}.{}", payload, signature))
}

pub fn verify_token(secret: &str, token: &str, kind: TokenKind, now: DateTime<Utc>) -> Result<Claims> {
    let invalid = || Error::unauthorized("Token is invalid or expired");

    let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
    let signature = hex::decode(signature).map_err(|_| invalid())?;

    let mut mac = mac(secret)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature).map_err(|_| invalid())?;

    let payload = hex::decode(payload).map_err(|_| invalid())?;
    let claims: Claims = serde_json::from_slice(&payload).map_err(|_| invalid())?;

    if claims.kind != kind || claims.exp <= now.timestamp() {
        return Err(invalid());
    }
    Ok(claims)
}

/**
 * The access and refresh pair handed out on login
 */
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access: String,
    pub refresh: String,
}

pub fn issue_pair(state: &AppState, user_id: i64, role: Role, now: DateTime<Utc>) -> Result<TokenPair> {
    let config = &state.config;
    let access = Claims::new(
        user_id,
        role,
        TokenKind::Access,
        now,
        Duration::minutes(config.access_token_minutes),
    );
    let refresh = Claims::new(
        user_id,
        role,
        TokenKind::Refresh,
        now,
        Duration::minutes(config.refresh_token_minutes),
    );

    Ok(TokenPair {
        access: issue_token(&config.secret_key, &access)?,
        refresh: issue_token(&config.secret_key, &refresh)?,
    })
}

/**
 * The authenticated user behind a request
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Caller {
    pub id: i64,
    pub role: Role,
}

impl From<&Claims> for Caller {
    fn from(claims: &Claims) -> Self {
        Self {
            id: claims.sub,
            role: claims.role,
        }
    }
}

pub fn caller<State>(req: &Request<State>) -> Result<Caller> {
    req.ext::<Caller>()
        .copied()
        .ok_or_else(|| Error::unauthorized("Authentication credentials were not provided."))
}

fn bearer(header: &str) -> Option<&str> {
    let mut parts = header.splitn(2, ' ');
    match (parts.next(), parts.next()) {
        (Some(scheme), Some(token)) if scheme.eq_ignore_ascii_case("bearer") => {
            Some(token.trim()).filter(|t| !t.is_empty())
        }
        _ => None,
    }
}

/**
 * Decode a bearer access token when one is presented.
 *
 * Requests without an `Authorization` header pass through anonymously, a
 * header with a bad token is rejected outright.
 */
#[derive(Debug, Default)]
pub struct Authenticate;

#[async_trait::async_trait]
impl Middleware<AppState> for Authenticate {
    async fn handle(&self, mut req: Request<AppState>, next: Next<'_, AppState>) -> tide::Result {
        let header = req
            .header("Authorization")
            .map(|values| values.last().as_str().to_string());

        if let Some(header) = header {
            let token = bearer(&header)
                .ok_or_else(|| Error::unauthorized("Authorization header must be 'Bearer <token>'"))?;
            let claims = verify_token(
                &req.state().config.secret_key,
                token,
                TokenKind::Access,
                Utc::now(),
            )?;
            debug!("Authenticated user {} ({})", claims.sub, claims.role);
            req.set_ext(Caller::from(&claims));
        }

        Ok(next.run(req).await)
    }
}

/**
 * Route level gate running `policy::check` for the route's access level
 */
#[derive(Debug)]
pub struct Guard(pub Access);

#[async_trait::async_trait]
impl Middleware<AppState> for Guard {
    async fn handle(&self, req: Request<AppState>, next: Next<'_, AppState>) -> tide::Result {
        let role = req.ext::<Caller>().map(|c| c.role);
        policy::check(role, self.0)?;
        Ok(next.run(req).await)
    }
}
