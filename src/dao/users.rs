use chrono::{DateTime, Utc};
use log::*;
use sqlx::postgres::PgPool;

use crate::dao::{like_pattern, polls, Tx};
use crate::error::{is_unique_violation, Error, Result};
use crate::models::{Role, User};
use crate::pagination::PageRequest;

const USERNAME_TAKEN: &str = "A user with that username already exists.";

#[derive(Clone, Debug)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub role: Role,
    pub is_superuser: bool,
}

/**
 * Partial update, `None` leaves the column alone
 */
#[derive(Clone, Debug, Default)]
pub struct UserChanges {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
}

#[derive(Clone, Debug, Default)]
pub struct UserFilter {
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

/**
 * A user as shown in the admin listing, with activity counts
 */
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct UserListRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_superuser: bool,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub total_votes: i64,
    pub polls_created: i64,
}

fn map_username_taken(err: sqlx::Error) -> Error {
    if is_unique_violation(&err, "users_username_key") {
        Error::validation(USERNAME_TAKEN)
    } else {
        Error::from(err)
    }
}

pub async fn create(pool: &PgPool, user: &NewUser) -> Result<User> {
    let role = Role::effective(user.role, user.is_superuser);
    let is_staff = user.is_superuser;

    sqlx::query_as::<_, User>(
        "INSERT INTO users (username, email, password_hash, role, is_staff, is_superuser)
         VALUES ($1, $2, $3, $4, $5, $6)
         RETURNING *",
    )
    .bind(&user.username)
    .bind(&user.email)
    .bind(&user.password_hash)
    .bind(role.as_str())
    .bind(is_staff)
    .bind(user.is_superuser)
    .fetch_one(pool)
    .await
    .map_err(map_username_taken)
}

pub async fn find(pool: &PgPool, id: i64) -> Result<Option<User>> {
    Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn find_by_username(pool: &PgPool, username: &str) -> Result<Option<User>> {
    Ok(sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = $1")
        .bind(username)
        .fetch_optional(pool)
        .await?)
}

pub async fn touch_last_login(pool: &PgPool, id: i64, now: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE users SET last_login = $2 WHERE id = $1")
        .bind(id)
        .bind(now)
        .execute(pool)
        .await?;
    Ok(())
}

/**
 * Create the configured superuser unless an account by that name exists
 */
pub async fn ensure_superuser(pool: &PgPool, username: &str, email: &str, password_hash: &str) -> Result<bool> {
    if find_by_username(pool, username).await?.is_some() {
        debug!("Superuser {} already present", username);
        return Ok(false);
    }

    let user = NewUser {
        username: username.to_string(),
        email: email.to_string(),
        password_hash: password_hash.to_string(),
        role: Role::Admin,
        is_superuser: true,
    };
    create(pool, &user).await?;
    info!("Created superuser {}", username);
    Ok(true)
}

const FILTER: &str = "
    WHERE ($1::text IS NULL
           OR u.username ILIKE $1 OR u.email ILIKE $1
           OR u.first_name ILIKE $1 OR u.last_name ILIKE $1)
      AND ($2::text IS NULL OR u.role = $2)
      AND ($3::boolean IS NULL OR u.is_active = $3)";

pub async fn list(pool: &PgPool, filter: &UserFilter, page: &PageRequest) -> Result<(i64, Vec<UserListRow>)> {
    let search = like_pattern(filter.search.as_deref());

    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM users u {}", FILTER))
        .bind(&search)
        .bind(&filter.role)
        .bind(filter.is_active)
        .fetch_one(pool)
        .await?;

    page.check(count)?;

    let rows = sqlx::query_as::<_, UserListRow>(&format!(
        "SELECT u.id, u.username, u.email, u.role, u.is_superuser, u.is_active,
                u.date_joined, u.last_login,
                (SELECT COUNT(*) FROM votes v WHERE v.voted_by = u.id) AS total_votes,
                (SELECT COUNT(*) FROM polls p WHERE p.created_by = u.id) AS polls_created
         FROM users u {}
         ORDER BY u.date_joined DESC, u.id DESC
         LIMIT $4 OFFSET $5",
        FILTER
    ))
    .bind(&search)
    .bind(&filter.role)
    .bind(filter.is_active)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((count, rows))
}

/**
 * Apply a partial update. Superusers keep the admin role no matter what.
 */
pub async fn update(pool: &PgPool, id: i64, changes: &UserChanges) -> Result<Option<User>> {
    sqlx::query_as::<_, User>(
        "UPDATE users SET
            username = COALESCE($2, username),
            email = COALESCE($3, email),
            first_name = COALESCE($4, first_name),
            last_name = COALESCE($5, last_name),
            role = CASE WHEN is_superuser THEN 'admin' ELSE COALESCE($6, role) END,
            is_active = COALESCE($7, is_active),
            is_staff = COALESCE($8, is_staff)
         WHERE id = $1
         RETURNING *",
    )
    .bind(id)
    .bind(&changes.username)
    .bind(&changes.email)
    .bind(&changes.first_name)
    .bind(&changes.last_name)
    .bind(changes.role.map(|r| r.as_str()))
    .bind(changes.is_active)
    .bind(changes.is_staff)
    .fetch_optional(pool)
    .await
    .map_err(map_username_taken)
}

/**
 * Remove users along with the polls they created and the votes they cast
 */
pub(crate) async fn purge(tx: &mut Tx<'_>, ids: &[i64]) -> Result<u64> {
    let (owned,): (Vec<i64>,) =
        sqlx::query_as("SELECT COALESCE(array_agg(id), '{}') FROM polls WHERE created_by = ANY($1)")
            .bind(ids)
            .fetch_one(&mut *tx)
            .await?;
    polls::purge(tx, &owned).await?;

    sqlx::query("DELETE FROM votes WHERE voted_by = ANY($1)")
        .bind(ids)
        .execute(&mut *tx)
        .await?;

    let deleted = sqlx::query("DELETE FROM users WHERE id = ANY($1)")
        .bind(ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn delete(pool: &PgPool, id: i64) -> Result<bool> {
    if find(pool, id).await?.is_none() {
        return Ok(false);
    }
    Ok(delete_many(pool, &[id]).await? > 0)
}

pub async fn delete_many(pool: &PgPool, ids: &[i64]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let deleted = purge(&mut tx, ids).await?;
    tx.commit().await?;
    Ok(deleted)
}
