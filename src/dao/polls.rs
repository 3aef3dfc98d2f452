use chrono::{DateTime, Utc};
use log::*;
use sqlx::postgres::PgPool;

use crate::dao::{like_pattern, Tx};
use crate::error::{is_foreign_key_violation, Error, Result};
use crate::models::{OptionTally, Poll, PollOption};
use crate::pagination::PageRequest;

#[derive(Clone, Debug)]
pub struct NewPoll {
    pub title: String,
    pub description: String,
    pub category: String,
    pub active: bool,
    pub created_by: i64,
}

/**
 * Partial update of a poll.
 *
 * `winner` is doubly optional so that an explicit `null` can clear it, and
 * `options`, when present, replaces every existing option.
 */
#[derive(Clone, Debug, Default)]
pub struct PollChanges {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    pub winner: Option<Option<i64>>,
    pub options: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default)]
pub struct PollFilter {
    pub search: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct PollListRow {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub active: bool,
    pub created_by_username: String,
    pub created_at: DateTime<Utc>,
    pub total_votes: i64,
    pub options_count: i64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct TopPollRow {
    pub id: i64,
    pub title: String,
    pub total_votes: i64,
}

pub async fn find(pool: &PgPool, id: i64) -> Result<Option<Poll>> {
    Ok(sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?)
}

pub async fn get(pool: &PgPool, id: i64) -> Result<Poll> {
    find(pool, id).await?.ok_or_else(|| Error::not_found("Poll"))
}

/**
 * Newest first, optionally only the active ones
 */
pub async fn list(pool: &PgPool, active_only: bool) -> Result<Vec<Poll>> {
    Ok(sqlx::query_as::<_, Poll>(
        "SELECT * FROM polls
         WHERE (NOT $1 OR active)
         ORDER BY created_at DESC, id DESC",
    )
    .bind(active_only)
    .fetch_all(pool)
    .await?)
}

async fn insert_options(tx: &mut Tx<'_>, poll_id: i64, texts: &[String]) -> Result<Vec<PollOption>> {
    let mut created = Vec::with_capacity(texts.len());
    for text in texts.iter() {
        let option = sqlx::query_as::<_, PollOption>(
            "INSERT INTO poll_options (poll_id, option_text) VALUES ($1, $2) RETURNING id, option_text",
        )
        .bind(poll_id)
        .bind(text)
        .fetch_one(&mut *tx)
        .await?;
        created.push(option);
    }
    Ok(created)
}

pub async fn create(pool: &PgPool, poll: &NewPoll, options: &[String]) -> Result<(Poll, Vec<PollOption>)> {
    let mut tx = pool.begin().await?;

    let created = sqlx::query_as::<_, Poll>(
        "INSERT INTO polls (title, description, category, active, created_by)
         VALUES ($1, $2, $3, $4, $5)
         RETURNING *",
    )
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(&poll.category)
    .bind(poll.active)
    .bind(poll.created_by)
    .fetch_one(&mut tx)
    .await
    .map_err(|err| {
        if is_foreign_key_violation(&err, "polls_created_by_fkey") {
            warn!("Poll created by user {} who no longer exists", poll.created_by);
            Error::unknown_user()
        } else {
            Error::from(err)
        }
    })?;

    let options = insert_options(&mut tx, created.id, options).await?;
    tx.commit().await?;

    debug!("Created poll {} with {} options", created.id, options.len());
    Ok((created, options))
}

/**
 * Bulk-add options to an existing poll
 */
pub async fn add_options(pool: &PgPool, poll_id: i64, texts: &[String]) -> Result<Vec<PollOption>> {
    let mut tx = pool.begin().await?;

    let exists: Option<(i64,)> = sqlx::query_as("SELECT id FROM polls WHERE id = $1 FOR UPDATE")
        .bind(poll_id)
        .fetch_optional(&mut tx)
        .await?;
    if exists.is_none() {
        return Err(Error::not_found("Poll"));
    }

    let options = insert_options(&mut tx, poll_id, texts).await?;
    tx.commit().await?;
    Ok(options)
}

/**
 * Every option of the given polls with its live vote count, in creation order
 */
pub async fn tallies(pool: &PgPool, poll_ids: &[i64]) -> Result<Vec<OptionTally>> {
    Ok(sqlx::query_as::<_, OptionTally>(
        "SELECT o.id, o.poll_id, o.option_text, COUNT(v.id) AS votes_count
         FROM poll_options o
         LEFT JOIN votes v ON v.option_id = o.id
         WHERE o.poll_id = ANY($1)
         GROUP BY o.id
         ORDER BY o.poll_id, o.id",
    )
    .bind(poll_ids)
    .fetch_all(pool)
    .await?)
}

pub async fn creator_username(pool: &PgPool, poll: &Poll) -> Result<String> {
    let (username,): (String,) = sqlx::query_as("SELECT username FROM users WHERE id = $1")
        .bind(poll.created_by)
        .fetch_one(pool)
        .await?;
    Ok(username)
}

/**
 * Remove options and everything hanging off them: their votes, and the
 * winner pointer of any poll that named one of them
 */
pub(crate) async fn remove_options(tx: &mut Tx<'_>, option_ids: &[i64]) -> Result<u64> {
    sqlx::query("DELETE FROM votes WHERE option_id = ANY($1)")
        .bind(option_ids)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE polls SET winner_id = NULL WHERE winner_id = ANY($1)")
        .bind(option_ids)
        .execute(&mut *tx)
        .await?;
    let deleted = sqlx::query("DELETE FROM poll_options WHERE id = ANY($1)")
        .bind(option_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    Ok(deleted)
}

pub async fn delete_option(pool: &PgPool, option_id: i64) -> Result<bool> {
    let mut tx = pool.begin().await?;
    let deleted = remove_options(&mut tx, &[option_id]).await?;
    tx.commit().await?;
    Ok(deleted > 0)
}

async fn option_ids(tx: &mut Tx<'_>, poll_ids: &[i64]) -> Result<Vec<i64>> {
    let (ids,): (Vec<i64>,) =
        sqlx::query_as("SELECT COALESCE(array_agg(id), '{}') FROM poll_options WHERE poll_id = ANY($1)")
            .bind(poll_ids)
            .fetch_one(&mut *tx)
            .await?;
    Ok(ids)
}

/**
 * Remove polls with their options, votes and banners
 */
pub(crate) async fn purge(tx: &mut Tx<'_>, ids: &[i64]) -> Result<u64> {
    if ids.is_empty() {
        return Ok(0);
    }

    let options = option_ids(tx, ids).await?;
    remove_options(tx, &options).await?;

    sqlx::query("DELETE FROM votes WHERE poll_id = ANY($1)")
        .bind(ids)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM banners WHERE poll_id = ANY($1)")
        .bind(ids)
        .execute(&mut *tx)
        .await?;

    let deleted = sqlx::query("DELETE FROM polls WHERE id = ANY($1)")
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

/**
 * Apply a partial update, replacing the option set when one is given.
 *
 * The winner is validated against the options the poll has before the
 * replace, so a winner among the replaced options ends up cleared.
 */
pub async fn update(pool: &PgPool, id: i64, changes: &PollChanges) -> Result<Option<Poll>> {
    let mut tx = pool.begin().await?;

    let current = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut tx)
        .await?;
    let current = match current {
        Some(poll) => poll,
        None => return Ok(None),
    };

    if let Some(Some(winner)) = changes.winner {
        let owner: Option<(i64,)> = sqlx::query_as("SELECT poll_id FROM poll_options WHERE id = $1")
            .bind(winner)
            .fetch_optional(&mut tx)
            .await?;
        if owner.map(|(poll_id,)| poll_id) != Some(current.id) {
            return Err(Error::validation("Winner must be an option of this poll"));
        }
    }

    let winner = changes.winner.unwrap_or(current.winner_id);
    sqlx::query(
        "UPDATE polls SET
            title = COALESCE($2, title),
            description = COALESCE($3, description),
            category = COALESCE($4, category),
            active = COALESCE($5, active),
            winner_id = $6
         WHERE id = $1",
    )
    .bind(id)
    .bind(&changes.title)
    .bind(&changes.description)
    .bind(&changes.category)
    .bind(changes.active)
    .bind(winner)
    .execute(&mut tx)
    .await?;

    if let Some(texts) = &changes.options {
        let old = option_ids(&mut tx, &[id]).await?;
        let removed = remove_options(&mut tx, &old).await?;
        insert_options(&mut tx, id, texts).await?;
        info!("Replaced {} options of poll {} with {}", removed, id, texts.len());
    }

    let updated = sqlx::query_as::<_, Poll>("SELECT * FROM polls WHERE id = $1")
        .bind(id)
        .fetch_one(&mut tx)
        .await?;
    tx.commit().await?;
    Ok(Some(updated))
}

/**
 * Flip the active flag, returning the new value
 */
pub async fn toggle_active(pool: &PgPool, id: i64) -> Result<Option<bool>> {
    let row: Option<(bool,)> = sqlx::query_as("UPDATE polls SET active = NOT active WHERE id = $1 RETURNING active")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(active,)| active))
}

const FILTER: &str = "
    WHERE ($1::text IS NULL OR p.title ILIKE $1 OR p.description ILIKE $1)
      AND ($2::text IS NULL OR p.category = $2)
      AND ($3::boolean IS NULL OR p.active = $3)";

pub async fn list_filtered(pool: &PgPool, filter: &PollFilter, page: &PageRequest) -> Result<(i64, Vec<PollListRow>)> {
    let search = like_pattern(filter.search.as_deref());

    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM polls p {}", FILTER))
        .bind(&search)
        .bind(&filter.category)
        .bind(filter.active)
        .fetch_one(pool)
        .await?;

    page.check(count)?;

    let rows = sqlx::query_as::<_, PollListRow>(&format!(
        "SELECT p.id, p.title, p.category, p.active, u.username AS created_by_username,
                p.created_at,
                (SELECT COUNT(*) FROM votes v WHERE v.poll_id = p.id) AS total_votes,
                (SELECT COUNT(*) FROM poll_options o WHERE o.poll_id = p.id) AS options_count
         FROM polls p
         JOIN users u ON u.id = p.created_by
         {}
         ORDER BY p.created_at DESC, p.id DESC
         LIMIT $4 OFFSET $5",
        FILTER
    ))
    .bind(&search)
    .bind(&filter.category)
    .bind(filter.active)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((count, rows))
}

/**
 * The polls with the most votes, ties going to the older poll
 */
pub async fn top_by_votes(pool: &PgPool, limit: i64) -> Result<Vec<TopPollRow>> {
    Ok(sqlx::query_as::<_, TopPollRow>(
        "SELECT p.id, p.title, COUNT(v.id) AS total_votes
         FROM polls p
         LEFT JOIN votes v ON v.poll_id = p.id
         GROUP BY p.id
         ORDER BY total_votes DESC, p.id ASC
         LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}
