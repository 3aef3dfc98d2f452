use chrono::{DateTime, Utc};
use log::*;
use sqlx::postgres::PgPool;

use crate::error::{is_foreign_key_violation, is_unique_violation, Error, Result};
use crate::models::Vote;
use crate::pagination::PageRequest;

pub const ALREADY_VOTED: &str = "You have already voted on this poll";
pub const INVALID_OPTION: &str = "Invalid option for this poll";

#[derive(Clone, Debug, Default)]
pub struct VoteFilter {
    pub poll_id: Option<i64>,
    pub user_id: Option<i64>,
}

/**
 * A vote joined with the names a moderator wants to see
 */
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct VoteRow {
    pub id: i64,
    pub poll_id: i64,
    pub poll_title: String,
    pub option_id: i64,
    pub option_text: String,
    pub voted_by: i64,
    pub voter_username: String,
    pub voted_at: DateTime<Utc>,
}

/**
 * Record one user's vote on a poll.
 *
 * The existence check gives the friendly error in the common case, the
 * `votes_poll_voter_key` unique constraint settles concurrent duplicates.
 */
pub async fn cast(pool: &PgPool, poll_id: i64, option_id: i64, user_id: i64) -> Result<Vote> {
    let mut tx = pool.begin().await?;

    let poll: Option<(i64,)> = sqlx::query_as("SELECT id FROM polls WHERE id = $1")
        .bind(poll_id)
        .fetch_optional(&mut tx)
        .await?;
    if poll.is_none() {
        return Err(Error::not_found("Poll"));
    }

    let owner: Option<(i64,)> = sqlx::query_as("SELECT poll_id FROM poll_options WHERE id = $1")
        .bind(option_id)
        .fetch_optional(&mut tx)
        .await?;
    if owner.map(|(owner,)| owner) != Some(poll_id) {
        return Err(Error::validation(INVALID_OPTION));
    }

    let existing: Option<(i64,)> = sqlx::query_as("SELECT id FROM votes WHERE poll_id = $1 AND voted_by = $2")
        .bind(poll_id)
        .bind(user_id)
        .fetch_optional(&mut tx)
        .await?;
    if existing.is_some() {
        return Err(Error::validation(ALREADY_VOTED));
    }

    let vote = sqlx::query_as::<_, Vote>(
        "INSERT INTO votes (poll_id, option_id, voted_by) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(poll_id)
    .bind(option_id)
    .bind(user_id)
    .fetch_one(&mut tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err, "votes_poll_voter_key") {
            warn!("Concurrent duplicate vote by user {} on poll {}", user_id, poll_id);
            Error::validation(ALREADY_VOTED)
        } else if is_foreign_key_violation(&err, "votes_voted_by_fkey") {
            warn!("Vote by user {} who no longer exists", user_id);
            Error::unknown_user()
        } else {
            Error::from(err)
        }
    })?;

    tx.commit().await?;
    info!("User {} voted for option {} on poll {}", user_id, option_id, poll_id);
    Ok(vote)
}

/**
 * Ids of the given polls the user has voted on
 */
pub async fn voted_polls(pool: &PgPool, user_id: i64, poll_ids: &[i64]) -> Result<Vec<i64>> {
    let rows: Vec<(i64,)> = sqlx::query_as("SELECT poll_id FROM votes WHERE voted_by = $1 AND poll_id = ANY($2)")
        .bind(user_id)
        .bind(poll_ids)
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/**
 * Timestamps of the votes cast in `[start, end)`, optionally for one poll only
 */
pub async fn timestamps_between(
    pool: &PgPool,
    poll_id: Option<i64>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<DateTime<Utc>>> {
    let rows: Vec<(DateTime<Utc>,)> = sqlx::query_as(
        "SELECT voted_at FROM votes
         WHERE ($1::bigint IS NULL OR poll_id = $1)
           AND voted_at >= $2 AND voted_at < $3",
    )
    .bind(poll_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(|(at,)| at).collect())
}

/**
 * Per-option counts of a poll's votes cast at or after `since`
 */
pub async fn counts_since(pool: &PgPool, poll_id: i64, since: DateTime<Utc>) -> Result<Vec<(i64, i64)>> {
    Ok(sqlx::query_as(
        "SELECT option_id, COUNT(*) FROM votes
         WHERE poll_id = $1 AND voted_at >= $2
         GROUP BY option_id",
    )
    .bind(poll_id)
    .bind(since)
    .fetch_all(pool)
    .await?)
}

const FILTER: &str = "
    WHERE ($1::bigint IS NULL OR v.poll_id = $1)
      AND ($2::bigint IS NULL OR v.voted_by = $2)";

pub async fn list(pool: &PgPool, filter: &VoteFilter, page: &PageRequest) -> Result<(i64, Vec<VoteRow>)> {
    let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM votes v {}", FILTER))
        .bind(filter.poll_id)
        .bind(filter.user_id)
        .fetch_one(pool)
        .await?;

    page.check(count)?;

    let rows = sqlx::query_as::<_, VoteRow>(&format!(
        "SELECT v.id, v.poll_id, p.title AS poll_title, v.option_id, o.option_text,
                v.voted_by, u.username AS voter_username, v.voted_at
         FROM votes v
         JOIN polls p ON p.id = v.poll_id
         JOIN poll_options o ON o.id = v.option_id
         JOIN users u ON u.id = v.voted_by
         {}
         ORDER BY v.voted_at DESC, v.id DESC
         LIMIT $3 OFFSET $4",
        FILTER
    ))
    .bind(filter.poll_id)
    .bind(filter.user_id)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((count, rows))
}

/**
 * Delete one vote, returning a description of what went for the log
 */
pub async fn delete(pool: &PgPool, id: i64) -> Result<Option<String>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "DELETE FROM votes v USING users u, polls p
         WHERE v.id = $1 AND u.id = v.voted_by AND p.id = v.poll_id
         RETURNING u.username, p.title",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|(username, title)| format!("{}'s vote on {}", username, title)))
}

pub async fn delete_many(pool: &PgPool, ids: &[i64]) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM votes WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?
        .rows_affected())
}
