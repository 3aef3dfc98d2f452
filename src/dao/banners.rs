use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;

use crate::dao::like_pattern;
use crate::error::{is_foreign_key_violation, is_unique_violation, Error, Result};
use crate::models::Banner;
use crate::pagination::PageRequest;

const POLL_TAKEN: &str = "banner with this poll already exists.";

#[derive(Clone, Debug)]
pub struct NewBanner {
    pub poll_id: i64,
    pub title: String,
    pub image: String,
}

#[derive(Clone, Debug, Default)]
pub struct BannerChanges {
    pub poll_id: Option<i64>,
    pub title: Option<String>,
    pub image: Option<String>,
}

/**
 * A banner with the poll it advertises
 */
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct BannerRow {
    pub id: i64,
    pub title: String,
    pub poll_id: i64,
    pub poll_title: String,
    pub poll_active: bool,
    pub image: String,
    pub created_at: DateTime<Utc>,
}

fn map_write_error(err: sqlx::Error, poll_id: Option<i64>) -> Error {
    if is_unique_violation(&err, "banners_poll_id_key") {
        return Error::validation(POLL_TAKEN);
    }
    if is_foreign_key_violation(&err, "banners_poll_id_fkey") {
        return invalid_poll(poll_id.unwrap_or_default());
    }
    Error::from(err)
}

fn invalid_poll(poll_id: i64) -> Error {
    Error::validation(format!("Invalid poll \"{}\" - object does not exist.", poll_id))
}

pub async fn create(pool: &PgPool, banner: &NewBanner) -> Result<Banner> {
    sqlx::query_as::<_, Banner>(
        "INSERT INTO banners (poll_id, title, image) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(banner.poll_id)
    .bind(&banner.title)
    .bind(&banner.image)
    .fetch_one(pool)
    .await
    .map_err(|err| map_write_error(err, Some(banner.poll_id)))
}

pub async fn list_all(pool: &PgPool) -> Result<Vec<Banner>> {
    Ok(sqlx::query_as::<_, Banner>("SELECT * FROM banners ORDER BY created_at DESC, id DESC")
        .fetch_all(pool)
        .await?)
}

const SELECT_ROW: &str = "
    SELECT b.id, b.title, b.poll_id, p.title AS poll_title, p.active AS poll_active,
           b.image, b.created_at
    FROM banners b
    JOIN polls p ON p.id = b.poll_id";

pub async fn find(pool: &PgPool, id: i64) -> Result<Option<BannerRow>> {
    Ok(
        sqlx::query_as::<_, BannerRow>(&format!("{} WHERE b.id = $1", SELECT_ROW))
            .bind(id)
            .fetch_optional(pool)
            .await?,
    )
}

pub async fn list(pool: &PgPool, search: Option<&str>, page: &PageRequest) -> Result<(i64, Vec<BannerRow>)> {
    let search = like_pattern(search);
    let filter = "WHERE ($1::text IS NULL OR b.title ILIKE $1 OR p.title ILIKE $1)";

    let (count,): (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM banners b JOIN polls p ON p.id = b.poll_id {}",
        filter
    ))
    .bind(&search)
    .fetch_one(pool)
    .await?;

    page.check(count)?;

    let rows = sqlx::query_as::<_, BannerRow>(&format!(
        "{} {} ORDER BY b.created_at DESC, b.id DESC LIMIT $2 OFFSET $3",
        SELECT_ROW, filter
    ))
    .bind(&search)
    .bind(page.limit())
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok((count, rows))
}

pub async fn update(pool: &PgPool, id: i64, changes: &BannerChanges) -> Result<Option<BannerRow>> {
    let updated: Option<(i64,)> = sqlx::query_as(
        "UPDATE banners SET
            poll_id = COALESCE($2, poll_id),
            title = COALESCE($3, title),
            image = COALESCE($4, image)
         WHERE id = $1
         RETURNING id",
    )
    .bind(id)
    .bind(changes.poll_id)
    .bind(&changes.title)
    .bind(&changes.image)
    .fetch_optional(pool)
    .await
    .map_err(|err| map_write_error(err, changes.poll_id))?;

    match updated {
        Some(_) => find(pool, id).await,
        None => Ok(None),
    }
}

/**
 * Delete one banner, handing back its title
 */
pub async fn delete(pool: &PgPool, id: i64) -> Result<Option<String>> {
    let row: Option<(String,)> = sqlx::query_as("DELETE FROM banners WHERE id = $1 RETURNING title")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|(title,)| title))
}

pub async fn delete_many(pool: &PgPool, ids: &[i64]) -> Result<u64> {
    Ok(sqlx::query("DELETE FROM banners WHERE id = ANY($1)")
        .bind(ids)
        .execute(pool)
        .await?
        .rows_affected())
}
