use serde::Serialize;
use sqlx::postgres::PgPool;

use crate::error::Result;

/**
 * Row counts across the whole service
 */
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Totals {
    pub total_users: i64,
    pub admin_users: i64,
    pub regular_users: i64,
    pub total_polls: i64,
    pub active_polls: i64,
    pub inactive_polls: i64,
    pub total_votes: i64,
    pub total_banners: i64,
}

pub async fn totals(pool: &PgPool) -> Result<Totals> {
    Ok(sqlx::query_as::<_, Totals>(
        "SELECT
            (SELECT COUNT(*) FROM users) AS total_users,
            (SELECT COUNT(*) FROM users WHERE role = 'admin') AS admin_users,
            (SELECT COUNT(*) FROM users WHERE role = 'user') AS regular_users,
            (SELECT COUNT(*) FROM polls) AS total_polls,
            (SELECT COUNT(*) FROM polls WHERE active) AS active_polls,
            (SELECT COUNT(*) FROM polls WHERE NOT active) AS inactive_polls,
            (SELECT COUNT(*) FROM votes) AS total_votes,
            (SELECT COUNT(*) FROM banners) AS total_banners",
    )
    .fetch_one(pool)
    .await?)
}
