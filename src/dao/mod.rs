/*
 * Data access: every SQL statement the service runs lives under here.
 *
 * Cascading deletes are spelled out in the functions themselves and run in
 * one transaction, the foreign keys in the schema only back them up.
 */
pub mod banners;
pub mod polls;
pub mod stats;
pub mod users;
pub mod votes;

#[cfg(test)]
mod tests;

use sqlx::postgres::PgPool;
use sqlx::{Postgres, Transaction};

pub type Tx<'c> = Transaction<'c, Postgres>;

/**
 * Run the embedded migrations
 */
pub async fn migrate(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

/**
 * Turn free text into an ILIKE pattern matching it anywhere, with LIKE
 * wildcards in the text taken literally
 */
pub fn like_pattern(search: Option<&str>) -> Option<String> {
    let term = search.map(str::trim).filter(|s| !s.is_empty())?;
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    Some(escaped)
}

#[cfg(test)]
mod pattern_tests {
    use super::like_pattern;

    #[test]
    fn test_like_pattern() {
        assert_eq!(like_pattern(Some("fruit")).as_deref(), Some("%fruit%"));
        assert_eq!(like_pattern(Some(" 100% ")).as_deref(), Some("%100\\%%"));
        assert_eq!(like_pattern(Some("a_b")).as_deref(), Some("%a\\_b%"));
        assert_eq!(like_pattern(Some("   ")), None);
        assert_eq!(like_pattern(None), None);
    }
}
