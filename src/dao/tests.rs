/*
 * Scenario tests against a live PostgreSQL.
 *
 * They only run when TEST_DATABASE_URL points at a database the tests may
 * migrate and write to, otherwise each one returns early.
 */
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use uuid::Uuid;

use super::*;
use crate::dao::polls::{NewPoll, PollChanges};
use crate::dao::users::NewUser;
use crate::error::Error;
use crate::models::{PollOption, Role, User};

async fn test_pool() -> Option<PgPool> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("connect to TEST_DATABASE_URL");
    migrate(&pool).await.expect("migrations");
    Some(pool)
}

async fn user(pool: &PgPool, role: Role) -> User {
    let user = NewUser {
        username: format!("user-{}", Uuid::new_v4()),
        email: "someone@example.com".to_string(),
        password_hash: "not-a-real-hash".to_string(),
        role,
        is_superuser: false,
    };
    users::create(pool, &user).await.unwrap()
}

async fn fruit_poll(pool: &PgPool, admin: &User) -> (i64, Vec<PollOption>) {
    let poll = NewPoll {
        title: "Best Fruit".to_string(),
        description: String::new(),
        category: "food".to_string(),
        active: true,
        created_by: admin.id,
    };
    let options = vec!["Apple".to_string(), "Banana".to_string()];
    let (poll, options) = polls::create(pool, &poll, &options).await.unwrap();
    (poll.id, options)
}

fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

async fn backdate(pool: &PgPool, vote_id: i64, voted_at: DateTime<Utc>) {
    sqlx::query("UPDATE votes SET voted_at = $1 WHERE id = $2")
        .bind(voted_at)
        .bind(vote_id)
        .execute(pool)
        .await
        .unwrap();
}

async fn vote_count(pool: &PgPool, poll_id: i64) -> i64 {
    polls::tallies(pool, &[poll_id])
        .await
        .unwrap()
        .iter()
        .map(|t| t.votes_count)
        .sum()
}

#[async_std::test]
async fn test_best_fruit() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let (apple, banana) = (options[0].id, options[1].id);

    let (u1, u2, u3) = (
        user(&pool, Role::User).await,
        user(&pool, Role::User).await,
        user(&pool, Role::User).await,
    );
    votes::cast(&pool, poll_id, apple, u1.id).await.unwrap();
    votes::cast(&pool, poll_id, apple, u2.id).await.unwrap();
    votes::cast(&pool, poll_id, banana, u3.id).await.unwrap();

    let tallies = polls::tallies(&pool, &[poll_id]).await.unwrap();
    assert_eq!(tallies[0].option_text, "Apple");
    assert_eq!(tallies[0].votes_count, 2);
    assert_eq!(tallies[1].option_text, "Banana");
    assert_eq!(tallies[1].votes_count, 1);

    let duplicate = votes::cast(&pool, poll_id, banana, u1.id).await;
    match duplicate {
        Err(Error::Validation(message)) => assert_eq!(message, votes::ALREADY_VOTED),
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert_eq!(vote_count(&pool, poll_id).await, 3);

    let stats = crate::stats::poll_stats(&pool, poll_id, Utc::now()).await.unwrap();
    assert_eq!(stats.total_votes, 3);
    assert_eq!(stats.votes_last_3_hours.iter().sum::<i64>(), 3);
    let winner = stats.predicted_winner.unwrap();
    assert_eq!(winner.option_id, apple);
    assert_eq!(winner.reason, crate::stats::REASON_RECENT);

    polls::delete(&pool, poll_id).await.unwrap();
}

#[async_std::test]
async fn test_option_must_belong_to_poll() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (first, _) = fruit_poll(&pool, &admin).await;
    let (second, other_options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;

    let result = votes::cast(&pool, first, other_options[0].id, voter.id).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    let result = votes::cast(&pool, -1, other_options[0].id, voter.id).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
    assert_eq!(vote_count(&pool, first).await, 0);

    polls::delete_many(&pool, &[first, second]).await.unwrap();
}

#[async_std::test]
async fn test_poll_delete_cascades() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;
    let vote = votes::cast(&pool, poll_id, options[0].id, voter.id).await.unwrap();
    let banner = banners::create(
        &pool,
        &banners::NewBanner {
            poll_id,
            title: "Vote now".to_string(),
            image: "banners/fruit.png".to_string(),
        },
    )
    .await
    .unwrap();

    assert!(polls::delete(&pool, poll_id).await.unwrap());

    assert!(polls::find(&pool, poll_id).await.unwrap().is_none());
    assert!(polls::tallies(&pool, &[poll_id]).await.unwrap().is_empty());
    assert!(banners::find(&pool, banner.id).await.unwrap().is_none());
    assert!(votes::delete(&pool, vote.id).await.unwrap().is_none());
}

#[async_std::test]
async fn test_option_delete_clears_winner() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;
    votes::cast(&pool, poll_id, options[1].id, voter.id).await.unwrap();

    let changes = PollChanges {
        winner: Some(Some(options[1].id)),
        ..Default::default()
    };
    let poll = polls::update(&pool, poll_id, &changes).await.unwrap().unwrap();
    assert_eq!(poll.winner_id, Some(options[1].id));

    assert!(polls::delete_option(&pool, options[1].id).await.unwrap());

    let poll = polls::get(&pool, poll_id).await.unwrap();
    assert_eq!(poll.winner_id, None);
    assert_eq!(vote_count(&pool, poll_id).await, 0);

    polls::delete(&pool, poll_id).await.unwrap();
}

#[async_std::test]
async fn test_winner_from_another_poll_is_refused() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (first, _) = fruit_poll(&pool, &admin).await;
    let (second, other_options) = fruit_poll(&pool, &admin).await;

    let changes = PollChanges {
        winner: Some(Some(other_options[0].id)),
        ..Default::default()
    };
    let result = polls::update(&pool, first, &changes).await;
    assert!(matches!(result, Err(Error::Validation(_))));

    polls::delete_many(&pool, &[first, second]).await.unwrap();
}

#[async_std::test]
async fn test_replacing_options_drops_votes() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;
    votes::cast(&pool, poll_id, options[0].id, voter.id).await.unwrap();

    let changes = PollChanges {
        title: Some("Best Colour".to_string()),
        options: Some(vec!["Red".to_string(), "Green".to_string(), "Blue".to_string()]),
        ..Default::default()
    };
    let poll = polls::update(&pool, poll_id, &changes).await.unwrap().unwrap();
    assert_eq!(poll.title, "Best Colour");

    let tallies = polls::tallies(&pool, &[poll_id]).await.unwrap();
    let texts: Vec<&str> = tallies.iter().map(|t| t.option_text.as_str()).collect();
    assert_eq!(texts, vec!["Red", "Green", "Blue"]);
    assert_eq!(vote_count(&pool, poll_id).await, 0);

    polls::delete(&pool, poll_id).await.unwrap();
}

#[async_std::test]
async fn test_user_bulk_delete_cascades() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;
    votes::cast(&pool, poll_id, options[0].id, voter.id).await.unwrap();

    let deleted = users::delete_many(&pool, &[admin.id, voter.id]).await.unwrap();
    assert_eq!(deleted, 2);
    assert!(users::find(&pool, voter.id).await.unwrap().is_none());
    assert!(polls::find(&pool, poll_id).await.unwrap().is_none());
}

#[async_std::test]
async fn test_duplicate_username() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let existing = user(&pool, Role::User).await;
    let again = NewUser {
        username: existing.username.clone(),
        email: String::new(),
        password_hash: "x".to_string(),
        role: Role::User,
        is_superuser: false,
    };
    assert!(matches!(users::create(&pool, &again).await, Err(Error::Validation(_))));

    users::delete(&pool, existing.id).await.unwrap();
}

#[async_std::test]
async fn test_second_banner_for_poll() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, _) = fruit_poll(&pool, &admin).await;
    let banner = banners::NewBanner {
        poll_id,
        title: "Vote now".to_string(),
        image: "banners/fruit.png".to_string(),
    };
    banners::create(&pool, &banner).await.unwrap();
    assert!(matches!(banners::create(&pool, &banner).await, Err(Error::Validation(_))));

    let missing = banners::NewBanner {
        poll_id: -1,
        ..banner.clone()
    };
    assert!(matches!(banners::create(&pool, &missing).await, Err(Error::Validation(_))));

    polls::delete(&pool, poll_id).await.unwrap();
}

#[async_std::test]
async fn test_deleted_user_cannot_vote() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;
    assert!(users::delete(&pool, voter.id).await.unwrap());

    let result = votes::cast(&pool, poll_id, options[0].id, voter.id).await;
    assert!(matches!(result, Err(Error::Unauthorized(_))));
    assert_eq!(vote_count(&pool, poll_id).await, 0);

    polls::delete(&pool, poll_id).await.unwrap();
}

#[async_std::test]
async fn test_deleted_admin_cannot_create_poll() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    assert!(users::delete(&pool, admin.id).await.unwrap());

    let poll = NewPoll {
        title: "Orphan".to_string(),
        description: String::new(),
        category: String::new(),
        active: true,
        created_by: admin.id,
    };
    let result = polls::create(&pool, &poll, &["Yes".to_string()]).await;
    assert!(matches!(result, Err(Error::Unauthorized(_))));
}

#[async_std::test]
async fn test_delete_missing_rows() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    assert!(!users::delete(&pool, -1).await.unwrap());
    assert!(!polls::delete(&pool, -1).await.unwrap());
}

#[async_std::test]
async fn test_top_polls_tie_on_lower_id() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (first, first_options) = fruit_poll(&pool, &admin).await;
    let (second, second_options) = fruit_poll(&pool, &admin).await;
    let voter = user(&pool, Role::User).await;
    votes::cast(&pool, second, second_options[0].id, voter.id).await.unwrap();
    votes::cast(&pool, first, first_options[1].id, voter.id).await.unwrap();

    let rows = polls::top_by_votes(&pool, i64::MAX).await.unwrap();
    let position = |id: i64| rows.iter().position(|row| row.id == id).unwrap();
    assert!(position(first) < position(second));
    assert_eq!(rows[position(first)].total_votes, 1);
    assert_eq!(rows[position(second)].total_votes, 1);

    polls::delete_many(&pool, &[first, second]).await.unwrap();
}

#[async_std::test]
async fn test_admin_summary() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;
    let closed = NewPoll {
        title: "Closed".to_string(),
        description: String::new(),
        category: String::new(),
        active: false,
        created_by: admin.id,
    };
    let (closed, _) = polls::create(&pool, &closed, &["Yes".to_string()]).await.unwrap();

    let (u1, u2, u3) = (
        user(&pool, Role::User).await,
        user(&pool, Role::User).await,
        user(&pool, Role::User).await,
    );
    let early = votes::cast(&pool, poll_id, options[0].id, u1.id).await.unwrap();
    let late = votes::cast(&pool, poll_id, options[1].id, u2.id).await.unwrap();
    let today = votes::cast(&pool, poll_id, options[1].id, u3.id).await.unwrap();
    backdate(&pool, early.id, at("2100-01-03T10:00:00Z")).await;
    backdate(&pool, late.id, at("2100-01-07T23:59:59Z")).await;
    backdate(&pool, today.id, at("2100-01-08T00:00:00Z")).await;

    let summary = crate::stats::admin_summary(&pool, at("2100-01-08T12:00:00Z")).await.unwrap();
    assert_eq!(summary.votes_last_7_days, vec![0, 0, 1, 0, 0, 0, 1]);
    assert!(summary.active_polls >= 1);
    assert!(summary.total_polls - summary.active_polls >= 1);
    assert!(summary.total_users >= 4);

    assert!(summary.top_polls.len() <= crate::stats::TOP_POLLS as usize);
    for pair in summary.top_polls.windows(2) {
        assert!(
            pair[0].total_votes > pair[1].total_votes
                || (pair[0].total_votes == pair[1].total_votes && pair[0].poll_id < pair[1].poll_id)
        );
    }

    polls::delete_many(&pool, &[poll_id, closed.id]).await.unwrap();
}

#[async_std::test]
async fn test_stats_for_poll_without_votes() {
    let pool = match test_pool().await {
        Some(pool) => pool,
        None => return,
    };
    let admin = user(&pool, Role::Admin).await;
    let (poll_id, options) = fruit_poll(&pool, &admin).await;

    let stats = crate::stats::poll_stats(&pool, poll_id, Utc::now()).await.unwrap();
    assert_eq!(stats.total_votes, 0);
    assert_eq!(stats.votes_last_3_hours, vec![0, 0, 0]);
    assert!(stats.predicted_winner.is_none());
    assert_eq!(stats.options.len(), options.len());
    assert!(stats.options.iter().all(|o| o.votes_count == 0));

    let missing = crate::stats::poll_stats(&pool, -1, Utc::now()).await;
    assert!(matches!(missing, Err(Error::NotFound(_))));

    polls::delete(&pool, poll_id).await.unwrap();
}
