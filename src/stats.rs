/*
 * Dashboard aggregation: summary counts, vote histograms and the
 * predicted winner heuristic.
 *
 * Everything time related takes `now` as an argument so the bucketing can be
 * exercised without a clock.
 */
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::postgres::PgPool;

use std::collections::HashMap;

use crate::dao;
use crate::error::Result;

pub const TOP_POLLS: i64 = 5;
pub const DAILY_BUCKETS: i64 = 7;
pub const HOURLY_BUCKETS: i64 = 3;

pub const REASON_RECENT: &str = "highest votes in last 3 hours";
pub const REASON_TOTAL: &str = "highest total votes";

/**
 * Half-open time range `[start, end)`
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, at: &DateTime<Utc>) -> bool {
        *at >= self.start && *at < self.end
    }
}

fn midnight(at: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&at.date_naive().and_time(NaiveTime::MIN))
}

/**
 * Seven whole UTC days, oldest first: the day containing `now - 7d` through
 * the day containing `now - 1d`
 */
pub fn day_windows(now: DateTime<Utc>) -> Vec<Window> {
    (1..=DAILY_BUCKETS)
        .rev()
        .map(|i| {
            let start = midnight(now - Duration::days(i));
            Window {
                start,
                end: start + Duration::days(1),
            }
        })
        .collect()
}

/**
 * The last three hours counted back from `now`, oldest first
 */
pub fn hour_windows(now: DateTime<Utc>) -> Vec<Window> {
    (1..=HOURLY_BUCKETS)
        .rev()
        .map(|h| {
            let start = now - Duration::hours(h);
            Window {
                start,
                end: start + Duration::hours(1),
            }
        })
        .collect()
}

/**
 * Count timestamps per window. One entry per window, always.
 */
pub fn bucket(timestamps: &[DateTime<Utc>], windows: &[Window]) -> Vec<i64> {
    windows
        .iter()
        .map(|w| timestamps.iter().filter(|at| w.contains(at)).count() as i64)
        .collect()
}

/**
 * The range covering every window, for fetching timestamps in one query
 */
fn span(windows: &[Window]) -> Option<Window> {
    let start = windows.iter().map(|w| w.start).min()?;
    let end = windows.iter().map(|w| w.end).max()?;
    Some(Window { start, end })
}

async fn histogram(pool: &PgPool, poll_id: Option<i64>, windows: &[Window]) -> Result<Vec<i64>> {
    let timestamps = match span(windows) {
        Some(range) => dao::votes::timestamps_between(pool, poll_id, range.start, range.end).await?,
        None => vec![],
    };
    Ok(bucket(&timestamps, windows))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TopPoll {
    pub poll_id: i64,
    pub title: String,
    pub total_votes: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct AdminSummary {
    pub total_users: i64,
    pub total_polls: i64,
    pub active_polls: i64,
    pub top_polls: Vec<TopPoll>,
    pub votes_last_7_days: Vec<i64>,
}

pub async fn admin_summary(pool: &PgPool, now: DateTime<Utc>) -> Result<AdminSummary> {
    let totals = dao::stats::totals(pool).await?;

    let top_polls = dao::polls::top_by_votes(pool, TOP_POLLS)
        .await?
        .into_iter()
        .map(|row| TopPoll {
            poll_id: row.id,
            title: row.title,
            total_votes: row.total_votes,
        })
        .collect();

    Ok(AdminSummary {
        total_users: totals.total_users,
        total_polls: totals.total_polls,
        active_polls: totals.active_polls,
        top_polls,
        votes_last_7_days: histogram(pool, None, &day_windows(now)).await?,
    })
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct OptionStats {
    pub option_id: i64,
    pub option_text: String,
    pub votes_count: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PredictedWinner {
    pub option_id: i64,
    pub option_text: String,
    pub reason: &'static str,
}

#[derive(Clone, Debug, Serialize)]
pub struct PollStats {
    pub poll_id: i64,
    pub poll_title: String,
    pub total_votes: i64,
    pub options: Vec<OptionStats>,
    pub votes_last_3_hours: Vec<i64>,
    pub predicted_winner: Option<PredictedWinner>,
}

/**
 * First option holding the strictly greatest score, so ties go to the
 * option that comes first
 */
fn leader<'a, F>(options: &'a [OptionStats], score: F) -> Option<&'a OptionStats>
where
    F: Fn(&OptionStats) -> i64,
{
    let mut best: Option<(&OptionStats, i64)> = None;
    for option in options.iter() {
        let s = score(option);
        match best {
            Some((_, top)) if s <= top => {}
            _ => best = Some((option, s)),
        }
    }
    best.map(|(option, _)| option)
}

/**
 * Guess the winner: most votes in the last three hours, falling back to most
 * votes overall, or nobody when the poll has no votes at all.
 *
 * `options` must be in creation order, which makes the lowest option id win
 * ties.
 */
pub fn predict_winner(options: &[OptionStats], recent: &HashMap<i64, i64>) -> Option<PredictedWinner> {
    let recent_of = |o: &OptionStats| recent.get(&o.option_id).copied().unwrap_or(0);

    let (pick, reason) = if options.iter().any(|o| recent_of(o) > 0) {
        (leader(options, recent_of)?, REASON_RECENT)
    } else if options.iter().map(|o| o.votes_count).sum::<i64>() > 0 {
        (leader(options, |o| o.votes_count)?, REASON_TOTAL)
    } else {
        return None;
    };

    Some(PredictedWinner {
        option_id: pick.option_id,
        option_text: pick.option_text.clone(),
        reason,
    })
}

pub async fn poll_stats(pool: &PgPool, poll_id: i64, now: DateTime<Utc>) -> Result<PollStats> {
    let poll = dao::polls::find(pool, poll_id)
        .await?
        .ok_or_else(|| crate::error::Error::NotFound("Poll not found.".to_string()))?;

    let options: Vec<OptionStats> = dao::polls::tallies(pool, &[poll.id])
        .await?
        .into_iter()
        .map(|t| OptionStats {
            option_id: t.id,
            option_text: t.option_text,
            votes_count: t.votes_count,
        })
        .collect();
    let total_votes = options.iter().map(|o| o.votes_count).sum();

    let votes_last_3_hours = histogram(pool, Some(poll.id), &hour_windows(now)).await?;

    let recent: HashMap<i64, i64> = dao::votes::counts_since(pool, poll.id, now - Duration::hours(HOURLY_BUCKETS))
        .await?
        .into_iter()
        .collect();
    let predicted_winner = predict_winner(&options, &recent);

    Ok(PollStats {
        poll_id: poll.id,
        poll_title: poll.title,
        total_votes,
        options,
        votes_last_3_hours,
        predicted_winner,
    })
}
