use log::*;
use tide::Request;

use std::collections::HashSet;

use crate::api_models::*;
use crate::auth;
use crate::dao;
use crate::dao::polls::NewPoll;
use crate::error::{Error, Result};
use crate::models::Poll;
use crate::routes::{created, id_param, json_body, ok};
use crate::AppState;

/**
 * Attach options, totals and the caller's voted flag to a batch of polls
 */
async fn poll_views(req: &Request<AppState>, polls: Vec<Poll>) -> Result<Vec<PollView>> {
    let db = &req.state().db;
    let ids: Vec<i64> = polls.iter().map(|p| p.id).collect();

    let tallies = dao::polls::tallies(db, &ids).await?;
    let voted: HashSet<i64> = match req.ext::<auth::Caller>() {
        Some(caller) => dao::votes::voted_polls(db, caller.id, &ids)
            .await?
            .into_iter()
            .collect(),
        None => HashSet::new(),
    };

    Ok(PollView::many(polls, &tallies, &voted))
}

/**
 *  GET /api/polls
 */
pub async fn list(req: Request<AppState>) -> tide::Result {
    let polls = dao::polls::list(&req.state().db, true).await?;
    ok(&poll_views(&req, polls).await?)
}

/**
 *  GET /api/polls/admin/all
 */
pub async fn list_all(req: Request<AppState>) -> tide::Result {
    let polls = dao::polls::list(&req.state().db, false).await?;
    ok(&poll_views(&req, polls).await?)
}

/**
 *  POST /api/polls/create
 */
pub async fn create(mut req: Request<AppState>) -> tide::Result {
    let caller = auth::caller(&req)?;
    let body: CreatePollRequest = json_body(&mut req).await?;
    let options = body.validate()?;

    let poll = NewPoll {
        title: body.title,
        description: body.description,
        category: body.category,
        active: body.active.unwrap_or(true),
        created_by: caller.id,
    };
    let (poll, _) = dao::polls::create(&req.state().db, &poll, &options).await?;
    info!("User {} created poll {} ({})", caller.id, poll.id, poll.title);

    let mut views = poll_views(&req, vec![poll]).await?;
    match views.pop() {
        Some(view) => created(&view),
        None => Err(Error::Internal("created poll vanished".to_string()).into()),
    }
}

/**
 *  GET /api/polls/:id
 */
pub async fn get(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    debug!("Fetching poll: {}", id);

    let poll = dao::polls::get(&req.state().db, id).await?;
    let mut views = poll_views(&req, vec![poll]).await?;
    match views.pop() {
        Some(view) => ok(&view),
        None => Err(Error::not_found("Poll").into()),
    }
}

/**
 *  POST /api/polls/:id/vote
 */
pub async fn vote(mut req: Request<AppState>) -> tide::Result {
    let caller = auth::caller(&req)?;
    let poll_id = id_param(&req, "id")?;
    let ballot: VoteRequest = json_body(&mut req).await?;

    if let Some(poll) = ballot.poll {
        if poll != poll_id {
            return Err(Error::validation("poll: Does not match the poll being voted on").into());
        }
    }

    let vote = dao::votes::cast(&req.state().db, poll_id, ballot.option, caller.id).await?;
    created(&VoteView::from(vote))
}

/**
 *  GET /api/polls/:id/results
 */
pub async fn results(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let db = &req.state().db;

    let poll = dao::polls::get(db, id).await?;
    let tallies = dao::polls::tallies(db, &[poll.id]).await?;
    ok(&Tally::new(poll, tallies))
}

/**
 *  POST /api/polls/:id/options/create
 */
pub async fn create_options(mut req: Request<AppState>) -> tide::Result {
    let poll_id = id_param(&req, "id")?;
    let body: NewOptionsRequest = json_body(&mut req).await?;
    let texts = body.into_texts()?;

    let options = dao::polls::add_options(&req.state().db, poll_id, &texts).await?;
    info!("Added {} options to poll {}", options.len(), poll_id);

    let views: Vec<OptionView> = options.iter().map(OptionView::from).collect();
    created(&views)
}
