/*
 * Moderation endpoints, every one of them behind the admin guard
 */
use log::*;
use tide::Request;

use crate::api_models::*;
use crate::auth;
use crate::dao;
use crate::error::Error;
use crate::pagination::Page;
use crate::routes::banners::image_url;
use crate::routes::{id_param, json_body, no_content, ok, query};
use crate::AppState;

fn deleted(count: u64, entities: &str) -> Message {
    Message::new(format!("{} {} deleted successfully", count, entities))
}

/**
 *  GET /api/admin/users
 */
pub async fn list_users(req: Request<AppState>) -> tide::Result {
    let params: ListQuery = query(&req)?;
    let page = params.page()?;

    let (count, rows) = dao::users::list(&req.state().db, &params.user_filter(), &page).await?;
    let rows: Vec<AdminUserRow> = rows.into_iter().map(AdminUserRow::from).collect();
    ok(&Page::new(rows, count, &page, req.url()))
}

/**
 *  GET /api/admin/users/:id
 */
pub async fn get_user(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let user = dao::users::find(&req.state().db, id)
        .await?
        .ok_or_else(|| Error::not_found("User"))?;
    ok(&AdminUserDetail::from(user))
}

/**
 *  PUT /api/admin/users/:id
 */
pub async fn update_user(mut req: Request<AppState>) -> tide::Result {
    let caller = auth::caller(&req)?;
    let id = id_param(&req, "id")?;
    if id == caller.id {
        return Err(Error::forbidden("Cannot edit your own account through this endpoint").into());
    }

    let body: UserUpdateRequest = json_body(&mut req).await?;
    let changes = body.validate()?;

    let user = dao::users::update(&req.state().db, id, &changes)
        .await?
        .ok_or_else(|| Error::not_found("User"))?;
    info!("Admin {} updated user {}", caller.id, user.username);
    ok(&AdminUserDetail::from(user))
}

/**
 *  DELETE /api/admin/users/:id
 */
pub async fn delete_user(req: Request<AppState>) -> tide::Result {
    let caller = auth::caller(&req)?;
    let id = id_param(&req, "id")?;
    if id == caller.id {
        return Err(Error::forbidden("Cannot delete your own account").into());
    }

    if !dao::users::delete(&req.state().db, id).await? {
        return Err(Error::not_found("User").into());
    }
    info!("Admin {} deleted user {}", caller.id, id);
    no_content()
}

/**
 *  POST /api/admin/users/bulk-delete
 */
pub async fn bulk_delete_users(mut req: Request<AppState>) -> tide::Result {
    let caller = auth::caller(&req)?;
    let body: BulkDeleteRequest = json_body(&mut req).await?;
    let ids = body.ids()?;
    if ids.contains(&caller.id) {
        return Err(Error::forbidden("Cannot delete your own account").into());
    }

    let count = dao::users::delete_many(&req.state().db, ids).await?;
    info!("Admin {} bulk deleted {} users", caller.id, count);
    ok(&deleted(count, "users"))
}

/**
 *  GET /api/admin/polls
 */
pub async fn list_polls(req: Request<AppState>) -> tide::Result {
    let params: ListQuery = query(&req)?;
    let page = params.page()?;

    let (count, rows) = dao::polls::list_filtered(&req.state().db, &params.poll_filter(), &page).await?;
    let rows: Vec<AdminPollRow> = rows.into_iter().map(AdminPollRow::from).collect();
    ok(&Page::new(rows, count, &page, req.url()))
}

async fn poll_detail(req: &Request<AppState>, id: i64) -> tide::Result {
    let db = &req.state().db;
    let poll = dao::polls::get(db, id).await?;
    let username = dao::polls::creator_username(db, &poll).await?;
    let tallies = dao::polls::tallies(db, &[poll.id]).await?;
    ok(&AdminPollDetail::new(poll, username, tallies))
}

/**
 *  GET /api/admin/polls/:id
 */
pub async fn get_poll(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    poll_detail(&req, id).await
}

/**
 *  PUT /api/admin/polls/:id
 */
pub async fn update_poll(mut req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let body: PollUpdateRequest = json_body(&mut req).await?;
    let changes = body.validate()?;

    let poll = dao::polls::update(&req.state().db, id, &changes)
        .await?
        .ok_or_else(|| Error::not_found("Poll"))?;
    info!("Updated poll {}", poll.id);
    poll_detail(&req, poll.id).await
}

/**
 *  DELETE /api/admin/polls/:id
 */
pub async fn delete_poll(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    if !dao::polls::delete(&req.state().db, id).await? {
        return Err(Error::not_found("Poll").into());
    }
    info!("Deleted poll {}", id);
    no_content()
}

/**
 *  POST /api/admin/polls/:id/toggle-active
 */
pub async fn toggle_poll(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let active = dao::polls::toggle_active(&req.state().db, id)
        .await?
        .ok_or_else(|| Error::not_found("Poll"))?;
    ok(&ToggleResponse::new(active))
}

/**
 *  POST /api/admin/polls/bulk-delete
 */
pub async fn bulk_delete_polls(mut req: Request<AppState>) -> tide::Result {
    let body: BulkDeleteRequest = json_body(&mut req).await?;
    let count = dao::polls::delete_many(&req.state().db, body.ids()?).await?;
    info!("Bulk deleted {} polls", count);
    ok(&deleted(count, "polls"))
}

/**
 *  DELETE /api/admin/options/:id
 */
pub async fn delete_option(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    if !dao::polls::delete_option(&req.state().db, id).await? {
        return Err(Error::not_found("Option").into());
    }
    info!("Deleted option {}", id);
    no_content()
}

/**
 *  GET /api/admin/banners
 */
pub async fn list_banners(req: Request<AppState>) -> tide::Result {
    let params: ListQuery = query(&req)?;
    let page = params.page()?;

    let (count, rows) = dao::banners::list(&req.state().db, params.search.as_deref(), &page).await?;
    let rows: Vec<AdminBannerRow> = rows
        .into_iter()
        .map(|row| {
            let image = image_url(&req, &row.image);
            AdminBannerRow::new(row, image, true)
        })
        .collect();
    ok(&Page::new(rows, count, &page, req.url()))
}

/**
 *  GET /api/admin/banners/:id
 */
pub async fn get_banner(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let row = dao::banners::find(&req.state().db, id)
        .await?
        .ok_or_else(|| Error::not_found("Banner"))?;
    let image = image_url(&req, &row.image);
    ok(&AdminBannerRow::new(row, image, false))
}

/**
 *  PUT /api/admin/banners/:id
 */
pub async fn update_banner(mut req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let body: BannerUpdateRequest = json_body(&mut req).await?;
    let changes = body.validate()?;

    let row = dao::banners::update(&req.state().db, id, &changes)
        .await?
        .ok_or_else(|| Error::not_found("Banner"))?;
    let image = image_url(&req, &row.image);
    ok(&AdminBannerRow::new(row, image, false))
}

/**
 *  DELETE /api/admin/banners/:id
 */
pub async fn delete_banner(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let title = dao::banners::delete(&req.state().db, id)
        .await?
        .ok_or_else(|| Error::not_found("Banner"))?;
    info!("Deleted banner {}", title);
    no_content()
}

/**
 *  POST /api/admin/banners/bulk-delete
 */
pub async fn bulk_delete_banners(mut req: Request<AppState>) -> tide::Result {
    let body: BulkDeleteRequest = json_body(&mut req).await?;
    let count = dao::banners::delete_many(&req.state().db, body.ids()?).await?;
    ok(&deleted(count, "banners"))
}

/**
 *  GET /api/admin/votes
 */
pub async fn list_votes(req: Request<AppState>) -> tide::Result {
    let params: ListQuery = query(&req)?;
    let filter = params.vote_filter()?;
    let page = params.page()?;

    let (count, rows) = dao::votes::list(&req.state().db, &filter, &page).await?;
    let rows: Vec<AdminVoteRow> = rows.into_iter().map(AdminVoteRow::from).collect();
    ok(&Page::new(rows, count, &page, req.url()))
}

/**
 *  DELETE /api/admin/votes/:id
 */
pub async fn delete_vote(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    let what = dao::votes::delete(&req.state().db, id)
        .await?
        .ok_or_else(|| Error::not_found("Vote"))?;
    info!("Deleted {}", what);
    no_content()
}

/**
 *  POST /api/admin/votes/bulk-delete
 */
pub async fn bulk_delete_votes(mut req: Request<AppState>) -> tide::Result {
    let body: BulkDeleteRequest = json_body(&mut req).await?;
    let count = dao::votes::delete_many(&req.state().db, body.ids()?).await?;
    ok(&deleted(count, "votes"))
}

/**
 *  GET /api/admin/stats
 */
pub async fn stats(req: Request<AppState>) -> tide::Result {
    ok(&dao::stats::totals(&req.state().db).await?)
}
