use chrono::Utc;
use tide::Request;

use crate::routes::{id_param, ok};
use crate::stats;
use crate::AppState;

/**
 *  GET /api/dashboard/admin-summary
 */
pub async fn admin_summary(req: Request<AppState>) -> tide::Result {
    ok(&stats::admin_summary(&req.state().db, Utc::now()).await?)
}

/**
 *  GET /api/dashboard/polls/:id/stats
 */
pub async fn poll_stats(req: Request<AppState>) -> tide::Result {
    let id = id_param(&req, "id")?;
    ok(&stats::poll_stats(&req.state().db, id, Utc::now()).await?)
}
