use log::*;
use tide::Request;

use crate::api_models::*;
use crate::dao;
use crate::routes::{created, json_body, ok};
use crate::AppState;

/**
 * Absolute URL of a stored image, on whatever host the request came in on
 */
pub(crate) fn image_url(req: &Request<AppState>, image: &str) -> String {
    media_url(req.url(), &req.state().config.media_url, image)
}

/**
 *  GET /api/banners
 */
pub async fn list(req: Request<AppState>) -> tide::Result {
    let banners = dao::banners::list_all(&req.state().db).await?;
    let views: Vec<BannerView> = banners
        .into_iter()
        .map(|banner| {
            let image = image_url(&req, &banner.image);
            BannerView::new(banner, image)
        })
        .collect();
    ok(&views)
}

/**
 *  POST /api/banners
 */
pub async fn create(mut req: Request<AppState>) -> tide::Result {
    let body: CreateBannerRequest = json_body(&mut req).await?;
    let banner = body.validate()?;

    let banner = dao::banners::create(&req.state().db, &banner).await?;
    info!("Created banner {} for poll {}", banner.id, banner.poll_id);

    let image = image_url(&req, &banner.image);
    created(&BannerView::new(banner, image))
}
