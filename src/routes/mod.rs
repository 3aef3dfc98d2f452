/*
 * The routes module contains all the tide routes and the logic to fulfill the
 * responses for each route.
 *
 * Modules are nested by the area of the API they serve
 */
use serde::de::DeserializeOwned;
use serde::Serialize;
use tide::{Body, Request, Response, StatusCode};

use crate::error::{Error, Result};
use crate::AppState;

pub mod admin;
pub mod banners;
pub mod dashboard;
pub mod polls;
pub mod users;

/**
 *  GET /
 */
pub async fn index(_req: Request<AppState>) -> tide::Result<String> {
    Ok("Wilkommen".to_string())
}

/**
 * Parse a numeric path parameter
 */
pub(crate) fn id_param(req: &Request<AppState>, name: &str) -> Result<i64> {
    req.param::<i64>(name)
        .map_err(|_| Error::validation(format!("{}: A valid integer is required.", name)))
}

/**
 * Read the request body as JSON, a malformed body is the caller's mistake
 */
pub(crate) async fn json_body<T: DeserializeOwned>(req: &mut Request<AppState>) -> Result<T> {
    let raw = req
        .body_string()
        .await
        .map_err(|e| Error::validation(format!("Unreadable request body: {}", e)))?;
    serde_json::from_str(&raw).map_err(|e| Error::validation(format!("JSON parse error - {}", e)))
}

/**
 * Deserialize the query string into `T`
 */
pub(crate) fn query<T: DeserializeOwned + Default>(req: &Request<AppState>) -> Result<T> {
    match req.url().query() {
        None => Ok(T::default()),
        Some(raw) => serde_qs::from_str(raw)
            .map_err(|e| Error::validation(format!("Invalid query string: {}", e))),
    }
}

pub(crate) fn json<T: Serialize>(status: StatusCode, value: &T) -> tide::Result {
    Ok(Response::builder(status).body(Body::from_json(value)?).build())
}

pub(crate) fn ok<T: Serialize>(value: &T) -> tide::Result {
    json(StatusCode::Ok, value)
}

pub(crate) fn created<T: Serialize>(value: &T) -> tide::Result {
    json(StatusCode::Created, value)
}

pub(crate) fn no_content() -> tide::Result {
    Ok(Response::new(StatusCode::NoContent))
}
