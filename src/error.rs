use log::*;
use serde_json::json;
use tide::{Body, Middleware, Next, Request, StatusCode};

/**
 * Every failure a handler or data access function can report.
 *
 * Handlers return `tide::Result` and simply use `?`, the `ErrorRenderer`
 * middleware fishes this type back out of the response to pick the status
 * code and render the JSON body.
 */
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("Database failure: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal failure: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn not_found(what: &str) -> Self {
        Error::NotFound(format!("{} not found", what))
    }

    pub fn validation<S: Into<String>>(message: S) -> Self {
        Error::Validation(message.into())
    }

    pub fn forbidden<S: Into<String>>(message: S) -> Self {
        Error::Forbidden(message.into())
    }

    pub fn unauthorized<S: Into<String>>(message: S) -> Self {
        Error::Unauthorized(message.into())
    }

    /**
     * The account behind a still valid token is gone
     */
    pub fn unknown_user() -> Self {
        Error::Unauthorized("User not found".to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Error::NotFound(_) => StatusCode::NotFound,
            Error::Validation(_) => StatusCode::BadRequest,
            Error::Forbidden(_) => StatusCode::Forbidden,
            Error::Unauthorized(_) => StatusCode::Unauthorized,
            Error::Database(_) | Error::Internal(_) => StatusCode::InternalServerError,
        }
    }

    /**
     * The message that goes out over the wire, storage details stay in the logs
     */
    pub fn public_message(&self) -> String {
        match self {
            Error::Database(_) | Error::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/**
 * Returns true when the error is a PostgreSQL unique violation on the named constraint
 */
pub fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23505") {
            return db_err.message().contains(constraint);
        }
    }
    false
}

/**
 * Returns true when the error is a PostgreSQL foreign key violation on the named constraint
 */
pub fn is_foreign_key_violation(err: &sqlx::Error, constraint: &str) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if db_err.code().as_deref() == Some("23503") {
            return db_err.message().contains(constraint);
        }
    }
    false
}

/**
 * Response middleware which turns any error carried by the response into the
 * `{"error": "..."}` JSON body the API promises.
 */
#[derive(Debug, Default)]
pub struct ErrorRenderer;

#[async_trait::async_trait]
impl<State: Clone + Send + Sync + 'static> Middleware<State> for ErrorRenderer {
    async fn handle(&self, req: Request<State>, next: Next<'_, State>) -> tide::Result {
        let mut res = next.run(req).await;

        let rendered = if let Some(err) = res.downcast_error::<Error>() {
            if err.status().is_server_error() {
                error!("Request failed: {}", err);
            }
            Some((err.status(), err.public_message()))
        } else if let Some(err) = res.error() {
            let status = err.status();
            if status.is_server_error() {
                error!("Request failed: {:?}", err);
                Some((status, "Internal server error".to_string()))
            } else {
                Some((status, err.to_string()))
            }
        } else {
            None
        };

        if let Some((status, message)) = rendered {
            res.set_status(status);
            res.set_body(Body::from_json(&json!({ "error": message }))?);
        }
        Ok(res)
    }
}
