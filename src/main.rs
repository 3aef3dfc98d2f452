use log::*;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tide::{Route, Server};

use std::sync::Arc;

mod api_models;
mod auth;
mod config;
mod dao;
mod error;
mod models;
mod pagination;
mod policy;
mod routes;
mod stats;

use crate::config::Config;
use crate::policy::Access;

/**
 * Struct for carrying application state into tide request handlers
 */
#[derive(Clone, Debug)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
}

/**
 * Create the sqlx connection pool for postgresql
 */
async fn create_pool(config: &Config) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
}

/**
 * Create the configured superuser if there is one and it is missing
 */
async fn bootstrap_superuser(state: &AppState) -> error::Result<()> {
    if let Some(superuser) = &state.config.superuser {
        let hash = auth::hash_password(&superuser.password)?;
        dao::users::ensure_superuser(&state.db, &superuser.username, &superuser.email, &hash).await?;
    }
    Ok(())
}

fn guarded<'a>(app: &'a mut Server<AppState>, path: &str, access: Access) -> Route<'a, AppState> {
    let mut route = app.at(path);
    route.with(auth::Guard(access));
    route
}

/**
 * Assemble the server with its middleware and every route
 */
pub fn build_app(state: AppState) -> Server<AppState> {
    use crate::routes::*;

    let mut app = tide::with_state(state);
    app.with(driftwood::ApacheCombinedLogger);
    app.with(error::ErrorRenderer);
    app.with(auth::Authenticate);

    guarded(&mut app, "/", Access::Public).get(index);

    guarded(&mut app, "/api/users/register", Access::Public).post(users::register);
    guarded(&mut app, "/api/users/login", Access::Public).post(users::login);
    guarded(&mut app, "/api/users/token/refresh", Access::Public).post(users::refresh);
    guarded(&mut app, "/api/users/profile", Access::Authenticated).get(users::profile);

    guarded(&mut app, "/api/polls", Access::Public).get(polls::list);
    guarded(&mut app, "/api/polls/create", Access::Admin).post(polls::create);
    guarded(&mut app, "/api/polls/admin/all", Access::Admin).get(polls::list_all);
    guarded(&mut app, "/api/polls/:id", Access::Public).get(polls::get);
    guarded(&mut app, "/api/polls/:id/vote", Access::Authenticated).post(polls::vote);
    guarded(&mut app, "/api/polls/:id/results", Access::Public).get(polls::results);
    guarded(&mut app, "/api/polls/:id/options/create", Access::Admin).post(polls::create_options);

    guarded(&mut app, "/api/banners", Access::Public).get(banners::list);
    guarded(&mut app, "/api/banners", Access::Admin).post(banners::create);
    guarded(&mut app, "/api/banners/create", Access::Admin).post(banners::create);

    guarded(&mut app, "/api/admin/users", Access::Admin).get(admin::list_users);
    guarded(&mut app, "/api/admin/users/bulk-delete", Access::Admin).post(admin::bulk_delete_users);
    guarded(&mut app, "/api/admin/users/:id", Access::Admin)
        .get(admin::get_user)
        .put(admin::update_user)
        .delete(admin::delete_user);

    guarded(&mut app, "/api/admin/polls", Access::Admin).get(admin::list_polls);
    guarded(&mut app, "/api/admin/polls/bulk-delete", Access::Admin).post(admin::bulk_delete_polls);
    guarded(&mut app, "/api/admin/polls/:id", Access::Admin)
        .get(admin::get_poll)
        .put(admin::update_poll)
        .delete(admin::delete_poll);
    guarded(&mut app, "/api/admin/polls/:id/toggle-active", Access::Admin).post(admin::toggle_poll);
    guarded(&mut app, "/api/admin/options/:id", Access::Admin).delete(admin::delete_option);

    guarded(&mut app, "/api/admin/banners", Access::Admin).get(admin::list_banners);
    guarded(&mut app, "/api/admin/banners/bulk-delete", Access::Admin).post(admin::bulk_delete_banners);
    guarded(&mut app, "/api/admin/banners/:id", Access::Admin)
        .get(admin::get_banner)
        .put(admin::update_banner)
        .delete(admin::delete_banner);

    guarded(&mut app, "/api/admin/votes", Access::Admin).get(admin::list_votes);
    guarded(&mut app, "/api/admin/votes/bulk-delete", Access::Admin).post(admin::bulk_delete_votes);
    guarded(&mut app, "/api/admin/votes/:id", Access::Admin).delete(admin::delete_vote);

    guarded(&mut app, "/api/admin/stats", Access::Admin).get(admin::stats);

    guarded(&mut app, "/api/dashboard/admin-summary", Access::Admin).get(dashboard::admin_summary);
    guarded(&mut app, "/api/dashboard/polls/:id/stats", Access::Admin).get(dashboard::poll_stats);

    app
}

fn startup_failure<E: Into<Box<dyn std::error::Error + Send + Sync>>>(err: E) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, err)
}

#[async_std::main]
async fn main() -> Result<(), std::io::Error> {
    pretty_env_logger::init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!("Could not load configuration! {}", err);
            return Err(startup_failure(err));
        }
    };

    match create_pool(&config).await {
        Ok(db) => {
            dao::migrate(&db).await.map_err(|err| {
                error!("Could not apply migrations! {:?}", err);
                startup_failure(err)
            })?;

            let state = AppState {
                db,
                config: Arc::new(config),
            };
            bootstrap_superuser(&state).await.map_err(|err| {
                error!("Could not create the superuser! {}", err);
                startup_failure(err)
            })?;

            let bind_address = state.config.bind_address.clone();
            info!("Listening on {}", bind_address);
            build_app(state).listen(bind_address).await?;
            Ok(())
        }
        Err(err) => {
            error!("Could not initialize pool! {:?}", err);
            Err(startup_failure(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{issue_token, Claims, TokenKind};
    use crate::models::Role;
    use chrono::{Duration, Utc};
    use serde_json::Value;
    use tide::http::{Method, Request, Response, StatusCode, Url};

    const SECRET: &str = "test-secret";

    fn test_config() -> Config {
        Config {
            database_url: "postgres://localhost/votenow_unused".to_string(),
            database_max_connections: 1,
            bind_address: "127.0.0.1:0".to_string(),
            secret_key: SECRET.to_string(),
            access_token_minutes: 5,
            refresh_token_minutes: 60,
            media_url: "/media/".to_string(),
            allow_admin_signup: false,
            superuser: None,
        }
    }

    /**
     * A server whose pool never connects, for requests which must be
     * answered before storage is touched
     */
    fn offline_app() -> Server<AppState> {
        let config = test_config();
        let db = PgPoolOptions::new()
            .max_connections(1)
            .connect_lazy(&config.database_url)
            .expect("lazy pool");
        build_app(AppState {
            db,
            config: Arc::new(config),
        })
    }

    fn token(user_id: i64, role: Role, kind: TokenKind) -> String {
        let claims = Claims::new(user_id, role, kind, Utc::now(), Duration::minutes(5));
        issue_token(SECRET, &claims).unwrap()
    }

    fn request(method: Method, path: &str) -> Request {
        Request::new(method, Url::parse(&format!("http://localhost{}", path)).unwrap())
    }

    fn as_user(mut req: Request, user_id: i64, role: Role) -> Request {
        req.insert_header(
            "Authorization",
            format!("Bearer {}", token(user_id, role, TokenKind::Access)),
        );
        req
    }

    fn with_json(mut req: Request, body: &str) -> Request {
        req.insert_header("Content-Type", "application/json");
        req.set_body(body);
        req
    }

    async fn error_message(mut res: Response) -> String {
        let body: Value = res.body_json().await.unwrap();
        body["error"].as_str().unwrap_or_default().to_string()
    }

    #[async_std::test]
    async fn test_index() {
        let app = offline_app();
        let mut res: Response = app.respond(request(Method::Get, "/")).await.unwrap();
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.body_string().await.unwrap(), "Wilkommen");
    }

    #[async_std::test]
    async fn test_unknown_route() {
        let app = offline_app();
        let res: Response = app.respond(request(Method::Get, "/api/nope")).await.unwrap();
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[async_std::test]
    async fn test_profile_requires_credentials() {
        let app = offline_app();
        let res: Response = app
            .respond(request(Method::Get, "/api/users/profile"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::Unauthorized);
        assert_eq!(
            error_message(res).await,
            "Authentication credentials were not provided."
        );
    }

    #[async_std::test]
    async fn test_vote_requires_credentials() {
        let app = offline_app();
        let req = with_json(request(Method::Post, "/api/polls/1/vote"), r#"{"option": 1}"#);
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Unauthorized);
    }

    #[async_std::test]
    async fn test_bad_token_is_rejected() {
        let app = offline_app();
        let mut req = request(Method::Get, "/api/users/profile");
        req.insert_header("Authorization", "Bearer not.valid");
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Unauthorized);
        assert_eq!(error_message(res).await, "Token is invalid or expired");
    }

    #[async_std::test]
    async fn test_refresh_token_is_not_an_access_token() {
        let app = offline_app();
        let mut req = request(Method::Get, "/api/users/profile");
        req.insert_header(
            "Authorization",
            format!("Bearer {}", token(1, Role::User, TokenKind::Refresh)),
        );
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Unauthorized);
    }

    #[async_std::test]
    async fn test_users_are_kept_out_of_admin_routes() {
        let app = offline_app();
        for (method, path) in vec![
            (Method::Get, "/api/admin/users"),
            (Method::Get, "/api/admin/stats"),
            (Method::Delete, "/api/admin/votes/3"),
            (Method::Post, "/api/polls/create"),
            (Method::Get, "/api/polls/admin/all"),
            (Method::Post, "/api/banners"),
            (Method::Get, "/api/dashboard/admin-summary"),
            (Method::Get, "/api/dashboard/polls/1/stats"),
        ] {
            let req = as_user(request(method, path), 2, Role::User);
            let res: Response = app.respond(req).await.unwrap();
            assert_eq!(res.status(), StatusCode::Forbidden, "{}", path);
        }
    }

    #[async_std::test]
    async fn test_anonymous_kept_out_of_admin_routes() {
        let app = offline_app();
        let res: Response = app
            .respond(request(Method::Get, "/api/admin/polls"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::Unauthorized);
    }

    #[async_std::test]
    async fn test_admin_cannot_bulk_delete_self() {
        let app = offline_app();
        let req = with_json(
            as_user(request(Method::Post, "/api/admin/users/bulk-delete"), 1, Role::Admin),
            r#"{"ids": [1, 2]}"#,
        );
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Forbidden);
        assert_eq!(error_message(res).await, "Cannot delete your own account");
    }

    #[async_std::test]
    async fn test_admin_cannot_edit_or_delete_self() {
        let app = offline_app();

        let req = as_user(request(Method::Delete, "/api/admin/users/1"), 1, Role::Admin);
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Forbidden);

        let req = with_json(
            as_user(request(Method::Put, "/api/admin/users/1"), 1, Role::Admin),
            r#"{"role": "user"}"#,
        );
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Forbidden);
        assert_eq!(
            error_message(res).await,
            "Cannot edit your own account through this endpoint"
        );
    }

    #[async_std::test]
    async fn test_bulk_delete_needs_ids() {
        let app = offline_app();
        let req = with_json(
            as_user(request(Method::Post, "/api/admin/polls/bulk-delete"), 1, Role::Admin),
            r#"{"ids": []}"#,
        );
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[async_std::test]
    async fn test_malformed_json_is_bad_request() {
        let app = offline_app();
        let req = with_json(request(Method::Post, "/api/users/register"), "{not json");
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[async_std::test]
    async fn test_admin_signup_is_refused() {
        let app = offline_app();
        let req = with_json(
            request(Method::Post, "/api/users/register"),
            r#"{"username": "mallory", "email": "m@example.com", "password": "longenough", "role": "admin"}"#,
        );
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::Forbidden);
    }

    #[async_std::test]
    async fn test_vote_for_another_poll_is_refused() {
        let app = offline_app();
        let req = with_json(
            as_user(request(Method::Post, "/api/polls/1/vote"), 2, Role::User),
            r#"{"option": 5, "poll": 2}"#,
        );
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    #[async_std::test]
    async fn test_non_numeric_id_is_bad_request() {
        let app = offline_app();
        let req = as_user(request(Method::Get, "/api/admin/users/abc"), 1, Role::Admin);
        let res: Response = app.respond(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::BadRequest);
    }

    /**
     * A server on TEST_DATABASE_URL, or None when no test database is configured
     */
    async fn live_app() -> Option<(Server<AppState>, PgPool)> {
        let url = std::env::var("TEST_DATABASE_URL").ok()?;
        let db = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("connect to TEST_DATABASE_URL");
        dao::migrate(&db).await.expect("migrations");
        let app = build_app(AppState {
            db: db.clone(),
            config: Arc::new(test_config()),
        });
        Some((app, db))
    }

    async fn refresh(app: &Server<AppState>, refresh: &str) -> Response {
        let req = with_json(
            request(Method::Post, "/api/users/token/refresh"),
            &serde_json::json!({ "refresh": refresh }).to_string(),
        );
        app.respond(req).await.unwrap()
    }

    #[async_std::test]
    async fn test_refresh_follows_the_account() {
        use crate::auth::verify_token;
        use crate::dao::users::{NewUser, UserChanges};

        let (app, db) = match live_app().await {
            Some(live) => live,
            None => return,
        };
        let user = dao::users::create(
            &db,
            &NewUser {
                username: format!("refresh-{}", uuid::Uuid::new_v4()),
                email: String::new(),
                password_hash: "not-a-real-hash".to_string(),
                role: Role::Admin,
                is_superuser: false,
            },
        )
        .await
        .unwrap();
        let refresh_token = token(user.id, Role::Admin, TokenKind::Refresh);

        let demote = UserChanges {
            role: Some(Role::User),
            ..Default::default()
        };
        dao::users::update(&db, user.id, &demote).await.unwrap();
        let mut res = refresh(&app, &refresh_token).await;
        assert_eq!(res.status(), StatusCode::Ok);
        let body: Value = res.body_json().await.unwrap();
        let access = body["access"].as_str().unwrap();
        let claims = verify_token(SECRET, access, TokenKind::Access, Utc::now()).unwrap();
        assert_eq!(claims.sub, user.id);
        assert_eq!(claims.role, Role::User);

        let deactivate = UserChanges {
            is_active: Some(false),
            ..Default::default()
        };
        dao::users::update(&db, user.id, &deactivate).await.unwrap();
        let res = refresh(&app, &refresh_token).await;
        assert_eq!(res.status(), StatusCode::Unauthorized);

        assert!(dao::users::delete(&db, user.id).await.unwrap());
        let res = refresh(&app, &refresh_token).await;
        assert_eq!(res.status(), StatusCode::Unauthorized);
        assert_eq!(error_message(res).await, "User not found or inactive");

        let res = refresh(&app, &token(424_242_424, Role::Admin, TokenKind::Refresh)).await;
        assert_eq!(res.status(), StatusCode::Unauthorized);
    }
}
