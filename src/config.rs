use log::*;
use std::env;
use std::fmt::Display;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/**
 * Runtime settings, read once at startup from the environment (and `.env`)
 */
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub database_max_connections: u32,
    pub bind_address: String,
    pub secret_key: String,
    pub access_token_minutes: i64,
    pub refresh_token_minutes: i64,
    /// Prefix under which stored banner images are served
    pub media_url: String,
    pub allow_admin_signup: bool,
    pub superuser: Option<Superuser>,
}

/**
 * Account created at startup when it does not exist yet
 */
#[derive(Clone, Debug)]
pub struct Superuser {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let superuser = match (var("VOTENOW_SUPERUSER"), var("VOTENOW_SUPERUSER_PASSWORD")) {
            (Some(username), Some(password)) => Some(Superuser {
                username,
                password,
                email: var("VOTENOW_SUPERUSER_EMAIL").unwrap_or_default(),
            }),
            _ => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: try_load("DATABASE_MAX_CONNECTIONS", "5")?,
            bind_address: try_load("BIND_ADDRESS", "127.0.0.1:8000")?,
            secret_key: required("VOTENOW_SECRET_KEY")?,
            access_token_minutes: try_load("ACCESS_TOKEN_MINUTES", "60")?,
            refresh_token_minutes: try_load("REFRESH_TOKEN_MINUTES", "1440")?,
            media_url: normalize_media_url(&try_load::<String>("MEDIA_URL", "/media/")?),
            allow_admin_signup: try_load("VOTENOW_ALLOW_ADMIN_SIGNUP", "false")?,
            superuser,
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    var(key).ok_or(ConfigError::Missing(key))
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|| {
        debug!("{} not set, using default: {}", key, default);
        default.to_string()
    });

    raw.parse().map_err(|e: T::Err| {
        warn!("Invalid {} value: {}", key, e);
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }
    })
}

/**
 * Media URLs are joined with relative image paths, so make sure there is a
 * leading and a trailing slash
 */
fn normalize_media_url(raw: &str) -> String {
    let trimmed = raw.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}/", trimmed)
    }
}
