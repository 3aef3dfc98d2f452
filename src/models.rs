use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/**
 * The two kinds of accounts
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }

    /**
     * Superusers are always admins, whatever was asked for
     */
    pub fn effective(requested: Role, is_superuser: bool) -> Role {
        if is_superuser {
            Role::Admin
        } else {
            requested
        }
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "user" => Ok(Role::User),
            _ => Err(Error::validation("Role must be 'admin' or 'user'")),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    pub fn role(&self) -> Role {
        let stored = self.role.parse().unwrap_or(Role::User);
        Role::effective(stored, self.is_superuser)
    }
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Poll {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub winner_id: Option<i64>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct PollOption {
    pub id: i64,
    pub option_text: String,
}

/**
 * An option together with the number of votes cast for it
 */
#[derive(Clone, Debug, sqlx::FromRow)]
pub struct OptionTally {
    pub id: i64,
    pub poll_id: i64,
    pub option_text: String,
    pub votes_count: i64,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Vote {
    pub id: i64,
    pub poll_id: i64,
    pub option_id: i64,
    pub voted_by: i64,
    pub voted_at: DateTime<Utc>,
}

#[derive(Clone, Debug, sqlx::FromRow)]
pub struct Banner {
    pub id: i64,
    pub poll_id: i64,
    pub title: String,
    /// Path relative to the media root
    pub image: String,
    pub created_at: DateTime<Utc>,
}
