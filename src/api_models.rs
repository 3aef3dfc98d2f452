use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use std::collections::{HashMap, HashSet};

use crate::dao::banners::{BannerChanges, BannerRow, NewBanner};
use crate::dao::polls::{PollChanges, PollFilter, PollListRow};
use crate::dao::users::{UserChanges, UserFilter, UserListRow};
use crate::dao::votes::{VoteFilter, VoteRow};
use crate::error::{Error, Result};
use crate::models::{Banner, OptionTally, Poll, PollOption, Role, User, Vote};
use crate::pagination::PageRequest;

/// Column widths from the schema
pub const MAX_TEXT: usize = 255;
pub const MAX_NAME: usize = 150;
pub const MAX_EMAIL: usize = 254;
pub const MAX_CATEGORY: usize = 50;

/**
 * Distinguish a missing field from an explicit `null`
 */
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn check_len(field: &str, value: &str, max: usize) -> Result<()> {
    if value.chars().count() > max {
        return Err(Error::validation(format!(
            "{}: Ensure this field has no more than {} characters.",
            field, max
        )));
    }
    Ok(())
}

fn check_text(field: &str, value: &str, max: usize) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(format!("{}: This field may not be blank.", field)));
    }
    check_len(field, value, max)
}

/**
 * Email is optional, but when given it has to look like one
 */
fn check_email(value: &str) -> Result<()> {
    if !value.is_empty() && !value.contains('@') {
        return Err(Error::validation("email: Enter a valid email address."));
    }
    check_len("email", value, MAX_EMAIL)
}

/*
 * Accounts
 */

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    #[serde(default)]
    pub email: String,
    pub password: String,
    pub role: Option<String>,
}

impl RegisterRequest {
    pub fn validate(&self) -> Result<Role> {
        check_text("username", &self.username, MAX_NAME)?;
        check_email(&self.email)?;
        if self.password.chars().count() < 8 {
            return Err(Error::validation(
                "password: This password is too short. It must contain at least 8 characters.",
            ));
        }
        match &self.role {
            Some(role) => role.parse(),
            None => Ok(Role::User),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh: String,
}

/**
 * What anyone may see about a user
 */
#[derive(Debug, Serialize)]
pub struct UserPublic {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl From<&User> for UserPublic {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            email: user.email.clone(),
            role: user.role(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub refresh: String,
    pub access: String,
    pub user: UserPublic,
}

#[derive(Debug, Serialize)]
pub struct AccessResponse {
    pub access: String,
}

/*
 * Polls
 */

#[derive(Debug, Deserialize)]
pub struct OptionInput {
    pub option_text: String,
}

#[derive(Debug, Deserialize)]
pub struct CreatePollRequest {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    pub active: Option<bool>,
    #[serde(default)]
    pub options: Vec<OptionInput>,
}

impl CreatePollRequest {
    pub fn validate(&self) -> Result<Vec<String>> {
        check_text("title", &self.title, MAX_TEXT)?;
        check_len("category", &self.category, MAX_CATEGORY)?;
        self.options
            .iter()
            .map(|o| check_text("option_text", &o.option_text, MAX_TEXT).map(|_| o.option_text.clone()))
            .collect()
    }
}

/**
 * Options can be added one at a time or in bulk
 */
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum NewOptionsRequest {
    Many { options: Vec<String> },
    One { option_text: String },
}

impl NewOptionsRequest {
    pub fn into_texts(self) -> Result<Vec<String>> {
        let texts = match self {
            NewOptionsRequest::Many { options } => options,
            NewOptionsRequest::One { option_text } => vec![option_text],
        };
        if texts.is_empty() {
            return Err(Error::validation("options: This list may not be empty."));
        }
        for text in texts.iter() {
            check_text("option_text", text, MAX_TEXT)?;
        }
        Ok(texts)
    }
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub option: i64,
    pub poll: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct OptionView {
    pub id: i64,
    pub option_text: String,
}

impl From<&PollOption> for OptionView {
    fn from(option: &PollOption) -> Self {
        Self {
            id: option.id,
            option_text: option.option_text.clone(),
        }
    }
}

impl From<&OptionTally> for OptionView {
    fn from(tally: &OptionTally) -> Self {
        Self {
            id: tally.id,
            option_text: tally.option_text.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PollView {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
    pub active: bool,
    pub winner: Option<i64>,
    pub options: Vec<OptionView>,
    pub user_voted: bool,
    pub total_votes: i64,
}

impl PollView {
    pub fn new(poll: Poll, tallies: &[&OptionTally], user_voted: bool) -> Self {
        Self {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            category: poll.category,
            created_by: poll.created_by,
            created_at: poll.created_at,
            active: poll.active,
            winner: poll.winner_id,
            options: tallies.iter().map(|t| OptionView::from(*t)).collect(),
            user_voted,
            total_votes: tallies.iter().map(|t| t.votes_count).sum(),
        }
    }

    /**
     * Assemble views for many polls from one batch of tallies and the set of
     * polls the caller has voted on
     */
    pub fn many(polls: Vec<Poll>, tallies: &[OptionTally], voted: &HashSet<i64>) -> Vec<Self> {
        let mut by_poll: HashMap<i64, Vec<&OptionTally>> = HashMap::new();
        for tally in tallies.iter() {
            by_poll.entry(tally.poll_id).or_default().push(tally);
        }

        polls
            .into_iter()
            .map(|poll| {
                let options = by_poll.remove(&poll.id).unwrap_or_default();
                let user_voted = voted.contains(&poll.id);
                PollView::new(poll, &options, user_voted)
            })
            .collect()
    }
}

#[derive(Debug, Serialize)]
pub struct VoteView {
    pub id: i64,
    pub poll: i64,
    pub option: i64,
    pub voted_by: i64,
    pub voted_at: DateTime<Utc>,
}

impl From<Vote> for VoteView {
    fn from(vote: Vote) -> Self {
        Self {
            id: vote.id,
            poll: vote.poll_id,
            option: vote.option_id,
            voted_by: vote.voted_by,
            voted_at: vote.voted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OptionResult {
    pub option_text: String,
    pub votes_count: i64,
}

/**
 * Results from a given poll
 */
#[derive(Debug, Serialize)]
pub struct Tally {
    pub poll: String,
    pub options: Vec<OptionResult>,
}

impl Tally {
    pub fn new(poll: Poll, tallies: Vec<OptionTally>) -> Self {
        Self {
            poll: poll.title,
            options: tallies
                .into_iter()
                .map(|t| OptionResult {
                    option_text: t.option_text,
                    votes_count: t.votes_count,
                })
                .collect(),
        }
    }
}

/*
 * Banners
 */

#[derive(Debug, Deserialize)]
pub struct CreateBannerRequest {
    pub poll: i64,
    pub title: String,
    pub image: String,
}

impl CreateBannerRequest {
    pub fn validate(self) -> Result<NewBanner> {
        check_text("title", &self.title, MAX_TEXT)?;
        check_image(&self.image)?;
        Ok(NewBanner {
            poll_id: self.poll,
            title: self.title,
            image: self.image,
        })
    }
}

fn check_image(image: &str) -> Result<()> {
    if image.trim().is_empty() {
        return Err(Error::validation("image: No file was submitted."));
    }
    if image.chars().count() > 100 {
        return Err(Error::validation(
            "image: Ensure this filename has at most 100 characters.",
        ));
    }
    Ok(())
}

/**
 * Render a stored media path as an absolute URL on the host the request came in on
 */
pub fn media_url(base: &tide::http::Url, prefix: &str, image: &str) -> String {
    if image.starts_with("http://") || image.starts_with("https://") {
        return image.to_string();
    }
    let path = format!("{}{}", prefix, image.trim_start_matches('/'));
    base.join(&path)
        .map(|url| url.to_string())
        .unwrap_or(path)
}

#[derive(Debug, Serialize)]
pub struct BannerView {
    pub id: i64,
    pub poll: i64,
    pub title: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
}

impl BannerView {
    pub fn new(banner: Banner, image: String) -> Self {
        Self {
            id: banner.id,
            poll: banner.poll_id,
            title: banner.title,
            image,
            created_at: banner.created_at,
        }
    }
}

/*
 * Admin
 */

/**
 * Query parameters understood by the admin listings. Every listing ignores
 * the ones it has no use for.
 */
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<String>,
    pub category: Option<String>,
    pub active: Option<String>,
    pub poll_id: Option<String>,
    pub user_id: Option<String>,
    pub page: Option<String>,
    pub page_size: Option<String>,
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/**
 * `true` in any case means true, any other non-empty value means false
 */
fn flag(value: &Option<String>) -> Option<bool> {
    non_empty(value).map(|v| v.eq_ignore_ascii_case("true"))
}

fn id_filter(field: &str, value: &Option<String>) -> Result<Option<i64>> {
    match non_empty(value) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::validation(format!("{}: A valid integer is required.", field))),
    }
}

impl ListQuery {
    pub fn page(&self) -> Result<PageRequest> {
        PageRequest::from_params(self.page.as_deref(), self.page_size.as_deref())
    }

    pub fn user_filter(&self) -> UserFilter {
        UserFilter {
            search: non_empty(&self.search),
            role: non_empty(&self.role),
            is_active: flag(&self.is_active),
        }
    }

    pub fn poll_filter(&self) -> PollFilter {
        PollFilter {
            search: non_empty(&self.search),
            category: non_empty(&self.category),
            active: flag(&self.active),
        }
    }

    pub fn vote_filter(&self) -> Result<VoteFilter> {
        Ok(VoteFilter {
            poll_id: id_filter("poll_id", &self.poll_id)?,
            user_id: id_filter("user_id", &self.user_id)?,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BulkDeleteRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
}

impl BulkDeleteRequest {
    pub fn ids(&self) -> Result<&[i64]> {
        if self.ids.is_empty() {
            Err(Error::validation("ids: Ensure this field has at least 1 elements."))
        } else {
            Ok(&self.ids)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ToggleResponse {
    pub message: String,
    pub active: bool,
}

impl ToggleResponse {
    pub fn new(active: bool) -> Self {
        let state = if active { "active" } else { "inactive" };
        Self {
            message: format!("Poll is now {}", state),
            active,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminUserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
    pub total_votes: i64,
    pub polls_created: i64,
}

impl From<UserListRow> for AdminUserRow {
    fn from(row: UserListRow) -> Self {
        let stored = row.role.parse().unwrap_or(Role::User);
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            role: Role::effective(stored, row.is_superuser),
            is_active: row.is_active,
            date_joined: row.date_joined,
            last_login: row.last_login,
            total_votes: row.total_votes,
            polls_created: row.polls_created,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminUserDetail {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub is_active: bool,
    pub is_staff: bool,
    pub date_joined: DateTime<Utc>,
    pub last_login: Option<DateTime<Utc>>,
}

impl From<User> for AdminUserDetail {
    fn from(user: User) -> Self {
        Self {
            role: user.role(),
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            is_active: user.is_active,
            is_staff: user.is_staff,
            date_joined: user.date_joined,
            last_login: user.last_login,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct UserUpdateRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
    pub is_staff: Option<bool>,
}

impl UserUpdateRequest {
    pub fn validate(self) -> Result<UserChanges> {
        if let Some(username) = &self.username {
            check_text("username", username, MAX_NAME)?;
        }
        if let Some(email) = &self.email {
            check_email(email)?;
        }
        if let Some(first_name) = &self.first_name {
            check_len("first_name", first_name, MAX_NAME)?;
        }
        if let Some(last_name) = &self.last_name {
            check_len("last_name", last_name, MAX_NAME)?;
        }
        let role = match &self.role {
            Some(role) => Some(role.parse::<Role>()?),
            None => None,
        };
        Ok(UserChanges {
            username: self.username,
            email: self.email,
            first_name: self.first_name,
            last_name: self.last_name,
            role,
            is_active: self.is_active,
            is_staff: self.is_staff,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AdminPollRow {
    pub id: i64,
    pub title: String,
    pub category: String,
    pub active: bool,
    pub created_by_username: String,
    pub created_at: DateTime<Utc>,
    pub total_votes: i64,
    pub options_count: i64,
}

impl From<PollListRow> for AdminPollRow {
    fn from(row: PollListRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            category: row.category,
            active: row.active,
            created_by_username: row.created_by_username,
            created_at: row.created_at,
            total_votes: row.total_votes,
            options_count: row.options_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AdminOptionView {
    pub id: i64,
    pub option_text: String,
    pub votes_count: i64,
}

#[derive(Debug, Serialize)]
pub struct AdminPollDetail {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub category: String,
    pub active: bool,
    pub created_by: i64,
    pub created_by_username: String,
    pub created_at: DateTime<Utc>,
    pub winner: Option<i64>,
    pub winner_text: Option<String>,
    pub options: Vec<AdminOptionView>,
    pub total_votes: i64,
}

impl AdminPollDetail {
    pub fn new(poll: Poll, created_by_username: String, tallies: Vec<OptionTally>) -> Self {
        let winner_text = poll.winner_id.and_then(|winner| {
            tallies
                .iter()
                .find(|t| t.id == winner)
                .map(|t| t.option_text.clone())
        });
        let total_votes = tallies.iter().map(|t| t.votes_count).sum();

        Self {
            id: poll.id,
            title: poll.title,
            description: poll.description,
            category: poll.category,
            active: poll.active,
            created_by: poll.created_by,
            created_by_username,
            created_at: poll.created_at,
            winner: poll.winner_id,
            winner_text,
            options: tallies
                .into_iter()
                .map(|t| AdminOptionView {
                    id: t.id,
                    option_text: t.option_text,
                    votes_count: t.votes_count,
                })
                .collect(),
            total_votes,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct PollUpdateRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub active: Option<bool>,
    #[serde(default, deserialize_with = "double_option")]
    pub winner: Option<Option<i64>>,
    pub options: Option<Vec<String>>,
}

impl PollUpdateRequest {
    pub fn validate(self) -> Result<PollChanges> {
        if let Some(title) = &self.title {
            check_text("title", title, MAX_TEXT)?;
        }
        if let Some(category) = &self.category {
            check_len("category", category, MAX_CATEGORY)?;
        }
        if let Some(options) = &self.options {
            for text in options.iter() {
                check_text("options", text, MAX_TEXT)?;
            }
        }
        Ok(PollChanges {
            title: self.title,
            description: self.description,
            category: self.category,
            active: self.active,
            winner: self.winner,
            options: self.options,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AdminBannerRow {
    pub id: i64,
    pub title: String,
    pub poll: i64,
    pub poll_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poll_active: Option<bool>,
    pub image: String,
    pub created_at: DateTime<Utc>,
}

impl AdminBannerRow {
    /**
     * Listing rows carry the poll's active flag, the detail view does not
     */
    pub fn new(row: BannerRow, image: String, with_poll_active: bool) -> Self {
        Self {
            id: row.id,
            title: row.title,
            poll: row.poll_id,
            poll_title: row.poll_title,
            poll_active: if with_poll_active { Some(row.poll_active) } else { None },
            image,
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BannerUpdateRequest {
    pub title: Option<String>,
    pub poll: Option<i64>,
    pub image: Option<String>,
}

impl BannerUpdateRequest {
    pub fn validate(self) -> Result<BannerChanges> {
        if let Some(title) = &self.title {
            check_text("title", title, MAX_TEXT)?;
        }
        if let Some(image) = &self.image {
            check_image(image)?;
        }
        Ok(BannerChanges {
            poll_id: self.poll,
            title: self.title,
            image: self.image,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct AdminVoteRow {
    pub id: i64,
    pub poll: i64,
    pub poll_title: String,
    pub option: i64,
    pub option_text: String,
    pub voted_by: i64,
    pub voter_username: String,
    pub voted_at: DateTime<Utc>,
}

impl From<VoteRow> for AdminVoteRow {
    fn from(row: VoteRow) -> Self {
        Self {
            id: row.id,
            poll: row.poll_id,
            poll_title: row.poll_title,
            option: row.option_id,
            option_text: row.option_text,
            voted_by: row.voted_by,
            voter_username: row.voter_username,
            voted_at: row.voted_at,
        }
    }
}
