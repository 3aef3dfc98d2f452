use serde::Serialize;
use tide::http::Url;

use crate::error::{Error, Result};

pub const DEFAULT_PAGE_SIZE: i64 = 10;
pub const MAX_PAGE_SIZE: i64 = 100;

/**
 * Which slice of a listing the caller asked for, built from the `page` and
 * `page_size` query parameters
 */
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub page: i64,
    pub page_size: i64,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

impl PageRequest {
    /**
     * An unusable `page` is an error, an unusable `page_size` just falls
     * back to the default
     */
    pub fn from_params(page: Option<&str>, page_size: Option<&str>) -> Result<Self> {
        let page = match page.filter(|p| !p.is_empty()) {
            None => 1,
            Some(raw) => raw
                .parse::<i64>()
                .ok()
                .filter(|p| *p >= 1)
                .ok_or_else(invalid_page)?,
        };

        let page_size = page_size
            .and_then(|raw| raw.parse::<i64>().ok())
            .filter(|size| *size >= 1)
            .map(|size| size.min(MAX_PAGE_SIZE))
            .unwrap_or(DEFAULT_PAGE_SIZE);

        Ok(Self { page, page_size })
    }

    pub fn limit(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1) * self.page_size
    }

    pub fn page_count(&self, count: i64) -> i64 {
        if count <= 0 {
            1
        } else {
            (count + self.page_size - 1) / self.page_size
        }
    }

    /**
     * Asking for a page past the end is a 404, except the first page which
     * always exists even when empty
     */
    pub fn check(&self, count: i64) -> Result<()> {
        if self.page > self.page_count(count) {
            Err(invalid_page())
        } else {
            Ok(())
        }
    }
}

fn invalid_page() -> Error {
    Error::NotFound("Invalid page.".to_string())
}

/**
 * The paginated envelope every admin listing responds with
 */
#[derive(Debug, Serialize)]
pub struct Page<T: Serialize> {
    pub count: i64,
    pub next: Option<String>,
    pub previous: Option<String>,
    pub results: Vec<T>,
}

impl<T: Serialize> Page<T> {
    pub fn new(results: Vec<T>, count: i64, request: &PageRequest, url: &Url) -> Self {
        let next = if request.page < request.page_count(count) {
            Some(page_url(url, Some(request.page + 1)))
        } else {
            None
        };

        let previous = match request.page {
            1 => None,
            2 => Some(page_url(url, None)),
            n => Some(page_url(url, Some(n - 1))),
        };

        Self {
            count,
            next,
            previous,
            results,
        }
    }
}

/**
 * Rewrite the `page` parameter of the current URL, keeping every other parameter
 */
fn page_url(url: &Url, page: Option<i64>) -> String {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != "page")
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    let mut url = url.clone();
    url.set_query(None);

    if !kept.is_empty() || page.is_some() {
        let mut pairs = url.query_pairs_mut();
        pairs.extend_pairs(kept.iter());
        if let Some(page) = page {
            pairs.append_pair("page", &page.to_string());
        }
    }
    url.to_string()
}
