//! Page fetching behind a small trait so recipes and the collector do not care
//! whether a page came from headless Chrome or a plain HTTP GET.
//!
//! | Fetcher | Module | JS / sessions | HTTP status |
//! |---------|--------|---------------|-------------|
//! | [`BrowserFetcher`](browser::BrowserFetcher) | [`browser`] | yes | no |
//! | [`HttpFetcher`](http::HttpFetcher) | [`http`] | no | yes |
//! | [`CachedFetcher`](cache::CachedFetcher) | [`cache`] (on disk) | wraps either | wraps either |

pub mod browser;
pub mod cache;
pub mod http;

mod directive;

pub use directive::{CacheMode, FetchDirective, SessionId, WaitFor};

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// The rendered page handed back by a fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    /// URL the page ended up on (after redirects, when known).
    pub url: String,
    /// HTTP status, if the fetcher can observe it.
    pub status: Option<u16>,
    /// Full document HTML after any JS in the directive ran.
    pub html: String,
}

impl FetchedPage {
    pub fn new(url: impl Into<String>, html: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status: None,
            html: html.into(),
        }
    }
}

/// Everything that can go wrong while fetching one page.
///
/// Variants carry rendered messages rather than source errors so results can
/// be cloned into caches and dispatch reports.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("failed to launch or talk to the browser: {0}")]
    Browser(String),
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },
    #[error("{url} answered with HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },
    #[error("script failed on {url}: {reason}")]
    Script { url: String, reason: String },
    #[error("timed out after {after:?} on {url}")]
    Timeout { url: String, after: Duration },
    #[error("{url} is not in the cache and the cache mode forbids fetching it")]
    CacheMiss { url: String },
}

impl FetchError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            FetchError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Something that can turn a URL plus a [`FetchDirective`] into a page.
///
/// Implementations that support sessions keep per-[`SessionId`] state (a
/// browser tab) alive between calls until [`close_session`] is called.
///
/// [`close_session`]: PageFetcher::close_session
pub trait PageFetcher {
    async fn fetch(&self, url: &str, directive: &FetchDirective)
    -> Result<FetchedPage, FetchError>;

    /// Release whatever state is kept for `session`. No-op by default.
    async fn close_session(&self, _session: &SessionId) {}
}

impl<T: PageFetcher> PageFetcher for &T {
    async fn fetch(
        &self,
        url: &str,
        directive: &FetchDirective,
    ) -> Result<FetchedPage, FetchError> {
        (**self).fetch(url, directive).await
    }

    async fn close_session(&self, session: &SessionId) {
        (**self).close_session(session).await
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_accessor() {
        let err = FetchError::Status {
            url: "https://x.org".to_string(),
            status: 429,
        };
        assert_eq!(err.status(), Some(429));
        assert_eq!(
            FetchError::CacheMiss {
                url: "https://x.org".to_string()
            }
            .status(),
            None
        );
    }

    #[test]
    fn test_error_display_mentions_url() {
        let err = FetchError::Navigation {
            url: "https://www.piyao.org.cn".to_string(),
            reason: "net::ERR_NAME_NOT_RESOLVED".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("www.piyao.org.cn"));
        assert!(msg.contains("ERR_NAME_NOT_RESOLVED"));
    }
}
