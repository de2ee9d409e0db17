//! On-disk response cache that honours a directive's [`CacheMode`].
//!
//! Pages are stored as one JSON file per URL, named by the SHA-256 of the
//! URL, so a later run (of this or another recipe) can reuse them.
//!
//! Session fetches are never cached: their content depends on what earlier
//! calls did to the tab, not just on the URL.

use std::io::ErrorKind;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, warn};

use super::{CacheMode, FetchDirective, FetchError, FetchedPage, PageFetcher, SessionId};

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    /// The URL that was requested, which may differ from `page.url`.
    url: String,
    page: FetchedPage,
}

/// Decorator that adds a URL-keyed page cache to any [`PageFetcher`].
#[derive(Debug)]
pub struct CachedFetcher<F> {
    inner: F,
    dir: PathBuf,
}

impl<F> CachedFetcher<F> {
    pub fn new(inner: F, dir: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            dir: dir.into(),
        }
    }

    pub fn inner(&self) -> &F {
        &self.inner
    }

    fn entry_path(&self, url: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(url.as_bytes());
        self.dir.join(format!("{}.json", hex::encode(hasher.finalize())))
    }

    /// Unreadable or corrupt entries count as misses.
    async fn lookup(&self, url: &str) -> Option<FetchedPage> {
        let path = self.entry_path(url);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read cache entry");
                return None;
            }
        };
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) if entry.url == url => Some(entry.page),
            Ok(entry) => {
                warn!(%url, cached = %entry.url, "Cache entry belongs to another URL");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring corrupt cache entry");
                None
            }
        }
    }

    /// A failed write is logged and otherwise ignored; the page is still
    /// returned to the caller.
    async fn store(&self, url: &str, page: &FetchedPage) {
        let path = self.entry_path(url);
        let entry = CacheEntry {
            url: url.to_string(),
            page: page.clone(),
        };
        let result = async {
            let bytes = serde_json::to_vec(&entry).map_err(std::io::Error::other)?;
            fs::create_dir_all(&self.dir).await?;
            let tmp = path.with_extension("json.tmp");
            fs::write(&tmp, bytes).await?;
            fs::rename(&tmp, &path).await
        }
        .await;
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "Failed to write cache entry");
        }
    }
}

impl<F: PageFetcher> PageFetcher for CachedFetcher<F> {
    async fn fetch(
        &self,
        url: &str,
        directive: &FetchDirective,
    ) -> Result<FetchedPage, FetchError> {
        let mode = if directive.session_id().is_some() {
            CacheMode::Bypass
        } else {
            directive.cache_mode()
        };

        if mode.should_read() {
            if let Some(page) = self.lookup(url).await {
                debug!(%url, "Cache hit");
                return Ok(page);
            }
            if mode == CacheMode::ReadOnly {
                return Err(FetchError::CacheMiss {
                    url: url.to_string(),
                });
            }
        }

        let page = self.inner.fetch(url, directive).await?;
        if mode.should_write() {
            self.store(url, &page).await;
        }
        Ok(page)
    }

    async fn close_session(&self, session: &SessionId) {
        self.inner.close_session(session).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetcher::testing::ScriptedFetcher;

    fn page(html: &str) -> Result<FetchedPage, FetchError> {
        Ok(FetchedPage::new("https://x.org", html))
    }

    #[tokio::test]
    async fn test_enabled_mode_serves_second_call_from_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(
            ScriptedFetcher::new(vec![page("one"), page("two")]),
            tmp.path(),
        );
        let directive = FetchDirective::new().with_cache_mode(CacheMode::Enabled);

        let first = cached.fetch("https://x.org", &directive).await.unwrap();
        let second = cached.fetch("https://x.org", &directive).await.unwrap();
        assert_eq!(first.html, "one");
        assert_eq!(second.html, "one");
        assert_eq!(cached.inner().call_count(), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_into_a_new_fetcher() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("cache");

        let first_run = CachedFetcher::new(ScriptedFetcher::new(vec![page("one")]), &dir);
        let write = FetchDirective::new().with_cache_mode(CacheMode::WriteOnly);
        first_run.fetch("https://x.org", &write).await.unwrap();
        drop(first_run);

        let second_run = CachedFetcher::new(ScriptedFetcher::new(vec![page("two")]), &dir);
        let enabled = FetchDirective::new().with_cache_mode(CacheMode::Enabled);
        let hit = second_run.fetch("https://x.org", &enabled).await.unwrap();
        assert_eq!(hit.html, "one");
        assert_eq!(second_run.inner().call_count(), 0);

        let read = FetchDirective::new().with_cache_mode(CacheMode::ReadOnly);
        let hit = second_run.fetch("https://x.org", &read).await.unwrap();
        assert_eq!(hit.html, "one");
    }

    #[tokio::test]
    async fn test_bypass_always_fetches() {
        let tmp = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(
            ScriptedFetcher::new(vec![page("one"), page("two")]),
            tmp.path(),
        );
        let warm = FetchDirective::new().with_cache_mode(CacheMode::Enabled);
        cached.fetch("https://x.org", &warm).await.unwrap();

        let bypass = FetchDirective::new().with_cache_mode(CacheMode::Bypass);
        let fresh = cached.fetch("https://x.org", &bypass).await.unwrap();
        assert_eq!(fresh.html, "two");
        assert_eq!(cached.inner().call_count(), 2);
    }

    #[tokio::test]
    async fn test_read_only_miss_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(ScriptedFetcher::new(vec![page("one")]), tmp.path());
        let directive = FetchDirective::new().with_cache_mode(CacheMode::ReadOnly);
        let err = cached.fetch("https://x.org", &directive).await.unwrap_err();
        assert!(matches!(err, FetchError::CacheMiss { .. }));
        assert_eq!(cached.inner().call_count(), 0);
    }

    #[tokio::test]
    async fn test_disabled_mode_leaves_no_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("cache");
        let cached = CachedFetcher::new(ScriptedFetcher::new(vec![page("one")]), &dir);
        let directive = FetchDirective::new().with_cache_mode(CacheMode::Disabled);
        cached.fetch("https://x.org", &directive).await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_refetched_and_replaced() {
        let tmp = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(ScriptedFetcher::new(vec![page("fresh")]), tmp.path());
        std::fs::write(cached.entry_path("https://x.org"), b"{not json").unwrap();

        let directive = FetchDirective::new().with_cache_mode(CacheMode::Enabled);
        let got = cached.fetch("https://x.org", &directive).await.unwrap();
        assert_eq!(got.html, "fresh");
        assert_eq!(cached.lookup("https://x.org").await.unwrap().html, "fresh");
    }

    #[tokio::test]
    async fn test_session_fetches_skip_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cached = CachedFetcher::new(
            ScriptedFetcher::new(vec![page("one"), page("two")]),
            tmp.path(),
        );
        let directive = FetchDirective::new()
            .with_cache_mode(CacheMode::Enabled)
            .with_session(SessionId::new("s"));
        cached.fetch("https://x.org", &directive).await.unwrap();
        let second = cached.fetch("https://x.org", &directive).await.unwrap();
        assert_eq!(second.html, "two");
        assert!(cached.lookup("https://x.org").await.is_none());

        cached.close_session(&SessionId::new("s")).await;
        assert_eq!(cached.inner().closed_sessions.lock().unwrap().len(), 1);
    }
}
