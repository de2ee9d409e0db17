//! Headless Chrome fetcher built on `chromiumoxide`.
//!
//! The browser is launched lazily on the first fetch and shared by every call.
//! Calls without a session get a throwaway tab; calls with a [`SessionId`]
//! reuse one tab per id, so cookies, scroll position and DOM changes made by
//! earlier scripts survive into the next call.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, instrument, warn};

use super::{FetchDirective, FetchError, FetchedPage, PageFetcher, SessionId, WaitFor};

/// How often a wait condition is re-evaluated.
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Launch options for the shared browser.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub headless: bool,
    pub user_agent: Option<String>,
    pub chrome_executable: Option<PathBuf>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            user_agent: None,
            chrome_executable: None,
        }
    }
}

struct RunningBrowser {
    browser: Browser,
    handler_task: JoinHandle<()>,
}

/// [`PageFetcher`] backed by a headless Chrome instance.
pub struct BrowserFetcher {
    settings: BrowserSettings,
    running: Mutex<Option<RunningBrowser>>,
    sessions: Mutex<HashMap<SessionId, Page>>,
}

impl std::fmt::Debug for BrowserFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrowserFetcher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl BrowserFetcher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self {
            settings,
            running: Mutex::new(None),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Open a blank tab, launching the browser first if needed.
    async fn open_tab(&self) -> Result<Page, FetchError> {
        let mut guard = self.running.lock().await;
        if guard.is_none() {
            *guard = Some(self.launch().await?);
        }
        let running = guard
            .as_ref()
            .ok_or_else(|| FetchError::Browser("browser not running after launch".to_string()))?;
        running
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FetchError::Browser(format!("failed to open tab: {e}")))
    }

    #[instrument(level = "info", skip_all, fields(headless = self.settings.headless))]
    async fn launch(&self) -> Result<RunningBrowser, FetchError> {
        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-setuid-sandbox")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu");
        if !self.settings.headless {
            builder = builder.with_head();
        }
        if let Some(ref ua) = self.settings.user_agent {
            builder = builder.arg(format!("--user-agent={ua}"));
        }
        if let Some(ref exe) = self.settings.chrome_executable {
            builder = builder.chrome_executable(exe);
        }
        let config = builder
            .build()
            .map_err(|e| FetchError::Browser(format!("browser config error: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| FetchError::Browser(format!("browser launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        info!("Launched browser");
        Ok(RunningBrowser {
            browser,
            handler_task,
        })
    }

    /// Tab for `session`, created on first use.
    async fn session_tab(&self, session: &SessionId) -> Result<Page, FetchError> {
        if let Some(page) = self.sessions.lock().await.get(session) {
            return Ok(page.clone());
        }
        let page = self.open_tab().await?;
        debug!(%session, "Opened session tab");
        self.sessions
            .lock()
            .await
            .insert(session.clone(), page.clone());
        Ok(page)
    }

    async fn render(
        &self,
        page: &Page,
        url: &str,
        directive: &FetchDirective,
    ) -> Result<FetchedPage, FetchError> {
        let deadline = directive.page_timeout();

        let current = page.url().await.ok().flatten();
        if current.as_deref() == Some(url) && directive.session_id().is_some() {
            debug!(%url, "Session tab already on URL; skipping navigation");
        } else {
            navigate(page, url, deadline).await?;
        }

        if let Some(js) = directive.js_code() {
            debug!(%url, bytes = js.len(), "Running page script");
            timeout(deadline, page.evaluate(js.to_string()))
                .await
                .map_err(|_| FetchError::Timeout {
                    url: url.to_string(),
                    after: deadline,
                })?
                .map_err(|e| FetchError::Script {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
        }

        if let Some(wait_for) = directive.wait_for() {
            wait_until(page, url, wait_for, deadline).await?;
        }

        if !directive.delay_before_return().is_zero() {
            sleep(directive.delay_before_return()).await;
        }

        let html = page.content().await.map_err(|e| FetchError::Browser(format!(
            "failed to read content of {url}: {e}"
        )))?;
        let final_url = page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        info!(%url, bytes = html.len(), "Rendered page");
        Ok(FetchedPage {
            url: final_url,
            status: None,
            html,
        })
    }

    /// Close every session tab and the browser itself.
    #[instrument(level = "info", skip_all)]
    pub async fn shutdown(&self) {
        let tabs: Vec<(SessionId, Page)> = self.sessions.lock().await.drain().collect();
        for (session, page) in tabs {
            if let Err(e) = page.close().await {
                debug!(%session, error = %e, "Session tab close error");
            }
        }

        if let Some(mut running) = self.running.lock().await.take() {
            if let Err(e) = running.browser.close().await {
                warn!(error = %e, "Browser close error");
            }
            let _ = running.browser.wait().await;
            running.handler_task.abort();
            info!("Browser shut down");
        }
    }
}

impl PageFetcher for BrowserFetcher {
    #[instrument(level = "info", skip_all, fields(%url, session = ?directive.session_id()))]
    async fn fetch(
        &self,
        url: &str,
        directive: &FetchDirective,
    ) -> Result<FetchedPage, FetchError> {
        match directive.session_id() {
            Some(session) => {
                let page = self.session_tab(session).await?;
                self.render(&page, url, directive).await
            }
            None => {
                let page = self.open_tab().await?;
                let result = self.render(&page, url, directive).await;
                if let Err(e) = page.close().await {
                    debug!(%url, error = %e, "Tab close error");
                }
                result
            }
        }
    }

    async fn close_session(&self, session: &SessionId) {
        let page = self.sessions.lock().await.remove(session);
        if let Some(page) = page {
            match page.close().await {
                Ok(()) => debug!(%session, "Closed session tab"),
                Err(e) => debug!(%session, error = %e, "Session tab close error"),
            }
        }
    }
}

async fn navigate(page: &Page, url: &str, deadline: Duration) -> Result<(), FetchError> {
    timeout(deadline, page.goto(url))
        .await
        .map_err(|_| FetchError::Timeout {
            url: url.to_string(),
            after: deadline,
        })?
        .map_err(|e| FetchError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    // Best effort; goto already waited for the load event in most cases.
    let _ = timeout(Duration::from_secs(10), page.wait_for_navigation()).await;
    Ok(())
}

async fn wait_until(
    page: &Page,
    url: &str,
    wait_for: &WaitFor,
    deadline: Duration,
) -> Result<(), FetchError> {
    let predicate = wait_for.to_predicate();
    let started = Instant::now();
    loop {
        let ready = match page.evaluate(predicate.clone()).await {
            Ok(result) => result.into_value::<bool>().unwrap_or(false),
            Err(e) => {
                debug!(%url, error = %e, "Wait predicate failed; retrying");
                false
            }
        };
        if ready {
            debug!(%url, waited_ms = started.elapsed().as_millis() as u64, "Wait condition met");
            return Ok(());
        }
        if started.elapsed() >= deadline {
            warn!(%url, ?wait_for, "Wait condition never became true");
            return Err(FetchError::Timeout {
                url: url.to_string(),
                after: deadline,
            });
        }
        sleep(WAIT_POLL_INTERVAL).await;
    }
}
