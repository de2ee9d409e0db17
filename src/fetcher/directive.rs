use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::extraction::CssExtractionStrategy;

/// Default upper bound on navigation plus waiting for one fetch.
const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(60);

/// Opaque handle that lets consecutive fetches share one browser tab.
///
/// Nothing outside the browser fetcher looks inside it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a fetch interacts with the response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Read from and write to the cache.
    Enabled,
    /// Never touch the cache.
    Disabled,
    /// Serve only from the cache; never fetch.
    ReadOnly,
    /// Always fetch, then store the result.
    WriteOnly,
    /// Always fetch and leave the cache alone.
    #[default]
    Bypass,
}

impl CacheMode {
    pub fn should_read(self) -> bool {
        matches!(self, CacheMode::Enabled | CacheMode::ReadOnly)
    }

    pub fn should_write(self) -> bool {
        matches!(self, CacheMode::Enabled | CacheMode::WriteOnly)
    }
}

/// Condition to wait for after the page loaded and any JS ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitFor {
    /// A CSS selector that must match at least one element.
    Css(String),
    /// A JS function expression returning a truthy value once ready,
    /// e.g. `() => document.querySelector('#more') === null`.
    Js(String),
}

impl WaitFor {
    /// Parse the `css:` / `js:` prefixed form. Unprefixed input is a selector.
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        if let Some(js) = spec.strip_prefix("js:") {
            WaitFor::Js(js.trim().to_string())
        } else if let Some(css) = spec.strip_prefix("css:") {
            WaitFor::Css(css.trim().to_string())
        } else {
            WaitFor::Css(spec.to_string())
        }
    }

    /// Expression that evaluates to a boolean in the page.
    pub fn to_predicate(&self) -> String {
        match self {
            WaitFor::Css(selector) => format!(
                "document.querySelector({}) !== null",
                serde_json::Value::String(selector.clone())
            ),
            WaitFor::Js(function) => format!("Boolean(({})())", function),
        }
    }
}

/// What a fetcher should do for one call.
///
/// Built once with the `with_*` methods and then only read; fetchers take it
/// by reference.
#[derive(Debug, Clone)]
pub struct FetchDirective {
    extraction: Option<CssExtractionStrategy>,
    css_selector: Option<String>,
    js_code: Option<String>,
    wait_for: Option<WaitFor>,
    session_id: Option<SessionId>,
    cache_mode: CacheMode,
    delay_before_return: Duration,
    page_timeout: Duration,
}

impl Default for FetchDirective {
    fn default() -> Self {
        Self {
            extraction: None,
            css_selector: None,
            js_code: None,
            wait_for: None,
            session_id: None,
            cache_mode: CacheMode::default(),
            delay_before_return: Duration::ZERO,
            page_timeout: DEFAULT_PAGE_TIMEOUT,
        }
    }
}

impl FetchDirective {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_extraction(mut self, extraction: CssExtractionStrategy) -> Self {
        self.extraction = Some(extraction);
        self
    }

    pub fn with_css_selector(mut self, selector: impl Into<String>) -> Self {
        self.css_selector = Some(selector.into());
        self
    }

    pub fn with_js_code(mut self, js: impl Into<String>) -> Self {
        self.js_code = Some(js.into());
        self
    }

    pub fn with_wait_for(mut self, wait_for: WaitFor) -> Self {
        self.wait_for = Some(wait_for);
        self
    }

    pub fn with_session(mut self, session: SessionId) -> Self {
        self.session_id = Some(session);
        self
    }

    pub fn with_cache_mode(mut self, mode: CacheMode) -> Self {
        self.cache_mode = mode;
        self
    }

    pub fn with_delay_before_return(mut self, delay: Duration) -> Self {
        self.delay_before_return = delay;
        self
    }

    pub fn with_page_timeout(mut self, timeout: Duration) -> Self {
        self.page_timeout = timeout;
        self
    }

    pub fn extraction(&self) -> Option<&CssExtractionStrategy> {
        self.extraction.as_ref()
    }

    pub fn css_selector(&self) -> Option<&str> {
        self.css_selector.as_deref()
    }

    pub fn js_code(&self) -> Option<&str> {
        self.js_code.as_deref()
    }

    pub fn wait_for(&self) -> Option<&WaitFor> {
        self.wait_for.as_ref()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.cache_mode
    }

    pub fn delay_before_return(&self) -> Duration {
        self.delay_before_return
    }

    pub fn page_timeout(&self) -> Duration {
        self.page_timeout
    }
}
