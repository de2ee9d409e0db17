//! Plain HTTP fetcher for static article pages.
//!
//! Article pages on piyao render server-side, so the batch recipes can skip
//! the browser and get real status codes for the rate limiter in exchange.
//! Scripts, wait conditions and sessions in the directive are ignored.

use std::time::Duration;

use reqwest::Client;
use tracing::{debug, instrument};

use super::{FetchDirective, FetchError, FetchedPage, PageFetcher};

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: Option<&str>, request_timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .timeout(request_timeout)
            .build()
            .map_err(|e| FetchError::Request {
                url: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { client })
    }
}

impl PageFetcher for HttpFetcher {
    #[instrument(level = "info", skip_all, fields(%url))]
    async fn fetch(
        &self,
        url: &str,
        directive: &FetchDirective,
    ) -> Result<FetchedPage, FetchError> {
        if directive.js_code().is_some() || directive.wait_for().is_some() {
            debug!("HTTP fetcher ignores page scripts and wait conditions");
        }

        let response = self
            .client
            .get(url)
            .timeout(directive.page_timeout())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout {
                        url: url.to_string(),
                        after: directive.page_timeout(),
                    }
                } else {
                    FetchError::Request {
                        url: url.to_string(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let final_url = response.url().to_string();
        let html = response.text().await.map_err(|e| FetchError::Request {
            url: url.to_string(),
            reason: format!("failed to read body: {e}"),
        })?;
        debug!(bytes = html.len(), "Fetched page");

        Ok(FetchedPage {
            url: final_url,
            status: Some(status.as_u16()),
            html,
        })
    }
}
