//! 新浪新闻 hot-news ranking scraper.
//!
//! The ranking page (`news.sina.com.cn/hotnews/`) renders its tables with
//! client-side script; `#Con11` holds the overall ranking.

use std::error::Error;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::api::AskAsync;
use crate::config::SiteConfig;
use crate::extraction::{LlmExtractionStrategy, scope_html};
use crate::fetcher::{FetchDirective, PageFetcher, WaitFor};
use crate::models::HotNewsRecord;
use crate::outputs::{json, markdown};

/// Extract the ranking entries with the LLM and save them.
#[instrument(level = "info", skip_all, fields(url = %config.sina.url))]
pub async fn hot_news<F, A>(
    fetcher: &F,
    asker: &A,
    config: &SiteConfig,
    output_dir: &Path,
) -> Result<Vec<HotNewsRecord>, Box<dyn Error>>
where
    F: PageFetcher,
    A: AskAsync<Response = String>,
{
    let sina = &config.sina;
    let directive = FetchDirective::new()
        .with_css_selector(sina.scope_selector.clone())
        .with_cache_mode(config.cache_mode)
        .with_page_timeout(config.page_timeout());

    let page = fetcher.fetch(&sina.url, &directive).await?;
    let scoped = scope_html(&page.html, &sina.scope_selector)?;
    if scoped.is_empty() {
        warn!(selector = %sina.scope_selector, "Ranking region not found on page");
    }

    let strategy = LlmExtractionStrategy::new(config.hot_news_llm.clone());
    let objects = strategy.extract(asker, &sina.url, &scoped).await?;

    let entries: Vec<HotNewsRecord> = objects
        .into_iter()
        .filter_map(|mut object| {
            object.remove("error");
            match serde_json::from_value::<HotNewsRecord>(Value::Object(object)) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "Skipping object that is not a hot-news record");
                    None
                }
            }
        })
        .collect();
    info!(count = entries.len(), "Extracted hot-news entries");

    json::persist(&output_dir.join(&sina.hot_news_file), &entries).await?;
    strategy.show_usage();
    Ok(entries)
}

/// Wait for the ranking table to render and save the page as Markdown.
///
/// With `scoped`, only the overall ranking region is converted.
#[instrument(level = "info", skip_all, fields(url = %config.sina.url, scoped))]
pub async fn hot_news_markdown<F: PageFetcher>(
    fetcher: &F,
    config: &SiteConfig,
    output_dir: &Path,
    scoped: bool,
) -> Result<PathBuf, Box<dyn Error>> {
    let sina = &config.sina;
    let mut directive = FetchDirective::new()
        .with_wait_for(WaitFor::parse(&sina.ready_selector))
        .with_cache_mode(config.cache_mode)
        .with_page_timeout(config.page_timeout());
    if scoped {
        directive = directive.with_css_selector(sina.scope_selector.clone());
    }

    let page = fetcher.fetch(&sina.url, &directive).await?;
    let html = match directive.css_selector() {
        Some(selector) => scope_html(&page.html, selector)?,
        None => page.html,
    };

    let text = markdown::page_to_markdown(&html);
    if text.is_empty() {
        return Err("page produced no Markdown content".into());
    }
    info!(bytes = text.len(), "Converted page to Markdown");

    let path = output_dir.join(&sina.markdown_file);
    markdown::write_markdown(&path, &text).await?;
    Ok(path)
}
