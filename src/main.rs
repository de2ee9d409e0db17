//! # rumor_crawler
//!
//! Scraping recipes for Chinese rumor-debunking and hot-news sites. Pages are
//! rendered in headless Chrome (or fetched over plain HTTP), turned into
//! records with CSS selectors or an OpenAI-compatible LLM, and saved as JSON
//! or Markdown.
//!
//! ## Features
//!
//! - Incremental collection of a "load more" listing with link de-duplication
//!   and a bounded, cancellable poll loop
//! - Configurable link normalization for site-relative and mangled hrefs
//! - Concurrent batch fetching with a per-domain rate limiter
//! - Chunked LLM extraction with retry, truncation re-ask and usage totals
//!
//! ## Usage
//!
//! ```sh
//! rumor_crawler -o ./data loop-links
//! rumor_crawler -o ./data fake-news
//! rumor_crawler -o ./data hot-news
//! ```
//!
//! ## Architecture
//!
//! 1. **Fetching**: a [`fetcher::PageFetcher`] renders pages per [`fetcher::FetchDirective`]
//! 2. **Collecting**: [`collector::IncrementalCollector`] polls one session tab until the listing settles
//! 3. **Extracting**: CSS schemas for listings, the LLM for article and ranking content
//! 4. **Output**: JSON arrays and Markdown files under the output directory

use clap::Parser;
use std::error::Error;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod api;
mod cli;
mod collector;
mod config;
mod dispatch;
mod extraction;
mod fetcher;
mod models;
mod normalize;
mod outputs;
mod scrapers;
mod utils;

use api::LlmClient;
use cli::{Cli, Command};
use collector::TerminationReason;
use config::SiteConfig;
use fetcher::browser::BrowserFetcher;
use fetcher::cache::CachedFetcher;
use fetcher::http::HttpFetcher;
use scrapers::{piyao, sina};
use utils::ensure_writable_dir;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = Instant::now();
    info!("rumor_crawler starting up");
    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) => debug!(error = %e, "No .env loaded"),
    }

    let args = Cli::parse();
    debug!(command = ?args.command, output_dir = %args.output_dir.display(), "Parsed CLI arguments");

    // Early check: ensure output dir is writable
    if let Err(e) = ensure_writable_dir(&args.output_dir).await {
        error!(
            path = %args.output_dir.display(),
            error = %e,
            "Output directory is not writable (fix perms or choose a different path)"
        );
        return Err(e);
    }

    let mut site = config::load_site_config(args.site_config.as_deref())?;
    apply_overrides(&mut site, &args);

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing the current step");
            on_signal.cancel();
        }
    });

    let cache_dir = args.output_dir.join(&site.cache_dir);
    let browser = CachedFetcher::new(BrowserFetcher::new(site.browser.clone()), &cache_dir);
    let result = run(&args, &site, &browser, cancel).await;
    browser.inner().shutdown().await;

    let elapsed = start_time.elapsed();
    match &result {
        Ok(()) => info!(?elapsed, secs = elapsed.as_secs(), "Execution complete"),
        Err(e) => error!(?elapsed, error = %e, "Execution failed"),
    }
    result
}

/// Fold CLI flags into the loaded site config.
fn apply_overrides(site: &mut SiteConfig, args: &Cli) {
    if args.headful {
        site.browser.headless = false;
    }
    match args.command {
        Command::Links {
            max_clicks: Some(n),
        } => site.piyao.max_clicks = n,
        Command::LoopLinks {
            max_iterations: Some(n),
        } => site.piyao.max_iterations = n,
        _ => {}
    }
}

async fn run(
    args: &Cli,
    site: &SiteConfig,
    browser: &CachedFetcher<BrowserFetcher>,
    cancel: CancellationToken,
) -> Result<(), Box<dyn Error>> {
    let output_dir = args.output_dir.as_path();

    match &args.command {
        Command::Links { .. } => {
            let records = piyao::links(browser, site, output_dir).await?;
            info!(count = records.len(), "links finished");
        }
        Command::LoopLinks { .. } => {
            let outcome = piyao::loop_links(browser, site, output_dir, cancel).await?;
            if let TerminationReason::InitialFetchFailed(e) = outcome.reason {
                return Err(e.into());
            }
            if outcome.reason.is_failure() {
                warn!(
                    reason = %outcome.reason,
                    saved = outcome.items.len(),
                    "loop-links stopped early; partial results saved"
                );
            } else {
                info!(reason = %outcome.reason, saved = outcome.items.len(), "loop-links finished");
            }
        }
        Command::FakeNews { browser: use_browser } => {
            let llm = load_llm(args, &site.fake_news_llm.template).await?;
            let asker = llm.asker();
            let rumors = if *use_browser {
                piyao::fake_news(browser, &asker, site, output_dir, cancel).await?
            } else {
                let http = CachedFetcher::new(
                    HttpFetcher::new(site.browser.user_agent.as_deref(), site.page_timeout())?,
                    args.output_dir.join(&site.cache_dir),
                );
                piyao::fake_news(&http, &asker, site, output_dir, cancel).await?
            };
            info!(count = rumors.len(), "fake-news finished");
        }
        Command::HotNews => {
            let llm = load_llm(args, &site.hot_news_llm.template).await?;
            let entries = sina::hot_news(browser, &llm.asker(), site, output_dir).await?;
            info!(count = entries.len(), "hot-news finished");
        }
        Command::HotNewsMarkdown { full_page } => {
            let path = sina::hot_news_markdown(browser, site, output_dir, !*full_page).await?;
            info!(path = %path.display(), "hot-news-markdown finished");
        }
    }
    Ok(())
}

async fn load_llm(args: &Cli, template: &str) -> Result<LlmClient, Box<dyn Error>> {
    if args.api_key.is_none() {
        warn!("OPENAI_API_KEY is not set; using the key from the LLM config file");
    }
    LlmClient::load(
        args.llm_config.as_deref(),
        template,
        args.api_key.as_deref(),
        args.api_base.as_deref(),
    )
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_to_matching_recipe() {
        let mut site = SiteConfig::default();
        let args = Cli::parse_from(["rumor_crawler", "--headful", "loop-links", "--max-iterations", "3"]);
        apply_overrides(&mut site, &args);
        assert!(!site.browser.headless);
        assert_eq!(site.piyao.max_iterations, 3);
        assert_eq!(site.piyao.max_clicks, 1);

        let mut site = SiteConfig::default();
        let args = Cli::parse_from(["rumor_crawler", "links", "--max-clicks", "4"]);
        apply_overrides(&mut site, &args);
        assert!(site.browser.headless);
        assert_eq!(site.piyao.max_clicks, 4);
        assert_eq!(site.piyao.max_iterations, 50);
    }
}
