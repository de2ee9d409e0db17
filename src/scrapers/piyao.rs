//! 中国互联网联合辟谣平台 (www.piyao.org.cn) scraper.
//!
//! The "今日辟谣" listing is a `<ul id="list">` that grows when the `#more`
//! button is clicked. Each entry links to an article page that debunks one or
//! more rumors.
//!
//! # Recipes
//!
//! - [`links`]: one fetch that clicks "load more" a fixed number of times
//! - [`loop_links`]: keeps clicking in one tab until the listing stops growing
//! - [`fake_news`]: reads the saved links and has the LLM pull rumors out of
//!   every article

use std::error::Error;
use std::path::Path;

use futures::stream::{self, StreamExt};
use itertools::Itertools;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::api::AskAsync;
use crate::collector::{CollectOutcome, CollectorConfig, IncrementalCollector, TerminationReason};
use crate::config::SiteConfig;
use crate::dispatch::Dispatcher;
use crate::extraction::{
    CssExtractionStrategy, CssSchema, ExtractionError, FieldKind, FieldSpec, LlmExtractionStrategy,
};
use crate::fetcher::{FetchDirective, PageFetcher, SessionId, WaitFor};
use crate::models::{Record, RumorRecord};
use crate::outputs::json;

/// Articles sent to the LLM at once.
const LLM_PARALLELISM: usize = 12;

const CLICK_MORE_JS: &str = r#"(async (maxClicks, waitMs) => {
    localStorage.removeItem('click_count');
    localStorage.removeItem('click_done');
    let moreButton = document.querySelector('#more');
    let lastHeight = document.body.scrollHeight;
    let clickCount = 0;
    while (moreButton && clickCount < maxClicks) {
        window.scrollTo(0, document.body.scrollHeight);
        moreButton.click();
        await new Promise(resolve => setTimeout(resolve, waitMs));
        clickCount++;
        localStorage.setItem('click_count', String(clickCount));
        const newHeight = document.body.scrollHeight;
        if (newHeight === lastHeight) {
            break;
        }
        lastHeight = newHeight;
        moreButton = document.querySelector('#more');
    }
    localStorage.setItem('click_done', '1');
    return clickCount;
})(__MAX_CLICKS__, __WAIT_MS__)"#;

/// `{date, link}` for every `<li>` of the listing.
pub fn listing_schema() -> CssSchema {
    CssSchema {
        name: "辟谣信息".to_string(),
        base_selector: "ul#list li".to_string(),
        fields: vec![
            FieldSpec {
                name: "date".to_string(),
                selector: "p.domPC".to_string(),
                kind: FieldKind::Text,
                attribute: None,
            },
            FieldSpec {
                name: "link".to_string(),
                selector: "h2 a".to_string(),
                kind: FieldKind::Attribute,
                attribute: Some("href".to_string()),
            },
        ],
    }
}

/// Script that scrolls down and clicks `#more` up to `max_clicks` times,
/// pausing `wait_ms` after each click and stopping early once the page
/// height no longer changes.
pub fn click_more_js(max_clicks: u32, wait_ms: u64) -> String {
    CLICK_MORE_JS
        .replace("__MAX_CLICKS__", &max_clicks.to_string())
        .replace("__WAIT_MS__", &wait_ms.to_string())
}

/// Ready once the click script recorded `min_clicks` clicks or gave up
/// because the button disappeared.
pub fn clicks_done(min_clicks: u32) -> WaitFor {
    WaitFor::Js(format!(
        "() => localStorage.getItem('click_done') === '1' || Number(localStorage.getItem('click_count') || 0) >= {min_clicks}"
    ))
}

fn listing_directive(config: &SiteConfig) -> Result<FetchDirective, ExtractionError> {
    Ok(FetchDirective::new()
        .with_extraction(CssExtractionStrategy::new(config.piyao.listing_schema.clone())?)
        .with_cache_mode(config.cache_mode)
        .with_page_timeout(config.page_timeout()))
}

/// Fetch the listing once, clicking "load more" `max_clicks` times first,
/// and save the normalized `{date, link}` entries.
#[instrument(level = "info", skip_all, fields(url = %config.piyao.listing_url))]
pub async fn links<F: PageFetcher>(
    fetcher: &F,
    config: &SiteConfig,
    output_dir: &Path,
) -> Result<Vec<Record>, Box<dyn Error>> {
    let piyao = &config.piyao;
    let directive = listing_directive(config)?
        .with_js_code(click_more_js(piyao.max_clicks, piyao.click_wait_ms))
        .with_wait_for(clicks_done(piyao.max_clicks));

    let page = fetcher.fetch(&piyao.listing_url, &directive).await?;
    let strategy = directive
        .extraction()
        .ok_or("listing directive has no extraction schema")?;
    let mut records = strategy
        .extract(&page.html)
        .iter()
        .map(Record::try_from)
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = records.len(), "Extracted listing entries");

    piyao.normalize.normalize_records(&mut records);
    for record in &records {
        debug!(date = %record.date, link = %record.link, "Listing entry");
    }

    json::persist(&output_dir.join(&piyao.links_file), &records).await?;
    Ok(records)
}

/// Keep clicking "load more" in one session tab until no new links show up,
/// then save everything collected, partial results included.
#[instrument(level = "info", skip_all, fields(url = %config.piyao.listing_url))]
pub async fn loop_links<F: PageFetcher>(
    fetcher: &F,
    config: &SiteConfig,
    output_dir: &Path,
    cancel: CancellationToken,
) -> Result<CollectOutcome, Box<dyn Error>> {
    let piyao = &config.piyao;
    let initial = listing_directive(config)?;
    let poll_script = click_more_js(piyao.poll_max_clicks, piyao.poll_click_wait_ms);
    let poll = |session: &SessionId| {
        initial
            .clone()
            .with_session(session.clone())
            .with_js_code(poll_script.clone())
            .with_delay_before_return(piyao.delay_before_return())
    };

    let collector = IncrementalCollector::new(
        fetcher,
        CollectorConfig {
            max_iterations: piyao.max_iterations,
            poll_delay: piyao.poll_delay(),
        },
        cancel,
    );
    let session = SessionId::new(piyao.session_id.clone());
    let mut outcome = collector
        .collect(&piyao.listing_url, &initial, poll, &session)
        .await;

    if let TerminationReason::InitialFetchFailed(e) = &outcome.reason {
        warn!(error = %e, "Nothing collected; leaving existing links file untouched");
        return Ok(outcome);
    }

    piyao.normalize.normalize_records(&mut outcome.items);
    json::persist(&output_dir.join(&piyao.links_file), &outcome.items).await?;
    info!(
        count = outcome.items.len(),
        polls = outcome.polls,
        reason = %outcome.reason,
        "Saved collected links"
    );
    Ok(outcome)
}

/// Turn the objects the model returned for one article into rumor records.
///
/// The `error` flag some replies carry is dropped and the listing date is
/// attached. Objects that do not fit the record shape are skipped.
fn rumors_from_objects(objects: Vec<Map<String, Value>>, date: &str) -> Vec<RumorRecord> {
    objects
        .into_iter()
        .filter_map(|mut object| {
            object.remove("error");
            object.insert("date".to_string(), Value::String(date.to_string()));
            match serde_json::from_value::<RumorRecord>(Value::Object(object)) {
                Ok(rumor) => Some(rumor),
                Err(e) => {
                    warn!(error = %e, "Skipping object that is not a rumor record");
                    None
                }
            }
        })
        .collect()
}

/// Fetch every saved article link and extract its rumors with the LLM.
///
/// Failed fetches and failed extractions are logged and skipped. Records are
/// de-duplicated by headline and saved, and LLM usage is logged at the end.
#[instrument(level = "info", skip_all)]
pub async fn fake_news<F, A>(
    fetcher: &F,
    asker: &A,
    config: &SiteConfig,
    output_dir: &Path,
    cancel: CancellationToken,
) -> Result<Vec<RumorRecord>, Box<dyn Error>>
where
    F: PageFetcher,
    A: AskAsync<Response = String>,
{
    let piyao = &config.piyao;
    let entries: Vec<Record> = json::load_records(&output_dir.join(&piyao.links_file)).await?;
    info!(count = entries.len(), "Loaded article links");

    let urls: Vec<String> = entries.iter().map(|e| e.link.clone()).collect();
    let directive = FetchDirective::new()
        .with_cache_mode(config.cache_mode)
        .with_page_timeout(config.page_timeout());
    let results = Dispatcher::new(fetcher, config.dispatcher.clone())
        .fetch_many(&urls, &directive)
        .await;

    let strategy = LlmExtractionStrategy::new(config.fake_news_llm.clone());
    let pages = results
        .into_iter()
        .zip(entries.iter())
        .filter_map(|(result, entry)| match result.result {
            Ok(page) => Some((result.url, page.html, entry.date.as_str())),
            Err(e) => {
                warn!(url = %result.url, error = %e, "Skipping article that failed to fetch");
                None
            }
        })
        .collect::<Vec<_>>();

    let per_article: Vec<Vec<RumorRecord>> = stream::iter(pages)
        .map(|(url, html, date)| {
            let strategy = &strategy;
            async move {
                match strategy.extract(asker, &url, &html).await {
                    Ok(objects) => {
                        let rumors = rumors_from_objects(objects, date);
                        info!(%url, count = rumors.len(), "Extracted rumors");
                        rumors
                    }
                    Err(e) => {
                        warn!(%url, error = %e, "LLM extraction failed; skipping article");
                        Vec::new()
                    }
                }
            }
        })
        .buffered(LLM_PARALLELISM)
        .take_until(cancel.cancelled())
        .collect()
        .await;

    if cancel.is_cancelled() {
        warn!(done = per_article.len(), "Cancelled; saving the articles processed so far");
    }

    let rumors: Vec<RumorRecord> = per_article
        .into_iter()
        .flatten()
        .unique_by(|r| r.headline.clone())
        .collect();

    json::persist(&output_dir.join(&piyao.fake_news_file), &rumors).await?;
    info!(count = rumors.len(), "Saved rumor records");
    strategy.show_usage();
    Ok(rumors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::ScriptedAsk;
    use crate::fetcher::FetchedPage;
    use crate::fetcher::testing::{ScriptedFetcher, listing_page};

    fn quick_config() -> SiteConfig {
        let mut config = SiteConfig::default();
        config.piyao.poll_delay_secs = 0.0;
        config.piyao.delay_before_return_secs = 0.0;
        config
    }

    #[test]
    fn test_click_script_is_parameterised() {
        let js = click_more_js(3, 1500);
        assert!(js.ends_with("})(3, 1500)"));
        assert!(!js.contains("__"));
    }

    #[test]
    fn test_clicks_done_predicate() {
        match clicks_done(2) {
            WaitFor::Js(f) => {
                assert!(f.contains(">= 2"));
                assert!(f.contains("click_done"));
            }
            other => panic!("unexpected wait condition {other:?}"),
        }
    }

    #[test]
    fn test_listing_schema_extracts_date_and_link() {
        let html = crate::fetcher::testing::listing_html(&[
            ("2024-05-06", "../20240506/c_1.htm"),
            ("2024-05-05", "<../20240505/c_2.htm>"),
        ]);
        let objects = CssExtractionStrategy::new(listing_schema())
            .unwrap()
            .extract(&html);
        let records: Vec<Record> = objects.iter().map(|o| Record::try_from(o).unwrap()).collect();
        assert_eq!(
            records,
            vec![
                Record::new("2024-05-06", "../20240506/c_1.htm"),
                Record::new("2024-05-05", "<../20240505/c_2.htm>"),
            ]
        );
    }

    #[tokio::test]
    async fn test_links_normalizes_and_persists() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![listing_page(&[
            ("2024-05-06", "../20240506/c_1.htm"),
            ("2024-05-05", "https://www.piyao.org.cn/20240505/c_2.htm"),
        ])]);

        let records = links(&fetcher, &quick_config(), tmp.path()).await.unwrap();

        assert_eq!(records[0].link, "https://www.piyao.org.cn/20240506/c_1.htm");
        assert_eq!(records[1].link, "https://www.piyao.org.cn/20240505/c_2.htm");
        let saved: Vec<Record> = json::load_records(&tmp.path().join("links.json")).await.unwrap();
        assert_eq!(saved, records);

        let calls = fetcher.calls.lock().unwrap();
        let directive = &calls[0].1;
        assert!(directive.js_code().unwrap().contains("})(1, 1000)"));
        assert!(matches!(directive.wait_for(), Some(WaitFor::Js(_))));
        assert!(directive.session_id().is_none());
    }

    #[tokio::test]
    async fn test_loop_links_saves_all_collected_links() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            listing_page(&[("2024-05-06", "../a.htm")]),
            listing_page(&[("2024-05-06", "../a.htm"), ("2024-05-05", "<../b.htm>")]),
            listing_page(&[("2024-05-06", "../a.htm"), ("2024-05-05", "<../b.htm>")]),
        ]);

        let outcome = loop_links(&fetcher, &quick_config(), tmp.path(), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.reason, TerminationReason::NoNewContent);
        let saved: Vec<Record> = json::load_records(&tmp.path().join("links.json")).await.unwrap();
        let links: Vec<&str> = saved.iter().map(|r| r.link.as_str()).collect();
        assert_eq!(
            links,
            vec!["https://www.piyao.org.cn/a.htm", "https://www.piyao.org.cn/b.htm"]
        );

        let calls = fetcher.calls.lock().unwrap();
        assert_eq!(calls[1].1.session_id(), Some(&SessionId::new("piyao_session")));
        assert!(calls[1].1.js_code().unwrap().contains("})(1, 3000)"));
    }

    #[tokio::test]
    async fn test_loop_links_keeps_old_file_when_nothing_fetched() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("links.json");
        json::persist(&path, &[Record::new("2024-01-01", "https://x.org/old")])
            .await
            .unwrap();
        let fetcher = ScriptedFetcher::new(vec![]);

        let outcome = loop_links(&fetcher, &quick_config(), tmp.path(), CancellationToken::new())
            .await
            .unwrap();

        assert!(matches!(outcome.reason, TerminationReason::InitialFetchFailed(_)));
        let saved: Vec<Record> = json::load_records(&path).await.unwrap();
        assert_eq!(saved.len(), 1);
    }

    #[test]
    fn test_rumors_drop_error_and_take_listing_date() {
        let objects = vec![
            serde_json::json!({"headline": "隔夜菜致癌", "field": "健康", "truth": "不会", "error": false, "date": "model guess"}),
            serde_json::json!("not an object"),
        ]
        .into_iter()
        .filter_map(|v| v.as_object().cloned())
        .collect();
        let rumors = rumors_from_objects(objects, "2024-05-06");
        assert_eq!(rumors.len(), 1);
        assert_eq!(rumors[0].headline, "隔夜菜致癌");
        assert_eq!(rumors[0].date, "2024-05-06");
        assert_eq!(rumors[0].measures, "");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_news_extracts_dedupes_and_skips_failures() {
        let tmp = tempfile::tempdir().unwrap();
        json::persist(
            &tmp.path().join("links.json"),
            &[
                Record::new("2024-05-06", "https://www.piyao.org.cn/a.htm"),
                Record::new("2024-05-05", "https://www.piyao.org.cn/b.htm"),
                Record::new("2024-05-04", "https://www.piyao.org.cn/c.htm"),
            ],
        )
        .await
        .unwrap();

        let fetcher = ScriptedFetcher::new(vec![
            Ok(FetchedPage::new("https://www.piyao.org.cn/a.htm", "<p>文章一</p>")),
            Err(crate::fetcher::FetchError::Status {
                url: "https://www.piyao.org.cn/b.htm".to_string(),
                status: 404,
            }),
            Ok(FetchedPage::new("https://www.piyao.org.cn/c.htm", "<p>文章三</p>")),
        ]);
        let asker = ScriptedAsk::new(vec![
            Ok(r#"[{"headline": "谣言甲", "field": "健康", "error": false}, {"headline": "谣言乙"}]"#),
            Ok(r#"```json
[{"headline": "谣言甲", "field": "食品"}]
```"#),
        ]);

        let rumors = fake_news(
            &fetcher,
            &asker,
            &quick_config(),
            tmp.path(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let headlines: Vec<&str> = rumors.iter().map(|r| r.headline.as_str()).collect();
        assert_eq!(headlines, vec!["谣言甲", "谣言乙"]);
        assert_eq!(rumors[0].date, "2024-05-06");
        assert_eq!(rumors[0].field, "健康");
        assert_eq!(asker.prompts.lock().unwrap().len(), 2);

        let saved: Vec<RumorRecord> =
            json::load_records(&tmp.path().join("fake_news.json")).await.unwrap();
        assert_eq!(saved, rumors);
        let raw = std::fs::read_to_string(tmp.path().join("fake_news.json")).unwrap();
        assert!(!raw.contains("\"error\""));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fake_news_cancelled_before_llm_saves_empty_list() {
        let tmp = tempfile::tempdir().unwrap();
        json::persist(
            &tmp.path().join("links.json"),
            &[Record::new("2024-05-06", "https://www.piyao.org.cn/a.htm")],
        )
        .await
        .unwrap();
        let fetcher = ScriptedFetcher::new(vec![Ok(FetchedPage::new(
            "https://www.piyao.org.cn/a.htm",
            "<p>文章</p>",
        ))]);
        let asker = ScriptedAsk::new(vec![Ok("[]")]);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let rumors = fake_news(&fetcher, &asker, &quick_config(), tmp.path(), cancel)
            .await
            .unwrap();

        assert!(rumors.is_empty());
        assert!(tmp.path().join("fake_news.json").exists());
        assert!(asker.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fake_news_without_links_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let fetcher = ScriptedFetcher::new(vec![]);
        let asker = ScriptedAsk::new(vec![]);
        let result = fake_news(
            &fetcher,
            &asker,
            &quick_config(),
            tmp.path(),
            CancellationToken::new(),
        )
        .await;
        assert!(result.is_err());
    }
}
