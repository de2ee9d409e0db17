//! Site configuration.
//!
//! Everything site-specific (URLs, selectors, link fixes, loop bounds, output
//! file names, dispatcher limits, LLM prompts) has a built-in default and can
//! be overridden from a YAML file passed with `--site-config`. Keys missing
//! from the file keep their defaults:
//!
//! ```yaml
//! piyao:
//!   max_iterations: 10
//!   poll_delay_secs: 5
//! dispatcher:
//!   max_session_permit: 8
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::dispatch::DispatcherConfig;
use crate::extraction::{CssExtractionStrategy, CssSchema, InputFormat, LlmSettings};
use crate::fetcher::CacheMode;
use crate::fetcher::browser::BrowserSettings;
use crate::normalize::NormalizeRules;
use crate::scrapers::piyao;
use crate::utils::{MAX_CONFIG_SECS, secs};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read site config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse site config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid site config: {0}")]
    Invalid(String),
}

/// The piyao rumor listing and its article pages.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PiyaoConfig {
    pub listing_url: String,
    pub listing_schema: CssSchema,
    pub normalize: NormalizeRules,
    /// "Load more" clicks per fetch in the one-shot `links` recipe.
    pub max_clicks: u32,
    /// Pause after each click in the one-shot recipe.
    pub click_wait_ms: u64,
    /// "Load more" clicks per poll in `loop-links`.
    pub poll_max_clicks: u32,
    /// Pause after each click while polling.
    pub poll_click_wait_ms: u64,
    pub poll_delay_secs: f64,
    pub max_iterations: usize,
    pub delay_before_return_secs: f64,
    pub session_id: String,
    pub links_file: String,
    pub fake_news_file: String,
}

impl Default for PiyaoConfig {
    fn default() -> Self {
        Self {
            listing_url: "https://www.piyao.org.cn/jrpy/index.htm".to_string(),
            listing_schema: piyao::listing_schema(),
            normalize: NormalizeRules::piyao(),
            max_clicks: 1,
            click_wait_ms: 1000,
            poll_max_clicks: 1,
            poll_click_wait_ms: 3000,
            poll_delay_secs: 3.0,
            max_iterations: 50,
            delay_before_return_secs: 2.0,
            session_id: "piyao_session".to_string(),
            links_file: "links.json".to_string(),
            fake_news_file: "fake_news.json".to_string(),
        }
    }
}

impl PiyaoConfig {
    pub fn poll_delay(&self) -> Duration {
        secs(self.poll_delay_secs)
    }

    pub fn delay_before_return(&self) -> Duration {
        secs(self.delay_before_return_secs)
    }
}

/// The sina hot-news ranking page.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SinaConfig {
    pub url: String,
    /// Region holding the overall ranking table.
    pub scope_selector: String,
    /// Element that exists once the ranking table has rendered. A `js:`
    /// prefix turns it into a JS predicate instead.
    pub ready_selector: String,
    pub hot_news_file: String,
    pub markdown_file: String,
}

impl Default for SinaConfig {
    fn default() -> Self {
        Self {
            url: "https://news.sina.com.cn/hotnews/".to_string(),
            scope_selector: "#Con11".to_string(),
            ready_selector: "#Con11 > table > tbody > tr:nth-child(4) > td.ConsTi".to_string(),
            hot_news_file: "hot_news.json".to_string(),
            markdown_file: "hot_news.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteConfig {
    pub browser: BrowserSettings,
    /// Cache behaviour for fetches outside a session.
    pub cache_mode: CacheMode,
    /// Page cache directory, relative to the output directory.
    pub cache_dir: String,
    /// Upper bound on one page fetch, navigation and waiting included.
    pub page_timeout_secs: f64,
    pub piyao: PiyaoConfig,
    pub sina: SinaConfig,
    pub dispatcher: DispatcherConfig,
    pub fake_news_llm: LlmSettings,
    pub hot_news_llm: LlmSettings,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            browser: BrowserSettings::default(),
            cache_mode: CacheMode::Bypass,
            cache_dir: "cache".to_string(),
            page_timeout_secs: 60.0,
            piyao: PiyaoConfig::default(),
            sina: SinaConfig::default(),
            dispatcher: DispatcherConfig::default(),
            fake_news_llm: fake_news_llm(),
            hot_news_llm: hot_news_llm(),
        }
    }
}

impl SiteConfig {
    pub fn page_timeout(&self) -> Duration {
        secs(self.page_timeout_secs)
    }

    /// Reject values that would make a recipe misbehave rather than fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        CssExtractionStrategy::new(self.piyao.listing_schema.clone())
            .map_err(|e| ConfigError::Invalid(format!("piyao.listing_schema: {e}")))?;
        self.piyao
            .normalize
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("piyao.normalize: {e}")))?;
        if self.dispatcher.max_session_permit == 0 {
            return Err(ConfigError::Invalid(
                "dispatcher.max_session_permit must be at least 1".to_string(),
            ));
        }
        let limiter = &self.dispatcher.rate_limiter;
        for (name, value) in [
            ("page_timeout_secs", self.page_timeout_secs),
            ("piyao.poll_delay_secs", self.piyao.poll_delay_secs),
            ("piyao.delay_before_return_secs", self.piyao.delay_before_return_secs),
            ("dispatcher.rate_limiter.base_delay", limiter.base_delay.0),
            ("dispatcher.rate_limiter.base_delay", limiter.base_delay.1),
            ("dispatcher.rate_limiter.max_delay", limiter.max_delay),
        ] {
            if !(0.0..=MAX_CONFIG_SECS).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be between 0 and {MAX_CONFIG_SECS} seconds, got {value}"
                )));
            }
        }
        for (name, llm) in [("fake_news_llm", &self.fake_news_llm), ("hot_news_llm", &self.hot_news_llm)] {
            if llm.chunk_token_threshold == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{name}.chunk_token_threshold must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

fn fake_news_llm() -> LlmSettings {
    LlmSettings {
        template: "rumor_extractor".to_string(),
        instruction: "从页面中提取所有谣言以及误区，包括标题、领域分类、真相、来源和注意事项。"
            .to_string(),
        schema_hint: r#"{"headline": "谣言标题", "field": "领域分类", "truth": "真相", "source": "来源", "measures": "注意事项"}"#
            .to_string(),
        chunk_token_threshold: 1000,
        overlap_rate: 0.1,
        apply_chunking: true,
        input_format: InputFormat::Html,
    }
}

fn hot_news_llm() -> LlmSettings {
    LlmSettings {
        template: "hot_news_extractor".to_string(),
        instruction: "从页面中提取新闻总排行中的这10条新闻，包括标题、领域分类、来源媒体、发布时间和大模型预测的虚假新闻标题。"
            .to_string(),
        schema_hint: r#"{"headline": "新闻标题", "field": "领域分类", "source": "来源媒体", "date": "发布时间", "predicted_fake_headline": "预测的虚假新闻标题"}"#
            .to_string(),
        chunk_token_threshold: 1500,
        overlap_rate: 0.3,
        apply_chunking: true,
        input_format: InputFormat::Html,
    }
}

/// Load and validate the site config, or the defaults when `path` is `None`.
#[instrument(level = "info")]
pub fn load_site_config(path: Option<&Path>) -> Result<SiteConfig, ConfigError> {
    let config = match path {
        None => SiteConfig::default(),
        Some(path) => {
            let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            let config = if text.trim().is_empty() {
                SiteConfig::default()
            } else {
                serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })?
            };
            info!(path = %path.display(), "Loaded site config");
            config
        }
    };
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = load_site_config(None).unwrap();
        assert_eq!(config.piyao.listing_url, "https://www.piyao.org.cn/jrpy/index.htm");
        assert_eq!(config.piyao.max_iterations, 50);
        assert_eq!(config.piyao.poll_delay(), Duration::from_secs(3));
        assert_eq!(config.piyao.delay_before_return(), Duration::from_secs(2));
        assert_eq!(config.sina.scope_selector, "#Con11");
        assert_eq!(config.dispatcher.max_session_permit, 30);
        assert_eq!(config.dispatcher.rate_limiter.rate_limit_codes, vec![429, 503]);
        assert_eq!(config.fake_news_llm.chunk_token_threshold, 1000);
        assert_eq!(config.hot_news_llm.overlap_rate, 0.3);
        assert!(config.browser.headless);
        assert_eq!(config.cache_mode, CacheMode::Bypass);
        assert_eq!(config.cache_dir, "cache");
    }

    #[test]
    fn test_partial_override_keeps_other_defaults() {
        let file = write_config(
            r#"
piyao:
  max_iterations: 7
  poll_delay_secs: 0.5
  normalize:
    base_url: https://mirror.example.org
    rewrites:
      - from: "../"
        to: "/"
dispatcher:
  max_session_permit: 4
  rate_limiter:
    max_retries: 2
cache_mode: enabled
"#,
        );
        let config = load_site_config(Some(file.path())).unwrap();
        assert_eq!(config.piyao.max_iterations, 7);
        assert_eq!(config.piyao.poll_delay(), Duration::from_millis(500));
        assert_eq!(config.piyao.normalize.base_url, "https://mirror.example.org");
        assert_eq!(config.piyao.normalize.rewrites.len(), 1);
        assert_eq!(config.piyao.session_id, "piyao_session");
        assert_eq!(config.dispatcher.max_session_permit, 4);
        assert_eq!(config.dispatcher.rate_limiter.max_retries, 2);
        assert_eq!(config.dispatcher.rate_limiter.base_delay, (0.1, 0.2));
        assert_eq!(config.sina, SinaConfig::default());
        assert_eq!(config.cache_mode, CacheMode::Enabled);
    }

    #[test]
    fn test_empty_file_is_defaults() {
        let file = write_config("\n");
        assert_eq!(load_site_config(Some(file.path())).unwrap(), SiteConfig::default());
    }

    #[test]
    fn test_missing_file() {
        let err = load_site_config(Some(Path::new("/nonexistent/site.yaml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_malformed_yaml() {
        let file = write_config("piyao: [unclosed");
        let err = load_site_config(Some(file.path())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let file = write_config(
            r#"
piyao:
  listing_schema:
    name: broken
    baseSelector: "ul#list li"
    fields:
      - name: date
        selector: "p..domPC"
        type: text
"#,
        );
        let err = load_site_config(Some(file.path())).unwrap_err();
        match err {
            ConfigError::Invalid(msg) => assert!(msg.contains("listing_schema")),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_out_of_range_durations_rejected() {
        for yaml in [
            "page_timeout_secs: .inf\n",
            "page_timeout_secs: 1e12\n",
            "piyao:\n  poll_delay_secs: .nan\n",
            "piyao:\n  delay_before_return_secs: -1\n",
            "dispatcher:\n  rate_limiter:\n    max_delay: .inf\n",
            "dispatcher:\n  rate_limiter:\n    base_delay: [0.1, .inf]\n",
        ] {
            let file = write_config(yaml);
            match load_site_config(Some(file.path())) {
                Err(ConfigError::Invalid(msg)) => assert!(msg.contains("seconds"), "{msg}"),
                other => panic!("{yaml:?} was accepted: {other:?}"),
            }
        }
    }

    #[test]
    fn test_growing_rewrite_rejected() {
        let file = write_config(
            r#"
piyao:
  normalize:
    base_url: https://www.piyao.org.cn
    rewrites:
      - from: "/"
        to: "//"
"#,
        );
        match load_site_config(Some(file.path())) {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("piyao.normalize"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_zero_permits_rejected() {
        let file = write_config("dispatcher:\n  max_session_permit: 0\n");
        assert!(matches!(
            load_site_config(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }
}
