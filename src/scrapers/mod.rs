//! Site scrapers, one module per site.
//!
//! Each public function is one recipe: fetch, extract, post-process, persist.
//! Recipes take the fetcher (and LLM client) by reference so tests can drive
//! them with scripted collaborators.
//!
//! # Supported Sites
//!
//! | Site | Module | Recipes | Method |
//! |------|--------|---------|--------|
//! | 中国互联网联合辟谣平台 | [`piyao`] | `links`, `loop_links`, `fake_news` | CSS listing + LLM articles |
//! | 新浪新闻排行 | [`sina`] | `hot_news`, `hot_news_markdown` | LLM or Markdown of `#Con11` |

pub mod piyao;
pub mod sina;
