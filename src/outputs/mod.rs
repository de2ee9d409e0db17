//! Output writers.
//!
//! # Submodules
//!
//! - [`json`]: writes record lists as 4-space indented JSON arrays and reads them back
//! - [`markdown`]: converts pages to Markdown and writes them out
//!
//! # Output Structure
//!
//! ```text
//! output_dir/
//! ├── links.json       # {date, link} listing entries
//! ├── fake_news.json   # RumorRecord list
//! ├── hot_news.json    # HotNewsRecord list
//! └── hot_news.md      # hot-news page as Markdown
//! ```

pub mod json;
pub mod markdown;
