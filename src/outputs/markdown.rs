//! Markdown output for pages kept as readable text rather than records.

use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{info, instrument};

/// Convert an HTML document or fragment to Markdown.
pub fn page_to_markdown(html: &str) -> String {
    html2md::parse_html(html).trim().to_string()
}

/// Write `text` to `path`, creating parent directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display(), bytes = text.len()))]
pub async fn write_markdown(path: &Path, text: &str) -> Result<(), Box<dyn Error>> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }
    fs::write(path, text).await?;
    info!("Wrote Markdown file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_to_markdown_keeps_links_and_text() {
        let md = page_to_markdown(
            r#"<div id="Con11"><h2>新闻总排行</h2><a href="https://news.sina.com.cn/a.shtml">标题一</a></div>"#,
        );
        assert!(md.contains("新闻总排行"));
        assert!(md.contains("[标题一](https://news.sina.com.cn/a.shtml)"));
    }

    #[tokio::test]
    async fn test_write_markdown_creates_parent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("hot_news.md");
        write_markdown(&path, "# 热点").await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "# 热点");
    }
}
