//! JSON persistence for scraped records.
//!
//! Files are a bare JSON array, pretty-printed with a 4-space indent. CJK text
//! is written as-is rather than `\u` escaped, so the files stay readable.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::ser::{PrettyFormatter, Serializer};
use std::error::Error;
use std::path::Path;
use tokio::fs;
use tracing::{error, info, instrument};

fn to_pretty_json<T: Serialize>(items: &[T]) -> Result<Vec<u8>, serde_json::Error> {
    let mut buf = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = Serializer::with_formatter(&mut buf, formatter);
    items.serialize(&mut serializer)?;
    Ok(buf)
}

/// Write `items` to `path`, creating parent directories as needed.
#[instrument(level = "info", skip_all, fields(path = %path.display(), count = items.len()))]
pub async fn persist<T: Serialize>(path: &Path, items: &[T]) -> Result<(), Box<dyn Error>> {
    let json = to_pretty_json(items)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent).await {
            error!(dir = %parent.display(), error = %e, "Failed to create output dir");
            return Err(e.into());
        }
    }

    fs::write(path, json).await?;
    info!("Wrote JSON file");
    Ok(())
}

/// Read a JSON array written by [`persist`].
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_records<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, Box<dyn Error>> {
    let bytes = fs::read(path).await?;
    let records: Vec<T> = serde_json::from_slice(&bytes)?;
    info!(count = records.len(), "Loaded JSON file");
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Record, RumorRecord};

    #[tokio::test]
    async fn test_persist_formats_and_creates_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("links.json");
        let records = vec![Record::new(
            "2024-05-06",
            "https://www.piyao.org.cn/20240506/c_1.htm",
        )];

        persist(&path, &records).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "[\n    {\n        \"date\": \"2024-05-06\",\n        \"link\": \"https://www.piyao.org.cn/20240506/c_1.htm\"\n    }\n]"
        );
    }

    #[tokio::test]
    async fn test_cjk_is_not_escaped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("fake_news.json");
        let rumor = RumorRecord {
            headline: "喝隔夜水会致癌".to_string(),
            field: "健康".to_string(),
            truth: "不会".to_string(),
            source: "中国互联网联合辟谣平台".to_string(),
            measures: String::new(),
            date: "2024-05-06".to_string(),
        };

        persist(&path, std::slice::from_ref(&rumor)).await.unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("喝隔夜水会致癌"));
        assert!(!text.contains("\\u"));
        let loaded: Vec<RumorRecord> = load_records(&path).await.unwrap();
        assert_eq!(loaded, vec![rumor]);
    }

    #[tokio::test]
    async fn test_empty_list_is_valid_json() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("links.json");
        persist::<Record>(&path, &[]).await.unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_load_missing_file_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let result = load_records::<Record>(&tmp.path().join("nope.json")).await;
        assert!(result.is_err());
    }
}
