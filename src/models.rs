//! Data models for scraped listings and LLM-extracted records.
//!
//! - [`Record`]: one `{date, link}` entry from a rumor listing page
//! - [`RumorRecord`]: a debunked rumor extracted by the LLM from an article page
//! - [`HotNewsRecord`]: one entry of the sina hot-news ranking, with the
//!   model's guess at a fake headline derived from it
//!
//! Field names are the JSON keys the downstream consumers already read, so
//! they are serialized as-is.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A single listing entry: publication date and article link.
///
/// `date` keeps the site's native format (`2024-05-06` on piyao). `link` is
/// whatever the page contained until the normalizer rewrites it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Record {
    pub date: String,
    pub link: String,
}

/// Why an extracted JSON object could not become a [`Record`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("record is missing field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` is not a string")]
    NotAString(&'static str),
}

impl Record {
    pub fn new(date: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            date: date.into(),
            link: link.into(),
        }
    }
}

impl TryFrom<&Map<String, Value>> for Record {
    type Error = RecordError;

    fn try_from(object: &Map<String, Value>) -> Result<Self, Self::Error> {
        fn string_field(
            object: &Map<String, Value>,
            name: &'static str,
        ) -> Result<String, RecordError> {
            match object.get(name) {
                None | Some(Value::Null) => Err(RecordError::MissingField(name)),
                Some(Value::String(s)) => Ok(s.clone()),
                Some(_) => Err(RecordError::NotAString(name)),
            }
        }

        Ok(Record {
            date: string_field(object, "date")?,
            link: string_field(object, "link")?,
        })
    }
}

/// A rumor and its rebuttal, as extracted from one piyao article.
///
/// The model fills every field except `date`, which is copied from the
/// listing entry that pointed at the article.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RumorRecord {
    /// Rumor headline.
    #[serde(default)]
    pub headline: String,
    /// Topic the rumor belongs to (health, food safety, ...).
    #[serde(default)]
    pub field: String,
    /// What is actually true.
    #[serde(default)]
    pub truth: String,
    /// Who published the rebuttal.
    #[serde(default)]
    pub source: String,
    /// Advice for readers.
    #[serde(default)]
    pub measures: String,
    #[serde(default)]
    pub date: String,
}

/// An entry of the sina "news ranking" table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HotNewsRecord {
    #[serde(default)]
    pub headline: String,
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub date: String,
    /// A plausible fake headline the model derived from the real one.
    #[serde(default)]
    pub predicted_fake_headline: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_record_from_object() {
        let obj = object(json!({"date": "2024-05-06", "link": "../c_1.htm"}));
        let record = Record::try_from(&obj).unwrap();
        assert_eq!(record, Record::new("2024-05-06", "../c_1.htm"));
    }

    #[test]
    fn test_record_missing_link() {
        let obj = object(json!({"date": "2024-05-06"}));
        assert_eq!(
            Record::try_from(&obj),
            Err(RecordError::MissingField("link"))
        );
    }

    #[test]
    fn test_record_null_date() {
        let obj = object(json!({"date": null, "link": "x"}));
        assert_eq!(
            Record::try_from(&obj),
            Err(RecordError::MissingField("date"))
        );
    }

    #[test]
    fn test_record_non_string_link() {
        let obj = object(json!({"date": "d", "link": 7}));
        assert_eq!(Record::try_from(&obj), Err(RecordError::NotAString("link")));
    }

    #[test]
    fn test_record_serialization_keeps_chinese() {
        let record = Record::new("2024年5月6日", "https://www.piyao.org.cn/a.htm");
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("2024年5月6日"));
    }

    #[test]
    fn test_rumor_record_tolerates_missing_fields() {
        let rumor: RumorRecord =
            serde_json::from_str(r#"{"headline": "喝醋能软化血管", "truth": "不能"}"#).unwrap();
        assert_eq!(rumor.headline, "喝醋能软化血管");
        assert_eq!(rumor.truth, "不能");
        assert!(rumor.source.is_empty());
        assert!(rumor.date.is_empty());
    }

    #[test]
    fn test_hot_news_record_deserialization() {
        let json = r#"{
            "headline": "某地发布暴雨预警",
            "field": "社会",
            "source": "新浪新闻",
            "date": "2024-05-06 10:00",
            "predicted_fake_headline": "某地将连续暴雨一个月"
        }"#;
        let hot: HotNewsRecord = serde_json::from_str(json).unwrap();
        assert_eq!(hot.field, "社会");
        assert_eq!(hot.predicted_fake_headline, "某地将连续暴雨一个月");
    }
}
