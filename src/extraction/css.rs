//! CSS-selector extraction.
//!
//! A schema names a base selector (one match per output object) and a list
//! of fields looked up inside each match. The JSON form uses the same keys
//! as the listing schemas the scrapers were first written against:
//!
//! ```json
//! {
//!   "name": "辟谣信息",
//!   "baseSelector": "ul#list li",
//!   "fields": [
//!     {"name": "date", "selector": "p.domPC", "type": "text"},
//!     {"name": "link", "selector": "h2 a", "type": "attribute", "attribute": "href"}
//!   ]
//! }
//! ```

use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::ExtractionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Trimmed text content.
    Text,
    /// Value of the attribute named in [`FieldSpec::attribute`].
    Attribute,
    /// Inner HTML.
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub selector: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CssSchema {
    pub name: String,
    #[serde(rename = "baseSelector")]
    pub base_selector: String,
    pub fields: Vec<FieldSpec>,
}

/// A [`CssSchema`] with its selectors compiled.
#[derive(Debug, Clone)]
pub struct CssExtractionStrategy {
    schema: CssSchema,
    base: Selector,
    fields: Vec<(FieldSpec, Selector)>,
}

fn compile(selector: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(selector).map_err(|e| ExtractionError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

impl CssExtractionStrategy {
    pub fn new(schema: CssSchema) -> Result<Self, ExtractionError> {
        let base = compile(&schema.base_selector)?;
        let fields = schema
            .fields
            .iter()
            .map(|field| {
                if field.kind == FieldKind::Attribute && field.attribute.is_none() {
                    return Err(ExtractionError::MissingAttribute {
                        field: field.name.clone(),
                    });
                }
                Ok((field.clone(), compile(&field.selector)?))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            schema,
            base,
            fields,
        })
    }

    /// One object per base match, in document order. Fields whose selector
    /// matches nothing (or whose attribute is absent) are left out.
    pub fn extract(&self, html: &str) -> Vec<Map<String, Value>> {
        let document = Html::parse_document(html);
        let objects: Vec<Map<String, Value>> = document
            .select(&self.base)
            .map(|element| self.extract_one(element))
            .collect();
        debug!(schema = %self.schema.name, count = objects.len(), "CSS extraction");
        objects
    }

    fn extract_one(&self, element: ElementRef<'_>) -> Map<String, Value> {
        let mut object = Map::new();
        for (field, selector) in &self.fields {
            let Some(found) = element.select(selector).next() else {
                continue;
            };
            let value = match field.kind {
                FieldKind::Text => Some(collapse_whitespace(&found.text().collect::<String>())),
                FieldKind::Html => Some(found.inner_html()),
                FieldKind::Attribute => field
                    .attribute
                    .as_deref()
                    .and_then(|name| found.value().attr(name))
                    .map(str::to_string),
            };
            if let Some(value) = value {
                object.insert(field.name.clone(), Value::String(value));
            }
        }
        object
    }
}

/// Outer HTML of every element matching `selector`, joined by newlines.
///
/// Used to narrow a page to the region a recipe cares about before
/// extraction or Markdown conversion.
pub fn scope_html(html: &str, selector: &str) -> Result<String, ExtractionError> {
    let selector_compiled = compile(selector)?;
    let document = Html::parse_document(html);
    let parts: Vec<String> = document
        .select(&selector_compiled)
        .map(|element| element.html())
        .collect();
    if parts.is_empty() {
        warn!(%selector, "Scope selector matched nothing");
    }
    Ok(parts.join("\n"))
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing_schema() -> CssSchema {
        serde_json::from_str(
            r#"{
                "name": "辟谣信息",
                "baseSelector": "ul#list li",
                "fields": [
                    {"name": "date", "selector": "p.domPC", "type": "text"},
                    {"name": "link", "selector": "h2 a", "type": "attribute", "attribute": "href"}
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_extracts_fields_in_document_order() {
        let strategy = CssExtractionStrategy::new(listing_schema()).unwrap();
        let html = r#"
            <ul id="list">
              <li><h2><a href="../20240506/c_1.htm">一</a></h2><p class="domPC"> 2024-05-06 </p></li>
              <li><h2><a href="../20240505/c_2.htm">二</a></h2><p class="domPC">2024-05-05</p></li>
            </ul>"#;
        let objects = strategy.extract(html);
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0]["date"], "2024-05-06");
        assert_eq!(objects[0]["link"], "../20240506/c_1.htm");
        assert_eq!(objects[1]["link"], "../20240505/c_2.htm");
    }

    #[test]
    fn test_missing_field_is_omitted() {
        let strategy = CssExtractionStrategy::new(listing_schema()).unwrap();
        let html = r#"<ul id="list"><li><p class="domPC">2024-05-06</p></li></ul>"#;
        let objects = strategy.extract(html);
        assert_eq!(objects.len(), 1);
        assert!(objects[0].get("link").is_none());
        assert_eq!(objects[0]["date"], "2024-05-06");
    }

    #[test]
    fn test_items_outside_base_are_ignored() {
        let strategy = CssExtractionStrategy::new(listing_schema()).unwrap();
        let html = r#"<ul id="other"><li><h2><a href="x">x</a></h2></li></ul>"#;
        assert!(strategy.extract(html).is_empty());
    }

    #[test]
    fn test_html_field() {
        let schema = CssSchema {
            name: "t".to_string(),
            base_selector: "div.item".to_string(),
            fields: vec![FieldSpec {
                name: "body".to_string(),
                selector: "span".to_string(),
                kind: FieldKind::Html,
                attribute: None,
            }],
        };
        let strategy = CssExtractionStrategy::new(schema).unwrap();
        let objects = strategy.extract(r#"<div class="item"><span><b>粗</b></span></div>"#);
        assert_eq!(objects[0]["body"], "<b>粗</b>");
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        let mut schema = listing_schema();
        schema.base_selector = "ul[[".to_string();
        let err = CssExtractionStrategy::new(schema).unwrap_err();
        assert!(matches!(err, ExtractionError::InvalidSelector { .. }));
    }

    #[test]
    fn test_attribute_field_needs_attribute_name() {
        let mut schema = listing_schema();
        schema.fields[1].attribute = None;
        let err = CssExtractionStrategy::new(schema).unwrap_err();
        assert_eq!(
            err,
            ExtractionError::MissingAttribute {
                field: "link".to_string()
            }
        );
    }

    #[test]
    fn test_scope_html_keeps_only_matches() {
        let html = r#"<body><div id="Con11"><table><tr><td>榜单</td></tr></table></div><div id="ad">广告</div></body>"#;
        let scoped = scope_html(html, "#Con11").unwrap();
        assert!(scoped.contains("榜单"));
        assert!(!scoped.contains("广告"));
    }

    #[test]
    fn test_scope_html_no_match_is_empty() {
        assert_eq!(scope_html("<p>x</p>", "#missing").unwrap(), "");
    }
}
