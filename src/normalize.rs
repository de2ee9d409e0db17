//! Link normalization for scraped listing entries.
//!
//! Listing pages on piyao emit hrefs such as `../20240506/c_1.htm` or, after
//! the "load more" script has run, the mangled `<../20240506/c_1.htm>`. The
//! fixes are site-specific, so they live in a [`NormalizeRules`] value that
//! can be loaded from the site config instead of being baked into the code.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::Record;

static SCHEME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*://").expect("static regex"));

/// One literal substring replacement.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Rewrite {
    pub from: String,
    #[serde(default)]
    pub to: String,
}

impl Rewrite {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Whether every replacement made by this rule shortens the link.
    fn shrinks(&self) -> bool {
        self.to.len() < self.from.len()
    }
}

/// Ordered rewrites plus the base URL used for relative links.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NormalizeRules {
    pub base_url: String,
    #[serde(default)]
    pub rewrites: Vec<Rewrite>,
}

impl NormalizeRules {
    /// Rules for `www.piyao.org.cn` listing pages.
    pub fn piyao() -> Self {
        Self {
            base_url: "https://www.piyao.org.cn".to_string(),
            rewrites: vec![
                Rewrite::new("<../", "/"),
                Rewrite::new("../", "/"),
                Rewrite::new(">", ""),
                Rewrite::new("/jrpy/", "/"),
            ],
        }
    }

    /// Rewrite `raw` and make it absolute.
    ///
    /// Rewrites run to a fixed point both before and after the base URL is
    /// prepended, so the result is itself a fixed point and calling this twice
    /// gives the same answer as calling it once.
    pub fn normalize(&self, raw: &str) -> String {
        let rewritten = self.rewrite_to_fixed_point(raw.trim());
        if has_scheme(&rewritten) {
            return rewritten;
        }
        self.rewrite_to_fixed_point(&join(&self.base_url, &rewritten))
    }

    /// Check that rewriting always reaches a fixed point.
    ///
    /// A rule whose replacement is not shorter than its pattern could grow or
    /// cycle the link forever.
    pub fn validate(&self) -> Result<(), String> {
        if self.base_url.trim().is_empty() {
            return Err("base_url is empty".to_string());
        }
        for rule in &self.rewrites {
            if rule.from.is_empty() {
                return Err("rewrite with an empty `from`".to_string());
            }
            if !rule.shrinks() {
                return Err(format!(
                    "rewrite {:?} -> {:?} must replace with something shorter",
                    rule.from, rule.to
                ));
            }
        }
        Ok(())
    }

    /// Normalize the `link` of every record in place.
    pub fn normalize_records(&self, records: &mut [Record]) {
        for record in records.iter_mut() {
            record.link = self.normalize(&record.link);
        }
    }

    /// Apply the rewrites until the link stops changing.
    ///
    /// Only shrinking rules are applied, so every pass that changes the link
    /// makes it shorter and the loop ends.
    fn rewrite_to_fixed_point(&self, link: &str) -> String {
        let mut current = link.to_string();
        loop {
            let next = self.rewrite_once(&current);
            if next == current {
                return current;
            }
            current = next;
        }
    }

    fn rewrite_once(&self, link: &str) -> String {
        self.rewrites
            .iter()
            .filter(|r| !r.from.is_empty() && r.shrinks())
            .fold(link.to_string(), |acc, r| acc.replace(&r.from, &r.to))
    }
}

/// Normalize one link against `base_url` with the piyao rewrites.
#[cfg(test)]
fn normalize(raw: &str, base_url: &str) -> String {
    NormalizeRules {
        base_url: base_url.to_string(),
        ..NormalizeRules::piyao()
    }
    .normalize(raw)
}

fn has_scheme(link: &str) -> bool {
    SCHEME.is_match(link)
}

fn join(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) if !path.is_empty() => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}
