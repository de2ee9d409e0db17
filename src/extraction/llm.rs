//! Schema-guided extraction by a language model.
//!
//! The page is reduced to the configured input format, split into
//! overlapping chunks, and every chunk is sent with the instruction and a
//! JSON shape hint. Replies are parsed leniently (fences and preambles are
//! tolerated) and the objects from all chunks are concatenated in order.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::ExtractionError;
use super::chunking::{chunk_text, estimate_tokens};
use crate::api::AskAsync;
use crate::utils::{json_payload, looks_truncated, truncate_for_log};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputFormat {
    /// Send the (scoped) HTML as-is.
    #[default]
    Html,
    /// Convert to Markdown first; cheaper on tokens.
    Markdown,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Name of the `awful_aj` chat template to load.
    pub template: String,
    /// What to pull out of the page, in the model's terms.
    pub instruction: String,
    /// Example object showing the expected keys.
    pub schema_hint: String,
    pub chunk_token_threshold: usize,
    pub overlap_rate: f64,
    pub apply_chunking: bool,
    pub input_format: InputFormat,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            template: "rumor_extractor".to_string(),
            instruction: String::new(),
            schema_hint: "{}".to_string(),
            chunk_token_threshold: 1000,
            overlap_rate: 0.1,
            apply_chunking: true,
            input_format: InputFormat::Html,
        }
    }
}

#[derive(Debug, Default)]
struct Usage {
    requests: AtomicU64,
    chunks: AtomicU64,
    failed_chunks: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
}

/// Running totals, returned by [`LlmExtractionStrategy::usage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageSnapshot {
    pub requests: u64,
    pub chunks: u64,
    pub failed_chunks: u64,
    /// Estimated, not reported by the provider.
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

#[derive(Debug)]
pub struct LlmExtractionStrategy {
    settings: LlmSettings,
    usage: Usage,
}

impl LlmExtractionStrategy {
    pub fn new(settings: LlmSettings) -> Self {
        Self {
            settings,
            usage: Usage::default(),
        }
    }

    /// Text that will be chunked for `html`.
    pub fn prepare_input(&self, html: &str) -> String {
        match self.settings.input_format {
            InputFormat::Html => html.to_string(),
            InputFormat::Markdown => html2md::parse_html(html),
        }
    }

    fn chunks(&self, input: &str) -> Vec<String> {
        if !self.settings.apply_chunking {
            return if input.trim().is_empty() {
                Vec::new()
            } else {
                vec![input.to_string()]
            };
        }
        chunk_text(
            input,
            self.settings.chunk_token_threshold,
            self.settings.overlap_rate,
        )
    }

    fn prompt(&self, chunk: &str) -> String {
        format!(
            "{}\n\nReturn only a JSON array of objects shaped like:\n{}\n\n<content>\n{}\n</content>",
            self.settings.instruction, self.settings.schema_hint, chunk
        )
    }

    /// Extract objects from `html` with `client`.
    ///
    /// Failed chunks are logged and skipped; only a page where every chunk
    /// failed is an error. A page with no text yields no objects.
    #[instrument(level = "info", skip_all, fields(%source))]
    pub async fn extract<A>(
        &self,
        client: &A,
        source: &str,
        html: &str,
    ) -> Result<Vec<Map<String, Value>>, ExtractionError>
    where
        A: AskAsync<Response = String>,
    {
        let input = self.prepare_input(html);
        let chunks = self.chunks(&input);
        debug!(chunks = chunks.len(), bytes = input.len(), "Prepared LLM input");

        let mut objects = Vec::new();
        let mut failed = 0usize;
        for (i, chunk) in chunks.iter().enumerate() {
            self.usage.chunks.fetch_add(1, Ordering::Relaxed);
            match self.extract_chunk(client, chunk).await {
                Some(found) => {
                    debug!(chunk = i, count = found.len(), "Chunk extracted");
                    objects.extend(found);
                }
                None => {
                    failed += 1;
                    self.usage.failed_chunks.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if !chunks.is_empty() && failed == chunks.len() {
            return Err(ExtractionError::AllChunksFailed {
                chunks: chunks.len(),
            });
        }
        info!(count = objects.len(), failed, "LLM extraction finished");
        Ok(objects)
    }

    async fn extract_chunk<A>(&self, client: &A, chunk: &str) -> Option<Vec<Map<String, Value>>>
    where
        A: AskAsync<Response = String>,
    {
        let prompt = self.prompt(chunk);
        let reply = self.ask_counted(client, &prompt).await?;

        match parse_reply(&reply) {
            Ok(objects) => Some(objects),
            Err(e) if looks_truncated(&e) => {
                warn!(error = %e, "EOF while parsing; re-asking once");
                let retry = self.ask_counted(client, &prompt).await?;
                match parse_reply(&retry) {
                    Ok(objects) => Some(objects),
                    Err(e) => {
                        warn!(
                            error = %e,
                            response_preview = %truncate_for_log(&retry, 300),
                            "Model returned non-conforming JSON twice; skipping chunk"
                        );
                        None
                    }
                }
            }
            Err(e) => {
                warn!(
                    error = %e,
                    response_preview = %truncate_for_log(&reply, 300),
                    "Model returned non-conforming JSON; skipping chunk"
                );
                None
            }
        }
    }

    async fn ask_counted<A>(&self, client: &A, prompt: &str) -> Option<String>
    where
        A: AskAsync<Response = String>,
    {
        self.usage.requests.fetch_add(1, Ordering::Relaxed);
        self.usage
            .prompt_tokens
            .fetch_add(estimate_tokens(prompt) as u64, Ordering::Relaxed);
        match client.ask(prompt).await {
            Ok(reply) => {
                self.usage
                    .completion_tokens
                    .fetch_add(estimate_tokens(&reply) as u64, Ordering::Relaxed);
                Some(reply)
            }
            Err(e) => {
                warn!(error = %e, "LLM request failed; skipping chunk");
                None
            }
        }
    }

    pub fn usage(&self) -> UsageSnapshot {
        UsageSnapshot {
            requests: self.usage.requests.load(Ordering::Relaxed),
            chunks: self.usage.chunks.load(Ordering::Relaxed),
            failed_chunks: self.usage.failed_chunks.load(Ordering::Relaxed),
            prompt_tokens: self.usage.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.usage.completion_tokens.load(Ordering::Relaxed),
        }
    }

    /// Log the usage totals for this run.
    pub fn show_usage(&self) {
        let usage = self.usage();
        info!(
            requests = usage.requests,
            chunks = usage.chunks,
            failed_chunks = usage.failed_chunks,
            prompt_tokens_estimate = usage.prompt_tokens,
            completion_tokens_estimate = usage.completion_tokens,
            total_tokens_estimate = usage.prompt_tokens + usage.completion_tokens,
            "LLM usage"
        );
    }
}

/// Objects in a model reply.
///
/// Accepts a bare array, a single object, or an object wrapping one array of
/// objects (`{"rumors": [...]}`). Non-object array entries are dropped.
pub fn parse_reply(reply: &str) -> Result<Vec<Map<String, Value>>, serde_json::Error> {
    let value: Value = serde_json::from_str(json_payload(reply))?;
    Ok(match value {
        Value::Array(items) => objects_of(items),
        Value::Object(object) => {
            let wrapped = match object.values().next() {
                Some(Value::Array(items)) if object.len() == 1 => Some(items.clone()),
                _ => None,
            };
            match wrapped {
                Some(items) => objects_of(items),
                None => vec![object],
            }
        }
        _ => Vec::new(),
    })
}

fn objects_of(items: Vec<Value>) -> Vec<Map<String, Value>> {
    items
        .into_iter()
        .filter_map(|item| match item {
            Value::Object(object) => Some(object),
            _ => None,
        })
        .collect()
}
