//! Incremental collection of a "load more" listing.
//!
//! The listing grows in place as a script clicks its "load more" control, so
//! every poll re-extracts the whole list. The collector keeps the records it
//! has not seen before, in page order, and stops once a poll brings nothing
//! new. An iteration cap and a cancellation token bound the loop even when the
//! page never settles.
//!
//! # Termination
//!
//! | Reason | Items kept | Meaning |
//! |--------|------------|---------|
//! | `NoNewContent` | all | listing exhausted (normal end) |
//! | `MaxIterationsReached` | all | safety bound hit |
//! | `Cancelled` | all | shutdown requested |
//! | `PollFetchFailed` | all | a poll fetch failed |
//! | `MalformedRecord` | all | an extracted entry lacked `date`/`link` |
//! | `InitialFetchFailed` | none | the baseline fetch failed |

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::extraction::scope_html;
use crate::fetcher::{FetchDirective, FetchError, PageFetcher, SessionId};
use crate::models::Record;

/// Loop bounds for one collection run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Maximum number of polls after the baseline fetch.
    pub max_iterations: usize,
    /// Pause between polls so client-side rendering can settle.
    pub poll_delay: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            poll_delay: Duration::from_secs(3),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationReason {
    NoNewContent,
    MaxIterationsReached,
    Cancelled,
    InitialFetchFailed(FetchError),
    PollFetchFailed(FetchError),
    MalformedRecord(String),
}

impl TerminationReason {
    /// Whether the run ended because something went wrong.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            TerminationReason::InitialFetchFailed(_)
                | TerminationReason::PollFetchFailed(_)
                | TerminationReason::MalformedRecord(_)
        )
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationReason::NoNewContent => f.write_str("no new content"),
            TerminationReason::MaxIterationsReached => f.write_str("maximum iterations reached"),
            TerminationReason::Cancelled => f.write_str("cancelled"),
            TerminationReason::InitialFetchFailed(e) => write!(f, "initial fetch failed: {e}"),
            TerminationReason::PollFetchFailed(e) => write!(f, "poll fetch failed: {e}"),
            TerminationReason::MalformedRecord(m) => write!(f, "malformed record: {m}"),
        }
    }
}

/// Result of a run: whatever was collected plus why it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectOutcome {
    pub items: Vec<Record>,
    pub reason: TerminationReason,
    /// Poll fetches issued after the baseline.
    pub polls: usize,
}

/// Accumulated records and the links already seen.
///
/// Every link in `items` is in `seen` and vice versa.
#[derive(Debug, Default)]
struct CollectionState {
    items: Vec<Record>,
    seen: HashSet<String>,
    last_listing_len: usize,
}

impl CollectionState {
    /// Append the records whose link is new, in order. Returns how many.
    fn absorb(&mut self, fetched: Vec<Record>) -> usize {
        self.last_listing_len = fetched.len();
        let before = self.items.len();
        for record in fetched {
            if self.seen.insert(record.link.clone()) {
                self.items.push(record);
            }
        }
        self.items.len() - before
    }
}

enum StepFailure {
    Fetch(FetchError),
    Malformed(String),
}

pub struct IncrementalCollector<'a, F> {
    fetcher: &'a F,
    config: CollectorConfig,
    cancel: CancellationToken,
}

impl<'a, F: PageFetcher> IncrementalCollector<'a, F> {
    pub fn new(fetcher: &'a F, config: CollectorConfig, cancel: CancellationToken) -> Self {
        Self {
            fetcher,
            config,
            cancel,
        }
    }

    /// Fetch `url` once with `initial`, then keep polling with directives from
    /// `poll_directive` until the listing stops growing.
    ///
    /// The session is closed before returning, whatever the outcome.
    #[instrument(level = "info", skip_all, fields(%url, %session))]
    pub async fn collect<P>(
        &self,
        url: &str,
        initial: &FetchDirective,
        poll_directive: P,
        session: &SessionId,
    ) -> CollectOutcome
    where
        P: Fn(&SessionId) -> FetchDirective,
    {
        let mut state = CollectionState::default();
        let mut polls = 0usize;

        let reason = match self.fetch_records(url, initial).await {
            Err(StepFailure::Fetch(e)) => {
                error!(error = %e, "Initial fetch failed");
                TerminationReason::InitialFetchFailed(e)
            }
            Err(StepFailure::Malformed(m)) => {
                error!(reason = %m, "Initial listing is malformed");
                TerminationReason::MalformedRecord(m)
            }
            Ok(baseline) => {
                let count = state.absorb(baseline);
                info!(count, "Initial listing extracted");
                self.poll_until_settled(url, &poll_directive, session, &mut state, &mut polls)
                    .await
            }
        };

        self.fetcher.close_session(session).await;

        if reason.is_failure() {
            warn!(%reason, items = state.items.len(), polls, "Collection ended early");
        } else {
            info!(%reason, items = state.items.len(), polls, "Collection finished");
        }

        let items = match reason {
            TerminationReason::InitialFetchFailed(_) => Vec::new(),
            _ => state.items,
        };
        CollectOutcome {
            items,
            reason,
            polls,
        }
    }

    async fn poll_until_settled<P>(
        &self,
        url: &str,
        poll_directive: &P,
        session: &SessionId,
        state: &mut CollectionState,
        polls: &mut usize,
    ) -> TerminationReason
    where
        P: Fn(&SessionId) -> FetchDirective,
    {
        loop {
            if *polls >= self.config.max_iterations {
                warn!(max = self.config.max_iterations, "Iteration bound reached");
                return TerminationReason::MaxIterationsReached;
            }
            if self.cancel.is_cancelled() {
                return TerminationReason::Cancelled;
            }

            let directive = poll_directive(session);
            *polls += 1;
            info!(poll = *polls, "Loading more entries");

            let previous_len = state.last_listing_len;
            let fetched = match self.fetch_records(url, &directive).await {
                Ok(fetched) => fetched,
                Err(StepFailure::Fetch(e)) => {
                    error!(poll = *polls, error = %e, "Poll fetch failed");
                    return TerminationReason::PollFetchFailed(e);
                }
                Err(StepFailure::Malformed(m)) => {
                    error!(poll = *polls, reason = %m, "Poll returned a malformed entry");
                    return TerminationReason::MalformedRecord(m);
                }
            };

            let added = state.absorb(fetched);
            debug!(
                previous_len,
                listing_len = state.last_listing_len,
                added,
                "Listing polled"
            );
            if added == 0 {
                return TerminationReason::NoNewContent;
            }
            info!(added, total = state.items.len(), "New entries collected");

            if *polls < self.config.max_iterations && !self.config.poll_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return TerminationReason::Cancelled,
                    _ = sleep(self.config.poll_delay) => {}
                }
            }
        }
    }

    async fn fetch_records(
        &self,
        url: &str,
        directive: &FetchDirective,
    ) -> Result<Vec<Record>, StepFailure> {
        let page = self
            .fetcher
            .fetch(url, directive)
            .await
            .map_err(StepFailure::Fetch)?;

        let strategy = directive.extraction().ok_or_else(|| {
            StepFailure::Malformed("directive carries no extraction schema".to_string())
        })?;
        let html = match directive.css_selector() {
            Some(selector) => {
                scope_html(&page.html, selector).map_err(|e| StepFailure::Malformed(e.to_string()))?
            }
            None => page.html,
        };

        strategy
            .extract(&html)
            .iter()
            .enumerate()
            .map(|(i, object)| {
                Record::try_from(object)
                    .map_err(|e| StepFailure::Malformed(format!("entry {i}: {e}")))
            })
            .collect()
    }
}
