//! Summarization orchestration.
//!
//! Drives a [`Summarizer`] over a whole element set and coordinates with the
//! [`SummaryCache`]:
//!
//! 1. Fingerprint the document bytes.
//! 2. If the cached record carries the same fingerprint, return its
//!    summaries verbatim without calling any generation service.
//! 3. Otherwise summarize every element, type by type, preserving input
//!    order within each type.
//! 4. Replace the cache record with the complete result.
//!
//! The cache lock is held from step 1 to step 4, so a fingerprint check
//! never races a concurrent write. Element summarizations may run
//! concurrently (bounded by `concurrency`); the cache write always happens
//! after every one of them has completed.

use anyhow::{Context, Result};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::{fingerprint, SummaryCache};
use crate::models::{ContentElement, ElementType, SummarizedElement, SummarySet};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::summarize::Summarizer;

/// Outcome of one orchestration run.
#[derive(Debug, Clone)]
pub struct SummaryRun {
    pub fingerprint: String,
    pub summaries: SummarySet,
    /// `true` when the summaries came from a matching cache record.
    pub from_cache: bool,
}

pub struct SummarizationOrchestrator {
    summarizer: Arc<dyn Summarizer>,
    cache: Mutex<Box<dyn SummaryCache>>,
    concurrency: usize,
    original_chars: usize,
}

impl SummarizationOrchestrator {
    pub fn new(summarizer: Arc<dyn Summarizer>, cache: Box<dyn SummaryCache>) -> Self {
        Self {
            summarizer,
            cache: Mutex::new(cache),
            concurrency: 1,
            original_chars: 500,
        }
    }

    /// Maximum number of elements summarized at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Characters of the original payload kept on each summary.
    pub fn with_original_chars(mut self, chars: usize) -> Self {
        self.original_chars = chars;
        self
    }

    /// Summarize `elements` extracted from `document`, reusing the cache when
    /// the document bytes are unchanged.
    ///
    /// # Errors
    ///
    /// Only cache storage failures are returned. Individual element failures
    /// are absorbed by the summarizer's fallbacks.
    pub async fn summarize_all(
        &self,
        document: &[u8],
        elements: &[ContentElement],
        reporter: &dyn ProgressReporter,
    ) -> Result<SummaryRun> {
        let fingerprint = fingerprint(document);
        let cache = self.cache.lock().await;

        let cached = cache.load().context("Failed to read summary cache")?;
        if let Some(entry) = cached {
            if entry.fingerprint == fingerprint {
                info!(
                    fingerprint = %fingerprint,
                    summaries = entry.summaries.len(),
                    "summary cache hit"
                );
                reporter.report(ProgressEvent::CacheHit {
                    elements: entry.summaries.len(),
                });
                return Ok(SummaryRun {
                    fingerprint,
                    summaries: entry.summaries,
                    from_cache: true,
                });
            }
            debug!(
                stored = %entry.fingerprint,
                current = %fingerprint,
                "summary cache is stale"
            );
        }

        let mut summaries = SummarySet::new();
        for element_type in ElementType::ALL {
            let group: Vec<&ContentElement> = elements
                .iter()
                .filter(|e| e.element_type() == element_type)
                .collect();
            if group.is_empty() {
                continue;
            }
            info!(
                element_type = %element_type,
                count = group.len(),
                "summarizing elements"
            );
            for summarized in self.summarize_group(element_type, &group, reporter).await {
                summaries.push(summarized);
            }
        }

        cache
            .save(&fingerprint, &summaries)
            .context("Failed to write summary cache")?;

        Ok(SummaryRun {
            fingerprint,
            summaries,
            from_cache: false,
        })
    }

    /// Summarize one type's elements. `buffered` yields results in input
    /// order even when later elements finish first.
    async fn summarize_group(
        &self,
        element_type: ElementType,
        group: &[&ContentElement],
        reporter: &dyn ProgressReporter,
    ) -> Vec<SummarizedElement> {
        let total = group.len() as u64;
        let mut done = 0u64;
        let mut out = Vec::with_capacity(group.len());

        let mut results = stream::iter(group.iter().copied())
            .map(|element| {
                let summarizer = self.summarizer.clone();
                async move {
                    let summary = summarizer.summarize(element).await;
                    SummarizedElement::from_element(element, summary, self.original_chars)
                }
            })
            .buffered(self.concurrency);

        while let Some(summarized) = results.next().await {
            done += 1;
            reporter.report(ProgressEvent::Summarizing {
                element_type,
                n: done,
                total,
            });
            out.push(summarized);
        }
        out
    }

    /// Drop the cached record so the next run regenerates every summary.
    pub async fn clear_cache(&self) -> Result<()> {
        self.cache.lock().await.invalidate()
    }
}
