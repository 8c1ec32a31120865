//! Summarization and ingest progress reporting.
//!
//! Reports observable progress during `mrag ingest` so users see how many
//! elements are being summarized, whether the cache was reused, and when the
//! index is populated. Progress is emitted on **stderr** so stdout remains
//! parseable for scripts.

use std::io::Write;

use crate::models::ElementType;

/// A single progress event.
#[derive(Clone, Debug)]
pub enum ProgressEvent {
    /// A valid cache record was found; no summaries will be generated.
    CacheHit { elements: usize },
    /// `n` of `total` elements of this type have been summarized.
    Summarizing {
        element_type: ElementType,
        n: u64,
        total: u64,
    },
    /// Summaries are being written to the knowledge index.
    Indexing { documents: u64 },
    Done,
}

/// Reports progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the orchestrator and ingest driver.
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "summarize text  12 / 1,234 elements".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::CacheHit { elements } => {
                format!(
                    "summarize  cache hit, reusing {} summaries\n",
                    format_number(*elements as u64)
                )
            }
            ProgressEvent::Summarizing {
                element_type,
                n,
                total,
            } => format!(
                "summarize {}  {} / {} elements\n",
                element_type,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Indexing { documents } => {
                format!("index  writing {} documents\n", format_number(*documents))
            }
            ProgressEvent::Done => "done\n".to_string(),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::CacheHit { elements } => serde_json::json!({
                "event": "progress",
                "phase": "cache_hit",
                "elements": elements
            }),
            ProgressEvent::Summarizing {
                element_type,
                n,
                total,
            } => serde_json::json!({
                "event": "progress",
                "phase": "summarizing",
                "element_type": element_type,
                "n": n,
                "total": total
            }),
            ProgressEvent::Indexing { documents } => serde_json::json!({
                "event": "progress",
                "phase": "indexing",
                "documents": documents
            }),
            ProgressEvent::Done => serde_json::json!({ "event": "done" }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    /// Parse the `--progress` flag value.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" | "none" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
