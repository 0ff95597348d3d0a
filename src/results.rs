//! Progressive extraction of ranked results from a streamed answer.
//!
//! The model answers with `{"results":[{id,number,title,reason}, ...]}`,
//! one token at a time. [`ResultTracker`] accumulates the text and re-parses
//! it after every fragment, keeping the last non-empty result list so a
//! failed or empty parse never wipes what is already on screen.

use serde_json::Value;

use crate::models::SongMatch;
use crate::partial_json::parse_partial;

/// Extracts the complete leading elements of `results` from a document
/// prefix, in arrival order.
///
/// Returns `None` when nothing is recoverable yet: malformed text, no
/// `results` key, or no complete element.
pub fn parse_results(text: &str) -> Option<Vec<SongMatch>> {
    let document = parse_partial(text)?;
    let items = document.get("results")?.as_array()?;

    let matches: Vec<SongMatch> = items
        .iter()
        .filter(|item| item.is_object())
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect();

    if matches.is_empty() {
        None
    } else {
        Some(matches)
    }
}

/// Accumulates streamed fragments and holds the best parse so far.
#[derive(Debug, Default)]
pub struct ResultTracker {
    buffer: String,
    latest: Option<Vec<SongMatch>>,
}

impl ResultTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a fragment. Returns `true` if the visible results changed.
    pub fn push(&mut self, fragment: &str) -> bool {
        self.buffer.push_str(fragment);
        match parse_results(&self.buffer) {
            Some(parsed) if self.latest.as_ref() != Some(&parsed) => {
                self.latest = Some(parsed);
                true
            }
            _ => false,
        }
    }

    pub fn latest(&self) -> Option<&[SongMatch]> {
        self.latest.as_deref()
    }

    /// The raw accumulated text.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    /// Whether the accumulated text is a complete JSON document.
    pub fn is_complete(&self) -> bool {
        serde_json::from_str::<Value>(&self.buffer).is_ok()
    }
}
