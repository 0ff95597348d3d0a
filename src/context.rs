//! Retrieval constants, candidate formatting and prompt construction.
//!
//! Each matched song becomes one line of the form
//!
//! ```text
//! id=<id>,number=<number>,title=<title>,categories=<a,b>,content=<first 1000 chars>
//! ```
//!
//! and lines are joined by a `---` delimiter line. The assembled block is
//! bounded by a character budget: once the next candidate would push the
//! block past it, that candidate and all later ones are dropped.

use tracing::warn;

use crate::models::MatchedSong;

/// Minimum similarity a candidate must exceed to be retrieved.
pub const MATCH_THRESHOLD: f64 = 0.58;
/// Maximum number of candidates retrieved per query.
pub const MATCH_COUNT: usize = 30;
/// Shortest song content, in characters, eligible for retrieval.
pub const MIN_CONTENT_LENGTH: usize = 0;
/// Characters of song content carried into the prompt.
pub const CONTENT_CHAR_LIMIT: usize = 1000;

const DELIMITER: &str = "\n---\n";

/// Returns the first `limit` characters of `text`.
pub fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

/// Formats one candidate as a single context record.
pub fn format_candidate(song: &MatchedSong) -> String {
    format!(
        "id={},number={},title={},categories={},content={}",
        song.id,
        song.info.number,
        song.title,
        song.categories.join(","),
        truncate_chars(&song.content, CONTENT_CHAR_LIMIT)
    )
}

/// The assembled candidate block handed to the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct AssembledContext {
    pub text: String,
    /// Candidates that made it into `text`.
    pub included: usize,
    /// Candidates dropped by the count cap or the character budget.
    pub dropped: usize,
}

/// Accumulates candidate records under a character ceiling.
pub struct ContextBuilder {
    char_budget: usize,
    max_candidates: usize,
}

impl ContextBuilder {
    pub fn new(char_budget: usize) -> Self {
        Self {
            char_budget,
            max_candidates: MATCH_COUNT,
        }
    }

    pub fn assemble(&self, songs: &[MatchedSong]) -> AssembledContext {
        let mut text = String::new();
        let mut used = 0usize;
        let mut included = 0usize;

        for song in songs.iter().take(self.max_candidates) {
            let record = format_candidate(song);
            let cost = record.chars().count() + DELIMITER.len();
            if used + cost > self.char_budget {
                break;
            }
            text.push_str(&record);
            text.push_str(DELIMITER);
            used += cost;
            included += 1;
        }

        let dropped = songs.len() - included;
        if dropped > 0 {
            warn!(
                included,
                dropped,
                char_budget = self.char_budget,
                "context truncated, trailing candidates dropped"
            );
        }

        AssembledContext {
            text,
            included,
            dropped,
        }
    }
}

/// Builds the instruction prompt around the candidate block and the query.
///
/// The query is fenced by triple quotes so it cannot be mistaken for part
/// of the instructions.
pub fn build_prompt(context: &str, query: &str) -> String {
    format!(
        "Ca asistent, sarcina ta este să sortezi datele de intrare astfel incat continutul \
         cantecului sa fie exact cu subiectul specificat. Descrie rationamentul pentru care \
         acest cantec se potriveste cu subiectul. Rezultatul va fi un array json in results \
         cu urmatoarele campuri: id,number,title,reason.\n\
         \n\
         Lista cantece(id,title, categories, content):\n\
         {context}\n\
         \n\
         Afiseaza cantecele doar cu acest subiect: \"\"\"\n\
         {query}\n\
         \"\"\""
    )
}
