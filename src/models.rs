//! Core data models shared by the loader, the backfill job, the stores and
//! the query pipeline.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// A song as persisted in the vector store.
///
/// `id` has the form `<category>-<index>` and never changes once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub categories: Vec<String>,
    #[serde(default)]
    pub info: SongInfo,
}

impl SongRecord {
    pub fn song_id(category: &str, index: usize) -> String {
        format!("{}-{}", category, index)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongInfo {
    /// Display label such as the hymn number; may be empty.
    #[serde(default, deserialize_with = "string_or_number")]
    pub number: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub meta: Map<String, Value>,
}

/// Bookkeeping written next to an embedding by the backfill job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingInfo {
    pub model: String,
    #[serde(default)]
    pub usage: Value,
    #[serde(default)]
    pub object: String,
}

/// A record returned by the similarity search, with its score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedSong {
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub categories: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub info: SongInfo,
    #[serde(default)]
    pub similarity: f64,
}

impl MatchedSong {
    pub fn from_record(record: SongRecord, similarity: f64) -> Self {
        Self {
            id: record.id,
            title: record.title,
            content: record.content,
            categories: record.categories,
            info: record.info,
            similarity,
        }
    }
}

/// One ranked result emitted by the generative model.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SongMatch {
    #[serde(default, deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub number: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub reason: String,
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Models and source data are loose about numbers vs strings; accept both.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn song_id_joins_category_and_index() {
        assert_eq!(SongRecord::song_id("cc", 12), "cc-12");
    }

    #[test]
    fn matched_song_tolerates_nulls() {
        let song: MatchedSong = serde_json::from_value(json!({
            "id": "cc-1",
            "title": null,
            "content": "text",
            "categories": null,
            "info": { "number": 45, "meta": null },
            "similarity": 0.81
        }))
        .unwrap();
        assert_eq!(song.title, "");
        assert!(song.categories.is_empty());
        assert_eq!(song.info.number, "45");
        assert!(song.info.meta.is_empty());
    }

    #[test]
    fn song_match_accepts_numeric_number() {
        let m: SongMatch =
            serde_json::from_value(json!({ "id": "x", "number": 7, "title": "T" })).unwrap();
        assert_eq!(m.number, "7");
        assert_eq!(m.reason, "");
    }
}
