//! Corpus loader.
//!
//! The song source publishes five JSON documents under one base URL. Each
//! is keyed by category and indexed by the song's position in it:
//!
//! | File | Shape |
//! |------|-------|
//! | `texts.json` | `{category: [text, ...]}` |
//! | `titles.json` | `{category: [title, ...]}` |
//! | `numbers.json` | `{category: [number, ...]}` |
//! | `meta.json` | `{category: [{...}, ...]}` |
//! | `themeGrouped2.json` | `{category: {theme: [index, ...]}}` |
//!
//! `texts.json` defines the corpus; the others are looked up by category and
//! index and default to empty when absent. Theme groups become the
//! `categories` of each song.

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

use crate::config::Config;
use crate::models::{SongInfo, SongRecord};
use crate::store;

type Indexed = BTreeMap<String, Vec<Value>>;

/// Raw source documents.
#[derive(Debug, Default)]
pub struct SourceData {
    pub texts: Indexed,
    pub titles: Indexed,
    pub numbers: Indexed,
    pub meta: Indexed,
    pub themes: BTreeMap<String, BTreeMap<String, Vec<Value>>>,
}

/// Fetch the corpus and upsert it into the configured store.
pub async fn run_load(config: &Config, dry_run: bool) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()?;
    let source = fetch_source(&client, &config.loader.base_url).await?;
    let songs = build_records(&source);

    if dry_run {
        println!("load (dry-run)");
        println!("  songs: {}", songs.len());
        return Ok(());
    }

    let store = store::create_store(config).await?;
    let written = store.upsert_songs(&songs).await?;

    println!("load");
    println!("  categories: {}", source.texts.len());
    println!("  songs upserted: {}", written);
    Ok(())
}

pub async fn fetch_source(client: &reqwest::Client, base_url: &str) -> Result<SourceData> {
    Ok(SourceData {
        texts: fetch_json(client, base_url, "texts.json").await?,
        titles: fetch_json(client, base_url, "titles.json").await?,
        numbers: fetch_json(client, base_url, "numbers.json").await?,
        meta: fetch_json(client, base_url, "meta.json").await?,
        themes: fetch_json(client, base_url, "themeGrouped2.json").await?,
    })
}

async fn fetch_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    base_url: &str,
    file: &str,
) -> Result<T> {
    let url = format!("{}/{}", base_url.trim_end_matches('/'), file);
    let response = client
        .get(&url)
        .send()
        .await
        .with_context(|| format!("failed to fetch {}", url))?;

    let status = response.status();
    if !status.is_success() {
        bail!("fetching {} failed ({})", url, status);
    }
    response
        .json()
        .await
        .with_context(|| format!("failed to parse {}", url))
}

/// Flattens the source documents into records with theme categories.
pub fn build_records(source: &SourceData) -> Vec<SongRecord> {
    let mut songs = Vec::new();
    for (category, texts) in &source.texts {
        for (index, text) in texts.iter().enumerate() {
            songs.push(SongRecord {
                id: SongRecord::song_id(category, index),
                title: text_at(&source.titles, category, index),
                content: text_value(Some(text)),
                categories: Vec::new(),
                info: SongInfo {
                    number: text_at(&source.numbers, category, index),
                    meta: meta_at(&source.meta, category, index),
                },
            });
        }
    }

    let positions: HashMap<String, usize> = songs
        .iter()
        .enumerate()
        .map(|(pos, song)| (song.id.clone(), pos))
        .collect();

    for (category, themes) in &source.themes {
        for (theme, indices) in themes {
            for index in indices {
                let id = format!("{}-{}", category, text_value(Some(index)));
                let Some(&pos) = positions.get(&id) else {
                    continue;
                };
                let categories = &mut songs[pos].categories;
                if !categories.contains(theme) {
                    categories.push(theme.clone());
                }
            }
        }
    }

    songs
}

fn text_at(table: &Indexed, category: &str, index: usize) -> String {
    text_value(table.get(category).and_then(|items| items.get(index)))
}

fn meta_at(table: &Indexed, category: &str, index: usize) -> Map<String, Value> {
    match table.get(category).and_then(|items| items.get(index)) {
        Some(Value::Object(map)) => map.clone(),
        _ => Map::new(),
    }
}

fn text_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
