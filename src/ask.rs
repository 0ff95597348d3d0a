//! `songsearch ask`: run one query in-process and print ranked songs as
//! soon as each one is fully received.

use anyhow::{bail, Result};
use futures::StreamExt;
use serde_json::json;

use crate::config::Config;
use crate::error::PipelineError;
use crate::models::SongMatch;
use crate::pipeline::QueryPipeline;
use crate::results::ResultTracker;

pub async fn run_ask(config: &Config, query: &str, raw: bool) -> Result<()> {
    let pipeline = QueryPipeline::from_config(config.clone()).await?;

    let mut answer = match pipeline.handle(Some(json!({ "prompt": query }))).await {
        Ok(answer) => answer,
        Err(PipelineError::User { message, data }) => match data {
            Some(data) => bail!("{}: {}", message, data),
            None => bail!("{}", message),
        },
        Err(err) => return Err(err.into()),
    };

    let mut tracker = ResultTracker::new();
    let mut printed = 0usize;
    while let Some(chunk) = answer.next().await {
        if raw {
            print!("{}", chunk);
        }
        if tracker.push(&chunk) && !raw {
            let latest = tracker.latest().unwrap_or_default();
            for (rank, song) in latest.iter().enumerate().skip(printed) {
                print_match(rank + 1, song);
            }
            printed = latest.len();
        }
    }

    if raw {
        println!();
    } else if printed == 0 {
        println!("No matching songs.");
    }
    if !tracker.is_complete() {
        eprintln!("Warning: answer ended before the result document was complete");
    }
    Ok(())
}

fn print_match(rank: usize, song: &SongMatch) {
    if song.number.is_empty() {
        println!("{}. {} [{}]", rank, song.title, song.id);
    } else {
        println!("{}. #{} {} [{}]", rank, song.number, song.title, song.id);
    }
    if !song.reason.is_empty() {
        println!("   {}", song.reason);
    }
}
