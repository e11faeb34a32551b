//! Run the catalog flows against the live API and print what the front end
//! would receive.
//! Usage:
//!   cargo run --bin catalog_cli -- search <query>
//!   cargo run --bin catalog_cli -- suggest <query>
//!   cargo run --bin catalog_cli -- recs <movie|tv> <tmdb_id>
//!   cargo run --bin catalog_cli -- strip <embed_url>
//! Requires TMDB_API_KEY in the environment (.env supported) except for `strip`.

use anyhow::{Context, Result};
use dotenvy::dotenv;
use nuflix::adblock::{AdStripper, FrameObserver};
use nuflix::config::Config;
use nuflix::embed::{EmbedApi, EmbedClient};
use nuflix::media::{MediaItem, MediaType};
use nuflix::search;
use nuflix::tmdb::{TmdbApi, TmdbClient};
use serde_json::json;
use std::env;

fn usage() -> anyhow::Error {
    anyhow::anyhow!("usage: catalog_cli <search|suggest|recs|strip> ...")
}

fn summarize(items: &[MediaItem]) -> serde_json::Value {
    json!(items
        .iter()
        .map(|i| json!({
            "key": i.dedup_key(),
            "title": i.display_title(),
            "year": i.year(),
            "poster": i.poster_path,
        }))
        .collect::<Vec<_>>())
}

fn client() -> Result<TmdbClient> {
    Ok(TmdbClient::from_config(&Config::from_env()?))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv();
    let args: Vec<String> = env::args().skip(1).collect();
    let command = args.first().ok_or_else(usage)?;

    let output = match command.as_str() {
        "search" => {
            let query = args[1..].join(" ");
            let results = search::aggregate(&client()?, &query).await?;
            json!({ "query": query, "count": results.len(), "results": summarize(&results) })
        }
        "suggest" => {
            let query = args[1..].join(" ");
            let results = search::suggest(&client()?, &query).await?;
            json!({ "query": query, "suggestions": summarize(&results) })
        }
        "recs" => {
            let kind: MediaType = args.get(1).ok_or_else(usage)?.parse()?;
            let id: i64 = args
                .get(2)
                .ok_or_else(usage)?
                .parse()
                .context("tmdb id must be numeric")?;
            let recs: Vec<MediaItem> = client()?
                .recommendations(kind, id)
                .await?
                .into_iter()
                .filter(MediaItem::has_poster)
                .collect();
            json!({ "source": format!("{kind}/{id}"), "recommendations": summarize(&recs) })
        }
        "strip" => {
            let url = args.get(1).ok_or_else(usage)?;
            let html = EmbedClient::new().fetch_document(url).await?;
            let mut observer = FrameObserver::new(AdStripper::new()?);
            observer.attach(url);
            observer.on_load(url);
            let stripped = observer.process_document(&html);
            json!({ "url": url, "bytes": html.len(), "removed": stripped.removed })
        }
        _ => return Err(usage()),
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
