use anyhow::{Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::tmdb::TMDB_BASE;

pub const IMAGE_BASE: &str = "https://image.tmdb.org/t/p/";
pub const EMBED_BASE: &str = "https://vidsrc.xyz/embed/";
const DEFAULT_BIND: &str = "0.0.0.0:3147";
const DEFAULT_DEBOUNCE_MS: u64 = 300;

#[derive(Debug, Clone)]
pub struct Config {
    pub tmdb_api_key: String,
    pub tmdb_base_url: String,
    pub image_base_url: String,
    pub embed_base_url: String,
    pub bind: SocketAddr,
    pub debounce: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let tmdb_api_key = env::var("TMDB_API_KEY")
            .ok()
            .filter(|s| !s.is_empty())
            .context("TMDB_API_KEY not set")?;
        let bind = env::var("NUFLIX_BIND")
            .unwrap_or_else(|_| DEFAULT_BIND.to_string())
            .parse()
            .context("NUFLIX_BIND must be a socket address")?;
        let debounce_ms = match env::var("NUFLIX_DEBOUNCE_MS") {
            Ok(v) => v
                .parse::<u64>()
                .context("NUFLIX_DEBOUNCE_MS must be a number of milliseconds")?,
            Err(_) => DEFAULT_DEBOUNCE_MS,
        };
        Ok(Self {
            tmdb_api_key,
            tmdb_base_url: env_or("TMDB_BASE_URL", TMDB_BASE),
            image_base_url: env_or("TMDB_IMAGE_BASE_URL", IMAGE_BASE),
            embed_base_url: env_or("NUFLIX_EMBED_BASE_URL", EMBED_BASE),
            bind,
            debounce: Duration::from_millis(debounce_ms),
        })
    }

    /// Defaults for everything but the credential.
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            tmdb_api_key: api_key.into(),
            tmdb_base_url: TMDB_BASE.to_string(),
            image_base_url: IMAGE_BASE.to_string(),
            embed_base_url: EMBED_BASE.to_string(),
            bind: SocketAddr::from(([0, 0, 0, 0], 3147)),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}
