use crate::player::Player;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;

#[async_trait]
pub trait EmbedApi: Send + Sync {
    async fn fetch_document(&self, url: &str) -> Result<String>;
}

#[derive(Debug, Clone, Default)]
pub struct EmbedClient {
    client: Client,
}

impl EmbedClient {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EmbedApi for EmbedClient {
    async fn fetch_document(&self, url: &str) -> Result<String> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .context("embed request failed")?;
        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("{} -> {}", url, status));
        }
        res.text().await.context("reading embed body failed")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLoad {
    /// No player session is open.
    NoSession,
    /// The session moved to another title while the document was loading.
    Superseded,
    Ready { source: String, html: String, removed: usize },
}

/// Load the open session's embed document and run the ad observer over it.
pub async fn load_frame(player: &Player, embed: &dyn EmbedApi) -> Result<FrameLoad> {
    let Some(source) = player.frame_source().await else {
        return Ok(FrameLoad::NoSession);
    };
    let document = embed.fetch_document(&source).await?;
    let Some(observer) = player.frame_loaded(&source).await else {
        return Ok(FrameLoad::Superseded);
    };
    // Parsed documents are not Send; keep them on a blocking thread.
    let stripped = tokio::task::spawn_blocking(move || observer.process_document(&document))
        .await
        .context("ad stripping task failed")?;
    if stripped.removed > 0 {
        info!("Removed {} ad elements from {}", stripped.removed, source);
    }
    Ok(FrameLoad::Ready {
        html: with_base_href(&stripped.html, &source),
        source,
        removed: stripped.removed,
    })
}

/// Point relative URLs of a proxied document back at `source`: insert a
/// `<base href>` right after the opening `<head>` tag unless the head already
/// declares one.
pub fn with_base_href(html: &str, source: &str) -> String {
    let base = format!(
        r#"<base href="{}">"#,
        source.replace('&', "&amp;").replace('"', "&quot;")
    );
    let lower = html.to_ascii_lowercase();
    let Some(head_start) = find_tag(&lower, "<head", 0) else {
        return format!("{base}{html}");
    };
    let Some(head_end) = lower[head_start..].find('>').map(|i| head_start + i + 1) else {
        return format!("{base}{html}");
    };
    let head_close = lower[head_end..]
        .find("</head")
        .map(|i| head_end + i)
        .unwrap_or(lower.len());
    if find_tag(&lower[..head_close], "<base", head_end).is_some() {
        return html.to_string();
    }
    let mut out = String::with_capacity(html.len() + base.len());
    out.push_str(&html[..head_end]);
    out.push_str(&base);
    out.push_str(&html[head_end..]);
    out
}

/// Find `tag` as a whole element name, so `<head` does not match `<header`.
fn find_tag(lower: &str, tag: &str, from: usize) -> Option<usize> {
    let mut at = from;
    while let Some(i) = lower[at..].find(tag) {
        let start = at + i;
        let next = lower[start + tag.len()..].chars().next();
        if matches!(next, Some('>' | '/' | ' ' | '\t' | '\n' | '\r')) {
            return Some(start);
        }
        at = start + tag.len();
    }
    None
}
