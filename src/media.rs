use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Playable catalog kinds. `person` results from the multi search are not
/// represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Movie,
    Tv,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Tv => "tv",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = anyhow::Error;
    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_lowercase().as_str() {
            "movie" => Ok(MediaType::Movie),
            "tv" => Ok(MediaType::Tv),
            _ => Err(anyhow!("media type must be 'movie' or 'tv'")),
        }
    }
}

/// A title as returned by the catalog list and search endpoints.
///
/// Every field except `id` is optional on the wire; absence of an image is a
/// filter condition for the callers, never a decoding error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub backdrop_path: Option<String>,
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub vote_average: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_air_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl MediaItem {
    /// The explicit `media_type`, else `movie` for items carrying a title and
    /// `tv` for everything else.
    pub fn derived_media_type(&self) -> &str {
        match present(&self.media_type) {
            Some(explicit) => explicit,
            None if present(&self.title).is_some() => "movie",
            None => "tv",
        }
    }

    /// `None` for non-playable results such as people.
    pub fn kind(&self) -> Option<MediaType> {
        self.derived_media_type().parse().ok()
    }

    pub fn dedup_key(&self) -> String {
        format!("{}-{}", self.derived_media_type(), self.id)
    }

    pub fn has_poster(&self) -> bool {
        present(&self.poster_path).is_some()
    }

    pub fn has_backdrop(&self) -> bool {
        present(&self.backdrop_path).is_some()
    }

    pub fn display_title(&self) -> &str {
        present(&self.title)
            .or_else(|| present(&self.name))
            .unwrap_or_default()
    }

    pub fn year(&self) -> Option<&str> {
        present(&self.release_date)
            .or_else(|| present(&self.first_air_date))
            .and_then(|d| d.get(..4))
    }
}

/// Width buckets served by the image CDN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSize {
    W92,
    W300,
    W500,
    Original,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::W92 => "w92",
            ImageSize::W300 => "w300",
            ImageSize::W500 => "w500",
            ImageSize::Original => "original",
        }
    }
}

pub fn image_url(base: &str, size: ImageSize, path: &str) -> String {
    format!("{}/{}{}", base.trim_end_matches('/'), size.as_str(), path)
}

/// Image URLs for the places an item is shown.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageSet {
    /// Poster thumbnail used in the suggestion dropdown.
    pub thumb: Option<String>,
    /// Carousel card art, backdrop preferred.
    pub card: Option<String>,
    /// Recommendation tile art, backdrop preferred.
    pub still: Option<String>,
    pub backdrop: Option<String>,
}

impl ImageSet {
    pub fn for_item(base: &str, item: &MediaItem) -> Self {
        let poster = present(&item.poster_path);
        let backdrop = present(&item.backdrop_path);
        let art = backdrop.or(poster);
        Self {
            thumb: poster.map(|p| image_url(base, ImageSize::W92, p)),
            card: art.map(|p| image_url(base, ImageSize::W500, p)),
            still: art.map(|p| image_url(base, ImageSize::W300, p)),
            backdrop: backdrop.map(|p| image_url(base, ImageSize::Original, p)),
        }
    }
}

/// Streaming embed address for a title.
pub fn embed_url(base: &str, kind: MediaType, id: i64) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), kind, id)
}
