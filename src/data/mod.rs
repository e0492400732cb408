//! Core data models for the Marvel catalog
//!
//! This module contains the characters and comics returned by the Marvel API,
//! the response envelope they arrive in, and the client that fetches them.

pub mod marvel;

pub use marvel::{MarvelApiConfig, MarvelClient, MarvelError, MarvelService};

use serde::{Deserialize, Serialize};

/// Image extension assumed when rebuilding thumbnails from the local store
pub const DEFAULT_IMAGE_EXTENSION: &str = "jpg";

/// Envelope wrapping every Marvel API response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarvelResponse<T> {
    /// HTTP status code echoed by the API
    pub code: u16,
    /// Human-readable status
    pub status: String,
    #[serde(default)]
    pub attribution_text: Option<String>,
    #[serde(default)]
    pub etag: Option<String>,
    /// The page of results
    pub data: MarvelDataContainer<T>,
}

/// A page of results
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarvelDataContainer<T> {
    pub offset: u32,
    pub limit: u32,
    pub total: u32,
    pub count: u32,
    pub results: Vec<T>,
}

/// A Marvel character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Character {
    /// Unique character id
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Last modification date as reported by the API
    #[serde(default)]
    pub modified: String,
    pub thumbnail: MarvelImage,
    #[serde(default, rename = "resourceURI")]
    pub resource_uri: String,
    #[serde(default)]
    pub comics: ResourceList,
    #[serde(default)]
    pub series: ResourceList,
    #[serde(default)]
    pub stories: ResourceList,
    #[serde(default)]
    pub events: ResourceList,
    #[serde(default)]
    pub urls: Vec<MarvelUrl>,
}

impl Character {
    /// Builds a character carrying only an id, a name, and a thumbnail
    ///
    /// Counts and lists are left empty.
    pub fn minimal(id: i64, name: impl Into<String>, thumbnail: MarvelImage) -> Self {
        Self {
            id,
            name: name.into(),
            description: String::new(),
            modified: String::new(),
            thumbnail,
            resource_uri: String::new(),
            comics: ResourceList::default(),
            series: ResourceList::default(),
            stories: ResourceList::default(),
            events: ResourceList::default(),
            urls: Vec::new(),
        }
    }
}

/// A comic issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comic {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub thumbnail: MarvelImage,
}

/// An image reference split into path and extension, as the API returns it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarvelImage {
    pub path: String,
    pub extension: String,
}

impl MarvelImage {
    pub fn new(path: impl Into<String>, extension: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            extension: extension.into(),
        }
    }

    /// Splits a full image URL such as `http://i.annihil.us/u/prod/x.jpg`
    ///
    /// A URL without an extension keeps the whole string as the path and
    /// assumes `jpg`.
    pub fn from_url(url: &str) -> Self {
        let file_start = url.rfind('/').map_or(0, |i| i + 1);
        match url[file_start..].rfind('.') {
            Some(dot) => {
                let split = file_start + dot;
                Self::new(&url[..split], &url[split + 1..])
            }
            None => Self::new(url, DEFAULT_IMAGE_EXTENSION),
        }
    }

    /// Full image URL, or `None` when there is no path
    pub fn url(&self) -> Option<String> {
        if self.path.is_empty() {
            return None;
        }
        Some(format!("{}.{}", self.path, self.extension))
    }

    /// Same as [`MarvelImage::url`] with `http://` upgraded to `https://`
    pub fn secure_url(&self) -> Option<String> {
        self.url().map(|url| url.replacen("http://", "https://", 1))
    }
}

/// Summary list of related resources (comics, series, stories, events)
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    /// Total number of related resources
    #[serde(default)]
    pub available: u32,
    #[serde(default, rename = "collectionURI")]
    pub collection_uri: String,
    #[serde(default)]
    pub items: Vec<ResourceSummary>,
    /// Number of items included in `items`
    #[serde(default)]
    pub returned: u32,
}

impl ResourceList {
    /// A list that only knows how many resources exist
    pub fn with_available(available: u32) -> Self {
        Self {
            available,
            ..Self::default()
        }
    }
}

/// A single related resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSummary {
    #[serde(default, rename = "resourceURI")]
    pub resource_uri: String,
    pub name: String,
    /// Story type (`cover`, `interiorStory`), only present on stories
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
}

/// A public web link for a character
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarvelUrl {
    #[serde(rename = "type")]
    pub kind: UrlKind,
    pub url: String,
}

/// Kinds of character links; unrecognised values map to `Unknown`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlKind {
    Detail,
    Wiki,
    Comiclink,
    #[serde(other)]
    Unknown,
}
