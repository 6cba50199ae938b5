use std::collections::HashSet;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Catalog-assigned track identifier.
pub type TrackId = i64;

/// A catalog track as the core sees it. The catalog owns these records; the
/// core only reads them and may request deletion of an entry the daemon
/// proved unplayable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    /// Identity assigned by the external content provider.
    pub external_id: String,
    /// File extension including the leading dot, e.g. `.mp3`.
    pub extension: String,
}

impl Track {
    /// Protocol-level locator: the external identity encoded
    /// filesystem-safe, with the extension appended.
    pub fn locator(&self) -> String {
        format!(
            "{}{}",
            URL_SAFE_NO_PAD.encode(self.external_id.as_bytes()),
            self.extension
        )
    }
}

/// Decode a locator back into the catalog's (external identity, extension).
/// Returns `None` for locators this crate did not produce.
pub fn decode_locator(locator: &str) -> Option<(String, String)> {
    let (basename, extension) = match locator.rfind('.') {
        Some(pos) => locator.split_at(pos),
        None => (locator, ""),
    };
    let raw = URL_SAFE_NO_PAD.decode(basename).ok()?;
    let external_id = String::from_utf8(raw).ok()?;
    Some((external_id, extension.to_string()))
}

/// Capability interface to the external track catalog.
#[async_trait]
pub trait Catalog: Send + Sync {
    async fn get(&self, id: TrackId) -> Result<Option<Track>, CatalogError>;

    async fn find(
        &self,
        external_id: &str,
        extension: &str,
    ) -> Result<Option<Track>, CatalogError>;

    async fn all_ids(&self) -> Result<HashSet<TrackId>, CatalogError>;

    /// Remove a catalog entry. Only invoked when the daemon rejects the
    /// entry's locator as unplayable.
    async fn delete(&self, id: TrackId) -> Result<(), CatalogError>;
}
