//! Concrete `FeedSource` implementations and their construction from config.

pub mod file;
pub mod http;
pub mod mock;

use std::path::PathBuf;
use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

pub use file::JsonFileFeed;
pub use http::HttpFeed;
pub use mock::MockFeed;

use crate::error::FetchError;
use crate::pipeline::types::{FeedSource, RawRecord, SourceKind};

/// How to reach one configured feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedConfig {
    Mock { kind: SourceKind },
    File { kind: SourceKind, path: PathBuf },
    Http { kind: SourceKind, url: String },
}

/// Build one trait object per configured feed, in configuration order.
pub fn build_feeds(configs: &[FeedConfig], token: Option<&SecretString>) -> Vec<Arc<dyn FeedSource>> {
    configs
        .iter()
        .map(|config| -> Arc<dyn FeedSource> {
            match config {
                FeedConfig::Mock { kind } => Arc::new(MockFeed::new(*kind)),
                FeedConfig::File { kind, path } => Arc::new(JsonFileFeed::new(*kind, path.clone())),
                FeedConfig::Http { kind, url } => {
                    let token = token.map(|t| SecretString::from(t.expose_secret().to_string()));
                    Arc::new(HttpFeed::new(*kind, url.clone(), token))
                }
            }
        })
        .collect()
}

/// Decode a JSON array of records, one element at a time.
///
/// Only a payload that is not a JSON array fails the source. An element
/// that does not fit the record shape comes back as an empty record, which
/// validation rejects and the ingestor counts as malformed.
pub(crate) fn decode_records(source_name: &str, body: &[u8]) -> Result<Vec<RawRecord>, FetchError> {
    let elements: Vec<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| FetchError::Malformed {
            source_name: source_name.to_string(),
            reason: e.to_string(),
        })?;

    Ok(elements
        .into_iter()
        .enumerate()
        .map(|(index, element)| {
            serde_json::from_value::<RawRecord>(element).unwrap_or_else(|e| {
                warn!(source = %source_name, index, error = %e, "Undecodable record in feed payload");
                RawRecord::default()
            })
        })
        .collect())
}
