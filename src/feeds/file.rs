//! Feed backed by a JSON file of normalized records.
//!
//! The file holds a JSON array of `RawRecord` objects. It is re-read on
//! every fetch, so an external normalizer can rewrite it between runs.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::FetchError;
use crate::feeds::decode_records;
use crate::pipeline::types::{FeedSource, RawRecord, SourceKind};

#[derive(Debug, Clone)]
pub struct JsonFileFeed {
    name: String,
    kind: SourceKind,
    path: PathBuf,
}

impl JsonFileFeed {
    pub fn new(kind: SourceKind, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            name: format!("{kind}:file:{}", path.display()),
            kind,
            path,
        }
    }
}

#[async_trait]
impl FeedSource for JsonFileFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError> {
        let body = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| FetchError::Transport {
                source_name: self.name.clone(),
                reason: e.to_string(),
            })?;

        let records = decode_records(&self.name, body.as_bytes())?;

        debug!(path = %self.path.display(), count = records.len(), "Read feed file");
        Ok(records)
    }
}
