//! Feed that pulls normalized records from an HTTP endpoint.
//!
//! The endpoint returns a JSON array of `RawRecord` objects. Channel
//! specific APIs (Telegram bots, Twitter search) sit behind that endpoint.

use async_trait::async_trait;
use reqwest::StatusCode;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;

use crate::error::FetchError;
use crate::feeds::decode_records;
use crate::pipeline::types::{FeedSource, RawRecord, SourceKind};

pub struct HttpFeed {
    name: String,
    kind: SourceKind,
    url: String,
    token: Option<SecretString>,
    client: reqwest::Client,
}

impl HttpFeed {
    pub fn new(kind: SourceKind, url: impl Into<String>, token: Option<SecretString>) -> Self {
        let url = url.into();
        Self {
            name: format!("{kind}:http:{url}"),
            kind,
            url,
            token,
            client: reqwest::Client::new(),
        }
    }

    fn transport(&self, reason: impl ToString) -> FetchError {
        FetchError::Transport {
            source_name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

#[async_trait]
impl FeedSource for HttpFeed {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self) -> Result<Vec<RawRecord>, FetchError> {
        let mut request = self.client.get(&self.url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| self.transport(e))?;

        match resp.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(FetchError::Auth {
                    source_name: self.name.clone(),
                });
            }
            status if !status.is_success() => {
                return Err(self.transport(format!("upstream returned {status}")));
            }
            _ => {}
        }

        let body = resp.bytes().await.map_err(|e| self.transport(e))?;
        let records = decode_records(&self.name, &body)?;

        debug!(url = %self.url, count = records.len(), "Fetched feed over HTTP");
        Ok(records)
    }
}
