//! The GET-with-timeout collaborator used for segment bodies.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::RANGE;
use tracing::trace;
use url::Url;

use crate::error::FetchFailure;
use crate::manifest::ByteRange;

#[async_trait]
pub trait SegmentTransport: Send + Sync {
    /// Fetch the full body of `url` (or the given byte range of it).
    ///
    /// Non-2xx responses, timeouts and short bodies are failures.
    async fn get(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        timeout: Duration,
    ) -> Result<Bytes, FetchFailure>;
}

#[derive(Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SegmentTransport for HttpTransport {
    async fn get(
        &self,
        url: &Url,
        range: Option<ByteRange>,
        timeout: Duration,
    ) -> Result<Bytes, FetchFailure> {
        let mut request = self.client.get(url.clone()).timeout(timeout);
        if let Some(range) = range {
            request = request.header(RANGE, range.header_value());
        }

        let response = request
            .send()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchFailure::HttpStatus(status));
        }

        let expected = response.content_length();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchFailure::from_reqwest(&e))?;

        if let Some(expected) = expected
            && body.len() as u64 != expected
        {
            return Err(FetchFailure::Truncated {
                expected,
                actual: body.len() as u64,
            });
        }

        trace!(url = %url, bytes = body.len(), "Fetched segment body");
        Ok(body)
    }
}
