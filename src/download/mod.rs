pub mod mux;
pub mod pipeline;
pub mod playlist;
pub mod resolve;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;
use url::Url;

use crate::error::Error;

/// Anything that can GET a URL and hand back its body.
///
/// Non-2xx statuses and transport failures are both `Error::FetchFailed`.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error>;
}

pub struct DownloadClient {
    client: reqwest::Client,
}

impl DownloadClient {
    /// `timeout` bounds connecting and every read, so a stalled server can't hang a manifest fetch.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self, Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()
            .map_err(Error::HttpClient)?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetch for DownloadClient {
    async fn fetch(&self, url: &Url) -> Result<Bytes, Error> {
        let response = self
            .client
            .get(url.as_str())
            .send()
            .await
            .map_err(|err| Error::fetch_failed(url, err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::fetch_failed(url, format!("HTTP {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|err| Error::fetch_failed(url, err))?;

        debug!(%url, bytes = bytes.len(), "fetched");
        Ok(bytes)
    }
}

/// Fetches a manifest and decodes it as UTF-8.
pub async fn fetch_text(fetcher: &dyn Fetch, url: &Url) -> Result<String, Error> {
    let body = fetcher.fetch(url).await?;
    String::from_utf8(body.to_vec()).map_err(|_| Error::ManifestEncoding { url: url.clone() })
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    enum Response {
        Body(Bytes),
        Status(u16),
    }

    /// Serves canned responses and records how many requests overlapped.
    #[derive(Default)]
    pub struct MockFetcher {
        responses: HashMap<String, Response>,
        delay: Option<Duration>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        requests: Mutex<Vec<String>>,
    }

    impl MockFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_body(mut self, url: &str, body: impl Into<Bytes>) -> Self {
            self.responses.insert(url.to_string(), Response::Body(body.into()));
            self
        }

        pub fn with_status(mut self, url: &str, status: u16) -> Self {
            self.responses.insert(url.to_string(), Response::Status(status));
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<String> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Fetch for MockFetcher {
        async fn fetch(&self, url: &Url) -> Result<Bytes, Error> {
            self.requests.lock().unwrap().push(url.to_string());

            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            self.in_flight.fetch_sub(1, Ordering::SeqCst);

            match self.responses.get(url.as_str()) {
                Some(Response::Body(body)) => Ok(body.clone()),
                Some(Response::Status(status)) => Err(Error::fetch_failed(url, format!("HTTP {status}"))),
                None => Err(Error::fetch_failed(url, "HTTP 404 Not Found")),
            }
        }
    }

    #[tokio::test]
    async fn fetch_text_rejects_invalid_utf8() {
        let fetcher = MockFetcher::new().with_body("https://h/bad.m3u8", vec![0xffu8, 0xfe, 0x00]);
        let url = Url::parse("https://h/bad.m3u8").unwrap();

        let err = fetch_text(&fetcher, &url).await.unwrap_err();
        assert!(matches!(err, Error::ManifestEncoding { .. }));
    }

    #[tokio::test]
    async fn unknown_url_is_a_fetch_failure() {
        let fetcher = MockFetcher::new();
        let url = Url::parse("https://h/missing.m3u8").unwrap();

        match fetch_text(&fetcher, &url).await {
            Err(Error::FetchFailed { url: failed, .. }) => assert_eq!(failed, url),
            other => panic!("unexpected {other:?}"),
        }
    }
}
