use crate::errors::{CrawlerError, Result};
use log::{debug, warn};
use reqwest::Client;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const REQUEST_ATTEMPTS: u32 = 3;
const REQUEST_INTERVAL: Duration = Duration::from_secs(1);

/// HTTP client shared by the scrapers: paced, retrying and cache-averse.
/// The bank's CDN is known to serve stale copies of the rates page.
pub struct HttpClient {
    client: Client,
    last_request: Mutex<Option<Instant>>,
    log_response_text: bool,
}

impl HttpClient {
    pub fn new(user_agent: &str, log_response_text: bool) -> Result<Self> {
        let mut builder = Client::builder().timeout(Duration::from_secs(30));

        if !user_agent.is_empty() {
            builder = builder.user_agent(user_agent);
        }

        let client = builder.build().map_err(|e| CrawlerError::RequestError(e))?;

        Ok(Self {
            client,
            last_request: Mutex::new(None),
            log_response_text,
        })
    }

    /// Keep at least one second between requests to the source site
    async fn wait_for_rate_limit(&self) {
        let now = Instant::now();
        let should_wait = {
            let mut last = self.last_request.lock().unwrap();
            let should_wait = if let Some(instant) = *last {
                let elapsed = instant.elapsed();
                if elapsed < REQUEST_INTERVAL {
                    Some(REQUEST_INTERVAL - elapsed)
                } else {
                    None
                }
            } else {
                None
            };
            *last = Some(now);
            should_wait
        };

        if let Some(wait_time) = should_wait {
            debug!("Waiting {:?} before the next request", wait_time);
            tokio::time::sleep(wait_time).await;
        }
    }

    async fn try_get_text(&self, url: &str) -> Result<String> {
        let text = self.get(url).await?.text().await?;
        if self.log_response_text {
            debug!("{}", text);
        }
        Ok(text)
    }

    async fn try_get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header("Cache-Control", "no-cache, no-store, must-revalidate")
            .header("Pragma", "no-cache")
            .header("Expires", "0")
            .send()
            .await?
            .error_for_status()?;
        Ok(response)
    }

    /// GET a page as text, retrying a bounded number of times
    pub async fn get_text(&self, url: &str) -> Result<String> {
        debug!("URL to get: {}", url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.wait_for_rate_limit().await;
            debug!("Attempt {} to get a response...", attempt);

            match self.try_get_text(url).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < REQUEST_ATTEMPTS => {
                    warn!("Request to {} failed: {}", url, e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// GET a file as raw bytes, retrying a bounded number of times
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        debug!("URL to download: {}", url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            self.wait_for_rate_limit().await;
            debug!("Attempt {} to download the file...", attempt);

            match self.try_get_bytes(url).await {
                Ok(content) => return Ok(content),
                Err(e) if attempt < REQUEST_ATTEMPTS => {
                    warn!("Download of {} failed: {}", url, e);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
