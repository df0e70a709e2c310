use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use rand::seq::IndexedRandom as _;
use reqwest::header::{ACCEPT_LANGUAGE, CONNECTION, HeaderMap, HeaderValue, USER_AGENT};

use crate::error::FetchError;
use crate::formats::Location;

pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

pub const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/111.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/111.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/111.0.0.0 Safari/537.36",
];

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, location: &Location) -> Result<Vec<u8>, FetchError>;
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// One session per crawl: the user agent is picked once and the connection
/// pool is shared by every page of the story.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    user_agent: &'static str,
}

impl HttpFetcher {
    pub fn new() -> anyhow::Result<Self> {
        let user_agent = random_user_agent();

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(user_agent));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .redirect(reqwest::redirect::Policy::limited(10))
            .default_headers(headers)
            .build()
            .context("build story http client")?;

        tracing::debug!(user_agent, "created http session");
        Ok(Self { client, user_agent })
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, location: &Location) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(location.url().clone())
            .send()
            .await
            .map_err(|source| FetchError::Request {
                location: location.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                location: location.to_string(),
                status,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request {
                location: location.to_string(),
                source,
            })?;
        Ok(bytes.to_vec())
    }
}
