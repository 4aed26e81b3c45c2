use async_trait::async_trait;
use chrono::Local;
use rand::seq::IndexedRandom;
use reqwest::{header::USER_AGENT, Client};

use crate::{info_time, Error, Result};

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.82 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Firefox/86.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.82 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Firefox/86.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/89.0.4389.82 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Firefox/86.0 Safari/537.36",
];

/// Status and body of a fetched search page. Status checks are left to the caller.
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, search_query: &str) -> Result<FetchResponse>;
}

/// Fetches `{base}/{query}/k0` over HTTP with a rotating User-Agent.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    base: String,
}

impl HttpFetcher {
    pub fn new(client: Client, base: impl Into<String>) -> Self {
        Self {
            client,
            base: base.into(),
        }
    }

    pub fn search_url(&self, search_query: &str) -> String {
        format!("{}/{}/k0", self.base.trim_end_matches('/'), search_query)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, search_query: &str) -> Result<FetchResponse> {
        let start_time = Local::now();
        let url = self.search_url(search_query);
        info_time!("Fetching {}", url);

        let res = self
            .client
            .get(&url)
            .header(USER_AGENT, random_user_agent())
            .send()
            .await
            .map_err(Error::FetchTransport)?;
        let status = res.status().as_u16();
        let body = res.text().await.map_err(Error::FetchTransport)?;

        info_time!(start_time, "Fetched {} chars for {}", body.len(), url);
        Ok(FetchResponse { status, body })
    }
}

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_url_appends_query_and_suffix() {
        let fetcher = HttpFetcher::new(Client::new(), "https://www.kleinanzeigen.de/");
        assert_eq!(
            fetcher.search_url("s-nikon-z"),
            "https://www.kleinanzeigen.de/s-nikon-z/k0"
        );
    }

    #[tokio::test]
    async fn unreachable_host_is_a_fetch_error() {
        let fetcher = HttpFetcher::new(Client::new(), "http://127.0.0.1:1");
        let err = fetcher.fetch("s-nikon-z").await.unwrap_err();
        assert!(matches!(err, Error::FetchTransport(_)));
    }

    #[test]
    fn user_agent_comes_from_the_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }
}
