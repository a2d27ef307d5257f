//! Network tier: the pluggable "fetch bytes for a location" primitive.

use crate::CacheKey;
use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use quire_config::HttpConfig;
use std::io::Read;

/// Fetch the raw bytes behind a location.
///
/// Implementations report every failure as an error; the coordinator decides
/// what a failure means for the cache (always a miss, never a retry).
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<u8>>;
}

/// Plain HTTP(S) GET.
///
/// Runs [`ureq`] on the blocking pool. Only 2xx responses count; redirects
/// are followed by the agent.
#[derive(Clone)]
pub struct HttpFetcher {
    agent: ureq::Agent,
    max_body_bytes: u64,
}

impl HttpFetcher {
    pub fn new(config: &HttpConfig) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout())
            .timeout_read(config.read_timeout())
            .user_agent(&config.user_agent)
            .build();
        Self { agent, max_body_bytes: config.max_body_bytes }
    }

    /// Reject anything that isn't `http://` or `https://` before touching
    /// the network.
    fn check_scheme(location: &str) -> Result<()> {
        let Some((scheme, rest)) = location.split_once("://") else {
            exn::bail!(ErrorKind::InvalidLocation(location.to_string()));
        };
        if rest.is_empty() {
            exn::bail!(ErrorKind::InvalidLocation(location.to_string()));
        }
        match scheme.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(()),
            _ => exn::bail!(ErrorKind::UnsupportedScheme(scheme.to_string())),
        }
    }

    fn get_blocking(agent: &ureq::Agent, url: &str, limit: u64) -> Result<Vec<u8>> {
        let response = match agent.get(url).call() {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => exn::bail!(ErrorKind::Status(code)),
            Err(ureq::Error::Transport(transport)) => exn::bail!(ErrorKind::Transport(transport.to_string())),
        };
        let status = response.status();
        if !(200..300).contains(&status) {
            exn::bail!(ErrorKind::Status(status));
        }
        let mut body = Vec::new();
        response
            .into_reader()
            // One byte over the limit is enough to know the limit was exceeded.
            .take(limit.saturating_add(1))
            .read_to_end(&mut body)
            .or_raise(|| ErrorKind::Transport("failed to read response body".to_string()))?;
        if body.len() as u64 > limit {
            exn::bail!(ErrorKind::TooLarge(limit));
        }
        Ok(body)
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, key: &CacheKey) -> Result<Vec<u8>> {
        Self::check_scheme(key.as_str())?;
        let agent = self.agent.clone();
        let url = key.to_string();
        let limit = self.max_body_bytes;
        tracing::debug!(%key, "Fetching over HTTP");
        tokio::task::spawn_blocking(move || Self::get_blocking(&agent, &url, limit))
            .await
            .or_raise(|| ErrorKind::Interrupted)?
    }
}
