use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderMap;

/// The timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Where and how to reach a tool server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub(crate) url: Url,
    pub(crate) headers: HeaderMap,
    pub(crate) timeout: Duration,
    pub(crate) connections: usize,
}

impl ServerConfig {
    /// Creates a configuration for the event stream at `url`.
    #[inline]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            headers: HeaderMap::new(),
            timeout: DEFAULT_TIMEOUT,
            connections: 1,
        }
    }

    /// Sends `headers` with every request.
    #[inline]
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Bounds discovery as a whole and each tool call.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Opens `connections` connections and spreads the tools across them.
    ///
    /// Calls on one connection run one at a time.
    #[inline]
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }

    /// Returns the event stream URL.
    #[inline]
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the timeout.
    #[inline]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}
