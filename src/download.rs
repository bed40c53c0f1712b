//! Single best-effort downloads of fetch items

use std::error::Error as _;
use std::path::Path;
use std::time::Duration;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

const USER_AGENT_VALUE: &str = concat!("bagit-deposit/", env!("CARGO_PKG_VERSION"));

/// Environment variable overriding [`FetchConfig::connect_timeout`], in milliseconds
pub const ENV_CONNECT_TIMEOUT_MS: &str = "BAGIT_FETCH_CONNECT_TIMEOUT_MS";
/// Environment variable overriding [`FetchConfig::read_timeout`], in milliseconds
pub const ENV_READ_TIMEOUT_MS: &str = "BAGIT_FETCH_READ_TIMEOUT_MS";

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
/// Network failures while downloading a fetch item
pub enum FetchError {
    #[error("timed out fetching `{url}`")]
    /// Connection or read took longer than configured
    Timeout {
        /// Requested url
        url: String,
    },
    #[error("cannot resolve host of `{url}`")]
    /// Host name of the url could not be resolved
    HostResolution {
        /// Requested url
        url: String,
    },
    #[error("server answered {status} for `{url}`")]
    /// Response status other than 2xx
    Status {
        /// Requested url
        url: String,
        /// HTTP status code
        status: u16,
    },
    #[error("transport failure fetching `{url}`: {message}")]
    /// Refused connection or broken response
    Transport {
        /// Requested url
        url: String,
        /// Underlying error, with its sources
        message: String,
    },
    #[error("failed to store download of `{url}`: {kind}")]
    /// Download could not be written to disk
    Io {
        /// Requested url
        url: String,
        /// Kind of the I/O error
        kind: std::io::ErrorKind,
    },
}

impl FetchError {
    fn from_reqwest(url: &Url, err: reqwest::Error) -> Self {
        let url = url.to_string();

        if err.is_timeout() {
            return Self::Timeout { url };
        }

        if err.is_connect() && mentions_dns(&err) {
            return Self::HostResolution { url };
        }

        Self::Transport {
            url,
            message: err.to_string(),
        }
    }
}

/// hyper reports lookup failures as a connect error with a `dns error` cause
fn mentions_dns(err: &reqwest::Error) -> bool {
    let mut source = err.source();
    while let Some(cause) = source {
        if cause.to_string().contains("dns error") {
            return true;
        }
        source = cause.source();
    }
    false
}

#[derive(Debug, Clone, PartialEq)]
/// Network settings for fetch items
pub struct FetchConfig {
    /// Maximum time to establish a connection
    pub connect_timeout: Duration,
    /// Maximum time between two reads of the response body
    pub read_timeout: Duration,
    /// `User-Agent` header of every request
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(1),
            read_timeout: Duration::from_secs(1),
            user_agent: USER_AGENT_VALUE.to_string(),
        }
    }
}

impl FetchConfig {
    /// Defaults, overridden by [`ENV_CONNECT_TIMEOUT_MS`] and [`ENV_READ_TIMEOUT_MS`] when set
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(timeout) = duration_from_env(ENV_CONNECT_TIMEOUT_MS) {
            config.connect_timeout = timeout;
        }
        if let Some(timeout) = duration_from_env(ENV_READ_TIMEOUT_MS) {
            config.read_timeout = timeout;
        }

        config
    }

    /// Limit on establishing the connection
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Limit on the whole response
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Override the `User-Agent` header
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

fn duration_from_env(key: &str) -> Option<Duration> {
    let value = std::env::var(key).ok()?;
    match value.trim().parse() {
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => {
            warn!(key, value = %value, "ignoring invalid timeout");
            None
        }
    }
}

#[derive(Debug, Clone)]
/// HTTP client downloading fetch items
pub(crate) struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new(config: &FetchConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .read_timeout(config.read_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| FetchError::Transport {
                url: String::new(),
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self { client })
    }

    /// Download `url` into the new file `destination`, returns the number of bytes written
    pub async fn download(&self, url: &Url, destination: &Path) -> Result<u64, FetchError> {
        debug!(url = %url, destination = %destination.display(), "downloading");

        let mut response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let io_error = |e: std::io::Error| FetchError::Io {
            url: url.to_string(),
            kind: e.kind(),
        };

        let mut file = File::create(destination).await.map_err(io_error)?;
        let mut length = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_reqwest(url, e))?
        {
            file.write_all(&chunk).await.map_err(io_error)?;
            length += chunk.len() as u64;
        }
        file.flush().await.map_err(io_error)?;

        debug!(url = %url, length, "downloaded");
        Ok(length)
    }
}
