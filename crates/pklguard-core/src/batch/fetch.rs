//! Fetch collaborators: where artifact bytes come from.
//!
//! The driver never retries; a fetcher either returns the full body or an
//! error. Cancellation is cooperative through `CancelToken`.

use std::fs;
use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use reqwest::blocking::Client;
use tracing::debug;

use crate::error::FetchError;

pub const DEFAULT_HUB_ENDPOINT: &str = "https://huggingface.co";
pub const DEFAULT_REVISION: &str = "main";
pub const HUB_PREFIX: &str = "hub:";

const READ_CHUNK: usize = 64 * 1024;

/// Caller-owned cancellation flag, shared by clone.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub trait Fetch {
    fn fetch(&self, id: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError>;
}

impl<F> Fetch for F
where
    F: Fn(&str, &CancelToken) -> Result<Vec<u8>, FetchError>,
{
    fn fetch(&self, id: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        self(id, cancel)
    }
}

/// Reads artifacts from the local filesystem. Accepts `file://` URLs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFetcher;

impl Fetch for LocalFetcher {
    fn fetch(&self, id: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        let path = id.strip_prefix("file://").unwrap_or(id);
        fs::read(path).map_err(|source| FetchError::Io {
            path: path.to_string(),
            source,
        })
    }
}

/// Downloads artifacts over HTTP(S).
///
/// Besides plain URLs it resolves `hub:<org>/<repo>/<file>` against the
/// configured model hub endpoint as
/// `{endpoint}/{org}/{repo}/resolve/{revision}/{file}`.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    endpoint: String,
    revision: String,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_HUB_ENDPOINT)
    }
}

impl HttpFetcher {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Turn an identifier into the URL that will be requested.
    pub fn resolve(&self, id: &str) -> Result<String, FetchError> {
        if id.starts_with("http://") || id.starts_with("https://") {
            return Ok(id.to_string());
        }
        let Some(path) = id.strip_prefix(HUB_PREFIX) else {
            return Err(FetchError::Unsupported(id.to_string()));
        };
        let mut parts = path.splitn(3, '/');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(org), Some(repo), Some(file))
                if !org.is_empty() && !repo.is_empty() && !file.is_empty() =>
            {
                Ok(format!(
                    "{}/{}/{}/resolve/{}/{}",
                    self.endpoint, org, repo, self.revision, file
                ))
            }
            _ => Err(FetchError::Unsupported(id.to_string())),
        }
    }
}

impl Fetch for HttpFetcher {
    fn fetch(&self, id: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        let url = self.resolve(id)?;
        if cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        debug!("GET {}", url);

        let mut response = self
            .client
            .get(&url)
            .send()
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let mut body = Vec::new();
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if cancel.is_cancelled() {
                return Err(FetchError::Cancelled);
            }
            let n = response.read(&mut chunk).map_err(|source| FetchError::Io {
                path: url.clone(),
                source,
            })?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
        Ok(body)
    }
}

/// Sends URLs and hub identifiers to HTTP, everything else to the
/// filesystem.
#[derive(Debug, Clone, Default)]
pub struct RoutingFetcher {
    pub local: LocalFetcher,
    pub http: HttpFetcher,
}

impl RoutingFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            local: LocalFetcher,
            http,
        }
    }

    pub fn is_remote(id: &str) -> bool {
        id.starts_with("http://") || id.starts_with("https://") || id.starts_with(HUB_PREFIX)
    }
}

impl Fetch for RoutingFetcher {
    fn fetch(&self, id: &str, cancel: &CancelToken) -> Result<Vec<u8>, FetchError> {
        if Self::is_remote(id) {
            self.http.fetch(id, cancel)
        } else {
            self.local.fetch(id, cancel)
        }
    }
}
