//! HTTP retrieval of distribution archives.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::StatusCode;
use reqwest::blocking::Client;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::ARTIFACT_TARGET;

/// Downloads a URL into a local file.
#[cfg_attr(test, mockall::automock)]
pub trait Fetcher {
    /// Writes the body at `url` to `destination`.
    ///
    /// Implementations must not leave a file at `destination` when they fail.
    fn fetch(&self, url: &Url, destination: &Path) -> Result<(), FetchError>;
}

/// Blocking HTTP fetcher.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: Client,
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &Url, destination: &Path) -> Result<(), FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_string(),
            source,
        };
        let mut response = self
            .client
            .get(url.clone())
            .header(reqwest::header::USER_AGENT, concat!("kcm/", env!("CARGO_PKG_VERSION")))
            .send()
            .map_err(transport)?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                url: url.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let io_error = |source| FetchError::Io {
            path: destination.to_path_buf(),
            source,
        };
        let parent = destination.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(io_error)?;
        let mut staged = tempfile::Builder::new()
            .prefix(".download")
            .tempfile_in(parent)
            .map_err(io_error)?;
        let bytes = response.copy_to(staged.as_file_mut()).map_err(transport)?;
        staged.as_file().sync_all().map_err(io_error)?;
        staged
            .persist(destination)
            .map_err(|error| io_error(error.error))?;
        debug!(
            target: ARTIFACT_TARGET,
            %url,
            bytes,
            path = %destination.display(),
            "download complete"
        );
        Ok(())
    }
}

/// Errors raised while downloading.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The server reported the artefact missing.
    #[error("'{url}' was not found")]
    NotFound {
        /// Requested URL.
        url: String,
    },
    /// The server answered with another non-success status.
    #[error("'{url}' answered HTTP {status}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// The request could not be completed.
    #[error("failed to download '{url}': {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying HTTP client error.
        #[source]
        source: reqwest::Error,
    },
    /// Writing the download failed.
    #[error("failed to write '{path}': {source}")]
    Io {
        /// Destination file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}
