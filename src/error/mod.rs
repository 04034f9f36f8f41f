use std::path::PathBuf;

use url::Url;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid URL `{input}`: {source}")]
    InvalidUrl {
        input: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("no selectable variant found in master playlist")]
    NoVariantFound,

    #[error("fetching {url} failed: {reason}")]
    FetchFailed { url: Url, reason: String },

    #[error("manifest at {url} is not valid UTF-8")]
    ManifestEncoding { url: Url },

    #[error("playlist at {url} has no segments")]
    EmptyPlaylist { url: Url },

    #[error("{failed} of {total} segments failed to download")]
    SegmentsFailed { failed: usize, total: usize },

    #[error("muxer `{program}` not found or not runnable: {source}")]
    MuxerNotFound {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("muxer exited with {status}: {stderr}")]
    MuxFailed { status: String, stderr: String },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("download cancelled")]
    Cancelled,
}

impl Error {
    pub fn fetch_failed(url: &Url, reason: impl ToString) -> Self {
        Error::FetchFailed {
            url: url.clone(),
            reason: reason.to_string(),
        }
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Filesystem {
            path: path.into(),
            source,
        }
    }
}
