use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failures surfaced by the scraper, the playlist workflow and the
/// platform clients.
#[derive(Debug, Error)]
pub enum Error {
    /// The Discord user has no linked Spotify account. Expected, shown to
    /// the user as a prompt to `/register`.
    #[error("account {0} has not linked a Spotify account")]
    NotRegistered(String),

    /// A Discord or Spotify call failed.
    #[error("upstream call failed: {0:#}")]
    Upstream(anyhow::Error),

    /// A store call failed.
    #[error("persistence failure: {0:#}")]
    Persistence(anyhow::Error),

    /// A hard external cap would be breached.
    #[error("{what} exceeds the limit of {limit} (got {actual})")]
    LimitExceeded {
        what: &'static str,
        limit: usize,
        actual: usize,
    },

    /// Spotify created the playlist but returned no shareable link.
    #[error("playlist was created but no shareable link was returned")]
    MissingArtifactLink,

    #[error("operation cancelled")]
    Cancelled,

    #[error("a scrape pass is already running")]
    PassInProgress,

    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        Error::Upstream(err.into())
    }

    pub fn persistence(err: impl Into<anyhow::Error>) -> Self {
        Error::Persistence(err.into())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Upstream(err.into())
    }
}
