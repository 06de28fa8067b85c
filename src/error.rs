// Error type shared by the library modules. The binary and the UI layer
// wrap these in `anyhow` at the outermost level.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrainerError>;

#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("folder not specified")]
    FolderNotSpecified,

    #[error("project ID not specified")]
    ProjectNotSpecified,

    #[error("folder \"{}\" does not exist", .0.display())]
    FolderNotFound(PathBuf),

    #[error("training key contains characters that cannot be sent in a header")]
    InvalidTrainingKey,

    #[error("API request failed: {status} - {body}")]
    Api { status: u16, body: String },

    /// A batch upload came back with a per-image status other than OK.
    #[error("API bad response: {0}")]
    BadImageStatus(String),

    /// The service answered a batch with a different number of results.
    #[error("API returned {received} result(s) for a batch of {sent}")]
    IncompleteBatch { sent: usize, received: usize },

    #[error("cache store lock poisoned")]
    StorePoisoned,

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] rusqlite::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl TrainerError {
    /// True for the 404 the service returns when a tag or iteration is gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TrainerError::Api { status: 404, .. })
    }
}
