use hlsmux_engine::{DownloadError, ErrorKind};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

impl AppError {
    /// Process exit code for this error; distinct per failure class so
    /// scripts can tell a bad selection from a network problem.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Download(err) => match err.kind() {
                ErrorKind::InvalidInput | ErrorKind::Selection => 2,
                ErrorKind::Manifest | ErrorKind::SegmentFetch => 3,
                ErrorKind::Mux => 4,
                ErrorKind::Cancelled => 130,
                ErrorKind::Io | ErrorKind::InvalidState => 1,
            },
            AppError::InvalidInput(_) => 2,
            AppError::Io(_) | AppError::Json(_) | AppError::Logging(_) => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
