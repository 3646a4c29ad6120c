use std::path::PathBuf;

/// Main error type for the application
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// CSV output errors
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The image folder does not exist or is not a directory
    #[error("Directory not found: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    /// Two files in the folder share the same identity (file stem)
    #[error("Duplicate image identity '{identity}' for {}", display_paths(.paths))]
    DuplicateIdentity {
        /// The colliding identity.
        identity: String,
        /// Every path that maps to the identity.
        paths: Vec<PathBuf>,
    },

    /// Two feature vectors cannot be compared
    #[error("Dimension mismatch between '{left}' ({left_dim}) and '{right}' ({right_dim})")]
    DimensionMismatch {
        /// Identity of the first vector.
        left: String,
        /// Length of the first vector.
        left_dim: usize,
        /// Identity of the second vector.
        right: String,
        /// Length of the second vector.
        right_dim: usize,
    },

    /// Embedding model errors (loading, device, state)
    #[error("Model error: {0}")]
    Model(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A batch operation was cancelled through its token
    #[error("Operation cancelled")]
    Cancelled,

    /// Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl AppError {
    /// Whether the error is a configuration or input problem rather than a runtime failure
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound(_)
                | Self::DuplicateIdentity { .. }
                | Self::Config(_)
                | Self::InvalidInput(_)
        )
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

#[cfg(feature = "embeddings")]
impl From<tch::TchError> for AppError {
    fn from(err: tch::TchError) -> Self {
        AppError::Model(format!("PyTorch error: {}", err))
    }
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Extension trait for working with Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error if the result is an error
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| AppError::Internal(format!("{}: {}", context, e)))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| {
            let context = f();
            AppError::Internal(format!("{}: {}", context, e))
        })
    }
}
