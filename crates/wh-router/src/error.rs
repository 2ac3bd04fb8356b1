//! Error types for the upload router

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Error, Debug)]
pub enum RouterError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Common(#[from] wh_common::WhError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("no staging files found")]
    NoStagingFiles,

    #[error("upload {0} is aborted")]
    UploadAborted(i64),

    #[error("operation cancelled")]
    Cancelled,

    #[error("failed to load tables: {}", .0.join(", "))]
    TableLoads(Vec<String>),

    /// Failure reported by an external collaborator (loader, file manager,
    /// load file generator). The full anyhow chain is kept in the message.
    #[error("{context}: {error:#}")]
    External {
        context: String,
        error: anyhow::Error,
    },

    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<RouterError>,
    },

    #[error("{0}")]
    Internal(String),
}

impl RouterError {
    pub fn external(context: impl Into<String>, error: anyhow::Error) -> Self {
        Self::External {
            context: context.into(),
            error,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        match self {
            RouterError::Cancelled => true,
            RouterError::Context { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

/// Prefixes an error with the operation that produced it.
pub trait WrapErr<T> {
    fn wrap_err(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<RouterError>> WrapErr<T> for std::result::Result<T, E> {
    fn wrap_err(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RouterError::Context {
            context: context.into(),
            source: Box::new(e.into()),
        })
    }
}

/// Maps an anyhow result from an external collaborator into a router error.
pub trait ExternalErr<T> {
    fn external(self, context: impl Into<String>) -> Result<T>;
}

impl<T> ExternalErr<T> for anyhow::Result<T> {
    fn external(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| RouterError::external(context, e))
    }
}
