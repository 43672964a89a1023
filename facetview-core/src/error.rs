//! Error taxonomy shared by the decoders.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for mesh loading.
pub type LoadResult<T> = Result<T, LoadError>;

/// Failures that abort a load. Degenerate geometry is never one of these;
/// it is recovered inside the decoders and the triangulator.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The file could not be opened or read.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A stream failed while being read.
    #[error("read error: {0}")]
    Read(#[from] std::io::Error),

    /// Structurally invalid STL or XML content.
    #[error("invalid geometry file: {0}")]
    Format(String),

    /// The zip container could not be read or holds no XML entry.
    #[error("archive error: {0}")]
    Archive(String),

    /// No decoder handles this file extension.
    #[error("unsupported file extension: {0:?}")]
    UnsupportedExtension(String),

    /// The progress callback asked the decoder to stop.
    #[error("load cancelled")]
    Cancelled,
}

impl LoadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn format(message: impl Into<String>) -> Self {
        Self::Format(message.into())
    }

    pub(crate) fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }
}
