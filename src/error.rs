use std::path::PathBuf;

use thiserror::Error;

/// Errors produced by the gadget lifecycle engine.
///
/// Validation failures (`IdRequired`, `BadReportDescriptor`,
/// `LinkTargetMissing`) surface before or during `create` and never after;
/// `Io` is fatal to the operation in progress and carries the failing
/// operation and path. Per-entry teardown failures are not errors, they
/// are collected in a [`TeardownReport`](crate::teardown::TeardownReport).
#[derive(Error, Debug)]
pub enum GadgetError {
    #[error("gadget id must be set")]
    IdRequired,

    #[error("invalid hex report descriptor on function {function}")]
    BadReportDescriptor {
        function: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("gadget {id} already exists")]
    AlreadyExists { id: String },

    #[error("gadget {id} has not been created")]
    NotCreated { id: String },

    #[error("config {config} links undefined function {function}")]
    LinkTargetMissing { config: String, function: String },

    #[error("no USB device controller available")]
    NoControllerAvailable,

    #[error("{op} {}: {source}", path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl GadgetError {
    /// Wrap an I/O failure with the operation name and the path it hit.
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for lifecycle operations
pub type Result<T> = std::result::Result<T, GadgetError>;
