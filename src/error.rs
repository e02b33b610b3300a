//! Error types for the detection engine.
//!
//! Only [`CatalogError`] (and [`ShieldError`] wrapping it) is ever returned
//! to a host application. [`ProbeError`] is internal to the probes: every
//! probe logs it and folds it into a negative result, so a quirk of the
//! environment can never turn into a false positive.

use std::io;

use thiserror::Error;

use crate::engine::catalog::Category;

/// Errors raised while loading the artifact catalog.
///
/// Any of these is fatal at startup: detection without signatures is
/// silently useless.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The embedded or supplied configuration is not valid JSON for a catalog.
    #[error("catalog is malformed: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Every category is empty.
    #[error("catalog contains no signatures")]
    Empty,

    /// A signature is empty or whitespace only.
    #[error("blank signature in category {category}")]
    BlankSignature {
        /// Category holding the blank entry.
        category: Category,
    },

    /// Port 0 cannot be probed.
    #[error("invalid port 0 in category {category}")]
    InvalidPort {
        /// Category holding the bad port.
        category: Category,
    },

    /// URL scheme entries must look like `name://`.
    #[error("malformed URL scheme `{scheme}`")]
    InvalidScheme {
        /// The offending entry.
        scheme: String,
    },
}

/// Faults raised inside a single probe.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Unexpected I/O failure.
    #[error("{context}: {source}")]
    Io {
        /// What the probe was doing.
        context: String,
        /// Underlying error.
        #[source]
        source: io::Error,
    },

    /// A symbol looked up at runtime is missing.
    #[error("symbol `{0}` could not be resolved")]
    SymbolUnresolved(&'static str),

    /// A kernel query returned an error code or a short buffer.
    #[error("kernel query `{query}` failed: {source}")]
    Kernel {
        /// Name of the query (sysctl, libproc call, ...).
        query: &'static str,
        /// Error reported by the OS.
        #[source]
        source: io::Error,
    },

    /// The platform offers no way to perform this check.
    #[error("unsupported on this platform")]
    Unsupported,
}

impl ProbeError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn kernel(query: &'static str) -> Self {
        Self::Kernel {
            query,
            source: io::Error::last_os_error(),
        }
    }
}

/// Top-level startup error.
#[derive(Debug, Error)]
pub enum ShieldError {
    /// Catalog could not be loaded.
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Result alias for startup operations.
pub type Result<T> = std::result::Result<T, ShieldError>;
