//! Error types for re-encryption runs
//!
//! Two tiers mirror how failures are handled:
//! - [`Error`] aborts the whole run before any object is touched
//!   (controller missing, key fetch failed, discovery failed).
//! - [`ItemError`] belongs to a single SealedSecret. It is captured into that
//!   item's outcome and never propagates past the item's pipeline.

use thiserror::Error;

use crate::model::SealedSecretRef;

/// Run-level error. Every variant is fatal to the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Listing SealedSecrets failed or returned malformed data
    #[error("discovery failed in {scope}: {message}")]
    Discovery {
        /// Scope that was being listed
        scope: String,
        /// Description of what failed
        message: String,
    },

    /// No sealed-secrets controller could be found
    #[error("sealed-secrets controller not found ({namespace}/{name}): {message}")]
    ControllerNotFound {
        /// Namespace that was searched first
        namespace: String,
        /// Service name that was searched first
        name: String,
        /// Description of what was missing
        message: String,
    },

    /// The controller's public certificate could not be fetched or parsed
    #[error("failed to fetch public key from {endpoint}: {message}")]
    KeyFetch {
        /// Controller endpoint the fetch went to
        endpoint: String,
        /// Description of what failed
        message: String,
    },

    /// Invalid run configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what's invalid
        message: String,
    },

    /// Kubernetes client could not be created
    #[error("kubernetes client error: {message}")]
    Client {
        /// Description of what failed
        message: String,
    },

    /// Logging could not be initialized
    #[error("telemetry error: {message}")]
    Telemetry {
        /// Description of what failed
        message: String,
    },

    /// Local file operation failed
    #[error("io error [{context}]: {source}")]
    Io {
        /// What was being done (e.g., "open log file")
        context: String,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Create a discovery error for the given scope
    pub fn discovery(scope: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Discovery {
            scope: scope.into(),
            message: msg.into(),
        }
    }

    /// Create a controller-not-found error
    pub fn controller_not_found(
        namespace: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::ControllerNotFound {
            namespace: namespace.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Create a key fetch error
    pub fn key_fetch(endpoint: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::KeyFetch {
            endpoint: endpoint.into(),
            message: msg.into(),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a client setup error
    pub fn client(msg: impl Into<String>) -> Self {
        Self::Client {
            message: msg.into(),
        }
    }

    /// Create a telemetry error
    pub fn telemetry(msg: impl Into<String>) -> Self {
        Self::Telemetry {
            message: msg.into(),
        }
    }

    /// Wrap an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Failure of a single item. Recorded in the item's outcome; the run continues.
#[derive(Debug, Error)]
pub enum ItemError {
    /// The SealedSecret no longer exists
    #[error("{target}: sealed secret not found")]
    NotFound {
        /// Object that was requested
        target: SealedSecretRef,
    },

    /// Reading the current object failed
    #[error("{target}: read failed: {message}")]
    Read {
        /// Object being read
        target: SealedSecretRef,
        /// Description of what failed
        message: String,
    },

    /// The controller could not recover plaintext
    #[error("{target}: plaintext recovery failed: {cause}")]
    Recover {
        /// Object being recovered
        target: SealedSecretRef,
        /// Why the controller or transport refused
        cause: String,
    },

    /// The sealing primitive failed
    #[error("{target}: reseal failed: {cause}")]
    Reseal {
        /// Object being resealed
        target: SealedSecretRef,
        /// Why sealing failed
        cause: String,
    },

    /// Object changed since it was read (resourceVersion mismatch)
    #[error("{target}: conflict: {message}")]
    Conflict {
        /// Object being written
        target: SealedSecretRef,
        /// API server message
        message: String,
    },

    /// Writing the new payload failed for a reason other than a conflict
    #[error("{target}: apply failed: {message}")]
    Apply {
        /// Object being written
        target: SealedSecretRef,
        /// Description of what failed
        message: String,
    },

    /// Payload does not belong to this object or this run's key
    #[error("{target}: payload binding violated: {message}")]
    Binding {
        /// Object the payload was about to be written to
        target: SealedSecretRef,
        /// What did not match
        message: String,
    },
}

impl ItemError {
    /// Create a not-found error
    pub fn not_found(target: SealedSecretRef) -> Self {
        Self::NotFound { target }
    }

    /// Create a read error
    pub fn read(target: SealedSecretRef, msg: impl Into<String>) -> Self {
        Self::Read {
            target,
            message: msg.into(),
        }
    }

    /// Create a plaintext recovery error
    pub fn recover(target: SealedSecretRef, cause: impl Into<String>) -> Self {
        Self::Recover {
            target,
            cause: cause.into(),
        }
    }

    /// Create a reseal error
    pub fn reseal(target: SealedSecretRef, cause: impl Into<String>) -> Self {
        Self::Reseal {
            target,
            cause: cause.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(target: SealedSecretRef, msg: impl Into<String>) -> Self {
        Self::Conflict {
            target,
            message: msg.into(),
        }
    }

    /// Create an apply error
    pub fn apply(target: SealedSecretRef, msg: impl Into<String>) -> Self {
        Self::Apply {
            target,
            message: msg.into(),
        }
    }

    /// Create a binding violation error
    pub fn binding(target: SealedSecretRef, msg: impl Into<String>) -> Self {
        Self::Binding {
            target,
            message: msg.into(),
        }
    }

    /// Classify a kube error from a read of `target`
    pub fn from_read(target: SealedSecretRef, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(e) if e.code == 404 => Self::not_found(target),
            kube::Error::Api(e) if e.code == 409 => Self::conflict(target, e.message),
            e => Self::read(target, e.to_string()),
        }
    }

    /// Classify a kube error from a write of `target`
    pub fn from_write(target: SealedSecretRef, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(e) if e.code == 409 => Self::conflict(target, e.message),
            kube::Error::Api(e) if e.code == 404 => Self::not_found(target),
            e => Self::apply(target, e.to_string()),
        }
    }

    /// Whether the item should be retried from a fresh read
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Object the error is about
    pub fn target(&self) -> &SealedSecretRef {
        match self {
            Self::NotFound { target }
            | Self::Read { target, .. }
            | Self::Recover { target, .. }
            | Self::Reseal { target, .. }
            | Self::Conflict { target, .. }
            | Self::Apply { target, .. }
            | Self::Binding { target, .. } => target,
        }
    }
}
