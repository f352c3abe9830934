//! Sealed-reencrypt - keep SealedSecrets decryptable across controller key rotation
//!
//! The sealed-secrets controller periodically generates a new key pair. Anything
//! sealed under a key that is later purged becomes unrecoverable, so every
//! SealedSecret has to be re-sealed under the current key while the old keys
//! still exist.
//!
//! # Architecture
//!
//! The controller is the only party holding private keys. This crate never
//! decrypts locally:
//! - The public certificate is fetched from the controller once per run
//! - Plaintext is recovered by relaying each SealedSecret to the controller
//! - Plaintext is resealed against the fetched certificate and written back
//!   with optimistic concurrency (resourceVersion)
//!
//! # Modules
//!
//! - [`cluster`] - Kubernetes access: SealedSecret list/get/replace, controller discovery
//! - [`keys`] - Public certificate fetch and fingerprinting
//! - [`relay`] - Plaintext recovery through the controller
//! - [`reseal`] - Re-encryption over an opaque sealing primitive
//! - [`scratch`] - Scoped temporary storage for plaintext handed to `kubeseal`
//! - [`controller`] - Reconciliation engine driving each item through the pipeline
//! - [`report`] - Structured records and run summaries
//! - [`config`] - CLI parsing into an immutable run configuration
//! - [`telemetry`] - Tracing subscriber setup
//! - [`retry`] - Bounded retry with exponential backoff
//! - [`model`] - Core data types
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod keys;
pub mod model;
pub mod relay;
pub mod report;
pub mod reseal;
pub mod retry;
pub mod scratch;
pub mod telemetry;

pub use error::{Error, ItemError};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================

/// Namespace the sealed-secrets Helm chart installs the controller into
pub const DEFAULT_CONTROLLER_NAMESPACE: &str = "kube-system";

/// Service name of the sealed-secrets controller
pub const DEFAULT_CONTROLLER_NAME: &str = "sealed-secrets-controller";

/// Label used to find the controller when the named Service does not exist
pub const CONTROLLER_LABEL_SELECTOR: &str = "app.kubernetes.io/name=sealed-secrets";

/// Controller path serving the current public certificate
pub const CERT_PATH: &str = "/v1/cert.pem";

/// Controller path accepting a SealedSecret and returning the unsealed Secret
pub const DEFAULT_DECRYPT_PATH: &str = "/v1/decrypt";

/// Attempts per item when the object is modified concurrently
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Annotation recording the certificate fingerprint an object was last sealed with
pub const KEY_FINGERPRINT_ANNOTATION: &str = "reencrypt.sealed-secrets.io/key-fingerprint";

/// Annotation recording when an object was last re-encrypted
pub const REENCRYPTED_AT_ANNOTATION: &str = "reencrypt.sealed-secrets.io/reencrypted-at";

// =============================================================================
// Exit codes
// =============================================================================

/// Every item succeeded or was skipped
pub const EXIT_OK: u8 = 0;
/// At least one item failed
pub const EXIT_ITEM_FAILURES: u8 = 1;
/// Invalid command line (matches clap's own usage exit code)
pub const EXIT_USAGE: u8 = 2;
/// Run aborted before touching any item
pub const EXIT_FATAL: u8 = 3;
/// Run was interrupted before every item was dispatched
pub const EXIT_CANCELLED: u8 = 4;
