//! Core data types shared by every stage of a run
//!
//! [`PlaintextSecret`] is deliberately poor in capabilities: no `Display`, no
//! `Serialize`, and a `Debug` that prints field names only. Nothing in the
//! reporting path accepts it, so plaintext cannot end up in a log line.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::ItemError;

/// Max length of a namespace (RFC 1123 label)
const MAX_NAMESPACE_LEN: usize = 63;

/// Max length of an object name (RFC 1123 subdomain)
const MAX_NAME_LEN: usize = 253;

// =============================================================================
// SealedSecretRef
// =============================================================================

/// Why a discovered key could not become a [`SealedSecretRef`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RefError {
    /// Key has no `/` between namespace and name
    #[error("'{0}' is not in namespace/name form")]
    MissingSeparator(String),

    /// Key has more than one `/`
    #[error("'{0}' contains more than one '/'")]
    TooManySeparators(String),

    /// Namespace part is empty
    #[error("'{0}' has an empty namespace")]
    EmptyNamespace(String),

    /// Name part is empty
    #[error("'{0}' has an empty name")]
    EmptyName(String),

    /// Namespace is not a valid RFC 1123 label
    #[error("namespace '{0}' is not a valid RFC 1123 label")]
    InvalidNamespace(String),

    /// Name is not a valid RFC 1123 subdomain
    #[error("name '{0}' is not a valid RFC 1123 subdomain")]
    InvalidName(String),
}

/// Identity of one SealedSecret. Namespace plus name is the natural key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SealedSecretRef {
    namespace: String,
    name: String,
}

impl SealedSecretRef {
    /// Build a ref from its parts, validating both
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Result<Self, RefError> {
        let namespace = namespace.into();
        let name = name.into();
        let key = format!("{namespace}/{name}");

        if namespace.is_empty() {
            return Err(RefError::EmptyNamespace(key));
        }
        if name.is_empty() {
            return Err(RefError::EmptyName(key));
        }
        if !is_rfc1123_label(&namespace) {
            return Err(RefError::InvalidNamespace(namespace));
        }
        if !is_rfc1123_subdomain(&name) {
            return Err(RefError::InvalidName(name));
        }

        Ok(Self { namespace, name })
    }

    /// Parse a `namespace/name` discovery key
    pub fn parse(key: &str) -> Result<Self, RefError> {
        let mut parts = key.split('/');
        let (namespace, name) = match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(name), None) => (ns, name),
            (_, None, _) => return Err(RefError::MissingSeparator(key.to_string())),
            _ => return Err(RefError::TooManySeparators(key.to_string())),
        };
        Self::new(namespace, name)
    }

    /// Namespace of the object
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Name of the object
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FromStr for SealedSecretRef {
    type Err = RefError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SealedSecretRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

fn is_rfc1123_label(s: &str) -> bool {
    s.len() <= MAX_NAMESPACE_LEN
        && s.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && starts_and_ends_alphanumeric(s)
}

fn is_rfc1123_subdomain(s: &str) -> bool {
    s.len() <= MAX_NAME_LEN && s.split('.').all(is_rfc1123_label)
}

fn starts_and_ends_alphanumeric(s: &str) -> bool {
    let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
    match (s.bytes().next(), s.bytes().last()) {
        (Some(first), Some(last)) => alnum(first) && alnum(last),
        _ => false,
    }
}

// =============================================================================
// Key material
// =============================================================================

/// Lower-hex SHA-256 of a DER certificate
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct KeyFingerprint(String);

impl KeyFingerprint {
    /// Wrap an already computed fingerprint
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    /// Full hex fingerprint
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, enough to tell rotations apart in logs
    pub fn short(&self) -> &str {
        let end = (0..=self.0.len().min(12))
            .rev()
            .find(|i| self.0.is_char_boundary(*i))
            .unwrap_or(0);
        &self.0[..end]
    }
}

impl fmt::Display for KeyFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The controller's current public certificate. Fetched once per run and
/// shared read-only by every item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKeyMaterial {
    pem: String,
    fingerprint: KeyFingerprint,
    not_after: Option<DateTime<Utc>>,
}

impl PublicKeyMaterial {
    /// Assemble key material from a validated certificate
    pub fn new(
        pem: impl Into<String>,
        fingerprint: KeyFingerprint,
        not_after: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            pem: pem.into(),
            fingerprint,
            not_after,
        }
    }

    /// PEM-encoded certificate
    pub fn pem(&self) -> &str {
        &self.pem
    }

    /// Identifier distinguishing this key from previously fetched ones
    pub fn fingerprint(&self) -> &KeyFingerprint {
        &self.fingerprint
    }

    /// Certificate expiry, when the certificate could be parsed for it
    pub fn not_after(&self) -> Option<DateTime<Utc>> {
        self.not_after
    }
}

// =============================================================================
// Plaintext and sealed payloads
// =============================================================================

/// Recovered secret data for one object. Values are wiped from memory on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct PlaintextSecret {
    target: SealedSecretRef,
    fields: BTreeMap<String, Zeroizing<Vec<u8>>>,
}

impl PlaintextSecret {
    /// Empty plaintext scoped to one object
    pub fn new(target: SealedSecretRef) -> Self {
        Self {
            target,
            fields: BTreeMap::new(),
        }
    }

    /// Add or replace a field
    pub fn insert(&mut self, field: impl Into<String>, value: Vec<u8>) {
        self.fields.insert(field.into(), Zeroizing::new(value));
    }

    /// Object this plaintext belongs to
    pub fn target(&self) -> &SealedSecretRef {
        &self.target
    }

    /// Field names and values, ordered by field name
    pub fn fields(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Copy holding only `fields`. Fails with the first requested field
    /// that is absent.
    pub fn select<'a>(
        &self,
        fields: impl IntoIterator<Item = &'a str>,
    ) -> Result<PlaintextSecret, String> {
        let mut selected = PlaintextSecret::new(self.target.clone());
        for field in fields {
            let value = self.fields.get(field).ok_or_else(|| field.to_string())?;
            selected.fields.insert(field.to_string(), value.clone());
        }
        Ok(selected)
    }

    /// Value of a single field
    pub fn get(&self, field: &str) -> Option<&[u8]> {
        self.fields.get(field).map(|v| v.as_slice())
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// True when the secret has no fields
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl fmt::Debug for PlaintextSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaintextSecret")
            .field("target", &self.target)
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Ciphertext produced for one object under one key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedPayload {
    target: SealedSecretRef,
    key: KeyFingerprint,
    encrypted_data: BTreeMap<String, String>,
}

impl SealedPayload {
    /// Bind sealed field values to the object and key they were produced for
    pub fn new(
        target: SealedSecretRef,
        key: KeyFingerprint,
        encrypted_data: BTreeMap<String, String>,
    ) -> Self {
        Self {
            target,
            key,
            encrypted_data,
        }
    }

    /// Object the payload was derived from
    pub fn target(&self) -> &SealedSecretRef {
        &self.target
    }

    /// Fingerprint of the key the payload was sealed under
    pub fn key(&self) -> &KeyFingerprint {
        &self.key
    }

    /// Field name to base64 ciphertext, as stored in `spec.encryptedData`
    pub fn encrypted_data(&self) -> &BTreeMap<String, String> {
        &self.encrypted_data
    }

    /// Reject a payload that would be written to another object or was sealed
    /// under a different key than the run's.
    pub fn ensure_bound_to(
        &self,
        target: &SealedSecretRef,
        key: &KeyFingerprint,
    ) -> Result<(), ItemError> {
        if &self.target != target {
            return Err(ItemError::binding(
                target.clone(),
                format!("payload was derived from {}", self.target),
            ));
        }
        if &self.key != key {
            return Err(ItemError::binding(
                target.clone(),
                format!(
                    "payload sealed under key {}, run key is {}",
                    self.key.short(),
                    key.short()
                ),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Outcomes
// =============================================================================

/// What an item was, as far as the run knows. Invalid discovery keys never
/// become a [`SealedSecretRef`], so they are kept as their raw text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Subject {
    /// A validated object reference
    Ref(SealedSecretRef),
    /// A discovery key that failed validation
    Invalid(String),
}

impl Subject {
    /// The validated ref, if any
    pub fn target(&self) -> Option<&SealedSecretRef> {
        match self {
            Subject::Ref(r) => Some(r),
            Subject::Invalid(_) => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Ref(r) => r.fmt(f),
            Subject::Invalid(raw) => f.write_str(raw),
        }
    }
}

/// How an item succeeded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SuccessKind {
    /// New payload written to the cluster
    Applied,
    /// Pipeline validated, write suppressed
    DryRun,
    /// Object already sealed under the current key; nothing to do
    AlreadyCurrent,
}

/// Why an item was skipped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SkipReason {
    /// Discovery key failed validation
    InvalidRef,
    /// Same ref discovered more than once; only the first is processed
    Duplicate,
    /// Run was cancelled before the item was dispatched
    Cancelled,
}

/// Terminal state of one item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "camelCase")]
pub enum OutcomeStatus {
    /// Item reached a successful terminal state
    Succeeded(SuccessKind),
    /// Item failed; see the outcome's error detail
    Failed,
    /// Item was never attempted
    Skipped(SkipReason),
}

impl fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutcomeStatus::Succeeded(SuccessKind::Applied) => f.write_str("applied"),
            OutcomeStatus::Succeeded(SuccessKind::DryRun) => f.write_str("dry-run"),
            OutcomeStatus::Succeeded(SuccessKind::AlreadyCurrent) => {
                f.write_str("already-current")
            }
            OutcomeStatus::Failed => f.write_str("failed"),
            OutcomeStatus::Skipped(SkipReason::InvalidRef) => f.write_str("skipped (invalid ref)"),
            OutcomeStatus::Skipped(SkipReason::Duplicate) => f.write_str("skipped (duplicate)"),
            OutcomeStatus::Skipped(SkipReason::Cancelled) => f.write_str("skipped (cancelled)"),
        }
    }
}

/// Result of processing one item
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReencryptionOutcome {
    /// Object the outcome is about
    pub subject: Subject,
    /// Terminal state
    #[serde(flatten)]
    pub status: OutcomeStatus,
    /// Cause of a failure or skip
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_detail: Option<String>,
}

impl ReencryptionOutcome {
    /// Item succeeded
    pub fn succeeded(target: SealedSecretRef, kind: SuccessKind) -> Self {
        Self {
            subject: Subject::Ref(target),
            status: OutcomeStatus::Succeeded(kind),
            error_detail: None,
        }
    }

    /// Item failed with the given per-item error
    pub fn failed(target: SealedSecretRef, error: &ItemError) -> Self {
        Self {
            subject: Subject::Ref(target),
            status: OutcomeStatus::Failed,
            error_detail: Some(error.to_string()),
        }
    }

    /// Discovery key was malformed
    pub fn invalid_ref(raw: impl Into<String>, error: &RefError) -> Self {
        Self {
            subject: Subject::Invalid(raw.into()),
            status: OutcomeStatus::Skipped(SkipReason::InvalidRef),
            error_detail: Some(error.to_string()),
        }
    }

    /// Item was skipped for a reason other than validation
    pub fn skipped(target: SealedSecretRef, reason: SkipReason) -> Self {
        Self {
            subject: Subject::Ref(target),
            status: OutcomeStatus::Skipped(reason),
            error_detail: None,
        }
    }

    /// True for any `Succeeded` status
    pub fn is_success(&self) -> bool {
        matches!(self.status, OutcomeStatus::Succeeded(_))
    }
}

/// Aggregated result of a run. Counts are derived from `items`, so
/// `succeeded + failed + skipped == total` holds by construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Items discovered
    pub total: usize,
    /// Items in a `Succeeded` state
    pub succeeded: usize,
    /// Items in the `Failed` state
    pub failed: usize,
    /// Items in a `Skipped` state
    pub skipped: usize,
    /// Key every applied payload was sealed under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_fingerprint: Option<KeyFingerprint>,
    /// Whether writes were suppressed
    pub dry_run: bool,
    /// Whether the run was cancelled before all items were dispatched
    pub cancelled: bool,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the summary was produced
    pub finished_at: DateTime<Utc>,
    /// Per-item outcomes, in discovery order
    pub items: Vec<ReencryptionOutcome>,
}

impl RunSummary {
    /// Build a summary from outcomes in discovery order
    pub fn from_outcomes(
        items: Vec<ReencryptionOutcome>,
        key_fingerprint: Option<KeyFingerprint>,
        dry_run: bool,
        cancelled: bool,
        started_at: DateTime<Utc>,
    ) -> Self {
        let succeeded = items.iter().filter(|o| o.is_success()).count();
        let failed = items
            .iter()
            .filter(|o| o.status == OutcomeStatus::Failed)
            .count();
        let skipped = items
            .iter()
            .filter(|o| matches!(o.status, OutcomeStatus::Skipped(_)))
            .count();

        Self {
            total: items.len(),
            succeeded,
            failed,
            skipped,
            key_fingerprint,
            dry_run,
            cancelled,
            started_at,
            finished_at: Utc::now(),
            items,
        }
    }

    /// True when any item failed
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Process exit code for this summary. Failures outrank cancellation.
    pub fn exit_code(&self) -> u8 {
        if self.has_failures() {
            crate::EXIT_ITEM_FAILURES
        } else if self.cancelled {
            crate::EXIT_CANCELLED
        } else {
            crate::EXIT_OK
        }
    }
}
