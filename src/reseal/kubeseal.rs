//! [`SealingPrimitive`] backed by the `kubeseal` binary in raw mode

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::{SealError, SealingPrimitive, SealingScope};
use crate::model::{PlaintextSecret, PublicKeyMaterial, SealedSecretRef};
use crate::scratch::ScratchDir;

/// Upper bound on a single kubeseal invocation
const KUBESEAL_TIMEOUT: Duration = Duration::from_secs(30);

/// Longest stderr excerpt kept in an error
const MAX_STDERR: usize = 512;

/// Seals each field with `kubeseal --raw` against a certificate file
#[derive(Debug, Clone)]
pub struct KubesealPrimitive {
    binary: PathBuf,
    timeout: Duration,
}

impl KubesealPrimitive {
    /// Use the given kubeseal binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            timeout: KUBESEAL_TIMEOUT,
        }
    }

    /// Override the per-invocation timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn seal_file(
        &self,
        target: &SealedSecretRef,
        scope: SealingScope,
        cert: &Path,
        file: &Path,
    ) -> Result<String, SealError> {
        let binary = self.binary.display().to_string();
        let child = Command::new(&self.binary)
            .args(kubeseal_args(target, scope, cert, file))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SealError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| SealError::Timeout {
                binary: binary.clone(),
                seconds: self.timeout.as_secs(),
            })?
            .map_err(|source| SealError::Spawn {
                binary: binary.clone(),
                source,
            })?;

        if !output.status.success() {
            let mut stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.len() > MAX_STDERR {
                let cut = (0..=MAX_STDERR)
                    .rev()
                    .find(|i| stderr.is_char_boundary(*i))
                    .unwrap_or(0);
                stderr.truncate(cut);
            }
            return Err(SealError::Exit {
                binary,
                status: output.status.to_string(),
                stderr,
            });
        }

        let sealed = String::from_utf8(output.stdout)
            .map_err(|_| SealError::Output("ciphertext is not UTF-8".to_string()))?
            .trim()
            .to_string();
        if sealed.is_empty() {
            return Err(SealError::Output("empty ciphertext".to_string()));
        }
        Ok(sealed)
    }
}

/// Arguments for sealing one field of `target` from `file`
pub(crate) fn kubeseal_args(
    target: &SealedSecretRef,
    scope: SealingScope,
    cert: &Path,
    file: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--raw".into(),
        "--cert".into(),
        cert.into(),
        "--scope".into(),
        scope.as_arg().into(),
    ];
    if scope != SealingScope::ClusterWide {
        args.push("--namespace".into());
        args.push(target.namespace().into());
    }
    if scope == SealingScope::Strict {
        args.push("--name".into());
        args.push(target.name().into());
    }
    args.push("--from-file".into());
    args.push(file.into());
    args
}

#[async_trait]
impl SealingPrimitive for KubesealPrimitive {
    async fn seal_secret(
        &self,
        target: &SealedSecretRef,
        scope: SealingScope,
        key: &PublicKeyMaterial,
        plaintext: &PlaintextSecret,
    ) -> Result<BTreeMap<String, String>, SealError> {
        let mut scratch = ScratchDir::new().map_err(SealError::Scratch)?;
        let cert = scratch
            .write_secret("cert.pem", key.pem().as_bytes())
            .map_err(SealError::Scratch)?;

        let mut sealed = BTreeMap::new();
        for (index, (field, value)) in plaintext.fields().enumerate() {
            let file = scratch
                .write_secret(&format!("value-{index}"), value)
                .map_err(SealError::Scratch)?;
            let ciphertext = self.seal_file(target, scope, &cert, &file).await?;
            sealed.insert(field.to_string(), ciphertext);
        }

        debug!(item = %target, fields = sealed.len(), "kubeseal finished");
        Ok(sealed)
    }
}
