//! Per-run orchestration and the per-item pipeline
//!
//! A run is: find the controller, enumerate, validate keys, fetch the public
//! key once, then drive each valid ref through
//! `read -> recover -> reseal -> apply` with up to `workers` items in flight.
//! Fatal errors return before any item is touched; item errors only ever
//! become that item's outcome.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use super::SummaryRecorder;
use crate::cluster::{create_client, ClusterClient, ControllerEndpoint, KubeClusterClient};
use crate::config::RunConfig;
use crate::error::ItemError;
use crate::keys::{save_certificate, ControllerKeyFetcher, KeyFetcher};
use crate::model::{
    PublicKeyMaterial, ReencryptionOutcome, RefError, RunSummary, SealedSecretRef, SkipReason,
    Subject, SuccessKind,
};
use crate::relay::{ControllerDecryptRelay, DecryptRelay};
use crate::report::{RecordContext, ReportedError, Reporter, Severity};
use crate::reseal::{KubesealPrimitive, Resealer};
use crate::retry::retry_with_backoff;
use crate::{Error, Result};

/// What discovery decided for one raw key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedItem {
    /// Valid, first occurrence: run the pipeline
    Work(SealedSecretRef),
    /// Key failed validation
    Invalid {
        /// Key as discovered
        raw: String,
        /// Why it was rejected
        error: RefError,
    },
    /// Ref already planned earlier in discovery order
    Duplicate(SealedSecretRef),
}

impl PlannedItem {
    fn subject(&self) -> Subject {
        match self {
            PlannedItem::Work(r) | PlannedItem::Duplicate(r) => Subject::Ref(r.clone()),
            PlannedItem::Invalid { raw, .. } => Subject::Invalid(raw.clone()),
        }
    }
}

/// Validate discovery keys in order. Each ref is planned for work at most once.
pub fn plan_items(keys: Vec<String>) -> Vec<PlannedItem> {
    let mut seen = HashSet::new();
    keys.into_iter()
        .map(|raw| match SealedSecretRef::parse(&raw) {
            Ok(r) if seen.insert(r.clone()) => PlannedItem::Work(r),
            Ok(r) => PlannedItem::Duplicate(r),
            Err(error) => PlannedItem::Invalid { raw, error },
        })
        .collect()
}

/// Reconciliation engine for one run
pub struct Reconciler {
    cluster: Arc<dyn ClusterClient>,
    keys: Arc<dyn KeyFetcher>,
    relay: Arc<dyn DecryptRelay>,
    resealer: Resealer,
    reporter: Reporter,
}

impl Reconciler {
    /// Assemble an engine from its collaborators
    pub fn new(
        cluster: Arc<dyn ClusterClient>,
        keys: Arc<dyn KeyFetcher>,
        relay: Arc<dyn DecryptRelay>,
        resealer: Resealer,
        reporter: Reporter,
    ) -> Self {
        Self {
            cluster,
            keys,
            relay,
            resealer,
            reporter,
        }
    }

    /// Build the production engine: kube client, controller relay and kubeseal
    pub async fn from_config(config: &RunConfig) -> Result<Self> {
        let client = create_client(config.kubeconfig.as_deref()).await?;
        Ok(Self::new(
            Arc::new(KubeClusterClient::new(client.clone())),
            Arc::new(ControllerKeyFetcher::new(client.clone())),
            Arc::new(ControllerDecryptRelay::new(client, &config.decrypt_path)),
            Resealer::new(Arc::new(KubesealPrimitive::new(&config.kubeseal))),
            Reporter::new(config.log.level),
        ))
    }

    /// Reporter used for this run's records
    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Execute one run.
    ///
    /// Returns `Err` only for fatal problems, all of which happen before the
    /// first item is read. Once items are dispatched the run always produces a
    /// summary. Cancelling `cancel` stops dispatching; in-flight items finish.
    #[instrument(skip_all, fields(scope = %config.scope, dry_run = config.dry_run))]
    pub async fn run(&self, config: &RunConfig, cancel: &CancellationToken) -> Result<RunSummary> {
        let started_at = Utc::now();

        let endpoint = self
            .cluster
            .discover_controller_endpoint(&config.controller)
            .await
            .map_err(|e| self.fatal("Controller discovery failed", e))?;

        let keys = self
            .cluster
            .list_sealed_secrets(&config.scope)
            .await
            .map_err(|e| self.fatal("Discovery failed", e))?;

        let plan = plan_items(keys);
        let recorder = SummaryRecorder::new(plan.iter().map(PlannedItem::subject).collect());
        let mut work = Vec::new();
        for (index, item) in plan.into_iter().enumerate() {
            match item {
                PlannedItem::Work(target) => work.push((index, target)),
                PlannedItem::Invalid { raw, error } => {
                    let outcome = ReencryptionOutcome::invalid_ref(raw, &error);
                    self.reporter.record(
                        Severity::Warn,
                        "Skipping malformed discovery key",
                        &RecordContext::new()
                            .subject(&outcome.subject)
                            .error(ReportedError::Ref(&error)),
                    );
                    recorder.record(index, outcome);
                }
                PlannedItem::Duplicate(target) => {
                    let outcome = ReencryptionOutcome::skipped(target, SkipReason::Duplicate);
                    self.reporter.record(
                        Severity::Warn,
                        "Skipping duplicate discovery key",
                        &RecordContext::new().subject(&outcome.subject),
                    );
                    recorder.record(index, outcome);
                }
            }
        }

        let key = Arc::new(
            self.keys
                .fetch_current_public_key(&endpoint)
                .await
                .map_err(|e| self.fatal("Public key fetch failed", e))?,
        );

        if let Some(path) = &config.save_cert {
            if let Err(e) = save_certificate(&key, path).await {
                self.reporter.record(
                    Severity::Warn,
                    "Could not save certificate",
                    &RecordContext::new()
                        .key(key.fingerprint())
                        .error(ReportedError::Run(&e)),
                );
            }
        }

        self.reporter.record(
            Severity::Info,
            "Re-encrypting",
            &RecordContext::new().key(key.fingerprint()),
        );

        let total = recorder.total();
        futures::stream::iter(work)
            .map(|(index, target)| {
                let endpoint = &endpoint;
                let key = &key;
                let recorder = &recorder;
                async move {
                    if cancel.is_cancelled() {
                        return;
                    }
                    let outcome = self.process_item(config, endpoint, key, target).await;
                    recorder.record(index, outcome);
                    self.reporter.progress(recorder.recorded(), total);
                }
            })
            .buffer_unordered(config.workers.max(1))
            .for_each(|()| futures::future::ready(()))
            .await;

        let summary = recorder.finish(
            Some(key.fingerprint().clone()),
            config.dry_run,
            started_at,
        );
        if summary.cancelled {
            self.reporter
                .record(Severity::Warn, "Run cancelled", &RecordContext::new());
        }
        self.reporter.record_summary(&summary);
        Ok(summary)
    }

    /// Run one item to its terminal outcome. Conflicts restart the pipeline
    /// from a fresh read, up to the configured number of attempts.
    #[instrument(skip_all, fields(item = %target))]
    async fn process_item(
        &self,
        config: &RunConfig,
        endpoint: &ControllerEndpoint,
        key: &PublicKeyMaterial,
        target: SealedSecretRef,
    ) -> ReencryptionOutcome {
        let result = retry_with_backoff(
            &config.retry(),
            "reencrypt",
            ItemError::is_conflict,
            |attempt| self.attempt_item(config, endpoint, key, &target, attempt),
        )
        .await;

        match result {
            Ok(kind) => {
                let outcome = ReencryptionOutcome::succeeded(target, kind);
                self.reporter.record(
                    Severity::Info,
                    "Item finished",
                    &RecordContext::new()
                        .subject(&outcome.subject)
                        .status(&outcome.status),
                );
                outcome
            }
            Err(e) => {
                let outcome = ReencryptionOutcome::failed(target, &e);
                self.reporter.record(
                    Severity::Warn,
                    "Item failed",
                    &RecordContext::new()
                        .subject(&outcome.subject)
                        .status(&outcome.status)
                        .error(ReportedError::Item(&e)),
                );
                outcome
            }
        }
    }

    async fn attempt_item(
        &self,
        config: &RunConfig,
        endpoint: &ControllerEndpoint,
        key: &PublicKeyMaterial,
        target: &SealedSecretRef,
        attempt: u32,
    ) -> std::result::Result<SuccessKind, ItemError> {
        let subject = Subject::Ref(target.clone());
        self.reporter.record(
            Severity::Debug,
            "Reading current object",
            &RecordContext::new().subject(&subject).attempt(attempt),
        );
        let stored = self.cluster.get_sealed_secret(target).await?;

        if !config.force && stored.key_fingerprint().as_ref() == Some(key.fingerprint()) {
            return Ok(SuccessKind::AlreadyCurrent);
        }

        let recovered = self.relay.recover_plaintext(endpoint, &stored).await?;
        // Template data comes back unencrypted; only encryptedData fields are resealed
        let plaintext = recovered
            .select(stored.encrypted_data().keys().map(String::as_str))
            .map_err(|field| {
                ItemError::recover(
                    target.clone(),
                    format!("recovered secret is missing sealed field '{field}'"),
                )
            })?;
        drop(recovered);
        let payload = self
            .resealer
            .reseal(target, stored.scope(), &plaintext, key)
            .await?;
        drop(plaintext);

        payload.ensure_bound_to(target, key.fingerprint())?;

        if config.dry_run {
            self.reporter.record(
                Severity::Debug,
                "Dry run, skipping apply",
                &RecordContext::new().subject(&subject).attempt(attempt),
            );
            return Ok(SuccessKind::DryRun);
        }

        self.cluster.apply_sealed_secret(&stored, &payload).await?;
        Ok(SuccessKind::Applied)
    }

    fn fatal(&self, message: &'static str, error: Error) -> Error {
        self.reporter.record(
            Severity::Error,
            message,
            &RecordContext::new().error(ReportedError::Run(&error)),
        );
        error
    }
}
