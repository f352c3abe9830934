//! Command line parsing and the immutable run configuration
//!
//! [`Cli`] is parsed once in `main` and validated into a [`RunConfig`], which
//! is then passed by reference to everything that needs it.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};

use crate::report::Severity;
use crate::{Error, Result};

/// Upper bound on concurrent item pipelines
pub const MAX_WORKERS: usize = 64;

/// Upper bound on per-item attempts
pub const MAX_ATTEMPTS_LIMIT: u32 = 10;

/// Re-encrypt SealedSecrets under the controller's current key
#[derive(Parser, Debug, Clone)]
#[command(name = "reencrypt", version, about, long_about = None)]
pub struct Cli {
    /// Only re-encrypt SealedSecrets in this namespace
    #[arg(
        short = 'n',
        long,
        env = "SEALED_REENCRYPT_NAMESPACE",
        conflicts_with = "all_namespaces"
    )]
    pub namespace: Option<String>,

    /// Re-encrypt SealedSecrets in every namespace (default)
    #[arg(short = 'A', long)]
    pub all_namespaces: bool,

    /// Minimum severity of emitted log records
    #[arg(long, value_enum, env = "SEALED_REENCRYPT_LOG_LEVEL", default_value_t = Severity::Info)]
    pub log_level: Severity,

    /// Append log records to this file
    #[arg(long, env = "SEALED_REENCRYPT_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Console log format
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Recover and reseal every item but never write to the cluster
    #[arg(long)]
    pub dry_run: bool,

    /// Reseal even objects already sealed under the current key
    #[arg(long)]
    pub force: bool,

    /// Number of items processed concurrently
    #[arg(long, env = "SEALED_REENCRYPT_WORKERS", default_value_t = 1)]
    pub workers: usize,

    /// Attempts per item when the object is modified concurrently
    #[arg(long, default_value_t = crate::DEFAULT_MAX_ATTEMPTS)]
    pub max_attempts: u32,

    /// Stop dispatching new items after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Summary format written to stdout
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Save the fetched public certificate to this path
    #[arg(long)]
    pub save_cert: Option<PathBuf>,

    /// Namespace of the sealed-secrets controller
    #[arg(long, env = "SEALED_REENCRYPT_CONTROLLER_NAMESPACE", default_value = crate::DEFAULT_CONTROLLER_NAMESPACE)]
    pub controller_namespace: String,

    /// Service name of the sealed-secrets controller
    #[arg(long, env = "SEALED_REENCRYPT_CONTROLLER_NAME", default_value = crate::DEFAULT_CONTROLLER_NAME)]
    pub controller_name: String,

    /// Controller path that unseals a posted SealedSecret
    #[arg(long, default_value = crate::DEFAULT_DECRYPT_PATH)]
    pub decrypt_path: String,

    /// Path to the kubeseal binary
    #[arg(long, env = "SEALED_REENCRYPT_KUBESEAL", default_value = "kubeseal")]
    pub kubeseal: PathBuf,

    /// Kubeconfig to use instead of the in-cluster or default config
    #[arg(long)]
    pub kubeconfig: Option<PathBuf>,
}

/// Console log format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines
    Text,
    /// One JSON object per record
    Json,
}

/// Summary output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Per-item lines followed by a totals line
    Text,
    /// The full summary as JSON
    Json,
}

/// Which namespaces to enumerate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceScope {
    /// Every namespace in the cluster
    AllNamespaces,
    /// A single namespace
    Namespace(String),
}

impl std::fmt::Display for NamespaceScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NamespaceScope::AllNamespaces => f.write_str("all namespaces"),
            NamespaceScope::Namespace(ns) => write!(f, "namespace {ns}"),
        }
    }
}

/// Where to look for the sealed-secrets controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSelector {
    /// Namespace of the controller Service
    pub namespace: String,
    /// Name of the controller Service
    pub name: String,
}

impl Default for ControllerSelector {
    fn default() -> Self {
        Self {
            namespace: crate::DEFAULT_CONTROLLER_NAMESPACE.to_string(),
            name: crate::DEFAULT_CONTROLLER_NAME.to_string(),
        }
    }
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Minimum severity
    pub level: Severity,
    /// Console format
    pub format: LogFormat,
    /// Append-only log file
    pub file: Option<PathBuf>,
}

/// Everything a run needs, fixed before the run starts
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Namespaces to enumerate
    pub scope: NamespaceScope,
    /// Suppress writes
    pub dry_run: bool,
    /// Reseal objects that are already current
    pub force: bool,
    /// Concurrent item pipelines
    pub workers: usize,
    /// Attempts per item on conflict
    pub max_attempts: u32,
    /// First backoff delay between conflict retries
    pub retry_initial_delay: Duration,
    /// Stop dispatching after this long
    pub timeout: Option<Duration>,
    /// Controller location
    pub controller: ControllerSelector,
    /// Controller decrypt path
    pub decrypt_path: String,
    /// kubeseal binary
    pub kubeseal: PathBuf,
    /// Explicit kubeconfig
    pub kubeconfig: Option<PathBuf>,
    /// Logging settings
    pub log: LogConfig,
    /// Summary format
    pub output: OutputFormat,
    /// Where to save the fetched certificate
    pub save_cert: Option<PathBuf>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            scope: NamespaceScope::AllNamespaces,
            dry_run: false,
            force: false,
            workers: 1,
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            retry_initial_delay: Duration::from_millis(200),
            timeout: None,
            controller: ControllerSelector::default(),
            decrypt_path: crate::DEFAULT_DECRYPT_PATH.to_string(),
            kubeseal: PathBuf::from("kubeseal"),
            kubeconfig: None,
            log: LogConfig {
                level: Severity::Info,
                format: LogFormat::Text,
                file: None,
            },
            output: OutputFormat::Text,
            save_cert: None,
        }
    }
}

impl RunConfig {
    /// Retry policy for conflicting items
    pub fn retry(&self) -> crate::retry::RetryConfig {
        crate::retry::RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: self.retry_initial_delay,
            ..Default::default()
        }
    }
}

impl Cli {
    /// Validate the parsed arguments into a [`RunConfig`]
    pub fn into_config(self) -> Result<RunConfig> {
        let scope = match self.namespace {
            Some(ns) if ns.trim().is_empty() => {
                return Err(Error::config("--namespace must not be empty"));
            }
            Some(ns) => NamespaceScope::Namespace(ns),
            None => NamespaceScope::AllNamespaces,
        };

        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(Error::config(format!(
                "--workers must be between 1 and {MAX_WORKERS}, got {}",
                self.workers
            )));
        }

        if self.max_attempts == 0 || self.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(Error::config(format!(
                "--max-attempts must be between 1 and {MAX_ATTEMPTS_LIMIT}, got {}",
                self.max_attempts
            )));
        }

        if !self.decrypt_path.starts_with('/') {
            return Err(Error::config(format!(
                "--decrypt-path must start with '/', got '{}'",
                self.decrypt_path
            )));
        }

        if self.controller_namespace.is_empty() || self.controller_name.is_empty() {
            return Err(Error::config(
                "--controller-namespace and --controller-name must not be empty",
            ));
        }

        if self.timeout_secs == Some(0) {
            return Err(Error::config("--timeout-secs must be greater than 0"));
        }

        Ok(RunConfig {
            scope,
            dry_run: self.dry_run,
            force: self.force,
            workers: self.workers,
            max_attempts: self.max_attempts,
            timeout: self.timeout_secs.map(Duration::from_secs),
            controller: ControllerSelector {
                namespace: self.controller_namespace,
                name: self.controller_name,
            },
            decrypt_path: self.decrypt_path,
            kubeseal: self.kubeseal,
            kubeconfig: self.kubeconfig,
            log: LogConfig {
                level: self.log_level,
                format: self.log_format,
                file: self.log_file,
            },
            output: self.output,
            save_cert: self.save_cert,
            ..RunConfig::default()
        })
    }
}
