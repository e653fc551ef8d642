//! Error types for the gameserver ingress controller

use thiserror::Error;

use crate::controller::ResourceKind;
use crate::gameserver::RoutingMode;

/// Result alias used across the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors caused by a GameServer manifest that will not heal by retrying.
///
/// The operator has to fix the Fleet or GameServer annotations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(
        "ingress routing mode {mode} requires the annotation {annotation} to be set on gameserver {namespace}/{name}"
    )]
    RoutingAnnotationMissing {
        mode: RoutingMode,
        annotation: String,
        namespace: String,
        name: String,
    },

    #[error("gameserver {namespace}/{name} has annotation {annotation} but it is empty")]
    AnnotationEmpty {
        namespace: String,
        name: String,
        annotation: String,
    },

    #[error("annotation {annotation} for {name} must be \"true\" or \"false\"")]
    InvalidBool { annotation: String, name: String },

    #[error(
        "annotation {annotation} for {name} must be present, check your Fleet or GameServer manifest."
    )]
    IssuerMissing { annotation: String, name: String },

    #[error("custom annotation {0} does not contain a suffix")]
    CustomAnnotationSuffix(String),

    #[error("{annotation}:{value} does not contain a valid template")]
    InvalidTemplate { annotation: String, value: String },
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes error: {0}")]
    KubeError(#[from] kube::Error),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("failed to reconcile {kind} {namespace}/{name}: {source}")]
    Reconcile {
        kind: ResourceKind,
        namespace: String,
        name: String,
        #[source]
        source: Box<Error>,
    },

    #[error("retry failed after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("Cache sync error: {0}")]
    CacheSyncError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("reconcile cancelled")]
    Cancelled,
}

impl Error {
    /// Wrap an error with the resource kind and GameServer identity
    pub fn reconcile(
        kind: ResourceKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
        source: Error,
    ) -> Self {
        Error::Reconcile {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            source: Box::new(source),
        }
    }

    /// The innermost error, skipping context wrappers
    pub fn root(&self) -> &Error {
        match self {
            Error::Reconcile { source, .. } | Error::RetryExhausted { source, .. } => source.root(),
            other => other,
        }
    }

    fn api_status(&self) -> Option<(u16, &str)> {
        match self.root() {
            Error::KubeError(kube::Error::Api(e)) => Some((e.code, e.reason.as_str())),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.api_status(), Some((404, _)))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.api_status(), Some((409, "AlreadyExists")))
    }

    /// Optimistic concurrency failure on an update
    pub fn is_conflict(&self) -> bool {
        matches!(self.api_status(), Some((409, reason)) if reason != "AlreadyExists")
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.root(), Error::Validation(_))
    }

    /// Whether the watch queue should requeue the object
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self.root(),
            Error::Validation(_) | Error::ConfigError(_) | Error::Cancelled
        )
    }

    /// Short label used for metrics and logs
    pub fn kind(&self) -> &'static str {
        match self.root() {
            Error::KubeError(_) => "kube",
            Error::Validation(_) => "validation",
            Error::CacheSyncError(_) => "cache",
            Error::ConfigError(_) => "config",
            Error::Cancelled => "cancelled",
            Error::Reconcile { .. } | Error::RetryExhausted { .. } => "unknown",
        }
    }
}
