//! Readiness marker reconciliation
//!
//! Once a GameServer's Service and Ingress exist, the controller annotates the
//! GameServer with `octops.io/ingress-ready: "true"`. The flip is a
//! read-modify-write against the API server guarded by the resourceVersion, so
//! concurrent status updates from Agones are never overwritten.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use crate::controller::recorder::{EventRecorder, REASON_FAILED};
use crate::controller::retry::{retry_on_conflict, Backoff};
use crate::controller::store::GameServerStore;
use crate::crd::GameServer;
use crate::error::{Error, Result, ValidationError};
use crate::gameserver::{
    self, OCTOPS_ANNOTATION_INGRESS_CLASS_NAME, OCTOPS_ANNOTATION_INGRESS_CLASS_NAME_LEGACY,
    OCTOPS_ANNOTATION_INGRESS_READY,
};

/// What to do with the readiness marker of a GameServer
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadinessDecision {
    /// Marker absent, empty or false
    Reconcile,
    /// Marker already true, nothing to write
    AlreadyReady,
    /// Marker holds something that is not a boolean; it gets overwritten
    /// and the problem is reported
    Malformed(ValidationError),
}

pub fn readiness_decision(gs: &GameServer) -> ReadinessDecision {
    match gameserver::has_annotation(gs, OCTOPS_ANNOTATION_INGRESS_READY) {
        None | Some("") => ReadinessDecision::Reconcile,
        Some(value) => match gameserver::parse_bool(value) {
            Some(true) => ReadinessDecision::AlreadyReady,
            Some(false) => ReadinessDecision::Reconcile,
            None => ReadinessDecision::Malformed(ValidationError::InvalidBool {
                annotation: OCTOPS_ANNOTATION_INGRESS_READY.to_string(),
                name: gs.name_any(),
            }),
        },
    }
}

fn is_ready(gs: &GameServer) -> bool {
    readiness_decision(gs) == ReadinessDecision::AlreadyReady
}

pub struct GameServerReconciler {
    store: Arc<dyn GameServerStore>,
    recorder: EventRecorder,
    backoff: Backoff,
}

impl GameServerReconciler {
    pub fn new(store: Arc<dyn GameServerStore>, recorder: EventRecorder, backoff: Backoff) -> Self {
        Self {
            store,
            recorder,
            backoff,
        }
    }

    /// Flip the readiness marker to `"true"`.
    ///
    /// Returns the GameServer as last written, or `gs` itself when the marker
    /// was already set. A malformed marker is still flipped, then reported as
    /// a validation error.
    #[instrument(skip(self, gs), fields(name = %gs.name_any(), namespace = gs.namespace()))]
    pub async fn reconcile(&self, gs: &GameServer) -> Result<GameServer> {
        match readiness_decision(gs) {
            ReadinessDecision::AlreadyReady => {
                debug!("{} already annotated as ingress ready", gameserver::namespaced(gs));
                Ok(gs.clone())
            }
            ReadinessDecision::Reconcile => self.mark_ready(gs).await,
            ReadinessDecision::Malformed(err) => {
                warn!("{}, overwriting it", err);
                self.recorder
                    .record_warning(gs, REASON_FAILED, &err.to_string())
                    .await;
                self.mark_ready(gs).await?;
                Err(err.into())
            }
        }
    }

    async fn mark_ready(&self, gs: &GameServer) -> Result<GameServer> {
        let name = gs.name_any();
        let namespace = gs.namespace().unwrap_or_default();
        let (store, name_ref, namespace_ref) = (&self.store, &name, &namespace);

        let (result, written) = retry_on_conflict(self.backoff, move || async move {
            let mut current = store.get_game_server(name_ref, namespace_ref).await?;
            if is_ready(&current) {
                return Ok((current, false));
            }

            current
                .annotations_mut()
                .insert(OCTOPS_ANNOTATION_INGRESS_READY.to_string(), "true".to_string());
            let updated = store.update_game_server(&current).await?;
            Ok::<_, Error>((updated, true))
        })
        .await?;

        if !written {
            debug!("GameServer {}/{} marked ingress ready by another writer", namespace, name);
            return Ok(result);
        }

        info!("GameServer {}/{} annotated as ingress ready", namespace, name);
        #[cfg(feature = "metrics")]
        crate::controller::metrics::inc_gameserver_ready();

        self.recorder
            .record_event(
                &result,
                &format!("GameServer annotated with {OCTOPS_ANNOTATION_INGRESS_READY}"),
            )
            .await;
        self.record_deprecated_annotations(&result).await;

        Ok(result)
    }

    async fn record_deprecated_annotations(&self, gs: &GameServer) {
        if gameserver::has_annotation(gs, OCTOPS_ANNOTATION_INGRESS_CLASS_NAME_LEGACY).is_none() {
            return;
        }

        let message = format!(
            "Annotation {OCTOPS_ANNOTATION_INGRESS_CLASS_NAME_LEGACY} deprecated in favor of {OCTOPS_ANNOTATION_INGRESS_CLASS_NAME}, future versions won't support this annotation"
        );
        warn!("{}", message.to_lowercase());
        self.recorder.record_event(gs, &message).await;
    }
}
