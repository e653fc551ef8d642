//! GameServer event handling
//!
//! The handler receives add, update and delete notifications from the
//! dispatcher, drops the ones that do not concern it and drives the Service,
//! Ingress and readiness reconcilers in that order.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::controller::gameserver_reconciler::GameServerReconciler;
use crate::controller::ingress_reconciler::IngressReconciler;
use crate::controller::service_reconciler::ServiceReconciler;
use crate::controller::ResourceKind;
use crate::crd::{GameServer, GameServerState};
use crate::error::{Error, Result};
use crate::gameserver::{self, OCTOPS_ANNOTATION_INGRESS_MODE};

/// Receiver of GameServer watch notifications
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_add(&self, gs: &GameServer) -> Result<()>;
    /// Only `new` is inspected, `old` is the previously cached object
    async fn on_update(&self, old: &GameServer, new: &GameServer) -> Result<()>;
    async fn on_delete(&self, gs: &GameServer) -> Result<()>;
}

/// Why an event was dropped without reconciling
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    NoRoutingMode,
    Shutdown,
    NotReady(GameServerState),
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NoRoutingMode => "no_routing_mode",
            SkipReason::Shutdown => "shutdown",
            SkipReason::NotReady(_) => "not_ready",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoRoutingMode => {
                write!(f, "annotation {OCTOPS_ANNOTATION_INGRESS_MODE} not present")
            }
            SkipReason::Shutdown => f.write_str("gameserver is shutting down"),
            SkipReason::NotReady(state) => write!(f, "gameserver state {state} is not reconcilable"),
        }
    }
}

/// State gate: `Some(reason)` when the GameServer must be left alone
pub fn skip_reason(gs: &GameServer) -> Option<SkipReason> {
    if gameserver::has_annotation(gs, OCTOPS_ANNOTATION_INGRESS_MODE).is_none() {
        return Some(SkipReason::NoRoutingMode);
    }
    if gameserver::is_shutdown(gs) {
        return Some(SkipReason::Shutdown);
    }
    if !gameserver::must_reconcile(gs) {
        return Some(SkipReason::NotReady(gs.state()));
    }
    None
}

pub struct GameServerEventHandler {
    services: ServiceReconciler,
    ingresses: IngressReconciler,
    gameservers: GameServerReconciler,
    token: CancellationToken,
}

impl GameServerEventHandler {
    pub fn new(
        services: ServiceReconciler,
        ingresses: IngressReconciler,
        gameservers: GameServerReconciler,
        token: CancellationToken,
    ) -> Self {
        Self {
            services,
            ingresses,
            gameservers,
            token,
        }
    }

    /// Gate the GameServer, then converge its Service, Ingress and readiness
    /// marker.
    ///
    /// Cancelling the handler's token aborts the sequence with
    /// [`Error::Cancelled`].
    #[instrument(skip(self, gs), fields(name = %gs.name_any(), namespace = gs.namespace()))]
    pub async fn reconcile(&self, gs: &GameServer) -> Result<()> {
        if let Some(reason) = skip_reason(gs) {
            debug!("skipping {}: {}", gameserver::namespaced(gs), reason);
            #[cfg(feature = "metrics")]
            crate::controller::metrics::inc_event_skipped(reason.as_str());
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Error::Cancelled),
            result = self.converge(gs) => result,
        }
    }

    async fn converge(&self, gs: &GameServer) -> Result<()> {
        let namespace = gs.namespace().unwrap_or_default();
        let name = gs.name_any();

        self.services
            .reconcile(gs)
            .await
            .map_err(|e| Error::reconcile(ResourceKind::Service, &namespace, &name, e))?;

        self.ingresses
            .reconcile(gs)
            .await
            .map_err(|e| Error::reconcile(ResourceKind::Ingress, &namespace, &name, e))?;

        self.gameservers
            .reconcile(gs)
            .await
            .map_err(|e| Error::reconcile(ResourceKind::GameServer, &namespace, &name, e))?;

        Ok(())
    }
}

#[async_trait]
impl EventHandler for GameServerEventHandler {
    async fn on_add(&self, gs: &GameServer) -> Result<()> {
        debug!("GameServer {} added", gameserver::namespaced(gs));
        self.reconcile(gs).await
    }

    async fn on_update(&self, _old: &GameServer, new: &GameServer) -> Result<()> {
        self.reconcile(new).await
    }

    async fn on_delete(&self, gs: &GameServer) -> Result<()> {
        // Service and Ingress are garbage collected through their owner reference
        info!("GameServer {} deleted", gameserver::namespaced(gs));
        Ok(())
    }
}

/// Shared handle used by the dispatcher
pub type SharedHandler = Arc<dyn EventHandler>;
