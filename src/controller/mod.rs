//! Controller module for GameServer ingress reconciliation
//! This module contains the watch dispatcher, the per-kind reconcilers and
//! the builders for the Service and Ingress that expose a GameServer.

pub mod gameserver_reconciler;
pub mod handler;
pub mod ingress_options;
pub mod ingress_reconciler;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod options;
mod reconciler;
#[cfg(test)]
mod reconciler_test;
pub mod recorder;
pub mod resources;
pub mod retry;
pub mod service_options;
pub mod service_reconciler;
pub mod store;
#[cfg(test)]
mod gameserver_reconciler_test;
#[cfg(test)]
pub(crate) mod test_support;

use std::fmt;

pub use gameserver_reconciler::{readiness_decision, GameServerReconciler, ReadinessDecision};
pub use handler::{skip_reason, EventHandler, GameServerEventHandler, SharedHandler, SkipReason};
pub use ingress_reconciler::IngressReconciler;
pub use reconciler::{run_controller, ControllerState, Dispatcher};
pub use recorder::{EventRecorder, EventSink, KubeEventSink};
pub use resources::{build_ingress, build_service};
pub use retry::{calculate_backoff, retry_on_conflict, Backoff};
pub use service_reconciler::ServiceReconciler;
pub use store::{GameServerStore, IngressStore, KubeStore, ServiceStore};

/// Kind of object a reconcile step works on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Service,
    Ingress,
    GameServer,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Service => "Service",
            ResourceKind::Ingress => "Ingress",
            ResourceKind::GameServer => "GameServer",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
