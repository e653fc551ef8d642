//! Get-or-create reconciliation of the headless Service

use std::sync::Arc;

use k8s_openapi::api::core::v1::Service;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::controller::recorder::EventRecorder;
use crate::controller::resources;
use crate::controller::store::ServiceStore;
use crate::controller::ResourceKind;
use crate::crd::GameServer;
use crate::error::Result;

pub struct ServiceReconciler {
    store: Arc<dyn ServiceStore>,
    recorder: EventRecorder,
}

impl ServiceReconciler {
    pub fn new(store: Arc<dyn ServiceStore>, recorder: EventRecorder) -> Self {
        Self { store, recorder }
    }

    /// Make sure the GameServer has its Service.
    ///
    /// An existing Service is returned as found in the cache and never
    /// updated.
    #[instrument(skip(self, gs), fields(name = %gs.name_any(), namespace = gs.namespace()))]
    pub async fn reconcile(&self, gs: &GameServer) -> Result<Service> {
        let name = gs.name_any();
        let namespace = gs.namespace().unwrap_or_default();

        if let Some(existing) = self.store.get_service(&name, &namespace) {
            debug!("Service {}/{} already exists", namespace, name);
            return Ok(existing.as_ref().clone());
        }

        self.reconcile_not_found(gs).await
    }

    async fn reconcile_not_found(&self, gs: &GameServer) -> Result<Service> {
        self.recorder.record_creating(gs, ResourceKind::Service).await;

        let service = match resources::build_service(gs) {
            Ok(service) => service,
            Err(e) => {
                self.recorder
                    .record_failed(gs, ResourceKind::Service, &e)
                    .await;
                return Err(e);
            }
        };

        let result = match self.store.create_service(&service).await {
            Ok(created) => {
                info!("Created Service {}/{}", gs.namespace().unwrap_or_default(), gs.name_any());
                #[cfg(feature = "metrics")]
                crate::controller::metrics::inc_resource_created("Service");
                created
            }
            Err(e) if e.is_already_exists() => {
                debug!("Service for {} already exists: {}", gs.name_any(), e);
                service
            }
            Err(e) => {
                self.recorder
                    .record_failed(gs, ResourceKind::Service, &e)
                    .await;
                return Err(e);
            }
        };

        self.recorder.record_success(gs, ResourceKind::Service).await;
        Ok(result)
    }
}
