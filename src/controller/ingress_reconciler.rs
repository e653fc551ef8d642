//! Get-or-create reconciliation of the Ingress

use std::sync::Arc;

use k8s_openapi::api::networking::v1::Ingress;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use crate::controller::recorder::EventRecorder;
use crate::controller::resources;
use crate::controller::store::IngressStore;
use crate::controller::ResourceKind;
use crate::crd::GameServer;
use crate::error::Result;

pub struct IngressReconciler {
    store: Arc<dyn IngressStore>,
    recorder: EventRecorder,
    path_rewrite: bool,
}

impl IngressReconciler {
    /// `path_rewrite` enables the nginx rewrite target for path routing
    pub fn new(store: Arc<dyn IngressStore>, recorder: EventRecorder, path_rewrite: bool) -> Self {
        Self {
            store,
            recorder,
            path_rewrite,
        }
    }

    #[instrument(skip(self, gs), fields(name = %gs.name_any(), namespace = gs.namespace()))]
    pub async fn reconcile(&self, gs: &GameServer) -> Result<Ingress> {
        let name = gs.name_any();
        let namespace = gs.namespace().unwrap_or_default();

        match self.store.get_ingress(&name, &namespace) {
            // Existing Ingresses are not compared against the annotations
            Some(existing) => {
                debug!("Ingress {}/{} already exists", namespace, name);
                Ok(existing.as_ref().clone())
            }
            None => self.reconcile_not_found(gs).await,
        }
    }

    async fn reconcile_not_found(&self, gs: &GameServer) -> Result<Ingress> {
        self.recorder.record_creating(gs, ResourceKind::Ingress).await;

        let ingress = match resources::build_ingress(gs, self.path_rewrite) {
            Ok(ingress) => ingress,
            Err(e) => {
                self.recorder
                    .record_failed(gs, ResourceKind::Ingress, &e)
                    .await;
                return Err(e);
            }
        };

        let result = match self.store.create_ingress(&ingress).await {
            Ok(created) => {
                info!("Created Ingress {}/{}", gs.namespace().unwrap_or_default(), gs.name_any());
                #[cfg(feature = "metrics")]
                crate::controller::metrics::inc_resource_created("Ingress");
                created
            }
            Err(e) if e.is_already_exists() => {
                debug!("Ingress for {} already exists: {}", gs.name_any(), e);
                ingress
            }
            Err(e) => {
                self.recorder
                    .record_failed(gs, ResourceKind::Ingress, &e)
                    .await;
                return Err(e);
            }
        };

        self.recorder.record_success(gs, ResourceKind::Ingress).await;
        Ok(result)
    }
}
