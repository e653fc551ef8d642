//! Kubernetes resource builders for GameServers
//!
//! Every GameServer that asks for routing gets a headless Service and an
//! Ingress, both named after it and owned by it so the API server garbage
//! collects them together with the GameServer.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{Ingress, IngressSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::{Resource, ResourceExt};

use crate::controller::ingress_options::ingress_pipeline;
use crate::controller::options;
use crate::controller::service_options::service_pipeline;
use crate::crd::GameServer;
use crate::error::Result;
use crate::gameserver::{self, AGONES_GAMESERVER_NAME_LABEL};

/// Name of the single port exposed by the headless Service
pub const SERVICE_PORT_NAME: &str = "gameserver";

/// Labels stamped on every object created for a GameServer.
///
/// The `agones.dev/gameserver` label is also what the Service and Ingress
/// caches are scoped to.
pub fn standard_labels(gs: &GameServer) -> BTreeMap<String, String> {
    let mut labels = selector_labels(gs);
    labels.insert(
        "app.kubernetes.io/managed-by".to_string(),
        "gameserver-ingress-controller".to_string(),
    );
    labels
}

/// Selector matching the pod Agones runs for the GameServer
fn selector_labels(gs: &GameServer) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(AGONES_GAMESERVER_NAME_LABEL.to_string(), gs.name_any());
    labels
}

/// Create a controller OwnerReference for garbage collection
pub fn owner_reference(gs: &GameServer) -> OwnerReference {
    OwnerReference {
        api_version: GameServer::api_version(&()).to_string(),
        kind: GameServer::kind(&()).to_string(),
        name: gs.name_any(),
        uid: gs.metadata.uid.clone().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

fn skeleton_meta(gs: &GameServer) -> ObjectMeta {
    ObjectMeta {
        name: Some(gs.name_any()),
        namespace: gs.namespace(),
        labels: Some(standard_labels(gs)),
        annotations: Some(BTreeMap::new()),
        owner_references: Some(vec![owner_reference(gs)]),
        ..Default::default()
    }
}

// ============================================================================
// Service
// ============================================================================

/// Headless Service skeleton forwarding the allocated port to the container
fn new_service(gs: &GameServer) -> Service {
    Service {
        metadata: skeleton_meta(gs),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(gs)),
            ports: Some(vec![ServicePort {
                name: Some(SERVICE_PORT_NAME.to_string()),
                port: gameserver::game_server_port(gs),
                target_port: Some(IntOrString::Int(gameserver::game_server_container_port(gs))),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Build the Service for a GameServer from its annotations
pub fn build_service(gs: &GameServer) -> Result<Service> {
    options::build(gs, new_service(gs), &service_pipeline())
}

// ============================================================================
// Ingress
// ============================================================================

fn new_ingress(gs: &GameServer) -> Ingress {
    Ingress {
        metadata: skeleton_meta(gs),
        spec: Some(IngressSpec::default()),
        status: None,
    }
}

/// Build the Ingress for a GameServer from its annotations.
///
/// `path_rewrite` injects the nginx rewrite target for path routing.
pub fn build_ingress(gs: &GameServer, path_rewrite: bool) -> Result<Ingress> {
    options::build(gs, new_ingress(gs), &ingress_pipeline(gs, path_rewrite))
}
