//! Annotation model for GameServers
//!
//! Pure helpers that read and classify the annotations operators put on
//! Fleets and GameServers. Absence is always a valid answer here; callers that
//! need a mandatory annotation raise their own validation error.

use std::fmt;

use kube::ResourceExt;

use crate::crd::{GameServer, GameServerState};

pub const OCTOPS_ANNOTATION_INGRESS_MODE: &str = "octops.io/gameserver-ingress-mode";
pub const OCTOPS_ANNOTATION_INGRESS_DOMAIN: &str = "octops.io/gameserver-ingress-domain";
pub const OCTOPS_ANNOTATION_INGRESS_FQDN: &str = "octops.io/gameserver-ingress-fqdn";
pub const OCTOPS_ANNOTATION_TERMINATE_TLS: &str = "octops.io/terminate-tls";
pub const OCTOPS_ANNOTATION_TLS_SECRET_NAME: &str = "octops.io/tls-secret-name";
pub const OCTOPS_ANNOTATION_ISSUER_NAME: &str = "octops.io/issuer-tls-name";
pub const OCTOPS_ANNOTATION_CUSTOM_PREFIX: &str = "octops-";
pub const OCTOPS_ANNOTATION_CUSTOM_SERVICE_PREFIX: &str = "octops.service-";
pub const OCTOPS_ANNOTATION_INGRESS_READY: &str = "octops.io/ingress-ready";
pub const OCTOPS_ANNOTATION_INGRESS_CLASS_NAME: &str = "octops.io/ingress-class-name";
pub const OCTOPS_ANNOTATION_INGRESS_CLASS_NAME_LEGACY: &str = "octops-kubernetes.io/ingress.class";

pub const CERT_MANAGER_ANNOTATION_ISSUER: &str = "cert-manager.io/cluster-issuer";
pub const AGONES_GAMESERVER_NAME_LABEL: &str = "agones.dev/gameserver";

/// How hosts and paths are derived for a GameServer's Ingress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RoutingMode {
    /// One subdomain per GameServer: `<name>.<domain>/`
    #[default]
    Domain,
    /// One shared FQDN, one path per GameServer: `<fqdn>/<name>`
    Path,
}

impl RoutingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingMode::Domain => "domain",
            RoutingMode::Path => "path",
        }
    }

    /// The annotation holding the hosts this mode routes on
    pub fn hosts_annotation(&self) -> &'static str {
        match self {
            RoutingMode::Domain => OCTOPS_ANNOTATION_INGRESS_DOMAIN,
            RoutingMode::Path => OCTOPS_ANNOTATION_INGRESS_FQDN,
        }
    }
}

impl fmt::Display for RoutingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn has_annotation<'a>(gs: &'a GameServer, annotation: &str) -> Option<&'a str> {
    gs.metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(annotation))
        .map(String::as_str)
}

/// Routing mode requested by the GameServer, `Domain` when absent or unknown
pub fn routing_mode(gs: &GameServer) -> RoutingMode {
    match has_annotation(gs, OCTOPS_ANNOTATION_INGRESS_MODE) {
        Some(mode) if mode.trim().eq_ignore_ascii_case("path") => RoutingMode::Path,
        _ => RoutingMode::Domain,
    }
}

pub fn tls_issuer(gs: &GameServer) -> &str {
    has_annotation(gs, OCTOPS_ANNOTATION_ISSUER_NAME).unwrap_or("")
}

/// Ingress class name, falling back to the deprecated annotation
pub fn ingress_class_name(gs: &GameServer) -> &str {
    has_annotation(gs, OCTOPS_ANNOTATION_INGRESS_CLASS_NAME)
        .or_else(|| has_annotation(gs, OCTOPS_ANNOTATION_INGRESS_CLASS_NAME_LEGACY))
        .unwrap_or("")
}

pub fn is_shutdown(gs: &GameServer) -> bool {
    gs.state() == GameServerState::Shutdown
}

/// Only Scheduled, RequestReady and Ready GameServers are exposed
pub fn must_reconcile(gs: &GameServer) -> bool {
    matches!(
        gs.state(),
        GameServerState::Scheduled | GameServerState::RequestReady | GameServerState::Ready
    )
}

/// Port allocated by Agones, 0 until one is published
pub fn game_server_port(gs: &GameServer) -> i32 {
    gs.status
        .as_ref()
        .and_then(|s| s.ports.first())
        .map(|p| p.port)
        .unwrap_or(0)
}

pub fn game_server_container_port(gs: &GameServer) -> i32 {
    gs.spec
        .ports
        .first()
        .map(|p| p.container_port)
        .unwrap_or(0)
}

/// `namespace/name` of the GameServer
pub fn namespaced(gs: &GameServer) -> String {
    format!(
        "{}/{}",
        gs.namespace().unwrap_or_default(),
        gs.name_any()
    )
}

/// Parse a boolean the way operators write them in manifests.
///
/// Accepts `1, t, T, TRUE, true, True, 0, f, F, FALSE, false, False`.
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Split a comma-separated host list, dropping blanks
pub fn split_hosts(value: &str) -> Vec<&str> {
    value
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .collect()
}
