//! Ingress build options
//!
//! Applied in the order listed by [`ingress_pipeline`]: custom annotation
//! passthrough, templating, class, rules, TLS and finally the cert-manager
//! issuer.

use std::collections::BTreeMap;

use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
    IngressServiceBackend, IngressSpec, IngressTLS, ServiceBackendPort,
};
use kube::ResourceExt;

use crate::controller::options::{
    apply_custom_annotations, apply_custom_annotations_template, BuildOption,
};
use crate::crd::GameServer;
use crate::error::{Result, ValidationError};
use crate::gameserver::{self, RoutingMode};

pub const NGINX_REWRITE_TARGET_ANNOTATION: &str = "nginx.ingress.kubernetes.io/rewrite-target";
pub const NGINX_DEFAULT_REWRITE_TARGET: &str = "/$2";

const PATH_TYPE_PREFIX: &str = "Prefix";
const PATH_TYPE_IMPLEMENTATION_SPECIFIC: &str = "ImplementationSpecific";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IngressOption {
    CustomAnnotations,
    CustomAnnotationsTemplate,
    IngressClassName,
    IngressRule { mode: RoutingMode, rewrite: bool },
    Tls(RoutingMode),
    TlsCertIssuer(String),
}

/// The ordered option list for a GameServer's Ingress
pub fn ingress_pipeline(gs: &GameServer, path_rewrite: bool) -> Vec<IngressOption> {
    let mode = gameserver::routing_mode(gs);
    vec![
        IngressOption::CustomAnnotations,
        IngressOption::CustomAnnotationsTemplate,
        IngressOption::IngressClassName,
        IngressOption::IngressRule {
            mode,
            rewrite: path_rewrite,
        },
        IngressOption::Tls(mode),
        IngressOption::TlsCertIssuer(gameserver::tls_issuer(gs).to_string()),
    ]
}

impl BuildOption<Ingress> for IngressOption {
    fn apply(&self, gs: &GameServer, ingress: &mut Ingress) -> Result<()> {
        match self {
            IngressOption::CustomAnnotations => apply_custom_annotations(
                gs,
                gameserver::OCTOPS_ANNOTATION_CUSTOM_PREFIX,
                annotations_mut(ingress),
            ),
            IngressOption::CustomAnnotationsTemplate => apply_custom_annotations_template(
                gs,
                gameserver::OCTOPS_ANNOTATION_CUSTOM_PREFIX,
                annotations_mut(ingress),
            ),
            IngressOption::IngressClassName => {
                let class = gameserver::ingress_class_name(gs);
                if !class.is_empty() {
                    spec_mut(ingress).ingress_class_name = Some(class.to_string());
                }
                Ok(())
            }
            IngressOption::IngressRule { mode, rewrite } => apply_rules(gs, ingress, *mode, *rewrite),
            IngressOption::Tls(mode) => apply_tls(gs, ingress, *mode),
            IngressOption::TlsCertIssuer(issuer) => apply_cert_issuer(gs, ingress, issuer),
        }
    }
}

fn annotations_mut(ingress: &mut Ingress) -> &mut BTreeMap<String, String> {
    ingress.metadata.annotations.get_or_insert_with(BTreeMap::new)
}

fn spec_mut(ingress: &mut Ingress) -> &mut IngressSpec {
    ingress.spec.get_or_insert_with(IngressSpec::default)
}

/// Hosts annotation for `mode`, split into its entries.
///
/// Missing and empty annotations are both validation errors.
fn mode_hosts(gs: &GameServer, mode: RoutingMode) -> Result<Vec<String>> {
    let annotation = mode.hosts_annotation();
    let value = gameserver::has_annotation(gs, annotation).ok_or_else(|| {
        ValidationError::RoutingAnnotationMissing {
            mode,
            annotation: annotation.to_string(),
            namespace: gs.namespace().unwrap_or_default(),
            name: gs.name_any(),
        }
    })?;

    let hosts = gameserver::split_hosts(value);
    if hosts.is_empty() {
        return Err(ValidationError::AnnotationEmpty {
            namespace: gs.namespace().unwrap_or_default(),
            name: gs.name_any(),
            annotation: annotation.to_string(),
        }
        .into());
    }

    Ok(hosts.into_iter().map(str::to_string).collect())
}

/// Host served for one entry of the hosts annotation
fn rule_host(gs: &GameServer, mode: RoutingMode, entry: &str) -> String {
    match mode {
        RoutingMode::Domain => format!("{}.{}", gs.name_any(), entry),
        RoutingMode::Path => entry.to_string(),
    }
}

fn apply_rules(gs: &GameServer, ingress: &mut Ingress, mode: RoutingMode, rewrite: bool) -> Result<()> {
    let name = gs.name_any();
    let port = gameserver::game_server_port(gs);
    let entries = mode_hosts(gs, mode)?;

    let (path, path_type) = match mode {
        RoutingMode::Domain => ("/".to_string(), PATH_TYPE_PREFIX),
        RoutingMode::Path => {
            let annotations = annotations_mut(ingress);
            if rewrite && !annotations.contains_key(NGINX_REWRITE_TARGET_ANNOTATION) {
                annotations.insert(
                    NGINX_REWRITE_TARGET_ANNOTATION.to_string(),
                    NGINX_DEFAULT_REWRITE_TARGET.to_string(),
                );
                (format!("/{name}(/|$)(.*)"), PATH_TYPE_IMPLEMENTATION_SPECIFIC)
            } else {
                (format!("/{name}"), PATH_TYPE_PREFIX)
            }
        }
    };

    let rules = entries
        .iter()
        .map(|entry| new_ingress_rule(rule_host(gs, mode, entry), &path, path_type, &name, port))
        .collect();

    spec_mut(ingress).rules = Some(rules);
    Ok(())
}

fn new_ingress_rule(host: String, path: &str, path_type: &str, service: &str, port: i32) -> IngressRule {
    IngressRule {
        host: Some(host),
        http: Some(HTTPIngressRuleValue {
            paths: vec![HTTPIngressPath {
                path: Some(path.to_string()),
                path_type: path_type.to_string(),
                backend: IngressBackend {
                    service: Some(IngressServiceBackend {
                        name: service.to_string(),
                        port: Some(ServiceBackendPort {
                            number: Some(port),
                            name: None,
                        }),
                    }),
                    ..Default::default()
                },
            }],
        }),
    }
}

/// Default secret for one hosts entry: `<entry>-<name>-tls`, dots as dashes
pub fn tls_secret_name(entry: &str, name: &str) -> String {
    format!("{entry}-{name}-tls").replace('.', "-")
}

fn apply_tls(gs: &GameServer, ingress: &mut Ingress, mode: RoutingMode) -> Result<()> {
    let secret_override = gameserver::has_annotation(gs, gameserver::OCTOPS_ANNOTATION_TLS_SECRET_NAME);
    if secret_override == Some("") {
        return Err(ValidationError::AnnotationEmpty {
            namespace: gs.namespace().unwrap_or_default(),
            name: gs.name_any(),
            annotation: gameserver::OCTOPS_ANNOTATION_TLS_SECRET_NAME.to_string(),
        }
        .into());
    }

    let name = gs.name_any();
    let tls = mode_hosts(gs, mode)?
        .iter()
        .map(|entry| IngressTLS {
            hosts: Some(vec![rule_host(gs, mode, entry)]),
            secret_name: Some(
                secret_override
                    .map(str::to_string)
                    .unwrap_or_else(|| tls_secret_name(entry, &name)),
            ),
        })
        .collect();

    spec_mut(ingress).tls = Some(tls);
    Ok(())
}

fn apply_cert_issuer(gs: &GameServer, ingress: &mut Ingress, issuer: &str) -> Result<()> {
    let terminate = match gameserver::has_annotation(gs, gameserver::OCTOPS_ANNOTATION_TERMINATE_TLS) {
        Some(value) if !value.is_empty() => value,
        _ => return Ok(()),
    };

    match gameserver::parse_bool(terminate) {
        None => Err(ValidationError::InvalidBool {
            annotation: gameserver::OCTOPS_ANNOTATION_TERMINATE_TLS.to_string(),
            name: gs.name_any(),
        }
        .into()),
        Some(false) => Ok(()),
        Some(true) if issuer.is_empty() => Err(ValidationError::IssuerMissing {
            annotation: gameserver::OCTOPS_ANNOTATION_ISSUER_NAME.to_string(),
            name: gs.name_any(),
        }
        .into()),
        Some(true) => {
            annotations_mut(ingress).insert(
                gameserver::CERT_MANAGER_ANNOTATION_ISSUER.to_string(),
                issuer.to_string(),
            );
            Ok(())
        }
    }
}
