//! Store facade for the reconcilers
//!
//! Reads of Services and Ingresses are served from reflector caches kept warm
//! by background watchers. Writes, and every GameServer access, go straight to
//! the API server.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::controller::retry::with_retry;
use crate::crd::GameServer;
use crate::error::{Error, Result};
use crate::gameserver::AGONES_GAMESERVER_NAME_LABEL;

#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Cached lookup, `None` when the cache has no such Service
    fn get_service(&self, name: &str, namespace: &str) -> Option<Arc<Service>>;
    async fn create_service(&self, service: &Service) -> Result<Service>;
}

#[async_trait]
pub trait IngressStore: Send + Sync {
    /// Cached lookup, `None` when the cache has no such Ingress
    fn get_ingress(&self, name: &str, namespace: &str) -> Option<Arc<Ingress>>;
    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress>;
}

#[async_trait]
pub trait GameServerStore: Send + Sync {
    /// Authoritative read from the API server
    async fn get_game_server(&self, name: &str, namespace: &str) -> Result<GameServer>;

    /// Write the annotations of `gs` back, guarded by its resourceVersion.
    ///
    /// A stale resourceVersion fails with a 409 conflict.
    async fn update_game_server(&self, gs: &GameServer) -> Result<GameServer>;
}

/// Store backed by the Kubernetes API and reflector caches
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    services: Store<Service>,
    ingresses: Store<Ingress>,
}

impl KubeStore {
    /// Start the Service and Ingress reflectors.
    ///
    /// Both watches are scoped to objects carrying the `agones.dev/gameserver`
    /// label and stop when `token` is cancelled.
    pub fn start(client: Client, namespace: Option<&str>, token: &CancellationToken) -> Self {
        let services = spawn_reflector(api_for::<Service>(&client, namespace), token.clone());
        let ingresses = spawn_reflector(api_for::<Ingress>(&client, namespace), token.clone());

        Self {
            client,
            services,
            ingresses,
        }
    }

    /// Wait for both caches to finish their initial list.
    ///
    /// Each attempt waits at most `timeout`; failed attempts are retried every
    /// `interval`, `attempts` times in total.
    pub async fn has_synced(&self, interval: Duration, attempts: u32, timeout: Duration) -> Result<()> {
        let store = self;
        with_retry(interval, attempts, move || async move {
            let ready = async {
                store.services.wait_until_ready().await?;
                store.ingresses.wait_until_ready().await
            };
            match tokio::time::timeout(timeout, ready).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(Error::CacheSyncError(e.to_string())),
                Err(_) => Err(Error::CacheSyncError(format!(
                    "caches not synced within {timeout:?}"
                ))),
            }
        })
        .await?;

        info!(
            services = self.services.state().len(),
            ingresses = self.ingresses.state().len(),
            "Service and Ingress caches synced"
        );
        Ok(())
    }
}

fn api_for<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    K::DynamicType: Default,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn spawn_reflector<K>(api: Api<K>, token: CancellationToken) -> Store<K>
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    let (reader, writer) = reflector::store();
    let config = watcher::Config::default().labels(AGONES_GAMESERVER_NAME_LABEL);
    let stream = reflector::reflector(writer, watcher(api, config))
        .default_backoff()
        .touched_objects()
        .for_each(|res| async move {
            if let Err(e) = res {
                warn!("reflector watch error: {}", e);
            }
        });

    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => debug!("reflector stopped"),
            _ = stream => warn!("reflector stream ended"),
        }
    });

    reader
}

fn lookup<K>(store: &Store<K>, name: &str, namespace: &str) -> Option<Arc<K>>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Default + Eq + Hash + Clone,
{
    store.get(&ObjectRef::new(name).within(namespace))
}

fn namespace_of<K: Resource>(obj: &K) -> String {
    obj.meta().namespace.clone().unwrap_or_else(|| "default".to_string())
}

#[async_trait]
impl ServiceStore for KubeStore {
    fn get_service(&self, name: &str, namespace: &str) -> Option<Arc<Service>> {
        lookup(&self.services, name, namespace)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        let api: Api<Service> = Api::namespaced(self.client.clone(), &namespace_of(service));
        Ok(api.create(&PostParams::default(), service).await?)
    }
}

#[async_trait]
impl IngressStore for KubeStore {
    fn get_ingress(&self, name: &str, namespace: &str) -> Option<Arc<Ingress>> {
        lookup(&self.ingresses, name, namespace)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        let api: Api<Ingress> = Api::namespaced(self.client.clone(), &namespace_of(ingress));
        Ok(api.create(&PostParams::default(), ingress).await?)
    }
}

#[async_trait]
impl GameServerStore for KubeStore {
    async fn get_game_server(&self, name: &str, namespace: &str) -> Result<GameServer> {
        let api: Api<GameServer> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    async fn update_game_server(&self, gs: &GameServer) -> Result<GameServer> {
        let api: Api<GameServer> = Api::namespaced(self.client.clone(), &namespace_of(gs));

        // Merge patch keeps the fields this crate does not model intact; the
        // resourceVersion turns it into a compare-and-swap.
        let patch = serde_json::json!({
            "metadata": {
                "resourceVersion": gs.resource_version(),
                "annotations": gs.annotations(),
            }
        });

        Ok(api
            .patch(&gs.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?)
    }
}
