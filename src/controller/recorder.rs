//! Kubernetes event recording for GameServers
//!
//! Events are fire-and-forget: a failure to publish one is logged and never
//! fails the reconcile that produced it.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event, EventSource};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::api::{Api, ObjectMeta, PostParams};
use kube::{Client, Resource, ResourceExt};
use tracing::warn;

use crate::controller::ResourceKind;
use crate::crd::GameServer;
use crate::error::Error;
use crate::gameserver;

pub const EVENT_TYPE_NORMAL: &str = "Normal";
pub const EVENT_TYPE_WARNING: &str = "Warning";

pub const REASON_CREATING: &str = "Creating";
pub const REASON_CREATED: &str = "Created";
pub const REASON_FAILED: &str = "Failed";
pub const REASON_UPDATED: &str = "Updated";

/// Destination for events about a GameServer
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, gs: &GameServer, event_type: &str, reason: &str, message: &str);
}

/// Publishes core/v1 Events through the API server
pub struct KubeEventSink {
    client: Client,
    reporter: String,
    instance: Option<String>,
}

impl KubeEventSink {
    pub fn new(client: Client, reporter: impl Into<String>) -> Self {
        Self {
            client,
            reporter: reporter.into(),
            instance: None,
        }
    }

    /// Host reported as the event source, usually the pod name
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }
}

#[async_trait]
impl EventSink for KubeEventSink {
    async fn publish(&self, gs: &GameServer, event_type: &str, reason: &str, message: &str) {
        let namespace = gs.namespace().unwrap_or_else(|| "default".to_string());
        let events: Api<Event> = Api::namespaced(self.client.clone(), &namespace);

        let time = chrono::Utc::now();
        let event = Event {
            metadata: ObjectMeta {
                generate_name: Some(format!("{}-", gs.name_any())),
                namespace: Some(namespace),
                ..Default::default()
            },
            type_: Some(event_type.to_string()),
            reason: Some(reason.to_string()),
            message: Some(message.to_string()),
            involved_object: gs.object_ref(&()),
            reporting_component: Some(self.reporter.clone()),
            reporting_instance: self.instance.clone(),
            source: Some(EventSource {
                component: Some(self.reporter.clone()),
                host: self.instance.clone(),
            }),
            first_timestamp: Some(Time(time)),
            last_timestamp: Some(Time(time)),
            count: Some(1),
            ..Default::default()
        };

        if let Err(e) = events.create(&PostParams::default(), &event).await {
            warn!(
                "failed to record {} event for {}: {}",
                reason,
                gameserver::namespaced(gs),
                e
            );
        }
    }
}

/// Records the lifecycle events of the objects created for a GameServer
#[derive(Clone)]
pub struct EventRecorder {
    sink: Arc<dyn EventSink>,
}

impl EventRecorder {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn record_creating(&self, gs: &GameServer, kind: ResourceKind) {
        let message = format!("Creating {} for gameserver {}", kind, gameserver::namespaced(gs));
        self.sink
            .publish(gs, EVENT_TYPE_NORMAL, REASON_CREATING, &message)
            .await;
    }

    pub async fn record_success(&self, gs: &GameServer, kind: ResourceKind) {
        let message = format!("{} created for gameserver {}", kind, gameserver::namespaced(gs));
        self.sink
            .publish(gs, EVENT_TYPE_NORMAL, REASON_CREATED, &message)
            .await;
    }

    pub async fn record_failed(&self, gs: &GameServer, kind: ResourceKind, err: &Error) {
        let message = format!(
            "Failed to create {} for gameserver {}: {}",
            kind,
            gameserver::namespaced(gs),
            err
        );
        self.sink
            .publish(gs, EVENT_TYPE_WARNING, REASON_FAILED, &message)
            .await;
    }

    /// Normal `Updated` event, suffixed with the GameServer identity
    pub async fn record_event(&self, gs: &GameServer, message: &str) {
        let message = format!("{} for {}", message, gameserver::namespaced(gs));
        self.sink
            .publish(gs, EVENT_TYPE_NORMAL, REASON_UPDATED, &message)
            .await;
    }

    /// Warning event for a reconcile that cannot succeed until the manifest changes
    pub async fn record_warning(&self, gs: &GameServer, reason: &str, message: &str) {
        self.sink
            .publish(gs, EVENT_TYPE_WARNING, reason, message)
            .await;
    }
}
