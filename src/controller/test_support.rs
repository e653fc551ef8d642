//! In-memory stores, event sink and handler shared by the controller tests

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::Ingress;
use kube::api::ObjectMeta;
use kube::ResourceExt;

use crate::controller::handler::EventHandler;
use crate::controller::recorder::{EventRecorder, EventSink};
use crate::controller::store::{GameServerStore, IngressStore, ServiceStore};
use crate::crd::{
    GameServer, GameServerPort, GameServerSpec, GameServerState, GameServerStatus,
    GameServerStatusPort,
};
use crate::error::{Error, Result};

pub fn game_server(name: &str, state: GameServerState, annotations: &[(&str, &str)]) -> GameServer {
    let mut gs = GameServer::new(
        name,
        GameServerSpec {
            ports: vec![GameServerPort {
                name: "default".to_string(),
                container_port: 7654,
                ..Default::default()
            }],
        },
    );
    gs.metadata = ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some("default".to_string()),
        uid: Some(format!("{name}-uid")),
        resource_version: Some("1".to_string()),
        annotations: Some(
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        ),
        ..Default::default()
    };
    gs.status = Some(GameServerStatus {
        state,
        ports: vec![GameServerStatusPort {
            name: "default".to_string(),
            port: 7771,
        }],
        ..Default::default()
    });
    gs
}

pub fn api_error(code: u16, reason: &str) -> Error {
    Error::KubeError(kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{reason} injected by test"),
        reason: reason.to_string(),
        code,
    }))
}

fn key(name: &str, namespace: &str) -> (String, String) {
    (namespace.to_string(), name.to_string())
}

fn object_key<K: ResourceExt>(obj: &K) -> (String, String) {
    key(&obj.name_any(), &obj.namespace().unwrap_or_default())
}

/// Fake API server holding Services, Ingresses and GameServers
#[derive(Default)]
pub struct FakeStore {
    services: Mutex<HashMap<(String, String), Service>>,
    ingresses: Mutex<HashMap<(String, String), Ingress>>,
    game_servers: Mutex<HashMap<(String, String), GameServer>>,
    pub service_creates: AtomicUsize,
    pub ingress_creates: AtomicUsize,
    pub game_server_updates: AtomicUsize,
    /// Number of upcoming GameServer updates failing with a 409 conflict
    pub conflicts: AtomicU32,
    /// Answer creates with AlreadyExists while the cache stays empty
    pub create_races: Mutex<bool>,
    /// Error returned by every Service create
    pub service_create_error: Mutex<Option<(u16, String)>>,
}

impl FakeStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_game_server(&self, gs: &GameServer) {
        self.game_servers
            .lock()
            .unwrap()
            .insert(object_key(gs), gs.clone());
    }

    pub fn game_server(&self, name: &str) -> Option<GameServer> {
        self.game_servers
            .lock()
            .unwrap()
            .get(&key(name, "default"))
            .cloned()
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.services.lock().unwrap().get(&key(name, "default")).cloned()
    }

    pub fn ingress(&self, name: &str) -> Option<Ingress> {
        self.ingresses.lock().unwrap().get(&key(name, "default")).cloned()
    }

    pub fn writes(&self) -> usize {
        self.service_creates.load(Ordering::SeqCst)
            + self.ingress_creates.load(Ordering::SeqCst)
            + self.game_server_updates.load(Ordering::SeqCst)
    }

    /// Simulate another writer bumping the GameServer's resourceVersion
    pub fn touch_game_server(&self, name: &str) {
        if let Some(gs) = self.game_servers.lock().unwrap().get_mut(&key(name, "default")) {
            let version: u64 = gs.resource_version().unwrap_or_default().parse().unwrap_or(0);
            gs.metadata.resource_version = Some((version + 1).to_string());
        }
    }
}

#[async_trait]
impl ServiceStore for FakeStore {
    fn get_service(&self, name: &str, namespace: &str) -> Option<Arc<Service>> {
        self.services
            .lock()
            .unwrap()
            .get(&key(name, namespace))
            .cloned()
            .map(Arc::new)
    }

    async fn create_service(&self, service: &Service) -> Result<Service> {
        if let Some((code, reason)) = self.service_create_error.lock().unwrap().clone() {
            return Err(api_error(code, &reason));
        }
        if *self.create_races.lock().unwrap() {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut services = self.services.lock().unwrap();
        if services.contains_key(&object_key(service)) {
            return Err(api_error(409, "AlreadyExists"));
        }
        self.service_creates.fetch_add(1, Ordering::SeqCst);
        services.insert(object_key(service), service.clone());
        Ok(service.clone())
    }
}

#[async_trait]
impl IngressStore for FakeStore {
    fn get_ingress(&self, name: &str, namespace: &str) -> Option<Arc<Ingress>> {
        self.ingresses
            .lock()
            .unwrap()
            .get(&key(name, namespace))
            .cloned()
            .map(Arc::new)
    }

    async fn create_ingress(&self, ingress: &Ingress) -> Result<Ingress> {
        if *self.create_races.lock().unwrap() {
            return Err(api_error(409, "AlreadyExists"));
        }
        let mut ingresses = self.ingresses.lock().unwrap();
        if ingresses.contains_key(&object_key(ingress)) {
            return Err(api_error(409, "AlreadyExists"));
        }
        self.ingress_creates.fetch_add(1, Ordering::SeqCst);
        ingresses.insert(object_key(ingress), ingress.clone());
        Ok(ingress.clone())
    }
}

#[async_trait]
impl GameServerStore for FakeStore {
    async fn get_game_server(&self, name: &str, namespace: &str) -> Result<GameServer> {
        self.game_servers
            .lock()
            .unwrap()
            .get(&key(name, namespace))
            .cloned()
            .ok_or_else(|| api_error(404, "NotFound"))
    }

    async fn update_game_server(&self, gs: &GameServer) -> Result<GameServer> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            self.touch_game_server(&gs.name_any());
            return Err(api_error(409, "Conflict"));
        }

        let mut game_servers = self.game_servers.lock().unwrap();
        let stored = game_servers
            .get_mut(&object_key(gs))
            .ok_or_else(|| api_error(404, "NotFound"))?;
        if stored.resource_version() != gs.resource_version() {
            return Err(api_error(409, "Conflict"));
        }

        let version: u64 = stored.resource_version().unwrap_or_default().parse().unwrap_or(0);
        stored.metadata.annotations = gs.metadata.annotations.clone();
        stored.metadata.resource_version = Some((version + 1).to_string());
        self.game_server_updates.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

/// One published event
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    pub event_type: String,
    pub reason: String,
    pub message: String,
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

#[async_trait]
impl EventSink for RecordingSink {
    async fn publish(&self, _gs: &GameServer, event_type: &str, reason: &str, message: &str) {
        self.events.lock().unwrap().push(RecordedEvent {
            event_type: event_type.to_string(),
            reason: reason.to_string(),
            message: message.to_string(),
        });
    }
}

pub fn recorder(sink: &Arc<RecordingSink>) -> EventRecorder {
    EventRecorder::new(sink.clone())
}

/// Handler call as seen by the dispatcher tests
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Call {
    Add(String),
    Update(String),
    Delete(String),
}

/// Handler recording its calls, optionally failing or stalling
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<Call>>,
    /// Per name: number of upcoming calls failing, and whether with a
    /// validation error
    failures: Mutex<HashMap<String, (u32, bool)>>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn fail(&self, name: &str, times: u32, validation: bool) {
        self.failures
            .lock()
            .unwrap()
            .insert(name.to_string(), (times, validation));
    }

    pub fn calls(&self) -> Vec<Call> {
        let mut calls = self.calls.lock().unwrap().clone();
        calls.sort();
        calls
    }

    pub fn count(&self, name: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| matches!(c, Call::Add(n) | Call::Update(n) | Call::Delete(n) if n == name))
            .count()
    }

    async fn handle(&self, call: Call, name: &str) -> Result<()> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(call);

        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(name) {
            Some((remaining, validation)) if *remaining > 0 => {
                *remaining -= 1;
                if *validation {
                    Err(crate::error::ValidationError::CustomAnnotationSuffix("octops-".to_string()).into())
                } else {
                    Err(api_error(500, "InternalError"))
                }
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn on_add(&self, gs: &GameServer) -> Result<()> {
        self.handle(Call::Add(gs.name_any()), &gs.name_any()).await
    }

    async fn on_update(&self, _old: &GameServer, new: &GameServer) -> Result<()> {
        self.handle(Call::Update(new.name_any()), &new.name_any()).await
    }

    async fn on_delete(&self, gs: &GameServer) -> Result<()> {
        self.handle(Call::Delete(gs.name_any()), &gs.name_any()).await
    }
}
