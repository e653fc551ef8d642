//! Core controller loop
//!
//! GameServer watch events are fed through a reflector cache and fanned out
//! to the event handler with bounded concurrency. Each object has at most one
//! reconcile queued or running. Failed reconciles are re-delivered after a
//! per-object exponential backoff, and every idle cached GameServer is
//! re-delivered once per sync period.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::poll_fn;
use futures::{FutureExt, Stream, StreamExt};
use kube::api::{Api, ListParams};
use kube::runtime::reflector::{self, ObjectRef};
use kube::runtime::{watcher, WatchStreamExt};
use kube::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, error, info, warn};

use crate::config::ControllerConfig;
use crate::controller::gameserver_reconciler::GameServerReconciler;
use crate::controller::handler::{EventHandler, GameServerEventHandler, SharedHandler};
use crate::controller::ingress_reconciler::IngressReconciler;
use crate::controller::recorder::{EventRecorder, KubeEventSink};
use crate::controller::retry::{calculate_backoff, Backoff};
use crate::controller::service_reconciler::ServiceReconciler;
use crate::controller::store::KubeStore;
use crate::crd::GameServer;
use crate::error::{Error, Result};

type GameServerRef = ObjectRef<GameServer>;

/// Shared state for the controller and the health endpoints
pub struct ControllerState {
    pub client: Client,
    pub config: ControllerConfig,
    pub token: CancellationToken,
    /// Set once the caches are synced and events are being dispatched
    pub ready: Arc<AtomicBool>,
}

impl ControllerState {
    pub fn new(client: Client, config: ControllerConfig, token: CancellationToken) -> Self {
        Self {
            client,
            config,
            token,
            ready: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Main entry point to start the controller
pub async fn run_controller(state: Arc<ControllerState>) -> Result<()> {
    let client = state.client.clone();
    let config = &state.config;
    let game_servers: Api<GameServer> = match config.namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    info!("Starting GameServer ingress controller");

    // Verify CRD exists
    match game_servers.list(&ListParams::default().limit(1)).await {
        Ok(_) => info!("GameServer CRD is available"),
        Err(e) => {
            error!("GameServer CRD not found. Please install Agones first: {:?}", e);
            return Err(Error::ConfigError("GameServer CRD not installed".to_string()));
        }
    }

    let store = KubeStore::start(client.clone(), config.namespace.as_deref(), &state.token);
    store
        .has_synced(
            config.cache_sync_interval,
            config.cache_sync_attempts,
            config.cache_sync_timeout,
        )
        .await?;
    let store = Arc::new(store);

    let instance = std::env::var("HOSTNAME").unwrap_or_else(|_| {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown-host".to_string())
    });
    let sink = KubeEventSink::new(client.clone(), config.reporter.clone()).with_instance(instance);
    let recorder = EventRecorder::new(Arc::new(sink));

    let handler = GameServerEventHandler::new(
        ServiceReconciler::new(store.clone(), recorder.clone()),
        IngressReconciler::new(store.clone(), recorder.clone(), config.ingress_path_rewrite),
        GameServerReconciler::new(
            store.clone(),
            recorder,
            Backoff::with_steps(config.status_retry_steps),
        ),
        state.token.clone(),
    );

    state.ready.store(true, Ordering::SeqCst);
    info!(
        namespace = config.namespace.as_deref().unwrap_or("*"),
        sync_period = ?config.sync_period,
        "Watching GameServers"
    );

    let events = watcher(game_servers, watcher::Config::default()).default_backoff();
    Dispatcher::new(Arc::new(handler), state.token.clone(), config)
        .run(events)
        .await;

    state.ready.store(false, Ordering::SeqCst);
    info!("GameServer ingress controller stopped");
    Ok(())
}

/// One unit of work for the handler
enum Delivery {
    Add(Arc<GameServer>),
    Update {
        old: Arc<GameServer>,
        new: Arc<GameServer>,
    },
    Delete(Arc<GameServer>),
}

impl Delivery {
    fn object(&self) -> &GameServer {
        match self {
            Delivery::Add(gs) | Delivery::Delete(gs) => gs,
            Delivery::Update { new, .. } => new,
        }
    }

    fn resync(gs: Arc<GameServer>) -> Self {
        Delivery::Update {
            old: gs.clone(),
            new: gs,
        }
    }
}

/// Per-object failure counts driving the requeue delay
struct RequeueLimiter {
    failures: HashMap<GameServerRef, u32>,
    base: Duration,
    max: Duration,
}

impl RequeueLimiter {
    fn new(base: Duration, max: Duration) -> Self {
        Self {
            failures: HashMap::new(),
            base,
            max,
        }
    }

    fn next_delay(&mut self, key: &GameServerRef) -> Duration {
        let count = self.failures.entry(key.clone()).or_insert(0);
        let delay = calculate_backoff(*count, self.base, self.max);
        *count = count.saturating_add(1);
        delay
    }

    fn forget(&mut self, key: &GameServerRef) {
        self.failures.remove(key);
    }
}

/// Where an object stands in the work queue. Objects missing from the queue
/// are idle.
enum KeyState {
    /// A handler call is queued or running. `pending` holds the latest
    /// delivery that arrived in the meantime.
    Running { pending: Option<Delivery> },
    /// Waiting out a requeue delay
    Waiting(delay_queue::Key),
}

enum Outcome {
    Done,
    Requeue(Error),
}

/// Output of a reconcile task
struct Finished {
    key: GameServerRef,
    /// Deletes are not tracked in the queue
    tracked: bool,
    outcome: Outcome,
}

/// Per-object work queue.
///
/// Holds at most one Add/Update per object, either running or waiting to be
/// requeued. Deliveries for a running object collapse into the latest one.
struct WorkQueue {
    handler: SharedHandler,
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Finished>,
    keys: HashMap<GameServerRef, KeyState>,
    requeues: DelayQueue<GameServerRef>,
    limiter: RequeueLimiter,
}

impl WorkQueue {
    fn new(handler: SharedHandler, concurrency: usize, limiter: RequeueLimiter) -> Self {
        Self {
            handler,
            semaphore: Arc::new(Semaphore::new(concurrency)),
            tasks: JoinSet::new(),
            keys: HashMap::new(),
            requeues: DelayQueue::new(),
            limiter,
        }
    }

    /// Queue a delivery from the watch stream
    fn enqueue(&mut self, delivery: Delivery) {
        let key = ObjectRef::from_obj(delivery.object());

        if matches!(delivery, Delivery::Delete(_)) {
            self.limiter.forget(&key);
            match self.keys.remove(&key) {
                Some(KeyState::Waiting(timer)) => {
                    self.requeues.remove(&timer);
                }
                Some(KeyState::Running { .. }) => {
                    self.keys.insert(key.clone(), KeyState::Running { pending: None });
                }
                None => {}
            }
            self.spawn(key, delivery);
            return;
        }

        match self.keys.remove(&key) {
            Some(KeyState::Running { .. }) => {
                self.keys.insert(
                    key,
                    KeyState::Running {
                        pending: Some(delivery),
                    },
                );
            }
            Some(KeyState::Waiting(timer)) => {
                self.requeues.remove(&timer);
                self.start(key, delivery);
            }
            None => self.start(key, delivery),
        }
    }

    /// Re-deliver cached objects that are neither running nor waiting
    fn resync(&mut self, cached: Vec<Arc<GameServer>>) {
        let mut delivered = 0;
        for gs in cached {
            let key = ObjectRef::from_obj(gs.as_ref());
            if self.keys.contains_key(&key) {
                continue;
            }
            self.start(key, Delivery::resync(gs));
            delivered += 1;
        }
        debug!("resynced {} GameServers", delivered);
    }

    fn finish(&mut self, finished: Finished, cache: &reflector::Store<GameServer>) {
        let Finished {
            key,
            tracked,
            outcome,
        } = finished;
        if !tracked {
            return;
        }

        let pending = match self.keys.remove(&key) {
            Some(KeyState::Running { pending }) => pending,
            Some(state) => {
                self.keys.insert(key, state);
                return;
            }
            None => None,
        };
        if let Some(delivery) = pending {
            self.start(key, delivery);
            return;
        }

        let error = match outcome {
            Outcome::Done => {
                self.limiter.forget(&key);
                return;
            }
            Outcome::Requeue(error) => error,
        };
        if cache.get(&key).is_none() {
            debug!("not requeueing {}, no longer cached", key);
            self.limiter.forget(&key);
            return;
        }

        let delay = self.limiter.next_delay(&key);
        error!("Reconciliation error for {}, requeue in {:?}: {}", key, delay, error);
        let timer = self.requeues.insert(key.clone(), delay);
        self.keys.insert(key, KeyState::Waiting(timer));
    }

    fn expired(&mut self, key: GameServerRef, cache: &reflector::Store<GameServer>) {
        self.keys.remove(&key);
        match cache.get(&key) {
            Some(gs) => self.start(key, Delivery::resync(gs)),
            None => {
                debug!("dropping requeue of {}, no longer cached", key);
                self.limiter.forget(&key);
            }
        }
    }

    fn start(&mut self, key: GameServerRef, delivery: Delivery) {
        self.keys
            .insert(key.clone(), KeyState::Running { pending: None });
        self.spawn(key, delivery);
    }

    fn spawn(&mut self, key: GameServerRef, delivery: Delivery) {
        let handler = self.handler.clone();
        let semaphore = self.semaphore.clone();

        self.tasks.spawn(async move {
            let tracked = !matches!(delivery, Delivery::Delete(_));
            let outcome = match semaphore.acquire_owned().await {
                Ok(_permit) => reconcile(handler.as_ref(), &key, &delivery).await,
                Err(_) => Outcome::Done,
            };
            Finished {
                key,
                tracked,
                outcome,
            }
        });
    }

    async fn join_next(&mut self, cache: &reflector::Store<GameServer>) {
        match self.tasks.join_next().await {
            Some(Ok(finished)) => self.finish(finished, cache),
            Some(Err(e)) => error!("reconcile task failed: {}", e),
            None => {}
        }
    }
}

/// Turns a GameServer watch stream into handler calls.
///
/// Failed Add/Update calls are requeued with a per-object exponential
/// backoff. A new watch event for an object waiting out its backoff is
/// handled right away.
pub struct Dispatcher {
    handler: SharedHandler,
    token: CancellationToken,
    concurrency: usize,
    resync_period: Duration,
    requeue_base_delay: Duration,
    requeue_max_delay: Duration,
}

impl Dispatcher {
    /// Concurrency, resync period and requeue delays come from `config`
    pub fn new(handler: SharedHandler, token: CancellationToken, config: &ControllerConfig) -> Self {
        Self {
            handler,
            token,
            concurrency: config.max_concurrent_reconciles.max(1),
            resync_period: config.sync_period,
            requeue_base_delay: config.requeue_base_delay,
            requeue_max_delay: config.requeue_max_delay,
        }
    }

    /// Consume `events` until the stream ends or the token is cancelled, then
    /// wait for in-flight reconciles to finish.
    pub async fn run<S>(self, events: S)
    where
        S: Stream<Item = std::result::Result<watcher::Event<GameServer>, watcher::Error>>,
    {
        let (reader, mut writer) = reflector::store::<GameServer>();
        let mut queue = WorkQueue::new(
            self.handler,
            self.concurrency,
            RequeueLimiter::new(self.requeue_base_delay, self.requeue_max_delay),
        );

        let mut resync =
            tokio::time::interval_at(Instant::now() + self.resync_period, self.resync_period);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut events = std::pin::pin!(events);

        loop {
            tokio::select! {
                biased;
                _ = self.token.cancelled() => {
                    debug!("dispatcher cancelled");
                    break;
                }
                Some(joined) = queue.tasks.join_next(), if !queue.tasks.is_empty() => match joined {
                    Ok(finished) => queue.finish(finished, &reader),
                    Err(e) => error!("reconcile task failed: {}", e),
                },
                event = events.next() => match event {
                    Some(Ok(event)) => {
                        let delivery = classify(&reader, &event);
                        writer.apply_watcher_event(&event);
                        if let Some(delivery) = delivery {
                            queue.enqueue(delivery);
                        }
                    }
                    Some(Err(e)) => warn!("GameServer watch error: {}", e),
                    None => {
                        info!("GameServer watch stream ended");
                        break;
                    }
                },
                Some(expired) = poll_fn(|cx| queue.requeues.poll_expired(cx)), if !queue.requeues.is_empty() => {
                    queue.expired(expired.into_inner(), &reader);
                }
                _ = resync.tick() => queue.resync(reader.state()),
            }
        }

        // Requeues are dropped, only calls already spawned are awaited
        while !queue.tasks.is_empty() {
            queue.join_next(&reader).await;
        }
    }
}

async fn reconcile(handler: &dyn EventHandler, key: &GameServerRef, delivery: &Delivery) -> Outcome {
    #[cfg(feature = "metrics")]
    let start = Instant::now();
    let call = async {
        match delivery {
            Delivery::Add(gs) => handler.on_add(gs).await,
            Delivery::Update { old, new } => handler.on_update(old, new).await,
            Delivery::Delete(gs) => handler.on_delete(gs).await,
        }
    };
    let result = match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(_) => {
            error!("reconcile of {} panicked", key);
            return Outcome::Done;
        }
    };
    #[cfg(feature = "metrics")]
    crate::controller::metrics::observe_reconcile_duration_seconds(
        "gameserver",
        start.elapsed().as_secs_f64(),
    );

    let error = match result {
        Ok(()) => return Outcome::Done,
        Err(e) => e,
    };

    #[cfg(feature = "metrics")]
    crate::controller::metrics::inc_reconcile_error("gameserver", error.kind());

    if matches!(delivery, Delivery::Delete(_)) || !error.is_retriable() {
        match error {
            Error::Cancelled => debug!("reconcile of {} cancelled", key),
            e if e.is_validation() => warn!("Not requeueing {}: {}", key, e),
            e => error!("Reconciliation error for {}: {}", key, e),
        }
        return Outcome::Done;
    }
    Outcome::Requeue(error)
}

/// Map a watch event to a handler call.
///
/// Must run before the event is applied to the cache: an `Apply` for an
/// object already cached is an update, anything else is an add.
fn classify(
    cache: &reflector::Store<GameServer>,
    event: &watcher::Event<GameServer>,
) -> Option<Delivery> {
    match event {
        watcher::Event::InitApply(gs) => Some(Delivery::Add(Arc::new(gs.clone()))),
        watcher::Event::Apply(gs) => {
            let new = Arc::new(gs.clone());
            match cache.get(&ObjectRef::from_obj(gs)) {
                Some(old) => Some(Delivery::Update { old, new }),
                None => Some(Delivery::Add(new)),
            }
        }
        watcher::Event::Delete(gs) => Some(Delivery::Delete(Arc::new(gs.clone()))),
        watcher::Event::Init | watcher::Event::InitDone => None,
    }
}
