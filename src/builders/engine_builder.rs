//! Wires configuration and backends into a runnable [`Engine`].

use std::sync::Arc;
use std::time::Duration;

use axum::Router;

use crate::config::EngineConfig;
use crate::core::backends::{CallRepository, KvStore, SwitchQueue};
use crate::core::dispatcher::OrderDispatcher;
use crate::core::planner::CapacityPlanner;
use crate::core::reconciler::CdrReconciler;
use crate::core::seat_store::SeatStateStore;
use crate::core::sweepers::{OrderReaper, ProjectCloser, StatAggregator};
use crate::core::EngineError;
use crate::hub::routes::{router, AppState};
use crate::hub::seat_hub::SeatConnectionHub;
use crate::infra::{InMemoryKvStore, InMemoryRepository, InMemorySwitchQueue};
use crate::runtime::api::SeatApi;
use crate::runtime::supervisor::Supervisor;
use crate::runtime::tokio_spawner::Spawn;
use crate::runtime::workers::PushTick;

/// Outbox rows relayed per tick.
const RELAY_BATCH: usize = 500;

/// Every engine component, built once and shared.
pub struct Engine<Q, R, K> {
    config: EngineConfig,
    seats: Arc<SeatStateStore<K>>,
    hub: Arc<SeatConnectionHub<K>>,
    api: Arc<SeatApi<R, K>>,
    stats: Arc<StatAggregator<R>>,
    push_tick: Arc<PushTick<Q, R, K>>,
    reconciler: Arc<CdrReconciler<Q, R, K>>,
    reaper: Arc<OrderReaper<R>>,
    closer: Arc<ProjectCloser<R, K>>,
    supervisor: Supervisor,
}

/// Build an engine from `cfg` over the given backends.
pub fn build_engine<Q, R, K>(
    cfg: EngineConfig,
    push_queue: Arc<Q>,
    cdr_queue: Arc<Q>,
    repo: Arc<R>,
    kv: Arc<K>,
) -> Result<Engine<Q, R, K>, EngineError>
where
    Q: SwitchQueue,
    R: CallRepository,
    K: KvStore,
{
    cfg.validate()
        .map_err(|e| EngineError::Invalid(format!("config invalid: {e}")))?;

    let seats = Arc::new(SeatStateStore::new(
        kv,
        Duration::from_secs(cfg.call_seat_ttl_secs),
    ));
    let hub = Arc::new(SeatConnectionHub::new(
        Arc::clone(&seats),
        cfg.connection_buffer,
        Duration::from_secs(cfg.reconnect_grace_secs),
    ));
    let stats = Arc::new(StatAggregator::new(Arc::clone(&repo)));
    let api = Arc::new(SeatApi::new(
        Arc::clone(&repo),
        Arc::clone(&seats),
        Arc::clone(&stats),
    ));
    let push_tick = Arc::new(PushTick::new(
        CapacityPlanner::new(
            Arc::clone(&push_queue),
            Arc::clone(&repo),
            Arc::clone(&seats),
            cfg.planner_limits(),
        ),
        OrderDispatcher::new(push_queue, Arc::clone(&repo), RELAY_BATCH),
    ));
    let reconciler = Arc::new(CdrReconciler::new(
        cdr_queue,
        Arc::clone(&repo),
        Arc::clone(&seats),
        Duration::from_millis(cfg.cdr_wait_ms),
    ));
    let reaper = Arc::new(OrderReaper::new(
        Arc::clone(&repo),
        Duration::from_secs(cfg.stale_order_after_secs),
    ));
    let closer = Arc::new(ProjectCloser::new(repo, Arc::clone(&seats)));

    tracing::info!(
        push_queue = %cfg.push_queue,
        cdr_queue = %cfg.cdr_queue,
        max_queue_len = cfg.max_queue_len,
        max_robot_concurrency = cfg.max_robot_concurrency,
        "engine built"
    );
    Ok(Engine {
        config: cfg,
        seats,
        hub,
        api,
        stats,
        push_tick,
        reconciler,
        reaper,
        closer,
        supervisor: Supervisor::new(),
    })
}

/// Engine over the in-memory backends.
pub type InMemoryEngine = Engine<InMemorySwitchQueue, InMemoryRepository, InMemoryKvStore>;

/// Handles to the in-memory backends an [`InMemoryEngine`] runs on.
pub struct InMemoryBackends {
    /// Dial requests, named after `push_queue`.
    pub push_queue: Arc<InMemorySwitchQueue>,
    /// Completion events, named after `cdr_queue`.
    pub cdr_queue: Arc<InMemorySwitchQueue>,
    /// Projects, orders, calls and outbox.
    pub repo: Arc<InMemoryRepository>,
    /// Seat state and call mappings.
    pub kv: Arc<InMemoryKvStore>,
}

impl InMemoryBackends {
    /// Empty backends with queues named and timed from `cfg`.
    pub fn from_config(cfg: &EngineConfig) -> Self {
        let visibility = Duration::from_secs(cfg.cdr_visibility_secs);
        Self {
            push_queue: Arc::new(InMemorySwitchQueue::named(&cfg.push_queue, visibility)),
            cdr_queue: Arc::new(InMemorySwitchQueue::named(&cfg.cdr_queue, visibility)),
            repo: Arc::new(InMemoryRepository::new()),
            kv: Arc::new(InMemoryKvStore::new()),
        }
    }
}

/// Build an engine over fresh in-memory backends and return both.
pub fn build_in_memory_engine(
    cfg: EngineConfig,
) -> Result<(InMemoryEngine, InMemoryBackends), EngineError> {
    let backends = InMemoryBackends::from_config(&cfg);
    let engine = build_engine(
        cfg,
        Arc::clone(&backends.push_queue),
        Arc::clone(&backends.cdr_queue),
        Arc::clone(&backends.repo),
        Arc::clone(&backends.kv),
    )?;
    Ok((engine, backends))
}

impl<Q, R, K> Engine<Q, R, K>
where
    Q: SwitchQueue,
    R: CallRepository,
    K: KvStore,
{
    /// Start every loop and the hub's change forwarder on `spawner`.
    pub fn start<S: Spawn>(&self, spawner: &S) {
        let cfg = &self.config;
        self.supervisor
            .start(spawner, Arc::clone(&self.push_tick), cfg.tick_policy());
        self.supervisor
            .start(spawner, Arc::clone(&self.reconciler), cfg.cdr_policy());
        self.supervisor
            .start(spawner, Arc::clone(&self.reaper), cfg.sweep_policy());
        self.supervisor
            .start(spawner, Arc::clone(&self.closer), cfg.sweep_policy());
        self.supervisor
            .start(spawner, Arc::clone(&self.stats), cfg.sweep_policy());

        let forwarder = Arc::clone(&self.hub).run_forwarder(self.seats.subscribe());
        let mut stop = self.supervisor.stop_signal();
        spawner.spawn(async move {
            tokio::select! {
                () = forwarder => {}
                _ = stop.wait_for(|stopped| *stopped) => {}
            }
        });
        tracing::info!("engine started");
    }

    /// Stop every loop after its current pass.
    pub fn shutdown(&self) {
        self.supervisor.stop();
        tracing::info!("engine stopping");
    }

    /// HTTP router serving seat sockets and the REST endpoints.
    pub fn router(&self) -> Router {
        router(AppState {
            hub: Arc::clone(&self.hub),
            api: Arc::clone(&self.api),
            socket: self.config.socket_settings(),
        })
    }

    /// Configuration the engine was built with.
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Seat state store.
    pub const fn seats(&self) -> &Arc<SeatStateStore<K>> {
        &self.seats
    }

    /// Connection hub.
    pub const fn hub(&self) -> &Arc<SeatConnectionHub<K>> {
        &self.hub
    }

    /// REST operations.
    pub const fn api(&self) -> &Arc<SeatApi<R, K>> {
        &self.api
    }

    /// Daily statistics.
    pub const fn stats(&self) -> &Arc<StatAggregator<R>> {
        &self.stats
    }

    /// Admission tick.
    pub const fn push_tick(&self) -> &Arc<PushTick<Q, R, K>> {
        &self.push_tick
    }

    /// Completion-event reconciler.
    pub const fn reconciler(&self) -> &Arc<CdrReconciler<Q, R, K>> {
        &self.reconciler
    }

    /// Stale-order reaper.
    pub const fn reaper(&self) -> &Arc<OrderReaper<R>> {
        &self.reaper
    }

    /// Idle-project closer.
    pub const fn closer(&self) -> &Arc<ProjectCloser<R, K>> {
        &self.closer
    }
}
