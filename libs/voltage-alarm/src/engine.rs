//! Alarm Engine - worker pool and tick scheduler
//!
//! Events are routed to a fixed set of worker shards by entity id, so every
//! event for one entity lands on the same bounded queue and keeps its
//! delivery order. A single recurring timer submits one tick job per cached
//! entity onto the same queues.

use crate::config::EngineConfig;
use crate::context::EventReport;
use crate::collaborators::EngineServices;
use crate::error::{AlarmEngineError, Result};
use crate::registry::{EngineRegistry, EventOutcome};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn, Level};
use voltage_model::{EntityEvent, EntityId};

/// Unit of work for a shard
enum Job {
    Event {
        event: EntityEvent,
        reply: oneshot::Sender<Result<EventOutcome>>,
    },
    Tick {
        entity_id: EntityId,
        now: i64,
    },
}

/// Receiver for the result of a submitted event
pub type EventReceipt = oneshot::Receiver<Result<EventOutcome>>;

pub struct AlarmEngine {
    registry: Arc<EngineRegistry>,
    /// Emptied on shutdown
    senders: parking_lot::RwLock<Vec<mpsc::Sender<Job>>>,
    workers: parking_lot::Mutex<Vec<JoinHandle<()>>>,
    scheduler: parking_lot::Mutex<Option<JoinHandle<()>>>,
    tick_interval: Duration,
    /// Shutdown signal
    shutdown: Arc<Notify>,
    /// Running state
    running: Arc<AtomicBool>,
}

impl AlarmEngine {
    /// Spawn the worker shards; must be called inside a tokio runtime
    pub fn start(config: &EngineConfig, services: Arc<EngineServices>) -> Result<Arc<Self>> {
        config.validate()?;
        let registry = Arc::new(EngineRegistry::new(services));

        let mut senders = Vec::with_capacity(config.workers);
        let mut workers = Vec::with_capacity(config.workers);
        for shard in 0..config.workers {
            let (tx, rx) = mpsc::channel(config.queue_capacity);
            senders.push(tx);
            workers.push(tokio::spawn(run_worker(shard, rx, registry.clone())));
        }
        info!(
            "Alarm engine started: {} workers, queue capacity {}",
            config.workers, config.queue_capacity
        );

        Ok(Arc::new(Self {
            registry,
            senders: parking_lot::RwLock::new(senders),
            workers: parking_lot::Mutex::new(workers),
            scheduler: parking_lot::Mutex::new(None),
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            shutdown: Arc::new(Notify::new()),
            running: Arc::new(AtomicBool::new(false)),
        }))
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    fn sender_for(&self, entity_id: &EntityId) -> Result<mpsc::Sender<Job>> {
        let senders = self.senders.read();
        if senders.is_empty() {
            return Err(AlarmEngineError::Shutdown);
        }
        let mut hasher = DefaultHasher::new();
        entity_id.hash(&mut hasher);
        let shard = (hasher.finish() % senders.len() as u64) as usize;
        Ok(senders[shard].clone())
    }

    // ========================================================================
    // Event submission
    // ========================================================================

    /// Queue an event, waiting for room in the shard's queue
    pub async fn submit(&self, event: EntityEvent) -> Result<EventReceipt> {
        let sender = self.sender_for(&event.entity_id)?;
        let (reply, receipt) = oneshot::channel();
        sender
            .send(Job::Event { event, reply })
            .await
            .map_err(|_| AlarmEngineError::Shutdown)?;
        Ok(receipt)
    }

    /// Queue an event without waiting; fails with `Queue` when the shard is full
    pub fn try_submit(&self, event: EntityEvent) -> Result<EventReceipt> {
        let sender = self.sender_for(&event.entity_id)?;
        let entity_id = event.entity_id;
        let (reply, receipt) = oneshot::channel();
        sender
            .try_send(Job::Event { event, reply })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    AlarmEngineError::Queue(format!("shard queue full for {}", entity_id))
                },
                mpsc::error::TrySendError::Closed(_) => AlarmEngineError::Shutdown,
            })?;
        Ok(receipt)
    }

    /// Submit an event and wait for its outcome
    pub async fn process(&self, event: EntityEvent) -> Result<EventOutcome> {
        let receipt = self.submit(event).await?;
        receipt.await.map_err(|_| AlarmEngineError::Shutdown)?
    }

    // ========================================================================
    // Scheduler
    // ========================================================================

    /// Queue one tick per cached entity; returns the number queued
    pub async fn tick_once(&self) -> usize {
        let now = self.registry.services().time.now_millis();
        let mut queued = 0;
        for entity_id in self.registry.cached_entities() {
            let Ok(sender) = self.sender_for(&entity_id) else {
                break;
            };
            if sender.send(Job::Tick { entity_id, now }).await.is_err() {
                break;
            }
            queued += 1;
        }
        debug!("Queued {} entity ticks at {}", queued, now);
        queued
    }

    /// Run the tick loop until `stop_scheduler` is called
    pub async fn run_scheduler(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            warn!("Alarm scheduler already running");
            return;
        }
        info!("Starting alarm scheduler with {:?} tick", self.tick_interval);

        let mut tick_interval = interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.tick_once().await;
                }
                _ = self.shutdown.notified() => {
                    info!("Alarm scheduler received shutdown signal");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::Relaxed);
        info!("Alarm scheduler stopped");
    }

    /// Run the tick loop on its own task
    pub fn spawn_scheduler(self: &Arc<Self>) {
        let engine = Arc::clone(self);
        let handle = tokio::spawn(async move { engine.run_scheduler().await });
        if let Some(previous) = self.scheduler.lock().replace(handle) {
            previous.abort();
        }
    }

    pub fn stop_scheduler(&self) {
        info!("Stopping alarm scheduler...");
        self.shutdown.notify_one();
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the scheduler and drain the workers
    ///
    /// Jobs already queued are still processed; later submissions fail with
    /// `Shutdown`.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(handle) = scheduler {
            self.stop_scheduler();
            if let Err(e) = handle.await {
                warn!("Alarm scheduler task ended abnormally: {}", e);
            }
        }

        self.senders.write().clear();
        let workers: Vec<JoinHandle<()>> = self.workers.lock().drain(..).collect();
        for result in futures::future::join_all(workers).await {
            if let Err(e) = result {
                error!("Alarm worker ended abnormally: {}", e);
            }
        }
        info!("Alarm engine stopped");
    }
}

async fn run_worker(shard: usize, mut rx: mpsc::Receiver<Job>, registry: Arc<EngineRegistry>) {
    debug!("Alarm worker {} started", shard);
    while let Some(job) = rx.recv().await {
        match job {
            Job::Event { event, reply } => {
                let result = registry.on_event(&event).await;
                if let Err(e) = &result {
                    log_failure(&event.entity_id, e);
                }
                // Caller may have stopped waiting
                let _ = reply.send(result);
            },
            Job::Tick { entity_id, now } => {
                match registry.tick_entity(&entity_id, now).await {
                    Ok(Some(report)) => log_tick(&entity_id, &report),
                    Ok(None) => {},
                    Err(e) => log_failure(&entity_id, &e),
                }
            },
        }
    }
    debug!("Alarm worker {} stopped", shard);
}

fn log_tick(entity_id: &EntityId, report: &EventReport) {
    if !report.results.is_empty() {
        debug!(
            "[{}] tick produced {} alarm transitions",
            entity_id,
            report.results.len()
        );
    }
}

fn log_failure(entity_id: &EntityId, err: &AlarmEngineError) {
    match err.log_level() {
        Level::ERROR => error!("[{}] {} ({})", entity_id, err, err.error_code()),
        Level::WARN => warn!("[{}] {} ({})", entity_id, err, err.error_code()),
        _ => debug!("[{}] {} ({})", entity_id, err, err.error_code()),
    }
}
