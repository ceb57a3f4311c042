use super::throttle::{ThrottleGate, ThrottleState};
use super::worker::{Worker, cancelled};
use crate::domain::order::{Order, OrderNumber};
use crate::domain::ports::{AccrualProviderRef, OrderStoreRef};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Tuning knobs of the reconciliation loop.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Number of workers, which is also the queue capacity.
    pub workers: usize,
    /// Maximum number of pending orders fetched per cycle.
    pub batch_size: usize,
    /// Pause between two fetch cycles.
    pub poll_interval: Duration,
    /// How long workers get to finish after shutdown before being aborted.
    pub shutdown_grace: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

/// Order numbers currently queued or being processed.
#[derive(Clone, Default, Debug)]
pub struct InFlight(Arc<Mutex<HashSet<OrderNumber>>>);

impl InFlight {
    /// Marks `number` as in flight; false if it already was.
    pub fn acquire(&self, number: &OrderNumber) -> bool {
        self.0.lock().insert(number.clone())
    }

    pub fn release(&self, number: &OrderNumber) {
        self.0.lock().remove(number);
    }

    /// Ties an acquired number to a guard that releases it on drop.
    pub fn hold(&self, number: OrderNumber) -> InFlightEntry {
        InFlightEntry {
            set: self.clone(),
            number,
        }
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An order number held in [`InFlight`]. Released when dropped, including
/// when the holding task panics or is aborted.
#[derive(Debug)]
pub struct InFlightEntry {
    set: InFlight,
    number: OrderNumber,
}

impl Drop for InFlightEntry {
    fn drop(&mut self) {
        self.set.release(&self.number);
    }
}

/// Worker tasks plus what it takes to start a replacement.
struct Pool {
    tasks: JoinSet<()>,
    queue: flume::Receiver<Order>,
    shutdown: watch::Receiver<bool>,
    next_id: usize,
}

/// How a single fetch/enqueue cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Every fetched order not already in flight was enqueued.
    Completed { enqueued: usize },
    /// A worker raised the throttle gate; the rest of the batch was dropped.
    Throttled { enqueued: usize },
    /// Shutdown was requested mid-cycle.
    Cancelled { enqueued: usize },
    /// Fetching from the store failed.
    FetchFailed,
}

impl CycleOutcome {
    pub fn enqueued(&self) -> usize {
        match *self {
            Self::Completed { enqueued }
            | Self::Throttled { enqueued }
            | Self::Cancelled { enqueued } => enqueued,
            Self::FetchFailed => 0,
        }
    }
}

/// Sole producer of the reconciliation queue.
///
/// Periodically fetches the oldest pending orders and feeds them to a fixed
/// pool of [`Worker`]s through a bounded queue whose capacity equals the pool
/// size, so enqueueing blocks while every worker is busy. It is also the only
/// component that clears the pool-wide [`ThrottleGate`].
pub struct Dispatcher {
    store: OrderStoreRef,
    provider: AccrualProviderRef,
    config: DispatcherConfig,
    gate: ThrottleGate,
    in_flight: InFlight,
}

impl Dispatcher {
    pub fn new(
        store: OrderStoreRef,
        provider: AccrualProviderRef,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            store,
            provider,
            config,
            gate: ThrottleGate::new(),
            in_flight: InFlight::default(),
        }
    }

    pub fn throttle_gate(&self) -> ThrottleGate {
        self.gate.clone()
    }

    pub fn in_flight(&self) -> InFlight {
        self.in_flight.clone()
    }

    fn spawn_pool(&self, queue: flume::Receiver<Order>, shutdown: &watch::Receiver<bool>) -> Pool {
        let mut pool = Pool {
            tasks: JoinSet::new(),
            queue,
            shutdown: shutdown.clone(),
            next_id: 0,
        };
        for _ in 0..self.config.workers.max(1) {
            self.spawn_worker(&mut pool);
        }
        pool
    }

    fn spawn_worker(&self, pool: &mut Pool) {
        pool.next_id += 1;
        let worker = Worker::new(
            pool.next_id,
            pool.queue.clone(),
            self.store.clone(),
            self.provider.clone(),
            self.gate.clone(),
            self.in_flight.clone(),
        );
        pool.tasks.spawn(worker.run(pool.shutdown.clone()));
    }

    /// Handles a worker task that ended. A panicked worker is replaced so the
    /// pool keeps its size.
    fn reap(&self, pool: &mut Pool, joined: Result<(), JoinError>) {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_panic() => {
                error!(error = %e, "worker panicked, starting a replacement");
                self.spawn_worker(pool);
            }
            Err(e) => error!(error = %e, "worker task failed"),
        }
    }

    /// Runs the reconciliation loop until `shutdown` flips to `true` (or its
    /// sender is dropped), then stops the pool within the grace window.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let capacity = self.config.workers.max(1);
        let (tx, rx) = flume::bounded(capacity);
        let mut pool = self.spawn_pool(rx, &shutdown);
        let mut stop = shutdown;

        info!(
            workers = capacity,
            batch_size = self.config.batch_size,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "dispatcher started"
        );

        loop {
            let outcome = self.run_cycle(&tx, &mut pool, &mut stop).await;
            debug!(?outcome, "dispatch cycle finished");
            if matches!(outcome, CycleOutcome::Cancelled { .. }) {
                break;
            }

            if !self.pause_while_throttled(&mut pool, &mut stop).await {
                break;
            }

            let next = Instant::now() + self.config.poll_interval;
            if !self.rest_until(&mut pool, &mut stop, next).await {
                break;
            }
        }

        // The dispatcher is the only sender, so closing here can never race a send.
        drop(tx);
        self.stop_workers(pool).await;
        info!("dispatcher stopped");
    }

    /// Runs a single fetch/enqueue cycle, then closes the queue and waits for
    /// the pool to drain it.
    pub async fn run_once(self) -> CycleOutcome {
        let (_stop_tx, shutdown) = watch::channel(false);
        let capacity = self.config.workers.max(1);
        let (tx, rx) = flume::bounded(capacity);
        let mut pool = self.spawn_pool(rx, &shutdown);
        let mut stop = shutdown;

        let outcome = self.run_cycle(&tx, &mut pool, &mut stop).await;
        drop(tx);

        // Workers exit once the closed queue is drained; a throttle raised
        // meanwhile still has to be cleared here or they would wait forever.
        loop {
            tokio::select! {
                joined = pool.tasks.join_next() => match joined {
                    Some(joined) => self.reap(&mut pool, joined),
                    None => break,
                },
                _ = self.gate.wait_throttled() => {
                    self.pause_while_throttled(&mut pool, &mut stop).await;
                }
            }
        }
        info!(enqueued = outcome.enqueued(), ?outcome, "reconciliation cycle complete");
        outcome
    }

    /// Fetches one batch of pending orders and enqueues it, oldest first.
    async fn run_cycle(
        &self,
        tx: &flume::Sender<Order>,
        pool: &mut Pool,
        stop: &mut watch::Receiver<bool>,
    ) -> CycleOutcome {
        let orders = match self.store.fetch_pending(self.config.batch_size).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "failed to fetch pending orders");
                return CycleOutcome::FetchFailed;
            }
        };

        let mut enqueued = 0;
        for order in orders {
            if !self.in_flight.acquire(&order.number) {
                continue;
            }
            let number = order.number.clone();
            let send = tx.send_async(order);
            tokio::pin!(send);

            loop {
                tokio::select! {
                    biased;
                    _ = cancelled(stop) => {
                        self.in_flight.release(&number);
                        return CycleOutcome::Cancelled { enqueued };
                    }
                    _ = self.gate.wait_throttled() => {
                        self.in_flight.release(&number);
                        return CycleOutcome::Throttled { enqueued };
                    }
                    sent = &mut send => {
                        if sent.is_err() {
                            // Every worker is gone; nothing will consume the queue.
                            self.in_flight.release(&number);
                            return CycleOutcome::Cancelled { enqueued };
                        }
                        enqueued += 1;
                        break;
                    }
                    Some(joined) = pool.tasks.join_next() => self.reap(pool, joined),
                }
            }
        }
        CycleOutcome::Completed { enqueued }
    }

    /// Holds off the next cycle while the gate is raised and clears it once the
    /// deadline has passed. Returns false if shutdown arrived meanwhile.
    async fn pause_while_throttled(
        &self,
        pool: &mut Pool,
        stop: &mut watch::Receiver<bool>,
    ) -> bool {
        loop {
            let ThrottleState::Throttled { until } = self.gate.state() else {
                return true;
            };

            let remaining = until.saturating_duration_since(Instant::now());
            warn!(pause_secs = remaining.as_secs(), "worker pool paused by accrual provider");
            if !self.rest_until(pool, stop, until).await {
                return false;
            }

            if self.gate.clear_if_elapsed(Instant::now()) {
                info!("worker pool resumed");
                return true;
            }
        }
    }

    /// Sleeps until `deadline`, replacing workers that die meanwhile. Returns
    /// false if shutdown arrived first.
    async fn rest_until(
        &self,
        pool: &mut Pool,
        stop: &mut watch::Receiver<bool>,
        deadline: Instant,
    ) -> bool {
        loop {
            tokio::select! {
                biased;
                _ = cancelled(stop) => return false,
                _ = tokio::time::sleep_until(deadline) => return true,
                Some(joined) = pool.tasks.join_next() => self.reap(pool, joined),
            }
        }
    }

    async fn stop_workers(&self, mut pool: Pool) {
        let workers = &mut pool.tasks;
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = workers.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "worker task failed");
                }
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                grace_secs = self.config.shutdown_grace.as_secs(),
                "workers did not stop in time, aborting outstanding lookups"
            );
            pool.tasks.abort_all();
            while pool.tasks.join_next().await.is_some() {}
        }
    }
}
