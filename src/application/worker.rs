use super::dispatcher::InFlight;
use super::throttle::ThrottleGate;
use crate::domain::accrual::AccrualError;
use crate::domain::order::{Order, OrderStatus};
use crate::domain::outcome::UpdateOutcome;
use crate::domain::ports::{AccrualProviderRef, OrderStoreRef};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What a worker did with one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// The store accepted the provider's answer.
    Updated(OrderStatus),
    /// The order was left as it was and will be picked up again later.
    Unchanged,
    /// The provider throttled us; the pool gate has been raised.
    Throttled(Duration),
}

/// Consumes pending orders from the shared queue and reconciles them with the
/// accrual provider, one at a time.
pub struct Worker {
    id: usize,
    queue: flume::Receiver<Order>,
    store: OrderStoreRef,
    provider: AccrualProviderRef,
    gate: ThrottleGate,
    in_flight: InFlight,
}

/// Resolves when shutdown has been requested or the signal's owner is gone.
pub(crate) async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

impl Worker {
    pub fn new(
        id: usize,
        queue: flume::Receiver<Order>,
        store: OrderStoreRef,
        provider: AccrualProviderRef,
        gate: ThrottleGate,
        in_flight: InFlight,
    ) -> Self {
        Self {
            id,
            queue,
            store,
            provider,
            gate,
            in_flight,
        }
    }

    /// Runs until shutdown is requested or the queue is closed and drained.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        debug!(worker = self.id, "worker started");
        loop {
            // Do not pull work while the pool is paused.
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = self.gate.wait_idle() => {}
            }

            let order = tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                received = self.queue.recv_async() => match received {
                    Ok(order) => order,
                    Err(_) => break,
                },
            };

            let _entry = self.in_flight.hold(order.number.clone());

            // Another worker may have been throttled while we waited on the queue.
            tokio::select! {
                biased;
                _ = cancelled(&mut shutdown) => break,
                _ = self.gate.wait_idle() => {}
            }

            self.process(&order).await;
        }
        debug!(worker = self.id, "worker stopped");
    }

    /// Looks up one order with the provider and applies the answer.
    pub async fn process(&self, order: &Order) -> Step {
        let number = &order.number;
        let report = match self.provider.fetch_accrual(number).await {
            Ok(report) => report,
            Err(AccrualError::Throttled { retry_after }) => {
                let until = self.gate.raise(retry_after);
                warn!(
                    worker = self.id,
                    order = %number,
                    retry_after_secs = retry_after.as_secs(),
                    "accrual provider throttled, pausing worker pool"
                );
                debug!(?until, "throttle deadline");
                return Step::Throttled(retry_after);
            }
            Err(AccrualError::NotRegistered) => {
                debug!(worker = self.id, order = %number, "order not registered with provider yet");
                return Step::Unchanged;
            }
            Err(e) => {
                error!(worker = self.id, order = %number, error = %e, "accrual lookup failed");
                return Step::Unchanged;
            }
        };

        let update = match report.into_update(number) {
            Ok(update) => update,
            Err(e) => {
                error!(worker = self.id, order = %number, error = %e, "discarding accrual report");
                return Step::Unchanged;
            }
        };

        match self.store.update_order_outcome(number, update).await {
            Ok(UpdateOutcome::Applied) => {
                info!(
                    worker = self.id,
                    order = %number,
                    status = %update.status,
                    accrual = ?update.accrual,
                    "order updated"
                );
                Step::Updated(update.status)
            }
            Ok(outcome) => {
                debug!(worker = self.id, order = %number, ?outcome, "order left as is");
                Step::Unchanged
            }
            Err(e) => {
                error!(
                    worker = self.id,
                    order = %number,
                    error = %e,
                    "failed to store accrual outcome"
                );
                Step::Unchanged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::accrual::{AccrualReport, AccrualStatus};
    use crate::domain::order::{OrderNumber, UserId};
    use crate::domain::ports::{AccrualProvider, OrderStore};
    use crate::infrastructure::in_memory::InMemoryOrderStore;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    struct Fixed(Result<AccrualReport, AccrualError>);

    #[async_trait]
    impl AccrualProvider for Fixed {
        async fn fetch_accrual(
            &self,
            _number: &OrderNumber,
        ) -> Result<AccrualReport, AccrualError> {
            self.0.clone()
        }
    }

    async fn setup(
        answer: Result<AccrualReport, AccrualError>,
    ) -> (Worker, Order, InMemoryOrderStore) {
        let store = InMemoryOrderStore::new();
        let user = UserId::new("alice");
        let number = OrderNumber::parse("12345678903").unwrap();
        store.claim_order(&user, &number).await.unwrap();
        let order = store.fetch_pending(1).await.unwrap().remove(0);

        let (_tx, rx) = flume::bounded(1);
        let worker = Worker::new(
            1,
            rx,
            Arc::new(store.clone()),
            Arc::new(Fixed(answer)),
            ThrottleGate::new(),
            InFlight::default(),
        );
        (worker, order, store)
    }

    fn report(status: AccrualStatus, accrual: Option<rust_decimal::Decimal>) -> AccrualReport {
        AccrualReport {
            order: "12345678903".to_string(),
            status,
            accrual,
        }
    }

    #[tokio::test]
    async fn test_processed_report_updates_order() {
        let (worker, order, store) =
            setup(Ok(report(AccrualStatus::Processed, Some(dec!(500))))).await;

        assert_eq!(worker.process(&order).await, Step::Updated(OrderStatus::Processed));
        let stored = store.list_orders(&order.owner).await.unwrap().remove(0);
        assert_eq!(stored.status, OrderStatus::Processed);
        assert_eq!(stored.accrual, Some(dec!(500)));
    }

    #[tokio::test]
    async fn test_registered_report_moves_order_to_processing() {
        let (worker, order, _store) = setup(Ok(report(AccrualStatus::Registered, None))).await;
        assert_eq!(worker.process(&order).await, Step::Updated(OrderStatus::Processing));
        // A second identical answer is not a transition.
        assert_eq!(worker.process(&order).await, Step::Unchanged);
    }

    #[tokio::test]
    async fn test_provider_failures_leave_order_unchanged() {
        for failure in [
            AccrualError::NotRegistered,
            AccrualError::ServerError,
            AccrualError::Transport("connection refused".to_string()),
            AccrualError::Decode("expected value".to_string()),
        ] {
            let (worker, order, store) = setup(Err(failure)).await;
            assert_eq!(worker.process(&order).await, Step::Unchanged);
            let stored = store.list_orders(&order.owner).await.unwrap().remove(0);
            assert_eq!(stored.status, OrderStatus::New);
        }
    }

    #[tokio::test]
    async fn test_malformed_processed_report_is_discarded() {
        let (worker, order, store) = setup(Ok(report(AccrualStatus::Processed, None))).await;
        assert_eq!(worker.process(&order).await, Step::Unchanged);
        let stored = store.list_orders(&order.owner).await.unwrap().remove(0);
        assert_eq!(stored.status, OrderStatus::New);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttle_raises_pool_gate() {
        let retry_after = Duration::from_secs(60);
        let (worker, order, store) = setup(Err(AccrualError::Throttled { retry_after })).await;

        assert_eq!(worker.process(&order).await, Step::Throttled(retry_after));
        assert!(worker.gate.state().is_throttled());
        let stored = store.list_orders(&order.owner).await.unwrap().remove(0);
        assert_eq!(stored.status, OrderStatus::New);
    }
}
