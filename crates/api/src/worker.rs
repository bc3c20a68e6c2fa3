//! Background sweep that re-applies stock compensations left pending.

use std::sync::Arc;
use std::time::Duration;

use store::Store;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use crate::state::Orchestrator;

/// Periodically retries every unresolved compensation until shutdown.
pub struct CompensationWorker<S: Store> {
    orchestrator: Arc<Orchestrator<S>>,
    interval: Duration,
}

impl<S: Store> CompensationWorker<S> {
    pub fn new(orchestrator: Arc<Orchestrator<S>>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(interval_secs = self.interval.as_secs(), "compensation worker started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("compensation worker stopped");
    }

    /// One pass over the pending compensations. Returns how many were resolved.
    pub async fn sweep(&self) -> usize {
        match self.orchestrator.retry_pending_compensations().await {
            Ok(0) => 0,
            Ok(resolved) => {
                metrics::counter!("stock_compensations_resolved_total").increment(resolved as u64);
                tracing::info!(resolved, "pending compensations resolved");
                resolved
            }
            Err(err) => {
                tracing::error!(error = %err, "compensation sweep failed");
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::OrderId;
    use domain::{PendingCompensation, StockDelta};
    use saga::{InMemoryStockService, OrderOrchestrator, StockReservation};
    use store::{CompensationRepository, InMemoryStore};

    fn orchestrator(
        store: InMemoryStore,
        stock: InMemoryStockService,
    ) -> Arc<Orchestrator<InMemoryStore>> {
        let stock: Arc<dyn StockReservation> = Arc::new(stock);
        Arc::new(OrderOrchestrator::new(store, stock))
    }

    #[tokio::test]
    async fn sweep_applies_pending_restock() {
        let store = InMemoryStore::new();
        let stock = InMemoryStockService::new();
        stock
            .add_product("sku-1", "Widget", domain::Money::from_cents(500), 3)
            .await;
        store
            .record_compensation(&PendingCompensation::new(
                OrderId::new(),
                vec![StockDelta::new("sku-1", 2)],
                "order cancelled",
                3,
                "stock service unavailable",
            ))
            .await
            .unwrap();

        let worker = CompensationWorker::new(
            orchestrator(store.clone(), stock.clone()),
            Duration::from_secs(60),
        );

        assert_eq!(worker.sweep().await, 1);
        assert_eq!(stock.stock_of("sku-1").await, Some(5));
        assert!(store.list_unresolved_compensations().await.unwrap().is_empty());
        assert_eq!(worker.sweep().await, 0);
    }

    #[tokio::test]
    async fn sweep_keeps_marker_while_stock_is_down() {
        let store = InMemoryStore::new();
        let stock = InMemoryStockService::new();
        stock
            .add_product("sku-1", "Widget", domain::Money::from_cents(500), 3)
            .await;
        stock.set_fail_on_apply(true).await;
        store
            .record_compensation(&PendingCompensation::new(
                OrderId::new(),
                vec![StockDelta::new("sku-1", 1)],
                "order cancelled",
                3,
                "stock service unavailable",
            ))
            .await
            .unwrap();

        let worker = CompensationWorker::new(
            orchestrator(store.clone(), stock.clone()),
            Duration::from_secs(60),
        );

        assert_eq!(worker.sweep().await, 0);
        let pending = store.list_unresolved_compensations().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 4);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let worker = CompensationWorker::new(
            orchestrator(InMemoryStore::new(), InMemoryStockService::new()),
            Duration::from_millis(10),
        );
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(worker.run(rx));

        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop")
            .unwrap();
    }
}
