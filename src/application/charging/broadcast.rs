//! Periodic consumption broadcasts for active transactions

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::json;
use tokio::task::AbortHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::application::events::topics;
use crate::domain::{ChargerIdentity, MeterValueRepository, Publisher, TransactionRepository};

struct Scheduled {
    charger: ChargerIdentity,
    connector_id: u32,
    handle: AbortHandle,
}

/// One ticker task per active transaction. Ticks never block the
/// connection that started the transaction.
pub struct ConsumptionBroadcaster {
    period: Duration,
    transactions: Arc<dyn TransactionRepository>,
    meter_values: Arc<dyn MeterValueRepository>,
    publisher: Arc<dyn Publisher>,
    scheduled: DashMap<i32, Scheduled>,
}

impl ConsumptionBroadcaster {
    pub fn new(
        period: Duration,
        transactions: Arc<dyn TransactionRepository>,
        meter_values: Arc<dyn MeterValueRepository>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            period,
            transactions,
            meter_values,
            publisher,
            scheduled: DashMap::new(),
        }
    }

    pub fn schedule(&self, transaction_id: i32, charger: &ChargerIdentity, connector_id: u32) {
        let transactions = self.transactions.clone();
        let meter_values = self.meter_values.clone();
        let publisher = self.publisher.clone();
        let period = self.period;

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let transaction = match transactions.find_by_id(transaction_id).await {
                    Ok(Some(tx)) if tx.is_active() => tx,
                    Ok(_) => break,
                    Err(e) => {
                        warn!(transaction_id, error = %e, "Consumption broadcast read failed");
                        continue;
                    }
                };
                let latest = match meter_values.list_for_transaction(transaction_id).await {
                    Ok(values) => values.iter().rev().find_map(|v| v.energy_wh()),
                    Err(e) => {
                        warn!(transaction_id, error = %e, "Consumption broadcast read failed");
                        None
                    }
                };

                publisher.publish(
                    &topics::transaction_consumption(transaction_id),
                    json!({
                        "transactionId": transaction_id,
                        "charger": transaction.charger.key(),
                        "connectorId": transaction.connector_id,
                        "startMeter": transaction.start_meter,
                        "latestMeter": latest,
                        "energyWh": transaction.energy_wh(latest),
                        "at": Utc::now(),
                    }),
                );
            }
            debug!(transaction_id, "Consumption broadcast finished");
        })
        .abort_handle();

        if let Some(previous) = self.scheduled.insert(
            transaction_id,
            Scheduled {
                charger: charger.to_aggregate(),
                connector_id,
                handle,
            },
        ) {
            previous.handle.abort();
        }
    }

    pub fn cancel(&self, transaction_id: i32) {
        if let Some((_, scheduled)) = self.scheduled.remove(&transaction_id) {
            scheduled.handle.abort();
            debug!(transaction_id, "Consumption broadcast cancelled");
        }
    }

    /// Cancel the broadcasts that belong to a connection identity: all of a
    /// station's transactions for the aggregate, one connector's otherwise.
    pub fn cancel_for(&self, identity: &ChargerIdentity) -> usize {
        let owned: Vec<i32> = self
            .scheduled
            .iter()
            .filter(|s| {
                s.charger.serial_number == identity.serial_number
                    && (identity.is_aggregate() || s.connector_id == identity.connector_id)
            })
            .map(|s| *s.key())
            .collect();

        for id in &owned {
            self.cancel(*id);
        }
        owned.len()
    }

    pub fn is_scheduled(&self, transaction_id: i32) -> bool {
        self.scheduled.contains_key(&transaction_id)
    }

    pub fn cancel_all(&self) {
        let ids: Vec<i32> = self.scheduled.iter().map(|s| *s.key()).collect();
        for id in ids {
            self.cancel(id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::events::EventBus;
    use crate::domain::Transaction;
    use crate::infrastructure::storage::memory::{
        InMemoryMeterValueRepository, InMemoryTransactionRepository,
    };

    #[tokio::test(start_paused = true)]
    async fn publishes_every_period_until_cancelled() {
        let transactions = Arc::new(InMemoryTransactionRepository::new());
        let bus = EventBus::new();
        let mut events = bus.subscribe();
        let cp = ChargerIdentity::aggregate("CP1");
        transactions
            .insert(Transaction::start(1, cp.clone(), 1, None, Some(0), Utc::now()))
            .await
            .unwrap();

        let broadcaster = ConsumptionBroadcaster::new(
            Duration::from_secs(60),
            transactions,
            Arc::new(InMemoryMeterValueRepository::default()),
            Arc::new(bus.clone()),
        );
        broadcaster.schedule(1, &cp, 1);

        tokio::time::sleep(Duration::from_secs(61)).await;
        let event = events.try_recv().unwrap();
        assert_eq!(event.topic, "transaction/1/consumption");

        assert_eq!(broadcaster.cancel_for(&ChargerIdentity::new("CP1", 2)), 0);
        assert_eq!(broadcaster.cancel_for(&cp), 1);
        tokio::time::sleep(Duration::from_secs(120)).await;
        assert!(events.try_recv().is_none());
    }
}
