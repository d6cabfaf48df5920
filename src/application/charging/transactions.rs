//! Transaction state machine
//!
//! NoTransaction → Active → Stopped. Start, MeterValues and Stop
//! notifications for one station are serialized by a per-station lock so at
//! most one transaction is Active per (station, connector) whatever order
//! the notifications arrive in. Different stations never contend.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::broadcast::ConsumptionBroadcaster;
use crate::application::events::topics;
use crate::application::session::{Direction, EntryKind, LogEntry, SessionLog, StreamKey};
use crate::domain::transaction::model::SUPERSEDED_REASON;
use crate::domain::{
    AccountService, AccountStatus, ChargerIdentity, DomainResult, MeterValue,
    MeterValueRepository, Publisher, Transaction, TransactionRepository,
};

#[derive(Debug, Clone)]
pub struct TransactionPolicy {
    /// Require a resolvable, authorized credential to start
    pub enforce_authorization: bool,
    /// Station serials exempt from credential checks
    pub free_charging: HashSet<String>,
}

impl Default for TransactionPolicy {
    fn default() -> Self {
        Self {
            enforce_authorization: true,
            free_charging: HashSet::new(),
        }
    }
}

/// Outcome of a credential check, shaped like OCPP `idTagInfo`.
#[derive(Debug, Clone, PartialEq)]
pub struct Authorization {
    pub status: AccountStatus,
    pub expiry_date: Option<DateTime<Utc>>,
    pub parent_id_tag: Option<String>,
}

impl Authorization {
    pub fn status(status: AccountStatus) -> Self {
        Self {
            status,
            expiry_date: None,
            parent_id_tag: None,
        }
    }

    pub fn accepted() -> Self {
        Self::status(AccountStatus::Accepted)
    }

    pub fn is_accepted(&self) -> bool {
        self.status == AccountStatus::Accepted
    }
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub connector_id: u32,
    pub id_tag: String,
    pub meter_start: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StartOutcome {
    /// 0 when rejected
    pub transaction_id: i32,
    pub authorization: Authorization,
    /// Same start seen twice; the existing transaction was returned
    pub duplicate: bool,
}

#[derive(Debug, Clone)]
pub struct StopRequest {
    pub transaction_id: i32,
    pub id_tag: Option<String>,
    pub meter_stop: Option<i64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    /// `transactionData` samples
    pub samples: Vec<Sample>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StopOutcome {
    pub transaction: Transaction,
    pub authorization: Authorization,
    pub placeholder_created: bool,
    /// The transaction was already Stopped; nothing changed
    pub already_stopped: bool,
}

/// A sampled value before it is attached to a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub measurand: String,
    pub value: String,
    pub context: Option<String>,
    pub unit: Option<String>,
}

pub struct TransactionService {
    transactions: Arc<dyn TransactionRepository>,
    meter_values: Arc<dyn MeterValueRepository>,
    accounts: Arc<dyn AccountService>,
    publisher: Arc<dyn Publisher>,
    log: Arc<SessionLog>,
    broadcaster: Arc<ConsumptionBroadcaster>,
    policy: TransactionPolicy,
    station_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl TransactionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transactions: Arc<dyn TransactionRepository>,
        meter_values: Arc<dyn MeterValueRepository>,
        accounts: Arc<dyn AccountService>,
        publisher: Arc<dyn Publisher>,
        log: Arc<SessionLog>,
        broadcaster: Arc<ConsumptionBroadcaster>,
        policy: TransactionPolicy,
    ) -> Self {
        Self {
            transactions,
            meter_values,
            accounts,
            publisher,
            log,
            broadcaster,
            policy,
            station_locks: DashMap::new(),
        }
    }

    fn station_lock(&self, identity: &ChargerIdentity) -> Arc<Mutex<()>> {
        self.station_locks
            .entry(identity.serial_number.clone())
            .or_default()
            .clone()
    }

    fn checks_credentials(&self, identity: &ChargerIdentity) -> bool {
        self.policy.enforce_authorization
            && !self.policy.free_charging.contains(&identity.serial_number)
    }

    pub async fn get(&self, transaction_id: i32) -> DomainResult<Option<Transaction>> {
        self.transactions.find_by_id(transaction_id).await
    }

    pub async fn meter_values(&self, transaction_id: i32) -> DomainResult<Vec<MeterValue>> {
        self.meter_values.list_for_transaction(transaction_id).await
    }

    pub async fn active_for_connector(
        &self,
        identity: &ChargerIdentity,
        connector_id: u32,
    ) -> DomainResult<Option<Transaction>> {
        self.transactions
            .find_active_for_connector(&identity.to_aggregate(), connector_id)
            .await
    }

    // ── Authorization ──────────────────────────────────────

    /// Resolve and check a credential for `identity`.
    ///
    /// `ConcurrentTx` when the credential already owns an Active transaction
    /// on another station, or on another connector than `own_connector`.
    pub async fn authorize(
        &self,
        identity: &ChargerIdentity,
        id_tag: &str,
        own_connector: Option<u32>,
    ) -> DomainResult<Authorization> {
        if !self.checks_credentials(identity) {
            return Ok(Authorization::accepted());
        }

        let Some(account) = self.accounts.resolve_account(id_tag).await else {
            return Ok(Authorization::status(AccountStatus::Invalid));
        };
        let mut authorization = Authorization {
            status: account.effective_status(Utc::now()),
            expiry_date: account.expiry_date,
            parent_id_tag: account.parent_id_tag.clone(),
        };
        if !authorization.is_accepted() {
            return Ok(authorization);
        }
        if !self.accounts.is_authorized(&account, identity).await {
            authorization.status = AccountStatus::Invalid;
            return Ok(authorization);
        }

        let busy_elsewhere = self
            .transactions
            .find_active_by_credential(id_tag)
            .await?
            .into_iter()
            .any(|tx| {
                tx.charger.serial_number != identity.serial_number
                    || own_connector.is_some_and(|c| c != tx.connector_id)
            });
        if busy_elsewhere {
            authorization.status = AccountStatus::ConcurrentTx;
        }
        Ok(authorization)
    }

    // ── Start ──────────────────────────────────────────────

    pub async fn start(
        &self,
        identity: &ChargerIdentity,
        request: StartRequest,
    ) -> DomainResult<StartOutcome> {
        let lock = self.station_lock(identity);
        let _guard = lock.lock().await;
        let station = identity.to_aggregate();
        let connector_id = effective_connector(identity, request.connector_id);

        let authorization = self
            .authorize(identity, &request.id_tag, Some(connector_id))
            .await?;
        if !authorization.is_accepted() {
            info!(
                charge_point_id = %identity,
                connector_id,
                id_tag = request.id_tag.as_str(),
                status = %authorization.status,
                "StartTransaction rejected"
            );
            return Ok(StartOutcome {
                transaction_id: 0,
                authorization,
                duplicate: false,
            });
        }

        if let Some(mut existing) = self
            .transactions
            .find_active_for_connector(&station, connector_id)
            .await?
        {
            let same_start = existing.credential_ref.as_deref() == Some(request.id_tag.as_str())
                && request.timestamp.is_some()
                && existing.start_timestamp == request.timestamp;
            if same_start {
                info!(
                    charge_point_id = %identity,
                    transaction_id = existing.id,
                    "Duplicate StartTransaction, returning existing transaction"
                );
                return Ok(StartOutcome {
                    transaction_id: existing.id,
                    authorization,
                    duplicate: true,
                });
            }

            warn!(
                charge_point_id = %identity,
                connector_id,
                transaction_id = existing.id,
                "Superseding Active transaction on connector"
            );
            let at = request.timestamp.unwrap_or_else(Utc::now);
            existing.stop(None, at, Some(SUPERSEDED_REASON.to_string()));
            self.transactions.update(existing.clone()).await?;
            self.finish_stopped(&existing, true);
        }

        let id = self.transactions.next_id().await?;
        let started_at = request.timestamp.unwrap_or_else(Utc::now);
        let transaction = Transaction::start(
            id,
            station.clone(),
            connector_id,
            Some(request.id_tag.clone()),
            request.meter_start,
            started_at,
        );
        self.transactions.insert(transaction.clone()).await?;

        self.log.open(StreamKey::Transaction(id));
        self.broadcaster.schedule(id, &station, connector_id);
        self.publisher.publish(
            &topics::transaction_started(id),
            json!({
                "transactionId": id,
                "charger": station.key(),
                "connectorId": connector_id,
                "idTag": request.id_tag,
                "meterStart": request.meter_start,
                "timestamp": started_at,
            }),
        );
        metrics::counter!("ocpp_transactions_started_total").increment(1);
        info!(
            charge_point_id = %identity,
            connector_id,
            transaction_id = id,
            "Transaction started"
        );

        Ok(StartOutcome {
            transaction_id: id,
            authorization,
            duplicate: false,
        })
    }

    // ── Meter values ───────────────────────────────────────

    /// Store samples and apply boundary readings. Returns the transaction
    /// the samples were attached to, if any.
    pub async fn record_meter_values(
        &self,
        identity: &ChargerIdentity,
        connector_id: u32,
        transaction_id: Option<i32>,
        samples: Vec<Sample>,
    ) -> DomainResult<Option<i32>> {
        let lock = self.station_lock(identity);
        let _guard = lock.lock().await;
        let station = identity.to_aggregate();
        let connector_id = effective_connector(identity, connector_id);

        let transaction = match transaction_id {
            Some(id) => self.transactions.find_by_id(id).await?,
            None if connector_id > 0 => {
                self.transactions
                    .find_active_for_connector(&station, connector_id)
                    .await?
            }
            None => None,
        };
        let attach_to = transaction.as_ref().map(|t| t.id).or(transaction_id);

        let rows: Vec<MeterValue> = samples
            .into_iter()
            .map(|s| to_row(s, attach_to, &station, connector_id))
            .collect();
        let boundary = rows.clone();
        self.meter_values.append(rows).await?;

        if let Some(mut tx) = transaction.filter(Transaction::is_active) {
            if self.apply_boundaries(&mut tx, &boundary).await? {
                self.transactions.update(tx).await?;
            }
        }
        Ok(attach_to)
    }

    /// Update start/stop meters from boundary samples and infer a missing
    /// start meter from the earliest energy reading. Returns `true` when
    /// the transaction changed.
    async fn apply_boundaries(
        &self,
        tx: &mut Transaction,
        samples: &[MeterValue],
    ) -> DomainResult<bool> {
        let mut changed = false;

        for sample in samples {
            let Some(wh) = sample.energy_wh() else {
                continue;
            };
            if sample.is_begin_sample() && (tx.start_meter.is_none() || tx.start_meter_inferred) {
                tx.start_meter = Some(wh);
                tx.start_meter_inferred = false;
                changed = true;
            }
            if sample.is_end_sample() && tx.is_active() {
                tx.stop_meter = Some(wh);
                changed = true;
            }
        }

        if tx.start_meter.is_none() || tx.start_meter_inferred {
            let earliest = self
                .meter_values
                .list_for_transaction(tx.id)
                .await?
                .iter()
                .find_map(MeterValue::energy_wh);
            if let Some(wh) = earliest {
                if tx.start_meter != Some(wh) {
                    tx.start_meter = Some(wh);
                    tx.start_meter_inferred = true;
                    changed = true;
                }
            }
        }
        Ok(changed)
    }

    // ── Stop ───────────────────────────────────────────────

    /// Always succeeds from the station's point of view. An unknown id gets
    /// a placeholder transaction first; a repeated stop changes nothing.
    pub async fn stop(
        &self,
        identity: &ChargerIdentity,
        request: StopRequest,
    ) -> DomainResult<StopOutcome> {
        let lock = self.station_lock(identity);
        let _guard = lock.lock().await;
        let station = identity.to_aggregate();

        let (mut tx, placeholder_created) =
            match self.transactions.find_by_id(request.transaction_id).await? {
                Some(tx) => (tx, false),
                None => {
                    warn!(
                        charge_point_id = %identity,
                        transaction_id = request.transaction_id,
                        "StopTransaction for unknown transaction, creating placeholder"
                    );
                    let tx = Transaction::placeholder(
                        request.transaction_id,
                        station.clone(),
                        identity.connector_id,
                    );
                    self.transactions.insert(tx.clone()).await?;
                    (tx, true)
                }
            };

        let authorization = self.stop_authorization(identity, &tx, request.id_tag.as_deref()).await?;

        if !tx.is_active() {
            info!(
                charge_point_id = %identity,
                transaction_id = tx.id,
                "Repeated StopTransaction ignored"
            );
            return Ok(StopOutcome {
                transaction: tx,
                authorization,
                placeholder_created,
                already_stopped: true,
            });
        }

        let rows: Vec<MeterValue> = request
            .samples
            .into_iter()
            .map(|s| to_row(s, Some(tx.id), &station, tx.connector_id))
            .collect();
        if !rows.is_empty() {
            self.meter_values.append(rows.clone()).await?;
            self.apply_boundaries(&mut tx, &rows).await?;
        }
        if tx.start_meter.is_none() {
            self.apply_boundaries(&mut tx, &[]).await?;
        }

        let stopped_at = request.timestamp.unwrap_or_else(Utc::now);
        tx.stop(request.meter_stop, stopped_at, request.reason);
        self.transactions.update(tx.clone()).await?;
        self.finish_stopped(&tx, false);

        metrics::counter!("ocpp_transactions_stopped_total").increment(1);
        info!(
            charge_point_id = %identity,
            transaction_id = tx.id,
            meter_stop = ?tx.stop_meter,
            placeholder = tx.placeholder,
            "Transaction stopped"
        );

        Ok(StopOutcome {
            transaction: tx,
            authorization,
            placeholder_created,
            already_stopped: false,
        })
    }

    async fn stop_authorization(
        &self,
        identity: &ChargerIdentity,
        tx: &Transaction,
        id_tag: Option<&str>,
    ) -> DomainResult<Authorization> {
        let Some(id_tag) = id_tag else {
            return Ok(Authorization::accepted());
        };
        if tx.credential_ref.as_deref() == Some(id_tag) || !self.checks_credentials(identity) {
            return Ok(Authorization::accepted());
        }

        let authorized = match self.accounts.resolve_account(id_tag).await {
            Some(account) => {
                account.effective_status(Utc::now()) == AccountStatus::Accepted
                    && self.accounts.is_authorized(&account, identity).await
            }
            None => false,
        };
        Ok(if authorized {
            Authorization::accepted()
        } else {
            Authorization::status(AccountStatus::Invalid)
        })
    }

    /// Side effects of reaching Stopped. `close_stream` is set for stops the
    /// engine decides on itself; a station's StopTransaction closes the
    /// stream after its own log line is written.
    fn finish_stopped(&self, tx: &Transaction, close_stream: bool) {
        self.broadcaster.cancel(tx.id);
        self.publisher.publish(
            &topics::transaction_stopped(tx.id),
            json!({
                "transactionId": tx.id,
                "charger": tx.charger.key(),
                "connectorId": tx.connector_id,
                "meterStart": tx.start_meter,
                "meterStop": tx.stop_meter,
                "energyWh": tx.energy_wh(None),
                "reason": tx.stop_reason,
                "timestamp": tx.stop_timestamp,
                "placeholder": tx.placeholder,
            }),
        );
        if close_stream {
            self.log.append(
                LogEntry::new(tx.connector_identity(), Direction::Internal, EntryKind::Info)
                    .transaction(Some(tx.id))
                    .detail(json!({ "stopped": tx.stop_reason })),
            );
            self.log.close(&StreamKey::Transaction(tx.id));
        }
    }

    /// Stop the periodic broadcasts owned by a disconnecting identity.
    pub fn cancel_broadcasts_for(&self, identity: &ChargerIdentity) -> usize {
        self.broadcaster.cancel_for(identity)
    }

    pub fn cancel_all_broadcasts(&self) {
        self.broadcaster.cancel_all();
    }
}

/// A connector-level connection reporting connector 0 means its own connector.
fn effective_connector(identity: &ChargerIdentity, reported: u32) -> u32 {
    if reported == 0 {
        identity.connector_id
    } else {
        reported
    }
}

fn to_row(
    sample: Sample,
    transaction_id: Option<i32>,
    station: &ChargerIdentity,
    connector_id: u32,
) -> MeterValue {
    MeterValue {
        transaction_id,
        charger: station.clone(),
        connector_id,
        timestamp: sample.timestamp,
        measurand: sample.measurand,
        value: sample.value,
        context: sample.context,
        unit: sample.unit,
    }
}
