//! End-to-end protocol flows through the public API.
//!
//! Each station connection is a `OcppHandlerV16` plus an mpsc outbox
//! registered in the session store, so no sockets are involved.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use ocpp_csms::application::session::EntryKind;
use ocpp_csms::application::{
    CentralSystem, CommandError, EngineSettings, OcppHandlerV16, SharedCentralSystem,
    TransactionPolicy,
};
use ocpp_csms::domain::{
    Account, AvailabilityState, ChargerIdentity, PendingCallStatus, RepositoryProvider,
    TransactionStatus,
};
use ocpp_csms::infrastructure::{InMemoryAccountService, InMemoryRepositoryProvider};

struct Csms {
    system: SharedCentralSystem,
    repos: Arc<InMemoryRepositoryProvider>,
}

fn csms(settings: EngineSettings) -> Csms {
    let repos = Arc::new(InMemoryRepositoryProvider::new());
    let accounts = Arc::new(InMemoryAccountService::new([Account::new("TAG1")]));
    let system = CentralSystem::new(settings, repos.as_ref(), accounts);
    Csms { system, repos }
}

/// Register a live session and return the station side of it.
fn connect(
    system: &SharedCentralSystem,
    identity: ChargerIdentity,
    last_octet: u8,
) -> (OcppHandlerV16, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let session = system
        .sessions
        .register(identity.clone(), IpAddr::V4(Ipv4Addr::new(10, 0, 0, last_octet)), tx, None)
        .unwrap();
    system.on_connected(&session);
    (OcppHandlerV16::new(identity, system.clone()), rx)
}

async fn call(handler: &OcppHandlerV16, id: &str, action: &str, payload: Value) -> Value {
    let frame = json!([2, id, action, payload]).to_string();
    let reply = handler.handle(&frame).await.expect("a Call always gets a reply");
    serde_json::from_str(&reply).unwrap()
}

/// Message id of the Call frame the CSMS pushed to the station.
fn sent_call_id(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    let frame: Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
    assert_eq!(frame[0], 2);
    frame[1].as_str().unwrap().to_string()
}

// Small deterministic generator so interleavings are reproducible
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: u64) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) % bound
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn at_most_one_active_transaction_per_connector() {
    let settings = EngineSettings {
        transaction_policy: TransactionPolicy {
            enforce_authorization: false,
            ..TransactionPolicy::default()
        },
        ..EngineSettings::default()
    };
    let csms = csms(settings);

    let identities = [
        ChargerIdentity::aggregate("CP1"),
        ChargerIdentity::new("CP1", 1),
        ChargerIdentity::new("CP1", 2),
        ChargerIdentity::aggregate("CP2"),
    ];

    let mut workers = Vec::new();
    for (n, identity) in identities.into_iter().enumerate() {
        let (handler, rx) = connect(&csms.system, identity, n as u8 + 1);
        workers.push(tokio::spawn(async move {
            let _rx = rx;
            let mut rng = Lcg(n as u64 * 7919 + 1);
            let mut started: Vec<i64> = Vec::new();

            for step in 0..60 {
                let id = format!("w{}-{}", n, step);
                let connector = rng.next(3);
                match rng.next(3) {
                    0 => {
                        let reply = call(
                            &handler,
                            &id,
                            "StartTransaction",
                            json!({
                                "connectorId": connector,
                                "idTag": format!("TAG{}", rng.next(4)),
                                "meterStart": step * 10,
                                "timestamp": format!("2024-05-01T10:{:02}:00Z", step),
                            }),
                        )
                        .await;
                        if let Some(tx) = reply[2]["transactionId"].as_i64().filter(|id| *id > 0) {
                            started.push(tx);
                        }
                    }
                    1 if !started.is_empty() => {
                        let tx = started[rng.next(started.len() as u64) as usize];
                        call(
                            &handler,
                            &id,
                            "StopTransaction",
                            json!({
                                "transactionId": tx,
                                "meterStop": step * 10 + 5,
                                "timestamp": format!("2024-05-01T11:{:02}:00Z", step),
                            }),
                        )
                        .await;
                    }
                    _ => {
                        call(
                            &handler,
                            &id,
                            "MeterValues",
                            json!({
                                "connectorId": connector,
                                "meterValue": [{
                                    "timestamp": format!("2024-05-01T10:{:02}:30Z", step),
                                    "sampledValue": [{ "value": (step * 10).to_string() }],
                                }],
                            }),
                        )
                        .await;
                    }
                }
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    let active = csms.repos.transactions().find_active().await.unwrap();
    let mut per_connector: HashMap<(String, u32), usize> = HashMap::new();
    for tx in &active {
        *per_connector
            .entry((tx.charger.serial_number.clone(), tx.connector_id))
            .or_default() += 1;
    }
    assert!(
        per_connector.values().all(|count| *count <= 1),
        "more than one active transaction on a connector: {:?}",
        per_connector
    );
}

#[tokio::test]
async fn reply_after_submit_completes_with_exact_payload() {
    let csms = csms(EngineSettings::default());
    let cp = ChargerIdentity::aggregate("CP1");
    let (station, mut rx) = connect(&csms.system, cp.clone(), 1);

    let message_id = csms
        .system
        .submit_pending_call(&cp, "GetConfiguration", json!({ "key": ["HeartbeatInterval"] }), None)
        .unwrap();
    assert_eq!(sent_call_id(&mut rx), message_id);

    let result = json!({
        "configurationKey": [{ "key": "HeartbeatInterval", "readonly": false, "value": "300" }],
        "unknownKey": [],
    });
    let frame = json!([3, message_id, result]).to_string();
    assert!(station.handle(&frame).await.is_none());

    let call = csms
        .system
        .get_pending_call_result(&message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.status, PendingCallStatus::Completed);
    assert_eq!(call.result_payload, Some(result));
}

#[tokio::test]
async fn first_terminal_reply_wins() {
    let csms = csms(EngineSettings::default());
    let cp = ChargerIdentity::aggregate("CP1");
    let (station, mut rx) = connect(&csms.system, cp.clone(), 1);

    let message_id = csms
        .system
        .submit_pending_call(&cp, "Reset", json!({ "type": "Soft" }), None)
        .unwrap();
    sent_call_id(&mut rx);

    let accepted = json!([3, message_id, { "status": "Accepted" }]).to_string();
    let rejected = json!([3, message_id, { "status": "Rejected" }]).to_string();
    let error = json!([4, message_id, "InternalError", "late", {}]).to_string();
    station.handle(&accepted).await;
    station.handle(&rejected).await;
    station.handle(&error).await;

    let call = csms
        .system
        .get_pending_call_result(&message_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(call.status, PendingCallStatus::Completed);
    assert_eq!(call.result_payload, Some(json!({ "status": "Accepted" })));
    assert_eq!(call.error_payload, None);
}

#[tokio::test]
async fn status_changes_drive_availability_and_keep_raw_strings() {
    let csms = csms(EngineSettings::default());
    let cp = ChargerIdentity::aggregate("CP1");
    let connector = ChargerIdentity::new("CP1", 1);
    let (station, _rx) = connect(&csms.system, cp.clone(), 1);

    call(
        &station,
        "s1",
        "StatusNotification",
        json!({ "connectorId": 1, "status": "Available", "errorCode": "NoError" }),
    )
    .await;
    let status = csms.system.get_charger_status(&connector).await.unwrap().unwrap();
    assert_eq!(status.availability, AvailabilityState::Operative);

    call(
        &station,
        "s2",
        "StatusNotification",
        json!({ "connectorId": 1, "status": "Faulted", "errorCode": "GroundFailure" }),
    )
    .await;
    let status = csms.system.get_charger_status(&connector).await.unwrap().unwrap();
    assert_eq!(status.availability, AvailabilityState::Inoperative);
    assert_eq!(status.last_status.as_deref(), Some("Faulted"));
    assert_eq!(status.last_error_code.as_deref(), Some("GroundFailure"));

    // Both raw reports stay retrievable from the session log
    let reported: Vec<String> = csms
        .system
        .get_session_log(&cp)
        .into_iter()
        .filter(|e| e.action.as_deref() == Some("StatusNotification"))
        .filter_map(|e| e.detail["request"]["status"].as_str().map(str::to_string))
        .collect();
    assert_eq!(reported, vec!["Available", "Faulted"]);
}

#[tokio::test]
async fn stop_for_unknown_transaction_creates_stopped_placeholder() {
    let csms = csms(EngineSettings::default());
    let cp = ChargerIdentity::aggregate("CP1");
    let (station, _rx) = connect(&csms.system, cp.clone(), 1);

    let reply = call(
        &station,
        "stop-1",
        "StopTransaction",
        json!({
            "transactionId": 9999,
            "meterStop": 4200,
            "timestamp": "2024-05-01T10:00:00Z",
        }),
    )
    .await;
    assert_eq!(reply[0], 3);
    assert_eq!(reply[1], "stop-1");
    assert_eq!(reply[2]["idTagInfo"]["status"], "Accepted");

    let tx = csms.system.transactions.get(9999).await.unwrap().unwrap();
    assert!(tx.placeholder);
    assert_eq!(tx.status, TransactionStatus::Stopped);
    assert_eq!(tx.stop_meter, Some(4200));
    assert_eq!(
        tx.stop_timestamp.map(|t| t.to_rfc3339()),
        Some("2024-05-01T10:00:00+00:00".to_string())
    );
}

#[tokio::test]
async fn submit_to_disconnected_station_creates_no_record() {
    let csms = csms(EngineSettings::default());
    let cp = ChargerIdentity::aggregate("CP-OFFLINE");

    let err = csms
        .system
        .submit_pending_call(&cp, "GetConfiguration", json!({}), None)
        .unwrap_err();
    assert_eq!(err, CommandError::NotConnected(cp.key()));

    csms.system.pending_calls.flush_mirror().await;
    assert_eq!(csms.system.pending_calls.pending_count(), 0);
    assert!(csms.repos.pending_calls().list_pending().await.unwrap().is_empty());
    assert!(csms.system.get_session_log(&cp).is_empty());
}

#[tokio::test(start_paused = true)]
async fn unanswered_call_times_out_once_after_five_seconds() {
    let csms = csms(EngineSettings::default());
    let cp = ChargerIdentity::aggregate("CP1");
    let (station, mut rx) = connect(&csms.system, cp.clone(), 1);

    let message_id = csms
        .system
        .submit_pending_call(&cp, "GetConfiguration", json!({}), Some(Duration::from_secs(5)))
        .unwrap();
    sent_call_id(&mut rx);

    tokio::time::sleep(Duration::from_millis(4_900)).await;
    let call = csms.system.get_pending_call_result(&message_id).await.unwrap().unwrap();
    assert_eq!(call.status, PendingCallStatus::Pending);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let call = csms.system.get_pending_call_result(&message_id).await.unwrap().unwrap();
    assert_eq!(call.status, PendingCallStatus::TimedOut);

    // A late reply changes nothing
    let late = json!([3, message_id, { "configurationKey": [] }]).to_string();
    station.handle(&late).await;
    tokio::time::sleep(Duration::from_secs(30)).await;

    let call = csms.system.get_pending_call_result(&message_id).await.unwrap().unwrap();
    assert_eq!(call.status, PendingCallStatus::TimedOut);
    assert_eq!(call.result_payload, None);

    let timeouts = csms
        .system
        .get_session_log(&cp)
        .into_iter()
        .filter(|e| e.kind == EntryKind::Timeout && e.message_id.as_deref() == Some(&message_id))
        .count();
    assert_eq!(timeouts, 1);
}

#[tokio::test]
async fn authorized_session_runs_start_to_stop() {
    let csms = csms(EngineSettings::default());
    let connector = ChargerIdentity::new("CP1", 1);
    let (station, _rx) = connect(&csms.system, connector.clone(), 1);

    let reply = call(&station, "a1", "Authorize", json!({ "idTag": "TAG1" })).await;
    assert_eq!(reply[2]["idTagInfo"]["status"], "Accepted");

    let reply = call(&station, "a2", "Authorize", json!({ "idTag": "NOPE" })).await;
    assert_eq!(reply[0], 3, "unknown credentials are a normal rejection");
    assert_eq!(reply[2]["idTagInfo"]["status"], "Invalid");

    let reply = call(
        &station,
        "t1",
        "StartTransaction",
        json!({
            "connectorId": 1,
            "idTag": "TAG1",
            "meterStart": 1000,
            "timestamp": "2024-05-01T10:00:00Z",
        }),
    )
    .await;
    assert_eq!(reply[2]["idTagInfo"]["status"], "Accepted");
    let tx_id = reply[2]["transactionId"].as_i64().unwrap() as i32;

    call(
        &station,
        "m1",
        "MeterValues",
        json!({
            "connectorId": 1,
            "transactionId": tx_id,
            "meterValue": [{
                "timestamp": "2024-05-01T10:15:00Z",
                "sampledValue": [{ "value": "2.5", "unit": "kWh" }],
            }],
        }),
    )
    .await;

    let reply = call(
        &station,
        "t2",
        "StopTransaction",
        json!({
            "transactionId": tx_id,
            "idTag": "TAG1",
            "meterStop": 3000,
            "timestamp": "2024-05-01T10:30:00Z",
            "reason": "Local",
        }),
    )
    .await;
    assert_eq!(reply[2]["idTagInfo"]["status"], "Accepted");

    let tx = csms.system.transactions.get(tx_id).await.unwrap().unwrap();
    assert_eq!(tx.status, TransactionStatus::Stopped);
    assert_eq!(tx.energy_wh(None), Some(2000));
    assert_eq!(csms.system.transactions.meter_values(tx_id).await.unwrap().len(), 1);

    // Start, sample and stop each left one line in the transaction stream
    let lines = csms.system.log.for_transaction(tx_id);
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|e| e.kind == EntryKind::Call));
}
