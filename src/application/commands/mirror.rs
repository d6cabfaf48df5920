//! Write-through mirror of pending calls to the durable store
//!
//! Writes are queued to a single task so they apply in submission order
//! and never block the caller. Transient store failures are retried.
//! Terminal transitions are conditional: the store decides which writer
//! won, and the caller waits for that verdict.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use chrono::Utc;

use crate::domain::{DomainError, DomainResult, PendingCall, PendingCallStore};
use crate::shared::retry::{retry_with_backoff, RetryConfig};

enum MirrorOp {
    Upsert(Box<PendingCall>),
    Finish(Box<PendingCall>, oneshot::Sender<DomainResult<Settled>>),
    Delete(String),
    Flush(oneshot::Sender<()>),
}

/// Verdict of a conditional terminal write.
#[derive(Debug, Clone, PartialEq)]
pub enum Settled {
    /// This write moved the stored record out of Pending
    Won(PendingCall),
    /// The stored record was already terminal; it is returned as stored
    Lost(PendingCall),
}

async fn settle(
    store: &dyn PendingCallStore,
    retry: &RetryConfig,
    call: &PendingCall,
) -> DomainResult<Settled> {
    let at = call.resolved_at.unwrap_or_else(Utc::now);
    let updated = retry_with_backoff(
        retry,
        || {
            store.finish_if_pending(
                &call.message_id,
                call.status,
                call.result_payload.clone(),
                call.error_payload.clone(),
                at,
            )
        },
        DomainError::is_transient,
        "mirror_finish",
    )
    .await?;
    if let Some(stored) = updated {
        return Ok(Settled::Won(stored));
    }

    match store.get(&call.message_id).await? {
        Some(stored) if stored.is_terminal() => Ok(Settled::Lost(stored)),
        // Never mirrored (an earlier upsert failed): this record is the only one
        _ => {
            store.upsert(call).await?;
            Ok(Settled::Won(call.clone()))
        }
    }
}

/// Handle to the mirror task. Cheap to clone.
#[derive(Clone)]
pub struct MirrorWriter {
    tx: mpsc::UnboundedSender<MirrorOp>,
}

impl MirrorWriter {
    /// Spawn the writer task on the current runtime.
    pub fn spawn(store: Arc<dyn PendingCallStore>) -> Self {
        Self::spawn_with(store, RetryConfig::default())
    }

    pub fn spawn_with(store: Arc<dyn PendingCallStore>, retry: RetryConfig) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<MirrorOp>();

        tokio::spawn(async move {
            while let Some(op) = rx.recv().await {
                match op {
                    MirrorOp::Upsert(call) => {
                        let result = retry_with_backoff(
                            &retry,
                            || store.upsert(&call),
                            DomainError::is_transient,
                            "mirror_upsert",
                        )
                        .await;
                        if let Err(e) = result {
                            error!(
                                message_id = call.message_id.as_str(),
                                error = %e,
                                "Failed to mirror pending call"
                            );
                        }
                    }
                    MirrorOp::Finish(call, verdict) => {
                        let result = settle(store.as_ref(), &retry, &call).await;
                        if let Err(e) = &result {
                            error!(
                                message_id = call.message_id.as_str(),
                                error = %e,
                                "Failed to mirror terminal pending call"
                            );
                        }
                        let _ = verdict.send(result);
                    }
                    MirrorOp::Delete(message_id) => {
                        let result = retry_with_backoff(
                            &retry,
                            || store.delete(&message_id),
                            DomainError::is_transient,
                            "mirror_delete",
                        )
                        .await;
                        if let Err(e) = result {
                            error!(
                                message_id = message_id.as_str(),
                                error = %e,
                                "Failed to delete mirrored pending call"
                            );
                        }
                    }
                    MirrorOp::Flush(done) => {
                        let _ = done.send(());
                    }
                }
            }
            debug!("Pending-call mirror writer stopped");
        });

        Self { tx }
    }

    pub fn upsert(&self, call: &PendingCall) {
        if self.tx.send(MirrorOp::Upsert(Box::new(call.clone()))).is_err() {
            error!(message_id = call.message_id.as_str(), "Mirror writer is gone");
        }
    }

    /// Write a terminal record unless the store already holds one.
    pub async fn finish(&self, call: &PendingCall) -> DomainResult<Settled> {
        let (verdict, wait) = oneshot::channel();
        let gone = || DomainError::Storage("mirror writer stopped".into());
        self.tx
            .send(MirrorOp::Finish(Box::new(call.clone()), verdict))
            .map_err(|_| gone())?;
        wait.await.map_err(|_| gone())?
    }

    pub fn delete(&self, message_id: &str) {
        if self.tx.send(MirrorOp::Delete(message_id.to_string())).is_err() {
            error!(message_id, "Mirror writer is gone");
        }
    }

    /// Resolves once every write queued before this call has been applied.
    pub async fn flush(&self) {
        let (done, wait) = oneshot::channel();
        if self.tx.send(MirrorOp::Flush(done)).is_ok() {
            let _ = wait.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ChargerIdentity, PendingCallStatus};
    use crate::infrastructure::storage::memory::InMemoryPendingCallStore;
    use serde_json::json;

    fn call(id: &str) -> PendingCall {
        let now = Utc::now();
        PendingCall::new(
            id,
            ChargerIdentity::aggregate("CP1"),
            "Reset",
            json!({}),
            now,
            now + chrono::Duration::seconds(30),
        )
    }

    #[tokio::test]
    async fn first_terminal_write_wins_in_store() {
        let store = Arc::new(InMemoryPendingCallStore::new());
        let mirror = MirrorWriter::spawn(store.clone());
        mirror.upsert(&call("c1"));

        let mut completed = call("c1");
        completed.complete(json!({"status": "Accepted"}), Utc::now());
        let mut timed_out = call("c1");
        timed_out.time_out(None, Utc::now());

        assert!(matches!(mirror.finish(&completed).await.unwrap(), Settled::Won(_)));
        match mirror.finish(&timed_out).await.unwrap() {
            Settled::Lost(stored) => assert_eq!(stored.status, PendingCallStatus::Completed),
            other => panic!("expected Lost, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn terminal_write_without_mirrored_record_is_stored() {
        let store = Arc::new(InMemoryPendingCallStore::new());
        let mirror = MirrorWriter::spawn(store.clone());

        let mut failed = call("c2");
        failed.fail(json!({"code": "InternalError"}), Utc::now());
        assert!(matches!(mirror.finish(&failed).await.unwrap(), Settled::Won(_)));
        let stored = store.get("c2").await.unwrap().unwrap();
        assert_eq!(stored.status, PendingCallStatus::Failed);
    }
}
