//! Session registry: identity → live connection, with a per-IP quota

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::connection::{Session, SessionInfo};
use super::quota::IpQuota;
use crate::domain::ChargerIdentity;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegisterError {
    #[error("too many connections from {ip} (limit {limit})")]
    TooManyConnections { ip: IpAddr, limit: usize },
}

/// Thread-safe registry of active station sessions.
///
/// Holds only the lookup relation; each session is owned by its
/// connection task.
pub struct SessionRegistry {
    sessions: DashMap<String, Session>,
    quota: IpQuota,
    next_connection_id: AtomicU64,
}

/// Shared, reference-counted session registry
pub type SharedSessionRegistry = Arc<SessionRegistry>;

impl SessionRegistry {
    pub fn new(max_connections_per_ip: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            quota: IpQuota::new(max_connections_per_ip),
            next_connection_id: AtomicU64::new(1),
        }
    }

    pub fn shared(max_connections_per_ip: usize) -> SharedSessionRegistry {
        Arc::new(Self::new(max_connections_per_ip))
    }

    /// Register a connection for `identity`.
    ///
    /// A second connection for the same identity replaces the first (the old
    /// outbox sender is dropped, which ends the old connection). Replacing a
    /// session from the same address does not take another quota slot.
    pub fn register(
        &self,
        identity: ChargerIdentity,
        source_ip: IpAddr,
        sender: mpsc::UnboundedSender<String>,
        subprotocol: Option<String>,
    ) -> Result<SessionInfo, RegisterError> {
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let session = Session::new(connection_id, identity.clone(), sender, source_ip, subprotocol);
        let info = session.info();
        let rejected = RegisterError::TooManyConnections {
            ip: source_ip,
            limit: self.quota.limit(),
        };

        let evicted = match self.sessions.entry(identity.key()) {
            Entry::Occupied(mut entry) => {
                let same_ip = entry.get().source_ip == source_ip;
                if !same_ip && !self.quota.try_acquire(source_ip) {
                    return Err(self.reject(&identity, rejected));
                }
                Some(entry.insert(session))
            }
            Entry::Vacant(entry) => {
                if !self.quota.try_acquire(source_ip) {
                    return Err(self.reject(&identity, rejected));
                }
                entry.insert(session);
                None
            }
        };

        if let Some(old) = evicted {
            if old.source_ip != source_ip {
                self.quota.release(old.source_ip);
            }
            warn!(
                charge_point_id = %identity,
                old_connection_id = old.connection_id,
                connection_id,
                "Replacing existing session for identity"
            );
        }

        info!(
            charge_point_id = %identity,
            connection_id,
            %source_ip,
            "Registered charger session"
        );
        metrics::counter!("ocpp_connections_accepted_total").increment(1);
        metrics::gauge!("ocpp_active_sessions").set(self.count() as f64);
        Ok(info)
    }

    fn reject(&self, identity: &ChargerIdentity, err: RegisterError) -> RegisterError {
        warn!(charge_point_id = %identity, error = %err, "Rejected connection");
        metrics::counter!("ocpp_connections_rejected_total").increment(1);
        err
    }

    /// Remove the session for `identity` if it still belongs to
    /// `connection_id`. Returns `true` when something was removed.
    pub fn unregister(&self, identity: &ChargerIdentity, connection_id: u64) -> bool {
        let removed = self
            .sessions
            .remove_if(&identity.key(), |_, s| s.connection_id == connection_id);

        match removed {
            Some((_, session)) => {
                self.quota.release(session.source_ip);
                metrics::gauge!("ocpp_active_sessions").set(self.count() as f64);
                info!(charge_point_id = %identity, connection_id, "Unregistered charger session");
                true
            }
            None => {
                debug!(
                    charge_point_id = %identity,
                    connection_id,
                    "Session already gone or replaced"
                );
                false
            }
        }
    }

    pub fn lookup(&self, identity: &ChargerIdentity) -> Option<Session> {
        self.sessions.get(&identity.key()).map(|s| s.clone())
    }

    /// Queue a frame on the identity's connection
    pub fn send_to(&self, identity: &ChargerIdentity, message: String) -> Result<(), String> {
        match self.sessions.get(&identity.key()) {
            Some(session) => session.send(message),
            None => Err(format!("Charger {} not connected", identity)),
        }
    }

    pub fn touch(&self, identity: &ChargerIdentity) {
        if let Some(mut session) = self.sessions.get_mut(&identity.key()) {
            session.touch();
        }
    }

    pub fn is_connected(&self, identity: &ChargerIdentity) -> bool {
        self.sessions.contains_key(&identity.key())
    }

    pub fn connected(&self) -> Vec<ChargerIdentity> {
        self.sessions.iter().map(|s| s.identity.clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.sessions.len()
    }

    pub fn connections_from(&self, ip: IpAddr) -> usize {
        self.quota.in_use(ip)
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(2)
    }
}
