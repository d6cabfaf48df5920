//! WebSocket upgrade admission
//!
//! Runs inside the `accept_hdr_async` callback: resolves the charger
//! identity from the request URI, negotiates the `ocpp1.6` sub-protocol and
//! registers the session. A rejected upgrade is answered with an HTTP status
//! and never reaches the OCPP layer.

use std::net::IpAddr;

use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tracing::{info, warn};

use crate::application::session::{RegisterError, SessionInfo, SessionRegistry};
use crate::domain::ChargerIdentity;

/// OCPP 1.6 WebSocket subprotocol
pub const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

const SUBPROTOCOL_HEADER: &str = "Sec-WebSocket-Protocol";

/// Pick `ocpp1.6` out of a comma-separated `Sec-WebSocket-Protocol` value.
pub fn negotiate_subprotocol(requested: &str) -> Option<&'static str> {
    requested
        .split(',')
        .map(str::trim)
        .any(|p| p.eq_ignore_ascii_case(OCPP_SUBPROTOCOL))
        .then_some(OCPP_SUBPROTOCOL)
}

fn reject(status: StatusCode, reason: String) -> ErrorResponse {
    let mut response = ErrorResponse::new(Some(reason));
    *response.status_mut() = status;
    response
}

/// Admit an upgrade request. On success the session is already registered
/// and `outbox` is owned by the registry.
pub fn admit(
    request: &Request,
    mut response: Response,
    peer_ip: IpAddr,
    registry: &SessionRegistry,
    outbox: mpsc::UnboundedSender<String>,
) -> Result<(Response, SessionInfo), ErrorResponse> {
    let uri = request.uri();
    let identity = ChargerIdentity::from_request(uri.path(), uri.query()).map_err(|e| {
        warn!(path = uri.path(), %peer_ip, error = %e, "Rejected upgrade without identity");
        reject(StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let requested = request
        .headers()
        .get(SUBPROTOCOL_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let subprotocol = negotiate_subprotocol(requested);
    match subprotocol {
        Some(protocol) => {
            response
                .headers_mut()
                .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(protocol));
        }
        None if !requested.is_empty() => {
            warn!(
                charge_point_id = %identity,
                requested,
                "Client does not offer ocpp1.6, continuing without subprotocol"
            );
        }
        None => {}
    }

    let session = registry
        .register(identity, peer_ip, outbox, subprotocol.map(str::to_string))
        .map_err(|e| match e {
            RegisterError::TooManyConnections { .. } => {
                reject(StatusCode::TOO_MANY_REQUESTS, e.to_string())
            }
        })?;

    info!(
        charge_point_id = %session.identity,
        connection_id = session.connection_id,
        subprotocol = ?session.subprotocol,
        "WebSocket upgrade accepted"
    );
    Ok((response, session))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::net::Ipv4Addr;

    fn request(uri: &str, protocols: Option<&str>) -> Request {
        let mut builder = Request::builder().uri(uri);
        if let Some(p) = protocols {
            builder = builder.header(SUBPROTOCOL_HEADER, p);
        }
        builder.body(()).unwrap()
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    #[rstest]
    #[case("ocpp1.6", true)]
    #[case("ocpp2.0.1, ocpp1.6", true)]
    #[case("OCPP1.6", true)]
    #[case("ocpp2.0.1", false)]
    #[case("", false)]
    fn subprotocol_negotiation(#[case] requested: &str, #[case] accepted: bool) {
        assert_eq!(negotiate_subprotocol(requested).is_some(), accepted);
    }

    #[test]
    fn accepted_upgrade_registers_session() {
        let registry = SessionRegistry::new(2);
        let (tx, _rx) = mpsc::unbounded_channel();

        let (response, session) = admit(
            &request("/ocpp/CP001/2", Some("ocpp1.6")),
            Response::new(()),
            ip(1),
            &registry,
            tx,
        )
        .unwrap();

        assert_eq!(session.identity, ChargerIdentity::new("CP001", 2));
        assert_eq!(session.subprotocol.as_deref(), Some(OCPP_SUBPROTOCOL));
        assert_eq!(response.headers()[SUBPROTOCOL_HEADER], OCPP_SUBPROTOCOL);
        assert!(registry.is_connected(&session.identity));
    }

    #[test]
    fn missing_identity_is_bad_request() {
        let registry = SessionRegistry::new(2);
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = admit(&request("/ocpp", None), Response::new(()), ip(1), &registry, tx)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn serial_spoofing_a_connector_key_is_bad_request() {
        let registry = SessionRegistry::new(2);
        let (tx, _connector_rx) = mpsc::unbounded_channel();
        let (_, connector) =
            admit(&request("/ocpp/A/1", None), Response::new(()), ip(1), &registry, tx).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = admit(&request("/ocpp/A%231", None), Response::new(()), ip(2), &registry, tx)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert!(registry.is_connected(&connector.identity));
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn third_connection_from_one_ip_is_rejected() {
        let registry = SessionRegistry::new(2);
        let mut outboxes = Vec::new();

        for serial in ["CP1", "CP2"] {
            let (tx, rx) = mpsc::unbounded_channel();
            outboxes.push(rx);
            admit(&request(&format!("/{}", serial), None), Response::new(()), ip(7), &registry, tx)
                .unwrap();
        }

        let (tx, _rx) = mpsc::unbounded_channel();
        let err = admit(&request("/CP3", None), Response::new(()), ip(7), &registry, tx)
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);

        // Another address is unaffected
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(admit(&request("/CP3", None), Response::new(()), ip(8), &registry, tx).is_ok());
    }
}
