//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{serial}[/{connector}]`.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::handshake;
use crate::application::handlers::OcppHandlerV16;
use crate::application::session::SessionInfo;
use crate::application::SharedCentralSystem;
use crate::shared::shutdown::ShutdownSignal;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// OCPP WebSocket Server
pub struct OcppServer {
    address: String,
    system: SharedCentralSystem,
    shutdown_signal: Option<ShutdownSignal>,
}

impl OcppServer {
    pub fn new(address: impl Into<String>, system: SharedCentralSystem) -> Self {
        Self {
            address: address.into(),
            system,
            shutdown_signal: None,
        }
    }

    /// Set the shutdown signal for graceful shutdown
    pub fn with_shutdown(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = Some(signal);
        self
    }

    /// Bind and serve until the shutdown signal fires.
    pub async fn run(&self) -> Result<(), BoxError> {
        let listener = TcpListener::bind(&self.address).await?;
        self.serve(listener).await
    }

    /// Serve an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BoxError> {
        let addr = listener.local_addr()?;
        info!("OCPP 1.6 Central System listening on ws://{}", addr);
        info!(
            "Charge points should connect to: ws://{}/ocpp/{{charge_point_id}}",
            addr
        );

        let shutdown = self.shutdown_signal.clone().unwrap_or_default();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }
                _ = shutdown.wait() => {
                    info!("WebSocket server received shutdown signal");
                    self.graceful_shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let system = self.system.clone();
        let shutdown = self.shutdown_signal.clone().unwrap_or_default();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, system, shutdown).await {
                warn!("Connection error from {}: {}", peer, e);
            }
        });
    }

    fn graceful_shutdown(&self) {
        let connected = self.system.sessions.connected();
        if !connected.is_empty() {
            info!(count = connected.len(), "Closing charger connections");
        }
        self.system.transactions.cancel_all_broadcasts();
        info!("WebSocket server shutdown complete");
    }
}

/// Handle a single WebSocket connection
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    system: SharedCentralSystem,
    shutdown: ShutdownSignal,
) -> Result<(), BoxError> {
    debug!("New TCP connection from: {}", peer);

    let (outbox, mut rx) = mpsc::unbounded_channel::<String>();
    let mut admitted: Option<SessionInfo> = None;

    let upgraded = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, response: Response| -> Result<Response, ErrorResponse> {
            let (response, session) =
                handshake::admit(req, response, peer.ip(), &system.sessions, outbox)?;
            admitted = Some(session);
            Ok(response)
        },
    )
    .await;

    let ws_stream = match upgraded {
        Ok(ws) => ws,
        Err(e) => {
            // The callback may have registered before the upgrade failed
            if let Some(session) = admitted.take() {
                system.sessions.unregister(&session.identity, session.connection_id);
            }
            return Err(e.into());
        }
    };
    let Some(session) = admitted else {
        return Err("upgrade completed without a session".into());
    };

    let identity = session.identity.clone();
    info!(charge_point_id = %identity, %peer, "Connected");
    system.on_connected(&session);

    let handler = OcppHandlerV16::new(identity.clone(), system.clone());
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handler.handle(&text).await {
                            debug!(charge_point_id = %identity, "-> {}", reply);
                            if let Err(e) = ws_sender.send(Message::Text(reply)).await {
                                error!(charge_point_id = %identity, "Send error: {}", e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        system.sessions.touch(&identity);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!(
                            charge_point_id = %identity,
                            bytes = data.len(),
                            "Binary message received, ignoring"
                        );
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(charge_point_id = %identity, "Close frame received: {:?}", frame);
                        break;
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => {
                        warn!(charge_point_id = %identity, "WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                }
            }
            outgoing = rx.recv() => {
                match outgoing {
                    Some(message) => {
                        debug!(charge_point_id = %identity, "-> {}", message);
                        if let Err(e) = ws_sender.send(Message::Text(message)).await {
                            error!(charge_point_id = %identity, "Send error: {}", e);
                            break;
                        }
                    }
                    None => {
                        // Registry dropped our outbox: a newer connection took over
                        info!(charge_point_id = %identity, "Session replaced, closing connection");
                        let _ = ws_sender.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
            _ = shutdown.wait() => {
                info!(charge_point_id = %identity, "Connection closing due to server shutdown");
                let _ = ws_sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    system.on_disconnected(&session);
    info!(charge_point_id = %identity, "Disconnected");
    Ok(())
}
