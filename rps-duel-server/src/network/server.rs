//! WebSocket Duel Server
//!
//! Accept loop and per-connection tasks. Each connection gets a reader loop
//! (this task) and a writer task draining its outbound queue; all duel logic
//! goes through the [`SessionHub`].

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::Message, WebSocketStream};
use tracing::{debug, error, info, instrument, warn};

pub use crate::config::ServerConfig;
use crate::game::battle::EngineStats;
use crate::game::state::ConnectionId;
use crate::network::auth::{validate_token, AuthError};
use crate::network::protocol::{ClientMessage, ErrorCode, ServerMessage};
use crate::network::session::{ClientLink, HubError, HubHandle, SessionHub};

/// How long the writer may keep flushing after the reader has stopped.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const SHUTDOWN_REASON: &str = "Server shutting down";

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum DuelServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Session hub stopped.
    #[error("Session hub error: {0}")]
    Hub(#[from] HubError),
}

/// Decrements the live connection count when a connection task ends.
struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// The duel server.
pub struct DuelServer {
    /// Server configuration.
    config: Arc<ServerConfig>,
    /// Route into the session hub.
    hub: HubHandle,
    /// Open connections.
    connections: Arc<AtomicUsize>,
    /// Shutdown signal.
    shutdown_tx: watch::Sender<bool>,
}

impl DuelServer {
    /// Create a server and start its session hub.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let (hub, _hub_task) = SessionHub::spawn(config.command_buffer, config.stats_period());
        let (shutdown_tx, _) = watch::channel(false);

        Self {
            config: Arc::new(config),
            hub,
            connections: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
        }
    }

    /// Bind the configured address and serve until shutdown.
    pub async fn run(&self) -> Result<(), DuelServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Serve on an already bound listener until shutdown.
    #[instrument(skip_all)]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), DuelServerError> {
        let local_addr = listener.local_addr()?;
        info!("Duel server listening on {}", local_addr);

        if self.config.auth.is_configured() {
            info!("Token authentication enabled");
        } else {
            warn!("Token authentication disabled, accepting anonymous clients");
        }

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        if *shutdown_rx.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let open = self.connections.load(Ordering::SeqCst);
                            if open >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }

                            info!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        self.connections.fetch_add(1, Ordering::SeqCst);
        let guard = ConnectionGuard(self.connections.clone());
        let config = self.config.clone();
        let hub = self.hub.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let _guard = guard;

            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(config.outbound_buffer);

            // Spawn message sender task
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                let _ = ws_sender.close().await;
            });

            let display_name = if config.auth.is_configured() {
                let pending = tokio::select! {
                    result = Self::authenticate(&mut ws_receiver, &config) => Some(result),
                    _ = shutdown_rx.changed() => None,
                };

                let admitted = match pending {
                    Some(Ok(name)) => Ok(name),
                    Some(Err((code, reason))) => {
                        info!("Client {} failed authentication: {}", addr, reason);
                        Err(ServerMessage::error(code, reason))
                    }
                    None => {
                        debug!("Shutdown before {} authenticated", addr);
                        Err(ServerMessage::Shutdown {
                            reason: SHUTDOWN_REASON.to_string(),
                        })
                    }
                };

                match admitted {
                    Ok(name) => Some(name),
                    Err(msg) => {
                        let _ = msg_tx.send(msg).await;
                        drop(msg_tx);
                        let _ = timeout(WRITER_DRAIN_TIMEOUT, sender_task).await;
                        return;
                    }
                }
            } else {
                None
            };

            let (link, mut evicted) = ClientLink::new(msg_tx.clone());
            let id = match hub.connect(display_name, link).await {
                Ok(id) => id,
                Err(e) => {
                    error!("Could not register {}: {}", addr, e);
                    let _ = msg_tx
                        .send(ServerMessage::error(ErrorCode::ServerOverloaded, "Server unavailable"))
                        .await;
                    drop(msg_tx);
                    let _ = timeout(WRITER_DRAIN_TIMEOUT, sender_task).await;
                    return;
                }
            };
            info!("Client {} registered as session {}", addr, id);

            // Handle incoming messages
            loop {
                tokio::select! {
                    msg = timeout(config.idle_timeout, ws_receiver.next()) => {
                        let Ok(msg) = msg else {
                            info!("Client {} idle for {:?}, closing", addr, config.idle_timeout);
                            break;
                        };

                        let parsed = match msg {
                            Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text),
                            Some(Ok(Message::Binary(data))) => ClientMessage::from_slice(&data),
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", addr, e);
                                break;
                            }
                            // Control frames count as activity
                            _ => continue,
                        };

                        if Self::handle_client_message(id, parsed, &hub, &msg_tx).await.is_err() {
                            warn!("Session hub stopped, closing {}", addr);
                            break;
                        }
                    }
                    _ = &mut evicted => {
                        info!("Session {} dropped by hub, closing {}", id, addr);
                        break;
                    }
                    _ = shutdown_rx.changed() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: SHUTDOWN_REASON.to_string(),
                        }).await;
                        break;
                    }
                }
            }

            // Cleanup
            let _ = hub.disconnect(id).await;
            drop(msg_tx);
            if timeout(WRITER_DRAIN_TIMEOUT, sender_task).await.is_err() {
                debug!("Writer for {} did not drain in time", addr);
            }

            info!("Client {} cleaned up", addr);
        });
    }

    /// Wait for an `Auth` frame and validate its token.
    ///
    /// Returns the display name carried by the token, or the error code and
    /// reason to send back.
    async fn authenticate(
        ws_receiver: &mut SplitStream<WebSocketStream<TcpStream>>,
        config: &ServerConfig,
    ) -> Result<String, (ErrorCode, String)> {
        let failed = |reason: &str| (ErrorCode::AuthFailed, reason.to_string());

        loop {
            let frame = timeout(config.idle_timeout, ws_receiver.next())
                .await
                .map_err(|_| failed("Timed out waiting for authentication"))?;

            let parsed = match frame {
                Some(Ok(Message::Text(text))) => ClientMessage::from_json(&text),
                Some(Ok(Message::Binary(data))) => ClientMessage::from_slice(&data),
                Some(Ok(Message::Close(_))) | None => {
                    return Err(failed("Connection closed before authentication"))
                }
                Some(Err(e)) => return Err(failed(&e.to_string())),
                _ => continue,
            };

            return match parsed {
                Ok(ClientMessage::Auth { token }) => validate_token(&token, &config.auth)
                    .map(|claims| claims.display_name())
                    .map_err(|e| match e {
                        AuthError::Expired => (ErrorCode::TokenExpired, e.to_string()),
                        other => failed(&other.to_string()),
                    }),
                Ok(_) => Err((ErrorCode::NotAuthenticated, "Must authenticate first".to_string())),
                Err(_) => Err(failed("Invalid message format")),
            };
        }
    }

    /// Handle a client message.
    ///
    /// Only fails if the hub is gone.
    async fn handle_client_message(
        id: ConnectionId,
        parsed: Result<ClientMessage, serde_json::Error>,
        hub: &HubHandle,
        sender: &mpsc::Sender<ServerMessage>,
    ) -> Result<(), HubError> {
        let msg = match parsed {
            Ok(msg) => msg,
            Err(e) => {
                debug!("Invalid message from session {}: {}", id, e);
                let _ = sender
                    .send(ServerMessage::error(ErrorCode::InvalidInput, "Invalid message format"))
                    .await;
                return Ok(());
            }
        };

        match msg {
            ClientMessage::Ping { timestamp } => {
                let _ = sender.send(ServerMessage::pong(timestamp)).await;
            }
            ClientMessage::Auth { .. } => {
                debug!("Ignoring auth frame from registered session {}", id);
            }
            other => {
                if let Some(intent) = other.to_intent() {
                    hub.submit(id, intent).await?;
                }
            }
        }

        Ok(())
    }

    /// Shutdown the server.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// Get open connection count.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Get registered session counts.
    pub async fn stats(&self) -> Result<EngineStats, DuelServerError> {
        Ok(self.hub.stats().await?)
    }

    /// Get registered session count.
    pub async fn session_count(&self) -> usize {
        self.hub.stats().await.map(|s| s.connected).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            stats_interval: Duration::ZERO,
            ..Default::default()
        }
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.outbound_buffer, 64);
        assert!(!config.auth.is_configured());
    }

    #[tokio::test]
    async fn test_server_creation() {
        let server = DuelServer::new(local_config());

        assert_eq!(server.connection_count(), 0);
        assert_eq!(server.session_count().await, 0);
        assert_eq!(server.stats().await.unwrap(), EngineStats::default());
    }

    #[tokio::test]
    async fn test_server_shutdown() {
        let server = Arc::new(DuelServer::new(local_config()));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = server.clone();
        let task = tokio::spawn(async move { running.serve(listener).await });

        server.shutdown();
        let result = timeout(Duration::from_secs(5), task).await.unwrap().unwrap();
        assert!(result.is_ok());
    }
}
