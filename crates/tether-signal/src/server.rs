//! WebSocket signal server implementation

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

use tether_core::Config;

use crate::broker::ConnectionMetadata;
use crate::error::CredentialError;
use crate::hub::SignalHub;
use crate::ice::IceCache;
use crate::messages::{ClientMessage, ErrorCode, Inbound, ServerMessage};
use crate::registry::PeerHandle;

/// How long to wait for a client's request headers
const SNIFF_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest request head inspected when telling HTTP from WebSocket
const SNIFF_BUF_LEN: usize = 2048;

/// Signal server state
pub struct SignalServer {
    hub: Arc<SignalHub>,
    ice: Arc<IceCache>,
}

impl SignalServer {
    pub fn new(hub: Arc<SignalHub>, ice: Arc<IceCache>) -> Self {
        Self { hub, ice }
    }

    pub fn from_config(config: &Config) -> Result<Self, CredentialError> {
        Ok(Self::new(
            Arc::new(SignalHub::new(config.signal.grace_period())),
            Arc::new(IceCache::from_config(&config.ice)?),
        ))
    }

    /// Start the signal server
    pub async fn serve(&self, addr: SocketAddr) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_listener(listener).await
    }

    /// Accept connections on an already bound listener
    pub async fn serve_listener(&self, listener: TcpListener) -> Result<(), std::io::Error> {
        info!("Signal server listening on {}", listener.local_addr()?);

        if self.ice.has_provider() {
            let ice = self.ice.clone();
            tokio::spawn(async move {
                let _ = ice.refresh().await;
            });
        }

        loop {
            let (stream, peer_addr) = listener.accept().await?;
            let hub = self.hub.clone();
            let ice = self.ice.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, peer_addr, hub, ice).await {
                    debug!("Connection error from {}: {:?}", peer_addr, e);
                }
            });
        }
    }

    pub fn hub(&self) -> &Arc<SignalHub> {
        &self.hub
    }

    /// Get peer count (for monitoring)
    pub fn peer_count(&self) -> usize {
        self.hub.peer_count()
    }
}

/// Handle a single connection (HTTP or WebSocket)
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    hub: Arc<SignalHub>,
    ice: Arc<IceCache>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if tokio::time::timeout(SNIFF_TIMEOUT, is_plain_http(&stream)).await?? {
        return handle_http_request(&mut stream, &hub, &ice).await;
    }

    let ws_stream = accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let (handle, mut outbox) = hub.open_session();
    let session = handle.session();
    debug!("New connection from {} as {:?}", peer_addr, session);

    let writer = tokio::spawn(async move {
        while let Some(msg) = outbox.recv().await {
            let json = match msg.to_json() {
                Ok(json) => json,
                Err(e) => {
                    warn!("Failed to encode message: {}", e);
                    continue;
                }
            };
            if ws_sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    while let Some(msg) = ws_receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!("WebSocket error: {:?}", e);
                break;
            }
        };

        match Inbound::from_json(&text) {
            Ok(inbound) => dispatch(inbound, &handle, &hub, &ice),
            Err(e) => {
                handle.send(ServerMessage::error(
                    ErrorCode::InvalidMessage,
                    format!("Invalid message: {}", e),
                ));
            }
        }
    }

    hub.disconnect(session);
    writer.abort();

    debug!("Connection closed: {:?}", session);
    Ok(())
}

/// Apply one client message
fn dispatch(inbound: Inbound, handle: &PeerHandle, hub: &SignalHub, ice: &Arc<IceCache>) {
    let session = handle.session();
    match inbound {
        Inbound::Control(ClientMessage::Register { preferred_id }) => {
            let _ = hub.register(handle, preferred_id.as_deref(), ice.servers());
        }

        Inbound::Control(ClientMessage::RequestConnection {
            target_id,
            viewer_name,
            password,
        }) => {
            let metadata = ConnectionMetadata {
                viewer_name,
                password,
            };
            let _ = hub.request_connection(handle, &target_id, metadata);
        }

        Inbound::Control(ClientMessage::ConnectionResponse {
            request_id,
            accepted,
        }) => {
            hub.respond(session, &request_id, accepted);
        }

        Inbound::Control(ClientMessage::Ping { timestamp }) => {
            handle.send(ServerMessage::Pong { timestamp });
        }

        Inbound::Relay(signal) => {
            hub.forward(session, signal);
        }
    }
}

/// Peek at the request head: `GET` without a WebSocket upgrade is plain HTTP
async fn is_plain_http(stream: &TcpStream) -> std::io::Result<bool> {
    let mut buf = [0u8; SNIFF_BUF_LEN];
    loop {
        let n = stream.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        let head = &buf[..n];
        if n >= 4 && !head.starts_with(b"GET ") {
            return Ok(false);
        }
        if n == buf.len() || head.windows(4).any(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(head).to_ascii_lowercase();
            return Ok(!head.contains("upgrade: websocket"));
        }
        // Headers still arriving
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Handle an HTTP request (health and client config)
async fn handle_http_request(
    stream: &mut TcpStream,
    hub: &SignalHub,
    ice: &Arc<IceCache>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut buf = vec![0u8; SNIFF_BUF_LEN];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let path = request
        .lines()
        .next()
        .and_then(|line| line.split_whitespace().nth(1))
        .unwrap_or("/");
    let path = path.split('?').next().unwrap_or(path);

    let (status, body) = match path {
        "/health" => (
            "200 OK",
            json!({
                "status": "healthy",
                "peers": hub.peer_count(),
                "pendingRequests": hub.pending_count(),
                "uptimeSecs": hub.uptime().as_secs(),
                "protocolVersion": tether_core::PROTOCOL_VERSION,
            }),
        ),
        "/config" => ("200 OK", json!({ "iceServers": ice.servers() })),
        _ => ("404 Not Found", json!({ "error": "not found" })),
    };
    let body = body.to_string();

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nAccess-Control-Allow-Origin: *\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    stream.write_all(response.as_bytes()).await?;
    Ok(())
}
