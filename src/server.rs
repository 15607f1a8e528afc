//! WebSocket listener.
//!
//! Binds a `TcpListener` and spawns an accept loop. Each accepted stream
//! is upgraded on its own task: the handshake callback authenticates the
//! credential and captures the `sessionId`, then the session is opened,
//! registered with the hub and handed to the connection pumps.
//!
//! Rejected upgrades get HTTP 401 with a JSON body and never reach the hub.

// Rust guideline compliant 2026-02

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header, HeaderValue, StatusCode, Uri};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_util::sync::CancellationToken;

use crate::connection::pumps::{self, PumpSettings};
use crate::connection::{Connection, ConnectionKey, Teardown};
use crate::constants::{MAX_MESSAGE_SIZE, OUTBOUND_QUEUE_CAPACITY, TURN_QUEUE_CAPACITY};
use crate::hub::HubHandle;
use crate::identity::{extract_credential, AuthError, IdentityVerifier};
use crate::pipeline::ChatPipeline;
use crate::store::UserId;
use crate::ws;

/// Business error code carried in the 401 body.
const UNAUTHORIZED_CODE: i32 = -100;

/// Per-connection sizing and timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSettings {
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Pump timings.
    pub pumps: PumpSettings,
    /// Largest inbound message accepted.
    pub max_message_size: usize,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            queue_capacity: OUTBOUND_QUEUE_CAPACITY,
            pumps: PumpSettings::default(),
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }
}

/// Everything a session task needs.
pub struct ServerContext {
    /// Credential check for upgrades.
    pub verifier: Arc<dyn IdentityVerifier>,
    /// Turn processing.
    pub pipeline: Arc<ChatPipeline>,
    /// Connection registry.
    pub hub: HubHandle,
    /// Connection sizing and timing.
    pub settings: ConnectionSettings,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Identity captured during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
struct UpgradeRequest {
    user_id: UserId,
    session_id: Option<String>,
}

/// Running WebSocket listener.
#[derive(Debug)]
pub struct ChatServer {
    local_addr: SocketAddr,
    hub: HubHandle,
    shutdown: CancellationToken,
    accept_handle: JoinHandle<()>,
}

impl ChatServer {
    /// Bind `addr` and start accepting connections.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(addr: &str, ctx: ServerContext) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        let local_addr = listener
            .local_addr()
            .context("Failed to read listener address")?;

        log::info!("[Server] Listening on ws://{}", local_addr);

        let hub = ctx.hub.clone();
        let shutdown = CancellationToken::new();
        let accept_handle = tokio::spawn(Self::accept_loop(
            listener,
            Arc::new(ctx),
            shutdown.clone(),
        ));

        Ok(Self {
            local_addr,
            hub,
            shutdown,
            accept_handle,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and shut the hub down, closing every connection.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        let _ = self.accept_handle.await;
        if self.hub.shutdown().await.is_err() {
            log::debug!("[Server] Hub was already stopped");
        }
        log::info!("[Server] Stopped");
    }

    /// Accept loop. Runs as a tokio task.
    async fn accept_loop(
        listener: TcpListener,
        ctx: Arc<ServerContext>,
        shutdown: CancellationToken,
    ) {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    log::debug!("[Server] Accepted TCP connection from {}", peer);
                    tokio::spawn(serve_connection(stream, peer, Arc::clone(&ctx)));
                }
                Err(e) => {
                    log::error!("[Server] Accept error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
        log::info!("[Server] Accept loop stopped");
    }
}

/// Upgrade, authenticate and run one session to completion.
async fn serve_connection(stream: TcpStream, peer: SocketAddr, ctx: Arc<ServerContext>) {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(ctx.settings.max_message_size);

    let mut upgrade: Option<UpgradeRequest> = None;
    let verifier = ctx.verifier.as_ref();
    let handshake = tokio_tungstenite::accept_hdr_async_with_config(
        stream,
        |request: &Request, response: Response| {
            authorize(request, response, verifier, &mut upgrade)
        },
        Some(config),
    )
    .await;

    let ws_stream = match handshake {
        Ok(ws_stream) => ws_stream,
        Err(e) => {
            log::info!("[Server] Upgrade from {} failed: {}", peer, e);
            return;
        }
    };
    let Some(request) = upgrade else {
        return;
    };

    let (mut writer, reader) = ws::split(ws_stream);

    let session = match ctx
        .pipeline
        .open_session(request.user_id, request.session_id.as_deref())
        .await
    {
        Ok(session) => session,
        Err(e) => {
            log::error!(
                "[Server] Failed to open session for user {}: {}",
                request.user_id,
                e
            );
            let _ = writer.send_close().await;
            return;
        }
    };

    let key = ConnectionKey::new(request.user_id, session.session_id.clone());
    let (connection, outbound) = Connection::new(key, ctx.settings.queue_capacity);
    if ctx.hub.register(connection.clone()).await.is_err() {
        log::warn!("[Server] Hub is shut down, refusing {}", connection.key());
        let _ = writer.send_close().await;
        return;
    }

    log::info!(
        "[Server] Connection {} from {} ({}, conversation {})",
        connection.id(),
        peer,
        connection.key(),
        session.conversation.id
    );
    ctx.pipeline.welcome(&connection);

    let teardown = Arc::new(Teardown::new(connection.clone(), ctx.hub.clone()));
    let (turn_tx, turn_rx) = mpsc::channel(TURN_QUEUE_CAPACITY);

    let outbound_task = tokio::spawn(pumps::outbound_pump(
        writer,
        outbound,
        Arc::clone(&teardown),
        ctx.settings.pumps,
    ));
    tokio::spawn(pumps::responder_worker(
        turn_rx,
        Arc::clone(&ctx.pipeline),
        connection.clone(),
    ));

    pumps::inbound_pump(
        reader,
        session.conversation,
        Arc::clone(&ctx.pipeline),
        turn_tx,
        teardown,
        ctx.settings.pumps.pong_wait,
    )
    .await;

    if let Err(e) = outbound_task.await {
        log::warn!("[Server] Outbound pump of {} panicked: {}", connection.id(), e);
    }
    log::info!("[Server] Connection {} closed", connection.id());
}

/// Handshake callback: verify the credential and capture the session.
fn authorize(
    request: &Request,
    response: Response,
    verifier: &dyn IdentityVerifier,
    upgrade: &mut Option<UpgradeRequest>,
) -> Result<Response, ErrorResponse> {
    let query = UpgradeQuery::parse(request.uri());
    let authorization = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let result = extract_credential(authorization, query.token.as_deref())
        .ok_or(AuthError::Missing)
        .and_then(|credential| verifier.verify(credential));

    match result {
        Ok(user_id) => {
            *upgrade = Some(UpgradeRequest {
                user_id,
                session_id: query.session_id,
            });
            Ok(response)
        }
        Err(e) => {
            log::info!("[Server] Rejected upgrade for {}: {}", request.uri().path(), e);
            Err(unauthorized(&e))
        }
    }
}

fn unauthorized(err: &AuthError) -> ErrorResponse {
    let body = serde_json::json!({ "code": UNAUTHORIZED_CODE, "msg": err.to_string() }).to_string();
    let mut response = ErrorResponse::new(Some(body));
    *response.status_mut() = StatusCode::UNAUTHORIZED;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

/// Query parameters read from the upgrade URI.
#[derive(Debug, Default, PartialEq, Eq)]
struct UpgradeQuery {
    token: Option<String>,
    session_id: Option<String>,
}

impl UpgradeQuery {
    fn parse(uri: &Uri) -> Self {
        let mut query = Self::default();
        let Ok(url) = reqwest::Url::parse(&format!("http://localhost{uri}")) else {
            return query;
        };
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "token" => query.token = Some(value.into_owned()),
                "sessionId" => query.session_id = Some(value.into_owned()),
                _ => {}
            }
        }
        query
    }
}
