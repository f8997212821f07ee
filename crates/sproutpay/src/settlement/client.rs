//! Persistent ClearNode connection.
//!
//! A single background task owns the WebSocket. Callers hand it signed frames
//! through an mpsc channel and wait on a oneshot registered under the request
//! id; the reader side resolves the matching entry for every inbound response.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::auth::AuthPolicy;
use super::protocol::{self, method, RpcRequest, RpcResponse};
use super::{
    AppDefinition, Allocation, CloseKind, LedgerBalance, LiveChannel, SettlementError,
    SettlementNetwork, OPEN_SESSION_TIMEOUT, QUERY_BALANCES_TIMEOUT, QUERY_CHANNELS_TIMEOUT,
};
use crate::signature::encode_signature_hex;

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(100);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);
const OUTBOUND_BUFFER: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Why a connection ended.
enum Exit {
    /// Remote side closed; reconnect.
    Remote,
    /// Every client handle was dropped.
    ClientDropped,
    Shutdown,
}

#[derive(Clone)]
pub struct ClientConfig {
    pub url: String,
    pub app_name: String,
    pub signer: PrivateKeySigner,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("url", &self.url)
            .field("app_name", &self.app_name)
            .field("signer", &self.signer.address())
            .finish()
    }
}

/// State shared between callers and the connection task.
#[derive(Default)]
struct Shared {
    pending: DashMap<u64, oneshot::Sender<RpcResponse>>,
    authenticated: AtomicBool,
    next_id: AtomicU64,
}

impl Shared {
    fn next_request_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn resolve(&self, request_id: u64, response: RpcResponse) {
        match self.pending.remove(&request_id) {
            Some((_, tx)) => {
                let _ = tx.send(response);
            }
            None => tracing::debug!(
                request_id,
                method = response.method(),
                "dropping unsolicited settlement network message"
            ),
        }
    }

    /// Dropping the senders fails every waiting caller with `NotConnected`.
    fn mark_disconnected(&self) {
        self.authenticated.store(false, Ordering::SeqCst);
        self.pending.clear();
    }
}

/// Removes a pending entry when its caller returns, times out or is cancelled.
struct PendingGuard<'a> {
    shared: &'a Shared,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.shared.pending.remove(&self.request_id);
    }
}

pub struct ClearNodeClient {
    signer: PrivateKeySigner,
    outbound: mpsc::Sender<String>,
    shared: Arc<Shared>,
}

impl ClearNodeClient {
    /// Start the connection task. It reconnects until `shutdown` flips to true
    /// or its sender is dropped.
    pub fn spawn(
        config: ClientConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        let shared = Arc::new(Shared::default());

        let client = Arc::new(Self {
            signer: config.signer.clone(),
            outbound: tx,
            shared: Arc::clone(&shared),
        });

        let handle = tokio::spawn(connection_loop(config, rx, shared, shutdown));
        (client, handle)
    }

    async fn request(
        &self,
        operation: &'static str,
        rpc_method: &'static str,
        params: Value,
        timeout: Duration,
    ) -> Result<RpcResponse, SettlementError> {
        if !self.is_authenticated() {
            return Err(SettlementError::NotConnected);
        }

        let request_id = self.shared.next_request_id();
        let request = RpcRequest::new(request_id, rpc_method, params);
        let frame = sign_frame(&self.signer, &request)?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.insert(request_id, tx);
        let _guard = PendingGuard {
            shared: &self.shared,
            request_id,
        };

        self.outbound
            .send(frame)
            .await
            .map_err(|_| SettlementError::NotConnected)?;

        tracing::debug!(request_id, method = rpc_method, "settlement request sent");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(RpcResponse::Error { message })) => Err(SettlementError::Rejected(message)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(SettlementError::NotConnected),
            Err(_) => {
                tracing::warn!(request_id, operation, "settlement request timed out");
                Err(SettlementError::Timeout { operation })
            }
        }
    }
}

#[async_trait]
impl SettlementNetwork for ClearNodeClient {
    fn is_authenticated(&self) -> bool {
        self.shared.authenticated.load(Ordering::SeqCst)
    }

    fn service_address(&self) -> Address {
        self.signer.address()
    }

    async fn open_session(
        &self,
        definition: &AppDefinition,
        allocations: &[Allocation],
    ) -> Result<String, SettlementError> {
        let params = json!([{ "definition": definition, "allocations": allocations }]);
        match self
            .request(
                "open_session",
                method::CREATE_APP_SESSION,
                params,
                OPEN_SESSION_TIMEOUT,
            )
            .await?
        {
            RpcResponse::CreateAppSession { app_session_id } => Ok(app_session_id),
            other => Err(unexpected("open_session", &other)),
        }
    }

    async fn close_session(
        &self,
        session_id: &str,
        allocations: &[Allocation],
        kind: CloseKind,
    ) -> Result<String, SettlementError> {
        let params = json!([{ "app_session_id": session_id, "allocations": allocations }]);
        match self
            .request(
                kind.operation(),
                method::CLOSE_APP_SESSION,
                params,
                kind.timeout(),
            )
            .await?
        {
            RpcResponse::CloseAppSession { transaction_hash } => Ok(transaction_hash
                .unwrap_or_else(|| {
                    kind.fallback_reference(chrono::Utc::now().timestamp_millis())
                })),
            other => Err(unexpected(kind.operation(), &other)),
        }
    }

    async fn query_channels(&self, wallet: Address) -> Result<Vec<LiveChannel>, SettlementError> {
        let params = json!([{ "participant": format!("{wallet:#x}") }]);
        match self
            .request(
                "query_channels",
                method::GET_CHANNELS,
                params,
                QUERY_CHANNELS_TIMEOUT,
            )
            .await?
        {
            RpcResponse::GetChannels(channels) => Ok(channels),
            other => Err(unexpected("query_channels", &other)),
        }
    }

    async fn query_balances(
        &self,
        wallet: Address,
    ) -> Result<Vec<LedgerBalance>, SettlementError> {
        let params = json!([{ "participant": format!("{wallet:#x}") }]);
        match self
            .request(
                "query_balances",
                method::GET_LEDGER_BALANCES,
                params,
                QUERY_BALANCES_TIMEOUT,
            )
            .await?
        {
            RpcResponse::GetLedgerBalances(balances) => Ok(balances),
            other => Err(unexpected("query_balances", &other)),
        }
    }
}

fn unexpected(operation: &'static str, response: &RpcResponse) -> SettlementError {
    SettlementError::UnexpectedResponse {
        operation,
        method: response.method().to_string(),
    }
}

fn sign_frame(signer: &PrivateKeySigner, request: &RpcRequest) -> Result<String, SettlementError> {
    let sig = signer
        .sign_hash_sync(&request.signing_hash())
        .map_err(|e| SettlementError::Signing(e.to_string()))?;
    Ok(request.to_frame(&[encode_signature_hex(&sig)]))
}

async fn connection_loop(
    config: ClientConfig,
    mut outbound: mpsc::Receiver<String>,
    shared: Arc<Shared>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut reconnect_delay = INITIAL_RECONNECT_DELAY;

    loop {
        if *shutdown.borrow() {
            break;
        }

        tracing::info!(url = %config.url, "connecting to settlement network");

        match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => {
                // frames queued while disconnected belong to callers that already failed
                while outbound.try_recv().is_ok() {}

                let (sink, source) = ws.split();
                let started = Instant::now();
                let exit =
                    run_connection(&config, sink, source, &mut outbound, &shared, &mut shutdown)
                        .await;
                // backoff only resets once a session got past authentication
                if shared.authenticated.load(Ordering::SeqCst) {
                    reconnect_delay = INITIAL_RECONNECT_DELAY;
                }
                shared.mark_disconnected();
                match exit {
                    Ok(Exit::Remote) => tracing::info!(
                        uptime_secs = started.elapsed().as_secs(),
                        "settlement network connection closed"
                    ),
                    Ok(Exit::ClientDropped) | Ok(Exit::Shutdown) => break,
                    Err(e) => tracing::warn!(error = %e, "settlement network connection failed"),
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to connect to settlement network"),
        }

        if *shutdown.borrow() {
            break;
        }

        tracing::warn!(
            delay_ms = reconnect_delay.as_millis() as u64,
            "reconnecting to settlement network"
        );
        tokio::select! {
            _ = tokio::time::sleep(reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
        reconnect_delay = (reconnect_delay * 2).min(MAX_RECONNECT_DELAY);
    }

    shared.mark_disconnected();
    tracing::info!("settlement network client stopped");
}

async fn run_connection(
    config: &ClientConfig,
    mut sink: WsSink,
    mut source: WsSource,
    outbound: &mut mpsc::Receiver<String>,
    shared: &Shared,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Exit, SettlementError> {
    let policy = AuthPolicy::new(
        &config.app_name,
        config.signer.address(),
        chrono::Utc::now().timestamp(),
    );
    let auth_request = RpcRequest::new(
        shared.next_request_id(),
        method::AUTH_REQUEST,
        policy.request_params(),
    );
    sink.send(Message::Text(auth_request.to_frame(&[]))).await?;

    loop {
        tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => sink.send(Message::Text(frame)).await?,
                None => return Ok(Exit::ClientDropped),
            },
            msg = source.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_text(config, &policy, &mut sink, shared, &text).await?;
                }
                Some(Ok(Message::Ping(data))) => sink.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "settlement network sent close");
                    return Ok(Exit::Remote);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(Exit::Remote),
            },
            _ = shutdown.changed() => {
                let _ = sink.send(Message::Close(None)).await;
                return Ok(Exit::Shutdown);
            }
        }
    }
}

async fn handle_text(
    config: &ClientConfig,
    policy: &AuthPolicy,
    sink: &mut WsSink,
    shared: &Shared,
    text: &str,
) -> Result<(), SettlementError> {
    let envelope = match protocol::parse_response(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!(error = %e, "ignoring malformed settlement network message");
            return Ok(());
        }
    };

    match envelope.response {
        RpcResponse::AuthChallenge { challenge_message } => {
            let sig = config
                .signer
                .sign_hash_sync(&policy.signing_hash(&challenge_message))
                .map_err(|e| SettlementError::Signing(e.to_string()))?;
            let verify = RpcRequest::new(
                shared.next_request_id(),
                method::AUTH_VERIFY,
                json!([{ "challenge": challenge_message }]),
            );
            sink.send(Message::Text(verify.to_frame(&[encode_signature_hex(&sig)])))
                .await?;
        }
        RpcResponse::AuthVerify { success: true } => {
            shared.authenticated.store(true, Ordering::SeqCst);
            tracing::info!(
                wallet = %config.signer.address(),
                "authenticated with settlement network"
            );
        }
        RpcResponse::AuthVerify { success: false } => {
            tracing::error!("settlement network rejected authentication");
            return Err(SettlementError::Rejected(
                "authentication rejected".to_string(),
            ));
        }
        response => shared.resolve(envelope.request_id, response),
    }

    Ok(())
}
