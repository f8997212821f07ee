//! Settlement Network integration.
//!
//! The status machine and channel monitor talk to the network only through the
//! [`SettlementNetwork`] trait. [`ClearNodeClient`] is the production
//! implementation: one authenticated WebSocket connection to a ClearNode,
//! multiplexing Nitrolite RPC requests by request id.

pub mod auth;
pub mod client;
pub mod protocol;

use std::time::Duration;

use alloy::primitives::Address;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::{ClearNodeClient, ClientConfig};
pub use protocol::{LedgerBalance, LiveChannel, ProtocolError, RpcResponse};

pub const OPEN_SESSION_TIMEOUT: Duration = Duration::from_secs(5);
pub const TRANSFER_CLOSE_TIMEOUT: Duration = Duration::from_secs(10);
pub const SETTLEMENT_CLOSE_TIMEOUT: Duration = Duration::from_secs(15);
pub const QUERY_CHANNELS_TIMEOUT: Duration = Duration::from_secs(3);
pub const QUERY_BALANCES_TIMEOUT: Duration = Duration::from_secs(5);

/// Prefix of locally generated placeholder channel ids.
pub const VIRTUAL_CHANNEL_PREFIX: &str = "virtual_";

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("not connected to the settlement network")]
    NotConnected,

    #[error("{operation} timed out")]
    Timeout { operation: &'static str },

    #[error("settlement network rejected the request: {0}")]
    Rejected(String),

    #[error("unexpected {method} response to {operation}")]
    UnexpectedResponse {
        operation: &'static str,
        method: String,
    },

    #[error("signing failed: {0}")]
    Signing(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("transport error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Application definition for a two-party payment session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppDefinition {
    pub protocol: String,
    pub participants: Vec<String>,
    pub weights: Vec<u32>,
    pub quorum: u32,
    pub challenge: u64,
    pub nonce: u64,
}

impl AppDefinition {
    /// Sender holds full signing weight until the session is closed.
    pub fn payment(sender: &str, receiver: &str, nonce: u64) -> Self {
        Self {
            protocol: "nitroliterpc".to_string(),
            participants: vec![sender.to_string(), receiver.to_string()],
            weights: vec![100, 0],
            quorum: 100,
            challenge: 0,
            nonce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub participant: String,
    pub asset: String,
    pub amount: Decimal,
}

impl Allocation {
    /// Opening state: the sender holds the full amount.
    pub fn opening(sender: &str, receiver: &str, asset: &str, amount: Decimal) -> Vec<Self> {
        Self::split(sender, amount, receiver, Decimal::ZERO, asset)
    }

    /// Final state: the full amount moves to the receiver.
    pub fn payout(sender: &str, receiver: &str, asset: &str, amount: Decimal) -> Vec<Self> {
        Self::split(sender, Decimal::ZERO, receiver, amount, asset)
    }

    fn split(
        sender: &str,
        sender_amount: Decimal,
        receiver: &str,
        receiver_amount: Decimal,
        asset: &str,
    ) -> Vec<Self> {
        let asset = asset.to_lowercase();
        vec![
            Allocation {
                participant: sender.to_string(),
                asset: asset.clone(),
                amount: sender_amount,
            },
            Allocation {
                participant: receiver.to_string(),
                asset,
                amount: receiver_amount,
            },
        ]
    }
}

/// Which flow is closing a session. Determines the timeout and the reference
/// reported when the network does not return a transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Funds transfer to the receiver (release, early release).
    Transfer,
    /// Cross-chain settlement of the channel.
    Settlement,
}

impl CloseKind {
    pub fn timeout(&self) -> Duration {
        match self {
            CloseKind::Transfer => TRANSFER_CLOSE_TIMEOUT,
            CloseKind::Settlement => SETTLEMENT_CLOSE_TIMEOUT,
        }
    }

    pub fn fallback_reference(&self, now_ms: i64) -> String {
        match self {
            CloseKind::Transfer => "off-chain-transfer".to_string(),
            CloseKind::Settlement => format!("settlement_{now_ms}"),
        }
    }

    pub fn operation(&self) -> &'static str {
        match self {
            CloseKind::Transfer => "transfer",
            CloseKind::Settlement => "settlement",
        }
    }
}

/// Placeholder channel id used when a session cannot be opened on the network.
pub fn virtual_channel_id(now_ms: i64) -> String {
    format!(
        "{VIRTUAL_CHANNEL_PREFIX}{now_ms}_{}",
        crate::short_id::random_string(9)
    )
}

pub fn is_virtual_channel_id(channel_id: &str) -> bool {
    channel_id.starts_with(VIRTUAL_CHANNEL_PREFIX)
}

/// Narrow client interface to the Settlement Network.
///
/// Every operation fails fast with [`SettlementError::NotConnected`] while the
/// connection is down or unauthenticated.
#[async_trait]
pub trait SettlementNetwork: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Service wallet the connection is authenticated as.
    fn service_address(&self) -> Address;

    async fn open_session(
        &self,
        definition: &AppDefinition,
        allocations: &[Allocation],
    ) -> Result<String, SettlementError>;

    /// Close a session with final allocations, returning a settlement reference.
    async fn close_session(
        &self,
        session_id: &str,
        allocations: &[Allocation],
        kind: CloseKind,
    ) -> Result<String, SettlementError>;

    async fn query_channels(&self, wallet: Address) -> Result<Vec<LiveChannel>, SettlementError>;

    async fn query_balances(&self, wallet: Address)
        -> Result<Vec<LedgerBalance>, SettlementError>;
}
