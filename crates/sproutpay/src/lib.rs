//! SproutPay core: escrowed payment links settled over a state-channel network.
//!
//! Two wallet holders create and accept payment links; funds move through an
//! off-chain session on a Yellow Network ClearNode so neither side pays gas.
//!
//! - [`models`]: payment link, contract and channel records plus the
//!   [`LinkStatus`] transition graph
//! - [`signature`]: EIP-191 wallet signature verification
//! - [`settlement`]: the [`SettlementNetwork`](settlement::SettlementNetwork)
//!   trait and its ClearNode WebSocket client
//! - [`short_id`]: shareable link identifiers
//! - [`security`]: constant-time comparison, key parsing, address helpers
//!
//! # Quick example
//!
//! ```no_run
//! use sproutpay::settlement::{ClearNodeClient, ClientConfig, SettlementNetwork};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let signer = sproutpay::security::parse_private_key("0xYOUR_KEY").unwrap();
//! let (_tx, shutdown) = tokio::sync::watch::channel(false);
//! let (client, _task) = ClearNodeClient::spawn(
//!     ClientConfig {
//!         url: "wss://clearnet-sandbox.yellow.com/ws".into(),
//!         app_name: "SproutPay".into(),
//!         signer,
//!     },
//!     shutdown,
//! );
//! let channels = client.query_channels(client.service_address()).await;
//! # }
//! ```

pub mod error;
pub mod models;
pub mod security;
pub mod settlement;
pub mod short_id;
pub mod signature;

pub use error::{ParseError, SproutError};
pub use models::*;

/// Links expire this long after creation.
pub const LINK_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Attempts at finding an unused short id before giving up.
pub const SHORT_ID_ATTEMPTS: usize = 10;
