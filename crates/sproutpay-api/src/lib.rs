//! SproutPay payment link API.
//!
//! HTTP routes sit on top of the [`machine::StatusMachine`], which owns every
//! payment link transition, and the [`monitor::ChannelMonitor`], which mirrors
//! live settlement channel status back into the store.

pub mod config;
pub mod cors;
pub mod db;
pub mod error;
pub mod machine;
pub mod metrics;
pub mod monitor;
pub mod routes;
pub mod state;
pub mod validation;

pub use config::SproutConfig;
pub use db::Database;
pub use error::ApiError;
pub use machine::StatusMachine;
pub use state::AppState;
