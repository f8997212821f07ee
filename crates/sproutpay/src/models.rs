//! Payment link domain model.
//!
//! A [`PaymentLink`] moves through the [`LinkStatus`] graph; once accepted it is
//! backed by exactly one [`SettlementChannel`] whose [`ChannelStatus`] is mirrored
//! back onto the link through [`ChannelStatus::link_mapping`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ParseError;

/// Who created the link relative to the money flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkType {
    /// Creator pre-funds a payment to someone else.
    Payer,
    /// Creator requests a payment from someone else.
    Receiver,
}

impl LinkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkType::Payer => "payer",
            LinkType::Receiver => "receiver",
        }
    }
}

impl FromStr for LinkType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "payer" => Ok(LinkType::Payer),
            "receiver" => Ok(LinkType::Receiver),
            other => Err(ParseError::new("link type", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowType {
    InstantTransfer,
    TimeLocked,
}

impl EscrowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowType::InstantTransfer => "instant_transfer",
            EscrowType::TimeLocked => "time_locked",
        }
    }
}

impl FromStr for EscrowType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "instant_transfer" => Ok(EscrowType::InstantTransfer),
            "time_locked" => Ok(EscrowType::TimeLocked),
            other => Err(ParseError::new("escrow type", other)),
        }
    }
}

/// Lifecycle state of a payment link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Created,
    PendingAcceptance,
    /// Transient lock held while the settlement channel is being opened.
    Processing,
    ChannelActive,
    FundsLocked,
    Disputed,
    Released,
    Resolved,
    EarlyReleased,
    Completed,
    Failed,
}

impl LinkStatus {
    pub const ALL: [LinkStatus; 11] = [
        LinkStatus::Created,
        LinkStatus::PendingAcceptance,
        LinkStatus::Processing,
        LinkStatus::ChannelActive,
        LinkStatus::FundsLocked,
        LinkStatus::Disputed,
        LinkStatus::Released,
        LinkStatus::Resolved,
        LinkStatus::EarlyReleased,
        LinkStatus::Completed,
        LinkStatus::Failed,
    ];

    /// States from which a link may be accepted.
    pub const ACCEPTABLE: [LinkStatus; 2] = [LinkStatus::Created, LinkStatus::PendingAcceptance];

    /// States in which funds sit in an open channel and may be released or disputed.
    pub const FUNDED: [LinkStatus; 2] = [LinkStatus::ChannelActive, LinkStatus::FundsLocked];

    pub fn as_str(&self) -> &'static str {
        match self {
            LinkStatus::Created => "created",
            LinkStatus::PendingAcceptance => "pending_acceptance",
            LinkStatus::Processing => "processing",
            LinkStatus::ChannelActive => "channel_active",
            LinkStatus::FundsLocked => "funds_locked",
            LinkStatus::Disputed => "disputed",
            LinkStatus::Released => "released",
            LinkStatus::Resolved => "resolved",
            LinkStatus::EarlyReleased => "early_released",
            LinkStatus::Completed => "completed",
            LinkStatus::Failed => "failed",
        }
    }

    /// Legal successor states.
    pub fn successors(&self) -> &'static [LinkStatus] {
        use LinkStatus::*;
        match self {
            Created => &[PendingAcceptance, Processing],
            PendingAcceptance => &[Processing],
            Processing => &[ChannelActive, Failed],
            ChannelActive => &[FundsLocked, Completed, Disputed, EarlyReleased, Failed],
            FundsLocked => &[Released, Disputed, Completed, EarlyReleased, Failed],
            Disputed => &[Resolved, Failed],
            Released => &[Completed],
            Resolved => &[Completed],
            EarlyReleased => &[Completed],
            Completed | Failed => &[],
        }
    }

    pub fn can_transition_to(&self, next: LinkStatus) -> bool {
        self.successors().contains(&next)
    }

    /// Every state that has `target` as a legal successor.
    pub fn predecessors_of(target: LinkStatus) -> Vec<LinkStatus> {
        Self::ALL
            .iter()
            .copied()
            .filter(|s| s.can_transition_to(target))
            .collect()
    }

    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseError::new("link status", s))
    }
}

/// Status of the payment link as seen from the settlement network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkStatus {
    Active,
    Processing,
    Settled,
    Failed,
    Disputed,
}

impl NetworkStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkStatus::Active => "active",
            NetworkStatus::Processing => "processing",
            NetworkStatus::Settled => "settled",
            NetworkStatus::Failed => "failed",
            NetworkStatus::Disputed => "disputed",
        }
    }
}

impl fmt::Display for NetworkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(NetworkStatus::Active),
            "processing" => Ok(NetworkStatus::Processing),
            "settled" => Ok(NetworkStatus::Settled),
            "failed" => Ok(NetworkStatus::Failed),
            "disputed" => Ok(NetworkStatus::Disputed),
            other => Err(ParseError::new("network status", other)),
        }
    }
}

/// Status of an off-chain settlement channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
    Active,
    Processing,
    Settled,
    Closed,
}

impl ChannelStatus {
    /// Statuses the channel monitor keeps polling.
    pub const OPEN: [ChannelStatus; 2] = [ChannelStatus::Active, ChannelStatus::Processing];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelStatus::Active => "active",
            ChannelStatus::Processing => "processing",
            ChannelStatus::Settled => "settled",
            ChannelStatus::Closed => "closed",
        }
    }

    /// Channels only move forward: `active → processing → settled | closed`.
    pub fn can_advance_to(&self, next: ChannelStatus) -> bool {
        use ChannelStatus::*;
        matches!(
            (*self, next),
            (Active, Processing) | (Active, Settled) | (Active, Closed)
                | (Processing, Settled)
                | (Processing, Closed)
        )
    }

    /// Link status and network status that mirror this channel status.
    pub fn link_mapping(&self) -> (LinkStatus, NetworkStatus) {
        match self {
            ChannelStatus::Active => (LinkStatus::ChannelActive, NetworkStatus::Active),
            ChannelStatus::Processing => (LinkStatus::FundsLocked, NetworkStatus::Processing),
            ChannelStatus::Settled => (LinkStatus::Completed, NetworkStatus::Settled),
            ChannelStatus::Closed => (LinkStatus::Failed, NetworkStatus::Failed),
        }
    }
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelStatus {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ChannelStatus::Active),
            "processing" => Ok(ChannelStatus::Processing),
            "settled" => Ok(ChannelStatus::Settled),
            "closed" => Ok(ChannelStatus::Closed),
            other => Err(ParseError::new("channel status", other)),
        }
    }
}

/// Accepted contract attachment file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractFileType {
    #[serde(rename = "PDF")]
    Pdf,
    #[serde(rename = "DOC")]
    Doc,
    #[serde(rename = "DOCX")]
    Docx,
    #[serde(rename = "TXT")]
    Txt,
}

impl ContractFileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractFileType::Pdf => "PDF",
            ContractFileType::Doc => "DOC",
            ContractFileType::Docx => "DOCX",
            ContractFileType::Txt => "TXT",
        }
    }
}

impl FromStr for ContractFileType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PDF" => Ok(ContractFileType::Pdf),
            "DOC" => Ok(ContractFileType::Doc),
            "DOCX" => Ok(ContractFileType::Docx),
            "TXT" => Ok(ContractFileType::Txt),
            other => Err(ParseError::new("contract file type", other)),
        }
    }
}

/// Escrowed payment agreement between a creator and an eventual counterparty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentLink {
    pub id: String,
    pub short_id: String,
    pub creator_address: String,
    pub link_type: LinkType,
    pub target_address: Option<String>,
    pub amount: Decimal,
    pub token: String,
    pub chain: String,
    pub escrow_type: EscrowType,
    pub escrow_hours: Option<u32>,
    pub description: Option<String>,
    pub status: LinkStatus,
    pub can_early_release: bool,
    pub early_released_at: Option<i64>,
    pub early_released_by: Option<String>,
    pub accepted_by: Option<String>,
    pub accepted_at: Option<i64>,
    pub yellow_channel_id: Option<String>,
    pub nitrolite_transaction_hash: Option<String>,
    pub yellow_network_status: Option<NetworkStatus>,
    pub attach_work_contract: bool,
    pub dispute_resolution: bool,
    pub created_at: i64,
    pub expires_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl PaymentLink {
    pub fn is_expired(&self, now: i64) -> bool {
        now > self.expires_at
    }

    /// When a time-locked escrow stops holding the funds, counted from
    /// acceptance. `None` for instant transfers and unaccepted links.
    pub fn unlocks_at(&self) -> Option<i64> {
        match self.escrow_type {
            EscrowType::TimeLocked => {
                let hours = i64::from(self.escrow_hours?);
                Some(self.accepted_at? + hours * 3600)
            }
            EscrowType::InstantTransfer => None,
        }
    }

    /// Wallet that funds the payment: the acceptor of a receiver link, the
    /// creator of a payer link.
    pub fn payer_address(&self) -> Option<&str> {
        match self.link_type {
            LinkType::Receiver => self.accepted_by.as_deref(),
            LinkType::Payer => Some(self.creator_address.as_str()),
        }
    }

    /// Wallet that receives the payment once it is settled.
    pub fn payee_address(&self) -> Option<&str> {
        match self.link_type {
            LinkType::Receiver => Some(self.creator_address.as_str()),
            LinkType::Payer => self.accepted_by.as_deref(),
        }
    }

    pub fn is_participant(&self, address: &str) -> bool {
        crate::security::same_address(&self.creator_address, address)
            || self
                .accepted_by
                .as_deref()
                .is_some_and(|acceptor| crate::security::same_address(acceptor, address))
    }
}

/// Work contract and arbitration data attached to a payment link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContractDetails {
    pub id: String,
    pub payment_link_id: String,
    pub contract_terms: Option<String>,
    pub contract_file_url: Option<String>,
    pub contract_file_name: Option<String>,
    pub contract_file_type: Option<ContractFileType>,
    pub arbitrator_address: Option<String>,
    pub arbitration_fee: Option<Decimal>,
    pub created_at: i64,
}

/// One off-chain value-transfer session backing an accepted payment link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementChannel {
    pub id: String,
    pub payment_link_id: String,
    pub channel_id: String,
    /// Sender.
    pub participant_a: String,
    /// Receiver.
    pub participant_b: String,
    pub asset: String,
    pub total_amount: Decimal,
    pub status: ChannelStatus,
    /// Locally generated placeholder; never settled through the network.
    pub is_virtual: bool,
    pub created_at: i64,
    pub settled_at: Option<i64>,
}

/// Channel counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelStats {
    pub total_channels: u64,
    pub active_channels: u64,
    pub settled_channels: u64,
    pub failed_channels: u64,
}
