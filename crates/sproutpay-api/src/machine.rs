//! Payment link status machine.
//!
//! Every caller-initiated transition goes through here. Writes are
//! compare-and-set against the expected current statuses, and settlement
//! network calls happen outside any database lock.

use std::sync::Arc;

use rust_decimal::Decimal;

use sproutpay::security::same_address;
use sproutpay::settlement::{
    self, Allocation, AppDefinition, CloseKind, LedgerBalance, LiveChannel, SettlementError,
    SettlementNetwork,
};
use sproutpay::{
    ChannelStats, ChannelStatus, ContractDetails, EscrowType, LinkStatus, LinkType, PaymentLink,
    SettlementChannel,
};

use crate::db::{Database, NewChannel, NewContract, NewLink};
use crate::error::ApiError;
use crate::metrics::{self, observe_settlement};

/// A wallet-signed request: `signature` must be a personal_sign of `message`
/// by `address`.
#[derive(Debug, Clone)]
pub struct SignedRequest {
    pub address: String,
    pub message: String,
    pub signature: String,
}

impl SignedRequest {
    fn verify(&self) -> Result<(), ApiError> {
        if sproutpay::signature::verify(&self.address, &self.message, &self.signature) {
            Ok(())
        } else {
            tracing::debug!(address = %self.address, "signature rejected");
            Err(ApiError::InvalidSignature)
        }
    }
}

/// Validated payment terms for a new link.
#[derive(Debug, Clone)]
pub struct LinkTerms {
    pub amount: Decimal,
    pub token: String,
    pub chain: String,
    pub escrow_type: EscrowType,
    pub escrow_hours: Option<u32>,
    pub description: Option<String>,
    pub can_early_release: bool,
    pub attach_work_contract: bool,
    pub dispute_resolution: bool,
    pub contract: Option<NewContract>,
}

#[derive(Debug, Clone)]
pub struct LinkView {
    pub link: PaymentLink,
    pub contract: Option<ContractDetails>,
    pub channel: Option<SettlementChannel>,
}

#[derive(Debug, Clone)]
pub struct Acceptance {
    pub link: PaymentLink,
    pub channel: SettlementChannel,
}

#[derive(Debug, Clone)]
pub struct Release {
    pub link: PaymentLink,
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct Dispute {
    pub link: PaymentLink,
    pub initiated_by: String,
    pub reason: String,
    pub initiated_at: i64,
}

#[derive(Debug, Clone)]
pub struct ChannelView {
    pub channel: SettlementChannel,
    /// Status string the network reported, when it was reachable.
    pub live_status: Option<String>,
    pub link_status: Option<LinkStatus>,
}

#[derive(Debug, Clone)]
pub struct Settlement {
    pub channel: SettlementChannel,
    pub target_chain: String,
    pub reference: String,
    pub balances: Vec<LedgerBalance>,
}

/// Map a status string reported by the network onto a channel status.
pub fn live_channel_status(status: &str) -> Option<ChannelStatus> {
    match status.to_ascii_lowercase().as_str() {
        "active" | "open" | "joining" => Some(ChannelStatus::Active),
        "processing" | "resizing" | "challenged" => Some(ChannelStatus::Processing),
        "settled" | "final" => Some(ChannelStatus::Settled),
        "closed" => Some(ChannelStatus::Closed),
        _ => None,
    }
}

pub struct StatusMachine {
    db: Arc<Database>,
    network: Arc<dyn SettlementNetwork>,
    virtual_fallback: bool,
    link_ttl_secs: i64,
}

impl StatusMachine {
    pub fn new(db: Arc<Database>, network: Arc<dyn SettlementNetwork>, virtual_fallback: bool) -> Self {
        Self {
            db,
            network,
            virtual_fallback,
            link_ttl_secs: sproutpay::LINK_TTL_SECS,
        }
    }

    pub fn with_link_ttl(mut self, secs: i64) -> Self {
        self.link_ttl_secs = secs;
        self
    }

    pub fn network(&self) -> &Arc<dyn SettlementNetwork> {
        &self.network
    }

    pub fn create(
        &self,
        link_type: LinkType,
        signed: &SignedRequest,
        target_address: Option<String>,
        terms: LinkTerms,
    ) -> Result<PaymentLink, ApiError> {
        signed.verify()?;

        if terms.escrow_type == EscrowType::TimeLocked && terms.escrow_hours.is_none() {
            return Err(ApiError::MissingEscrowHours);
        }
        if let Some(ref target) = target_address {
            if same_address(target, &signed.address) {
                return Err(ApiError::Validation(
                    "target address cannot be the creator".to_string(),
                ));
            }
        }

        let new = NewLink {
            link_type,
            creator_address: signed.address.clone(),
            target_address,
            amount: terms.amount,
            token: terms.token,
            chain: terms.chain,
            escrow_type: terms.escrow_type,
            escrow_hours: terms.escrow_hours,
            description: terms.description,
            can_early_release: terms.can_early_release,
            attach_work_contract: terms.attach_work_contract,
            dispute_resolution: terms.dispute_resolution,
        };

        let link = self.db.insert_link(
            &new,
            terms.contract.as_ref(),
            now(),
            self.link_ttl_secs,
            sproutpay::short_id::generate,
        )?;

        metrics::LINKS_CREATED
            .with_label_values(&[link.link_type.as_str()])
            .inc();
        metrics::record_transition(LinkStatus::Created);
        tracing::info!(
            link_id = %link.id,
            short_id = %link.short_id,
            link_type = %link.link_type.as_str(),
            amount = %link.amount,
            token = %link.token,
            "payment link created"
        );

        Ok(link)
    }

    /// Sender flow: the creator pays, the optional receiver accepts.
    pub fn create_send(
        &self,
        signed: &SignedRequest,
        receiver: Option<String>,
        terms: LinkTerms,
    ) -> Result<PaymentLink, ApiError> {
        self.create(LinkType::Payer, signed, receiver, terms)
    }

    pub fn view(&self, key: &str) -> Result<LinkView, ApiError> {
        let link = self.load(key)?;
        if link.is_expired(now()) {
            return Err(ApiError::Expired.on_link(link.status));
        }
        let contract = self.db.get_contract_details(&link.id)?;
        let channel = self.db.get_channel_for_link(&link.id)?;
        Ok(LinkView {
            link,
            contract,
            channel,
        })
    }

    pub async fn accept(&self, key: &str, signed: &SignedRequest) -> Result<Acceptance, ApiError> {
        signed.verify()?;

        let link = self.load(key)?;
        let now = now();
        check_acceptor(&link, &signed.address, now).map_err(|e| e.on_link(link.status))?;

        if !self.db.begin_acceptance(&link.id, &signed.address, now)? {
            let current = self.reload(&link.id)?;
            if current.is_expired(now) && LinkStatus::ACCEPTABLE.contains(&current.status) {
                return Err(ApiError::Expired.on_link(current.status));
            }
            return Err(ApiError::AlreadyProcessed {
                current: current.status,
            });
        }
        metrics::record_transition(LinkStatus::Processing);

        let mut link = link;
        link.status = LinkStatus::Processing;
        link.accepted_by = Some(signed.address.clone());
        link.accepted_at = Some(now);

        let (sender, receiver) = match (link.payer_address(), link.payee_address()) {
            (Some(payer), Some(payee)) => (payer.to_string(), payee.to_string()),
            _ => return Err(ApiError::Internal("accepted link has no counterparty".to_string())),
        };

        let now_ms = now_ms();
        let definition = AppDefinition::payment(&sender, &receiver, now_ms as u64);
        let allocations = Allocation::opening(&sender, &receiver, &link.token, link.amount);

        let opened = observe_settlement(
            "open_session",
            self.network.open_session(&definition, &allocations),
        )
        .await;

        let (channel_id, is_virtual) = match opened {
            Ok(session_id) => (session_id, false),
            Err(e) if self.virtual_fallback => {
                let channel_id = settlement::virtual_channel_id(now_ms);
                tracing::warn!(
                    link_id = %link.id,
                    channel_id = %channel_id,
                    error = %e,
                    "session open failed, using virtual channel"
                );
                metrics::VIRTUAL_CHANNELS.inc();
                (channel_id, true)
            }
            Err(e) => return Err(self.abort_acceptance(&link.id, e)),
        };

        let new_channel = NewChannel {
            channel_id,
            participant_a: sender,
            participant_b: receiver,
            asset: link.token.to_lowercase(),
            total_amount: link.amount,
            is_virtual,
        };

        let channel = match self.db.activate_channel(&link.id, &new_channel, now) {
            Ok(channel) => channel,
            Err(e) => {
                if let Err(fail_err) = self.db.fail_link(&link.id, now) {
                    tracing::error!(link_id = %link.id, error = %fail_err, "compensating write failed");
                }
                return Err(e);
            }
        };
        metrics::record_transition(LinkStatus::ChannelActive);

        tracing::info!(
            link_id = %link.id,
            channel_id = %channel.channel_id,
            is_virtual = channel.is_virtual,
            "payment link accepted"
        );

        Ok(Acceptance {
            link: self.reload(&link.id)?,
            channel,
        })
    }

    fn abort_acceptance(&self, link_id: &str, reason: SettlementError) -> ApiError {
        match self.db.fail_link(link_id, now()) {
            Ok(true) => metrics::record_transition(LinkStatus::Failed),
            Ok(false) => {}
            Err(e) => {
                tracing::error!(link_id = %link_id, error = %e, "compensating write failed")
            }
        }
        match self.reload(link_id) {
            Ok(link) => ApiError::ChannelSetupFailed {
                link: Box::new(link),
                reason,
            },
            Err(e) => e,
        }
    }

    pub async fn early_release(&self, key: &str, signed: &SignedRequest) -> Result<Release, ApiError> {
        signed.verify()?;

        let link = self.load(key)?;
        let channel = self
            .check_early_release(&link, &signed.address)
            .map_err(|e| e.on_link(link.status))?;

        let (_, reference) = self
            .close_for_settlement(&channel, &link.chain)
            .await
            .map_err(|e| ApiError::from(e).on_link(link.status))?;

        let now = now();
        if !self
            .db
            .complete_early_release(&link.id, &channel.channel_id, &signed.address, &reference, now)?
        {
            let current = self.reload(&link.id)?;
            tracing::error!(
                link_id = %link.id,
                reference = %reference,
                status = %current.status,
                "funds transferred but link changed status concurrently"
            );
            return Err(ApiError::InvalidTransition {
                current: current.status,
                target: LinkStatus::EarlyReleased,
            });
        }
        metrics::record_transition(LinkStatus::EarlyReleased);
        tracing::info!(link_id = %link.id, releaser = %signed.address, "funds released early");

        Ok(Release {
            link: self.reload(&link.id)?,
            reference,
        })
    }

    pub async fn release(&self, key: &str, signed: &SignedRequest) -> Result<Release, ApiError> {
        signed.verify()?;

        let link = self.load(key)?;
        let channel = self
            .check_release(&link, &signed.address)
            .map_err(|e| e.on_link(link.status))?;

        let (_, reference) = self
            .close_for_settlement(&channel, &link.chain)
            .await
            .map_err(|e| ApiError::from(e).on_link(link.status))?;

        if !self
            .db
            .complete_release(&link.id, &channel.channel_id, &reference, now())?
        {
            let current = self.reload(&link.id)?;
            tracing::error!(
                link_id = %link.id,
                reference = %reference,
                status = %current.status,
                "funds transferred but link changed status concurrently"
            );
            return Err(ApiError::InvalidTransition {
                current: current.status,
                target: LinkStatus::Released,
            });
        }
        metrics::record_transition(LinkStatus::Released);
        metrics::record_transition(LinkStatus::Completed);
        tracing::info!(link_id = %link.id, reference = %reference, "funds released");

        Ok(Release {
            link: self.reload(&link.id)?,
            reference,
        })
    }

    pub fn dispute(&self, key: &str, signed: &SignedRequest, reason: &str) -> Result<Dispute, ApiError> {
        signed.verify()?;

        let reason = reason.trim();
        if !(10..=500).contains(&reason.chars().count()) {
            return Err(ApiError::Validation(
                "reason must be between 10 and 500 characters".to_string(),
            ));
        }

        let link = self.load(key)?;
        check_disputer(&link, &signed.address).map_err(|e| e.on_link(link.status))?;

        let now = now();
        if !self.db.mark_disputed(&link.id, now)? {
            let current = self.reload(&link.id)?;
            return Err(ApiError::InvalidTransition {
                current: current.status,
                target: LinkStatus::Disputed,
            });
        }
        metrics::record_transition(LinkStatus::Disputed);
        tracing::info!(link_id = %link.id, initiated_by = %signed.address, "dispute initiated");

        Ok(Dispute {
            link: self.reload(&link.id)?,
            initiated_by: signed.address.clone(),
            reason: reason.to_string(),
            initiated_at: now,
        })
    }

    /// Stored channel, refreshed from the network when it is reachable.
    pub async fn channel_status(&self, channel_id: &str) -> Result<ChannelView, ApiError> {
        let channel = self.load_channel(channel_id)?;

        let mut live_status = None;
        if !channel.is_virtual && self.network.is_authenticated() {
            match self.query_live(&channel.channel_id).await {
                Ok(Some(live)) => {
                    self.apply_live(&channel, &live.status)?;
                    live_status = Some(live.status);
                }
                Ok(None) => {
                    tracing::debug!(channel_id = %channel_id, "channel not reported by network");
                }
                Err(e) => {
                    tracing::warn!(channel_id = %channel_id, error = %e, "live status unavailable");
                }
            }
        }

        let channel = self.load_channel(channel_id)?;
        let link_status = self
            .db
            .get_link(&channel.payment_link_id)?
            .map(|link| link.status);

        Ok(ChannelView {
            channel,
            live_status,
            link_status,
        })
    }

    /// One monitor step: query the network for this channel and reconcile.
    /// Returns whether anything changed.
    pub async fn sync_channel(&self, channel: &SettlementChannel) -> Result<bool, ApiError> {
        match self.query_live(&channel.channel_id).await? {
            Some(live) => self.apply_live(channel, &live.status),
            None => Ok(false),
        }
    }

    async fn query_live(&self, channel_id: &str) -> Result<Option<LiveChannel>, SettlementError> {
        let channels = observe_settlement(
            "query_channels",
            self.network.query_channels(self.network.service_address()),
        )
        .await?;
        Ok(channels.into_iter().find(|c| c.channel_id == channel_id))
    }

    fn apply_live(&self, channel: &SettlementChannel, live: &str) -> Result<bool, ApiError> {
        let Some(status) = live_channel_status(live) else {
            tracing::warn!(channel_id = %channel.channel_id, live_status = %live, "unknown live channel status");
            return Ok(false);
        };
        if status == channel.status {
            return Ok(false);
        }

        let outcome = self.db.reconcile_channel(&channel.channel_id, status, now())?;
        if let Some(link_status) = outcome.link_status {
            metrics::record_transition(link_status);
        }
        if outcome.channel_advanced {
            tracing::info!(
                channel_id = %channel.channel_id,
                from = %channel.status,
                to = %status,
                link_status = ?outcome.link_status,
                "channel status reconciled"
            );
        }
        Ok(outcome.channel_advanced)
    }

    /// Cross-chain settlement of an open channel, requested by the payer.
    pub async fn settle_channel(
        &self,
        channel_id: &str,
        signed: &SignedRequest,
        target_chain: &str,
    ) -> Result<Settlement, ApiError> {
        signed.verify()?;

        let channel = self.load_channel(channel_id)?;
        let link = self.reload(&channel.payment_link_id)?;
        check_settlement(&link, &channel, &signed.address, now())
            .map_err(|e| e.on_link(link.status))?;

        let outcome = self.close_for_settlement(&channel, target_chain).await;

        let now = now();
        let (balances, reference) = match outcome {
            Ok(done) => done,
            // Nothing reached the network; the channel is still intact.
            Err(SettlementError::NotConnected) => {
                return Err(ApiError::from(SettlementError::NotConnected).on_link(link.status))
            }
            Err(e) => {
                tracing::error!(channel_id = %channel_id, target_chain = %target_chain, error = %e, "settlement failed");
                self.db.fail_settlement(&channel.channel_id, now)?;
                metrics::record_transition(LinkStatus::Failed);
                let current = self.reload(&link.id)?.status;
                return Err(ApiError::from(e).on_link(current));
            }
        };

        if let Some(status) = self
            .db
            .complete_settlement(&channel.channel_id, &reference, now)?
        {
            metrics::record_transition(status);
        }
        tracing::info!(
            channel_id = %channel_id,
            target_chain = %target_chain,
            settled_by = %signed.address,
            reference = %reference,
            "channel settled"
        );

        Ok(Settlement {
            channel: self.load_channel(channel_id)?,
            target_chain: target_chain.to_string(),
            reference,
            balances,
        })
    }

    pub fn channel_stats(&self) -> Result<ChannelStats, ApiError> {
        self.db.channel_stats()
    }

    pub fn open_channels(&self) -> Result<Vec<SettlementChannel>, ApiError> {
        self.db.list_open_channels()
    }

    /// Read the service ledger, then close the session paying the receiver
    /// in full.
    async fn close_for_settlement(
        &self,
        channel: &SettlementChannel,
        chain: &str,
    ) -> Result<(Vec<LedgerBalance>, String), SettlementError> {
        let service = self.network.service_address();
        let balances =
            observe_settlement("query_balances", self.network.query_balances(service)).await?;
        tracing::debug!(
            channel_id = %channel.channel_id,
            chain = %chain,
            balances = balances.len(),
            "closing session for settlement"
        );

        let allocations = Allocation::payout(
            &channel.participant_a,
            &channel.participant_b,
            &channel.asset,
            channel.total_amount,
        );
        let reference = observe_settlement(
            CloseKind::Settlement.operation(),
            self.network
                .close_session(&channel.channel_id, &allocations, CloseKind::Settlement),
        )
        .await?;
        Ok((balances, reference))
    }

    fn check_early_release(
        &self,
        link: &PaymentLink,
        releaser: &str,
    ) -> Result<SettlementChannel, ApiError> {
        if !link.can_early_release {
            return Err(ApiError::EarlyReleaseNotAllowed(
                "disabled for this payment link".to_string(),
            ));
        }
        if link.escrow_type != EscrowType::TimeLocked {
            return Err(ApiError::EarlyReleaseNotAllowed(
                "only available for time-locked payments".to_string(),
            ));
        }
        if !LinkStatus::FUNDED.contains(&link.status) {
            return Err(ApiError::InvalidTransition {
                current: link.status,
                target: LinkStatus::EarlyReleased,
            });
        }
        require_payer(link, releaser)?;
        self.networked_channel(link)
    }

    fn check_release(&self, link: &PaymentLink, releaser: &str) -> Result<SettlementChannel, ApiError> {
        if !LinkStatus::FUNDED.contains(&link.status)
            || !link.status.can_transition_to(LinkStatus::Released)
        {
            return Err(ApiError::InvalidTransition {
                current: link.status,
                target: LinkStatus::Released,
            });
        }
        require_payer(link, releaser)?;
        self.networked_channel(link)
    }

    fn networked_channel(&self, link: &PaymentLink) -> Result<SettlementChannel, ApiError> {
        let channel = self
            .db
            .get_channel_for_link(&link.id)?
            .ok_or(ApiError::NoChannel)?;
        if channel.is_virtual {
            return Err(ApiError::VirtualChannel {
                channel_id: channel.channel_id,
            });
        }
        Ok(channel)
    }

    fn load(&self, key: &str) -> Result<PaymentLink, ApiError> {
        self.db
            .find_link(key)?
            .ok_or_else(|| ApiError::NotFound(key.to_string()))
    }

    fn reload(&self, id: &str) -> Result<PaymentLink, ApiError> {
        self.db
            .get_link(id)?
            .ok_or_else(|| ApiError::NotFound(id.to_string()))
    }

    fn load_channel(&self, channel_id: &str) -> Result<SettlementChannel, ApiError> {
        self.db
            .get_channel(channel_id)?
            .ok_or_else(|| ApiError::ChannelNotFound(channel_id.to_string()))
    }
}

fn check_acceptor(link: &PaymentLink, acceptor: &str, now: i64) -> Result<(), ApiError> {
    if link.is_expired(now) {
        return Err(ApiError::Expired);
    }
    if !LinkStatus::ACCEPTABLE.contains(&link.status) {
        return Err(ApiError::AlreadyProcessed {
            current: link.status,
        });
    }
    if let Some(ref target) = link.target_address {
        if !same_address(target, acceptor) {
            return Err(ApiError::NotIntendedAcceptor {
                link_type: link.link_type,
            });
        }
    }
    if same_address(&link.creator_address, acceptor) {
        return Err(ApiError::SelfAcceptanceForbidden);
    }
    Ok(())
}

fn check_disputer(link: &PaymentLink, disputer: &str) -> Result<(), ApiError> {
    if !link.dispute_resolution {
        return Err(ApiError::DisputeNotEnabled);
    }
    if !LinkStatus::FUNDED.contains(&link.status) {
        return Err(ApiError::InvalidTransition {
            current: link.status,
            target: LinkStatus::Disputed,
        });
    }
    if !link.is_participant(disputer) {
        return Err(ApiError::NotParticipant);
    }
    Ok(())
}

/// Payer only. A time-locked escrow settles before it unlocks only when the
/// link allows early release.
fn check_settlement(
    link: &PaymentLink,
    channel: &SettlementChannel,
    settler: &str,
    now: i64,
) -> Result<(), ApiError> {
    if !ChannelStatus::OPEN.contains(&channel.status)
        || !link.status.can_transition_to(LinkStatus::Completed)
    {
        return Err(ApiError::InvalidTransition {
            current: link.status,
            target: LinkStatus::Completed,
        });
    }
    if channel.is_virtual {
        return Err(ApiError::VirtualChannel {
            channel_id: channel.channel_id.clone(),
        });
    }
    require_payer(link, settler)?;
    if let Some(unlocks_at) = link.unlocks_at() {
        if now < unlocks_at && !link.can_early_release {
            return Err(ApiError::EarlyReleaseNotAllowed(
                "escrow is still time-locked".to_string(),
            ));
        }
    }
    Ok(())
}

fn require_payer(link: &PaymentLink, address: &str) -> Result<(), ApiError> {
    match link.payer_address() {
        Some(payer) if same_address(payer, address) => Ok(()),
        _ => Err(ApiError::NotPayer),
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
