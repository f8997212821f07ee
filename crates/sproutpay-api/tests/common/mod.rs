#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use alloy::primitives::Address;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::SignerSync;
use async_trait::async_trait;
use rust_decimal::Decimal;

use sproutpay::settlement::{
    AppDefinition, Allocation, CloseKind, LedgerBalance, LiveChannel, SettlementError,
    SettlementNetwork,
};
use sproutpay::EscrowType;
use sproutpay_api::config::SproutConfig;
use sproutpay_api::db::Database;
use sproutpay_api::machine::{LinkTerms, SignedRequest, StatusMachine};

pub const TRANSFER_HASH: &str = "0xtransfer";
pub const SETTLEMENT_HASH: &str = "0xsettlement";

/// Failure injected into a mock network call.
#[derive(Debug, Clone, Copy)]
pub enum Failure {
    NotConnected,
    Timeout,
    Rejected,
}

impl Failure {
    fn error(self, operation: &'static str) -> SettlementError {
        match self {
            Failure::NotConnected => SettlementError::NotConnected,
            Failure::Timeout => SettlementError::Timeout { operation },
            Failure::Rejected => SettlementError::Rejected("insufficient funds".to_string()),
        }
    }
}

/// In-memory settlement network.
pub struct MockNetwork {
    authenticated: AtomicBool,
    service: Address,
    sessions: AtomicU64,
    open_failure: Mutex<Option<Failure>>,
    close_failure: Mutex<Option<Failure>>,
    live: Mutex<Vec<LiveChannel>>,
    calls: Mutex<Vec<String>>,
    opened: Mutex<Vec<(AppDefinition, Vec<Allocation>)>>,
}

impl MockNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            authenticated: AtomicBool::new(true),
            service: PrivateKeySigner::random().address(),
            sessions: AtomicU64::new(0),
            open_failure: Mutex::new(None),
            close_failure: Mutex::new(None),
            live: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            opened: Mutex::new(Vec::new()),
        })
    }

    pub fn set_authenticated(&self, value: bool) {
        self.authenticated.store(value, Ordering::SeqCst);
    }

    pub fn fail_open(&self, failure: Failure) {
        *self.open_failure.lock().unwrap() = Some(failure);
    }

    pub fn fail_close(&self, failure: Failure) {
        *self.close_failure.lock().unwrap() = Some(failure);
    }

    /// Report `channel_id` with `status` from `get_channels`.
    pub fn set_live(&self, channel_id: &str, status: &str) {
        let mut live = self.live.lock().unwrap();
        live.retain(|c| c.channel_id != channel_id);
        live.push(LiveChannel {
            channel_id: channel_id.to_string(),
            status: status.to_string(),
            participant: None,
            token: None,
        });
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn opened(&self) -> Vec<(AppDefinition, Vec<Allocation>)> {
        self.opened.lock().unwrap().clone()
    }

    fn enter(&self, call: &str) -> Result<(), SettlementError> {
        self.calls.lock().unwrap().push(call.to_string());
        if self.is_authenticated() {
            Ok(())
        } else {
            Err(SettlementError::NotConnected)
        }
    }
}

#[async_trait]
impl SettlementNetwork for MockNetwork {
    fn is_authenticated(&self) -> bool {
        self.authenticated.load(Ordering::SeqCst)
    }

    fn service_address(&self) -> Address {
        self.service
    }

    async fn open_session(
        &self,
        definition: &AppDefinition,
        allocations: &[Allocation],
    ) -> Result<String, SettlementError> {
        self.enter("open_session")?;
        if let Some(failure) = *self.open_failure.lock().unwrap() {
            return Err(failure.error("open_session"));
        }
        self.opened
            .lock()
            .unwrap()
            .push((definition.clone(), allocations.to_vec()));
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("0xsession{n:04}"))
    }

    async fn close_session(
        &self,
        _session_id: &str,
        _allocations: &[Allocation],
        kind: CloseKind,
    ) -> Result<String, SettlementError> {
        self.enter(kind.operation())?;
        if let Some(failure) = *self.close_failure.lock().unwrap() {
            return Err(failure.error(kind.operation()));
        }
        Ok(match kind {
            CloseKind::Transfer => TRANSFER_HASH.to_string(),
            CloseKind::Settlement => SETTLEMENT_HASH.to_string(),
        })
    }

    async fn query_channels(&self, _wallet: Address) -> Result<Vec<LiveChannel>, SettlementError> {
        self.enter("query_channels")?;
        Ok(self.live.lock().unwrap().clone())
    }

    async fn query_balances(
        &self,
        _wallet: Address,
    ) -> Result<Vec<LedgerBalance>, SettlementError> {
        self.enter("query_balances")?;
        Ok(vec![LedgerBalance {
            asset: "usdc".to_string(),
            amount: "250.0".to_string(),
        }])
    }
}

/// Test wallet that signs personal_sign messages.
pub struct Wallet {
    signer: PrivateKeySigner,
    pub address: String,
}

impl Wallet {
    pub fn random() -> Self {
        let signer = PrivateKeySigner::random();
        let address = signer.address().to_string();
        Self { signer, address }
    }

    pub fn sign(&self, message: &str) -> String {
        let sig = self.signer.sign_message_sync(message.as_bytes()).unwrap();
        sproutpay::signature::encode_signature_hex(&sig)
    }

    pub fn signed(&self, message: &str) -> SignedRequest {
        SignedRequest {
            address: self.address.clone(),
            message: message.to_string(),
            signature: self.sign(message),
        }
    }
}

pub fn terms(escrow_type: EscrowType) -> LinkTerms {
    LinkTerms {
        amount: "100.50000000".parse::<Decimal>().unwrap(),
        token: "USDC".to_string(),
        chain: "ethereum".to_string(),
        escrow_type,
        escrow_hours: match escrow_type {
            EscrowType::TimeLocked => Some(72),
            EscrowType::InstantTransfer => None,
        },
        description: Some("Logo design".to_string()),
        can_early_release: true,
        attach_work_contract: false,
        dispute_resolution: true,
        contract: None,
    }
}

pub fn machine(network: &Arc<MockNetwork>, virtual_fallback: bool) -> (Arc<Database>, StatusMachine) {
    let db = Arc::new(Database::new(":memory:").unwrap());
    let network: Arc<dyn SettlementNetwork> = network.clone();
    let machine = StatusMachine::new(db.clone(), network, virtual_fallback);
    (db, machine)
}

pub fn config(extra: &[(&str, &str)]) -> SproutConfig {
    let key = format!("0x{}", alloy::hex::encode(PrivateKeySigner::random().to_bytes()));
    let vars: Vec<(String, String)> = extra
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .chain(std::iter::once(("YELLOW_PRIVATE_KEY".to_string(), key)))
        .collect();
    SproutConfig::from_lookup(|k| {
        vars.iter()
            .find(|(name, _)| name == k)
            .map(|(_, value)| value.clone())
    })
    .unwrap()
}
