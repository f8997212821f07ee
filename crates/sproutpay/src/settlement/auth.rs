//! ClearNode authentication: the `auth_request` parameters and the EIP-712
//! `Policy` signature that answers an `auth_challenge`.

use alloy::primitives::{Address, B256, U256};
use alloy::sol;
use alloy::sol_types::{Eip712Domain, SolStruct};
use serde_json::{json, Value};

/// Lifetime of an authenticated session.
pub const AUTH_TTL_SECS: i64 = 3600;

pub const AUTH_SCOPE: &str = "console";

sol! {
    #[derive(Debug)]
    struct Allowance {
        string asset;
        string amount;
    }

    #[derive(Debug)]
    struct Policy {
        string challenge;
        string scope;
        address wallet;
        address application;
        address participant;
        uint256 expire;
        Allowance[] allowances;
    }
}

/// Authentication parameters for one connection.
///
/// The service wallet acts as wallet, participant and application at once;
/// no allowances are granted.
#[derive(Debug, Clone)]
pub struct AuthPolicy {
    pub app_name: String,
    pub wallet: Address,
    pub expire: u64,
}

impl AuthPolicy {
    pub fn new(app_name: &str, wallet: Address, now: i64) -> Self {
        Self {
            app_name: app_name.to_string(),
            wallet,
            expire: (now + AUTH_TTL_SECS).max(0) as u64,
        }
    }

    pub fn domain(&self) -> Eip712Domain {
        Eip712Domain {
            name: Some(std::borrow::Cow::Owned(self.app_name.clone())),
            version: None,
            chain_id: None,
            verifying_contract: None,
            salt: None,
        }
    }

    /// Params of the `auth_request` message.
    pub fn request_params(&self) -> Value {
        let wallet = format!("{:#x}", self.wallet);
        json!([{
            "address": wallet,
            "session_key": wallet,
            "app_name": self.app_name,
            "allowances": [],
            "expire": self.expire.to_string(),
            "scope": AUTH_SCOPE,
            "application": wallet,
        }])
    }

    /// EIP-712 hash the wallet signs to answer `challenge`.
    pub fn signing_hash(&self, challenge: &str) -> B256 {
        let policy = Policy {
            challenge: challenge.to_string(),
            scope: AUTH_SCOPE.to_string(),
            wallet: self.wallet,
            application: self.wallet,
            participant: self.wallet,
            expire: U256::from(self.expire),
            allowances: Vec::new(),
        };
        policy.eip712_signing_hash(&self.domain())
    }
}
