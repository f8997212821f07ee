//! Request bodies and their shape checks.
//!
//! Handlers deserialize into these types, then call `validate` to get the
//! domain inputs the status machine works with. Business rules (status,
//! roles, expiry) live in the machine, not here.

use rust_decimal::Decimal;
use serde::Deserialize;
use url::Url;

use sproutpay::security::is_address_format;
use sproutpay::{ContractFileType, EscrowType, LinkType};

use crate::db::NewContract;
use crate::error::ApiError;
use crate::machine::{LinkTerms, SignedRequest};

pub const MAX_ESCROW_HOURS: u32 = 8760;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const DISPUTE_REASON_LEN: std::ops::RangeInclusive<usize> = 10..=500;
pub const TARGET_CHAIN_LEN: std::ops::RangeInclusive<usize> = 1..=50;

fn default_true() -> bool {
    true
}

/// Payment terms shared by both create flows.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TermsBody {
    pub amount: String,
    pub token: String,
    pub chain: String,
    pub escrow_type: EscrowType,
    pub escrow_hours: Option<u32>,
    pub description: Option<String>,
    #[serde(default)]
    pub attach_work_contract: bool,
    pub contract_terms: Option<String>,
    pub contract_file_url: Option<String>,
    pub contract_file_name: Option<String>,
    pub contract_file_type: Option<ContractFileType>,
    #[serde(default)]
    pub dispute_resolution: bool,
    pub arbitrator_address: Option<String>,
    pub arbitration_fee: Option<String>,
    #[serde(default = "default_true")]
    pub allow_early_release: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkBody {
    pub link_type: LinkType,
    pub creator_address: String,
    pub signature: String,
    pub message: String,
    pub target_address: Option<String>,
    #[serde(flatten)]
    pub terms: TermsBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendLinkBody {
    pub sender_address: String,
    pub signature: String,
    pub message: String,
    pub receiver_address: Option<String>,
    #[serde(flatten)]
    pub terms: TermsBody,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptBody {
    pub acceptor_address: String,
    pub signature: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseBody {
    pub releaser_address: String,
    pub signature: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisputeBody {
    pub disputer_address: String,
    pub signature: String,
    pub message: String,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettleBody {
    pub sender_address: String,
    pub signature: String,
    pub message: String,
    pub target_chain: String,
}

impl CreateLinkBody {
    pub fn validate(self) -> Result<(LinkType, SignedRequest, Option<String>, LinkTerms), ApiError> {
        let signed = signed("creatorAddress", self.creator_address, self.signature, self.message)?;
        let target = optional_address("targetAddress", self.target_address)?;
        Ok((self.link_type, signed, target, self.terms.validate()?))
    }
}

impl SendLinkBody {
    pub fn validate(self) -> Result<(SignedRequest, Option<String>, LinkTerms), ApiError> {
        let signed = signed("senderAddress", self.sender_address, self.signature, self.message)?;
        let receiver = optional_address("receiverAddress", self.receiver_address)?;
        Ok((signed, receiver, self.terms.validate()?))
    }
}

impl AcceptBody {
    pub fn validate(self) -> Result<SignedRequest, ApiError> {
        signed("acceptorAddress", self.acceptor_address, self.signature, self.message)
    }
}

impl ReleaseBody {
    pub fn validate(self) -> Result<SignedRequest, ApiError> {
        signed("releaserAddress", self.releaser_address, self.signature, self.message)
    }
}

impl DisputeBody {
    pub fn validate(self) -> Result<(SignedRequest, String), ApiError> {
        let reason = self.reason.trim().to_string();
        if !DISPUTE_REASON_LEN.contains(&reason.chars().count()) {
            return Err(ApiError::Validation(
                "reason must be between 10 and 500 characters".to_string(),
            ));
        }
        let signed = signed("disputerAddress", self.disputer_address, self.signature, self.message)?;
        Ok((signed, reason))
    }
}

impl SettleBody {
    pub fn validate(self) -> Result<(SignedRequest, String), ApiError> {
        let chain = self.target_chain.trim().to_string();
        if !TARGET_CHAIN_LEN.contains(&chain.chars().count()) {
            return Err(ApiError::Validation(
                "targetChain must be between 1 and 50 characters".to_string(),
            ));
        }
        let signed = signed("senderAddress", self.sender_address, self.signature, self.message)?;
        Ok((signed, chain))
    }
}

impl TermsBody {
    pub fn validate(self) -> Result<LinkTerms, ApiError> {
        let amount = parse_amount("amount", &self.amount)?;
        if amount.is_zero() {
            return Err(ApiError::Validation("amount must be greater than zero".to_string()));
        }

        let token = self.token.trim().to_string();
        if !(2..=10).contains(&token.chars().count()) {
            return Err(ApiError::Validation(
                "token must be between 2 and 10 characters".to_string(),
            ));
        }

        let chain = self.chain.trim().to_string();
        if !(3..=20).contains(&chain.chars().count()) {
            return Err(ApiError::Validation(
                "chain must be between 3 and 20 characters".to_string(),
            ));
        }

        if let Some(hours) = self.escrow_hours {
            if !(1..=MAX_ESCROW_HOURS).contains(&hours) {
                return Err(ApiError::Validation(format!(
                    "escrowHours must be between 1 and {MAX_ESCROW_HOURS}"
                )));
            }
        }

        if let Some(ref description) = self.description {
            if description.chars().count() > MAX_DESCRIPTION_LEN {
                return Err(ApiError::Validation(format!(
                    "description must be at most {MAX_DESCRIPTION_LEN} characters"
                )));
            }
        }

        if let Some(ref url) = self.contract_file_url {
            Url::parse(url)
                .map_err(|_| ApiError::Validation("contractFileUrl is not a valid URL".to_string()))?;
        }

        let arbitrator_address = optional_address("arbitratorAddress", self.arbitrator_address)?;
        let arbitration_fee = self
            .arbitration_fee
            .as_deref()
            .map(|fee| parse_amount("arbitrationFee", fee))
            .transpose()?;

        let contract = NewContract {
            contract_terms: self.contract_terms.filter(|t| !t.trim().is_empty()),
            contract_file_url: self.contract_file_url,
            contract_file_name: self.contract_file_name,
            contract_file_type: self.contract_file_type,
            arbitrator_address,
            arbitration_fee,
        };

        Ok(LinkTerms {
            amount,
            token,
            chain,
            escrow_type: self.escrow_type,
            escrow_hours: self.escrow_hours,
            description: self.description,
            can_early_release: self.allow_early_release,
            attach_work_contract: self.attach_work_contract,
            dispute_resolution: self.dispute_resolution,
            contract: (self.attach_work_contract && contract.has_content()).then_some(contract),
        })
    }
}

fn signed(
    field: &str,
    address: String,
    signature: String,
    message: String,
) -> Result<SignedRequest, ApiError> {
    if !is_address_format(&address) {
        return Err(ApiError::Validation(format!("{field} is not a valid wallet address")));
    }
    if signature.is_empty() || message.is_empty() {
        return Err(ApiError::Validation(
            "signature and message are required".to_string(),
        ));
    }
    Ok(SignedRequest {
        address,
        signature,
        message,
    })
}

fn optional_address(field: &str, address: Option<String>) -> Result<Option<String>, ApiError> {
    match address {
        Some(a) if !is_address_format(&a) => Err(ApiError::Validation(format!(
            "{field} is not a valid wallet address"
        ))),
        other => Ok(other),
    }
}

/// Digits with at most one decimal point, e.g. `100`, `0.01`, `5.`.
fn parse_amount(field: &str, raw: &str) -> Result<Decimal, ApiError> {
    let invalid = || ApiError::Validation(format!("{field} must be a non-negative decimal number"));

    let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));
    if whole.is_empty()
        || !whole.bytes().all(|b| b.is_ascii_digit())
        || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    Decimal::from_str_exact(raw.trim_end_matches('.')).map_err(|_| {
        ApiError::Validation(format!(
            "{field} has more precision than can be stored exactly"
        ))
    })
}
