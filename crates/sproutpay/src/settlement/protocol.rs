//! Nitrolite RPC wire format.
//!
//! Requests: `{"req":[id, method, params, timestamp], "sig":[signature]}`.
//! Responses: `{"res":[id, method, params, timestamp], "sig":[...]}`.
//!
//! Inbound frames are parsed into [`RpcResponse`] here so nothing past this
//! module touches raw JSON.

use alloy::primitives::{keccak256, B256};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

pub mod method {
    pub const AUTH_REQUEST: &str = "auth_request";
    pub const AUTH_CHALLENGE: &str = "auth_challenge";
    pub const AUTH_VERIFY: &str = "auth_verify";
    pub const CREATE_APP_SESSION: &str = "create_app_session";
    pub const CLOSE_APP_SESSION: &str = "close_app_session";
    pub const GET_CHANNELS: &str = "get_channels";
    pub const GET_LEDGER_BALANCES: &str = "get_ledger_balances";
    pub const ERROR: &str = "error";
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed frame: {0}")]
    Malformed(&'static str),
}

/// Outbound request payload.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub id: u64,
    pub method: &'static str,
    pub params: Value,
    pub timestamp: u64,
}

impl RpcRequest {
    pub fn new(id: u64, method: &'static str, params: Value) -> Self {
        Self {
            id,
            method,
            params,
            timestamp: chrono::Utc::now().timestamp_millis().max(0) as u64,
        }
    }

    /// The `req` array exactly as it is sent and signed.
    pub fn payload(&self) -> Value {
        json!([self.id, self.method, self.params, self.timestamp])
    }

    /// `keccak256` of the serialized `req` array.
    pub fn signing_hash(&self) -> B256 {
        keccak256(self.payload().to_string().as_bytes())
    }

    pub fn to_frame(&self, signatures: &[String]) -> String {
        json!({ "req": self.payload(), "sig": signatures }).to_string()
    }
}

/// Channel as reported by `get_channels`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveChannel {
    pub channel_id: String,
    pub status: String,
    #[serde(default)]
    pub participant: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

/// Balance entry from `get_ledger_balances`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerBalance {
    pub asset: String,
    #[serde(deserialize_with = "string_or_number")]
    pub amount: String,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Inbound message, validated at the boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcResponse {
    AuthChallenge {
        challenge_message: String,
    },
    AuthVerify {
        success: bool,
    },
    CreateAppSession {
        app_session_id: String,
    },
    CloseAppSession {
        transaction_hash: Option<String>,
    },
    GetChannels(Vec<LiveChannel>),
    GetLedgerBalances(Vec<LedgerBalance>),
    Error {
        message: String,
    },
    /// Anything the client does not act on (e.g. balance update pushes).
    Other {
        method: String,
    },
}

impl RpcResponse {
    pub fn method(&self) -> &str {
        match self {
            RpcResponse::AuthChallenge { .. } => method::AUTH_CHALLENGE,
            RpcResponse::AuthVerify { .. } => method::AUTH_VERIFY,
            RpcResponse::CreateAppSession { .. } => method::CREATE_APP_SESSION,
            RpcResponse::CloseAppSession { .. } => method::CLOSE_APP_SESSION,
            RpcResponse::GetChannels(_) => method::GET_CHANNELS,
            RpcResponse::GetLedgerBalances(_) => method::GET_LEDGER_BALANCES,
            RpcResponse::Error { .. } => method::ERROR,
            RpcResponse::Other { method } => method,
        }
    }
}

/// A parsed response plus the request id it answers.
#[derive(Debug, Clone, PartialEq)]
pub struct RpcEnvelope {
    pub request_id: u64,
    pub response: RpcResponse,
}

#[derive(Deserialize)]
struct ChallengeParams {
    challenge_message: String,
}

#[derive(Deserialize)]
struct VerifyParams {
    #[serde(default)]
    success: bool,
}

#[derive(Deserialize)]
struct CreateSessionParams {
    app_session_id: String,
}

#[derive(Deserialize)]
struct CloseSessionParams {
    #[serde(default)]
    transaction_hash: Option<String>,
}

pub fn parse_response(text: &str) -> Result<RpcEnvelope, ProtocolError> {
    let frame: Value = serde_json::from_str(text)?;
    let res = frame
        .get("res")
        .and_then(Value::as_array)
        .ok_or(ProtocolError::Malformed("missing res array"))?;

    if res.len() < 3 {
        return Err(ProtocolError::Malformed("res array too short"));
    }

    let request_id = res[0]
        .as_u64()
        .ok_or(ProtocolError::Malformed("request id is not an integer"))?;
    let method_name = res[1]
        .as_str()
        .ok_or(ProtocolError::Malformed("method is not a string"))?;
    let params = &res[2];

    let response = match method_name {
        method::AUTH_CHALLENGE => {
            let p: ChallengeParams = serde_json::from_value(first_object(params))?;
            RpcResponse::AuthChallenge {
                challenge_message: p.challenge_message,
            }
        }
        method::AUTH_VERIFY => {
            let p: VerifyParams = serde_json::from_value(first_object(params))?;
            RpcResponse::AuthVerify { success: p.success }
        }
        method::CREATE_APP_SESSION => {
            let p: CreateSessionParams = serde_json::from_value(first_object(params))?;
            RpcResponse::CreateAppSession {
                app_session_id: p.app_session_id,
            }
        }
        method::CLOSE_APP_SESSION => {
            let p: CloseSessionParams = serde_json::from_value(first_object(params))?;
            RpcResponse::CloseAppSession {
                transaction_hash: p.transaction_hash.filter(|h| !h.is_empty()),
            }
        }
        method::GET_CHANNELS => {
            RpcResponse::GetChannels(serde_json::from_value(list(params, "channels"))?)
        }
        method::GET_LEDGER_BALANCES => RpcResponse::GetLedgerBalances(serde_json::from_value(
            list(params, "ledger_balances"),
        )?),
        method::ERROR => RpcResponse::Error {
            message: error_message(params),
        },
        other => RpcResponse::Other {
            method: other.to_string(),
        },
    };

    Ok(RpcEnvelope {
        request_id,
        response,
    })
}

/// Params arrive either as an object or as a one-element array wrapping it.
fn first_object(params: &Value) -> Value {
    match params {
        Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

/// List results arrive bare, wrapped in an object under `key`, or wrapped in
/// a one-element array holding either of those.
fn list(params: &Value, key: &str) -> Value {
    match params {
        Value::Array(items) => match items.as_slice() {
            [Value::Array(inner)] => Value::Array(inner.clone()),
            [Value::Object(obj)] if obj.contains_key(key) => obj[key].clone(),
            _ => params.clone(),
        },
        Value::Object(obj) => obj.get(key).cloned().unwrap_or(Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    }
}

fn error_message(params: &Value) -> String {
    let inner = first_object(params);
    match &inner {
        Value::String(s) => s.clone(),
        Value::Object(obj) => obj
            .get("error")
            .or_else(|| obj.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| inner.to_string()),
        _ => inner.to_string(),
    }
}
