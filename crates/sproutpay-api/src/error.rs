use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::{json, Value};
use std::fmt;

use sproutpay::settlement::SettlementError;
use sproutpay::{LinkStatus, LinkType, PaymentLink};

#[derive(Debug)]
pub enum ApiError {
    /// Request body failed validation
    Validation(String),
    /// Wallet signature does not match the claimed address
    InvalidSignature,
    /// Time-locked escrow without escrow hours
    MissingEscrowHours,
    /// Every short id candidate collided
    IdGenerationExhausted,
    /// No link with that id or short id
    NotFound(String),
    /// No settlement channel with that id
    ChannelNotFound(String),
    /// Link is past its expiry
    Expired,
    /// Link already left the acceptable states
    AlreadyProcessed { current: LinkStatus },
    /// Operation not allowed from the link's current status
    InvalidTransition {
        current: LinkStatus,
        target: LinkStatus,
    },
    /// Acceptor is not the link's target address
    NotIntendedAcceptor { link_type: LinkType },
    SelfAcceptanceForbidden,
    /// Caller is not the paying side of the link
    NotPayer,
    /// Caller is neither creator nor acceptor
    NotParticipant,
    EarlyReleaseNotAllowed(String),
    DisputeNotEnabled,
    /// Link has no settlement channel
    NoChannel,
    /// Channel is a local placeholder and cannot settle through the network
    VirtualChannel { channel_id: String },
    /// Opening the settlement session failed after the link was locked
    ChannelSetupFailed {
        link: Box<PaymentLink>,
        reason: SettlementError,
    },
    /// A settlement network call failed
    Settlement(SettlementError),
    /// Failure of an operation on a loaded link, reported with the link's
    /// status at the time
    Link {
        current: LinkStatus,
        error: Box<ApiError>,
    },
    /// Database error
    Database(rusqlite::Error),
    /// Internal error
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "validation failed: {}", msg),
            ApiError::InvalidSignature => write!(f, "invalid wallet signature"),
            ApiError::MissingEscrowHours => {
                write!(f, "escrow hours are required for time-locked escrow")
            }
            ApiError::IdGenerationExhausted => write!(f, "could not generate a unique short id"),
            ApiError::NotFound(key) => write!(f, "payment link not found: {}", key),
            ApiError::ChannelNotFound(id) => write!(f, "channel not found: {}", id),
            ApiError::Expired => write!(f, "payment link has expired"),
            ApiError::AlreadyProcessed { current } => {
                write!(f, "payment link already processed (status {})", current)
            }
            ApiError::InvalidTransition { current, target } => {
                write!(f, "cannot move payment link from {} to {}", current, target)
            }
            ApiError::NotIntendedAcceptor { link_type } => match link_type {
                LinkType::Receiver => write!(f, "you are not the intended payer for this link"),
                LinkType::Payer => write!(f, "you are not the intended recipient for this link"),
            },
            ApiError::SelfAcceptanceForbidden => {
                write!(f, "cannot accept your own payment link")
            }
            ApiError::NotPayer => write!(f, "only the payer can release funds"),
            ApiError::NotParticipant => {
                write!(f, "only the link creator or acceptor can do this")
            }
            ApiError::EarlyReleaseNotAllowed(msg) => {
                write!(f, "early release not allowed: {}", msg)
            }
            ApiError::DisputeNotEnabled => {
                write!(f, "dispute resolution is not enabled for this link")
            }
            ApiError::NoChannel => write!(f, "no settlement channel found for this link"),
            ApiError::VirtualChannel { channel_id } => write!(
                f,
                "channel {} is a placeholder and cannot be settled through the network",
                channel_id
            ),
            ApiError::ChannelSetupFailed { reason, .. } => {
                write!(f, "failed to set up settlement channel: {}", reason)
            }
            ApiError::Settlement(e) => write!(f, "settlement failed: {}", e),
            ApiError::Link { error, .. } => write!(f, "{}", error),
            ApiError::Database(e) => write!(f, "database error: {}", e),
            ApiError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<rusqlite::Error> for ApiError {
    fn from(e: rusqlite::Error) -> Self {
        ApiError::Database(e)
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        ApiError::Settlement(e)
    }
}

impl ApiError {
    /// Attach the link's current status. Errors that already report a
    /// status, and internal failures, are returned as they are.
    pub fn on_link(self, current: LinkStatus) -> ApiError {
        match self {
            ApiError::AlreadyProcessed { .. }
            | ApiError::InvalidTransition { .. }
            | ApiError::ChannelSetupFailed { .. }
            | ApiError::Link { .. }
            | ApiError::Database(_)
            | ApiError::Internal(_) => self,
            other => ApiError::Link {
                current,
                error: Box::new(other),
            },
        }
    }

    /// The underlying error, without link context.
    pub fn cause(&self) -> &ApiError {
        match self {
            ApiError::Link { error, .. } => error.cause(),
            other => other,
        }
    }

    /// Link status reported alongside this error, if any.
    pub fn current_status(&self) -> Option<LinkStatus> {
        match self {
            ApiError::AlreadyProcessed { current }
            | ApiError::InvalidTransition { current, .. }
            | ApiError::Link { current, .. } => Some(*current),
            ApiError::ChannelSetupFailed { link, .. } => Some(link.status),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Link { error, .. } => error.kind(),
            ApiError::Validation(_) => "validation_error",
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::MissingEscrowHours => "missing_escrow_hours",
            ApiError::IdGenerationExhausted => "id_generation_exhausted",
            ApiError::NotFound(_) | ApiError::ChannelNotFound(_) => "not_found",
            ApiError::Expired => "expired",
            ApiError::AlreadyProcessed { .. } => "already_processed",
            ApiError::InvalidTransition { .. } => "invalid_transition",
            ApiError::NotIntendedAcceptor { .. } => "not_intended_acceptor",
            ApiError::SelfAcceptanceForbidden => "self_acceptance_forbidden",
            ApiError::NotPayer => "not_payer",
            ApiError::NotParticipant => "not_participant",
            ApiError::EarlyReleaseNotAllowed(_) => "early_release_not_allowed",
            ApiError::DisputeNotEnabled => "dispute_not_enabled",
            ApiError::NoChannel => "no_channel",
            ApiError::VirtualChannel { .. } => "virtual_channel",
            ApiError::ChannelSetupFailed { .. } => "channel_setup_failed",
            ApiError::Settlement(SettlementError::NotConnected) => "settlement_unavailable",
            ApiError::Settlement(SettlementError::Timeout { .. }) => "settlement_timeout",
            ApiError::Settlement(_) => "settlement_failed",
            ApiError::Database(_) | ApiError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to return to callers.
    fn public_message(&self) -> String {
        match self {
            ApiError::Link { error, .. } => error.public_message(),
            ApiError::Settlement(SettlementError::NotConnected) => {
                "Settlement network is unavailable, try again shortly".to_string()
            }
            ApiError::Settlement(SettlementError::Timeout { .. }) => {
                "Settlement network did not respond in time".to_string()
            }
            ApiError::Settlement(SettlementError::Rejected(reason)) => {
                format!("Settlement network rejected the request: {}", reason)
            }
            ApiError::Settlement(_) => "Settlement failed".to_string(),
            ApiError::ChannelSetupFailed { .. } => {
                "Failed to set up settlement channel".to_string()
            }
            ApiError::Database(_) | ApiError::Internal(_) => {
                "An internal error occurred".to_string()
            }
            other => capitalize(&other.to_string()),
        }
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Link { error, .. } => error.status_code(),
            ApiError::Validation(_)
            | ApiError::MissingEscrowHours
            | ApiError::SelfAcceptanceForbidden
            | ApiError::EarlyReleaseNotAllowed(_)
            | ApiError::DisputeNotEnabled
            | ApiError::NoChannel => StatusCode::BAD_REQUEST,
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::NotIntendedAcceptor { .. } | ApiError::NotPayer | ApiError::NotParticipant => {
                StatusCode::FORBIDDEN
            }
            ApiError::NotFound(_) | ApiError::ChannelNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::AlreadyProcessed { .. }
            | ApiError::InvalidTransition { .. }
            | ApiError::VirtualChannel { .. } => StatusCode::CONFLICT,
            ApiError::Expired => StatusCode::GONE,
            ApiError::ChannelSetupFailed { .. } => StatusCode::BAD_GATEWAY,
            ApiError::Settlement(SettlementError::NotConnected) | ApiError::IdGenerationExhausted => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ApiError::Settlement(SettlementError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Settlement(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        match self.cause() {
            ApiError::Database(e) => tracing::error!("Database error: {}", e),
            ApiError::Internal(msg) => tracing::error!("Internal error: {}", msg),
            ApiError::ChannelSetupFailed { link, reason } => {
                tracing::error!(link_id = %link.id, error = %reason, "channel setup failed")
            }
            ApiError::Settlement(e) => tracing::warn!(error = %e, "settlement call failed"),
            _ => {}
        }

        let mut body = json!({
            "success": false,
            "error": self.kind(),
            "message": self.public_message(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(current) = self.current_status() {
            body["currentStatus"] = Value::from(current.as_str());
        }
        match self.cause() {
            ApiError::ChannelSetupFailed { link, .. } => {
                body["paymentLink"] = json!({
                    "id": link.id,
                    "shortId": link.short_id,
                    "status": link.status,
                });
            }
            ApiError::VirtualChannel { channel_id } => {
                body["channelId"] = Value::from(channel_id.as_str());
            }
            _ => {}
        }

        HttpResponse::build(self.status_code()).json(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    async fn body_of(err: ApiError) -> (StatusCode, Value) {
        let resp = err.error_response();
        let status = resp.status();
        let bytes = to_bytes(resp.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[actix_rt::test]
    async fn conflict_carries_current_status() {
        let (status, body) = body_of(ApiError::AlreadyProcessed {
            current: LinkStatus::ChannelActive,
        })
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "already_processed");
        assert_eq!(body["currentStatus"], "channel_active");
        assert!(body["timestamp"].is_string());
    }

    #[actix_rt::test]
    async fn database_errors_are_generic() {
        let (status, body) = body_of(ApiError::Database(rusqlite::Error::InvalidQuery)).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "internal_error");
        assert_eq!(body["message"], "An internal error occurred");
    }

    #[actix_rt::test]
    async fn settlement_errors_map_by_cause() {
        let (status, body) = body_of(ApiError::Settlement(SettlementError::NotConnected)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "settlement_unavailable");

        let (status, _) = body_of(ApiError::Settlement(SettlementError::Timeout {
            operation: "transfer",
        }))
        .await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);

        let (status, body) =
            body_of(ApiError::Settlement(SettlementError::Rejected("nope".into()))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "settlement_failed");
    }

    #[actix_rt::test]
    async fn link_errors_report_current_status() {
        let err = ApiError::NotPayer.on_link(LinkStatus::FundsLocked);
        assert!(matches!(err.cause(), ApiError::NotPayer));
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "not_payer");
        assert_eq!(body["currentStatus"], "funds_locked");

        let err = ApiError::Settlement(SettlementError::Timeout {
            operation: "settlement",
        })
        .on_link(LinkStatus::ChannelActive);
        let (status, body) = body_of(err).await;
        assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(body["error"], "settlement_timeout");
        assert_eq!(body["currentStatus"], "channel_active");

        // an explicit status is not overwritten
        let err = ApiError::AlreadyProcessed {
            current: LinkStatus::Disputed,
        }
        .on_link(LinkStatus::Created);
        assert_eq!(err.current_status(), Some(LinkStatus::Disputed));

        let (_, body) = body_of(ApiError::Internal("boom".into()).on_link(LinkStatus::Created)).await;
        assert!(body.get("currentStatus").is_none());
    }

    #[actix_rt::test]
    async fn acceptor_message_depends_on_link_type() {
        let (status, body) = body_of(ApiError::NotIntendedAcceptor {
            link_type: LinkType::Receiver,
        })
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["message"]
            .as_str()
            .unwrap()
            .contains("not the intended payer"));
    }
}
