use actix_web::{web, HttpResponse};
use serde_json::{json, Value};

use sproutpay::PaymentLink;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::{AcceptBody, CreateLinkBody, DisputeBody, ReleaseBody, SendLinkBody};

/// Full link as returned by create and get, plus its share URL.
fn link_json(state: &AppState, link: &PaymentLink) -> Result<Value, ApiError> {
    let mut value = serde_json::to_value(link)
        .map_err(|e| ApiError::Internal(format!("failed to serialize payment link: {e}")))?;
    value["shareUrl"] = Value::from(state.config.share_url(&link.short_id));
    Ok(value)
}

/// POST /api/payment-links - Create a payment link
pub async fn create_link(
    body: web::Json<CreateLinkBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (link_type, signed, target, terms) = body.into_inner().validate()?;
    let link = state.machine.create(link_type, &signed, target, terms)?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "paymentLink": link_json(&state, &link)?,
    })))
}

/// POST /api/payment-links/send - Create a link the sender pays into
pub async fn send_link(
    body: web::Json<SendLinkBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (signed, receiver, terms) = body.into_inner().validate()?;
    let link = state.machine.create_send(&signed, receiver, terms)?;

    Ok(HttpResponse::Created().json(json!({
        "success": true,
        "paymentLink": link_json(&state, &link)?,
    })))
}

/// GET /api/payment-links/{id} - Link with contract and channel info
pub async fn get_link(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let view = state.machine.view(&path.into_inner())?;

    let mut link = link_json(&state, &view.link)?;
    link["contractInfo"] = match view.contract {
        Some(contract) => json!({
            "contractTerms": contract.contract_terms,
            "contractFileUrl": contract.contract_file_url,
            "contractFileName": contract.contract_file_name,
            "contractFileType": contract.contract_file_type,
            "arbitratorAddress": contract.arbitrator_address,
            "arbitrationFee": contract.arbitration_fee,
        }),
        None => Value::Null,
    };
    link["channelInfo"] = match view.channel {
        Some(channel) => json!({
            "channelId": channel.channel_id,
            "status": channel.status,
            "isVirtual": channel.is_virtual,
            "createdAt": channel.created_at,
            "settledAt": channel.settled_at,
        }),
        None => Value::Null,
    };

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "paymentLink": link,
    })))
}

/// PUT /api/payment-links/{id}/accept - Accept and open the settlement channel
pub async fn accept_link(
    path: web::Path<String>,
    body: web::Json<AcceptBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let signed = body.into_inner().validate()?;
    let accepted = state.machine.accept(&path.into_inner(), &signed).await?;
    let link = accepted.link;
    let channel = accepted.channel;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Payment link accepted successfully",
        "paymentLink": {
            "id": link.id,
            "status": link.status,
            "acceptedBy": link.accepted_by,
            "acceptedAt": link.accepted_at,
            "yellowChannelId": link.yellow_channel_id,
            "yellowNetworkStatus": link.yellow_network_status,
        },
        "yellowChannel": {
            "channelId": channel.channel_id,
            "status": channel.status,
            "participantA": channel.participant_a,
            "participantB": channel.participant_b,
            "asset": channel.asset,
            "amount": channel.total_amount,
            "isVirtual": channel.is_virtual,
        },
    })))
}

/// POST /api/payment-links/{id}/early-release - Payer releases time-locked funds early
pub async fn early_release(
    path: web::Path<String>,
    body: web::Json<ReleaseBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let signed = body.into_inner().validate()?;
    let released = state.machine.early_release(&path.into_inner(), &signed).await?;
    let link = released.link;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Funds released early by payer",
        "paymentLink": {
            "id": link.id,
            "status": link.status,
            "earlyReleasedAt": link.early_released_at,
            "earlyReleasedBy": link.early_released_by,
            "completedAt": link.completed_at,
            "yellowNetworkStatus": link.yellow_network_status,
        },
        "settlement": {
            "transactionHash": released.reference,
        },
    })))
}

/// POST /api/payment-links/{id}/release - Payer releases the funds
pub async fn release(
    path: web::Path<String>,
    body: web::Json<ReleaseBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let signed = body.into_inner().validate()?;
    let released = state.machine.release(&path.into_inner(), &signed).await?;
    let link = released.link;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Funds released successfully",
        "paymentLink": {
            "id": link.id,
            "status": link.status,
            "completedAt": link.completed_at,
            "yellowNetworkStatus": link.yellow_network_status,
        },
        "settlement": {
            "transactionHash": released.reference,
        },
    })))
}

/// POST /api/payment-links/{id}/dispute - Creator or acceptor opens a dispute
pub async fn dispute(
    path: web::Path<String>,
    body: web::Json<DisputeBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (signed, reason) = body.into_inner().validate()?;
    let dispute = state.machine.dispute(&path.into_inner(), &signed, &reason)?;
    let link = dispute.link;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Dispute initiated successfully",
        "paymentLink": {
            "id": link.id,
            "status": link.status,
            "yellowNetworkStatus": link.yellow_network_status,
        },
        "dispute": {
            "initiatedBy": dispute.initiated_by,
            "reason": dispute.reason,
            "initiatedAt": dispute.initiated_at,
        },
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/payment-links")
            .route("", web::post().to(create_link))
            .route("/send", web::post().to(send_link))
            .route("/{id}", web::get().to(get_link))
            .route("/{id}/accept", web::put().to(accept_link))
            .route("/{id}/early-release", web::post().to(early_release))
            .route("/{id}/release", web::post().to(release))
            .route("/{id}/dispute", web::post().to(dispute)),
    );
}
