use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;
use crate::validation::SettleBody;

/// GET /api/channels/{channelId}/status - Stored channel, refreshed from the network
pub async fn channel_status(
    path: web::Path<String>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let view = state.machine.channel_status(&path.into_inner()).await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "channel": view.channel,
        "liveStatus": view.live_status,
        "linkStatus": view.link_status,
    })))
}

/// POST /api/channels/{channelId}/settle - Cross-chain settlement, signed by the payer
pub async fn settle_channel(
    path: web::Path<String>,
    body: web::Json<SettleBody>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let (signed, target_chain) = body.into_inner().validate()?;
    let settled = state
        .machine
        .settle_channel(&path.into_inner(), &signed, &target_chain)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Channel settled successfully",
        "settlement": {
            "channelId": settled.channel.channel_id,
            "status": settled.channel.status,
            "targetChain": settled.target_chain,
            "transactionHash": settled.reference,
            "balances": settled.balances,
            "settledAt": settled.channel.settled_at,
        },
    })))
}

/// GET /api/channels/stats - Channel counts by status
pub async fn channel_stats(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let stats = state.machine.channel_stats()?;

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "stats": {
            "totalChannels": stats.total_channels,
            "activeChannels": stats.active_channels,
            "settledChannels": stats.settled_channels,
            "failedChannels": stats.failed_channels,
            "lastUpdate": chrono::Utc::now().to_rfc3339(),
        },
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/channels")
            .route("/stats", web::get().to(channel_stats))
            .route("/{channel_id}/status", web::get().to(channel_status))
            .route("/{channel_id}/settle", web::post().to(settle_channel)),
    );
}
