pub mod channels;
pub mod health;
pub mod payment_links;

use actix_web::web;

use crate::error::ApiError;

/// JSON extractor config: 64 KiB bodies, rejections in the API error shape.
pub fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .limit(64 * 1024)
        .error_handler(|err, _req| ApiError::Validation(err.to_string()).into())
}

/// Mount every API route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(payment_links::configure)
        .configure(channels::configure);
}
