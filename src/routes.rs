// src/routes.rs

//! Route configuration for the local control server.

use actix_web::web;
use crate::handlers::{control, devices};

/// Configures all routes for the web server.
///
/// # Routes
/// - `/ws` - WebSocket endpoint for device control
/// - `/devices` - JSON status of the session and its devices
pub fn setup_routes(cfg: &mut web::ServiceConfig) {
    cfg
        .service(
            web::resource("/ws")
                .route(web::get().to(control::handle_ws_start))
        )
        .route("/devices", web::get().to(devices::get_devices));
}
