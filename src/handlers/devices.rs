// src/handlers/devices.rs

//! JSON view of the device manager's state.

use actix_web::{HttpResponse, Responder};
use log::{error, info};

use crate::buttplug::device_manager;

/// Lists the connection state and every device seen this run.
pub async fn get_devices() -> impl Responder {
    info!("Serving device status");
    match device_manager::status() {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => {
            error!("Device status unavailable: {}", e);
            HttpResponse::ServiceUnavailable().body(e.to_string())
        }
    }
}
