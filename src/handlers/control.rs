// src/handlers/control.rs

//! WebSocket endpoint for driving devices from a local client.
//!
//! Each text frame is one command:
//!
//! - a bare number sets the oscillation level, clamped to `0.0..=1.0`
//! - `vibrate|rotate|oscillate|constrict|inflate|position <value> [duration]`
//! - `stop`, `scan`, `stop-scan`

use actix::{Actor, ActorContext, StreamHandler};
use actix_web::{web, Error, HttpRequest, HttpResponse};
use actix_web_actors::ws;
use log::{error, info, warn};

use crate::buttplug::device_manager::{self, ControlCommand};
use crate::buttplug::feature::FeatureType;

/// A parsed control frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlRequest {
    /// Latest-value oscillation, the player's normal input.
    Oscillate(f64),
    Command(ControlCommand),
}

/// Parses one control frame, or explains why it is not one.
pub fn parse_control_command(text: &str) -> Result<ControlRequest, String> {
    let text = text.trim();
    if let Ok(value) = text.parse::<f64>() {
        return Ok(ControlRequest::Oscillate(value.clamp(0.0, 1.0)));
    }

    let mut words = text.split_whitespace();
    let verb = words.next().ok_or_else(|| "empty command".to_string())?;
    let command = match verb {
        "stop" => ControlCommand::StopAll,
        "scan" => ControlCommand::StartScanning,
        "stop-scan" => ControlCommand::StopScanning,
        _ => {
            let feature_type = FeatureType::ACTUATORS
                .into_iter()
                .find(|t| t.as_str().eq_ignore_ascii_case(verb))
                .ok_or_else(|| format!("unknown command `{}`", verb))?;
            let value = parse_number(words.next(), "value")?;
            let duration = match words.next() {
                Some(word) => parse_number(Some(word), "duration")?,
                None => 0.0,
            };
            let (min, max) = if feature_type == FeatureType::Rotate {
                (-1.0, 1.0)
            } else {
                (0.0, 1.0)
            };
            ControlCommand::Actuate {
                feature_type,
                value: value.clamp(min, max),
                duration,
            }
        }
    };
    if let Some(extra) = words.next() {
        return Err(format!("unexpected `{}`", extra));
    }
    Ok(ControlRequest::Command(command))
}

fn parse_number(word: Option<&str>, what: &str) -> Result<f64, String> {
    let word = word.ok_or_else(|| format!("missing {}", what))?;
    word.parse::<f64>()
        .ok()
        .filter(|n| n.is_finite())
        .ok_or_else(|| format!("invalid {} `{}`", what, word))
}

pub struct ControlSocket;

impl Actor for ControlSocket {
    type Context = ws::WebsocketContext<Self>;
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for ControlSocket {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                let result = match parse_control_command(&text) {
                    Ok(ControlRequest::Oscillate(value)) => {
                        device_manager::oscillate(value).map_err(|e| e.to_string())
                    }
                    Ok(ControlRequest::Command(command)) => {
                        device_manager::send_command(command).map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e),
                };
                if let Err(e) = result {
                    warn!("Rejected control frame {:?}: {}", text.to_string(), e);
                    ctx.text(format!("error: {}", e));
                }
            }
            Ok(ws::Message::Ping(msg)) => ctx.pong(&msg),
            Ok(ws::Message::Close(reason)) => {
                ctx.close(reason);
                ctx.stop();
            }
            Err(e) => {
                error!("Control socket protocol error: {}", e);
                ctx.stop();
            }
            _ => {}
        }
    }
}

pub async fn handle_ws_start(
    req: HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, Error> {
    info!("Control socket connection attempt");
    match ws::start(ControlSocket, &req, stream) {
        Ok(response) => {
            info!("Control socket connection established");
            Ok(response)
        }
        Err(e) => {
            error!("Control socket error: {}", e);
            Err(e)
        }
    }
}
