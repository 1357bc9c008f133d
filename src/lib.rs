// src/lib.rs

//! # Buttplug Session
//!
//! A client for the Buttplug haptics protocol (message spec version 3), and
//! a small local server that keeps one connection to an Intiface server
//! alive and lets other programs drive the devices behind it.
//!
//! ## Architecture
//!
//! - `buttplug`: the protocol core. Messages, features, devices and the
//!   session state machine do no IO of their own; a host ticks the session
//!   and feeds it transport events. `device_manager` is that host.
//! - `intiface_socket`: WebSocket transport for the session
//! - `config`: settings from the environment and `.env`
//! - `routes` / `handlers`: HTTP and WebSocket control endpoints

pub mod config;
pub mod routes;
pub mod handlers {
    pub mod control;
    pub mod devices;
}

pub mod intiface_socket;

/// Buttplug protocol core and the device manager that drives it
pub mod buttplug {
    pub mod device;
    pub mod device_manager;
    pub mod error;
    pub mod events;
    pub mod feature;
    pub mod message;
    pub mod session;
    pub mod transport;
}
