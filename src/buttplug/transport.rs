// src/buttplug/transport.rs

//! The duplex text-frame connection a session talks through.
//!
//! A transport only starts things. Everything it observes (the socket
//! opening, frames arriving, errors, closure) is handed back to the session
//! as a [`TransportEvent`] on the session's own thread of control.

use super::error::TransportError;

/// Normal client-initiated close.
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// The server broke the protocol.
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

pub trait Transport {
    /// Starts connecting to `url`. Success is reported later as
    /// [`TransportEvent::Opened`].
    fn open(&mut self, url: &str) -> Result<(), TransportError>;

    fn send(&mut self, text: String) -> Result<(), TransportError>;

    fn close(&mut self, code: u16, reason: &str);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed {
        code: u16,
        reason: String,
        was_clean: bool,
    },
}
