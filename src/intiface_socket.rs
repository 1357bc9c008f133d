// src/intiface_socket.rs

//! WebSocket transport to an Intiface / Buttplug server.
//!
//! The socket lives in its own tokio task. Outbound frames reach it over a
//! channel, and everything it observes comes back as [`TransportEvent`]s on
//! the receiver returned by [`IntifaceSocket::new`], for the session's owner
//! to feed into the session.

use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::buttplug::error::TransportError;
use crate::buttplug::transport::{Transport, TransportEvent};

/// Close code reported when the server closes without giving one.
const NO_STATUS_RECEIVED: u16 = 1005;
/// Close code reported when the connection drops without a close frame.
const ABNORMAL_CLOSURE: u16 = 1006;

enum Outgoing {
    Frame(String),
    Close(u16, String),
}

pub struct IntifaceSocket {
    events: UnboundedSender<TransportEvent>,
    outgoing: Option<UnboundedSender<Outgoing>>,
    task: Option<JoinHandle<()>>,
}

impl IntifaceSocket {
    pub fn new() -> (Self, UnboundedReceiver<TransportEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let socket = Self {
            events,
            outgoing: None,
            task: None,
        };
        (socket, receiver)
    }
}

impl Transport for IntifaceSocket {
    fn open(&mut self, url: &str) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::Open(e.to_string()))?;
        if let Some(previous) = self.task.take() {
            previous.abort();
        }

        let (outgoing, commands) = mpsc::unbounded_channel();
        let events = self.events.clone();
        let url = url.to_string();
        self.task = Some(runtime.spawn(run_socket(url, commands, events)));
        self.outgoing = Some(outgoing);
        Ok(())
    }

    fn send(&mut self, text: String) -> Result<(), TransportError> {
        let outgoing = self.outgoing.as_ref().ok_or(TransportError::NotOpen)?;
        outgoing
            .send(Outgoing::Frame(text))
            .map_err(|_| TransportError::Send("socket task has stopped".to_string()))
    }

    fn close(&mut self, code: u16, reason: &str) {
        if let Some(outgoing) = self.outgoing.take() {
            // The task may already be gone, which is as closed as it gets.
            let _ = outgoing.send(Outgoing::Close(code, reason.to_string()));
        }
    }
}

impl Drop for IntifaceSocket {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run_socket(
    url: String,
    mut commands: UnboundedReceiver<Outgoing>,
    events: UnboundedSender<TransportEvent>,
) {
    let stream = match connect_async(url.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            warn!("Could not connect to {}: {}", url, e);
            let _ = events.send(TransportEvent::Error(e.to_string()));
            return;
        }
    };
    debug!("WebSocket connected to {}", url);
    let _ = events.send(TransportEvent::Opened);

    let (mut sink, mut stream) = stream.split();
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Outgoing::Frame(text)) => {
                    if let Err(e) = sink.send(WsMessage::Text(text)).await {
                        let _ = events.send(TransportEvent::Error(e.to_string()));
                        break;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.into(),
                    };
                    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
                        trace!("Close frame not delivered: {}", e);
                    }
                    break;
                }
                None => {
                    let _ = sink.close().await;
                    break;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.into_owned()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    let _ = events.send(TransportEvent::Closed { code, reason, was_clean: true });
                    break;
                }
                Some(Ok(other)) => trace!("Ignoring non-text frame: {:?}", other),
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::Error(e.to_string()));
                    break;
                }
                None => {
                    let _ = events.send(TransportEvent::Closed {
                        code: ABNORMAL_CLOSURE,
                        reason: "connection dropped".to_string(),
                        was_clean: false,
                    });
                    break;
                }
            },
        }
    }
    debug!("WebSocket to {} finished", url);
}
