//! Adapts an axum `WebSocket` to `fleet_session::Transport`, the
//! capability set `{ReadFrame, WriteFrame, Close(code)}` the Agent
//! Session state machine is driven over (spec §4.4). Grounded on
//! `hr-agent/src/connection.rs`'s message-loop idiom, read in the
//! opposite direction (server ingress here, client egress there).

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use fleet_session::{Transport, TransportEvent};

pub struct WsTransport {
    socket: WebSocket,
    peer_ip: Option<String>,
}

impl WsTransport {
    pub fn new(socket: WebSocket, peer_ip: Option<String>) -> Self {
        Self { socket, peer_ip }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn read_frame(&mut self) -> TransportEvent {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Close(_))) | None => return TransportEvent::Closed,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
                Some(Ok(Message::Binary(_))) => {
                    tracing::debug!("dropping unexpected binary frame from agent");
                    continue;
                }
                Some(Err(err)) => {
                    tracing::debug!(%err, "agent transport error");
                    return TransportEvent::Error;
                }
            }
        }
    }

    async fn write_frame(&mut self, data: String) -> bool {
        self.socket.send(Message::Text(data.into())).await.is_ok()
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code,
            reason: reason.to_string().into(),
        };
        let _ = self.socket.send(Message::Close(Some(frame))).await;
    }

    fn peer_ip(&self) -> Option<String> {
        self.peer_ip.clone()
    }
}
