use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Text(String),
    Closed,
    Error,
}

/// The capability set `{ReadFrame, WriteFrame, Close(code)}` an
/// `AgentSession` is driven over (§4.4) — implemented over an axum
/// `WebSocket` in `fleet-api`, and over an in-memory script in tests.
#[async_trait]
pub trait Transport: Send {
    async fn read_frame(&mut self) -> TransportEvent;
    async fn write_frame(&mut self, data: String) -> bool;
    async fn close(&mut self, code: u16, reason: &str);

    /// Client IP as seen by the transport layer, persisted via
    /// `UpdateAgentIP` on connect. `None` when the transport can't
    /// determine one (e.g. a test double).
    fn peer_ip(&self) -> Option<String> {
        None
    }
}

#[cfg(any(test, feature = "test-fakes"))]
pub mod fakes {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Inner {
        inbound: VecDeque<TransportEvent>,
        outbound: Vec<String>,
        close_code: Option<u16>,
    }

    /// Plays back a fixed script of inbound frames, then reports
    /// `Closed` forever after. Cloning shares the same underlying
    /// state, so a test can inspect what the session wrote/closed
    /// with after `AgentSession::run` consumes the original.
    #[derive(Clone, Default)]
    pub struct MockTransport {
        inner: Arc<Mutex<Inner>>,
    }

    impl MockTransport {
        pub fn new(script: Vec<TransportEvent>) -> Self {
            Self {
                inner: Arc::new(Mutex::new(Inner {
                    inbound: script.into(),
                    outbound: Vec::new(),
                    close_code: None,
                })),
            }
        }

        pub fn close_code(&self) -> Option<u16> {
            self.inner.lock().unwrap().close_code
        }

        pub fn written(&self) -> Vec<String> {
            self.inner.lock().unwrap().outbound.clone()
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn read_frame(&mut self) -> TransportEvent {
            let mut inner = self.inner.lock().unwrap();
            inner.inbound.pop_front().unwrap_or(TransportEvent::Closed)
        }

        async fn write_frame(&mut self, data: String) -> bool {
            self.inner.lock().unwrap().outbound.push(data);
            true
        }

        async fn close(&mut self, code: u16, _reason: &str) {
            self.inner.lock().unwrap().close_code = Some(code);
        }
    }
}
