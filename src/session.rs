//! Session-addressed transport registry.
//!
//! Bridges a long-lived streaming connection to out-of-band messages: a
//! session is created when the stream is established, looked up when a
//! message for it arrives, and purged when the stream closes. A purged id
//! can never receive another message.

use crate::error::{Result, SessionError};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Capability a live session exposes: accept one out-of-band message.
#[async_trait]
pub trait SessionTransport: Send + Sync + 'static {
    async fn handle_message(&self, body: Bytes) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Session {
    pub session_id: String,
    pub transport: Arc<dyn SessionTransport>,
    pub created_at: DateTime<Utc>,
}

/// Sole owner of the session map, shared across all concurrent requests.
/// DashMap keeps insert/lookup/remove atomic with respect to each other.
#[derive(Default)]
pub struct SessionTransportRegistry {
    sessions: DashMap<String, Session>,
}

impl SessionTransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a transport under a fresh unguessable id.
    pub fn open(&self, transport: Arc<dyn SessionTransport>) -> Result<String> {
        let session_id = uuid::Uuid::new_v4().to_string();
        self.open_with_id(session_id.clone(), transport)?;
        Ok(session_id)
    }

    /// Register a transport under a caller-supplied id. Fails with
    /// `SessionConflict` instead of overwriting a live session.
    pub fn open_with_id(
        &self,
        session_id: String,
        transport: Arc<dyn SessionTransport>,
    ) -> Result<()> {
        match self.sessions.entry(session_id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(SessionError::Conflict(session_id).into())
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                info!(session_id = %session_id, "session opened");
                slot.insert(Session {
                    session_id,
                    transport,
                    created_at: Utc::now(),
                });
                Ok(())
            }
        }
    }

    /// Deliver one message to an open session. Unknown and closed ids fail
    /// with `SessionNotFound`.
    pub async fn deliver(&self, session_id: &str, body: Bytes) -> Result<()> {
        let transport = self
            .sessions
            .get(session_id)
            .map(|s| s.transport.clone())
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        transport
            .handle_message(body)
            .await
            .map_err(|e| SessionError::DeliveryFailed {
                session_id: session_id.to_string(),
                message: format!("{e:#}"),
            })?;
        Ok(())
    }

    /// Remove a session permanently. Idempotent; delivery for the id fails
    /// from this point on.
    pub fn close(&self, session_id: &str) {
        if self.sessions.remove(session_id).is_some() {
            debug!(session_id = %session_id, "session closed");
        }
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.sessions.contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use std::sync::Mutex;

    struct RecordingTransport {
        received: Mutex<Vec<Bytes>>,
    }

    impl RecordingTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl SessionTransport for RecordingTransport {
        async fn handle_message(&self, body: Bytes) -> anyhow::Result<()> {
            self.received.lock().unwrap().push(body);
            Ok(())
        }
    }

    #[tokio::test]
    async fn delivers_to_open_session() {
        let registry = SessionTransportRegistry::new();
        let transport = RecordingTransport::new();
        let id = registry.open(transport.clone()).unwrap();

        registry.deliver(&id, Bytes::from_static(b"hello")).await.unwrap();
        assert_eq!(transport.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let registry = SessionTransportRegistry::new();
        let err = registry
            .deliver("nope", Bytes::from_static(b"hello"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Session(SessionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn closed_session_cannot_be_resurrected() {
        let registry = SessionTransportRegistry::new();
        let transport = RecordingTransport::new();
        let id = registry.open(transport.clone()).unwrap();

        registry.close(&id);
        let err = registry
            .deliver(&id, Bytes::from_static(b"late"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Session(SessionError::NotFound(_))
        ));
        assert!(transport.received.lock().unwrap().is_empty());

        // Closing again is a no-op, not an error.
        registry.close(&id);
    }

    struct BrokenTransport;

    #[async_trait]
    impl SessionTransport for BrokenTransport {
        async fn handle_message(&self, _body: Bytes) -> anyhow::Result<()> {
            anyhow::bail!("receiver hung up")
        }
    }

    #[tokio::test]
    async fn transport_failure_is_reported_as_delivery_failure() {
        let registry = SessionTransportRegistry::new();
        let id = registry.open(Arc::new(BrokenTransport)).unwrap();

        let err = registry
            .deliver(&id, Bytes::from_static(b"hello"))
            .await
            .unwrap_err();
        match err {
            PipelineError::Session(SessionError::DeliveryFailed { session_id, message }) => {
                assert_eq!(session_id, id);
                assert!(message.contains("receiver hung up"));
            }
            other => panic!("unexpected error: {other}"),
        }
        // The session itself is still registered; only this delivery failed.
        assert!(registry.contains(&id));
    }

    #[tokio::test]
    async fn id_collision_is_a_conflict() {
        let registry = SessionTransportRegistry::new();
        registry
            .open_with_id("fixed".to_string(), RecordingTransport::new())
            .unwrap();
        let err = registry
            .open_with_id("fixed".to_string(), RecordingTransport::new())
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Session(SessionError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn distinct_sessions_are_isolated() {
        let registry = SessionTransportRegistry::new();
        let a = RecordingTransport::new();
        let b = RecordingTransport::new();
        let id_a = registry.open(a.clone()).unwrap();
        let _id_b = registry.open(b.clone()).unwrap();

        registry.deliver(&id_a, Bytes::from_static(b"for a")).await.unwrap();
        assert_eq!(a.received.lock().unwrap().len(), 1);
        assert!(b.received.lock().unwrap().is_empty());
        assert_eq!(registry.len(), 2);
    }
}
