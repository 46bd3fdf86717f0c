//! Per-connection protocol driver.
//!
//! A connection announces the target with `target_register`, then answers
//! every inbound frame with exactly one reply until the transport closes.
//! `CONNECTION_CLOSED` is written by [`Session`]'s `Drop`, so it is logged
//! exactly once however the loop ends: peer close, transport error, task
//! cancellation or a panic in a handler step.
//!
//! Session steps touch the store synchronously, so the async loop hands them
//! to the blocking pool and a slow disk never stalls other connections.

use crate::TargetContext;
use futures_util::{SinkExt, StreamExt};
use gate_core::{
    decode, EventKind, InboundMessage, LogEntry, OutboundMessage, ProtocolError, Reply, ScanMetadata,
};
use gate_store::StoreExt;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use time::format_description::well_known::Rfc3339;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::{spawn_blocking, JoinError};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("websocket transport failed")]
    Transport(#[from] tungstenite::Error),
    #[error("session step did not complete")]
    Handler(#[from] JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Open,
    Established,
    Closed,
}

/// Protocol state for one connection, independent of the transport.
pub struct Session {
    ctx: Arc<TargetContext>,
    remote: SocketAddr,
    state: ConnectionState,
}

impl Session {
    /// Logs `CONNECTION_RECEIVED`.
    pub fn open(ctx: Arc<TargetContext>, remote: SocketAddr) -> Self {
        info!(%remote, "connection received");
        record(&ctx, LogEntry::new(EventKind::ConnectionReceived).with("remote", remote.to_string()));
        Session { ctx, remote, state: ConnectionState::Open }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Registration announcement; moves the session to `Established`.
    pub fn register(&mut self) -> OutboundMessage {
        self.state = ConnectionState::Established;
        Reply::TargetRegister { target_id: self.target_id() }.into()
    }

    /// Produce the single reply owed for one inbound frame.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> OutboundMessage {
        match decode(bytes) {
            Ok(InboundMessage::Ping) => Reply::Pong { target_id: self.target_id() }.into(),
            Ok(InboundMessage::SecurityTestRequest { agent_id }) => self.security_test(agent_id),
            Err(e @ ProtocolError::Decode(_)) => {
                debug!(remote = %self.remote, "undecodable frame");
                OutboundMessage::from(&e)
            }
            Err(ProtocolError::Invalid(reason)) => {
                debug!(remote = %self.remote, %reason, "invalid message");
                record(
                    &self.ctx,
                    LogEntry::new(EventKind::InvalidMessage).with("reason", reason.to_string()),
                );
                OutboundMessage::error(reason.to_string())
            }
        }
    }

    fn security_test(&mut self, agent_id: Value) -> OutboundMessage {
        info!(remote = %self.remote, %agent_id, "security test requested");
        let ctx = &self.ctx;
        let now = ctx.clock.now().format(&Rfc3339).unwrap_or_else(|_| String::new());
        let meta = ScanMetadata { last_scan_time: Some(now), agent_source: Some(agent_id.clone()) };
        if let Err(e) = ctx.store.save_scan_metadata(&meta) {
            warn!(error = %e, "failed to save scan metadata");
        }
        let consent = ctx.consent.decide(&agent_id);
        let consent_value = serde_json::to_value(consent).unwrap_or(Value::Null);
        record(
            ctx,
            LogEntry::new(EventKind::ConsentResponse)
                .with("agent_id", agent_id.clone())
                .with("consent", consent_value),
        );
        Reply::ConsentResponse { target_id: self.target_id(), agent_id, consent }.into()
    }

    fn target_id(&self) -> String {
        self.ctx.identity.id().to_string()
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.state = ConnectionState::Closed;
        info!(remote = %self.remote, "connection closed");
        record(&self.ctx, LogEntry::new(EventKind::ConnectionClosed));
    }
}

fn record(ctx: &TargetContext, entry: LogEntry) {
    if let Err(e) = ctx.store.append_log(&entry) {
        warn!(event = ?entry.event, error = %e, "failed to append log entry");
    }
}

/// Drive one established WebSocket until the peer goes away.
///
/// Frames are processed strictly in order: the reply to frame N is flushed
/// before frame N+1 is read.
pub async fn serve_connection<S>(
    mut ws: WebSocketStream<S>,
    remote: SocketAddr,
    ctx: Arc<TargetContext>,
) -> Result<(), ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut session = spawn_blocking(move || Session::open(ctx, remote)).await?;
    ws.send(Message::text(session.register().to_json())).await?;

    while let Some(msg) = ws.next().await {
        let payload = match msg? {
            Message::Text(text) => text.into_bytes(),
            Message::Binary(bytes) => bytes,
            // Keep reading: tungstenite flushes the close reply on the next
            // poll and then ends the stream.
            Message::Close(_) => continue,
            // Ping/Pong are answered by tungstenite itself.
            _ => continue,
        };
        let (s, reply) = spawn_blocking(move || {
            let reply = session.handle_frame(&payload);
            (session, reply)
        })
        .await?;
        session = s;
        ws.send(Message::text(reply.to_json())).await?;
    }
    spawn_blocking(move || drop(session)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::{AlwaysAccept, Consent, ConsentPolicy, DeviceIdentity, FixedClock, Settings};
    use gate_store::MemoryStore;
    use serde_json::json;
    use time::macros::datetime;

    fn ctx_with(consent: Arc<dyn ConsentPolicy>) -> (Arc<TargetContext>, Arc<MemoryStore>) {
        let identity = DeviceIdentity::from("TARGET-feedf00d");
        let store = Arc::new(
            MemoryStore::new(&Settings { target_id: identity.id().into(), port: 8000 }).unwrap(),
        );
        let ctx = TargetContext {
            identity,
            store: store.clone(),
            clock: Arc::new(FixedClock(datetime!(2026-03-01 12:00 UTC))),
            consent,
        };
        (Arc::new(ctx), store)
    }

    fn ctx() -> (Arc<TargetContext>, Arc<MemoryStore>) {
        ctx_with(Arc::new(AlwaysAccept))
    }

    fn remote() -> SocketAddr {
        "10.0.0.7:50000".parse().unwrap()
    }

    fn events(store: &MemoryStore) -> Vec<EventKind> {
        store.logs().into_iter().map(|e| e.event).collect()
    }

    #[test]
    fn lifecycle_states_and_logs() {
        let (ctx, store) = ctx();
        let mut s = Session::open(ctx, remote());
        assert_eq!(s.state(), ConnectionState::Open);
        assert_eq!(
            s.register(),
            OutboundMessage::from(Reply::TargetRegister { target_id: "TARGET-feedf00d".into() })
        );
        assert_eq!(s.state(), ConnectionState::Established);
        let logs = store.logs();
        assert_eq!(logs[0].event, EventKind::ConnectionReceived);
        assert_eq!(logs[0].details["remote"], json!("10.0.0.7:50000"));
        drop(s);
        assert_eq!(events(&store), vec![EventKind::ConnectionReceived, EventKind::ConnectionClosed]);
    }

    #[test]
    fn ping_gets_pong_without_log() {
        let (ctx, store) = ctx();
        let mut s = Session::open(ctx, remote());
        let reply = s.handle_frame(br#"{"type":"ping"}"#);
        assert_eq!(reply, Reply::Pong { target_id: "TARGET-feedf00d".into() }.into());
        assert_eq!(events(&store), vec![EventKind::ConnectionReceived]);
    }

    #[test]
    fn garbage_is_answered_but_not_logged() {
        let (ctx, store) = ctx();
        let mut s = Session::open(ctx, remote());
        assert_eq!(s.handle_frame(b"\xff\x00garbage"), OutboundMessage::error("Invalid JSON"));
        assert_eq!(s.handle_frame(b""), OutboundMessage::error("Invalid JSON"));
        assert_eq!(events(&store), vec![EventKind::ConnectionReceived]);
    }

    #[test]
    fn invalid_message_is_answered_and_logged() {
        let (ctx, store) = ctx();
        let mut s = Session::open(ctx, remote());
        assert_eq!(
            s.handle_frame(br#"{"type":"hello"}"#),
            OutboundMessage::error("Invalid or missing 'type' field")
        );
        assert_eq!(s.handle_frame(b"[1,2,3]"), OutboundMessage::error("Message must be a JSON object"));
        let logs = store.logs();
        assert_eq!(logs[1].event, EventKind::InvalidMessage);
        assert_eq!(logs[1].details["reason"], json!("Invalid or missing 'type' field"));
        assert_eq!(logs[2].details["reason"], json!("Message must be a JSON object"));
    }

    #[test]
    fn security_test_updates_metadata_and_logs_consent() {
        let (ctx, store) = ctx();
        let mut s = Session::open(ctx, remote());
        let reply = s.handle_frame(br#"{"type":"security_test_request","agent_id":"agent-abc123"}"#);
        assert_eq!(
            reply,
            Reply::ConsentResponse {
                target_id: "TARGET-feedf00d".into(),
                agent_id: json!("agent-abc123"),
                consent: Consent::Accepted,
            }
            .into()
        );
        let meta = store.scan_metadata();
        assert_eq!(meta.agent_source, Some(json!("agent-abc123")));
        assert_eq!(meta.last_scan_time.as_deref(), Some("2026-03-01T12:00:00Z"));
        let last = store.logs().pop().unwrap();
        assert_eq!(last.event, EventKind::ConsentResponse);
        assert_eq!(last.details["agent_id"], json!("agent-abc123"));
        assert_eq!(last.details["consent"], json!("ACCEPTED"));
    }

    #[test]
    fn missing_agent_id_leaves_metadata_untouched() {
        let (ctx, store) = ctx();
        let mut s = Session::open(ctx, remote());
        assert_eq!(
            s.handle_frame(br#"{"type":"security_test_request"}"#),
            OutboundMessage::error("Missing 'agent_id' in security_test_request")
        );
        assert_eq!(store.scan_metadata(), ScanMetadata::default());
    }

    #[test]
    fn consent_policy_is_pluggable() {
        struct DenyAll;
        impl ConsentPolicy for DenyAll {
            fn decide(&self, _agent_id: &Value) -> Consent {
                Consent::Denied
            }
        }
        let (ctx, store) = ctx_with(Arc::new(DenyAll));
        let mut s = Session::open(ctx, remote());
        let reply = s.handle_frame(br#"{"type":"security_test_request","agent_id":"a"}"#);
        let v: Value = serde_json::from_str(&reply.to_json()).unwrap();
        assert_eq!(v["consent"], json!("DENIED"));
        assert_eq!(store.logs().pop().unwrap().details["consent"], json!("DENIED"));
    }

    #[test]
    fn close_is_logged_on_panic() {
        let (ctx, store) = ctx();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _s = Session::open(ctx, remote());
            panic!("handler fault");
        }));
        assert!(result.is_err());
        assert_eq!(events(&store), vec![EventKind::ConnectionReceived, EventKind::ConnectionClosed]);
    }
}
