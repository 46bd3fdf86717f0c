//! Scripted agent: connect to a target, ping it, request one security test.

pub mod tls;

use anyhow::{anyhow, Context, Result};
use futures_util::{SinkExt, StreamExt};
use gate_core::{InboundMessage, OutboundMessage};
use serde_json::Value;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub const DEFAULT_URL: &str = "wss://localhost:8000";

#[derive(Debug, Clone)]
pub struct AgentOptions {
    pub url: Url,
    pub ca: PathBuf,
    pub verify_hostname: bool,
    pub agent_id: Option<String>,
}

/// Server frames received during one scripted session, in order.
#[derive(Debug, Clone, PartialEq)]
pub struct Transcript {
    pub server_cn: Option<String>,
    pub register: OutboundMessage,
    pub pong: OutboundMessage,
    pub consent: OutboundMessage,
}

impl Transcript {
    pub fn frames(&self) -> [&OutboundMessage; 3] {
        [&self.register, &self.pong, &self.consent]
    }
}

/// `agent-` followed by 8 random hex chars.
pub fn new_agent_id() -> String {
    let s = Uuid::new_v4().simple().to_string();
    format!("agent-{}", &s[..8])
}

/// Connect over TLS and run the script once.
pub async fn run(opts: &AgentOptions) -> Result<Transcript> {
    let host = opts.url.host_str().ok_or_else(|| anyhow!("url has no host: {}", opts.url))?;
    let port = opts
        .url
        .port_or_known_default()
        .ok_or_else(|| anyhow!("url has no port: {}", opts.url))?;
    let config = tls::client_config(&opts.ca, opts.verify_hostname)?;

    let tcp = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("connect {}:{}", host, port))?;
    let stream = TlsConnector::from(config)
        .connect(tls::server_name(host)?, tcp)
        .await
        .context("tls handshake")?;
    let server_cn = stream
        .get_ref()
        .1
        .peer_certificates()
        .and_then(|certs| certs.first())
        .and_then(tls::subject_cn);
    info!(%host, port, cn = server_cn.as_deref().unwrap_or(""), "connected to target");

    let (mut ws, _) = tokio_tungstenite::client_async(opts.url.as_str(), stream)
        .await
        .context("websocket handshake")?;
    let agent_id = opts.agent_id.clone().unwrap_or_else(new_agent_id);
    let mut transcript = run_script(&mut ws, &agent_id).await?;
    transcript.server_cn = server_cn;
    let _ = ws.close(None).await;
    Ok(transcript)
}

/// Read the registration, send a ping and one security test request.
pub async fn run_script<S>(ws: &mut WebSocketStream<S>, agent_id: &str) -> Result<Transcript>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let register = recv(ws).await?;

    send(ws, &InboundMessage::Ping).await?;
    let pong = recv(ws).await?;

    let req = InboundMessage::SecurityTestRequest { agent_id: Value::from(agent_id) };
    send(ws, &req).await?;
    info!(%agent_id, "sent security_test_request");
    let consent = recv(ws).await?;

    Ok(Transcript { server_cn: None, register, pong, consent })
}

async fn send<S>(ws: &mut WebSocketStream<S>, msg: &InboundMessage) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    ws.send(Message::text(msg.to_value().to_string())).await?;
    Ok(())
}

async fn recv<S>(ws: &mut WebSocketStream<S>) -> Result<OutboundMessage>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(msg) = ws.next().await {
        let text = match msg? {
            Message::Text(t) => t,
            Message::Binary(b) => String::from_utf8(b)?,
            Message::Close(_) => break,
            _ => continue,
        };
        debug!(frame = %text, "server frame");
        return serde_json::from_str(&text).with_context(|| format!("unexpected server frame: {}", text));
    }
    Err(anyhow!("target closed the connection"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gate_core::{Consent, Reply};
    use serde_json::json;
    use tokio_tungstenite::tungstenite::protocol::Role;

    #[test]
    fn agent_ids_are_prefixed_hex() {
        let id = new_agent_id();
        let suffix = id.strip_prefix("agent-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn script_against_canned_target() {
        let (a, b) = tokio::io::duplex(16 * 1024);
        let target = tokio::spawn(async move {
            let mut ws = WebSocketStream::from_raw_socket(b, Role::Server, None).await;
            ws.send(Message::text(r#"{"type":"target_register","target_id":"TARGET-1"}"#)).await.unwrap();
            let mut seen = Vec::new();
            for reply in [
                r#"{"type":"pong","target_id":"TARGET-1"}"#,
                r#"{"type":"consent_response","target_id":"TARGET-1","agent_id":"agent-x","consent":"ACCEPTED"}"#,
            ] {
                match ws.next().await.unwrap().unwrap() {
                    Message::Text(t) => seen.push(serde_json::from_str::<Value>(&t).unwrap()),
                    other => panic!("unexpected {other:?}"),
                }
                ws.send(Message::text(reply)).await.unwrap();
            }
            seen
        });

        let mut ws = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        let t = run_script(&mut ws, "agent-x").await.unwrap();
        assert_eq!(t.register, Reply::TargetRegister { target_id: "TARGET-1".into() }.into());
        assert_eq!(t.pong, Reply::Pong { target_id: "TARGET-1".into() }.into());
        assert_eq!(
            t.consent,
            Reply::ConsentResponse {
                target_id: "TARGET-1".into(),
                agent_id: json!("agent-x"),
                consent: Consent::Accepted,
            }
            .into()
        );

        let seen = target.await.unwrap();
        assert_eq!(seen[0], json!({"type": "ping"}));
        assert_eq!(seen[1], json!({"type": "security_test_request", "agent_id": "agent-x"}));
    }

    #[tokio::test]
    async fn early_close_is_an_error() {
        let (a, b) = tokio::io::duplex(1024);
        drop(b);
        let mut ws = WebSocketStream::from_raw_socket(a, Role::Client, None).await;
        assert!(run_script(&mut ws, "agent-x").await.is_err());
    }
}
