//! Target device: TLS WebSocket listener and the per-connection handler.

pub mod handler;
pub mod tls;

pub use handler::{serve_connection, ConnectionError, ConnectionState, Session};
pub use tls::{server_config, TlsSetupError};

use gate_core::{AlwaysAccept, Clock, ConsentPolicy, DeviceIdentity, SystemClock};
use gate_store::Store;
use rustls::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

/// Everything a connection task needs, fixed at startup.
pub struct TargetContext {
    pub identity: DeviceIdentity,
    pub store: Arc<dyn Store>,
    pub clock: Arc<dyn Clock>,
    pub consent: Arc<dyn ConsentPolicy>,
}

impl TargetContext {
    /// System clock and the accept-everything consent policy.
    pub fn new(identity: DeviceIdentity, store: Arc<dyn Store>) -> Self {
        TargetContext {
            identity,
            store,
            clock: Arc::new(SystemClock),
            consent: Arc::new(AlwaysAccept),
        }
    }
}

pub struct TargetServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    ctx: Arc<TargetContext>,
}

impl TargetServer {
    pub async fn bind(
        addr: SocketAddr,
        tls: Arc<ServerConfig>,
        ctx: Arc<TargetContext>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(TargetServer { listener, acceptor: TlsAcceptor::from(tls), ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever, one task per connection.
    pub async fn run(self) {
        if let Ok(addr) = self.local_addr() {
            info!(%addr, target_id = %self.ctx.identity, "listening for agents");
        }
        loop {
            let (tcp, remote) = match self.listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            let acceptor = self.acceptor.clone();
            let ctx = self.ctx.clone();
            tokio::spawn(async move { accept_one(tcp, remote, acceptor, ctx).await });
        }
    }
}

async fn accept_one(tcp: TcpStream, remote: SocketAddr, acceptor: TlsAcceptor, ctx: Arc<TargetContext>) {
    let tls = match acceptor.accept(tcp).await {
        Ok(s) => s,
        Err(e) => {
            warn!(%remote, error = %e, "tls handshake failed");
            return;
        }
    };
    let ws = match tokio_tungstenite::accept_async(tls).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(%remote, error = %e, "websocket upgrade failed");
            return;
        }
    };
    if let Err(e) = serve_connection(ws, remote, ctx).await {
        debug!(%remote, error = %e, "connection ended by transport error");
    }
}
