use anyhow::Result;
#[cfg(feature = "agent")]
use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand, ValueEnum};
use std::net::IpAddr;
use std::path::PathBuf;
#[cfg(any(feature = "serve", feature = "agent"))]
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum OutputFormat { Text, Json }

#[derive(Debug, Parser)]
#[command(name = "gate", version, about = "Consent-gated security test handshake: target and agent")]
struct Cli {
    /// Optional config file (YAML). If omitted, loads ./gate.yaml if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Debug logging (RUST_LOG overrides)
    #[arg(long, short, global = true, default_value_t = false)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print version information
    Version,
    /// Run the target device: accept agents over TLS WebSocket forever
    #[cfg(feature = "serve")]
    Serve {
        /// Address to bind (default 0.0.0.0)
        #[arg(long)]
        bind: Option<IpAddr>,
        /// Port to listen on (default 8000)
        #[arg(long)]
        port: Option<u16>,
        /// PEM certificate chain (default cert.pem)
        #[arg(long, value_name = "FILE")]
        cert: Option<PathBuf>,
        /// PEM private key (default key.pem)
        #[arg(long, value_name = "FILE")]
        key: Option<PathBuf>,
        /// Directory for settings.json, logs.json and last_scan_metadata.json (default .)
        #[arg(long, value_name = "DIR")]
        storage_dir: Option<PathBuf>,
    },
    /// Connect once as an agent: ping, request a security test, print replies
    #[cfg(feature = "agent")]
    Agent {
        /// Target URL (default wss://localhost:8000)
        #[arg(long)]
        url: Option<String>,
        /// PEM trust anchor for the target certificate (default cert.pem)
        #[arg(long, value_name = "FILE")]
        ca: Option<PathBuf>,
        /// Accept a certificate issued for another host name (weakens TLS)
        #[arg(long, default_value_t = false)]
        no_verify_hostname: bool,
        /// Agent id to announce (default agent-<random>)
        #[arg(long)]
        agent_id: Option<String>,
        /// Output format: text or json
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

fn setup_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);
    let loaded_cfg = config::load_config(cli.config.as_deref()).unwrap_or_default();
    match cli.command {
        Commands::Version => {
            println!("gate {} (core {})", env!("CARGO_PKG_VERSION"), gate_core::version());
        }
        #[cfg(feature = "serve")]
        Commands::Serve { bind, port, cert, key, storage_dir } => {
            let cfg = loaded_cfg.serve.unwrap_or_default();
            let bind = bind.or(cfg.bind).unwrap_or(IpAddr::from([0, 0, 0, 0]));
            let port = port.or(cfg.port).unwrap_or(gate_core::DEFAULT_PORT);
            let cert = cert.or(cfg.cert).unwrap_or_else(|| PathBuf::from("cert.pem"));
            let key = key.or(cfg.key).unwrap_or_else(|| PathBuf::from("key.pem"));
            let storage_dir = storage_dir.or(cfg.storage_dir).unwrap_or_else(|| PathBuf::from("."));
            serve(bind, port, cert, key, storage_dir)?;
        }
        #[cfg(feature = "agent")]
        Commands::Agent { url, ca, no_verify_hostname, agent_id, format } => {
            let cfg = loaded_cfg.agent.unwrap_or_default();
            let url = url.or(cfg.url).unwrap_or_else(|| agent_client::DEFAULT_URL.to_string());
            let opts = agent_client::AgentOptions {
                url: url::Url::parse(&url).with_context(|| format!("invalid url: {}", url))?,
                ca: ca.or(cfg.ca).unwrap_or_else(|| PathBuf::from("cert.pem")),
                verify_hostname: !no_verify_hostname && cfg.verify_hostname.unwrap_or(true),
                agent_id: agent_id.or(cfg.agent_id),
            };
            if !opts.verify_hostname {
                tracing::warn!("hostname verification disabled");
            }
            let rt = tokio::runtime::Runtime::new()?;
            let transcript = rt.block_on(agent_client::run(&opts)).map_err(|e| anyhow!("agent run failed: {:#}", e))?;
            info!("agent session finished");
            match format {
                OutputFormat::Text => {
                    println!("Connected to server! (cert CN: {})", transcript.server_cn.as_deref().unwrap_or("-"));
                    for frame in transcript.frames() {
                        println!("SERVER: {}", frame.to_json());
                    }
                }
                OutputFormat::Json => {
                    let obj = serde_json::json!({
                        "url": opts.url.as_str(),
                        "server_cn": transcript.server_cn,
                        "register": transcript.register,
                        "pong": transcript.pong,
                        "consent": transcript.consent,
                    });
                    println!("{}", serde_json::to_string(&obj)?);
                }
            }
        }
    }
    Ok(())
}

#[cfg(feature = "serve")]
fn serve(bind: IpAddr, port: u16, cert: PathBuf, key: PathBuf, storage_dir: PathBuf) -> Result<()> {
    use gate_core::{DeviceIdentity, Settings};
    use gate_store::JsonStore;
    use std::sync::Arc;
    use target_device::{TargetContext, TargetServer};

    let identity = DeviceIdentity::generate();
    info!(target_id = %identity, "target device id");
    let settings = Settings { target_id: identity.id().to_string(), port };
    let store = Arc::new(JsonStore::open_or_create(&storage_dir, &settings)?);
    let tls = target_device::server_config(&cert, &key)?;
    let ctx = Arc::new(TargetContext::new(identity, store));

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async move {
        let server = TargetServer::bind((bind, port).into(), tls, ctx).await?;
        server.run().await;
        Ok::<(), anyhow::Error>(())
    })
}
