//! `ixie dev` command implementation.

use crate::listener::select_listener;
use futures::FutureExt;
use ixie_core::DevServer;
use miette::{miette, IntoDiagnostic, Result};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

/// Port used when neither the flag nor the config names one.
pub const DEFAULT_PORT: u16 = 3000;

/// Host used when neither the flag nor the config names one.
pub const DEFAULT_HOST: &str = "::";

/// Dev server action.
#[derive(Debug, Clone)]
pub struct DevAction {
    /// Working directory.
    pub cwd: PathBuf,
    /// Explicit config file path (overrides auto-discovery).
    pub config: Option<PathBuf>,
    /// Port from the command line.
    pub port: Option<u16>,
    /// Host from the command line.
    pub host: Option<String>,
}

/// Run the dev server until Ctrl-C.
pub async fn run(action: DevAction) -> Result<()> {
    let (base_dir, config) = super::load_project(&action.cwd, action.config.as_deref())?;
    let server = DevServer::new(&config, &base_dir).into_diagnostic()?;

    let port = action.port.or(config.serve.port).unwrap_or(DEFAULT_PORT);
    let host = action
        .host
        .or_else(|| config.serve.hostname.clone())
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let addr = bind_address(&host, port).await?;

    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutting down, draining in-flight requests");
        }
    }
    .boxed();

    let listener = select_listener();
    tracing::debug!(listener = listener.name(), %addr, "binding");
    let dirs = server.dirs().clone();
    let listening = listener
        .listen(server, addr, shutdown)
        .await
        .into_diagnostic()?;

    println!();
    println!(
        "  ixie dev server running at http://{}:{}/",
        display_host(&host),
        listening.local_addr.port()
    );
    println!();
    println!("  source: {}", dirs.source_dir);
    println!("  public: {}", dirs.public_dir);
    println!();
    println!("  Press Ctrl+C to stop");
    println!();

    listening
        .task
        .await
        .into_diagnostic()?
        .into_diagnostic()
}

/// Socket address for `host`, which may be an IP literal (IPv6 with or
/// without brackets) or a name to look up.
async fn bind_address(host: &str, port: u16) -> Result<SocketAddr> {
    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }

    tokio::net::lookup_host((bare, port))
        .await
        .into_diagnostic()?
        .next()
        .ok_or_else(|| miette!("could not resolve host '{host}'"))
}

/// Host as shown in the startup banner; wildcard addresses read as
/// `localhost`.
fn display_host(host: &str) -> String {
    match host {
        "" | "::" | "[::]" | "0.0.0.0" => "localhost".to_string(),
        h if h.contains(':') && !h.starts_with('[') => format!("[{h}]"),
        h => h.to_string(),
    }
}
