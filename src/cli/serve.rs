use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;

use crate::options::SandboxOptions;
use crate::session::{Reaper, SessionManager};
use crate::web::ApiServer;

const DEFAULT_BIND_ADDRESS: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 1);
const DEFAULT_PORT: u16 = 34600;

/// Expose the sandbox REST API over HTTP.
#[derive(Debug, Parser)]
pub struct ServeCommand {
    /// The IP address to listen on. Defaults to `127.0.0.1`.
    #[clap(long)]
    pub address: Option<IpAddr>,

    /// The port to listen on. Defaults to `34600`.
    #[clap(long)]
    pub port: Option<u16>,

    /// JSON5 file with default sandbox options for this server.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// How long a sandbox may stay idle before the reaper removes it.
    #[clap(long, value_parser = humantime::parse_duration, default_value = "1h")]
    pub inactivity_timeout: Duration,

    /// How often the reaper sweeps for idle sandboxes.
    #[clap(long, value_parser = humantime::parse_duration, default_value = "1m")]
    pub reap_interval: Duration,
}

/// Reads server-wide default sandbox options from a JSON5 file.
pub fn load_options(path: &std::path::Path) -> anyhow::Result<SandboxOptions> {
    let contents = fs_err::read_to_string(path)?;
    let options = json5::from_str(&contents)
        .with_context(|| format!("invalid sandbox config {}", path.display()))?;
    Ok(options)
}

impl ServeCommand {
    pub fn run(self) -> anyhow::Result<()> {
        let default_options = match &self.config {
            Some(path) => load_options(path)?,
            None => SandboxOptions::default(),
        };

        let manager = SessionManager::with_config(default_options, self.inactivity_timeout);
        let _reaper = Reaper::start(Arc::clone(&manager), self.reap_interval);

        let ip = self.address.unwrap_or(DEFAULT_BIND_ADDRESS.into());
        let port = self.port.unwrap_or(DEFAULT_PORT);
        let addr: SocketAddr = (ip, port).into();

        let host = if ip.is_loopback() {
            "localhost".to_owned()
        } else {
            ip.to_string()
        };
        log::info!("Listening: http://{}:{}/api/sandbox", host, port);

        let server = ApiServer::new(manager);
        server.start(addr);

        Ok(())
    }
}
