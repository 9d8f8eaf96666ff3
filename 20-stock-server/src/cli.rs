use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
};

use clap::Parser;

use crate::config::{
    DEFAULT_MAX_CONNECTIONS, DEFAULT_MAX_RESPONSE_BYTES, DEFAULT_SNAPSHOT, ServerConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve a shared stock ledger over TCP", long_about = None)]
pub struct Cli {
    /// TCP port to listen on. Use 0 for an ephemeral port.
    pub port: u16,

    /// Address to bind the listener to.
    #[arg(long, default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// Stock snapshot read at startup and rewritten on shutdown.
    #[arg(long, default_value = DEFAULT_SNAPSHOT)]
    pub snapshot: PathBuf,

    /// Maximum number of simultaneously connected clients.
    #[arg(long, default_value_t = DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Largest `show` listing returned in a single response.
    #[arg(long, default_value_t = DEFAULT_MAX_RESPONSE_BYTES)]
    pub max_response_bytes: usize,
}

impl Cli {
    pub fn into_config(self) -> ServerConfig {
        ServerConfig {
            listen: SocketAddr::new(self.host, self.port),
            snapshot_path: self.snapshot,
            max_connections: self.max_connections,
            max_response_bytes: self.max_response_bytes,
        }
    }
}
