use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
};

pub const DEFAULT_SNAPSHOT: &str = "stock.txt";
/// Matches the descriptor-set size a `select(2)` based server is limited to.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1024;
pub const DEFAULT_MAX_RESPONSE_BYTES: usize = 64 * 1024;

/// Everything the server needs to start.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub snapshot_path: PathBuf,
    pub max_connections: usize,
    /// Largest `show` listing sent in one response.
    pub max_response_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            snapshot_path: PathBuf::from(DEFAULT_SNAPSHOT),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_response_bytes: DEFAULT_MAX_RESPONSE_BYTES,
        }
    }
}
