//! Startup and shutdown around the event loop.
//!
//! Startup loads the ledger from the snapshot and binds the listener before
//! any client can connect. Shutdown runs after the event loop has returned
//! the ledger: the snapshot is rewritten and the ledger torn down. Because
//! [`Lifecycle::run_until`] consumes `self`, that sequence runs once.

use std::{
    future::Future,
    io,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::{config::ServerConfig, ledger::Ledger, server::EventLoop, snapshot};

pub struct Lifecycle {
    event_loop: EventLoop,
    snapshot_path: PathBuf,
}

impl Lifecycle {
    pub async fn start(config: ServerConfig) -> Result<Self> {
        let ledger = snapshot::load(&config.snapshot_path)?;
        info!(
            records = ledger.len(),
            path = %config.snapshot_path.display(),
            "loaded stock snapshot"
        );

        let listener = TcpListener::bind(config.listen)
            .await
            .with_context(|| format!("failed to listen on {}", config.listen))?;

        Ok(Self {
            event_loop: EventLoop::new(listener, ledger, &config),
            snapshot_path: config.snapshot_path,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.event_loop.local_addr()
    }

    /// Serves until `shutdown` resolves, then persists the ledger.
    /// Returns the number of records written.
    pub async fn run_until<F>(self, shutdown: F) -> Result<usize>
    where
        F: Future<Output = ()>,
    {
        let Lifecycle {
            event_loop,
            snapshot_path,
        } = self;

        let ledger = event_loop.run_until(shutdown).await?;
        persist(ledger, &snapshot_path)
    }

    pub async fn run_until_ctrl_c(self) -> Result<usize> {
        self.run_until_signal(tokio::signal::ctrl_c()).await
    }

    /// Serves until `signal` reports an interrupt. If the handler could not
    /// be installed the server keeps running rather than shutting down at
    /// once.
    pub async fn run_until_signal<S>(self, signal: S) -> Result<usize>
    where
        S: Future<Output = io::Result<()>>,
    {
        self.run_until(async move {
            if let Err(err) = signal.await {
                warn!(error = ?err, "failed to install ctrl-c handler, serving without one");
                std::future::pending::<()>().await;
            }
        })
        .await
    }
}

fn persist(ledger: Ledger, path: &Path) -> Result<usize> {
    snapshot::save(&ledger, path).context("failed to persist ledger on shutdown")?;
    let released = ledger.teardown();
    info!(records = released, path = %path.display(), "stock snapshot written");
    Ok(released)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{
        io::{AsyncBufReadExt, AsyncWriteExt, BufReader},
        net::TcpStream,
        time::timeout,
    };

    use super::*;

    #[tokio::test]
    async fn failed_signal_handler_keeps_serving() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let snapshot_path = dir.path().join("stock.txt");
        std::fs::write(&snapshot_path, "1 10 100\n").expect("seed");

        let config = ServerConfig {
            listen: "127.0.0.1:0".parse().expect("addr"),
            snapshot_path: snapshot_path.clone(),
            ..ServerConfig::default()
        };
        let lifecycle = Lifecycle::start(config).await.expect("start");
        let addr = lifecycle.local_addr().expect("local addr");
        let server = tokio::spawn(lifecycle.run_until_signal(async {
            Err::<(), _>(io::Error::other("signals unavailable"))
        }));

        let stream = TcpStream::connect(addr).await.expect("connect");
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        writer.write_all(b"buy 1 3\n").await.expect("write");
        let mut line = String::new();
        timeout(Duration::from_secs(1), reader.read_line(&mut line))
            .await
            .expect("still serving")
            .expect("read");
        assert_eq!(line, "[buy] success\n");

        assert!(!server.is_finished());
        server.abort();
        assert_eq!(
            std::fs::read_to_string(&snapshot_path).expect("snapshot"),
            "1 10 100\n"
        );
    }
}
