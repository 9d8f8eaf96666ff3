use std::{
    future::{Future, poll_fn},
    io,
    net::SocketAddr,
    task::{Context, Poll},
};

use anyhow::Result;
use tokio::{
    net::{TcpListener, TcpStream},
    select,
};
use tracing::{debug, info, warn};

use crate::{
    config::ServerConfig,
    handler,
    ledger::Ledger,
    pool::{ConnectionPool, ReadOutcome},
};

type Accepted = io::Result<(TcpStream, SocketAddr)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Polling,
    Dispatching,
    ShuttingDown,
}

/// What ended a poll.
enum Wake {
    Shutdown,
    Ready(Option<Accepted>),
}

/// Single-task readiness loop serving every client connection.
///
/// The loop owns the listener, the connection pool and the ledger outright.
/// Requests are handled one at a time on this task, so the ledger needs no
/// locking; handing the ledger back from [`EventLoop::run_until`] is what
/// orders shutdown after the last request.
pub struct EventLoop {
    listener: TcpListener,
    pool: ConnectionPool,
    ledger: Ledger,
    max_response_bytes: usize,
    state: LoopState,
}

impl EventLoop {
    pub fn new(listener: TcpListener, ledger: Ledger, config: &ServerConfig) -> Self {
        Self {
            listener,
            pool: ConnectionPool::new(config.max_connections),
            ledger,
            max_response_bytes: config.max_response_bytes,
            state: LoopState::Idle,
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    /// Serves clients until `shutdown` resolves, then returns the ledger.
    ///
    /// Shutdown is checked first on every pass, so once it has fired no
    /// further connection is accepted and no further request dispatched.
    pub async fn run_until<F>(mut self, shutdown: F) -> Result<Ledger>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            self.transition(LoopState::Polling);
            let wake = select! {
                biased;
                _ = &mut shutdown => Wake::Shutdown,
                accepted = poll_fn(|cx| self.poll_sources(cx)) => Wake::Ready(accepted),
            };

            let accepted = match wake {
                Wake::Shutdown => break,
                Wake::Ready(accepted) => accepted,
            };

            self.transition(LoopState::Dispatching);
            if let Some(result) = accepted {
                self.handle_accept_result(result);
            }
            self.service_clients();
            self.transition(LoopState::Idle);

            // A busy pool never blocks in the poll; let the runtime drive
            // signals and timers before the next pass.
            if self.pool.has_pending() {
                tokio::task::yield_now().await;
            }
        }

        self.transition(LoopState::ShuttingDown);
        info!(
            open_connections = self.pool.len(),
            "event loop shutting down"
        );
        Ok(self.ledger)
    }

    /// Blocks (as a future) until the listener or some client has work.
    ///
    /// At most one connection is accepted per pass; it is handed back so
    /// the dispatch phase can admit it.
    fn poll_sources(&self, cx: &mut Context<'_>) -> Poll<Option<Accepted>> {
        let accepted = match self.listener.poll_accept(cx) {
            Poll::Ready(result) => Some(result),
            Poll::Pending => None,
        };
        let clients_ready = self.pool.poll_ready(cx).is_ready();

        if accepted.is_some() || clients_ready {
            Poll::Ready(accepted)
        } else {
            Poll::Pending
        }
    }

    fn handle_accept_result(&mut self, result: Accepted) {
        match result {
            Ok((stream, peer)) => match self.pool.admit(stream, peer) {
                Ok(slot) => info!(%peer, slot, "client connected"),
                Err(err) => warn!(%peer, error = %err, "rejected connection"),
            },
            Err(err) => warn!(error = ?err, "failed to accept connection"),
        }
    }

    /// Gives every client one read and at most one request, lowest slot first.
    fn service_clients(&mut self) {
        for index in self.pool.occupied() {
            self.service_slot(index);
        }
    }

    /// A slot still holding unsent output is only flushed: its next request
    /// waits until the peer has read the previous response.
    fn service_slot(&mut self, index: usize) {
        let Some(slot) = self.pool.slot_mut(index) else {
            return;
        };
        let peer = slot.peer();

        if slot.unsent() > 0 {
            if let Err(err) = slot.flush_available() {
                warn!(%peer, slot = index, error = ?err, "write failed");
                self.close(index);
                return;
            }
            if slot.unsent() > 0 {
                return;
            }
        }

        match slot.read_available() {
            ReadOutcome::Data(bytes) => debug!(%peer, slot = index, bytes, "received"),
            ReadOutcome::Closed => debug!(%peer, slot = index, "peer finished sending"),
            ReadOutcome::NotReady => {}
            ReadOutcome::Failed(err) => {
                warn!(%peer, slot = index, error = ?err, "read failed");
                self.close(index);
                return;
            }
        }

        if slot.reader().overflowed() {
            warn!(%peer, slot = index, "request line too long");
            self.close(index);
            return;
        }

        if let Some(line) = slot.reader_mut().next_line() {
            let response = handler::handle_line(&mut self.ledger, &line, self.max_response_bytes);
            slot.queue(&response);
            if let Err(err) = slot.flush_available() {
                warn!(%peer, slot = index, error = ?err, "write failed");
                self.close(index);
                return;
            }
            if slot.unsent() > 0 {
                debug!(
                    %peer,
                    slot = index,
                    unsent = slot.unsent(),
                    "peer not reading, response queued"
                );
            }
        }

        if slot.reader().is_drained() && slot.unsent() == 0 {
            self.close(index);
        }
    }

    fn close(&mut self, index: usize) {
        if let Some(peer) = self.pool.evict(index) {
            info!(%peer, slot = index, "client disconnected");
        }
    }

    fn transition(&mut self, next: LoopState) {
        debug!(from = ?self.state, to = ?next, "event loop state");
        self.state = next;
    }
}
