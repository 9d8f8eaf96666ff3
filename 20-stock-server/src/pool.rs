//! Fixed-capacity table of client connections.
//!
//! Each occupied slot owns the socket, a [`LineBuffer`] holding whatever
//! part of the next request has arrived so far, and the unsent tail of the
//! last response. A line split across several reads is reassembled across
//! event-loop iterations; a response the peer is not reading stays queued on
//! the slot instead of blocking the loop.

use std::{
    io,
    net::SocketAddr,
    task::{Context, Poll},
};

use thiserror::Error;
use tokio::net::TcpStream;

/// Longest request line accepted before the connection is dropped.
pub const MAX_LINE: usize = 8192;

/// Upper bound on the bytes pulled off one socket per loop iteration.
const READ_CHUNK: usize = 4096;

#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    eof: bool,
}

impl LineBuffer {
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Records that the peer will send nothing more. A trailing partial line
    /// becomes deliverable as-is.
    pub fn mark_eof(&mut self) {
        self.eof = true;
    }

    pub fn is_eof(&self) -> bool {
        self.eof
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn has_line(&self) -> bool {
        self.buf.contains(&b'\n') || (self.eof && !self.buf.is_empty())
    }

    /// Takes the next complete line, newline included.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        match self.buf.iter().position(|&byte| byte == b'\n') {
            Some(pos) => Some(self.buf.drain(..=pos).collect()),
            None if self.eof && !self.buf.is_empty() => Some(std::mem::take(&mut self.buf)),
            None => None,
        }
    }

    /// True once more than [`MAX_LINE`] bytes are buffered with no newline.
    pub fn overflowed(&self) -> bool {
        self.buf.len() > MAX_LINE && !self.buf.contains(&b'\n')
    }

    /// Peer closed and every buffered byte has been handed out.
    pub fn is_drained(&self) -> bool {
        self.eof && self.buf.is_empty()
    }
}

#[derive(Debug)]
pub enum ReadOutcome {
    Data(usize),
    Closed,
    NotReady,
    Failed(io::Error),
}

#[derive(Debug)]
pub struct ConnectionSlot {
    stream: TcpStream,
    peer: SocketAddr,
    reader: LineBuffer,
    outbox: Vec<u8>,
}

impl ConnectionSlot {
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn stream_mut(&mut self) -> &mut TcpStream {
        &mut self.stream
    }

    pub fn reader(&self) -> &LineBuffer {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut LineBuffer {
        &mut self.reader
    }

    /// Performs at most one non-blocking read into the line buffer.
    ///
    /// Nothing is read while a complete line is already buffered, so a
    /// client that pipelines faster than it is served leaves the backlog in
    /// its socket rather than in memory.
    pub fn read_available(&mut self) -> ReadOutcome {
        if self.reader.is_eof() || self.reader.has_line() {
            return ReadOutcome::NotReady;
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.try_read(&mut chunk) {
            Ok(0) => {
                self.reader.mark_eof();
                ReadOutcome::Closed
            }
            Ok(n) => {
                self.reader.extend(&chunk[..n]);
                ReadOutcome::Data(n)
            }
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                ReadOutcome::NotReady
            }
            Err(err) => ReadOutcome::Failed(err),
        }
    }

    /// Queues response bytes behind anything not yet sent.
    pub fn queue(&mut self, bytes: &[u8]) {
        self.outbox.extend_from_slice(bytes);
    }

    /// Bytes queued but not yet accepted by the socket.
    pub fn unsent(&self) -> usize {
        self.outbox.len()
    }

    /// Writes as much queued output as the socket takes without waiting.
    pub fn flush_available(&mut self) -> io::Result<()> {
        while !self.outbox.is_empty() {
            match self.stream.try_write(&self.outbox) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.outbox.drain(..n);
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Work that can be done without waiting on the socket: a buffered
    /// line to answer, a finished peer to evict, or a runaway line to
    /// reject. A slot with unsent output has none until the peer reads.
    fn has_pending(&self) -> bool {
        self.outbox.is_empty()
            && (self.reader.has_line() || self.reader.is_drained() || self.reader.overflowed())
    }

    /// Unsent output waits for write readiness; otherwise the slot waits
    /// for input, unless it already has something to do.
    fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        if !self.outbox.is_empty() {
            return self.stream.poll_write_ready(cx).map(|_| ());
        }
        if self.has_pending() {
            return Poll::Ready(());
        }
        if self.reader.is_eof() {
            return Poll::Pending;
        }
        self.stream.poll_read_ready(cx).map(|_| ())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("connection pool is full ({capacity} slots)")]
pub struct PoolFull {
    pub capacity: usize,
}

#[derive(Debug)]
pub struct ConnectionPool {
    slots: Vec<Option<ConnectionSlot>>,
    /// Highest occupied index; iteration never goes past it.
    high_water: Option<usize>,
}

impl ConnectionPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(capacity).collect(),
            high_water: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.high_water.is_none()
    }

    /// Places the connection in the lowest free slot. When every slot is
    /// taken the stream is dropped, which closes it.
    pub fn admit(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<usize, PoolFull> {
        let Some(index) = self.slots.iter().position(Option::is_none) else {
            return Err(PoolFull {
                capacity: self.capacity(),
            });
        };

        self.slots[index] = Some(ConnectionSlot {
            stream,
            peer,
            reader: LineBuffer::default(),
            outbox: Vec::new(),
        });
        self.high_water = Some(self.high_water.map_or(index, |high| high.max(index)));
        Ok(index)
    }

    /// Closes the connection in `index` and frees the slot for reuse.
    pub fn evict(&mut self, index: usize) -> Option<SocketAddr> {
        let slot = self.slots.get_mut(index)?.take()?;
        if self.high_water == Some(index) {
            self.high_water = self.slots[..index].iter().rposition(Option::is_some);
        }
        Some(slot.peer)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut ConnectionSlot> {
        self.slots.get_mut(index)?.as_mut()
    }

    /// Occupied slot indices in ascending order.
    pub fn occupied(&self) -> Vec<usize> {
        self.bounded()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|_| index))
            .collect()
    }

    /// Peers currently being watched for input, by slot.
    pub fn watched(&self) -> impl Iterator<Item = (usize, SocketAddr)> + '_ {
        self.bounded()
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|slot| (index, slot.peer)))
    }

    /// Some slot can make progress without waiting, so the next poll must
    /// not block.
    pub fn has_pending(&self) -> bool {
        self.bounded().iter().flatten().any(ConnectionSlot::has_pending)
    }

    /// Registers interest in every open connection and reports whether any
    /// of them can make progress now.
    pub fn poll_ready(&self, cx: &mut Context<'_>) -> Poll<()> {
        let mut ready = false;
        for slot in self.bounded().iter().flatten() {
            // Every slot is polled so each one registers its waker.
            if slot.poll_ready(cx).is_ready() {
                ready = true;
            }
        }
        if ready {
            Poll::Ready(())
        } else {
            Poll::Pending
        }
    }

    fn bounded(&self) -> &[Option<ConnectionSlot>] {
        match self.high_water {
            Some(high) => &self.slots[..=high],
            None => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn connection(listener: &TcpListener) -> (TcpStream, TcpStream, SocketAddr) {
        let addr = listener.local_addr().expect("local addr");
        let client = TcpStream::connect(addr).await.expect("connect");
        let (server, peer) = listener.accept().await.expect("accept");
        (client, server, peer)
    }

    #[test]
    fn line_buffer_reassembles_split_lines() {
        let mut buffer = LineBuffer::default();
        buffer.extend(b"bu");
        assert!(!buffer.has_line());
        assert_eq!(buffer.next_line(), None);

        buffer.extend(b"y 1 2\nshow\nsel");
        assert_eq!(buffer.next_line().as_deref(), Some(&b"buy 1 2\n"[..]));
        assert_eq!(buffer.next_line().as_deref(), Some(&b"show\n"[..]));
        assert_eq!(buffer.next_line(), None);

        buffer.mark_eof();
        assert!(buffer.has_line());
        assert_eq!(buffer.next_line().as_deref(), Some(&b"sel"[..]));
        assert!(buffer.is_drained());
    }

    #[test]
    fn line_buffer_detects_runaway_lines() {
        let mut buffer = LineBuffer::default();
        buffer.extend(&vec![b'a'; MAX_LINE]);
        assert!(!buffer.overflowed());
        buffer.extend(b"a");
        assert!(buffer.overflowed());
    }

    #[tokio::test]
    async fn admit_reuses_lowest_free_slot() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let mut pool = ConnectionPool::new(4);
        let mut clients = Vec::new();

        for expected in 0..3 {
            let (client, server, peer) = connection(&listener).await;
            clients.push(client);
            assert_eq!(pool.admit(server, peer), Ok(expected));
        }

        assert!(pool.evict(1).is_some());
        assert_eq!(pool.occupied(), vec![0, 2]);

        let (client, server, peer) = connection(&listener).await;
        clients.push(client);
        assert_eq!(pool.admit(server, peer), Ok(1));
        assert_eq!(pool.len(), 3);
    }

    #[tokio::test]
    async fn full_pool_rejects_and_high_water_shrinks() {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let mut pool = ConnectionPool::new(2);
        let mut clients = Vec::new();

        for _ in 0..2 {
            let (client, server, peer) = connection(&listener).await;
            clients.push(client);
            pool.admit(server, peer).expect("room in pool");
        }

        let (client, server, peer) = connection(&listener).await;
        clients.push(client);
        assert_eq!(pool.admit(server, peer), Err(PoolFull { capacity: 2 }));

        assert!(pool.evict(1).is_some());
        assert_eq!(pool.watched().map(|(index, _)| index).collect::<Vec<_>>(), vec![0]);
        assert!(pool.evict(0).is_some());
        assert!(pool.is_empty());
        assert!(pool.evict(0).is_none());
    }

    #[tokio::test]
    async fn read_available_collects_bytes_then_eof() {
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let (mut client, server, peer) = connection(&listener).await;
        let mut pool = ConnectionPool::new(1);
        let index = pool.admit(server, peer).expect("admit");

        client.write_all(b"show\n").await.expect("write");
        client.shutdown().await.expect("shutdown");

        let slot = pool.slot_mut(index).expect("slot");
        let mut received = 0;
        let mut lines = Vec::new();
        loop {
            if let Some(line) = slot.reader_mut().next_line() {
                lines.push(line);
                continue;
            }
            slot.stream_mut().readable().await.expect("readable");
            match slot.read_available() {
                ReadOutcome::Data(n) => received += n,
                ReadOutcome::Closed => break,
                ReadOutcome::NotReady => continue,
                ReadOutcome::Failed(err) => panic!("read failed: {err}"),
            }
        }
        assert_eq!(received, 5);
        assert_eq!(lines, vec![b"show\n".to_vec()]);
        assert!(slot.reader().is_drained());
        assert!(pool.has_pending());
    }

    #[tokio::test]
    async fn no_read_while_a_line_is_waiting() {
        use tokio::io::AsyncWriteExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let (mut client, server, peer) = connection(&listener).await;
        let mut pool = ConnectionPool::new(1);
        let index = pool.admit(server, peer).expect("admit");

        client.write_all(b"show\n").await.expect("write");
        let slot = pool.slot_mut(index).expect("slot");
        slot.stream_mut().readable().await.expect("readable");
        assert!(matches!(slot.read_available(), ReadOutcome::Data(5)));

        client.write_all(b"buy 1 1\n").await.expect("write");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(matches!(slot.read_available(), ReadOutcome::NotReady));
        assert_eq!(slot.reader().len(), 5);

        assert_eq!(slot.reader_mut().next_line().as_deref(), Some(&b"show\n"[..]));
        slot.stream_mut().readable().await.expect("readable");
        assert!(matches!(slot.read_available(), ReadOutcome::Data(8)));
    }

    #[tokio::test]
    async fn queued_output_blocks_pending_work_until_sent() {
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let (mut client, server, peer) = connection(&listener).await;
        let mut pool = ConnectionPool::new(1);
        let index = pool.admit(server, peer).expect("admit");

        let slot = pool.slot_mut(index).expect("slot");
        slot.reader_mut().extend(b"show\n");
        slot.queue(b"[buy] success\n");
        assert!(!pool.has_pending());

        let slot = pool.slot_mut(index).expect("slot");
        slot.stream_mut().writable().await.expect("writable");
        slot.flush_available().expect("flush");
        assert_eq!(slot.unsent(), 0);
        assert!(pool.has_pending());

        let mut received = [0u8; 14];
        client.read_exact(&mut received).await.expect("read");
        assert_eq!(&received, b"[buy] success\n");
    }
}
