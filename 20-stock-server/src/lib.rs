//! Shared stock ledger served over a line-oriented TCP protocol.
//!
//! Clients send one request per line (`show`, `buy <id> <qty>`,
//! `sell <id> <qty>`) and get one response back. A single task multiplexes
//! every connection, so requests never run concurrently against the ledger.
//!
//! - [`ledger`] holds the records, ordered by id.
//! - [`snapshot`] reads and writes the on-disk text form of the ledger.
//! - [`pool`] tracks connected clients, their partially read lines and
//!   unsent responses.
//! - [`protocol`] parses request lines; [`handler`] executes them.
//! - [`server`] is the readiness loop tying the pieces together.
//! - [`lifecycle`] loads the snapshot at startup and persists it on shutdown.
//! - [`cli`] and [`config`] describe how the server is started.

pub mod cli;
pub mod config;
pub mod handler;
pub mod ledger;
pub mod lifecycle;
pub mod pool;
pub mod protocol;
pub mod server;
pub mod snapshot;
