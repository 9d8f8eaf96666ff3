//! In-memory inventory ledger.
//!
//! Records are keyed by `id` in a `BTreeMap`, so lookups and inserts are
//! logarithmic and iteration is always in ascending id order. The listing
//! sent to clients and the snapshot written at shutdown both rely on that
//! ordering.
//!
//! The ledger is owned by the event loop and only ever touched from its
//! task, so records carry no locks of their own.

use std::collections::BTreeMap;

use thiserror::Error;

/// One stock item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryRecord {
    pub id: i64,
    pub available: u64,
    pub unit_price: i64,
}

/// Failures of ledger operations. None of these are fatal to the server;
/// the request handler turns each into a response line for the client.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("unknown id {0}")]
    UnknownId(i64),
    #[error("duplicate id {0}")]
    DuplicateId(i64),
    #[error("invalid quantity {0}")]
    NegativeQuantity(i64),
    #[error("not enough stock for id {id}: {available} available, {requested} requested")]
    InsufficientStock {
        id: i64,
        available: u64,
        requested: u64,
    },
    #[error("stock overflow for id {0}")]
    Overflow(i64),
}

#[derive(Debug, Default)]
pub struct Ledger {
    records: BTreeMap<i64, InventoryRecord>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a new record. Ids are unique; inserting an id that is already
    /// present leaves the ledger untouched and reports `DuplicateId`.
    pub fn insert(&mut self, id: i64, available: u64, unit_price: i64) -> Result<(), LedgerError> {
        if self.records.contains_key(&id) {
            return Err(LedgerError::DuplicateId(id));
        }
        self.records.insert(
            id,
            InventoryRecord {
                id,
                available,
                unit_price,
            },
        );
        Ok(())
    }

    pub fn get(&self, id: i64) -> Option<&InventoryRecord> {
        self.records.get(&id)
    }

    /// Records in ascending id order. Every call starts a fresh traversal.
    pub fn iter(&self) -> impl Iterator<Item = &InventoryRecord> + '_ {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Removes `quantity` units from stock.
    ///
    /// Fails closed: if fewer than `quantity` units are available the record
    /// is left unchanged and `InsufficientStock` is returned, so `available`
    /// can never go negative.
    pub fn buy(&mut self, id: i64, quantity: i64) -> Result<&InventoryRecord, LedgerError> {
        let requested = non_negative(quantity)?;
        let record = self.records.get_mut(&id).ok_or(LedgerError::UnknownId(id))?;
        if record.available < requested {
            return Err(LedgerError::InsufficientStock {
                id,
                available: record.available,
                requested,
            });
        }
        record.available -= requested;
        Ok(&*record)
    }

    /// Adds `quantity` units to stock. There is no upper bound other than
    /// the width of the counter itself.
    pub fn sell(&mut self, id: i64, quantity: i64) -> Result<&InventoryRecord, LedgerError> {
        let added = non_negative(quantity)?;
        let record = self.records.get_mut(&id).ok_or(LedgerError::UnknownId(id))?;
        record.available = record
            .available
            .checked_add(added)
            .ok_or(LedgerError::Overflow(id))?;
        Ok(&*record)
    }

    /// Releases every record. Consuming `self` makes this a one-way
    /// transition; returns how many records were dropped.
    pub fn teardown(self) -> usize {
        let released = self.records.len();
        drop(self.records);
        released
    }
}

fn non_negative(quantity: i64) -> Result<u64, LedgerError> {
    u64::try_from(quantity).map_err(|_| LedgerError::NegativeQuantity(quantity))
}
