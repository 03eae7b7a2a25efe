//! Append-only witness log
//!
//! Audit trail of agent actions. Entries record what happened and a
//! hash of the data involved, never the data itself, and they outlive
//! the identity they describe: deleting an account appends to the log
//! rather than pruning it.

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::sha256_hex;
use crate::types::Address;

/// Monotonically increasing entry number
pub type WitnessSequence = u64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WitnessAction {
    Registered,
    Authenticated,
    AuthenticationFailed,
    AccountDeleted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WitnessEntry {
    pub seq: WitnessSequence,
    pub id: Uuid,
    pub address: Address,
    pub action: WitnessAction,
    pub timestamp: DateTime<Utc>,
    /// SHA-256 of the JSON-serialized action data
    pub data_hash: String,
}

pub struct WitnessLog {
    entries: DashMap<Address, Vec<WitnessEntry>>,
    next_seq: AtomicU64,
}

impl WitnessLog {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            next_seq: AtomicU64::new(1),
        }
    }

    pub fn record(
        &self,
        address: &Address,
        action: WitnessAction,
        data: &serde_json::Value,
        timestamp: DateTime<Utc>,
    ) -> WitnessEntry {
        let data_hash = sha256_hex(data.to_string().as_bytes());

        // Sequence is assigned under the per-address lock so each
        // address's history is ordered by seq.
        let mut history = self.entries.entry(address.clone()).or_default();
        let entry = WitnessEntry {
            seq: self.next_seq.fetch_add(1, Ordering::SeqCst),
            id: Uuid::new_v4(),
            address: address.clone(),
            action,
            timestamp,
            data_hash,
        };
        history.push(entry.clone());
        entry
    }

    /// Full history for an address, oldest first
    pub fn history(&self, address: &Address) -> Vec<WitnessEntry> {
        self.entries
            .get(address)
            .map(|r| r.value().clone())
            .unwrap_or_default()
    }

    pub fn current_seq(&self) -> WitnessSequence {
        self.next_seq.load(Ordering::SeqCst) - 1
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|r| r.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> Vec<WitnessEntry> {
        let mut all: Vec<WitnessEntry> = self
            .entries
            .iter()
            .flat_map(|r| r.value().clone())
            .collect();
        all.sort_by_key(|e| e.seq);
        all
    }

    /// Rebuild from persisted entries; the sequence resumes after the
    /// highest one seen.
    pub fn restore(&self, entries: Vec<WitnessEntry>) {
        let mut max_seq = self.current_seq();
        for entry in entries {
            max_seq = max_seq.max(entry.seq);
            self.entries
                .entry(entry.address.clone())
                .or_default()
                .push(entry);
        }
        for mut history in self.entries.iter_mut() {
            history.sort_by_key(|e| e.seq);
        }
        self.next_seq.store(max_seq + 1, Ordering::SeqCst);
    }
}

impl Default for WitnessLog {
    fn default() -> Self {
        Self::new()
    }
}
