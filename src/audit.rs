// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Append-only audit log of transaction transitions.
//!
//! Every transition of a [`TransactionRecord`] is captured as a full snapshot:
//! when it opens, when it completes, when it fails, and when a failed undo
//! escalates to corruption. Entries are never mutated or removed.

use crate::base::TransactionId;
use crate::transaction::TransactionRecord;
use chrono::{DateTime, Utc};
use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEvent {
    Opened,
    Completed,
    Failed,
    /// An undo step failed. The record's status is `Failed`.
    Corrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEntry {
    /// Position in the log, starting at 0.
    pub sequence: u64,
    pub recorded_at: DateTime<Utc>,
    pub event: AuditEvent,
    pub record: TransactionRecord,
}

#[derive(Debug, Default)]
pub struct AuditLog {
    entries: RwLock<Vec<AuditEntry>>,
    subscribers: Mutex<Vec<Sender<AuditEntry>>>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn append(&self, event: AuditEvent, record: &TransactionRecord) -> u64 {
        let mut entries = self.entries.write();
        let entry = AuditEntry {
            sequence: entries.len() as u64,
            recorded_at: Utc::now(),
            event,
            record: record.clone(),
        };

        match event {
            AuditEvent::Corrupted => tracing::error!(
                transaction = %record.id,
                resources = ?record.corrupted_resources,
                "transaction left resources inconsistent"
            ),
            AuditEvent::Failed => tracing::debug!(
                transaction = %record.id,
                compensations = ?record.compensations,
                "transaction failed"
            ),
            _ => tracing::trace!(transaction = %record.id, ?event, "audit"),
        }

        // Publish while still holding the write lock so subscribers see sequence order.
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(entry.clone()).is_ok());

        let sequence = entry.sequence;
        entries.push(entry);
        sequence
    }

    /// Receives every entry appended after this call.
    pub fn subscribe(&self) -> Receiver<AuditEntry> {
        let (sender, receiver) = channel::unbounded();
        self.subscribers.lock().push(sender);
        receiver
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.read().clone()
    }

    /// Every entry for one transaction, oldest first.
    pub fn for_transaction(&self, id: TransactionId) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.record.id == id)
            .cloned()
            .collect()
    }

    /// Most recent snapshot of one transaction.
    pub fn latest(&self, id: TransactionId) -> Option<AuditEntry> {
        self.entries
            .read()
            .iter()
            .rev()
            .find(|entry| entry.record.id == id)
            .cloned()
    }

    pub fn corruptions(&self) -> Vec<AuditEntry> {
        self.entries
            .read()
            .iter()
            .filter(|entry| entry.event == AuditEvent::Corrupted)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Writes the whole log as one JSON object per line.
    pub fn write_json_lines<W: Write>(&self, mut writer: W) -> io::Result<()> {
        for entry in self.entries.read().iter() {
            serde_json::to_writer(&mut writer, entry)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}
