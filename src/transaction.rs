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

//! Transaction records.
//!
//! Records follow a state machine:
//! - [`Open`] → [`Completed`] (via commit)
//! - [`Open`] → [`Failed`] (via rollback, a refused operation, or drop)
//!
//! [`Open`]: TransactionStatus::Open
//! [`Completed`]: TransactionStatus::Completed
//! [`Failed`]: TransactionStatus::Failed

use crate::base::{AccountId, Money, OrderId, ProductId, ResourceId, ResourceType, TransactionId};
use crate::error::PreconditionFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Transfer,
    Order,
    Generic,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionStatus::Open)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Open => write!(f, "open"),
            TransactionStatus::Completed => write!(f, "completed"),
            TransactionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// A mutation a caller can stage against a store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Debit { account: AccountId, amount: Money },
    Credit { account: AccountId, amount: Money },
    Reserve { product: ProductId, quantity: u32 },
    Release { product: ProductId, quantity: u32 },
}

impl Op {
    pub fn resource(&self) -> ResourceId {
        match self {
            Op::Debit { account, .. } | Op::Credit { account, .. } => ResourceId::Account(*account),
            Op::Reserve { product, .. } | Op::Release { product, .. } => {
                ResourceId::Product(*product)
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        match self {
            Op::Debit { amount, .. } | Op::Credit { amount, .. } => amount.is_zero(),
            Op::Reserve { quantity, .. } | Op::Release { quantity, .. } => *quantity == 0,
        }
    }
}

/// An applied mutation as it is recorded in the transaction history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Debit { account: AccountId, amount: Money },
    Credit { account: AccountId, amount: Money },
    Reserve { product: ProductId, quantity: u32 },
    Release { product: ProductId, quantity: u32 },
    RecordOrder { order: OrderId, total: Money },
}

impl From<Op> for Action {
    fn from(op: Op) -> Self {
        match op {
            Op::Debit { account, amount } => Action::Debit { account, amount },
            Op::Credit { account, amount } => Action::Credit { account, amount },
            Op::Reserve { product, quantity } => Action::Reserve { product, quantity },
            Op::Release { product, quantity } => Action::Release { product, quantity },
        }
    }
}

impl Action {
    pub fn resource(&self) -> ResourceId {
        match self {
            Action::Debit { account, .. } | Action::Credit { account, .. } => {
                ResourceId::Account(*account)
            }
            Action::Reserve { product, .. } | Action::Release { product, .. } => {
                ResourceId::Product(*product)
            }
            Action::RecordOrder { order, .. } => ResourceId::Order(*order),
        }
    }

    /// Signed change to the resource counter: balance, stock, or order total.
    pub fn delta(&self) -> i64 {
        let clamp = |value: u64| i64::try_from(value).unwrap_or(i64::MAX);
        match self {
            Action::Debit { amount, .. } => -clamp(amount.minor()),
            Action::Credit { amount, .. } => clamp(amount.minor()),
            Action::Reserve { quantity, .. } => -i64::from(*quantity),
            Action::Release { quantity, .. } => i64::from(*quantity),
            Action::RecordOrder { total, .. } => clamp(total.minor()),
        }
    }

    /// Human readable precondition checked before the action is applied.
    pub fn precondition(&self) -> String {
        match self {
            Action::Debit { account, amount } => format!("balance({account}) >= {amount}"),
            Action::Credit { account, .. } => format!("account {account} exists"),
            Action::Reserve { product, quantity } => format!("stock({product}) >= {quantity}"),
            Action::Release { product, .. } => format!("product {product} exists"),
            Action::RecordOrder { .. } => "order total equals sum of line totals".to_string(),
        }
    }
}

/// One staged operation of a transaction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Operation {
    /// Position in the transaction, starting at 0.
    pub sequence: u32,
    pub resource_type: ResourceType,
    pub resource: ResourceId,
    pub action: Action,
    pub delta: i64,
    pub precondition: String,
    /// True once the mutation has been applied to the store.
    pub applied: bool,
}

impl Operation {
    pub(crate) fn new(sequence: u32, action: Action) -> Self {
        let resource = action.resource();
        Self {
            sequence,
            resource_type: resource.resource_type(),
            resource,
            action,
            delta: action.delta(),
            precondition: action.precondition(),
            applied: false,
        }
    }
}

/// Why a transaction ended up [`TransactionStatus::Failed`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum FailureCause {
    /// A staged operation was refused by its store.
    Precondition {
        operation: Operation,
        failure: PreconditionFailure,
    },
    /// The caller rolled back explicitly.
    RolledBack,
    /// The transaction was dropped while still open.
    Abandoned,
}

/// Snapshot of a unit of work.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransactionRecord {
    pub id: TransactionId,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    /// Resources owned for the lifetime of the transaction, sorted.
    pub resources: Vec<ResourceId>,
    /// Operations in application order. Refused operations are not listed.
    pub operations: Vec<Operation>,
    /// Sequence numbers of undone operations, in the order they were undone.
    pub compensations: Vec<u32>,
    pub failure: Option<FailureCause>,
    /// Resources whose undo step failed.
    pub corrupted_resources: Vec<ResourceId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    pub(crate) fn open(id: TransactionId, kind: TransactionKind, resources: Vec<ResourceId>) -> Self {
        Self {
            id,
            kind,
            status: TransactionStatus::Open,
            resources,
            operations: Vec::new(),
            compensations: Vec::new(),
            failure: None,
            corrupted_resources: Vec::new(),
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_corrupted(&self) -> bool {
        !self.corrupted_resources.is_empty()
    }

    /// Operations that are currently applied to the stores.
    pub fn applied(&self) -> impl Iterator<Item = &Operation> {
        self.operations.iter().filter(|op| op.applied)
    }

    /// Moves the record to a terminal status. Terminal records never change again.
    pub(crate) fn finish(&mut self, status: TransactionStatus) {
        debug_assert!(
            !self.status.is_terminal(),
            "Invariant violated: transaction {} left terminal status {}",
            self.id,
            self.status
        );
        debug_assert!(status.is_terminal());
        self.status = status;
        self.completed_at = Some(Utc::now());
    }
}
