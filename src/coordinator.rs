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

//! Unit of work with eager application and stack-ordered undo.
//!
//! A [`Transaction`] is obtained from [`Engine::begin`] and owns every
//! resource it declared until it reaches a terminal status.
//!
//! ```text
//!   begin ──► Open ──commit──────────────────────► Completed
//!              │
//!              ├──rollback / refused op / drop ──► Failed
//!              │                                    │
//!              └──────────── an undo step fails ───►└─ + ConsistencyCorruption
//! ```
//!
//! Operations are applied to the stores as soon as they are staged. When the
//! transaction fails, applied operations are undone last-first, so a
//! reservation followed by a debit is reversed debit-first.

use crate::audit::AuditEvent;
use crate::base::{AccountId, Money, ProductId, ResourceId, TransactionId};
use crate::engine::Engine;
use crate::error::{EngineError, PreconditionFailure, ValidationError};
use crate::locks::Ownership;
use crate::order::Order;
use crate::transaction::{
    Action, FailureCause, Op, Operation, TransactionKind, TransactionRecord, TransactionStatus,
};

/// An open unit of work.
///
/// Dropping a transaction that is still open rolls it back.
#[derive(Debug)]
pub struct Transaction<'e> {
    engine: &'e Engine,
    record: TransactionRecord,
    ownership: Option<Ownership<'e>>,
    /// Order snapshots staged in this transaction, published on commit.
    orders: Vec<Order>,
}

impl<'e> Transaction<'e> {
    pub(crate) fn new(engine: &'e Engine, record: TransactionRecord, ownership: Ownership<'e>) -> Self {
        Self {
            engine,
            record,
            ownership: Some(ownership),
            orders: Vec::new(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.record.id
    }

    pub fn kind(&self) -> TransactionKind {
        self.record.kind
    }

    pub fn status(&self) -> TransactionStatus {
        self.record.status
    }

    pub fn record(&self) -> &TransactionRecord {
        &self.record
    }

    /// Order snapshots staged so far. Marked failed if the transaction rolled back.
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Applies `op` immediately, or rolls the whole transaction back.
    ///
    /// # Errors
    ///
    /// - [`EngineError::NotOpen`] - the transaction already finished.
    /// - [`EngineError::Validation`] - undeclared resource or empty amount. The
    ///   operation is ignored and the transaction stays open.
    /// - [`EngineError::Precondition`] - the store refused the operation.
    ///   Everything applied so far has been undone and the transaction failed.
    /// - [`EngineError::ConsistencyCorruption`] - the store refused the
    ///   operation and undoing the earlier ones failed too.
    pub fn stage(&mut self, op: Op) -> Result<(), EngineError> {
        self.ensure_open()?;
        self.ensure_owned(op.resource())?;
        if op.is_empty() {
            return Err(match op {
                Op::Reserve { product, .. } | Op::Release { product, .. } => {
                    ValidationError::ZeroQuantity(product)
                }
                Op::Debit { .. } | Op::Credit { .. } => ValidationError::ZeroAmount,
            }
            .into());
        }

        let mut operation = Operation::new(self.next_sequence(), op.into());
        match self.apply(&operation.action) {
            Ok(()) => {
                tracing::trace!(
                    transaction = %self.record.id,
                    sequence = operation.sequence,
                    action = ?operation.action,
                    "applied"
                );
                operation.applied = true;
                self.record.operations.push(operation);
                Ok(())
            }
            Err(failure) => {
                tracing::debug!(
                    transaction = %self.record.id,
                    sequence = operation.sequence,
                    %failure,
                    "operation refused, rolling back"
                );
                self.abort(FailureCause::Precondition {
                    operation,
                    failure: failure.clone(),
                })?;
                Err(failure.into())
            }
        }
    }

    pub fn debit(&mut self, account: AccountId, amount: Money) -> Result<(), EngineError> {
        self.stage(Op::Debit { account, amount })
    }

    pub fn credit(&mut self, account: AccountId, amount: Money) -> Result<(), EngineError> {
        self.stage(Op::Credit { account, amount })
    }

    pub fn reserve(&mut self, product: ProductId, quantity: u32) -> Result<(), EngineError> {
        self.stage(Op::Reserve { product, quantity })
    }

    pub fn release(&mut self, product: ProductId, quantity: u32) -> Result<(), EngineError> {
        self.stage(Op::Release { product, quantity })
    }

    /// Stages an order snapshot as the record of this unit of work.
    ///
    /// The buyer and every line product must be owned by this transaction.
    /// The snapshot becomes visible in the order book only when the
    /// transaction commits.
    pub(crate) fn stage_order(&mut self, order: Order) -> Result<(), EngineError> {
        self.ensure_open()?;
        debug_assert_eq!(order.transaction(), self.record.id);
        self.ensure_owned(ResourceId::Account(order.buyer()))?;
        for line in order.lines() {
            self.ensure_owned(ResourceId::Product(line.product))?;
        }

        let mut operation = Operation::new(
            self.next_sequence(),
            Action::RecordOrder {
                order: order.id(),
                total: order.total(),
            },
        );
        operation.applied = true;
        self.record.operations.push(operation);
        self.orders.push(order);
        Ok(())
    }

    /// Balance of an owned account.
    pub fn balance(&self, account: AccountId) -> Result<Money, EngineError> {
        self.ensure_open()?;
        self.ensure_owned(ResourceId::Account(account))?;
        Ok(self.engine.ledger.get_balance(account)?)
    }

    /// Stock of an owned product.
    pub fn stock(&self, product: ProductId) -> Result<u32, EngineError> {
        self.ensure_open()?;
        self.ensure_owned(ResourceId::Product(product))?;
        Ok(self.engine.inventory.get_stock(product)?)
    }

    /// Current unit price of an owned product.
    pub fn unit_price(&self, product: ProductId) -> Result<Money, EngineError> {
        self.ensure_open()?;
        self.ensure_owned(ResourceId::Product(product))?;
        Ok(self.engine.inventory.unit_price(product)?)
    }

    /// Makes every applied operation final and releases ownership.
    pub fn commit(mut self) -> Result<TransactionRecord, EngineError> {
        self.ensure_open()?;
        self.record.finish(TransactionStatus::Completed);

        // Orders become visible before ownership is released.
        for mut order in self.orders.drain(..) {
            order.mark_completed();
            if let Err(rejected) = self.engine.orders.publish(order) {
                tracing::error!(
                    transaction = %self.record.id,
                    order = %rejected.id(),
                    "order id already published, keeping the existing order"
                );
            }
        }
        self.engine.audit.append(AuditEvent::Completed, &self.record);
        self.ownership = None;

        tracing::debug!(
            transaction = %self.record.id,
            operations = self.record.operations.len(),
            "committed"
        );
        Ok(self.record.clone())
    }

    /// Undoes every applied operation, last first, and marks the transaction failed.
    pub fn rollback(mut self) -> Result<TransactionRecord, EngineError> {
        self.ensure_open()?;
        self.abort(FailureCause::RolledBack)?;
        Ok(self.record.clone())
    }

    fn ensure_open(&self) -> Result<(), EngineError> {
        if self.record.status == TransactionStatus::Open {
            Ok(())
        } else {
            Err(EngineError::NotOpen {
                transaction: self.record.id,
                status: self.record.status,
            })
        }
    }

    fn ensure_owned(&self, resource: ResourceId) -> Result<(), EngineError> {
        let owned = self
            .ownership
            .as_ref()
            .is_some_and(|ownership| ownership.covers(&resource));
        if owned {
            Ok(())
        } else {
            Err(ValidationError::UndeclaredResource(resource).into())
        }
    }

    fn next_sequence(&self) -> u32 {
        self.record.operations.len() as u32
    }

    fn apply(&self, action: &Action) -> Result<(), PreconditionFailure> {
        let engine = self.engine;
        match *action {
            Action::Debit { account, amount } => engine.ledger.try_debit(account, amount),
            Action::Credit { account, amount } => engine.ledger.credit(account, amount),
            Action::Reserve { product, quantity } => engine.inventory.try_reserve(product, quantity),
            Action::Release { product, quantity } => engine.inventory.release(product, quantity),
            Action::RecordOrder { .. } => Ok(()),
        }
    }

    fn undo(&mut self, action: &Action) -> Result<(), PreconditionFailure> {
        let engine = self.engine;
        match *action {
            Action::Debit { account, amount } => engine.ledger.credit(account, amount),
            Action::Credit { account, amount } => engine.ledger.try_debit(account, amount),
            Action::Reserve { product, quantity } => engine.inventory.release(product, quantity),
            Action::Release { product, quantity } => {
                engine.inventory.try_reserve(product, quantity)
            }
            Action::RecordOrder { order, .. } => {
                if let Some(draft) = self.orders.iter_mut().find(|draft| draft.id() == order) {
                    draft.mark_failed();
                }
                Ok(())
            }
        }
    }

    /// Reverses applied operations in stack order and fails the transaction.
    ///
    /// Every applied operation gets an undo attempt even after one of them
    /// fails. Resources whose undo failed are quarantined and reported.
    fn abort(&mut self, cause: FailureCause) -> Result<(), EngineError> {
        let mut corrupted: Vec<ResourceId> = Vec::new();
        let mut first_undo_failure: Option<PreconditionFailure> = None;

        for index in (0..self.record.operations.len()).rev() {
            if !self.record.operations[index].applied {
                continue;
            }
            let action = self.record.operations[index].action;
            match self.undo(&action) {
                Ok(()) => {
                    let operation = &mut self.record.operations[index];
                    operation.applied = false;
                    self.record.compensations.push(operation.sequence);
                }
                Err(failure) => {
                    tracing::error!(
                        transaction = %self.record.id,
                        sequence = self.record.operations[index].sequence,
                        action = ?action,
                        %failure,
                        "undo failed"
                    );
                    corrupted.push(action.resource());
                    first_undo_failure.get_or_insert(failure);
                }
            }
        }

        self.record.failure = Some(cause);
        self.record.finish(TransactionStatus::Failed);

        let Some(undo_failure) = first_undo_failure else {
            self.engine.audit.append(AuditEvent::Failed, &self.record);
            self.ownership = None;
            return Ok(());
        };

        corrupted.sort();
        corrupted.dedup();
        self.record.corrupted_resources = corrupted.clone();
        self.engine.quarantine(&corrupted, self.record.id);
        self.engine.audit.append(AuditEvent::Corrupted, &self.record);
        self.ownership = None;

        Err(EngineError::ConsistencyCorruption {
            transaction: self.record.id,
            resources: corrupted,
            cause: undo_failure.to_string(),
        })
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.record.status != TransactionStatus::Open {
            return;
        }
        tracing::warn!(transaction = %self.record.id, "transaction dropped while open, rolling back");
        if let Err(error) = self.abort(FailureCause::Abandoned) {
            tracing::error!(transaction = %self.record.id, %error, "rollback of abandoned transaction failed");
        }
    }
}
