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

//! Transaction engine.
//!
//! The [`Engine`] owns the stores, the ownership table, the order book and the
//! audit log, and is the entry point for every caller-facing operation.
//!
//! # Operations
//!
//! - **Transfers**: debit one account and credit another as one unit.
//! - **Orders**: see [`Engine::place_order`].
//! - **Generic transactions**: [`Engine::begin`] hands out a [`Transaction`]
//!   for arbitrary sequences of debits, credits, reservations and releases.
//!
//! # Thread Safety
//!
//! The engine is `Sync`. Transactions on disjoint resources run in parallel;
//! transactions on overlapping resources are serialised by `begin`.

use crate::audit::{AuditEvent, AuditLog};
use crate::base::{AccountId, Money, OrderId, ProductId, ResourceId, TransactionId};
use crate::config::EngineConfig;
use crate::coordinator::Transaction;
use crate::error::{EngineError, ValidationError};
use crate::inventory::InventoryStore;
use crate::ledger::LedgerStore;
use crate::locks::ResourceLocks;
use crate::order::{Order, OrderBook};
use crate::transaction::{TransactionKind, TransactionRecord, TransactionStatus};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};

/// Owner id used for isolated single-resource reads. Real transactions start at 1.
const READER: TransactionId = TransactionId(0);

/// Result of a committed [`Engine::transfer`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferReceipt {
    pub transaction_id: TransactionId,
    pub status: TransactionStatus,
}

/// Atomic multi-resource transaction engine.
///
/// # Invariants
///
/// - Balances and stock never go negative.
/// - A resource is owned by at most one open transaction.
/// - A transaction record only moves `Open -> Completed` or `Open -> Failed`.
/// - Resources touched by a failed undo stay quarantined until [`Engine::reconcile`].
#[derive(Debug)]
pub struct Engine {
    pub(crate) ledger: LedgerStore,
    pub(crate) inventory: InventoryStore,
    pub(crate) orders: OrderBook,
    pub(crate) audit: AuditLog,
    locks: ResourceLocks,
    /// Untrusted resources and the transaction that corrupted them.
    quarantine: DashMap<ResourceId, TransactionId>,
    next_transaction: AtomicU64,
    next_order: AtomicU64,
    config: EngineConfig,
}

impl Engine {
    /// Creates an engine with empty stores and default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Engine {
            ledger: LedgerStore::new(),
            inventory: InventoryStore::new(),
            orders: OrderBook::new(),
            audit: AuditLog::new(),
            locks: ResourceLocks::new(),
            quarantine: DashMap::new(),
            next_transaction: AtomicU64::new(1),
            next_order: AtomicU64::new(1),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Raw store access. Reads here are not isolated from open transactions.
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// Raw store access. Reads here are not isolated from open transactions.
    pub fn inventory(&self) -> &InventoryStore {
        &self.inventory
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Seeds an account.
    pub fn open_account(
        &self,
        id: AccountId,
        owner: impl Into<String>,
        opening_balance: Money,
    ) -> Result<(), EngineError> {
        self.ledger.open_account(id, owner, opening_balance)?;
        tracing::debug!(account = %id, balance = %opening_balance, "account opened");
        Ok(())
    }

    /// Seeds a product.
    pub fn add_product(
        &self,
        id: ProductId,
        name: impl Into<String>,
        stock: u32,
        unit_price: Money,
    ) -> Result<(), EngineError> {
        self.inventory.add_product(id, name, stock, unit_price)?;
        tracing::debug!(product = %id, stock, price = %unit_price, "product added");
        Ok(())
    }

    /// Opens a transaction owning every resource in `resources`.
    ///
    /// Blocks until all of them are free (or the configured lock timeout
    /// elapses). Resources are deduplicated and claimed in sorted order.
    ///
    /// A thread must not begin a transaction on a resource it already owns
    /// through another open transaction: without a lock timeout it waits forever.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::NotLockable`] - an order id was declared.
    /// - [`EngineError::Quarantined`] - a declared resource is untrusted.
    /// - [`EngineError::LockTimeout`]
    pub fn begin(
        &self,
        kind: TransactionKind,
        resources: impl IntoIterator<Item = ResourceId>,
    ) -> Result<Transaction<'_>, EngineError> {
        let resources: Vec<ResourceId> = resources
            .into_iter()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        if let Some(resource) = resources.iter().find(|resource| !resource.is_lockable()) {
            return Err(ValidationError::NotLockable(*resource).into());
        }
        self.ensure_trusted(&resources)?;

        let id = TransactionId(self.next_transaction.fetch_add(1, Ordering::Relaxed));
        let ownership = self
            .locks
            .acquire(id, &resources, self.config.lock_timeout)?;
        // Quarantine may have grown while waiting.
        self.ensure_trusted(&resources)?;

        let record = TransactionRecord::open(id, kind, resources);
        self.audit.append(AuditEvent::Opened, &record);
        tracing::debug!(transaction = %id, ?kind, resources = ?record.resources, "transaction opened");
        Ok(Transaction::new(self, record, ownership))
    }

    /// Moves `amount` from one account to another.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::SelfTransfer`] / [`ValidationError::ZeroAmount`]
    /// - [`PreconditionFailure::InsufficientFunds`](crate::PreconditionFailure::InsufficientFunds)
    /// - [`PreconditionFailure::UnknownAccount`](crate::PreconditionFailure::UnknownAccount)
    /// - [`EngineError::ConsistencyCorruption`] if the debit could not be undone.
    pub fn transfer(
        &self,
        from: AccountId,
        to: AccountId,
        amount: Money,
    ) -> Result<TransferReceipt, EngineError> {
        if from == to {
            return Err(ValidationError::SelfTransfer(from).into());
        }
        if amount.is_zero() {
            return Err(ValidationError::ZeroAmount.into());
        }

        let mut txn = self.begin(
            TransactionKind::Transfer,
            [ResourceId::Account(from), ResourceId::Account(to)],
        )?;
        txn.debit(from, amount)?;
        txn.credit(to, amount)?;
        let record = txn.commit()?;

        tracing::info!(transaction = %record.id, %from, %to, %amount, "transfer committed");
        Ok(TransferReceipt {
            transaction_id: record.id,
            status: record.status,
        })
    }

    /// Balance of an account, never showing another transaction's partial work.
    ///
    /// Waits while the account is owned by an open transaction.
    pub fn balance(&self, account: AccountId) -> Result<Money, EngineError> {
        let _ownership = self.locks.acquire(
            READER,
            &[ResourceId::Account(account)],
            self.config.lock_timeout,
        )?;
        Ok(self.ledger.get_balance(account)?)
    }

    /// Stock of a product, never showing another transaction's partial work.
    ///
    /// Waits while the product is owned by an open transaction.
    pub fn stock(&self, product: ProductId) -> Result<u32, EngineError> {
        let _ownership = self.locks.acquire(
            READER,
            &[ResourceId::Product(product)],
            self.config.lock_timeout,
        )?;
        Ok(self.inventory.get_stock(product)?)
    }

    pub fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.get(id)
    }

    /// Committed orders, sorted by id.
    pub fn orders(&self) -> Vec<Order> {
        self.orders.all()
    }

    pub fn orders_for(&self, buyer: AccountId) -> Vec<Order> {
        self.orders.for_buyer(buyer)
    }

    /// Transaction currently owning `resource`, if any.
    pub fn owner_of(&self, resource: ResourceId) -> Option<TransactionId> {
        self.locks.owner_of(&resource)
    }

    /// Untrusted resources, sorted.
    pub fn quarantined(&self) -> Vec<ResourceId> {
        let mut resources: Vec<ResourceId> =
            self.quarantine.iter().map(|entry| *entry.key()).collect();
        resources.sort();
        resources
    }

    /// Clears the quarantine flag after the resource was repaired by hand.
    ///
    /// Returns the transaction that had corrupted it.
    pub fn reconcile(&self, resource: ResourceId) -> Option<TransactionId> {
        let (_, transaction) = self.quarantine.remove(&resource)?;
        tracing::warn!(%resource, %transaction, "resource reconciled");
        Some(transaction)
    }

    pub(crate) fn quarantine(&self, resources: &[ResourceId], transaction: TransactionId) {
        for resource in resources {
            self.quarantine.insert(*resource, transaction);
        }
    }

    pub(crate) fn next_order_id(&self) -> OrderId {
        OrderId(self.next_order.fetch_add(1, Ordering::Relaxed))
    }

    fn ensure_trusted(&self, resources: &[ResourceId]) -> Result<(), EngineError> {
        match resources
            .iter()
            .find(|resource| self.quarantine.contains_key(*resource))
        {
            Some(resource) => Err(EngineError::Quarantined(*resource)),
            None => Ok(()),
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
