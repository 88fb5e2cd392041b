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

//! Orders and the order coordinator.
//!
//! Placing an order is one transaction:
//!
//! 1. reserve every line, in line order;
//! 2. debit the buyer for `Σ quantity × current unit price`;
//! 3. stage an immutable snapshot of the order with the prices just read;
//! 4. commit.
//!
//! Any refusal along the way rolls back everything staged before it, so a
//! failed order never leaves reserved stock or a charged buyer behind.

use crate::base::{AccountId, Money, OrderId, ProductId, ResourceId, TransactionId};
use crate::engine::Engine;
use crate::error::{EngineError, ValidationError};
use crate::transaction::TransactionKind;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Staged in an open transaction.
    Pending,
    /// Committed. Terminal and immutable.
    Completed,
    /// Its transaction rolled back. Never published.
    Failed,
}

/// A requested order line.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LineItem {
    pub product: ProductId,
    pub quantity: u32,
}

impl LineItem {
    pub fn new(product: ProductId, quantity: u32) -> Self {
        Self { product, quantity }
    }
}

/// A line of a placed order, priced at purchase time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderLine {
    pub order: OrderId,
    pub product: ProductId,
    pub quantity: u32,
    /// Unit price captured when the order was placed.
    pub unit_price: Money,
}

impl OrderLine {
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// An order snapshot.
///
/// The total is computed once from the lines when the snapshot is built and
/// the fields are read-only, so `total == Σ line_total` always holds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    buyer: AccountId,
    transaction: TransactionId,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    total: Money,
    placed_at: DateTime<Utc>,
}

impl Order {
    /// Builds a pending snapshot from `(line, unit price)` pairs.
    ///
    /// # Errors
    ///
    /// [`ValidationError::AmountOverflow`] if the total does not fit in [`Money`].
    pub(crate) fn draft(
        id: OrderId,
        buyer: AccountId,
        transaction: TransactionId,
        priced: impl IntoIterator<Item = (LineItem, Money)>,
    ) -> Result<Self, ValidationError> {
        let lines: Vec<OrderLine> = priced
            .into_iter()
            .map(|(item, unit_price)| OrderLine {
                order: id,
                product: item.product,
                quantity: item.quantity,
                unit_price,
            })
            .collect();

        let total = lines.iter().try_fold(Money::ZERO, |sum, line| {
            line.line_total()
                .and_then(|line_total| sum.checked_add(line_total))
                .ok_or(ValidationError::AmountOverflow)
        })?;

        Ok(Self {
            id,
            buyer,
            transaction,
            status: OrderStatus::Pending,
            lines,
            total,
            placed_at: Utc::now(),
        })
    }

    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn buyer(&self) -> AccountId {
        self.buyer
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total(&self) -> Money {
        self.total
    }

    pub fn placed_at(&self) -> DateTime<Utc> {
        self.placed_at
    }

    pub(crate) fn mark_completed(&mut self) {
        debug_assert_eq!(self.status, OrderStatus::Pending);
        self.status = OrderStatus::Completed;
    }

    pub(crate) fn mark_failed(&mut self) {
        debug_assert_eq!(self.status, OrderStatus::Pending);
        self.status = OrderStatus::Failed;
    }
}

/// Committed orders.
#[derive(Debug, Default)]
pub struct OrderBook {
    orders: DashMap<OrderId, Order>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a completed order. An id already in the book is never replaced;
    /// the rejected order is handed back.
    pub(crate) fn publish(&self, order: Order) -> Result<(), Order> {
        debug_assert_eq!(order.status, OrderStatus::Completed);
        match self.orders.entry(order.id) {
            Entry::Occupied(_) => Err(order),
            Entry::Vacant(slot) => {
                slot.insert(order);
                Ok(())
            }
        }
    }

    pub fn contains(&self, id: OrderId) -> bool {
        self.orders.contains_key(&id)
    }

    pub fn get(&self, id: OrderId) -> Option<Order> {
        self.orders.get(&id).map(|order| order.clone())
    }

    /// All committed orders, sorted by id.
    pub fn all(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.iter().map(|order| order.clone()).collect();
        orders.sort_by_key(Order::id);
        orders
    }

    pub fn for_buyer(&self, buyer: AccountId) -> Vec<Order> {
        let mut orders: Vec<Order> = self
            .orders
            .iter()
            .filter(|order| order.buyer == buyer)
            .map(|order| order.clone())
            .collect();
        orders.sort_by_key(Order::id);
        orders
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }
}

/// Result of a successful [`Engine::place_order`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct OrderReceipt {
    pub order_id: OrderId,
    pub transaction_id: TransactionId,
    pub total_charged: Money,
}

impl Engine {
    /// Reserves every line, charges the buyer and records the order, atomically.
    ///
    /// # Errors
    ///
    /// - [`ValidationError::EmptyOrder`] / [`ValidationError::ZeroQuantity`] -
    ///   nothing is touched.
    /// - [`PreconditionFailure::OutOfStock`] / [`PreconditionFailure::UnknownProduct`]
    ///   for the first line that cannot be reserved.
    /// - [`PreconditionFailure::UnknownAccount`] if the buyer does not exist,
    ///   checked before any line is reserved, including for free orders.
    /// - [`PreconditionFailure::InsufficientFunds`] if the buyer cannot pay.
    /// - [`ValidationError::AmountOverflow`] if the total does not fit in
    ///   [`Money`]. This is the one validation error raised after resources
    ///   were touched: the reservations are rolled back before it is returned.
    /// - [`EngineError::ConsistencyCorruption`] if undoing a reservation failed.
    ///
    /// [`PreconditionFailure::OutOfStock`]: crate::PreconditionFailure::OutOfStock
    /// [`PreconditionFailure::UnknownProduct`]: crate::PreconditionFailure::UnknownProduct
    /// [`PreconditionFailure::InsufficientFunds`]: crate::PreconditionFailure::InsufficientFunds
    /// [`PreconditionFailure::UnknownAccount`]: crate::PreconditionFailure::UnknownAccount
    pub fn place_order(
        &self,
        buyer: AccountId,
        lines: &[LineItem],
    ) -> Result<OrderReceipt, EngineError> {
        if lines.is_empty() {
            return Err(ValidationError::EmptyOrder.into());
        }
        if let Some(line) = lines.iter().find(|line| line.quantity == 0) {
            return Err(ValidationError::ZeroQuantity(line.product).into());
        }

        let resources = std::iter::once(ResourceId::Account(buyer))
            .chain(lines.iter().map(|line| ResourceId::Product(line.product)));
        let mut txn = self.begin(TransactionKind::Order, resources)?;

        // A free order is never debited, so the buyer is checked up front.
        if let Err(missing) = txn.balance(buyer) {
            txn.rollback()?;
            return Err(missing);
        }

        for line in lines {
            txn.reserve(line.product, line.quantity)?;
        }

        // Prices are read under ownership, after every reservation succeeded.
        let mut priced = Vec::with_capacity(lines.len());
        for line in lines {
            priced.push((*line, txn.unit_price(line.product)?));
        }

        let order = match Order::draft(self.next_order_id(), buyer, txn.id(), priced) {
            Ok(order) => order,
            Err(invalid) => {
                txn.rollback()?;
                return Err(invalid.into());
            }
        };

        let total = order.total();
        if !total.is_zero() {
            txn.debit(buyer, total)?;
        }
        let order_id = order.id();
        txn.stage_order(order)?;
        let record = txn.commit()?;

        tracing::info!(
            order = %order_id,
            transaction = %record.id,
            buyer = %buyer,
            total = %total,
            "order placed"
        );

        Ok(OrderReceipt {
            order_id,
            transaction_id: record.id,
            total_charged: total,
        })
    }
}
