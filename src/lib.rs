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

//! # Atomic Ledger
//!
//! An in-memory engine that applies multi-resource operations on account
//! balances and product stock as single all-or-nothing units.
//!
//! ## Core Components
//!
//! - [`Engine`]: owns the stores and hands out transactions
//! - [`Transaction`]: an open unit of work with eager apply and stack-ordered undo
//! - [`LedgerStore`] / [`InventoryStore`]: balances and stock with guarded mutators
//! - [`OrderBook`]: committed, immutable order snapshots
//! - [`AuditLog`]: append-only history of every transaction transition
//!
//! ## Example
//!
//! ```
//! use atomic_ledger_rs::{AccountId, Engine, LineItem, Money, ProductId};
//!
//! let engine = Engine::new();
//! engine.open_account(AccountId(1), "alice", Money(100_00)).unwrap();
//! engine.open_account(AccountId(2), "bob", Money(50_00)).unwrap();
//! engine.add_product(ProductId(7), "widget", 10, Money(2_50)).unwrap();
//!
//! engine.transfer(AccountId(1), AccountId(2), Money(30_00)).unwrap();
//! assert_eq!(engine.balance(AccountId(1)).unwrap(), Money(70_00));
//!
//! let receipt = engine
//!     .place_order(AccountId(1), &[LineItem::new(ProductId(7), 3)])
//!     .unwrap();
//! assert_eq!(receipt.total_charged, Money(7_50));
//! assert_eq!(engine.stock(ProductId(7)).unwrap(), 7);
//! ```
//!
//! ## Thread Safety
//!
//! Transactions over disjoint resources run in parallel. Transactions that
//! share a resource are serialised: each one claims its whole resource set at
//! once, so overlapping transactions never deadlock.

pub mod audit;
mod base;
pub mod config;
pub mod coordinator;
mod engine;
pub mod error;
pub mod inventory;
pub mod ledger;
mod locks;
pub mod order;
pub mod transaction;

pub use audit::{AuditEntry, AuditEvent, AuditLog};
pub use base::{AccountId, Money, OrderId, ProductId, ResourceId, ResourceType, TransactionId};
pub use config::EngineConfig;
pub use coordinator::Transaction;
pub use engine::{Engine, TransferReceipt};
pub use error::{EngineError, PreconditionFailure, ValidationError};
pub use inventory::{InventoryStore, ProductSnapshot};
pub use ledger::{AccountSnapshot, LedgerStore};
pub use order::{LineItem, Order, OrderBook, OrderLine, OrderReceipt, OrderStatus};
pub use transaction::{
    Action, FailureCause, Op, Operation, TransactionKind, TransactionRecord, TransactionStatus,
};
