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

//! Error types for transaction processing.
//!
//! Three tiers, from cheapest to most severe:
//!
//! - [`ValidationError`]: malformed input, rejected before anything is touched.
//! - [`PreconditionFailure`]: a business rule refused an operation; everything
//!   already applied in the transaction is rolled back.
//! - [`EngineError::ConsistencyCorruption`]: an undo step itself failed. The
//!   affected resources are quarantined until reconciled by hand.

use crate::base::{AccountId, Money, ProductId, ResourceId, TransactionId};
use crate::transaction::TransactionStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Malformed caller input.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Amount must be strictly positive
    #[error("amount must be greater than zero")]
    ZeroAmount,

    /// Amount is below zero
    #[error("amount must not be negative")]
    NegativeAmount,

    /// Amount has more precision than one minor unit
    #[error("amount has more than two decimal places")]
    ExcessPrecision,

    /// Amount does not fit in the money representation
    #[error("amount overflows")]
    AmountOverflow,

    /// Order line with a zero quantity
    #[error("quantity for product {0} must be greater than zero")]
    ZeroQuantity(ProductId),

    /// Order without lines
    #[error("order has no lines")]
    EmptyOrder,

    /// Source and destination of a transfer are the same account
    #[error("cannot transfer from account {0} to itself")]
    SelfTransfer(AccountId),

    /// Operation targets a resource the transaction did not declare in `begin`
    #[error("{0} was not declared when the transaction began")]
    UndeclaredResource(ResourceId),

    /// Resource kind that cannot be owned by a transaction
    #[error("{0} cannot be locked")]
    NotLockable(ResourceId),
}

/// Expected business-rule failure.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreconditionFailure {
    /// Debit exceeds the account balance
    #[error("insufficient funds in account {account}: balance {balance}, requested {requested}")]
    InsufficientFunds {
        account: AccountId,
        balance: Money,
        requested: Money,
    },

    /// Reservation exceeds the product stock
    #[error("product {product} out of stock: available {available}, requested {requested}")]
    OutOfStock {
        product: ProductId,
        available: u32,
        requested: u32,
    },

    /// Account id does not exist
    #[error("unknown account {0}")]
    UnknownAccount(AccountId),

    /// Product id does not exist
    #[error("unknown product {0}")]
    UnknownProduct(ProductId),

    /// Credit would overflow the balance counter
    #[error("balance of account {0} would overflow")]
    BalanceOverflow(AccountId),

    /// Release would overflow the stock counter
    #[error("stock of product {0} would overflow")]
    StockOverflow(ProductId),

    /// Account id already exists
    #[error("account {0} already exists")]
    DuplicateAccount(AccountId),

    /// Product id already exists
    #[error("product {0} already exists")]
    DuplicateProduct(ProductId),
}

/// Errors surfaced by the engine and its transactions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("precondition failed: {0}")]
    Precondition(#[from] PreconditionFailure),

    /// An undo step failed; the listed resources can no longer be trusted.
    #[error(
        "consistency corruption in transaction {transaction} ({cause}); untrusted: {}",
        join_resources(.resources)
    )]
    ConsistencyCorruption {
        transaction: TransactionId,
        resources: Vec<ResourceId>,
        cause: String,
    },

    #[error("transaction {transaction} is {status}, expected open")]
    NotOpen {
        transaction: TransactionId,
        status: TransactionStatus,
    },

    #[error("timed out waiting for ownership of {}", join_resources(.resources))]
    LockTimeout { resources: Vec<ResourceId> },

    #[error("{0} is quarantined pending reconciliation")]
    Quarantined(ResourceId),
}

impl EngineError {
    /// True only for failures the engine cannot recover from on its own.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::ConsistencyCorruption { .. })
    }

    /// The business rule that refused the operation, if any.
    pub fn precondition(&self) -> Option<&PreconditionFailure> {
        match self {
            EngineError::Precondition(failure) => Some(failure),
            _ => None,
        }
    }

    /// HTTP-style status class for a command layer sitting in front of the engine.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::Validation(_) => 400,
            EngineError::Precondition(
                PreconditionFailure::UnknownAccount(_) | PreconditionFailure::UnknownProduct(_),
            ) => 404,
            EngineError::Precondition(
                PreconditionFailure::DuplicateAccount(_)
                | PreconditionFailure::DuplicateProduct(_),
            ) => 409,
            EngineError::Precondition(_) => 422,
            EngineError::NotOpen { .. } => 409,
            EngineError::Quarantined(_) => 423,
            EngineError::LockTimeout { .. } => 503,
            EngineError::ConsistencyCorruption { .. } => 500,
        }
    }
}

fn join_resources(resources: &[ResourceId]) -> String {
    resources
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
