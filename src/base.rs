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

//! Core identifier and amount types.

use crate::error::ValidationError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct AccountId(pub u32);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for an inventory product.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct ProductId(pub u32);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a committed order.
///
/// Allocated by the engine when an order draft is staged. Ids of rolled-back
/// drafts are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct OrderId(pub u64);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a transaction record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A non-negative amount of money in minor units (cents).
///
/// All arithmetic is checked. Conversion from decimal major units goes
/// through [`Money::from_major`], which rejects negative amounts and
/// fractions of a minor unit.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize,
)]
#[serde(transparent)]
pub struct Money(pub u64);

impl Money {
    pub const ZERO: Money = Money(0);

    /// Number of decimal places between major and minor units.
    pub const SCALE: u32 = 2;

    const MINOR_PER_MAJOR: u64 = 100;

    pub fn from_minor(minor: u64) -> Self {
        Money(minor)
    }

    pub fn minor(self) -> u64 {
        self.0
    }

    /// Parses a decimal amount in major units, e.g. `12.50`.
    pub fn from_major(amount: Decimal) -> Result<Self, ValidationError> {
        if amount.is_sign_negative() && !amount.is_zero() {
            return Err(ValidationError::NegativeAmount);
        }
        let minor = amount * Decimal::from(Self::MINOR_PER_MAJOR);
        if !minor.fract().is_zero() {
            return Err(ValidationError::ExcessPrecision);
        }
        minor
            .to_u64()
            .map(Money)
            .ok_or(ValidationError::AmountOverflow)
    }

    /// Returns the amount in major units with two decimal places.
    pub fn to_major(self) -> Decimal {
        Decimal::from_i128_with_scale(i128::from(self.0), Self::SCALE)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Money) -> Option<Money> {
        self.0.checked_add(rhs.0).map(Money)
    }

    pub fn checked_sub(self, rhs: Money) -> Option<Money> {
        self.0.checked_sub(rhs.0).map(Money)
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(u64::from(quantity)).map(Money)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major())
    }
}

/// Kind of resource an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Account,
    Product,
    Order,
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceType::Account => write!(f, "account"),
            ResourceType::Product => write!(f, "product"),
            ResourceType::Order => write!(f, "order"),
        }
    }
}

/// A typed reference to a single resource.
///
/// The derived ordering (accounts, then products, then orders, each by id)
/// is the global order in which ownership is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum ResourceId {
    Account(AccountId),
    Product(ProductId),
    Order(OrderId),
}

impl ResourceId {
    pub fn resource_type(&self) -> ResourceType {
        match self {
            ResourceId::Account(_) => ResourceType::Account,
            ResourceId::Product(_) => ResourceType::Product,
            ResourceId::Order(_) => ResourceType::Order,
        }
    }

    /// Only accounts and products can be owned by a transaction.
    pub fn is_lockable(&self) -> bool {
        !matches!(self, ResourceId::Order(_))
    }
}

impl From<AccountId> for ResourceId {
    fn from(id: AccountId) -> Self {
        ResourceId::Account(id)
    }
}

impl From<ProductId> for ResourceId {
    fn from(id: ProductId) -> Self {
        ResourceId::Product(id)
    }
}

impl From<OrderId> for ResourceId {
    fn from(id: OrderId) -> Self {
        ResourceId::Order(id)
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Account(id) => write!(f, "account {id}"),
            ResourceId::Product(id) => write!(f, "product {id}"),
            ResourceId::Order(id) => write!(f, "order {id}"),
        }
    }
}
