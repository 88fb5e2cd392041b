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

//! Account balances.
//!
//! The [`LedgerStore`] exposes precondition-checked primitives only. It has no
//! notion of transactions or undo: the coordinator reverses a debit with a
//! credit and vice versa.
//!
//! # Example
//!
//! ```
//! use atomic_ledger_rs::{AccountId, LedgerStore, Money};
//!
//! let ledger = LedgerStore::new();
//! ledger.open_account(AccountId(1), "alice", Money(1_000)).unwrap();
//! ledger.try_debit(AccountId(1), Money(400)).unwrap();
//! assert_eq!(ledger.get_balance(AccountId(1)), Ok(Money(600)));
//! ```

use crate::base::{AccountId, Money};
use crate::error::PreconditionFailure;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::ser::{Serialize, SerializeStruct, Serializer};

#[derive(Debug)]
struct AccountData {
    id: AccountId,
    owner: String,
    balance: Money,
}

impl AccountData {
    fn debit(&mut self, amount: Money) -> Result<(), PreconditionFailure> {
        let balance = self.balance.checked_sub(amount).ok_or(
            PreconditionFailure::InsufficientFunds {
                account: self.id,
                balance: self.balance,
                requested: amount,
            },
        )?;
        self.balance = balance;
        Ok(())
    }

    fn credit(&mut self, amount: Money) -> Result<(), PreconditionFailure> {
        self.balance = self
            .balance
            .checked_add(amount)
            .ok_or(PreconditionFailure::BalanceOverflow(self.id))?;
        Ok(())
    }
}

/// A single ledger account.
#[derive(Debug)]
struct Account {
    inner: Mutex<AccountData>,
}

impl Account {
    fn new(id: AccountId, owner: String, balance: Money) -> Self {
        Self {
            inner: Mutex::new(AccountData { id, owner, balance }),
        }
    }
}

/// Point-in-time view of an account, as returned by [`LedgerStore::accounts`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub id: AccountId,
    pub owner: String,
    pub balance: Money,
}

impl Serialize for AccountSnapshot {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut state = serializer.serialize_struct("Account", 3)?;
        state.serialize_field("account", &self.id)?;
        state.serialize_field("owner", &self.owner)?;
        state.serialize_field("balance", &self.balance.to_major())?;
        state.end()
    }
}

/// Holds account balances.
#[derive(Debug, Default)]
pub struct LedgerStore {
    accounts: DashMap<AccountId, Account>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a new account with an opening balance.
    ///
    /// # Errors
    ///
    /// [`PreconditionFailure::DuplicateAccount`] if the id is taken.
    pub fn open_account(
        &self,
        id: AccountId,
        owner: impl Into<String>,
        opening_balance: Money,
    ) -> Result<(), PreconditionFailure> {
        match self.accounts.entry(id) {
            Entry::Occupied(_) => Err(PreconditionFailure::DuplicateAccount(id)),
            Entry::Vacant(entry) => {
                entry.insert(Account::new(id, owner.into(), opening_balance));
                Ok(())
            }
        }
    }

    /// Removes an account, returning its final balance.
    ///
    /// Administrative: this bypasses transaction ownership entirely.
    pub fn close_account(&self, id: AccountId) -> Option<Money> {
        self.accounts
            .remove(&id)
            .map(|(_, account)| account.inner.into_inner().balance)
    }

    pub fn contains(&self, id: AccountId) -> bool {
        self.accounts.contains_key(&id)
    }

    pub fn get_balance(&self, id: AccountId) -> Result<Money, PreconditionFailure> {
        self.with_account(id, |data| Ok(data.balance))
    }

    pub fn owner(&self, id: AccountId) -> Option<String> {
        self.accounts
            .get(&id)
            .map(|account| account.inner.lock().owner.clone())
    }

    /// Decrements the balance if it covers `amount`.
    ///
    /// # Errors
    ///
    /// - [`PreconditionFailure::UnknownAccount`]
    /// - [`PreconditionFailure::InsufficientFunds`] - balance left untouched.
    pub fn try_debit(&self, id: AccountId, amount: Money) -> Result<(), PreconditionFailure> {
        self.with_account(id, |data| data.debit(amount))
    }

    /// Increments the balance.
    ///
    /// # Errors
    ///
    /// - [`PreconditionFailure::UnknownAccount`]
    /// - [`PreconditionFailure::BalanceOverflow`] if the counter would wrap.
    pub fn credit(&self, id: AccountId, amount: Money) -> Result<(), PreconditionFailure> {
        self.with_account(id, |data| data.credit(amount))
    }

    /// All accounts, sorted by id.
    pub fn accounts(&self) -> Vec<AccountSnapshot> {
        let mut snapshots: Vec<AccountSnapshot> = self
            .accounts
            .iter()
            .map(|entry| {
                let data = entry.inner.lock();
                AccountSnapshot {
                    id: data.id,
                    owner: data.owner.clone(),
                    balance: data.balance,
                }
            })
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.id);
        snapshots
    }

    /// Sum of every balance. Wider than [`Money`] so it cannot overflow.
    pub fn total_balance(&self) -> u128 {
        self.accounts
            .iter()
            .map(|entry| u128::from(entry.inner.lock().balance.minor()))
            .sum()
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    fn with_account<T>(
        &self,
        id: AccountId,
        f: impl FnOnce(&mut AccountData) -> Result<T, PreconditionFailure>,
    ) -> Result<T, PreconditionFailure> {
        let account = self
            .accounts
            .get(&id)
            .ok_or(PreconditionFailure::UnknownAccount(id))?;
        let mut data = account.inner.lock();
        f(&mut data)
    }
}
