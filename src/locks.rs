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

//! Exclusive resource ownership.
//!
//! A transaction claims every resource it declared in one step: either all of
//! them are free and become owned, or the caller waits and owns nothing. No
//! transaction ever holds a subset while waiting for the rest, so two
//! transactions with overlapping resource sets cannot deadlock each other.

use crate::base::{ResourceId, TransactionId};
use crate::error::EngineError;
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::time::{Duration, Instant};

#[derive(Debug, Default)]
pub(crate) struct ResourceLocks {
    owners: Mutex<HashMap<ResourceId, TransactionId>>,
    released: Condvar,
}

impl ResourceLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Blocks until every resource in `resources` is free, then claims them all.
    ///
    /// `resources` must be sorted and deduplicated.
    ///
    /// # Errors
    ///
    /// [`EngineError::LockTimeout`] if `timeout` elapses first. Nothing is
    /// owned in that case.
    pub(crate) fn acquire(
        &self,
        owner: TransactionId,
        resources: &[ResourceId],
        timeout: Option<Duration>,
    ) -> Result<Ownership<'_>, EngineError> {
        debug_assert!(resources.windows(2).all(|pair| pair[0] < pair[1]));

        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let mut owners = self.owners.lock();
        loop {
            if Self::all_free(&owners, resources) {
                for resource in resources {
                    owners.insert(*resource, owner);
                }
                return Ok(Ownership {
                    locks: self,
                    owner,
                    resources: resources.to_vec(),
                });
            }

            tracing::trace!(transaction = %owner, "waiting for resource ownership");
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut owners, deadline).timed_out()
                        && !Self::all_free(&owners, resources)
                    {
                        let busy = resources
                            .iter()
                            .filter(|resource| owners.contains_key(*resource))
                            .copied()
                            .collect();
                        return Err(EngineError::LockTimeout { resources: busy });
                    }
                }
                None => self.released.wait(&mut owners),
            }
        }
    }

    /// Transaction currently owning `resource`, if any.
    pub(crate) fn owner_of(&self, resource: &ResourceId) -> Option<TransactionId> {
        self.owners.lock().get(resource).copied()
    }

    fn all_free(owners: &HashMap<ResourceId, TransactionId>, resources: &[ResourceId]) -> bool {
        resources.iter().all(|resource| !owners.contains_key(resource))
    }

    fn release(&self, owner: TransactionId, resources: &[ResourceId]) {
        let mut owners = self.owners.lock();
        for resource in resources {
            if owners.get(resource) == Some(&owner) {
                owners.remove(resource);
            }
        }
        drop(owners);
        self.released.notify_all();
    }
}

/// Ownership of a set of resources. Released on drop.
#[derive(Debug)]
pub(crate) struct Ownership<'a> {
    locks: &'a ResourceLocks,
    owner: TransactionId,
    resources: Vec<ResourceId>,
}

impl Ownership<'_> {
    pub(crate) fn covers(&self, resource: &ResourceId) -> bool {
        self.resources.binary_search(resource).is_ok()
    }
}

impl Drop for Ownership<'_> {
    fn drop(&mut self) {
        self.locks.release(self.owner, &self.resources);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::base::{AccountId, ProductId};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    fn account(id: u32) -> ResourceId {
        ResourceId::Account(AccountId(id))
    }

    #[test]
    fn acquire_and_release() {
        let locks = ResourceLocks::new();
        let resources = [account(1), ResourceId::Product(ProductId(1))];
        let ownership = locks.acquire(TransactionId(1), &resources, None).unwrap();
        assert_eq!(locks.owner_of(&account(1)), Some(TransactionId(1)));
        assert!(ownership.covers(&account(1)));
        assert!(!ownership.covers(&account(2)));

        drop(ownership);
        assert_eq!(locks.owner_of(&account(1)), None);
    }

    #[test]
    fn overlapping_acquire_times_out_without_partial_ownership() {
        let locks = ResourceLocks::new();
        let _held = locks
            .acquire(TransactionId(1), &[account(2)], None)
            .unwrap();

        let result = locks.acquire(
            TransactionId(2),
            &[account(1), account(2)],
            Some(Duration::from_millis(20)),
        );
        assert_eq!(
            result.unwrap_err(),
            EngineError::LockTimeout {
                resources: vec![account(2)]
            }
        );
        // account 1 was free but must not have been claimed
        assert_eq!(locks.owner_of(&account(1)), None);
    }

    #[test]
    fn waiter_proceeds_after_release() {
        let locks = Arc::new(ResourceLocks::new());
        let held = locks.acquire(TransactionId(1), &[account(1)], None).unwrap();
        let acquired = Arc::new(AtomicBool::new(false));

        let handle = {
            let locks = Arc::clone(&locks);
            let acquired = Arc::clone(&acquired);
            thread::spawn(move || {
                let _ownership = locks.acquire(TransactionId(2), &[account(1)], None).unwrap();
                acquired.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!acquired.load(Ordering::SeqCst));
        drop(held);
        handle.join().unwrap();
        assert!(acquired.load(Ordering::SeqCst));
    }
}
