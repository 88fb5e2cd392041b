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

//! Engine public API integration tests.

use atomic_ledger_rs::{
    AccountId, AuditEvent, Engine, EngineConfig, EngineError, Money, PreconditionFailure,
    ResourceId, TransactionKind, TransactionStatus, ValidationError,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::time::Duration;

fn money(amount: Decimal) -> Money {
    Money::from_major(amount).unwrap()
}

fn make_engine(balances: &[(u32, Decimal)]) -> Engine {
    let engine = Engine::new();
    for (id, balance) in balances {
        engine
            .open_account(AccountId(*id), format!("owner-{id}"), money(*balance))
            .unwrap();
    }
    engine
}

#[test]
fn transfer_moves_money() {
    let engine = make_engine(&[(1, dec!(100.00)), (2, dec!(0.00))]);

    let receipt = engine
        .transfer(AccountId(1), AccountId(2), money(dec!(40.25)))
        .unwrap();

    assert_eq!(receipt.status, TransactionStatus::Completed);
    assert_eq!(engine.balance(AccountId(1)).unwrap(), money(dec!(59.75)));
    assert_eq!(engine.balance(AccountId(2)).unwrap(), money(dec!(40.25)));
}

#[test]
fn transfer_exceeding_balance_changes_nothing() {
    let engine = make_engine(&[(1, dec!(1000)), (2, dec!(0))]);

    let error = engine
        .transfer(AccountId(1), AccountId(2), money(dec!(1500)))
        .unwrap_err();

    assert_eq!(
        error,
        EngineError::Precondition(PreconditionFailure::InsufficientFunds {
            account: AccountId(1),
            balance: money(dec!(1000)),
            requested: money(dec!(1500)),
        })
    );
    assert!(!error.is_fatal());
    assert_eq!(engine.balance(AccountId(1)).unwrap(), money(dec!(1000)));
    assert_eq!(engine.balance(AccountId(2)).unwrap(), Money::ZERO);
}

#[test]
fn transfer_round_trip_restores_balances() {
    let engine = make_engine(&[(1, dec!(75.10)), (2, dec!(20.00))]);
    let amount = money(dec!(33.33));

    engine.transfer(AccountId(1), AccountId(2), amount).unwrap();
    engine.transfer(AccountId(2), AccountId(1), amount).unwrap();

    assert_eq!(engine.balance(AccountId(1)).unwrap(), money(dec!(75.10)));
    assert_eq!(engine.balance(AccountId(2)).unwrap(), money(dec!(20.00)));
}

#[test]
fn transfer_to_unknown_account_restores_source() {
    let engine = make_engine(&[(1, dec!(100))]);

    let error = engine
        .transfer(AccountId(1), AccountId(9), money(dec!(10)))
        .unwrap_err();

    assert_eq!(
        error,
        PreconditionFailure::UnknownAccount(AccountId(9)).into()
    );
    assert_eq!(error.status_code(), 404);
    assert_eq!(engine.balance(AccountId(1)).unwrap(), money(dec!(100)));
}

#[test]
fn transfer_from_unknown_account_fails() {
    let engine = make_engine(&[(2, dec!(0))]);

    let error = engine
        .transfer(AccountId(1), AccountId(2), money(dec!(10)))
        .unwrap_err();

    assert_eq!(error.precondition(), Some(&PreconditionFailure::UnknownAccount(AccountId(1))));
    assert_eq!(engine.balance(AccountId(2)).unwrap(), Money::ZERO);
}

#[test]
fn self_transfer_is_rejected_before_begin() {
    let engine = make_engine(&[(1, dec!(100))]);
    let audit_before = engine.audit().len();

    assert_eq!(
        engine.transfer(AccountId(1), AccountId(1), money(dec!(1))),
        Err(ValidationError::SelfTransfer(AccountId(1)).into())
    );
    assert_eq!(
        engine.transfer(AccountId(1), AccountId(2), Money::ZERO),
        Err(ValidationError::ZeroAmount.into())
    );
    assert_eq!(engine.audit().len(), audit_before);
}

#[test]
fn failed_transfer_is_audited_with_compensation() {
    let engine = make_engine(&[(1, dec!(100))]);

    let error = engine
        .transfer(AccountId(1), AccountId(2), money(dec!(10)))
        .unwrap_err();
    assert!(error.precondition().is_some());

    let entries = engine.audit().entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].event, AuditEvent::Opened);
    assert_eq!(entries[1].event, AuditEvent::Failed);

    let record = &entries[1].record;
    assert_eq!(record.kind, TransactionKind::Transfer);
    assert_eq!(record.status, TransactionStatus::Failed);
    // The debit was undone; the refused credit never applied.
    assert_eq!(record.operations.len(), 1);
    assert_eq!(record.compensations, vec![0]);
    assert!(record.completed_at.is_some());
}

#[test]
fn committed_transfer_is_audited() {
    let engine = make_engine(&[(1, dec!(100)), (2, dec!(0))]);
    let receipt = engine
        .transfer(AccountId(1), AccountId(2), money(dec!(10)))
        .unwrap();

    let latest = engine.audit().latest(receipt.transaction_id).unwrap();
    assert_eq!(latest.event, AuditEvent::Completed);
    assert_eq!(latest.record.operations.len(), 2);
    assert!(latest.record.compensations.is_empty());
    assert_eq!(
        latest.record.resources,
        vec![
            ResourceId::Account(AccountId(1)),
            ResourceId::Account(AccountId(2))
        ]
    );
}

#[test]
fn transfer_waits_then_times_out_on_owned_account() {
    let engine =
        Engine::with_config(EngineConfig::new().with_lock_timeout(Duration::from_millis(20)));
    engine.open_account(AccountId(1), "alice", money(dec!(10))).unwrap();
    engine.open_account(AccountId(2), "bob", money(dec!(10))).unwrap();

    let held = engine
        .begin(TransactionKind::Generic, [ResourceId::Account(AccountId(2))])
        .unwrap();

    let error = engine
        .transfer(AccountId(1), AccountId(2), money(dec!(1)))
        .unwrap_err();
    assert_eq!(
        error,
        EngineError::LockTimeout {
            resources: vec![ResourceId::Account(AccountId(2))]
        }
    );
    assert_eq!(error.status_code(), 503);

    drop(held);
    assert!(engine
        .transfer(AccountId(1), AccountId(2), money(dec!(1)))
        .is_ok());
}

#[test]
fn ledger_total_is_conserved_by_transfers() {
    let engine = make_engine(&[(1, dec!(50)), (2, dec!(30)), (3, dec!(20))]);
    let total = engine.ledger().total_balance();

    let _ = engine.transfer(AccountId(1), AccountId(2), money(dec!(10)));
    let _ = engine.transfer(AccountId(2), AccountId(3), money(dec!(100)));
    let _ = engine.transfer(AccountId(3), AccountId(1), money(dec!(20)));

    assert_eq!(engine.ledger().total_balance(), total);
}
