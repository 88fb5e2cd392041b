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

use atomic_ledger_rs::{
    AccountId, Engine, EngineConfig, EngineError, LineItem, Money, ProductId,
};
use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Atomic Ledger - Replay transfers and orders against seeded accounts and stock
///
/// Seeds accounts and products from one CSV, applies commands from another and
/// writes final balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "atomic-ledger-rs")]
#[command(about = "Applies transfer and order CSVs atomically", long_about = None)]
struct Args {
    /// Accounts and products to start from
    ///
    /// Expected format: kind,id,label,quantity,price
    #[arg(long, value_name = "FILE")]
    seed: PathBuf,

    /// Commands to apply, in order
    ///
    /// Expected format: type,account,target,amount,lines
    /// Example: cargo run -- --seed seed.csv commands.csv > balances.csv
    #[arg(value_name = "COMMANDS")]
    commands: PathBuf,

    /// Write the audit log here as JSON lines
    #[arg(long, value_name = "FILE")]
    audit: Option<PathBuf>,

    /// Write final product stock here as CSV
    #[arg(long, value_name = "FILE")]
    stock: Option<PathBuf>,

    /// Give up waiting for resource ownership after this many milliseconds
    #[arg(long, env = "LEDGER_LOCK_TIMEOUT_MS", value_name = "MS")]
    lock_timeout_ms: Option<u64>,
}

#[derive(Error, Debug)]
enum CliError {
    #[error("{path}: {source}")]
    Open { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// Unrecoverable engine state. Exit status 2.
    #[error(transparent)]
    Corruption(EngineError),
}

impl CliError {
    fn exit_code(&self) -> i32 {
        match self {
            CliError::Corruption(_) => 2,
            _ => 1,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    if let Err(error) = run(&args) {
        tracing::error!(%error, "run aborted");
        eprintln!("Error: {error}");
        process::exit(error.exit_code());
    }
}

fn run(args: &Args) -> Result<(), CliError> {
    let mut config = EngineConfig::new();
    if let Some(ms) = args.lock_timeout_ms {
        config = config.with_lock_timeout(Duration::from_millis(ms));
    }
    let engine = Engine::with_config(config);

    load_seed(&engine, open(&args.seed)?)?;
    let summary = process_commands(&engine, open(&args.commands)?);

    // Whatever was committed before a corruption is still worth writing out.
    if let Some(path) = &args.audit {
        engine
            .audit()
            .write_json_lines(BufWriter::new(File::create(path)?))?;
    }
    if let Some(path) = &args.stock {
        write_stock(&engine, File::create(path)?)?;
    }
    write_accounts(&engine, io::stdout())?;

    let summary = summary?;
    tracing::info!(applied = summary.applied, skipped = summary.skipped, "done");
    Ok(())
}

fn open(path: &Path) -> Result<BufReader<File>, CliError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| CliError::Open {
            path: path.to_path_buf(),
            source,
        })
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader)
}

/// Raw seed row.
///
/// Fields: `kind, id, label, quantity, price`
#[derive(Debug, Deserialize)]
struct SeedRecord {
    kind: String,
    id: u32,
    label: String,
    #[serde(deserialize_with = "csv::invalid_option")]
    quantity: Option<Decimal>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    price: Option<Decimal>,
}

/// Seeds accounts and products. Invalid rows are skipped.
///
/// # CSV Format
///
/// ```csv
/// kind,id,label,quantity,price
/// account,1,alice,1000.00,
/// product,7,widget,10,2.50
/// ```
pub fn load_seed<R: Read>(engine: &Engine, reader: R) -> Result<(), csv::Error> {
    for (row, result) in csv_reader(reader).deserialize::<SeedRecord>().enumerate() {
        let record = match result {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(row, %error, "skipping malformed seed row");
                continue;
            }
        };

        let seeded = match record.kind.to_lowercase().as_str() {
            "account" => match record.quantity.map(Money::from_major) {
                Some(Ok(balance)) => engine
                    .open_account(AccountId(record.id), record.label, balance)
                    .map_err(|error| error.to_string()),
                Some(Err(invalid)) => Err(invalid.to_string()),
                None => Err("missing opening balance".to_string()),
            },
            "product" => {
                let stock = record.quantity.and_then(whole_quantity);
                let price = record.price.map(Money::from_major);
                match (stock, price) {
                    (Some(stock), Some(Ok(price))) => engine
                        .add_product(ProductId(record.id), record.label, stock, price)
                        .map_err(|error| error.to_string()),
                    (_, Some(Err(invalid))) => Err(invalid.to_string()),
                    _ => Err("missing stock or price".to_string()),
                }
            }
            other => Err(format!("unknown kind {other:?}")),
        };

        if let Err(reason) = seeded {
            tracing::warn!(row, id = record.id, %reason, "skipping seed row");
        }
    }
    Ok(())
}

fn whole_quantity(quantity: Decimal) -> Option<u32> {
    if quantity.fract().is_zero() {
        quantity.to_u32()
    } else {
        None
    }
}

/// Raw command row.
///
/// Fields: `type, account, target, amount, lines`
#[derive(Debug, Deserialize)]
struct CommandRecord {
    #[serde(rename = "type")]
    command_type: String,
    account: u32,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    target: Option<u32>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    amount: Option<Decimal>,
    #[serde(default)]
    lines: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Command {
    Transfer {
        from: AccountId,
        to: AccountId,
        amount: Money,
    },
    Order {
        buyer: AccountId,
        lines: Vec<LineItem>,
    },
}

impl CommandRecord {
    /// Returns `None` for unknown types, missing fields or unparsable values.
    fn into_command(self) -> Option<Command> {
        let account = AccountId(self.account);
        match self.command_type.to_lowercase().as_str() {
            "transfer" => Some(Command::Transfer {
                from: account,
                to: AccountId(self.target?),
                amount: Money::from_major(self.amount?).ok()?,
            }),
            "order" => Some(Command::Order {
                buyer: account,
                lines: parse_lines(self.lines.as_deref()?)?,
            }),
            _ => None,
        }
    }
}

/// Parses space-separated `product:quantity` pairs.
fn parse_lines(lines: &str) -> Option<Vec<LineItem>> {
    lines
        .split_whitespace()
        .map(|pair| {
            let (product, quantity) = pair.split_once(':')?;
            Some(LineItem::new(
                ProductId(product.parse().ok()?),
                quantity.parse().ok()?,
            ))
        })
        .collect()
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct RunSummary {
    applied: usize,
    skipped: usize,
}

/// Applies commands in order.
///
/// Malformed rows and refused commands are logged and skipped. Stops at the
/// first consistency corruption.
///
/// # CSV Format
///
/// ```csv
/// type,account,target,amount,lines
/// transfer,1,2,15.00,
/// order,1,,,7:2 8:1
/// ```
fn process_commands<R: Read>(engine: &Engine, reader: R) -> Result<RunSummary, CliError> {
    let mut summary = RunSummary::default();

    for (row, result) in csv_reader(reader).deserialize::<CommandRecord>().enumerate() {
        let command = match result.map(CommandRecord::into_command) {
            Ok(Some(command)) => command,
            Ok(None) => {
                tracing::warn!(row, "skipping invalid command");
                summary.skipped += 1;
                continue;
            }
            Err(error) => {
                tracing::warn!(row, %error, "skipping malformed command row");
                summary.skipped += 1;
                continue;
            }
        };

        let outcome = match &command {
            Command::Transfer { from, to, amount } => engine
                .transfer(*from, *to, *amount)
                .map(|receipt| receipt.transaction_id),
            Command::Order { buyer, lines } => engine
                .place_order(*buyer, lines)
                .map(|receipt| receipt.transaction_id),
        };

        match outcome {
            Ok(transaction) => {
                tracing::debug!(row, %transaction, "command applied");
                summary.applied += 1;
            }
            Err(error) if error.is_fatal() => return Err(CliError::Corruption(error)),
            Err(error) => {
                tracing::warn!(row, ?command, %error, "command refused");
                summary.skipped += 1;
            }
        }
    }

    Ok(summary)
}

/// Writes `account,owner,balance` rows sorted by account.
fn write_accounts<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for account in engine.ledger().accounts() {
        wtr.serialize(&account)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes `product,name,stock,price` rows sorted by product.
fn write_stock<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for product in engine.inventory().products() {
        wtr.serialize(&product)?;
    }
    wtr.flush()?;
    Ok(())
}
