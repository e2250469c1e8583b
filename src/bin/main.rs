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

use billo_core::balance;
use billo_core::{
    AssignmentMap, BilloError, Config, ConfigError, Currency, GroupId, ItemId, Money, ReceiptId,
    ReceiptItem, Settlement, SettlementId, SettlementStatus, UserId, compute_totals,
};
use chrono::Utc;
use clap::{Parser, Subcommand};
use csv::{ReaderBuilder, Trim, Writer};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process;
use thiserror::Error;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Billo - settle up shared receipts
///
/// Computes balances from settlement CSV exports and per-person totals from
/// item assignment CSVs.
#[derive(Parser, Debug)]
#[command(name = "billo")]
#[command(about = "Balances and receipt splits from CSV files", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Net pending balance per user and currency
    ///
    /// Expected format: id,from,to,amount,currency,status,group,receipt
    Balances {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Only count settlements in this group
        #[arg(long)]
        group: Option<u64>,
    },

    /// Netted balance between two users
    Pair {
        #[arg(value_name = "FILE")]
        input: PathBuf,
        user: String,
        counterparty: String,

        /// Currency code; defaults to the configured currency
        #[arg(long)]
        currency: Option<String>,
    },

    /// Per-person totals for one receipt
    ///
    /// Expected format: item,name,total,assignees (assignees separated by ';')
    Split {
        #[arg(value_name = "FILE")]
        input: PathBuf,

        /// Receipt tax, distributed in proportion to each subtotal
        #[arg(long, default_value = "0.00")]
        tax: String,
    },
}

#[derive(Error, Debug)]
enum CliError {
    #[error("cannot open '{path}': {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Billo(#[from] BilloError),
}

fn main() {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (warn)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr).compact())
        .init();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let stdout = std::io::stdout();

    match cli.command {
        Command::Balances { input, group } => {
            let settlements = read_settlements(open(&input)?)?;
            write_balances(&settlements, group.map(GroupId), stdout.lock())?;
        }
        Command::Pair {
            input,
            user,
            counterparty,
            currency,
        } => {
            let currency = match currency {
                Some(code) => Currency::from_code(&code)?,
                None => config.default_currency,
            };
            let settlements = read_settlements(open(&input)?)?;
            let line = describe_pair(&settlements, &UserId::new(user), &UserId::new(counterparty), currency);
            writeln!(stdout.lock(), "{line}")?;
        }
        Command::Split { input, tax } => {
            let tax = Money::parse(&tax)?;
            let (items, assignments) = read_items(open(&input)?)?;
            write_split(&items, &assignments, tax, stdout.lock())?;
        }
    }
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

/// Raw CSV record of a settlement export.
///
/// Fields: `id, from, to, amount, currency, status, group, receipt`
#[derive(Debug, Deserialize)]
struct SettlementRecord {
    id: u64,
    from: String,
    to: String,
    amount: String,
    currency: String,
    status: SettlementStatus,
    #[serde(deserialize_with = "csv::invalid_option")]
    group: Option<u64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    receipt: Option<u64>,
}

impl SettlementRecord {
    fn into_settlement(self) -> Result<Settlement, BilloError> {
        Ok(Settlement {
            id: SettlementId(self.id),
            from: UserId::new(self.from),
            to: UserId::new(self.to),
            amount: Money::parse(&self.amount)?,
            currency: Currency::from_code(&self.currency)?,
            receipt_id: self.receipt.map(ReceiptId),
            group_id: self.group.map(GroupId),
            status: self.status,
            settled_at: None,
            notes: None,
            created_at: Utc::now(),
        })
    }
}

/// Reads settlements from CSV, skipping malformed rows with a warning.
///
/// # CSV Format
///
/// ```csv
/// id,from,to,amount,currency,status,group,receipt
/// 1,bob,alice,10.83,USD,pending,1,1
/// 2,carol,alice,5.00,EUR,completed,,
/// ```
///
/// # Errors
///
/// Returns a CSV error if the reader itself fails.
fn read_settlements<R: Read>(reader: R) -> Result<Vec<Settlement>, csv::Error> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut settlements = Vec::new();
    for (line, result) in rdr.deserialize::<SettlementRecord>().enumerate() {
        match result.map_err(|e| e.to_string()).and_then(|record| {
            record.into_settlement().map_err(|e| e.to_string())
        }) {
            Ok(settlement) => settlements.push(settlement),
            Err(e) => warn!(row = line + 1, error = %e, "skipping settlement row"),
        }
    }
    debug!(count = settlements.len(), "settlements loaded");
    Ok(settlements)
}

#[derive(Debug, Serialize)]
struct BalanceRow<'a> {
    user: &'a UserId,
    currency: Currency,
    net: Money,
    you_owe: Money,
    owed_to_you: Money,
    you_owe_count: usize,
    owed_to_you_count: usize,
}

/// Writes one row per user and currency, users in ascending order.
///
/// Columns: `user, currency, net, you_owe, owed_to_you, you_owe_count,
/// owed_to_you_count`
fn write_balances<W: Write>(
    settlements: &[Settlement],
    group: Option<GroupId>,
    writer: W,
) -> Result<(), csv::Error> {
    let scoped: Vec<Settlement> = settlements
        .iter()
        .filter(|s| group.is_none() || s.group_id == group)
        .cloned()
        .collect();

    let mut wtr = Writer::from_writer(writer);
    for summary in balance::all_balances(&scoped) {
        wtr.serialize(BalanceRow {
            user: &summary.user_id,
            currency: summary.currency,
            net: summary.net,
            you_owe: summary.you_owe,
            owed_to_you: summary.owed_to_you,
            you_owe_count: summary.you_owe_count,
            owed_to_you_count: summary.owed_to_you_count,
        })?;
    }
    wtr.flush()?;
    Ok(())
}

fn describe_pair(
    settlements: &[Settlement],
    user: &UserId,
    counterparty: &UserId,
    currency: Currency,
) -> String {
    let pair = balance::pair_balance(settlements, user, counterparty, currency);
    match pair.direction() {
        Some((debtor, creditor, amount)) => {
            format!("{debtor} owes {creditor} {amount} {currency}")
        }
        None => format!("{user} and {counterparty} are settled up in {currency}"),
    }
}

#[derive(Debug, Deserialize)]
struct ItemRecord {
    item: u64,
    name: String,
    total: String,
    #[serde(default)]
    assignees: String,
}

/// Reads items and their even-split assignees.
///
/// # CSV Format
///
/// ```csv
/// item,name,total,assignees
/// 1,Pizza,20.00,alice;bob
/// 2,Soda,4.00,alice
/// ```
fn read_items<R: Read>(reader: R) -> Result<(Vec<ReceiptItem>, AssignmentMap), CliError> {
    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    let mut items = Vec::new();
    let mut assignments = AssignmentMap::new();
    for result in rdr.deserialize::<ItemRecord>() {
        let record = result?;
        let total = Money::parse(&record.total)?;
        let item = ReceiptItem::new(ItemId(record.item), record.name, total);
        for assignee in record.assignees.split(';').map(str::trim).filter(|a| !a.is_empty()) {
            let user = UserId::from(assignee);
            if !assignments.assignees(item.id).contains(&user) {
                assignments.toggle_assignment(item.id, user);
            }
        }
        items.push(item);
    }
    Ok((items, assignments))
}

#[derive(Debug, Serialize)]
struct SplitRow<'a> {
    user: &'a UserId,
    subtotal: Money,
    tax: Money,
    total: Money,
    items: usize,
}

fn write_split<W: Write>(
    items: &[ReceiptItem],
    assignments: &AssignmentMap,
    tax: Money,
    writer: W,
) -> Result<(), csv::Error> {
    let totals = compute_totals(items, assignments, tax);
    for item in &totals.unassigned_items {
        warn!(item = %item, "item has no assignees");
    }

    let mut wtr = Writer::from_writer(writer);
    for person in &totals.people {
        wtr.serialize(SplitRow {
            user: &person.user_id,
            subtotal: person.subtotal,
            tax: person.tax,
            total: person.total,
            items: person.item_count,
        })?;
    }
    wtr.flush()?;
    Ok(())
}
