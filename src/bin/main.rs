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

use clap::Parser;
use crossbeam::channel::{self, Sender};
use csv::{ReaderBuilder, Trim, Writer};
use point_ledger::{
    Engine, GateMode, LedgerConfig, LedgerError, PartialFailurePolicy, TransactionType, UserId,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use tracing_subscriber::EnvFilter;

/// Point Ledger - Apply point operation CSV files
///
/// Reads charge/use operations from a CSV file and outputs the resulting
/// balances (or histories) to stdout.
#[derive(Parser, Debug)]
#[command(name = "point-ledger")]
#[command(about = "Applies point charge/use CSVs and prints balances", long_about = None)]
struct Args {
    /// Path to CSV file with operations
    ///
    /// Expected format: type,user,amount
    /// Example: cargo run -- operations.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Worker threads. Each user's rows stay on one worker, in file order.
    #[arg(short, long, default_value = "1")]
    workers: NonZeroUsize,

    /// Share a fixed table of N gates instead of one gate per user
    #[arg(long, value_name = "N")]
    shards: Option<NonZeroUsize>,

    /// Restore the previous balance when a history append fails
    #[arg(long)]
    compensate: bool,

    /// Print every user's history instead of balances
    #[arg(long)]
    history: bool,
}

impl Args {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            gates: match self.shards {
                Some(shards) => GateMode::Sharded { shards },
                None => GateMode::PerUser,
            },
            on_partial_failure: if self.compensate {
                PartialFailurePolicy::Compensate
            } else {
                PartialFailurePolicy::Propagate
            },
        }
    }
}

fn main() {
    // Logs go to stderr so stdout stays a clean CSV
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            tracing::error!(path = %args.input.display(), error = %e, "cannot open input");
            process::exit(1);
        }
    };

    let engine = Engine::with_config(args.config());
    let summary = process_operations(BufReader::new(file), &engine, args.workers);
    tracing::info!(
        applied = summary.applied,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "finished processing"
    );

    let written = if args.history {
        write_history(&engine, std::io::stdout())
    } else {
        write_balances(&engine, std::io::stdout()).map_err(OutputError::from)
    };
    if let Err(e) = written {
        tracing::error!(error = %e, "cannot write output");
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, user, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    kind: String,
    user: u64,
    amount: i64,
}

#[derive(Debug, Clone, Copy)]
struct Operation {
    kind: TransactionType,
    user_id: UserId,
    amount: i64,
}

impl CsvRecord {
    /// Returns `None` for unknown operation types.
    fn into_operation(self) -> Option<Operation> {
        let kind = self.kind.parse().ok()?;
        Some(Operation {
            kind,
            user_id: UserId(self.user),
            amount: self.amount,
        })
    }
}

/// Counts of what happened to each input row.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Summary {
    pub applied: usize,
    pub rejected: usize,
    pub skipped: usize,
}

/// Applies operations from a CSV reader.
///
/// Rows are streamed to `workers` threads. A user's rows always go to the
/// same worker (`user mod workers`), so they are applied in file order while
/// different users proceed in parallel. Malformed rows are skipped and
/// rejected operations (invalid amount, insufficient balance) are counted
/// but do not stop processing.
///
/// # CSV Format
///
/// ```csv
/// type,user,amount
/// charge,1,100
/// use,1,30
/// ```
pub fn process_operations<R: Read>(reader: R, engine: &Engine, workers: NonZeroUsize) -> Summary {
    let applied = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);
    let mut skipped = 0;

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .flexible(true)
        .has_headers(true)
        .from_reader(reader);

    thread::scope(|scope| {
        let senders: Vec<Sender<Operation>> = (0..workers.get())
            .map(|_| {
                let (tx, rx) = channel::unbounded::<Operation>();
                let (applied, rejected) = (&applied, &rejected);
                scope.spawn(move || {
                    for op in rx {
                        match engine.apply(op.kind, op.user_id, op.amount) {
                            Ok(_) => applied.fetch_add(1, Ordering::Relaxed),
                            Err(_) => rejected.fetch_add(1, Ordering::Relaxed),
                        };
                    }
                });
                tx
            })
            .collect();

        for result in rdr.deserialize::<CsvRecord>() {
            let record = match result {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed row");
                    skipped += 1;
                    continue;
                }
            };
            let Some(op) = record.into_operation() else {
                tracing::warn!("skipping row with unknown operation type");
                skipped += 1;
                continue;
            };

            let worker = (op.user_id.0 % senders.len() as u64) as usize;
            if senders[worker].send(op).is_err() {
                tracing::error!(worker, "worker stopped, abandoning remaining rows");
                break;
            }
        }
        // Closing the channels lets the workers drain and exit.
        drop(senders);
    });

    Summary {
        applied: applied.into_inner(),
        rejected: rejected.into_inner(),
        skipped,
    }
}

#[derive(Debug, thiserror::Error)]
enum OutputError {
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// Writes every known balance as CSV, sorted by user id.
///
/// # CSV Format
///
/// ```csv
/// id,point,updateMillis
/// 1,70,1718000000000
/// ```
pub fn write_balances<W: Write>(engine: &Engine, writer: W) -> Result<(), csv::Error> {
    let mut wtr = Writer::from_writer(writer);
    for point in engine.balances().snapshot() {
        wtr.serialize(&point)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes every user's history as CSV, users in id order.
///
/// # CSV Format
///
/// ```csv
/// id,userId,amount,type,timeMillis
/// 1,1,100,CHARGE,1718000000000
/// ```
fn write_history<W: Write>(engine: &Engine, writer: W) -> Result<(), OutputError> {
    let mut wtr = Writer::from_writer(writer);
    for point in engine.balances().snapshot() {
        for entry in engine.history(point.id)? {
            wtr.serialize(&entry)?;
        }
    }
    wtr.flush().map_err(csv::Error::from)?;
    Ok(())
}
