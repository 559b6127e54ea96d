// Copyright (C) 2025 Ryan Daum <ryan.daum@gmail.com> This program is free
// software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, version
// 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Operator tool for mica object stores. Works directly against the store file, holding an
//! exclusive lock on the data directory while it runs.

mod args;

use crate::args::{Args, Command};
use clap::Parser;
use eyre::{Report, bail};
use fs2::FileExt;
use mica_common::TypeRegistry;
use mica_db::{Database, Gateway, TxMode};
use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

/// Acquire an exclusive lock on the data directory
fn acquire_data_directory_lock(data_dir: &Path) -> Result<File, Report> {
    std::fs::create_dir_all(data_dir)?;

    let lock_file_path = data_dir.join(".mica-admin.lock");
    let lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&lock_file_path)?;

    let Err(e) = lock_file.try_lock_exclusive() else {
        info!("Acquired exclusive lock on data directory: {:?}", data_dir);
        return Ok(lock_file);
    };

    error!(
        "Failed to acquire lock on data directory {:?}. Another mica process may be running.",
        data_dir
    );
    bail!("Directory lock acquisition failed: {}", e);
}

fn run(gateway: &Gateway, command: &Command) -> Result<(), Report> {
    match command {
        Command::Names { prefix } => {
            for name in gateway.names(prefix.as_deref().unwrap_or(""))? {
                println!("{name}");
            }
        }
        Command::Rename { from, to } => {
            let renamed = gateway.transaction(TxMode::Immediate, |g| g.rename(from, to))?;
            if !renamed {
                bail!("No object is named {from:?}");
            }
            println!("{from} -> {to}");
        }
        Command::Unname { name } => {
            if !gateway.transaction(TxMode::Immediate, |g| g.unname(name))? {
                bail!("No object is named {name:?}");
            }
        }
        Command::Census => {
            for (type_name, count) in gateway.type_census()? {
                println!("{count:>10}  {type_name}");
            }
        }
        Command::Sweep => {
            let swept = gateway.transaction(TxMode::Immediate, |g| g.sweep_dangling_references())?;
            println!("{swept} dangling rows removed");
        }
        Command::CheckOrdering => {
            let broken = gateway.check_all_orderings()?;
            for (table, owner) in &broken {
                println!("{table}: owner #{owner} has gaps or duplicates");
            }
            if !broken.is_empty() {
                bail!("{} collections are out of order", broken.len());
            }
            println!("All positional collections are dense");
        }
    }
    Ok(())
}

fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let args = Args::parse();
    mica_common::tracing::init_tracing(args.debug)?;

    let config = args.load_config()?;
    let _lock = acquire_data_directory_lock(&args.data_dir)?;

    info!("Opening store at {:?}", config.database.path);
    let database = Database::new(config.database, Arc::new(TypeRegistry::default()));
    let gateway = database.new_thread(None);
    run(&gateway, &args.command)
}
