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

use clap::ValueHint;
use clap_derive::{Parser, Subcommand};
use eyre::eyre;
use figment::Figment;
use figment::providers::{Format, Serialized, Yaml};
use mica_db::DatabaseConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "mica-admin")]
#[command(about = "Inspect and repair a mica object store", long_about = None)]
pub struct Args {
    #[arg(
        long,
        value_name = "data-dir",
        help = "Directory containing the store",
        value_hint = ValueHint::DirPath,
        default_value = "./mica-data"
    )]
    pub data_dir: PathBuf,

    #[command(flatten)]
    pub db_args: DatabaseArgs,

    #[arg(
        long,
        value_name = "config",
        help = "YAML configuration file; command line options take precedence",
        value_hint = ValueHint::FilePath
    )]
    pub config_file: Option<PathBuf>,

    #[arg(long, help = "Enable debug logging")]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Parser, Debug)]
pub struct DatabaseArgs {
    #[arg(
        long,
        value_name = "db",
        help = "Store filename (relative to data-dir if not absolute)",
        value_hint = ValueHint::FilePath,
        default_value = "objects.db"
    )]
    pub db: PathBuf,

    #[arg(long, help = "Cap on read connections")]
    pub max_connections: Option<i32>,

    #[arg(
        long,
        help = "Cap on write connections; -1 shares one pool between readers and writers",
        allow_hyphen_values = true
    )]
    pub max_write_connections: Option<i32>,
}

impl DatabaseArgs {
    fn merge_config(&self, config: &mut DatabaseConfig) {
        if let Some(max) = self.max_connections {
            config.max_connections = max;
        }
        if let Some(max) = self.max_write_connections {
            config.max_write_connections = max;
        }
    }
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// List dubbed names, optionally only those under a prefix
    Names { prefix: Option<String> },
    /// Move a name to a new one
    Rename { from: String, to: String },
    /// Remove a name; the object stays stored
    Unname { name: String },
    /// Count stored objects per type
    Census,
    /// Delete relation rows that point at objects which no longer exist
    Sweep,
    /// Report positional collections whose positions are not 0..n-1
    CheckOrdering,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
}

impl Args {
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_args.db.is_absolute() {
            self.db_args.db.clone()
        } else {
            self.data_dir.join(&self.db_args.db)
        }
    }

    /// Load the configuration file if given, then apply command line overrides. The store
    /// path always comes from the command line.
    pub fn load_config(&self) -> Result<Config, eyre::Report> {
        let mut config = match &self.config_file {
            Some(path) => Figment::new()
                .merge(Serialized::defaults(Config::default()))
                .merge(Yaml::file(path))
                .extract::<Config>()
                .map_err(|e| eyre!("Failed to parse configuration from {:?}: {}", path, e))?,
            None => Config::default(),
        };
        self.db_args.merge_config(&mut config.database);
        config.database.path = Some(self.resolved_db_path());
        Ok(config)
    }
}
