// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.


use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use conjure::{
    ActivityLog, CacheStore, Conjure, ConjureConfig, FileCacheStore, JsonlActivityLog, Shape,
};
use serde_json::Value;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug, Clone)]
#[command(name = "conjure", about = "Call functions that were never written")]
struct Cli {
    /// TOML file with explicit settings; the environment fills whatever it leaves unset.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Resolve a named call and print its value as JSON.
    Call {
        name: String,

        /// Arguments as JSON; anything that does not parse is passed as a string.
        args: Vec<String>,

        /// Expected result shape as JSON, e.g. '{"type":"number"}'.
        #[arg(long)]
        shape: Option<String>,

        /// Fail on a shape mismatch instead of returning the raw value.
        #[arg(long)]
        strict: bool,
    },

    ClearCache,

    /// Print the activity records of one UTC day (today by default).
    Logs {
        #[arg(long, value_name = "YYYY-MM-DD")]
        date: Option<NaiveDate>,
    },

    ClearLogs,
}

fn parse_argument(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn load_config(path: Option<&PathBuf>) -> Result<ConjureConfig> {
    match path {
        Some(path) => ConjureConfig::from_toml_file(path)
            .with_context(|| format!("failed to read config {}", path.display())),
        None => Ok(ConjureConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_ref())?;

    match cli.cmd {
        Command::Call {
            name,
            args,
            shape,
            strict,
        } => {
            if strict {
                config.strict = Some(true);
            }
            let shape: Option<Shape> = shape
                .as_deref()
                .map(serde_json::from_str::<Shape>)
                .transpose()
                .context("--shape is not a valid shape")?;
            let conjure = Conjure::builder().config(config).build()?;

            let arguments = args.iter().map(|a| parse_argument(a)).collect();
            let value = conjure.invoke(name, arguments).resolve(shape).await?;
            println!("{}", serde_json::to_string_pretty(&value)?);

            let stats = conjure.stats();
            info!(hits = stats.hits, misses = stats.misses, generations = stats.generations, "done");
        }
        Command::ClearCache => {
            let settings = config.resolve();
            FileCacheStore::new(settings.cache_dir.clone()).clear().await?;
            println!("cleared cache at {}", settings.cache_dir.display());
        }
        Command::Logs { date } => {
            let settings = config.resolve();
            let day = date.unwrap_or_else(|| Utc::now().date_naive());
            let log = JsonlActivityLog::new(settings.log_dir);
            for record in log.read_day(day).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::ClearLogs => {
            let settings = config.resolve();
            JsonlActivityLog::new(settings.log_dir.clone()).clear().await?;
            println!("cleared logs at {}", settings.log_dir.display());
        }
    }

    Ok(())
}
