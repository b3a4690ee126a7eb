// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Logging setup shared by all daemons in the workspace.

use std::fmt;
use std::fs::OpenOptions;
use std::str::FromStr;

use anyhow::Context;
use slog::Drain;

/// How log records should be rendered.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-friendly terminal output.
    Human,
    /// Bunyan-style newline-delimited JSON.
    #[default]
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "human" => Ok(LogFormat::Human),
            "json" => Ok(LogFormat::Json),
            _ => Err(anyhow::anyhow!("invalid log format: {s}")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Human => write!(f, "human"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

fn async_root<D>(drain: D, name: &'static str) -> slog::Logger
where
    D: Drain<Ok = ()> + Send + 'static,
    <D as Drain>::Err: std::fmt::Debug,
{
    let drain = slog_async::Async::new(drain.fuse()).build().fuse();
    slog::Logger::root(drain, slog::o!("daemon" => name))
}

/// Build the root logger, writing to `log_file` if set and stdout
/// otherwise.
pub fn init(
    name: &'static str,
    log_file: &Option<String>,
    log_format: LogFormat,
) -> anyhow::Result<slog::Logger> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {path}"))?;
            match log_format {
                LogFormat::Human => {
                    let decorator = slog_term::PlainDecorator::new(file);
                    let drain =
                        slog_term::FullFormat::new(decorator).build().fuse();
                    Ok(async_root(drain, name))
                }
                LogFormat::Json => {
                    let drain = slog_bunyan::with_name(name, file)
                        .build()
                        .fuse();
                    Ok(async_root(drain, name))
                }
            }
        }
        None => match log_format {
            LogFormat::Human => {
                let decorator = slog_term::TermDecorator::new().build();
                let drain =
                    slog_term::FullFormat::new(decorator).build().fuse();
                Ok(async_root(drain, name))
            }
            LogFormat::Json => {
                let drain = slog_bunyan::with_name(name, std::io::stdout())
                    .build()
                    .fuse();
                Ok(async_root(drain, name))
            }
        },
    }
}
