// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Configuration for `mcastd`.

use std::net::Ipv4Addr;

use serde::Deserialize;

use crate::types::{McastdError, McastdResult};
use crate::Opt;
use common::logging::LogFormat;
use common::pim;

/// The run-time settings controllable from the command line.  Protocol
/// timer values are in seconds, rates in bits/s.
#[derive(Debug)]
pub struct Config {
    /// If set, where the log should be written.  If not set, the log
    /// goes to stdout.
    pub log_file: Option<String>,

    /// Output log info in unstructured text or json?
    pub log_format: LogFormat,

    /// Where to find the config info for the vifs that should be created
    /// at startup.
    pub vif_config: Option<String>,

    /// Seconds between aging ticks.
    pub tick_interval: u64,

    /// Interval between Hello messages on each interface.
    pub hello_period: u16,

    /// Holdtime advertised in our Hellos.
    pub hello_holdtime: u16,

    /// Interval between group-membership queries on each interface.
    pub query_interval: u16,

    /// Interval between periodic Join/Prune messages.
    pub jp_period: u16,

    /// Holdtime carried in Join/Prune messages.
    pub jp_holdtime: u16,

    /// Data-rate threshold for the last-hop switch to the shortest-path
    /// tree.
    pub data_rate: u32,
    pub data_rate_interval: u16,

    /// Register-rate threshold for the RP-initiated switch.
    pub reg_rate: u32,
    pub reg_rate_interval: u16,

    /// How often to re-check unicast routing for iif changes.
    pub ucast_interval: u16,

    /// Advertise this router as a Candidate-RP.
    pub cand_rp: Option<CandRpConfig>,

    /// Advertise this router as a Candidate-BSR.
    pub cand_bsr: Option<CandBsrConfig>,
}

#[derive(Clone, Debug)]
pub struct CandRpConfig {
    pub address: Ipv4Addr,
    pub adv_period: u16,
}

#[derive(Clone, Debug)]
pub struct CandBsrConfig {
    pub address: Ipv4Addr,
    pub priority: u8,
    pub hash_masklen: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_file: None,
            log_format: LogFormat::Json,
            vif_config: None,
            tick_interval: 1,
            hello_period: pim::HELLO_PERIOD,
            hello_holdtime: pim::HELLO_HOLDTIME,
            query_interval: pim::QUERY_INTERVAL,
            jp_period: pim::JOIN_PRUNE_PERIOD,
            jp_holdtime: pim::JOIN_PRUNE_HOLDTIME,
            data_rate: pim::DEFAULT_DATA_RATE,
            data_rate_interval: pim::DEFAULT_DATA_RATE_INTERVAL,
            reg_rate: pim::DEFAULT_REG_RATE,
            reg_rate_interval: pim::DEFAULT_REG_RATE_INTERVAL,
            ucast_interval: pim::UCAST_ROUTING_CHECK_INTERVAL,
            cand_rp: None,
            cand_bsr: None,
        }
    }
}

/// Build the run-time configuration from the defaults and the
/// command-line options.
pub fn build_config(opt: &Opt) -> McastdResult<Config> {
    let mut config = Config::default();
    if let Some(log_file) = &opt.log_file {
        config.log_file = Some(log_file.clone());
    }
    if let Some(log_format) = opt.log_format {
        config.log_format = log_format;
    }
    if let Some(vif_config) = &opt.vif_config {
        config.vif_config = Some(vif_config.clone());
    }
    if let Some(tick_interval) = opt.tick_interval {
        if tick_interval == 0 {
            return Err(McastdError::Invalid(
                "tick interval must be non-zero".to_string(),
            ));
        }
        config.tick_interval = tick_interval;
    }
    if let Some(address) = opt.cand_rp {
        config.cand_rp = Some(CandRpConfig {
            address,
            adv_period: pim::CAND_RP_ADV_PERIOD,
        });
    }
    if let Some(address) = opt.cand_bsr {
        config.cand_bsr = Some(CandBsrConfig {
            address,
            priority: 0,
            hash_masklen: pim::RP_DEFAULT_HASHMASKLEN,
        });
    }
    Ok(config)
}

/// One vif stanza of the startup config file.
#[derive(Debug, Deserialize)]
pub struct VifConfig {
    pub name: String,
    pub address: Ipv4Addr,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub register: bool,
}

#[derive(Debug, Deserialize)]
struct VifConfigFile {
    #[serde(default)]
    vif: Vec<VifConfig>,
}

fn parse_vif_config(contents: &str) -> McastdResult<Vec<VifConfig>> {
    let parsed: VifConfigFile = toml::from_str(contents)
        .map_err(|e| McastdError::Invalid(format!("parsing vif config: {e}")))?;
    Ok(parsed.vif)
}

/// Load the vifs to create at startup.
pub fn load_vif_config(path: &str) -> McastdResult<Vec<VifConfig>> {
    let contents = std::fs::read_to_string(path)?;
    parse_vif_config(&contents)
}
