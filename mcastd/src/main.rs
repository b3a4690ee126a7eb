// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Main application entry point for `mcastd`, the PIM sparse-mode
//! multicast routing daemon.

use std::net::Ipv4Addr;

use anyhow::Context;
use futures::stream::StreamExt;
use libc::c_int;
use signal_hook::consts::SIGHUP;
use signal_hook::consts::SIGINT;
use signal_hook::consts::SIGQUIT;
use signal_hook::consts::SIGTERM;
use signal_hook_tokio::Signals;
use slog::debug;
use slog::info;
use structopt::StructOpt;
use tokio::time::sleep;
use tokio::time::Duration;

use crate::plane::McastPlane;
use crate::plane::PimSender;
use crate::plane::StubPlane;
use crate::plane::StubSender;
use crate::vif::NeighborKey;

mod age;
mod bootstrap;
mod config;
mod join_prune;
mod mrt;
mod plane;
mod rate;
mod rp;
mod timers;
mod types;
mod vif;

#[derive(Debug, Default, StructOpt)]
#[structopt(name = "mcastd", about = "PIM sparse-mode multicast routing daemon")]
pub(crate) struct Opt {
    #[structopt(
        long,
        help = "send log data to the named file rather than stdout"
    )]
    log_file: Option<String>,

    #[structopt(
        long,
        short = "l",
        help = "format logs for 'human' or 'json' consumption"
    )]
    log_format: Option<common::logging::LogFormat>,

    #[structopt(
        long,
        help = "file defining the vifs to configure at startup"
    )]
    vif_config: Option<String>,

    #[structopt(long, help = "seconds between aging ticks")]
    tick_interval: Option<u64>,

    #[structopt(
        long,
        help = "advertise this router as a Candidate-RP with the given address",
        parse(try_from_str)
    )]
    cand_rp: Option<Ipv4Addr>,

    #[structopt(
        long,
        help = "advertise this router as a Candidate-BSR with the given address",
        parse(try_from_str)
    )]
    cand_bsr: Option<Ipv4Addr>,
}

/// The main context object for running all of `mcastd`.
pub struct Router {
    // Time this object was created.
    start_time: chrono::DateTime<chrono::Utc>,
    pub config: config::Config,
    pub log: slog::Logger,
    pub vifs: vif::VifTable,
    pub mrt: mrt::MrtTable,
    pub rp_set: rp::RpSet,
    pub bsr: bootstrap::BsrState,
    pub aging: age::AgingContext,
}

impl Router {
    pub fn new(log: slog::Logger, config: config::Config) -> Router {
        let aging = age::AgingContext::new(&config);
        let bsr = bootstrap::BsrState::new(&config);
        Router {
            start_time: chrono::Utc::now(),
            config,
            log,
            vifs: vif::VifTable::new(),
            mrt: mrt::MrtTable::new(),
            rp_set: rp::RpSet::new(),
            bsr,
            aging,
        }
    }

    /// One full aging pass.  The host schedules the next tick only after
    /// this one has returned; overlapping ticks are not supported.
    pub fn tick<P: McastPlane, S: PimSender>(
        &mut self,
        plane: &mut P,
        sender: &mut S,
    ) {
        vif::age_vifs(self, plane, sender);
        age::age_routes(self, plane, sender);
        bootstrap::age_misc(self, plane, sender);
    }

    /// Remove a neighbor, dropping every reference the routing state
    /// still holds to it.  The affected entries pick up a new upstream
    /// on the next unicast-routing check.
    pub fn delete_neighbor(&mut self, nbr: NeighborKey) {
        if let Some(vif) = self.vifs.get_mut(nbr.vif) {
            vif.neighbors.remove(&nbr.addr);
        }
        self.mrt.clear_upstream(nbr);
        self.rp_set.clear_upstream(nbr);
    }

    pub fn uptime(&self) -> chrono::Duration {
        chrono::Utc::now() - self.start_time
    }
}

async fn run_mcastd(opt: Opt) -> anyhow::Result<()> {
    let config = config::build_config(&opt)?;

    let log =
        common::logging::init("mcastd", &config.log_file, config.log_format)?;
    info!(log, "mcastd config: {config:#?}");

    let mut router = Router::new(log.clone(), config);

    if let Some(path) = router.config.vif_config.clone() {
        debug!(log, "reading configured vifs"; "file" => &path);
        for vif_config in config::load_vif_config(&path)? {
            let mut vif = vif::Vif::new(&vif_config.name, vif_config.address);
            vif.disabled = vif_config.disabled;
            vif.register = vif_config.register;
            let index = router.vifs.add_vif(vif)?;
            info!(log, "configured vif";
                "vif" => %index, "name" => &vif_config.name);
        }
    }

    // Until the kernel and socket layers are wired in, the engine runs
    // against the logging stubs.
    let mut plane = StubPlane::new(log.new(slog::o!("unit" => "plane")));
    let mut sender = StubSender::new(log.new(slog::o!("unit" => "sender")));

    const SIGNALS: &[c_int] = &[SIGTERM, SIGQUIT, SIGINT, SIGHUP];
    let mut signals =
        Signals::new(SIGNALS).context("installing signal handler")?;

    let tick = Duration::from_secs(router.config.tick_interval);
    loop {
        // Single-shot re-arm: the next tick is only scheduled once this
        // one has run to completion, so ticks can never overlap.
        tokio::select! {
            _ = sleep(tick) => router.tick(&mut plane, &mut sender),
            signal = signals.next() => {
                if let Some(signal) = signal {
                    info!(log, "received signal"; "sig" => signal);
                }
                break;
            }
        }
    }

    info!(log, "done"; "uptime_secs" => router.uptime().num_seconds());
    Ok(())
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let opt = Opt::from_args();
    run_mcastd(opt).await
}
