// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The Candidate-RP set: which Rendezvous Point serves which group
//! range, as learned from Bootstrap messages.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use oxnet::Ipv4Net;
use slog::debug;

use crate::mrt::MrtId;
use crate::timers::Countdown;
use crate::vif::{NeighborKey, VifIndex};
use common::pim;

/// Unicast routing state toward one candidate RP, shared by everything
/// mapped to it.
#[derive(Debug)]
pub struct RpState {
    pub addr: Ipv4Addr,
    pub incoming: Option<VifIndex>,
    pub upstream: Option<NeighborKey>,
    /// The (*,*,RP) routing entry for this RP, if one exists.
    pub mrtlink: Option<MrtId>,
}

/// Keys one (RP, group-range) mapping.  The prefix is carried as
/// (base, masklen) so the key orders naturally in a BTreeMap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct RpGrpKey {
    pub rp: Ipv4Addr,
    pub group_base: Ipv4Addr,
    pub masklen: u8,
}

impl RpGrpKey {
    pub fn prefix(&self) -> Ipv4Net {
        Ipv4Net::new_unchecked(self.group_base, self.masklen)
    }
}

/// One advertised (RP, group-range) mapping.
#[derive(Debug)]
pub struct RpGrpEntry {
    pub priority: u8,
    pub holdtime: Countdown,
}

/// The full Candidate-RP set.
#[derive(Default)]
pub struct RpSet {
    rps: BTreeMap<Ipv4Addr, RpState>,
    mappings: BTreeMap<RpGrpKey, RpGrpEntry>,
}

impl RpSet {
    pub fn new() -> RpSet {
        RpSet::default()
    }

    pub fn rp_addrs(&self) -> Vec<Ipv4Addr> {
        self.rps.keys().copied().collect()
    }

    pub fn get(&self, addr: Ipv4Addr) -> Option<&RpState> {
        self.rps.get(&addr)
    }

    pub fn get_mut(&mut self, addr: Ipv4Addr) -> Option<&mut RpState> {
        self.rps.get_mut(&addr)
    }

    /// Look up an RP, creating its state on first sight.
    pub fn add_rp(&mut self, addr: Ipv4Addr) -> &mut RpState {
        self.rps.entry(addr).or_insert(RpState {
            addr,
            incoming: None,
            upstream: None,
            mrtlink: None,
        })
    }

    pub fn remove_rp(&mut self, addr: Ipv4Addr) -> Option<RpState> {
        self.rps.remove(&addr)
    }

    /// Record an advertised mapping.  A holdtime at or above the wire
    /// sentinel never ages out.
    pub fn add_mapping(&mut self, key: RpGrpKey, priority: u8, holdtime: u16) {
        self.add_rp(key.rp);
        let holdtime = if holdtime >= pim::CAND_RP_HOLDTIME_FOREVER {
            Countdown::Forever
        } else {
            Countdown::Armed(u32::from(holdtime))
        };
        self.mappings.insert(key, RpGrpEntry { priority, holdtime });
    }

    pub fn mapping_keys(&self) -> Vec<RpGrpKey> {
        self.mappings.keys().copied().collect()
    }

    pub fn get_mapping_mut(&mut self, key: &RpGrpKey) -> Option<&mut RpGrpEntry> {
        self.mappings.get_mut(key)
    }

    pub fn delete_mapping(&mut self, key: &RpGrpKey) -> Option<RpGrpEntry> {
        self.mappings.remove(key)
    }

    pub fn mappings_for_rp(&self, rp: Ipv4Addr) -> usize {
        self.mappings.keys().filter(|key| key.rp == rp).count()
    }

    /// Forget a deleted neighbor; see `MrtTable::clear_upstream`.
    pub fn clear_upstream(&mut self, nbr: NeighborKey) {
        for rp in self.rps.values_mut() {
            if rp.upstream == Some(nbr) {
                rp.upstream = None;
            }
        }
    }

    pub fn dump(&self, log: &slog::Logger) {
        debug!(log, "candidate-rp set";
            "rps" => self.rps.len(),
            "mappings" => self.mappings.len());
        for rp in self.rps.values() {
            debug!(log, "rp";
                "addr" => %rp.addr,
                "iif" => ?rp.incoming,
                "mappings" => self.mappings_for_rp(rp.addr));
        }
    }
}
