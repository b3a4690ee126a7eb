// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The seams between the aging engine and the rest of the system.
//!
//! `McastPlane` covers everything the engine needs from the kernel and
//! unicast routing; `PimSender` covers protocol message emission.  The
//! daemon wires in real implementations; tests use mocks; the stub
//! backend below logs every side effect so the daemon can run
//! standalone.

use std::net::Ipv4Addr;

use slog::{debug, Logger};

use crate::join_prune::JpEntry;
use crate::mrt::MrtKey;
use crate::types::McastdResult;
use crate::vif::{NeighborKey, VifIndex, VifSet};

/// Which way a unicast lookup is oriented.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RouteKind {
    /// Toward a Rendezvous Point.
    Rp,
    /// Toward a source.
    Source,
}

/// The result of a unicast lookup: the incoming interface and, when the
/// next hop is a PIM neighbor, its address on that interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedRoute {
    pub iif: VifIndex,
    pub upstream: Option<Ipv4Addr>,
}

impl ResolvedRoute {
    pub fn upstream_nbr(&self) -> Option<NeighborKey> {
        self.upstream.map(|addr| NeighborKey { vif: self.iif, addr })
    }
}

/// An entry's forwarding state, pushed to the plane whenever it changes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceUpdate {
    pub key: MrtKey,
    pub incoming: Option<VifIndex>,
    pub joined: VifSet,
    pub pruned: VifSet,
    pub leaves: VifSet,
    pub asserted_oifs: VifSet,
}

/// Kernel and unicast-routing operations the aging engine depends on.
/// All calls are synchronous and must return immediately or fail.
#[cfg_attr(test, mockall::automock)]
pub trait McastPlane {
    /// Re-probe the operational state of the vifs.  Returns the vifs
    /// whose state is known, paired with "link is up".
    fn poll_vif_state(&mut self) -> Vec<(VifIndex, bool)>;

    /// Unicast RPF lookup.  `None` means there is no route.
    fn resolve_route(
        &mut self,
        addr: Ipv4Addr,
        kind: RouteKind,
    ) -> Option<ResolvedRoute>;

    /// The byte counter of one (source, group) forwarding-cache row.
    fn sg_byte_count(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
    ) -> McastdResult<u64>;

    /// Drop one (source, group) row from the forwarding cache.
    fn delete_mfc(&mut self, source: Ipv4Addr, group: Ipv4Addr);

    /// Push an entry's updated forwarding state down to the plane.
    fn change_interfaces(&mut self, update: &InterfaceUpdate);

    /// Re-root forwarding for (source, group) onto the shortest-path
    /// tree.  There is no reverse operation; a switched pair stays
    /// switched.
    fn switch_shortest_path(&mut self, source: Ipv4Addr, group: Ipv4Addr);
}

/// Protocol message emission.  Join/Prune entries are batched per
/// neighbor and go out on `flush_jp`.
#[cfg_attr(test, mockall::automock)]
pub trait PimSender {
    fn send_hello(&mut self, vif: VifIndex, holdtime: u16);
    fn send_group_query(&mut self, vif: VifIndex);
    fn send_cand_rp_adv(&mut self);
    fn send_bootstrap(&mut self);
    fn send_null_register(&mut self, source: Ipv4Addr, group: Ipv4Addr);
    fn add_jp_entry(&mut self, target: NeighborKey, entry: JpEntry);
    fn flush_jp(&mut self, target: NeighborKey);
}

/// A plane that answers every query with "nothing there".  Under the
/// stub, cache rows age out as idle and unresolvable entries take their
/// failure paths, which is exactly what a standalone run can exercise.
pub struct StubPlane {
    log: Logger,
}

impl StubPlane {
    pub fn new(log: Logger) -> StubPlane {
        StubPlane { log }
    }
}

impl McastPlane for StubPlane {
    fn poll_vif_state(&mut self) -> Vec<(VifIndex, bool)> {
        Vec::new()
    }

    fn resolve_route(
        &mut self,
        addr: Ipv4Addr,
        kind: RouteKind,
    ) -> Option<ResolvedRoute> {
        debug!(self.log, "stub route lookup";
            "addr" => %addr, "kind" => ?kind);
        None
    }

    fn sg_byte_count(
        &mut self,
        _source: Ipv4Addr,
        _group: Ipv4Addr,
    ) -> McastdResult<u64> {
        Ok(0)
    }

    fn delete_mfc(&mut self, source: Ipv4Addr, group: Ipv4Addr) {
        debug!(self.log, "stub mfc delete";
            "source" => %source, "group" => %group);
    }

    fn change_interfaces(&mut self, update: &InterfaceUpdate) {
        debug!(self.log, "stub interface change";
            "entry" => %update.key,
            "iif" => ?update.incoming,
            "joined" => %update.joined,
            "pruned" => %update.pruned,
            "leaves" => %update.leaves,
            "asserted" => %update.asserted_oifs);
    }

    fn switch_shortest_path(&mut self, source: Ipv4Addr, group: Ipv4Addr) {
        debug!(self.log, "stub spt switch";
            "source" => %source, "group" => %group);
    }
}

/// A sender that just logs what would have gone out on the wire.
pub struct StubSender {
    log: Logger,
}

impl StubSender {
    pub fn new(log: Logger) -> StubSender {
        StubSender { log }
    }
}

impl PimSender for StubSender {
    fn send_hello(&mut self, vif: VifIndex, holdtime: u16) {
        debug!(self.log, "stub hello"; "vif" => %vif, "holdtime" => holdtime);
    }

    fn send_group_query(&mut self, vif: VifIndex) {
        debug!(self.log, "stub group query"; "vif" => %vif);
    }

    fn send_cand_rp_adv(&mut self) {
        debug!(self.log, "stub cand-rp-adv");
    }

    fn send_bootstrap(&mut self) {
        debug!(self.log, "stub bootstrap");
    }

    fn send_null_register(&mut self, source: Ipv4Addr, group: Ipv4Addr) {
        debug!(self.log, "stub null-register";
            "source" => %source, "group" => %group);
    }

    fn add_jp_entry(&mut self, target: NeighborKey, entry: JpEntry) {
        debug!(self.log, "stub join/prune entry";
            "target" => %target,
            "action" => %entry.action,
            "scope" => ?entry.scope,
            "holdtime" => entry.holdtime,
            "group" => format!("{}/{}", entry.group, entry.group_masklen),
            "source" => format!("{}/{}", entry.source, entry.source_masklen));
    }

    fn flush_jp(&mut self, target: NeighborKey) {
        debug!(self.log, "stub join/prune flush"; "target" => %target);
    }
}
