// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Virtual multicast interfaces and their periodic aging.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use slog::{debug, info};

use crate::plane::{McastPlane, PimSender};
use crate::timers::Countdown;
use crate::types::{McastdError, McastdResult};
use crate::Router;
use common::pim;

/// The most vifs one router can carry; bounded by the width of `VifSet`.
pub const MAX_VIFS: u8 = 32;

/// Identifies a single virtual interface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct VifIndex(pub u8);

impl fmt::Display for VifIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "vif{}", self.0)
    }
}

/// A set of vifs, represented as a bitmask.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VifSet(u32);

impl VifSet {
    pub const EMPTY: VifSet = VifSet(0);

    pub fn single(vif: VifIndex) -> VifSet {
        VifSet(1 << vif.0)
    }

    pub fn set(&mut self, vif: VifIndex) {
        self.0 |= 1 << vif.0;
    }

    pub fn clear(&mut self, vif: VifIndex) {
        self.0 &= !(1 << vif.0);
    }

    pub fn contains(&self, vif: VifIndex) -> bool {
        self.0 & (1 << vif.0) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn union(self, other: VifSet) -> VifSet {
        VifSet(self.0 | other.0)
    }

    pub fn minus(self, other: VifSet) -> VifSet {
        VifSet(self.0 & !other.0)
    }

    /// Does this set cover every member of `other`?
    pub fn covers(self, other: VifSet) -> bool {
        other.0 & !self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = VifIndex> {
        (0..MAX_VIFS).map(VifIndex).filter(move |v| self.contains(*v))
    }
}

impl fmt::Display for VifSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Identifies a PIM neighbor by the vif it was learned on and its
/// address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct NeighborKey {
    pub vif: VifIndex,
    pub addr: Ipv4Addr,
}

impl fmt::Display for NeighborKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.vif, self.addr)
    }
}

/// Soft state for one PIM neighbor, refreshed by its Hello messages.
#[derive(Debug)]
pub struct PimNeighbor {
    pub addr: Ipv4Addr,
    pub holdtime: Countdown,
}

impl PimNeighbor {
    /// Build a neighbor from a wire holdtime.  The 0xffff sentinel means
    /// the neighbor never times out, so it maps onto a countdown that the
    /// expiry predicate never matches.
    pub fn new(addr: Ipv4Addr, holdtime: u16) -> PimNeighbor {
        let holdtime = if holdtime == pim::HELLO_HOLDTIME_FOREVER {
            Countdown::Forever
        } else {
            Countdown::Armed(u32::from(holdtime))
        };
        PimNeighbor { addr, holdtime }
    }
}

/// One virtual multicast interface.
#[derive(Debug)]
pub struct Vif {
    pub name: String,
    pub local: Ipv4Addr,
    /// Administratively excluded from multicast routing.
    pub disabled: bool,
    /// Operationally down at the moment.
    pub down: bool,
    /// The Register-decapsulation pseudo-interface.
    pub register: bool,
    pub hello_timer: Countdown,
    pub query_timer: Countdown,
    pub neighbors: BTreeMap<Ipv4Addr, PimNeighbor>,
}

impl Vif {
    pub fn new(name: impl ToString, local: Ipv4Addr) -> Vif {
        Vif {
            name: name.to_string(),
            local,
            disabled: false,
            down: false,
            register: false,
            hello_timer: Countdown::Armed(u32::from(pim::HELLO_PERIOD)),
            query_timer: Countdown::Armed(u32::from(pim::QUERY_INTERVAL)),
            neighbors: BTreeMap::new(),
        }
    }

    /// Register and administratively/operationally down vifs carry no
    /// neighbor or query state to age.
    fn aging_eligible(&self) -> bool {
        !(self.disabled || self.down || self.register)
    }
}

/// All of the vifs on this router, indexed by `VifIndex`.
#[derive(Default)]
pub struct VifTable {
    vifs: Vec<Vif>,
}

impl VifTable {
    pub fn new() -> VifTable {
        VifTable { vifs: Vec::new() }
    }

    pub fn add_vif(&mut self, vif: Vif) -> McastdResult<VifIndex> {
        if self.vifs.len() >= usize::from(MAX_VIFS) {
            return Err(McastdError::VifTableFull);
        }
        let index = VifIndex(self.vifs.len() as u8);
        self.vifs.push(vif);
        Ok(index)
    }

    pub fn num_vifs(&self) -> u8 {
        self.vifs.len() as u8
    }

    pub fn get(&self, index: VifIndex) -> Option<&Vif> {
        self.vifs.get(usize::from(index.0))
    }

    pub fn get_mut(&mut self, index: VifIndex) -> Option<&mut Vif> {
        self.vifs.get_mut(usize::from(index.0))
    }

    pub fn indexes(&self) -> Vec<VifIndex> {
        (0..self.num_vifs()).map(VifIndex).collect()
    }

    /// The Register-decapsulation vif, if one is configured.
    pub fn register_vif(&self) -> Option<VifIndex> {
        self.vifs
            .iter()
            .position(|v| v.register)
            .map(|i| VifIndex(i as u8))
    }

    pub fn any_down(&self) -> bool {
        self.vifs.iter().any(|v| v.down && !v.disabled)
    }

    pub fn set_link_state(&mut self, index: VifIndex, up: bool) {
        if let Some(vif) = self.get_mut(index) {
            vif.down = !up;
        }
    }

    pub fn neighbor_count(&self) -> usize {
        self.vifs.iter().map(|v| v.neighbors.len()).sum()
    }

    pub fn dump(&self, log: &slog::Logger) {
        for (i, vif) in self.vifs.iter().enumerate() {
            debug!(log, "vif";
                "vif" => %VifIndex(i as u8),
                "name" => &vif.name,
                "local" => %vif.local,
                "neighbors" => vif.neighbors.len());
        }
    }
}

/// Age the per-vif state: time out neighbors and drive the periodic
/// Hello and group-membership-query sends.
pub fn age_vifs<P: McastPlane, S: PimSender>(
    router: &mut Router,
    plane: &mut P,
    sender: &mut S,
) {
    // Some platforms don't report link-down through the send path, so
    // re-probe any vif we believe is down before aging it.
    if router.vifs.any_down() {
        for (index, up) in plane.poll_vif_state() {
            router.vifs.set_link_state(index, up);
        }
    }

    let hello_period = u32::from(router.config.hello_period);
    let hello_holdtime = router.config.hello_holdtime;
    let query_interval = u32::from(router.config.query_interval);

    for index in router.vifs.indexes() {
        let mut expired = Vec::new();
        {
            let Some(vif) = router.vifs.get_mut(index) else {
                continue;
            };
            if !vif.aging_eligible() {
                continue;
            }

            // A holdtime that ran out on an earlier tick is collected
            // first; a live one burns this tick.  A neighbor armed with
            // holdtime N is deleted on tick N+1, never earlier.
            for nbr in vif.neighbors.values_mut() {
                if nbr.holdtime.is_expired() {
                    expired.push(nbr.addr);
                } else {
                    nbr.holdtime.tick();
                }
            }

            if vif.hello_timer.tick_expired() {
                sender.send_hello(index, hello_holdtime);
                vif.hello_timer.set(hello_period);
            }

            if vif.query_timer.tick_expired() {
                sender.send_group_query(index);
                vif.query_timer.set(query_interval);
            }
        }

        for addr in expired {
            info!(router.log, "pim neighbor timed out";
                "vif" => %index, "neighbor" => %addr);
            router.delete_neighbor(NeighborKey { vif: index, addr });
        }
    }

    debug!(router.log, "aged vifs";
        "vifs" => router.vifs.num_vifs(),
        "neighbors" => router.vifs.neighbor_count());
    router.vifs.dump(&router.log);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::plane::{MockMcastPlane, MockPimSender};

    fn test_router() -> Router {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        Router::new(log, Config::default())
    }

    fn add_test_vif(router: &mut Router) -> VifIndex {
        router
            .vifs
            .add_vif(Vif::new("qe0", Ipv4Addr::new(10, 0, 0, 1)))
            .unwrap()
    }

    #[test]
    fn test_vifset_ops() {
        let mut set = VifSet::EMPTY;
        assert!(set.is_empty());
        set.set(VifIndex(0));
        set.set(VifIndex(4));
        assert!(set.contains(VifIndex(4)));
        assert!(!set.contains(VifIndex(3)));
        assert_eq!(set.iter().count(), 2);

        let other = VifSet::single(VifIndex(4));
        assert!(set.covers(other));
        assert!(!other.covers(set));
        assert_eq!(set.minus(other), VifSet::single(VifIndex(0)));
        set.clear(VifIndex(0));
        set.clear(VifIndex(4));
        assert!(set.is_empty());
    }

    // A neighbor armed with holdtime 3 survives three ticks and is
    // deleted on the fourth.
    #[test]
    fn test_neighbor_holdtime() {
        let mut router = test_router();
        let index = add_test_vif(&mut router);
        let addr = Ipv4Addr::new(10, 0, 0, 2);
        router
            .vifs
            .get_mut(index)
            .unwrap()
            .neighbors
            .insert(addr, PimNeighbor::new(addr, 3));

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender.expect_send_hello().return_const(());
        sender.expect_send_group_query().return_const(());

        for _ in 0..3 {
            age_vifs(&mut router, &mut plane, &mut sender);
            assert_eq!(router.vifs.neighbor_count(), 1);
        }
        age_vifs(&mut router, &mut plane, &mut sender);
        assert_eq!(router.vifs.neighbor_count(), 0);
    }

    // The 0xffff wire sentinel never meets the expiry predicate.
    #[test]
    fn test_neighbor_holdtime_forever() {
        let mut router = test_router();
        let index = add_test_vif(&mut router);
        let addr = Ipv4Addr::new(10, 0, 0, 2);
        router.vifs.get_mut(index).unwrap().neighbors.insert(
            addr,
            PimNeighbor::new(addr, pim::HELLO_HOLDTIME_FOREVER),
        );

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender.expect_send_hello().return_const(());
        sender.expect_send_group_query().return_const(());

        for _ in 0..1000 {
            age_vifs(&mut router, &mut plane, &mut sender);
        }
        assert_eq!(router.vifs.neighbor_count(), 1);
    }

    // The Hello timer fires once per period and re-arms itself.
    #[test]
    fn test_hello_period() {
        let mut router = test_router();
        router.config.hello_period = 2;
        let index = add_test_vif(&mut router);
        router.vifs.get_mut(index).unwrap().hello_timer =
            Countdown::Armed(2);

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender
            .expect_send_hello()
            .withf(|vif, holdtime| {
                *vif == VifIndex(0) && *holdtime == pim::HELLO_HOLDTIME
            })
            .times(3)
            .return_const(());
        sender.expect_send_group_query().return_const(());

        for _ in 0..6 {
            age_vifs(&mut router, &mut plane, &mut sender);
        }
    }

    // Disabled and register vifs are skipped entirely.
    #[test]
    fn test_skips_ineligible_vifs() {
        let mut router = test_router();
        let index = add_test_vif(&mut router);
        router.vifs.get_mut(index).unwrap().disabled = true;

        let mut reg = Vif::new("register", Ipv4Addr::new(10, 0, 1, 1));
        reg.register = true;
        reg.hello_timer = Countdown::Armed(0);
        router.vifs.add_vif(reg).unwrap();

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender.expect_send_hello().times(0).return_const(());
        sender.expect_send_group_query().times(0).return_const(());

        age_vifs(&mut router, &mut plane, &mut sender);
    }
}
