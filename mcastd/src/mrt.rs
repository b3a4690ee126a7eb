// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The multicast routing table.
//!
//! Entries come in three kinds, distinguished by how far down the
//! (source, group) hierarchy they apply:
//!
//!  - `(*,*,RP)`: all groups mapped to one Rendezvous Point
//!  - `(*,G)`: one group on the RP-rooted shared tree
//!  - `(S,G)`: one (source, group) pair; with the RP-bit set, the entry's
//!    incoming interface follows the RP rather than the source
//!
//! The table is a set of id-keyed maps.  Aging passes capture the key
//! lists they will visit up front and re-validate every entry on access,
//! so an entry deleted mid-scan is simply skipped rather than
//! dereferenced.

use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;

use slog::debug;

use crate::plane::McastPlane;
use crate::timers::Countdown;
use crate::vif::{NeighborKey, VifIndex, VifSet, MAX_VIFS};
use common::pim;

/// Identifies one routing entry for the lifetime of the table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct MrtId(u32);

impl fmt::Display for MrtId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "mrt{}", self.0)
    }
}

/// What a routing entry covers, and the state only that coverage needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MrtKind {
    WildcardRp {
        rp: Ipv4Addr,
        /// The forwarding plane needs per-source rows cloned from a
        /// deleted wildcard aggregate row.
        clone_sg: bool,
    },
    WildcardGroup {
        group: Ipv4Addr,
        clone_sg: bool,
    },
    SourceGroup {
        source: Ipv4Addr,
        group: Ipv4Addr,
        /// The incoming interface follows the RP, not the source.
        rp_bit: bool,
        /// Register-Suppression countdown; only (S,G) entries register.
        rs_timer: Countdown,
    },
}

impl MrtKind {
    pub fn rp_bit(&self) -> bool {
        matches!(self, MrtKind::SourceGroup { rp_bit: true, .. })
    }

    pub fn set_clone_sg(&mut self) {
        match self {
            MrtKind::WildcardRp { clone_sg, .. }
            | MrtKind::WildcardGroup { clone_sg, .. } => *clone_sg = true,
            MrtKind::SourceGroup { .. } => (),
        }
    }
}

/// Addresses identifying an entry to the forwarding plane.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MrtKey {
    WildcardRp(Ipv4Addr),
    WildcardGroup(Ipv4Addr),
    SourceGroup(Ipv4Addr, Ipv4Addr),
}

impl fmt::Display for MrtKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrtKey::WildcardRp(rp) => write!(f, "(*,*,{rp})"),
            MrtKey::WildcardGroup(group) => write!(f, "(*,{group})"),
            MrtKey::SourceGroup(source, group) => {
                write!(f, "({source},{group})")
            }
        }
    }
}

/// One (source, group) row of the kernel forwarding cache, with the byte
/// counter observed at the last rate check.  A source of 0.0.0.0 is the
/// wildcard aggregate row.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelCache {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    pub bytes: u64,
}

/// One multicast routing entry.
#[derive(Debug)]
pub struct MrtEntry {
    pub id: MrtId,
    pub kind: MrtKind,
    pub incoming: Option<VifIndex>,
    pub upstream: Option<NeighborKey>,
    pub oif_timers: [Countdown; MAX_VIFS as usize],
    pub joined: VifSet,
    pub pruned: VifSet,
    /// Interfaces with directly connected members.
    pub leaves: VifSet,
    pub asserted_oifs: VifSet,
    /// The outgoing set pushed to the plane; derived from the sets above.
    pub oifs: VifSet,
    /// An assert lost/won on the incoming interface is in force.
    pub asserted: bool,
    pub jp_timer: Countdown,
    pub assert_timer: Countdown,
    pub lifetime: Countdown,
    pub kernel_cache: Vec<KernelCache>,
}

impl MrtEntry {
    fn new(id: MrtId, kind: MrtKind) -> MrtEntry {
        MrtEntry {
            id,
            kind,
            incoming: None,
            upstream: None,
            oif_timers: [Countdown::Disabled; MAX_VIFS as usize],
            joined: VifSet::EMPTY,
            pruned: VifSet::EMPTY,
            leaves: VifSet::EMPTY,
            asserted_oifs: VifSet::EMPTY,
            oifs: VifSet::EMPTY,
            asserted: false,
            jp_timer: Countdown::Armed(u32::from(pim::JOIN_PRUNE_PERIOD)),
            assert_timer: Countdown::Disabled,
            lifetime: Countdown::Disabled,
            kernel_cache: Vec::new(),
        }
    }

    pub fn key(&self) -> MrtKey {
        match &self.kind {
            MrtKind::WildcardRp { rp, .. } => MrtKey::WildcardRp(*rp),
            MrtKind::WildcardGroup { group, .. } => {
                MrtKey::WildcardGroup(*group)
            }
            MrtKind::SourceGroup { source, group, .. } => {
                MrtKey::SourceGroup(*source, *group)
            }
        }
    }

    /// The outgoing interfaces in force: joined-but-not-pruned plus the
    /// directly connected members, never an asserted-away interface, and
    /// never the incoming interface itself.
    pub fn calc_oifs(&self) -> VifSet {
        let mut oifs = self
            .joined
            .minus(self.pruned)
            .union(self.leaves)
            .minus(self.asserted_oifs);
        if let Some(incoming) = self.incoming {
            oifs.clear(incoming);
        }
        oifs
    }

    /// Is this router a last-hop router for the entry, i.e. does it have
    /// directly connected members?
    pub fn is_last_hop(&self) -> bool {
        !self.leaves.is_empty()
    }
}

/// Per-source unicast routing state shared by that source's (S,G)
/// entries.
#[derive(Debug)]
pub struct SrcEntry {
    pub addr: Ipv4Addr,
    pub incoming: Option<VifIndex>,
    pub upstream: Option<NeighborKey>,
}

/// Per-group node linking the shared-tree entry, the source-specific
/// entries, and the RP currently mapped to the group.
#[derive(Debug)]
pub struct GroupEntry {
    pub group: Ipv4Addr,
    pub rp: Option<Ipv4Addr>,
    pub wc_route: Option<MrtId>,
    pub sources: BTreeMap<Ipv4Addr, MrtId>,
}

/// The routing table proper.
#[derive(Default)]
pub struct MrtTable {
    next_id: u32,
    entries: BTreeMap<MrtId, MrtEntry>,
    pub groups: BTreeMap<Ipv4Addr, GroupEntry>,
    pub sources: BTreeMap<Ipv4Addr, SrcEntry>,
}

impl MrtTable {
    pub fn new() -> MrtTable {
        MrtTable::default()
    }

    pub fn get(&self, id: MrtId) -> Option<&MrtEntry> {
        self.entries.get(&id)
    }

    pub fn get_mut(&mut self, id: MrtId) -> Option<&mut MrtEntry> {
        self.entries.get_mut(&id)
    }

    fn alloc(&mut self, kind: MrtKind) -> MrtId {
        let id = MrtId(self.next_id);
        self.next_id += 1;
        self.entries.insert(id, MrtEntry::new(id, kind));
        id
    }

    /// Create the (*,*,RP) entry for an RP.  The caller links it into the
    /// RP set.
    pub fn create_wc_rp(&mut self, rp: Ipv4Addr) -> MrtId {
        self.alloc(MrtKind::WildcardRp { rp, clone_sg: false })
    }

    /// Create the (*,G) entry for a group, creating the group node as
    /// needed.
    pub fn create_wc_group(
        &mut self,
        group: Ipv4Addr,
        rp: Option<Ipv4Addr>,
    ) -> MrtId {
        let id = self.alloc(MrtKind::WildcardGroup { group, clone_sg: false });
        let node = self.group_node(group, rp);
        node.wc_route = Some(id);
        id
    }

    /// Create an (S,G) entry, creating the group node and the per-source
    /// routing state as needed.
    pub fn create_sg(
        &mut self,
        source: Ipv4Addr,
        group: Ipv4Addr,
        rp: Option<Ipv4Addr>,
        rp_bit: bool,
    ) -> MrtId {
        let id = self.alloc(MrtKind::SourceGroup {
            source,
            group,
            rp_bit,
            rs_timer: Countdown::Disabled,
        });
        self.sources.entry(source).or_insert(SrcEntry {
            addr: source,
            incoming: None,
            upstream: None,
        });
        let node = self.group_node(group, rp);
        node.sources.insert(source, id);
        id
    }

    fn group_node(
        &mut self,
        group: Ipv4Addr,
        rp: Option<Ipv4Addr>,
    ) -> &mut GroupEntry {
        let node = self.groups.entry(group).or_insert(GroupEntry {
            group,
            rp: None,
            wc_route: None,
            sources: BTreeMap::new(),
        });
        if rp.is_some() {
            node.rp = rp;
        }
        node
    }

    /// Delete an entry, dropping its kernel-cache rows from the plane and
    /// unlinking it from its group node.  Returns the removed entry so
    /// the caller can unlink any reference it still holds.
    pub fn delete_entry<P: McastPlane>(
        &mut self,
        id: MrtId,
        plane: &mut P,
    ) -> Option<MrtEntry> {
        let entry = self.entries.remove(&id)?;
        for row in &entry.kernel_cache {
            plane.delete_mfc(row.source, row.group);
        }
        match &entry.kind {
            MrtKind::WildcardRp { .. } => (),
            MrtKind::WildcardGroup { group, .. } => {
                if let Some(node) = self.groups.get_mut(group) {
                    if node.wc_route == Some(id) {
                        node.wc_route = None;
                    }
                    self.drop_group_if_empty(*group);
                }
            }
            MrtKind::SourceGroup { source, group, .. } => {
                if let Some(node) = self.groups.get_mut(group) {
                    node.sources.remove(source);
                    self.drop_group_if_empty(*group);
                }
                self.drop_source_if_unused(*source);
            }
        }
        Some(entry)
    }

    fn drop_group_if_empty(&mut self, group: Ipv4Addr) {
        if let Some(node) = self.groups.get(&group) {
            if node.wc_route.is_none() && node.sources.is_empty() {
                self.groups.remove(&group);
            }
        }
    }

    fn drop_source_if_unused(&mut self, source: Ipv4Addr) {
        let in_use = self
            .groups
            .values()
            .any(|node| node.sources.contains_key(&source));
        if !in_use {
            self.sources.remove(&source);
        }
    }

    /// Groups currently mapped to the given RP, in address order.
    pub fn groups_for_rp(&self, rp: Ipv4Addr) -> Vec<Ipv4Addr> {
        self.groups
            .values()
            .filter(|node| node.rp == Some(rp))
            .map(|node| node.group)
            .collect()
    }

    /// Forget a deleted neighbor.  Entries that pointed at it fall back
    /// to "no upstream" until the next unicast-routing check resolves a
    /// replacement.
    pub fn clear_upstream(&mut self, nbr: NeighborKey) {
        for entry in self.entries.values_mut() {
            if entry.upstream == Some(nbr) {
                entry.upstream = None;
            }
        }
        for src in self.sources.values_mut() {
            if src.upstream == Some(nbr) {
                src.upstream = None;
            }
        }
    }

    pub fn dump(&self, log: &slog::Logger) {
        debug!(log, "multicast routing table";
            "entries" => self.entries.len(),
            "groups" => self.groups.len(),
            "sources" => self.sources.len());
        for entry in self.entries.values() {
            debug!(log, "mrt entry";
                "id" => %entry.id,
                "entry" => %entry.key(),
                "iif" => ?entry.incoming,
                "oifs" => %entry.oifs);
        }
    }
}
