// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The Join/Prune decision engine.
//!
//! `join_or_prune` is the per-entry decision; `echo_into` is the rule
//! table governing how a decision at a broader scope is reflected into
//! the Join/Prune message of a nested narrower scope:
//!
//! ```text
//!                          narrower Join | narrower Prune
//!   broader Join         |      N        |      Y
//!   broader Prune        |      SY       |      N
//! ```
//!
//! "Y" must be included, "SY" should be included, "N" need not be.  The
//! rule only applies across strictly nested scopes ((*,*,RP) over (*,G)
//! and (S,G); (*,G) over (S,G)), never within a scope or upward.

use std::net::Ipv4Addr;

use strum::Display;

use crate::mrt::{MrtEntry, MrtKind};
use crate::vif::NeighborKey;

/// What an entry wants from its upstream neighbor this period.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum JpAction {
    Join,
    Prune,
    Nothing,
}

/// How strongly a broader-scope decision must be echoed into a narrower
/// entry's message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Inclusion {
    Must,
    Should,
    No,
}

/// How the addresses of a Join/Prune entry are to be encoded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JpScope {
    WildcardRp,
    WildcardGroup,
    SourceGroup { rp_bit: bool },
}

/// One entry of a batched Join/Prune message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JpEntry {
    pub holdtime: u16,
    pub group: Ipv4Addr,
    pub group_masklen: u8,
    pub source: Ipv4Addr,
    pub source_masklen: u8,
    pub scope: JpScope,
    pub action: JpAction,
}

/// Decide what `entry` should send toward the given neighbor.
///
/// An entry with no outgoing interfaces always prunes.  One with
/// outgoing interfaces joins, except that an (S,G) entry evaluated
/// against a neighbor other than its own upstream prunes (the traffic
/// arrives on another path, so the shared-tree copy is unwanted), and an
/// RP-bit (S,G) entry needs no join of its own unless an assert forced
/// one (the shared tree already carries it).
pub fn join_or_prune(
    entry: &MrtEntry,
    toward: Option<NeighborKey>,
) -> JpAction {
    let Some(toward) = toward else {
        return JpAction::Nothing;
    };
    if entry.oifs.is_empty() {
        return JpAction::Prune;
    }
    match &entry.kind {
        MrtKind::WildcardRp { .. } | MrtKind::WildcardGroup { .. } => {
            JpAction::Join
        }
        MrtKind::SourceGroup { rp_bit, .. } => {
            if entry.upstream != Some(toward) {
                JpAction::Prune
            } else if *rp_bit && !entry.asserted {
                JpAction::Nothing
            } else {
                JpAction::Join
            }
        }
    }
}

/// The inclusion table.  A non-`No` result for a nested pair is also the
/// signal that the narrower entry's Join/Prune timer must be
/// force-expired so the conflict resolves on this tick.
pub fn echo_into(broader: JpAction, narrower: JpAction) -> Inclusion {
    match (broader, narrower) {
        (JpAction::Join, JpAction::Prune) => Inclusion::Must,
        (JpAction::Prune, JpAction::Join) => Inclusion::Should,
        _ => Inclusion::No,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mrt::MrtTable;
    use crate::vif::{VifIndex, VifSet};

    fn nbr(last: u8) -> NeighborKey {
        NeighborKey {
            vif: VifIndex(0),
            addr: Ipv4Addr::new(10, 0, 0, last),
        }
    }

    fn sg_entry(rp_bit: bool, oifs: bool) -> MrtEntry {
        let mut mrt = MrtTable::new();
        let id = mrt.create_sg(
            Ipv4Addr::new(10, 9, 8, 7),
            Ipv4Addr::new(224, 1, 1, 1),
            None,
            rp_bit,
        );
        // Lift the entry out of the table; the decision function only
        // needs the entry itself.
        let mut plane = crate::plane::MockMcastPlane::new();
        let mut entry = mrt.delete_entry(id, &mut plane).unwrap();
        entry.upstream = Some(nbr(2));
        if oifs {
            entry.oifs = VifSet::single(VifIndex(3));
        }
        entry
    }

    #[test]
    fn test_no_upstream_no_action() {
        let entry = sg_entry(false, true);
        assert_eq!(join_or_prune(&entry, None), JpAction::Nothing);
    }

    #[test]
    fn test_empty_oifs_prunes() {
        let entry = sg_entry(false, false);
        assert_eq!(join_or_prune(&entry, Some(nbr(2))), JpAction::Prune);
    }

    #[test]
    fn test_spt_entry_joins_own_upstream() {
        let entry = sg_entry(false, true);
        assert_eq!(join_or_prune(&entry, Some(nbr(2))), JpAction::Join);
    }

    // Evaluated toward the RP path while rooted on the source path: the
    // shared-tree copy is pruned.
    #[test]
    fn test_spt_entry_prunes_rp_path() {
        let entry = sg_entry(false, true);
        assert_eq!(join_or_prune(&entry, Some(nbr(9))), JpAction::Prune);
    }

    #[test]
    fn test_rp_bit_entry_rides_shared_tree() {
        let mut entry = sg_entry(true, true);
        assert_eq!(join_or_prune(&entry, Some(nbr(2))), JpAction::Nothing);
        entry.asserted = true;
        assert_eq!(join_or_prune(&entry, Some(nbr(2))), JpAction::Join);
    }

    // A broader Join is echoed into a narrower Prune and never into a
    // narrower Join; a broader Prune the other way around.
    #[test]
    fn test_inclusion_table() {
        assert_eq!(
            echo_into(JpAction::Join, JpAction::Prune),
            Inclusion::Must
        );
        assert_eq!(echo_into(JpAction::Join, JpAction::Join), Inclusion::No);
        assert_eq!(
            echo_into(JpAction::Prune, JpAction::Join),
            Inclusion::Should
        );
        assert_eq!(echo_into(JpAction::Prune, JpAction::Prune), Inclusion::No);
        for narrower in [JpAction::Join, JpAction::Prune, JpAction::Nothing] {
            assert_eq!(echo_into(JpAction::Nothing, narrower), Inclusion::No);
        }
    }
}
