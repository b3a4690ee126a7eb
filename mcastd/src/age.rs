// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The per-tick walk over the whole multicast routing table.
//!
//! Each tick ages, in order, every Candidate-RP's (*,*,RP) entry, the
//! (*,G) entries of the groups mapped to that RP, and each group's (S,G)
//! entries.  At every level the walk expires outgoing-interface timers,
//! picks up unicast-routing changes to the incoming interface, runs the
//! traffic-rate monitor, and drives the Join/Prune decision, cascading
//! the broader-scope decisions into the narrower ones.  Entries whose
//! lifetime ran out are deleted as they are visited; all the Join/Prune
//! entries batched during the walk are flushed per neighbor at the end.

use slog::{debug, info};

use crate::config::Config;
use crate::join_prune::{
    echo_into, join_or_prune, Inclusion, JpAction, JpEntry, JpScope,
};
use crate::mrt::{MrtEntry, MrtKind};
use crate::plane::{InterfaceUpdate, McastPlane, PimSender, RouteKind};
use crate::rate;
use crate::timers::Countdown;
use crate::vif::{NeighborKey, VifIndex};
use crate::Router;
use common::network::{
    CLASSD_PREFIX, SINGLE_GRP_MASKLEN, SINGLE_SRC_MASKLEN,
    STAR_STAR_RP_MASKLEN,
};
use common::pim;

/// The previous iif/upstream of an RP or source entry, captured before a
/// route refresh so a change can be detected without a full diff.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RouteSnapshot {
    pub incoming: Option<VifIndex>,
    pub upstream: Option<NeighborKey>,
}

/// All the cross-entry aging state for one tick: the global check timers
/// and their flags, the derived byte thresholds, and the shadow copies.
///
/// `src_save` is overwritten for every source visited within a tick;
/// consumers must read it before the next source is processed.
pub struct AgingContext {
    ucast_timer: Countdown,
    data_rate_timer: Countdown,
    reg_rate_timer: Countdown,
    ucast_interval: u32,
    data_rate_interval: u32,
    reg_rate_interval: u32,
    pub data_rate_bytes: u64,
    pub reg_rate_bytes: u64,
    pub ucast_flag: bool,
    pub data_rate_flag: bool,
    pub reg_rate_flag: bool,
    pub rate_flag: bool,
    pub rp_save: RouteSnapshot,
    pub src_save: RouteSnapshot,
}

impl AgingContext {
    pub fn new(config: &Config) -> AgingContext {
        let ucast_interval = u32::from(config.ucast_interval);
        let data_rate_interval = u32::from(config.data_rate_interval);
        // The register-rate interval never exceeds the data-rate one.
        let reg_rate_interval =
            u32::from(config.reg_rate_interval).min(data_rate_interval);

        let mut ucast_timer = Countdown::Disabled;
        ucast_timer.set(ucast_interval);
        // The rate checks start out interleaved with the routing check to
        // spread the per-tick work.
        let mut data_rate_timer = Countdown::Disabled;
        data_rate_timer.set(3 * data_rate_interval / 2);
        let mut reg_rate_timer = Countdown::Disabled;
        reg_rate_timer.set(3 * reg_rate_interval / 2);

        AgingContext {
            ucast_timer,
            data_rate_timer,
            reg_rate_timer,
            ucast_interval,
            data_rate_interval,
            reg_rate_interval,
            data_rate_bytes: pim::rate_threshold_bytes(
                config.data_rate,
                data_rate_interval as u16,
            ),
            reg_rate_bytes: pim::rate_threshold_bytes(
                config.reg_rate,
                reg_rate_interval as u16,
            ),
            ucast_flag: false,
            data_rate_flag: false,
            reg_rate_flag: false,
            rate_flag: false,
            rp_save: RouteSnapshot::default(),
            src_save: RouteSnapshot::default(),
        }
    }

    /// Recompute the global check flags.  Runs once per tick, before any
    /// entry is evaluated.
    fn refresh_flags(&mut self) {
        self.ucast_flag = self.ucast_timer.tick_expired();
        if self.ucast_flag {
            self.ucast_timer.set(self.ucast_interval);
        }
        self.data_rate_flag = self.data_rate_timer.tick_expired();
        if self.data_rate_flag {
            self.data_rate_timer.set(self.data_rate_interval);
        }
        self.reg_rate_flag = self.reg_rate_timer.tick_expired();
        if self.reg_rate_flag {
            self.reg_rate_timer.set(self.reg_rate_interval);
        }
        self.rate_flag = self.data_rate_flag || self.reg_rate_flag;
    }
}

/// Expire the outgoing-interface timers of joined interfaces.  Returns
/// whether any interface was dropped.  The register vif never ages this
/// way; (S,G) callers pass it in `skip`.
fn age_oif_timers(entry: &mut MrtEntry, skip: Option<VifIndex>) -> bool {
    let mut change = false;
    for vif in entry.joined.iter() {
        if Some(vif) == skip {
            continue;
        }
        if entry.oif_timers[usize::from(vif.0)].tick_expired() {
            entry.joined.clear(vif);
            change = true;
        }
    }
    change
}

/// Install new iif/upstream values on an entry, recompute its outgoing
/// set, and push the result down to the forwarding plane.
fn push_interfaces<P: McastPlane>(
    entry: &mut MrtEntry,
    incoming: Option<VifIndex>,
    upstream: Option<NeighborKey>,
    plane: &mut P,
) {
    entry.incoming = incoming;
    entry.upstream = upstream;
    entry.oifs = entry.calc_oifs();
    plane.change_interfaces(&InterfaceUpdate {
        key: entry.key(),
        incoming,
        joined: entry.joined,
        pruned: entry.pruned,
        leaves: entry.leaves,
        asserted_oifs: entry.asserted_oifs,
    });
}

fn age_assert(entry: &mut MrtEntry) {
    if entry.asserted && entry.assert_timer.tick_expired() {
        // TODO-correctness: the upstream neighbor should be re-resolved
        // here as well.
        entry.asserted = false;
        entry.assert_timer.reset();
    }
}

enum RsEvent {
    None,
    Expired,
    Probe,
}

/// Walk and age the whole routing table.
pub fn age_routes<P: McastPlane, S: PimSender>(
    r: &mut Router,
    plane: &mut P,
    sender: &mut S,
) {
    r.aging.refresh_flags();

    let log = r.log.clone();
    let register_vif = r.vifs.register_vif();
    let ucast_flag = r.aging.ucast_flag;
    let rate_flag = r.aging.rate_flag;
    let data_rate_bytes = r.aging.data_rate_bytes;
    let reg_rate_bytes = r.aging.reg_rate_bytes;
    let jp_period = u32::from(r.config.jp_period);
    let jp_holdtime = r.config.jp_holdtime;
    let my_rp_addr = r.config.cand_rp.as_ref().map(|c| c.address);

    for rp_addr in r.rp_set.rp_addrs() {
        // Refresh the unicast route toward the RP.  On failure the iif
        // stays as it was: the network may be partitioning, and the
        // bootstrap mechanism will eventually deliver a usable RP set.
        let mut update_rp_iif = false;
        {
            let Some(rp) = r.rp_set.get_mut(rp_addr) else {
                continue;
            };
            r.aging.rp_save = RouteSnapshot {
                incoming: rp.incoming,
                upstream: rp.upstream,
            };
            // If we are this RP, the iif is the register vif and is not
            // subject to unicast routing.
            if ucast_flag && Some(rp_addr) != my_rp_addr {
                match plane.resolve_route(rp_addr, RouteKind::Rp) {
                    None => {
                        debug!(log, "no unicast route toward rp";
                            "rp" => %rp_addr);
                    }
                    Some(route) => {
                        rp.incoming = Some(route.iif);
                        rp.upstream = route.upstream_nbr();
                        if r.aging.rp_save.incoming != rp.incoming
                            || r.aging.rp_save.upstream != rp.upstream
                        {
                            update_rp_iif = true;
                        }
                    }
                }
            }
        }
        let (rp_incoming, rp_upstream, mut rp_mrtlink) =
            match r.rp_set.get(rp_addr) {
                Some(rp) => (rp.incoming, rp.upstream, rp.mrtlink),
                None => continue,
            };

        // The (*,*,RP) entry.
        let mut rp_action = JpAction::Nothing;
        if let Some(id) = rp_mrtlink {
            let mut delete = false;
            if let Some(entry) = r.mrt.get_mut(id) {
                let change = age_oif_timers(entry, None);
                if change || update_rp_iif {
                    push_interfaces(entry, rp_incoming, rp_upstream, plane);
                }
                if rate_flag {
                    rate::age_kernel_cache(
                        &log,
                        entry,
                        register_vif,
                        data_rate_bytes,
                        reg_rate_bytes,
                        plane,
                    );
                }
                if entry.jp_timer.tick_expired() {
                    rp_action = join_or_prune(entry, entry.upstream);
                    if rp_action != JpAction::Nothing {
                        if let Some(nbr) = entry.upstream {
                            sender.add_jp_entry(
                                nbr,
                                JpEntry {
                                    holdtime: jp_holdtime,
                                    group: CLASSD_PREFIX,
                                    group_masklen: STAR_STAR_RP_MASKLEN,
                                    source: rp_addr,
                                    source_masklen: SINGLE_SRC_MASKLEN,
                                    scope: JpScope::WildcardRp,
                                    action: rp_action,
                                },
                            );
                        }
                    }
                    entry.jp_timer.set(jp_period);
                }
                age_assert(entry);
                // Register-Suppression never applies at (*,*,RP) scope.
                if entry.lifetime.tick_expired() && entry.leaves.is_empty() {
                    delete = true;
                }
            }
            if delete {
                info!(log, "(*,*,RP) entry timed out"; "rp" => %rp_addr);
                r.mrt.delete_entry(id, plane);
                if let Some(rp) = r.rp_set.get_mut(rp_addr) {
                    rp.mrtlink = None;
                }
            }
        }
        // In case the (*,*,RP) entry just deleted itself.
        rp_mrtlink = r.rp_set.get(rp_addr).and_then(|rp| rp.mrtlink);

        // The (*,G) and (S,G) entries under this RP.
        for group_addr in r.mrt.groups_for_rp(rp_addr) {
            let (wc_id, src_ids) = match r.mrt.groups.get(&group_addr) {
                Some(node) => (
                    node.wc_route,
                    node.sources
                        .iter()
                        .map(|(addr, id)| (*addr, *id))
                        .collect::<Vec<_>>(),
                ),
                None => continue,
            };

            // The (*,G) entry.
            let mut grp_action = JpAction::Nothing;
            if let Some(id) = wc_id {
                let mut delete = false;
                if let Some(entry) = r.mrt.get_mut(id) {
                    let change = age_oif_timers(entry, None);
                    if change || update_rp_iif {
                        push_interfaces(
                            entry, rp_incoming, rp_upstream, plane,
                        );
                    }
                    if rate_flag {
                        rate::age_kernel_cache(
                            &log,
                            entry,
                            register_vif,
                            data_rate_bytes,
                            reg_rate_bytes,
                            plane,
                        );
                    }
                    let mut dont_calc = false;
                    if rp_action != JpAction::Nothing {
                        grp_action = join_or_prune(entry, entry.upstream);
                        dont_calc = true;
                        if echo_into(rp_action, grp_action) != Inclusion::No {
                            // Conflicting scopes resolve on this tick, not
                            // when the timer would naturally expire.
                            entry.jp_timer.fire();
                        }
                    }
                    if entry.jp_timer.tick_expired() {
                        if !dont_calc {
                            grp_action = join_or_prune(entry, entry.upstream);
                        }
                        if grp_action != JpAction::Nothing {
                            if let Some(nbr) = entry.upstream {
                                sender.add_jp_entry(
                                    nbr,
                                    JpEntry {
                                        holdtime: jp_holdtime,
                                        group: group_addr,
                                        group_masklen: SINGLE_GRP_MASKLEN,
                                        source: rp_addr,
                                        source_masklen: SINGLE_SRC_MASKLEN,
                                        scope: JpScope::WildcardGroup,
                                        action: grp_action,
                                    },
                                );
                            }
                        }
                        entry.jp_timer.set(jp_period);
                    }
                    age_assert(entry);
                    if entry.lifetime.tick_expired()
                        && entry.leaves.is_empty()
                    {
                        delete = true;
                    }
                }
                if delete {
                    info!(log, "(*,G) entry timed out";
                        "group" => %group_addr);
                    r.mrt.delete_entry(id, plane);
                }
            }

            // The (S,G) entries for this group.
            for (src_addr, sid) in src_ids {
                let rp_bit = match r.mrt.get(sid) {
                    Some(entry) => entry.kind.rp_bit(),
                    None => continue,
                };

                // Refresh the unicast route: toward the source for a
                // normal entry, inherited from the RP for an RP-bit one.
                let mut src_route: Option<(
                    Option<VifIndex>,
                    Option<NeighborKey>,
                )> = None;
                if ucast_flag {
                    if !rp_bit {
                        if let Some(src) = r.mrt.sources.get_mut(&src_addr) {
                            r.aging.src_save = RouteSnapshot {
                                incoming: src.incoming,
                                upstream: src.upstream,
                            };
                            match plane
                                .resolve_route(src_addr, RouteKind::Source)
                            {
                                None => {
                                    // Unlike the RP case there is no
                                    // fallback path to this source.
                                    info!(log, "no route toward source, \
                                        deleting entry";
                                        "source" => %src_addr,
                                        "group" => %group_addr);
                                    r.mrt.delete_entry(sid, plane);
                                    continue;
                                }
                                Some(route) => {
                                    src.incoming = Some(route.iif);
                                    src.upstream = route.upstream_nbr();
                                    if r.aging.src_save.incoming
                                        != src.incoming
                                        || r.aging.src_save.upstream
                                            != src.upstream
                                    {
                                        debug!(log, "route toward source \
                                            changed";
                                            "source" => %src.addr);
                                    }
                                    src_route =
                                        Some((src.incoming, src.upstream));
                                }
                            }
                        }
                    } else {
                        src_route = Some((rp_incoming, rp_upstream));
                    }
                }

                // Parent state, fetched before the entry is borrowed.
                let wide_id = wc_id.or(rp_mrtlink);
                let wide_upstream =
                    wide_id.and_then(|w| r.mrt.get(w)).and_then(|e| e.upstream);
                let wc_leaves =
                    wc_id.and_then(|w| r.mrt.get(w)).map(|e| e.leaves);

                let mut delete = false;
                if let Some(entry) = r.mrt.get_mut(sid) {
                    let change = age_oif_timers(entry, register_vif);

                    let mut update_src_iif = false;
                    if let Some((inc, ups)) = src_route {
                        if entry.incoming != inc || entry.upstream != ups {
                            update_src_iif = true;
                        }
                    }
                    if change || update_src_iif {
                        let (inc, ups) = src_route
                            .unwrap_or((entry.incoming, entry.upstream));
                        push_interfaces(entry, inc, ups, plane);
                    }
                    if rate_flag {
                        rate::age_kernel_cache(
                            &log,
                            entry,
                            register_vif,
                            data_rate_bytes,
                            reg_rate_bytes,
                            plane,
                        );
                    }

                    // Join/Prune, cascading both broader decisions.
                    let mut dont_calc = false;
                    let mut src_action = JpAction::Nothing;
                    let mut src_action_rp = JpAction::Nothing;
                    if rp_action != JpAction::Nothing
                        || grp_action != JpAction::Nothing
                    {
                        src_action_rp = join_or_prune(entry, rp_upstream);
                        src_action = src_action_rp;
                        dont_calc = true;
                        let conflict = match src_action_rp {
                            JpAction::Join => {
                                grp_action == JpAction::Prune
                                    || rp_action == JpAction::Prune
                            }
                            JpAction::Prune => {
                                grp_action == JpAction::Join
                                    || rp_action == JpAction::Join
                            }
                            JpAction::Nothing => false,
                        };
                        if conflict {
                            entry.jp_timer.fire();
                        }
                    }
                    if entry.jp_timer.tick_expired() {
                        if !dont_calc || rp_upstream != entry.upstream {
                            src_action =
                                join_or_prune(entry, entry.upstream);
                        }
                        if src_action != JpAction::Nothing {
                            if let Some(nbr) = entry.upstream {
                                sender.add_jp_entry(
                                    nbr,
                                    JpEntry {
                                        holdtime: jp_holdtime,
                                        group: group_addr,
                                        group_masklen: SINGLE_GRP_MASKLEN,
                                        source: src_addr,
                                        source_masklen: SINGLE_SRC_MASKLEN,
                                        scope: JpScope::SourceGroup {
                                            rp_bit,
                                        },
                                        action: src_action,
                                    },
                                );
                            }
                        }
                        // With both (S,G) and a broader entry in force and
                        // rooted on different paths, this entry may also
                        // owe a Prune toward the RP side.
                        if wide_id.is_some()
                            && entry.upstream != wide_upstream
                        {
                            if !dont_calc {
                                src_action_rp =
                                    join_or_prune(entry, wide_upstream);
                            }
                            if src_action_rp == JpAction::Prune {
                                if let Some(nbr) = wide_upstream {
                                    sender.add_jp_entry(
                                        nbr,
                                        JpEntry {
                                            holdtime: jp_holdtime,
                                            group: group_addr,
                                            group_masklen:
                                                SINGLE_GRP_MASKLEN,
                                            source: src_addr,
                                            source_masklen:
                                                SINGLE_SRC_MASKLEN,
                                            scope: JpScope::SourceGroup {
                                                rp_bit: true,
                                            },
                                            action: JpAction::Prune,
                                        },
                                    );
                                }
                            }
                        }
                        entry.jp_timer.set(jp_period);
                    }
                    age_assert(entry);

                    // Register-Suppression.
                    let rs_event = match &mut entry.kind {
                        MrtKind::SourceGroup { rs_timer, .. }
                            if rs_timer.is_set() =>
                        {
                            if rs_timer.tick_expired() {
                                rs_timer.reset();
                                RsEvent::Expired
                            } else if rs_timer.value()
                                == Some(u32::from(pim::REGISTER_PROBE_TIME))
                            {
                                RsEvent::Probe
                            } else {
                                RsEvent::None
                            }
                        }
                        _ => RsEvent::None,
                    };
                    match rs_event {
                        RsEvent::Expired => {
                            // Suppression is over; resume sending
                            // Registers by taking the register vif back
                            // out of the pruned set.
                            if let Some(reg) = register_vif {
                                entry.pruned.clear(reg);
                            }
                            let (inc, ups) =
                                (entry.incoming, entry.upstream);
                            push_interfaces(entry, inc, ups, plane);
                        }
                        RsEvent::Probe => {
                            sender.send_null_register(src_addr, group_addr);
                        }
                        RsEvent::None => (),
                    }

                    // Entry lifetime.
                    if entry.lifetime.tick_expired() {
                        if entry.leaves.is_empty() {
                            delete = true;
                        } else if let Some(wc_leaves) = wc_leaves {
                            // Every remaining leaf is inherited from the
                            // (*,G) entry, so this entry adds nothing and
                            // would otherwise never time out.
                            if wc_leaves.covers(entry.leaves) {
                                delete = true;
                            }
                        }
                    }
                }
                if delete {
                    info!(log, "(S,G) entry timed out";
                        "source" => %src_addr, "group" => %group_addr);
                    r.mrt.delete_entry(sid, plane);
                }
            }
        }
    }

    // Flush everything batched during the walk.
    for index in r.vifs.indexes() {
        if let Some(vif) = r.vifs.get(index) {
            for addr in vif.neighbors.keys() {
                sender.flush_jp(NeighborKey { vif: index, addr: *addr });
            }
        }
    }

    r.mrt.dump(&r.log);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::mrt::MrtId;
    use crate::plane::{MockMcastPlane, MockPimSender, ResolvedRoute};
    use crate::rp::RpGrpKey;
    use crate::vif::{PimNeighbor, Vif, VifSet};
    use std::net::Ipv4Addr;

    fn test_router() -> Router {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        Router::new(log, Config::default())
    }

    fn rp_addr() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 100)
    }

    fn group() -> Ipv4Addr {
        Ipv4Addr::new(224, 1, 1, 1)
    }

    fn source() -> Ipv4Addr {
        Ipv4Addr::new(10, 9, 8, 7)
    }

    fn nbr(last: u8) -> NeighborKey {
        NeighborKey {
            vif: VifIndex(0),
            addr: Ipv4Addr::new(10, 0, 0, last),
        }
    }

    // Map the whole class-D space onto one RP and give it a (*,*,RP)
    // entry.
    fn add_rp(r: &mut Router) -> MrtId {
        r.rp_set.add_mapping(
            RpGrpKey {
                rp: rp_addr(),
                group_base: Ipv4Addr::new(224, 0, 0, 0),
                masklen: 4,
            },
            0,
            pim::CAND_RP_HOLDTIME_FOREVER,
        );
        let id = r.mrt.create_wc_rp(rp_addr());
        r.rp_set.get_mut(rp_addr()).unwrap().mrtlink = Some(id);
        id
    }

    // A tick on which nothing expired and no route changed leaves the
    // table untouched and calls nothing.
    #[test]
    fn test_quiet_tick_changes_nothing() {
        let mut r = test_router();
        let id = add_rp(&mut r);
        {
            let entry = r.mrt.get_mut(id).unwrap();
            entry.incoming = Some(VifIndex(0));
            entry.upstream = Some(nbr(2));
            entry.oifs = VifSet::single(VifIndex(1));
            entry.jp_timer = Countdown::Armed(100);
        }

        // No expectations: any plane or sender call panics.
        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        age_routes(&mut r, &mut plane, &mut sender);

        let entry = r.mrt.get(id).unwrap();
        assert_eq!(entry.incoming, Some(VifIndex(0)));
        assert_eq!(entry.upstream, Some(nbr(2)));
        assert_eq!(entry.oifs, VifSet::single(VifIndex(1)));
        assert_eq!(entry.jp_timer, Countdown::Armed(99));
    }

    #[test]
    fn test_join_emitted_and_rearmed() {
        let mut r = test_router();
        let index = r
            .vifs
            .add_vif(Vif::new("qe0", Ipv4Addr::new(10, 0, 0, 1)))
            .unwrap();
        let nbr_addr = Ipv4Addr::new(10, 0, 0, 2);
        r.vifs.get_mut(index).unwrap().neighbors.insert(
            nbr_addr,
            PimNeighbor::new(nbr_addr, pim::HELLO_HOLDTIME_FOREVER),
        );

        let id = add_rp(&mut r);
        {
            let entry = r.mrt.get_mut(id).unwrap();
            entry.upstream = Some(nbr(2));
            entry.oifs = VifSet::single(VifIndex(1));
            entry.jp_timer = Countdown::Armed(1);
        }

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender
            .expect_add_jp_entry()
            .withf(|target, entry| {
                *target
                    == NeighborKey {
                        vif: VifIndex(0),
                        addr: Ipv4Addr::new(10, 0, 0, 2),
                    }
                    && entry.action == JpAction::Join
                    && entry.scope == JpScope::WildcardRp
                    && entry.group == CLASSD_PREFIX
                    && entry.group_masklen == STAR_STAR_RP_MASKLEN
                    && entry.source == Ipv4Addr::new(10, 0, 0, 100)
            })
            .times(1)
            .return_const(());
        sender.expect_flush_jp().times(1).return_const(());

        age_routes(&mut r, &mut plane, &mut sender);
        assert_eq!(
            r.mrt.get(id).unwrap().jp_timer,
            Countdown::Armed(u32::from(pim::JOIN_PRUNE_PERIOD))
        );
    }

    // A (*,*,RP) Prune landing on a (*,G) that wants Join force-expires
    // the (*,G) timer, so both go out on this tick.
    #[test]
    fn test_scope_conflict_forces_same_tick_send() {
        let mut r = test_router();
        let rp_id = add_rp(&mut r);
        {
            let entry = r.mrt.get_mut(rp_id).unwrap();
            entry.upstream = Some(nbr(2));
            entry.jp_timer = Countdown::Armed(1);
        }
        let wc_id = r.mrt.create_wc_group(group(), Some(rp_addr()));
        {
            let entry = r.mrt.get_mut(wc_id).unwrap();
            entry.upstream = Some(nbr(2));
            entry.oifs = VifSet::single(VifIndex(1));
            entry.jp_timer = Countdown::Armed(500);
        }

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender
            .expect_add_jp_entry()
            .withf(|_, e| {
                e.scope == JpScope::WildcardRp && e.action == JpAction::Prune
            })
            .times(1)
            .return_const(());
        sender
            .expect_add_jp_entry()
            .withf(|_, e| {
                e.scope == JpScope::WildcardGroup
                    && e.action == JpAction::Join
            })
            .times(1)
            .return_const(());

        age_routes(&mut r, &mut plane, &mut sender);
        assert_eq!(
            r.mrt.get(wc_id).unwrap().jp_timer,
            Countdown::Armed(u32::from(pim::JOIN_PRUNE_PERIOD))
        );
    }

    // An entry deleting itself mid-walk is skipped, not dereferenced, by
    // the rest of the walk.
    #[test]
    fn test_midscan_deletion_is_safe() {
        let mut r = test_router();
        add_rp(&mut r);
        let wc_id = r.mrt.create_wc_group(group(), Some(rp_addr()));
        let sg_id = r.mrt.create_sg(source(), group(), Some(rp_addr()), false);
        {
            let entry = r.mrt.get_mut(wc_id).unwrap();
            entry.jp_timer = Countdown::Armed(100);
            entry.lifetime = Countdown::Armed(1);
        }
        r.mrt.get_mut(sg_id).unwrap().jp_timer = Countdown::Armed(100);

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        age_routes(&mut r, &mut plane, &mut sender);

        assert!(r.mrt.get(wc_id).is_none());
        assert!(r.mrt.get(sg_id).is_some());
    }

    // A unicast routing change propagates into the RP state and its
    // entries; a source with no route at all loses its entry.
    #[test]
    fn test_ucast_refresh_and_source_failure() {
        let mut r = test_router();
        let rp_id = add_rp(&mut r);
        let wc_id = r.mrt.create_wc_group(group(), Some(rp_addr()));
        let sg_id = r.mrt.create_sg(source(), group(), Some(rp_addr()), false);
        r.mrt.get_mut(wc_id).unwrap().jp_timer = Countdown::Armed(100);
        r.aging.ucast_timer = Countdown::Armed(1);

        let mut plane = MockMcastPlane::new();
        plane.expect_resolve_route().returning(|_, kind| match kind {
            RouteKind::Rp => Some(ResolvedRoute {
                iif: VifIndex(2),
                upstream: Some(Ipv4Addr::new(10, 0, 2, 9)),
            }),
            RouteKind::Source => None,
        });
        plane.expect_change_interfaces().times(2).return_const(());
        let mut sender = MockPimSender::new();

        age_routes(&mut r, &mut plane, &mut sender);

        let expect_nbr = NeighborKey {
            vif: VifIndex(2),
            addr: Ipv4Addr::new(10, 0, 2, 9),
        };
        let rp = r.rp_set.get(rp_addr()).unwrap();
        assert_eq!(rp.incoming, Some(VifIndex(2)));
        assert_eq!(rp.upstream, Some(expect_nbr));
        assert_eq!(r.mrt.get(rp_id).unwrap().incoming, Some(VifIndex(2)));
        assert_eq!(r.mrt.get(wc_id).unwrap().upstream, Some(expect_nbr));
        assert!(r.mrt.get(sg_id).is_none());
        assert!(r.mrt.sources.is_empty());
    }

    // One Null-Register per suppression cycle; on expiry the register
    // vif leaves the pruned set and the plane hears about it.
    #[test]
    fn test_register_suppression_cycle() {
        let mut r = test_router();
        let mut reg = Vif::new("register", Ipv4Addr::new(10, 0, 0, 1));
        reg.register = true;
        let reg_index = r.vifs.add_vif(reg).unwrap();
        add_rp(&mut r);
        let sg_id = r.mrt.create_sg(source(), group(), Some(rp_addr()), false);
        {
            let entry = r.mrt.get_mut(sg_id).unwrap();
            entry.jp_timer = Countdown::Armed(1000);
            entry.pruned.set(reg_index);
            if let MrtKind::SourceGroup { rs_timer, .. } = &mut entry.kind {
                rs_timer.set(u32::from(pim::REGISTER_PROBE_TIME) + 1);
            }
        }

        let mut plane = MockMcastPlane::new();
        plane.expect_change_interfaces().times(1).return_const(());
        let mut sender = MockPimSender::new();
        sender
            .expect_send_null_register()
            .withf(|s, g| {
                *s == Ipv4Addr::new(10, 9, 8, 7)
                    && *g == Ipv4Addr::new(224, 1, 1, 1)
            })
            .times(1)
            .return_const(());

        for _ in 0..6 {
            age_routes(&mut r, &mut plane, &mut sender);
        }

        let entry = r.mrt.get(sg_id).unwrap();
        assert!(!entry.pruned.contains(reg_index));
        match &entry.kind {
            MrtKind::SourceGroup { rs_timer, .. } => {
                assert_eq!(*rs_timer, Countdown::Disabled)
            }
            _ => unreachable!(),
        }
    }
}
