// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Bootstrap-Router and Candidate-RP-set aging.
//!
//! Ages the holdtimes of the learned RP-to-group-range mappings, drives
//! our own Candidate-RP-Advertisement timer, and runs the Bootstrap
//! timer state machine: keep listening for somebody else's Bootstrap
//! messages, claim the BSR role after a randomized delay, or keep
//! re-announcing ourselves as the active BSR.

use std::net::Ipv4Addr;

use rand::Rng;
use slog::info;
use strum::Display;

use crate::config::Config;
use crate::plane::{McastPlane, PimSender};
use crate::timers::Countdown;
use crate::Router;
use common::network::ANY_ADDR;
use common::pim;

/// Where this router stands in the Bootstrap protocol.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum BsrRole {
    /// Not a Candidate-BSR; accept Bootstrap messages from anyone.
    Listening,
    /// A Candidate-BSR waiting out the initial delay before claiming
    /// the role.
    Becoming,
    /// The active BSR, re-announcing each period.
    Active,
}

/// Bootstrap protocol state: who we believe the BSR is, what we would
/// advertise as one, and the two timers driving §4.6.
pub struct BsrState {
    /// Set when this router is configured as a Candidate-BSR.
    pub my_address: Option<Ipv4Addr>,
    pub my_priority: u8,
    pub my_hash_masklen: u8,
    pub curr_address: Ipv4Addr,
    pub curr_priority: u8,
    pub curr_hash_masklen: u8,
    pub curr_fragment_tag: u16,
    pub bootstrap_timer: Countdown,
    pub cand_rp_adv_timer: Countdown,
}

impl BsrState {
    pub fn new(config: &Config) -> BsrState {
        let cand_rp_adv_timer = match &config.cand_rp {
            Some(cand_rp) => {
                Countdown::Armed(u32::from(cand_rp.adv_period))
            }
            None => Countdown::Disabled,
        };
        let (my_address, my_priority, my_hash_masklen) =
            match &config.cand_bsr {
                Some(bsr) => {
                    (Some(bsr.address), bsr.priority, bsr.hash_masklen)
                }
                None => (None, 0, pim::RP_DEFAULT_HASHMASKLEN),
            };
        BsrState {
            my_address,
            my_priority,
            my_hash_masklen,
            curr_address: ANY_ADDR,
            curr_priority: 0,
            curr_hash_masklen: pim::RP_DEFAULT_HASHMASKLEN,
            curr_fragment_tag: 0,
            bootstrap_timer: Countdown::Armed(u32::from(
                pim::BOOTSTRAP_TIMEOUT,
            )),
            cand_rp_adv_timer,
        }
    }

    pub fn role(&self) -> BsrRole {
        match self.my_address {
            None => BsrRole::Listening,
            Some(addr) if addr == self.curr_address => BsrRole::Active,
            Some(_) => BsrRole::Becoming,
        }
    }
}

/// The delay before a Candidate-BSR claims the role, weighted so that
/// better candidates claim sooner, with a little jitter to break ties
/// between equals.
fn bootstrap_initial_delay(bsr: &BsrState) -> u32 {
    let best = bsr.curr_priority.max(bsr.my_priority);
    let spread = u32::from(best - bsr.my_priority);
    let log2 = 32 - (1 + spread).leading_zeros();
    5 + 2 * log2 + rand::thread_rng().gen_range(0..3)
}

/// Age the Candidate-RP set and drive the Bootstrap state machine.
pub fn age_misc<P: McastPlane, S: PimSender>(
    r: &mut Router,
    plane: &mut P,
    sender: &mut S,
) {
    // Time out learned RP-to-group-range mappings.  Mappings carrying
    // the forever sentinel were armed as such and never expire here.
    for key in r.rp_set.mapping_keys() {
        let expired = match r.rp_set.get_mapping_mut(&key) {
            Some(mapping) => mapping.holdtime.tick_expired(),
            None => false,
        };
        if !expired {
            continue;
        }
        if let Some(mapping) = r.rp_set.delete_mapping(&key) {
            info!(r.log, "rp mapping expired";
                "rp" => %key.rp,
                "prefix" => %key.prefix(),
                "priority" => mapping.priority);
        }

        // Unmap the covered groups; re-mapping them onto another RP is
        // the bootstrap message path's job.
        let prefix = key.prefix();
        for node in r.mrt.groups.values_mut() {
            if node.rp == Some(key.rp) && prefix.contains(node.group) {
                node.rp = None;
            }
        }

        // An RP with no mappings left has nothing to route.
        if r.rp_set.mappings_for_rp(key.rp) == 0 {
            if let Some(rp) = r.rp_set.remove_rp(key.rp) {
                if let Some(id) = rp.mrtlink {
                    r.mrt.delete_entry(id, plane);
                }
            }
        }
    }

    // Our own Candidate-RP advertisements.
    if r.config.cand_rp.is_some() {
        if r.bsr.cand_rp_adv_timer.tick_expired() {
            sender.send_cand_rp_adv();
            let period = r
                .config
                .cand_rp
                .as_ref()
                .map(|c| u32::from(c.adv_period))
                .unwrap_or(u32::from(pim::CAND_RP_ADV_PERIOD));
            r.bsr.cand_rp_adv_timer.set(period);
        }
    }

    // The Bootstrap timer state machine.
    if r.bsr.bootstrap_timer.tick_expired() {
        match r.bsr.role() {
            BsrRole::Listening => {
                // The BSR went quiet.  Drop back to accepting a Bootstrap
                // from anyone; the learned Cand-RP set is kept.
                r.bsr.curr_fragment_tag = 0;
                r.bsr.curr_priority = 0;
                r.bsr.curr_address = ANY_ADDR;
                r.bsr.curr_hash_masklen = pim::RP_DEFAULT_HASHMASKLEN;
                r.bsr
                    .bootstrap_timer
                    .set(u32::from(pim::BOOTSTRAP_TIMEOUT));
            }
            BsrRole::Active => {
                r.bsr
                    .bootstrap_timer
                    .set(u32::from(pim::BOOTSTRAP_PERIOD));
                sender.send_bootstrap();
            }
            BsrRole::Becoming => {
                // Claim the role provisionally after a short delay, to
                // keep the transient control overhead down.  There is no
                // confirmation step; a better candidate's Bootstrap
                // message simply overwrites these values.
                let delay = bootstrap_initial_delay(&r.bsr);
                r.bsr.bootstrap_timer.set(delay);
                r.bsr.curr_fragment_tag = rand::thread_rng().gen();
                r.bsr.curr_priority = r.bsr.my_priority;
                r.bsr.curr_hash_masklen = r.bsr.my_hash_masklen;
                if let Some(addr) = r.bsr.my_address {
                    r.bsr.curr_address = addr;
                }
                info!(r.log, "claiming bsr role";
                    "address" => %r.bsr.curr_address,
                    "hash_masklen" => r.bsr.curr_hash_masklen,
                    "delay" => delay);
            }
        }
    }

    r.rp_set.dump(&r.log);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CandBsrConfig, CandRpConfig};
    use crate::plane::{MockMcastPlane, MockPimSender};
    use crate::rp::RpGrpKey;

    fn test_router(config: Config) -> Router {
        let log = slog::Logger::root(slog::Discard, slog::o!());
        Router::new(log, config)
    }

    fn rp_addr() -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, 100)
    }

    fn mapping_key() -> RpGrpKey {
        RpGrpKey {
            rp: rp_addr(),
            group_base: Ipv4Addr::new(224, 0, 0, 0),
            masklen: 4,
        }
    }

    // One advertisement per expiry, re-armed to the full period.
    #[test]
    fn test_cand_rp_adv_fires_once() {
        let mut config = Config::default();
        config.cand_rp = Some(CandRpConfig {
            address: Ipv4Addr::new(10, 0, 0, 1),
            adv_period: pim::CAND_RP_ADV_PERIOD,
        });
        let mut r = test_router(config);
        r.bsr.cand_rp_adv_timer = Countdown::Armed(1);

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender.expect_send_cand_rp_adv().times(1).return_const(());

        for _ in 0..10 {
            age_misc(&mut r, &mut plane, &mut sender);
        }
        assert_eq!(
            r.bsr.cand_rp_adv_timer,
            Countdown::Armed(u32::from(pim::CAND_RP_ADV_PERIOD) - 9)
        );
    }

    #[test]
    fn test_mapping_expiry_cascades() {
        let mut r = test_router(Config::default());
        r.rp_set.add_mapping(mapping_key(), 0, 1);
        let id = r.mrt.create_wc_rp(rp_addr());
        r.rp_set.get_mut(rp_addr()).unwrap().mrtlink = Some(id);
        r.mrt.create_wc_group(
            Ipv4Addr::new(224, 1, 1, 1),
            Some(rp_addr()),
        );

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender.expect_send_bootstrap().return_const(());

        age_misc(&mut r, &mut plane, &mut sender);

        assert!(r.rp_set.get(rp_addr()).is_none());
        assert!(r.mrt.get(id).is_none());
        let node = r
            .mrt
            .groups
            .get(&Ipv4Addr::new(224, 1, 1, 1))
            .unwrap();
        assert_eq!(node.rp, None);
    }

    #[test]
    fn test_forever_mapping_survives() {
        let mut r = test_router(Config::default());
        r.rp_set.add_mapping(
            mapping_key(),
            0,
            pim::CAND_RP_HOLDTIME_FOREVER,
        );

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();

        for _ in 0..1000 {
            age_misc(&mut r, &mut plane, &mut sender);
        }
        assert_eq!(r.rp_set.mappings_for_rp(rp_addr()), 1);
    }

    // A non-candidate falls back to listening-for-anyone when the BSR
    // goes quiet.
    #[test]
    fn test_bsr_timeout_resets_to_listening() {
        let mut r = test_router(Config::default());
        r.bsr.curr_address = Ipv4Addr::new(10, 0, 0, 50);
        r.bsr.curr_priority = 42;
        r.bsr.curr_fragment_tag = 7;
        r.bsr.bootstrap_timer = Countdown::Armed(1);

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        age_misc(&mut r, &mut plane, &mut sender);

        assert_eq!(r.bsr.role(), BsrRole::Listening);
        assert_eq!(r.bsr.curr_address, ANY_ADDR);
        assert_eq!(r.bsr.curr_priority, 0);
        assert_eq!(r.bsr.curr_fragment_tag, 0);
        assert_eq!(
            r.bsr.bootstrap_timer,
            Countdown::Armed(u32::from(pim::BOOTSTRAP_TIMEOUT))
        );
    }

    // A candidate claims the role provisionally, then starts announcing
    // on the full period once active.
    #[test]
    fn test_bsr_claim_then_announce() {
        let my_addr = Ipv4Addr::new(10, 0, 0, 1);
        let mut config = Config::default();
        config.cand_bsr = Some(CandBsrConfig {
            address: my_addr,
            priority: 10,
            hash_masklen: pim::RP_DEFAULT_HASHMASKLEN,
        });
        let mut r = test_router(config);
        assert_eq!(r.bsr.role(), BsrRole::Becoming);
        r.bsr.bootstrap_timer = Countdown::Armed(1);

        let mut plane = MockMcastPlane::new();
        let mut sender = MockPimSender::new();
        sender.expect_send_bootstrap().times(1).return_const(());

        age_misc(&mut r, &mut plane, &mut sender);
        assert_eq!(r.bsr.role(), BsrRole::Active);
        assert_eq!(r.bsr.curr_priority, 10);
        assert!(r.bsr.bootstrap_timer.value().unwrap() > 0);

        // Claiming alone sends nothing; the first announcement goes out
        // on the next expiry as the active BSR.
        r.bsr.bootstrap_timer = Countdown::Armed(1);
        age_misc(&mut r, &mut plane, &mut sender);
        assert_eq!(
            r.bsr.bootstrap_timer,
            Countdown::Armed(u32::from(pim::BOOTSTRAP_PERIOD))
        );
    }
}
