// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! PIM-SM protocol timer and rate defaults.
//!
//! All durations are in seconds, which is also the aging tick unit.

/// Default interval between Hello messages on an interface.
pub const HELLO_PERIOD: u16 = 30;

/// Holdtime advertised in our Hello messages (3.5 * HELLO_PERIOD).
pub const HELLO_HOLDTIME: u16 = 105;

/// Wire sentinel for a neighbor holdtime that never expires.  Used on
/// links (e.g. ISDN) where periodic Hellos would hold the line up.
pub const HELLO_HOLDTIME_FOREVER: u16 = 0xffff;

/// Default interval between group-membership queries on an interface.
pub const QUERY_INTERVAL: u16 = 125;

/// Interval between periodic Join/Prune messages.
pub const JOIN_PRUNE_PERIOD: u16 = 60;

/// Holdtime carried in Join/Prune messages (3.5 * JOIN_PRUNE_PERIOD).
pub const JOIN_PRUNE_HOLDTIME: u16 = 210;

/// Lifetime granted to an (S,G) entry refreshed by active data.
pub const DATA_TIMEOUT: u16 = 210;

/// How long an assert result stays in force.
pub const ASSERT_TIMEOUT: u16 = 180;

/// How long a Register-Stop suppresses Register encapsulation.
pub const REGISTER_SUPPRESSION_TIMEOUT: u16 = 60;

/// How far before suppression expiry the Null-Register probe is sent.
pub const REGISTER_PROBE_TIME: u16 = 5;

/// Interval between Bootstrap messages originated by the active BSR.
pub const BOOTSTRAP_PERIOD: u16 = 60;

/// How long to wait for Bootstrap messages before giving up on the
/// current BSR.
pub const BOOTSTRAP_TIMEOUT: u16 = 150;

/// Interval between Cand-RP-Advertisement messages.
pub const CAND_RP_ADV_PERIOD: u16 = 60;

/// Holdtime sentinel for an RP-to-group mapping that never expires.
pub const CAND_RP_HOLDTIME_FOREVER: u16 = 0xffff;

/// Default hash mask length used to map groups onto the RP set.
pub const RP_DEFAULT_HASHMASKLEN: u8 = 30;

/// Default threshold rate for the last-hop-initiated switch to the
/// shortest-path tree, in bits/s.
pub const DEFAULT_DATA_RATE: u32 = 50000;

/// How often the data-rate check runs, in seconds.
pub const DEFAULT_DATA_RATE_INTERVAL: u16 = 20;

/// Default threshold rate for the RP-initiated switch to the
/// shortest-path tree, in bits/s.
pub const DEFAULT_REG_RATE: u32 = 50000;

/// How often the register-rate check runs, in seconds.
pub const DEFAULT_REG_RATE_INTERVAL: u16 = 20;

/// How often the unicast routing is re-checked for iif changes, in
/// seconds.
pub const UCAST_ROUTING_CHECK_INTERVAL: u16 = 20;

/// The rates above are in bits/s.  To include framing overhead the
/// approximation is 1 byte/s = 10 bits/s, so the byte threshold for one
/// check interval is `rate * interval / 10`.
pub fn rate_threshold_bytes(rate: u32, interval: u16) -> u64 {
    u64::from(rate) * u64::from(interval) / 10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_threshold() {
        assert_eq!(
            rate_threshold_bytes(DEFAULT_DATA_RATE, DEFAULT_DATA_RATE_INTERVAL),
            100000
        );
        assert_eq!(rate_threshold_bytes(0, 20), 0);
    }
}
