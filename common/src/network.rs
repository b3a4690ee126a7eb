// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! IPv4 multicast address helpers.

use std::net::Ipv4Addr;

use oxnet::Ipv4Net;

/// The unspecified address, used as the wildcard source in (S,G) keys and
/// kernel-cache rows.
pub const ANY_ADDR: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

/// Base of the class-D (multicast) address space.
pub const CLASSD_PREFIX: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 0);

/// Prefix length encoding "all multicast groups" in a (*,*,RP)
/// Join/Prune entry.
pub const STAR_STAR_RP_MASKLEN: u8 = 4;

/// Prefix length of a single group in a Join/Prune entry.
pub const SINGLE_GRP_MASKLEN: u8 = 32;

/// Prefix length of a single source in a Join/Prune entry.
pub const SINGLE_SRC_MASKLEN: u8 = 32;

/// The whole class-D space as a prefix.
pub fn classd_net() -> Ipv4Net {
    Ipv4Net::new_unchecked(CLASSD_PREFIX, STAR_STAR_RP_MASKLEN)
}

/// Convert a prefix length into a netmask.
pub fn masklen_to_mask(masklen: u8) -> Ipv4Addr {
    let bits = if masklen == 0 {
        0u32
    } else {
        u32::MAX << (32 - u32::from(masklen.min(32)))
    };
    Ipv4Addr::from(bits)
}

/// Is this a multicast group address?
pub fn is_group_addr(addr: Ipv4Addr) -> bool {
    addr.is_multicast()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_masklen_to_mask() {
        assert_eq!(masklen_to_mask(0), Ipv4Addr::new(0, 0, 0, 0));
        assert_eq!(masklen_to_mask(4), Ipv4Addr::new(240, 0, 0, 0));
        assert_eq!(masklen_to_mask(24), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(masklen_to_mask(32), Ipv4Addr::new(255, 255, 255, 255));
    }

    #[test]
    fn test_group_addr() {
        assert!(is_group_addr(Ipv4Addr::new(224, 0, 0, 13)));
        assert!(is_group_addr(Ipv4Addr::new(239, 255, 255, 255)));
        assert!(!is_group_addr(Ipv4Addr::new(10, 1, 2, 3)));
    }

    #[test]
    fn test_classd_net_contains_groups() {
        let net = classd_net();
        assert!(net.contains(Ipv4Addr::new(232, 1, 1, 1)));
        assert!(!net.contains(Ipv4Addr::new(192, 168, 1, 1)));
    }
}
