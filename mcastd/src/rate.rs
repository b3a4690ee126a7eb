// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! Traffic-rate monitoring over the kernel forwarding cache.
//!
//! Each routing entry tracks the byte counters of its (source, group)
//! cache rows.  When the rate check runs, a row whose counter can't be
//! read or didn't move is idle and is evicted; a row that moved more
//! than a threshold within the check interval can trigger the one-way
//! switch from the RP-rooted shared tree to a source-rooted
//! shortest-path tree, either on a last-hop router (data-rate threshold)
//! or on the RP itself (register-rate threshold, to cut off Register
//! encapsulation).

use slog::{debug, Logger};

use crate::mrt::{MrtEntry, MrtKind};
use crate::plane::McastPlane;
use crate::vif::VifIndex;
use common::network::ANY_ADDR;
use common::pim;

/// Run the rate check over one entry's kernel-cache rows.
pub fn age_kernel_cache<P: McastPlane>(
    log: &Logger,
    entry: &mut MrtEntry,
    register_vif: Option<VifIndex>,
    data_rate_bytes: u64,
    reg_rate_bytes: u64,
    plane: &mut P,
) {
    let mut idx = 0;
    while idx < entry.kernel_cache.len() {
        let (source, group, old) = {
            let row = &entry.kernel_cache[idx];
            (row.source, row.group, row.bytes)
        };

        // A row that can't be read or didn't move since the last check
        // is idle; evict it.
        let new = match plane.sg_byte_count(source, group) {
            Ok(count) if count != old => count,
            _ => {
                debug!(log, "evicting idle kernel cache row";
                    "source" => %source, "group" => %group);
                plane.delete_mfc(source, group);
                entry.kernel_cache.remove(idx);
                continue;
            }
        };
        entry.kernel_cache[idx].bytes = new;

        // Last-hop initiated switch.
        let mut did_switch = false;
        if old + data_rate_bytes < new {
            match &entry.kind {
                MrtKind::SourceGroup { rp_bit: false, .. } => {
                    // Already on the shortest path; active traffic just
                    // refreshes the entry lifetime.
                    entry.lifetime.set(u32::from(pim::DATA_TIMEOUT));
                    idx += 1;
                    continue;
                }
                MrtKind::SourceGroup { .. } => {
                    if entry.is_last_hop() {
                        plane.switch_shortest_path(source, group);
                        did_switch = true;
                    }
                }
                _ => {
                    if entry.is_last_hop() {
                        if source == ANY_ADDR {
                            // A wildcard aggregate row can't be switched
                            // directly; the plane re-learns per-source
                            // rows instead.
                            plane.delete_mfc(source, group);
                            entry.kernel_cache.remove(idx);
                            entry.kind.set_clone_sg();
                            continue;
                        }
                        debug!(log, "data rate above threshold, \
                            switching to shortest path";
                            "source" => %source, "group" => %group);
                        plane.switch_shortest_path(source, group);
                        did_switch = true;
                    }
                }
            }
        }

        // RP initiated switch.
        if !did_switch && old + reg_rate_bytes < new {
            match &entry.kind {
                MrtKind::SourceGroup { rp_bit: false, .. } => {
                    entry.lifetime.set(u32::from(pim::DATA_TIMEOUT));
                    idx += 1;
                    continue;
                }
                MrtKind::SourceGroup { .. } => {
                    if register_vif.is_some()
                        && entry.incoming == register_vif
                    {
                        plane.switch_shortest_path(source, group);
                    }
                }
                _ => {
                    if register_vif.is_some()
                        && entry.incoming == register_vif
                    {
                        if source == ANY_ADDR {
                            plane.delete_mfc(source, group);
                            entry.kernel_cache.remove(idx);
                            entry.kind.set_clone_sg();
                            continue;
                        }
                        debug!(log, "register rate above threshold, \
                            switching to shortest path";
                            "source" => %source, "group" => %group);
                        plane.switch_shortest_path(source, group);
                    }
                }
            }
        }

        idx += 1;
    }
}
