// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/
//
// Copyright 2025 Oxide Computer Company

//! The countdown timer primitive driving all soft-state aging.
//!
//! Every protocol timer in the routing table is a `Countdown` advanced
//! once per aging tick.  A countdown distinguishes "not running" from
//! "running forever" from "running out", so a zero value always means
//! "expired" and never "disabled".

/// A per-tick countdown.  One tick is one second of protocol time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Countdown {
    /// Not running.  Never reports expiry.
    #[default]
    Disabled,
    /// Running, but never expires.  Used for the wire-sentinel holdtimes
    /// that mean "keep this state until explicitly removed".
    Forever,
    /// Running; expired once the value reaches zero.
    Armed(u32),
}

impl Countdown {
    /// Arm the countdown to expire after `interval` ticks.
    pub fn set(&mut self, interval: u32) {
        *self = Countdown::Armed(interval);
    }

    /// Stop the countdown.
    pub fn reset(&mut self) {
        *self = Countdown::Disabled;
    }

    /// Advance one tick.
    pub fn tick(&mut self) {
        if let Countdown::Armed(value) = self {
            *value = value.saturating_sub(1);
        }
    }

    /// Has an armed countdown run out?
    pub fn is_expired(&self) -> bool {
        matches!(self, Countdown::Armed(0))
    }

    /// Is the countdown running at all?
    pub fn is_set(&self) -> bool {
        !matches!(self, Countdown::Disabled)
    }

    /// Force an armed countdown to expire immediately.  Used to pull a
    /// Join/Prune send forward when an upstream decision flips.
    pub fn fire(&mut self) {
        if let Countdown::Armed(value) = self {
            *value = 0;
        }
    }

    /// Remaining ticks of an armed countdown.
    pub fn value(&self) -> Option<u32> {
        match self {
            Countdown::Armed(value) => Some(*value),
            _ => None,
        }
    }

    /// Advance one tick, then report whether the countdown has run out.
    /// Callers that act on expiry must re-arm (or reset) the countdown,
    /// or it will keep reporting expiry on every subsequent tick.
    pub fn tick_expired(&mut self) -> bool {
        self.tick();
        self.is_expired()
    }
}

#[cfg(test)]
mod tests {
    use super::Countdown;

    // An interval-N countdown expires after exactly N ticks, not before.
    #[test]
    fn test_expires_exactly() {
        let mut timer = Countdown::Disabled;
        timer.set(3);
        for remaining in [2, 1] {
            timer.tick();
            assert!(!timer.is_expired());
            assert_eq!(timer.value(), Some(remaining));
        }
        timer.tick();
        assert!(timer.is_expired());
        // Expiry is sticky until the countdown is re-armed.
        timer.tick();
        assert!(timer.is_expired());
        timer.set(3);
        assert!(!timer.is_expired());
    }

    #[test]
    fn test_reset_never_expires() {
        let mut timer = Countdown::Armed(2);
        timer.reset();
        for _ in 0..100 {
            timer.tick();
            assert!(!timer.is_expired());
        }
    }

    #[test]
    fn test_forever_never_expires() {
        let mut timer = Countdown::Forever;
        for _ in 0..10000 {
            timer.tick();
            assert!(!timer.is_expired());
        }
        assert!(timer.is_set());
    }

    #[test]
    fn test_fire() {
        let mut timer = Countdown::Armed(100);
        timer.fire();
        assert!(timer.is_expired());

        // Firing a timer that isn't running does nothing.
        let mut disabled = Countdown::Disabled;
        disabled.fire();
        assert!(!disabled.is_expired());
        let mut forever = Countdown::Forever;
        forever.fire();
        assert!(!forever.is_expired());
    }

    #[test]
    fn test_tick_expired() {
        let mut timer = Countdown::Armed(2);
        assert!(!timer.tick_expired());
        assert!(timer.tick_expired());
        assert!(timer.tick_expired());
        timer.set(1);
        assert!(timer.tick_expired());
    }

    #[test]
    fn test_zero_interval() {
        let mut timer = Countdown::Disabled;
        timer.set(0);
        assert!(timer.is_expired());
    }
}
