// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! Device clock abstraction.
//!
//! The adapter carries a free-running 64-bit tick counter which is the
//! source of truth for every timing decision in this crate. Ticks translate
//! to wall-clock-style nanoseconds through a scale and offset owned by the
//! external PTP layer; this module only stores them.

use core::cell::Cell;

use crate::registers::TsnRegisters;
use crate::{Sysclock, Timestamp};

/// Nanoseconds per tick at the reserved 125 MHz clock.
pub const TICKS_SCALE: f64 = 8.0;

/// Ticks-per-second fallback when CYCLE_1S has not been programmed.
pub const RESERVED_CYCLE: u32 = 125_000_000;

/// Fixed MAC + PHY egress latency folded into TX timestamps.
pub const TX_ADJUST_NS: u64 = 100 + 200;

pub struct DeviceClock {
    regs: &'static TsnRegisters,
    ticks_scale: Cell<f64>,
    offset_ns: Cell<u64>,
}

impl DeviceClock {
    pub fn new(regs: &'static TsnRegisters) -> Self {
        DeviceClock {
            regs,
            ticks_scale: Cell::new(TICKS_SCALE),
            offset_ns: Cell::new(0),
        }
    }

    /// Current device clock in ticks. Subject to the HI/LO torn-read
    /// window documented on [`TsnRegisters`].
    pub fn now(&self) -> Sysclock {
        self.regs.sys_clock()
    }

    /// Program the next periodic pulse time, in ticks.
    pub fn set_pulse_at(&self, time: Sysclock) {
        self.regs.set_next_pulse(time);
    }

    /// Ticks per second of the device clock. Never 0: an unprogrammed
    /// register reads as the reserved 125 MHz cycle so that divisions by
    /// this value cannot fault.
    pub fn cycle_ticks_per_second(&self) -> u32 {
        let raw = self.regs.cycle_1s();
        if raw == 0 {
            RESERVED_CYCLE
        } else {
            raw
        }
    }

    /// Configuration path only.
    pub fn set_cycle_ticks_per_second(&self, ticks: u32) {
        self.regs.set_cycle_1s(ticks);
    }

    /// Install the tick-to-nanosecond translation. The PTP layer computes
    /// and owns both values; they are opaque state here.
    pub fn set_translation(&self, ticks_scale: f64, offset_ns: u64) {
        self.ticks_scale.set(ticks_scale);
        self.offset_ns.set(offset_ns);
    }

    /// `timestamp = ticks * scale + offset`
    pub fn sysclock_to_timestamp(&self, ticks: Sysclock) -> Timestamp {
        (ticks as f64 * self.ticks_scale.get()) as u64 + self.offset_ns.get()
    }

    /// TX-timestamp variant: adds the fixed egress latency between the
    /// capture point and the wire.
    pub fn sysclock_to_tx_timestamp(&self, ticks: Sysclock) -> Timestamp {
        self.sysclock_to_timestamp(ticks) + TX_ADJUST_NS
    }

    /// Inverse translation, used to stamp tick-domain frame metadata.
    /// Times before the offset saturate to tick 0.
    pub fn timestamp_to_sysclock(&self, ns: Timestamp) -> Sysclock {
        let rel = ns.saturating_sub(self.offset_ns.get());
        (rel as f64 / self.ticks_scale.get()) as u64
    }
}
