// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! Administrative shaper configuration and the Qbv bake transform.
//!
//! Qbv/Qav reconfiguration requests arrive from the traffic-control offload
//! layer as structured values, are validated synchronously, and (for Qbv)
//! are baked into a runtime timeline: one independent open/closed view per
//! traffic class, with consecutive slots of equal state merged. The baked
//! snapshot is replaced wholesale; readers see either the old or the new
//! timeline, never a partial mix.

use core::cell::Cell;

use crate::{Timestamp, MAX_QBV_SLOTS, TC_COUNT};

/// One slot of an administrative Qbv schedule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QbvSlot {
    /// Slot length. Cycles longer than one second are not supported, so a
    /// 32-bit nanosecond count suffices.
    pub duration_ns: u32,
    /// Which traffic classes may transmit during this slot.
    pub opened_prios: [bool; TC_COUNT],
}

impl QbvSlot {
    pub const fn closed() -> Self {
        QbvSlot {
            duration_ns: 0,
            opened_prios: [false; TC_COUNT],
        }
    }
}

/// Administrative Qbv schedule, as delivered by the offload layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QbvConfig {
    pub enabled: bool,
    /// Cycle origin, in translated nanoseconds.
    pub start: Timestamp,
    pub slots: [QbvSlot; MAX_QBV_SLOTS],
    pub slot_count: usize,
}

impl QbvConfig {
    pub const fn disabled() -> Self {
        QbvConfig {
            enabled: false,
            start: 0,
            slots: [QbvSlot::closed(); MAX_QBV_SLOTS],
            slot_count: 0,
        }
    }
}

/// Credit-based shaper parameters for one traffic class. Slopes are in
/// credits per nanosecond; `send_slope` is negative.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QavParams {
    pub enabled: bool,
    pub idle_slope: i32,
    pub send_slope: i32,
    pub hi_credit: i32,
    pub lo_credit: i32,
}

impl QavParams {
    pub const fn disabled() -> Self {
        QavParams {
            enabled: false,
            idle_slope: 0,
            send_slope: 0,
            hi_credit: 0,
            lo_credit: 0,
        }
    }
}

/// One run-length-merged slot of a baked per-class timeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BakedSlot {
    pub duration_ns: u64,
    pub opened: bool,
}

/// Baked open/closed timeline for a single traffic class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BakedPrio {
    pub slots: [BakedSlot; MAX_QBV_SLOTS],
    pub slot_count: usize,
}

/// Baked Qbv timeline for all traffic classes.
///
/// `cycle_ns == 0` is the degenerate always-open form produced from a
/// disabled or empty administrative schedule; the gate has no effect then.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BakedQbv {
    pub cycle_ns: u64,
    pub prios: [BakedPrio; TC_COUNT],
}

impl BakedQbv {
    pub const fn always_open() -> Self {
        BakedQbv {
            cycle_ns: 0,
            prios: [BakedPrio {
                slots: [BakedSlot {
                    duration_ns: 0,
                    opened: true,
                }; MAX_QBV_SLOTS],
                slot_count: 0,
            }; TC_COUNT],
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigError {
    TooManySlots,
    ZeroDurationSlot,
    /// No slot opens any traffic class; the schedule would gate everything
    /// forever.
    NoOpenSlot,
    InvalidClass,
    InvalidSlope,
    InvalidCreditBounds,
}

/// Bake an administrative schedule into per-class runtime timelines.
///
/// Pure function of the input, so baking twice from the same configuration
/// yields an identical timeline. The baked cycle equals the sum of the
/// active slots' durations at bake time.
pub fn bake(config: &QbvConfig) -> BakedQbv {
    if !config.enabled || config.slot_count == 0 {
        return BakedQbv::always_open();
    }

    let mut baked = BakedQbv::always_open();
    let active = &config.slots[..config.slot_count];

    baked.cycle_ns = active.iter().map(|s| s.duration_ns as u64).sum();

    for (prio, baked_prio) in baked.prios.iter_mut().enumerate() {
        baked_prio.slot_count = 0;
        for slot in active {
            let opened = slot.opened_prios[prio];
            let count = baked_prio.slot_count;
            if count > 0 && baked_prio.slots[count - 1].opened == opened {
                baked_prio.slots[count - 1].duration_ns += slot.duration_ns as u64;
            } else {
                baked_prio.slots[count] = BakedSlot {
                    duration_ns: slot.duration_ns as u64,
                    opened,
                };
                baked_prio.slot_count = count + 1;
            }
        }
    }

    baked
}

/// Validate Qav parameters for one class before they are handed to the
/// credit shaper.
pub fn validate_qav(class: usize, params: &QavParams) -> Result<(), ConfigError> {
    if class >= TC_COUNT {
        return Err(ConfigError::InvalidClass);
    }
    if !params.enabled {
        return Ok(());
    }
    if params.idle_slope <= 0 || params.send_slope >= 0 {
        return Err(ConfigError::InvalidSlope);
    }
    if params.lo_credit > 0 || params.hi_credit < 0 {
        return Err(ConfigError::InvalidCreditBounds);
    }
    Ok(())
}

/// Holds the administrative Qbv schedule and Qav parameters, and owns the
/// baked snapshot the gate scheduler reads.
pub struct ShaperConfig {
    qbv: Cell<QbvConfig>,
    baked: Cell<BakedQbv>,
    qav: [Cell<QavParams>; TC_COUNT],
}

impl ShaperConfig {
    pub fn new() -> Self {
        ShaperConfig {
            qbv: Cell::new(QbvConfig::disabled()),
            baked: Cell::new(BakedQbv::always_open()),
            qav: core::array::from_fn(|_| Cell::new(QavParams::disabled())),
        }
    }

    /// Validate and install a new Qbv schedule. The baked snapshot is
    /// swapped wholesale after validation; a rejected update leaves the
    /// previous schedule in place.
    pub fn set_qbv(&self, config: QbvConfig) -> Result<(), ConfigError> {
        if config.slot_count > MAX_QBV_SLOTS {
            return Err(ConfigError::TooManySlots);
        }
        if config.enabled {
            let active = &config.slots[..config.slot_count];
            if active.iter().any(|s| s.duration_ns == 0) {
                return Err(ConfigError::ZeroDurationSlot);
            }
            if config.slot_count > 0
                && !active.iter().any(|s| s.opened_prios.iter().any(|&o| o))
            {
                return Err(ConfigError::NoOpenSlot);
            }
        }

        log::debug!(
            "qbv update: enabled={} slots={} start={}",
            config.enabled,
            config.slot_count,
            config.start
        );
        self.qbv.set(config);
        self.baked.set(bake(&config));
        Ok(())
    }

    /// Validate and record Qav parameters for one class. The caller also
    /// forwards them to the credit shaper, which keeps the running state.
    pub fn set_qav(&self, class: usize, params: QavParams) -> Result<(), ConfigError> {
        validate_qav(class, &params)?;
        self.qav[class].set(params);
        Ok(())
    }

    pub fn qav(&self, class: usize) -> QavParams {
        self.qav[class].get()
    }

    /// Consistent snapshot of the baked timeline.
    pub fn baked(&self) -> BakedQbv {
        self.baked.get()
    }

    pub fn qbv_start(&self) -> Timestamp {
        self.qbv.get().start
    }

    pub fn qbv_enabled(&self) -> bool {
        self.qbv.get().enabled
    }
}
