// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! Time-aware gate scheduling over a baked Qbv timeline.
//!
//! Given the current position within the gating cycle, find the transmit
//! window for a traffic class: the earliest permissible release time, the
//! end of that open run (`to`), and the end of the following open run
//! (`delay_to`, used by the RETRY fail policy). The scheduler only reads a
//! baked snapshot; it never mutates shaper state.

use crate::config::BakedQbv;
use crate::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GateError {
    /// The gate for this class is closed in every slot of every cycle.
    /// This is a configuration error, reported rather than retried.
    NeverOpens,
}

/// Transmit window for one frame. `None` deadlines mean the gate is always
/// open for the class and releasing can never be late.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxWindow {
    pub from: Timestamp,
    pub to: Option<Timestamp>,
    pub delay_to: Option<Timestamp>,
}

/// Compute the next transmit window for `class` at or after `earliest`.
///
/// `earliest` already folds in the credit shaper's availability time:
/// callers pass `max(now, qav_available_at)`. Times before the schedule
/// `start` position at phase 0 of the first cycle.
pub fn next_window(
    baked: &BakedQbv,
    start: Timestamp,
    class: usize,
    earliest: Timestamp,
) -> Result<TxWindow, GateError> {
    debug_assert!(class < crate::TC_COUNT);
    let prio = &baked.prios[class];

    let always_open = TxWindow {
        from: earliest,
        to: None,
        delay_to: None,
    };

    // Degenerate timeline: disabled or empty schedule gates nothing.
    if baked.cycle_ns == 0 || prio.slot_count == 0 {
        return Ok(always_open);
    }
    // Baking merged the whole cycle into one slot: the class is either
    // unconditionally open or never open.
    if prio.slot_count == 1 {
        return if prio.slots[0].opened {
            Ok(always_open)
        } else {
            Err(GateError::NeverOpens)
        };
    }

    let cycle = baked.cycle_ns;
    let (cycle_base, phase) = if earliest <= start {
        (start, 0)
    } else {
        let phase = (earliest - start) % cycle;
        (earliest - phase, phase)
    };
    let pos = cycle_base + phase;

    // Walk open runs in time order: the first run still ahead of (or
    // covering) `pos` gives from/to, the one after gives delay_to. With at
    // least one open and one closed slot per cycle, two cycles always
    // contain both; the third covers a position inside the last run.
    let mut window: Option<TxWindow> = None;
    for k in 0..3u64 {
        let mut offset = 0;
        for slot in &prio.slots[..prio.slot_count] {
            let run_start = cycle_base + k * cycle + offset;
            let run_end = run_start + slot.duration_ns;
            offset += slot.duration_ns;

            if !slot.opened || run_end <= pos {
                continue;
            }
            match window {
                None => {
                    window = Some(TxWindow {
                        from: run_start.max(pos),
                        to: Some(run_end),
                        delay_to: None,
                    });
                }
                Some(ref mut w) => {
                    w.delay_to = Some(run_end);
                    return Ok(*w);
                }
            }
        }
    }

    // Unreachable with a well-formed baked timeline; treat a malformed one
    // as a closed gate.
    window.ok_or(GateError::NeverOpens)
}
