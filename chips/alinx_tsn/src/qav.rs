// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! Credit-based shaper (IEEE 802.1Qav).
//!
//! Each traffic class carries a signed credit balance bounded to
//! `[lo_credit, hi_credit]`. Credit accrues at `idle_slope` while the class
//! is idle and is spent at `send_slope` for the wire time of each released
//! frame; a class may release only once its credit is back at or above
//! zero. The shaper is evaluated at discrete transmit points, so the send
//! phase of a frame is charged eagerly on release and `available_at`
//! projects the recovery back to zero credit.
//!
//! Each class is an independent state cell; only the transmit path for that
//! class mutates it.

use core::cell::Cell;

use crate::config::QavParams;
use crate::{Timestamp, TC_COUNT};

/// Preamble (8) + FCS (4) + interpacket gap (12): bytes occupying the wire
/// around every frame.
pub const ETHERNET_GAP_SIZE: u32 = 8 + 4 + 12;

/// Wire time of a frame at the 125 MHz clock (1 Gbit/s, 8 ns per byte).
fn wire_duration_ns(frame_bytes: u32) -> u64 {
    (frame_bytes + ETHERNET_GAP_SIZE) as u64 * 8
}

#[derive(Clone, Copy)]
struct QavState {
    params: QavParams,
    credit: i32,
    last_update: Timestamp,
    available_at: Timestamp,
}

impl QavState {
    const fn disabled() -> Self {
        QavState {
            params: QavParams::disabled(),
            credit: 0,
            last_update: 0,
            available_at: 0,
        }
    }

    fn clamp_credit(&self, credit: i64) -> i32 {
        credit.clamp(
            self.params.lo_credit as i64,
            self.params.hi_credit as i64,
        ) as i32
    }

    /// Idle accrual since the last evaluation. Send-phase spending is
    /// applied eagerly in `on_transmit`, so all elapsed time here is idle.
    fn accrue(&mut self, now: Timestamp) {
        if now <= self.last_update {
            return;
        }
        let elapsed = (now - self.last_update) as i64;
        let credit = self.credit as i64 + self.params.idle_slope as i64 * elapsed;
        self.credit = self.clamp_credit(credit);
        self.last_update = now;
    }
}

pub struct CreditShaper {
    states: [Cell<QavState>; TC_COUNT],
}

impl CreditShaper {
    pub fn new() -> Self {
        CreditShaper {
            states: core::array::from_fn(|_| Cell::new(QavState::disabled())),
        }
    }

    /// Install validated parameters for one class, resetting its running
    /// credit state. Configuration path only.
    pub fn configure(&self, class: usize, params: QavParams, now: Timestamp) {
        self.states[class].set(QavState {
            params,
            credit: 0,
            last_update: now,
            available_at: now,
        });
    }

    /// Earliest time the class may release a frame. A disabled class never
    /// delays; an enabled class is held until its projected recovery time.
    pub fn available_at(&self, class: usize, now: Timestamp) -> Timestamp {
        let mut state = self.states[class].get();
        if !state.params.enabled {
            return now;
        }
        state.accrue(now);
        self.states[class].set(state);
        state.available_at.max(now)
    }

    /// Charge one released frame to the class at time `at`. Credit is spent
    /// at `send_slope` for the frame's wire time, clamped, and
    /// `available_at` advances to when the credit is projected back to
    /// zero at `idle_slope`. Monotone: `available_at` never moves backward
    /// while frames are queued.
    pub fn on_transmit(&self, class: usize, at: Timestamp, frame_bytes: u32) {
        let mut state = self.states[class].get();
        if !state.params.enabled {
            state.last_update = at;
            state.available_at = at;
            self.states[class].set(state);
            return;
        }

        state.accrue(at);

        let wire_ns = wire_duration_ns(frame_bytes);
        let spent = state.params.send_slope as i64 * wire_ns as i64;
        state.credit = state.clamp_credit(state.credit as i64 + spent);

        let recovery_ns = if state.credit < 0 {
            let deficit = -(state.credit as i64) as u64;
            let slope = state.params.idle_slope as u64;
            deficit.div_ceil(slope)
        } else {
            0
        };

        state.last_update = at + wire_ns;
        state.available_at = state.available_at.max(at + wire_ns + recovery_ns);
        self.states[class].set(state);
    }

    #[cfg(test)]
    fn credit(&self, class: usize) -> i32 {
        self.states[class].get().credit
    }
}
