// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! TX timestamp capture and correlation.
//!
//! The adapter has four physical TX-timestamp registers. Each is a scarce
//! single-flight resource: one in-flight frame locks a slot, a deferred
//! poll watches the slot's register for a new capture value, and the
//! resolved timestamp is delivered back to the frame's owner. Timestamping
//! is best-effort throughout; no path here may block or fail a frame send.
//!
//! Frame metadata carries its transmit window as 29-bit device-clock ticks.
//! Deadlines are rebuilt into full 64-bit tick values at lock time by
//! borrowing the current clock's upper bits, with a small margin guarding
//! against false wraparound detection from clock-read/compute skew.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::adapter::{FailPolicy, TxFrameMetadata};
use crate::clock::DeviceClock;
use crate::registers::TsnRegisters;
use crate::{Sysclock, TX_TIMESTAMP_SLOTS};

/// Window ticks in frame metadata are expressed in the low 29 bits of the
/// device clock.
pub const LOWER_29_BITS: u64 = (1 << 29) - 1;

/// Default slack before a numerically-smaller tick counts as wrapped.
/// Empirically chosen; configurable, not a law of the domain.
pub const DEFAULT_WRAP_MARGIN: u64 = 100;

/// Polls tolerated without the capture register changing once the window
/// has passed, before the slot is given up.
pub const TX_TIMESTAMP_MAX_RETRY: u8 = 5;

/// Receives resolved (or abandoned) TX timestamps for frames previously
/// locked to a slot. The `transmission_identifier` is the opaque value the
/// transmit path supplied, as in the Ethernet datapath HIL.
pub trait TxTimestampClient {
    /// The frame's hardware timestamp, translated to nanoseconds.
    fn tx_timestamp(&self, transmission_identifier: usize, timestamp_ns: u64);

    /// The capture was abandoned; no timestamp will be delivered and the
    /// frame may be released.
    fn tx_timestamp_dropped(&self, transmission_identifier: usize);
}

/// Deferred-execution collaborator: queues a later `poll` for a slot. The
/// only ordering contract is that the slot is eventually polled again.
pub trait PollScheduler {
    fn schedule_poll(&self, slot: u8);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampError {
    /// The requested slot already tracks an in-flight frame.
    SlotBusy,
    /// All four slots are busy.
    Exhausted,
    InvalidSlot,
}

struct SlotState {
    /// Single-flight lock bit. Transmit-path acquisition is a non-blocking
    /// test-and-set that fails fast.
    busy: AtomicBool,
    frame: Cell<Option<usize>>,
    start_after: Cell<Sysclock>,
    wait_until: Cell<Sysclock>,
    retries: Cell<u8>,
    last_value: Cell<u64>,
}

impl SlotState {
    fn new() -> Self {
        SlotState {
            busy: AtomicBool::new(false),
            frame: Cell::new(None),
            start_after: Cell::new(0),
            wait_until: Cell::new(0),
            retries: Cell::new(0),
            last_value: Cell::new(0),
        }
    }

    fn unlock(&self) {
        self.frame.set(None);
        self.busy.store(false, Ordering::Release);
    }
}

/// Rebuild a full tick value from a 29-bit metadata tick and the current
/// clock. A tick numerically behind the clock's low bits by more than
/// `margin` lands in the next wrap period; within the margin the
/// difference is read/compute skew, not a wrap.
fn absolute_tick(sys_count: Sysclock, tick: u64, margin: u64) -> Sysclock {
    let lower = sys_count & LOWER_29_BITS;
    let upper = sys_count & !LOWER_29_BITS;
    let mut absolute = upper | tick;
    if lower > tick && lower - tick > margin {
        absolute += 1 << 29;
    }
    absolute
}

pub struct TimestampCorrelator<'a> {
    regs: &'static TsnRegisters,
    client: Cell<Option<&'a dyn TxTimestampClient>>,
    scheduler: Cell<Option<&'a dyn PollScheduler>>,
    slots: [SlotState; TX_TIMESTAMP_SLOTS],
    /// Round-robin cursor for `lock_any`.
    next_slot: Cell<usize>,
    wrap_margin: Cell<u64>,
}

impl<'a> TimestampCorrelator<'a> {
    pub fn new(regs: &'static TsnRegisters) -> Self {
        TimestampCorrelator {
            regs,
            client: Cell::new(None),
            scheduler: Cell::new(None),
            slots: core::array::from_fn(|_| SlotState::new()),
            next_slot: Cell::new(0),
            wrap_margin: Cell::new(DEFAULT_WRAP_MARGIN),
        }
    }

    pub fn set_client(&self, client: &'a dyn TxTimestampClient) {
        self.client.set(Some(client));
    }

    pub fn set_scheduler(&self, scheduler: &'a dyn PollScheduler) {
        self.scheduler.set(Some(scheduler));
    }

    pub fn set_wrap_margin(&self, margin: u64) {
        self.wrap_margin.set(margin);
    }

    fn index(slot: u8) -> Result<usize, TimestampError> {
        match slot {
            1..=4 => Ok(slot as usize - 1),
            _ => Err(TimestampError::InvalidSlot),
        }
    }

    fn arm(
        &self,
        index: usize,
        transmission_identifier: usize,
        meta: &TxFrameMetadata,
        sys_count: Sysclock,
    ) {
        let state = &self.slots[index];
        let margin = self.wrap_margin.get();

        state.frame.set(Some(transmission_identifier));
        state.retries.set(0);
        state
            .start_after
            .set(absolute_tick(sys_count, meta.from_tick as u64, margin));
        let deadline_tick = match meta.fail_policy {
            FailPolicy::Retry => meta.delay_to_tick,
            FailPolicy::Drop => meta.to_tick,
        };
        state
            .wait_until
            .set(absolute_tick(sys_count, deadline_tick as u64, margin));

        if let Some(scheduler) = self.scheduler.get() {
            scheduler.schedule_poll(index as u8 + 1);
        }
    }

    /// Lock a specific slot to a frame. Non-blocking: a busy slot rejects
    /// the request immediately and the frame transmits without a
    /// timestamp.
    pub fn try_lock(
        &self,
        slot: u8,
        transmission_identifier: usize,
        meta: &TxFrameMetadata,
        sys_count: Sysclock,
    ) -> Result<(), TimestampError> {
        let index = Self::index(slot)?;
        if self.slots[index]
            .busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!(
                "timestamp skipped: slot {} still waiting on a previous packet",
                slot
            );
            return Err(TimestampError::SlotBusy);
        }
        self.arm(index, transmission_identifier, meta, sys_count);
        Ok(())
    }

    /// Lock any free slot, scanning round-robin from the last allocation.
    /// Returns the locked slot id, or `Exhausted` when all four are busy.
    pub fn lock_any(
        &self,
        transmission_identifier: usize,
        meta: &TxFrameMetadata,
        sys_count: Sysclock,
    ) -> Result<u8, TimestampError> {
        let cursor = self.next_slot.get();
        for n in 0..TX_TIMESTAMP_SLOTS {
            let index = (cursor + n) % TX_TIMESTAMP_SLOTS;
            if self.slots[index]
                .busy
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                self.next_slot.set((index + 1) % TX_TIMESTAMP_SLOTS);
                self.arm(index, transmission_identifier, meta, sys_count);
                return Ok(index as u8 + 1);
            }
        }
        log::warn!("timestamp skipped: all capture slots busy");
        Err(TimestampError::Exhausted)
    }

    fn reschedule(&self, slot: u8) {
        if let Some(scheduler) = self.scheduler.get() {
            scheduler.schedule_poll(slot);
        }
    }

    /// One poll step for a slot, invoked from deferred work. Reads the
    /// capture register and either resolves the pending frame, gives up
    /// after the retry budget, or asks to be polled again.
    pub fn poll(&self, clock: &DeviceClock, slot: u8) {
        let index = match Self::index(slot) {
            Ok(index) => index,
            Err(_) => {
                log::warn!("timestamp poll for invalid slot {}", slot);
                return;
            }
        };
        let state = &self.slots[index];
        if !state.busy.load(Ordering::Acquire) {
            return;
        }
        let frame = match state.frame.get() {
            Some(frame) => frame,
            None => {
                state.unlock();
                return;
            }
        };

        if clock.now() < state.start_after.get() {
            // Too early for the hardware to have captured anything.
            self.reschedule(slot);
            return;
        }

        let value = self.regs.tx_timestamp(slot);
        if value == state.last_value.get() {
            // Unchanged capture register: the frame has not completed.
            if clock.now() < state.wait_until.get() {
                self.reschedule(slot);
                return;
            }
            let retries = state.retries.get() + 1;
            if retries >= TX_TIMESTAMP_MAX_RETRY {
                log::warn!(
                    "timestamp slot {}: register not updating, packet likely dropped",
                    slot
                );
                state.retries.set(0);
                state.unlock();
                if let Some(client) = self.client.get() {
                    client.tx_timestamp_dropped(frame);
                }
                return;
            }
            state.retries.set(retries);
            self.reschedule(slot);
            return;
        }

        state.retries.set(0);
        state.last_value.set(value);
        state.unlock();
        if let Some(client) = self.client.get() {
            client.tx_timestamp(frame, clock.sysclock_to_tx_timestamp(value));
        }
    }

    #[cfg(test)]
    fn is_locked(&self, slot: u8) -> bool {
        self.slots[slot as usize - 1].busy.load(Ordering::Acquire)
    }

    #[cfg(test)]
    fn deadlines(&self, slot: u8) -> (Sysclock, Sysclock) {
        let state = &self.slots[slot as usize - 1];
        (state.start_after.get(), state.wait_until.get())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::{FailPolicy, TxFrameMetadata};
    use crate::test_support::{fake_registers, poke};
    use std::cell::RefCell;
    use std::vec::Vec;

    struct RecordingClient {
        resolved: RefCell<Vec<(usize, u64)>>,
        dropped: RefCell<Vec<usize>>,
    }

    impl RecordingClient {
        fn new() -> Self {
            RecordingClient {
                resolved: RefCell::new(Vec::new()),
                dropped: RefCell::new(Vec::new()),
            }
        }
    }

    impl TxTimestampClient for RecordingClient {
        fn tx_timestamp(&self, id: usize, ns: u64) {
            self.resolved.borrow_mut().push((id, ns));
        }
        fn tx_timestamp_dropped(&self, id: usize) {
            self.dropped.borrow_mut().push(id);
        }
    }

    struct CountingScheduler {
        polls: core::cell::Cell<usize>,
    }

    impl PollScheduler for CountingScheduler {
        fn schedule_poll(&self, _slot: u8) {
            self.polls.set(self.polls.get() + 1);
        }
    }

    fn meta(from: u32, to: u32, delay_to: u32, policy: FailPolicy) -> TxFrameMetadata {
        TxFrameMetadata {
            frame_length: 64,
            timestamp_id: 0,
            from_tick: from,
            to_tick: to,
            delay_to_tick: delay_to,
            fail_policy: policy,
        }
    }

    #[test]
    fn wrap_margin_cases() {
        // Within the margin: skew, not a wrap.
        assert_eq!(absolute_tick(5, 536_870_900, 100), 536_870_900);
        // Beyond the margin: the deadline is in the next wrap period.
        assert_eq!(absolute_tick(200, 5, 100), 5 + (1 << 29));
        // Tick ahead of the clock needs no correction.
        assert_eq!(absolute_tick(5, 200, 100), 200);
        // Upper clock bits carry over.
        let sys = (3u64 << 29) | 200;
        assert_eq!(absolute_tick(sys, 400, 100), (3u64 << 29) | 400);
        assert_eq!(absolute_tick(sys, 5, 100), (4u64 << 29) | 5);
    }

    #[test]
    fn busy_slot_rejects_without_disturbing_in_flight_frame() {
        let (regs, _) = fake_registers();
        let correlator = TimestampCorrelator::new(regs);

        let m = meta(100, 200, 300, FailPolicy::Drop);
        assert_eq!(correlator.try_lock(1, 7, &m, 50), Ok(()));
        let armed = correlator.deadlines(1);

        assert_eq!(
            correlator.try_lock(1, 8, &m, 60),
            Err(TimestampError::SlotBusy)
        );
        assert!(correlator.is_locked(1));
        assert_eq!(correlator.deadlines(1), armed);
    }

    #[test]
    fn retry_policy_waits_until_delay_to() {
        let (regs, _) = fake_registers();
        let correlator = TimestampCorrelator::new(regs);

        let m = meta(100, 200, 300, FailPolicy::Retry);
        correlator.try_lock(2, 1, &m, 50).unwrap();
        assert_eq!(correlator.deadlines(2), (100, 300));

        let m = meta(100, 200, 300, FailPolicy::Drop);
        correlator.try_lock(3, 2, &m, 50).unwrap();
        assert_eq!(correlator.deadlines(3), (100, 200));
    }

    #[test]
    fn stale_register_abandons_after_retry_budget() {
        let (regs, base) = fake_registers();
        let clock = DeviceClock::new(regs);
        let correlator = TimestampCorrelator::new(regs);
        let client = RecordingClient::new();
        let scheduler = CountingScheduler {
            polls: core::cell::Cell::new(0),
        };
        correlator.set_client(&client);
        correlator.set_scheduler(&scheduler);

        // Lock just inside the window, then move the clock past it; the
        // capture register never changes from its last-resolved value of 0.
        let m = meta(100, 200, 300, FailPolicy::Drop);
        correlator.try_lock(1, 42, &m, 150).unwrap();
        poke(base, 0x028c, 1_000);

        let mut steps = 0;
        while correlator.is_locked(1) {
            correlator.poll(&clock, 1);
            steps += 1;
            assert!(steps <= TX_TIMESTAMP_MAX_RETRY as usize);
        }

        // Abandoned exactly once, free immediately after, retries reset.
        assert_eq!(steps, TX_TIMESTAMP_MAX_RETRY as usize);
        assert_eq!(client.dropped.borrow().as_slice(), &[42]);
        assert!(client.resolved.borrow().is_empty());
        assert!(!correlator.is_locked(1));

        // Further polls on the free slot are no-ops.
        correlator.poll(&clock, 1);
        assert!(client.dropped.borrow().len() == 1);
    }

    #[test]
    fn changed_register_resolves_and_unlocks() {
        let (regs, base) = fake_registers();
        let clock = DeviceClock::new(regs);
        clock.set_translation(1.0, 0);
        let correlator = TimestampCorrelator::new(regs);
        let client = RecordingClient::new();
        correlator.set_client(&client);

        poke(base, 0x028c, 150);
        let m = meta(100, 200, 300, FailPolicy::Drop);
        correlator.try_lock(1, 9, &m, 150).unwrap();

        // Hardware reports a capture in slot 1.
        poke(base, 0x01d8, 0);
        poke(base, 0x01dc, 180);
        correlator.poll(&clock, 1);

        assert!(!correlator.is_locked(1));
        assert_eq!(
            client.resolved.borrow().as_slice(),
            &[(9, 180 + crate::clock::TX_ADJUST_NS)]
        );

        // The slot can be reused; an identical capture value now reads as
        // stale rather than fresh.
        correlator.try_lock(1, 10, &m, 150).unwrap();
        assert!(correlator.is_locked(1));
    }

    #[test]
    fn early_poll_only_reschedules() {
        let (regs, base) = fake_registers();
        let clock = DeviceClock::new(regs);
        let correlator = TimestampCorrelator::new(regs);
        let scheduler = CountingScheduler {
            polls: core::cell::Cell::new(0),
        };
        correlator.set_scheduler(&scheduler);

        poke(base, 0x028c, 10);
        let m = meta(100, 200, 300, FailPolicy::Drop);
        correlator.try_lock(1, 1, &m, 10).unwrap();
        let after_lock = scheduler.polls.get();

        correlator.poll(&clock, 1);
        assert!(correlator.is_locked(1));
        assert_eq!(scheduler.polls.get(), after_lock + 1);
    }

    #[test]
    fn lock_any_scans_and_reports_exhaustion() {
        let (regs, _) = fake_registers();
        let correlator = TimestampCorrelator::new(regs);
        let m = meta(100, 200, 300, FailPolicy::Drop);

        let mut ids = Vec::new();
        for frame in 0..4 {
            ids.push(correlator.lock_any(frame, &m, 50).unwrap());
        }
        ids.sort_unstable();
        assert_eq!(ids.as_slice(), &[1, 2, 3, 4]);
        assert_eq!(
            correlator.lock_any(99, &m, 50),
            Err(TimestampError::Exhausted)
        );
    }
}
