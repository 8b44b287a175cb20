// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! Device context tying the timing components together.
//!
//! [`TsnAdapter`] is the handle the surrounding driver threads through all
//! calls: the transmit path asks it to stamp outgoing frames with their
//! release window ([`TsnAdapter::fill_tx_metadata`]), the completion path
//! forwards deferred timestamp polls, and the offload layer pushes Qbv/Qav
//! reconfigurations. Transmit-path failures only ever suppress auxiliary
//! features; the frame itself is never blocked here.

use crate::buffer::BufferTracker;
use crate::clock::DeviceClock;
use crate::config::{ConfigError, QavParams, QbvConfig, ShaperConfig};
use crate::gate::{self, GateError};
use crate::qav::CreditShaper;
use crate::registers::TsnRegisters;
use crate::timestamp::{
    PollScheduler, TimestampCorrelator, TxTimestampClient, LOWER_29_BITS,
};
use crate::{Timestamp, TC_COUNT};

/// What to do with a frame that misses its transmit window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FailPolicy {
    /// Drop at the end of the normal window.
    Drop,
    /// Extend into the next open window.
    Retry,
}

/// Per-frame metadata prepended to the DMA buffer. Window ticks are the low
/// 29 bits of the device clock; `timestamp_id` 0 means no hardware
/// timestamp capture was armed for this frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxFrameMetadata {
    pub frame_length: u16,
    pub timestamp_id: u8,
    pub from_tick: u32,
    pub to_tick: u32,
    pub delay_to_tick: u32,
    pub fail_policy: FailPolicy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdmitError {
    InvalidClass,
    /// The installed schedule never opens the gate for this class.
    GateNeverOpens,
}

/// Metadata horizon for deadline-free windows: one second, which still
/// fits the 29-bit tick field at the reserved 125 MHz clock.
const NO_DEADLINE_HORIZON_NS: u64 = 1_000_000_000;

pub struct TsnAdapter<'a> {
    regs: &'static TsnRegisters,
    clock: DeviceClock,
    config: ShaperConfig,
    shaper: CreditShaper,
    timestamps: TimestampCorrelator<'a>,
    buffer: BufferTracker,
}

impl<'a> TsnAdapter<'a> {
    pub fn new(regs: &'static TsnRegisters) -> Self {
        TsnAdapter {
            regs,
            clock: DeviceClock::new(regs),
            config: ShaperConfig::new(),
            shaper: CreditShaper::new(),
            timestamps: TimestampCorrelator::new(regs),
            buffer: BufferTracker::new(regs),
        }
    }

    pub fn clock(&self) -> &DeviceClock {
        &self.clock
    }

    pub fn buffer(&self) -> &BufferTracker {
        &self.buffer
    }

    pub fn set_timestamp_client(&self, client: &'a dyn TxTimestampClient) {
        self.timestamps.set_client(client);
    }

    pub fn set_poll_scheduler(&self, scheduler: &'a dyn PollScheduler) {
        self.timestamps.set_scheduler(scheduler);
    }

    /// Configuration path: turn the TSN block on or off.
    pub fn enable(&self) {
        self.regs.set_tsn_enabled(true);
    }

    pub fn disable(&self) {
        self.regs.set_tsn_enabled(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.regs.tsn_enabled()
    }

    /// Install a Qbv schedule from the offload layer. Rejected updates
    /// leave the running schedule untouched.
    pub fn set_qbv(&self, config: QbvConfig) -> Result<(), ConfigError> {
        self.config.set_qbv(config)
    }

    /// Install Qav parameters for one class, resetting its credit state.
    pub fn set_qav(&self, class: usize, params: QavParams) -> Result<(), ConfigError> {
        self.config.set_qav(class, params)?;
        let now = self.clock.sysclock_to_timestamp(self.clock.now());
        self.shaper.configure(class, params, now);
        Ok(())
    }

    /// Deferred-work entry point: one timestamp poll step for a slot.
    pub fn service_timestamp_poll(&self, slot: u8) {
        self.timestamps.poll(&self.clock, slot);
    }

    /// Completion/interrupt path: refresh buffer accounting.
    pub fn observe_buffers(&self) {
        self.buffer.observe();
    }

    /// Stamp an outgoing frame with its transmit window and, if requested,
    /// arm a hardware timestamp slot for it.
    ///
    /// The effective earliest release folds the credit shaper into the
    /// gate: `max(gate open, qav available)`. Timestamping is best-effort;
    /// exhausted capture slots leave `timestamp_id` at 0 and the frame
    /// still transmits.
    pub fn fill_tx_metadata(
        &self,
        transmission_identifier: usize,
        frame_length: u16,
        class: usize,
        fail_policy: FailPolicy,
        wants_timestamp: bool,
    ) -> Result<TxFrameMetadata, AdmitError> {
        if class >= TC_COUNT {
            return Err(AdmitError::InvalidClass);
        }

        let sys_count = self.clock.now();
        let now = self.clock.sysclock_to_timestamp(sys_count);

        let credit_ready = self.shaper.available_at(class, now);
        let baked = self.config.baked();
        let window = gate::next_window(
            &baked,
            self.config.qbv_start(),
            class,
            now.max(credit_ready),
        )
        .map_err(|e| match e {
            GateError::NeverOpens => AdmitError::GateNeverOpens,
        })?;

        self.shaper.on_transmit(class, window.from, frame_length as u32);

        let to = window.to.unwrap_or(window.from + NO_DEADLINE_HORIZON_NS);
        let delay_to = window
            .delay_to
            .unwrap_or(window.from + NO_DEADLINE_HORIZON_NS);

        let mut meta = TxFrameMetadata {
            frame_length,
            timestamp_id: 0,
            from_tick: self.window_tick(window.from),
            to_tick: self.window_tick(to),
            delay_to_tick: self.window_tick(delay_to),
            fail_policy,
        };

        if wants_timestamp {
            // Best-effort: a full correlator only costs us the capture.
            if let Ok(slot) = self.timestamps.lock_any(transmission_identifier, &meta, sys_count)
            {
                meta.timestamp_id = slot;
            }
        }

        self.buffer.note_enqueued();
        Ok(meta)
    }

    fn window_tick(&self, at: Timestamp) -> u32 {
        (self.clock.timestamp_to_sysclock(at) & LOWER_29_BITS) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::{AdmitError, FailPolicy, TsnAdapter};
    use crate::config::{QbvConfig, QbvSlot};
    use crate::test_support::{fake_registers, poke};

    fn two_slot_schedule() -> QbvConfig {
        let mut config = QbvConfig::disabled();
        config.enabled = true;
        config.start = 0;
        config.slot_count = 2;
        config.slots[0] = QbvSlot {
            duration_ns: 500_000,
            opened_prios: {
                let mut open = [false; crate::TC_COUNT];
                open[0] = true;
                open
            },
        };
        config.slots[1].duration_ns = 500_000;
        config
    }

    #[test]
    fn gated_frame_is_stamped_with_next_open_window() {
        let (regs, base) = fake_registers();
        let adapter = TsnAdapter::new(regs);
        adapter.clock().set_translation(1.0, 0);
        adapter.set_qbv(two_slot_schedule()).unwrap();

        // Device clock sits in the closed half of the first cycle.
        poke(base, 0x028c, 600_000);

        let meta = adapter
            .fill_tx_metadata(1, 64, 0, FailPolicy::Drop, false)
            .unwrap();
        assert_eq!(meta.frame_length, 64);
        assert_eq!(meta.timestamp_id, 0);
        assert_eq!(meta.from_tick, 1_000_000);
        assert_eq!(meta.to_tick, 1_500_000);
        assert_eq!(meta.delay_to_tick, 2_500_000);
        assert_eq!(adapter.buffer().pending(), 1);
    }

    #[test]
    fn closed_class_is_a_configuration_error() {
        let (regs, _) = fake_registers();
        let adapter = TsnAdapter::new(regs);
        adapter.clock().set_translation(1.0, 0);
        adapter.set_qbv(two_slot_schedule()).unwrap();

        assert_eq!(
            adapter.fill_tx_metadata(1, 64, 1, FailPolicy::Drop, false),
            Err(AdmitError::GateNeverOpens)
        );
        assert_eq!(
            adapter.fill_tx_metadata(1, 64, crate::TC_COUNT, FailPolicy::Drop, false),
            Err(AdmitError::InvalidClass)
        );
    }

    #[test]
    fn timestamp_slots_are_allocated_best_effort() {
        let (regs, base) = fake_registers();
        let adapter = TsnAdapter::new(regs);
        adapter.clock().set_translation(1.0, 0);
        poke(base, 0x028c, 1_000);

        let mut seen = [false; 4];
        for frame in 0..4 {
            let meta = adapter
                .fill_tx_metadata(frame, 64, 0, FailPolicy::Drop, true)
                .unwrap();
            assert!((1..=4).contains(&meta.timestamp_id));
            seen[meta.timestamp_id as usize - 1] = true;
        }
        assert_eq!(seen, [true; 4]);

        // All slots busy: the frame is still admitted, just without a
        // capture.
        let meta = adapter
            .fill_tx_metadata(9, 64, 0, FailPolicy::Drop, true)
            .unwrap();
        assert_eq!(meta.timestamp_id, 0);
        assert_eq!(adapter.buffer().pending(), 5);
    }

    #[test]
    fn enable_bit_is_config_path_only() {
        let (regs, _) = fake_registers();
        let adapter = TsnAdapter::new(regs);
        assert!(!adapter.is_enabled());
        adapter.enable();
        assert!(adapter.is_enabled());
        adapter.disable();
        assert!(!adapter.is_enabled());
    }
}
