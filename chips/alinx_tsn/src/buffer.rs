// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! TX buffer occupancy tracking.
//!
//! Pure observability: pending-entry counts derived from the hardware's
//! monotonic entry counters feed backpressure decisions made by the caller.
//! Nothing here throttles admission itself.

use core::cell::Cell;

use crate::registers::TsnRegisters;

/// Hardware TX buffer depth, in entries.
pub const HW_QUEUE_SIZE: u64 = 128;
const HW_QUEUE_SIZE_PAD: u64 = 20;
/// Admission limit for best-effort traffic, leaving headroom for shaped
/// classes.
pub const BE_QUEUE_SIZE: u64 = HW_QUEUE_SIZE - HW_QUEUE_SIZE_PAD;
/// Admission limit for shaped (TSN) traffic.
pub const TSN_QUEUE_SIZE: u64 = HW_QUEUE_SIZE - 2;

pub struct BufferTracker {
    regs: &'static TsnRegisters,
    pending_packets: Cell<u64>,
    /// Watermark of entries observed to have left the buffer
    /// (transmitted + dropped).
    last_tx_count: Cell<u64>,
}

impl BufferTracker {
    pub fn new(regs: &'static TsnRegisters) -> Self {
        BufferTracker {
            regs,
            pending_packets: Cell::new(0),
            last_tx_count: Cell::new(0),
        }
    }

    /// Transmit path: one more entry handed to the DMA engine.
    pub fn note_enqueued(&self) {
        self.pending_packets.set(self.pending_packets.get() + 1);
    }

    /// Poll the completion counters and drain the pending count by however
    /// many entries have left the buffer since the last observation. Never
    /// underflows: counter tears or missed observations saturate at zero.
    pub fn observe(&self) {
        let completed = self
            .regs
            .total_valid_entries()
            .wrapping_add(self.regs.total_drop_entries());
        let newly = completed.saturating_sub(self.last_tx_count.get());
        self.pending_packets
            .set(self.pending_packets.get().saturating_sub(newly));
        self.last_tx_count.set(completed);
    }

    pub fn pending(&self) -> u64 {
        self.pending_packets.get()
    }

    /// Remaining admission room against a queue limit
    /// ([`BE_QUEUE_SIZE`] or [`TSN_QUEUE_SIZE`]).
    pub fn free_slots(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.pending_packets.get())
    }

    /// Buffer occupancy as the hardware itself reports it: entries
    /// accepted minus entries that left.
    pub fn hardware_pending(&self) -> u64 {
        let new = self.regs.total_new_entries();
        let gone = self
            .regs
            .total_valid_entries()
            .wrapping_add(self.regs.total_drop_entries());
        new.saturating_sub(gone)
    }

    /// Free buffer space from the write-status register (bits 39..32).
    pub fn hardware_buffer_space(&self) -> u8 {
        self.regs.buffer_space()
    }
}
