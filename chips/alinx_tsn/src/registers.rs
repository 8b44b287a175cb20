// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! TSN register block on BAR0 of the XDMA adapter.
//!
//! All registers are 32-bit little-endian and must be accessed as whole
//! words. 64-bit quantities are split over HI/LO register pairs; the
//! composition contract is `(HI << 32) | LO` with HI read first. There is no
//! atomic snapshot across the pair: a LO wraparound between the two reads
//! can tear the composed value roughly once per 4 billion ticks. Consumers
//! tolerate that instead of retrying.

use tock_registers::interfaces::{Readable, Writeable};
use tock_registers::registers::{ReadOnly, ReadWrite};
use tock_registers::{register_bitfields, register_structs};

/// Size of the mapped TSN register window.
pub const REGISTER_WINDOW_BYTES: usize = 0x298;

register_structs! {
    /// TSN timing block, as laid out on BAR0.
    pub TsnRegisters {
        (0x0000 => _reserved0),
        /// Next periodic pulse time, upper word
        (0x002c => next_pulse_at_hi: ReadWrite<u32>),
        /// Next periodic pulse time, lower word
        (0x0030 => next_pulse_at_lo: ReadWrite<u32>),
        /// Device clock ticks per second; reads as 0 until programmed
        (0x0034 => cycle_1s: ReadWrite<u32>),
        (0x0038 => _reserved1),
        /// Total entries accepted into the TX buffer
        (0x0120 => total_new_entry_cnt_hi: ReadOnly<u32>),
        (0x0124 => total_new_entry_cnt_lo: ReadOnly<u32>),
        /// Total entries transmitted out of the TX buffer
        (0x0128 => total_valid_entry_cnt_hi: ReadOnly<u32>),
        (0x012c => total_valid_entry_cnt_lo: ReadOnly<u32>),
        (0x0130 => _reserved2),
        /// Total entries dropped by the TX buffer
        (0x0138 => total_drop_entry_cnt_hi: ReadOnly<u32>),
        (0x013c => total_drop_entry_cnt_lo: ReadOnly<u32>),
        (0x0140 => _reserved3),
        /// TX buffer write status; bits 39..32 report free buffer space
        (0x0148 => buffer_write_status_hi: ReadOnly<u32, BUFFER_WRITE_STATUS_HI::Register>),
        (0x014c => buffer_write_status_lo: ReadOnly<u32>),
        (0x0150 => _reserved4),
        /// TX timestamp capture slots 1..4
        (0x01d8 => tx_timestamp1_hi: ReadOnly<u32>),
        (0x01dc => tx_timestamp1_lo: ReadOnly<u32>),
        (0x01e0 => tx_timestamp2_hi: ReadOnly<u32>),
        (0x01e4 => tx_timestamp2_lo: ReadOnly<u32>),
        (0x01e8 => tx_timestamp3_hi: ReadOnly<u32>),
        (0x01ec => tx_timestamp3_lo: ReadOnly<u32>),
        (0x01f0 => tx_timestamp4_hi: ReadOnly<u32>),
        (0x01f4 => tx_timestamp4_lo: ReadOnly<u32>),
        (0x01f8 => _reserved5),
        /// Free-running device clock
        (0x0288 => sys_clock_hi: ReadOnly<u32>),
        (0x028c => sys_clock_lo: ReadOnly<u32>),
        /// TSN system control
        (0x0290 => tsn_system_control_hi: ReadWrite<u32>),
        (0x0294 => tsn_system_control_lo: ReadWrite<u32, TSN_SYSTEM_CONTROL::Register>),
        (0x0298 => @END),
    }
}

register_bitfields![u32,
    TSN_SYSTEM_CONTROL [
        ENABLE OFFSET(0) NUMBITS(1) []
    ],
    BUFFER_WRITE_STATUS_HI [
        /// Free buffer slots; bits 39..32 of the 64-bit status word
        BUFFER_SPACE OFFSET(0) NUMBITS(8) []
    ]
];

#[inline]
fn compose(hi: u32, lo: u32) -> u64 {
    ((hi as u64) << 32) | lo as u64
}

impl TsnRegisters {
    /// Current device clock, HI read before LO.
    pub(crate) fn sys_clock(&self) -> u64 {
        compose(self.sys_clock_hi.get(), self.sys_clock_lo.get())
    }

    /// Program the next pulse time. HI is written before LO, mirroring the
    /// read order; the pair is not latched atomically.
    pub(crate) fn set_next_pulse(&self, time: u64) {
        self.next_pulse_at_hi.set((time >> 32) as u32);
        self.next_pulse_at_lo.set(time as u32);
    }

    pub(crate) fn cycle_1s(&self) -> u32 {
        self.cycle_1s.get()
    }

    pub(crate) fn set_cycle_1s(&self, ticks: u32) {
        self.cycle_1s.set(ticks);
    }

    /// Raw capture value of a TX timestamp slot. Slot ids are 1..=4; any
    /// other id reads as 0 rather than faulting.
    pub(crate) fn tx_timestamp(&self, slot: u8) -> u64 {
        match slot {
            1 => compose(self.tx_timestamp1_hi.get(), self.tx_timestamp1_lo.get()),
            2 => compose(self.tx_timestamp2_hi.get(), self.tx_timestamp2_lo.get()),
            3 => compose(self.tx_timestamp3_hi.get(), self.tx_timestamp3_lo.get()),
            4 => compose(self.tx_timestamp4_hi.get(), self.tx_timestamp4_lo.get()),
            _ => 0,
        }
    }

    pub(crate) fn total_new_entries(&self) -> u64 {
        compose(
            self.total_new_entry_cnt_hi.get(),
            self.total_new_entry_cnt_lo.get(),
        )
    }

    pub(crate) fn total_valid_entries(&self) -> u64 {
        compose(
            self.total_valid_entry_cnt_hi.get(),
            self.total_valid_entry_cnt_lo.get(),
        )
    }

    pub(crate) fn total_drop_entries(&self) -> u64 {
        compose(
            self.total_drop_entry_cnt_hi.get(),
            self.total_drop_entry_cnt_lo.get(),
        )
    }

    /// Free buffer space as reported in bits 39..32 of the write status.
    pub(crate) fn buffer_space(&self) -> u8 {
        self.buffer_write_status_hi
            .read(BUFFER_WRITE_STATUS_HI::BUFFER_SPACE) as u8
    }

    pub(crate) fn tsn_enabled(&self) -> bool {
        self.tsn_system_control_lo
            .is_set(TSN_SYSTEM_CONTROL::ENABLE)
    }

    /// Configuration path only; never written from the transmit path.
    pub(crate) fn set_tsn_enabled(&self, enabled: bool) {
        let bit = if enabled { 1 } else { 0 };
        self.tsn_system_control_lo
            .write(TSN_SYSTEM_CONTROL::ENABLE.val(bit));
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::{fake_registers, peek, poke};

    #[test]
    fn sys_clock_composes_hi_then_lo() {
        let (regs, base) = fake_registers();
        poke(base, 0x0288, 0x0000_0001);
        poke(base, 0x028c, 0x0000_0000);
        assert_eq!(regs.sys_clock(), 0x1_0000_0000);

        poke(base, 0x0288, 0xdead_beef);
        poke(base, 0x028c, 0x0123_4567);
        assert_eq!(regs.sys_clock(), 0xdead_beef_0123_4567);
    }

    #[test]
    fn next_pulse_splits_over_pair() {
        let (regs, base) = fake_registers();
        regs.set_next_pulse(0x1_0000_2000);
        assert_eq!(peek(base, 0x002c), 0x0000_0001);
        assert_eq!(peek(base, 0x0030), 0x0000_2000);
    }

    #[test]
    fn tx_timestamp_slots_are_independent() {
        let (regs, base) = fake_registers();
        poke(base, 0x01d8, 0x1);
        poke(base, 0x01dc, 0x2);
        poke(base, 0x01f0, 0x3);
        poke(base, 0x01f4, 0x4);
        assert_eq!(regs.tx_timestamp(1), 0x1_0000_0002);
        assert_eq!(regs.tx_timestamp(4), 0x3_0000_0004);
        assert_eq!(regs.tx_timestamp(2), 0);
        assert_eq!(regs.tx_timestamp(0), 0);
        assert_eq!(regs.tx_timestamp(5), 0);
    }

    #[test]
    fn buffer_space_decodes_bits_39_32() {
        let (regs, base) = fake_registers();
        poke(base, 0x0148, 0x0000_007f);
        poke(base, 0x014c, 0xffff_ffff);
        assert_eq!(regs.buffer_space(), 0x7f);
    }

    #[test]
    fn tsn_enable_bit_round_trips() {
        let (regs, base) = fake_registers();
        assert!(!regs.tsn_enabled());
        regs.set_tsn_enabled(true);
        assert!(regs.tsn_enabled());
        assert_eq!(peek(base, 0x0294) & 0x1, 1);
        regs.set_tsn_enabled(false);
        assert!(!regs.tsn_enabled());
    }
}
