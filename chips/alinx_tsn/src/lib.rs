// Licensed under the Apache License, Version 2.0 or the MIT License.
// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright ALINX TSN Driver Contributors 2026.

//! Timing and traffic-shaping core for the ALINX FPGA XDMA TSN Ethernet
//! adapter.
//!
//! The adapter exposes a time-aware shaper (IEEE 802.1Qbv), a credit-based
//! shaper (IEEE 802.1Qav) and four hardware TX-timestamp capture slots
//! through a memory-mapped register block on BAR0. This crate decides *when*
//! a frame may be released, reads the device clock, and reconciles completed
//! transmissions with their hardware timestamps. Descriptor rings, interrupt
//! servicing and network-stack plumbing live in the surrounding driver and
//! only call into this crate.
//!
//! The entry point is [`adapter::TsnAdapter`], constructed over a
//! `&'static` [`registers::TsnRegisters`] window mapped by the PCI glue.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod adapter;
pub mod buffer;
pub mod clock;
pub mod config;
pub mod gate;
pub mod qav;
pub mod registers;
pub mod timestamp;

/// Raw device clock value in hardware ticks (8 ns at the reserved 125 MHz).
pub type Sysclock = u64;

/// Translated wall-clock-style time in nanoseconds.
pub type Timestamp = u64;

/// Number of independent traffic classes / priorities.
pub const TC_COUNT: usize = 8;

/// Maximum number of slots in an administrative Qbv schedule.
pub const MAX_QBV_SLOTS: usize = 20;

/// Number of physical TX-timestamp capture registers. This is a hardware
/// limit; do not generalize.
pub const TX_TIMESTAMP_SLOTS: usize = 4;
