//! Register port abstraction and the DDC register map.
//!
//! The transport that actually moves register reads and writes is an external
//! collaborator. Blocks only see [`RegisterPort`]: a synchronous 32-bit peek
//! and a fire-and-forget 32-bit poke that may carry a hardware-latched apply
//! time. [`SimRegisters`] is an in-memory register file used for tests and
//! host-side development.

use std::collections::HashMap;

use crate::error::DdcResult;

/// A hardware timestamp at which a register write should be applied.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct TimeSpec(pub f64);

impl TimeSpec {
    /// Time in seconds.
    pub fn secs(&self) -> f64 {
        self.0
    }
}

/// Read/write access to a block's register space.
pub trait RegisterPort: Send {
    /// Read a 32-bit register. Blocks until the transport returns.
    fn peek32(&mut self, address: u32) -> DdcResult<u32>;

    /// Write a 32-bit register, optionally scheduled for a future time.
    ///
    /// Returning `Ok` means the write was accepted, not that it was applied.
    fn poke32(&mut self, address: u32, value: u32, time: Option<TimeSpec>) -> DdcResult<()>;
}

impl<R: RegisterPort + ?Sized> RegisterPort for Box<R> {
    fn peek32(&mut self, address: u32) -> DdcResult<u32> {
        (**self).peek32(address)
    }

    fn poke32(&mut self, address: u32, value: u32, time: Option<TimeSpec>) -> DdcResult<()> {
        (**self).poke32(address, value, time)
    }
}

/// DDC block register map.
pub mod ddc {
    /// Byte stride between per-channel register banks.
    pub const CHAN_OFFSET: u32 = 2048;

    /// Compat number readback. Read this first.
    pub const RB_COMPAT_NUM: u32 = 0;
    /// Number of halfband stages.
    pub const RB_NUM_HB: u32 = 8;
    /// Maximum CIC decimation.
    pub const RB_CIC_MAX_DECIM: u32 = 16;

    /// Rate change numerator (the decimation).
    pub const SR_N_ADDR: u32 = 128 * 8;
    /// Rate change denominator.
    pub const SR_M_ADDR: u32 = 129 * 8;
    pub const SR_CONFIG_ADDR: u32 = 130 * 8;
    /// NCO phase increment.
    pub const SR_FREQ_ADDR: u32 = 132 * 8;
    /// Fixed-point IQ scaling.
    pub const SR_SCALE_IQ_ADDR: u32 = 133 * 8;
    /// Halfband/CIC decimation word.
    pub const SR_DECIM_ADDR: u32 = 134 * 8;
    pub const SR_MUX_ADDR: u32 = 135 * 8;
    pub const SR_COEFFS_ADDR: u32 = 136 * 8;

    /// Address of `base` in the register bank of `chan`.
    pub fn chan_addr(base: u32, chan: usize) -> u32 {
        base + CHAN_OFFSET * chan as u32
    }
}

/// Compat number layout: major in the upper half-word, minor in the lower.
pub mod compat {
    /// Build a compat word.
    pub fn pack(major: u16, minor: u16) -> u32 {
        (u32::from(major) << 16) | u32::from(minor)
    }

    /// Major version.
    pub fn major(word: u32) -> u16 {
        (word >> 16) as u16
    }

    /// Minor version.
    pub fn minor(word: u32) -> u16 {
        (word & 0xFFFF) as u16
    }

    /// Format as `major.minor`.
    pub fn format(word: u32) -> String {
        format!("{}.{}", major(word), minor(word))
    }
}

/// A register write as observed by [`SimRegisters`].
#[derive(Debug, Clone, PartialEq)]
pub struct RegWrite {
    pub address: u32,
    pub value: u32,
    pub time: Option<TimeSpec>,
}

/// Simulated register file.
///
/// Reads return the last value written (or preloaded) at that address, zero
/// otherwise. Every write is also appended to a log.
#[derive(Debug, Clone, Default)]
pub struct SimRegisters {
    registers: HashMap<u32, u32>,
    writes: Vec<RegWrite>,
}

impl SimRegisters {
    /// Create an empty register file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register file preloaded with the readbacks of a DDC with `num_halfbands`
    /// halfband stages and `cic_max_decim` maximum CIC decimation.
    pub fn ddc(num_halfbands: u32, cic_max_decim: u32) -> Self {
        Self::new()
            .with_register(ddc::RB_COMPAT_NUM, compat::pack(0, 0))
            .with_register(ddc::RB_NUM_HB, num_halfbands)
            .with_register(ddc::RB_CIC_MAX_DECIM, cic_max_decim)
    }

    /// Preload a register without logging a write.
    pub fn with_register(mut self, address: u32, value: u32) -> Self {
        self.registers.insert(address, value);
        self
    }

    /// All writes in the order they were issued.
    pub fn writes(&self) -> &[RegWrite] {
        &self.writes
    }

    /// Most recent write to `address`.
    pub fn last_write(&self, address: u32) -> Option<&RegWrite> {
        self.writes.iter().rev().find(|w| w.address == address)
    }

    /// Forget the write log, keeping register contents.
    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }
}

impl RegisterPort for SimRegisters {
    fn peek32(&mut self, address: u32) -> DdcResult<u32> {
        Ok(*self.registers.get(&address).unwrap_or(&0))
    }

    fn poke32(&mut self, address: u32, value: u32, time: Option<TimeSpec>) -> DdcResult<()> {
        self.registers.insert(address, value);
        self.writes.push(RegWrite {
            address,
            value,
            time,
        });
        Ok(())
    }
}
