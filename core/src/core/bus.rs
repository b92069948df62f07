/// Snapshot of the bus control lines, sampled once per request.
///
/// Each flag is stored *asserted-high*: the physical lines are active low,
/// and the sampler inverts them while building the snapshot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ControlSignals(u16);

impl ControlSignals {
    pub const RD: Self = Self(1 << 0);
    pub const WR: Self = Self(1 << 1);
    pub const MREQ: Self = Self(1 << 2);
    pub const IORQ: Self = Self(1 << 3);
    pub const M1: Self = Self(1 << 4);
    pub const WAIT: Self = Self(1 << 5);
    pub const BUSACK: Self = Self(1 << 6);
    // Decoded extras, only present where the board exposes them upstream
    pub const RESET: Self = Self(1 << 7);
    pub const NMI: Self = Self(1 << 8);
    pub const IRQ: Self = Self(1 << 9);
    pub const BUSRQ: Self = Self(1 << 10);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u16 {
        self.0
    }

    pub const fn from_bits(bits: u16) -> Self {
        Self(bits & 0x07FF)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn set(&mut self, other: Self, on: bool) {
        if on {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }

    pub const fn rd(self) -> bool {
        self.contains(Self::RD)
    }

    pub const fn wr(self) -> bool {
        self.contains(Self::WR)
    }

    pub const fn mreq(self) -> bool {
        self.contains(Self::MREQ)
    }

    pub const fn iorq(self) -> bool {
        self.contains(Self::IORQ)
    }

    pub const fn m1(self) -> bool {
        self.contains(Self::M1)
    }

    pub const fn wait(self) -> bool {
        self.contains(Self::WAIT)
    }

    pub const fn busack(self) -> bool {
        self.contains(Self::BUSACK)
    }

    /// A wait is only serviceable when it belongs to a real transfer:
    /// (RD or WR) with (MREQ or IORQ), or IORQ with M1 (interrupt acknowledge).
    pub const fn is_wait_valid(self) -> bool {
        let transfer = (self.rd() || self.wr()) && (self.mreq() || self.iorq());
        transfer || (self.iorq() && self.m1())
    }

    /// True when the processor expects data on the bus: a memory/IO read or
    /// an interrupt acknowledge (which reads the vector).
    pub const fn is_read(self) -> bool {
        (self.rd() && (self.mreq() || self.iorq())) || (self.iorq() && self.m1())
    }

    pub const fn is_write(self) -> bool {
        self.wr() && (self.mreq() || self.iorq())
    }

    /// Interrupt acknowledge: M1 and IORQ together while the bus is not granted.
    pub const fn is_int_ack(self) -> bool {
        self.m1() && self.iorq() && !self.busack()
    }

    /// Opcode fetch (M1 with MREQ and RD).
    pub const fn is_opcode_fetch(self) -> bool {
        self.m1() && self.mreq() && self.rd()
    }
}

impl std::ops::BitOr for ControlSignals {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl std::fmt::Debug for ControlSignals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        const NAMES: [(ControlSignals, char); 7] = [
            (ControlSignals::M1, '1'),
            (ControlSignals::RD, 'R'),
            (ControlSignals::WR, 'W'),
            (ControlSignals::MREQ, 'M'),
            (ControlSignals::IORQ, 'I'),
            (ControlSignals::WAIT, 'T'),
            (ControlSignals::BUSACK, 'K'),
        ];
        let text: String = NAMES
            .iter()
            .map(|&(flag, c)| if self.contains(flag) { c } else { '.' })
            .collect();
        write!(f, "ControlSignals({text})")
    }
}

/// Address space targeted by a block transfer or a bus-master cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessSpace {
    Memory,
    Io,
}

/// Side-channel selector codes.
///
/// The multiplexer drives exactly one of these functions at a time; the
/// `*Low`-style functions are asserted while the mux is enabled with that code.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MuxSelect {
    LowAddrClock = 0,
    DataOutputEnable = 1,
    Irq = 2,
    LowAddrOutputEnable = 3,
    LowAddrClear = 4, // doubles as the high-address serial input
    Reset = 5,
    Nmi = 6,
    HighAddrOutputEnable = 7,
}

impl MuxSelect {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub const fn from_code(code: u32) -> Self {
        match code & 0x07 {
            0 => Self::LowAddrClock,
            1 => Self::DataOutputEnable,
            2 => Self::Irq,
            3 => Self::LowAddrOutputEnable,
            4 => Self::LowAddrClear,
            5 => Self::Reset,
            6 => Self::Nmi,
            _ => Self::HighAddrOutputEnable,
        }
    }
}

/// Whether the wait generators are armed for memory and/or IO cycles.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WaitFlags {
    pub memory: bool,
    pub io: bool,
}

impl WaitFlags {
    pub const NONE: Self = Self {
        memory: false,
        io: false,
    };

    pub const fn any(self) -> bool {
        self.memory || self.io
    }
}

/// Physical bus interface used by the arbiter.
///
/// One implementation drives the real board through GPIO registers
/// ([`crate::gpio::GpioBus`]); test and host builds use a simulated target.
/// Every call is synchronous and bounded: nothing here may block for longer
/// than a fixed number of hardware cycles or a microsecond timeout.
pub trait BusSignals {
    /// Read the control lines. Never cached across calls.
    fn sample_control_lines(&mut self) -> ControlSignals;

    /// Latch a full 16-bit address onto the bus (bus-master mode).
    fn set_address(&mut self, addr: u16);

    /// Clock the low address counter by one. Does not carry into the high byte.
    fn increment_low_address(&mut self);

    /// Read the address and data presented by the processor during a wait.
    /// The data bus is read last.
    fn read_address_and_data(&mut self) -> (u16, u8);

    /// Read only the high address byte, for the fast-path watch table.
    fn read_high_address(&mut self) -> u8;

    /// Turn the data driver outward and present `value` until released.
    fn drive_data_byte(&mut self, value: u8);

    /// Stop driving the data bus and turn the driver back inward.
    fn release_data_bus(&mut self);

    /// Briefly assert one side-channel function.
    fn pulse_side_channel(&mut self, select: MuxSelect);

    /// Hold (or stop holding) a side-channel function, for RESET/NMI/IRQ pulses
    /// that last longer than a single strobe.
    fn set_side_channel(&mut self, select: MuxSelect, active: bool);

    /// Release a pending WAIT so the processor can finish its cycle.
    fn release_wait(&mut self);

    /// Arm or disarm the wait generators.
    fn set_wait_generation(&mut self, flags: WaitFlags);

    /// Assert or release BUSRQ.
    fn set_bus_request(&mut self, active: bool);

    /// Drive the control lines after BUSACK (wait generation suspended).
    fn take_bus(&mut self);

    /// Return the control lines to the processor and release BUSRQ.
    fn release_bus(&mut self);

    /// One read cycle at the latched address while holding the bus.
    fn master_read(&mut self, space: AccessSpace) -> u8;

    /// One write cycle at the latched address while holding the bus.
    fn master_write(&mut self, space: AccessSpace, value: u8);

    /// Page the target RAM in (`true`) or out (`false`).
    fn set_paging(&mut self, paged_in: bool);

    /// Free-running microsecond clock.
    fn micros(&self) -> u64;

    /// Busy-wait for `us` microseconds.
    fn delay_us(&mut self, us: u32);
}

/// True once `now` is more than `limit_us` past `start`.
pub fn is_timeout(now: u64, start: u64, limit_us: u64) -> bool {
    now.saturating_sub(start) > limit_us
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_read_is_valid_wait() {
        let c = ControlSignals::MREQ | ControlSignals::RD | ControlSignals::WAIT;
        assert!(c.is_wait_valid());
        assert!(c.is_read());
        assert!(!c.is_write());
    }

    #[test]
    fn interrupt_ack_is_valid_without_rd() {
        let c = ControlSignals::IORQ | ControlSignals::M1;
        assert!(c.is_wait_valid());
        assert!(c.is_int_ack());
        assert!(c.is_read());
        assert!(!(c | ControlSignals::BUSACK).is_int_ack());
    }

    #[test]
    fn refresh_cycle_is_not_valid() {
        // MREQ without RD/WR is a refresh
        assert!(!ControlSignals::MREQ.is_wait_valid());
        assert!(!(ControlSignals::RD | ControlSignals::WAIT).is_wait_valid());
    }

    #[test]
    fn debug_lists_asserted_lines() {
        let c = ControlSignals::M1 | ControlSignals::MREQ | ControlSignals::RD;
        assert_eq!(format!("{c:?}"), "ControlSignals(1R.M...)");
    }

    #[test]
    fn mux_codes_round_trip() {
        for code in 0..8 {
            assert_eq!(MuxSelect::from_code(code).code(), code);
        }
        assert_eq!(MuxSelect::Reset.code(), 5);
        assert_eq!(MuxSelect::HighAddrOutputEnable.code(), 7);
    }

    #[test]
    fn timeout_is_strictly_after_limit() {
        assert!(!is_timeout(110, 100, 10));
        assert!(is_timeout(111, 100, 10));
        assert!(!is_timeout(50, 100, 10));
    }
}
