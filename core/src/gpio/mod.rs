//! Bus signal sampler over a 32-bit GPIO register bank.
//!
//! [`GpioBus`] sequences the interface board: a 3-bit multiplexer selects
//! one side-channel function at a time (address latch clocks, buffer
//! enables, RESET/NMI/IRQ), a counter and shift register hold the address
//! while the firmware masters the bus, and a bidirectional buffer connects
//! the PIB to the target data bus.
//!
//! Two rules are never broken here: the mux selector only changes while the
//! mux is disabled, and the PIB is never an output while the data buffer
//! faces inward.

pub mod pins;

#[cfg(test)]
pub(crate) mod fake;

use crate::core::bus::{AccessSpace, BusSignals, ControlSignals, MuxSelect, WaitFlags, is_timeout};
use pins::*;

/// Cycles to let the mux and latch outputs settle.
const SETTLE_CYCLES: u32 = 15;

/// Raw GPIO access. One implementation per host board.
pub trait GpioPort {
    /// Level register, all 32 pins.
    fn levels(&mut self) -> u32;
    fn set(&mut self, mask: u32);
    fn clear(&mut self, mask: u32);
    /// Switch the PIB pins between output (`true`) and input.
    fn set_pib_output(&mut self, output: bool);
    /// Switch MREQ/IORQ/RD/WR between output (`true`) and input.
    fn set_control_output(&mut self, output: bool);
    fn spin(&mut self, cycles: u32);
    fn micros(&self) -> u64;
}

/// [`BusSignals`] implementation for the interface board.
pub struct GpioBus<P: GpioPort> {
    port: P,
    held_select: Option<MuxSelect>,
    wait_flags: WaitFlags,
    waits_suspended: bool,
}

impl<P: GpioPort> GpioBus<P> {
    pub fn new(mut port: P) -> Self {
        port.set_pib_output(false);
        port.set_control_output(false);
        port.set(bit(MUX_EN_BAR) | bit(DATA_DIR_IN) | bit(PAGING_RAM) | bit(BUSRQ_BAR));
        port.clear(MUX_SEL_MASK | WAIT_EN_MASK | bit(HADDR_CK));
        Self {
            port,
            held_select: None,
            wait_flags: WaitFlags::NONE,
            waits_suspended: false,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    // ---- Multiplexer ----

    fn mux_disable(&mut self) {
        self.port.set(bit(MUX_EN_BAR));
    }

    fn mux_write_select(&mut self, select: MuxSelect) {
        self.port.clear(MUX_SEL_MASK);
        self.port.set(select.code() << MUX_SEL_LOW);
    }

    fn mux_set(&mut self, select: MuxSelect) {
        self.mux_disable();
        self.mux_write_select(select);
        self.port.spin(SETTLE_CYCLES);
        self.port.clear(bit(MUX_EN_BAR));
    }

    /// Disable the mux, then re-assert any held RESET/NMI/IRQ selector.
    fn mux_clear(&mut self) {
        self.mux_disable();
        self.port.clear(MUX_SEL_MASK);
        if let Some(held) = self.held_select {
            self.mux_write_select(held);
            self.port.spin(SETTLE_CYCLES);
            self.port.clear(bit(MUX_EN_BAR));
        }
    }

    fn mux_pulse(&mut self, select: MuxSelect) {
        self.mux_set(select);
        self.port.spin(SETTLE_CYCLES);
        self.mux_clear();
    }

    // ---- PIB ----

    fn pib_read(&mut self) -> u8 {
        (self.port.levels() >> PIB_LOW) as u8
    }

    fn pib_write(&mut self, value: u8) {
        self.port.clear(PIB_MASK);
        self.port.set((value as u32) << PIB_LOW);
    }

    // ---- Address latches ----

    /// Clear the counter then clock it N+1 times: the output register
    /// trails the counter by one pulse.
    fn low_address_set(&mut self, low: u8) {
        self.mux_pulse(MuxSelect::LowAddrClear);
        for _ in 0..=low as u32 {
            self.mux_pulse(MuxSelect::LowAddrClock);
        }
    }

    /// Shift the byte in MSB first. The serial input is the clear line, so
    /// this also clears the low counter; set the high byte first.
    fn high_address_set(&mut self, high: u8) {
        let mut value = high;
        for _ in 0..9 {
            if value & 0x80 != 0 {
                self.mux_disable();
            } else {
                self.mux_set(MuxSelect::LowAddrClear);
            }
            value <<= 1;
            self.port.spin(SETTLE_CYCLES);
            self.port.clear(bit(HADDR_CK));
            self.port.set(bit(HADDR_CK));
        }
        self.port.clear(bit(HADDR_CK));
        self.mux_clear();
    }

    // ---- Wait generation ----

    fn apply_wait_enables(&mut self) {
        self.port.clear(WAIT_EN_MASK);
        if self.waits_suspended {
            return;
        }
        let mut mask = 0;
        if self.wait_flags.memory {
            mask |= bit(MREQ_WAIT_EN);
        }
        if self.wait_flags.io {
            mask |= bit(IORQ_WAIT_EN);
        }
        self.port.set(mask);
    }

    fn space_pin(space: AccessSpace) -> u32 {
        match space {
            AccessSpace::Memory => bit(MREQ_BAR),
            AccessSpace::Io => bit(IORQ_BAR),
        }
    }
}

impl<P: GpioPort> BusSignals for GpioBus<P> {
    fn sample_control_lines(&mut self) -> ControlSignals {
        let levels = self.port.levels();
        let low = |pin: u32| levels & bit(pin) == 0;
        let mut c = ControlSignals::empty();
        c.set(ControlSignals::MREQ, low(MREQ_BAR));
        c.set(ControlSignals::IORQ, low(IORQ_BAR));
        c.set(ControlSignals::RD, low(RD_BAR));
        c.set(ControlSignals::WR, low(WR_BAR));
        c.set(ControlSignals::M1, low(M1_BAR));
        c.set(ControlSignals::WAIT, low(WAIT_BAR));
        c.set(ControlSignals::BUSACK, low(BUSACK_BAR));
        c.set(ControlSignals::BUSRQ, low(BUSRQ_BAR));
        match self.held_select {
            Some(MuxSelect::Reset) => c.set(ControlSignals::RESET, true),
            Some(MuxSelect::Nmi) => c.set(ControlSignals::NMI, true),
            Some(MuxSelect::Irq) => c.set(ControlSignals::IRQ, true),
            _ => {}
        }
        c
    }

    fn set_address(&mut self, addr: u16) {
        self.high_address_set((addr >> 8) as u8);
        self.low_address_set(addr as u8);
    }

    fn increment_low_address(&mut self) {
        self.mux_pulse(MuxSelect::LowAddrClock);
    }

    fn read_address_and_data(&mut self) -> (u16, u8) {
        let high = self.read_high_address();
        self.mux_set(MuxSelect::LowAddrOutputEnable);
        self.port.spin(SETTLE_CYCLES);
        let low = self.pib_read();
        self.mux_clear();
        // Buffer stays enabled until the MREQ/IORQ rising edge
        self.port.set(bit(DATA_DIR_IN));
        self.mux_pulse(MuxSelect::DataOutputEnable);
        self.port.spin(SETTLE_CYCLES);
        let data = self.pib_read();
        (((high as u16) << 8) | low as u16, data)
    }

    fn read_high_address(&mut self) -> u8 {
        self.mux_set(MuxSelect::HighAddrOutputEnable);
        self.port.spin(SETTLE_CYCLES);
        let high = self.pib_read();
        self.mux_clear();
        high
    }

    fn drive_data_byte(&mut self, value: u8) {
        self.port.clear(bit(DATA_DIR_IN));
        self.port.set_pib_output(true);
        self.pib_write(value);
        self.mux_pulse(MuxSelect::DataOutputEnable);
    }

    fn release_data_bus(&mut self) {
        self.port.set_pib_output(false);
        self.port.set(bit(DATA_DIR_IN));
    }

    fn pulse_side_channel(&mut self, select: MuxSelect) {
        self.mux_pulse(select);
    }

    fn set_side_channel(&mut self, select: MuxSelect, active: bool) {
        if active {
            self.held_select = Some(select);
            self.mux_set(select);
        } else {
            if self.held_select == Some(select) {
                self.held_select = None;
            }
            self.mux_clear();
        }
    }

    /// Dropping the enables resets the wait flip-flops.
    fn release_wait(&mut self) {
        self.port.clear(WAIT_EN_MASK);
        self.port.spin(SETTLE_CYCLES);
        self.apply_wait_enables();
    }

    fn set_wait_generation(&mut self, flags: WaitFlags) {
        self.wait_flags = flags;
        self.apply_wait_enables();
    }

    fn set_bus_request(&mut self, active: bool) {
        if active {
            self.port.clear(bit(BUSRQ_BAR));
        } else {
            self.port.set(bit(BUSRQ_BAR));
        }
    }

    fn take_bus(&mut self) {
        self.waits_suspended = true;
        self.apply_wait_enables();
        self.port.set_pib_output(false);
        self.port.set(bit(DATA_DIR_IN) | MASTER_CONTROL_MASK);
        self.port.set_control_output(true);
    }

    fn release_bus(&mut self) {
        self.port.set(MASTER_CONTROL_MASK);
        // A MREQ pulse resets the data-enable flip-flop
        self.port.clear(bit(MREQ_BAR));
        self.port.spin(SETTLE_CYCLES);
        self.port.set(bit(MREQ_BAR));
        self.port.set_pib_output(false);
        self.port.set(bit(DATA_DIR_IN));
        self.mux_clear();
        self.port.clear(WAIT_EN_MASK);
        self.waits_suspended = false;
        self.apply_wait_enables();
        self.port.set_control_output(false);
        self.port.set(bit(BUSRQ_BAR));
    }

    fn master_read(&mut self, space: AccessSpace) -> u8 {
        self.port.set_pib_output(false);
        self.port.set(bit(DATA_DIR_IN));
        self.port.clear(Self::space_pin(space) | bit(RD_BAR));
        self.mux_pulse(MuxSelect::DataOutputEnable);
        self.port.spin(SETTLE_CYCLES);
        let value = self.pib_read();
        self.port.set(bit(RD_BAR));
        self.port.set(Self::space_pin(space));
        value
    }

    fn master_write(&mut self, space: AccessSpace, value: u8) {
        self.port.clear(bit(DATA_DIR_IN));
        self.port.set_pib_output(true);
        self.pib_write(value);
        self.mux_pulse(MuxSelect::DataOutputEnable);
        self.port.clear(Self::space_pin(space));
        self.port.clear(bit(WR_BAR));
        self.port.spin(SETTLE_CYCLES);
        self.port.set(bit(WR_BAR));
        self.port.set(Self::space_pin(space));
        self.port.set_pib_output(false);
        self.port.set(bit(DATA_DIR_IN));
    }

    fn set_paging(&mut self, paged_in: bool) {
        if paged_in {
            self.port.set(bit(PAGING_RAM));
        } else {
            self.port.clear(bit(PAGING_RAM));
        }
    }

    fn micros(&self) -> u64 {
        self.port.micros()
    }

    fn delay_us(&mut self, us: u32) {
        let start = self.port.micros();
        while !is_timeout(self.port.micros(), start, us as u64) {
            self.port.spin(SETTLE_CYCLES);
        }
    }
}
