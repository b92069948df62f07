//! Behavioural model of the interface board, for sampler tests.

use super::GpioPort;
use super::pins::*;
use crate::core::bus::{ControlSignals, MuxSelect, WaitFlags};

pub struct FakeBoard {
    out: u32,
    pib_output: bool,
    control_output: bool,
    counter: u8,
    low_out: u8,
    shift: u8,
    high_out: u8,
    oe: bool,
    memory: Vec<u8>,
    cpu_addr: u16,
    cpu_data: u8,
    cpu_control: ControlSignals,
    contention: u32,
    time_us: u64,
}

impl FakeBoard {
    pub fn new() -> Self {
        Self {
            out: 0,
            pib_output: false,
            control_output: false,
            counter: 0,
            low_out: 0,
            shift: 0,
            high_out: 0,
            oe: false,
            memory: vec![0; 0x10000],
            cpu_addr: 0,
            cpu_data: 0xFF,
            cpu_control: ControlSignals::empty(),
            contention: 0,
            time_us: 0,
        }
    }

    /// Present a processor-driven cycle on the bus.
    pub fn processor_cycle(&mut self, addr: u16, data: u8, control: ControlSignals) {
        self.cpu_addr = addr;
        self.cpu_data = data;
        self.cpu_control = control;
    }

    /// MREQ/IORQ rising edge from the processor side.
    pub fn end_processor_cycle(&mut self) {
        self.cpu_control = ControlSignals::empty();
        self.oe = false;
    }

    pub fn latched_address(&self) -> u16 {
        ((self.high_out as u16) << 8) | self.low_out as u16
    }

    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    pub fn contention(&self) -> u32 {
        self.contention
    }

    pub fn paged_in(&self) -> bool {
        self.out & bit(PAGING_RAM) != 0
    }

    pub fn wait_enables(&self) -> WaitFlags {
        WaitFlags {
            memory: self.out & bit(MREQ_WAIT_EN) != 0,
            io: self.out & bit(IORQ_WAIT_EN) != 0,
        }
    }

    /// Selector currently asserted, if the mux is enabled.
    pub fn active_select(&self) -> Option<MuxSelect> {
        self.mux_enabled().then(|| self.select())
    }

    /// Byte the buffer is driving onto the target data bus.
    pub fn target_data(&self) -> Option<u8> {
        (self.oe && self.pib_output && self.out & bit(DATA_DIR_IN) == 0)
            .then_some((self.out >> PIB_LOW) as u8)
    }

    fn mux_enabled(&self) -> bool {
        self.out & bit(MUX_EN_BAR) == 0
    }

    fn select(&self) -> MuxSelect {
        MuxSelect::from_code((self.out & MUX_SEL_MASK) >> MUX_SEL_LOW)
    }

    fn mastering_read(&self) -> bool {
        self.control_output && self.out & bit(MREQ_BAR) == 0 && self.out & bit(RD_BAR) == 0
    }

    fn buffer_inward(&self) -> Option<u8> {
        if !self.oe || self.out & bit(DATA_DIR_IN) == 0 {
            return None;
        }
        if self.mastering_read() {
            Some(self.memory[self.latched_address() as usize])
        } else {
            Some(self.cpu_data)
        }
    }

    fn pib_source(&self) -> Option<u8> {
        if self.mux_enabled() {
            match self.select() {
                MuxSelect::HighAddrOutputEnable => return Some((self.cpu_addr >> 8) as u8),
                MuxSelect::LowAddrOutputEnable => return Some(self.cpu_addr as u8),
                _ => {}
            }
        }
        self.buffer_inward()
    }

    fn check_contention(&mut self) {
        if self.pib_output && self.pib_source().is_some() {
            self.contention += 1;
        }
    }

    fn update(&mut self, old: u32) {
        let new = self.out;
        let rose = |pin: u32| old & bit(pin) == 0 && new & bit(pin) != 0;
        let fell = |pin: u32| old & bit(pin) != 0 && new & bit(pin) == 0;
        let select = self.select();

        if fell(MUX_EN_BAR) {
            match select {
                MuxSelect::LowAddrClear => self.counter = 0,
                MuxSelect::DataOutputEnable => self.oe = true,
                _ => {}
            }
        }
        if rose(MUX_EN_BAR) && select == MuxSelect::LowAddrClock {
            self.low_out = self.counter;
            self.counter = self.counter.wrapping_add(1);
        }
        if rose(HADDR_CK) {
            let serial = !(self.mux_enabled() && select == MuxSelect::LowAddrClear);
            self.high_out = self.shift;
            self.shift = (self.shift << 1) | serial as u8;
        }
        if self.control_output {
            if rose(WR_BAR) && new & bit(MREQ_BAR) == 0 {
                if let Some(value) = self.target_data() {
                    let addr = self.latched_address() as usize;
                    self.memory[addr] = value;
                }
            }
            if rose(MREQ_BAR) || rose(IORQ_BAR) {
                self.oe = false;
            }
        }
        self.check_contention();
    }
}

impl GpioPort for FakeBoard {
    fn levels(&mut self) -> u32 {
        let mut levels = self.out;
        if !self.pib_output {
            levels &= !PIB_MASK;
            levels |= (self.pib_source().unwrap_or(0xFF) as u32) << PIB_LOW;
        }
        levels |= bit(M1_BAR) | bit(WAIT_BAR) | bit(BUSACK_BAR);
        if !self.control_output {
            levels |= MASTER_CONTROL_MASK;
        }

        let c = self.cpu_control;
        let mut low = 0;
        if self.out & bit(BUSRQ_BAR) == 0 {
            low |= bit(BUSACK_BAR);
        }
        if c.m1() {
            low |= bit(M1_BAR);
        }
        if c.wait() {
            low |= bit(WAIT_BAR);
        }
        if !self.control_output {
            for (pin, on) in [
                (MREQ_BAR, c.mreq()),
                (IORQ_BAR, c.iorq()),
                (RD_BAR, c.rd()),
                (WR_BAR, c.wr()),
            ] {
                if on {
                    low |= bit(pin);
                }
            }
        }
        levels & !low
    }

    fn set(&mut self, mask: u32) {
        let old = self.out;
        self.out |= mask;
        self.update(old);
    }

    fn clear(&mut self, mask: u32) {
        let old = self.out;
        self.out &= !mask;
        self.update(old);
    }

    fn set_pib_output(&mut self, output: bool) {
        self.pib_output = output;
        self.check_contention();
    }

    fn set_control_output(&mut self, output: bool) {
        self.control_output = output;
    }

    fn spin(&mut self, _cycles: u32) {
        self.time_us += 1;
    }

    fn micros(&self) -> u64 {
        self.time_us
    }
}
