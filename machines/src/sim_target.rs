//! A target board simulated behind the [`BusSignals`] trait.
//!
//! Every control-line sample advances the simulation by one step: a new
//! processor cycle starts, a released cycle completes, or the processor
//! stays parked in WAIT or BUSACK. Time is virtual: each sample costs one
//! microsecond and each completed cycle adds its T-states at the clock
//! frequency, so every bounded loop in the engine terminates.

use serde::Serialize;

use busraider_core::core::{AccessSpace, BusSignals, ControlSignals, MuxSelect, WaitFlags};

use crate::sim_z80::{BusCycle, CycleKind, SimZ80};

const NS_PER_SAMPLE: u64 = 1_000;

/// Counters kept by the simulated board.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SimStats {
    pub cycles: u64,
    pub waits: u64,
    pub max_wait_us: u64,
    pub master_reads: u64,
    pub master_writes: u64,
    pub resets: u64,
    pub nmis: u64,
    pub int_acks: u64,
    /// Most RESET/NMI/IRQ/BUSRQ lines ever asserted together.
    pub max_concurrent_actions: u32,
}

struct ActiveCycle {
    cycle: BusCycle,
    waiting: bool,
    released: bool,
    wait_started_ns: u64,
}

pub struct SimTarget {
    pub cpu: SimZ80,
    ram: Vec<u8>,
    io: [u8; 256],
    clock_hz: u32,
    time_ns: u64,

    active: Option<ActiveCycle>,
    /// Cycle left showing on the lines after a driven read.
    stuck: Option<ControlSignals>,
    driven: Option<u8>,
    address: u16,
    paged_in: bool,
    wait_flags: WaitFlags,
    bus_request: bool,
    bus_taken: bool,
    reset: bool,
    nmi: bool,
    irq: bool,

    ignore_bus_request: bool,
    stuck_read: bool,
    stats: SimStats,
}

impl SimTarget {
    pub fn new(clock_hz: u32) -> Self {
        Self {
            cpu: SimZ80::new(),
            ram: vec![0; 0x10000],
            io: [0xFF; 256],
            clock_hz: clock_hz.max(1),
            time_ns: 0,
            active: None,
            stuck: None,
            driven: None,
            address: 0,
            paged_in: true,
            wait_flags: WaitFlags::NONE,
            bus_request: false,
            bus_taken: false,
            reset: false,
            nmi: false,
            irq: false,
            ignore_bus_request: false,
            stuck_read: false,
            stats: SimStats::default(),
        }
    }

    /// Copy `data` straight into RAM, bypassing the bus.
    pub fn load(&mut self, addr: u16, data: &[u8]) {
        let start = addr as usize;
        let len = data.len().min(self.ram.len() - start);
        self.ram[start..start + len].copy_from_slice(&data[..len]);
    }

    pub fn ram(&self) -> &[u8] {
        &self.ram
    }

    pub fn io(&self) -> &[u8; 256] {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut [u8; 256] {
        &mut self.io
    }

    pub fn stats(&self) -> &SimStats {
        &self.stats
    }

    pub fn is_paged_in(&self) -> bool {
        self.paged_in
    }

    pub fn wait_flags(&self) -> WaitFlags {
        self.wait_flags
    }

    pub fn is_reset_held(&self) -> bool {
        self.reset
    }

    pub fn is_bus_requested(&self) -> bool {
        self.bus_request
    }

    /// Model a board whose processor never answers BUSRQ.
    pub fn set_ignore_bus_request(&mut self, ignore: bool) {
        self.ignore_bus_request = ignore;
    }

    /// Model MREQ/IORQ staying low after a driven read.
    pub fn set_stuck_read(&mut self, stuck: bool) {
        self.stuck_read = stuck;
    }

    /// The cycle currently parked in WAIT, if any.
    pub fn waiting_cycle(&self) -> Option<BusCycle> {
        self.active
            .as_ref()
            .filter(|a| a.waiting && !a.released)
            .map(|a| a.cycle)
    }

    fn ns_for(&self, t_states: u32) -> u64 {
        t_states as u64 * 1_000_000_000 / self.clock_hz as u64
    }

    fn note_concurrency(&mut self) {
        let active = [self.reset, self.nmi, self.irq, self.bus_request]
            .iter()
            .filter(|&&on| on)
            .count() as u32;
        self.stats.max_concurrent_actions = self.stats.max_concurrent_actions.max(active);
    }

    fn wait_armed(&self, cycle: &BusCycle) -> bool {
        if self.bus_taken {
            return false;
        }
        match cycle.space() {
            AccessSpace::Memory => self.wait_flags.memory,
            AccessSpace::Io => self.wait_flags.io,
        }
    }

    fn memory_read(&self, addr: u16) -> u8 {
        if self.paged_in {
            self.ram[addr as usize]
        } else {
            0xFF
        }
    }

    fn memory_write(&mut self, addr: u16, value: u8) {
        if self.paged_in {
            self.ram[addr as usize] = value;
        }
    }

    /// Byte the processor sees for a read: whatever the board drives,
    /// otherwise the addressed device.
    fn read_value(&self, cycle: &BusCycle) -> u8 {
        if let Some(value) = self.driven {
            return value;
        }
        match cycle.kind {
            CycleKind::OpcodeFetch | CycleKind::MemoryRead => self.memory_read(cycle.addr),
            CycleKind::IoRead => self.io[(cycle.addr & 0xFF) as usize],
            _ => 0xFF,
        }
    }

    fn complete(&mut self, active: ActiveCycle) {
        let cycle = active.cycle;
        let data = if cycle.is_read() {
            self.read_value(&cycle)
        } else {
            match cycle.kind {
                CycleKind::MemoryWrite => self.memory_write(cycle.addr, cycle.data),
                CycleKind::IoWrite => self.io[(cycle.addr & 0xFF) as usize] = cycle.data,
                _ => {}
            }
            cycle.data
        };
        if active.waiting {
            let held_us = self.time_ns.saturating_sub(active.wait_started_ns) / 1_000;
            self.stats.max_wait_us = self.stats.max_wait_us.max(held_us);
        }
        if cycle.kind == CycleKind::InterruptAck {
            self.stats.int_acks += 1;
        }
        if self.stuck_read && cycle.is_read() && self.driven.is_some() {
            self.stuck = Some(cycle.control());
        }
        self.cpu.complete_cycle(data);
        self.stats.cycles += 1;
        self.time_ns += self.ns_for(cycle.t_states);
    }

    /// One simulation step, returning the lines as they now stand.
    fn step(&mut self) -> ControlSignals {
        if let Some(stuck) = self.stuck {
            return stuck;
        }
        if self.reset {
            return ControlSignals::RESET;
        }
        if let Some(active) = self.active.take() {
            if active.waiting && !active.released {
                let ctrl = active.cycle.control() | ControlSignals::WAIT;
                self.active = Some(active);
                return ctrl;
            }
            self.complete(active);
            return self.stuck.unwrap_or_default();
        }
        if self.bus_request && !self.ignore_bus_request {
            return ControlSignals::BUSACK;
        }

        let cycle = self.cpu.next_cycle(self.irq);
        if self.wait_armed(&cycle) {
            self.stats.waits += 1;
            self.active = Some(ActiveCycle {
                cycle,
                waiting: true,
                released: false,
                wait_started_ns: self.time_ns,
            });
            return cycle.control() | ControlSignals::WAIT;
        }
        let ctrl = cycle.control();
        self.complete(ActiveCycle {
            cycle,
            waiting: false,
            released: true,
            wait_started_ns: self.time_ns,
        });
        ctrl
    }

    /// Let the processor run for `samples` steps with nobody servicing WAIT.
    pub fn run_unattended(&mut self, samples: usize) {
        for _ in 0..samples {
            self.sample_control_lines();
            if let Some(active) = self.active.as_mut() {
                active.released = true;
            }
        }
    }

    fn extras(&self) -> ControlSignals {
        let mut extras = ControlSignals::empty();
        extras.set(ControlSignals::NMI, self.nmi);
        extras.set(ControlSignals::IRQ, self.irq);
        extras.set(ControlSignals::BUSRQ, self.bus_request);
        extras
    }
}

impl BusSignals for SimTarget {
    fn sample_control_lines(&mut self) -> ControlSignals {
        self.time_ns += NS_PER_SAMPLE;
        self.step() | self.extras()
    }

    fn set_address(&mut self, addr: u16) {
        self.address = addr;
    }

    fn increment_low_address(&mut self) {
        self.address = (self.address & 0xFF00) | (self.address as u8).wrapping_add(1) as u16;
    }

    fn read_address_and_data(&mut self) -> (u16, u8) {
        match self.active.as_ref() {
            Some(active) => {
                let data = if active.cycle.is_read() {
                    self.driven.unwrap_or(0xFF)
                } else {
                    active.cycle.data
                };
                (active.cycle.addr, data)
            }
            None => (self.address, 0xFF),
        }
    }

    fn read_high_address(&mut self) -> u8 {
        (self.read_address_and_data().0 >> 8) as u8
    }

    fn drive_data_byte(&mut self, value: u8) {
        self.driven = Some(value);
    }

    fn release_data_bus(&mut self) {
        self.driven = None;
        self.stuck = None;
    }

    fn pulse_side_channel(&mut self, select: MuxSelect) {
        self.set_side_channel(select, true);
        self.set_side_channel(select, false);
    }

    fn set_side_channel(&mut self, select: MuxSelect, active: bool) {
        match select {
            MuxSelect::Reset => {
                if active && !self.reset {
                    self.stats.resets += 1;
                    self.active = None;
                    self.driven = None;
                } else if !active && self.reset {
                    self.cpu.reset();
                }
                self.reset = active;
            }
            MuxSelect::Nmi => {
                if active && !self.nmi {
                    self.stats.nmis += 1;
                    self.cpu.trigger_nmi();
                }
                self.nmi = active;
            }
            MuxSelect::Irq => self.irq = active,
            other => log::trace!("side channel {other:?} has no effect on the target"),
        }
        self.note_concurrency();
    }

    fn release_wait(&mut self) {
        if let Some(active) = self.active.as_mut() {
            active.released = true;
        }
    }

    fn set_wait_generation(&mut self, flags: WaitFlags) {
        self.wait_flags = flags;
    }

    fn set_bus_request(&mut self, active: bool) {
        self.bus_request = active;
        self.note_concurrency();
    }

    fn take_bus(&mut self) {
        self.bus_taken = true;
    }

    fn release_bus(&mut self) {
        self.bus_taken = false;
        self.bus_request = false;
    }

    fn master_read(&mut self, space: AccessSpace) -> u8 {
        self.stats.master_reads += 1;
        self.time_ns += NS_PER_SAMPLE;
        match space {
            AccessSpace::Memory => self.memory_read(self.address),
            AccessSpace::Io => self.io[(self.address & 0xFF) as usize],
        }
    }

    fn master_write(&mut self, space: AccessSpace, value: u8) {
        self.stats.master_writes += 1;
        self.time_ns += NS_PER_SAMPLE;
        match space {
            AccessSpace::Memory => self.memory_write(self.address, value),
            AccessSpace::Io => self.io[(self.address & 0xFF) as usize] = value,
        }
    }

    fn set_paging(&mut self, paged_in: bool) {
        self.paged_in = paged_in;
    }

    fn micros(&self) -> u64 {
        self.time_ns / 1_000
    }

    fn delay_us(&mut self, us: u32) {
        self.time_ns += us as u64 * 1_000;
    }
}
