//! A small Z80 that runs one bus cycle at a time.
//!
//! The target board model asks for the next cycle, presents it on the bus
//! (possibly holding it in WAIT for a long time), then completes it with
//! the byte that was on the data bus. Only the instructions used by the
//! injection streams, the start-of-program snippet and simple test programs
//! are decoded; anything else executes as a NOP.

use std::collections::VecDeque;

use busraider_core::core::{AccessSpace, ControlSignals};
use busraider_core::cpu::Z80Registers;

#[repr(u8)]
#[derive(Copy, Clone, Debug)]
pub enum Flag {
    C = 0x01,
    N = 0x02,
    PV = 0x04,
    H = 0x10,
    Z = 0x40,
    S = 0x80,
}

/// Kind of machine cycle, as seen on the control lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleKind {
    OpcodeFetch,
    MemoryRead,
    MemoryWrite,
    IoRead,
    IoWrite,
    InterruptAck,
}

/// One machine cycle requested by the processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BusCycle {
    pub kind: CycleKind,
    pub addr: u16,
    /// Byte driven by the processor; only meaningful for writes.
    pub data: u8,
    pub t_states: u32,
}

impl BusCycle {
    pub fn control(&self) -> ControlSignals {
        match self.kind {
            CycleKind::OpcodeFetch => ControlSignals::M1 | ControlSignals::MREQ | ControlSignals::RD,
            CycleKind::MemoryRead => ControlSignals::MREQ | ControlSignals::RD,
            CycleKind::MemoryWrite => ControlSignals::MREQ | ControlSignals::WR,
            CycleKind::IoRead => ControlSignals::IORQ | ControlSignals::RD,
            CycleKind::IoWrite => ControlSignals::IORQ | ControlSignals::WR,
            CycleKind::InterruptAck => ControlSignals::M1 | ControlSignals::IORQ,
        }
    }

    pub fn space(&self) -> AccessSpace {
        match self.kind {
            CycleKind::OpcodeFetch | CycleKind::MemoryRead | CycleKind::MemoryWrite => {
                AccessSpace::Memory
            }
            _ => AccessSpace::Io,
        }
    }

    pub fn is_read(&self) -> bool {
        !matches!(self.kind, CycleKind::MemoryWrite | CycleKind::IoWrite)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Prefix {
    None,
    Cb,
    Dd,
    Ed,
    Fd,
}

/// Destination of a data read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Dest {
    A,
    PcLow,
    PcHigh,
    Low(Pair),
    High(Pair),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Pair {
    Bc,
    De,
    Hl,
    Af,
    Ix,
    Iy,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum MicroOp {
    Fetch,
    Operand,
    /// Decode point, no bus cycle.
    Execute,
    Read(u16, Dest),
    Write(u16, u8),
    IoRead(u16, Dest),
    IoWrite(u16, u8),
    /// IM 2 vector fetch follows the pushes.
    IntAck { im2: bool },
}

pub struct SimZ80 {
    pub a: u8,
    pub f: u8,
    pub b: u8,
    pub c: u8,
    pub d: u8,
    pub e: u8,
    pub h: u8,
    pub l: u8,
    pub a_prime: u8,
    pub f_prime: u8,
    pub b_prime: u8,
    pub c_prime: u8,
    pub d_prime: u8,
    pub e_prime: u8,
    pub h_prime: u8,
    pub l_prime: u8,
    pub ix: u16,
    pub iy: u16,
    pub i: u8,
    pub r: u8,
    pub sp: u16,
    pub pc: u16,
    pub iff1: bool,
    pub iff2: bool,
    pub im: u8,
    pub halted: bool,

    ei_delay: bool,
    nmi_latched: bool,
    prefix: Prefix,
    opcode: u8,
    operands: Vec<u8>,
    queue: VecDeque<MicroOp>,
    instructions: u64,
}

impl Default for SimZ80 {
    fn default() -> Self {
        Self::new()
    }
}

impl SimZ80 {
    pub fn new() -> Self {
        Self {
            a: 0xFF,
            f: 0xFF,
            b: 0xFF,
            c: 0xFF,
            d: 0xFF,
            e: 0xFF,
            h: 0xFF,
            l: 0xFF,
            a_prime: 0xFF,
            f_prime: 0xFF,
            b_prime: 0xFF,
            c_prime: 0xFF,
            d_prime: 0xFF,
            e_prime: 0xFF,
            h_prime: 0xFF,
            l_prime: 0xFF,
            ix: 0xFFFF,
            iy: 0xFFFF,
            i: 0,
            r: 0,
            sp: 0xFFFF,
            pc: 0x0000,
            iff1: false,
            iff2: false,
            im: 0,
            halted: false,
            ei_delay: false,
            nmi_latched: false,
            prefix: Prefix::None,
            opcode: 0,
            operands: Vec::with_capacity(2),
            queue: VecDeque::new(),
            instructions: 0,
        }
    }

    /// /RESET released: PC, I, R and the interrupt state are cleared.
    pub fn reset(&mut self) {
        self.pc = 0;
        self.i = 0;
        self.r = 0;
        self.im = 0;
        self.iff1 = false;
        self.iff2 = false;
        self.halted = false;
        self.ei_delay = false;
        self.nmi_latched = false;
        self.prefix = Prefix::None;
        self.operands.clear();
        self.queue.clear();
    }

    /// Falling edge on /NMI. Taken at the next instruction boundary.
    pub fn trigger_nmi(&mut self) {
        self.nmi_latched = true;
    }

    pub fn instructions(&self) -> u64 {
        self.instructions
    }

    /// True between instructions, when no cycle of the current one remains.
    pub fn at_boundary(&self) -> bool {
        self.queue.is_empty()
    }

    // Helpers for 16-bit register access
    pub fn get_bc(&self) -> u16 { ((self.b as u16) << 8) | self.c as u16 }
    pub fn set_bc(&mut self, val: u16) { self.b = (val >> 8) as u8; self.c = val as u8; }

    pub fn get_de(&self) -> u16 { ((self.d as u16) << 8) | self.e as u16 }
    pub fn set_de(&mut self, val: u16) { self.d = (val >> 8) as u8; self.e = val as u8; }

    pub fn get_hl(&self) -> u16 { ((self.h as u16) << 8) | self.l as u16 }
    pub fn set_hl(&mut self, val: u16) { self.h = (val >> 8) as u8; self.l = val as u8; }

    pub fn get_af(&self) -> u16 { ((self.a as u16) << 8) | self.f as u16 }
    pub fn set_af(&mut self, val: u16) { self.a = (val >> 8) as u8; self.f = val as u8; }

    fn pair(&self, pair: Pair) -> u16 {
        match pair {
            Pair::Bc => self.get_bc(),
            Pair::De => self.get_de(),
            Pair::Hl => self.get_hl(),
            Pair::Af => self.get_af(),
            Pair::Ix => self.ix,
            Pair::Iy => self.iy,
        }
    }

    fn set_pair(&mut self, pair: Pair, val: u16) {
        match pair {
            Pair::Bc => self.set_bc(val),
            Pair::De => self.set_de(val),
            Pair::Hl => self.set_hl(val),
            Pair::Af => self.set_af(val),
            Pair::Ix => self.ix = val,
            Pair::Iy => self.iy = val,
        }
    }

    /// HL, or IX/IY under a DD/FD prefix.
    fn index_pair(&self) -> Pair {
        match self.prefix {
            Prefix::Dd => Pair::Ix,
            Prefix::Fd => Pair::Iy,
            _ => Pair::Hl,
        }
    }

    pub fn registers(&self) -> Z80Registers {
        Z80Registers {
            pc: self.pc,
            sp: self.sp,
            af: self.get_af(),
            bc: self.get_bc(),
            de: self.get_de(),
            hl: self.get_hl(),
            af_alt: ((self.a_prime as u16) << 8) | self.f_prime as u16,
            bc_alt: ((self.b_prime as u16) << 8) | self.c_prime as u16,
            de_alt: ((self.d_prime as u16) << 8) | self.e_prime as u16,
            hl_alt: ((self.h_prime as u16) << 8) | self.l_prime as u16,
            ix: self.ix,
            iy: self.iy,
            i: self.i,
            r: self.r,
            int_mode: Some(self.im),
            int_enabled: Some(self.iff1),
        }
    }

    /// The next machine cycle. Asking again before completing returns the
    /// same cycle.
    pub fn next_cycle(&mut self, irq: bool) -> BusCycle {
        if self.queue.is_empty() {
            self.start_instruction(irq);
        }
        self.settle();
        let op = self.queue.front().copied().unwrap_or(MicroOp::Fetch);
        self.cycle_for(op)
    }

    fn cycle_for(&self, op: MicroOp) -> BusCycle {
        let (kind, addr, data, t_states) = match op {
            MicroOp::Fetch | MicroOp::Execute => (CycleKind::OpcodeFetch, self.pc, 0xFF, 4),
            MicroOp::Operand => (CycleKind::MemoryRead, self.pc, 0xFF, 3),
            MicroOp::Read(addr, _) => (CycleKind::MemoryRead, addr, 0xFF, 3),
            MicroOp::Write(addr, data) => (CycleKind::MemoryWrite, addr, data, 3),
            MicroOp::IoRead(port, _) => (CycleKind::IoRead, port, 0xFF, 4),
            MicroOp::IoWrite(port, data) => (CycleKind::IoWrite, port, data, 4),
            MicroOp::IntAck { .. } => (CycleKind::InterruptAck, self.pc, 0xFF, 6),
        };
        BusCycle {
            kind,
            addr,
            data,
            t_states,
        }
    }

    /// Finish the current cycle with the byte seen on the data bus.
    pub fn complete_cycle(&mut self, data: u8) {
        let Some(op) = self.queue.pop_front() else {
            return;
        };
        match op {
            MicroOp::Fetch => self.on_fetch(data),
            MicroOp::Operand => {
                self.operands.push(data);
                self.pc = self.pc.wrapping_add(1);
            }
            MicroOp::Read(_, dest) | MicroOp::IoRead(_, dest) => self.store(dest, data),
            MicroOp::Write(..) | MicroOp::IoWrite(..) | MicroOp::Execute => {}
            MicroOp::IntAck { im2 } => {
                self.refresh();
                self.push_pc();
                if im2 {
                    let table = ((self.i as u16) << 8) | (data & 0xFE) as u16;
                    self.queue.push_back(MicroOp::Read(table, Dest::PcLow));
                    self.queue.push_back(MicroOp::Read(table.wrapping_add(1), Dest::PcHigh));
                } else {
                    self.pc = 0x0038;
                }
            }
        }
        self.settle();
    }

    /// Run any decode points at the front of the queue.
    fn settle(&mut self) {
        while self.queue.front() == Some(&MicroOp::Execute) {
            self.queue.pop_front();
            self.execute();
        }
    }

    fn refresh(&mut self) {
        self.r = (self.r & 0x80) | (self.r.wrapping_add(1) & 0x7F);
    }

    fn start_instruction(&mut self, irq: bool) {
        self.prefix = Prefix::None;
        self.operands.clear();
        if self.ei_delay {
            self.ei_delay = false;
        } else if self.nmi_latched {
            self.nmi_latched = false;
            self.halted = false;
            self.iff2 = self.iff1;
            self.iff1 = false;
            self.refresh();
            self.push_pc();
            self.pc = 0x0066;
            return;
        } else if irq && self.iff1 {
            self.halted = false;
            self.iff1 = false;
            self.iff2 = false;
            self.queue.push_back(MicroOp::IntAck { im2: self.im == 2 });
            return;
        }
        self.queue.push_back(MicroOp::Fetch);
    }

    fn on_fetch(&mut self, opcode: u8) {
        self.refresh();
        if self.halted {
            // HALT executes NOPs until an interrupt
            return;
        }
        self.pc = self.pc.wrapping_add(1);
        if self.prefix == Prefix::None {
            let prefix = match opcode {
                0xCB => Prefix::Cb,
                0xDD => Prefix::Dd,
                0xED => Prefix::Ed,
                0xFD => Prefix::Fd,
                _ => Prefix::None,
            };
            if prefix != Prefix::None {
                self.prefix = prefix;
                self.queue.push_front(MicroOp::Fetch);
                return;
            }
        }
        self.opcode = opcode;
        self.queue.push_front(MicroOp::Execute);
        for _ in 0..self.operand_count() {
            self.queue.push_front(MicroOp::Operand);
        }
    }

    fn operand_count(&self) -> usize {
        if matches!(self.prefix, Prefix::Ed | Prefix::Cb) {
            return 0;
        }
        match self.opcode {
            0x01 | 0x11 | 0x21 | 0x31 | 0x32 | 0x3A | 0xC3 | 0xCD => 2,
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E | 0x10 | 0x18 | 0x20 | 0x28 | 0xD3
            | 0xDB => 1,
            _ => 0,
        }
    }

    fn operand16(&self) -> u16 {
        let lo = self.operands.first().copied().unwrap_or(0) as u16;
        let hi = self.operands.get(1).copied().unwrap_or(0) as u16;
        (hi << 8) | lo
    }

    fn store(&mut self, dest: Dest, data: u8) {
        match dest {
            Dest::A => self.a = data,
            Dest::PcLow => self.pc = (self.pc & 0xFF00) | data as u16,
            Dest::PcHigh => self.pc = (self.pc & 0x00FF) | ((data as u16) << 8),
            Dest::Low(pair) => {
                let v = self.pair(pair);
                self.set_pair(pair, (v & 0xFF00) | data as u16);
            }
            Dest::High(pair) => {
                let v = self.pair(pair);
                self.set_pair(pair, (v & 0x00FF) | ((data as u16) << 8));
            }
        }
    }

    /// PUSH writes the high byte first, at SP-1.
    fn push(&mut self, value: u16) {
        self.sp = self.sp.wrapping_sub(1);
        self.queue.push_back(MicroOp::Write(self.sp, (value >> 8) as u8));
        self.sp = self.sp.wrapping_sub(1);
        self.queue.push_back(MicroOp::Write(self.sp, value as u8));
    }

    fn push_pc(&mut self) {
        self.push(self.pc);
    }

    fn pop(&mut self, low: Dest, high: Dest) {
        self.queue.push_back(MicroOp::Read(self.sp, low));
        self.sp = self.sp.wrapping_add(1);
        self.queue.push_back(MicroOp::Read(self.sp, high));
        self.sp = self.sp.wrapping_add(1);
    }

    fn jump_relative(&mut self) {
        let offset = self.operands.first().copied().unwrap_or(0) as i8;
        self.pc = self.pc.wrapping_add(offset as i16 as u16);
    }

    fn set_reg8(&mut self, index: u8, val: u8) {
        match index {
            0 => self.b = val,
            1 => self.c = val,
            2 => self.d = val,
            3 => self.e = val,
            4 => self.h = val,
            5 => self.l = val,
            7 => self.a = val,
            _ => {}
        }
    }

    fn inc8(&mut self, val: u8) -> u8 {
        let result = val.wrapping_add(1);
        let mut f = self.f & Flag::C as u8;
        if result == 0 {
            f |= Flag::Z as u8;
        }
        if result & 0x80 != 0 {
            f |= Flag::S as u8;
        }
        if val & 0x0F == 0x0F {
            f |= Flag::H as u8;
        }
        if val == 0x7F {
            f |= Flag::PV as u8;
        }
        self.f = f;
        result
    }

    fn dec8(&mut self, val: u8) -> u8 {
        let result = val.wrapping_sub(1);
        let mut f = (self.f & Flag::C as u8) | Flag::N as u8;
        if result == 0 {
            f |= Flag::Z as u8;
        }
        if result & 0x80 != 0 {
            f |= Flag::S as u8;
        }
        if val & 0x0F == 0 {
            f |= Flag::H as u8;
        }
        if val == 0x80 {
            f |= Flag::PV as u8;
        }
        self.f = f;
        result
    }

    fn execute(&mut self) {
        self.instructions += 1;
        match self.prefix {
            Prefix::Ed => self.execute_ed(),
            Prefix::Cb => log::trace!("unsupported CB {:02x} at {:04x}", self.opcode, self.pc),
            _ => self.execute_main(),
        }
    }

    fn execute_main(&mut self) {
        let op = self.opcode;
        let nn = self.operand16();
        let n = self.operands.first().copied().unwrap_or(0);
        match op {
            0x00 => {}
            // LD rr,nn
            0x01 => self.set_bc(nn),
            0x11 => self.set_de(nn),
            0x21 => self.set_pair(self.index_pair(), nn),
            0x31 => self.sp = nn,
            0x02 => self.queue.push_back(MicroOp::Write(self.get_bc(), self.a)),
            0x12 => self.queue.push_back(MicroOp::Write(self.get_de(), self.a)),
            0x0A => self.queue.push_back(MicroOp::Read(self.get_bc(), Dest::A)),
            0x1A => self.queue.push_back(MicroOp::Read(self.get_de(), Dest::A)),
            0x32 => self.queue.push_back(MicroOp::Write(nn, self.a)),
            0x3A => self.queue.push_back(MicroOp::Read(nn, Dest::A)),
            0x77 => self.queue.push_back(MicroOp::Write(self.get_hl(), self.a)),
            0x7E => self.queue.push_back(MicroOp::Read(self.get_hl(), Dest::A)),
            // LD r,n
            0x06 | 0x0E | 0x16 | 0x1E | 0x26 | 0x2E | 0x3E => self.set_reg8((op >> 3) & 7, n),
            0x23 => {
                let pair = self.index_pair();
                self.set_pair(pair, self.pair(pair).wrapping_add(1));
            }
            0x33 => self.sp = self.sp.wrapping_add(1),
            0x3B => self.sp = self.sp.wrapping_sub(1),
            0x3C => self.a = self.inc8(self.a),
            0x3D => self.a = self.dec8(self.a),
            0x04 => self.b = self.inc8(self.b),
            0x05 => self.b = self.dec8(self.b),
            0x08 => {
                std::mem::swap(&mut self.a, &mut self.a_prime);
                std::mem::swap(&mut self.f, &mut self.f_prime);
            }
            0xD9 => {
                std::mem::swap(&mut self.b, &mut self.b_prime);
                std::mem::swap(&mut self.c, &mut self.c_prime);
                std::mem::swap(&mut self.d, &mut self.d_prime);
                std::mem::swap(&mut self.e, &mut self.e_prime);
                std::mem::swap(&mut self.h, &mut self.h_prime);
                std::mem::swap(&mut self.l, &mut self.l_prime);
            }
            0x10 => {
                self.b = self.b.wrapping_sub(1);
                if self.b != 0 {
                    self.jump_relative();
                }
            }
            0x18 => self.jump_relative(),
            0x20 => {
                if self.f & Flag::Z as u8 == 0 {
                    self.jump_relative();
                }
            }
            0x28 => {
                if self.f & Flag::Z as u8 != 0 {
                    self.jump_relative();
                }
            }
            0x76 => self.halted = true,
            0xC3 => self.pc = nn,
            0xCD => {
                self.push_pc();
                self.pc = nn;
            }
            0xC9 => self.pop(Dest::PcLow, Dest::PcHigh),
            0xC5 => self.push(self.get_bc()),
            0xD5 => self.push(self.get_de()),
            0xE5 => self.push(self.pair(self.index_pair())),
            0xF5 => self.push(self.get_af()),
            0xC1 => self.pop(Dest::Low(Pair::Bc), Dest::High(Pair::Bc)),
            0xD1 => self.pop(Dest::Low(Pair::De), Dest::High(Pair::De)),
            0xE1 => {
                let pair = self.index_pair();
                self.pop(Dest::Low(pair), Dest::High(pair));
            }
            0xF1 => self.pop(Dest::Low(Pair::Af), Dest::High(Pair::Af)),
            0xD3 => {
                let port = ((self.a as u16) << 8) | n as u16;
                self.queue.push_back(MicroOp::IoWrite(port, self.a));
            }
            0xDB => {
                let port = ((self.a as u16) << 8) | n as u16;
                self.queue.push_back(MicroOp::IoRead(port, Dest::A));
            }
            0xF3 => {
                self.iff1 = false;
                self.iff2 = false;
            }
            0xFB => {
                self.iff1 = true;
                self.iff2 = true;
                self.ei_delay = true;
            }
            0xFF => {
                self.push_pc();
                self.pc = 0x0038;
            }
            _ => log::trace!("unsupported opcode {op:02x} at {:04x}", self.pc),
        }
    }

    fn execute_ed(&mut self) {
        match self.opcode {
            0x47 => self.i = self.a,
            0x4F => self.r = self.a,
            0x57 => self.a = self.i,
            0x5F => self.a = self.r,
            0x46 | 0x66 => self.im = 0,
            0x56 | 0x76 => self.im = 1,
            0x5E | 0x7E => self.im = 2,
            0x45 => {
                self.iff1 = self.iff2;
                self.pop(Dest::PcLow, Dest::PcHigh);
            }
            0x4D => self.pop(Dest::PcLow, Dest::PcHigh),
            op => log::trace!("unsupported ED {op:02x} at {:04x}", self.pc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Run against a flat memory with every cycle completed immediately.
    fn run(cpu: &mut SimZ80, mem: &mut [u8], cycles: usize) -> Vec<BusCycle> {
        let mut trace = Vec::new();
        for _ in 0..cycles {
            let cycle = cpu.next_cycle(false);
            let data = match cycle.kind {
                CycleKind::MemoryWrite => {
                    mem[cycle.addr as usize] = cycle.data;
                    cycle.data
                }
                CycleKind::IoWrite | CycleKind::IoRead | CycleKind::InterruptAck => 0xFF,
                _ => mem[cycle.addr as usize],
            };
            cpu.complete_cycle(data);
            trace.push(cycle);
        }
        trace
    }

    fn memory_with(code: &[u8]) -> Vec<u8> {
        let mut mem = vec![0; 0x10000];
        mem[..code.len()].copy_from_slice(code);
        mem
    }

    // ---- Cycles ----

    #[test]
    fn prefixed_fetch_is_two_m1_cycles() {
        let mut cpu = SimZ80::new();
        let mut mem = memory_with(&[0xDD, 0x21, 0x34, 0x12]);
        let trace = run(&mut cpu, &mut mem, 4);
        let kinds: Vec<_> = trace.iter().map(|c| c.kind).collect();
        assert_eq!(
            kinds,
            [
                CycleKind::OpcodeFetch,
                CycleKind::OpcodeFetch,
                CycleKind::MemoryRead,
                CycleKind::MemoryRead
            ]
        );
        assert_eq!(cpu.ix, 0x1234);
        assert_eq!(cpu.r, 2);
    }

    #[test]
    fn push_writes_high_byte_first() {
        let mut cpu = SimZ80::new();
        let mut mem = memory_with(&[0x31, 0x00, 0x80, 0x01, 0xCD, 0xAB, 0xC5]);
        let trace = run(&mut cpu, &mut mem, 3 + 3 + 1 + 2);
        assert_eq!(trace[7].kind, CycleKind::MemoryWrite);
        assert_eq!((trace[7].addr, trace[7].data), (0x7FFF, 0xAB));
        assert_eq!((trace[8].addr, trace[8].data), (0x7FFE, 0xCD));
        assert_eq!(cpu.sp, 0x7FFE);
    }

    #[test]
    fn call_and_ret_round_trip() {
        let mut cpu = SimZ80::new();
        // 0000: LD SP,8000; CALL 0010; JR $
        let mut mem = memory_with(&[0x31, 0x00, 0x80, 0xCD, 0x10, 0x00, 0x18, 0xFE]);
        mem[0x10] = 0x3C; // INC A
        mem[0x11] = 0xC9; // RET
        cpu.a = 0;
        run(&mut cpu, &mut mem, 3 + 5 + 1 + 3);
        assert_eq!(cpu.a, 1);
        assert_eq!(cpu.pc, 0x0006);
        assert_eq!(cpu.sp, 0x8000);
    }

    #[test]
    fn r_keeps_bit_seven() {
        let mut cpu = SimZ80::new();
        cpu.r = 0xFF;
        let mut mem = memory_with(&[0x00]);
        run(&mut cpu, &mut mem, 1);
        assert_eq!(cpu.r, 0x80);
    }

    #[test]
    fn ld_a_r_sees_both_refreshes() {
        let mut cpu = SimZ80::new();
        cpu.r = 0x10;
        let mut mem = memory_with(&[0xED, 0x5F]);
        run(&mut cpu, &mut mem, 2);
        assert_eq!(cpu.a, 0x12);
    }

    // ---- Interrupts ----

    #[test]
    fn im1_interrupt_acknowledged_and_vectored() {
        let mut cpu = SimZ80::new();
        // LD SP,8000; IM 1; EI; JR $
        let mut mem = memory_with(&[0x31, 0x00, 0x80, 0xED, 0x56, 0xFB, 0x18, 0xFE]);
        run(&mut cpu, &mut mem, 3 + 2 + 1 + 2);
        let ack = cpu.next_cycle(true);
        assert_eq!(ack.kind, CycleKind::InterruptAck);
        assert!(ack.control().is_int_ack());
        cpu.complete_cycle(0xFF);
        run(&mut cpu, &mut mem, 2);
        assert_eq!(cpu.pc, 0x0038);
        assert!(!cpu.iff1);
        assert_eq!(mem[0x7FFF], 0x00);
        assert_eq!(mem[0x7FFE], 0x06);
    }

    #[test]
    fn interrupt_not_taken_directly_after_ei() {
        let mut cpu = SimZ80::new();
        let mut mem = memory_with(&[0xFB, 0x00]);
        run(&mut cpu, &mut mem, 1);
        assert_eq!(cpu.next_cycle(true).kind, CycleKind::OpcodeFetch);
    }

    #[test]
    fn im2_reads_vector_table() {
        let mut cpu = SimZ80::new();
        let mut mem = vec![0; 0x10000];
        cpu.im = 2;
        cpu.i = 0x40;
        cpu.iff1 = true;
        cpu.sp = 0x8000;
        mem[0x4010] = 0x34;
        mem[0x4011] = 0x12;
        let ack = cpu.next_cycle(true);
        assert_eq!(ack.kind, CycleKind::InterruptAck);
        cpu.complete_cycle(0x10);
        run(&mut cpu, &mut mem, 4);
        assert_eq!(cpu.pc, 0x1234);
    }

    #[test]
    fn nmi_is_taken_once() {
        let mut cpu = SimZ80::new();
        cpu.sp = 0x8000;
        let mut mem = vec![0; 0x10000];
        cpu.trigger_nmi();
        run(&mut cpu, &mut mem, 2);
        assert_eq!(cpu.pc, 0x0066);
        run(&mut cpu, &mut mem, 1);
        assert_eq!(cpu.pc, 0x0067);
    }

    #[test]
    fn halt_refetches_until_interrupt() {
        let mut cpu = SimZ80::new();
        let mut mem = memory_with(&[0x76, 0x00]);
        let trace = run(&mut cpu, &mut mem, 3);
        assert!(cpu.halted);
        assert_eq!(cpu.pc, 1);
        assert_eq!(trace[2].addr, 1);
    }

    #[test]
    fn reset_clears_state() {
        let mut cpu = SimZ80::new();
        cpu.pc = 0x1234;
        cpu.iff1 = true;
        cpu.im = 2;
        cpu.reset();
        assert_eq!(cpu.pc, 0);
        assert!(!cpu.iff1);
        assert_eq!(cpu.im, 0);
        assert!(cpu.at_boundary());
    }
}
