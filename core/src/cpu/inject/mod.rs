//! Register injection: make the target execute firmware-chosen code by
//! answering its opcode fetches from a fabricated byte stream.
//!
//! The state machines here know nothing about the bus. The arbiter routes
//! every memory cycle to the active [`Injection`] once the first opcode
//! fetch has been answered, and pages the target RAM out meanwhile so the
//! processor's pushes never reach real memory.

pub mod asm;
pub mod get;
pub mod set;

pub use get::{GET_REGISTERS_SEQUENCE, GetRegisters};
pub use set::{SetRegisters, SetSequence, register_snippet};

use crate::core::bus::ControlSignals;
use crate::cpu::regs::Z80Registers;

/// Where an injection is after one bus cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectionProgress {
    /// Armed, no opcode fetch seen yet.
    Waiting,
    Running,
    /// Register get: all values captured, restore tail still to run.
    GrabMemory,
    Done,
}

/// What a finished injection produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InjectionResult {
    Registers(Z80Registers),
    RegistersSet,
}

/// Byte to answer with (reads only) and the resulting progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InjectStep {
    pub response: Option<u8>,
    pub progress: InjectionProgress,
}

#[derive(Clone, Debug)]
pub enum Injection {
    Get(GetRegisters),
    Set(SetRegisters),
}

impl Injection {
    pub fn get() -> Self {
        Self::Get(GetRegisters::new())
    }

    pub fn set(regs: &Z80Registers) -> Self {
        Self::Set(SetRegisters::new(regs))
    }

    fn cursor(&self) -> usize {
        match self {
            Self::Get(g) => g.cursor(),
            Self::Set(s) => s.cursor(),
        }
    }

    /// True once the first opcode fetch has been answered.
    pub fn started(&self) -> bool {
        self.cursor() > 0
    }

    /// Whether this cycle belongs to the injection.
    pub fn claims(&self, control: ControlSignals) -> bool {
        control.mreq() && (self.started() || control.is_opcode_fetch())
    }

    /// Feed one claimed memory cycle.
    pub fn on_access(&mut self, addr: u16, data: u8, control: ControlSignals) -> InjectStep {
        if !self.claims(control) {
            return InjectStep {
                response: None,
                progress: InjectionProgress::Waiting,
            };
        }
        if control.is_write() {
            let progress = match self {
                Self::Get(g) => g.on_write(addr, data),
                Self::Set(s) => s.on_write(addr, data),
            };
            return InjectStep {
                response: None,
                progress,
            };
        }
        let (value, progress) = match self {
            Self::Get(g) => g.on_read(addr),
            Self::Set(s) => s.on_read(addr),
        };
        InjectStep {
            response: Some(value),
            progress,
        }
    }

    pub fn into_result(self) -> InjectionResult {
        match self {
            Self::Get(g) => InjectionResult::Registers(g.registers()),
            Self::Set(_) => InjectionResult::RegistersSet,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FETCH: ControlSignals = ControlSignals::M1
        .union(ControlSignals::MREQ)
        .union(ControlSignals::RD);
    const MEM_READ: ControlSignals = ControlSignals::MREQ.union(ControlSignals::RD);
    const MEM_WRITE: ControlSignals = ControlSignals::MREQ.union(ControlSignals::WR);

    #[test]
    fn waits_for_first_opcode_fetch() {
        let mut inj = Injection::get();
        let step = inj.on_access(0x1000, 0, MEM_READ);
        assert_eq!(step.progress, InjectionProgress::Waiting);
        assert!(!inj.started());

        let step = inj.on_access(0x1000, 0, FETCH);
        assert_eq!(step.response, Some(0xF5));
        assert!(inj.started());
        // stack reads are claimed once started
        assert!(inj.claims(MEM_READ));
    }

    #[test]
    fn io_cycles_are_never_claimed() {
        let inj = Injection::get();
        assert!(!inj.claims(ControlSignals::IORQ | ControlSignals::RD));
        assert!(!inj.claims(ControlSignals::IORQ | ControlSignals::M1));
    }

    #[test]
    fn writes_get_no_response() {
        let mut inj = Injection::get();
        inj.on_access(0x8000, 0, FETCH);
        let step = inj.on_access(0x7FFF, 0xAB, MEM_WRITE);
        assert_eq!(step.response, None);
        match inj.into_result() {
            InjectionResult::Registers(r) => {
                assert_eq!(r.sp, 0x8000);
                assert_eq!(r.a(), 0xAB);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
