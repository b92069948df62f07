//! One engine instance over a simulated target, with the sockets the
//! command line needs.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, bail};
use busraider_core::prelude::*;
use busraider_machines::{SimTarget, TargetProfile};

/// Simulated microseconds allowed for any one command to finish.
const COMMAND_TIMEOUT_US: u64 = 2_000_000;

/// Records every completion report it is shown.
struct ReportLog(Rc<RefCell<Vec<ActionReport>>>);

impl SocketHandler for ReportLog {
    fn action_complete(&mut self, report: &ActionReport, _ctx: &mut ActionContext<'_>) {
        self.0.borrow_mut().push(*report);
    }
}

pub struct Session {
    pub arbiter: BusArbiter<SimTarget>,
    pub profile: &'static TargetProfile,
    console: SocketId,
    reports: Rc<RefCell<Vec<ActionReport>>>,
    programmer: Rc<RefCell<TargetProgrammer>>,
}

impl Session {
    pub fn new(profile: &'static TargetProfile, timing: TimingConfig) -> anyhow::Result<Self> {
        let target = SimTarget::new(profile.clock_hz);
        let mut arbiter = BusArbiter::new(target, profile, timing);
        let reports = Rc::new(RefCell::new(Vec::new()));
        let console = arbiter.register(SocketConfig::new(), ReportLog(Rc::clone(&reports)))?;
        let programmer = TargetProgrammer::attach(&mut arbiter, profile.set_regs_code_addr)?;
        log::info!("session on {} at {} Hz", profile.name, profile.clock_hz);
        Ok(Self {
            arbiter,
            profile,
            console,
            reports,
            programmer,
        })
    }

    fn now(&self) -> u64 {
        self.arbiter.bus().micros()
    }

    /// Service the engine until `done` yields a value.
    fn run_until<T>(
        &mut self,
        what: &str,
        mut done: impl FnMut(&mut Self) -> Option<T>,
    ) -> anyhow::Result<T> {
        let start = self.now();
        loop {
            if let Some(value) = done(self) {
                return Ok(value);
            }
            if self.now().saturating_sub(start) > COMMAND_TIMEOUT_US {
                bail!("timed out waiting for {what}");
            }
            self.arbiter.service();
        }
    }

    /// Let the target run for `us` simulated microseconds.
    pub fn run_for(&mut self, us: u64) {
        let start = self.now();
        while self.now().saturating_sub(start) < us {
            self.arbiter.service();
        }
    }

    pub fn program(
        &mut self,
        addr: u16,
        data: &[u8],
        exec: bool,
        regs: Option<Z80Registers>,
    ) -> anyhow::Result<()> {
        {
            let mut programmer = self.programmer.borrow_mut();
            programmer.add_block(addr, data)?;
            if let Some(regs) = regs {
                programmer.image_mut().set_registers(regs);
            }
            programmer.start_programming(&mut self.arbiter, exec, false)?;
        }
        let result = self.run_until("programming", |s| s.programmer.borrow().last_result())?;
        result.context("programming target")?;
        Ok(())
    }

    pub fn peek(&mut self, addr: u16, len: usize, space: AccessSpace) -> anyhow::Result<Vec<u8>> {
        Ok(self.arbiter.block_read(addr, len, space)?)
    }

    pub fn poke(&mut self, addr: u16, data: &[u8]) -> anyhow::Result<()> {
        self.arbiter.block_write(addr, data, AccessSpace::Memory)?;
        Ok(())
    }

    pub fn registers(&mut self) -> anyhow::Result<Z80Registers> {
        self.arbiter.start_register_get()?;
        self.run_until("register get", |s| match s.arbiter.take_injection_result() {
            Some(InjectionResult::Registers(regs)) => Some(regs),
            _ => None,
        })
    }

    /// Request a RESET, NMI or IRQ and wait for its report.
    pub fn pulse(&mut self, kind: ActionKind) -> anyhow::Result<ActionOutcome> {
        self.reports.borrow_mut().clear();
        let console = self.console;
        match kind {
            ActionKind::Reset => self.arbiter.request_reset(console, None)?,
            ActionKind::Nmi => self.arbiter.request_nmi(console, None)?,
            ActionKind::Irq => self.arbiter.request_irq(console, None)?,
            ActionKind::BusRequest => {
                self.arbiter
                    .request_bus_master(console, ActionReason::General)?
            }
        }
        let report = self.run_until("action report", |s| {
            s.reports
                .borrow()
                .iter()
                .find(|r| r.is_for(console) && r.kind == kind)
                .copied()
        })?;
        Ok(report.outcome)
    }
}
