//! Target programming: accumulate an image, then write it in one bus grant
//! and optionally start it with chosen registers.

mod image;

pub use image::{ImageBlock, MAX_IMAGE_BLOCKS, MemoryImage};

use std::cell::RefCell;
use std::rc::Rc;

use crate::arbiter::BusArbiter;
use crate::core::bus::{AccessSpace, BusSignals};
use crate::cpu::inject::register_snippet;
use crate::error::BusError;
use crate::socket::{
    ActionContext, ActionKind, ActionOutcome, ActionReason, ActionReport, SocketConfig,
    SocketHandler, SocketId, SocketRequest,
};

/// `JP nn` opcode written at the reset vector.
const JP: u8 = 0xC3;
const RESET_VECTOR: u16 = 0x0000;
const JP_LEN: u16 = 3;

pub struct TargetProgrammer {
    image: MemoryImage,
    id: Option<SocketId>,
    snippet_addr: u16,
    exec_after: bool,
    enter_debug: bool,
    /// Debug arming deferred until the reset that starts the program ends.
    debug_after_reset: bool,
    in_progress: bool,
    last_result: Option<Result<(), BusError>>,
}

impl TargetProgrammer {
    fn new(snippet_addr: u16) -> Self {
        Self {
            image: MemoryImage::new(),
            id: None,
            snippet_addr,
            exec_after: false,
            enter_debug: false,
            debug_after_reset: false,
            in_progress: false,
            last_result: None,
        }
    }

    /// Create a programmer and register it as a socket. `snippet_addr` is
    /// where the register-setting code goes when starting with registers.
    /// It is either the reset vector itself or clear of the 3-byte jump
    /// written there.
    pub fn attach<B: BusSignals>(
        arbiter: &mut BusArbiter<B>,
        snippet_addr: u16,
    ) -> Result<Rc<RefCell<Self>>, BusError> {
        if snippet_addr != RESET_VECTOR && snippet_addr < RESET_VECTOR + JP_LEN {
            return Err(BusError::SnippetOverlapsVector(snippet_addr));
        }
        let programmer = Rc::new(RefCell::new(Self::new(snippet_addr)));
        let id = arbiter.register(SocketConfig::new(), Rc::clone(&programmer))?;
        programmer.borrow_mut().id = Some(id);
        Ok(programmer)
    }

    pub fn id(&self) -> Option<SocketId> {
        self.id
    }

    pub fn image(&self) -> &MemoryImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut MemoryImage {
        &mut self.image
    }

    pub fn add_block(&mut self, addr: u16, data: &[u8]) -> Result<(), BusError> {
        self.image.add_block(addr, data)
    }

    pub fn is_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Outcome of the last programming run, once it has finished.
    pub fn last_result(&self) -> Option<Result<(), BusError>> {
        self.last_result
    }

    /// Ask for the bus. The image is written when the grant arrives.
    pub fn start_programming<B: BusSignals>(
        &mut self,
        arbiter: &mut BusArbiter<B>,
        exec_after: bool,
        enter_debug: bool,
    ) -> Result<(), BusError> {
        let id = self.id.ok_or(BusError::NotAttached)?;
        if self.in_progress {
            return Err(BusError::AlreadyInProgress);
        }
        arbiter.request_bus_master(id, ActionReason::Programming)?;
        self.exec_after = exec_after;
        self.enter_debug = enter_debug;
        self.in_progress = true;
        self.last_result = None;
        log::info!(
            "programming {} blocks (exec {exec_after}, debug {enter_debug})",
            self.image.blocks().len()
        );
        Ok(())
    }

    /// Drop the hold armed by `enter_debug` and let the target run.
    pub fn leave_debug<B: BusSignals>(&self, arbiter: &mut BusArbiter<B>) -> Result<(), BusError> {
        let id = self.id.ok_or(BusError::NotAttached)?;
        arbiter.set_hold(id, false)?;
        arbiter.set_wait_flags(id, false, false)
    }

    fn write_image(&mut self, ctx: &mut ActionContext<'_>) -> Result<(), BusError> {
        let bus = ctx.bus()?;
        for block in self.image.blocks() {
            log::debug!("writing {} bytes at {:04x}", block.len, block.start);
            bus.write(block.start, self.image.block_data(block), AccessSpace::Memory);
        }
        if !self.exec_after {
            return Ok(());
        }
        if let Some(regs) = self.image.registers() {
            let code = register_snippet(self.snippet_addr, regs);
            log::debug!(
                "register snippet at {:04x}, {} bytes, PC {:04x}",
                self.snippet_addr,
                code.len(),
                regs.pc
            );
            bus.write(self.snippet_addr, &code, AccessSpace::Memory);
            // A snippet at the vector is entered directly by the reset
            if self.snippet_addr != RESET_VECTOR {
                let jump = [JP, self.snippet_addr as u8, (self.snippet_addr >> 8) as u8];
                bus.write(RESET_VECTOR, &jump, AccessSpace::Memory);
            }
        }
        Ok(())
    }

    fn arm_debug(ctx: &mut ActionContext<'_>, id: SocketId) {
        ctx.request(id, SocketRequest::WaitFlags { memory: true, io: false });
        ctx.request(id, SocketRequest::Hold(true));
    }

    fn finish(&mut self, result: Result<(), BusError>) {
        match result {
            Ok(()) => {
                log::info!("programming complete");
                self.image.clear();
            }
            Err(e) => log::warn!("programming failed: {e}"),
        }
        self.in_progress = false;
        self.last_result = Some(result);
    }
}

impl SocketHandler for TargetProgrammer {
    fn action_complete(&mut self, report: &ActionReport, ctx: &mut ActionContext<'_>) {
        let Some(id) = self.id else {
            return;
        };
        if !report.is_for(id) {
            return;
        }
        match (report.kind, report.outcome) {
            (ActionKind::BusRequest, ActionOutcome::BusGranted)
                if self.in_progress && report.reason == ActionReason::Programming =>
            {
                let result = self.write_image(ctx);
                if result.is_ok() {
                    if self.exec_after {
                        ctx.request(id, SocketRequest::Reset(None));
                        self.debug_after_reset = self.enter_debug;
                    } else if self.enter_debug {
                        Self::arm_debug(ctx, id);
                    }
                }
                self.finish(result);
            }
            (ActionKind::BusRequest, ActionOutcome::Failed(e)) if self.in_progress => {
                self.finish(Err(e));
            }
            (ActionKind::Reset, ActionOutcome::Failed(e)) if self.debug_after_reset => {
                log::warn!("start reset failed: {e}");
                self.debug_after_reset = false;
            }
            (ActionKind::Reset, ActionOutcome::ResetEnded) if self.debug_after_reset => {
                self.debug_after_reset = false;
                log::debug!("target reset, holding first fetch");
                Self::arm_debug(ctx, id);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arbiter::HeldBus;
    use crate::cpu::regs::Z80Registers;
    use crate::gpio::GpioBus;
    use crate::gpio::fake::FakeBoard;

    fn programmer(snippet_addr: u16) -> TargetProgrammer {
        let mut p = TargetProgrammer::new(snippet_addr);
        p.id = Some(SocketId(0));
        p
    }

    fn granted_bus() -> GpioBus<FakeBoard> {
        let mut bus = GpioBus::new(FakeBoard::new());
        bus.set_bus_request(true);
        bus.take_bus();
        bus
    }

    fn report(kind: ActionKind, reason: ActionReason, outcome: ActionOutcome) -> ActionReport {
        ActionReport {
            kind,
            reason,
            outcome,
            requester: Some(SocketId(0)),
        }
    }

    fn grant(p: &mut TargetProgrammer, bus: &mut GpioBus<FakeBoard>) -> Vec<(SocketId, SocketRequest)> {
        let mut ctx = ActionContext::new(Some(HeldBus::new(bus)));
        p.action_complete(
            &report(ActionKind::BusRequest, ActionReason::Programming, ActionOutcome::BusGranted),
            &mut ctx,
        );
        ctx.into_requests()
    }

    // ---- Grant handling ----

    #[test]
    fn grant_writes_blocks_and_clears_image() {
        let mut p = programmer(0);
        p.add_block(0x4000, &[1, 2, 3]).unwrap();
        p.add_block(0x8000, &[9]).unwrap();
        p.in_progress = true;
        let mut bus = granted_bus();

        let requests = grant(&mut p, &mut bus);

        assert!(requests.is_empty());
        assert_eq!(&bus.port().memory()[0x4000..0x4003], &[1, 2, 3]);
        assert_eq!(bus.port().memory()[0x8000], 9);
        assert_eq!(p.last_result(), Some(Ok(())));
        assert!(!p.is_in_progress());
        assert!(p.image().blocks().is_empty());
    }

    #[test]
    fn exec_writes_snippet_and_vector_then_resets() {
        let mut p = programmer(0x4000);
        p.add_block(0x5000, &[0x76]).unwrap();
        p.image_mut().set_registers(Z80Registers {
            pc: 0x5000,
            sp: 0x7FF0,
            ..Default::default()
        });
        p.in_progress = true;
        p.exec_after = true;
        let mut bus = granted_bus();

        let requests = grant(&mut p, &mut bus);

        let mem = bus.port().memory();
        assert_eq!(&mem[0..3], &[0xC3, 0x00, 0x40]);
        assert_eq!(&mem[0x4000..0x4003], &[0x31, 0x06, 0x40]);
        assert_eq!(&mem[0x4038..0x403B], &[0xC3, 0x00, 0x50]);
        assert_eq!(requests, vec![(SocketId(0), SocketRequest::Reset(None))]);
    }

    #[test]
    fn snippet_at_vector_skips_jump() {
        let mut p = programmer(0);
        p.image_mut().set_registers(Z80Registers {
            pc: 0x1234,
            ..Default::default()
        });
        p.in_progress = true;
        p.exec_after = true;
        let mut bus = granted_bus();

        grant(&mut p, &mut bus);

        assert_eq!(&bus.port().memory()[0..3], &[0x31, 0x06, 0x00]);
    }

    #[test]
    fn exec_without_registers_only_resets() {
        let mut p = programmer(0x4000);
        p.add_block(0x0000, &[0x00, 0x76]).unwrap();
        p.in_progress = true;
        p.exec_after = true;
        let mut bus = granted_bus();

        let requests = grant(&mut p, &mut bus);

        assert_eq!(&bus.port().memory()[0..2], &[0x00, 0x76]);
        assert_eq!(bus.port().memory()[0x4000], 0);
        assert_eq!(requests, vec![(SocketId(0), SocketRequest::Reset(None))]);
    }

    #[test]
    fn debug_arms_after_reset_ends() {
        let mut p = programmer(0);
        p.in_progress = true;
        p.exec_after = true;
        p.enter_debug = true;
        let mut bus = granted_bus();
        grant(&mut p, &mut bus);

        let mut ctx = ActionContext::new(None);
        p.action_complete(
            &report(ActionKind::Reset, ActionReason::General, ActionOutcome::ResetEnded),
            &mut ctx,
        );
        assert_eq!(
            ctx.into_requests(),
            vec![
                (SocketId(0), SocketRequest::WaitFlags { memory: true, io: false }),
                (SocketId(0), SocketRequest::Hold(true)),
            ]
        );
    }

    #[test]
    fn debug_without_exec_arms_at_grant() {
        let mut p = programmer(0);
        p.in_progress = true;
        p.enter_debug = true;
        let mut bus = granted_bus();

        let requests = grant(&mut p, &mut bus);

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1], (SocketId(0), SocketRequest::Hold(true)));
    }

    #[test]
    fn cancelled_reset_drops_debug_arming() {
        let mut p = programmer(0);
        p.in_progress = true;
        p.exec_after = true;
        p.enter_debug = true;
        let mut bus = granted_bus();
        grant(&mut p, &mut bus);

        let mut ctx = ActionContext::new(None);
        p.action_complete(
            &report(
                ActionKind::Reset,
                ActionReason::General,
                ActionOutcome::Failed(BusError::Cancelled),
            ),
            &mut ctx,
        );
        p.action_complete(
            &report(ActionKind::Reset, ActionReason::General, ActionOutcome::ResetEnded),
            &mut ctx,
        );
        assert!(ctx.into_requests().is_empty());
    }

    // ---- Ignored reports ----

    #[test]
    fn failure_is_recorded() {
        let mut p = programmer(0);
        p.add_block(0x100, &[1]).unwrap();
        p.in_progress = true;
        let mut ctx = ActionContext::new(None);
        p.action_complete(
            &report(
                ActionKind::BusRequest,
                ActionReason::Programming,
                ActionOutcome::Failed(BusError::BusAckTimeout(100)),
            ),
            &mut ctx,
        );
        assert_eq!(p.last_result(), Some(Err(BusError::BusAckTimeout(100))));
        assert!(!p.is_in_progress());
        // The image survives for a retry
        assert_eq!(p.image().blocks().len(), 1);
    }

    #[test]
    fn other_requesters_and_mirror_rounds_ignored() {
        let mut p = programmer(0);
        p.add_block(0x100, &[1]).unwrap();
        p.in_progress = true;
        let mut bus = granted_bus();
        let mut ctx = ActionContext::new(Some(HeldBus::new(&mut bus)));
        let mut other = report(ActionKind::BusRequest, ActionReason::Programming, ActionOutcome::BusGranted);
        other.requester = Some(SocketId(3));
        p.action_complete(&other, &mut ctx);
        p.action_complete(
            &report(ActionKind::BusRequest, ActionReason::Mirror, ActionOutcome::BusGranted),
            &mut ctx,
        );
        assert!(p.is_in_progress());
        assert_eq!(bus.port().memory()[0x100], 0);
    }
}
