//! Cycle arbiter: the single poll-driven engine that owns the bus.
//!
//! Each [`poll`](BusArbiter::poll) samples the control lines once, services
//! at most one wait cycle (fast path or full decode), and advances the one
//! in-flight bus-level action. Nothing here re-enters itself: socket
//! callbacks only see a [`WaitEvent`] or an [`ActionContext`], and any
//! requests they raise are applied after the callback returns.

mod action;
mod block;
mod debug;
mod stats;
mod wait;

pub use block::{HeldBus, raw_block_read, raw_block_write};
pub use debug::DebugHook;
pub use stats::BusStats;

use action::{ActionState, PendingAction};

use crate::config::TimingConfig;
use crate::core::bus::{BusSignals, WaitFlags, is_timeout};
use crate::core::clock::ClockSource;
use crate::cpu::inject::{Injection, InjectionProgress, InjectionResult};
use crate::cpu::regs::Z80Registers;
use crate::error::BusError;
use crate::socket::{
    ActionContext, ActionKind, ActionOutcome, ActionReason, ActionReport, SocketConfig,
    SocketHandler, SocketId, SocketRegistry, SocketRequest, WaitEvent,
};

/// How a wait cycle is being serviced.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodePath {
    /// Released without reading the data bus.
    FastPath,
    /// Address and data read, event dispatched.
    FullDecode,
}

/// Externally visible arbiter state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArbiterState {
    Idle,
    WaitAsserted(DecodePath),
    ActionPending(ActionKind),
    ActionAsserted(ActionKind),
    HeldForDebug,
}

/// A wait cycle kept asserted for a debugger.
struct HeldWait {
    event: WaitEvent,
    since: u64,
}

pub struct BusArbiter<B: BusSignals> {
    bus: B,
    sockets: SocketRegistry,
    timing: TimingConfig,
    clock: Box<dyn ClockSource>,
    action: Option<PendingAction>,
    held: Option<HeldWait>,
    in_wait: Option<DecodePath>,
    watch: [bool; 256],
    injection: Option<Injection>,
    injection_result: Option<InjectionResult>,
    page_in_pending: bool,
    debug: Option<Box<dyn DebugHook>>,
    mastered: bool,
    armed: WaitFlags,
    degraded: bool,
    stats: BusStats,
}

impl<B: BusSignals> BusArbiter<B> {
    pub fn new(mut bus: B, clock: impl ClockSource + 'static, timing: TimingConfig) -> Self {
        bus.set_wait_generation(WaitFlags::NONE);
        bus.set_bus_request(false);
        bus.set_paging(true);
        Self {
            bus,
            sockets: SocketRegistry::new(),
            timing,
            clock: Box::new(clock),
            action: None,
            held: None,
            in_wait: None,
            watch: [true; 256],
            injection: None,
            injection_result: None,
            page_in_pending: false,
            debug: None,
            mastered: false,
            armed: WaitFlags::NONE,
            degraded: false,
            stats: BusStats::default(),
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Direct access to the bus implementation, for board setup and tests.
    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    pub fn sockets(&self) -> &SocketRegistry {
        &self.sockets
    }

    /// Wait-generation flags currently armed.
    pub fn wait_flags(&self) -> WaitFlags {
        self.armed
    }

    pub fn state(&self) -> ArbiterState {
        if self.held.is_some() {
            return ArbiterState::HeldForDebug;
        }
        if let Some(path) = self.in_wait {
            return ArbiterState::WaitAsserted(path);
        }
        match self.action {
            Some(a) if a.state == ActionState::Asserted => ArbiterState::ActionAsserted(a.kind),
            Some(a) => ArbiterState::ActionPending(a.kind),
            None => ArbiterState::Idle,
        }
    }

    pub fn is_held(&self) -> bool {
        self.held.is_some()
    }

    /// The wait cycle currently held for debugging, if any.
    pub fn held_event(&self) -> Option<&WaitEvent> {
        self.held.as_ref().map(|h| &h.event)
    }

    // ---- Sockets ----

    pub fn register<H: SocketHandler + 'static>(
        &mut self,
        config: SocketConfig,
        handler: H,
    ) -> Result<SocketId, BusError> {
        let id = self.sockets.register(config, Box::new(handler))?;
        self.refresh();
        Ok(id)
    }

    /// Apply one socket mutation, then recompute wait generation and
    /// re-run action selection.
    pub fn request(&mut self, id: SocketId, request: SocketRequest) -> Result<(), BusError> {
        self.sockets.apply(id, request)?;
        self.refresh();
        Ok(())
    }

    pub fn set_enabled(&mut self, id: SocketId, enabled: bool) -> Result<(), BusError> {
        self.request(id, SocketRequest::Enable(enabled))
    }

    pub fn set_wait_flags(&mut self, id: SocketId, memory: bool, io: bool) -> Result<(), BusError> {
        self.request(id, SocketRequest::WaitFlags { memory, io })
    }

    pub fn set_hold(&mut self, id: SocketId, hold: bool) -> Result<(), BusError> {
        self.request(id, SocketRequest::Hold(hold))
    }

    pub fn request_reset(&mut self, id: SocketId, t_states: Option<u32>) -> Result<(), BusError> {
        self.request(id, SocketRequest::Reset(t_states))
    }

    pub fn request_nmi(&mut self, id: SocketId, t_states: Option<u32>) -> Result<(), BusError> {
        self.request(id, SocketRequest::Nmi(t_states))
    }

    pub fn request_irq(&mut self, id: SocketId, t_states: Option<u32>) -> Result<(), BusError> {
        self.request(id, SocketRequest::Irq(t_states))
    }

    pub fn request_bus_master(
        &mut self,
        id: SocketId,
        reason: ActionReason,
    ) -> Result<(), BusError> {
        self.request(id, SocketRequest::BusMaster(reason))
    }

    fn apply_deferred(&mut self, requests: Vec<(SocketId, SocketRequest)>) {
        for (id, request) in requests {
            if let Err(e) = self.sockets.apply(id, request) {
                log::warn!("dropped deferred {request:?}: {e}");
            }
        }
    }

    fn refresh(&mut self) {
        let mut flags = self.sockets.wait_flags();
        if self.injection.is_some() {
            flags.memory = true;
        }
        if flags != self.armed {
            log::debug!("wait generation {:?} -> {:?}", self.armed, flags);
            self.armed = flags;
            self.bus.set_wait_generation(flags);
        }
        self.select_action();
    }

    // ---- Fast-path watch table ----

    /// Include or exclude one 256-byte page from full decode.
    pub fn watch_high_address(&mut self, high: u8, watched: bool) {
        self.watch[high as usize] = watched;
    }

    /// Unwatch every page: plain memory waits are released immediately.
    pub fn clear_watch_table(&mut self) {
        self.watch = [false; 256];
    }

    pub fn watch_all(&mut self) {
        self.watch = [true; 256];
    }

    // ---- Debugger ----

    pub fn set_debug_hook(&mut self, hook: Box<dyn DebugHook>) {
        self.debug = Some(hook);
    }

    pub fn clear_debug_hook(&mut self) {
        self.debug = None;
    }

    // ---- Register injection ----

    /// Arm a register get. It starts on the next opcode fetch.
    pub fn start_register_get(&mut self) -> Result<(), BusError> {
        self.start_injection(Injection::get())
    }

    /// Arm a register set. It starts on the next opcode fetch.
    pub fn start_register_set(&mut self, regs: &Z80Registers) -> Result<(), BusError> {
        self.start_injection(Injection::set(regs))
    }

    fn start_injection(&mut self, injection: Injection) -> Result<(), BusError> {
        if self.injection.is_some() {
            return Err(BusError::AlreadyInProgress);
        }
        log::debug!("injection armed");
        self.injection_result = None;
        self.injection = Some(injection);
        self.refresh();
        Ok(())
    }

    pub fn injection_progress(&self) -> Option<InjectionProgress> {
        self.injection.as_ref().map(|i| {
            if i.started() {
                InjectionProgress::Running
            } else {
                InjectionProgress::Waiting
            }
        })
    }

    pub fn take_injection_result(&mut self) -> Option<InjectionResult> {
        self.injection_result.take()
    }

    // ---- Poll loop ----

    /// One sample-decide-act step.
    pub fn poll(&mut self) {
        if self.mastered {
            return;
        }
        if self.held.is_some() {
            self.poll_held();
            return;
        }
        let ctrl = self.bus.sample_control_lines();
        self.check_irq_ack(ctrl);
        if ctrl.wait() && !ctrl.busack() && ctrl.is_wait_valid() {
            self.service_wait(ctrl, false);
        }
        self.service_action(ctrl);
    }

    /// Up to `service_loops` polls. Once `max_service_us` has elapsed in
    /// this window, remaining waits are released without decode.
    pub fn service(&mut self) {
        let start = self.bus.micros();
        self.degraded = false;
        for _ in 0..self.timing.service_loops {
            if !self.degraded && is_timeout(self.bus.micros(), start, self.timing.max_service_us) {
                self.degraded = true;
                self.stats.service_degradations += 1;
                log::warn!(
                    "service window over {}us, releasing waits undecoded",
                    self.timing.max_service_us
                );
            }
            self.poll();
        }
        self.degraded = false;
    }

    /// Drop every pending request and the in-flight action. Each dropped
    /// request is reported to the sockets as failed with `Cancelled`.
    pub fn cancel_all(&mut self) {
        self.cancel_requests();
        self.refresh();
    }

    fn cancel_requests(&mut self) {
        if let Some(action) = self.action.take() {
            if action.state == ActionState::Asserted {
                self.deassert(action.kind);
            }
            log::debug!("cancelled {:?} for socket {}", action.kind, action.requester.index());
        }
        for (requester, kind, reason) in self.sockets.take_all_pending() {
            self.stats.actions_failed += 1;
            self.notify(ActionReport {
                kind,
                reason,
                outcome: ActionOutcome::Failed(BusError::Cancelled),
                requester: Some(requester),
            });
        }
    }

    // ---- Raw mastery for other subsystems ----

    /// Cancel all arbitration and take the bus until [`control_release`](Self::control_release).
    pub fn control_request_and_take(&mut self) -> Result<(), BusError> {
        if self.mastered {
            return Ok(());
        }
        if self.held.is_some() {
            return Err(BusError::AlreadyInProgress);
        }
        self.cancel_requests();
        self.acquire_bus()?;
        self.mastered = true;
        Ok(())
    }

    pub fn control_release(&mut self) {
        if !self.mastered {
            return;
        }
        self.bus.release_bus();
        self.mastered = false;
        self.refresh();
    }

    pub fn is_mastered(&self) -> bool {
        self.mastered
    }

    /// The bus, while mastered through `control_request_and_take`.
    pub fn held_bus(&mut self) -> Result<HeldBus<'_>, BusError> {
        if !self.mastered {
            return Err(BusError::BusNotHeld);
        }
        Ok(HeldBus::new(&mut self.bus))
    }

    // ---- Notifications ----

    fn notify(&mut self, report: ActionReport) {
        let mut ctx = ActionContext::new(None);
        self.sockets.notify(&report, &mut ctx);
        let requests = ctx.into_requests();
        self.apply_deferred(requests);
    }

    fn notify_with_bus(&mut self, report: ActionReport) -> Vec<(SocketId, SocketRequest)> {
        let mut ctx = ActionContext::new(Some(HeldBus::new(&mut self.bus)));
        self.sockets.notify(&report, &mut ctx);
        ctx.into_requests()
    }
}
