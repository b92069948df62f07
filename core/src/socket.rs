//! Bus socket registry.
//!
//! A socket is one registered consumer of bus events. Each socket owns its
//! enable/wait flags, its pending action requests and a [`SocketHandler`].
//! All mutation goes through [`SocketRequest`] so the arbiter can recompute
//! the wait-generation flags and re-run action selection after every change.

use std::cell::RefCell;
use std::rc::Rc;

use crate::arbiter::HeldBus;
use crate::config::{MAX_BUS_SOCKETS, TimingConfig};
use crate::core::bus::{AccessSpace, ControlSignals, WaitFlags};
use crate::error::BusError;

/// Handle returned by registration. Indexes the registry in registration order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub(crate) usize);

impl SocketId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Initial configuration passed to `register`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SocketConfig {
    pub enabled: bool,
    pub wait_on_memory: bool,
    pub wait_on_io: bool,
    /// Hold the next full-decode memory wait for a debugger.
    pub hold_in_wait: bool,
}

impl SocketConfig {
    pub fn new() -> Self {
        Self {
            enabled: true,
            wait_on_memory: false,
            wait_on_io: false,
            hold_in_wait: false,
        }
    }

    pub fn with_waits(memory: bool, io: bool) -> Self {
        Self {
            wait_on_memory: memory,
            wait_on_io: io,
            ..Self::new()
        }
    }
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Bus-level actions arbitrated one at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Reset,
    Nmi,
    Irq,
    BusRequest,
}

/// Why a socket wants the bus. Carried through to completion reports.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ActionReason {
    #[default]
    General,
    Display,
    Programming,
    Mirror,
    Debug,
}

/// Every way a socket's state can be changed after registration.
///
/// Pulse requests carry an optional T-state override; `None` uses the
/// configured default width.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SocketRequest {
    Reset(Option<u32>),
    Nmi(Option<u32>),
    Irq(Option<u32>),
    BusMaster(ActionReason),
    Enable(bool),
    WaitFlags { memory: bool, io: bool },
    Hold(bool),
}

/// Outstanding requests for one socket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingRequests {
    pub reset: Option<Option<u32>>,
    pub nmi: Option<Option<u32>>,
    pub irq: Option<Option<u32>>,
    pub bus_master: Option<ActionReason>,
}

impl PendingRequests {
    /// Highest-priority pending action: bus request, then reset, NMI, IRQ.
    pub fn next_kind(&self) -> Option<ActionKind> {
        if self.bus_master.is_some() {
            Some(ActionKind::BusRequest)
        } else if self.reset.is_some() {
            Some(ActionKind::Reset)
        } else if self.nmi.is_some() {
            Some(ActionKind::Nmi)
        } else if self.irq.is_some() {
            Some(ActionKind::Irq)
        } else {
            None
        }
    }

    pub fn clear(&mut self, kind: ActionKind) {
        match kind {
            ActionKind::Reset => self.reset = None,
            ActionKind::Nmi => self.nmi = None,
            ActionKind::Irq => self.irq = None,
            ActionKind::BusRequest => self.bus_master = None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next_kind().is_none()
    }

    /// Pulse width in T-states for `kind`, override first.
    pub fn t_states(&self, kind: ActionKind, timing: &TimingConfig) -> u32 {
        let (requested, default) = match kind {
            ActionKind::Reset => (self.reset.flatten(), timing.reset_t_states),
            ActionKind::Nmi => (self.nmi.flatten(), timing.nmi_t_states),
            ActionKind::Irq => (self.irq.flatten(), timing.irq_t_states),
            ActionKind::BusRequest => (None, timing.busack_t_states),
        };
        match requested {
            Some(t) if t > 0 => t,
            _ => default,
        }
    }
}

/// One processor-initiated wait cycle, offered to every enabled socket.
///
/// The first socket to [`respond`](WaitEvent::respond) decodes the cycle.
/// Later responses are ignored; a later response with a different value is
/// counted as a conflict.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WaitEvent {
    pub addr: u16,
    pub data: u8,
    pub control: ControlSignals,
    response: Option<u8>,
    decoded_by: Option<SocketId>,
    current: Option<SocketId>,
    conflicts: u32,
    hold: bool,
}

impl WaitEvent {
    pub fn new(addr: u16, data: u8, control: ControlSignals) -> Self {
        Self {
            addr,
            data,
            control,
            response: None,
            decoded_by: None,
            current: None,
            conflicts: 0,
            hold: false,
        }
    }

    pub fn space(&self) -> AccessSpace {
        if self.control.iorq() {
            AccessSpace::Io
        } else {
            AccessSpace::Memory
        }
    }

    pub fn is_read(&self) -> bool {
        self.control.is_read()
    }

    pub fn is_write(&self) -> bool {
        self.control.is_write()
    }

    /// Supply the byte the processor should read. Returns `false` if another
    /// socket already decoded this cycle.
    pub fn respond(&mut self, value: u8) -> bool {
        match self.response {
            None => {
                self.response = Some(value);
                self.decoded_by = self.current;
                true
            }
            Some(existing) => {
                if existing != value {
                    self.conflicts += 1;
                }
                false
            }
        }
    }

    pub fn response(&self) -> Option<u8> {
        self.response
    }

    pub fn is_decoded(&self) -> bool {
        self.response.is_some()
    }

    pub fn decoded_by(&self) -> Option<SocketId> {
        self.decoded_by
    }

    pub fn conflicts(&self) -> u32 {
        self.conflicts
    }

    /// Ask the arbiter to keep WAIT asserted after dispatch.
    pub fn request_hold(&mut self) {
        self.hold = true;
    }

    pub fn hold_requested(&self) -> bool {
        self.hold
    }
}

/// How a bus-level action ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The pulse ran for its full width.
    Completed,
    /// An interrupt acknowledge ended the IRQ early.
    Acknowledged,
    /// BUSACK received; the bus is held for the duration of the callback.
    BusGranted,
    /// Sent after RESET has been released.
    ResetEnded,
    Failed(BusError),
}

/// Completion report delivered to every enabled socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActionReport {
    pub kind: ActionKind,
    pub reason: ActionReason,
    pub outcome: ActionOutcome,
    pub requester: Option<SocketId>,
}

impl ActionReport {
    pub fn is_for(&self, id: SocketId) -> bool {
        self.requester == Some(id)
    }
}

/// Context handed to completion handlers.
///
/// Holds the bus while a BUSRQ grant is being reported, and collects any
/// requests raised from inside the callback; those are applied once every
/// socket has been notified.
pub struct ActionContext<'a> {
    bus: Option<HeldBus<'a>>,
    requests: Vec<(SocketId, SocketRequest)>,
}

impl<'a> ActionContext<'a> {
    pub(crate) fn new(bus: Option<HeldBus<'a>>) -> Self {
        Self {
            bus,
            requests: Vec::new(),
        }
    }

    /// The mastered bus, present only while reporting [`ActionOutcome::BusGranted`].
    pub fn bus(&mut self) -> Result<&mut HeldBus<'a>, BusError> {
        self.bus.as_mut().ok_or(BusError::BusNotHeld)
    }

    pub fn has_bus(&self) -> bool {
        self.bus.is_some()
    }

    pub fn request(&mut self, id: SocketId, request: SocketRequest) {
        self.requests.push((id, request));
    }

    pub(crate) fn into_requests(self) -> Vec<(SocketId, SocketRequest)> {
        self.requests
    }
}

/// Callbacks a socket receives. Both default to doing nothing.
pub trait SocketHandler {
    /// A full-decode wait cycle. Called before WAIT is released.
    fn bus_access(&mut self, _event: &mut WaitEvent) {}

    /// A bus-level action finished (for any requester).
    fn action_complete(&mut self, _report: &ActionReport, _ctx: &mut ActionContext<'_>) {}
}

impl<T: SocketHandler + ?Sized> SocketHandler for Box<T> {
    fn bus_access(&mut self, event: &mut WaitEvent) {
        (**self).bus_access(event);
    }

    fn action_complete(&mut self, report: &ActionReport, ctx: &mut ActionContext<'_>) {
        (**self).action_complete(report, ctx);
    }
}

impl<T: SocketHandler + ?Sized> SocketHandler for Rc<RefCell<T>> {
    fn bus_access(&mut self, event: &mut WaitEvent) {
        self.borrow_mut().bus_access(event);
    }

    fn action_complete(&mut self, report: &ActionReport, ctx: &mut ActionContext<'_>) {
        self.borrow_mut().action_complete(report, ctx);
    }
}

/// A socket that ignores everything. Useful as a pure action requester.
pub struct NullHandler;

impl SocketHandler for NullHandler {}

/// One registry entry.
pub struct BusSocket {
    pub config: SocketConfig,
    pub pending: PendingRequests,
    handler: Box<dyn SocketHandler>,
}

impl BusSocket {
    fn apply(&mut self, request: SocketRequest) {
        match request {
            SocketRequest::Reset(t) => self.pending.reset = Some(t),
            SocketRequest::Nmi(t) => self.pending.nmi = Some(t),
            SocketRequest::Irq(t) => self.pending.irq = Some(t),
            SocketRequest::BusMaster(reason) => self.pending.bus_master = Some(reason),
            SocketRequest::Enable(on) => self.config.enabled = on,
            SocketRequest::WaitFlags { memory, io } => {
                self.config.wait_on_memory = memory;
                self.config.wait_on_io = io;
            }
            SocketRequest::Hold(on) => self.config.hold_in_wait = on,
        }
    }
}

/// Fixed-capacity socket table, scanned in registration order.
pub struct SocketRegistry {
    sockets: Vec<BusSocket>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self {
            sockets: Vec::with_capacity(MAX_BUS_SOCKETS),
        }
    }

    pub fn register(
        &mut self,
        config: SocketConfig,
        handler: Box<dyn SocketHandler>,
    ) -> Result<SocketId, BusError> {
        if self.sockets.len() >= MAX_BUS_SOCKETS {
            log::warn!("socket table full, registration refused");
            return Err(BusError::TooManySockets(MAX_BUS_SOCKETS));
        }
        let id = SocketId(self.sockets.len());
        self.sockets.push(BusSocket {
            config,
            pending: PendingRequests::default(),
            handler,
        });
        log::debug!("registered socket {} {:?}", id.0, config);
        Ok(id)
    }

    pub fn apply(&mut self, id: SocketId, request: SocketRequest) -> Result<(), BusError> {
        let socket = self
            .sockets
            .get_mut(id.0)
            .ok_or(BusError::UnknownSocket(id))?;
        socket.apply(request);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }

    pub fn get(&self, id: SocketId) -> Option<&BusSocket> {
        self.sockets.get(id.0)
    }

    pub fn is_enabled(&self, id: SocketId) -> bool {
        self.get(id).is_some_and(|s| s.config.enabled)
    }

    fn enabled(&self) -> impl Iterator<Item = &BusSocket> {
        self.sockets.iter().filter(|s| s.config.enabled)
    }

    /// OR of the wait-on flags over enabled sockets.
    pub fn wait_flags(&self) -> WaitFlags {
        self.enabled().fold(WaitFlags::NONE, |acc, s| WaitFlags {
            memory: acc.memory || s.config.wait_on_memory,
            io: acc.io || s.config.wait_on_io,
        })
    }

    pub fn hold_requested(&self) -> bool {
        self.enabled().any(|s| s.config.hold_in_wait)
    }

    /// First enabled socket (registration order) with anything pending.
    pub fn next_action(&self) -> Option<(SocketId, ActionKind)> {
        self.sockets
            .iter()
            .enumerate()
            .filter(|(_, s)| s.config.enabled)
            .find_map(|(i, s)| s.pending.next_kind().map(|k| (SocketId(i), k)))
    }

    pub fn pending(&self, id: SocketId) -> Option<&PendingRequests> {
        self.get(id).map(|s| &s.pending)
    }

    /// Clear the request that raised a finished action. The same kind
    /// pending on other sockets stays queued.
    pub fn clear_action(&mut self, id: SocketId, kind: ActionKind) {
        if let Some(socket) = self.sockets.get_mut(id.0) {
            socket.pending.clear(kind);
        }
    }

    /// Drop every pending request, returning what was dropped in
    /// registration order.
    pub fn take_all_pending(&mut self) -> Vec<(SocketId, ActionKind, ActionReason)> {
        let mut dropped = Vec::new();
        for (i, socket) in self.sockets.iter_mut().enumerate() {
            let pending = std::mem::take(&mut socket.pending);
            if let Some(reason) = pending.bus_master {
                dropped.push((SocketId(i), ActionKind::BusRequest, reason));
            }
            for (kind, flag) in [
                (ActionKind::Reset, pending.reset),
                (ActionKind::Nmi, pending.nmi),
                (ActionKind::Irq, pending.irq),
            ] {
                if flag.is_some() {
                    dropped.push((SocketId(i), kind, ActionReason::General));
                }
            }
        }
        dropped
    }

    /// Offer a wait cycle to every enabled socket in registration order.
    pub fn dispatch(&mut self, event: &mut WaitEvent) {
        for (i, socket) in self.sockets.iter_mut().enumerate() {
            if !socket.config.enabled {
                continue;
            }
            event.current = Some(SocketId(i));
            socket.handler.bus_access(event);
        }
        event.current = None;
    }

    /// Deliver a completion report to every enabled socket in registration order.
    pub fn notify(&mut self, report: &ActionReport, ctx: &mut ActionContext<'_>) {
        for socket in self.sockets.iter_mut().filter(|s| s.config.enabled) {
            socket.handler.action_complete(report, ctx);
        }
    }
}

impl Default for SocketRegistry {
    fn default() -> Self {
        Self::new()
    }
}
