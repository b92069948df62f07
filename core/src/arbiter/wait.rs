use super::{BusArbiter, DecodePath, HeldWait};
use crate::core::bus::{BusSignals, ControlSignals, is_timeout};
use crate::cpu::inject::InjectionProgress;
use crate::socket::WaitEvent;

impl<B: BusSignals> BusArbiter<B> {
    /// Service one valid wait cycle. While `acquiring` the bus for a block
    /// transfer no action is asserted and no hold is honoured.
    pub(super) fn service_wait(&mut self, ctrl: ControlSignals, acquiring: bool) {
        let started = self.bus.micros();
        self.stats.waits_seen += 1;
        let path = self.decode_path(ctrl);
        self.in_wait = Some(path);
        match path {
            DecodePath::FastPath => {
                self.stats.fast_path_releases += 1;
                self.finish_wait(None, ctrl, acquiring);
            }
            DecodePath::FullDecode => self.full_decode(ctrl, acquiring),
        }
        self.in_wait = None;
        let elapsed = self.bus.micros().saturating_sub(started);
        self.stats.longest_wait_us = self.stats.longest_wait_us.max(elapsed);
    }

    fn decode_path(&mut self, ctrl: ControlSignals) -> DecodePath {
        if self.injection.as_ref().is_some_and(|i| i.claims(ctrl)) {
            return DecodePath::FullDecode;
        }
        if self.degraded {
            return DecodePath::FastPath;
        }
        if ctrl.iorq() || ctrl.m1() || self.sockets.hold_requested() {
            return DecodePath::FullDecode;
        }
        let high = self.bus.read_high_address();
        if self.watch[high as usize] {
            DecodePath::FullDecode
        } else {
            DecodePath::FastPath
        }
    }

    fn full_decode(&mut self, ctrl: ControlSignals, acquiring: bool) {
        let (addr, data) = self.bus.read_address_and_data();
        self.stats.full_decodes += 1;
        let mut event = WaitEvent::new(addr, data, ctrl);
        log::trace!("wait {addr:04x} {data:02x} {ctrl:?}");

        if self.injection.as_ref().is_some_and(|i| i.claims(ctrl)) {
            self.inject_step(&mut event);
            self.finish_wait(event.response(), ctrl, acquiring);
            return;
        }

        self.sockets.dispatch(&mut event);
        if event.conflicts() > 0 {
            self.stats.decode_conflicts += event.conflicts() as u64;
            log::debug!(
                "{} conflicting responses at {addr:04x}, kept {:02x?}",
                event.conflicts(),
                event.response()
            );
        }

        let hold = !acquiring && {
            let by_socket = event.hold_requested() || (ctrl.mreq() && self.sockets.hold_requested());
            let by_debugger = self.debug.as_mut().is_some_and(|d| d.on_wait(&event));
            by_socket || by_debugger
        };
        if hold {
            self.stats.holds += 1;
            log::debug!("holding wait at {addr:04x} {ctrl:?}");
            self.held = Some(HeldWait {
                event,
                since: self.bus.micros(),
            });
            return;
        }
        self.finish_wait(event.response(), ctrl, acquiring);
    }

    /// Route one claimed cycle through the injector.
    fn inject_step(&mut self, event: &mut WaitEvent) {
        let (step, just_started) = match self.injection.as_mut() {
            Some(injection) => {
                let was_started = injection.started();
                let step = injection.on_access(event.addr, event.data, event.control);
                (step, !was_started && injection.started())
            }
            None => return,
        };
        if just_started {
            log::debug!("injection started at {:04x}", event.addr);
            self.bus.set_paging(false);
        }
        if let Some(value) = step.response {
            event.respond(value);
        }
        if let Some(debug) = self.debug.as_mut() {
            debug.on_injection(step.progress);
        }
        if step.progress == InjectionProgress::Done {
            if let Some(injection) = self.injection.take() {
                self.injection_result = Some(injection.into_result());
            }
            log::debug!("injection complete");
            self.page_in_pending = true;
            self.refresh();
        }
    }

    /// Release WAIT, driving `response` first for reads. Any pending action
    /// is asserted immediately before the release.
    fn finish_wait(&mut self, response: Option<u8>, ctrl: ControlSignals, acquiring: bool) {
        if !acquiring {
            self.assert_at_safe_point();
        }
        match response {
            Some(value) if ctrl.is_read() => {
                self.bus.drive_data_byte(value);
                self.bus.release_wait();
                self.wait_for_read_end();
            }
            _ => self.bus.release_wait(),
        }
        if self.page_in_pending {
            self.page_in_pending = false;
            self.bus.set_paging(true);
        }
    }

    /// Keep driving until the processor ends the cycle, bounded.
    fn wait_for_read_end(&mut self) {
        let start = self.bus.micros();
        loop {
            let ctrl = self.bus.sample_control_lines();
            if !ctrl.mreq() && !ctrl.iorq() {
                break;
            }
            if is_timeout(self.bus.micros(), start, self.timing.max_end_of_read_us) {
                self.stats.read_timeouts += 1;
                log::warn!(
                    "read cycle still active after {}us, releasing data bus",
                    self.timing.max_end_of_read_us
                );
                break;
            }
        }
        self.bus.release_data_bus();
    }

    /// While held: let an armed injection take the held fetch, otherwise
    /// release once no socket holds and the debugger agrees.
    pub(super) fn poll_held(&mut self) {
        let Some(held) = self.held.as_ref() else {
            return;
        };
        let ctrl = held.event.control;
        let injecting = self.injection.as_ref().is_some_and(|i| i.claims(ctrl));
        let resume = injecting
            || (!self.sockets.hold_requested() && self.debug.as_mut().is_none_or(|d| d.resume()));
        if !resume {
            return;
        }
        let Some(held) = self.held.take() else {
            return;
        };
        let held_for = self.bus.micros().saturating_sub(held.since);
        if let Some(action) = self.action.as_mut() {
            action.extend(held_for);
        }
        log::debug!("resuming after {held_for}us hold at {:04x}", held.event.addr);

        let mut event = held.event;
        if injecting {
            let mut fresh = WaitEvent::new(event.addr, event.data, ctrl);
            self.inject_step(&mut fresh);
            event = fresh;
        }
        self.finish_wait(event.response(), ctrl, false);
    }
}
