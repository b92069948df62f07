use super::BusArbiter;
use crate::core::bus::{BusSignals, ControlSignals, MuxSelect, is_timeout};
use crate::core::clock::us_from_t_states;
use crate::error::BusError;
use crate::socket::{ActionKind, ActionOutcome, ActionReason, ActionReport, SocketId};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ActionState {
    Pending,
    Asserted,
}

/// The one bus-level action in flight.
#[derive(Clone, Copy, Debug)]
pub(super) struct PendingAction {
    pub kind: ActionKind,
    pub requester: SocketId,
    pub reason: ActionReason,
    pub state: ActionState,
    pub selected_at: u64,
    pub asserted_at: u64,
    pub duration_us: u64,
}

impl PendingAction {
    /// Push both timers forward, e.g. after the processor was held.
    pub fn extend(&mut self, us: u64) {
        self.selected_at = self.selected_at.saturating_add(us);
        self.asserted_at = self.asserted_at.saturating_add(us);
    }

    fn report(&self, outcome: ActionOutcome) -> ActionReport {
        ActionReport {
            kind: self.kind,
            reason: self.reason,
            outcome,
            requester: Some(self.requester),
        }
    }
}

fn side_channel(kind: ActionKind) -> Option<MuxSelect> {
    match kind {
        ActionKind::Reset => Some(MuxSelect::Reset),
        ActionKind::Nmi => Some(MuxSelect::Nmi),
        ActionKind::Irq => Some(MuxSelect::Irq),
        ActionKind::BusRequest => None,
    }
}

impl<B: BusSignals> BusArbiter<B> {
    /// Pick the first enabled socket with a pending request, unless an
    /// action is already in flight.
    pub(super) fn select_action(&mut self) {
        if self.action.is_some() || self.mastered {
            return;
        }
        let Some((requester, kind)) = self.sockets.next_action() else {
            return;
        };
        let pending = self.sockets.pending(requester).copied().unwrap_or_default();
        let t_states = pending.t_states(kind, &self.timing);
        let duration_us = us_from_t_states(t_states, self.clock.frequency_hz()) as u64;
        let reason = match kind {
            ActionKind::BusRequest => pending.bus_master.unwrap_or_default(),
            _ => ActionReason::General,
        };
        log::debug!(
            "selected {kind:?} for socket {} ({t_states} T-states, {duration_us}us)",
            requester.index()
        );
        self.action = Some(PendingAction {
            kind,
            requester,
            reason,
            state: ActionState::Pending,
            selected_at: self.bus.micros(),
            asserted_at: 0,
            duration_us,
        });
    }

    /// Assert a pending action. Only called at a safe point: between cycles
    /// with memory waits disarmed, or just before a wait is released.
    pub(super) fn assert_at_safe_point(&mut self) {
        let now = self.bus.micros();
        let Some(action) = self.action.as_mut() else {
            return;
        };
        if action.state != ActionState::Pending {
            return;
        }
        action.state = ActionState::Asserted;
        action.asserted_at = now;
        let kind = action.kind;
        match side_channel(kind) {
            Some(select) => self.bus.set_side_channel(select, true),
            None => self.bus.set_bus_request(true),
        }
        self.stats.actions_started += 1;
        log::debug!("asserted {kind:?}");
    }

    pub(super) fn deassert(&mut self, kind: ActionKind) {
        match side_channel(kind) {
            Some(select) => self.bus.set_side_channel(select, false),
            None => self.bus.set_bus_request(false),
        }
    }

    /// An asserted IRQ ends as soon as the processor acknowledges it.
    pub(super) fn check_irq_ack(&mut self, ctrl: ControlSignals) {
        let Some(action) = self.action else {
            return;
        };
        if action.kind == ActionKind::Irq
            && action.state == ActionState::Asserted
            && ctrl.is_int_ack()
        {
            self.end_pulse(action, ActionOutcome::Acknowledged);
        }
    }

    pub(super) fn service_action(&mut self, ctrl: ControlSignals) {
        let Some(action) = self.action else {
            self.select_action();
            return;
        };
        let now = self.bus.micros();
        match action.state {
            ActionState::Pending => {
                if is_timeout(now, action.selected_at, self.timing.max_pending_action_us) {
                    log::warn!(
                        "{:?} for socket {} never reached a safe point",
                        action.kind,
                        action.requester.index()
                    );
                    self.fail_action(
                        action,
                        BusError::ActionTimeout(self.timing.max_pending_action_us),
                    );
                } else if !ctrl.wait() && !self.armed.memory {
                    self.assert_at_safe_point();
                }
            }
            ActionState::Asserted => match action.kind {
                ActionKind::BusRequest => {
                    if ctrl.busack() {
                        self.grant_bus(action);
                    } else if is_timeout(now, action.asserted_at, action.duration_us) {
                        self.stats.busack_failures += 1;
                        log::warn!("BUSACK not received within {}us", action.duration_us);
                        self.fail_action(action, BusError::BusAckTimeout(action.duration_us));
                    }
                }
                _ => {
                    if is_timeout(now, action.asserted_at, action.duration_us) {
                        self.end_pulse(action, ActionOutcome::Completed);
                    }
                }
            },
        }
    }

    fn finish(&mut self, action: PendingAction) {
        self.sockets.clear_action(action.requester, action.kind);
        self.action = None;
    }

    fn end_pulse(&mut self, action: PendingAction, outcome: ActionOutcome) {
        self.deassert(action.kind);
        self.finish(action);
        self.stats.actions_completed += 1;
        let outcome = match action.kind {
            ActionKind::Reset => ActionOutcome::ResetEnded,
            _ => outcome,
        };
        log::debug!("{:?} ended: {outcome:?}", action.kind);
        self.notify(action.report(outcome));
        self.refresh();
    }

    fn fail_action(&mut self, action: PendingAction, error: BusError) {
        if action.state == ActionState::Asserted {
            self.deassert(action.kind);
        }
        self.finish(action);
        self.stats.actions_failed += 1;
        self.notify(action.report(ActionOutcome::Failed(error)));
        self.refresh();
    }

    /// BUSACK seen: hold the bus while every enabled socket is told, then
    /// hand it back. A programming grant is followed by a mirror round.
    fn grant_bus(&mut self, action: PendingAction) {
        self.bus.take_bus();
        self.finish(action);
        self.stats.actions_completed += 1;
        log::debug!("bus granted to socket {}", action.requester.index());

        let report = action.report(ActionOutcome::BusGranted);
        let mut requests = self.notify_with_bus(report);
        if action.reason == ActionReason::Programming {
            let mirror = ActionReport {
                reason: ActionReason::Mirror,
                ..report
            };
            requests.extend(self.notify_with_bus(mirror));
        }
        self.bus.release_bus();
        self.apply_deferred(requests);
        self.refresh();
    }
}
