use crate::cpu::inject::InjectionProgress;
use crate::socket::WaitEvent;

/// Debugger layer consulted by the arbiter.
pub trait DebugHook {
    /// Called for every full-decode wait after dispatch. Return `true` to
    /// keep WAIT asserted.
    fn on_wait(&mut self, _event: &WaitEvent) -> bool {
        false
    }

    /// Polled while a wait is held. Return `true` to let it go.
    fn resume(&mut self) -> bool {
        true
    }

    fn on_injection(&mut self, _progress: InjectionProgress) {}
}
