//! Timing configuration for the bus engine.
//!
//! Pulse widths are expressed in target T-states so they scale with the
//! target clock; service-loop bounds are wall-clock microseconds.

use serde::{Deserialize, Serialize};

pub const MAX_BUS_SOCKETS: usize = 10;

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimingConfig {
    pub reset_t_states: u32,
    pub nmi_t_states: u32,
    pub irq_t_states: u32,
    /// Budget for BUSACK after an arbitrated BUSRQ is asserted.
    pub busack_t_states: u32,
    /// A selected action that never reaches a safe point to assert is dropped after this.
    pub max_pending_action_us: u64,
    /// Bound on waiting for MREQ/IORQ to clear after driving a read response.
    pub max_end_of_read_us: u64,
    /// Bound on one `service()` call.
    pub max_service_us: u64,
    pub service_loops: u32,
    /// Budget for BUSACK when a block transfer acquires the bus synchronously.
    pub busack_timeout_us: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            reset_t_states: 100,
            nmi_t_states: 32,
            irq_t_states: 32,
            busack_t_states: 1000,
            max_pending_action_us: 100_000,
            max_end_of_read_us: 10,
            max_service_us: 10_000,
            service_loops: 50,
            busack_timeout_us: 500_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_firmware_constants() {
        let t = TimingConfig::default();
        assert_eq!(t.reset_t_states, 100);
        assert_eq!(t.nmi_t_states, 32);
        assert_eq!(t.irq_t_states, 32);
        assert_eq!(t.busack_t_states, 1000);
        assert_eq!(t.max_end_of_read_us, 10);
    }
}
