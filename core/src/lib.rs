pub mod arbiter;
pub mod config;
pub mod core;
pub mod cpu;
pub mod error;
pub mod gpio;
pub mod programmer;
pub mod socket;

pub mod prelude {
    pub use crate::arbiter::{ArbiterState, BusArbiter, BusStats, DebugHook, HeldBus};
    pub use crate::config::TimingConfig;
    pub use crate::core::{AccessSpace, BusSignals, ClockSource, ControlSignals, FixedClock};
    pub use crate::cpu::{InjectionProgress, InjectionResult, Z80Registers};
    pub use crate::error::BusError;
    pub use crate::programmer::{MemoryImage, TargetProgrammer};
    pub use crate::socket::{
        ActionContext, ActionKind, ActionOutcome, ActionReason, ActionReport, SocketConfig,
        SocketHandler, SocketId, SocketRequest, WaitEvent,
    };
}
