// Target processor model: register file and the injection protocol
pub mod inject;
pub mod regs;

pub use inject::{Injection, InjectionProgress, InjectionResult};
pub use regs::Z80Registers;
