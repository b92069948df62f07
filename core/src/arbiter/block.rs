use super::BusArbiter;
use super::action::ActionState;
use crate::core::bus::{AccessSpace, BusSignals, ControlSignals, is_timeout};
use crate::error::BusError;
use crate::socket::WaitEvent;

/// Latch `addr`, or bump the low counter when staying inside the page.
fn next_address(bus: &mut dyn BusSignals, addr: u16) {
    if addr & 0xFF == 0 {
        bus.set_address(addr);
    } else {
        bus.increment_low_address();
    }
}

/// Read `len` bytes from a bus the caller already masters.
pub fn raw_block_read(
    bus: &mut dyn BusSignals,
    addr: u16,
    len: usize,
    space: AccessSpace,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut cur = addr;
    bus.set_address(cur);
    for i in 0..len {
        out.push(bus.master_read(space));
        if i + 1 < len {
            cur = cur.wrapping_add(1);
            next_address(bus, cur);
        }
    }
    out
}

/// Write `data` to a bus the caller already masters.
pub fn raw_block_write(bus: &mut dyn BusSignals, addr: u16, data: &[u8], space: AccessSpace) {
    let mut cur = addr;
    bus.set_address(cur);
    for (i, &byte) in data.iter().enumerate() {
        bus.master_write(space, byte);
        if i + 1 < data.len() {
            cur = cur.wrapping_add(1);
            next_address(bus, cur);
        }
    }
}

/// The bus while the firmware masters it.
///
/// Handed to completion handlers during a BUSRQ grant, and available from
/// [`BusArbiter::held_bus`] after `control_request_and_take`.
pub struct HeldBus<'a> {
    bus: &'a mut dyn BusSignals,
}

impl<'a> HeldBus<'a> {
    pub(crate) fn new(bus: &'a mut dyn BusSignals) -> Self {
        Self { bus }
    }

    pub fn read(&mut self, addr: u16, len: usize, space: AccessSpace) -> Vec<u8> {
        raw_block_read(&mut *self.bus, addr, len, space)
    }

    pub fn write(&mut self, addr: u16, data: &[u8], space: AccessSpace) {
        raw_block_write(&mut *self.bus, addr, data, space);
    }

    pub fn signals(&mut self) -> &mut dyn BusSignals {
        &mut *self.bus
    }
}

fn synthetic_control(space: AccessSpace, write: bool) -> ControlSignals {
    let strobe = if write {
        ControlSignals::WR
    } else {
        ControlSignals::RD
    };
    match space {
        AccessSpace::Memory => ControlSignals::MREQ | strobe,
        AccessSpace::Io => ControlSignals::IORQ | strobe,
    }
}

impl<B: BusSignals> BusArbiter<B> {
    /// Request the bus and wait for BUSACK, servicing waits meanwhile so the
    /// processor can reach the end of its cycle.
    pub(super) fn acquire_bus(&mut self) -> Result<(), BusError> {
        let limit = self.timing.busack_timeout_us;
        self.bus.set_bus_request(true);
        let start = self.bus.micros();
        loop {
            let ctrl = self.bus.sample_control_lines();
            if ctrl.busack() {
                self.bus.take_bus();
                return Ok(());
            }
            if ctrl.wait() && ctrl.is_wait_valid() {
                self.service_wait(ctrl, true);
            }
            if is_timeout(self.bus.micros(), start, limit) {
                self.bus.set_bus_request(false);
                self.stats.busack_failures += 1;
                log::warn!("BUSACK not received within {limit}us");
                return Err(BusError::BusAckTimeout(limit));
            }
        }
    }

    fn check_block_allowed(&self) -> Result<(), BusError> {
        let action_busy = self
            .action
            .is_some_and(|a| a.state == ActionState::Asserted);
        let injecting = self.injection.as_ref().is_some_and(|i| i.started());
        if action_busy || injecting {
            Err(BusError::AlreadyInProgress)
        } else {
            Ok(())
        }
    }

    /// Read `len` bytes. Acquires and releases the bus unless already
    /// mastered. While held for debug, sockets answer instead.
    pub fn block_read(
        &mut self,
        addr: u16,
        len: usize,
        space: AccessSpace,
    ) -> Result<Vec<u8>, BusError> {
        if self.held.is_some() {
            return self.synthetic_read(addr, len, space);
        }
        self.check_block_allowed()?;
        let acquire = !self.mastered;
        if acquire {
            self.acquire_bus()?;
        }
        let data = raw_block_read(&mut self.bus, addr, len, space);
        if acquire {
            self.bus.release_bus();
        }
        Ok(data)
    }

    /// Write `data`. No byte is written if the bus cannot be acquired.
    pub fn block_write(
        &mut self,
        addr: u16,
        data: &[u8],
        space: AccessSpace,
    ) -> Result<(), BusError> {
        if self.held.is_some() {
            self.synthetic_write(addr, data, space);
            return Ok(());
        }
        self.check_block_allowed()?;
        let acquire = !self.mastered;
        if acquire {
            self.acquire_bus()?;
        }
        raw_block_write(&mut self.bus, addr, data, space);
        if acquire {
            self.bus.release_bus();
        }
        Ok(())
    }

    fn synthetic_read(
        &mut self,
        addr: u16,
        len: usize,
        space: AccessSpace,
    ) -> Result<Vec<u8>, BusError> {
        let control = synthetic_control(space, false);
        let mut out = Vec::with_capacity(len);
        for i in 0..len {
            let mut event = WaitEvent::new(addr.wrapping_add(i as u16), 0xFF, control);
            self.sockets.dispatch(&mut event);
            out.push(event.response().ok_or(BusError::NotDecoded)?);
        }
        Ok(out)
    }

    fn synthetic_write(&mut self, addr: u16, data: &[u8], space: AccessSpace) {
        let control = synthetic_control(space, true);
        for (i, &byte) in data.iter().enumerate() {
            let mut event = WaitEvent::new(addr.wrapping_add(i as u16), byte, control);
            self.sockets.dispatch(&mut event);
        }
    }
}
