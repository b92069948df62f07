#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use busraider_core::prelude::*;
use busraider_machines::SimTarget;

pub const CLOCK_HZ: u32 = 1_000_000;

/// `JR $`
pub const SPIN: [u8; 2] = [0x18, 0xFE];

/// Arbiter over a simulated 1 MHz target with default timing.
pub fn arbiter() -> BusArbiter<SimTarget> {
    arbiter_with(TimingConfig::default())
}

pub fn arbiter_with(timing: TimingConfig) -> BusArbiter<SimTarget> {
    BusArbiter::new(SimTarget::new(CLOCK_HZ), FixedClock(CLOCK_HZ), timing)
}

/// Copy code straight into target RAM.
pub fn load(arb: &mut BusArbiter<SimTarget>, addr: u16, code: &[u8]) {
    arb.bus_mut().load(addr, code);
}

pub fn run(arb: &mut BusArbiter<SimTarget>, polls: usize) {
    for _ in 0..polls {
        arb.poll();
    }
}

/// Poll until `done` holds, giving up after `limit` polls.
pub fn run_until(
    arb: &mut BusArbiter<SimTarget>,
    limit: usize,
    mut done: impl FnMut(&mut BusArbiter<SimTarget>) -> bool,
) -> bool {
    for _ in 0..limit {
        if done(arb) {
            return true;
        }
        arb.poll();
    }
    done(arb)
}

/// Test socket: records what it sees and optionally answers reads.
#[derive(Default)]
pub struct Recorder {
    pub reports: Vec<ActionReport>,
    pub accesses: Vec<(u16, u8, ControlSignals)>,
    /// Answer every IO read with this byte.
    pub io_answer: Option<u8>,
    /// Answer interrupt acknowledge cycles with this vector.
    pub vector: Option<u8>,
}

impl Recorder {
    pub fn reports_for(&self, id: SocketId) -> Vec<ActionReport> {
        self.reports.iter().filter(|r| r.is_for(id)).copied().collect()
    }

    pub fn memory_accesses(&self, addr: u16) -> usize {
        self.accesses
            .iter()
            .filter(|(a, _, c)| *a == addr && c.mreq() && !c.m1())
            .count()
    }
}

impl SocketHandler for Recorder {
    fn bus_access(&mut self, event: &mut WaitEvent) {
        self.accesses.push((event.addr, event.data, event.control));
        if !event.is_read() {
            return;
        }
        if event.control.is_int_ack() {
            if let Some(vector) = self.vector {
                event.respond(vector);
            }
        } else if event.control.iorq() {
            if let Some(value) = self.io_answer {
                event.respond(value);
            }
        }
    }

    fn action_complete(&mut self, report: &ActionReport, _ctx: &mut ActionContext<'_>) {
        self.reports.push(*report);
    }
}

pub fn attach(
    arb: &mut BusArbiter<SimTarget>,
    config: SocketConfig,
) -> (SocketId, Rc<RefCell<Recorder>>) {
    attach_recorder(arb, config, Recorder::default())
}

pub fn attach_recorder(
    arb: &mut BusArbiter<SimTarget>,
    config: SocketConfig,
    recorder: Recorder,
) -> (SocketId, Rc<RefCell<Recorder>>) {
    let recorder = Rc::new(RefCell::new(recorder));
    let id = arb
        .register(config, Rc::clone(&recorder))
        .expect("socket table has room");
    (id, recorder)
}

/// Wait for the first report addressed to `id`.
pub fn wait_for_report(
    arb: &mut BusArbiter<SimTarget>,
    recorder: &Rc<RefCell<Recorder>>,
    id: SocketId,
    limit: usize,
) -> Option<ActionReport> {
    run_until(arb, limit, |_| !recorder.borrow().reports_for(id).is_empty());
    recorder.borrow().reports_for(id).first().copied()
}
