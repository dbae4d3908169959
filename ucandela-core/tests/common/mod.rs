//! Fake sensor hardware for the ucandela-core integration tests

#![allow(dead_code)] // Each test file uses a different subset

use std::collections::VecDeque;

use ucandela_core::capture::{CaptureHardware, CaptureTimer};
use ucandela_core::{CaptureShared, LightSample, NvmPort, Prescaler, ReportSink, TriggerEdge};

// ============================================================================
// Scripted front end
// ============================================================================

/// What happens while the main context sleeps through one capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// Comparator trips with the timer at this count.
    Edge(u8),
    /// Timer wraps before the comparator trips.
    Overflow,
    /// Comparator trips, then a late overflow arrives in the same wait.
    EdgeThenOverflow(u8),
    /// Timer wraps, then a late comparator edge arrives at this count.
    OverflowThenEdge(u8),
}

/// Front end whose interrupts come from a script instead of an RC circuit.
///
/// With the script exhausted every capture overflows, the same upper bound
/// the real timer gives.
pub struct FakeFrontEnd<'a> {
    shared: &'a CaptureShared,
    script: VecDeque<Interrupt>,
    count: u8,
    pub running: Option<Prescaler>,
    pub started_with: Vec<Prescaler>,
    pub precharged: bool,
    pub comparator_interrupt: bool,
    pub edge: Option<TriggerEdge>,
    pub overflow_interrupt: bool,
    pub stale_events: usize,
    pub sleeps: usize,
}

impl<'a> FakeFrontEnd<'a> {
    pub fn new(shared: &'a CaptureShared) -> Self {
        Self {
            shared,
            script: VecDeque::new(),
            count: 0,
            running: None,
            started_with: Vec::new(),
            precharged: false,
            comparator_interrupt: false,
            edge: None,
            overflow_interrupt: false,
            stale_events: 0,
            sleeps: 0,
        }
    }

    pub fn with_script(shared: &'a CaptureShared, script: &[Interrupt]) -> Self {
        let mut hw = Self::new(shared);
        hw.script.extend(script.iter().copied());
        hw
    }

    pub fn push(&mut self, interrupt: Interrupt) {
        self.script.push_back(interrupt);
    }

    pub fn edge_at(&mut self, count: u8) {
        let shared = self.shared;
        self.count = count;
        if !shared.on_comparator_edge(self) {
            self.stale_events += 1;
        }
    }

    pub fn overflow(&mut self) {
        let shared = self.shared;
        if !shared.on_timer_overflow(self) {
            self.stale_events += 1;
        }
    }

    fn deliver(&mut self, interrupt: Interrupt) {
        match interrupt {
            Interrupt::Edge(count) => self.edge_at(count),
            Interrupt::Overflow => self.overflow(),
            Interrupt::EdgeThenOverflow(count) => {
                self.edge_at(count);
                self.overflow();
            }
            Interrupt::OverflowThenEdge(count) => {
                self.overflow();
                self.edge_at(count);
            }
        }
    }
}

impl CaptureTimer for FakeFrontEnd<'_> {
    fn count(&self) -> u8 {
        self.count
    }

    fn stop(&mut self) {
        self.running = None;
    }
}

impl CaptureHardware for FakeFrontEnd<'_> {
    fn precharge(&mut self) {
        self.precharged = true;
    }

    fn release(&mut self) {
        self.precharged = false;
    }

    fn set_trigger_edge(&mut self, edge: TriggerEdge) {
        self.edge = Some(edge);
    }

    fn set_comparator_interrupt(&mut self, enabled: bool) {
        self.comparator_interrupt = enabled;
    }

    fn arm_timer(&mut self) {
        self.count = 0;
        self.running = None;
        self.overflow_interrupt = true;
    }

    fn start_timer(&mut self, prescaler: Prescaler) {
        self.count = 0;
        self.running = Some(prescaler);
        self.started_with.push(prescaler);
    }

    fn idle_while<F: FnMut() -> bool>(&mut self, mut busy: F) {
        while busy() {
            self.sleeps += 1;
            let next = self.script.pop_front().unwrap_or(Interrupt::Overflow);
            self.deliver(next);
        }
    }
}

// ============================================================================
// RAM-backed EEPROM
// ============================================================================

pub const EEPROM_SIZE: u16 = 64;

/// EEPROM image that records every byte programmed into it.
pub struct RamEeprom {
    pub cells: [u8; EEPROM_SIZE as usize],
    pub ready_interrupt: bool,
    pub writes: Vec<(u16, u8)>,
}

impl RamEeprom {
    pub fn new() -> Self {
        Self {
            cells: [0xFF; EEPROM_SIZE as usize],
            ready_interrupt: false,
            writes: Vec::new(),
        }
    }

    pub fn read(&self, address: u16) -> u8 {
        self.cells[address as usize]
    }
}

impl NvmPort for RamEeprom {
    const CAPACITY: u16 = EEPROM_SIZE;

    fn write_byte(&mut self, address: u16, value: u8) {
        self.cells[address as usize] = value;
        self.writes.push((address, value));
    }

    fn set_ready_interrupt(&mut self, enabled: bool) {
        self.ready_interrupt = enabled;
    }
}

// ============================================================================
// Recording sink
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    pub published: Vec<LightSample>,
}

impl ReportSink for RecordingSink {
    fn publish(&mut self, sample: &LightSample) {
        self.published.push(*sample);
    }
}

pub fn prescaler(value: u8) -> Prescaler {
    Prescaler::new(value).unwrap()
}
