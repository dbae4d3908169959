//! Discharge-time capture with automatic range selection.
//!
//! A capture precharges the sense line, then lets it float and times how
//! long the RC front end takes to cross the comparator threshold. Two
//! interrupts race to end a capture:
//!
//! - the comparator edge, which latches the timer count (`Complete`)
//! - the timer overflow, which latches `COUNT_MAX` (`CompleteOverflow`)
//!
//! Whichever arrives second finds the state already out of `Sampling` and is
//! ignored. After each capture the prescaler is moved one step so the next
//! count lands in the useful part of the 8-bit range.

use core::cell::Cell;

use critical_section::Mutex;

use crate::fixed::FixedPoint16;

/// Counts below this mean the window was too wide for good resolution.
pub const UNDERFLOW_THRESHOLD: u8 = 0x10;
/// Counts at or above this mean the capture nearly overflowed.
pub const OVERFLOW_THRESHOLD: u8 = 0xF0;
/// Value latched when the timer wraps before the comparator trips.
pub const COUNT_MAX: u8 = 0xFF;

/// Timer clock divider selection, always in `1..=15`.
///
/// Setting `n` clocks the timer at `F_CPU / 2^(n-1)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Prescaler(u8);

impl Prescaler {
    pub const MIN: Self = Self(1);
    pub const MAX: Self = Self(15);

    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN.0 && value <= Self::MAX.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    /// One step slower clock, capped at `MAX`.
    pub const fn widen(self) -> Self {
        if self.0 >= Self::MAX.0 {
            Self::MAX
        } else {
            Self(self.0 + 1)
        }
    }

    /// One step faster clock, floored at `MIN`.
    pub const fn narrow(self) -> Self {
        if self.0 <= Self::MIN.0 {
            Self::MIN
        } else {
            Self(self.0 - 1)
        }
    }
}

/// Capture state machine.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureState {
    Idle,
    Ready,
    Sampling,
    Complete,
    CompleteOverflow,
}

/// Comparator edge that ends a capture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerEdge {
    Rising,
    Falling,
}

/// Timer access needed from interrupt context.
pub trait CaptureTimer {
    /// Current 8-bit count.
    fn count(&self) -> u8;
    /// Stop counting and clear any pending overflow.
    fn stop(&mut self);
}

/// Everything the capture engine drives from the main context.
pub trait CaptureHardware: CaptureTimer {
    /// Drive the sense line to its precharge level.
    fn precharge(&mut self);
    /// Let the sense line float; the transient being timed starts here.
    fn release(&mut self);
    fn set_trigger_edge(&mut self, edge: TriggerEdge);
    fn set_comparator_interrupt(&mut self, enabled: bool);
    /// Reset the count and enable the overflow interrupt, leaving the
    /// timer stopped.
    fn arm_timer(&mut self);
    /// Clear the count and start counting with the given divider.
    fn start_timer(&mut self, prescaler: Prescaler);
    /// Suspend until an interrupt has been handled, for as long as `busy`
    /// keeps returning `true`.
    fn idle_while<F: FnMut() -> bool>(&mut self, busy: F);
}

/// Capture state shared between the main context and the two interrupt
/// handlers.
pub struct CaptureShared {
    state: Mutex<Cell<CaptureState>>,
    count: Mutex<Cell<u8>>,
}

impl CaptureShared {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(CaptureState::Idle)),
            count: Mutex::new(Cell::new(0)),
        }
    }

    pub fn state(&self) -> CaptureState {
        critical_section::with(|cs| self.state.borrow(cs).get())
    }

    /// State and latched count, read together.
    pub fn snapshot(&self) -> (CaptureState, u8) {
        critical_section::with(|cs| (self.state.borrow(cs).get(), self.count.borrow(cs).get()))
    }

    /// Comparator interrupt. Returns `false` if the event was stale.
    pub fn on_comparator_edge<T: CaptureTimer>(&self, timer: &mut T) -> bool {
        critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            if state.get() != CaptureState::Sampling {
                return false;
            }
            self.count.borrow(cs).set(timer.count());
            timer.stop();
            state.set(CaptureState::Complete);
            true
        })
    }

    /// Timer overflow interrupt. Returns `false` if the event was stale.
    pub fn on_timer_overflow<T: CaptureTimer>(&self, timer: &mut T) -> bool {
        critical_section::with(|cs| {
            let state = self.state.borrow(cs);
            if state.get() != CaptureState::Sampling {
                return false;
            }
            self.count.borrow(cs).set(COUNT_MAX);
            timer.stop();
            state.set(CaptureState::CompleteOverflow);
            true
        })
    }

    fn set_state(&self, state: CaptureState) {
        critical_section::with(|cs| self.state.borrow(cs).set(state));
    }
}

impl Default for CaptureShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one finished capture.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capture {
    /// `compose(count << 8, prescaler - 1)`, or `FixedPoint16::MAX` on overflow.
    pub sample: FixedPoint16,
    /// Divider the capture ran with.
    pub prescaler: Prescaler,
    pub overflow: bool,
}

/// Main-context side of the capture engine.
pub struct CaptureEngine<'a, H> {
    shared: &'a CaptureShared,
    hw: H,
    prescaler: Prescaler,
    running: Prescaler,
}

impl<'a, H: CaptureHardware> CaptureEngine<'a, H> {
    /// New engine starting at the widest window.
    pub fn new(shared: &'a CaptureShared, hw: H) -> Self {
        Self {
            shared,
            hw,
            prescaler: Prescaler::MAX,
            running: Prescaler::MAX,
        }
    }

    /// Divider the next capture will use.
    pub fn prescaler(&self) -> Prescaler {
        self.prescaler
    }

    pub fn set_prescaler(&mut self, prescaler: Prescaler) {
        self.prescaler = prescaler;
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    pub fn hardware(&self) -> &H {
        &self.hw
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hw
    }

    /// Precharge the front end and arm the timer without starting it.
    pub fn reset(&mut self, edge: TriggerEdge) {
        self.hw.precharge();
        self.hw.set_trigger_edge(edge);
        self.hw.arm_timer();
        self.shared.set_state(CaptureState::Ready);
    }

    /// Begin a capture with the given divider.
    pub fn start(&mut self, prescaler: Prescaler) {
        let shared = self.shared;
        let hw = &mut self.hw;
        critical_section::with(|cs| {
            shared.state.borrow(cs).set(CaptureState::Sampling);
            hw.set_comparator_interrupt(true);
            hw.start_timer(prescaler);
            hw.release();
        });
        self.running = prescaler;
    }

    /// Run one capture at the current prescaler and wait for it to end.
    pub fn get_next_sample(&mut self) -> FixedPoint16 {
        self.next_capture().sample
    }

    /// Like [`CaptureEngine::get_next_sample`], with the capture details.
    pub fn next_capture(&mut self) -> Capture {
        self.start(self.prescaler);
        let shared = self.shared;
        self.hw.idle_while(|| shared.state() == CaptureState::Sampling);
        // a capture only leaves Sampling through one of the two handlers
        self.finish().unwrap_or(Capture {
            sample: FixedPoint16::MAX,
            prescaler: self.running,
            overflow: true,
        })
    }

    /// Non-blocking check on a capture started with [`CaptureEngine::start`].
    pub fn poll(&mut self) -> Option<Capture> {
        self.finish()
    }

    fn finish(&mut self) -> Option<Capture> {
        let (state, count) = self.shared.snapshot();
        let overflow = match state {
            CaptureState::Complete => false,
            CaptureState::CompleteOverflow => true,
            _ => return None,
        };

        self.hw.set_comparator_interrupt(false);
        self.hw.stop();
        self.hw.precharge();

        let used = self.running;
        let sample = if overflow {
            self.prescaler = used.widen();
            FixedPoint16::MAX
        } else {
            if count >= OVERFLOW_THRESHOLD {
                self.prescaler = used.widen();
            } else if count < UNDERFLOW_THRESHOLD {
                self.prescaler = used.narrow();
            } else {
                self.prescaler = used;
            }
            FixedPoint16::compose((count as u16) << 8, used.get() - 1)
        };

        self.shared.set_state(CaptureState::Ready);

        Some(Capture {
            sample,
            prescaler: used,
            overflow,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prescaler_bounds() {
        assert_eq!(Prescaler::new(0), None);
        assert_eq!(Prescaler::new(16), None);
        assert_eq!(Prescaler::new(7).map(Prescaler::get), Some(7));
        assert_eq!(Prescaler::MAX.widen(), Prescaler::MAX);
        assert_eq!(Prescaler::MIN.narrow(), Prescaler::MIN);
        assert_eq!(Prescaler::MIN.widen().get(), 2);
    }

    struct StoppedTimer {
        count: u8,
        stopped: bool,
    }

    impl CaptureTimer for StoppedTimer {
        fn count(&self) -> u8 {
            self.count
        }

        fn stop(&mut self) {
            self.stopped = true;
        }
    }

    #[test]
    fn handlers_ignore_events_outside_sampling() {
        let shared = CaptureShared::new();
        let mut timer = StoppedTimer { count: 0x42, stopped: false };

        assert!(!shared.on_comparator_edge(&mut timer));
        assert!(!shared.on_timer_overflow(&mut timer));
        assert_eq!(shared.state(), CaptureState::Idle);
        assert!(!timer.stopped);
    }

    #[test]
    fn first_handler_wins() {
        let shared = CaptureShared::new();
        shared.set_state(CaptureState::Sampling);
        let mut timer = StoppedTimer { count: 0x42, stopped: false };

        assert!(shared.on_comparator_edge(&mut timer));
        assert!(!shared.on_timer_overflow(&mut timer));
        assert_eq!(shared.snapshot(), (CaptureState::Complete, 0x42));
        assert!(timer.stopped);
    }

    #[test]
    fn overflow_latches_sentinel() {
        let shared = CaptureShared::new();
        shared.set_state(CaptureState::Sampling);
        let mut timer = StoppedTimer { count: 0x03, stopped: false };

        assert!(shared.on_timer_overflow(&mut timer));
        assert!(!shared.on_comparator_edge(&mut timer));
        assert_eq!(shared.snapshot(), (CaptureState::CompleteOverflow, COUNT_MAX));
    }
}
