//! Register-level implementations of the core hardware traits.
//!
//! Pin and peripheral use on the Teensy 2.0 (ATmega32U4):
//!   PF0 / ADC0   sense line, precharged high, then left floating
//!   AC           positive input on the bandgap reference (ACBG), negative
//!                input muxed to ADC0 (ACME with the ADC disabled)
//!   Timer4       discharge timer, 8-bit range (OCR4C = 0xFF), clocked
//!                through the 4-bit CS43:0 prescaler
//!   EEPROM       calibration store, written from EE_READY

use avr_device::atmega32u4::{Peripherals, EEPROM, TC4};

use ucandela_core::capture::{CaptureHardware, CaptureTimer};
use ucandela_core::{NvmPort, Prescaler, TriggerEdge};

const SENSE_PIN: u8 = 0x01; // PF0

// ACSR
const ACBG: u8 = 1 << 6;
const ACI: u8 = 1 << 4;
const ACIE: u8 = 1 << 3;
const ACIS_RISING: u8 = 0b11;
const ACIS_FALLING: u8 = 0b10;

// ADCSRB
const ACME: u8 = 1 << 6;

// TCCR4B / TIMSK4 / TIFR4
const PSR4: u8 = 1 << 6;
const TOIE4: u8 = 1 << 2;
const TOV4: u8 = 1 << 2;
const TIMER4_TOP: u8 = 0xFF;

// EECR
const EERIE: u8 = 1 << 3;
const EEMPE: u8 = 1 << 2;
const EEPE: u8 = 1 << 1;
const EERE: u8 = 1 << 0;

// SMCR: sleep enable, idle mode (SM2:0 = 000)
const SMCR_IDLE: u8 = 0x01;

/// Timer4 as seen from the capture interrupt handlers.
pub struct Timer4<'a> {
    tc4: &'a TC4,
}

impl<'a> Timer4<'a> {
    pub fn new(tc4: &'a TC4) -> Self {
        Self { tc4 }
    }
}

impl CaptureTimer for Timer4<'_> {
    fn count(&self) -> u8 {
        self.tc4.tcnt4.read().bits()
    }

    fn stop(&mut self) {
        self.tc4.tccr4b.write(|w| unsafe { w.bits(0) });
        self.tc4.tifr4.write(|w| unsafe { w.bits(TOV4) });
    }
}

/// Sense line, comparator, Timer4 and the sleep controller.
pub struct SenseFrontEnd<'a> {
    dp: &'a Peripherals,
}

impl<'a> SenseFrontEnd<'a> {
    /// Route ADC0 to the comparator and leave the sense line precharged.
    pub fn new(dp: &'a Peripherals) -> Self {
        // the comparator mux only works with the ADC off
        dp.ADC.adcsra.write(|w| unsafe { w.bits(0) });
        dp.ADC.admux.write(|w| unsafe { w.bits(0) });
        dp.ADC.adcsrb.modify(|r, w| unsafe { w.bits(r.bits() | ACME) });
        dp.ADC.didr0.modify(|r, w| unsafe { w.bits(r.bits() | SENSE_PIN) });

        let mut front_end = Self { dp };
        front_end.precharge();
        front_end
    }

    fn timer(&self) -> Timer4<'a> {
        Timer4::new(&self.dp.TC4)
    }
}

impl CaptureTimer for SenseFrontEnd<'_> {
    fn count(&self) -> u8 {
        self.timer().count()
    }

    fn stop(&mut self) {
        self.timer().stop();
    }
}

impl CaptureHardware for SenseFrontEnd<'_> {
    fn precharge(&mut self) {
        let portf = &self.dp.PORTF;
        portf.portf.modify(|r, w| unsafe { w.bits(r.bits() | SENSE_PIN) });
        portf.ddrf.modify(|r, w| unsafe { w.bits(r.bits() | SENSE_PIN) });
    }

    fn release(&mut self) {
        let portf = &self.dp.PORTF;
        portf.ddrf.modify(|r, w| unsafe { w.bits(r.bits() & !SENSE_PIN) });
        portf.portf.modify(|r, w| unsafe { w.bits(r.bits() & !SENSE_PIN) });
    }

    fn set_trigger_edge(&mut self, edge: TriggerEdge) {
        let acis = match edge {
            TriggerEdge::Rising => ACIS_RISING,
            TriggerEdge::Falling => ACIS_FALLING,
        };
        // ACIE stays off until a capture starts; ACI is write-one-to-clear
        self.dp.AC.acsr.write(|w| unsafe { w.bits(ACBG | ACI | acis) });
    }

    fn set_comparator_interrupt(&mut self, enabled: bool) {
        let acsr = &self.dp.AC.acsr;
        if enabled {
            acsr.modify(|r, w| unsafe { w.bits(r.bits() | ACI | ACIE) });
        } else {
            acsr.modify(|r, w| unsafe { w.bits((r.bits() & !ACIE) | ACI) });
        }
    }

    fn arm_timer(&mut self) {
        let tc4 = &self.dp.TC4;
        tc4.tccr4b.write(|w| unsafe { w.bits(PSR4) });
        tc4.tc4h.write(|w| unsafe { w.bits(0) });
        tc4.tcnt4.write(|w| unsafe { w.bits(0) });
        tc4.tc4h.write(|w| unsafe { w.bits(0) });
        tc4.ocr4c.write(|w| unsafe { w.bits(TIMER4_TOP) });
        tc4.tifr4.write(|w| unsafe { w.bits(TOV4) });
        tc4.timsk4.modify(|r, w| unsafe { w.bits(r.bits() | TOIE4) });
    }

    fn start_timer(&mut self, prescaler: Prescaler) {
        let tc4 = &self.dp.TC4;
        tc4.tc4h.write(|w| unsafe { w.bits(0) });
        tc4.tcnt4.write(|w| unsafe { w.bits(0) });
        tc4.tccr4b.write(|w| unsafe { w.bits(prescaler.get() & 0x0F) });
    }

    fn idle_while<F: FnMut() -> bool>(&mut self, mut busy: F) {
        let smcr = &self.dp.CPU.smcr;
        smcr.write(|w| unsafe { w.bits(SMCR_IDLE) });
        loop {
            avr_device::interrupt::disable();
            if !busy() {
                break;
            }
            // sei takes effect after the next instruction, so the wakeup
            // cannot slip in between the check and the sleep
            unsafe { core::arch::asm!("sei", "sleep") };
        }
        smcr.write(|w| unsafe { w.bits(0) });
        unsafe { avr_device::interrupt::enable() };
    }
}

/// On-chip EEPROM, 1 KiB.
pub struct EepromPort<'a> {
    eeprom: &'a EEPROM,
}

impl<'a> EepromPort<'a> {
    pub fn new(eeprom: &'a EEPROM) -> Self {
        Self { eeprom }
    }

    /// Blocking read, for loading the store at boot.
    pub fn read_byte(&self, address: u16) -> u8 {
        while self.eeprom.eecr.read().bits() & EEPE != 0 {}
        self.eeprom.eear.write(|w| unsafe { w.bits(address) });
        self.eeprom.eecr.write(|w| unsafe { w.bits(EERE) });
        self.eeprom.eedr.read().bits()
    }
}

impl NvmPort for EepromPort<'_> {
    const CAPACITY: u16 = 1024;

    fn write_byte(&mut self, address: u16, value: u8) {
        let eecr = &self.eeprom.eecr;
        self.eeprom.eear.write(|w| unsafe { w.bits(address) });
        self.eeprom.eedr.write(|w| unsafe { w.bits(value) });
        // EEPE must follow EEMPE within four cycles
        eecr.write(|w| unsafe { w.bits(EERIE | EEMPE) });
        eecr.write(|w| unsafe { w.bits(EERIE | EEMPE | EEPE) });
    }

    fn set_ready_interrupt(&mut self, enabled: bool) {
        let eecr = &self.eeprom.eecr;
        if enabled {
            eecr.modify(|r, w| unsafe { w.bits(r.bits() | EERIE) });
        } else {
            eecr.modify(|r, w| unsafe { w.bits(r.bits() & !EERIE) });
        }
    }
}
