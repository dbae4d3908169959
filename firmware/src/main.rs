//! uCandela light sensor firmware for ATmega32U4 (Teensy 2.0).
//!
//! Times the discharge of a photodiode RC front end on PF0 with the analog
//! comparator and Timer4, auto-ranges the timer prescaler, and reports the
//! reciprocal as a light level over a vendor USB HID interface. The
//! parameters record and four calibration slots live in EEPROM and are
//! written back one byte per EE_READY interrupt while sampling continues.

#![no_std]
#![no_main]
#![feature(abi_avr_interrupt)]
#![feature(asm_experimental_arch)]

mod hid;
mod hw;

use avr_device::atmega32u4::Peripherals;

use ucandela_core::{AcquisitionLoop, AsyncStorageWriter, CalibrationStore, CaptureEngine, CaptureShared};

use hid::{UsbSensor, UsbSink};
use hw::{EepromPort, SenseFrontEnd, Timer4};

/// Capture state shared with the comparator and Timer4 handlers.
static CAPTURE: CaptureShared = CaptureShared::new();
/// In-flight EEPROM transfer, drained by EE_READY.
static STORAGE: AsyncStorageWriter = AsyncStorageWriter::new();

const LED: u8 = 0x40; // PD6

/// On AVR we just loop forever.
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[avr_device::interrupt(atmega32u4)]
fn ANALOG_COMP() {
    let dp = unsafe { Peripherals::steal() };
    CAPTURE.on_comparator_edge(&mut Timer4::new(&dp.TC4));
}

#[avr_device::interrupt(atmega32u4)]
fn TIMER4_OVF() {
    let dp = unsafe { Peripherals::steal() };
    CAPTURE.on_timer_overflow(&mut Timer4::new(&dp.TC4));
}

#[avr_device::interrupt(atmega32u4)]
fn EE_READY() {
    let dp = unsafe { Peripherals::steal() };
    STORAGE.on_ready(&mut EepromPort::new(&dp.EEPROM));
}

/// Main entry point.
#[no_mangle]
pub extern "C" fn main() -> ! {
    let dp = unsafe { Peripherals::steal() };

    // Disable clock prescaler (CLKPR): run at the full 16MHz
    dp.CPU.clkpr.write(|w| w.clkpce().set_bit());
    dp.CPU.clkpr.write(|w| unsafe { w.bits(0) });

    // LED on PD6 (Teensy on-board LED) for diagnostics
    dp.PORTD.ddrd.modify(|r, w| unsafe { w.bits(r.bits() | LED) });

    // Configuration is read once, before anything can write to the EEPROM
    let store = {
        let eeprom = EepromPort::new(&dp.EEPROM);
        CalibrationStore::load(|address| eeprom.read_byte(address))
    };

    let mut usb = UsbSensor::new();
    usb.init(&dp);

    let engine = CaptureEngine::new(&CAPTURE, SenseFrontEnd::new(&dp));
    let mut acquisition = AcquisitionLoop::new(engine, &STORAGE, store);

    unsafe { avr_device::interrupt::enable() };

    // LED on to indicate firmware is running
    set_led(&dp, true);

    loop {
        // Poll USB (handle enumeration, control requests). A refused
        // configuration write turns the LED off until one is accepted.
        if let Some(result) = usb.poll(&dp, &mut acquisition) {
            set_led(&dp, result.is_ok());
        }

        let mut eeprom = EepromPort::new(&dp.EEPROM);
        acquisition.step(&mut eeprom, &mut UsbSink::new(&mut usb, &dp));
    }
}

fn set_led(dp: &Peripherals, on: bool) {
    dp.PORTD.portd.modify(|r, w| unsafe {
        if on {
            w.bits(r.bits() | LED)
        } else {
            w.bits(r.bits() & !LED)
        }
    });
}
