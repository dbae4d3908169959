//! Interrupt-driven EEPROM writes.
//!
//! The EEPROM accepts one byte at a time and raises its "ready" interrupt
//! when it can take the next one. A transfer is started from the main
//! context and then drained by [`AsyncStorageWriter::on_ready`], one byte per
//! interrupt, so sampling never waits for the ~3.4ms per-byte write time.
//!
//! Only one transfer can be in flight. The bytes are copied into the
//! descriptor when the transfer starts, so the caller's buffer is free as
//! soon as `start_write` returns.

use core::cell::{Cell, RefCell};
use core::fmt;

use critical_section::Mutex;
use heapless::Vec;

/// Largest single transfer, in bytes.
pub const TRANSFER_CAPACITY: usize = 16;

/// Byte-wide non-volatile memory with a write-ready interrupt.
pub trait NvmPort {
    /// Size of the address space in bytes.
    const CAPACITY: u16;

    /// Start programming one byte. Only called when the device is ready.
    fn write_byte(&mut self, address: u16, value: u8);

    fn set_ready_interrupt(&mut self, enabled: bool);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WriteError {
    /// A transfer is still in flight; retry once it completes.
    Busy,
    /// More than [`TRANSFER_CAPACITY`] bytes.
    TooLong,
    /// The write would run past the end of the device.
    OutOfBounds,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::Busy => write!(f, "storage transfer already in progress"),
            WriteError::TooLong => write!(f, "transfer exceeds {} bytes", TRANSFER_CAPACITY),
            WriteError::OutOfBounds => write!(f, "transfer runs past the end of storage"),
        }
    }
}

struct Transfer {
    data: Vec<u8, TRANSFER_CAPACITY>,
    destination: u16,
    remaining: usize,
}

impl Transfer {
    const fn empty() -> Self {
        Self {
            data: Vec::new(),
            destination: 0,
            remaining: 0,
        }
    }
}

/// The single in-flight transfer and its busy flag.
pub struct AsyncStorageWriter {
    transfer: Mutex<RefCell<Transfer>>,
    busy: Mutex<Cell<bool>>,
}

impl AsyncStorageWriter {
    pub const fn new() -> Self {
        Self {
            transfer: Mutex::new(RefCell::new(Transfer::empty())),
            busy: Mutex::new(Cell::new(false)),
        }
    }

    /// Queue `source` for writing at `destination` and enable the ready
    /// interrupt. Fails without touching the current transfer if one is
    /// still in flight.
    pub fn start_write<P: NvmPort>(
        &self,
        port: &mut P,
        source: &[u8],
        destination: u16,
    ) -> Result<(), WriteError> {
        if source.len() > TRANSFER_CAPACITY {
            return Err(WriteError::TooLong);
        }
        if destination as usize + source.len() > P::CAPACITY as usize {
            return Err(WriteError::OutOfBounds);
        }

        critical_section::with(|cs| {
            let busy = self.busy.borrow(cs);
            if busy.get() {
                return Err(WriteError::Busy);
            }
            if source.is_empty() {
                return Ok(());
            }

            let mut transfer = self.transfer.borrow_ref_mut(cs);
            transfer.data.clear();
            // length was checked against the capacity above
            let _ = transfer.data.extend_from_slice(source);
            transfer.destination = destination;
            transfer.remaining = source.len();
            busy.set(true);

            port.set_ready_interrupt(true);
            Ok(())
        })
    }

    /// Ready interrupt: write the next byte, and finish the transfer after
    /// the last one.
    pub fn on_ready<P: NvmPort>(&self, port: &mut P) {
        critical_section::with(|cs| {
            let busy = self.busy.borrow(cs);
            let mut transfer = self.transfer.borrow_ref_mut(cs);

            if !busy.get() || transfer.remaining == 0 {
                port.set_ready_interrupt(false);
                busy.set(false);
                return;
            }

            let index = transfer.data.len() - transfer.remaining;
            port.write_byte(transfer.destination + index as u16, transfer.data[index]);
            transfer.remaining -= 1;

            if transfer.remaining == 0 {
                port.set_ready_interrupt(false);
                busy.set(false);
            }
        });
    }

    /// `true` once the last transfer has been fully handed to the device.
    pub fn is_complete(&self) -> bool {
        critical_section::with(|cs| !self.busy.borrow(cs).get())
    }

    /// Bytes still waiting to be written.
    pub fn remaining(&self) -> usize {
        critical_section::with(|cs| self.transfer.borrow_ref(cs).remaining)
    }
}

impl Default for AsyncStorageWriter {
    fn default() -> Self {
        Self::new()
    }
}
