//! The sampling loop: capture, convert, publish, and persist configuration
//! changes in the background.

use core::fmt;

use heapless::Deque;

use crate::calibration::{CalibrationRecord, CalibrationStore, Parameters, PendingWrite};
use crate::capture::{Capture, CaptureEngine, CaptureHardware, Prescaler, TriggerEdge};
use crate::fixed::FixedPoint16;
use crate::storage::{AsyncStorageWriter, NvmPort, WriteError};

/// Configuration writes that can wait for the EEPROM at once.
pub const WRITE_QUEUE_DEPTH: usize = 4;

/// One converted measurement.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LightSample {
    /// Discharge time, `FixedPoint16::MAX` on overflow.
    pub sample: FixedPoint16,
    /// Reciprocal of the discharge time: brighter light, larger value.
    pub level: FixedPoint16,
    pub prescaler: Prescaler,
    pub overflow: bool,
}

impl LightSample {
    pub fn from_capture(capture: Capture, parameters: &Parameters) -> Self {
        Self {
            sample: capture.sample,
            level: capture.sample.inverse(parameters.extra_shift()),
            prescaler: capture.prescaler,
            overflow: capture.overflow,
        }
    }
}

/// Where finished samples go (the USB transport on the device).
pub trait ReportSink {
    fn publish(&mut self, sample: &LightSample);
}

/// Configuration change coming in from the host.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigRequest {
    SetParameters(Parameters),
    SetCalibration { slot: u8, record: CalibrationRecord },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RequestError {
    /// Too many writes are waiting for the EEPROM.
    QueueFull,
    NoSuchSlot,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::QueueFull => write!(f, "{} writes already pending", WRITE_QUEUE_DEPTH),
            RequestError::NoSuchSlot => write!(f, "no such calibration slot"),
        }
    }
}

pub struct AcquisitionLoop<'a, H> {
    engine: CaptureEngine<'a, H>,
    storage: &'a AsyncStorageWriter,
    store: CalibrationStore,
    pending: Deque<PendingWrite, WRITE_QUEUE_DEPTH>,
}

impl<'a, H: CaptureHardware> AcquisitionLoop<'a, H> {
    /// Takes over the engine and resets it for rising-edge captures.
    pub fn new(
        mut engine: CaptureEngine<'a, H>,
        storage: &'a AsyncStorageWriter,
        store: CalibrationStore,
    ) -> Self {
        engine.reset(TriggerEdge::Rising);
        Self {
            engine,
            storage,
            store,
            pending: Deque::new(),
        }
    }

    pub fn engine(&self) -> &CaptureEngine<'a, H> {
        &self.engine
    }

    pub fn store(&self) -> &CalibrationStore {
        &self.store
    }

    /// Writes accepted but not yet handed to the storage writer.
    pub fn pending_writes(&self) -> usize {
        self.pending.len()
    }

    /// Apply a configuration change now and schedule it for persistence.
    ///
    /// A second change to a record that is still waiting replaces the
    /// queued bytes instead of taking another queue entry.
    pub fn request(&mut self, request: ConfigRequest) -> Result<(), RequestError> {
        let address = match request {
            ConfigRequest::SetParameters(_) => crate::calibration::PARAMETERS_ADDRESS,
            ConfigRequest::SetCalibration { slot, .. } => {
                crate::calibration::slot_address(slot).ok_or(RequestError::NoSuchSlot)?
            }
        };
        let queued = self.pending.iter().any(|w| w.address == address);
        if !queued && self.pending.is_full() {
            return Err(RequestError::QueueFull);
        }

        let write = match request {
            ConfigRequest::SetParameters(parameters) => self.store.set_parameters(parameters),
            ConfigRequest::SetCalibration { slot, record } => self
                .store
                .set_slot(slot, record)
                .ok_or(RequestError::NoSuchSlot)?,
        };

        match self.pending.iter_mut().find(|w| w.address == address) {
            Some(existing) => existing.bytes = write.bytes,
            None => {
                let _ = self.pending.push_back(write);
            }
        }
        Ok(())
    }

    /// Hand the oldest waiting write to the storage writer if it is idle.
    pub fn flush<P: NvmPort>(&mut self, port: &mut P) {
        let Some(write) = self.pending.front().copied() else {
            return;
        };
        match self.storage.start_write(port, &write.bytes, write.address) {
            Ok(()) => {
                self.pending.pop_front();
            }
            Err(WriteError::Busy) => {
                #[cfg(feature = "defmt")]
                defmt::debug!("storage busy, write to {=u16:#x} deferred", write.address);
            }
            Err(_err) => {
                #[cfg(feature = "defmt")]
                defmt::warn!("dropping write to {=u16:#x}: {}", write.address, _err);
                self.pending.pop_front();
            }
        }
    }

    /// One iteration: start any waiting write, take a sample, convert it,
    /// publish it.
    pub fn step<P: NvmPort, S: ReportSink>(&mut self, port: &mut P, sink: &mut S) -> LightSample {
        self.flush(port);

        let capture = self.engine.next_capture();
        let sample = LightSample::from_capture(capture, &self.store.parameters());
        sink.publish(&sample);
        sample
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_level_is_reciprocal_of_sample() {
        let parameters = Parameters { scale: 10 };
        let capture = Capture {
            sample: FixedPoint16::compose(0x80 << 8, 7),
            prescaler: Prescaler::new(8).unwrap(),
            overflow: false,
        };
        let sample = LightSample::from_capture(capture, &parameters);
        // 0x8000 * 2^(7 - 15) = 128, and 2^10 / 128 = 8 (minus the LSB bias)
        assert_eq!(sample.level.to_integer16(), 7);
        assert_eq!(sample.level, capture.sample.inverse(10));

        let longer = Capture {
            sample: FixedPoint16::compose(0xF0 << 8, 7),
            ..capture
        };
        let darker = LightSample::from_capture(longer, &parameters);
        assert!(darker.level.to_integer32() < sample.level.to_integer32());
    }
}
