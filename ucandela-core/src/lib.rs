//! Light measurement core for the uCandela sensor.
//!
//! The sensor times the discharge of an RC front end through a photodiode:
//! the brighter the light, the faster the sense line crosses the comparator
//! threshold. This crate holds everything that does not touch a register:
//! the fixed-point math, the capture state machine, the interrupt-driven
//! EEPROM writer, the calibration records and the USB report layout.
//!
//! Hardware is reached through the [`capture::CaptureHardware`] and
//! [`storage::NvmPort`] traits, so the crate is `no_std` for the AVR
//! firmware and runs unchanged in host tests and the CLI tool.

#![cfg_attr(not(test), no_std)]

pub mod acquisition;
pub mod calibration;
pub mod capture;
pub mod fixed;
pub mod protocol;
pub mod storage;

pub use acquisition::{AcquisitionLoop, ConfigRequest, LightSample, ReportSink, RequestError};
pub use calibration::{CalibrationRecord, CalibrationStore, Parameters};
pub use capture::{Capture, CaptureEngine, CaptureShared, CaptureState, Prescaler, TriggerEdge};
pub use fixed::FixedPoint16;
pub use storage::{AsyncStorageWriter, NvmPort, WriteError};
