//! HID reports shared by the firmware and the host tool.
//!
//! | Report | Kind    | Size | Contents |
//! |--------|---------|------|----------|
//! | 1      | feature | 1    | subrequest selector |
//! | 2      | feature | 8    | payload of the selected subrequest |
//! | 3      | input   | 5    | level (u16 LE), sample (u16 LE), prescaler |
//!
//! Subrequest 1 addresses the parameters record, 2..=5 calibration slots
//! 0..=3. Fixed-point values travel as their raw 16-bit words.

use core::fmt;

use crate::acquisition::{ConfigRequest, LightSample, RequestError};
use crate::calibration::{CalibrationRecord, CalibrationStore, Parameters, RECORD_SIZE, SLOT_COUNT};
use crate::capture::Prescaler;
use crate::fixed::FixedPoint16;

/// USB vendor ID (shared V-USB pool).
pub const VENDOR_ID: u16 = 0x16C0;
/// USB product ID (shared HID PID).
pub const PRODUCT_ID: u16 = 0x05DF;
pub const MANUFACTURER: &str = "uCandela";
pub const PRODUCT: &str = "Light Sensor";

/// Length of the USB string descriptor for an ASCII string.
pub const fn string_descriptor_len(s: &str) -> usize {
    2 + 2 * s.len()
}

/// USB string descriptor (UTF-16LE) for an ASCII string. `N` must be
/// [`string_descriptor_len`] of `s`; extra characters are dropped.
pub const fn string_descriptor<const N: usize>(s: &str) -> [u8; N] {
    let bytes = s.as_bytes();
    let mut desc = [0u8; N];
    desc[0] = N as u8;
    desc[1] = 3;
    let mut i = 0;
    while i < bytes.len() && 2 + 2 * i < N {
        desc[2 + 2 * i] = bytes[i];
        i += 1;
    }
    desc
}

pub const MUX_REPORT_ID: u8 = 1;
pub const DATA_REPORT_ID: u8 = 2;
pub const SAMPLE_REPORT_ID: u8 = 3;

/// Size of the sample input report, without the report ID.
pub const SAMPLE_REPORT_SIZE: usize = 5;
/// Size of the subrequest payload, without the report ID.
pub const DATA_REPORT_SIZE: usize = RECORD_SIZE;

/// Which record report 2 currently reads and writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subrequest {
    Parameters,
    Calibration(u8),
}

impl Subrequest {
    const PARAMETERS_ID: u8 = 1;
    const CALIBRATION_ID: u8 = 2;

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            Self::PARAMETERS_ID => Some(Subrequest::Parameters),
            id if id >= Self::CALIBRATION_ID => {
                let slot = id - Self::CALIBRATION_ID;
                ((slot as usize) < SLOT_COUNT).then_some(Subrequest::Calibration(slot))
            }
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        match self {
            Subrequest::Parameters => Self::PARAMETERS_ID,
            Subrequest::Calibration(slot) => Self::CALIBRATION_ID + slot,
        }
    }

    /// Current payload for a GET_REPORT on report 2.
    pub fn read(self, store: &CalibrationStore) -> [u8; DATA_REPORT_SIZE] {
        match self {
            Subrequest::Parameters => store.parameters().to_bytes(),
            Subrequest::Calibration(slot) => store
                .slot(slot)
                .copied()
                .unwrap_or(CalibrationRecord::ERASED)
                .to_bytes(),
        }
    }

    /// Request carried by a SET_REPORT on report 2.
    pub fn decode(self, payload: &[u8; DATA_REPORT_SIZE]) -> ConfigRequest {
        match self {
            Subrequest::Parameters => ConfigRequest::SetParameters(Parameters::from_bytes(payload)),
            Subrequest::Calibration(slot) => ConfigRequest::SetCalibration {
                slot,
                record: CalibrationRecord::from_bytes(payload),
            },
        }
    }
}

/// Why a feature SET_REPORT was refused. The control transfer is stalled,
/// so the host sees the failure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FeatureError {
    UnknownReport(u8),
    /// Fewer bytes than the report carries.
    Truncated,
    NoSuchSubrequest(u8),
    /// The configuration change itself was refused.
    Rejected(RequestError),
}

impl fmt::Display for FeatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeatureError::UnknownReport(id) => write!(f, "unknown feature report {}", id),
            FeatureError::Truncated => write!(f, "truncated feature report"),
            FeatureError::NoSuchSubrequest(id) => write!(f, "no such subrequest {}", id),
            FeatureError::Rejected(err) => write!(f, "rejected: {}", err),
        }
    }
}

/// Device side of feature reports 1 and 2.
pub struct FeatureReports {
    subrequest: Subrequest,
}

impl FeatureReports {
    pub const fn new() -> Self {
        Self {
            subrequest: Subrequest::Parameters,
        }
    }

    pub fn subrequest(&self) -> Subrequest {
        self.subrequest
    }

    /// Fill `buf` with the report (ID first) and return its length, or
    /// `None` for a report this interface does not have.
    pub fn get_report(
        &self,
        report_id: u8,
        store: &CalibrationStore,
        buf: &mut [u8; 1 + DATA_REPORT_SIZE],
    ) -> Option<usize> {
        buf[0] = report_id;
        match report_id {
            MUX_REPORT_ID => {
                buf[1] = self.subrequest.id();
                Some(2)
            }
            DATA_REPORT_ID => {
                buf[1..].copy_from_slice(&self.subrequest.read(store));
                Some(1 + DATA_REPORT_SIZE)
            }
            _ => None,
        }
    }

    /// Handle a SET_REPORT body (ID first). A write to report 2 is handed
    /// to `apply` before returning, so its verdict can still decide the
    /// status stage.
    pub fn set_report<F>(&mut self, report: &[u8], apply: F) -> Result<(), FeatureError>
    where
        F: FnOnce(ConfigRequest) -> Result<(), RequestError>,
    {
        match report.first().copied() {
            Some(MUX_REPORT_ID) => {
                let id = *report.get(1).ok_or(FeatureError::Truncated)?;
                self.subrequest = Subrequest::from_id(id).ok_or(FeatureError::NoSuchSubrequest(id))?;
                Ok(())
            }
            Some(DATA_REPORT_ID) => {
                let payload: &[u8; DATA_REPORT_SIZE] = report
                    .get(1..1 + DATA_REPORT_SIZE)
                    .and_then(|p| p.try_into().ok())
                    .ok_or(FeatureError::Truncated)?;
                apply(self.subrequest.decode(payload)).map_err(FeatureError::Rejected)
            }
            Some(id) => Err(FeatureError::UnknownReport(id)),
            None => Err(FeatureError::Truncated),
        }
    }
}

impl Default for FeatureReports {
    fn default() -> Self {
        Self::new()
    }
}

/// Decoded sample input report.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SampleReport {
    pub level: FixedPoint16,
    pub sample: FixedPoint16,
    pub prescaler: u8,
}

impl SampleReport {
    pub fn to_bytes(&self) -> [u8; SAMPLE_REPORT_SIZE] {
        let [ll, lh] = self.level.raw().to_le_bytes();
        let [sl, sh] = self.sample.raw().to_le_bytes();
        [ll, lh, sl, sh, self.prescaler]
    }

    /// Parse a report body, with or without its leading report ID.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let body = match bytes.len() {
            SAMPLE_REPORT_SIZE => bytes,
            n if n == SAMPLE_REPORT_SIZE + 1 && bytes[0] == SAMPLE_REPORT_ID => &bytes[1..],
            _ => return None,
        };
        Some(Self {
            level: FixedPoint16::from_raw(u16::from_le_bytes([body[0], body[1]])),
            sample: FixedPoint16::from_raw(u16::from_le_bytes([body[2], body[3]])),
            prescaler: body[4],
        })
    }

    /// `true` when the discharge capture overflowed (sample is the sentinel).
    pub fn is_overflow(&self) -> bool {
        self.sample == FixedPoint16::MAX
    }

    pub fn prescaler(&self) -> Option<Prescaler> {
        Prescaler::new(self.prescaler)
    }
}

impl From<&LightSample> for SampleReport {
    fn from(sample: &LightSample) -> Self {
        Self {
            level: sample.level,
            sample: sample.sample,
            prescaler: sample.prescaler.get(),
        }
    }
}
