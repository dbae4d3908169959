use anyhow::{bail, Context, Result};
use rusb::{DeviceHandle, GlobalContext};
use std::time::Duration;
use ucandela_core::protocol::{
    SampleReport, Subrequest, DATA_REPORT_ID, DATA_REPORT_SIZE, MUX_REPORT_ID, SAMPLE_REPORT_ID,
    SAMPLE_REPORT_SIZE,
};
use ucandela_core::{CalibrationRecord, Parameters};

/// USB control transfer timeout. A capture at the widest prescaler takes
/// about a quarter second, and the sensor answers between captures.
const USB_TIMEOUT: Duration = Duration::from_secs(2);

const HID_INTERFACE: u8 = 0;

// HID class requests
const GET_REPORT: u8 = 0x01;
const SET_REPORT: u8 = 0x09;
const REPORT_TYPE_INPUT: u16 = 1;
const REPORT_TYPE_FEATURE: u16 = 3;

/// A sensor seen on the bus.
pub struct DeviceInfo {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product: Option<String>,
}

/// List connected devices with the given identifiers.
pub fn detect(vid: u16, pid: u16) -> Result<Vec<DeviceInfo>> {
    let devices = rusb::devices().context("failed to enumerate USB devices")?;
    let mut found = Vec::new();
    for device in devices.iter() {
        let desc = device
            .device_descriptor()
            .context("failed to read device descriptor")?;
        if desc.vendor_id() != vid || desc.product_id() != pid {
            continue;
        }
        // The product string needs an open handle; without permissions the
        // device is still listed.
        let product = device
            .open()
            .ok()
            .and_then(|handle| handle.read_product_string_ascii(&desc).ok());
        found.push(DeviceInfo {
            bus: device.bus_number(),
            address: device.address(),
            vendor_id: desc.vendor_id(),
            product_id: desc.product_id(),
            product,
        });
    }
    Ok(found)
}

/// An opened sensor with its HID interface claimed.
pub struct Sensor {
    handle: DeviceHandle<GlobalContext>,
}

impl Sensor {
    /// Open the first sensor with the given identifiers.
    pub fn open(vid: u16, pid: u16) -> Result<Self> {
        let devices = rusb::devices().context("failed to enumerate USB devices")?;
        for device in devices.iter() {
            let desc = device
                .device_descriptor()
                .context("failed to read device descriptor")?;
            if desc.vendor_id() == vid && desc.product_id() == pid {
                let mut handle = device.open().context(
                    "failed to open light sensor (may need root/sudo or udev rules)",
                )?;
                // Not supported outside Linux; there is no kernel driver to detach there
                let _ = handle.set_auto_detach_kernel_driver(true);
                handle
                    .claim_interface(HID_INTERFACE)
                    .context("failed to claim the sensor's HID interface")?;
                return Ok(Self { handle });
            }
        }
        bail!("light sensor {:04x}:{:04x} not found. Is it plugged in?", vid, pid);
    }

    /// Latest sample, through GET_REPORT on the input report.
    pub fn read_sample(&self) -> Result<SampleReport> {
        let mut buf = [0u8; 1 + SAMPLE_REPORT_SIZE];
        let n = self
            .get_report(REPORT_TYPE_INPUT, SAMPLE_REPORT_ID, &mut buf)
            .context("failed to read sample report")?;
        match SampleReport::parse(&buf[..n]) {
            Some(report) => Ok(report),
            None => bail!("malformed sample report ({} bytes)", n),
        }
    }

    pub fn parameters(&self) -> Result<Parameters> {
        let payload = self.read_record(Subrequest::Parameters)?;
        Ok(Parameters::from_bytes(&payload))
    }

    pub fn set_parameters(&self, parameters: &Parameters) -> Result<()> {
        self.write_record(Subrequest::Parameters, &parameters.to_bytes())
    }

    pub fn calibration(&self, slot: u8) -> Result<CalibrationRecord> {
        let payload = self.read_record(Subrequest::Calibration(slot))?;
        Ok(CalibrationRecord::from_bytes(&payload))
    }

    pub fn set_calibration(&self, slot: u8, record: &CalibrationRecord) -> Result<()> {
        self.write_record(Subrequest::Calibration(slot), &record.to_bytes())
    }

    fn select(&self, subrequest: Subrequest) -> Result<()> {
        self.set_report(MUX_REPORT_ID, &[MUX_REPORT_ID, subrequest.id()])
            .with_context(|| format!("failed to select subrequest {}", subrequest.id()))
    }

    fn read_record(&self, subrequest: Subrequest) -> Result<[u8; DATA_REPORT_SIZE]> {
        self.select(subrequest)?;
        let mut buf = [0u8; 1 + DATA_REPORT_SIZE];
        let n = self
            .get_report(REPORT_TYPE_FEATURE, DATA_REPORT_ID, &mut buf)
            .context("failed to read configuration record")?;
        if n != buf.len() || buf[0] != DATA_REPORT_ID {
            bail!("malformed configuration report ({} bytes)", n);
        }
        let mut payload = [0u8; DATA_REPORT_SIZE];
        payload.copy_from_slice(&buf[1..]);
        Ok(payload)
    }

    fn write_record(&self, subrequest: Subrequest, payload: &[u8; DATA_REPORT_SIZE]) -> Result<()> {
        self.select(subrequest)?;
        let mut buf = [0u8; 1 + DATA_REPORT_SIZE];
        buf[0] = DATA_REPORT_ID;
        buf[1..].copy_from_slice(payload);
        self.set_report(DATA_REPORT_ID, &buf)
            .context("the sensor refused the configuration record (its write queue may be full, try again)")
    }

    fn get_report(&self, report_type: u16, report_id: u8, buf: &mut [u8]) -> Result<usize> {
        // bmRequestType: 0xA1 (device-to-host, class, interface)
        // wValue: report type in the high byte, report ID in the low byte
        let n = self.handle.read_control(
            0xA1,
            GET_REPORT,
            report_type << 8 | report_id as u16,
            HID_INTERFACE as u16,
            buf,
            USB_TIMEOUT,
        )?;
        Ok(n)
    }

    fn set_report(&self, report_id: u8, data: &[u8]) -> Result<()> {
        // bmRequestType: 0x21 (host-to-device, class, interface)
        self.handle.write_control(
            0x21,
            SET_REPORT,
            REPORT_TYPE_FEATURE << 8 | report_id as u16,
            HID_INTERFACE as u16,
            data,
            USB_TIMEOUT,
        )?;
        Ok(())
    }
}

impl Drop for Sensor {
    fn drop(&mut self) {
        let _ = self.handle.release_interface(HID_INTERFACE);
    }
}
