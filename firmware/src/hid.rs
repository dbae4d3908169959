//! Vendor-defined USB HID interface for the light sensor.
//!
//! The host reads samples from interrupt endpoint 1 (or with GET_REPORT),
//! picks a configuration record with feature report 1 and reads or writes
//! it through feature report 2. See `ucandela_core::protocol` for the
//! payloads. Uses direct register access via avr-device, polled from the
//! main loop.

use avr_device::atmega32u4::Peripherals;

use ucandela_core::capture::CaptureHardware;
use ucandela_core::protocol::{
    string_descriptor, string_descriptor_len, FeatureError, FeatureReports, SampleReport,
    DATA_REPORT_ID, DATA_REPORT_SIZE, MANUFACTURER, MUX_REPORT_ID, PRODUCT, PRODUCT_ID,
    SAMPLE_REPORT_ID, SAMPLE_REPORT_SIZE, VENDOR_ID,
};
use ucandela_core::{AcquisitionLoop, LightSample, ReportSink};

// ============================================================================
// ATmega32U4 USB Register-Level Driver
// ============================================================================

const EP0_SIZE: u8 = 64; // Control endpoint size
const EP1_SIZE: u8 = 8; // Interrupt IN endpoint size (sample reports)

// HID class requests
const GET_REPORT: u8 = 0x01;
const SET_REPORT: u8 = 0x09;
const REPORT_TYPE_INPUT: u8 = 1;
const REPORT_TYPE_FEATURE: u8 = 3;

/// Report descriptor: two feature reports for configuration, one input
/// report for samples, all on the vendor page.
static HID_REPORT_DESCRIPTOR: [u8; 41] = [
    0x06, 0x00, 0xFF, // Usage Page (Vendor Defined 0xFF00)
    0x09, 0x01, // Usage (Vendor Usage 1)
    0xA1, 0x01, // Collection (Application)
    0x15, 0x00, //   Logical Minimum (0)
    0x26, 0xFF, 0x00, // Logical Maximum (255)
    0x75, 0x08, //   Report Size (8)
    // Subrequest selector
    0x85, MUX_REPORT_ID, // Report ID (1)
    0x95, 0x01, //   Report Count (1)
    0x09, 0x00, //   Usage (Undefined)
    0xB2, 0x02, 0x01, // Feature (Data, Variable, Absolute, Buffered Bytes)
    // Subrequest payload
    0x85, DATA_REPORT_ID, // Report ID (2)
    0x95, DATA_REPORT_SIZE as u8, // Report Count (8)
    0x09, 0x00, //   Usage (Undefined)
    0xB2, 0x02, 0x01, // Feature (Data, Variable, Absolute, Buffered Bytes)
    // Light sample
    0x85, SAMPLE_REPORT_ID, // Report ID (3)
    0x95, SAMPLE_REPORT_SIZE as u8, // Report Count (5)
    0x09, 0x00, //   Usage (Undefined)
    0x81, 0x02, //   Input (Data, Variable, Absolute)
    0xC0, // End Collection
];

static DEVICE_DESCRIPTOR: [u8; 18] = [
    18,   // bLength
    1,    // bDescriptorType (Device)
    0x00, 0x02, // bcdUSB (2.0)
    0,    // bDeviceClass (defined at interface level)
    0,    // bDeviceSubClass
    0,    // bDeviceProtocol
    EP0_SIZE, // bMaxPacketSize0
    VENDOR_ID.to_le_bytes()[0], VENDOR_ID.to_le_bytes()[1], // idVendor
    PRODUCT_ID.to_le_bytes()[0], PRODUCT_ID.to_le_bytes()[1], // idProduct
    0x01, 0x00, // bcdDevice (1.0)
    1,    // iManufacturer
    2,    // iProduct
    0,    // iSerialNumber
    1,    // bNumConfigurations
];

static CONFIG_DESCRIPTOR: [u8; 34] = [
    // Configuration descriptor
    9,    // bLength
    2,    // bDescriptorType (Configuration)
    34, 0, // wTotalLength
    1,    // bNumInterfaces
    1,    // bConfigurationValue
    0,    // iConfiguration
    0x80, // bmAttributes (bus powered)
    50,   // bMaxPower (100mA)
    // Interface descriptor
    9,    // bLength
    4,    // bDescriptorType (Interface)
    0,    // bInterfaceNumber
    0,    // bAlternateSetting
    1,    // bNumEndpoints
    3,    // bInterfaceClass (HID)
    0,    // bInterfaceSubClass (none)
    0,    // bInterfaceProtocol (none)
    0,    // iInterface
    // HID descriptor
    9,    // bLength
    0x21, // bDescriptorType (HID)
    0x11, 0x01, // bcdHID (1.11)
    0,    // bCountryCode
    1,    // bNumDescriptors
    0x22, // bDescriptorType (Report)
    HID_REPORT_DESCRIPTOR.len() as u8, 0, // wDescriptorLength
    // Endpoint descriptor (EP1 IN, interrupt)
    7,    // bLength
    5,    // bDescriptorType (Endpoint)
    0x81, // bEndpointAddress (EP1 IN)
    0x03, // bmAttributes (Interrupt)
    EP1_SIZE, 0, // wMaxPacketSize
    10,   // bInterval (10ms polling)
];

/// String descriptor 0 (language ID)
static STRING_DESC_0: [u8; 4] = [4, 3, 0x09, 0x04]; // English (US)

static STRING_DESC_1: [u8; string_descriptor_len(MANUFACTURER)] = string_descriptor(MANUFACTURER);
static STRING_DESC_2: [u8; string_descriptor_len(PRODUCT)] = string_descriptor(PRODUCT);

/// USB device state.
pub struct UsbSensor {
    configured: bool,
    features: FeatureReports,
    last_sample: [u8; SAMPLE_REPORT_SIZE],
}

impl UsbSensor {
    pub const fn new() -> Self {
        Self {
            configured: false,
            features: FeatureReports::new(),
            last_sample: [0; SAMPLE_REPORT_SIZE],
        }
    }

    /// Initialize the ATmega32U4 USB controller.
    pub fn init(&mut self, dp: &Peripherals) {
        let usb = &dp.USB_DEVICE;

        // Enable USB pad regulator
        usb.uhwcon.write(|w| w.uvrege().set_bit());

        // Enable USB controller and VBUS pad
        usb.usbcon
            .write(|w| w.usbe().set_bit().otgpade().set_bit());

        // Configure PLL for 16MHz crystal -> 96MHz PLL -> 48MHz USB clock
        dp.PLL.pllcsr.write(|w| w.pindiv().set_bit().plle().set_bit());

        // Wait for PLL lock
        while dp.PLL.pllcsr.read().plock().bit_is_clear() {}

        // Enable USB clock
        usb.usbcon.modify(|_, w| w.frzclk().clear_bit());

        // Attach to bus (clear DETACH)
        usb.udcon.modify(|_, w| w.detach().clear_bit());

        // Enable End-Of-Reset interrupt
        usb.udien.write(|w| w.eorste().set_bit());

        self.configured = false;
    }

    /// Poll for USB events and handle them. Call this from the main loop.
    ///
    /// Feature reports read the acquisition loop's configuration and hand
    /// writes to it before acknowledging them. Returns the outcome of a
    /// feature SET_REPORT, if one was handled.
    pub fn poll<H: CaptureHardware>(
        &mut self,
        dp: &Peripherals,
        acquisition: &mut AcquisitionLoop<'_, H>,
    ) -> Option<Result<(), FeatureError>> {
        let usb = &dp.USB_DEVICE;

        let udint = usb.udint.read();

        // End of reset
        if udint.eorsti().bit_is_set() {
            usb.udint.modify(|_, w| w.eorsti().clear_bit());
            self.configure_ep0(dp);
            self.configured = false;
        }

        // Check for SETUP packet on EP0
        self.select_endpoint(dp, 0);
        let ueintx = usb.ueintx.read();
        if ueintx.rxstpi().bit_is_set() {
            return self.handle_setup(dp, acquisition);
        }
        None
    }

    /// Queue a sample on the interrupt endpoint. Dropped if the host has
    /// not collected the previous one yet; GET_REPORT always returns the
    /// newest.
    pub fn send_sample(&mut self, dp: &Peripherals, report: &SampleReport) {
        self.last_sample = report.to_bytes();
        if !self.configured {
            return;
        }

        let usb = &dp.USB_DEVICE;
        self.select_endpoint(dp, 1);

        // RWAL set means the bank can take another packet
        if usb.ueintx.read().rwal().bit_is_clear() {
            return;
        }

        usb.uedatx.write(|w| w.bits(SAMPLE_REPORT_ID));
        for &byte in &self.last_sample {
            usb.uedatx.write(|w| w.bits(byte));
        }

        // Clear FIFOCON and TXINI to send
        usb.ueintx
            .modify(|_, w| w.fifocon().clear_bit().txini().clear_bit());
    }

    fn configure_ep0(&self, dp: &Peripherals) {
        let usb = &dp.USB_DEVICE;

        self.select_endpoint(dp, 0);
        // Enable EP0 as control endpoint, 64 bytes
        usb.ueconx.write(|w| w.epen().set_bit());
        usb.uecfg0x.write(|w| w.eptype().bits(0b00));
        usb.uecfg1x.write(|w| w.epsize().bits(0b011).alloc().set_bit());
    }

    fn configure_ep1(&self, dp: &Peripherals) {
        let usb = &dp.USB_DEVICE;

        self.select_endpoint(dp, 1);
        usb.ueconx.write(|w| w.epen().set_bit());
        // Interrupt IN endpoint
        usb.uecfg0x
            .write(|w| w.eptype().bits(0b11).epdir().set_bit());
        usb.uecfg1x.write(|w| w.epsize().bits(0b000).alloc().set_bit());
    }

    fn select_endpoint(&self, dp: &Peripherals, ep: u8) {
        dp.USB_DEVICE
            .uenum
            .write(|w| w.bits(ep & 0x07));
    }

    fn handle_setup<H: CaptureHardware>(
        &mut self,
        dp: &Peripherals,
        acquisition: &mut AcquisitionLoop<'_, H>,
    ) -> Option<Result<(), FeatureError>> {
        let usb = &dp.USB_DEVICE;

        // Read 8-byte SETUP packet
        let bm_request_type = usb.uedatx.read().bits();
        let b_request = usb.uedatx.read().bits();
        let w_value_l = usb.uedatx.read().bits();
        let w_value_h = usb.uedatx.read().bits();
        let _w_index_l = usb.uedatx.read().bits();
        let _w_index_h = usb.uedatx.read().bits();
        let w_length_l = usb.uedatx.read().bits();
        let w_length_h = usb.uedatx.read().bits();

        // Acknowledge SETUP
        usb.ueintx.modify(|_, w| w.rxstpi().clear_bit());

        let w_length = (w_length_h as u16) << 8 | w_length_l as u16;

        match (bm_request_type, b_request) {
            // GET_DESCRIPTOR
            (0x80, 0x06) => {
                let desc_type = w_value_h;
                let desc_index = w_value_l;
                match desc_type {
                    1 => self.send_control(dp, &DEVICE_DESCRIPTOR, w_length),
                    2 => self.send_control(dp, &CONFIG_DESCRIPTOR, w_length),
                    3 => match desc_index {
                        0 => self.send_control(dp, &STRING_DESC_0, w_length),
                        1 => self.send_control(dp, &STRING_DESC_1, w_length),
                        2 => self.send_control(dp, &STRING_DESC_2, w_length),
                        _ => self.stall(dp),
                    },
                    _ => self.stall(dp),
                }
            }

            // SET_ADDRESS
            (0x00, 0x05) => {
                // Send ZLP first, then set address
                usb.ueintx.modify(|_, w| w.txini().clear_bit());
                while usb.ueintx.read().txini().bit_is_clear() {}
                usb.udaddr
                    .write(|w| w.uadd().bits(w_value_l & 0x7F).adden().set_bit());
            }

            // SET_CONFIGURATION
            (0x00, 0x09) => {
                // Send ZLP
                usb.ueintx.modify(|_, w| w.txini().clear_bit());
                self.configure_ep1(dp);
                self.configured = true;
            }

            // GET_CONFIGURATION
            (0x80, 0x08) => {
                while usb.ueintx.read().txini().bit_is_clear() {}
                usb.uedatx
                    .write(|w| w.bits(if self.configured { 1 } else { 0 }));
                usb.ueintx.modify(|_, w| w.txini().clear_bit());
            }

            // HID GET_DESCRIPTOR (interface-level)
            (0x81, 0x06) => match w_value_h {
                0x22 => self.send_control(dp, &HID_REPORT_DESCRIPTOR, w_length),
                _ => self.stall(dp),
            },

            // HID GET_REPORT
            (0xA1, GET_REPORT) => {
                self.get_report(dp, acquisition, w_value_h, w_value_l, w_length)
            }

            // HID SET_REPORT
            (0x21, SET_REPORT) => {
                return Some(self.set_report(dp, acquisition, w_value_h, w_length));
            }

            // HID SET_IDLE
            (0x21, 0x0A) => {
                usb.ueintx.modify(|_, w| w.txini().clear_bit());
            }

            _ => {
                self.stall(dp);
            }
        }
        None
    }

    fn get_report<H: CaptureHardware>(
        &self,
        dp: &Peripherals,
        acquisition: &AcquisitionLoop<'_, H>,
        report_type: u8,
        report_id: u8,
        w_length: u16,
    ) {
        let mut buf = [0u8; 1 + DATA_REPORT_SIZE];
        let len = match (report_type, report_id) {
            (REPORT_TYPE_FEATURE, _) => {
                self.features.get_report(report_id, acquisition.store(), &mut buf)
            }
            (REPORT_TYPE_INPUT, SAMPLE_REPORT_ID) => {
                buf[0] = SAMPLE_REPORT_ID;
                buf[1..1 + SAMPLE_REPORT_SIZE].copy_from_slice(&self.last_sample);
                Some(1 + SAMPLE_REPORT_SIZE)
            }
            _ => None,
        };
        match len {
            Some(len) => self.send_control(dp, &buf[..len], w_length),
            None => self.stall(dp),
        }
    }

    /// The status stage is only sent once the report has been applied, so a
    /// refused write reaches the host as a STALL.
    fn set_report<H: CaptureHardware>(
        &mut self,
        dp: &Peripherals,
        acquisition: &mut AcquisitionLoop<'_, H>,
        report_type: u8,
        w_length: u16,
    ) -> Result<(), FeatureError> {
        let usb = &dp.USB_DEVICE;

        // Data stage: report ID followed by the payload, one packet
        let mut buf = [0u8; 1 + DATA_REPORT_SIZE];
        while usb.ueintx.read().rxouti().bit_is_clear() {}
        let received = core::cmp::min(usb.uebclx.read().bits() as usize, w_length as usize);
        for i in 0..received {
            let byte = usb.uedatx.read().bits();
            if let Some(slot) = buf.get_mut(i) {
                *slot = byte;
            }
        }
        usb.ueintx.modify(|_, w| w.rxouti().clear_bit());

        let result = if report_type == REPORT_TYPE_FEATURE {
            let len = core::cmp::min(received, buf.len());
            self.features
                .set_report(&buf[..len], |request| acquisition.request(request))
        } else {
            Err(FeatureError::UnknownReport(buf[0]))
        };

        match result {
            // Status stage: ZLP
            Ok(()) => usb.ueintx.modify(|_, w| w.txini().clear_bit()),
            Err(_) => self.stall(dp),
        }
        result
    }

    fn send_control(&self, dp: &Peripherals, data: &[u8], max_length: u16) {
        let usb = &dp.USB_DEVICE;
        let len = core::cmp::min(data.len(), max_length as usize);
        let mut sent = 0;

        while sent < len {
            while usb.ueintx.read().txini().bit_is_clear() {}

            let chunk_end = core::cmp::min(sent + EP0_SIZE as usize, len);
            for &byte in &data[sent..chunk_end] {
                usb.uedatx.write(|w| w.bits(byte));
            }

            usb.ueintx.modify(|_, w| w.txini().clear_bit());
            sent = chunk_end;
        }

        // Wait for status stage (host sends ZLP)
        while usb.ueintx.read().rxouti().bit_is_clear() {}
        usb.ueintx.modify(|_, w| w.rxouti().clear_bit());
    }

    fn stall(&self, dp: &Peripherals) {
        dp.USB_DEVICE
            .ueconx
            .modify(|_, w| w.stallrq().set_bit());
    }
}

/// Publishes finished samples on the USB interface.
pub struct UsbSink<'a> {
    usb: &'a mut UsbSensor,
    dp: &'a Peripherals,
}

impl<'a> UsbSink<'a> {
    pub fn new(usb: &'a mut UsbSensor, dp: &'a Peripherals) -> Self {
        Self { usb, dp }
    }
}

impl ReportSink for UsbSink<'_> {
    fn publish(&mut self, sample: &LightSample) {
        self.usb.send_sample(self.dp, &SampleReport::from(sample));
    }
}
