//! Persistent configuration: the parameters record and four calibration
//! slots, kept in EEPROM and mirrored in RAM.
//!
//! EEPROM map (8-byte records):
//!
//! ```text
//! 0x000  parameters
//! 0x008  calibration slot 0
//! 0x010  calibration slot 1
//! 0x018  calibration slot 2
//! 0x020  calibration slot 3
//! ```

/// Size of every stored record.
pub const RECORD_SIZE: usize = 8;
/// Number of calibration slots.
pub const SLOT_COUNT: usize = 4;
/// EEPROM address of the parameters record.
pub const PARAMETERS_ADDRESS: u16 = 0x000;
/// EEPROM address of calibration slot 0.
pub const CALIBRATION_BASE: u16 = 0x008;
/// Bytes of EEPROM used by the store.
pub const STORE_SIZE: u16 = CALIBRATION_BASE + (SLOT_COUNT * RECORD_SIZE) as u16;

/// `extra_shift` used to turn a discharge sample into a light level when
/// nothing has been stored yet.
pub const DEFAULT_SCALE: u8 = 10;
/// Largest accepted scale.
pub const SCALE_MAX: u8 = 31;

const ERASED: u8 = 0xFF;

/// Sensor-wide settings.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Parameters {
    pub scale: u8,
}

impl Default for Parameters {
    fn default() -> Self {
        Self { scale: DEFAULT_SCALE }
    }
}

impl Parameters {
    /// Decode a stored record; erased or out-of-range values load as defaults.
    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        match bytes[0] {
            scale if scale <= SCALE_MAX => Self { scale },
            _ => Self::default(),
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let mut bytes = [ERASED; RECORD_SIZE];
        bytes[0] = self.scale;
        bytes
    }

    /// Shift handed to [`crate::fixed::FixedPoint16::inverse`].
    pub fn extra_shift(&self) -> i8 {
        self.scale.min(SCALE_MAX) as i8
    }
}

/// One calibration slot: a four-character tag and two parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalibrationRecord {
    pub id: [u8; 4],
    pub params: [u16; 2],
}

impl CalibrationRecord {
    /// What an erased slot reads as.
    pub const ERASED: Self = Self {
        id: [ERASED; 4],
        params: [0xFFFF; 2],
    };

    pub fn from_bytes(bytes: &[u8; RECORD_SIZE]) -> Self {
        Self {
            id: [bytes[0], bytes[1], bytes[2], bytes[3]],
            params: [
                u16::from_le_bytes([bytes[4], bytes[5]]),
                u16::from_le_bytes([bytes[6], bytes[7]]),
            ],
        }
    }

    pub fn to_bytes(&self) -> [u8; RECORD_SIZE] {
        let [p0l, p0h] = self.params[0].to_le_bytes();
        let [p1l, p1h] = self.params[1].to_le_bytes();
        [self.id[0], self.id[1], self.id[2], self.id[3], p0l, p0h, p1l, p1h]
    }

    pub fn is_erased(&self) -> bool {
        *self == Self::ERASED
    }
}

/// EEPROM address of a calibration slot, or `None` past the last slot.
pub fn slot_address(slot: u8) -> Option<u16> {
    if (slot as usize) < SLOT_COUNT {
        Some(CALIBRATION_BASE + slot as u16 * RECORD_SIZE as u16)
    } else {
        None
    }
}

/// A record the store wants written back to EEPROM.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PendingWrite {
    pub address: u16,
    pub bytes: [u8; RECORD_SIZE],
}

/// RAM copy of everything persisted, so reads never touch a device that may
/// be in the middle of a write.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CalibrationStore {
    parameters: Parameters,
    slots: [CalibrationRecord; SLOT_COUNT],
}

impl Default for CalibrationStore {
    fn default() -> Self {
        Self {
            parameters: Parameters::default(),
            slots: [CalibrationRecord::ERASED; SLOT_COUNT],
        }
    }
}

impl CalibrationStore {
    /// Load every record through a synchronous byte reader.
    pub fn load<R: FnMut(u16) -> u8>(mut read: R) -> Self {
        let mut record = |address: u16| {
            let mut bytes = [0u8; RECORD_SIZE];
            for (offset, byte) in bytes.iter_mut().enumerate() {
                *byte = read(address + offset as u16);
            }
            bytes
        };

        let parameters = Parameters::from_bytes(&record(PARAMETERS_ADDRESS));
        let mut slots = [CalibrationRecord::ERASED; SLOT_COUNT];
        for (slot, entry) in slots.iter_mut().enumerate() {
            let address = CALIBRATION_BASE + (slot * RECORD_SIZE) as u16;
            *entry = CalibrationRecord::from_bytes(&record(address));
        }

        Self { parameters, slots }
    }

    pub fn parameters(&self) -> Parameters {
        self.parameters
    }

    pub fn slot(&self, slot: u8) -> Option<&CalibrationRecord> {
        self.slots.get(slot as usize)
    }

    pub fn set_parameters(&mut self, parameters: Parameters) -> PendingWrite {
        self.parameters = parameters;
        PendingWrite {
            address: PARAMETERS_ADDRESS,
            bytes: parameters.to_bytes(),
        }
    }

    /// Update a slot; `None` if the slot does not exist.
    pub fn set_slot(&mut self, slot: u8, record: CalibrationRecord) -> Option<PendingWrite> {
        let address = slot_address(slot)?;
        self.slots[slot as usize] = record;
        Some(PendingWrite {
            address,
            bytes: record.to_bytes(),
        })
    }
}
