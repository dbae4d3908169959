use anyhow::{bail, Result};
use ucandela_core::fixed::FixedPoint16;

/// Gauge resolution: ticks per doubling of the light level.
pub const GAUGE_STEPS_PER_OCTAVE: u64 = 10;

/// Smallest non-zero value, `2^-11`, sits at position 0.
const GAUGE_FLOOR_OCTAVE: i32 = -11;
/// `FixedPoint16::MAX` is just below `2^16`.
const GAUGE_CEILING_OCTAVE: i32 = 16;

/// Full scale of the light level gauge.
pub const GAUGE_MAX: u64 = (GAUGE_CEILING_OCTAVE - GAUGE_FLOOR_OCTAVE) as u64 * GAUGE_STEPS_PER_OCTAVE;

/// Real value of a fixed-point word.
pub fn to_real(value: FixedPoint16) -> f64 {
    value.significand() as f64 * 2f64.powi(value.exponent() as i32 - 15)
}

/// Gauge position for a light level, on a log2 scale.
pub fn gauge_position(level: FixedPoint16) -> u64 {
    let real = to_real(level);
    if real <= 0.0 {
        return 0;
    }
    let octaves = real.log2() - GAUGE_FLOOR_OCTAVE as f64;
    let position = (octaves * GAUGE_STEPS_PER_OCTAVE as f64).round();
    (position.max(0.0) as u64).min(GAUGE_MAX)
}

/// Accepts `0x16c0`-style hex or plain decimal.
pub fn parse_usb_id(s: &str) -> Result<u16, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => s.parse::<u16>(),
    };
    parsed.map_err(|e| format!("invalid USB ID '{}': {}", s, e))
}

/// Calibration tags are exactly four printable ASCII characters.
pub fn parse_calibration_id(s: &str) -> Result<[u8; 4]> {
    let bytes = s.as_bytes();
    if bytes.len() != 4 {
        bail!("calibration id must be 4 characters, got {}", bytes.len());
    }
    if !bytes.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        bail!("calibration id must be printable ASCII: {:?}", s);
    }
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Printable form of a stored tag.
pub fn format_calibration_id(id: &[u8; 4]) -> String {
    id.iter()
        .map(|&b| if b.is_ascii_graphic() || b == b' ' { b as char } else { '.' })
        .collect()
}
