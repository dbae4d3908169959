mod device;
mod units;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::thread;
use std::time::Duration;
use ucandela_core::calibration::{SCALE_MAX, SLOT_COUNT};
use ucandela_core::protocol::{SampleReport, PRODUCT_ID, VENDOR_ID};
use ucandela_core::{CalibrationRecord, Parameters};

use device::Sensor;

#[derive(Parser)]
#[command(name = "ucandela")]
#[command(about = "uCandela light sensor diagnostic tool")]
struct Cli {
    /// USB vendor ID of the sensor
    #[arg(long, global = true, default_value_t = VENDOR_ID, value_parser = units::parse_usb_id)]
    vid: u16,
    /// USB product ID of the sensor
    #[arg(long, global = true, default_value_t = PRODUCT_ID, value_parser = units::parse_usb_id)]
    pid: u16,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List connected light sensors
    Detect,
    /// Print light samples
    Read {
        /// Number of samples to print
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,
        /// Delay between samples
        #[arg(long, default_value_t = 250)]
        interval_ms: u64,
    },
    /// Live gauge of the light level (log scale) until interrupted
    Monitor {
        /// Refresh period
        #[arg(long, default_value_t = 100)]
        interval_ms: u64,
    },
    /// Show the parameters record, or set it first
    Params {
        /// Scale (extra shift) used to turn samples into light levels
        #[arg(long, value_parser = clap::value_parser!(u8).range(0..=SCALE_MAX as i64))]
        scale: Option<u8>,
    },
    /// Show a calibration slot, or update it first
    Calibration {
        /// Slot number
        #[arg(value_parser = clap::value_parser!(u8).range(0..SLOT_COUNT as i64))]
        slot: u8,
        /// Four-character tag
        #[arg(long)]
        id: Option<String>,
        /// The two calibration parameters
        #[arg(long, num_args = 2, value_names = ["A", "B"])]
        params: Option<Vec<u16>>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Detect => {
            let found = device::detect(cli.vid, cli.pid)?;
            if found.is_empty() {
                println!("No light sensor found ({:04x}:{:04x}).", cli.vid, cli.pid);
            }
            for info in found {
                println!(
                    "Bus {:03} Device {:03}: {:04x}:{:04x} {}",
                    info.bus,
                    info.address,
                    info.vendor_id,
                    info.product_id,
                    info.product.as_deref().unwrap_or("(product string unavailable)")
                );
            }
        }
        Command::Read { count, interval_ms } => {
            let sensor = Sensor::open(cli.vid, cli.pid)?;
            for i in 0..count {
                if i > 0 {
                    thread::sleep(Duration::from_millis(interval_ms));
                }
                let report = sensor.read_sample()?;
                println!("{}", describe_sample(&report));
            }
        }
        Command::Monitor { interval_ms } => {
            let sensor = Sensor::open(cli.vid, cli.pid)?;
            monitor(&sensor, Duration::from_millis(interval_ms))?;
        }
        Command::Params { scale } => {
            let sensor = Sensor::open(cli.vid, cli.pid)?;
            if let Some(scale) = scale {
                sensor
                    .set_parameters(&Parameters { scale })
                    .context("updating parameters")?;
            }
            let parameters = sensor.parameters()?;
            println!("scale: {}", parameters.scale);
        }
        Command::Calibration { slot, id, params } => {
            let sensor = Sensor::open(cli.vid, cli.pid)?;
            if id.is_some() || params.is_some() {
                let mut record = sensor.calibration(slot)?;
                if let Some(id) = id {
                    record.id = units::parse_calibration_id(&id)?;
                }
                if let Some(params) = params {
                    match params.as_slice() {
                        &[a, b] => record.params = [a, b],
                        _ => bail!("expected two calibration parameters"),
                    }
                }
                sensor
                    .set_calibration(slot, &record)
                    .with_context(|| format!("updating calibration slot {}", slot))?;
            }
            let record = sensor.calibration(slot)?;
            println!("{}", describe_record(slot, &record));
        }
    }

    Ok(())
}

fn describe_sample(report: &SampleReport) -> String {
    let prescaler = report.prescaler;
    if report.is_overflow() {
        return format!("level: (overflow)  prescaler: {}", prescaler);
    }
    format!(
        "level: {:>12.4}  sample: {:>10.3}  prescaler: {}",
        units::to_real(report.level),
        units::to_real(report.sample),
        prescaler
    )
}

fn describe_record(slot: u8, record: &CalibrationRecord) -> String {
    if record.is_erased() {
        return format!("slot {}: (empty)", slot);
    }
    format!(
        "slot {}: id {:?}  params {} {}",
        slot,
        units::format_calibration_id(&record.id),
        record.params[0],
        record.params[1]
    )
}

fn monitor(sensor: &Sensor, interval: Duration) -> Result<()> {
    let pb = ProgressBar::new(units::GAUGE_MAX);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{msg:>24} [{bar:50.yellow/blue}]")?
            .progress_chars("#>-"),
    );

    loop {
        let report = sensor.read_sample()?;
        if report.is_overflow() {
            pb.set_position(0);
            pb.set_message("dark (overflow)");
        } else {
            pb.set_position(units::gauge_position(report.level));
            pb.set_message(format!("{:.4} (p{})", units::to_real(report.level), report.prescaler));
        }
        thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_ids_match_firmware() {
        let cli = Cli::try_parse_from(["ucandela", "detect"]).unwrap();
        assert_eq!(cli.vid, VENDOR_ID);
        assert_eq!(cli.pid, PRODUCT_ID);

        let cli = Cli::try_parse_from(["ucandela", "--vid", "0x1234", "detect"]).unwrap();
        assert_eq!(cli.vid, 0x1234);
    }
}
