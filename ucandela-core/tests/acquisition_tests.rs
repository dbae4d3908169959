//! Integration tests for AcquisitionLoop

mod common;
use common::*;

use ucandela_core::calibration::slot_address;
use ucandela_core::protocol::{
    FeatureError, FeatureReports, Subrequest, DATA_REPORT_ID, DATA_REPORT_SIZE, MUX_REPORT_ID,
};
use ucandela_core::{
    AcquisitionLoop, AsyncStorageWriter, CalibrationRecord, CalibrationStore, CaptureEngine,
    CaptureShared, CaptureState, ConfigRequest, FixedPoint16, Parameters, RequestError,
    TriggerEdge,
};

fn acquisition<'a>(
    shared: &'a CaptureShared,
    writer: &'a AsyncStorageWriter,
    script: &[Interrupt],
) -> AcquisitionLoop<'a, FakeFrontEnd<'a>> {
    let mut engine = CaptureEngine::new(shared, FakeFrontEnd::with_script(shared, script));
    engine.set_prescaler(prescaler(8));
    AcquisitionLoop::new(engine, writer, CalibrationStore::default())
}

fn record(id: &[u8; 4], a: u16, b: u16) -> CalibrationRecord {
    CalibrationRecord { id: *id, params: [a, b] }
}

fn drain(writer: &AsyncStorageWriter, eeprom: &mut RamEeprom) {
    while !writer.is_complete() {
        writer.on_ready(eeprom);
    }
}

#[test]
fn new_loop_resets_engine_for_rising_edge() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let acq = acquisition(&shared, &writer, &[]);

    assert_eq!(acq.engine().state(), CaptureState::Ready);
    assert_eq!(acq.engine().hardware().edge, Some(TriggerEdge::Rising));
}

#[test]
fn step_publishes_converted_sample() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();
    let mut sink = RecordingSink::default();
    let mut acq = acquisition(&shared, &writer, &[Interrupt::Edge(0x80)]);

    let sample = acq.step(&mut eeprom, &mut sink);

    assert_eq!(sample.sample, FixedPoint16::compose(0x8000, 7));
    assert_eq!(sample.level, sample.sample.inverse(Parameters::default().extra_shift()));
    assert_eq!(sample.prescaler, prescaler(8));
    assert!(!sample.overflow);
    assert_eq!(sink.published, vec![sample]);
}

#[test]
fn brighter_light_reports_higher_level() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();
    let mut sink = RecordingSink::default();
    // same prescaler both times: 0x40 and 0x60 stay inside the thresholds
    let mut acq = acquisition(&shared, &writer, &[Interrupt::Edge(0x60), Interrupt::Edge(0x40)]);

    let dim = acq.step(&mut eeprom, &mut sink);
    let bright = acq.step(&mut eeprom, &mut sink);
    assert!(bright.level.to_integer32() > dim.level.to_integer32());
}

#[test]
fn overflow_sample_is_published_with_flag() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();
    let mut sink = RecordingSink::default();
    let mut acq = acquisition(&shared, &writer, &[Interrupt::Overflow]);

    let sample = acq.step(&mut eeprom, &mut sink);
    assert!(sample.overflow);
    assert_eq!(sample.sample, FixedPoint16::MAX);
    assert_eq!(acq.engine().prescaler(), prescaler(9));
}

#[test]
fn parameter_change_applies_at_once_and_persists() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();
    let mut sink = RecordingSink::default();
    let mut acq = acquisition(&shared, &writer, &[Interrupt::Edge(0x80)]);

    acq.request(ConfigRequest::SetParameters(Parameters { scale: 4 })).unwrap();
    assert_eq!(acq.store().parameters().scale, 4);
    assert_eq!(acq.pending_writes(), 1);

    let sample = acq.step(&mut eeprom, &mut sink);
    assert_eq!(sample.level, sample.sample.inverse(4));
    assert_eq!(acq.pending_writes(), 0);
    assert!(!writer.is_complete());

    drain(&writer, &mut eeprom);
    let reloaded = CalibrationStore::load(|address| eeprom.read(address));
    assert_eq!(reloaded.parameters().scale, 4);
}

#[test]
fn sampling_continues_while_storage_is_busy() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();
    let mut sink = RecordingSink::default();
    let mut acq = acquisition(
        &shared,
        &writer,
        &[Interrupt::Edge(0x80), Interrupt::Edge(0x80), Interrupt::Edge(0x80)],
    );

    let white = record(b"WHTE", 0x0100, 0x0010);
    acq.request(ConfigRequest::SetParameters(Parameters { scale: 12 })).unwrap();
    acq.request(ConfigRequest::SetCalibration { slot: 1, record: white }).unwrap();

    // first write starts, second waits behind it
    acq.step(&mut eeprom, &mut sink);
    assert_eq!(acq.pending_writes(), 1);

    // nothing drained yet: the slot write is still deferred
    acq.step(&mut eeprom, &mut sink);
    assert_eq!(acq.pending_writes(), 1);
    assert_eq!(sink.published.len(), 2);

    drain(&writer, &mut eeprom);
    acq.step(&mut eeprom, &mut sink);
    assert_eq!(acq.pending_writes(), 0);
    drain(&writer, &mut eeprom);

    let reloaded = CalibrationStore::load(|address| eeprom.read(address));
    assert_eq!(reloaded.parameters().scale, 12);
    assert_eq!(reloaded.slot(1), Some(&white));
    assert_eq!(sink.published.len(), 3);
}

#[test]
fn repeated_change_to_queued_record_is_coalesced() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();
    let mut acq = acquisition(&shared, &writer, &[]);

    acq.request(ConfigRequest::SetCalibration { slot: 2, record: record(b"old_", 1, 1) }).unwrap();
    acq.request(ConfigRequest::SetCalibration { slot: 2, record: record(b"new_", 2, 2) }).unwrap();
    assert_eq!(acq.pending_writes(), 1);

    acq.flush(&mut eeprom);
    drain(&writer, &mut eeprom);

    let address = slot_address(2).unwrap();
    let reloaded = CalibrationStore::load(|a| eeprom.read(a));
    assert_eq!(reloaded.slot(2), Some(&record(b"new_", 2, 2)));
    assert_eq!(eeprom.writes.len(), 8);
    assert_eq!(eeprom.writes[0].0, address);
}

#[test]
fn full_queue_rejects_without_changing_store() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut acq = acquisition(&shared, &writer, &[]);

    acq.request(ConfigRequest::SetParameters(Parameters { scale: 3 })).unwrap();
    for slot in 0..3 {
        acq.request(ConfigRequest::SetCalibration { slot, record: record(b"full", 0, 0) }).unwrap();
    }

    let last = ConfigRequest::SetCalibration { slot: 3, record: record(b"late", 0, 0) };
    assert_eq!(acq.request(last), Err(RequestError::QueueFull));
    assert!(acq.store().slot(3).unwrap().is_erased());

    // a record already queued can still be updated
    acq.request(ConfigRequest::SetParameters(Parameters { scale: 5 })).unwrap();
    assert_eq!(acq.store().parameters().scale, 5);
}

#[test]
fn unknown_slot_is_rejected() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut acq = acquisition(&shared, &writer, &[]);

    let request = ConfigRequest::SetCalibration { slot: 4, record: record(b"nope", 0, 0) };
    assert_eq!(acq.request(request), Err(RequestError::NoSuchSlot));
    assert_eq!(acq.pending_writes(), 0);
}

fn data_report(record: &CalibrationRecord) -> [u8; 1 + DATA_REPORT_SIZE] {
    let mut report = [DATA_REPORT_ID; 1 + DATA_REPORT_SIZE];
    report[1..].copy_from_slice(&record.to_bytes());
    report
}

#[test]
fn feature_write_refused_by_full_queue_is_reported() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut acq = acquisition(&shared, &writer, &[]);
    let mut features = FeatureReports::new();

    for slot in 0..4u8 {
        let selector = [MUX_REPORT_ID, Subrequest::Calibration(slot).id()];
        features.set_report(&selector, |r| acq.request(r)).unwrap();
        let result = features.set_report(&data_report(&record(b"fill", 1, 2)), |r| acq.request(r));
        assert_eq!(result, Ok(()));
    }

    features
        .set_report(&[MUX_REPORT_ID, Subrequest::Parameters.id()], |r| acq.request(r))
        .unwrap();
    let mut report = [DATA_REPORT_ID; 1 + DATA_REPORT_SIZE];
    report[1..].copy_from_slice(&Parameters { scale: 7 }.to_bytes());
    let result = features.set_report(&report, |r| acq.request(r));

    assert_eq!(result, Err(FeatureError::Rejected(RequestError::QueueFull)));
    assert_eq!(acq.store().parameters(), Parameters::default());
}

#[test]
fn feature_write_reaches_store_before_acknowledge() {
    let shared = CaptureShared::new();
    let writer = AsyncStorageWriter::new();
    let mut acq = acquisition(&shared, &writer, &[]);
    let mut features = FeatureReports::new();

    features.set_report(&[MUX_REPORT_ID, 4], |r| acq.request(r)).unwrap();
    assert_eq!(features.subrequest(), Subrequest::Calibration(2));
    let white = record(b"WHTE", 0x0100, 0x0010);
    features.set_report(&data_report(&white), |r| acq.request(r)).unwrap();

    assert_eq!(acq.store().slot(2), Some(&white));
    assert_eq!(acq.pending_writes(), 1);

    let mut buf = [0u8; 1 + DATA_REPORT_SIZE];
    assert_eq!(features.get_report(DATA_REPORT_ID, acq.store(), &mut buf), Some(buf.len()));
    assert_eq!(buf, data_report(&white));
}
