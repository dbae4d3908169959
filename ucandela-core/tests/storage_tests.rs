//! Integration tests for AsyncStorageWriter

mod common;
use common::*;

use ucandela_core::storage::TRANSFER_CAPACITY;
use ucandela_core::{AsyncStorageWriter, WriteError};

#[test]
fn three_byte_write_drains_over_three_interrupts() {
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();

    writer.start_write(&mut eeprom, &[0xAA, 0xBB, 0xCC], 0x10).unwrap();
    assert!(eeprom.ready_interrupt);
    assert!(!writer.is_complete());

    for _ in 0..3 {
        writer.on_ready(&mut eeprom);
    }

    assert!(writer.is_complete());
    assert!(!eeprom.ready_interrupt);
    assert_eq!(&eeprom.cells[0x10..0x13], &[0xAA, 0xBB, 0xCC]);
    assert_eq!(eeprom.writes, vec![(0x10, 0xAA), (0x11, 0xBB), (0x12, 0xCC)]);
}

#[test]
fn second_write_while_busy_leaves_transfer_untouched() {
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();

    writer.start_write(&mut eeprom, &[0xAA, 0xBB, 0xCC], 0x10).unwrap();
    writer.on_ready(&mut eeprom);

    assert_eq!(
        writer.start_write(&mut eeprom, &[0x01, 0x02], 0x20),
        Err(WriteError::Busy)
    );
    assert_eq!(writer.remaining(), 2);

    writer.on_ready(&mut eeprom);
    writer.on_ready(&mut eeprom);
    assert!(writer.is_complete());
    assert_eq!(&eeprom.cells[0x10..0x13], &[0xAA, 0xBB, 0xCC]);
    assert_eq!(&eeprom.cells[0x20..0x22], &[0xFF, 0xFF]);

    // idle again: the retry goes through
    writer.start_write(&mut eeprom, &[0x01, 0x02], 0x20).unwrap();
    writer.on_ready(&mut eeprom);
    writer.on_ready(&mut eeprom);
    assert_eq!(&eeprom.cells[0x20..0x22], &[0x01, 0x02]);
}

#[test]
fn caller_buffer_is_free_after_start() {
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();

    let mut buffer = [0x11, 0x22, 0x33, 0x44];
    writer.start_write(&mut eeprom, &buffer, 0).unwrap();
    buffer.fill(0);

    while !writer.is_complete() {
        writer.on_ready(&mut eeprom);
    }
    assert_eq!(&eeprom.cells[..4], &[0x11, 0x22, 0x33, 0x44]);
}

#[test]
fn extra_ready_interrupt_after_completion_writes_nothing() {
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();

    writer.start_write(&mut eeprom, &[0x5A], 3).unwrap();
    writer.on_ready(&mut eeprom);
    writer.on_ready(&mut eeprom);

    assert_eq!(eeprom.writes, vec![(3, 0x5A)]);
    assert!(!eeprom.ready_interrupt);
}

#[test]
fn oversized_and_out_of_range_writes_are_rejected() {
    let writer = AsyncStorageWriter::new();
    let mut eeprom = RamEeprom::new();

    let long = [0u8; TRANSFER_CAPACITY + 1];
    assert_eq!(writer.start_write(&mut eeprom, &long, 0), Err(WriteError::TooLong));
    assert_eq!(
        writer.start_write(&mut eeprom, &[1, 2], EEPROM_SIZE - 1),
        Err(WriteError::OutOfBounds)
    );
    assert!(writer.is_complete());
    assert!(eeprom.writes.is_empty());

    // the last byte of the device is fine
    writer.start_write(&mut eeprom, &[7], EEPROM_SIZE - 1).unwrap();
    writer.on_ready(&mut eeprom);
    assert_eq!(eeprom.read(EEPROM_SIZE - 1), 7);
}
