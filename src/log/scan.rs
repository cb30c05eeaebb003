//! Log scanner
//!
//! Forward iteration over an address range of the hybrid log. The part of
//! the range below the head address is read from the device through its own
//! buffered handle; the rest comes from the in-memory region.

use std::collections::vec_deque;
use std::fs::File;
use std::io::BufReader;

use crate::error::Result;
use crate::store::{Address, ScannedRecord};

use super::record::LogRecord;

/// Reads device-resident records sequentially
pub(super) struct DeviceCursor {
    reader: BufReader<File>,
    next: Address,
    end: Address,
}

impl DeviceCursor {
    pub(super) fn new(reader: BufReader<File>, from: Address, end: Address) -> Self {
        Self {
            reader,
            next: from,
            end,
        }
    }
}

/// Iterator over `[from, to)` of a hybrid log
pub struct LogScanner<'a> {
    device: Option<DeviceCursor>,
    memory: vec_deque::Iter<'a, (Address, LogRecord)>,
    to: Address,
    failed: bool,
}

impl<'a> LogScanner<'a> {
    pub(super) fn new(
        device: Option<DeviceCursor>,
        memory: vec_deque::Iter<'a, (Address, LogRecord)>,
        to: Address,
    ) -> Self {
        Self {
            device,
            memory,
            to,
            failed: false,
        }
    }

    fn next_from_device(&mut self) -> Option<Result<ScannedRecord>> {
        let cursor = self.device.as_mut()?;
        if cursor.next >= cursor.end {
            self.device = None;
            return None;
        }

        let address = cursor.next;
        match LogRecord::read_from(&mut cursor.reader) {
            Ok(record) => {
                cursor.next += record.allocated_len() as u64;
                Some(Ok(scanned(address, record)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl<'a> Iterator for LogScanner<'a> {
    type Item = Result<ScannedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        if let Some(item) = self.next_from_device() {
            return Some(item);
        }

        let (address, record) = self.memory.next()?;
        if *address >= self.to {
            return None;
        }
        Some(Ok(scanned(*address, record.clone())))
    }
}

fn scanned(address: Address, record: LogRecord) -> ScannedRecord {
    ScannedRecord {
        address,
        next_address: address + record.allocated_len() as u64,
        info: record.info,
        key: record.key,
        value: record.value,
    }
}
