//! Log device
//!
//! File-backed, append-only storage for the part of the hybrid log that has
//! been flushed. File offsets equal log addresses.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{DictError, Result};
use crate::store::Address;

use super::record::LogRecord;

/// Magic bytes identifying a logdict log device
const MAGIC: &[u8; 4] = b"LDXL";

/// Current device format version
const VERSION: u16 = 1;

/// Bytes reserved for the device header; the first record starts here
pub const DEVICE_HEADER_SIZE: u64 = 64;

/// Append-only log file
pub struct LogDevice {
    path: PathBuf,

    /// Buffered appends at `end`
    writer: BufWriter<File>,

    /// Separate handle for random reads of pending operations
    reader: File,

    /// Address one past the last written byte
    end: Address,
}

impl LogDevice {
    /// Create (or truncate) a device file and write its header
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut header = [0u8; DEVICE_HEADER_SIZE as usize];
        header[..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_le_bytes());

        let mut writer = BufWriter::new(file);
        writer.write_all(&header)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;

        let reader = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            reader,
            end: DEVICE_HEADER_SIZE,
        })
    }

    /// Reopen an existing device, discarding anything written after `valid_until`
    pub fn open_existing(path: &Path, valid_until: Address) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; DEVICE_HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| {
            DictError::Corruption(format!("log device {} has no header: {}", path.display(), e))
        })?;
        if &header[..4] != MAGIC {
            return Err(DictError::Corruption(format!(
                "invalid log device magic in {}: {:?}",
                path.display(),
                &header[..4]
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(DictError::Corruption(format!(
                "unsupported log device version: {}",
                version
            )));
        }

        let len = file.metadata()?.len();
        if len < valid_until {
            return Err(DictError::Corruption(format!(
                "log device {} holds {} bytes, checkpoint needs {}",
                path.display(),
                len,
                valid_until
            )));
        }
        if len > valid_until {
            tracing::debug!(
                "Truncating log device {} from {} to {} bytes",
                path.display(),
                len,
                valid_until
            );
            file.set_len(valid_until)?;
        }
        file.seek(SeekFrom::Start(valid_until))?;

        let reader = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer: BufWriter::new(file),
            reader,
            end: valid_until,
        })
    }

    /// Append `record` at `address`, which must be the current end
    pub fn write(&mut self, address: Address, record: &LogRecord) -> Result<()> {
        if address != self.end {
            return Err(DictError::Storage(format!(
                "out-of-order device write at {} (device ends at {})",
                address, self.end
            )));
        }
        let bytes = record.encode();
        self.writer.write_all(&bytes)?;
        self.end += bytes.len() as u64;
        Ok(())
    }

    /// Read the record stored at `address`
    pub fn read_record(&mut self, address: Address) -> Result<LogRecord> {
        if address < DEVICE_HEADER_SIZE || address >= self.end {
            return Err(DictError::Storage(format!(
                "device read at {} outside [{}, {})",
                address, DEVICE_HEADER_SIZE, self.end
            )));
        }
        self.writer.flush()?;
        self.reader.seek(SeekFrom::Start(address))?;
        LogRecord::read_from(&mut self.reader)
    }

    /// Open an independent buffered reader positioned at `address`
    pub fn open_reader(&mut self, address: Address) -> Result<BufReader<File>> {
        self.writer.flush()?;
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(address))?;
        Ok(BufReader::new(file))
    }

    /// Push buffered bytes to the OS
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        Ok(())
    }

    /// Address one past the last written byte
    pub fn end_address(&self) -> Address {
        self.end
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
