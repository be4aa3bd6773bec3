//! File-backed I/O devices.
//!
//! A device is named by the two hex digits of its device number (`F1`,
//! `05`, ...) and backed by a file of the same name inside the device
//! directory. Opening a device pairs an input handle, read from a
//! per-device cursor, with an append-mode output handle that is flushed
//! after every write.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

/// An open device.
#[derive(Debug)]
struct Device {
    input: File,
    output: BufWriter<File>,
    /// Offset of the next byte to read.
    cursor: u64,
}

impl Device {
    fn open(path: &Path) -> io::Result<Self> {
        let output = OpenOptions::new().create(true).append(true).open(path)?;
        let input = File::open(path)?;
        Ok(Self {
            input,
            output: BufWriter::new(output),
            cursor: 0,
        })
    }

    /// The cursor counts bytes consumed, so it only moves on a full read.
    fn read(&mut self, count: usize) -> io::Result<Option<Vec<u8>>> {
        self.input.seek(SeekFrom::Start(self.cursor))?;
        let mut buf = Vec::with_capacity(count);
        (&mut self.input).take(count as u64).read_to_end(&mut buf)?;
        if buf.len() < count {
            return Ok(None);
        }
        self.cursor += count as u64;
        Ok(Some(buf))
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.output.write_all(data)?;
        self.output.flush()
    }
}

/// Result of a device read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The requested bytes.
    Data(Vec<u8>),
    /// Fewer bytes remained than were requested.
    ShortRead,
}

/// Table of open devices, keyed by device name.
#[derive(Debug)]
pub struct DeviceTable {
    dir: PathBuf,
    devices: HashMap<String, Device>,
}

impl DeviceTable {
    /// Create an empty table whose device files live in `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            devices: HashMap::new(),
        }
    }

    /// Open the named device if it is not already open.
    ///
    /// Returns whether the device is usable. Failing to create the
    /// backing file is reported as `false`, never as an error.
    pub fn open(&mut self, name: &str) -> bool {
        if self.devices.contains_key(name) {
            return true;
        }

        let path = self.dir.join(name);
        match Device::open(&path) {
            Ok(device) => {
                debug!(device = name, path = %path.display(), "device opened");
                self.devices.insert(name.to_string(), device);
                true
            }
            Err(e) => {
                warn!(device = name, path = %path.display(), error = %e, "device unavailable");
                false
            }
        }
    }

    pub fn is_open(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Read exactly `count` bytes from the named device.
    pub fn read(&mut self, name: &str, count: usize) -> Result<ReadOutcome, DeviceError> {
        let device = self
            .devices
            .get_mut(name)
            .ok_or_else(|| DeviceError::NotOpen(name.to_string()))?;

        match device.read(count).map_err(|e| DeviceError::io(name, e))? {
            Some(data) => Ok(ReadOutcome::Data(data)),
            None => {
                debug!(device = name, requested = count, "short device read");
                Ok(ReadOutcome::ShortRead)
            }
        }
    }

    /// Append `data` to the named device and flush it.
    pub fn write(&mut self, name: &str, data: &[u8]) -> Result<(), DeviceError> {
        let device = self
            .devices
            .get_mut(name)
            .ok_or_else(|| DeviceError::NotOpen(name.to_string()))?;

        device.write(data).map_err(|e| DeviceError::io(name, e))
    }

    /// Flush and close every open device.
    pub fn close_all(&mut self) {
        for (name, mut device) in self.devices.drain() {
            if let Err(e) = device.output.flush() {
                warn!(device = %name, error = %e, "failed to flush device on close");
            }
        }
    }
}

impl Drop for DeviceTable {
    fn drop(&mut self) {
        self.close_all();
    }
}

/// Errors that can occur during device I/O.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device {0} is not open")]
    NotOpen(String),

    #[error("I/O error on device {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
}

impl DeviceError {
    fn io(name: &str, source: io::Error) -> Self {
        DeviceError::Io {
            name: name.to_string(),
            source,
        }
    }
}
