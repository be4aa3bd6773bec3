//! SIC/XE memory subsystem.
//!
//! The machine has a flat, byte-addressable 64 KiB memory. Every address
//! is reduced modulo 65,536 before it touches a cell, so accesses wrap
//! around the top of memory instead of failing. Words are 3 bytes,
//! big-endian.

use serde::{Serialize, Deserialize};

/// The number of memory cells.
pub const MEMORY_SIZE: usize = 0x1_0000;

/// Mask applied to every address before access.
pub const ADDR_MASK: u32 = 0xFFFF;

/// Number of bytes in a machine word.
pub const WORD_BYTES: usize = 3;

/// SIC/XE memory: 65,536 eight-bit cells.
#[derive(Clone, Serialize, Deserialize)]
pub struct Memory {
    cells: Vec<u8>,
}

#[inline]
fn wrap(addr: u32) -> usize {
    (addr & ADDR_MASK) as usize
}

impl Memory {
    /// Create a new memory with all cells zeroed.
    pub fn new() -> Self {
        Self {
            cells: vec![0; MEMORY_SIZE],
        }
    }

    #[inline]
    pub fn read_byte(&self, addr: u32) -> u8 {
        self.cells[wrap(addr)]
    }

    #[inline]
    pub fn write_byte(&mut self, addr: u32, value: u8) {
        self.cells[wrap(addr)] = value;
    }

    /// Read the 3-byte big-endian word at `addr`, `addr+1`, `addr+2`.
    ///
    /// Each of the three addresses wraps independently.
    pub fn read_word(&self, addr: u32) -> i32 {
        let bytes = [
            self.read_byte(addr),
            self.read_byte(addr.wrapping_add(1)),
            self.read_byte(addr.wrapping_add(2)),
        ];
        bytes_to_word(&bytes)
    }

    /// Write the low 24 bits of `value` as a big-endian word.
    pub fn write_word(&mut self, addr: u32, value: i32) {
        for (i, byte) in word_to_bytes(value).into_iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u32), byte);
        }
    }

    /// Read `count` consecutive bytes starting at `addr`.
    pub fn read_bytes(&self, addr: u32, count: usize) -> Vec<u8> {
        (0..count)
            .map(|i| self.read_byte(addr.wrapping_add(i as u32)))
            .collect()
    }

    /// Write `data` to consecutive cells starting at `addr`.
    pub fn write_bytes(&mut self, addr: u32, data: &[u8]) {
        for (i, &byte) in data.iter().enumerate() {
            self.write_byte(addr.wrapping_add(i as u32), byte);
        }
    }

    /// Clear all memory to zeros.
    pub fn clear(&mut self) {
        self.cells.fill(0);
    }

    /// Dump memory as 16-byte rows (for debugging).
    ///
    /// Rows start at `start` rounded down to a multiple of 16 and stop at
    /// the end of memory.
    pub fn dump(&self, start: u32, count: usize) -> Vec<(u32, Vec<u8>)> {
        let first = wrap(start) & !0xF;
        let end = (wrap(start) + count).min(MEMORY_SIZE);
        (first..end)
            .step_by(16)
            .map(|row| {
                let row_end = (row + 16).min(MEMORY_SIZE);
                (row as u32, self.cells[row..row_end].to_vec())
            })
            .collect()
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Memory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let non_zero = self.cells.iter().filter(|&&cell| cell != 0).count();

        f.debug_struct("Memory")
            .field("non_zero_cells", &non_zero)
            .field("total_cells", &MEMORY_SIZE)
            .finish()
    }
}

/// Split the low 24 bits of `value` into a big-endian word.
pub fn word_to_bytes(value: i32) -> [u8; WORD_BYTES] {
    [
        ((value >> 16) & 0xFF) as u8,
        ((value >> 8) & 0xFF) as u8,
        (value & 0xFF) as u8,
    ]
}

/// Assemble big-endian bytes into an unsigned integer.
///
/// Three bytes give a full word; shorter slices are used for partial
/// fields (e.g. relocation of a 2-byte field). Only the last 4 bytes
/// contribute.
pub fn bytes_to_word(bytes: &[u8]) -> i32 {
    bytes
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | b as u32) as i32
}
