//! Single-slot byte buffer backing the device.
//!
//! Every cell, including `length` and `capacity`, is an atomic so that the
//! unsynchronized paths (a reader racing a writer through independent gates,
//! the control plane bypassing both gates) remain well defined. They are
//! still races: a reader may observe a mix of two payloads, or a `length`
//! that no longer matches the bytes behind it. Serialization of writers is
//! the write gate's job, not the store's.
//!
//! # Layout
//!
//! ```text
//! cells:  [ b0 | b1 | ... | b(n-1) | 0 | stale ... ]
//!                                   ^
//!                                   length = n
//! ```

use crate::error::DeviceError;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

pub struct BufferStore {
    /// Backing allocation. Its length is the physical capacity and never changes.
    cells: Box<[AtomicU8]>,
    /// Number of valid bytes.
    length: AtomicU32,
    /// Logical capacity; settable through the control plane.
    capacity: AtomicU32,
    /// Value `capacity` returns to on flush.
    default_capacity: u32,
}

impl BufferStore {
    /// Allocates a zeroed buffer of `capacity` bytes.
    ///
    /// # Errors
    /// `OutOfMemory` if the allocation cannot be satisfied or the capacity
    /// does not fit the 32-bit metadata fields.
    pub fn with_capacity(capacity: usize) -> Result<Self, DeviceError> {
        let oom = || DeviceError::OutOfMemory {
            what: "device buffer",
        };
        let default_capacity = u32::try_from(capacity).map_err(|_| oom())?;

        let mut cells = Vec::new();
        cells.try_reserve_exact(capacity).map_err(|_| oom())?;
        cells.extend((0..capacity).map(|_| AtomicU8::new(0)));

        Ok(Self {
            cells: cells.into_boxed_slice(),
            length: AtomicU32::new(0),
            capacity: AtomicU32::new(default_capacity),
            default_capacity,
        })
    }

    /// Replaces the contents with `data`, starting at offset 0.
    ///
    /// Accepts at most `capacity - 1` bytes (bounded by the physical
    /// allocation) and writes a terminator after the last one. Returns the
    /// number of bytes accepted.
    pub fn write(&self, data: &[u8]) -> usize {
        let count = data.len().min(self.write_limit());

        for (cell, &b) in self.cells.iter().zip(&data[..count]) {
            cell.store(b, Ordering::Relaxed);
        }
        if let Some(terminator) = self.cells.get(count) {
            terminator.store(0, Ordering::Relaxed);
        }

        // Release publishes the bytes above to any reader that acquires `length`.
        self.length.store(count as u32, Ordering::Release);
        count
    }

    /// Copies the window starting at `offset` into `out`.
    ///
    /// Returns 0 at or past end-of-data. Never reads beyond the physical
    /// allocation, whatever `length` claims.
    pub fn read(&self, offset: u64, out: &mut [u8]) -> usize {
        let valid = (self.length.load(Ordering::Acquire) as usize).min(self.cells.len());
        let Ok(offset) = usize::try_from(offset) else {
            return 0;
        };
        if offset >= valid {
            return 0;
        }

        let count = out.len().min(valid - offset);
        for (dst, cell) in out[..count].iter_mut().zip(&self.cells[offset..]) {
            *dst = cell.load(Ordering::Relaxed);
        }
        count
    }

    /// Empties the buffer and restores the default capacity. No reallocation.
    pub fn flush(&self) {
        self.length.store(0, Ordering::Release);
        self.capacity.store(self.default_capacity, Ordering::Relaxed);
        if let Some(first) = self.cells.first() {
            first.store(0, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn len(&self) -> u32 {
        self.length.load(Ordering::Acquire)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Size of the backing allocation.
    #[inline]
    pub fn physical_capacity(&self) -> usize {
        self.cells.len()
    }

    /// Overwrites `capacity` and `length` without touching the bytes.
    pub(crate) fn set_metadata(&self, capacity: u32, length: u32) {
        self.capacity.store(capacity, Ordering::Relaxed);
        self.length.store(length, Ordering::Release);
    }

    #[inline]
    fn write_limit(&self) -> usize {
        (self.capacity() as usize)
            .min(self.cells.len())
            .saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(store: &BufferStore, offset: u64) -> Vec<u8> {
        let mut out = vec![0u8; store.physical_capacity()];
        let n = store.read(offset, &mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn write_replaces_from_offset_zero() {
        let store = BufferStore::with_capacity(16).unwrap();
        assert_eq!(store.write(b"hello world"), 11);
        assert_eq!(store.write(b"bye"), 3);
        assert_eq!(store.len(), 3);
        assert_eq!(read_all(&store, 0), b"bye");
    }

    #[test]
    fn write_truncates_to_capacity_minus_one() {
        let store = BufferStore::with_capacity(8).unwrap();
        assert_eq!(store.write(b"0123456789"), 7);
        assert_eq!(read_all(&store, 0), b"0123456");
        // exactly `capacity` bytes also loses one to the terminator
        assert_eq!(store.write(b"abcdefgh"), 7);
    }

    #[test]
    fn read_is_windowed_by_offset_and_out_len() {
        let store = BufferStore::with_capacity(32).unwrap();
        store.write(b"abcdef");

        let mut out = [0u8; 2];
        assert_eq!(store.read(1, &mut out), 2);
        assert_eq!(&out, b"bc");

        assert_eq!(read_all(&store, 4), b"ef");
        assert!(read_all(&store, 6).is_empty());
        assert!(read_all(&store, u64::MAX).is_empty());
    }

    #[test]
    fn flush_resets_length_and_capacity() {
        let store = BufferStore::with_capacity(32).unwrap();
        store.set_metadata(4, 2);
        store.write(b"xyz");
        store.flush();
        assert!(store.is_empty());
        assert_eq!(store.capacity(), 32);
        assert!(read_all(&store, 0).is_empty());
    }

    #[test]
    fn stale_bytes_are_visible_after_length_is_raised() {
        let store = BufferStore::with_capacity(32).unwrap();
        store.write(b"abcdef");
        store.write(b"xy");
        store.set_metadata(32, 6);
        // terminator at index 2, then leftovers of the longer payload
        assert_eq!(read_all(&store, 0), b"xy\0def");
    }

    #[test]
    fn oversized_length_stops_at_allocation() {
        let store = BufferStore::with_capacity(8).unwrap();
        store.set_metadata(4096, 4096);
        assert_eq!(read_all(&store, 0).len(), 8);
        assert_eq!(store.write(&[7u8; 100]), 7);
    }

    #[test]
    fn zero_capacity_accepts_nothing() {
        let store = BufferStore::with_capacity(8).unwrap();
        store.set_metadata(0, 0);
        assert_eq!(store.write(b"abc"), 0);
        assert!(store.is_empty());
    }
}
