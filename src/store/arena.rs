//! A growable, append-only byte arena backed by a memory-mapped file.
//!
//! Each arena file begins with a small fixed header holding the append
//! cursor as an explicit stored value — not derived from pointer arithmetic
//! over the mapped region, so a reader never has to trust the mapping's
//! current length to find the live data boundary. Everything from
//! `HEADER_LEN` onward is free-form payload
//! appended to by the arena's owner (tag payload bytes, way node-ref arrays,
//! fixed-stride entity records, ...).

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

use memmap2::{MmapMut, MmapOptions};

use crate::error::Result;

const HEADER_LEN: u64 = 8;
const INITIAL_CAPACITY: u64 = 1 << 20;

/// An append-only arena over a growable memory-mapped file.
pub struct Arena {
    file: File,
    mmap: MmapMut,
    cursor: u64,
    capacity: u64,
}

impl Arena {
    /// Open (creating if necessary) the arena file at `path`.
    pub fn open(path: &Path) -> Result<Arena> {
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        if is_new {
            file.set_len(HEADER_LEN + INITIAL_CAPACITY)?;
        }

        let len = file.metadata()?.len();
        let mut mmap = unsafe { MmapOptions::new().len(len as usize).map_mut(&file)? };

        let cursor = if is_new {
            write_cursor(&mut mmap, 0);
            0
        } else {
            read_cursor(&mmap)
        };

        Ok(Arena {
            file,
            mmap,
            cursor,
            capacity: len - HEADER_LEN,
        })
    }

    /// Append `bytes`, growing and remapping the backing file if needed.
    /// Returns the offset (relative to the start of the payload region,
    /// i.e. not counting the header) at which `bytes` now lives.
    pub fn append(&mut self, bytes: &[u8]) -> Result<u64> {
        let needed = self.cursor + bytes.len() as u64;
        if needed > self.capacity {
            self.grow(needed)?;
        }

        let start = (HEADER_LEN + self.cursor) as usize;
        self.mmap[start..start + bytes.len()].copy_from_slice(bytes);
        let offset = self.cursor;
        self.cursor += bytes.len() as u64;
        write_cursor(&mut self.mmap, self.cursor);
        Ok(offset)
    }

    /// Read `len` bytes at payload-relative `offset`.
    pub fn read(&self, offset: u64, len: u64) -> &[u8] {
        let start = (HEADER_LEN + offset) as usize;
        &self.mmap[start..start + len as usize]
    }

    /// Number of payload bytes written so far.
    pub fn len(&self) -> u64 {
        self.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.cursor == 0
    }

    pub fn flush(&self) -> Result<()> {
        self.mmap.flush()?;
        Ok(())
    }

    fn grow(&mut self, min_capacity: u64) -> Result<()> {
        let mut new_capacity = self.capacity.max(INITIAL_CAPACITY);
        while new_capacity < min_capacity {
            new_capacity *= 2;
        }
        self.mmap.flush()?;
        self.file.set_len(HEADER_LEN + new_capacity)?;
        self.file.flush()?;
        self.mmap = unsafe {
            MmapOptions::new()
                .len((HEADER_LEN + new_capacity) as usize)
                .map_mut(&self.file)?
        };
        self.capacity = new_capacity;
        Ok(())
    }
}

fn read_cursor(mmap: &MmapMut) -> u64 {
    u64::from_le_bytes(mmap[0..8].try_into().unwrap())
}

fn write_cursor(mmap: &mut MmapMut, cursor: u64) {
    mmap[0..8].copy_from_slice(&cursor.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_read_roundtrip() {
        let dir = tempdir();
        let mut arena = Arena::open(&dir.join("arena")).unwrap();
        let off_a = arena.append(b"hello").unwrap();
        let off_b = arena.append(b"world!!").unwrap();
        assert_eq!(off_a, 0);
        assert_eq!(off_b, 5);
        assert_eq!(arena.read(off_a, 5), b"hello");
        assert_eq!(arena.read(off_b, 7), b"world!!");
        assert_eq!(arena.len(), 12);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let dir = tempdir();
        let mut arena = Arena::open(&dir.join("arena")).unwrap();
        let chunk = vec![7u8; 1024];
        let mut offsets = Vec::new();
        for _ in 0..(INITIAL_CAPACITY / 1024 + 4) {
            offsets.push(arena.append(&chunk).unwrap());
        }
        for &off in &offsets {
            assert_eq!(arena.read(off, 1024), &chunk[..]);
        }
    }

    #[test]
    fn cursor_survives_reopen() {
        let dir = tempdir();
        let path = dir.join("arena");
        {
            let mut arena = Arena::open(&path).unwrap();
            arena.append(b"persisted").unwrap();
        }
        let arena = Arena::open(&path).unwrap();
        assert_eq!(arena.len(), 9);
        assert_eq!(arena.read(0, 9), b"persisted");
    }

    fn tempdir() -> std::path::PathBuf {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut dir = std::env::temp_dir();
        dir.push(format!("vexdb-arena-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }
}
