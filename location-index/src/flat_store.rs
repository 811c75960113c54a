//! The flat store collaborator.
//!
//! Persists the serialized tree as a single flat array of signed 32-bit
//! little-endian cells, optionally memory-mapped from disk. A 3-cell header
//! precedes the payload: a magic number, a checksum of the graph the index
//! was built from, and the resolution (in meters) the index was built with.
//! Everything from cell 3 onward is tree payload, addressed by the
//! serializer and query engine as payload-relative offsets.

use std::fs::{File, OpenOptions};
use std::path::Path;

use bit_twiddling_helpers::conv_i32le;
use memmap2::MmapMut;
use zerocopy::{FromBytes, I32, IntoBytes, LE};

use crate::error::{LocationIndexError, Result};

/// Magic number stamped into cell 0 of a persisted index; distinguishes a
/// flat store written by this crate from an arbitrary file.
pub const MAGIC: i32 = 0x4C49_5458; // "LITX"

const HEADER_MAGIC_OFFSET: usize = 0;
const HEADER_CHECKSUM_OFFSET: usize = 1;
const HEADER_RESOLUTION_OFFSET: usize = 2;

/// Number of header cells preceding the tree payload.
pub const HEADER_LEN: usize = 3;

const CELL_SIZE: usize = size_of::<i32>();

/// The raw, growable array of signed 32-bit cells a [`FlatStoreIndex`]
/// reads and writes. Implementations don't know about the header/payload
/// split; that's [`FlatStoreIndex`]'s job.
pub trait FlatStore {
    /// Number of `i32` cells currently allocated.
    fn int_len(&self) -> usize;

    /// Reads cell `index`. Panics if out of bounds, matching slice
    /// indexing; callers are expected to grow the store first.
    fn get(&self, index: usize) -> i32;

    /// Writes cell `index`.
    fn set(&mut self, index: usize, value: i32);

    /// Grows the store so that `int_len() >= min_len`, zero-filling new
    /// cells. A no-op if already large enough.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the underlying storage can't
    /// be resized.
    fn grow_to(&mut self, min_len: usize) -> Result<()>;

    /// Flushes any buffered writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the flush fails.
    fn flush(&mut self) -> Result<()>;
}

/// An in-memory flat store backed by a plain `Vec<i32>`.
#[derive(Debug, Default)]
pub struct InMemoryFlatStore {
    cells: Vec<i32>,
}

impl InMemoryFlatStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlatStore for InMemoryFlatStore {
    fn int_len(&self) -> usize {
        self.cells.len()
    }

    fn get(&self, index: usize) -> i32 {
        self.cells[index]
    }

    fn set(&mut self, index: usize, value: i32) {
        self.cells[index] = value;
    }

    fn grow_to(&mut self, min_len: usize) -> Result<()> {
        if min_len > self.cells.len() {
            self.cells.resize(min_len, 0);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// A flat store backed by a memory-mapped file.
///
/// Growth closes and remaps the file, since mmap can't be resized in
/// place; this is expected to happen only a handful of times during
/// construction, as the payload doubles in size rather than growing
/// cell-by-cell.
pub struct MmapFlatStore {
    file: File,
    mmap: MmapMut,
    int_len: usize,
}

impl MmapFlatStore {
    /// Opens (creating if necessary) a flat store file, reserving at least
    /// `initial_segment_bytes` up front.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the file can't be opened,
    /// sized, or mapped.
    pub fn open<P: AsRef<Path>>(path: P, initial_segment_bytes: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let current_len = file.metadata()?.len() as usize;
        let floor_len = initial_segment_bytes.max(HEADER_LEN * CELL_SIZE);
        let byte_len = current_len.max(floor_len);
        if byte_len as u64 != file.metadata()?.len() {
            file.set_len(byte_len as u64)?;
        }

        // SAFETY: we hold exclusive ownership of `file` for the lifetime of
        // the mapping and never truncate it out from under the mapping
        // without first remapping.
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let int_len = byte_len / CELL_SIZE;

        Ok(Self {
            file,
            mmap,
            int_len,
        })
    }

    fn cell_bytes(&self, index: usize) -> &[u8] {
        let offset = index * CELL_SIZE;
        &self.mmap[offset..offset + CELL_SIZE]
    }
}

impl FlatStore for MmapFlatStore {
    fn int_len(&self) -> usize {
        self.int_len
    }

    fn get(&self, index: usize) -> i32 {
        I32::<LE>::ref_from_bytes(self.cell_bytes(index))
            .expect("cell slice is exactly 4 bytes")
            .get()
    }

    fn set(&mut self, index: usize, value: i32) {
        let offset = index * CELL_SIZE;
        let encoded = conv_i32le::from_inner(value);
        self.mmap[offset..offset + CELL_SIZE].copy_from_slice(encoded.as_bytes());
    }

    fn grow_to(&mut self, min_len: usize) -> Result<()> {
        if min_len <= self.int_len {
            return Ok(());
        }
        // Double rather than growing to exactly `min_len`, so a long run of
        // small appends doesn't remap on every single one.
        let new_len = min_len.max(self.int_len * 2).max(1);
        self.mmap.flush()?;
        self.file.set_len((new_len * CELL_SIZE) as u64)?;
        // SAFETY: same invariant as `open`; the old mapping is dropped
        // before this call returns.
        self.mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.int_len = new_len;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(self.mmap.flush()?)
    }
}

/// The header/payload view over a [`FlatStore`].
///
/// Cell 0 holds [`MAGIC`], cell 1 a checksum of the graph the index was
/// built from, and cell 2 the resolution (meters) used to build it. Cells
/// from [`HEADER_LEN`] onward are the serialized tree, addressed by
/// payload-relative offsets everywhere outside this module.
pub struct FlatStoreIndex {
    backing: Box<dyn FlatStore>,
}

impl FlatStoreIndex {
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            backing: Box::new(InMemoryFlatStore::new()),
        }
    }

    #[must_use]
    pub fn from_backing(backing: Box<dyn FlatStore>) -> Self {
        Self { backing }
    }

    /// Stamps the header, overwriting whatever was there before.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the store can't grow to fit
    /// the header.
    pub fn write_header(&mut self, checksum: i32, min_resolution_in_meter: u32) -> Result<()> {
        self.backing.grow_to(HEADER_LEN)?;
        self.backing.set(HEADER_MAGIC_OFFSET, MAGIC);
        self.backing.set(HEADER_CHECKSUM_OFFSET, checksum);
        #[expect(clippy::cast_possible_wrap)]
        self.backing
            .set(HEADER_RESOLUTION_OFFSET, min_resolution_in_meter as i32);
        Ok(())
    }

    /// Reads back the header, validating the magic number and (if
    /// `expected_checksum` is given) the graph checksum.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::VersionMismatch`] if the magic number
    /// doesn't match, or [`LocationIndexError::ChecksumMismatch`] if a
    /// checksum was expected and doesn't match the stored one.
    pub fn read_header(&self, expected_checksum: Option<i32>) -> Result<(i32, u32)> {
        if self.backing.int_len() < HEADER_LEN {
            return Err(LocationIndexError::VersionMismatch {
                expected: MAGIC,
                found: 0,
            });
        }
        let found_magic = self.backing.get(HEADER_MAGIC_OFFSET);
        if found_magic != MAGIC {
            return Err(LocationIndexError::VersionMismatch {
                expected: MAGIC,
                found: found_magic,
            });
        }
        let checksum = self.backing.get(HEADER_CHECKSUM_OFFSET);
        if let Some(expected) = expected_checksum {
            if expected != checksum {
                return Err(LocationIndexError::ChecksumMismatch {
                    expected,
                    found: checksum,
                });
            }
        }
        #[expect(clippy::cast_sign_loss)]
        let resolution = self.backing.get(HEADER_RESOLUTION_OFFSET) as u32;
        Ok((checksum, resolution))
    }

    /// Number of payload cells currently allocated (excludes the header).
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.backing.int_len().saturating_sub(HEADER_LEN)
    }

    /// Reads payload cell at `offset` (0-based, relative to the end of the
    /// header).
    #[must_use]
    pub fn cell(&self, offset: usize) -> i32 {
        self.backing.get(HEADER_LEN + offset)
    }

    /// Writes payload cell at `offset`, growing the store first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the store can't grow.
    pub fn set_cell(&mut self, offset: usize, value: i32) -> Result<()> {
        self.backing.grow_to(HEADER_LEN + offset + 1)?;
        self.backing.set(HEADER_LEN + offset, value);
        Ok(())
    }

    /// Ensures at least `min_payload_len` payload cells are allocated.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the store can't grow.
    pub fn reserve_payload(&mut self, min_payload_len: usize) -> Result<()> {
        self.backing.grow_to(HEADER_LEN + min_payload_len)
    }

    /// Flushes outstanding writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns [`LocationIndexError::Io`] if the flush fails.
    pub fn flush(&mut self) -> Result<()> {
        self.backing.flush()
    }
}
