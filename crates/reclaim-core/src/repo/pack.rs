use std::time::Instant;

use serde::{Deserialize, Serialize};

use reclaim_types::{BlobHandle, BlobId, BlobKind, PackId, ReclaimError, Result};

use crate::index::{PackEntry, PackRecord};
use crate::storage::StorageBackend;

/// Magic bytes at the start of every pack file.
pub const PACK_MAGIC: &[u8; 8] = b"RCLMPACK";
/// Pack format version.
pub const PACK_VERSION: u8 = 1;
/// Size of the pack header (magic + version byte).
pub const PACK_HEADER_SIZE: usize = 9;

/// Maximum number of blobs in a single pack file.
pub const MAX_BLOBS_PER_PACK: usize = 10_000;

/// Maximum age of a pack writer before it should be flushed (in seconds).
pub const PACK_MAX_AGE_SECS: u64 = 300;

/// Skip upfront `reserve()` for unreasonably large target sizes.
const MAX_PREALLOC_SIZE: usize = 512 * 1024 * 1024;

/// One entry in the pack's trailing header. Describes a single blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackHeaderEntry {
    pub kind: BlobKind,
    pub id: BlobId,
    pub offset: u64,
    pub length: u32,
}

impl PackHeaderEntry {
    pub fn handle(&self) -> BlobHandle {
        BlobHandle::new(self.id, self.kind)
    }
}

/// Result of sealing a pack in-memory: (pack_id, serialized pack bytes, entries).
pub type SealedPack = (PackId, Vec<u8>, Vec<PackEntry>);

/// Accumulates blobs of one kind and flushes them as pack files.
///
/// Blob data is appended directly into `pack_bytes` as it arrives, so sealing
/// only appends the header trailer.
pub struct PackWriter {
    kind: BlobKind,
    target_size: usize,
    pack_bytes: Vec<u8>,
    entries: Vec<PackHeaderEntry>,
    current_size: usize,
    first_blob_time: Option<Instant>,
}

impl PackWriter {
    pub fn new(kind: BlobKind, target_size: usize) -> Self {
        Self {
            kind,
            target_size,
            pack_bytes: Vec::new(),
            entries: Vec::new(),
            current_size: 0,
            first_blob_time: None,
        }
    }

    /// Append a blob. Returns the offset within the pack where the blob data
    /// starts (after the 4-byte length prefix).
    pub fn add_blob(&mut self, id: BlobId, data: &[u8]) -> u64 {
        let blob_len = data.len() as u32;

        if self.entries.is_empty() {
            if self.pack_bytes.capacity() == 0 && self.target_size <= MAX_PREALLOC_SIZE {
                self.pack_bytes.reserve(self.target_size);
            }
            self.pack_bytes.extend_from_slice(PACK_MAGIC);
            self.pack_bytes.push(PACK_VERSION);
        }

        let offset = PACK_HEADER_SIZE as u64 + self.current_size as u64 + 4;

        // [4B length LE][data]
        self.pack_bytes.extend_from_slice(&blob_len.to_le_bytes());
        self.pack_bytes.extend_from_slice(data);
        self.current_size += 4 + data.len();
        debug_assert_eq!(self.pack_bytes.len(), PACK_HEADER_SIZE + self.current_size);

        if self.first_blob_time.is_none() {
            self.first_blob_time = Some(Instant::now());
        }
        self.entries.push(PackHeaderEntry {
            kind: self.kind,
            id,
            offset,
            length: blob_len,
        });

        offset
    }

    /// Whether the current buffer should be flushed: target size reached,
    /// blob count limit reached, or the buffer has been open too long.
    pub fn should_flush(&self) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        if self.current_size >= self.target_size {
            return true;
        }
        if self.entries.len() >= MAX_BLOBS_PER_PACK {
            return true;
        }
        self.first_blob_time
            .is_some_and(|t| t.elapsed().as_secs() >= PACK_MAX_AGE_SECS)
    }

    pub fn has_pending(&self) -> bool {
        !self.entries.is_empty()
    }

    /// Append the header trailer, compute the PackId, and reset the writer.
    /// Does NOT write to storage.
    pub fn seal(&mut self) -> Result<SealedPack> {
        if self.entries.is_empty() {
            return Err(ReclaimError::Other("cannot seal empty pack writer".into()));
        }

        // Serialize before touching pack_bytes so a failure leaves the writer intact.
        let header_bytes = rmp_serde::to_vec(&self.entries)?;
        let header_len = header_bytes.len() as u32;
        self.pack_bytes.extend_from_slice(&header_bytes);
        self.pack_bytes.extend_from_slice(&header_len.to_le_bytes());

        let pack_id = PackId::compute(&self.pack_bytes);
        let entries = self
            .entries
            .drain(..)
            .map(|e| PackEntry {
                handle: e.handle(),
                offset: e.offset,
                length: e.length,
            })
            .collect();
        let pack_bytes = std::mem::take(&mut self.pack_bytes);

        self.current_size = 0;
        self.first_blob_time = None;

        Ok((pack_id, pack_bytes, entries))
    }

    /// Seal and upload the buffered blobs. Returns the record of the new pack.
    pub fn flush(&mut self, storage: &dyn StorageBackend) -> Result<PackRecord> {
        let (id, pack_bytes, entries) = self.seal()?;
        storage.put(&id.storage_key(), &pack_bytes)?;
        Ok(PackRecord {
            id,
            size: pack_bytes.len() as u64,
            entries,
        })
    }
}

fn read_trailer_len(tail: &[u8]) -> Result<usize> {
    let bytes: [u8; 4] = tail
        .try_into()
        .map_err(|_| ReclaimError::InvalidFormat("invalid pack header length field".into()))?;
    Ok(u32::from_le_bytes(bytes) as usize)
}

/// Parse the trailing header out of a complete pack file.
pub fn parse_pack_header(pack_data: &[u8]) -> Result<Vec<PackHeaderEntry>> {
    if pack_data.len() < PACK_HEADER_SIZE + 4 {
        return Err(ReclaimError::InvalidFormat("pack too small".into()));
    }
    if &pack_data[..8] != PACK_MAGIC {
        return Err(ReclaimError::InvalidFormat("invalid pack magic".into()));
    }
    if pack_data[8] != PACK_VERSION {
        return Err(ReclaimError::UnsupportedVersion(pack_data[8] as u32));
    }

    let len_offset = pack_data.len() - 4;
    let header_len = read_trailer_len(&pack_data[len_offset..])?;
    if header_len > len_offset - PACK_HEADER_SIZE {
        return Err(ReclaimError::InvalidFormat("invalid pack header length".into()));
    }

    let header_start = len_offset - header_len;
    Ok(rmp_serde::from_slice(&pack_data[header_start..len_offset])?)
}

/// Read the trailing header of a stored pack with range reads, returning the
/// pack's record.
pub fn read_pack_header(storage: &dyn StorageBackend, pack_id: &PackId) -> Result<PackRecord> {
    let key = pack_id.storage_key();
    let size = storage
        .size(&key)?
        .ok_or(ReclaimError::PackNotFound(*pack_id))?;
    if size < (PACK_HEADER_SIZE + 4) as u64 {
        return Err(ReclaimError::InvalidFormat(format!("pack {pack_id} too small")));
    }

    let prefix = storage
        .get_range(&key, 0, PACK_HEADER_SIZE as u64)?
        .ok_or(ReclaimError::PackNotFound(*pack_id))?;
    if &prefix[..8] != PACK_MAGIC {
        return Err(ReclaimError::InvalidFormat(format!(
            "pack {pack_id} has invalid magic"
        )));
    }
    if prefix[8] != PACK_VERSION {
        return Err(ReclaimError::UnsupportedVersion(prefix[8] as u32));
    }

    let tail = storage
        .get_range(&key, size - 4, 4)?
        .ok_or(ReclaimError::PackNotFound(*pack_id))?;
    let header_len = read_trailer_len(&tail)? as u64;
    if header_len > size - 4 - PACK_HEADER_SIZE as u64 {
        return Err(ReclaimError::InvalidFormat(format!(
            "pack {pack_id} has invalid header length"
        )));
    }

    let header_bytes = storage
        .get_range(&key, size - 4 - header_len, header_len)?
        .ok_or(ReclaimError::PackNotFound(*pack_id))?;
    let header: Vec<PackHeaderEntry> = rmp_serde::from_slice(&header_bytes)?;

    Ok(PackRecord {
        id: *pack_id,
        size,
        entries: header
            .into_iter()
            .map(|e| PackEntry {
                handle: e.handle(),
                offset: e.offset,
                length: e.length,
            })
            .collect(),
    })
}

/// Read a single blob from a pack file using a range read.
pub fn read_blob_from_pack(
    storage: &dyn StorageBackend,
    pack_id: &PackId,
    offset: u64,
    length: u32,
) -> Result<Vec<u8>> {
    storage
        .get_range(&pack_id.storage_key(), offset, length as u64)?
        .ok_or(ReclaimError::PackNotFound(*pack_id))
}
