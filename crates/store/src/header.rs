//! Store superblock: block 0 of every store.
//!
//! # Layout
//!
//! - Bytes 0-15: common header (magic, format version, block size, god byte)
//! - Bytes 16-143: commit slot 0
//! - Bytes 144-271: commit slot 1
//! - Rest of the block: zero
//!
//! The god byte (byte 15) determines which slot is primary:
//! - Bit 0: primary slot index (0 or 1)
//! - Bit 1: recovery required (set by every commit, cleared by a clean close)
//!
//! A commit writes the inactive slot, syncs, flips bit 0 and syncs again. A
//! crash at any point leaves at least one slot with a valid checksum, and
//! the slot the god byte names is tried first. If the recovery bit is set on
//! open, the persisted free list is stale and is rebuilt from a walk of the
//! indexes.

use graphvault_types::config::{MAX_BLOCK_SIZE, MIN_BLOCK_SIZE};

use crate::{
    error::{BlockId, Error, Result},
    quad::{IndexKind, TableRoots},
};

/// Magic number at the start of block 0.
pub const MAGIC: &[u8; 8] = b"GRAPHVLT";

/// Current on-disk format version.
pub const FORMAT_VERSION: u16 = 1;

/// Bytes of block 0 occupied by the header.
pub const HEADER_SIZE: usize = 16 + 2 * CommitSlot::SIZE;

/// Block holding the header.
pub const HEADER_BLOCK: BlockId = 0;

fn read_u64(buf: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(bytes)
}

/// One committed state of the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitSlot {
    /// Index roots and quad count.
    pub roots: TableRoots,
    /// Snapshot version.
    pub version: u64,
    /// High-water mark of allocated blocks.
    pub total_blocks: u64,
    /// Head of the persisted free-block chain (0 = none).
    pub free_list_head: u64,
    /// Wall-clock time of the write (Unix epoch seconds).
    pub timestamp: u64,
    /// XXH3-64 over the preceding fields, as stored.
    pub checksum: u64,
}

impl CommitSlot {
    /// Size of a slot on disk.
    pub const SIZE: usize = 128;

    /// Checksum-protected prefix: six roots plus five u64 fields.
    const CHECKSUMMED_SIZE: usize = 88;

    /// Serializes the slot, computing a fresh checksum.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        for index in IndexKind::ALL {
            let offset = index.slot() * 8;
            buf[offset..offset + 8].copy_from_slice(&self.roots.root(index).to_le_bytes());
        }
        buf[48..56].copy_from_slice(&self.roots.quad_count.to_le_bytes());
        buf[56..64].copy_from_slice(&self.version.to_le_bytes());
        buf[64..72].copy_from_slice(&self.total_blocks.to_le_bytes());
        buf[72..80].copy_from_slice(&self.free_list_head.to_le_bytes());
        buf[80..88].copy_from_slice(&self.timestamp.to_le_bytes());

        let checksum = xxhash_rust::xxh3::xxh3_64(&buf[..Self::CHECKSUMMED_SIZE]);
        buf[88..96].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserializes a slot, keeping the stored checksum.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let mut roots = TableRoots::default();
        for index in IndexKind::ALL {
            roots.roots[index.slot()] = read_u64(buf, index.slot() * 8);
        }
        roots.quad_count = read_u64(buf, 48);
        Self {
            roots,
            version: read_u64(buf, 56),
            total_blocks: read_u64(buf, 64),
            free_list_head: read_u64(buf, 72),
            timestamp: read_u64(buf, 80),
            checksum: read_u64(buf, 88),
        }
    }

    /// True if the stored checksum matches the fields.
    pub fn verify_checksum(&self) -> bool {
        let buf = self.to_bytes();
        read_u64(&buf, 88) == self.checksum
    }
}

/// Store header with dual commit slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Format version.
    pub version: u16,
    /// Block size as a power of two.
    pub block_size_power: u8,
    /// Bit 0: primary slot. Bit 1: recovery required.
    pub god_byte: u8,
    /// Commit slot 0.
    pub slot0: CommitSlot,
    /// Commit slot 1.
    pub slot1: CommitSlot,
}

impl StoreHeader {
    /// Offset of the god byte.
    pub const GOD_BYTE_OFFSET: usize = 15;

    /// Primary slot bit.
    pub const GOD_BYTE_SLOT_MASK: u8 = 0x01;

    /// Recovery required bit.
    pub const GOD_BYTE_RECOVERY_MASK: u8 = 0x02;

    /// Creates the header of an empty store: both slots hold version 0
    /// with only block 0 allocated.
    pub fn new(block_size: usize) -> Self {
        let slot = CommitSlot { total_blocks: 1, ..CommitSlot::default() };
        let slot = CommitSlot::from_bytes(&slot.to_bytes());
        Self {
            version: FORMAT_VERSION,
            block_size_power: block_size.trailing_zeros() as u8,
            god_byte: 0,
            slot0: slot,
            slot1: slot,
        }
    }

    /// Block size in bytes.
    ///
    /// Returns 0 for a power too large to shift, which no channel matches.
    pub fn block_size(&self) -> usize {
        1usize.checked_shl(u32::from(self.block_size_power)).unwrap_or(0)
    }

    /// Index of the primary slot.
    pub fn primary_slot_index(&self) -> usize {
        (self.god_byte & Self::GOD_BYTE_SLOT_MASK) as usize
    }

    /// Index of the secondary slot.
    pub fn secondary_slot_index(&self) -> usize {
        1 - self.primary_slot_index()
    }

    /// The primary slot.
    pub fn primary_slot(&self) -> &CommitSlot {
        self.slot(self.primary_slot_index())
    }

    /// Stages `slot` into the secondary position, sealing its checksum.
    pub fn stage_secondary(&mut self, slot: CommitSlot) {
        let sealed = CommitSlot::from_bytes(&slot.to_bytes());
        if self.secondary_slot_index() == 0 {
            self.slot0 = sealed;
        } else {
            self.slot1 = sealed;
        }
    }

    /// Slot by index.
    pub fn slot(&self, index: usize) -> &CommitSlot {
        if index == 0 { &self.slot0 } else { &self.slot1 }
    }

    /// True if the last shutdown was not clean.
    pub fn recovery_required(&self) -> bool {
        (self.god_byte & Self::GOD_BYTE_RECOVERY_MASK) != 0
    }

    /// Makes the secondary slot primary.
    pub fn flip_primary_slot(&mut self) {
        self.god_byte ^= Self::GOD_BYTE_SLOT_MASK;
    }

    /// Sets or clears the recovery bit.
    pub fn set_recovery_required(&mut self, required: bool) {
        if required {
            self.god_byte |= Self::GOD_BYTE_RECOVERY_MASK;
        } else {
            self.god_byte &= !Self::GOD_BYTE_RECOVERY_MASK;
        }
    }

    /// Serializes into a full block.
    pub fn to_block(&self, block_size: usize) -> Vec<u8> {
        let mut buf = vec![0u8; block_size];
        buf[0..8].copy_from_slice(MAGIC);
        buf[8..10].copy_from_slice(&self.version.to_le_bytes());
        buf[10] = self.block_size_power;
        buf[Self::GOD_BYTE_OFFSET] = self.god_byte;
        buf[16..16 + CommitSlot::SIZE].copy_from_slice(&self.slot0.to_bytes_preserving());
        buf[144..144 + CommitSlot::SIZE].copy_from_slice(&self.slot1.to_bytes_preserving());
        buf
    }

    /// Parses block 0.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if the block is too short or names an
    /// unsupported block size.
    /// Returns [`Error::InvalidMagic`] if the magic number does not match.
    /// Returns [`Error::UnsupportedVersion`] for a newer format.
    pub fn from_block(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::Corrupted { reason: "Header too short".to_string() });
        }
        if &buf[0..8] != MAGIC {
            return Err(Error::InvalidMagic);
        }
        let version = u16::from_le_bytes([buf[8], buf[9]]);
        if version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion { version });
        }
        let block_size_power = buf[10];
        let supported = MIN_BLOCK_SIZE.trailing_zeros()..=MAX_BLOCK_SIZE.trailing_zeros();
        if !supported.contains(&u32::from(block_size_power)) {
            return Err(Error::Corrupted {
                reason: format!("Unsupported block size power {block_size_power}"),
            });
        }
        Ok(Self {
            version,
            block_size_power,
            god_byte: buf[Self::GOD_BYTE_OFFSET],
            slot0: CommitSlot::from_bytes(&buf[16..16 + CommitSlot::SIZE]),
            slot1: CommitSlot::from_bytes(&buf[144..144 + CommitSlot::SIZE]),
        })
    }

    /// Picks the slot to recover from: the primary if its checksum holds,
    /// otherwise the secondary.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Corrupted`] if both slots fail their checksums.
    pub fn validate_and_choose_slot(&self) -> Result<usize> {
        let primary = self.primary_slot_index();
        if self.slot(primary).verify_checksum() {
            return Ok(primary);
        }
        let secondary = self.secondary_slot_index();
        if self.slot(secondary).verify_checksum() {
            return Ok(secondary);
        }
        Err(Error::Corrupted { reason: "Both commit slots have invalid checksums".to_string() })
    }
}

impl CommitSlot {
    /// Serializes with the stored checksum instead of a fresh one, so a
    /// damaged slot stays damaged when the header is rewritten.
    fn to_bytes_preserving(&self) -> [u8; Self::SIZE] {
        let mut buf = self.to_bytes();
        buf[88..96].copy_from_slice(&self.checksum.to_le_bytes());
        buf
    }
}
