//! Imported capacity of a LUN on a RAID group

use crate::domain::Lba;
use crate::error::{Error, JobErrorCode, Result};

/// Exported blocks covered by one block of the cache zero bitmap
pub const ZERO_BITMAP_CHUNK_BLOCKS: Lba = 0x800;

/// Header blocks in front of the zero bitmap
pub const ZERO_BITMAP_HEADER_BLOCKS: Lba = 1;

fn round_up(value: Lba, align: Lba) -> Option<Lba> {
    value.checked_add(align - 1).map(|v| v / align * align)
}

/// Blocks reserved for the zero bitmap of a LUN of `exported` blocks
pub fn zero_bitmap_blocks(exported: Lba, align: Lba) -> Result<Lba> {
    check_align(align)?;
    let raw = exported.div_ceil(ZERO_BITMAP_CHUNK_BLOCKS) + ZERO_BITMAP_HEADER_BLOCKS;
    round_up(raw, align).ok_or_else(|| overflow(exported))
}

/// Capacity the LUN imports from its RAID group: the exported capacity
/// rounded up to the group's alignment plus the zero bitmap reservation
pub fn imported_capacity(exported: Lba, align: Lba) -> Result<Lba> {
    check_align(align)?;
    if exported == 0 {
        return Err(Error::validation(
            JobErrorCode::InvalidCapacity,
            "LUN capacity must be non-zero",
        ));
    }
    let aligned = round_up(exported, align).ok_or_else(|| overflow(exported))?;
    aligned
        .checked_add(zero_bitmap_blocks(exported, align)?)
        .ok_or_else(|| overflow(exported))
}

fn check_align(align: Lba) -> Result<()> {
    if align == 0 {
        return Err(Error::validation(
            JobErrorCode::InvalidCapacity,
            "RAID group reports a zero LUN alignment",
        ));
    }
    Ok(())
}

fn overflow(exported: Lba) -> Error {
    Error::validation(
        JobErrorCode::InvalidCapacity,
        format!("capacity {:#x} overflows the address space", exported),
    )
}
