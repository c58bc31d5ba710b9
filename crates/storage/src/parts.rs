//! Multipart planning utilities.
//!
//! This module contains pure logic for transfer-mode decisions and part
//! layout. No I/O operations - just decision making.

use thiserror::Error;

use crate::types::{ByteRange, MIB};

/// A single planned part of a multipart transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartRange {
    /// 1-based part number.
    pub part_number: i32,
    /// Inclusive byte range within the object.
    pub range: ByteRange,
}

/// The fixed part layout of one object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartPlan {
    /// Size of every part except possibly the last.
    pub part_size: u64,
    /// Parts in ascending part-number order.
    pub parts: Vec<PartRange>,
}

impl PartPlan {
    /// Number of parts in the plan.
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }
}

/// Limits used when sizing parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSizing {
    /// Preferred part size when the source does not report a part count.
    pub part_size: u64,
    /// Maximum number of parts the service accepts.
    pub max_parts: u64,
    /// Largest part the service accepts.
    pub max_part_size: u64,
}

/// Errors produced while planning parts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PartPlanError {
    /// The plan needs more parts than the service allows.
    #[error("{parts} parts of {part_size} bytes exceed the maximum of {max_parts} parts")]
    TooManyParts {
        parts: u64,
        part_size: u64,
        max_parts: u64,
    },

    /// The reported part count would need parts above the service limit.
    #[error("{parts} parts of {part_size} bytes exceed the {max_part_size} byte part limit")]
    PartTooLarge {
        parts: u64,
        part_size: u64,
        max_part_size: u64,
    },

    /// Zero-byte objects cannot be split into parts.
    #[error("cannot plan parts for an empty object")]
    EmptyObject,
}

/// Transfer mode based on object size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Read the whole object and write it with one request.
    Direct,
    /// Split into ranged parts uploaded to a multipart session.
    Multipart,
}

/// Determine if an object needs a multipart transfer.
///
/// Objects at or above `threshold` use multipart.
pub fn needs_multipart(size: u64, threshold: u64) -> bool {
    size >= threshold
}

/// Determine transfer mode based on object size.
pub fn transfer_mode(size: u64, threshold: u64) -> TransferMode {
    if needs_multipart(size, threshold) {
        TransferMode::Multipart
    } else {
        TransferMode::Direct
    }
}

/// Largest object that fits in `max_parts` parts of `max_part_size` bytes.
pub fn max_object_size(max_parts: u64, max_part_size: u64) -> u64 {
    max_parts.saturating_mul(max_part_size)
}

/// Round up to the next whole MiB.
pub fn round_up_to_mib(bytes: u64) -> u64 {
    bytes.div_ceil(MIB).saturating_mul(MIB)
}

/// Calculate the number of parts of `part_size` needed for `size` bytes.
pub fn expected_part_count(size: u64, part_size: u64) -> u64 {
    if part_size == 0 || size == 0 {
        return 1;
    }
    size.div_ceil(part_size)
}

/// Generate the byte ranges for an object split into `part_size` parts.
///
/// The last part absorbs the remainder, so ranges partition `[0, size)`
/// with no gap or overlap.
pub fn generate_part_ranges(size: u64, part_size: u64) -> Vec<PartRange> {
    if size == 0 || part_size == 0 {
        return Vec::new();
    }

    let mut parts: Vec<PartRange> = Vec::with_capacity(expected_part_count(size, part_size) as usize);
    let mut start = 0u64;
    let mut part_number = 1i32;

    while start < size {
        let end: u64 = std::cmp::min(start + part_size - 1, size - 1);
        parts.push(PartRange {
            part_number,
            range: ByteRange::new(start, end),
        });
        start = end + 1;
        part_number += 1;
    }

    parts
}

/// Plan the parts of a multipart transfer.
///
/// The part count is the source's reported count when available, otherwise
/// it is derived from `sizing.part_size` (raised so the object fits within
/// `sizing.max_parts`). The part size is `ceil(size / count)` rounded up to
/// the next whole MiB.
///
/// # Arguments
/// * `size` - Object size in bytes
/// * `reported_parts` - Part count reported by the source object, if any
/// * `sizing` - Preferred part size and service part limit
///
/// # Returns
/// The complete plan, or an error if it would exceed `max_parts` or
/// need parts larger than `max_part_size`.
pub fn plan_parts(
    size: u64,
    reported_parts: Option<u32>,
    sizing: PartSizing,
) -> Result<PartPlan, PartPlanError> {
    if size == 0 {
        return Err(PartPlanError::EmptyObject);
    }

    let parts_count: u64 = match reported_parts {
        Some(count) if count > 0 => u64::from(count),
        _ => {
            let floor: u64 = size.div_ceil(sizing.max_parts.max(1));
            let heuristic: u64 = sizing.part_size.max(floor).max(1);
            expected_part_count(size, heuristic)
        }
    };

    let part_size: u64 = round_up_to_mib(size.div_ceil(parts_count));
    let planned: u64 = expected_part_count(size, part_size);
    if planned > sizing.max_parts {
        return Err(PartPlanError::TooManyParts {
            parts: planned,
            part_size,
            max_parts: sizing.max_parts,
        });
    }
    if part_size > sizing.max_part_size {
        return Err(PartPlanError::PartTooLarge {
            parts: planned,
            part_size,
            max_part_size: sizing.max_part_size,
        });
    }

    Ok(PartPlan {
        part_size,
        parts: generate_part_ranges(size, part_size),
    })
}
