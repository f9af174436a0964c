//! Partition codec and top-level framer: a subset key is a format version,
//! a partition count, and that many partitions in strictly increasing id
//! order. Partition ids are delta-coded: the first partition's id is
//! written directly, every subsequent one as `id - prev_id - 1`, so a run of
//! consecutive partition ids costs a string of zero deltas.
//!
//! Each partition then carries its own segment count and that many
//! [`Segment`]s, laid out back to back with each segment's `initial_delta`
//! standing in for the all-zero span since the previous one ended. Segments
//! never need to reach all the way to the end of the partition's `2^32`-bit
//! range: whatever is left over after the last one is an implicit all-zero
//! tail. A partition therefore appears in the stream at all only when it
//! has at least one member.

use crate::cdu::{self, CduType};
use crate::error::{AbvError, Location, Result};
use crate::format::{FORMAT_VERSION, PARTITION_WIDTH_BITS};
use crate::segment::{self, Segment};
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    pub id: u64,
    pub segments: Vec<Segment>,
}

impl Partition {
    /// Bits accounted for by this partition's segments, counting each
    /// segment's leading gap (`initial_delta`, an implicit all-zero span
    /// that costs no bytes of its own) plus its own length. Bits beyond
    /// this sum, up to `2^32`, are an implicit all-zero tail and are never
    /// written.
    pub fn covered_bits(&self) -> u64 {
        self.segments
            .iter()
            .map(|s| s.initial_delta() + s.length())
            .sum()
    }
}

/// Reject a claimed element count that the remaining stream could not
/// possibly back, before committing to a `Vec::with_capacity` of that size:
/// every partition or segment costs at least one bit on the wire, so a count
/// exceeding the bits left in the buffer is never valid.
fn check_claimed_count(count: u64, buf_bits: usize, used: usize, field: &'static str) -> Result<()> {
    let remaining = (buf_bits - used) as u64;
    if count > remaining {
        return Err(AbvError::OutOfMemory {
            requested: count,
            at: Location::new(used as u64, field),
        });
    }
    Ok(())
}

/// Encode the full `AbV` (as a sorted list of partitions) to `buf` starting
/// at bit 0. Returns the number of bits written.
pub fn encode(buf: &mut [u8], partitions: &[Partition]) -> Result<usize> {
    let mut used = cdu::encode(buf, 0, FORMAT_VERSION, CduType::Version);
    trace!(n_partitions = partitions.len(), "encoding subset key header");
    used += cdu::encode(buf, used, partitions.len() as u64, CduType::PartitionCount);

    let mut prev_id: Option<u64> = None;
    for part in partitions {
        let delta = match prev_id {
            None => part.id,
            Some(p) => part.id.checked_sub(p + 1).ok_or(AbvError::InvariantViolated {
                detail: "partitions are not in strictly increasing id order",
            })?,
        };
        used += cdu::encode(buf, used, delta, CduType::PartitionDelta);
        used += cdu::encode(buf, used, part.segments.len() as u64, CduType::SegmentCount);
        debug!(partition_id = part.id, segments = part.segments.len(), "encoding partition");
        for seg in &part.segments {
            used += segment::encode(buf, used, seg)?;
        }
        prev_id = Some(part.id);
    }
    Ok(used)
}

/// Decode a full subset key from `buf`. `buf_bits` bounds the valid region
/// (callers typically pass `buf.len() * 8`).
pub fn decode(buf: &[u8], buf_bits: usize) -> Result<Vec<Partition>> {
    let (version, mut used) = cdu::decode_canonical(buf, 0, buf_bits, CduType::Version)?;
    if version != FORMAT_VERSION {
        return Err(AbvError::UnsupportedVersion { version });
    }
    let (n_partitions, n_bits) = cdu::decode_canonical(buf, used, buf_bits, CduType::PartitionCount)?;
    used += n_bits;
    check_claimed_count(n_partitions, buf_bits, used, "n_partitions")?;

    let mut partitions = Vec::with_capacity(n_partitions as usize);
    let mut prev_id: Option<u64> = None;
    for _ in 0..n_partitions {
        let (delta, d_bits) = cdu::decode_canonical(buf, used, buf_bits, CduType::PartitionDelta)?;
        used += d_bits;
        let id = match prev_id {
            None => delta,
            Some(p) => p.checked_add(delta + 1).ok_or(AbvError::Overflow {
                detail: "partition id overflowed u64 while applying delta",
            })?,
        };
        if id > u32::MAX as u64 {
            // The identifier domain is 64 bits wide and each partition spans
            // 2^32 of it, so a valid partition id never exceeds u32::MAX.
            return Err(AbvError::Overflow {
                detail: "partition id exceeds the addressable identifier domain",
            });
        }

        let (segment_count, s_bits) = cdu::decode_canonical(buf, used, buf_bits, CduType::SegmentCount)?;
        used += s_bits;
        check_claimed_count(segment_count, buf_bits, used, "segment_count")?;

        let mut segments = Vec::with_capacity(segment_count as usize);
        for _ in 0..segment_count {
            let (seg, seg_bits) = segment::decode(buf, used, buf_bits)?;
            used += seg_bits;
            segments.push(seg);
        }

        let part = Partition { id, segments };
        let covered = part.covered_bits();
        if covered > 1u64 << PARTITION_WIDTH_BITS {
            warn!(
                partition_id = part.id,
                covered,
                limit = 1u64 << PARTITION_WIDTH_BITS,
                "partition segments overrun the partition's id range"
            );
            return Err(AbvError::NonCanonical {
                reason: "partition segments overrun the 2^32-bit partition range",
                at: Location::new(used as u64, "partition"),
            });
        }
        if part.segments.is_empty() {
            return Err(AbvError::NonCanonical {
                reason: "a listed partition must have at least one segment",
                at: Location::new(used as u64, "partition"),
            });
        }
        partitions.push(part);
        prev_id = Some(id);
    }

    for window in partitions.windows(2) {
        if window[0].id >= window[1].id {
            return Err(AbvError::NonCanonical {
                reason: "partitions are not in strictly increasing id order",
                at: Location::new(used as u64, "partition_delta"),
            });
        }
    }

    Ok(partitions)
}
