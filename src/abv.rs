//! `AbV`: the in-memory representation of a subset of the identifier
//! domain, and the set-algebra surface built on top of it.
//!
//! The mutation path uses an owned collection (`BTreeSet<u64>`) rather than
//! a byte-offset arena mirroring the wire layout directly: the canonical
//! byte layout is already fully specified by
//! [`crate::partition`]/[`crate::segment`]/[`crate::token`], so nothing is
//! lost by keeping the mutable in-memory form simple and paying a serialize
//! step to reach it (see DESIGN.md for the full rationale).

use crate::error::Result;
use crate::format::{CHUNK_WIDTH_BITS, DOMINANT_RUN_THRESHOLD, MAX_SEGMENT_LEN_HINT, PARTITION_WIDTH_BITS};
use crate::partition::{self, Partition};
use crate::segment::Segment;
use std::collections::BTreeSet;
use tracing::debug;

/// A subset of `u64` identifiers, with set algebra and a canonical byte
/// codec.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AbV {
    ids: BTreeSet<u64>,
}

impl AbV {
    pub fn new_empty() -> Self {
        Self::default()
    }

    pub fn new_singleton(id: u64) -> Self {
        let mut ids = BTreeSet::new();
        ids.insert(id);
        Self { ids }
    }

    /// Build from an already-sorted, deduplicated slice. Rejects input that
    /// isn't strictly increasing so callers can't silently construct an
    /// `AbV` that doesn't match what they think they passed.
    pub fn from_sorted_ids(ids: &[u64]) -> Result<Self> {
        for pair in ids.windows(2) {
            if pair[0] >= pair[1] {
                return Err(crate::error::AbvError::InvariantViolated {
                    detail: "from_sorted_ids requires strictly increasing, deduplicated input",
                });
            }
        }
        Ok(Self {
            ids: ids.iter().copied().collect(),
        })
    }

    pub fn to_sorted_ids(&self) -> Vec<u64> {
        self.ids.iter().copied().collect()
    }

    pub fn add(&mut self, id: u64) {
        self.ids.insert(id);
    }

    pub fn remove(&mut self, id: u64) {
        self.ids.remove(&id);
    }

    pub fn contains(&self, id: u64) -> bool {
        self.ids.contains(&id)
    }

    pub fn cardinality(&self) -> u64 {
        self.ids.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iterate(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            ids: self.ids.union(&other.ids).copied().collect(),
        }
    }

    pub fn intersect(&self, other: &Self) -> Self {
        Self {
            ids: self.ids.intersection(&other.ids).copied().collect(),
        }
    }

    pub fn except(&self, other: &Self) -> Self {
        Self {
            ids: self.ids.difference(&other.ids).copied().collect(),
        }
    }

    /// Order two subsets by their canonical byte sequence. Since the codec
    /// is a bijection, this is also a total order over the subsets
    /// themselves and is stable for use as an index/sort key.
    pub fn compare(&self, other: &Self) -> Result<std::cmp::Ordering> {
        Ok(self.encode()?.cmp(&other.encode()?))
    }

    /// Encode to the canonical byte sequence (Format 0).
    pub fn encode(&self) -> Result<Vec<u8>> {
        let partitions = build_partitions(&self.ids)?;
        // Generous upper bound: worst case one RAW chunk (64 bits) plus a
        // few bits of tag/CDU overhead per populated 64-bit chunk, plus the
        // header. Reallocation-free is not a correctness requirement here.
        let approx_chunks: usize = partitions
            .iter()
            .map(|p| p.segments.iter().map(seg_chunk_count).sum::<usize>())
            .sum();
        let mut buf = vec![0u8; approx_chunks * 16 + partitions.len() * 32 + 64];
        let bits = partition::encode(&mut buf, &partitions)?;
        buf.truncate(bits.div_ceil(8));
        Ok(buf)
    }

    /// Decode a canonical byte sequence. Performs structural validation
    /// inline (see `partition`/`segment`/`token`) but does not itself check
    /// that the bytes are *the* canonical form for the recovered ids; use
    /// [`crate::validate::validate`] when that stronger guarantee matters.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let partitions = partition::decode(bytes, bytes.len() * 8)?;
        let mut ids = BTreeSet::new();
        for part in &partitions {
            let mut cursor: u64 = 0;
            for seg in &part.segments {
                cursor += seg.initial_delta();
                match seg {
                    Segment::Rle { length, polarity, .. } => {
                        if *polarity == 1 {
                            for offset in 0..*length {
                                ids.insert((part.id << PARTITION_WIDTH_BITS) | (cursor + offset));
                            }
                        }
                    }
                    Segment::Mix { chunks, .. } => {
                        for (i, &word) in chunks.iter().enumerate() {
                            for bit in 0..64 {
                                if word & (1u64 << bit) != 0 {
                                    let local = cursor + i as u64 * 64 + bit as u64;
                                    ids.insert((part.id << PARTITION_WIDTH_BITS) | local);
                                }
                            }
                        }
                    }
                }
                cursor += seg.length();
            }
        }
        Ok(Self { ids })
    }
}

fn seg_chunk_count(seg: &Segment) -> usize {
    match seg {
        Segment::Rle { .. } => 1,
        Segment::Mix { chunks, .. } => chunks.len(),
    }
}

/// The chunk-index gap beyond which a run of identical-polarity chunks is
/// worth breaking out as its own segment rather than carried inline; reuses
/// the dominant-run threshold (in chunks, not bits) that the segment
/// normalizer itself uses for the same RLE-vs-MIX tradeoff.
const CLUSTER_GAP_CHUNKS: u64 = (DOMINANT_RUN_THRESHOLD / 64) as u64 + 1;

/// Chunk-run length (in consecutive all-one chunks) above which a dense run
/// is pulled out into its own `RLE` segment instead of being written as a
/// string of all-ones `RAW` chunks inside a `MIX` segment.
const DENSE_RLE_CHUNKS: u64 = (DOMINANT_RUN_THRESHOLD / 64) as u64;

fn build_partitions(ids: &BTreeSet<u64>) -> Result<Vec<Partition>> {
    let mut by_partition: std::collections::BTreeMap<u64, BTreeSet<u32>> = Default::default();
    for &id in ids {
        let part_id = id >> PARTITION_WIDTH_BITS;
        let local = (id & u32::MAX as u64) as u32;
        by_partition.entry(part_id).or_default().insert(local);
    }

    let mut partitions = Vec::with_capacity(by_partition.len());
    for (part_id, locals) in by_partition {
        let segments = build_partition_segments(&locals);
        debug!(partition_id = part_id, segments = segments.len(), "built partition");
        partitions.push(Partition {
            id: part_id,
            segments,
        });
    }
    Ok(partitions)
}

/// Bit value of local position `pos` given the set of member local
/// positions.
fn bit_of(locals: &BTreeSet<u32>, pos: u32) -> bool {
    locals.contains(&pos)
}

fn chunk_word(locals: &BTreeSet<u32>, chunk_idx: u64) -> u64 {
    let base = chunk_idx * 64;
    let mut word = 0u64;
    for bit in 0..64u32 {
        if bit_of(locals, (base + bit as u64) as u32) {
            word |= 1u64 << bit;
        }
    }
    word
}

/// Build the segment list for one partition's local bit positions. Dense
/// (all-ones) chunk runs of at least [`DENSE_RLE_CHUNKS`] become their own
/// `RLE` segment; everything else is grouped into `MIX` segments, merging
/// active chunks that are within [`CLUSTER_GAP_CHUNKS`] of each other so a
/// short all-zero gap is carried as explicit zero chunks rather than
/// paying for a new segment header.
fn build_partition_segments(locals: &BTreeSet<u32>) -> Vec<Segment> {
    if locals.is_empty() {
        return Vec::new();
    }

    let active_chunks: Vec<u64> = {
        let mut v: Vec<u64> = locals.iter().map(|&p| p as u64 / 64).collect();
        v.dedup();
        v
    };

    // Find maximal runs of consecutive, fully dense (all 64 bits set)
    // chunks at least DENSE_RLE_CHUNKS long; these become RLE(1) spans.
    let mut dense_runs: Vec<(u64, u64)> = Vec::new(); // (first_chunk, run_len)
    let mut i = 0usize;
    while i < active_chunks.len() {
        let start_chunk = active_chunks[i];
        if chunk_word(locals, start_chunk) != u64::MAX {
            i += 1;
            continue;
        }
        let mut j = i;
        let mut run_chunk = start_chunk;
        while j < active_chunks.len()
            && active_chunks[j] == run_chunk
            && chunk_word(locals, run_chunk) == u64::MAX
        {
            run_chunk += 1;
            j += 1;
        }
        let run_len = run_chunk - start_chunk;
        if run_len >= DENSE_RLE_CHUNKS.max(1) {
            dense_runs.push((start_chunk, run_len));
        }
        i = j;
    }

    // Chunks covered by a dense run are excluded from MIX clustering.
    let dense_set: BTreeSet<u64> = dense_runs
        .iter()
        .flat_map(|&(start, len)| start..start + len)
        .collect();
    let mix_chunks: Vec<u64> = active_chunks
        .into_iter()
        .filter(|c| !dense_set.contains(c))
        .collect();

    // Cluster remaining active chunks into MIX spans.
    let mut mix_spans: Vec<(u64, u64)> = Vec::new(); // (first_chunk, last_chunk inclusive)
    for &chunk in &mix_chunks {
        match mix_spans.last_mut() {
            Some((_, last)) if chunk <= *last + CLUSTER_GAP_CHUNKS => {
                *last = chunk;
            }
            _ => mix_spans.push((chunk, chunk)),
        }
    }

    // Merge dense runs and MIX spans into one chronological segment list.
    #[derive(Clone, Copy)]
    enum Span {
        Dense(u64, u64),    // first_chunk, run_len
        Mix(u64, u64),      // first_chunk, last_chunk inclusive
    }
    let mut spans: Vec<Span> = dense_runs
        .iter()
        .map(|&(s, l)| Span::Dense(s, l))
        .chain(mix_spans.iter().map(|&(s, l)| Span::Mix(s, l)))
        .collect();
    spans.sort_by_key(|s| match s {
        Span::Dense(start, _) => *start,
        Span::Mix(start, _) => *start,
    });

    // A single RLE/MIX segment could otherwise grow to cover an entire
    // arbitrarily large run; cap it at MAX_SEGMENT_LEN_HINT *bits* so no one
    // segment's token walk or length field dominates the decode cost of a
    // partition. Splitting a span only adds a segment header (and a zero
    // initial_delta for every piece after the first); it never changes which
    // ids are represented.
    let max_chunks = MAX_SEGMENT_LEN_HINT as u64 / CHUNK_WIDTH_BITS as u64;

    let mut segments = Vec::with_capacity(spans.len());
    let mut cursor_bit = 0u64;
    for span in spans {
        match span {
            Span::Dense(start_chunk, run_len) => {
                let mut done = 0u64;
                while done < run_len {
                    let piece_len = (run_len - done).min(max_chunks);
                    let start_bit = (start_chunk + done) * 64;
                    let length = piece_len * 64;
                    segments.push(Segment::Rle {
                        initial_delta: start_bit - cursor_bit,
                        length,
                        polarity: 1,
                    });
                    cursor_bit = start_bit + length;
                    done += piece_len;
                }
            }
            Span::Mix(first, last) => {
                let total = last - first + 1;
                let mut done = 0u64;
                while done < total {
                    let piece_len = (total - done).min(max_chunks);
                    let piece_first = first + done;
                    let start_bit = piece_first * 64;
                    let chunks: Vec<u64> = (piece_first..piece_first + piece_len)
                        .map(|c| chunk_word(locals, c))
                        .collect();
                    let length = chunks.len() as u64 * 64;
                    segments.push(Segment::Mix {
                        initial_delta: start_bit - cursor_bit,
                        chunks,
                        length,
                    });
                    cursor_bit = start_bit + length;
                    done += piece_len;
                }
            }
        }
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() {
        crate::init().unwrap();
    }

    #[test]
    fn empty_round_trips() {
        setup();
        let abv = AbV::new_empty();
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded, abv);
        assert!(decoded.is_empty());
    }

    #[test]
    fn singleton_round_trips() {
        setup();
        let abv = AbV::new_singleton(42);
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded.to_sorted_ids(), vec![42]);
    }

    #[test]
    fn singleton_normalizes_to_one_mix_segment() {
        setup();
        // A 1-bit run is short of the rare-run threshold (64), so it is
        // carried as a one-chunk MIX segment rather than RLE; RLE is
        // reserved for homogeneous runs spanning their whole segment at or
        // above that threshold (see the singleton/RLE-64 note in DESIGN.md).
        let abv = AbV::new_singleton(42);
        let partitions = build_partitions(&abv.ids).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].id, 0);
        assert_eq!(partitions[0].segments.len(), 1);
        match &partitions[0].segments[0] {
            Segment::Mix {
                initial_delta,
                chunks,
                length,
            } => {
                assert_eq!(*initial_delta, 0);
                assert_eq!(*length, 64);
                assert_eq!(chunks, &[1u64 << 42]);
            }
            other => panic!("expected a single MIX segment, got {other:?}"),
        }
        assert!(abv.contains(42));
        assert!(!abv.contains(41));
        assert_eq!(abv.cardinality(), 1);
    }

    #[test]
    fn sparse_ids_round_trip() {
        setup();
        let ids = [0u64, 1, 2, 1_000, 1_000_000, u32::MAX as u64, 1 << 40, u64::MAX];
        let abv = AbV::from_sorted_ids(&ids).unwrap();
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded.to_sorted_ids(), ids);
    }

    #[test]
    fn dense_run_round_trips() {
        setup();
        let ids: Vec<u64> = (0..500).collect();
        let abv = AbV::from_sorted_ids(&ids).unwrap();
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded.to_sorted_ids(), ids);
    }

    #[test]
    fn dense_half_chunk_with_two_gaps_encodes_as_one_raw_chunk() {
        setup();
        // Odd ids in [1,63] minus {3,7}: 30 elements sharing chunk 0, with
        // popcount 30 > K_ENUM_MAX so the chunk must be written RAW, not ENUM.
        let ids: Vec<u64> = (1..=63).step_by(2).filter(|id| *id != 3 && *id != 7).collect();
        assert_eq!(ids.len(), 30);
        let abv = AbV::from_sorted_ids(&ids).unwrap();
        let partitions = build_partitions(&abv.ids).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].segments.len(), 1);
        match &partitions[0].segments[0] {
            Segment::Mix {
                initial_delta,
                chunks,
                length,
            } => {
                assert_eq!(*initial_delta, 0);
                assert_eq!(*length, 64);
                assert_eq!(chunks.len(), 1);
                assert_eq!(chunks[0].count_ones(), 30);
                assert!(chunks[0].count_ones() > crate::format::K_ENUM_MAX as u32);
            }
            other => panic!("expected a single MIX segment, got {other:?}"),
        }
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded.to_sorted_ids(), ids);
        assert_eq!(decoded.cardinality(), 30);
    }

    #[test]
    fn full_chunk_run_normalizes_to_rle() {
        setup();
        let ids: Vec<u64> = (0..64).collect();
        let abv = AbV::from_sorted_ids(&ids).unwrap();
        let partitions = build_partitions(&abv.ids).unwrap();
        assert_eq!(partitions.len(), 1);
        assert_eq!(partitions[0].segments.len(), 1);
        match &partitions[0].segments[0] {
            Segment::Rle {
                initial_delta,
                length,
                polarity,
            } => {
                assert_eq!(*initial_delta, 0);
                assert_eq!(*length, 64);
                assert_eq!(*polarity, 1);
            }
            other => panic!("expected a single RLE segment, got {other:?}"),
        }
        assert_eq!(abv.cardinality(), 64);
        let bytes = abv.encode().unwrap();
        assert_eq!(AbV::decode(&bytes).unwrap(), abv);
    }

    #[test]
    fn ids_spanning_partition_boundaries_split_into_one_partition_each() {
        setup();
        // Each id lands at local position 0 in its own partition, so each
        // partition's lone chunk covers local bits [0,64) with one bit set.
        let ids = [0u64, 1u64 << 32, 1u64 << 33];
        let abv = AbV::from_sorted_ids(&ids).unwrap();
        let partitions = build_partitions(&abv.ids).unwrap();
        assert_eq!(partitions.len(), 3);
        for (expected_id, partition) in [0u64, 1, 2].into_iter().zip(&partitions) {
            assert_eq!(partition.id, expected_id);
            assert_eq!(partition.segments.len(), 1);
            match &partition.segments[0] {
                Segment::Mix { chunks, length, .. } => {
                    assert_eq!(*length, 64);
                    assert_eq!(chunks, &[1u64]);
                }
                other => panic!("expected a single MIX segment, got {other:?}"),
            }
        }
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded.to_sorted_ids(), ids);
        assert_eq!(abv.compare(&decoded).unwrap(), std::cmp::Ordering::Equal);
    }

    #[test]
    fn overlong_dense_run_splits_into_multiple_segments_and_round_trips() {
        setup();
        // One dense run spanning more chunks than MAX_SEGMENT_LEN_HINT bits
        // allow in a single segment; the builder must split it rather than
        // emit a single oversized segment, and the split must still
        // round-trip and validate as canonical.
        let max_chunks = crate::format::MAX_SEGMENT_LEN_HINT as u64 / crate::format::CHUNK_WIDTH_BITS as u64;
        let n_ids = (max_chunks + 10) * 64;
        let ids: Vec<u64> = (0..n_ids).collect();
        let abv = AbV::from_sorted_ids(&ids).unwrap();
        let partitions = build_partitions(&abv.ids).unwrap();
        assert!(partitions[0].segments.len() >= 2);
        let bytes = abv.encode().unwrap();
        let decoded = AbV::decode(&bytes).unwrap();
        assert_eq!(decoded, abv);
        assert!(crate::validate::validate(&bytes).is_ok());
    }

    #[test]
    fn union_intersect_except() {
        setup();
        let a = AbV::from_sorted_ids(&[1, 2, 3, 4]).unwrap();
        let b = AbV::from_sorted_ids(&[3, 4, 5, 6]).unwrap();
        assert_eq!(a.union(&b).to_sorted_ids(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(a.intersect(&b).to_sorted_ids(), vec![3, 4]);
        assert_eq!(a.except(&b).to_sorted_ids(), vec![1, 2]);
    }

    #[test]
    fn add_remove_contains() {
        setup();
        let mut abv = AbV::new_empty();
        abv.add(7);
        assert!(abv.contains(7));
        abv.remove(7);
        assert!(!abv.contains(7));
    }

    #[test]
    fn compare_is_consistent_with_equality() {
        setup();
        let a = AbV::from_sorted_ids(&[1, 2]).unwrap();
        let b = AbV::from_sorted_ids(&[1, 2]).unwrap();
        let c = AbV::from_sorted_ids(&[1, 3]).unwrap();
        assert_eq!(a.compare(&b).unwrap(), std::cmp::Ordering::Equal);
        assert_ne!(a.compare(&c).unwrap(), std::cmp::Ordering::Equal);
    }

    #[test]
    fn from_sorted_ids_rejects_unsorted_input() {
        setup();
        assert!(AbV::from_sorted_ids(&[2, 1]).is_err());
        assert!(AbV::from_sorted_ids(&[1, 1]).is_err());
    }

    #[test]
    fn encoding_is_canonical() {
        setup();
        let abv = AbV::from_sorted_ids(&[10, 20, 30]).unwrap();
        let bytes = abv.encode().unwrap();
        assert!(crate::validate::validate(&bytes).is_ok());
    }
}
