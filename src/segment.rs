//! Segment codec: a partition's ID range is covered end-to-end by a sequence
//! of segments, each either a homogeneous run (`RLE`) or an explicit
//! sequence of per-chunk tokens (`MIX`).
//!
//! Every segment carries `initial_delta` (gap in bits since the previous
//! segment's end, or from the partition start for the first segment) and
//! `length` (bits covered), both CDU-coded. An `RLE` segment is then just a
//! one-bit polarity; a `MIX` segment is a chunk-by-chunk walk of [`Token`]s,
//! with runs of two or more non-enumerable chunks coalesced into a single
//! `RAW_RUN` tag followed by their raw bits back to back.

use crate::bits::{read_bits, write_bits, BlockAnalysis};
use crate::cdu::{self, CduType};
use crate::error::{AbvError, Location, Result};
use crate::format::{CHUNK_WIDTH_BITS, DOMINANT_RUN_THRESHOLD, K_ENUM_MAX, RARE_RUN_THRESHOLD};
use crate::token::{self, Token};

/// Whether a homogeneous run of `length` bits at the given polarity should be
/// written as an `RLE` segment rather than walked chunk-by-chunk as `MIX`.
/// Mirrors the gate a hand-rolled normalizer would apply before ever
/// allocating per-chunk tokens: a run must be free of rare bits at all (RLE
/// carries no per-chunk exceptions) and long enough to be worth a dedicated
/// segment header.
pub fn prefers_rle(analysis: &BlockAnalysis, length: u32) -> bool {
    analysis.rare_count == 0 && length >= RARE_RUN_THRESHOLD && length >= 1
}

/// Whether a gap of `length` dominant-polarity bits is long enough to never
/// be represented explicitly (it becomes the implicit space between two
/// segments, or leading/trailing the partition).
pub fn is_implicit_gap(length: u64) -> bool {
    length >= DOMINANT_RUN_THRESHOLD as u64
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Rle {
        initial_delta: u64,
        length: u64,
        polarity: u8,
    },
    Mix {
        initial_delta: u64,
        /// One `u64` per chunk; the last chunk may be partial (only its low
        /// `length - 64*(chunks.len()-1)` bits are meaningful).
        chunks: Vec<u64>,
        length: u64,
    },
}

impl Segment {
    pub fn length(&self) -> u64 {
        match self {
            Segment::Rle { length, .. } => *length,
            Segment::Mix { length, .. } => *length,
        }
    }

    pub fn initial_delta(&self) -> u64 {
        match self {
            Segment::Rle { initial_delta, .. } => *initial_delta,
            Segment::Mix { initial_delta, .. } => *initial_delta,
        }
    }
}

/// Chunk widths covering `length` bits: `64` for every chunk but the last,
/// which takes the remainder (`64` exactly when `length` is a multiple of
/// 64).
fn chunk_widths(length: u64) -> Vec<u8> {
    let full = (length / CHUNK_WIDTH_BITS as u64) as usize;
    let rem = (length % CHUNK_WIDTH_BITS as u64) as u8;
    let mut widths = vec![CHUNK_WIDTH_BITS; full];
    if rem > 0 {
        widths.push(rem);
    }
    widths
}

/// Decide whether a chunk would be written RAW (not enumerable) under the
/// token rules, used by the normalizer to find coalescible runs.
fn is_raw_chunk(bits: u64, n_bits: u8) -> bool {
    let k = bits.count_ones() as u8;
    !(k <= K_ENUM_MAX && k <= n_bits)
}

/// Build the canonical MIX token stream for a sequence of chunks: runs of
/// two or more consecutive RAW chunks become one `RAW_RUN` tag plus their
/// verbatim bits; everything else gets its own ENUM/RAW token.
fn normalize_mix(chunks: &[u64], widths: &[u8]) -> Result<Vec<(Token, Option<(usize, usize)>)>> {
    let mut out = Vec::new();
    let mut i = 0;
    while i < chunks.len() {
        if is_raw_chunk(chunks[i], widths[i]) {
            let start = i;
            let mut j = i + 1;
            while j < chunks.len() && widths[j] == CHUNK_WIDTH_BITS && is_raw_chunk(chunks[j], widths[j])
            {
                j += 1;
            }
            let run_len = j - start;
            if run_len >= 2 {
                out.push((Token::RawRun { len: run_len as u64 }, Some((start, run_len))));
                i = j;
                continue;
            }
        }
        out.push((Token::for_chunk(chunks[i], widths[i])?, None));
        i += 1;
    }
    Ok(out)
}

/// Encode `segment` at `bit_pos`. Returns bits written.
pub fn encode(buf: &mut [u8], bit_pos: usize, segment: &Segment) -> Result<usize> {
    let mut used = 0usize;
    used += write_bits_bool(buf, bit_pos + used, matches!(segment, Segment::Rle { .. }));
    used += cdu::encode(buf, bit_pos + used, segment.initial_delta(), CduType::SegmentInitialDelta);
    used += cdu::encode(buf, bit_pos + used, segment.length(), CduType::SegmentLength);
    match segment {
        Segment::Rle { polarity, .. } => {
            used += write_bits_bool(buf, bit_pos + used, *polarity != 0);
        }
        Segment::Mix { chunks, length, .. } => {
            let widths = chunk_widths(*length);
            let plan = normalize_mix(chunks, &widths)?;
            let mut cursor = 0usize;
            for (token, raw_run) in &plan {
                used += token::encode(buf, bit_pos + used, token, widths[cursor]);
                match raw_run {
                    Some((start, run_len)) => {
                        debug_assert_eq!(*start, cursor);
                        for idx in *start..*start + *run_len {
                            write_bits(buf, bit_pos + used, chunks[idx], widths[idx]);
                            used += widths[idx] as usize;
                        }
                        cursor += run_len;
                    }
                    None => cursor += 1,
                }
            }
        }
    }
    Ok(used)
}

fn write_bits_bool(buf: &mut [u8], bit_pos: usize, value: bool) -> usize {
    write_bits(buf, bit_pos, value as u64, 1);
    1
}

/// Decode one segment at `bit_pos`.
pub fn decode(buf: &[u8], bit_pos: usize, buf_bits: usize) -> Result<(Segment, usize)> {
    if bit_pos + 1 > buf_bits {
        return Err(AbvError::Truncated {
            field: "segment_is_rle",
            at: Location::new(bit_pos as u64, "segment_is_rle"),
        });
    }
    let mut used = 0usize;
    let is_rle = read_bits(buf, bit_pos, 1) != 0;
    used += 1;
    let (initial_delta, d_bits) =
        cdu::decode_canonical(buf, bit_pos + used, buf_bits, CduType::SegmentInitialDelta)?;
    used += d_bits;
    let (length, l_bits) = cdu::decode_canonical(buf, bit_pos + used, buf_bits, CduType::SegmentLength)?;
    used += l_bits;
    if length == 0 {
        return Err(AbvError::NonCanonical {
            reason: "segment covers zero bits",
            at: Location::new(bit_pos as u64, "segment_length"),
        });
    }

    if is_rle {
        if bit_pos + used + 1 > buf_bits {
            return Err(AbvError::Truncated {
                field: "rle_polarity",
                at: Location::new((bit_pos + used) as u64, "rle_polarity"),
            });
        }
        let polarity = read_bits(buf, bit_pos + used, 1) as u8;
        used += 1;
        if polarity == 0 {
            // An all-zero span never needs a segment of its own: it is
            // always absorbed into the next segment's (or the partition's
            // trailing implicit) gap instead.
            return Err(AbvError::NonCanonical {
                reason: "a zero-polarity RLE segment is redundant with an implicit gap",
                at: Location::new(bit_pos as u64, "rle_polarity"),
            });
        }
        Ok((
            Segment::Rle {
                initial_delta,
                length,
                polarity,
            },
            used,
        ))
    } else {
        let widths = chunk_widths(length);
        let mut chunks = Vec::with_capacity(widths.len());
        let mut idx = 0usize;
        while idx < widths.len() {
            let (token, t_bits) = token::decode(buf, bit_pos + used, buf_bits, widths[idx])?;
            used += t_bits;
            match token {
                Token::Enum { k, rank } => {
                    chunks.push(crate::combinadic::unrank(rank, widths[idx], k)?);
                    idx += 1;
                }
                Token::Raw { bits } => {
                    chunks.push(bits);
                    idx += 1;
                }
                Token::RawRun { len } => {
                    let len = len as usize;
                    if idx + len > widths.len() {
                        return Err(AbvError::InvalidEncoding {
                            field: "raw_run_len",
                            reason: "RAW_RUN extends past the segment's chunk count",
                            at: Location::new((bit_pos + used) as u64, "raw_run_len"),
                        });
                    }
                    for offset in 0..len {
                        let w = widths[idx + offset];
                        if bit_pos + used + w as usize > buf_bits {
                            return Err(AbvError::Truncated {
                                field: "raw_run_chunk",
                                at: Location::new((bit_pos + used) as u64, "raw_run_chunk"),
                            });
                        }
                        chunks.push(read_bits(buf, bit_pos + used, w));
                        used += w as usize;
                    }
                    idx += len;
                }
            }
        }
        Ok((
            Segment::Mix {
                initial_delta,
                chunks,
                length,
            },
            used,
        ))
    }
}
