//! Canonical Data Unit (CDU) codec: a shape-parameterized unsigned-integer
//! encoding used for every structural integer in the wire format.
//!
//! Each [`CduType`] is described by a small parameter record (`base_bits`,
//! `fixed`, `first`, `step_size`, `max_mids`). Fixed types write exactly
//! `base_bits` with no continuation overhead. Variable types write a
//! sequence of steps — `first, step_size, step_size, ..., remainder` — each
//! followed by one continuation bit, LEB128-style but with a per-type step
//! shape instead of a uniform 7-bit group. The step widths are computed once
//! at [`init`] time and cached; encode/decode then walk that cached step
//! list in a single pass.

use crate::bits::{bytes_for_bits, read_bits, write_bits};
use crate::error::{AbvError, Location, Result};
use std::sync::OnceLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CduType {
    Version,
    PartitionCount,
    PartitionDelta,
    SegmentCount,
    SegmentInitialDelta,
    SegmentLength,
    EnumK,
    RawRunLength,
    Raw1,
    Raw2,
    Raw64,
}

/// Exhaustive type catalog, in table order; indices line up with the arrays
/// produced by [`raw_table`] and cached in [`PARAMS`].
const ALL_TYPES: [CduType; 11] = [
    CduType::Version,
    CduType::PartitionCount,
    CduType::PartitionDelta,
    CduType::SegmentCount,
    CduType::SegmentInitialDelta,
    CduType::SegmentLength,
    CduType::EnumK,
    CduType::RawRunLength,
    CduType::Raw1,
    CduType::Raw2,
    CduType::Raw64,
];

#[derive(Debug, Clone)]
struct RawParam {
    ty: CduType,
    base_bits: u8,
    fixed: bool,
    first: u8,
    step_size: u8,
    max_mids: u8,
}

/// Computed, immutable shape for one [`CduType`]: either a fixed width, or
/// the concrete step-width sequence a variable encoding walks.
#[derive(Debug, Clone)]
pub struct CduParam {
    pub base_bits: u8,
    pub fixed: bool,
    /// Step payload widths, in write order. Empty for fixed types.
    pub steps: Vec<u8>,
}

impl CduParam {
    /// Maximum bits a value of this type can occupy on the wire.
    pub fn max_encoded_bits(&self) -> u8 {
        if self.fixed {
            self.base_bits
        } else {
            self.steps.iter().map(|w| w + 1).sum()
        }
    }
}

fn raw_table() -> [RawParam; 11] {
    use CduType::*;
    [
        RawParam {
            ty: Version,
            base_bits: 3,
            fixed: true,
            first: 0,
            step_size: 0,
            max_mids: 0,
        },
        RawParam {
            ty: PartitionCount,
            base_bits: 32,
            fixed: false,
            first: 5,
            step_size: 9,
            max_mids: 3,
        },
        RawParam {
            ty: PartitionDelta,
            base_bits: 32,
            fixed: false,
            first: 5,
            step_size: 9,
            max_mids: 3,
        },
        RawParam {
            ty: SegmentCount,
            base_bits: 24,
            fixed: false,
            first: 4,
            step_size: 6,
            max_mids: 3,
        },
        RawParam {
            ty: SegmentInitialDelta,
            base_bits: 32,
            fixed: false,
            first: 6,
            step_size: 8,
            max_mids: 4,
        },
        RawParam {
            ty: SegmentLength,
            base_bits: 32,
            fixed: false,
            first: 5,
            step_size: 9,
            max_mids: 3,
        },
        RawParam {
            ty: EnumK,
            base_bits: 6,
            fixed: true,
            first: 0,
            step_size: 0,
            max_mids: 0,
        },
        RawParam {
            ty: RawRunLength,
            base_bits: 28,
            fixed: false,
            first: 4,
            step_size: 6,
            max_mids: 4,
        },
        RawParam {
            ty: Raw1,
            base_bits: 1,
            fixed: true,
            first: 0,
            step_size: 0,
            max_mids: 0,
        },
        RawParam {
            ty: Raw2,
            base_bits: 2,
            fixed: true,
            first: 0,
            step_size: 0,
            max_mids: 0,
        },
        RawParam {
            ty: Raw64,
            base_bits: 64,
            fixed: true,
            first: 0,
            step_size: 0,
            max_mids: 0,
        },
    ]
}

/// Build the step-width sequence `first, step_size, ..., remainder` for a
/// variable type: `middles` is the largest `k <= max_mids` such that
/// `base_bits - first - k*step_size >= step_size`.
fn build_steps(p: &RawParam) -> Result<Vec<u8>> {
    let mut middles: u8 = 0;
    loop {
        let next = middles + 1;
        if next > p.max_mids {
            break;
        }
        let remainder = p.base_bits as i32 - p.first as i32 - (next as i32) * p.step_size as i32;
        if remainder >= p.step_size as i32 {
            middles = next;
        } else {
            break;
        }
    }
    let remainder = p.base_bits as i32 - p.first as i32 - (middles as i32) * p.step_size as i32;
    if remainder <= 0 {
        return Err(AbvError::InvariantViolated {
            detail: "CDU shape produced non-positive remainder step",
        });
    }
    let mut steps = Vec::with_capacity(middles as usize + 2);
    steps.push(p.first);
    for _ in 0..middles {
        steps.push(p.step_size);
    }
    steps.push(remainder as u8);
    Ok(steps)
}

static PARAMS: OnceLock<[CduParam; 11]> = OnceLock::new();

fn build_params() -> Result<[CduParam; 11]> {
    let raw = raw_table();
    let mut built: Vec<CduParam> = Vec::with_capacity(raw.len());
    for p in &raw {
        let steps = if p.fixed { Vec::new() } else { build_steps(p)? };
        let cp = CduParam {
            base_bits: p.base_bits,
            fixed: p.fixed,
            steps,
        };
        if cp.max_encoded_bits() > 64 {
            return Err(AbvError::InvariantViolated {
                detail: "CDU type exceeds 64-bit encoded length",
            });
        }
        built.push(cp);
    }
    Ok(built
        .try_into()
        .unwrap_or_else(|_| unreachable!("raw_table length matches ALL_TYPES length")))
}

/// Populate the CDU parameter table. Idempotent; safe to call more than
/// once. Every public encode/decode entry point calls [`param`], which
/// lazily does the same build, so callers never need to call this directly —
/// it exists for callers who want to front-load the cost and surface a build
/// error eagerly.
pub fn init() -> Result<()> {
    if PARAMS.get().is_some() {
        return Ok(());
    }
    let array = build_params()?;
    let _ = PARAMS.set(array);
    Ok(())
}

fn param(ty: CduType) -> &'static CduParam {
    let table = PARAMS.get_or_init(|| build_params().expect("static CDU table must build"));
    let idx = ALL_TYPES.iter().position(|t| *t == ty).expect("exhaustive");
    &table[idx]
}

/// Encode `value` under `ty` at `bit_pos` in `buf`, returning bits written.
pub fn encode(buf: &mut [u8], bit_pos: usize, value: u64, ty: CduType) -> usize {
    let p = param(ty);
    if p.fixed {
        write_bits(buf, bit_pos, value, p.base_bits);
        p.base_bits as usize
    } else {
        let mut v = value;
        let mut bits_used = 0usize;
        for (i, &w) in p.steps.iter().enumerate() {
            let morebit = 1u64 << w;
            let is_last = i + 1 == p.steps.len();
            if !is_last && v >= morebit {
                let chunk = (v & (morebit - 1)) | morebit;
                write_bits(buf, bit_pos + bits_used, chunk, w + 1);
                bits_used += (w + 1) as usize;
                v >>= w;
            } else {
                write_bits(buf, bit_pos + bits_used, v, w + 1);
                bits_used += (w + 1) as usize;
                break;
            }
        }
        bits_used
    }
}

/// Decode a value of type `ty` starting at `bit_pos`. `buf_bits` is the
/// total valid bit length of `buf`, used to detect truncation before a read
/// would run past the end of the stream.
pub fn decode(buf: &[u8], bit_pos: usize, buf_bits: usize, ty: CduType) -> Result<(u64, usize)> {
    let p = param(ty);
    let field_name = field_name(ty);
    if p.fixed {
        if bit_pos + p.base_bits as usize > buf_bits {
            return Err(AbvError::Truncated {
                field: field_name,
                at: Location::new(bit_pos as u64, field_name),
            });
        }
        let value = read_bits(buf, bit_pos, p.base_bits);
        Ok((value, p.base_bits as usize))
    } else {
        let mut shift = 0u32;
        let mut bits_used = 0usize;
        let mut value = 0u64;
        for &w in &p.steps {
            if bit_pos + bits_used + (w as usize + 1) > buf_bits {
                return Err(AbvError::Truncated {
                    field: field_name,
                    at: Location::new((bit_pos + bits_used) as u64, field_name),
                });
            }
            let chunk = read_bits(buf, bit_pos + bits_used, w + 1);
            let morebit = 1u64 << w;
            value |= (chunk & (morebit - 1)) << shift;
            bits_used += (w + 1) as usize;
            shift += w as u32;
            if chunk & morebit == 0 {
                return Ok((value, bits_used));
            }
        }
        // Continuation bit set on the final step: more steps than the type
        // allows were requested. Non-minimal / corrupt encoding.
        Err(AbvError::InvalidEncoding {
            field: field_name,
            reason: "continuation bit set past final CDU step",
            at: Location::new(bit_pos as u64, field_name),
        })
    }
}

/// Decode and verify the value was encoded minimally (no superfluous
/// continuation steps).
pub fn decode_canonical(
    buf: &[u8],
    bit_pos: usize,
    buf_bits: usize,
    ty: CduType,
) -> Result<(u64, usize)> {
    let (value, bits_used) = decode(buf, bit_pos, buf_bits, ty)?;
    let mut check = vec![0u8; bytes_for_bits(bits_used) + 8];
    let written = encode(&mut check, 0, value, ty);
    if written != bits_used {
        return Err(AbvError::NonCanonical {
            reason: "CDU field is not minimally encoded",
            at: Location::new(bit_pos as u64, field_name(ty)),
        });
    }
    for bit in 0..bits_used {
        if read_bits(buf, bit_pos + bit, 1) != read_bits(&check, bit, 1) {
            return Err(AbvError::NonCanonical {
                reason: "CDU field is not minimally encoded",
                at: Location::new(bit_pos as u64, field_name(ty)),
            });
        }
    }
    Ok((value, bits_used))
}

fn field_name(ty: CduType) -> &'static str {
    match ty {
        CduType::Version => "format_version",
        CduType::PartitionCount => "n_partitions",
        CduType::PartitionDelta => "partition_delta",
        CduType::SegmentCount => "segment_count",
        CduType::SegmentInitialDelta => "segment_initial_delta",
        CduType::SegmentLength => "segment_length",
        CduType::EnumK => "enum_k",
        CduType::RawRunLength => "raw_run_len",
        CduType::Raw1 => "raw1",
        CduType::Raw2 => "raw2",
        CduType::Raw64 => "raw64",
    }
}
