//! Token codec: the chunk-level payload written inside a MIX segment.
//!
//! A token is a 2-bit tag (the `Raw2` CDU type) followed by a tag-specific
//! payload:
//!   - `ENUM`: `enum_k` (fixed 6 bits) then the combinadic rank of the
//!     chunk's set bits in `rank_bits(n, k)` bits.
//!   - `RAW`: the chunk's `n_bits` written verbatim, LSB-first.
//!   - `RAW_RUN`: a `raw_run_len` CDU field giving the number of
//!     consecutive verbatim chunks that follow this tag (coalescing run of
//!     dense, non-enumerable chunks so each doesn't pay its own tag).
//! `RESERVED` (tag 3) is not produced by this format version; a decoder
//! that sees it rejects the stream as invalid rather than guessing at a
//! future meaning.

use crate::bits::read_bits;
use crate::cdu::{self, CduType};
use crate::combinadic;
use crate::error::{AbvError, Location, Result};
use crate::format::K_ENUM_MAX;

const TAG_ENUM: u64 = 0;
const TAG_RAW: u64 = 1;
const TAG_RAW_RUN: u64 = 2;
const TAG_RESERVED: u64 = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Enum { k: u8, rank: u64 },
    Raw { bits: u64 },
    RawRun { len: u64 },
}

impl Token {
    /// Build the canonical token for a chunk's bit pattern, choosing ENUM
    /// when the popcount is within range and RAW otherwise. Does not decide
    /// RAW_RUN coalescing; that is a segment-level decision.
    pub fn for_chunk(bits: u64, n_bits: u8) -> Result<Self> {
        let k = bits.count_ones() as u8;
        if k <= K_ENUM_MAX && k <= n_bits {
            let rank = combinadic::rank(bits, n_bits, k)?;
            Ok(Token::Enum { k, rank })
        } else {
            Ok(Token::Raw { bits })
        }
    }
}

/// Encode `token` at `bit_pos`; `n_bits` is the width of the chunk this
/// token describes (64 for all but the last chunk of a partition).
pub fn encode(buf: &mut [u8], bit_pos: usize, token: &Token, n_bits: u8) -> usize {
    let mut used = 0usize;
    match token {
        Token::Enum { k, rank } => {
            used += cdu::encode(buf, bit_pos, TAG_ENUM, CduType::Raw2);
            used += cdu::encode(buf, bit_pos + used, *k as u64, CduType::EnumK);
            let width = combinadic::rank_bits(n_bits, *k);
            crate::bits::write_bits(buf, bit_pos + used, *rank, width);
            used += width as usize;
        }
        Token::Raw { bits } => {
            used += cdu::encode(buf, bit_pos, TAG_RAW, CduType::Raw2);
            crate::bits::write_bits(buf, bit_pos + used, *bits, n_bits);
            used += n_bits as usize;
        }
        Token::RawRun { len } => {
            used += cdu::encode(buf, bit_pos, TAG_RAW_RUN, CduType::Raw2);
            used += cdu::encode(buf, bit_pos + used, *len, CduType::RawRunLength);
        }
    }
    used
}

/// Decode one token at `bit_pos`. `n_bits` is the chunk width (ignored for
/// `RAW_RUN`, which carries no per-chunk payload itself).
pub fn decode(buf: &[u8], bit_pos: usize, buf_bits: usize, n_bits: u8) -> Result<(Token, usize)> {
    let (tag, mut used) = cdu::decode(buf, bit_pos, buf_bits, CduType::Raw2)?;
    match tag {
        TAG_ENUM => {
            let (k, k_bits) = cdu::decode(buf, bit_pos + used, buf_bits, CduType::EnumK)?;
            used += k_bits;
            let k = k as u8;
            if k > K_ENUM_MAX || k > n_bits {
                return Err(AbvError::InvalidEncoding {
                    field: "enum_k",
                    reason: "k exceeds the enum limit or exceeds chunk width",
                    at: Location::new((bit_pos + used) as u64, "enum_k"),
                });
            }
            let width = combinadic::rank_bits(n_bits, k);
            if bit_pos + used + width as usize > buf_bits {
                return Err(AbvError::Truncated {
                    field: "enum_rank",
                    at: Location::new((bit_pos + used) as u64, "enum_rank"),
                });
            }
            let rank = read_bits(buf, bit_pos + used, width);
            used += width as usize;
            if rank >= combinadic::binomial(n_bits, k) {
                return Err(AbvError::NonCanonical {
                    reason: "enum rank out of range for (n, k)",
                    at: Location::new((bit_pos + used) as u64, "enum_rank"),
                });
            }
            Ok((Token::Enum { k, rank }, used))
        }
        TAG_RAW => {
            if bit_pos + used + n_bits as usize > buf_bits {
                return Err(AbvError::Truncated {
                    field: "raw_chunk",
                    at: Location::new((bit_pos + used) as u64, "raw_chunk"),
                });
            }
            let bits = read_bits(buf, bit_pos + used, n_bits);
            used += n_bits as usize;
            let k = bits.count_ones() as u8;
            if k <= K_ENUM_MAX && k <= n_bits {
                return Err(AbvError::NonCanonical {
                    reason: "chunk popcount is enumerable but was written as RAW",
                    at: Location::new(bit_pos as u64, "raw_chunk"),
                });
            }
            Ok((Token::Raw { bits }, used))
        }
        TAG_RAW_RUN => {
            let (len, len_bits) = cdu::decode(buf, bit_pos + used, buf_bits, CduType::RawRunLength)?;
            used += len_bits;
            if len < 2 {
                return Err(AbvError::NonCanonical {
                    reason: "RAW_RUN coalescing fewer than two chunks is non-minimal",
                    at: Location::new(bit_pos as u64, "raw_run_len"),
                });
            }
            Ok((Token::RawRun { len }, used))
        }
        TAG_RESERVED => Err(AbvError::InvalidEncoding {
            field: "token_tag",
            reason: "reserved token tag is not defined in this format version",
            at: Location::new(bit_pos as u64, "token_tag"),
        }),
        _ => unreachable!("Raw2 CDU type only produces 2-bit values"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn all_zero_chunk_is_enum_k0() {
        cdu::init().unwrap();
        combinadic::init().unwrap();
        let token = Token::for_chunk(0, 64).unwrap();
        assert_eq!(token, Token::Enum { k: 0, rank: 0 });
        let mut buf = vec![0u8; 16];
        let written = encode(&mut buf, 0, &token, 64);
        let (decoded, consumed) = decode(&buf, 0, buf.len() * 8, 64).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(consumed, written);
    }

    #[rstest]
    #[case(0b0, 64)]
    #[case(0b1, 64)]
    #[case(0b1010_1010, 64)]
    #[case(u64::MAX, 64)]
    #[case(0b1, 7)]
    fn chunk_round_trips(#[case] bits: u64, #[case] n_bits: u8) {
        cdu::init().unwrap();
        combinadic::init().unwrap();
        let token = Token::for_chunk(bits, n_bits).unwrap();
        let mut buf = vec![0u8; 32];
        let written = encode(&mut buf, 5, &token, n_bits);
        let (decoded, consumed) = decode(&buf, 5, buf.len() * 8, n_bits).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(consumed, written);
        let reconstructed = match decoded {
            Token::Enum { k, rank } => combinadic::unrank(rank, n_bits, k).unwrap(),
            Token::Raw { bits } => bits,
            Token::RawRun { .. } => panic!("for_chunk never produces RAW_RUN"),
        };
        let masked = if n_bits == 64 {
            bits
        } else {
            bits & ((1u64 << n_bits) - 1)
        };
        assert_eq!(reconstructed, masked);
    }

    #[test]
    fn raw_run_round_trips() {
        cdu::init().unwrap();
        let token = Token::RawRun { len: 5 };
        let mut buf = vec![0u8; 16];
        let written = encode(&mut buf, 0, &token, 64);
        let (decoded, consumed) = decode(&buf, 0, buf.len() * 8, 64).unwrap();
        assert_eq!(decoded, token);
        assert_eq!(consumed, written);
    }

    #[test]
    fn raw_run_of_one_is_rejected_as_non_canonical() {
        cdu::init().unwrap();
        let mut buf = vec![0u8; 16];
        let mut used = cdu::encode(&mut buf, 0, TAG_RAW_RUN, CduType::Raw2);
        used += cdu::encode(&mut buf, used, 1, CduType::RawRunLength);
        let _ = used;
        let err = decode(&buf, 0, buf.len() * 8, 64).unwrap_err();
        assert!(matches!(err, AbvError::NonCanonical { .. }));
    }

    #[test]
    fn raw_tag_on_enumerable_chunk_is_rejected() {
        cdu::init().unwrap();
        let mut buf = vec![0u8; 16];
        let mut used = cdu::encode(&mut buf, 0, TAG_RAW, CduType::Raw2);
        crate::bits::write_bits(&mut buf, used, 1, 64); // single bit set, clearly enumerable
        used += 64;
        let _ = used;
        let err = decode(&buf, 0, buf.len() * 8, 64).unwrap_err();
        assert!(matches!(err, AbvError::NonCanonical { .. }));
    }

    #[test]
    fn reserved_tag_is_rejected() {
        let mut buf = vec![0u8; 8];
        cdu::encode(&mut buf, 0, TAG_RESERVED, CduType::Raw2);
        let err = decode(&buf, 0, buf.len() * 8, 64).unwrap_err();
        assert!(matches!(err, AbvError::InvalidEncoding { .. }));
    }
}
