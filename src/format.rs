//! Format-frozen constants for wire format version 0.
//!
//! These are not runtime configuration: changing any of them changes the
//! canonical byte sequence a given subset maps to, so they are `pub const`
//! rather than a config struct (see DESIGN.md's configuration note). A
//! future format version may change these; this module names only the
//! version this crate currently speaks.

/// The only wire format version this crate currently encodes or decodes.
pub const FORMAT_VERSION: u64 = 0;

/// Run length of dominant-polarity chunks above which the normalizer closes
/// out a segment rather than extending it.
pub const DOMINANT_RUN_THRESHOLD: u32 = 96;

/// Minimum run length (in chunks' worth of bits) for a homogeneous span to be
/// preferred as an RLE segment over an equivalent MIX encoding.
pub const RARE_RUN_THRESHOLD: u32 = 64;

/// Cap on segment length (in chunks) used to bound encode/decode work per
/// segment: a run or cluster longer than this is split across multiple
/// back-to-back segments rather than written as one.
pub const MAX_SEGMENT_LEN_HINT: u32 = 2048;

/// Largest `k` (popcount) an ENUM token will combinadic-rank directly;
/// chunks denser than this fall back to RAW.
pub const K_ENUM_MAX: u8 = 18;

/// Width, in bits, of a partition's identifier range: partition `i` covers
/// `[i * 2^32, (i+1) * 2^32)`.
pub const PARTITION_WIDTH_BITS: u32 = 32;

/// Width, in bits, of one chunk (a single `u64` bitmap word).
pub const CHUNK_WIDTH_BITS: u8 = 64;
