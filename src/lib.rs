#![forbid(unsafe_code)]
//! `ssk_core`: a bijection between arbitrary subsets of a 64-bit identifier
//! domain and a canonical, compact byte sequence (a "subset key").
//!
//! The identifier domain is partitioned into `2^32`-wide ranges; each
//! present partition is covered end to end by a sequence of segments
//! (homogeneous runs, or explicit per-chunk tokens), each chunk a 64-bit
//! word encoded either by its combinadic rank (sparse/dense-enumerable) or
//! verbatim. See `SPEC_FULL.md`/`DESIGN.md` in the repository root for the
//! full design; this module re-exports the public surface described there.
//!
//! ```
//! ssk_core::init().unwrap();
//! let a = ssk_core::AbV::from_sorted_ids(&[1, 2, 3]).unwrap();
//! let bytes = a.encode().unwrap();
//! let b = ssk_core::AbV::decode(&bytes).unwrap();
//! assert_eq!(a, b);
//! ```

pub mod abv;
pub mod bits;
pub mod cache;
pub mod cdu;
pub mod combinadic;
pub mod error;
pub mod format;
pub mod partition;
pub mod segment;
pub mod token;
pub mod validate;

pub use abv::AbV;
pub use cache::AbvCache;
pub use error::{AbvError, Location, Result};

/// Populate the process-wide CDU and combinadic tables. Idempotent and
/// cheap to call more than once; every encode/decode entry point also
/// lazily initializes on first use, so calling this explicitly is only
/// useful to front-load the cost or surface a build failure eagerly.
pub fn init() -> Result<()> {
    cdu::init()?;
    combinadic::init()?;
    Ok(())
}
