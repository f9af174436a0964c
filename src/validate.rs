//! Canonicity validator: confirms a byte sequence is not merely a *valid*
//! decoding but *the* canonical encoding of the subset it represents.
//!
//! [`crate::partition::decode`] and its callees already reject a wide class
//! of malformed or non-minimal streams inline (non-minimal CDU fields,
//! non-minimal RAW_RUN runs, zero-polarity RLE, out-of-order partitions,
//! range overruns). What none of those local checks can see is whether the
//! *segment-boundary choices themselves* — which spans became RLE, where a
//! MIX segment starts and ends, which runs got RAW_RUN-coalesced — are the
//! ones the builder would have made. So this module takes the cheap route:
//! decode, rebuild from the recovered ids with the same builder the encoder
//! uses, and compare bytes. Any divergence means the input, while
//! structurally well-formed, is not canonical.

use crate::abv::AbV;
use crate::error::{AbvError, Location, Result};

/// Decode `bytes`, confirm it round-trips to the same ids and that
/// re-encoding those ids reproduces `bytes` exactly.
pub fn validate(bytes: &[u8]) -> Result<AbV> {
    let abv = AbV::decode(bytes)?;
    let rebuilt = abv.encode()?;
    if rebuilt != bytes {
        return Err(AbvError::NonCanonical {
            reason: "byte sequence decodes to a value whose canonical encoding differs",
            at: Location::new(0, "subset_key"),
        });
    }
    Ok(abv)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_bytes_validate() {
        crate::init().unwrap();
        let abv = AbV::from_sorted_ids(&[1, 2, 3, 1_000_000]).unwrap();
        let bytes = abv.encode().unwrap();
        let validated = validate(&bytes).unwrap();
        assert_eq!(validated.to_sorted_ids(), abv.to_sorted_ids());
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        crate::init().unwrap();
        let abv = AbV::from_sorted_ids(&[1, 2, 3]).unwrap();
        let bytes = abv.encode().unwrap();
        let truncated = &bytes[..bytes.len() - 1];
        assert!(validate(truncated).is_err());
    }
}
