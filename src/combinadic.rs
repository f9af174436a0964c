//! Combinadic rank/unrank: a colexicographic bijection between k-subsets of
//! `{0, ..., n-1}` and integers in `[0, C(n,k))`, used by the ENUM token to
//! pack a sparse or dense chunk into a single integer plus its `k`.
//!
//! Rank runs in `O(k)` by scanning only the set bit positions (trailing-zero
//! scan, clearing each as it's consumed); unrank runs in `O(n)` by a single
//! forward descent from the top position, deciding at each position whether
//! its binomial coefficient fits in the remaining rank.

use crate::error::{AbvError, Result};
use std::sync::OnceLock;

/// Largest `k` this crate will rank/unrank (the ENUM token's `enum_k` field
/// is bounded to this; see `format::K_ENUM_MAX`).
pub const K_MAX: u8 = crate::format::K_ENUM_MAX;
/// Largest `n` (chunk width) ever ranked.
pub const N_MAX: u8 = 64;

struct BinomialTable {
    /// `table[k][n] == C(n, k)`, for `k in 0..=K_MAX`, `n in 0..=N_MAX`.
    table: Vec<Vec<u64>>,
}

impl BinomialTable {
    fn build() -> Self {
        let k_max = K_MAX as usize;
        let n_max = N_MAX as usize;
        let mut table = vec![vec![0u64; n_max + 1]; k_max + 1];
        for row in table.iter_mut() {
            row[0] = 0;
        }
        table[0][0] = 1;
        for n in 1..=n_max {
            table[0][n] = 1; // C(n, 0) == 1
        }
        for k in 1..=k_max {
            for n in 0..=n_max {
                if n < k {
                    table[k][n] = 0;
                } else if n == k {
                    table[k][n] = 1;
                } else {
                    table[k][n] = table[k - 1][n - 1] + table[k][n - 1];
                }
            }
        }
        Self { table }
    }

    fn get(&self, n: u8, k: u8) -> u64 {
        if k as usize > self.table.len() - 1 || n as usize > self.table[0].len() - 1 {
            return 0;
        }
        self.table[k as usize][n as usize]
    }
}

static TABLE: OnceLock<BinomialTable> = OnceLock::new();

/// Populate the binomial coefficient table. Idempotent.
pub fn init() -> Result<()> {
    let _ = TABLE.get_or_init(BinomialTable::build);
    Ok(())
}

fn table() -> &'static BinomialTable {
    TABLE.get_or_init(BinomialTable::build)
}

/// `C(n, k)`, the size of the rank space for a given chunk width and
/// popcount. Zero when `k > n`.
pub fn binomial(n: u8, k: u8) -> u64 {
    table().get(n, k)
}

/// Rank of the k-subset encoded by the set bits of `bits` (only the low
/// `n` bits are examined; `k` must equal their popcount).
pub fn rank(bits: u64, n: u8, k: u8) -> Result<u64> {
    if k == 0 {
        // The empty subset is the sole member of its rank space: rank 0,
        // no bits to scan.
        return Ok(0);
    }
    if k > K_MAX || k > n {
        return Err(AbvError::InvariantViolated {
            detail: "combinadic rank: k exceeds supported range or n",
        });
    }
    let mut working = bits;
    let mut total = 0u64;
    let mut j = 0u8;
    while working != 0 && j < k {
        let pos = working.trailing_zeros() as u8;
        if pos >= n {
            break;
        }
        total += table().get(pos, j + 1);
        working &= !(1u64 << pos);
        j += 1;
    }
    Ok(total)
}

/// Reconstruct the `n`-bit pattern (exactly `k` bits set) with the given
/// combinadic `rank`.
pub fn unrank(mut rank: u64, n: u8, k: u8) -> Result<u64> {
    if k == 0 {
        if rank != 0 {
            return Err(AbvError::InvalidEncoding {
                field: "enum_rank",
                reason: "rank is out of range for (n, k)",
                at: crate::error::Location::new(0, "enum_rank"),
            });
        }
        return Ok(0);
    }
    if k > K_MAX || k > n {
        return Err(AbvError::InvariantViolated {
            detail: "combinadic unrank: k exceeds supported range or n",
        });
    }
    if rank >= table().get(n, k) {
        return Err(AbvError::InvalidEncoding {
            field: "enum_rank",
            reason: "rank is out of range for (n, k)",
            at: crate::error::Location::new(0, "enum_rank"),
        });
    }
    let mut bits = 0u64;
    let mut remaining_k = k;
    let mut pos = n;
    while remaining_k > 0 {
        pos -= 1;
        let coeff = table().get(pos, remaining_k);
        if coeff <= rank {
            bits |= 1u64 << pos;
            rank -= coeff;
            remaining_k -= 1;
        }
    }
    Ok(bits)
}

/// Bits required to represent any rank in `[0, C(n,k))`: the minimal fixed
/// width for a raw rank field.
pub fn rank_bits(n: u8, k: u8) -> u8 {
    let count = binomial(n, k);
    if count <= 1 {
        0
    } else {
        64 - (count - 1).leading_zeros() as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn small_rank_unrank_worked_example() {
        // bits = 0b010110 (n=6, k=3, positions {1,3,4}) -> rank 8
        let bits = 0b010110u64;
        let n = 6;
        let k = 3;
        assert_eq!(rank(bits, n, k).unwrap(), 8);
        assert_eq!(unrank(8, n, k).unwrap(), bits);
    }

    #[rstest]
    #[case(1, 1)]
    #[case(8, 1)]
    #[case(8, 8)]
    #[case(21, 3)]
    #[case(64, 18)]
    #[case(64, 1)]
    fn exhaustive_round_trip_small(#[case] n: u8, #[case] k: u8) {
        // For small C(n,k) exhaustively check every subset of weight k
        // among the low n bits round-trips through rank/unrank.
        let count = binomial(n, k);
        if count > 20_000 {
            // too large to enumerate; spot-check edges instead
            assert_eq!(unrank(0, n, k).unwrap().count_ones(), k as u32);
            assert_eq!(unrank(count - 1, n, k).unwrap().count_ones(), k as u32);
            return;
        }
        let mut seen = std::collections::HashSet::new();
        for bits in 0u64..(1u64 << n) {
            if bits.count_ones() != k as u32 {
                continue;
            }
            let r = rank(bits, n, k).unwrap();
            assert!(seen.insert(r), "rank collision at {r}");
            assert_eq!(unrank(r, n, k).unwrap(), bits);
        }
    }

    #[test]
    fn zero_k_ranks_and_unranks_to_the_empty_chunk() {
        assert_eq!(rank(0, 4, 0).unwrap(), 0);
        assert_eq!(unrank(0, 4, 0).unwrap(), 0);
        assert!(unrank(1, 4, 0).is_err());
    }

    #[test]
    fn unrank_rejects_out_of_range_rank() {
        let count = binomial(6, 3);
        assert!(unrank(count, 6, 3).is_err());
    }

    #[test]
    fn sparse_three_id_chunk_rank_matches_worked_example() {
        // ids {10,20,30} with relative positions {0,10,20} within n_bits=21
        let bits = (1u64 << 0) | (1u64 << 10) | (1u64 << 20);
        let n = 21;
        let k = 3;
        let r = rank(bits, n, k).unwrap();
        assert_eq!(r, binomial(0, 1) + binomial(10, 2) + binomial(20, 3));
        assert_eq!(unrank(r, n, k).unwrap(), bits);
    }

    #[test]
    fn rank_bits_matches_binomial_width() {
        // C(6,3) = 20, ranks span [0, 19], which needs 5 bits (19 = 0b10011).
        assert_eq!(rank_bits(6, 3), 5);
    }
}
