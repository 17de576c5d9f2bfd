//! Structure fingerprints and Tanimoto similarity.
//!
//! The split machinery only needs two things from chemistry: a fixed-size
//! bit vector per structure and a pairwise similarity. `Fingerprinter` is
//! that seam; `SmilesFingerprinter` is the built-in provider.

use std::hash::BuildHasher;

use ahash::RandomState;
use rayon::prelude::*;
use smallvec::SmallVec;

use crate::error::SplitError;

/// Fixed-size binary fingerprint packed into `u64` words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    words: Vec<u64>,
    ones: u32,
}

impl Fingerprint {
    pub fn zero(n_bits: usize) -> Self {
        Self {
            words: vec![0u64; n_bits.div_ceil(64)],
            ones: 0,
        }
    }

    #[inline]
    pub fn n_bits(&self) -> usize {
        self.words.len() * 64
    }

    #[inline]
    pub fn popcount(&self) -> u32 {
        self.ones
    }

    pub fn set(&mut self, bit: usize) {
        let (w, b) = (bit / 64, bit % 64);
        let mask = 1u64 << b;
        if self.words[w] & mask == 0 {
            self.words[w] |= mask;
            self.ones += 1;
        }
    }

    #[inline]
    pub fn get(&self, bit: usize) -> bool {
        self.words[bit / 64] & (1u64 << (bit % 64)) != 0
    }

    /// |a ∧ b| / |a ∨ b|; two empty fingerprints score 0.
    #[inline]
    pub fn tanimoto(&self, other: &Self) -> f64 {
        let intersect: u32 = self
            .words
            .iter()
            .zip(other.words.iter())
            .map(|(a, b)| (a & b).count_ones())
            .sum();
        let union = self.ones + other.ones - intersect;
        if union == 0 {
            0.0
        } else {
            intersect as f64 / union as f64
        }
    }

    /// Highest similarity against a pool; `None` for an empty pool.
    pub fn max_similarity<'a, I>(&self, pool: I) -> Option<f64>
    where
        I: IntoIterator<Item = &'a Fingerprint>,
    {
        pool.into_iter()
            .map(|fp| self.tanimoto(fp))
            .fold(None, |best, s| Some(best.map_or(s, |b: f64| b.max(s))))
    }
}

pub trait Fingerprinter: Send + Sync {
    fn name(&self) -> String;

    fn fingerprint(&self, structure: &str) -> Result<Fingerprint, SplitError>;

    /// Fingerprints for a whole column, index-stable.
    fn fingerprint_all(&self, structures: &[&str]) -> Result<Vec<Fingerprint>, SplitError> {
        structures
            .par_iter()
            .map(|s| self.fingerprint(s))
            .collect()
    }
}

/// Hashed token n-gram fingerprint over SMILES strings.
///
/// Tokens are bracket atoms, two-letter halogens, `%nn` ring closures and
/// single characters. Every run of up to `radius + 1` consecutive tokens is
/// hashed into one of `n_bits` positions.
#[derive(Debug, Clone)]
pub struct SmilesFingerprinter {
    radius: usize,
    n_bits: usize,
    hasher: RandomState,
}

impl SmilesFingerprinter {
    pub fn new(radius: usize, n_bits: usize) -> Self {
        Self {
            radius,
            n_bits: n_bits.max(64),
            hasher: RandomState::with_seeds(
                0x243f_6a88_85a3_08d3,
                0x1319_8a2e_0370_7344,
                0xa409_3822_299f_31d0,
                0x082e_fa98_ec4e_6c89,
            ),
        }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    pub fn n_bits(&self) -> usize {
        self.n_bits
    }
}

impl Default for SmilesFingerprinter {
    fn default() -> Self {
        Self::new(3, 2048)
    }
}

impl Fingerprinter for SmilesFingerprinter {
    fn name(&self) -> String {
        format!("SmilesFingerprinter(radius={}, n_bits={})", self.radius, self.n_bits)
    }

    fn fingerprint(&self, structure: &str) -> Result<Fingerprint, SplitError> {
        let tokens = tokenize(structure);
        if tokens.is_empty() {
            return Err(SplitError::InvalidStructure(structure.to_string()));
        }
        let mut fp = Fingerprint::zero(self.n_bits);
        for width in 1..=(self.radius + 1) {
            for gram in tokens.windows(width) {
                let h = self.hasher.hash_one(gram);
                fp.set((h % self.n_bits as u64) as usize);
            }
        }
        Ok(fp)
    }
}

fn tokenize(smiles: &str) -> SmallVec<[&str; 64]> {
    let mut out = SmallVec::new();
    let bytes = smiles.trim().as_bytes();
    let s = smiles.trim();
    let mut i = 0usize;
    while i < bytes.len() {
        let c = bytes[i];
        let len = match c {
            b'[' => match bytes[i..].iter().position(|&b| b == b']') {
                Some(end) => end + 1,
                None => bytes.len() - i,
            },
            b'C' if bytes.get(i + 1) == Some(&b'l') => 2,
            b'B' if bytes.get(i + 1) == Some(&b'r') => 2,
            b'%' if bytes.get(i + 1..i + 3).is_some_and(|d| d.iter().all(u8::is_ascii_digit)) => 3,
            _ if c.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            // multi-byte characters are kept whole
            _ if !c.is_ascii() => s[i..].chars().next().map_or(1, char::len_utf8),
            _ => 1,
        };
        out.push(&s[i..i + len]);
        i += len;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_keeps_bracket_atoms_and_halogens() {
        let toks = tokenize("C[NH3+]c1ccc(Cl)cc1Br");
        assert_eq!(
            toks.as_slice(),
            &["C", "[NH3+]", "c", "1", "c", "c", "c", "(", "Cl", ")", "c", "c", "1", "Br"]
        );
    }

    #[test]
    fn identical_structures_have_similarity_one() {
        let fpr = SmilesFingerprinter::default();
        let a = fpr.fingerprint("CCOc1ccccc1").unwrap();
        let b = fpr.fingerprint("CCOc1ccccc1").unwrap();
        assert_eq!(a.tanimoto(&b), 1.0);
        assert!(a.popcount() > 0);
    }

    #[test]
    fn related_structures_are_closer_than_unrelated() {
        let fpr = SmilesFingerprinter::default();
        let base = fpr.fingerprint("CCCCCCCCO").unwrap();
        let near = fpr.fingerprint("CCCCCCCCN").unwrap();
        let far = fpr.fingerprint("c1ccc2ccccc2c1").unwrap();
        assert!(base.tanimoto(&near) > base.tanimoto(&far));
    }

    #[test]
    fn empty_structure_is_rejected() {
        let fpr = SmilesFingerprinter::default();
        assert!(matches!(
            fpr.fingerprint("   "),
            Err(SplitError::InvalidStructure(_))
        ));
    }

    #[test]
    fn empty_fingerprints_score_zero() {
        let a = Fingerprint::zero(128);
        assert_eq!(a.tanimoto(&a.clone()), 0.0);
        assert_eq!(a.max_similarity(std::iter::empty()), None);
    }

    #[test]
    fn set_is_idempotent() {
        let mut fp = Fingerprint::zero(64);
        fp.set(5);
        fp.set(5);
        assert!(fp.get(5));
        assert_eq!(fp.popcount(), 1);
    }
}
