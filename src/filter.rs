//! Add-only bloom filter over account fingerprints.
//!
//! Bits live in `AtomicU64` words and are only ever set with `fetch_or`, so
//! `add` and `might_contain` are safe to call concurrently without a lock
//! and a lookup never misses a completed `add`.

use crate::utils::Fingerprint;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

const MAX_HASHES: u32 = 32;

pub struct AddressFilter {
    words: Box<[AtomicU64]>,
    num_bits: u64,
    num_hashes: u32,
    inserted: AtomicUsize,
}

impl AddressFilter {
    /// Sizes the filter for `expected_items` at the target false-positive
    /// rate: `m = -n ln p / ln² 2`, `k = (m / n) ln 2`.
    pub fn new(expected_items: usize, fp_rate: f64) -> Self {
        let n = expected_items.max(1) as f64;
        let p = fp_rate.clamp(1e-12, 0.5);
        let ln2 = std::f64::consts::LN_2;
        let m = (-(n * p.ln()) / (ln2 * ln2)).ceil().max(64.0) as u64;
        let k = ((m as f64 / n) * ln2).round().clamp(1.0, MAX_HASHES as f64);
        let words = m.div_ceil(64) as usize;
        Self {
            words: (0..words).map(|_| AtomicU64::new(0)).collect(),
            num_bits: words as u64 * 64,
            num_hashes: k as u32,
            inserted: AtomicUsize::new(0),
        }
    }

    pub fn num_bits(&self) -> u64 {
        self.num_bits
    }

    pub fn num_hashes(&self) -> u32 {
        self.num_hashes
    }

    /// Number of `add` calls, counting repeats.
    pub fn inserted(&self) -> usize {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn add(&self, fingerprint: &Fingerprint) {
        for bit in self.positions(fingerprint) {
            let (word, mask) = (bit / 64, 1u64 << (bit % 64));
            self.words[word as usize].fetch_or(mask, Ordering::AcqRel);
        }
        self.inserted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn might_contain(&self, fingerprint: &Fingerprint) -> bool {
        self.positions(fingerprint).all(|bit| {
            let (word, mask) = (bit / 64, 1u64 << (bit % 64));
            self.words[word as usize].load(Ordering::Acquire) & mask != 0
        })
    }

    pub fn extend<'a>(
        &self,
        items: impl IntoIterator<Item = &'a Fingerprint>,
    ) {
        for fp in items {
            self.add(fp);
        }
    }

    // Kirsch-Mitzenmacher: k indices from two halves of one digest.
    // Account ids are not uniform, so they are hashed first.
    fn positions(
        &self,
        fingerprint: &Fingerprint,
    ) -> impl Iterator<Item = u64> {
        let digest = Sha256::digest(fingerprint.as_bytes());
        let word = |i: usize| {
            let mut w = [0u8; 8];
            w.copy_from_slice(&digest[i..i + 8]);
            u64::from_be_bytes(w)
        };
        let h1 = word(0);
        let h2 = word(8) | 1;
        let m = self.num_bits;
        (0..self.num_hashes as u64)
            .map(move |i| h1.wrapping_add(i.wrapping_mul(h2)) % m)
    }
}
