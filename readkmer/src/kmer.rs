use crate::codec::{base_code, CODE_BASES};
use std::cmp::Ordering;
use std::fmt;

/// Maximal kmer length representable by the widest word category.
pub const MAX_KMER: usize = 512;

/// Fixed-width kmer value packed 2 bits per base into N little-endian words.
/// Word 0 is the least significant; the last base of the sequence occupies
/// the low 2 bits, so comparison as a big integer equals lexicographic
/// comparison of the sequence under A=0, C=1, G=2, T=3.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct LargeKmer<const N: usize>(pub [u64; N]);

impl<const N: usize> Default for LargeKmer<N> {
    fn default() -> Self {
        LargeKmer([0u64; N])
    }
}

impl<const N: usize> PartialOrd for LargeKmer<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const N: usize> Ord for LargeKmer<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        for i in (0..N).rev() {
            match self.0[i].cmp(&other.0[i]) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

/// Reverses the 2-bit groups of a word while leaving each group intact.
#[inline]
fn reverse_word_pairs(mut w: u64) -> u64 {
    w = (w >> 2 & 0x3333333333333333) | (w << 2 & 0xCCCCCCCCCCCCCCCC);
    w = (w >> 4 & 0x0F0F0F0F0F0F0F0F) | (w << 4 & 0xF0F0F0F0F0F0F0F0);
    w = (w >> 8 & 0x00FF00FF00FF00FF) | (w << 8 & 0xFF00FF00FF00FF00);
    w = (w >> 16 & 0x0000FFFF0000FFFF) | (w << 16 & 0xFFFF0000FFFF0000);
    (w >> 32) | (w << 32)
}

impl<const N: usize> LargeKmer<N> {
    pub fn zero() -> Self {
        Self::default()
    }

    /// Builds a kmer from 2-bit base codes, first base most significant.
    pub fn from_codes(codes: &[u8]) -> Self {
        let mut kmer = Self::zero();
        for &code in codes {
            kmer.push_code(code);
        }
        kmer
    }

    /// Shifts the whole value left by one base and ors in `code`.
    #[inline]
    pub fn push_code(&mut self, code: u8) {
        for i in (1..N).rev() {
            self.0[i] = (self.0[i] << 2) | (self.0[i - 1] >> 62);
        }
        self.0[0] = (self.0[0] << 2) | code as u64;
    }

    /// Clears every bit above 2*len.
    #[inline]
    pub fn masked(mut self, len: usize) -> Self {
        let bits = 2 * len;
        for i in 0..N {
            let lo = 64 * i;
            if bits <= lo {
                self.0[i] = 0;
            } else if bits < lo + 64 {
                self.0[i] &= (1u64 << (bits - lo)) - 1;
            }
        }
        self
    }

    /// Drops the high base, appends `code` on the right.
    #[inline]
    pub fn extend_right(mut self, code: u8, len: usize) -> Self {
        self.push_code(code);
        self.masked(len)
    }

    #[inline]
    fn shifted_right(self, s: usize) -> Self {
        let words = s / 64;
        let bits = s % 64;
        let mut out = [0u64; N];
        for i in 0..N {
            let src = i + words;
            if src < N {
                out[i] = self.0[src] >> bits;
                if bits > 0 && src + 1 < N {
                    out[i] |= self.0[src + 1] << (64 - bits);
                }
            }
        }
        LargeKmer(out)
    }

    /// Base-wise complement plus bit reversal over `len` bases.
    pub fn reverse_complement(self, len: usize) -> Self {
        let mut rev = [0u64; N];
        for i in 0..N {
            rev[N - 1 - i] = reverse_word_pairs(!self.0[i]);
        }
        LargeKmer(rev).shifted_right(64 * N - 2 * len)
    }

    #[inline]
    pub fn canonical(self, len: usize) -> Self {
        let rc = self.reverse_complement(len);
        if self < rc {
            self
        } else {
            rc
        }
    }

    /// Avalanche hash over the word bytes; equal values hash equal.
    #[inline]
    pub fn hash(&self) -> u64 {
        seahash::hash(bytemuck::cast_slice(&self.0[..]))
    }

    /// 2-bit code of base `i` counted from the left end of a length-len kmer.
    #[inline]
    pub fn code_at(&self, i: usize, len: usize) -> u8 {
        let bit = 2 * (len - 1 - i);
        ((self.0[bit / 64] >> (bit % 64)) & 3) as u8
    }

    pub fn to_seq(&self, len: usize) -> Vec<u8> {
        (0..len)
            .map(|i| CODE_BASES[self.code_at(i, len) as usize])
            .collect()
    }
}

/// Runtime-width kmer: a tagged union over the word categories supported by
/// the fixed-width representation. The category is picked once at
/// construction from the kmer length; hot paths dispatch on the tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Kmer {
    W1(LargeKmer<1>),
    W2(LargeKmer<2>),
    W4(LargeKmer<4>),
    W8(LargeKmer<8>),
    W16(LargeKmer<16>),
}

/// Word category for a kmer length; lengths above `MAX_KMER` are rejected
/// at configuration time.
pub fn words_for_len(kmer_len: usize) -> usize {
    match (kmer_len + 31) / 32 {
        0 | 1 => 1,
        2 => 2,
        3 | 4 => 4,
        5..=8 => 8,
        _ => 16,
    }
}

macro_rules! each_kmer {
    ($kmer:expr, $inner:ident => $body:expr) => {
        match $kmer {
            Kmer::W1($inner) => $body,
            Kmer::W2($inner) => $body,
            Kmer::W4($inner) => $body,
            Kmer::W8($inner) => $body,
            Kmer::W16($inner) => $body,
        }
    };
}

macro_rules! map_kmer {
    ($kmer:expr, $inner:ident => $body:expr) => {
        match $kmer {
            Kmer::W1($inner) => Kmer::W1($body),
            Kmer::W2($inner) => Kmer::W2($body),
            Kmer::W4($inner) => Kmer::W4($body),
            Kmer::W8($inner) => Kmer::W8($body),
            Kmer::W16($inner) => Kmer::W16($body),
        }
    };
}

impl Kmer {
    /// Zero-valued kmer of the width category for `kmer_len`.
    pub fn with_len(kmer_len: usize) -> Kmer {
        match words_for_len(kmer_len) {
            1 => Kmer::W1(LargeKmer::zero()),
            2 => Kmer::W2(LargeKmer::zero()),
            4 => Kmer::W4(LargeKmer::zero()),
            8 => Kmer::W8(LargeKmer::zero()),
            _ => Kmer::W16(LargeKmer::zero()),
        }
    }

    /// Builds a kmer from an ASCII sequence; None if any base is not ACGT.
    pub fn from_seq(seq: &[u8]) -> Option<Kmer> {
        let mut kmer = Kmer::with_len(seq.len());
        for &c in seq {
            kmer.push_code(base_code(c)?);
        }
        Some(kmer)
    }

    /// Kmer whose every base is T; all used bit positions set.
    pub fn filled(kmer_len: usize) -> Kmer {
        let mut kmer = Kmer::with_len(kmer_len);
        for _ in 0..kmer_len {
            kmer.push_code(3);
        }
        kmer
    }

    #[inline]
    pub fn push_code(&mut self, code: u8) {
        each_kmer!(self, v => v.push_code(code))
    }

    #[inline]
    pub fn reverse_complement(&self, len: usize) -> Kmer {
        map_kmer!(self, v => v.reverse_complement(len))
    }

    #[inline]
    pub fn canonical(&self, len: usize) -> Kmer {
        map_kmer!(self, v => v.canonical(len))
    }

    #[inline]
    pub fn extend_right(&self, code: u8, len: usize) -> Kmer {
        map_kmer!(self, v => v.extend_right(code, len))
    }

    #[inline]
    pub fn hash(&self) -> u64 {
        each_kmer!(self, v => v.hash())
    }

    #[inline]
    pub fn code_at(&self, i: usize, len: usize) -> u8 {
        each_kmer!(self, v => v.code_at(i, len))
    }

    pub fn to_seq(&self, len: usize) -> Vec<u8> {
        each_kmer!(self, v => v.to_seq(len))
    }

    pub fn to_string(&self, len: usize) -> String {
        String::from_utf8(self.to_seq(len)).unwrap_or_default()
    }

    pub fn words(&self) -> &[u64] {
        each_kmer!(self, v => &v.0[..])
    }

    pub fn words_mut(&mut self) -> &mut [u64] {
        each_kmer!(self, v => &mut v.0[..])
    }

    fn width(&self) -> usize {
        self.words().len()
    }
}

impl PartialOrd for Kmer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Kmer {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Kmer::W1(a), Kmer::W1(b)) => a.cmp(b),
            (Kmer::W2(a), Kmer::W2(b)) => a.cmp(b),
            (Kmer::W4(a), Kmer::W4(b)) => a.cmp(b),
            (Kmer::W8(a), Kmer::W8(b)) => a.cmp(b),
            (Kmer::W16(a), Kmer::W16(b)) => a.cmp(b),
            _ => self.width().cmp(&other.width()),
        }
    }
}

impl fmt::Display for Kmer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x?}", self.words())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_round_trip() {
        for seq in ["ACGT", "AAAAA", "GATTACA", "TTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTTACG"] {
            let k = seq.len();
            let kmer = Kmer::from_seq(seq.as_bytes()).unwrap();
            assert_eq!(kmer.to_string(k), seq);
        }
        assert_eq!(Kmer::from_seq(b"ACGN"), None);
    }

    #[test]
    fn test_reverse_complement_involution() {
        for seq in ["ACGT", "AACCGGTT", "GATTACAGATTACAGATTACAGATTACAGATTACAG"] {
            let k = seq.len();
            let kmer = Kmer::from_seq(seq.as_bytes()).unwrap();
            let rc = kmer.reverse_complement(k);
            assert_eq!(rc.reverse_complement(k), kmer);
        }
    }

    #[test]
    fn test_reverse_complement_value() {
        let kmer = Kmer::from_seq(b"AACGT").unwrap();
        assert_eq!(kmer.reverse_complement(5).to_string(5), "ACGTT");
    }

    #[test]
    fn test_canonical_idempotent() {
        for seq in ["ACGTC", "TTTTT", "GATTACAGATTACAGATTACAGATTACAGATTACAG"] {
            let k = seq.len();
            let kmer = Kmer::from_seq(seq.as_bytes()).unwrap();
            let canon = kmer.canonical(k);
            assert_eq!(canon.canonical(k), canon);
            assert_eq!(kmer.reverse_complement(k).canonical(k), canon);
        }
    }

    #[test]
    fn test_lex_order() {
        let a = Kmer::from_seq(b"AACGT").unwrap();
        let c = Kmer::from_seq(b"CAAAA").unwrap();
        let t = Kmer::from_seq(b"TAAAA").unwrap();
        assert!(a < c && c < t);
    }

    #[test]
    fn test_extend_right() {
        let kmer = Kmer::from_seq(b"ACGTC").unwrap();
        let next = kmer.extend_right(3, 5);
        assert_eq!(next.to_string(5), "CGTCT");
    }

    #[test]
    fn test_hash_consistency() {
        let a = Kmer::from_seq(b"ACGTACGTACGT").unwrap();
        let b = Kmer::from_seq(b"ACGTACGTACGT").unwrap();
        assert_eq!(a.hash(), b.hash());
        let c = Kmer::from_seq(b"ACGTACGTACGA").unwrap();
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn test_width_categories() {
        assert_eq!(words_for_len(21), 1);
        assert_eq!(words_for_len(32), 1);
        assert_eq!(words_for_len(33), 2);
        assert_eq!(words_for_len(127), 4);
        assert_eq!(words_for_len(129), 8);
        assert_eq!(words_for_len(512), 16);
    }

    #[test]
    fn test_wide_kmer_round_trip() {
        let seq: String = std::iter::repeat("ACGGT").take(20).collect();
        let k = seq.len();
        let kmer = Kmer::from_seq(seq.as_bytes()).unwrap();
        assert_eq!(kmer.to_string(k), seq);
        assert_eq!(kmer.reverse_complement(k).reverse_complement(k), kmer);
    }
}
