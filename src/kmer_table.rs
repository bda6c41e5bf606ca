use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use readkmer::{words_for_len, Kmer, LargeKmer};
use std::io::{Read, Result, Write};

/// Adds two packed counters: totals in the low halves, plus-strand counts in
/// the high halves, both saturating at u32::MAX.
#[inline]
pub fn add_packed_counts(a: u64, b: u64) -> u64 {
    let total = (a & 0xFFFF_FFFF) + (b & 0xFFFF_FFFF);
    let plus = (a >> 32) + (b >> 32);
    (plus.min(u32::MAX as u64) << 32) | total.min(u32::MAX as u64)
}

fn find_kmer<const N: usize>(v: &[(LargeKmer<N>, u64)], kmer: &LargeKmer<N>) -> Option<usize> {
    match v.binary_search_by(|entry| entry.0.cmp(kmer)) {
        Ok(index) => Some(index),
        Err(_) => None,
    }
}

/// Sorts, aggregates runs of equal kmers and keeps entries whose total
/// count reaches `min_count`.
fn sort_extract_uniq<const N: usize>(v: &mut Vec<(LargeKmer<N>, u64)>, min_count: u32) -> Vec<(LargeKmer<N>, u64)> {
    v.sort_unstable();
    let mut uniq: Vec<(LargeKmer<N>, u64)> = Vec::new();
    for &(kmer, count) in v.iter() {
        match uniq.last_mut() {
            Some(last) if last.0 == kmer => last.1 = add_packed_counts(last.1, count),
            _ => {
                if let Some(last) = uniq.last() {
                    if (last.1 & 0xFFFF_FFFF) < min_count as u64 {
                        uniq.pop();
                    }
                }
                uniq.push((kmer, count));
            }
        }
    }
    if let Some(last) = uniq.last() {
        if (last.1 & 0xFFFF_FFFF) < min_count as u64 {
            uniq.pop();
        }
    }
    uniq
}

fn merge_sorted<const N: usize>(a: &mut Vec<(LargeKmer<N>, u64)>, b: Vec<(LargeKmer<N>, u64)>) {
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut ia = a.iter().peekable();
    let mut ib = b.iter().peekable();
    loop {
        match (ia.peek(), ib.peek()) {
            (Some(&&ea), Some(&&eb)) => {
                if ea <= eb {
                    merged.push(ea);
                    ia.next();
                } else {
                    merged.push(eb);
                    ib.next();
                }
            }
            (Some(&&ea), None) => {
                merged.push(ea);
                ia.next();
            }
            (None, Some(&&eb)) => {
                merged.push(eb);
                ib.next();
            }
            (None, None) => break,
        }
    }
    *a = merged;
}

#[derive(Debug)]
enum TableVec {
    W1(Vec<(LargeKmer<1>, u64)>),
    W2(Vec<(LargeKmer<2>, u64)>),
    W4(Vec<(LargeKmer<4>, u64)>),
    W8(Vec<(LargeKmer<8>, u64)>),
    W16(Vec<(LargeKmer<16>, u64)>),
}

macro_rules! each_vec {
    ($t:expr, $v:ident => $body:expr) => {
        match $t {
            TableVec::W1($v) => $body,
            TableVec::W2($v) => $body,
            TableVec::W4($v) => $body,
            TableVec::W8($v) => $body,
            TableVec::W16($v) => $body,
        }
    };
}

macro_rules! each_vec_pair {
    ($a:expr, $b:expr, $va:ident, $vb:ident => $body:expr) => {
        match ($a, $b) {
            (TableVec::W1($va), TableVec::W1($vb)) => $body,
            (TableVec::W2($va), TableVec::W2($vb)) => $body,
            (TableVec::W4($va), TableVec::W4($vb)) => $body,
            (TableVec::W8($va), TableVec::W8($vb)) => $body,
            (TableVec::W16($va), TableVec::W16($vb)) => $body,
            _ => panic!("kmer width mismatch between tables"),
        }
    };
}

macro_rules! map_vec {
    ($t:expr, $v:ident => $body:expr) => {
        match $t {
            TableVec::W1($v) => TableVec::W1($body),
            TableVec::W2($v) => TableVec::W2($body),
            TableVec::W4($v) => TableVec::W4($body),
            TableVec::W8($v) => TableVec::W8($body),
            TableVec::W16($v) => TableVec::W16($body),
        }
    };
}

macro_rules! vec_with_kmer {
    ($t:expr, $k:expr, $v:ident, $kk:ident => $body:expr) => {
        match ($t, $k) {
            (TableVec::W1($v), Kmer::W1($kk)) => $body,
            (TableVec::W2($v), Kmer::W2($kk)) => $body,
            (TableVec::W4($v), Kmer::W4($kk)) => $body,
            (TableVec::W8($v), Kmer::W8($kk)) => $body,
            (TableVec::W16($v), Kmer::W16($kk)) => $body,
            _ => panic!("kmer width does not match table width"),
        }
    };
}

impl TableVec {
    fn for_len(kmer_len: usize) -> TableVec {
        match words_for_len(kmer_len) {
            1 => TableVec::W1(Vec::new()),
            2 => TableVec::W2(Vec::new()),
            4 => TableVec::W4(Vec::new()),
            8 => TableVec::W8(Vec::new()),
            _ => TableVec::W16(Vec::new()),
        }
    }
}

/// Sorted table of (canonical kmer, packed counter) entries.
///
/// The width of the underlying entries is a tag picked at construction from
/// the kmer length. While sorted, binary search on the kmer retrieves the
/// 64-bit counter word: the low 32 bits hold the total count; during
/// counting the high 32 bits hold the plus-strand count, and once the graph
/// is built they hold the branch mask (bits 32..40) and the quantized
/// plus-strand fraction (bits 48..64).
#[derive(Debug)]
pub struct KmerCount {
    kmer_len: usize,
    table: TableVec,
}

impl KmerCount {
    pub fn new(kmer_len: usize) -> KmerCount {
        KmerCount {
            kmer_len,
            table: TableVec::for_len(kmer_len),
        }
    }

    pub fn kmer_len(&self) -> usize {
        self.kmer_len
    }

    pub fn size(&self) -> usize {
        each_vec!(&self.table, v => v.len())
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn capacity(&self) -> usize {
        each_vec!(&self.table, v => v.capacity())
    }

    pub fn reserve(&mut self, additional: usize) {
        each_vec!(&mut self.table, v => v.reserve(additional))
    }

    /// Size of one table entry in bytes.
    pub fn element_size(&self) -> usize {
        8 * (words_for_len(self.kmer_len) + 1)
    }

    /// Reserved memory in bytes.
    pub fn memory_footprint(&self) -> usize {
        self.capacity() * self.element_size()
    }

    pub fn push(&mut self, kmer: &Kmer, count: u64) {
        vec_with_kmer!(&mut self.table, kmer, v, k => v.push((*k, count)))
    }

    pub fn push_elements_from(&mut self, other: &KmerCount) {
        each_vec_pair!(&mut self.table, &other.table, a, b => a.extend_from_slice(b))
    }

    /// Index of a kmer in the sorted table.
    pub fn find(&self, kmer: &Kmer) -> Option<usize> {
        vec_with_kmer!(&self.table, kmer, v, k => find_kmer(v, k))
    }

    pub fn get_count(&self, index: usize) -> u64 {
        each_vec!(&self.table, v => v[index].1)
    }

    pub fn update_count(&mut self, index: usize, count: u64) {
        each_vec!(&mut self.table, v => v[index].1 = count)
    }

    pub fn get_kmer_count(&self, index: usize) -> (Kmer, u64) {
        match &self.table {
            TableVec::W1(v) => (Kmer::W1(v[index].0), v[index].1),
            TableVec::W2(v) => (Kmer::W2(v[index].0), v[index].1),
            TableVec::W4(v) => (Kmer::W4(v[index].0), v[index].1),
            TableVec::W8(v) => (Kmer::W8(v[index].0), v[index].1),
            TableVec::W16(v) => (Kmer::W16(v[index].0), v[index].1),
        }
    }

    pub fn sort(&mut self) {
        each_vec!(&mut self.table, v => v.sort_unstable())
    }

    /// Sorts, aggregates counts and moves entries with total count >=
    /// `min_count` into a fresh table; this table is drained.
    pub fn sort_and_extract_uniq(&mut self, min_count: u32) -> KmerCount {
        let kmer_len = self.kmer_len;
        let table = map_vec!(&mut self.table, v => {
            let uniq = sort_extract_uniq(v, min_count);
            *v = Vec::new();
            uniq
        });
        KmerCount { kmer_len, table }
    }

    /// Merges another sorted table into this one, consuming it.
    pub fn merge_two_sorted(&mut self, other: KmerCount) {
        each_vec_pair!(&mut self.table, other.table, a, b => merge_sorted(a, b))
    }

    /// Writes kmer length, entry count and the raw records, little-endian.
    pub fn save<W: Write>(&self, out: &mut W) -> Result<()> {
        out.write_i32::<LittleEndian>(self.kmer_len as i32)?;
        out.write_u64::<LittleEndian>(self.size() as u64)?;
        each_vec!(&self.table, v => {
            for (kmer, count) in v.iter() {
                for word in kmer.0.iter() {
                    out.write_u64::<LittleEndian>(*word)?;
                }
                out.write_u64::<LittleEndian>(*count)?;
            }
        });
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> Result<KmerCount> {
        let kmer_len = input.read_i32::<LittleEndian>()? as usize;
        let num = input.read_u64::<LittleEndian>()? as usize;
        let mut table = KmerCount::new(kmer_len);
        each_vec!(&mut table.table, v => {
            v.reserve(num);
            for _ in 0..num {
                let mut kmer = LargeKmer::default();
                read_words(input, &mut kmer)?;
                let count = input.read_u64::<LittleEndian>()?;
                v.push((kmer, count));
            }
        });
        Ok(table)
    }
}

fn read_words<R: Read, const N: usize>(input: &mut R, kmer: &mut LargeKmer<N>) -> Result<()> {
    for word in kmer.0.iter_mut() {
        *word = input.read_u64::<LittleEndian>()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kmer(seq: &str) -> Kmer {
        Kmer::from_seq(seq.as_bytes()).unwrap()
    }

    #[test]
    fn test_sort_and_extract_uniq() {
        let mut table = KmerCount::new(5);
        for seq in ["ACGTA", "AAAAA", "ACGTA", "CCCCC", "ACGTA", "AAAAA"] {
            table.push(&kmer(seq), 1);
        }
        let uniq = table.sort_and_extract_uniq(2);
        assert_eq!(uniq.size(), 2);
        let (first, count) = uniq.get_kmer_count(0);
        assert_eq!(first.to_string(5), "AAAAA");
        assert_eq!(count & 0xFFFF_FFFF, 2);
        let (second, count) = uniq.get_kmer_count(1);
        assert_eq!(second.to_string(5), "ACGTA");
        assert_eq!(count & 0xFFFF_FFFF, 3);
    }

    #[test]
    fn test_find() {
        let mut table = KmerCount::new(5);
        for seq in ["ACGTA", "AAAAA", "CCCCC"] {
            table.push(&kmer(seq), 1);
        }
        let table = table.sort_and_extract_uniq(1);
        assert!(table.find(&kmer("AAAAA")).is_some());
        assert!(table.find(&kmer("ACGTA")).is_some());
        assert!(table.find(&kmer("GGGGG")).is_none());
    }

    #[test]
    fn test_merge_two_sorted() {
        let mut a = KmerCount::new(4);
        a.push(&kmer("AAAA"), 1);
        a.push(&kmer("CCCC"), 1);
        a.sort();
        let mut b = KmerCount::new(4);
        b.push(&kmer("ACGT"), 1);
        b.push(&kmer("GGGG"), 1);
        b.sort();
        a.merge_two_sorted(b);
        assert_eq!(a.size(), 4);
        for i in 1..a.size() {
            assert!(a.get_kmer_count(i - 1).0 <= a.get_kmer_count(i).0);
        }
    }

    #[test]
    fn test_packed_count_saturation() {
        let near = u32::MAX as u64 - 1;
        let sum = add_packed_counts(near, 5);
        assert_eq!(sum & 0xFFFF_FFFF, u32::MAX as u64);
        let plus = add_packed_counts(near << 32, 5 << 32);
        assert_eq!(plus >> 32, u32::MAX as u64);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut table = KmerCount::new(7);
        for seq in ["ACGTACG", "AAAAAAA", "CCCCCCC"] {
            table.push(&kmer(seq), 3);
        }
        let table = table.sort_and_extract_uniq(1);
        let mut buf = Vec::new();
        table.save(&mut buf).unwrap();
        let loaded = KmerCount::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.kmer_len(), 7);
        assert_eq!(loaded.size(), table.size());
        for i in 0..table.size() {
            assert_eq!(loaded.get_kmer_count(i), table.get_kmer_count(i));
        }
    }
}
