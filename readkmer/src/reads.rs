use crate::codec::{base_code, CODE_BASES};
use crate::kmer::Kmer;

/// Copies a bit range between 2-bit packed word buffers.
/// The destination must be sized and zero-filled over the target range;
/// `dst_size` is the number of destination words in use after the copy.
pub fn copy_bits(src: &[u64], bit_from: usize, bit_to: usize, dst: &mut [u64], dst_bit_from: usize, dst_size: usize) {
    if bit_to <= bit_from {
        return;
    }

    let mut word = bit_from / 64;
    let last_word = (bit_to - 1) / 64;
    let shift = bit_from % 64;
    let mut dst_word = dst_bit_from / 64;
    let mut dst_shift = dst_bit_from % 64;
    if shift > 0 {
        // first source word partial
        let chunk = src[word] >> shift;
        word += 1;
        if dst_shift > 0 {
            dst[dst_word] |= chunk << dst_shift;
            if shift <= dst_shift {
                dst_word += 1;
            }
            if shift < dst_shift && dst_word < dst_size {
                dst[dst_word] |= chunk >> (64 - dst_shift);
            }
        } else {
            dst[dst_word] |= chunk;
        }
        dst_shift = (dst_shift + 64 - shift) % 64;
    }
    while word <= last_word {
        if dst_shift > 0 {
            dst[dst_word] |= src[word] << dst_shift;
            if dst_word + 1 < dst_size {
                dst[dst_word + 1] |= src[word] >> (64 - dst_shift);
            }
        } else {
            dst[dst_word] |= src[word];
        }
        word += 1;
        dst_word += 1;
    }
    let partial_bits = (dst_bit_from + bit_to - bit_from) % 64;
    if partial_bits > 0 {
        let mask = (1u64 << partial_bits) - 1;
        dst[dst_size - 1] &= mask;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairType {
    Single,
    FirstMate,
    SecondMate,
}

/// Compact DNA sequence store using the 2-bit alphabet.
///
/// Reads are appended into one growing bit buffer in reverse base order so
/// that kmer iteration moves forward in memory; per-read lengths are kept in
/// a parallel vector. Sequences and kmers are accessed through the
/// iterator types below, which never expose the bit buffer.
#[derive(Debug, Clone, Default)]
pub struct ReadHolder {
    storage: Vec<u64>,
    read_length: Vec<u32>,
    total_seq: usize,
    contains_paired: bool,
}

impl ReadHolder {
    pub fn new(contains_paired: bool) -> Self {
        ReadHolder {
            storage: Vec::new(),
            read_length: Vec::new(),
            total_seq: 0,
            contains_paired,
        }
    }

    /// Appends one read. The caller guarantees the read is ACGT only.
    pub fn push(&mut self, read: &[u8]) {
        let mut shift = (self.total_seq * 2) % 64;
        for &c in read.iter().rev() {
            // backward for kmer compatibility
            if shift == 0 {
                self.storage.push(0);
            }
            let code = base_code(c).unwrap_or(0) as u64;
            let last = self.storage.len() - 1;
            self.storage[last] |= code << shift;
            shift = (shift + 2) % 64;
        }
        self.read_length.push(read.len() as u32);
        self.total_seq += read.len();
    }

    /// Appends two mates; subsequent even/odd reads are a pair.
    pub fn push_pair(&mut self, first: &[u8], second: &[u8]) {
        self.push(first);
        self.push(second);
    }

    /// Appends a read from another holder without re-encoding.
    pub fn push_from(&mut self, read: &ReadRef<'_>) {
        let read_len = read.len();
        self.read_length.push(read_len as u32);
        let dst_first_bit = 2 * self.total_seq;
        self.total_seq += read_len;
        self.storage.resize((2 * self.total_seq + 63) / 64, 0);
        let dst_size = self.storage.len();
        copy_bits(
            &read.holder.storage,
            read.position,
            read.position + 2 * read_len,
            &mut self.storage,
            dst_first_bit,
            dst_size,
        );
    }

    pub fn clear(&mut self) {
        *self = ReadHolder::new(self.contains_paired);
    }

    pub fn contains_paired(&self) -> bool {
        self.contains_paired
    }

    /// Total nucleotide count.
    pub fn total_seq(&self) -> usize {
        self.total_seq
    }

    /// Number of stored sequences.
    pub fn read_num(&self) -> usize {
        self.read_length.len()
    }

    pub fn max_length(&self) -> usize {
        self.read_length.iter().map(|&l| l as usize).max().unwrap_or(0)
    }

    /// How many kmers of the given length the stored reads can produce.
    pub fn kmer_num(&self, kmer_len: usize) -> usize {
        self.read_length
            .iter()
            .filter(|&&l| l as usize >= kmer_len)
            .map(|&l| l as usize - kmer_len + 1)
            .sum()
    }

    /// Conservative byte estimate of the held memory.
    pub fn memory_footprint(&self) -> usize {
        8 * self.storage.capacity() + 4 * self.read_length.capacity()
    }

    /// Shortest sequence length at xx (0..1] of the total length.
    pub fn nxx(&self, xx: f64) -> usize {
        let mut lengths: Vec<u32> = self.read_length.clone();
        lengths.sort_unstable();
        let mut nxx = 0;
        let mut len = 0.0;
        for &l in lengths.iter().rev() {
            if len >= xx * self.total_seq as f64 {
                break;
            }
            nxx = l as usize;
            len += l as f64;
        }
        nxx
    }

    pub fn n50(&self) -> usize {
        self.nxx(0.5)
    }

    pub fn reads(&self) -> Reads<'_> {
        Reads {
            holder: self,
            read: 0,
            position: 0,
        }
    }

    pub fn read_at(&self, index: usize) -> ReadRef<'_> {
        let position = 2 * self.read_length[..index].iter().map(|&l| l as usize).sum::<usize>();
        ReadRef {
            holder: self,
            read: index,
            position,
        }
    }

    /// Iterator over every kmer of every read; reads in insertion order,
    /// kmers inside a read from last to first.
    pub fn kmers(&self, kmer_len: usize) -> KmerIter<'_> {
        let mut it = KmerIter {
            holder: self,
            kmer_len,
            read: 0,
            position: 0,
            position_in_read: 0,
        };
        it.skip_short_reads();
        it
    }

    fn kmer_at(&self, bit_pos: usize, kmer_len: usize) -> Kmer {
        let mut kmer = Kmer::with_len(kmer_len);
        let words = kmer.words_mut();
        let used = (2 * kmer_len + 63) / 64;
        copy_bits(&self.storage, bit_pos, bit_pos + 2 * kmer_len, words, 0, used);
        kmer
    }
}

pub struct Reads<'a> {
    holder: &'a ReadHolder,
    read: usize,
    position: usize,
}

impl<'a> Iterator for Reads<'a> {
    type Item = ReadRef<'a>;

    fn next(&mut self) -> Option<ReadRef<'a>> {
        if self.read >= self.holder.read_length.len() {
            return None;
        }
        let item = ReadRef {
            holder: self.holder,
            read: self.read,
            position: self.position,
        };
        self.position += 2 * self.holder.read_length[self.read] as usize;
        self.read += 1;
        Some(item)
    }
}

/// A view of one stored read.
#[derive(Clone, Copy)]
pub struct ReadRef<'a> {
    holder: &'a ReadHolder,
    read: usize,
    position: usize, // bit offset of the read in the holder
}

impl<'a> ReadRef<'a> {
    pub fn len(&self) -> usize {
        self.holder.read_length[self.read] as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self) -> usize {
        self.read
    }

    /// Decodes the read back to ASCII. Storage is base-reversed, so the
    /// first base lives at the highest bit offset.
    pub fn seq(&self) -> Vec<u8> {
        let len = self.len();
        (0..len)
            .rev()
            .map(|i| {
                let p = self.position + 2 * i;
                CODE_BASES[((self.holder.storage[p / 64] >> (p % 64)) & 3) as usize]
            })
            .collect()
    }

    pub fn pair_type(&self) -> PairType {
        if !self.holder.contains_paired {
            PairType::Single
        } else if self.read % 2 == 1 {
            PairType::SecondMate
        } else {
            PairType::FirstMate
        }
    }

    /// Mate of this read; meaningful only for paired holders.
    pub fn mate(&self) -> ReadRef<'a> {
        if self.read % 2 == 1 {
            ReadRef {
                holder: self.holder,
                read: self.read - 1,
                position: self.position - 2 * self.holder.read_length[self.read - 1] as usize,
            }
        } else {
            ReadRef {
                holder: self.holder,
                read: self.read + 1,
                position: self.position + 2 * self.holder.read_length[self.read] as usize,
            }
        }
    }

    /// Kmers of this read (last to first), continuing into later reads;
    /// callers bound the iteration by the read length.
    pub fn kmers(&self, kmer_len: usize) -> KmerIter<'a> {
        if kmer_len <= self.len() {
            KmerIter {
                holder: self.holder,
                kmer_len,
                read: self.read,
                position: self.position,
                position_in_read: 0,
            }
        } else {
            KmerIter {
                holder: self.holder,
                kmer_len,
                read: self.holder.read_length.len(),
                position: 2 * self.holder.total_seq,
                position_in_read: 0,
            }
        }
    }
}

pub struct KmerIter<'a> {
    holder: &'a ReadHolder,
    kmer_len: usize,
    read: usize,
    position: usize, // bit offset in the concatenated storage
    position_in_read: usize,
}

impl<'a> KmerIter<'a> {
    fn skip_short_reads(&mut self) {
        while self.position < 2 * self.holder.total_seq
            && self.read < self.holder.read_length.len()
            && (self.holder.read_length[self.read] as usize) < self.kmer_len
        {
            self.position += 2 * self.holder.read_length[self.read] as usize;
            self.read += 1;
        }
    }
}

impl<'a> Iterator for KmerIter<'a> {
    type Item = Kmer;

    fn next(&mut self) -> Option<Kmer> {
        if self.position >= 2 * self.holder.total_seq || self.read >= self.holder.read_length.len() {
            return None;
        }
        let kmer = self.holder.kmer_at(self.position, self.kmer_len);

        if self.position == 2 * (self.holder.total_seq - self.kmer_len) {
            self.position = 2 * self.holder.total_seq;
        } else {
            self.position += 2;
            self.position_in_read += 1;
            if self.position_in_read == self.holder.read_length[self.read] as usize - self.kmer_len + 1 {
                self.position += 2 * (self.kmer_len - 1);
                self.read += 1;
                self.position_in_read = 0;
                self.skip_short_reads();
            }
        }
        Some(kmer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_and_decode() {
        let mut rh = ReadHolder::new(false);
        rh.push(b"ACGTACGT");
        rh.push(b"TTTTGGGG");
        assert_eq!(rh.read_num(), 2);
        assert_eq!(rh.total_seq(), 16);
        let seqs: Vec<Vec<u8>> = rh.reads().map(|r| r.seq()).collect();
        assert_eq!(seqs, vec![b"ACGTACGT".to_vec(), b"TTTTGGGG".to_vec()]);
    }

    #[test]
    fn test_long_read_across_words() {
        let seq: Vec<u8> = b"ACGT".iter().cycle().take(150).cloned().collect();
        let mut rh = ReadHolder::new(false);
        rh.push(&seq);
        assert_eq!(rh.reads().next().unwrap().seq(), seq);
    }

    #[test]
    fn test_kmer_iteration_order() {
        // kmers come out last to first within a read
        let mut rh = ReadHolder::new(false);
        rh.push(b"ACGTC");
        let kmers: Vec<String> = rh.kmers(3).map(|k| k.to_string(3)).collect();
        assert_eq!(kmers, vec!["GTC", "CGT", "ACG"]);
    }

    #[test]
    fn test_kmer_iteration_skips_short_reads() {
        let mut rh = ReadHolder::new(false);
        rh.push(b"AC");
        rh.push(b"ACGT");
        rh.push(b"GG");
        rh.push(b"TTTT");
        let kmers: Vec<String> = rh.kmers(4).map(|k| k.to_string(4)).collect();
        assert_eq!(kmers, vec!["ACGT", "TTTT"]);
        assert_eq!(rh.kmer_num(4), 2);
    }

    #[test]
    fn test_kmer_num_matches_iterator() {
        let mut rh = ReadHolder::new(false);
        rh.push(b"ACGTACGTACGT");
        rh.push(b"GATTACA");
        for k in [3, 5, 7, 12] {
            assert_eq!(rh.kmers(k).count(), rh.kmer_num(k));
        }
    }

    #[test]
    fn test_mate_lookup() {
        let mut rh = ReadHolder::new(true);
        rh.push_pair(b"AAAA", b"CCCC");
        rh.push_pair(b"GGGG", b"TTTT");
        let reads: Vec<ReadRef> = rh.reads().collect();
        assert_eq!(reads[0].mate().seq(), b"CCCC");
        assert_eq!(reads[1].mate().seq(), b"AAAA");
        assert_eq!(reads[3].mate().seq(), b"GGGG");
        assert_eq!(reads[0].pair_type(), PairType::FirstMate);
        assert_eq!(reads[3].pair_type(), PairType::SecondMate);
    }

    #[test]
    fn test_push_from() {
        let mut a = ReadHolder::new(false);
        a.push(b"ACGTACGTA");
        a.push(b"GGGTTTCCA");
        let mut b = ReadHolder::new(false);
        for r in a.reads() {
            b.push_from(&r);
        }
        let seqs: Vec<Vec<u8>> = b.reads().map(|r| r.seq()).collect();
        assert_eq!(seqs, vec![b"ACGTACGTA".to_vec(), b"GGGTTTCCA".to_vec()]);
    }

    #[test]
    fn test_nxx() {
        let mut rh = ReadHolder::new(false);
        rh.push(&vec![b'A'; 100]);
        rh.push(&vec![b'C'; 50]);
        rh.push(&vec![b'G'; 10]);
        assert_eq!(rh.n50(), 100);
        assert_eq!(rh.nxx(0.9), 50);
        assert_eq!(rh.max_length(), 100);
    }

    #[test]
    fn test_kmers_for_read() {
        let mut rh = ReadHolder::new(false);
        rh.push(b"ACGTA");
        rh.push(b"GGTTC");
        let second = rh.read_at(1);
        let kmers: Vec<String> = second.kmers(4).take(2).map(|k| k.to_string(4)).collect();
        assert_eq!(kmers, vec!["GTTC", "GGTT"]);
    }
}
