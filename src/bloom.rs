use std::sync::atomic::{AtomicU64, Ordering};

// block size in bits
const BLOCK_SIZE: usize = 1024;
const BITS_IN_CELL: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    NewKmer,
    AboveThresholdKmer,
    ExistingKmer,
}

/// Lock-free blocked counting Bloom filter.
///
/// The table is a vector of 1024-bit blocks, each holding fixed-width
/// saturating counters. Two hash values drive all probes inside a single
/// block so one filter access touches one cache region. Used as a
/// pre-filter that lets only kmers seen at least `min_count` times into the
/// downstream hash table.
pub struct BlockedBloomFilter {
    count_table: Vec<AtomicU64>,
    table_size: usize,
    counter_bit_size: usize,
    hash_num: usize,
    blocks: usize,
    elements_in_block: usize,
    max_element: u64,
    min_count: u64,
}

impl BlockedBloomFilter {
    /// table_size - number of counters
    /// counter_bit_size - bits per counter (2, 4 or 8)
    /// hash_num - number of hash functions (generated from two)
    pub fn new(table_size: usize, counter_bit_size: usize, hash_num: usize, min_count: u64) -> Self {
        let mut filter = BlockedBloomFilter {
            count_table: Vec::new(),
            table_size: 0,
            counter_bit_size: 2,
            hash_num: 1,
            blocks: 0,
            elements_in_block: 0,
            max_element: 0,
            min_count: 0,
        };
        filter.reset(table_size, counter_bit_size, hash_num, min_count);
        filter
    }

    pub fn reset(&mut self, table_size: usize, counter_bit_size: usize, hash_num: usize, min_count: u64) {
        self.counter_bit_size = counter_bit_size;
        self.hash_num = hash_num;
        self.max_element = (1u64 << counter_bit_size) - 1;
        self.min_count = min_count.min(self.max_element);
        self.elements_in_block = BLOCK_SIZE / counter_bit_size;
        self.blocks = (table_size + self.elements_in_block - 1) / self.elements_in_block;
        self.blocks = self.blocks.max(1);
        self.table_size = self.blocks * self.elements_in_block;
        let table_length = self.table_size * counter_bit_size / BITS_IN_CELL;
        self.count_table = (0..table_length).map(|_| AtomicU64::new(0)).collect();
    }

    /// Increments the counters for a kmer; saturates at the counter maximum.
    pub fn insert(&self, hashp: u64, hashm: u64, min_count: u64) -> InsertResult {
        let mc = self.test(hashp, hashm);
        if mc >= min_count {
            return InsertResult::ExistingKmer;
        }

        let blk_pos = hashp as usize % self.blocks * BLOCK_SIZE;
        let mut hashp = hashp;
        let mut count = u64::MAX;
        for _ in 1..self.hash_num {
            hashp = hashp.wrapping_add(hashm);
            let pos = blk_pos + (hashp as usize & (self.elements_in_block - 1)) * self.counter_bit_size;
            let cell = &self.count_table[pos / BITS_IN_CELL];
            let shift = pos % BITS_IN_CELL;
            let mask = self.max_element << shift;
            let one = 1u64 << shift;
            let mut existing = cell.load(Ordering::Relaxed);
            if (existing & mask) >> shift > mc {
                continue;
            }
            count = count.min((existing & mask) >> shift);
            // saturating CAS increment
            while existing & mask < mask {
                match cell.compare_exchange_weak(existing, existing + one, Ordering::AcqRel, Ordering::Acquire) {
                    Ok(_) => break,
                    Err(current) => existing = current,
                }
            }
        }
        if count == 0 {
            InsertResult::NewKmer
        } else if count == self.min_count - 1 {
            InsertResult::AboveThresholdKmer
        } else {
            InsertResult::ExistingKmer
        }
    }

    /// Minimum of the probed counters for a kmer.
    pub fn test(&self, hashp: u64, hashm: u64) -> u64 {
        let blk_pos = hashp as usize % self.blocks * BLOCK_SIZE;
        let mut hashp = hashp;
        let mut count = u64::MAX;
        for _ in 1..self.hash_num {
            hashp = hashp.wrapping_add(hashm);
            let pos = blk_pos + (hashp as usize & (self.elements_in_block - 1)) * self.counter_bit_size;
            let cell = &self.count_table[pos / BITS_IN_CELL];
            let shift = pos % BITS_IN_CELL;
            let mask = self.max_element << shift;
            count = count.min((cell.load(Ordering::Acquire) & mask) >> shift);
        }
        count
    }

    pub fn max_element(&self) -> u64 {
        self.max_element
    }

    pub fn hash_num(&self) -> usize {
        self.hash_num
    }

    /// Number of counters.
    pub fn table_size(&self) -> usize {
        self.table_size
    }

    /// Bytes held by the table.
    pub fn table_footprint(&self) -> usize {
        8 * self.count_table.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_threshold_sequence() {
        let filter = BlockedBloomFilter::new(1 << 16, 2, 6, 2);
        let (hp, hm) = (0x1234_5678_9abc_def0u64, 0x0fed_cba9_8765_4321u64);
        assert_eq!(filter.insert(hp, hm, 2), InsertResult::NewKmer);
        assert_eq!(filter.insert(hp, hm, 2), InsertResult::AboveThresholdKmer);
        assert_eq!(filter.insert(hp, hm, 2), InsertResult::ExistingKmer);
        assert!(filter.test(hp, hm) >= 2);
    }

    #[test]
    fn test_counter_saturation() {
        let filter = BlockedBloomFilter::new(1 << 12, 2, 4, 3);
        let (hp, hm) = (42u64, 99u64);
        for _ in 0..100 {
            filter.insert(hp, hm, 3);
        }
        // 2-bit counters stop at 3
        assert_eq!(filter.test(hp, hm), 3);
    }

    #[test]
    fn test_unseen_is_zero() {
        let filter = BlockedBloomFilter::new(1 << 16, 4, 6, 2);
        assert_eq!(filter.test(0xdead_beef, 0xbeef_dead), 0);
    }

    #[test]
    fn test_concurrent_inserts() {
        let filter = BlockedBloomFilter::new(1 << 16, 8, 6, 100);
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        filter.insert(7777, 3333, 100);
                    }
                });
            }
        });
        // counters ahead of the running minimum may skip an increment under
        // contention, the observed count stays within the insert total
        let count = filter.test(7777, 3333);
        assert!(count >= 100 && count <= 200, "count {}", count);
    }
}
