use crate::bloom::BlockedBloomFilter;
use crate::kmer_table::KmerCount;
use crate::ReadPack;
use hyperloglogplus::{HyperLogLog, HyperLogLogPlus};
use log::{info, warn};
use readkmer::{run_jobs, words_for_len, Job, Kmer, LargeKmer};
use seahash::SeaHasher;
use std::cell::UnsafeCell;
use std::hash::BuildHasher;
use std::io::{Error, ErrorKind, Result};
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, AtomicU8, AtomicUsize, Ordering};

#[derive(Default, Clone)]
pub struct SeaBuildHasher;

impl BuildHasher for SeaBuildHasher {
    type Hasher = SeaHasher;
    fn build_hasher(&self) -> SeaHasher {
        SeaHasher::default()
    }
}

/// Width-erased access to the fixed-width kmer representations, so the hash
/// table can be generic over the word category.
pub trait KmerWidth: Copy + Ord + Eq + Default + Send + Sync + 'static {
    fn wrap(self) -> Kmer;
    fn extract(kmer: &Kmer) -> Self;
    fn hash64(&self) -> u64;
    fn reverse_complement(self, len: usize) -> Self;
}

macro_rules! impl_kmer_width {
    ($n:literal, $variant:ident) => {
        impl KmerWidth for LargeKmer<$n> {
            fn wrap(self) -> Kmer {
                Kmer::$variant(self)
            }
            fn extract(kmer: &Kmer) -> Self {
                match kmer {
                    Kmer::$variant(v) => *v,
                    _ => panic!("kmer width mismatch"),
                }
            }
            fn hash64(&self) -> u64 {
                self.hash()
            }
            fn reverse_complement(self, len: usize) -> Self {
                LargeKmer::reverse_complement(self, len)
            }
        }
    };
}

impl_kmer_width!(1, W1);
impl_kmer_width!(2, W2);
impl_kmer_width!(4, W4);
impl_kmer_width!(8, W8);
impl_kmer_width!(16, W16);

pub struct ListNode<T> {
    pub data: T,
    pub next: *mut ListNode<T>,
}

/// Minimalistic multithread-safe forward list: CAS prepend at the head, no
/// deletion under contention. A reader walking from a head snapshot will
/// not see entries inserted after the walk started.
pub struct ForwardList<T> {
    head: AtomicPtr<ListNode<T>>,
}

unsafe impl<T: Send> Send for ForwardList<T> {}
unsafe impl<T: Send + Sync> Sync for ForwardList<T> {}

impl<T> ForwardList<T> {
    pub fn new() -> Self {
        ForwardList {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    pub fn head(&self) -> *mut ListNode<T> {
        self.head.load(Ordering::Acquire)
    }

    /// One CAS attempt to make `node` the new head; on failure the node's
    /// next pointer is updated to the observed head.
    pub fn try_push_front(&self, node: *mut ListNode<T>) -> bool {
        let expected = unsafe { (*node).next };
        match self
            .head
            .compare_exchange(expected, node, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => true,
            Err(current) => {
                unsafe { (*node).next = current };
                false
            }
        }
    }

    pub fn iter(&self) -> ForwardListIter<'_, T> {
        ForwardListIter {
            node: self.head(),
            _list: self,
        }
    }
}

impl<T> Default for ForwardList<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Drop for ForwardList<T> {
    fn drop(&mut self) {
        let mut p = self.head.load(Ordering::Relaxed);
        while !p.is_null() {
            let next = unsafe { (*p).next };
            drop(unsafe { Box::from_raw(p) });
            p = next;
        }
    }
}

pub struct ForwardListIter<'a, T> {
    node: *mut ListNode<T>,
    _list: &'a ForwardList<T>,
}

impl<'a, T> Iterator for ForwardListIter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.node.is_null() {
            None
        } else {
            let data = unsafe { &(*self.node).data };
            self.node = unsafe { (*self.node).next };
            Some(data)
        }
    }
}

// inline cells per bucket; larger values reduce spillover at the cost of
// longer scans
const BUCKET_BLOCK: usize = 8;

const ASSIGNED: u8 = 1;
const KEY_EXISTS: u8 = 2;

struct KmerCell<K> {
    kmer: UnsafeCell<K>,
    count: AtomicU64,
}

struct ListCell<K> {
    kmer: K,
    count: AtomicU64,
}

/// One hash bucket: an inline array of cells guarded by per-cell status
/// bytes ({empty, reserved, key-written}) plus a lock-free spillover list.
struct HashBucket<K> {
    status: [AtomicU8; BUCKET_BLOCK],
    cells: [KmerCell<K>; BUCKET_BLOCK],
    extra: ForwardList<ListCell<K>>,
}

// the status protocol serializes key writes; counts are atomic
unsafe impl<K: Send + Sync> Sync for HashBucket<K> {}

impl<K: KmerWidth> Default for HashBucket<K> {
    fn default() -> Self {
        HashBucket {
            status: std::array::from_fn(|_| AtomicU8::new(0)),
            cells: std::array::from_fn(|_| KmerCell {
                kmer: UnsafeCell::new(K::default()),
                count: AtomicU64::new(0),
            }),
            extra: ForwardList::new(),
        }
    }
}

impl<K: KmerWidth> HashBucket<K> {
    /// Reserves a cell for a kmer: CAS empty -> reserved, write the key,
    /// then publish it. False if the cell was already reserved.
    fn lock(&self, shift: usize, kmer: &K) -> bool {
        if self.status[shift]
            .compare_exchange(0, ASSIGNED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            unsafe { *self.cells[shift].kmer.get() = *kmer };
            self.status[shift].fetch_or(KEY_EXISTS, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Spins until the reserved cell's key is written.
    fn wait(&self, shift: usize) {
        while self.status[shift].load(Ordering::Acquire) & KEY_EXISTS == 0 {
            std::hint::spin_loop();
        }
    }

    fn is_empty(&self, shift: usize) -> bool {
        self.status[shift].load(Ordering::Acquire) == 0
    }

    fn key(&self, shift: usize) -> K {
        unsafe { *self.cells[shift].kmer.get() }
    }
}

/// Open-addressed concurrent hash map from kmers to packed counters.
///
/// Insertion probes the exact slot for the hash, then the rest of the
/// bucket's inline array, then the spillover list. No locks; readers spin
/// only on a reserved-but-unwritten status byte. The table never moves
/// entries; growth happens by building a bigger table and re-inserting.
pub struct KmerHashTable<K> {
    buckets: Vec<HashBucket<K>>,
    table_size: usize,
    kmer_len: usize,
}

impl<K: KmerWidth> KmerHashTable<K> {
    pub fn new(kmer_len: usize, size: usize) -> Self {
        let mut blocks = size / BUCKET_BLOCK;
        if size % BUCKET_BLOCK != 0 {
            blocks += 1;
        }
        let blocks = blocks.max(1);
        let mut buckets = Vec::new();
        buckets.resize_with(blocks, HashBucket::default);
        KmerHashTable {
            buckets,
            table_size: blocks * BUCKET_BLOCK,
            kmer_len,
        }
    }

    pub fn kmer_len(&self) -> usize {
        self.kmer_len
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn buckets_num(&self) -> usize {
        self.buckets.len()
    }

    pub fn table_footprint(&self) -> usize {
        self.buckets.capacity() * std::mem::size_of::<HashBucket<K>>()
    }

    fn try_cell<'a>(bucket: &'a HashBucket<K>, shift: usize, kmer: &K) -> Option<&'a AtomicU64> {
        if bucket.lock(shift, kmer) {
            return Some(&bucket.cells[shift].count);
        }
        // already assigned to some kmer; wait until its key is stored
        bucket.wait(shift);
        if bucket.key(shift) == *kmer {
            Some(&bucket.cells[shift].count)
        } else {
            None
        }
    }

    /// Counter cell for the kmer, inserting a fresh entry if absent.
    pub fn find_or_insert(&self, kmer: &K, index: usize) -> &AtomicU64 {
        let bucket = &self.buckets[index / BUCKET_BLOCK];

        // exact position first
        let exact_pos = index % BUCKET_BLOCK;
        if let Some(cell) = Self::try_cell(bucket, exact_pos, kmer) {
            return cell;
        }
        // scan the remaining inline cells
        for shift in 0..BUCKET_BLOCK {
            if shift != exact_pos {
                if let Some(cell) = Self::try_cell(bucket, shift, kmer) {
                    return cell;
                }
            }
        }

        // scan the spillover list
        let mut existing_head = bucket.extra.head();
        unsafe {
            let mut p = existing_head;
            while !p.is_null() {
                if (*p).data.kmer == *kmer {
                    return &(*p).data.count;
                }
                p = (*p).next;
            }
        }

        let node = Box::into_raw(Box::new(ListNode {
            data: ListCell {
                kmer: *kmer,
                count: AtomicU64::new(0),
            },
            next: existing_head,
        }));
        loop {
            if bucket.extra.try_push_front(node) {
                return unsafe { &(*node).data.count };
            }
            // head moved; check whether a racing insert added our kmer
            unsafe {
                let mut p = (*node).next;
                while p != existing_head {
                    if (*p).data.kmer == *kmer {
                        drop(Box::from_raw(node));
                        return &(*p).data.count;
                    }
                    p = (*p).next;
                }
                existing_head = (*node).next;
            }
        }
    }

    /// Adds one observation; true if the kmer was new.
    pub fn update_count(&self, kmer: &K, hashp: u64, is_plus: bool) -> bool {
        let index = (hashp % self.table_size as u64) as usize;
        let cell = self.find_or_insert(kmer, index);
        let delta: u64 = if is_plus { 0x1_0000_0001 } else { 1 };
        let new = cell.fetch_add(delta, Ordering::AcqRel).wrapping_add(delta);
        new & 0xFFFF_FFFF == 1
    }

    /// Packed counter for a kmer, None if absent.
    pub fn find(&self, kmer: &K) -> Option<u64> {
        let index = (kmer.hash64() % self.table_size as u64) as usize;
        let bucket = &self.buckets[index / BUCKET_BLOCK];
        let exact_pos = index % BUCKET_BLOCK;
        if bucket.is_empty(exact_pos) {
            return None;
        }
        if bucket.key(exact_pos) == *kmer {
            return Some(bucket.cells[exact_pos].count.load(Ordering::Acquire));
        }
        for shift in 0..BUCKET_BLOCK {
            if shift != exact_pos {
                if bucket.is_empty(shift) {
                    return None;
                }
                if bucket.key(shift) == *kmer {
                    return Some(bucket.cells[shift].count.load(Ordering::Acquire));
                }
            }
        }
        bucket
            .extra
            .iter()
            .find(|cell| cell.kmer == *kmer)
            .map(|cell| cell.count.load(Ordering::Acquire))
    }

    /// Re-inserts a bucket range from a smaller table.
    pub fn rehash_buckets_from(&self, other: &KmerHashTable<K>, bucket_from: usize, bucket_to: usize) {
        for index in bucket_from..=bucket_to {
            let bucket = &other.buckets[index];
            for shift in 0..BUCKET_BLOCK {
                if bucket.is_empty(shift) {
                    continue;
                }
                let count = bucket.cells[shift].count.load(Ordering::Acquire);
                if count != 0 {
                    let kmer = bucket.key(shift);
                    let target = (kmer.hash64() % self.table_size as u64) as usize;
                    self.find_or_insert(&kmer, target).store(count, Ordering::Release);
                }
            }
            for cell in bucket.extra.iter() {
                let target = (cell.kmer.hash64() % self.table_size as u64) as usize;
                self.find_or_insert(&cell.kmer, target)
                    .store(cell.count.load(Ordering::Acquire), Ordering::Release);
            }
        }
    }

    /// Drains a bucket range, dropping entries below `min_count` (the sweep
    /// that removes Bloom false positives).
    fn drain_range(&self, bucket_from: usize, bucket_to: usize, min_count: u64) -> Vec<(K, u64)> {
        let mut out = Vec::new();
        for index in bucket_from..=bucket_to {
            let bucket = &self.buckets[index];
            for shift in 0..BUCKET_BLOCK {
                if bucket.is_empty(shift) {
                    continue;
                }
                let count = bucket.cells[shift].count.load(Ordering::Acquire);
                if count & 0xFFFF_FFFF >= min_count {
                    out.push((bucket.key(shift), count));
                }
            }
            for cell in bucket.extra.iter() {
                let count = cell.count.load(Ordering::Acquire);
                if count & 0xFFFF_FFFF >= min_count {
                    out.push((cell.kmer, count));
                }
            }
        }
        out
    }
}

struct CountingState {
    kmer_num_raw: AtomicUsize,
    kmer_count: AtomicUsize,
    rehash: AtomicBool,
    kmer_step: AtomicUsize,
}

const MAX_LOAD_FACTOR: usize = 1;
const INCREASE_FACTOR: usize = 2;

fn insert_in_bloom_job<K: KmerWidth>(
    pack: &ReadPack,
    kmer_len: usize,
    bloom: &BlockedBloomFilter,
    min_count: u64,
    above_threshold: &AtomicUsize,
    uniq: &AtomicUsize,
) {
    use crate::bloom::InsertResult;
    let mut above = 0usize;
    let mut new = 0usize;
    for holder in pack.iter() {
        for kmer in holder.kmers(kmer_len) {
            let k = K::extract(&kmer);
            let rk = k.reverse_complement(kmer_len);
            let (hashp, hashm) = if k < rk {
                (k.hash64(), rk.hash64())
            } else {
                (rk.hash64(), k.hash64())
            };
            match bloom.insert(hashp, hashm, min_count) {
                InsertResult::NewKmer => new += 1,
                InsertResult::AboveThresholdKmer => above += 1,
                InsertResult::ExistingKmer => {}
            }
        }
    }
    above_threshold.fetch_add(above, Ordering::Relaxed);
    uniq.fetch_add(new, Ordering::Relaxed);
}

fn count_kmers_job<K: KmerWidth>(
    pack: &ReadPack,
    cursor: &mut (usize, usize),
    table: &KmerHashTable<K>,
    bloom: Option<&BlockedBloomFilter>,
    state: &CountingState,
    kmer_len: usize,
    min_count: u64,
) {
    let (start_phase, start_read) = *cursor;
    let mut kmer_num = 0usize;
    let mut kmer_count = 0usize;
    let kmer_step = state.kmer_step.load(Ordering::Relaxed);
    for phase in start_phase..2 {
        let holder = &pack[phase];
        let from = if phase == start_phase { start_read } else { 0 };
        let mut reads = holder.reads();
        for _ in 0..from {
            reads.next();
        }
        for read in reads {
            let read_len = read.len();
            if read_len < kmer_len {
                continue;
            }
            kmer_count += read_len - kmer_len + 1;

            for kmer in read.kmers(kmer_len).take(read_len - kmer_len + 1) {
                let k = K::extract(&kmer);
                let rk = k.reverse_complement(kmer_len);
                let (min_kmer, is_plus, hashp, hashm) = if k < rk {
                    (k, true, k.hash64(), rk.hash64())
                } else {
                    (rk, false, rk.hash64(), k.hash64())
                };
                if let Some(bloom) = bloom {
                    if bloom.test(hashp, hashm) < min_count.min(bloom.max_element()) {
                        continue;
                    }
                }
                if table.update_count(&min_kmer, hashp, is_plus) {
                    kmer_num += 1;
                }
            }

            if kmer_num >= kmer_step {
                let raw = state.kmer_num_raw.fetch_add(kmer_num, Ordering::AcqRel) + kmer_num;
                state.kmer_count.fetch_add(kmer_count, Ordering::Relaxed);
                kmer_num = 0;
                kmer_count = 0;
                if raw > table.table_size() * MAX_LOAD_FACTOR {
                    state.rehash.store(true, Ordering::Release);
                }
                if state.rehash.load(Ordering::Acquire) {
                    *cursor = (phase, read.index() + 1);
                    return;
                }
            }
        }
    }
    state.kmer_num_raw.fetch_add(kmer_num, Ordering::AcqRel);
    state.kmer_count.fetch_add(kmer_count, Ordering::Relaxed);
    *cursor = (2, 0);
}

fn estimate_distinct_kmers<K: KmerWidth>(reads: &[ReadPack], kmer_len: usize, ncores: usize) -> Result<usize> {
    let active: Vec<&ReadPack> = reads
        .iter()
        .filter(|pack| pack[0].read_num() > 0 || pack[1].read_num() > 0)
        .collect();
    let mut sketches: Vec<Option<HyperLogLogPlus<u64, SeaBuildHasher>>> = Vec::new();
    sketches.resize_with(active.len(), || None);

    let mut jobs: Vec<Job> = Vec::new();
    for (pack, slot) in active.iter().zip(sketches.iter_mut()) {
        let pack: &ReadPack = pack;
        jobs.push(Box::new(move || {
            let mut sketch = match HyperLogLogPlus::new(16, SeaBuildHasher) {
                Ok(sketch) => sketch,
                Err(_) => return,
            };
            for holder in pack.iter() {
                for kmer in holder.kmers(kmer_len) {
                    let k = K::extract(&kmer);
                    let rk = k.reverse_complement(kmer_len);
                    let hash = if k < rk { k.hash64() } else { rk.hash64() };
                    sketch.insert(&hash);
                }
            }
            *slot = Some(sketch);
        }));
    }
    run_jobs(ncores, jobs);

    let mut merged: Option<HyperLogLogPlus<u64, SeaBuildHasher>> = None;
    for sketch in sketches.into_iter().flatten() {
        match merged.as_mut() {
            None => merged = Some(sketch),
            Some(main) => main
                .merge(&sketch)
                .map_err(|e| Error::new(ErrorKind::Other, format!("sketch merge failed: {:?}", e)))?,
        }
    }
    Ok(merged.map(|mut sketch| sketch.count().round() as usize).unwrap_or(0))
}

/// One-pass counting through the Bloom pre-filter and the concurrent hash;
/// produces the same sorted table as the bucketed counter.
pub fn hash_count(reads: &[ReadPack], kmer_len: usize, min_count: u32, ncores: usize) -> Result<KmerCount> {
    match words_for_len(kmer_len) {
        1 => hash_count_impl::<LargeKmer<1>>(reads, kmer_len, min_count, ncores, None),
        2 => hash_count_impl::<LargeKmer<2>>(reads, kmer_len, min_count, ncores, None),
        4 => hash_count_impl::<LargeKmer<4>>(reads, kmer_len, min_count, ncores, None),
        8 => hash_count_impl::<LargeKmer<8>>(reads, kmer_len, min_count, ncores, None),
        _ => hash_count_impl::<LargeKmer<16>>(reads, kmer_len, min_count, ncores, None),
    }
}

fn hash_count_impl<K: KmerWidth>(
    reads: &[ReadPack],
    kmer_len: usize,
    min_count: u32,
    ncores: usize,
    forced_estimate: Option<usize>,
) -> Result<KmerCount> {
    let min_count = min_count.max(1) as u64;
    let mut estimated_uniq = match forced_estimate {
        Some(estimate) => estimate,
        None => estimate_distinct_kmers::<K>(reads, kmer_len, ncores)?,
    };

    let active: Vec<&ReadPack> = reads
        .iter()
        .filter(|pack| pack[0].read_num() > 0 || pack[1].read_num() > 0)
        .collect();

    let mut bloom: Option<BlockedBloomFilter> = None;
    let estimated_table_size;
    if min_count > 1 {
        loop {
            let mut counter_bit_size = 2usize;
            while counter_bit_size <= 8 && ((1u64 << counter_bit_size) - 1) < min_count {
                counter_bit_size *= 2;
            }
            let false_positive_rate: f64 = 0.03;
            let bloom_table_size =
                (-(estimated_uniq.max(1) as f64) * false_positive_rate.ln() / 2f64.ln() / 2f64.ln()) as usize;
            let hash_num = (-false_positive_rate.ln() / 2f64.ln()).ceil() as usize;
            let filter = BlockedBloomFilter::new(bloom_table_size, counter_bit_size, hash_num, min_count);
            info!(
                "Bloom table size: {} ({:.1}MB) Counter bit size: {} Hash num: {}",
                filter.table_size(),
                filter.table_footprint() as f64 / 1e6,
                counter_bit_size,
                hash_num
            );

            let above_threshold = AtomicUsize::new(0);
            let uniq = AtomicUsize::new(0);
            let mut jobs: Vec<Job> = Vec::new();
            for pack in &active {
                let pack: &ReadPack = pack;
                let filter = &filter;
                let above_threshold = &above_threshold;
                let uniq = &uniq;
                jobs.push(Box::new(move || {
                    insert_in_bloom_job::<K>(pack, kmer_len, filter, min_count, above_threshold, uniq)
                }));
            }
            run_jobs(ncores, jobs);

            let kmers = uniq.load(Ordering::Relaxed) as f64;
            let achieved = (1.0 - (-(hash_num as f64) * kmers / filter.table_size() as f64).exp())
                .powi(hash_num as i32);
            info!(
                "Estimated kmers above threshold: {} Estimated uniq kmers: {} Bloom false positive rate {:.4}",
                above_threshold.load(Ordering::Relaxed),
                uniq.load(Ordering::Relaxed),
                achieved
            );
            if achieved < 0.15 {
                estimated_table_size = above_threshold.load(Ordering::Relaxed);
                bloom = Some(filter);
                break;
            }
            warn!("Bloom filter false positive rate is too high - increasing the filter size and recalculating");
            estimated_uniq = uniq.load(Ordering::Relaxed);
        }
    } else {
        estimated_table_size = estimated_uniq;
    }

    let mut table = KmerHashTable::<K>::new(kmer_len, (1.5 * estimated_table_size.max(1) as f64) as usize);
    let state = CountingState {
        kmer_num_raw: AtomicUsize::new(0),
        kmer_count: AtomicUsize::new(0),
        rehash: AtomicBool::new(false),
        kmer_step: AtomicUsize::new((table.table_size() / 10 / ncores.max(1)).max(1)),
    };
    let mut cursors: Vec<(usize, usize)> = vec![(0, 0); active.len()];

    loop {
        {
            let table = &table;
            let state = &state;
            let bloom = bloom.as_ref();
            let mut jobs: Vec<Job> = Vec::new();
            for (pack, cursor) in active.iter().zip(cursors.iter_mut()) {
                if cursor.0 >= 2 {
                    continue;
                }
                let pack: &ReadPack = pack;
                jobs.push(Box::new(move || {
                    count_kmers_job::<K>(pack, cursor, table, bloom, state, kmer_len, min_count)
                }));
            }
            run_jobs(ncores, jobs);
        }

        if !state.rehash.load(Ordering::Acquire) {
            break;
        }

        let new_size = table.table_size() * INCREASE_FACTOR;
        info!("Rehash new size: {}", new_size);
        let old = std::mem::replace(&mut table, KmerHashTable::new(kmer_len, new_size));
        state
            .kmer_step
            .store((table.table_size() / 10 / ncores.max(1)).max(1), Ordering::Relaxed);
        state.rehash.store(false, Ordering::Release);

        let step = (old.buckets_num() + ncores - 1) / ncores.max(1);
        let table_ref = &table;
        let old_ref = &old;
        let mut jobs: Vec<Job> = Vec::new();
        for thread in 0..ncores.max(1) {
            let from = step * thread;
            if from >= old_ref.buckets_num() {
                continue;
            }
            let to = (from + step - 1).min(old_ref.buckets_num() - 1);
            jobs.push(Box::new(move || table_ref.rehash_buckets_from(old_ref, from, to)));
        }
        run_jobs(ncores, jobs);
    }

    // drop below-threshold entries while draining into the sorted table
    let step = (table.buckets_num() + ncores - 1) / ncores.max(1);
    let mut ranges: Vec<Vec<(K, u64)>> = Vec::new();
    {
        let table_ref = &table;
        let mut jobs: Vec<Job> = Vec::new();
        let mut slots: Vec<&mut Vec<(K, u64)>> = Vec::new();
        ranges.resize_with(ncores.max(1), Vec::new);
        for slot in ranges.iter_mut() {
            slots.push(slot);
        }
        for (thread, slot) in slots.into_iter().enumerate() {
            let from = step * thread;
            if from >= table_ref.buckets_num() {
                continue;
            }
            let to = (from + step - 1).min(table_ref.buckets_num() - 1);
            jobs.push(Box::new(move || {
                *slot = table_ref.drain_range(from, to, min_count);
            }));
        }
        run_jobs(ncores, jobs);
    }

    let mut out = KmerCount::new(kmer_len);
    let total: usize = ranges.iter().map(|r| r.len()).sum();
    out.reserve(total);
    for range in ranges {
        for (kmer, count) in range {
            out.push(&kmer.wrap(), count);
        }
    }
    out.sort();
    info!(
        "Kmers above threshold: {} Raw kmers: {} Hash table size: {}",
        total,
        state.kmer_num_raw.load(Ordering::Relaxed),
        table.table_size()
    );
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::KmerCounter;
    use readkmer::ReadHolder;

    fn pack(reads: &[&str]) -> Vec<ReadPack> {
        let mut unpaired = ReadHolder::new(false);
        for r in reads {
            unpaired.push(r.as_bytes());
        }
        vec![[ReadHolder::new(true), unpaired]]
    }

    fn reads_for_test() -> Vec<String> {
        let mut reads = Vec::new();
        let genome = "ACGGTCATTCAGACTTGACCGTTGACCATGGTACCAGT";
        for start in 0..genome.len() - 15 {
            reads.push(genome[start..start + 15].to_string());
            reads.push(genome[start..start + 15].to_string());
        }
        reads
    }

    fn assert_tables_equal(a: &KmerCount, b: &KmerCount) {
        assert_eq!(a.size(), b.size());
        for i in 0..a.size() {
            assert_eq!(a.get_kmer_count(i), b.get_kmer_count(i));
        }
    }

    #[test]
    fn test_matches_bucketed_counter() {
        let reads = reads_for_test();
        let refs: Vec<&str> = reads.iter().map(|s| s.as_str()).collect();
        let packs = pack(&refs);
        for min_count in [1u32, 2] {
            let reference = KmerCounter::new(&packs, 9, min_count, true, 16_000_000_000, 3).unwrap();
            let hashed = hash_count(&packs, 9, min_count, 3).unwrap();
            assert_tables_equal(reference.kmers(), &hashed);
        }
    }

    #[test]
    fn test_rehash_path() {
        let reads = reads_for_test();
        let refs: Vec<&str> = reads.iter().map(|s| s.as_str()).collect();
        let packs = pack(&refs);
        let reference = KmerCounter::new(&packs, 9, 1, true, 16_000_000_000, 2).unwrap();
        // force an undersized table so counting has to rehash
        let hashed = hash_count_impl::<LargeKmer<1>>(&packs, 9, 1, 2, Some(2)).unwrap();
        assert_tables_equal(reference.kmers(), &hashed);
    }

    #[test]
    fn test_find_or_insert_concurrent_single_winner() {
        let table = KmerHashTable::<LargeKmer<1>>::new(11, 64);
        let kmer = match Kmer::from_seq(b"ACGTACGTACG").unwrap() {
            Kmer::W1(v) => v,
            _ => unreachable!(),
        };
        let news = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if table.update_count(&kmer, kmer.hash64(), true) {
                        news.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(news.load(Ordering::Relaxed), 1);
        let count = table.find(&kmer).unwrap();
        assert_eq!(count & 0xFFFF_FFFF, 8);
        assert_eq!(count >> 32, 8);
    }

    #[test]
    fn test_spillover_list() {
        // one bucket: every insert beyond the inline cells spills to the list
        let table = KmerHashTable::<LargeKmer<1>>::new(15, 8);
        let genome = "ACGGTCATTCAGACTTGACCGTTGACCATGGTACCAGTACCA";
        let mut kmers = Vec::new();
        for start in 0..=genome.len() - 15 {
            let kmer = match Kmer::from_seq(&genome.as_bytes()[start..start + 15]).unwrap() {
                Kmer::W1(v) => v,
                _ => unreachable!(),
            };
            kmers.push(kmer);
        }
        for k in &kmers {
            table.update_count(k, k.hash64(), true);
        }
        for k in &kmers {
            assert!(table.find(k).is_some());
        }
    }
}
