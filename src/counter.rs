use crate::graph::{histogram_range, Bins};
use crate::kmer_table::KmerCount;
use crate::ReadPack;
use log::{info, warn};
use rayon::prelude::*;
use readkmer::{run_jobs, Job};
use std::collections::BTreeMap;
use std::io::{Error, ErrorKind, Result};

const GB: i64 = 1_000_000_000;
const MAX_CYCLES: i64 = 10;
// memory buffer for allocation uncertainty
const MEMORY_MARGIN: i64 = 2 * GB;

/// Multi-threaded canonical kmer counter.
///
/// Workers shard kmers into hash buckets, each bucket is sorted and
/// aggregated independently, and the per-bucket results are merged into one
/// sorted table. When the estimated table would not fit in the memory
/// budget the bucket range is split over several cycles; more than
/// `MAX_CYCLES` cycles is a hard failure.
#[derive(Debug)]
pub struct KmerCounter {
    kmer_len: usize,
    min_count: u32,
    is_stranded: bool,
    uniq_kmers: KmerCount,
}

fn spawn_kmers_job(
    pack: &ReadPack,
    kmer_len: usize,
    buckets: usize,
    bucket_range: (usize, usize),
    kmers: &mut Vec<KmerCount>,
) {
    let total = pack[0].kmer_num(kmer_len) + pack[1].kmer_num(kmer_len);
    let reserve = (1.1 * total as f64 / buckets as f64) as usize;
    let active_buckets = bucket_range.1 - bucket_range.0 + 1;
    kmers.resize_with(active_buckets, || KmerCount::new(kmer_len));
    for k in kmers.iter_mut() {
        k.reserve(reserve);
    }

    for holder in pack.iter() {
        for kmer in holder.kmers(kmer_len) {
            let rkmer = kmer.reverse_complement(kmer_len);
            let mut count = 1u64;
            let min_kmer = if kmer < rkmer {
                count += 1 << 32; // seen in the plus direction
                kmer
            } else {
                rkmer
            };
            let bucket = (min_kmer.hash() % buckets as u64) as usize;
            if bucket < bucket_range.0 || bucket > bucket_range.1 {
                continue;
            }
            let ind = bucket - bucket_range.0;
            if kmers[ind].size() == kmers[ind].capacity() && kmers[ind].capacity() > 0 {
                // plan B for failed hash uniformity
                warn!("hash uniformity problem, bucket {} over reserve", bucket);
                let extra = kmers[ind].size() / 5;
                kmers[ind].reserve(extra.max(1));
            }
            kmers[ind].push(&min_kmer, count);
        }
    }
}

// briefly doubles the input memory - executed in small buckets
fn sort_and_merge_job(group: Vec<KmerCount>, ukmers: &mut KmerCount, kmer_len: usize, min_count: u32) {
    let mut all_kmers = KmerCount::new(kmer_len);
    let mut group = group;
    if group.len() == 1 {
        all_kmers = group.pop().unwrap_or(all_kmers);
    } else {
        let total: usize = group.iter().map(|k| k.size()).sum();
        all_kmers.reserve(total);
        for k in &group {
            all_kmers.push_elements_from(k);
        }
    }
    *ukmers = all_kmers.sort_and_extract_uniq(min_count);
}

impl KmerCounter {
    pub fn new(
        reads: &[ReadPack],
        kmer_len: usize,
        min_count: u32,
        is_stranded: bool,
        mem_available: i64,
        ncores: usize,
    ) -> Result<KmerCounter> {
        info!("Kmer len: {}", kmer_len);

        let raw_kmer_num: usize = reads
            .iter()
            .map(|pack| pack[0].kmer_num(kmer_len) + pack[1].kmer_num(kmer_len))
            .sum();
        let kmer_size = KmerCount::new(kmer_len).element_size();
        let mem_needed = (1.2 * raw_kmer_num as f64 * kmer_size as f64) as i64;

        if mem_needed >= MAX_CYCLES * (mem_available - MEMORY_MARGIN) {
            return Err(Error::new(
                ErrorKind::OutOfMemory,
                "Memory provided is insufficient to do runs in 10 cycles for the read coverage. \
                 We find that 16 Gb for 20x coverage of a 5 Mb genome is usually sufficient",
            ));
        }
        let cycles = ((mem_needed as f64 / (mem_available - MEMORY_MARGIN) as f64).ceil() as usize).max(1);
        info!(
            "Raw kmers: {} Memory needed (GB): {:.3} Memory available (GB): {:.3} {} cycle(s) will be performed",
            raw_kmer_num,
            mem_needed as f64 / GB as f64,
            (mem_available - MEMORY_MARGIN) as f64 / GB as f64,
            cycles
        );

        // many buckets reduce the short-lived memory spike while sorting
        let njobs = 8 * reads.len().max(1);
        let kmer_buckets = cycles * njobs;

        let mut uniq_kmers: Vec<KmerCount> = Vec::new();
        for cycl in 0..cycles {
            let bucket_range = (cycl * njobs, (cycl + 1) * njobs - 1);

            let active: Vec<&ReadPack> = reads
                .iter()
                .filter(|pack| pack[0].read_num() > 0 || pack[1].read_num() > 0)
                .collect();
            let mut raw_kmers: Vec<Vec<KmerCount>> = Vec::new();
            raw_kmers.resize_with(active.len(), Vec::new);

            let mut jobs: Vec<Job> = Vec::new();
            for (pack, out) in active.iter().zip(raw_kmers.iter_mut()) {
                let pack: &ReadPack = pack;
                jobs.push(Box::new(move || {
                    spawn_kmers_job(pack, kmer_len, kmer_buckets, bucket_range, out)
                }));
            }
            run_jobs(ncores, jobs);

            Self::sort_and_merge_kmers(&mut uniq_kmers, raw_kmers, kmer_len, min_count, ncores);
        }

        let utotal: usize = uniq_kmers.iter().map(|k| k.size()).sum();
        info!("Distinct kmers: {}", utotal);

        Self::merge_sorted_kmers(&mut uniq_kmers, kmer_len, ncores);

        let uniq_kmers = uniq_kmers.pop().unwrap_or_else(|| KmerCount::new(kmer_len));
        Ok(KmerCounter {
            kmer_len,
            min_count,
            is_stranded,
            uniq_kmers,
        })
    }

    fn sort_and_merge_kmers(
        uniq: &mut Vec<KmerCount>,
        raw_kmers: Vec<Vec<KmerCount>>,
        kmer_len: usize,
        min_count: u32,
        ncores: usize,
    ) {
        if raw_kmers.is_empty() {
            return;
        }
        let bucket_num = raw_kmers[0].len();
        let mut groups: Vec<Vec<KmerCount>> = Vec::new();
        groups.resize_with(bucket_num, Vec::new);
        for thread_buckets in raw_kmers {
            for (bucket, table) in thread_buckets.into_iter().enumerate() {
                groups[bucket].push(table);
            }
        }

        let start = uniq.len();
        uniq.resize_with(start + bucket_num, || KmerCount::new(kmer_len));
        let outs = &mut uniq[start..];

        let mut jobs: Vec<Job> = Vec::new();
        for (group, out) in groups.into_iter().zip(outs.iter_mut()) {
            jobs.push(Box::new(move || {
                sort_and_merge_job(group, out, kmer_len, min_count)
            }));
        }
        run_jobs(ncores, jobs);
    }

    /// Two-way merge tree over the sorted buckets; at the end one table holds
    /// the final kmers.
    fn merge_sorted_kmers(uniq: &mut Vec<KmerCount>, kmer_len: usize, ncores: usize) {
        while uniq.len() > 1 {
            let mut jobs: Vec<Job> = Vec::new();
            for pair in uniq.chunks_mut(2) {
                if pair.len() == 2 {
                    jobs.push(Box::new(move || {
                        let (first, second) = pair.split_at_mut(1);
                        let other = std::mem::replace(&mut second[0], KmerCount::new(kmer_len));
                        first[0].merge_two_sorted(other);
                    }));
                }
            }
            run_jobs(ncores, jobs);
            uniq.retain(|table| table.size() > 0);
            if uniq.is_empty() {
                break;
            }
        }
    }

    pub fn kmers(&self) -> &KmerCount {
        &self.uniq_kmers
    }

    pub fn into_kmers(self) -> KmerCount {
        self.uniq_kmers
    }

    pub fn is_stranded(&self) -> bool {
        self.is_stranded
    }

    pub fn min_count(&self) -> u32 {
        self.min_count
    }

    /// Histogram of total counts over the table.
    pub fn histogram(&self) -> Bins {
        count_histogram(&self.uniq_kmers)
    }

    /// Average count of kmers inside the main histogram peak.
    pub fn average_count(&self) -> f64 {
        average_count_of(&self.histogram())
    }

    /// Computes the branch bits and the quantized plus fraction for every
    /// entry, packing them into the counter word for graph use.
    pub fn get_branches(&mut self, ncores: usize) {
        compute_branches(&mut self.uniq_kmers, ncores);
    }
}

/// Histogram of total counts over a sorted table.
pub fn count_histogram(table: &KmerCount) -> Bins {
    let mut bins = BTreeMap::<i32, u64>::new();
    for index in 0..table.size() {
        let count = (table.get_count(index) & 0xFFFF_FFFF) as i32;
        *bins.entry(count).or_insert(0) += 1;
    }
    bins.into_iter().collect()
}

/// Average count of kmers inside the main histogram peak.
pub fn average_count_of(hist: &Bins) -> f64 {
    let (valley, rlimit) = histogram_range(hist);
    let first = valley.max(0);

    let mut genome = 0u64;
    let mut kmers = 0u64;
    for i in first..=rlimit {
        if (i as usize) < hist.len() {
            genome += hist[i as usize].1;
            kmers += hist[i as usize].0 as u64 * hist[i as usize].1;
        }
    }

    if genome > 0 {
        kmers as f64 / genome as f64
    } else {
        0.0
    }
}

/// Fills the branch bits and the quantized plus-strand fraction of every
/// entry: bit i of the low nibble marks an existing forward neighbor on
/// base i, the high nibble the reverse neighbors, self-loops excluded.
pub fn compute_branches(table: &mut KmerCount, ncores: usize) {
    let size = table.size();
    if size == 0 {
        return;
    }
    let kmer_len = table.kmer_len();
    let mut branches = vec![0u8; size];
    let chunk = size / ncores.max(1) + 1;
    {
        let table: &KmerCount = table;
        branches
            .par_chunks_mut(chunk)
            .enumerate()
            .for_each(|(chunk_index, slice)| {
                let start = chunk_index * chunk;
                for (offset, branch) in slice.iter_mut().enumerate() {
                    let index = start + offset;
                    let (kmer, _) = table.get_kmer_count(index);
                    let rkmer = kmer.reverse_complement(kmer_len);
                    for nt in 0..4u8 {
                        // direct
                        let k = kmer.extend_right(nt, kmer_len).canonical(kmer_len);
                        if let Some(new_index) = table.find(&k) {
                            // a neighbor exists in reads and is not this kmer
                            if new_index != index {
                                *branch |= 1 << nt;
                            }
                        }
                        // inverse
                        let k = rkmer.extend_right(nt, kmer_len).canonical(kmer_len);
                        if let Some(new_index) = table.find(&k) {
                            if new_index != index {
                                *branch |= 1 << (nt + 4);
                            }
                        }
                    }
                }
            });
    }

    for index in 0..size {
        let count = table.get_count(index);
        let total_count = count & 0xFFFF_FFFF;
        let plus_count = count >> 32;
        let plusf =
            ((plus_count as f64 / total_count as f64 * u16::MAX as f64 + 0.5) as u64).min(u16::MAX as u64);
        // strand info and branching go into the high half of the count
        table.update_count(index, (plusf << 48) + ((branches[index] as u64) << 32) + total_count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readkmer::{Kmer, ReadHolder};
    use std::collections::BTreeMap as Map;

    fn pack(reads: &[&str]) -> Vec<ReadPack> {
        let mut unpaired = ReadHolder::new(false);
        for r in reads {
            unpaired.push(r.as_bytes());
        }
        vec![[ReadHolder::new(true), unpaired]]
    }

    #[test]
    fn test_counter_equals_sorted_scan() {
        let reads = ["ACGTACGTACGGT", "TTACGTACGTAAC", "GGGTACCAGTACA"];
        let kmer_len = 5;
        let counter = KmerCounter::new(&pack(&reads), kmer_len, 1, true, 16 * GB, 4).unwrap();

        // reference single-threaded scan
        let mut reference: Map<Vec<u64>, u64> = Map::new();
        for r in &reads {
            for start in 0..=r.len() - kmer_len {
                let kmer = Kmer::from_seq(&r.as_bytes()[start..start + kmer_len]).unwrap();
                let canon = kmer.canonical(kmer_len);
                *reference.entry(canon.words().to_vec()).or_insert(0) += 1;
            }
        }

        assert_eq!(counter.kmers().size(), reference.len());
        for index in 0..counter.kmers().size() {
            let (kmer, count) = counter.kmers().get_kmer_count(index);
            assert_eq!(Some(&(count & 0xFFFF_FFFF)), reference.get(&kmer.words().to_vec()));
            if index > 0 {
                assert!(counter.kmers().get_kmer_count(index - 1).0 < kmer);
            }
        }
    }

    #[test]
    fn test_min_count_filter() {
        let reads = ["AAAAACCCCC", "AAAAAGGGGG"];
        let kmer_len = 5;
        let counter = KmerCounter::new(&pack(&reads), kmer_len, 2, true, 16 * GB, 2).unwrap();

        let mut reference: Map<Vec<u64>, u64> = Map::new();
        for r in &reads {
            for start in 0..=r.len() - kmer_len {
                let kmer = Kmer::from_seq(&r.as_bytes()[start..start + kmer_len]).unwrap();
                let canon = kmer.canonical(kmer_len);
                *reference.entry(canon.words().to_vec()).or_insert(0) += 1;
            }
        }
        reference.retain(|_, count| *count >= 2);

        assert!(!reference.is_empty());
        assert_eq!(counter.kmers().size(), reference.len());
        for index in 0..counter.kmers().size() {
            let (kmer, count) = counter.kmers().get_kmer_count(index);
            assert_eq!(Some(&(count & 0xFFFF_FFFF)), reference.get(&kmer.words().to_vec()));
        }
        assert!(counter.kmers().find(&Kmer::from_seq(b"AAAAA").unwrap()).is_some());
    }

    #[test]
    fn test_branching_bits_faithful() {
        let mut counter = KmerCounter::new(&pack(&["AAAAATTTT", "AAAAAGGGG"]), 5, 1, true, 16 * GB, 2).unwrap();
        counter.get_branches(2);
        let table = counter.kmers();
        let kmer_len = 5;
        for index in 0..table.size() {
            let (kmer, count) = table.get_kmer_count(index);
            let branches = (count >> 32) as u8;
            let rkmer = kmer.reverse_complement(kmer_len);
            for nt in 0..4u8 {
                let neighbor = kmer.extend_right(nt, kmer_len).canonical(kmer_len);
                let expected = matches!(table.find(&neighbor), Some(i) if i != index);
                assert_eq!(branches & (1 << nt) != 0, expected);
                let neighbor = rkmer.extend_right(nt, kmer_len).canonical(kmer_len);
                let expected = matches!(table.find(&neighbor), Some(i) if i != index);
                assert_eq!(branches & (1 << (nt + 4)) != 0, expected);
            }
        }
    }

    #[test]
    fn test_plus_fraction_quantization() {
        // every observation in the stored direction: fraction must be exactly 65535
        let mut counter = KmerCounter::new(&pack(&["AAAAC", "AAAAC"]), 5, 1, true, 16 * GB, 1).unwrap();
        counter.get_branches(1);
        let (_, count) = counter.kmers().get_kmer_count(0);
        assert_eq!(count >> 48, u16::MAX as u64);
        assert_eq!(count & 0xFFFF_FFFF, 2);
    }

    #[test]
    fn test_insufficient_memory() {
        let reads: Vec<String> = (0..50).map(|i| format!("ACGTACGTACGTACGTACGTACGTACGTACG{}", ["A", "C", "G", "T"][i % 4])).collect();
        let refs: Vec<&str> = reads.iter().map(|s| s.as_str()).collect();
        let err = KmerCounter::new(&pack(&refs), 21, 1, true, GB, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfMemory);
    }

    #[test]
    fn test_average_count() {
        let mut reads = Vec::new();
        for _ in 0..10 {
            reads.push("ACGGTCATTCAGACT");
        }
        let counter = KmerCounter::new(&pack(&reads), 7, 1, true, 16 * GB, 2).unwrap();
        assert!((counter.average_count() - 10.0).abs() < 1e-9);
    }
}
