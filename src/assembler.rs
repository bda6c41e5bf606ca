use crate::contig::Contig;
use crate::counter::{average_count_of, compute_branches, count_histogram, KmerCounter};
use crate::digger::GraphDigger;
use crate::graph::DBGraph;
use crate::hash_counter::hash_count;
use crate::report::IterationStats;
use crate::ReadPack;
use dashmap::DashMap;
use log::{info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use readkmer::{run_jobs, Job, Kmer, ReadHolder, MAX_KMER};
use std::collections::{BTreeMap, HashSet};
use std::io::{Error, ErrorKind, Result};
use std::sync::atomic::{AtomicU8, Ordering};

const GB: i64 = 1_000_000_000;
// the size-1 of the contig flank area used for extensions and connections
const SCAN_WINDOW: usize = 50;
// mate pairs sampled when the insert size has to be estimated
const INSERT_SAMPLE: usize = 10000;
// upper search bound while estimating the insert size
const LONG_INSERT_SIZE: usize = 2000;

#[derive(Debug, Clone)]
pub struct AssemblerParams {
    /// maximal noise to signal ratio of counts acceptable for extension
    pub fraction: f64,
    /// minimal length of accepted dead ends
    pub jump: usize,
    /// minimal kmer count used in contigs
    pub low_count: u32,
    /// number of assembly iterations from minimal to maximal kmer length
    pub steps: usize,
    /// minimal kmer count to enter a de Bruijn graph
    pub min_count: u32,
    /// minimal kmer size for the main steps
    pub min_kmer: usize,
    pub use_paired_ends: bool,
    /// insert size (0 if not known)
    pub max_kmer_paired: usize,
    /// minimal average count for estimating the maximal kmer
    pub max_kmer_count: u32,
    /// memory ceiling (GB)
    pub memory: i64,
    pub ncores: usize,
    /// use the one-pass Bloom/hash counting path
    pub hash_counting: bool,
}

/// The assembling pipeline: builds de Bruijn graphs for an increasing kmer
/// schedule and improves the contig set at every step.
///
/// The counts at the minimal kmer length give the estimate of the maximal
/// usable kmer length; if reads are paired and the insert size is unknown,
/// it is estimated by connecting a sample of mates through the first graph.
/// After every iteration the reads already fully contained in contigs are
/// removed. With paired reads, the remaining mates are connected through
/// all built graphs and three more iterations run with kmers up to the
/// insert size.
#[derive(Debug)]
pub struct Assembler {
    params: AssemblerParams,
    scan_window: usize,
    max_kmer: usize,
    max_kmer_paired: usize,
    insert_size: usize,

    raw_reads: Vec<ReadPack>,
    raw_pairs: Vec<ReadPack>,
    connected_reads: Vec<ReadPack>,
    graphs: BTreeMap<usize, DBGraph>,
    contigs: Vec<Vec<Vec<u8>>>,
    stats: Vec<IterationStats>,
}

impl Assembler {
    pub fn run(params: AssemblerParams, raw_reads: Vec<ReadPack>) -> Result<Assembler> {
        let raw_pairs = raw_reads
            .iter()
            .map(|pack| [pack[0].clone(), ReadHolder::new(false)])
            .collect();
        let connected_reads = raw_reads
            .iter()
            .map(|_| [ReadHolder::new(false), ReadHolder::new(true)])
            .collect();
        let mut assembler = Assembler {
            scan_window: SCAN_WINDOW,
            max_kmer: params.min_kmer,
            max_kmer_paired: params.max_kmer_paired,
            insert_size: 0,
            raw_reads,
            raw_pairs,
            connected_reads,
            graphs: BTreeMap::new(),
            contigs: Vec::new(),
            stats: Vec::new(),
            params,
        };
        assembler.assemble()?;
        Ok(assembler)
    }

    fn assemble(&mut self) -> Result<()> {
        let min_kmer = self.params.min_kmer;

        // graph for the minimal kmer
        let average_count = self.build_graph(min_kmer, false, true)?;
        if !self.graphs.contains_key(&min_kmer) {
            return Err(Error::new(ErrorKind::InvalidData, "Insufficient coverage"));
        }
        if average_count == 0.0 {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "Reads are too short for selected minimal kmer length",
            ));
        }

        // estimate the genome
        let total_seq: usize = self
            .raw_reads
            .iter()
            .map(|pack| pack[0].total_seq() + pack[1].total_seq())
            .sum();
        let total_reads: usize = self
            .raw_reads
            .iter()
            .map(|pack| pack[0].read_num() + pack[1].read_num())
            .sum();
        if total_reads == 0 {
            return Err(Error::new(ErrorKind::InvalidData, "No usable reads"));
        }
        let read_len = (total_seq as f64 / total_reads as f64 + 0.5) as usize;
        info!("Average read length: {}", read_len);
        info!("Genome size estimate: {}", self.graphs[&min_kmer].genome_size());

        // first iteration
        self.improve_contigs(min_kmer);
        if self.contigs.last().map_or(true, |contigs| contigs.is_empty()) {
            return Err(Error::new(ErrorKind::InvalidData, "Was not able to assemble anything"));
        }

        // estimate the maximal kmer
        if self.params.steps > 1 && average_count > self.params.max_kmer_count as f64 {
            let mut max_kmer = read_len as i64 + 1
                - (self.params.max_kmer_count as f64 / average_count
                    * (read_len as f64 - min_kmer as f64 + 1.0)) as i64;
            max_kmer = max_kmer.min(MAX_KMER as i64);
            while max_kmer > min_kmer as i64 {
                max_kmer -= 1 - max_kmer % 2; // odd kmers desired
                let counter = KmerCounter::new(
                    &self.raw_reads,
                    max_kmer as usize,
                    self.params.min_count,
                    true,
                    self.available_memory(),
                    self.params.ncores,
                )?;
                if counter.kmers().size() < 100 {
                    // need a length with at least 100 distinct kmers
                    max_kmer -= read_len as i64 / 25;
                    continue;
                }
                if counter.average_count() >= self.params.max_kmer_count as f64 {
                    break;
                }
                max_kmer -= read_len as i64 / 25;
            }
            self.max_kmer = (max_kmer.max(min_kmer as i64)) as usize;
            info!("Average count: {} Max kmer: {}", average_count, self.max_kmer);
        }

        // estimate the insert size
        if self.params.steps > 1 || self.params.use_paired_ends {
            if self.max_kmer_paired == 0 {
                self.estimate_insert_size();
            }
            self.max_kmer_paired = self.max_kmer_paired.min(MAX_KMER);
            // the histogram spread should stay within three times the insert
            self.insert_size = 3 * self.max_kmer_paired;
            self.clean_reads();
        }

        // main iterations
        if self.params.steps > 1 {
            if self.max_kmer as f64 > 1.5 * min_kmer as f64 {
                let alpha = (self.max_kmer - min_kmer) as f64 / (self.params.steps - 1) as f64;
                for step in 1..self.params.steps {
                    let mut kmer_len = (min_kmer as f64 + step as f64 * alpha + 0.5) as usize;
                    kmer_len -= 1 - kmer_len % 2;
                    if self.build_graph(kmer_len, false, true)? == 0.0 {
                        info!(
                            "Empty graph for kmer length: {} skipping this and longer kmers",
                            kmer_len
                        );
                        break;
                    }
                    self.improve_contigs(kmer_len);
                    self.clean_reads();
                }
            } else {
                warn!("Iterations are disabled");
            }
        }

        // additional iterations with kmers (usually) longer than the read
        // length and up to the insert size
        if self.params.use_paired_ends
            && self.insert_size > 0
            && self.max_kmer_paired as f64 > 1.5 * self.max_kmer as f64
        {
            self.connect_pairs_iteratively();

            let first = (1.25 * self.max_kmer as f64) as usize;
            let long_kmers = [first, (first + self.max_kmer_paired) / 2, self.max_kmer_paired];
            for kmer_len in long_kmers {
                let kmer_len = kmer_len - (1 - kmer_len % 2);
                if self.build_graph(kmer_len, true, false)? == 0.0 {
                    info!(
                        "Empty graph for kmer length: {} skipping this and longer kmers",
                        kmer_len
                    );
                    break;
                }
                self.improve_contigs(kmer_len);
            }
        }

        Ok(())
    }

    pub fn contigs(&self) -> &[Vec<u8>] {
        self.contigs.last().map(|v| v.as_slice()).unwrap_or(&[])
    }

    pub fn all_iterations(&self) -> &[Vec<Vec<u8>>] {
        &self.contigs
    }

    pub fn graphs(&self) -> &BTreeMap<usize, DBGraph> {
        &self.graphs
    }

    pub fn stats(&self) -> &[IterationStats] {
        &self.stats
    }

    /// All internally connected reads in one holder.
    pub fn connected_reads(&self) -> ReadHolder {
        let mut connected = ReadHolder::new(false);
        for pack in &self.connected_reads {
            for read in pack[0].reads() {
                connected.push_from(&read);
            }
        }
        connected
    }

    /// Counts kmers and builds the graph for one kmer length; the returned
    /// average count is 0 when no kmer reached `min_count` (no graph is
    /// stored in that case).
    fn build_graph(&mut self, kmer_len: usize, use_connected: bool, is_stranded: bool) -> Result<f64> {
        let reads = if use_connected {
            &self.connected_reads
        } else {
            &self.raw_reads
        };
        let (table, average_count) = if self.params.hash_counting {
            let mut table = hash_count(reads, kmer_len, self.params.min_count, self.params.ncores)?;
            let average_count = average_count_of(&count_histogram(&table));
            compute_branches(&mut table, self.params.ncores);
            (table, average_count)
        } else {
            let mut counter = KmerCounter::new(
                reads,
                kmer_len,
                self.params.min_count,
                is_stranded,
                self.available_memory(),
                self.params.ncores,
            )?;
            let average_count = counter.average_count();
            counter.get_branches(self.params.ncores);
            (counter.into_kmers(), average_count)
        };

        if table.size() == 0 {
            return Ok(0.0);
        }
        let bins = count_histogram(&table);
        self.graphs.insert(kmer_len, DBGraph::new(table, bins, is_stranded));
        Ok(average_count)
    }

    /// Estimates what is available under the memory ceiling after the reads,
    /// graphs and contigs already held.
    fn available_memory(&self) -> i64 {
        let mut mem_available = GB * self.params.memory;
        for pack in self.raw_reads.iter().chain(&self.raw_pairs).chain(&self.connected_reads) {
            mem_available -= (pack[0].memory_footprint() + pack[1].memory_footprint()) as i64;
        }
        for graph in self.graphs.values() {
            mem_available -= graph.memory_footprint() as i64;
        }
        mem_available
    }

    /// Connects a sample of mate pairs through the minimal-kmer graph; the
    /// N50 of the connected inserts estimates the insert size.
    fn estimate_insert_size(&mut self) {
        let mates: usize = self.raw_reads.iter().map(|pack| pack[0].read_num()).sum();
        let pairs = mates / 2;
        let mut selection: HashSet<usize> = HashSet::new();
        if pairs > 2 * INSERT_SAMPLE {
            let mut rng = StdRng::seed_from_u64(0);
            while selection.len() < INSERT_SAMPLE {
                selection.insert(rng.gen_range(0..pairs));
            }
        } else if pairs > 0 {
            selection.extend(0..pairs);
        }
        if selection.is_empty() {
            return;
        }

        let sub_sample = (INSERT_SAMPLE / self.params.ncores.max(1)).max(1);
        let mut mate_pairs: Vec<ReadPack> = Vec::new();
        let mut pair_index = 0usize;
        let mut num = 0usize;
        for pack in &self.raw_reads {
            let mut reads = pack[0].reads();
            while let (Some(read1), Some(read2)) = (reads.next(), reads.next()) {
                if selection.contains(&pair_index) {
                    if num % sub_sample == 0 {
                        mate_pairs.push([ReadHolder::new(true), ReadHolder::new(false)]);
                    }
                    num += 1;
                    if let Some(last) = mate_pairs.last_mut() {
                        last[0].push_from(&read1);
                        last[0].push_from(&read2);
                    }
                }
                pair_index += 1;
            }
        }

        let graph = &self.graphs[&self.params.min_kmer];
        let digger = GraphDigger::new(graph, self.params.fraction, self.params.jump, self.params.low_count);
        let connected_mate_pairs = digger.connect_pairs(&mate_pairs, LONG_INSERT_SIZE, self.params.ncores);
        let mut connected_mates = ReadHolder::new(false);
        for pack in &connected_mate_pairs {
            for read in pack[0].reads() {
                connected_mates.push_from(&read);
            }
        }

        self.max_kmer_paired = connected_mates.n50();
        info!("N50 for inserts: {}", self.max_kmer_paired);
    }

    /// Connects the remaining mate pairs through every built graph.
    fn connect_pairs_iteratively(&mut self) {
        for (kmer_len, graph) in &self.graphs {
            info!("Connecting mate pairs using kmer length: {}", kmer_len);
            let digger =
                GraphDigger::new(graph, self.params.fraction, self.params.jump, self.params.low_count);
            let connected_temp = digger.connect_pairs(&self.raw_pairs, self.insert_size, self.params.ncores);
            for ((pack, raw), result) in self
                .connected_reads
                .iter_mut()
                .zip(self.raw_pairs.iter_mut())
                .zip(connected_temp)
            {
                let [newly_connected, still_paired] = result;
                raw[0] = still_paired; // keep still not connected
                for read in newly_connected.reads() {
                    pack[0].push_from(&read);
                }
            }
        }

        let connected: usize = self.connected_reads.iter().map(|pack| pack[0].read_num()).sum();
        info!("Totally connected: {}", connected);
    }

    /// Improves the previous contig set using the graph for `kmer_len`.
    fn improve_contigs(&mut self, kmer_len: usize) {
        let graph = match self.graphs.get(&kmer_len) {
            Some(graph) => graph,
            None => return,
        };
        info!(
            "Kmer: {} Graph size: {} Contigs in: {}",
            kmer_len,
            graph.graph_size(),
            self.contigs.last().map_or(0, |contigs| contigs.len())
        );

        // convert previous contigs and mark their kmers as visited
        let mut scontigs = convert_to_scontigs(
            self.contigs.last(),
            graph,
            self.scan_window,
            self.params.ncores,
        );

        // create new contigs from not yet included kmers
        let digger_no_jump = GraphDigger::new(graph, self.params.fraction, 0, self.params.low_count);
        let min_len_for_new_seeds = 3 * kmer_len; // short ones are likely to be noise
        let new_seeds = digger_no_jump.generate_new_seeds(min_len_for_new_seeds, self.params.ncores);
        info!("New seeds: {}", new_seeds.len());

        scontigs.extend(new_seeds);
        for contig in scontigs.iter_mut() {
            contig.select_min_direction();
        }
        scontigs.sort_by(|a, b| a.seq.cmp(&b.seq));

        let digger = GraphDigger::new(graph, self.params.fraction, self.params.jump, self.params.low_count);
        digger.connect_and_extend_contigs(&mut scontigs, self.scan_window, self.params.ncores);

        let new_contigs: Vec<Vec<u8>> = scontigs.into_iter().map(|contig| contig.seq).collect();

        let mut contigs_len: Vec<usize> = new_contigs.iter().map(|c| c.len()).collect();
        contigs_len.sort_unstable();
        let genome_len: usize = contigs_len.iter().sum();
        let mut n50 = 0;
        let mut l50 = 0;
        let mut len = 0usize;
        for &contig_len in contigs_len.iter().rev() {
            if len as f64 >= 0.5 * genome_len as f64 {
                break;
            }
            l50 += 1;
            n50 = contig_len;
            len += contig_len;
        }
        info!(
            "Contigs out: {} Genome: {} N50: {} L50: {}",
            contigs_len.len(),
            genome_len,
            n50,
            l50
        );
        self.stats.push(IterationStats {
            kmer_len,
            contigs: contigs_len.len(),
            total_len: genome_len,
            n50,
            l50,
        });

        self.contigs.push(new_contigs);
    }

    /// Removes reads already contained inside assembled contigs; pairs whose
    /// mates both land near a contig interior become synthetic connected
    /// reads cut from the contig sequence.
    fn clean_reads(&mut self) {
        let kmer_len = match self.graphs.keys().next_back() {
            Some(&kmer_len) => kmer_len,
            None => return,
        };
        let empty = Vec::new();
        let contigs = self.contigs.last().unwrap_or(&empty);
        let min_len = self.max_kmer_paired.max(self.max_kmer) + 2 * self.scan_window;

        // contig-interior kmer map, built in parallel over contigs
        let assembled_kmers: DashMap<Kmer, (i64, bool, usize)> = DashMap::new();
        contigs.par_iter().enumerate().for_each(|(contig_index, contig)| {
            if contig.len() < min_len {
                return;
            }
            let mut rh = ReadHolder::new(false);
            rh.push(contig);
            let mut pos = (contig.len() - kmer_len) as i64;
            for kmer in rh.kmers(kmer_len) {
                // iteration from last kmer to first
                let rkmer = kmer.reverse_complement(kmer_len);
                if kmer < rkmer {
                    assembled_kmers.insert(kmer, (pos, true, contig_index));
                } else {
                    assembled_kmers.insert(rkmer, (pos, false, contig_index));
                }
                pos -= 1;
            }
        });
        info!(
            "Contigs: {} Assembled kmers: {}",
            contigs.len(),
            assembled_kmers.len()
        );

        let insert_size = self.insert_size as i64;
        let ncores = self.params.ncores;
        let graph_margin = (self.max_kmer + self.params.jump + self.scan_window) as i64;
        let pair_margin = (self.params.jump + self.scan_window) as i64;

        {
            let mut jobs: Vec<Job> = Vec::new();
            for pack in self.raw_reads.iter_mut() {
                let map = &assembled_kmers;
                jobs.push(Box::new(move || {
                    remove_used_reads_job(map, kmer_len, contigs, graph_margin, insert_size, pack, None)
                }));
            }
            run_jobs(ncores, jobs);
        }
        {
            let mut jobs: Vec<Job> = Vec::new();
            for pack in self.connected_reads.iter_mut() {
                let map = &assembled_kmers;
                jobs.push(Box::new(move || {
                    remove_used_reads_job(map, kmer_len, contigs, pair_margin, insert_size, pack, None)
                }));
            }
            run_jobs(ncores, jobs);
        }
        {
            let mut jobs: Vec<Job> = Vec::new();
            for (pack, connected) in self.raw_pairs.iter_mut().zip(self.connected_reads.iter_mut()) {
                let map = &assembled_kmers;
                let connected = &mut connected[1];
                jobs.push(Box::new(move || {
                    remove_used_reads_job(
                        map,
                        kmer_len,
                        contigs,
                        pair_margin,
                        insert_size,
                        pack,
                        Some(connected),
                    )
                }));
            }
            run_jobs(ncores, jobs);
        }

        let reads: usize = self
            .raw_reads
            .iter()
            .map(|pack| pack[0].read_num() + pack[1].read_num())
            .sum();
        info!("Cleaned reads: {}", reads);
        let reads: usize = self
            .raw_pairs
            .iter()
            .map(|pack| pack[0].read_num() + pack[1].read_num())
            .sum();
        info!("Reads for connection: {}", reads);
        let reads: usize = self
            .connected_reads
            .iter()
            .map(|pack| pack[0].read_num() + pack[1].read_num())
            .sum();
        info!("Internal reads: {}", reads);
    }
}

/// Converts previous contigs into contig structures, claiming their kmers
/// in the graph; contigs too short for the flank scan are dropped.
fn convert_to_scontigs(
    prev: Option<&Vec<Vec<u8>>>,
    graph: &DBGraph,
    scan_window: usize,
    ncores: usize,
) -> Vec<Contig> {
    let mut scontigs: Vec<Contig> = Vec::new();
    let contigs = match prev {
        Some(contigs) => contigs,
        None => return scontigs,
    };
    let kmer_len = graph.kmer_len();

    let contig_is_taken: Vec<AtomicU8> = contigs.iter().map(|_| AtomicU8::new(0)).collect();
    let workers = ncores.max(1);
    let mut scontigs_for_threads: Vec<Vec<Contig>> = Vec::new();
    scontigs_for_threads.resize_with(workers, Vec::new);

    let mut jobs: Vec<Job> = Vec::new();
    for out in scontigs_for_threads.iter_mut() {
        let contig_is_taken = &contig_is_taken;
        jobs.push(Box::new(move || {
            for (index, contig) in contigs.iter().enumerate() {
                if contig_is_taken[index]
                    .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                if contig.len() >= kmer_len + 2 * scan_window {
                    // the constructor claims the kmers in the graph
                    out.push(Contig::from_seq(contig, graph));
                }
            }
        }));
    }
    run_jobs(workers, jobs);

    for thread_contigs in scontigs_for_threads {
        scontigs.extend(thread_contigs);
    }
    scontigs
}

/// Whether a read maps into a contig: position of the outer read end on the
/// contig (-1 if unmapped), strand, contig index.
fn find_match_for_read(
    read: &readkmer::ReadRef<'_>,
    assembled_kmers: &DashMap<Kmer, (i64, bool, usize)>,
    kmer_len: usize,
) -> (i64, i32, Option<usize>) {
    let rlen = read.len();
    let mut plus = 1i32;
    let mut rslt: Option<(i64, bool, usize)> = None;
    let mut knum = rlen as i64 - kmer_len as i64 + 1;
    let mut kmers = read.kmers(kmer_len);
    while knum > 0 {
        let kmer = match kmers.next() {
            Some(kmer) => kmer,
            None => break,
        };
        let rkmer = kmer.reverse_complement(kmer_len);
        plus = 1;
        let key = if rkmer < kmer {
            plus = -plus;
            rkmer
        } else {
            kmer
        };
        let hit = assembled_kmers.get(&key).map(|entry| *entry.value());
        knum -= 1;
        if hit.is_some() {
            rslt = hit;
            break;
        }
    }

    let mut pos = -1i64;
    let mut contig = None;
    if let Some((hit_pos, same_direction, contig_index)) = rslt {
        contig = Some(contig_index);
        if !same_direction {
            plus = -plus;
        }
        if plus > 0 {
            pos = hit_pos - knum;
        } else {
            pos = hit_pos + kmer_len as i64 - 1 + knum;
        }
    }
    (pos, plus, contig)
}

/// Removes reads belonging to already assembled contigs. With
/// `connected_reads` given, mate pairs spanning a contig end are replaced by
/// the contig substring between their outer ends.
fn remove_used_reads_job(
    assembled_kmers: &DashMap<Kmer, (i64, bool, usize)>,
    kmer_len: usize,
    contigs: &[Vec<u8>],
    margin: i64,
    insert_size: i64,
    pack: &mut ReadPack,
    mut connected_reads: Option<&mut ReadHolder>,
) {
    {
        let (paired, unpaired) = pack.split_at_mut(1);
        let paired = &mut paired[0];
        let unpaired = &mut unpaired[0];

        let mut cleaned_reads = ReadHolder::new(true);
        {
            let mut reads = paired.reads();
            while let (Some(read1), Some(read2)) = (reads.next(), reads.next()) {
                if read1.len().min(read2.len()) < kmer_len {
                    if connected_reads.is_some() {
                        // keep short pairs for connection
                        cleaned_reads.push_from(&read1);
                        cleaned_reads.push_from(&read2);
                    } else {
                        // give them a chance to be used as unpaired
                        unpaired.push_from(&read1);
                        unpaired.push_from(&read2);
                    }
                    continue;
                }

                let (pos1, plus1, contig1) = find_match_for_read(&read1, assembled_kmers, kmer_len);
                if let Some(contig1) = contig1 {
                    let clen = contigs[contig1].len() as i64;
                    if (plus1 > 0 && pos1 >= margin && pos1 + insert_size - 1 < clen - margin)
                        || (plus1 < 0 && pos1 - insert_size + 1 >= margin && pos1 < clen - margin)
                    {
                        continue;
                    }
                }

                // second mate in case the first was of bad quality
                let (pos2, plus2, contig2) = find_match_for_read(&read2, assembled_kmers, kmer_len);
                if let Some(contig2) = contig2 {
                    let clen = contigs[contig2].len() as i64;
                    if (plus2 > 0 && pos2 >= margin && pos2 + insert_size - 1 < clen - margin)
                        || (plus2 < 0 && pos2 - insert_size + 1 >= margin && pos2 < clen - margin)
                    {
                        continue;
                    }
                }

                if pos1 >= 0 && pos2 >= 0 && contig1 == contig2 && plus1 != plus2 {
                    // same contig, different strands
                    let clen = contigs[contig1.unwrap_or(0)].len() as i64;
                    if (plus1 > 0 && pos1 >= margin && pos2 < clen - margin)
                        || (plus1 < 0 && pos2 >= margin && pos1 < clen - margin)
                    {
                        // deep inside
                        continue;
                    } else if let Some(connected) = connected_reads.as_deref_mut() {
                        // inside but not deep
                        if (plus1 > 0 && pos1 >= 0 && pos2 < clen) || (plus1 < 0 && pos2 >= 0 && pos1 < clen)
                        {
                            let a = pos1.min(pos2) as usize;
                            let b = pos1.max(pos2) as usize;
                            connected.push(&contigs[contig1.unwrap_or(0)][a..=b]);
                            continue;
                        }
                    }
                }

                cleaned_reads.push_from(&read1);
                cleaned_reads.push_from(&read2);
            }
        }
        *paired = cleaned_reads;
    }

    if connected_reads.is_none() {
        let unpaired = &mut pack[1];
        let mut cleaned_reads = ReadHolder::new(false);
        {
            for read in unpaired.reads() {
                let rlen = read.len() as i64;
                if (rlen as usize) < kmer_len {
                    continue;
                }
                let (pos, plus, contig) = find_match_for_read(&read, assembled_kmers, kmer_len);
                if let Some(contig) = contig {
                    let clen = contigs[contig].len() as i64;
                    if (plus > 0 && pos >= margin && pos + rlen - 1 < clen - margin)
                        || (plus < 0 && pos - rlen + 1 >= margin && pos < clen - margin)
                    {
                        continue;
                    }
                }
                cleaned_reads.push_from(&read);
            }
        }
        pack[1] = cleaned_reads;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn genome() -> String {
        // deterministic pseudo-random ACGT sequence
        let mut state = 0x853c49e6748fea9bu64;
        let mut genome = String::new();
        for _ in 0..400 {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            genome.push(['A', 'C', 'G', 'T'][(state >> 33) as usize % 4]);
        }
        genome
    }

    fn revcomp(seq: &str) -> String {
        let mut s = seq.as_bytes().to_vec();
        readkmer::reverse_complement_seq(&mut s);
        String::from_utf8(s).unwrap()
    }

    fn params(steps: usize) -> AssemblerParams {
        AssemblerParams {
            fraction: 0.1,
            jump: 50,
            low_count: 1,
            steps,
            min_count: 1,
            min_kmer: 21,
            use_paired_ends: false,
            max_kmer_paired: 0,
            max_kmer_count: 10,
            memory: 16,
            ncores: 2,
            hash_counting: false,
        }
    }

    fn reads_from(genome: &str, read_len: usize, coverage: usize) -> Vec<ReadPack> {
        let mut unpaired = ReadHolder::new(false);
        for _ in 0..coverage {
            for start in (0..genome.len() - read_len).step_by(7) {
                unpaired.push(genome[start..start + read_len].as_bytes());
            }
            unpaired.push(genome[genome.len() - read_len..].as_bytes());
        }
        vec![[ReadHolder::new(true), unpaired]]
    }

    #[test]
    fn test_single_step_assembly() {
        let genome = genome();
        let reads = reads_from(&genome, 60, 4);
        let assembler = Assembler::run(params(1), reads).unwrap();
        let contigs = assembler.contigs();
        assert!(!contigs.is_empty());
        for contig in contigs {
            let seq = String::from_utf8(contig.clone()).unwrap();
            assert!(
                genome.contains(&seq) || genome.contains(&revcomp(&seq)),
                "contig not in genome: {}",
                seq
            );
        }
        // most of the genome is recovered in one piece
        let longest = contigs.iter().map(|c| c.len()).max().unwrap_or(0);
        assert!(longest > genome.len() / 2, "longest contig {}", longest);
    }

    #[test]
    fn test_multi_step_assembly() {
        let genome = genome();
        let reads = reads_from(&genome, 60, 4);
        let assembler = Assembler::run(params(3), reads).unwrap();
        let contigs = assembler.contigs();
        assert!(!contigs.is_empty());
        for contig in contigs {
            let seq = String::from_utf8(contig.clone()).unwrap();
            assert!(genome.contains(&seq) || genome.contains(&revcomp(&seq)));
        }
        assert!(!assembler.stats().is_empty());
        assert!(assembler.graphs().len() >= 1);
    }

    #[test]
    fn test_insufficient_coverage_reported() {
        let mut unpaired = ReadHolder::new(false);
        unpaired.push(b"ACGT"); // shorter than any kmer
        let reads = vec![[ReadHolder::new(true), unpaired]];
        let err = Assembler::run(params(1), reads).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidData);
    }
}
