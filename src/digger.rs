use crate::contig::{connect_fragments, Bases, Contig};
use crate::graph::{rev_comp_node, DBGraph, Node, Successor};
use crate::ReadPack;
use log::info;
use readkmer::{reverse_complement_seq, run_jobs, Job, ReadHolder};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

// maximum number of paths explored before quitting
const MAX_BRANCH: usize = 200;
// gate for the strand-specific noise rules
const STRAND_BIAS_FACTOR: f64 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Success,
    NoConnection,
    AmbiguousConnection,
}

/// A lightweight handle over one de Bruijn graph plus the assembling
/// parameters; all traversal work goes through here.
///
/// `fraction` is the maximal noise-to-signal count ratio accepted for an
/// extension, `jump` the maximal dead-end length skipped at forks and
/// `low_count` the minimal count for nodes used in contigs.
pub struct GraphDigger<'a> {
    graph: &'a DBGraph,
    fraction: f64,
    jump: usize,
    hist_min: i32,
    low_count: u32,
    max_branch: usize,
}

impl<'a> GraphDigger<'a> {
    pub fn new(graph: &'a DBGraph, fraction: f64, jump: usize, low_count: u32) -> GraphDigger<'a> {
        let hist_min = graph.histogram_minimum();
        info!("Valley: {}", hist_min);
        GraphDigger {
            graph,
            fraction,
            jump,
            hist_min,
            low_count,
            max_branch: MAX_BRANCH,
        }
    }

    /// A node is good when its count clears both the low-count gate and the
    /// histogram valley (the valley is 0 when none was found).
    pub fn good_node(&self, node: Node) -> bool {
        let abundance = self.graph.abundance(node);
        abundance >= self.low_count && abundance as i32 >= self.hist_min
    }

    /// Extension of up to `len` bases picking the most abundant successor at
    /// every step; no neighbor filtering.
    pub fn most_likely_extension(&self, node: Node, len: usize) -> Vec<u8> {
        let mut s = Vec::new();
        let mut node = node;
        while s.len() < len {
            let mut successors = self.graph.successors(node);
            if successors.is_empty() {
                return s;
            }
            successors
                .sort_by(|a, b| self.graph.abundance(b.node).cmp(&self.graph.abundance(a.node)));
            node = successors[0].node;
            s.push(successors[0].base);
        }
        s
    }

    fn most_likely_seq(&self, base: Successor, len: usize) -> Vec<u8> {
        let mut s = vec![base.base];
        s.extend(self.most_likely_extension(base.node, len - 1));
        s
    }

    /// Extension of up to `len` bases without forks; the flag is true on a
    /// dead end.
    pub fn stringent_extension(&self, node: Node, len: usize) -> (Vec<u8>, bool) {
        let mut s = Vec::new();
        let mut node = node;
        while s.len() < len {
            let mut successors = self.graph.successors(node);
            self.filter_neighbors(&mut successors);
            if successors.is_empty() {
                return (s, true);
            }
            if successors.len() != 1 {
                return (s, false);
            }
            node = successors[0].node;
            s.push(successors[0].base);
        }
        (s, false)
    }

    /// Removes noise forks from a successor list.
    pub fn filter_neighbors(&self, successors: &mut Vec<Successor>) {
        // low abundance forks
        if successors.len() > 1 {
            let total: u64 = successors
                .iter()
                .map(|suc| self.graph.abundance(suc.node) as u64)
                .sum();
            successors
                .sort_by(|a, b| self.graph.abundance(b.node).cmp(&self.graph.abundance(a.node)));
            while successors.len() > 1 {
                let last = successors[successors.len() - 1].node;
                if self.graph.abundance(last) as f64 <= self.fraction * total as f64 {
                    successors.pop();
                } else {
                    break;
                }
            }
        }

        // strand specific noise reduction for the GGT->GG[ACG] issue and
        // overall strand balance
        if self.graph.is_stranded() && successors.len() > 1 {
            let fraction = STRAND_BIAS_FACTOR * self.fraction;

            let target = successors
                .iter()
                .position(|suc| self.graph.node_seq(suc.node).ends_with("GGT"));
            if let Some(target) = target {
                if self.good_node(successors[target].node) {
                    let am = self.graph.abundance(successors[target].node) as f64
                        * (1.0 - self.graph.plus_fraction(successors[target].node));
                    successors.retain(|suc| {
                        self.graph.abundance(suc.node) as f64
                            * (1.0 - self.graph.plus_fraction(suc.node))
                            >= fraction * am
                    });
                    return;
                }
            }

            let target = successors
                .iter()
                .position(|suc| self.most_likely_seq(*suc, 3) == b"ACC");
            if let Some(target) = target {
                if self.good_node(successors[target].node) {
                    let ap = self.graph.abundance(successors[target].node) as f64
                        * self.graph.plus_fraction(successors[target].node);
                    successors.retain(|suc| {
                        self.graph.abundance(suc.node) as f64 * self.graph.plus_fraction(suc.node)
                            >= fraction * ap
                    });
                    return;
                }
            }

            let has_both = successors.iter().any(|suc| {
                self.good_node(suc.node) && self.graph.minus_fraction(suc.node) > 0.25
            });
            if has_both {
                successors.retain(|suc| {
                    let plusf = self.graph.plus_fraction(suc.node);
                    let minusf = 1.0 - plusf;
                    plusf.min(minusf) >= fraction * plusf.max(minusf)
                });
            }
        }
    }

    /// Connects two nodes in at most `steps` steps by breadth-first search.
    /// Multiple distinct paths, or any path through a collision, make the
    /// connection ambiguous.
    pub fn connect_two_nodes(
        &self,
        first_node: Node,
        last_node: Node,
        steps: usize,
    ) -> (Bases, ConnectionStatus) {
        // all extensions are kept; links point backwards
        let mut storage: Vec<(Successor, Option<usize>)> = Vec::new();
        // node -> own element, or None for an ambiguous path
        let mut current_elements: HashMap<Node, Option<usize>> = HashMap::new();

        let mut successors = self.graph.successors(first_node);
        self.filter_neighbors(&mut successors);
        for suc in &successors {
            storage.push((*suc, None));
            current_elements.insert(suc.node, Some(storage.len() - 1));
        }

        let mut connection: Option<usize> = None;
        for _step in 1..steps {
            if current_elements.is_empty() {
                break;
            }
            let mut new_elements: HashMap<Node, Option<usize>> = HashMap::new();
            for (&node, &element) in current_elements.iter() {
                let mut successors = self.graph.successors(node);
                self.filter_neighbors(&mut successors);
                match element {
                    None => {
                        // ambiguous path
                        for suc in &successors {
                            new_elements.insert(suc.node, None);
                            if suc.node == last_node {
                                return (Bases::new(), ConnectionStatus::AmbiguousConnection);
                            }
                        }
                    }
                    Some(link) => {
                        for suc in &successors {
                            storage.push((*suc, Some(link)));
                            let this = storage.len() - 1;
                            if suc.node == last_node {
                                if connection.is_some() {
                                    return (Bases::new(), ConnectionStatus::AmbiguousConnection);
                                }
                                connection = Some(this);
                            }
                            match new_elements.entry(suc.node) {
                                Entry::Vacant(entry) => {
                                    if self.good_node(suc.node) {
                                        entry.insert(Some(this));
                                    } else {
                                        entry.insert(None);
                                    }
                                }
                                Entry::Occupied(mut entry) => {
                                    *entry.get_mut() = None;
                                }
                            }
                        }
                    }
                }
            }
            current_elements = new_elements;
            if current_elements.len() > self.max_branch {
                return (Bases::new(), ConnectionStatus::NoConnection);
            }
        }

        let connection = match connection {
            Some(index) => index,
            None => return (Bases::new(), ConnectionStatus::NoConnection),
        };
        let mut bases = Bases::new();
        let mut element = connection;
        loop {
            bases.push(storage[element].0);
            match storage[element].1 {
                Some(link) => element = link,
                None => break,
            }
        }
        bases.reverse();
        (bases, ConnectionStatus::Success)
    }

    /// One step of breadth-first extension for jump_over. `branch` maps the
    /// frontier nodes to their sequence slot and an ambiguity flag; all
    /// frontier sequences have the same length.
    fn one_step_branch_extend(
        &self,
        branch: &mut HashMap<Node, (usize, bool)>,
        sequences: &mut Vec<Option<(Bases, u64)>>,
    ) {
        let mut new_branch: HashMap<Node, (usize, bool)> = HashMap::new();
        for (&leaf_node, &(seq_index, ambiguous)) in branch.iter() {
            let mut successors = self.graph.successors(leaf_node);
            self.filter_neighbors(&mut successors);
            if successors.is_empty() {
                sequences[seq_index] = None;
                continue;
            }
            for i in (0..successors.len()).rev() {
                let index = if i > 0 {
                    // copy the sequence for the fork
                    let copy = sequences[seq_index].clone();
                    sequences.push(copy);
                    sequences.len() - 1
                } else {
                    seq_index
                };
                let abundance;
                {
                    let slot = match sequences[index].as_mut() {
                        Some(slot) => slot,
                        None => continue,
                    };
                    slot.0.push(successors[i]);
                    slot.1 += self.graph.abundance(successors[i].node) as u64;
                    abundance = slot.1;
                }
                let node = successors[i].node;
                match new_branch.entry(node) {
                    Entry::Vacant(entry) => {
                        entry.insert((index, ambiguous));
                    }
                    Entry::Occupied(mut entry) => {
                        // converging paths: keep the stronger one; only an
                        // even contest leaves the node ambiguous
                        let (existing, existing_ambiguous) = *entry.get();
                        let existing_abundance =
                            sequences[existing].as_ref().map_or(0, |slot| slot.1);
                        if abundance > existing_abundance {
                            sequences[existing] = None;
                            entry.insert((index, ambiguous || existing_ambiguous));
                        } else {
                            sequences[index] = None;
                            let flag = existing_ambiguous || ambiguous || abundance == existing_abundance;
                            entry.insert((existing, flag));
                        }
                    }
                }
            }
        }
        *branch = new_branch;
    }

    /// For a fork, explores ahead breadth-first until a single undisputed
    /// path remains; empty when exploration dies, exceeds `max_branch`
    /// leaves, or reaches `max_extent` with no winner. Every base of the
    /// returned path is a good node.
    pub fn jump_over(&self, successors: &[Successor], max_extent: usize, min_extent: usize) -> Bases {
        if max_extent == 0 {
            return Bases::new();
        }

        let mut sequences: Vec<Option<(Bases, u64)>> = Vec::new();
        let mut extensions: HashMap<Node, (usize, bool)> = HashMap::new();
        for suc in successors {
            sequences.push(Some((vec![*suc], self.graph.abundance(suc.node) as u64)));
            extensions.insert(suc.node, (sequences.len() - 1, false));
        }

        while !extensions.is_empty() && extensions.len() < self.max_branch {
            let seq_index = match extensions.values().next() {
                Some(&(index, _)) => index,
                None => break,
            };
            let len = sequences[seq_index].as_ref().map_or(0, |slot| slot.0.len());
            if len == max_extent {
                break;
            }

            self.one_step_branch_extend(&mut extensions, &mut sequences);
            if extensions.is_empty() {
                // can't extend
                return Bases::new();
            }

            if extensions.len() == 1 && len + 1 >= min_extent {
                break;
            }
        }

        if extensions.len() == 1 {
            let &(seq_index, ambiguous) = match extensions.values().next() {
                Some(value) => value,
                None => return Bases::new(),
            };
            if !ambiguous {
                if let Some((bases, _)) = sequences[seq_index].take() {
                    if bases.iter().all(|base| self.good_node(base.node)) {
                        return bases;
                    }
                }
            }
        }

        Bases::new()
    }

    /// Assembles the right extension from a node, claiming every accepted
    /// node. Stops when the reciprocal walk from the far end does not land
    /// back here through the same bases. The second element is the denied
    /// node when another worker owned the next step.
    pub fn extend_to_right(&self, initial_node: Node) -> (Bases, Node) {
        let mut node = initial_node;
        let mut extension = Bases::new();
        let max_extent = self.jump;

        loop {
            let mut successors = self.graph.successors(node);
            self.filter_neighbors(&mut successors);
            if successors.is_empty() {
                break;
            }

            let step = if successors.len() > 1 {
                // test for a dead end
                self.jump_over(&successors, max_extent, 0)
            } else {
                vec![successors[0]]
            };
            if step.is_empty() {
                // multiple extensions
                break;
            }
            if !step.iter().all(|s| self.good_node(s.node)) {
                break;
            }

            let step_size = step.len();

            let rev_node = rev_comp_node(step[step_size - 1].node);
            let mut predecessors = self.graph.successors(rev_node);
            self.filter_neighbors(&mut predecessors);
            if predecessors.is_empty() {
                break;
            }

            let step_back = if predecessors.len() > 1 || step_size > 1 {
                self.jump_over(&predecessors, max_extent, step_size)
            } else {
                vec![predecessors[0]]
            };
            let step_back_size = step_back.len();
            if step_back_size < step_size {
                break;
            }

            let mut good = true;
            for i in 0..step_size.saturating_sub(1) {
                if rev_comp_node(step_back[i].node) != step[step_size - 2 - i].node {
                    good = false;
                    break;
                }
            }
            if !good {
                break;
            }

            let overshoot = step_back_size - step_size;
            if rev_comp_node(step_back[step_back_size - 1 - overshoot].node) != node {
                break;
            }

            if overshoot > 0 {
                // the reciprocal walk went past the origin; it must come
                // back through the same bases too
                let over_node = rev_comp_node(step_back[step_back_size - 1].node);
                let mut oversuc = self.graph.successors(over_node);
                self.filter_neighbors(&mut oversuc);
                if oversuc.is_empty() {
                    break;
                }
                let step_over = if oversuc.len() > 1 || overshoot > 1 {
                    self.jump_over(&oversuc, max_extent, overshoot)
                } else {
                    vec![oversuc[0]]
                };
                if step_over.len() < overshoot {
                    break;
                }
                for i in 0..overshoot {
                    if rev_comp_node(step_over[i].node) != step_back[step_back_size - 2 - i].node {
                        good = false;
                        break;
                    }
                }
                if !good {
                    break;
                }
            }

            for s in &step {
                if !self.graph.set_visited(s.node, 1, 0) {
                    return (extension, s.node);
                }
                extension.push(*s);
            }

            node = extension[extension.len() - 1].node;
        }

        (extension, 0)
    }

    /// Assembles a contig around a seed node; used nodes end 'visited' or
    /// 'temporary holding'. None when the node is unusable or the result is
    /// a short isolated fragment.
    pub fn contig_for_kmer(&self, initial_node: Node, min_len: usize) -> Option<Contig> {
        if (self.graph.abundance(initial_node) as i32) < self.hist_min
            || !self.good_node(initial_node)
            || !self.graph.set_visited(initial_node, 1, 0)
        {
            return None;
        }

        // node is good and this thread owns it
        let (to_right, rnode) = self.extend_to_right(initial_node);
        let (to_left, lnode) = self.extend_to_right(rev_comp_node(initial_node));

        if lnode == 0
            && rnode == 0
            && to_left.len() + self.graph.kmer_len() + to_right.len() < min_len
        {
            // release the claims into temporary holding
            self.graph.set_visited(initial_node, 2, 1);
            for base in &to_right {
                self.graph.set_visited(base.node, 2, 1);
            }
            for base in &to_left {
                self.graph.set_visited(base.node, 2, 1);
            }
            None
        } else {
            Some(Contig::from_extensions(
                &to_left,
                &to_right,
                initial_node,
                rev_comp_node(lnode),
                rnode,
                self.graph,
            ))
        }
    }

    /// Generates all contigs of length >= `min_len` from nodes not yet
    /// visited.
    pub fn generate_new_seeds(&self, min_len: usize, ncores: usize) -> Vec<Contig> {
        let workers = ncores.max(1);
        let mut seeds_for_threads: Vec<Vec<Contig>> = Vec::new();
        seeds_for_threads.resize_with(workers, Vec::new);

        let graph_size = self.graph.graph_size();
        let chunk = graph_size / workers + 1;
        let mut jobs: Vec<Job> = Vec::new();
        for (worker, out) in seeds_for_threads.iter_mut().enumerate() {
            let from = worker * chunk;
            let to = ((worker + 1) * chunk).min(graph_size);
            if from >= to {
                continue;
            }
            jobs.push(Box::new(move || {
                for index in from..to {
                    let initial_node = 2 * (index as Node + 1);
                    if let Some(contig) = self.contig_for_kmer(initial_node, min_len) {
                        if !contig.seq.is_empty() {
                            out.push(contig);
                        }
                    }
                }
            }));
        }
        run_jobs(workers, jobs);

        self.graph.clear_holdings();
        let mut new_seeds = connect_fragments(seeds_for_threads, self.graph);

        new_seeds.retain(|contig| {
            if contig.len() < min_len {
                for &kmer in &contig.kmers {
                    if kmer != 0 {
                        self.graph.clear_visited(kmer);
                    }
                }
                false
            } else {
                true
            }
        });
        new_seeds
    }

    /// Produces connectors and extenders with the current (longer) kmer and
    /// merges them into the previous contig set.
    pub fn connect_and_extend_contigs(
        &self,
        scontigs: &mut Vec<Contig>,
        scan_window: usize,
        ncores: usize,
    ) {
        let workers = ncores.max(1);
        let mut extensions_for_jobs: Vec<Vec<Contig>> = Vec::new();
        extensions_for_jobs.resize_with(workers, Vec::new);
        {
            let scontigs: &Vec<Contig> = scontigs;
            let mut jobs: Vec<Job> = Vec::new();
            for out in extensions_for_jobs.iter_mut() {
                jobs.push(Box::new(move || {
                    self.extend_contigs_job(scontigs, out, scan_window)
                }));
            }
            run_jobs(workers, jobs);
        }
        let extensions = connect_fragments(extensions_for_jobs, self.graph);
        crate::contig::connect_and_extend_contigs(scontigs, extensions);
    }

    /// One worker of connect_and_extend: grabs unprocessed contigs and
    /// extends to the right from each of the scan_window flank kmers on both
    /// ends. (K-1)-mers from a window are used because the contig sequence
    /// near the very end may not be correct.
    fn extend_contigs_job(&self, scontigs: &[Contig], extensions: &mut Vec<Contig>, scan_window: usize) {
        let kmer_len = self.graph.kmer_len();
        for (contig_index, contig) in scontigs.iter().enumerate() {
            if !contig.try_take() {
                continue;
            }

            let len = contig.seq.len();
            let klen = contig.kmers.len();
            let sw = scan_window.min(len.saturating_sub(kmer_len) / 2);

            for shift in 0..=sw {
                let takeoff_node = contig.kmers[klen - shift - 1];
                if takeoff_node != 0 && self.good_node(takeoff_node) {
                    let (extension, denied) = self.extend_to_right(takeoff_node);
                    // the extension can be empty: starting kmer + landing kmer
                    if !extension.is_empty() || denied != 0 {
                        if shift == 0 || denied == 0 || denied != contig.kmers[klen - shift] {
                            extensions.push(Contig::from_link(
                                contig_index,
                                (shift + 1) as i32,
                                takeoff_node,
                                &extension,
                                denied,
                                self.graph,
                            ));
                        }
                    }
                }
            }

            for shift in 0..=sw {
                let takeoff_node = rev_comp_node(contig.kmers[shift]);
                if takeoff_node != 0 && self.good_node(takeoff_node) {
                    let (extension, denied) = self.extend_to_right(takeoff_node);
                    if !extension.is_empty() || denied != 0 {
                        if shift == 0 || denied == 0 || denied != rev_comp_node(contig.kmers[shift - 1])
                        {
                            let mut fragment = Contig::from_link(
                                contig_index,
                                -((shift + 1) as i32),
                                takeoff_node,
                                &extension,
                                denied,
                                self.graph,
                            );
                            fragment.reverse_complement();
                            extensions.push(fragment);
                        }
                    }
                }
            }
        }
    }

    /// Finds the longest stretch of a read confirmed by reciprocal graph
    /// steps and clips the rest; `nodes` receives the kmers of what is left.
    fn check_and_clip_read(&self, read: &mut Vec<u8>, nodes: &mut Vec<Node>) {
        let kmer_len = self.graph.kmer_len();

        let mut lextend = self.most_likely_extension(
            rev_comp_node(self.graph.get_node_from_seq(&read[..kmer_len])),
            kmer_len,
        );
        reverse_complement_seq(&mut lextend);
        let rextend =
            self.most_likely_extension(self.graph.get_node_from_seq(&read[read.len() - kmer_len..]), kmer_len);

        let mut extended = lextend.clone();
        extended.extend_from_slice(read);
        extended.extend_from_slice(&rextend);

        let mut rh = ReadHolder::new(false);
        rh.push(&extended);
        let mut extended_nodes: Vec<Node> = rh.kmers(kmer_len).map(|k| self.graph.get_node(&k)).collect();
        extended_nodes.reverse();

        let mut bases = vec![0u8; read.len()];
        let mut read_pos = kmer_len - lextend.len();
        let mut kk = 0usize;
        while lextend.len() + read_pos + 1 < extended_nodes.len() && read_pos < read.len() {
            let advance = |kk: &mut usize, read_pos: &mut usize| {
                *kk += 1;
                *read_pos += 1;
            };

            let left = extended_nodes[kk];
            let node = extended_nodes[kk + 1];
            if left == 0 || !self.good_node(left) || node == 0 || !self.good_node(node) {
                advance(&mut kk, &mut read_pos);
                continue;
            }
            let mut successors = self.graph.successors(left);
            self.filter_neighbors(&mut successors);
            if !successors.iter().any(|suc| suc.node == node) {
                advance(&mut kk, &mut read_pos);
                continue;
            }

            let right = rev_comp_node(extended_nodes[lextend.len() + read_pos + 1]);
            let node = rev_comp_node(extended_nodes[read_pos + lextend.len()]);
            if right == 0 || !self.good_node(right) || node == 0 || !self.good_node(node) {
                advance(&mut kk, &mut read_pos);
                continue;
            }
            let mut successors = self.graph.successors(right);
            self.filter_neighbors(&mut successors);
            if !successors.iter().any(|suc| suc.node == node) {
                advance(&mut kk, &mut read_pos);
                continue;
            }

            bases[read_pos] = 1;
            advance(&mut kk, &mut read_pos);
        }

        // longest run of confirmed positions
        let mut left = 0usize;
        let mut len = 0usize;
        let mut k = 0usize;
        while k < read.len() {
            while k < read.len() && bases[k] == 0 {
                k += 1;
            }
            let current_left = k;
            let mut current_len = 0;
            while k < read.len() && bases[k] == 1 {
                k += 1;
                current_len += 1;
            }
            if current_len > len {
                left = current_left;
                len = current_len;
            }
        }

        if len < kmer_len {
            read.clear();
            nodes.clear();
        } else {
            *read = read[left..left + len].to_vec();
            *nodes = extended_nodes[lextend.len() + left..lextend.len() + left + len - kmer_len + 1].to_vec();
        }
    }

    /// One worker for paired-read connection: pushes unambiguously connected
    /// inserts into `paired_reads[0]`; ambiguously connected mates get a
    /// stringent one-path extension and land in `paired_reads[1]` for a
    /// later attempt; unconnectable pairs are dropped.
    fn connect_pairs_job(&self, insert_size: usize, mate_pairs: &ReadHolder, paired_reads: &mut ReadPack) {
        if mate_pairs.read_num() < 2 {
            return;
        }

        let kmer_len = self.graph.kmer_len();
        let mut reads = mate_pairs.reads();
        while let (Some(mate1), Some(mate2)) = (reads.next(), reads.next()) {
            let mut read1 = mate1.seq();
            let mut read2 = mate2.seq();
            if read1.len().min(read2.len()) < kmer_len {
                continue;
            }

            let mut nodes1: Vec<Node> = Vec::new();
            self.check_and_clip_read(&mut read1, &mut nodes1);
            if read1.is_empty() {
                continue;
            }
            let last_node1 = nodes1[nodes1.len() - 1];

            reverse_complement_seq(&mut read2);
            let mut nodes2: Vec<Node> = Vec::new();
            self.check_and_clip_read(&mut read2, &mut nodes2);
            if read2.is_empty() {
                continue;
            }
            let first_node2 = nodes2[0];

            let steps = insert_size;
            let (bases, status) = self.connect_two_nodes(last_node1, first_node2, steps);

            let mut ambiguous = false;
            let mut read: Vec<u8> = Vec::new();
            let mut read_nodes: HashSet<Node> = HashSet::new();

            match status {
                ConnectionStatus::AmbiguousConnection => ambiguous = true,
                ConnectionStatus::Success => {
                    let mut connected = read1.clone();
                    for suc in &bases {
                        connected.push(suc.base);
                        read_nodes.insert(suc.node);
                    }
                    connected.extend_from_slice(&read2[kmer_len..]);
                    read_nodes.extend(nodes2[1..].iter().copied());

                    // cross-check the reverse complement problem
                    let (rbases, rstatus) = self.connect_two_nodes(
                        rev_comp_node(first_node2),
                        rev_comp_node(last_node1),
                        steps,
                    );
                    if rstatus == ConnectionStatus::Success {
                        let mut seq: Vec<u8> = rbases.iter().map(|suc| suc.base).collect();
                        reverse_complement_seq(&mut seq);
                        let mut other = read1[..read1.len() - kmer_len].to_vec();
                        other.extend_from_slice(&seq);
                        other.extend_from_slice(&read2);
                        if connected == other {
                            read = connected;
                        }
                    }
                    if read.is_empty() {
                        ambiguous = true;
                    }
                }
                ConnectionStatus::NoConnection => {
                    // check for a long overlap with extension
                    if let Some(hit) = nodes2.iter().position(|&node| node == last_node1) {
                        if hit < nodes1.len().min(nodes2.len())
                            && nodes2[..hit] == nodes1[nodes1.len() - hit - 1..nodes1.len() - 1]
                        {
                            read = read1.clone();
                            read.extend_from_slice(&read2[hit + kmer_len..]);
                            read_nodes.extend(nodes2[hit + 1..].iter().copied());
                        }
                    }
                }
            }

            if !read.is_empty() {
                read_nodes.extend(nodes1.iter().copied());
                if read_nodes.len() == read.len() + 1 - kmer_len {
                    paired_reads[0].push(&read);
                    continue;
                } else {
                    ambiguous = true;
                }
            }

            if ambiguous {
                let mut lextend = self
                    .stringent_extension(rev_comp_node(nodes1[0]), kmer_len)
                    .0;
                reverse_complement_seq(&mut lextend);
                lextend.extend_from_slice(&read1);
                let mut right = read2.clone();
                right.extend(self.stringent_extension(nodes2[nodes2.len() - 1], kmer_len).0);
                reverse_complement_seq(&mut right);
                paired_reads[1].push_pair(&lextend, &right);
            }
        }
    }

    /// Connects mate pairs through the graph; returns per-chunk packs of
    /// [connected single reads, still-paired reads for a later attempt].
    pub fn connect_pairs(&self, mate_pairs: &[ReadPack], insert_size: usize, ncores: usize) -> Vec<ReadPack> {
        let mut paired_reads: Vec<ReadPack> = mate_pairs
            .iter()
            .map(|_| [ReadHolder::new(false), ReadHolder::new(true)])
            .collect();

        let mut jobs: Vec<Job> = Vec::new();
        for (pack, out) in mate_pairs.iter().zip(paired_reads.iter_mut()) {
            if pack[0].read_num() > 0 {
                let mates = &pack[0];
                jobs.push(Box::new(move || {
                    self.connect_pairs_job(insert_size, mates, out)
                }));
            }
        }
        run_jobs(ncores, jobs);

        let connected: usize = paired_reads.iter().map(|pack| pack[0].read_num()).sum();
        let not_connected: usize = paired_reads.iter().map(|pack| pack[1].read_num()).sum();
        let mates: usize = mate_pairs.iter().map(|pack| pack[0].read_num()).sum();
        info!(
            "Connected: {} ambiguously connected: {} from {} mate pairs",
            connected,
            not_connected / 2,
            mates / 2
        );

        paired_reads
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::KmerCounter;
    use crate::graph::DBGraph;
    use readkmer::ReadHolder;

    fn build_graph(reads: &[&str], kmer_len: usize) -> DBGraph {
        let mut unpaired = ReadHolder::new(false);
        for r in reads {
            unpaired.push(r.as_bytes());
        }
        let packs = vec![[ReadHolder::new(true), unpaired]];
        let mut counter = KmerCounter::new(&packs, kmer_len, 1, true, 16_000_000_000, 2).unwrap();
        counter.get_branches(2);
        let bins = counter.histogram();
        DBGraph::new(counter.into_kmers(), bins, true)
    }

    fn revcomp(seq: &str) -> String {
        let mut s = seq.as_bytes().to_vec();
        reverse_complement_seq(&mut s);
        String::from_utf8(s).unwrap()
    }

    #[test]
    fn test_single_linear_contig() {
        let read = "ACGGTCATTCAGA";
        let graph = build_graph(&[read], 5);
        let digger = GraphDigger::new(&graph, 0.1, 0, 1);
        let seeds = digger.generate_new_seeds(1, 2);
        assert_eq!(seeds.len(), 1);
        let seq = String::from_utf8(seeds[0].seq.clone()).unwrap();
        assert!(seq == read || seq == revcomp(read), "got {}", seq);
        // every kmer of the contig is present in the graph
        for &node in &seeds[0].kmers {
            assert_ne!(node, 0);
            assert_eq!(graph.abundance(node), 1);
        }
    }

    #[test]
    fn test_branching_reads_no_chimera() {
        let reads = ["AAAAATTTT", "AAAAAGGGG"];
        let graph = build_graph(&reads, 5);
        let digger = GraphDigger::new(&graph, 0.1, 0, 1);
        let seeds = digger.generate_new_seeds(1, 2);
        assert!(!seeds.is_empty());
        let sources: Vec<String> = reads
            .iter()
            .flat_map(|r| [r.to_string(), revcomp(r)])
            .collect();
        for seed in &seeds {
            let seq = String::from_utf8(seed.seq.clone()).unwrap();
            assert!(
                sources.iter().any(|source| source.contains(&seq)),
                "chimeric contig {}",
                seq
            );
            for &node in &seed.kmers {
                assert_ne!(node, 0);
            }
        }
        // both branch tips were assembled
        let all: String = seeds
            .iter()
            .map(|s| {
                let seq = String::from_utf8(s.seq.clone()).unwrap();
                format!("{} {}", seq, revcomp(&seq))
            })
            .collect::<Vec<_>>()
            .join(" ");
        assert!(all.contains("TTTT") || all.contains("AAAA"));
        assert!(all.contains("GGGG") || all.contains("CCCC"));
    }

    #[test]
    fn test_filter_neighbors_drops_weak_fork() {
        let mut reads = vec!["AAAAATTTTT"; 20];
        reads.push("AAAAAGTTTT");
        let graph = build_graph(&reads, 5);
        let digger = GraphDigger::new(&graph, 0.1, 0, 1);
        let node = graph.get_node_from_seq(b"AAAAA");
        let mut successors = graph.successors(node);
        assert_eq!(successors.len(), 2);
        digger.filter_neighbors(&mut successors);
        assert_eq!(successors.len(), 1);
        assert_eq!(successors[0].base, b'T');
    }

    #[test]
    fn test_jump_over_bubble_prefers_strong_path() {
        // two alternative interiors between common anchors
        let strong = "ACGGTCATTCCTGACTTGAC";
        let weak = "ACGGTCATGGATGACTTGAC";
        let mut reads = vec![strong; 3];
        reads.push(weak);
        let graph = build_graph(&reads, 7);
        let digger = GraphDigger::new(&graph, 0.1, 20, 1);
        let fork = graph.get_node_from_seq(b"CGGTCAT");
        assert_ne!(fork, 0);
        let mut successors = graph.successors(fork);
        digger.filter_neighbors(&mut successors);
        assert!(successors.len() > 1, "no fork to jump over");
        let path = digger.jump_over(&successors, 20, 0);
        assert!(!path.is_empty(), "jump over found no winner");
        let bases: String = path.iter().map(|s| s.base as char).collect();
        assert!(
            strong.contains(&format!("CGGTCAT{}", &bases[..3.min(bases.len())])),
            "took the weak path: {}",
            bases
        );
    }

    #[test]
    fn test_connect_two_nodes_unique_path() {
        let fragment = "ACGGTCATTCAGACTTGACC";
        let mut windows: Vec<String> = Vec::new();
        for start in 0..fragment.len() - 7 {
            windows.push(fragment[start..start + 8].to_string());
        }
        let refs: Vec<&str> = windows.iter().map(|s| s.as_str()).collect();
        let graph = build_graph(&refs, 5);
        let digger = GraphDigger::new(&graph, 0.1, 0, 1);

        let first = graph.get_node_from_seq(&fragment.as_bytes()[..5]);
        let last = graph.get_node_from_seq(&fragment.as_bytes()[fragment.len() - 5..]);
        let (bases, status) = digger.connect_two_nodes(first, last, 100);
        assert_eq!(status, ConnectionStatus::Success);
        let path: String = bases.iter().map(|s| s.base as char).collect();
        assert_eq!(format!("{}{}", &fragment[..5], path), fragment);

        // the reverse complement problem gives the same sequence
        let (rbases, rstatus) =
            digger.connect_two_nodes(rev_comp_node(last), rev_comp_node(first), 100);
        assert_eq!(rstatus, ConnectionStatus::Success);
        let mut rpath: Vec<u8> = rbases.iter().map(|s| s.base).collect();
        reverse_complement_seq(&mut rpath);
        let rpath = String::from_utf8(rpath).unwrap();
        assert_eq!(&rpath, &fragment[..fragment.len() - 5]);
    }

    #[test]
    fn test_connect_pairs_reconstructs_insert() {
        let fragment = "ACGGTCATTCAGACTTGACC";
        let mut windows: Vec<String> = Vec::new();
        for start in 0..=fragment.len() - 8 {
            windows.push(fragment[start..start + 8].to_string());
        }
        let refs: Vec<&str> = windows.iter().map(|s| s.as_str()).collect();
        let graph = build_graph(&refs, 5);
        let digger = GraphDigger::new(&graph, 0.1, 0, 1);

        let read1 = &fragment[..12];
        let read2 = revcomp(&fragment[10..]);
        let mut mates = ReadHolder::new(true);
        mates.push_pair(read1.as_bytes(), read2.as_bytes());
        let packs = vec![[mates, ReadHolder::new(false)]];
        let connected = digger.connect_pairs(&packs, 100, 2);
        assert_eq!(connected[0][0].read_num(), 1);
        let insert = connected[0][0].reads().next().unwrap().seq();
        let insert = String::from_utf8(insert).unwrap();
        assert!(
            insert.contains(fragment) || revcomp(fragment).contains(&insert) || fragment.contains(&insert),
            "unexpected insert {}",
            insert
        );
    }

    #[test]
    fn test_stringent_extension_stops_at_fork() {
        let reads = ["AAAAATTTT", "AAAAAGGGG"];
        let graph = build_graph(&reads, 5);
        let digger = GraphDigger::new(&graph, 0.1, 0, 1);
        let node = graph.get_node_from_seq(b"AAAAA");
        assert_ne!(node, 0);
        let (ext, dead_end) = digger.stringent_extension(node, 10);
        assert!(ext.is_empty());
        assert!(!dead_end);
    }
}
