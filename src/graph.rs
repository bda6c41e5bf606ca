use crate::kmer_table::KmerCount;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use readkmer::{base_code, Kmer, CODE_BASES};
use std::io::{Read, Result, Write};
use std::sync::atomic::{AtomicU8, Ordering};

/// Abundance histogram: (count value, number of kmers with that count).
pub type Bins = Vec<(i32, u64)>;

/// Graph node id. 0 is "no such node"; even 2*(i+1) is the stored
/// orientation of table entry i, odd 2*(i+1)+1 its reverse complement.
pub type Node = u64;

#[inline]
pub fn rev_comp_node(node: Node) -> Node {
    if node == 0 {
        0
    } else {
        node ^ 1
    }
}

const SLOPE_LEN: i32 = 5;

/// Simple heuristic to find a valley/peak in a histogram; -1 if none.
/// A bin is a peak when it strictly tops its immediate neighbors and
/// nothing else in its 5-window tops it; window positions past the
/// histogram edges do not disqualify.
pub fn find_valley_and_peak(bins: &Bins, rlimit: i32) -> i32 {
    let len = bins.len() as i32;
    let mut peak = rlimit.min(len - 1);
    while peak >= SLOPE_LEN {
        let mut maxim = true;
        for i in 1..=SLOPE_LEN {
            if !maxim {
                break;
            }
            let right = peak + i;
            if right < len {
                maxim = if i == 1 {
                    bins[right as usize].1 < bins[peak as usize].1
                } else {
                    bins[right as usize].1 <= bins[peak as usize].1
                };
            }
        }
        for i in 1..=SLOPE_LEN {
            if !maxim {
                break;
            }
            let left = peak - i;
            if left >= 0 {
                maxim = if i == 1 {
                    bins[left as usize].1 < bins[peak as usize].1
                } else {
                    bins[left as usize].1 <= bins[peak as usize].1
                };
            }
        }
        if maxim {
            break;
        }
        peak -= 1;
    }

    if peak < SLOPE_LEN {
        return -1;
    }

    let mut valley = 0i32;
    for i in 1..=peak {
        if bins[i as usize].1 < bins[valley as usize].1 {
            valley = i;
        }
    }
    if valley == peak {
        return -1;
    }

    for i in valley..bins.len() as i32 {
        if bins[i as usize].1 > bins[peak as usize].1 {
            peak = i;
        }
    }

    if (bins[valley as usize].1 as f64) < 0.7 * bins[peak as usize].1 as f64 {
        valley
    } else {
        -1
    }
}

/// Main range of a histogram as (valley, rlimit) bin indexes; valley is -1
/// when no acceptable valley exists. Iterates the valley search keeping the
/// range with the largest integral area (or a first >10x improvement).
pub fn histogram_range(bins: &Bins) -> (i32, i32) {
    const MIN_NUM: u64 = 100;
    let mut gsize = 0u64;
    for bin in bins {
        if bin.1 >= MIN_NUM {
            gsize += bin.0 as u64 * bin.1;
        }
    }

    let mut rl = 0i32;
    let mut gs = 0u64;
    for bin in bins {
        gs += bin.0 as u64 * bin.1;
        rl += 1;
        if gs as f64 > 0.8 * gsize as f64 {
            break;
        }
    }

    let mut valley = -1i32;
    let mut rlimit = rl;
    let mut genome = 0u64;

    loop {
        let v = find_valley_and_peak(bins, rl);

        let mut g = 0u64;
        for i in v.max(0)..=rl {
            if (i as usize) < bins.len() {
                g += bins[i as usize].1;
            }
        }

        if (v >= 0 && g > genome) || g > 10 * genome {
            valley = v;
            rlimit = rl;
            genome = g;
        }

        if v < 0 {
            break;
        }
        rl = v;
    }

    (valley, rlimit)
}

/// Successor of a node: the neighbor's node id plus the extension base.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Successor {
    pub node: Node,
    pub base: u8,
}

/// Node-centric de Bruijn graph over a sorted kmer table.
///
/// Only canonical kmers are stored; every kmer is reachable in two
/// orientations through the node id parity. The packed counter word of each
/// entry carries the total count, the branch mask for the eight possible
/// neighbors and the plus-strand fraction. A byte of atomic state per entry
/// coordinates node ownership between traversal workers.
#[derive(Debug)]
pub struct DBGraph {
    graph_kmers: KmerCount,
    bins: Bins,
    visited: Vec<AtomicU8>,
    is_stranded: bool,
    max_kmer: Kmer,
}

impl DBGraph {
    pub fn new(kmers: KmerCount, bins: Bins, is_stranded: bool) -> DBGraph {
        let kmer_len = kmers.kmer_len();
        let visited = (0..kmers.size()).map(|_| AtomicU8::new(0)).collect();
        DBGraph {
            graph_kmers: kmers,
            bins,
            visited,
            is_stranded,
            max_kmer: Kmer::filled(kmer_len),
        }
    }

    pub fn kmer_len(&self) -> usize {
        self.graph_kmers.kmer_len()
    }

    pub fn graph_size(&self) -> usize {
        self.graph_kmers.size()
    }

    pub fn is_stranded(&self) -> bool {
        self.is_stranded
    }

    pub fn bins(&self) -> &Bins {
        &self.bins
    }

    pub fn memory_footprint(&self) -> usize {
        self.graph_kmers.memory_footprint() + self.visited.capacity() + 16 * self.bins.capacity()
    }

    /// Finds the node for a kmer value; 0 if absent.
    pub fn get_node(&self, kmer: &Kmer) -> Node {
        let kmer_len = self.kmer_len();
        let rkmer = kmer.reverse_complement(kmer_len);
        if *kmer < rkmer {
            match self.graph_kmers.find(kmer) {
                Some(index) => 2 * (index as Node + 1),
                None => 0,
            }
        } else {
            match self.graph_kmers.find(&rkmer) {
                Some(index) => 2 * (index as Node + 1) + 1,
                None => 0,
            }
        }
    }

    /// Finds the node for a kmer sequence; 0 for absent kmers, wrong length
    /// or invalid characters.
    pub fn get_node_from_seq(&self, seq: &[u8]) -> Node {
        if seq.len() != self.kmer_len() || seq.iter().any(|&c| base_code(c).is_none()) {
            return 0;
        }
        match Kmer::from_seq(seq) {
            Some(kmer) => self.get_node(&kmer),
            None => 0,
        }
    }

    /// Total count for a node's kmer; 0 for node 0.
    pub fn abundance(&self, node: Node) -> u32 {
        if node == 0 {
            0
        } else {
            // clips out the branching and strand information
            (self.graph_kmers.get_count(node as usize / 2 - 1) & 0xFFFF_FFFF) as u32
        }
    }

    /// Fraction of times the node's kmer was seen in plus direction.
    pub fn plus_fraction(&self, node: Node) -> f64 {
        let mut plusf =
            (self.graph_kmers.get_count(node as usize / 2 - 1) >> 48) as f64 / u16::MAX as f64;
        if node % 2 == 1 {
            plusf = 1.0 - plusf;
        }
        plusf
    }

    pub fn minus_fraction(&self, node: Node) -> f64 {
        let plusf = self.plus_fraction(node);
        plusf.min(1.0 - plusf)
    }

    /// Kmer value in the node's orientation.
    pub fn node_kmer(&self, node: Node) -> Kmer {
        let (kmer, _) = self.graph_kmers.get_kmer_count(node as usize / 2 - 1);
        if node % 2 == 0 {
            kmer
        } else {
            kmer.reverse_complement(self.kmer_len())
        }
    }

    pub fn node_seq(&self, node: Node) -> String {
        self.node_kmer(node).to_string(self.kmer_len())
    }

    /// CAS on the visited byte; true iff expected -> value succeeded.
    /// 1 is permanent holding, 2 is temporary holding.
    pub fn set_visited(&self, node: Node, value: u8, expected: u8) -> bool {
        self.visited[node as usize / 2 - 1]
            .compare_exchange(expected, value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn clear_visited(&self, node: Node) -> bool {
        let slot = &self.visited[node as usize / 2 - 1];
        slot.compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
            || slot
                .compare_exchange(2, 0, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn is_visited(&self, node: Node) -> u8 {
        self.visited[node as usize / 2 - 1].load(Ordering::Acquire)
    }

    /// Releases all temporary holdings.
    pub fn clear_holdings(&self) {
        for v in &self.visited {
            let _ = v.compare_exchange(2, 0, Ordering::AcqRel, Ordering::Acquire);
        }
    }

    /// Successors of a node: up to four nodes reachable by dropping the
    /// leftmost base and appending one base on the right, synthesized from
    /// the branch nibble for the node's orientation. Predecessors are the
    /// successors of the reverse complement node.
    pub fn successors(&self, node: Node) -> Vec<Successor> {
        let mut successors = Vec::new();
        if node == 0 {
            return successors;
        }

        let branch_info = (self.graph_kmers.get_count(node as usize / 2 - 1) >> 32) as u8;
        let branches = if node % 2 == 1 {
            branch_info >> 4
        } else {
            branch_info & 0x0F
        };
        if branches != 0 {
            let kmer_len = self.kmer_len();
            let kmer = self.node_kmer(node);
            for nt in 0..4u8 {
                if branches & (1 << nt) != 0 {
                    let successor = self.get_node(&kmer.extend_right(nt, kmer_len));
                    successors.push(Successor {
                        node: successor,
                        base: CODE_BASES[nt as usize],
                    });
                }
            }
        }

        successors
    }

    /// Count value at the histogram valley; 0 when no valley was found.
    pub fn histogram_minimum(&self) -> i32 {
        let (valley, _) = histogram_range(&self.bins);
        if valley < 0 {
            0
        } else {
            self.bins[valley as usize].0
        }
    }

    /// Rough genome size estimate from the main histogram range.
    pub fn genome_size(&self) -> u64 {
        let (valley, rlimit) = histogram_range(&self.bins);
        let first = valley.max(0);
        let mut genome = 0u64;
        for i in first..=rlimit {
            if (i as usize) < self.bins.len() {
                genome += self.bins[i as usize].1;
            }
        }
        genome
    }

    pub fn save<W: Write>(&self, out: &mut W) -> Result<()> {
        self.graph_kmers.save(out)?;
        out.write_i32::<LittleEndian>(self.bins.len() as i32)?;
        for &(value, size) in &self.bins {
            out.write_i32::<LittleEndian>(value)?;
            out.write_u64::<LittleEndian>(size)?;
        }
        out.write_u8(self.is_stranded as u8)?;
        Ok(())
    }

    pub fn load<R: Read>(input: &mut R) -> Result<DBGraph> {
        let kmers = KmerCount::load(input)?;
        let bin_num = input.read_i32::<LittleEndian>()?;
        let mut bins = Bins::new();
        for _ in 0..bin_num {
            let value = input.read_i32::<LittleEndian>()?;
            let size = input.read_u64::<LittleEndian>()?;
            bins.push((value, size));
        }
        let is_stranded = input.read_u8()? != 0;
        Ok(DBGraph::new(kmers, bins, is_stranded))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use readkmer::ReadHolder;

    fn graph_for(reads: &[&str], kmer_len: usize) -> DBGraph {
        let mut table = KmerCount::new(kmer_len);
        let mut rh = ReadHolder::new(false);
        for r in reads {
            rh.push(r.as_bytes());
        }
        for kmer in rh.kmers(kmer_len) {
            let rkmer = kmer.reverse_complement(kmer_len);
            let mut count = 1u64;
            let min_kmer = if kmer < rkmer {
                count += 1 << 32;
                kmer
            } else {
                rkmer
            };
            table.push(&min_kmer, count);
        }
        let mut table = table.sort_and_extract_uniq(1);
        // branch bits
        let size = table.size();
        let mut branches = vec![0u8; size];
        for index in 0..size {
            let (kmer, _) = table.get_kmer_count(index);
            let rkmer = kmer.reverse_complement(kmer_len);
            for nt in 0..4u8 {
                let k = kmer.extend_right(nt, kmer_len).canonical(kmer_len);
                if let Some(i) = table.find(&k) {
                    if i != index {
                        branches[index] |= 1 << nt;
                    }
                }
                let k = rkmer.extend_right(nt, kmer_len).canonical(kmer_len);
                if let Some(i) = table.find(&k) {
                    if i != index {
                        branches[index] |= 1 << (nt + 4);
                    }
                }
            }
        }
        for index in 0..size {
            let count = table.get_count(index);
            let total = count & 0xFFFF_FFFF;
            let plus = count >> 32;
            let plusf = (plus as f64 / total as f64 * u16::MAX as f64 + 0.5) as u64;
            table.update_count(index, (plusf << 48) + ((branches[index] as u64) << 32) + total);
        }
        DBGraph::new(table, Bins::new(), true)
    }

    #[test]
    fn test_node_lookup_and_involution() {
        let graph = graph_for(&["ACGTAC"], 5);
        let node = graph.get_node_from_seq(b"ACGTA");
        assert_ne!(node, 0);
        let rc = rev_comp_node(node);
        assert_eq!(rc, node ^ 1);
        assert_eq!(rev_comp_node(rc), node);
        assert_eq!(rev_comp_node(0), 0);
        assert_eq!(graph.node_seq(node), "ACGTA");
        assert_eq!(graph.node_seq(rc), "TACGT");
        assert_eq!(graph.get_node_from_seq(b"NNNNN"), 0);
        assert_eq!(graph.get_node_from_seq(b"ACG"), 0);
    }

    #[test]
    fn test_successors_from_branches() {
        // AAAAA forks to T and G
        let graph = graph_for(&["AAAAATTTT", "AAAAAGGGG"], 5);
        let node = graph.get_node_from_seq(b"AAAAA");
        assert_ne!(node, 0);
        let successors = graph.successors(node);
        let mut bases: Vec<u8> = successors.iter().map(|s| s.base).collect();
        bases.sort_unstable();
        assert_eq!(bases, vec![b'G', b'T']);
        for s in &successors {
            assert_ne!(s.node, 0);
        }
    }

    #[test]
    fn test_abundance_and_strand() {
        let graph = graph_for(&["ACGTA", "ACGTA", "ACGTA"], 5);
        let node = graph.get_node_from_seq(b"ACGTA");
        assert_eq!(graph.abundance(node), 3);
        assert_eq!(graph.abundance(0), 0);
        // all observations on the plus strand of the stored orientation
        let pf = graph.plus_fraction(node);
        let pf_rc = graph.plus_fraction(rev_comp_node(node));
        assert!((pf + pf_rc - 1.0).abs() < 1.0 / u16::MAX as f64);
        assert!(pf > 0.999);
    }

    #[test]
    fn test_visited_cas() {
        let graph = graph_for(&["ACGTAC"], 5);
        let node = graph.get_node_from_seq(b"ACGTA");
        assert_eq!(graph.is_visited(node), 0);
        assert!(graph.set_visited(node, 1, 0));
        assert!(!graph.set_visited(node, 1, 0));
        assert_eq!(graph.is_visited(node), 1);
        assert!(graph.clear_visited(node));
        assert!(!graph.clear_visited(node));
        // temporary holding is released by clear_holdings
        assert!(graph.set_visited(node, 2, 0));
        graph.clear_holdings();
        assert_eq!(graph.is_visited(node), 0);
    }

    #[test]
    fn test_visited_cas_concurrent() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let graph = graph_for(&["ACGTAC"], 5);
        let node = graph.get_node_from_seq(b"ACGTA");
        let wins = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    if graph.set_visited(node, 1, 0) {
                        wins.fetch_add(1, Ordering::Relaxed);
                    }
                });
            }
        });
        assert_eq!(wins.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_valley_detection() {
        let bins: Bins = vec![
            (1, 10000),
            (2, 5000),
            (3, 2000),
            (4, 800),
            (5, 500),
            (6, 400),
            (7, 500),
            (8, 700),
            (9, 800),
            (10, 600),
        ];
        let (valley, rlimit) = histogram_range(&bins);
        assert!(valley >= 4 && valley <= 5, "valley at {}", valley);
        assert!(rlimit >= 7, "rlimit at {}", rlimit);
    }

    #[test]
    fn test_save_load_round_trip() {
        let mut graph = graph_for(&["ACGTACGTAC"], 5);
        graph.bins = vec![(1, 6), (2, 1)];
        let mut buf = Vec::new();
        graph.save(&mut buf).unwrap();
        let loaded = DBGraph::load(&mut &buf[..]).unwrap();
        assert_eq!(loaded.kmer_len(), 5);
        assert_eq!(loaded.graph_size(), graph.graph_size());
        assert_eq!(loaded.bins(), graph.bins());
        assert!(loaded.is_stranded());
        let node = loaded.get_node_from_seq(b"ACGTA");
        assert_eq!(loaded.abundance(node), graph.abundance(graph.get_node_from_seq(b"ACGTA")));
    }
}
