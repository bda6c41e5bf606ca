use crate::graph::{rev_comp_node, DBGraph, Node, Successor};
use log::{info, warn};
use readkmer::{complement, reverse_complement_seq, ReadHolder};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU8, Ordering};

pub type Bases = Vec<Successor>;

/// An assembled sequence under construction.
///
/// `kmers` holds the node id of every kmer window of `seq` (0 for unknown
/// seam positions), so `seq.len() == kmers.len() + kmer_len - 1`.
/// `next_left`/`next_right` are denied neighbors: nodes that could extend
/// the contig but were already claimed by another worker. Fragments started
/// from a previous contig's flank carry a link (an index into the parent
/// contig set) and a shift giving the takeoff position within the parent
/// (positive from the right end, negative from the left end).
/// `left_extend`/`right_extend` count the newly assembled bases on each end;
/// they bound how much may be clipped at a kmer-step boundary.
/// Ownership during connect-and-extend goes solely through `is_taken`.
///
/// An extreme case is an "empty linker": no kmers and a kmer_len-1 base
/// sequence representing two adjacent denied nodes.
#[derive(Debug, Default)]
pub struct Contig {
    pub seq: Vec<u8>,
    pub kmers: Vec<Node>,
    pub kmer_len: usize,

    pub next_left: Node,
    pub next_right: Node,

    pub left_link: Option<usize>,
    pub left_shift: i32,
    pub right_link: Option<usize>,
    pub right_shift: i32,

    pub left_extend: usize,
    pub right_extend: usize,

    pub is_taken: AtomicU8,
}

impl Contig {
    /// Wraps a previously assembled sequence and claims its kmers in the
    /// (possibly longer-k) graph.
    pub fn from_seq(contig: &[u8], graph: &DBGraph) -> Contig {
        let kmer_len = graph.kmer_len();
        let mut rh = ReadHolder::new(false);
        rh.push(contig);
        let mut kmers: Vec<Node> = Vec::with_capacity(contig.len() + 1 - kmer_len);
        for kmer in rh.kmers(kmer_len) {
            // iteration is backwards; reversed below
            let node = graph.get_node(&kmer);
            kmers.push(node);
            if node != 0 {
                graph.set_visited(node, 1, 0);
            }
        }
        kmers.reverse();
        Contig {
            seq: contig.to_vec(),
            kmers,
            kmer_len,
            ..Default::default()
        }
    }

    /// Builds a contig from a seed node and its two extensions.
    /// `lnode`/`rnode` are the denied neighbors (0 if extension just ended).
    pub fn from_extensions(
        to_left: &Bases,
        to_right: &Bases,
        initial_node: Node,
        lnode: Node,
        rnode: Node,
        graph: &DBGraph,
    ) -> Contig {
        let mut seq = Vec::with_capacity(to_left.len() + graph.kmer_len() + to_right.len());
        let mut kmers = Vec::with_capacity(to_left.len() + 1 + to_right.len());
        for base in to_left.iter().rev() {
            seq.push(complement(base.base));
            kmers.push(rev_comp_node(base.node));
        }
        kmers.push(initial_node);
        seq.extend(graph.node_seq(initial_node).into_bytes());
        for base in to_right {
            seq.push(base.base);
            kmers.push(base.node);
        }
        let len = seq.len();
        Contig {
            seq,
            kmers,
            kmer_len: graph.kmer_len(),
            next_left: lnode,
            next_right: rnode,
            left_extend: len,
            right_extend: len,
            ..Default::default()
        }
    }

    /// Builds a connector/extender fragment taking off from a parent contig.
    pub fn from_link(
        link: usize,
        shift: i32,
        takeoff_node: Node,
        extension: &Bases,
        rnode: Node,
        graph: &DBGraph,
    ) -> Contig {
        let kmer = graph.node_seq(takeoff_node);
        let mut seq: Vec<u8> = kmer.into_bytes()[1..].to_vec();
        let mut kmers = Vec::with_capacity(extension.len());
        for base in extension {
            seq.push(base.base);
            kmers.push(base.node);
        }
        let len = seq.len();
        Contig {
            seq,
            kmers,
            kmer_len: graph.kmer_len(),
            next_left: takeoff_node,
            next_right: rnode,
            left_link: Some(link),
            left_shift: shift,
            left_extend: len,
            right_extend: len,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    pub fn taken(&self) -> u8 {
        self.is_taken.load(Ordering::Acquire)
    }

    pub fn try_take(&self) -> bool {
        self.is_taken
            .compare_exchange(0, 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn mark(&self, value: u8) {
        self.is_taken.store(value, Ordering::Release);
    }

    pub fn reverse_complement(&mut self) {
        reverse_complement_seq(&mut self.seq);
        self.kmers.reverse();
        for kmer in self.kmers.iter_mut() {
            *kmer = rev_comp_node(*kmer);
        }
        std::mem::swap(&mut self.next_left, &mut self.next_right);
        self.next_left = rev_comp_node(self.next_left);
        self.next_right = rev_comp_node(self.next_right);
        std::mem::swap(&mut self.left_link, &mut self.right_link);
        std::mem::swap(&mut self.left_shift, &mut self.right_shift);
        std::mem::swap(&mut self.left_extend, &mut self.right_extend);
    }

    pub fn add_to_right(&mut self, other: &Contig) {
        if other.right_extend < other.seq.len() {
            self.right_extend = other.right_extend;
        } else {
            self.right_extend = (self.right_extend + other.right_extend + 1).saturating_sub(self.kmer_len);
            if self.left_extend == self.seq.len() {
                self.left_extend = self.right_extend;
            }
        }
        self.seq.extend_from_slice(&other.seq[self.kmer_len - 1..]);
        self.kmers.extend_from_slice(&other.kmers);
        self.next_right = other.next_right;
        self.right_link = other.right_link;
        self.right_shift = other.right_shift;
    }

    pub fn add_to_left(&mut self, other: &Contig) {
        if other.left_extend < other.seq.len() {
            self.left_extend = other.left_extend;
        } else {
            self.left_extend = (self.left_extend + other.left_extend + 1).saturating_sub(self.kmer_len);
            if self.right_extend == self.seq.len() {
                self.right_extend = self.left_extend;
            }
        }
        let mut seq = other.seq[..other.seq.len() + 1 - self.kmer_len].to_vec();
        seq.append(&mut self.seq);
        self.seq = seq;
        let mut kmers = other.kmers.clone();
        kmers.append(&mut self.kmers);
        self.kmers = kmers;
        self.next_left = other.next_left;
        self.left_link = other.left_link;
        self.left_shift = other.left_shift;
    }

    pub fn clip_right(&mut self, clip: usize) {
        if clip > 0 {
            self.right_extend = self.right_extend.saturating_sub(clip);
            self.seq.truncate(self.seq.len().saturating_sub(clip));
            self.kmers.truncate(self.kmers.len().saturating_sub(clip));
            self.next_right = 0;
            self.right_link = None;
            self.right_shift = 0;
        }
    }

    pub fn clip_left(&mut self, clip: usize) {
        if clip > 0 {
            self.left_extend = self.left_extend.saturating_sub(clip);
            self.seq.drain(..clip.min(self.seq.len()));
            self.kmers.drain(..clip.min(self.kmers.len()));
            self.next_left = 0;
            self.left_link = None;
            self.left_shift = 0;
        }
    }

    /// Position of the minimal non-zero kmer.
    pub fn min_kmer_position(&self) -> usize {
        let mut mkp = 0;
        for i in 0..self.kmers.len() {
            if self.kmers[i] != 0 && (self.kmers[mkp] == 0 || self.kmers[i] < self.kmers[mkp]) {
                mkp = i;
            }
        }
        mkp
    }

    /// Stabilizes orientation using the minimal kmer in the contig.
    pub fn select_min_direction(&mut self) {
        if self.kmers.is_empty() {
            return;
        }
        let minkmer = self.kmers[self.min_kmer_position()];
        if minkmer != 0 && minkmer % 2 == 1 {
            self.reverse_complement();
        }
    }

    /// Stable origin for circular contigs: puts the minimal kmer at the
    /// beginning. Assumes the next right extension would be `kmers[0]`.
    pub fn rotate_circular_to_min_kmer(&mut self) {
        let kmer_len = self.kmer_len;
        self.seq.truncate(self.seq.len() + 1 - kmer_len);
        let mut first_base = self.min_kmer_position();
        // cut after the minimal kmer so the rotation brings it to the front
        if self.kmers[first_base] % 2 == 1 {
            first_base = (first_base + kmer_len) % self.kmers.len();
        }
        self.seq.rotate_left(first_base);
        self.kmers.rotate_left(first_base);
        self.next_left = *self.kmers.last().unwrap_or(&0);
        self.next_right = self.kmers[self.kmers.len() + 1 - kmer_len];
        self.kmers.truncate(self.kmers.len() + 1 - kmer_len);

        self.left_link = None;
        self.left_shift = 0;
        self.right_link = None;
        self.right_shift = 0;
        // prevents any further clipping
        self.left_extend = 0;
        self.right_extend = 0;
    }
}

fn first_kmer_or_right(contig: &Contig) -> Node {
    if contig.kmers.is_empty() {
        contig.next_right
    } else {
        contig.kmers[0]
    }
}

fn last_kmer_or_left(contig: &Contig) -> Node {
    if contig.kmers.is_empty() {
        contig.next_left
    } else {
        *contig.kmers.last().unwrap_or(&0)
    }
}

/// Connects fragments produced by different workers through their denied
/// nodes, pairing doubled empty linkers on the way.
pub fn connect_fragments(fragments: Vec<Vec<Contig>>, graph: &DBGraph) -> Vec<Contig> {
    let mut arena: Vec<Option<Contig>> = Vec::new();
    let mut denied_left: HashMap<Node, usize> = HashMap::new();
    let mut denied_right: HashMap<Node, usize> = HashMap::new();

    for worker_fragments in fragments {
        for mut contig in worker_fragments {
            // orient so two identical empty linkers meet the same way
            if contig.next_left > contig.next_right {
                contig.reverse_complement();
            }
            let index = arena.len();
            let mut absorbed = false;

            if contig.next_left != 0 {
                if let Some(&other_index) = denied_left.get(&contig.next_left) {
                    let other = arena[other_index].as_ref();
                    let merge_into_other = other.map_or(false, |other| {
                        contig.kmers.is_empty()
                            && contig.left_link.is_some()
                            && other.left_link.is_none()
                            && contig.next_right == first_kmer_or_right(other)
                    });
                    let merge_into_contig = !merge_into_other
                        && other.map_or(false, |other| {
                            other.kmers.is_empty()
                                && other.left_link.is_some()
                                && contig.left_link.is_none()
                                && other.next_right == first_kmer_or_right(&contig)
                        });
                    if merge_into_other {
                        if let Some(other) = arena[other_index].as_mut() {
                            other.add_to_left(&contig);
                        }
                        continue; // contig absorbed
                    } else if merge_into_contig {
                        if let Some(other) = arena[other_index].take() {
                            denied_right.remove(&other.next_right);
                            contig.add_to_left(&other);
                        }
                        denied_left.insert(contig.next_left, index);
                    } else {
                        warn!(
                            "Unexpected left fork: {} {}",
                            graph.node_seq(contig.next_left),
                            contig.next_left
                        );
                    }
                } else {
                    denied_left.insert(contig.next_left, index);
                }
            }

            if contig.next_right != 0 {
                if let Some(&other_index) = denied_right.get(&contig.next_right) {
                    let other = arena[other_index].as_ref();
                    let merge_into_other = other.map_or(false, |other| {
                        contig.kmers.is_empty()
                            && contig.right_link.is_some()
                            && other.right_link.is_none()
                            && contig.next_left == last_kmer_or_left(other)
                    });
                    let merge_into_contig = !merge_into_other
                        && other.map_or(false, |other| {
                            other.kmers.is_empty()
                                && other.right_link.is_some()
                                && contig.right_link.is_none()
                                && other.next_left == last_kmer_or_left(&contig)
                        });
                    if merge_into_other {
                        denied_left.remove(&contig.next_left);
                        if let Some(other) = arena[other_index].as_mut() {
                            other.add_to_right(&contig);
                        }
                        absorbed = true;
                    } else if merge_into_contig {
                        if let Some(other) = arena[other_index].take() {
                            denied_left.remove(&other.next_left);
                            contig.add_to_right(&other);
                        }
                        denied_right.insert(contig.next_right, index);
                    } else {
                        warn!(
                            "Unexpected right fork: {} {}",
                            graph.node_seq(contig.next_right),
                            contig.next_right
                        );
                    }
                } else {
                    denied_right.insert(contig.next_right, index);
                }
            }

            if !absorbed {
                arena.push(Some(contig));
            } else {
                // keep index alignment for entries already registered
                denied_left.retain(|_, v| *v != index);
                denied_right.retain(|_, v| *v != index);
                arena.push(None);
            }
        }
    }

    // join fragments through their denied nodes
    for i in 0..arena.len() {
        let mut contig = match arena[i].take() {
            Some(contig) => contig,
            None => continue,
        };
        if contig.kmers.is_empty() {
            arena[i] = Some(contig);
            continue;
        }

        if contig.next_right != 0 {
            denied_right.remove(&contig.next_right);
        }
        if contig.next_left != 0 {
            denied_left.remove(&contig.next_left);
        }

        let mut keep_doing = true;
        while keep_doing {
            keep_doing = false;
            if contig.next_right != 0 {
                let rnode = *contig.kmers.last().unwrap_or(&0);
                if let Some(&ri) = denied_left.get(&rnode) {
                    if let Some(rcontig) = arena[ri].take() {
                        keep_doing = true;
                        if rcontig.next_right != 0 {
                            denied_right.remove(&rcontig.next_right);
                        }
                        contig.add_to_right(&rcontig);
                    }
                    denied_left.remove(&rnode);
                } else if let Some(&ri) = denied_right.get(&rev_comp_node(rnode)) {
                    if let Some(mut rcontig) = arena[ri].take() {
                        keep_doing = true;
                        if rcontig.next_left != 0 {
                            denied_left.remove(&rcontig.next_left);
                        }
                        rcontig.reverse_complement();
                        contig.add_to_right(&rcontig);
                    }
                    denied_right.remove(&rev_comp_node(rnode));
                }
            }
            if contig.next_left != 0 {
                let lnode = contig.kmers[0];
                if let Some(&li) = denied_right.get(&lnode) {
                    if let Some(lcontig) = arena[li].take() {
                        keep_doing = true;
                        if lcontig.next_left != 0 {
                            denied_left.remove(&lcontig.next_left);
                        }
                        contig.add_to_left(&lcontig);
                    }
                    denied_right.remove(&lnode);
                } else if let Some(&li) = denied_left.get(&rev_comp_node(lnode)) {
                    if let Some(mut lcontig) = arena[li].take() {
                        keep_doing = true;
                        if lcontig.next_right != 0 {
                            denied_right.remove(&lcontig.next_right);
                        }
                        lcontig.reverse_complement();
                        contig.add_to_left(&lcontig);
                    }
                    denied_left.remove(&rev_comp_node(lnode));
                }
            }
        }

        // circular and not very short
        if contig.next_right != 0
            && contig.next_right == contig.kmers[0]
            && contig.kmers.len() >= contig.kmer_len
        {
            contig.rotate_circular_to_min_kmer();
        }

        arena[i] = Some(contig);
    }

    arena.into_iter().flatten().collect()
}

/// Merges connectors and extenders produced with a longer kmer into the
/// contig set from the previous iteration.
pub fn connect_and_extend_contigs(scontigs: &mut Vec<Contig>, mut extensions: Vec<Contig>) {
    if scontigs.is_empty() {
        return;
    }
    let kmer_len = scontigs[0].kmer_len;

    // shift-sorted connections to each side of each parent contig
    type ExtensionsMap = HashMap<usize, BTreeMap<i32, usize>>;
    let mut left_connections: ExtensionsMap = HashMap::new();
    let mut right_connections: ExtensionsMap = HashMap::new();
    let mut left_extensions: ExtensionsMap = HashMap::new();
    let mut right_extensions: ExtensionsMap = HashMap::new();
    let mut connectors = 0usize;
    let mut extenders = 0usize;
    for (index, ex) in extensions.iter().enumerate() {
        match (ex.left_link, ex.right_link) {
            (Some(left), Some(right)) => {
                connectors += 1;
                if ex.left_shift < 0 {
                    left_connections.entry(left).or_default().insert(-(ex.left_shift + 1), index);
                } else {
                    right_connections.entry(left).or_default().insert(ex.left_shift - 1, index);
                }
                if ex.right_shift < 0 {
                    left_connections.entry(right).or_default().insert(-(ex.right_shift + 1), index);
                } else {
                    right_connections.entry(right).or_default().insert(ex.right_shift - 1, index);
                }
            }
            (Some(left), None) => {
                extenders += 1;
                if ex.left_shift < 0 {
                    left_extensions.entry(left).or_default().insert(-(ex.left_shift + 1), index);
                } else {
                    right_extensions.entry(left).or_default().insert(ex.left_shift - 1, index);
                }
            }
            (None, Some(right)) => {
                extenders += 1;
                if ex.right_shift < 0 {
                    left_extensions.entry(right).or_default().insert(-(ex.right_shift + 1), index);
                } else {
                    right_extensions.entry(right).or_default().insert(ex.right_shift - 1, index);
                }
            }
            (None, None) => {}
        }
    }
    info!("Connectors: {} Extenders: {}", connectors, extenders);

    for contig in scontigs.iter() {
        contig.mark(0);
    }
    let mut arena: Vec<Option<Contig>> = scontigs.drain(..).map(Some).collect();

    for i in 0..arena.len() {
        if arena[i].as_ref().map_or(true, |c| c.taken() != 0) {
            continue;
        }
        let mut contig = arena[i].take().unwrap_or_default();

        let mut circular = false;
        for p in 0..2 {
            let mut plus = p == 0;
            let mut fragment = i;
            loop {
                // connection to another contig?
                let connection = if plus {
                    right_connections.get(&fragment)
                } else {
                    left_connections.get(&fragment)
                };
                if let Some(shift_map) = connection {
                    if shift_map.len() > 1 {
                        warn!("Multiple connections");
                    }
                    let ci = match shift_map.iter().next() {
                        Some((_, &ci)) => ci,
                        None => break,
                    };
                    {
                        // either reversed or circular
                        let connector = &mut extensions[ci];
                        if connector.right_link == Some(fragment) {
                            let rshift = connector.right_shift;
                            let rshift = if rshift > 0 { rshift - 1 } else { -(rshift + 1) } as usize;
                            if rshift < contig.kmers.len()
                                && rev_comp_node(connector.next_right)
                                    == contig.kmers[contig.kmers.len() - rshift - 1]
                            {
                                connector.reverse_complement();
                            }
                        }
                    }
                    let connector = &extensions[ci];
                    let lshift = connector.left_shift;
                    contig.clip_right(if lshift > 0 { (lshift - 1) as usize } else { (-(lshift + 1)) as usize });
                    if connector.left_link != Some(fragment)
                        || contig.kmers.last() != Some(&connector.next_left)
                    {
                        warn!("Corrupted connection to the takeoff contig, connector skipped");
                        break;
                    }
                    contig.add_to_right(connector);

                    let next = match connector.right_link {
                        Some(next) => next,
                        None => break,
                    };
                    let rshift = connector.right_shift;
                    let new_plus = rshift < 0;
                    let clip = if new_plus { -(rshift + 1) } else { rshift - 1 } as usize;
                    let landing = connector.next_right;

                    if next == i {
                        // came back to the starting contig
                        if !new_plus {
                            contig.reverse_complement();
                        }
                        contig.clip_left(clip);
                        if contig.kmers.first() != Some(&landing) {
                            warn!("Corrupted connection to the landing contig");
                        }
                        circular = true;
                        contig.rotate_circular_to_min_kmer();
                        break;
                    }
                    // don't connect an already used contig (multiple connection)
                    if arena[next].as_ref().map_or(true, |c| c.taken() != 0) {
                        break;
                    }
                    let mut landing_contig = arena[next].take().unwrap_or_default();
                    plus = new_plus;
                    if !plus {
                        landing_contig.reverse_complement();
                    }
                    landing_contig.clip_left(clip);
                    if landing_contig.kmers.first() != Some(&landing) {
                        warn!("Corrupted connection to the landing contig");
                    }
                    contig.add_to_right(&landing_contig);
                    fragment = next;
                    continue;
                }

                // extension of this end?
                let extension = if plus {
                    right_extensions.get(&fragment)
                } else {
                    left_extensions.get(&fragment)
                };
                if let Some(shift_map) = extension {
                    let mut extra_len = 0i64;
                    for (&shift, &ei) in shift_map {
                        let shift = shift as usize;
                        if extensions[ei].kmers.len() as i64 - shift as i64 > extra_len {
                            {
                                let extender = &mut extensions[ei];
                                if extender.right_link == Some(fragment) {
                                    extender.reverse_complement();
                                }
                            }
                            let extender = &extensions[ei];
                            contig.clip_right(extra_len as usize + shift);
                            if extender.left_link != Some(fragment)
                                || contig.kmers.last() != Some(&extender.next_left)
                            {
                                warn!("Corrupted extension, extender skipped");
                                continue;
                            }
                            contig.add_to_right(extender);
                            extra_len = extender.kmers.len() as i64 - shift as i64;
                        }
                    }
                }
                break;
            }
            contig.mark(2); // final contig will be kept
            if circular {
                break;
            }
            contig.reverse_complement();
        }
        // clip flanks which are not double checked
        contig.clip_left(kmer_len.min(contig.left_extend));
        contig.clip_right(kmer_len.min(contig.right_extend));
        arena[i] = Some(contig);
    }

    // remove fragments; stabilize orientation and order which are random
    // in multithreading
    let mut result: Vec<Contig> = arena
        .into_iter()
        .flatten()
        .filter(|contig| contig.taken() == 2)
        .collect();
    for contig in result.iter_mut() {
        contig.select_min_direction();
    }
    result.sort_by(|a, b| a.seq.cmp(&b.seq));
    *scontigs = result;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_contig(seq: &[u8], kmers: Vec<Node>, kmer_len: usize) -> Contig {
        Contig {
            seq: seq.to_vec(),
            kmers,
            kmer_len,
            ..Default::default()
        }
    }

    #[test]
    fn test_reverse_complement_swaps_everything() {
        let mut contig = raw_contig(b"AACGT", vec![2, 4, 7], 3);
        contig.next_left = 10;
        contig.next_right = 21;
        contig.left_extend = 1;
        contig.right_extend = 2;
        contig.reverse_complement();
        assert_eq!(contig.seq, b"ACGTT");
        assert_eq!(contig.kmers, vec![6, 5, 3]);
        assert_eq!(contig.next_left, 20);
        assert_eq!(contig.next_right, 11);
        assert_eq!(contig.left_extend, 2);
        assert_eq!(contig.right_extend, 1);
    }

    #[test]
    fn test_add_to_right_overlap() {
        // contigs overlap by kmer_len-1 bases
        let mut a = raw_contig(b"ACGTA", vec![2, 4, 6], 3);
        a.left_extend = 5;
        a.right_extend = 5;
        let mut b = raw_contig(b"TACGG", vec![8, 10, 12], 3);
        b.left_extend = 5;
        b.right_extend = 5;
        b.next_right = 30;
        a.add_to_right(&b);
        assert_eq!(a.seq, b"ACGTACGG");
        assert_eq!(a.kmers, vec![2, 4, 6, 8, 10, 12]);
        assert_eq!(a.next_right, 30);
        assert_eq!(a.seq.len(), a.kmers.len() + 3 - 1);
    }

    #[test]
    fn test_clipping() {
        let mut contig = raw_contig(b"ACGTACG", vec![2, 4, 6, 8, 10], 3);
        contig.left_extend = 7;
        contig.right_extend = 7;
        contig.next_right = 12;
        contig.clip_right(2);
        assert_eq!(contig.seq, b"ACGTA");
        assert_eq!(contig.kmers, vec![2, 4, 6]);
        assert_eq!(contig.next_right, 0);
        contig.clip_left(1);
        assert_eq!(contig.seq, b"CGTA");
        assert_eq!(contig.kmers, vec![4, 6]);
    }

    #[test]
    fn test_min_direction() {
        let mut contig = raw_contig(b"AACGT", vec![9, 4, 7], 3);
        // minimal non-zero kmer is 4 (even) - no flip
        contig.select_min_direction();
        assert_eq!(contig.seq, b"AACGT");
        let mut contig = raw_contig(b"AACGT", vec![9, 5, 7], 3);
        // minimal is 5 (odd) - flip
        contig.select_min_direction();
        assert_eq!(contig.seq, b"ACGTT");
    }

    #[test]
    fn test_min_kmer_position_ignores_zero() {
        let contig = raw_contig(b"ACGTACG", vec![0, 8, 0, 2, 12], 3);
        assert_eq!(contig.min_kmer_position(), 3);
    }
}
